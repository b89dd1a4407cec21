pub mod group;
pub mod user;

use anyhow::Result;
use serde::Serialize;

use crate::store::Warning;
use crate::ui;

/// Provisioning and advisory warnings never change the exit status; they
/// only go to stderr.
pub(crate) fn print_warnings(warnings: &[Warning]) {
    for warning in warnings {
        ui::warn(&warning.to_string());
    }
}

pub(crate) fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
