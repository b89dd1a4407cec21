use colored::*;
use std::sync::atomic::{AtomicBool, Ordering};

// Global debug state
static DEBUG_MODE: AtomicBool = AtomicBool::new(false);

pub fn set_debug_mode(enabled: bool) {
    DEBUG_MODE.store(enabled, Ordering::Relaxed);
}

pub fn is_debug_enabled() -> bool {
    DEBUG_MODE.load(Ordering::Relaxed)
}

pub fn info(message: &str) {
    println!("{}", message);
}

pub fn success(message: &str) {
    println!("{} {}", "ok:".green().bold(), message);
}

pub fn warn(message: &str) {
    eprintln!("{} {}", "warning:".yellow().bold(), message);
}

pub fn error(message: &str) {
    eprintln!("{} {}", "error:".red().bold(), message);
}

pub fn debug(message: &str) {
    if is_debug_enabled() {
        eprintln!("{} {}", "debug:".dimmed(), message);
    }
}
