use sudo::RunningAs;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PrivilegeError {
    #[error("modifying system account files requires root (try sudo, or use --root)")]
    NeedRoot,
}

/// Mutating the real system files needs euid 0. A rerooted tree (`--root`)
/// belongs to whoever owns it, so no check applies there. Lookups never
/// require privileges.
pub fn ensure_can_mutate(rerooted: bool) -> Result<(), PrivilegeError> {
    if rerooted {
        return Ok(());
    }
    match sudo::check() {
        // Suid means the effective uid is root even though the caller is not
        RunningAs::Root | RunningAs::Suid => Ok(()),
        RunningAs::User => Err(PrivilegeError::NeedRoot),
    }
}
