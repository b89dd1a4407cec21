use std::path::PathBuf;
use thiserror::Error;

use super::Kind;
use super::provision::ProvisionError;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{kind} {key} not found")]
    NotFound { kind: Kind, key: String },

    #[error("{kind} name '{name}' is already in use")]
    DuplicateName { kind: Kind, name: String },

    #[error("{kind} id {id} is already in use")]
    DuplicateId { kind: Kind, id: u32 },

    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error("corrupt record in {} line {line}: {reason}", file.display())]
    CorruptRecord {
        file: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("could not lock account database at {} within {waited_ms}ms", path.display())]
    LockTimeout { path: PathBuf, waited_ms: u64 },

    #[error("commit of {} failed: {source}", path.display())]
    CommitFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("reading {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Non-fatal conditions attached to an otherwise successful mutation.
/// Provisioning failures never roll back a committed record.
#[derive(Error, Debug)]
pub enum Warning {
    #[error("{what} for user '{user}': {source}")]
    Provisioning {
        what: &'static str,
        user: String,
        source: ProvisionError,
    },

    #[error("primary group {gid} of user '{user}' does not exist")]
    UnknownPrimaryGroup { user: String, gid: u32 },
}
