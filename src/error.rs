//! Error taxonomy shared by the autotuner and readiness tracker.

use thiserror::Error;

/// Errors the library surfaces to callers.
///
/// `FilesystemTransient` is never returned as a `Result::Err` — the
/// readiness tracker constructs it only to log its rendered message at
/// ERROR level and keeps going (see `readiness.rs`), so a marker-file
/// write/remove failure never flips the in-memory verdict.
#[derive(Error, Debug)]
pub enum PodInitError {
    #[error("unknown profile: {0}")]
    UnknownProfile(String),

    #[error(
        "insufficient resources: {reason} (budget {budget_mb} MB, reserved {reserved_mb} MB)"
    )]
    InsufficientResources {
        reason: String,
        budget_mb: u64,
        reserved_mb: u64,
    },

    #[error("failed to create readiness marker directory {path}: {source}")]
    DirectoryCreationFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("transient filesystem error on readiness marker {path}: {source}")]
    FilesystemTransient {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, PodInitError>;
