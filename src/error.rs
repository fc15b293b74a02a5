use std::path::PathBuf;

use thiserror::Error;

/// Error taxonomy for the compose pipeline. Every pipeline stage reports through
/// this type at its boundary; internal recovery (make-valid, per-feature skip)
/// happens before a `ComposeError` is ever constructed.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ComposeError {
    #[error("configuration: {0}")]
    Configuration(String),

    #[error("input validation failed for {path:?}: {reason}")]
    InputValidation { path: PathBuf, reason: String },

    #[error("manifest missing or unreadable at {0:?}")]
    Manifest(PathBuf),

    #[error("geometry operation failed: {0}")]
    Geometry(String),

    #[error("tile generator subprocess failed for scale {scale} zoom [{zoom_min}, {zoom_max}]: {reason}")]
    Subprocess {
        scale: u8,
        zoom_min: u8,
        zoom_max: u8,
        reason: String,
    },

    #[error("storage I/O error: {0}")]
    Storage(String),

    #[error("timed out waiting for worker outputs after {waited_secs}s; missing: {missing:?}")]
    Timeout {
        waited_secs: u64,
        missing: Vec<String>,
    },

    #[error("uploaded archive size mismatch for {path:?}: local={local} remote={remote}")]
    UploadMismatch {
        path: PathBuf,
        local: u64,
        remote: u64,
    },

    #[error("validation gate {gate} failed: {reason}")]
    GateFailed { gate: &'static str, reason: String },

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ComposeError>;
