//! Error types for plugc-core.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for plugc-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in plugc-core.
#[derive(Debug, Error)]
pub enum Error {
    /// No usable compiler executable is available.
    #[error("no usable compiler binary: {0}")]
    Provisioning(String),

    /// The compiler process could not be spawned.
    #[error("failed to launch compiler '{}': {source}", path.display())]
    Launch {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// IPC communication error with the worker process.
    #[error("IPC error: {0}")]
    Ipc(String),

    /// Frame body could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A declared reference could not be resolved.
    #[error("reference not found: {name}")]
    Reference { name: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The supervisor task is no longer running.
    #[error("compiler supervisor has stopped")]
    Stopped,
}
