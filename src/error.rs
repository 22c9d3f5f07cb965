use std::path::PathBuf;

/// Result type for operations that can fail hard
pub type Result<T> = std::result::Result<T, LineageError>;

/// Failures that stop a run. Everything else is reported as a diagnostic.
#[derive(Debug, thiserror::Error)]
pub enum LineageError {
    #[error("Unreadable file {path:?}: {source}")]
    UnreadableFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Root not found: {0}")]
    RootNotFound(String),

    #[error("Template error: {0}")]
    Template(String),
}
