use std::path::{Path, PathBuf};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ContextError>;

/// Failure kinds surfaced by the assembly engine. Callers branch on the
/// variant, not the message text.
#[derive(Debug, Error)]
pub enum ContextError {
    /// A memory or token budget was breached, before or during a write.
    #[error("{0}")]
    LimitExceeded(String),

    /// The context ID (or its artifact file) does not exist.
    #[error("context not found: {0}")]
    NotFound(String),

    /// A paginated read asked for more lines than one request may return.
    #[error("requested range of {requested} lines exceeds the {cap} line cap")]
    RangeTooLarge { requested: usize, cap: usize },

    /// Filesystem read/write/stat failure not covered by a more specific kind.
    #[error("i/o failure on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// Recovered panics and other defects in the async entry point.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ContextError {
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        ContextError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn not_found(id: impl Into<String>) -> Self {
        ContextError::NotFound(id.into())
    }
}
