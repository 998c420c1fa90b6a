use crate::ProjectionError;

/// Failures that abort a whole search or download batch.
#[derive(thiserror::Error, Debug)]
pub enum SearchError {
    #[error("Destination directory does not exist: {0}")]
    MissingDestination(String),
    #[error("At least one download worker is required")]
    InvalidWorkerLimit,
    #[error("Station catalog is empty")]
    EmptyCatalog,
    #[error("Nothing to do: {0}")]
    EmptyInput(&'static str),
    #[error("Invalid domain: {0}")]
    InvalidDomain(String),
    #[error("Failed to load station catalog: {0}")]
    Catalog(String),
    #[error("Projection error: {0}")]
    Projection(#[from] ProjectionError),
}

/// Per-item failures talking to the archive. These never abort a batch.
#[derive(thiserror::Error, Debug)]
pub enum ArchiveError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Transient failure: {0}")]
    Transient(String),
    #[error("Unexpected status {0} for {1}")]
    Status(u16, String),
    #[error("Malformed response: {0}")]
    Malformed(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Timed out after {0} seconds")]
    Timeout(u64),
    #[error("Cancelled")]
    Cancelled,
}

impl ArchiveError {
    /// Only connection level faults are worth another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, ArchiveError::Transient(_))
    }
}
