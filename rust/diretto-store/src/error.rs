use thiserror::Error;

/// The common error type used by this crate
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DirettoStoreError {
    /// No record exists under the requested identifier
    #[error("Record {0} not found")]
    NotFound(String),

    /// A record already exists under the identifier being created
    #[error("Record {0} already exists")]
    Conflict(String),

    /// The requested view has not been defined
    #[error("View {0} is not defined")]
    UnknownView(String),

    /// A record could not be converted to or from its stored form
    #[error("Failed to encode or decode a record: {0}")]
    Encoding(String),

    /// A blob path is empty or resolves outside of the storage root
    #[error("Invalid blob path: {0}")]
    InvalidPath(String),

    /// The store (or pool) was configured incorrectly
    #[error("Invalid store configuration: {0}")]
    Configuration(String),

    /// An error that occurs when talking to a storage backend
    #[error("Storage backend error: {0}")]
    Backend(String),
}
