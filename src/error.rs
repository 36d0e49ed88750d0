use thiserror::Error;

/// Failure taxonomy surfaced by the core. Extraction-tier misses are not
/// errors; they fall through to the next tier and never appear here.
#[derive(Debug, Error)]
pub enum Error {
    /// A referenced record does not exist. Distinguishable from internal
    /// faults so the caller can map it to a 404-equivalent.
    #[error("{resource} {id} not found")]
    NotFound { resource: &'static str, id: String },

    /// The requesting identity does not own the record and holds no
    /// administrative capability.
    #[error("access denied")]
    Forbidden,

    /// Text could not be obtained from a document (corrupt file, unsupported
    /// encoding, unusable MIME type).
    #[error("text extraction failed: {0}")]
    Extraction(String),

    /// Unexpected failure while reconciling an analysis.
    #[error("analysis failed: {0}")]
    Reconciliation(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Storage(format!("serialize: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
