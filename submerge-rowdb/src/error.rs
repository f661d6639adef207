use thiserror::Error;

/// Errors surfaced by the storage engine core.
///
/// `Interrupted`, `SindexNotReady`, `NotFound`, `UserQueryError` and
/// `BackendError` are the kinds named by the error handling design; `Other`
/// is the catch-all for I/O and serialization failures bubbling up from the
/// persistence layer, wrapped in `submerge_base`'s backtrace-carrying error.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("operation was interrupted")]
    Interrupted,

    /// Acquisition of a secondary index that is in construction or being
    /// deleted. Carries a human-readable distinction between the two so
    /// callers can tell "still building" from "being torn down" apart.
    #[error("index `{index_name}` {reason}")]
    SindexNotReady {
        index_name: String,
        reason: &'static str,
    },

    #[error("no such index `{0}`")]
    NotFound(String),

    #[error("{0}")]
    UserQueryError(String),

    #[error("backend error: {0}")]
    BackendError(String),

    #[error(transparent)]
    Other(#[from] submerge_base::Error),

    #[error("redb error: {0}")]
    Redb(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

impl StoreError {
    pub fn sindex_being_deleted(index_name: impl Into<String>) -> Self {
        StoreError::SindexNotReady {
            index_name: index_name.into(),
            reason: "was accessed while it was being deleted",
        }
    }

    pub fn sindex_in_construction(index_name: impl Into<String>) -> Self {
        StoreError::SindexNotReady {
            index_name: index_name.into(),
            reason: "was accessed before its construction was finished",
        }
    }
}

impl From<redb::DatabaseError> for StoreError {
    fn from(e: redb::DatabaseError) -> Self {
        StoreError::Redb(e.to_string())
    }
}

impl From<redb::TransactionError> for StoreError {
    fn from(e: redb::TransactionError) -> Self {
        StoreError::Redb(e.to_string())
    }
}

impl From<redb::TableError> for StoreError {
    fn from(e: redb::TableError) -> Self {
        StoreError::Redb(e.to_string())
    }
}

impl From<redb::StorageError> for StoreError {
    fn from(e: redb::StorageError) -> Self {
        StoreError::Redb(e.to_string())
    }
}

impl From<redb::CommitError> for StoreError {
    fn from(e: redb::CommitError) -> Self {
        StoreError::Redb(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for StoreError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        StoreError::Other(submerge_base::err(e.to_string()))
    }
}
