use thiserror::Error;

/// Errors surfaced by the escrow/settlement core.
///
/// `Conflict` always carries the expected and actual state so callers can
/// tell a lost race ("already done", safe to re-read) from an operation that
/// is simply not allowed.
#[derive(Error, Debug)]
pub enum EscrowError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("conflict on {entity} {id}: expected {expected}, found {actual}")]
    Conflict {
        entity: &'static str,
        id: String,
        expected: String,
        actual: String,
    },

    #[error("open cancellation request {existing_id} already exists for order {order_id}")]
    DuplicateCancellation {
        order_id: String,
        existing_id: String,
    },

    #[error("external dependency error: {0}")]
    ExternalDependency(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "storage-rocksdb")]
    #[error("storage error: {0}")]
    Storage(#[from] rocksdb::Error),

    #[error("internal error: {0}")]
    Internal(Box<dyn std::error::Error + Send + Sync>),
}

impl EscrowError {
    pub fn conflict(
        entity: &'static str,
        id: impl Into<String>,
        expected: impl ToString,
        actual: impl ToString,
    ) -> Self {
        Self::Conflict {
            entity,
            id: id.into(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EscrowError>;
