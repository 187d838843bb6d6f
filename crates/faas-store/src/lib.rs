// FaaS metadata store - function registry, configs, method associations, folders and metrics
use faas_common::FaasError;
use thiserror::Error;

mod store;
mod transaction;

pub use store::MetadataStore;
pub use transaction::{MetricRecord, Transaction};

// Error Types
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Unrecognized HTTP method: {0}")]
    InvalidMethod(String),
    #[error("Malformed config blob: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<StoreError> for FaasError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => FaasError::NotFound(what),
            StoreError::InvalidMethod(method) => {
                FaasError::Validation(format!("unrecognized HTTP method: {method}"))
            }
            StoreError::Io(e) => FaasError::Io(e),
            other => FaasError::Store(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_mapping() {
        let err: FaasError = StoreError::NotFound("folder cache".to_string()).into();
        assert!(matches!(err, FaasError::NotFound(ref what) if what == "folder cache"));

        let err: FaasError = StoreError::InvalidMethod("FETCH".to_string()).into();
        assert!(matches!(err, FaasError::Validation(ref msg) if msg.contains("FETCH")));

        let err: FaasError = StoreError::Database(sqlx::Error::RowNotFound).into();
        assert!(matches!(err, FaasError::Store(_)));
    }
}
