/// Errors surfaced by every docpipe-store repository.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {message}")]
    Database { message: String },

    #[error("serialization error: {message}")]
    Serialization { message: String },

    #[error("invariant violation: {message}")]
    Invariant { message: String },
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Database {
            message: e.to_string(),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization {
            message: e.to_string(),
        }
    }
}
