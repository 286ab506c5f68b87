use oc_common::CodecError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Stored tags could not be decoded: {0}")]
    Codec(#[from] CodecError),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// Unknown cache type, or a backend this build was compiled without
    #[error("Unsupported cache type: {0}")]
    Unsupported(String),
}

#[cfg(feature = "sqlite")]
impl From<sqlx::Error> for CacheError {
    fn from(e: sqlx::Error) -> Self {
        CacheError::Database(e.to_string())
    }
}
