use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Diesel(#[from] diesel::result::Error),
    #[error("connection pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),
    #[error("migration error: {0}")]
    Migration(String),
    #[error("could not decode stored row: {0}")]
    Decode(String),
    #[error("background task was cancelled")]
    Cancelled,
}

impl edge_common::InternalError for StoreError {
    fn internal_error(message: String) -> Self {
        StoreError::Decode(message)
    }
}

impl From<StoreError> for edge_common::EdgeError {
    fn from(err: StoreError) -> Self {
        edge_common::EdgeError::new(edge_common::ErrorKind::LocalStoreFailure(err.to_string()))
    }
}
