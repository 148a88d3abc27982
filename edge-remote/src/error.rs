use thiserror::Error;

pub type RemoteResult<T> = Result<T, RemoteError>;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("remote database error: {0}")]
    Diesel(#[from] diesel::result::Error),
    #[error("remote database pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),
    #[error("could not decode remote row: {0}")]
    Decode(String),
    #[error("remote api request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("remote api returned {status}: {body}")]
    ApiError { status: u16, body: String },
    #[error("background task was cancelled")]
    Cancelled,
}

impl edge_common::InternalError for RemoteError {
    fn internal_error(message: String) -> Self {
        RemoteError::Decode(message)
    }
}

impl From<RemoteError> for edge_common::EdgeError {
    fn from(err: RemoteError) -> Self {
        edge_common::EdgeError::new(edge_common::ErrorKind::RemoteUnavailable(err.to_string()))
    }
}
