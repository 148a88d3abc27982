use thiserror::Error;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("timed out waiting for a connection")]
    AcquireTimeout,
    #[error("pool is shutting down")]
    Closed,
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
}

impl From<PoolError> for edge_common::EdgeError {
    fn from(err: PoolError) -> Self {
        let kind = match err {
            PoolError::AcquireTimeout => edge_common::ErrorKind::PoolExhausted,
            PoolError::Closed => edge_common::ErrorKind::Cancelled,
            PoolError::ConnectionFailed(msg) => edge_common::ErrorKind::ConnectionFailed(msg),
        };
        edge_common::EdgeError::new(kind)
    }
}
