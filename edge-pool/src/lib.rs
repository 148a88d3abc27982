//! Connection pool for device transports (spec.md §4.2), keyed by
//! `(protocol, host, port, unit_id, timeout)`. Grounded on the
//! `Arc<Self>` + `Semaphore` + RAII-return pattern in
//! `other_examples/...conductor-core-src-routing-connection_pool.rs`;
//! see `pool.rs` for where this implementation diverges from that
//! example's `tokio::sync::RwLock` + `mpsc` return channel.

mod config;
mod connection;
mod error;
mod events;
mod pool;

pub use config::PoolConfig;
pub use connection::PooledConnection;
pub use error::PoolError;
pub use events::{PoolEvent, PoolStats};
pub use pool::Pool;

#[cfg(test)]
mod test {
    use super::*;
    use edge_transport::{Protocol, TransportConfig};
    use std::time::Duration;

    fn config(port: u16) -> TransportConfig {
        TransportConfig {
            host: "127.0.0.1".to_string(),
            port,
            unit_id: 1,
            timeout: Duration::from_millis(200),
        }
    }

    #[tokio::test]
    async fn acquire_fails_fast_when_no_listener() {
        let pool = Pool::new(PoolConfig {
            acquire_timeout: Duration::from_millis(200),
            ..PoolConfig::default()
        });
        // Nothing is listening on this port; connect() should fail and
        // the permit should be released back to the semaphore.
        let result = pool.acquire(Protocol::Modbus, config(1)).await;
        assert!(result.is_err());
        assert_eq!(pool.stats().idle, 0);
    }

    #[tokio::test]
    async fn close_all_rejects_further_acquire() {
        let pool = Pool::new(PoolConfig::default());
        pool.close_all().await;
        let result = pool.acquire(Protocol::Modbus, config(2)).await;
        assert!(matches!(result, Err(PoolError::Closed)));
    }

    #[tokio::test]
    async fn stats_start_empty() {
        let pool = Pool::new(PoolConfig::default());
        let stats = pool.stats();
        assert_eq!(stats.total, 0);
        assert_eq!(stats.idle, 0);
        assert_eq!(stats.active, 0);
    }
}
