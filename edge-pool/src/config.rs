use std::time::Duration;

/// Pool-wide limits (spec.md §4.2). One `Pool` instance serves every
/// `(host, port, unit_id, timeout)` key; the limits below apply to the
/// pool as a whole, not per key.
#[derive(Clone, Copy, Debug)]
pub struct PoolConfig {
    pub max_connections: usize,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub health_check_interval: Duration,
    pub health_check_failure_threshold: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 5,
            acquire_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(60),
            health_check_interval: Duration::from_secs(30),
            health_check_failure_threshold: 3,
        }
    }
}
