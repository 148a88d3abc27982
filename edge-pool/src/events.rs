use edge_transport::{Protocol, TransportConfig};

/// Pool lifecycle events (spec.md §4.2: "emits events
/// `created|released|error|disconnected|removed|closed`").
#[derive(Clone, Debug)]
pub enum PoolEvent {
    Created { protocol: Protocol, config: TransportConfig },
    Released { protocol: Protocol, config: TransportConfig },
    Error { protocol: Protocol, config: TransportConfig, message: String },
    Disconnected { protocol: Protocol, config: TransportConfig },
    Removed { protocol: Protocol, config: TransportConfig },
    Closed,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct PoolStats {
    pub total: usize,
    pub active: usize,
    pub idle: usize,
    pub pending: usize,
    pub successful: u64,
    pub failed: u64,
}
