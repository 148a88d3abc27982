use std::ops::{Deref, DerefMut};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::OwnedSemaphorePermit;

use edge_transport::DeviceTransport;

use crate::events::PoolEvent;
use crate::pool::{IdleEntry, Pool, PoolKey};

/// A checked-out connection. Returns itself to the pool's idle list on
/// `Drop` unless `mark_unhealthy` was called first, in which case the
/// transport and its semaphore permit are simply dropped, freeing a slot
/// for a fresh connection on the next `acquire`.
pub struct PooledConnection {
    pool: Arc<Pool>,
    key: PoolKey,
    transport: Option<Box<dyn DeviceTransport>>,
    permit: Option<OwnedSemaphorePermit>,
    healthy: bool,
}

impl PooledConnection {
    pub(crate) fn new(
        pool: Arc<Pool>,
        key: PoolKey,
        transport: Box<dyn DeviceTransport>,
        permit: OwnedSemaphorePermit,
    ) -> Self {
        Self {
            pool,
            key,
            transport: Some(transport),
            permit: Some(permit),
            healthy: true,
        }
    }

    /// Marks this connection as broken so it is disconnected instead of
    /// being returned to the idle list on drop. Callers should call this
    /// after a transport error that isn't a protocol-level response (a
    /// dropped socket, a timeout, an I/O error).
    pub fn mark_unhealthy(&mut self) {
        self.healthy = false;
    }

    pub fn protocol_name(&self) -> &'static str {
        self.transport
            .as_ref()
            .map(|t| t.protocol_name())
            .unwrap_or("unknown")
    }
}

impl Deref for PooledConnection {
    type Target = dyn DeviceTransport;

    fn deref(&self) -> &Self::Target {
        self.transport.as_deref().expect("transport present until drop")
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.transport.as_deref_mut().expect("transport present until drop")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let (Some(transport), Some(permit)) = (self.transport.take(), self.permit.take()) else {
            return;
        };

        if self.healthy && !self.pool.closed.load(Ordering::Acquire) {
            let mut idle = self.pool.idle.lock().expect("idle map poisoned");
            idle.entry(self.key.clone()).or_default().push_back(IdleEntry {
                transport,
                permit,
                last_used: Instant::now(),
                consecutive_failures: 0,
            });
            drop(idle);
            let _ = self.pool.events.send(PoolEvent::Released {
                protocol: self.key.protocol,
                config: self.key.config.clone(),
            });
        } else {
            // `transport` and `permit` are dropped here: the socket
            // closes and the semaphore slot is freed.
            let _ = self.pool.events.send(PoolEvent::Disconnected {
                protocol: self.key.protocol,
                config: self.key.config.clone(),
            });
        }
    }
}
