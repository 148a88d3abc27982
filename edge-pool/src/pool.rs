//! The connection pool itself (spec.md §4.2), grounded on the
//! `Arc<Self>` + `Semaphore` + RAII-return shape of
//! `other_examples/...conductor-core-src-routing-connection_pool.rs`.
//!
//! One difference from that example: its idle list lives behind a
//! `tokio::sync::RwLock`, which can't be locked from a synchronous
//! `Drop`, so it routes returns through an `mpsc` channel and a separate
//! `process_returns` step. Here the idle list is a plain
//! `std::sync::Mutex`, which a `Drop` impl *can* lock directly (the
//! critical section is a handful of map operations, never an `.await`),
//! so a returned connection is reinserted synchronously with no
//! channel indirection.
//!
//! The permit for a connection is held by whichever side currently owns
//! it — the checked-out `PooledConnection` while in use, the idle-map
//! entry while parked — for its entire lifetime. That is what keeps
//! `active + idle <= max_connections` true without a second counter.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::sync::{broadcast, Semaphore};

use edge_transport::{new_transport, DeviceTransport, Protocol, TransportConfig};

use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::events::{PoolEvent, PoolStats};
use crate::PooledConnection;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct PoolKey {
    pub protocol: Protocol,
    pub config: TransportConfig,
}

pub(crate) struct IdleEntry {
    pub transport: Box<dyn DeviceTransport>,
    pub permit: tokio::sync::OwnedSemaphorePermit,
    pub last_used: Instant,
    pub consecutive_failures: u32,
}

const EVENT_CHANNEL_CAPACITY: usize = 256;

pub struct Pool {
    config: PoolConfig,
    semaphore: Arc<Semaphore>,
    pub(crate) idle: Mutex<HashMap<PoolKey, VecDeque<IdleEntry>>>,
    pub(crate) events: broadcast::Sender<PoolEvent>,
    pending: AtomicUsize,
    successful: AtomicU64,
    failed: AtomicU64,
    pub(crate) closed: AtomicBool,
}

impl Pool {
    pub fn new(config: PoolConfig) -> Arc<Self> {
        let (events, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            semaphore: Arc::new(Semaphore::new(config.max_connections)),
            config,
            idle: Mutex::new(HashMap::new()),
            events,
            pending: AtomicUsize::new(0),
            successful: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.events.subscribe()
    }

    fn idle_len(&self) -> usize {
        self.idle.lock().expect("idle map poisoned").values().map(|q| q.len()).sum()
    }

    pub fn stats(&self) -> PoolStats {
        let idle = self.idle_len();
        let in_use = self.config.max_connections - self.semaphore.available_permits();
        PoolStats {
            total: in_use,
            active: in_use.saturating_sub(idle),
            idle,
            pending: self.pending.load(Ordering::Relaxed),
            successful: self.successful.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    fn take_idle(&self, key: &PoolKey) -> Option<IdleEntry> {
        let mut idle = self.idle.lock().expect("idle map poisoned");
        let queue = idle.get_mut(key)?;
        let entry = queue.pop_front();
        if queue.is_empty() {
            idle.remove(key);
        }
        entry
    }

    /// Acquires a connection for `(protocol, config)`, reusing an idle
    /// one with a matching key if available, otherwise waiting for
    /// capacity and connecting fresh.
    pub async fn acquire(
        self: &Arc<Self>,
        protocol: Protocol,
        config: TransportConfig,
    ) -> Result<PooledConnection, PoolError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PoolError::Closed);
        }

        let key = PoolKey { protocol, config: config.clone() };

        if let Some(entry) = self.take_idle(&key) {
            return Ok(PooledConnection::new(self.clone(), key, entry.transport, entry.permit));
        }

        self.pending.fetch_add(1, Ordering::Relaxed);
        let permit_result = tokio::time::timeout(
            self.config.acquire_timeout,
            Arc::clone(&self.semaphore).acquire_owned(),
        )
        .await;
        self.pending.fetch_sub(1, Ordering::Relaxed);

        let permit = match permit_result {
            Ok(Ok(permit)) => permit,
            Ok(Err(_closed)) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                return Err(PoolError::Closed);
            }
            Err(_timed_out) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                return Err(PoolError::AcquireTimeout);
            }
        };

        let mut transport = new_transport(protocol);
        match transport.connect(&config).await {
            Ok(()) => {
                self.successful.fetch_add(1, Ordering::Relaxed);
                let _ = self.events.send(PoolEvent::Created { protocol, config: config.clone() });
                Ok(PooledConnection::new(self.clone(), key, transport, permit))
            }
            Err(e) => {
                // permit is dropped here, releasing capacity back to the semaphore
                self.failed.fetch_add(1, Ordering::Relaxed);
                let message = e.to_string();
                let _ = self.events.send(PoolEvent::Error { protocol, config, message: message.clone() });
                Err(PoolError::ConnectionFailed(message))
            }
        }
    }

    /// Runs one health-probe pass over every idle connection (spec.md
    /// §4.2: "a periodic health probe ... calls `probe` on every
    /// connection"). Entries are pulled out of the idle map before being
    /// probed so the lock is never held across an `.await`.
    pub async fn health_check(self: &Arc<Self>) {
        let drained: Vec<(PoolKey, Vec<IdleEntry>)> = {
            let mut idle = self.idle.lock().expect("idle map poisoned");
            idle.drain().map(|(k, v)| (k, v.into_iter().collect())).collect()
        };

        let mut rebuilt: HashMap<PoolKey, VecDeque<IdleEntry>> = HashMap::new();
        for (key, entries) in drained {
            let mut kept = VecDeque::new();
            for mut entry in entries {
                if entry.last_used.elapsed() > self.config.idle_timeout {
                    let _ = self.events.send(PoolEvent::Disconnected {
                        protocol: key.protocol,
                        config: key.config.clone(),
                    });
                    continue;
                }
                match entry.transport.probe().await {
                    Ok(()) => {
                        entry.consecutive_failures = 0;
                        kept.push_back(entry);
                    }
                    Err(_) => {
                        entry.consecutive_failures += 1;
                        if entry.consecutive_failures >= self.config.health_check_failure_threshold {
                            let _ = self.events.send(PoolEvent::Removed {
                                protocol: key.protocol,
                                config: key.config.clone(),
                            });
                        } else {
                            kept.push_back(entry);
                        }
                    }
                }
            }
            if !kept.is_empty() {
                rebuilt.insert(key, kept);
            }
        }

        *self.idle.lock().expect("idle map poisoned") = rebuilt;
    }

    /// Starts a background task running `health_check` on
    /// `health_check_interval`. Returns a handle the caller should abort
    /// on shutdown.
    pub fn spawn_health_check_task(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let pool = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(pool.config.health_check_interval);
            loop {
                ticker.tick().await;
                if pool.closed.load(Ordering::Acquire) {
                    break;
                }
                pool.health_check().await;
            }
        })
    }

    /// Rejects pending waiters, disconnects every idle connection, and
    /// refuses further `acquire` calls (spec.md §4.2).
    pub async fn close_all(self: &Arc<Self>) {
        self.closed.store(true, Ordering::Release);
        self.semaphore.close();

        let drained: Vec<IdleEntry> = {
            let mut idle = self.idle.lock().expect("idle map poisoned");
            idle.drain().flat_map(|(_, q)| q.into_iter()).collect()
        };
        for mut entry in drained {
            let _ = entry.transport.close().await;
        }

        let _ = self.events.send(PoolEvent::Closed);
    }
}
