//! Error statistics: totals by kind, totals by device, and a bounded
//! ring buffer of recent errors (spec.md §4.3: "the handler tracks error
//! counts by kind and by device, and keeps a bounded buffer of the most
//! recent errors for diagnostics").

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use edge_common::{ErrorKind, Id};

const RECENT_CAPACITY: usize = 100;

#[derive(Clone, Debug)]
pub struct RecentError {
    pub device_id: Id,
    pub operation: String,
    pub kind_label: String,
    pub message: String,
    pub age: Duration,
}

struct Inner {
    by_kind: HashMap<&'static str, u64>,
    by_device: HashMap<Id, u64>,
    recent: VecDeque<(Instant, Id, String, &'static str, String)>,
}

pub struct ErrorStats {
    inner: Mutex<Inner>,
}

impl Default for ErrorStats {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Inner {
                by_kind: HashMap::new(),
                by_device: HashMap::new(),
                recent: VecDeque::with_capacity(RECENT_CAPACITY),
            }),
        }
    }
}

impl ErrorStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, device_id: &Id, operation: &str, kind: &ErrorKind, message: &str) {
        let label = kind_label(kind);
        let mut inner = self.inner.lock().expect("stats poisoned");
        *inner.by_kind.entry(label).or_insert(0) += 1;
        *inner.by_device.entry(device_id.clone()).or_insert(0) += 1;
        if inner.recent.len() == RECENT_CAPACITY {
            inner.recent.pop_front();
        }
        inner
            .recent
            .push_back((Instant::now(), device_id.clone(), operation.to_string(), label, message.to_string()));
    }

    pub fn totals_by_kind(&self) -> HashMap<String, u64> {
        let inner = self.inner.lock().expect("stats poisoned");
        inner.by_kind.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    pub fn totals_by_device(&self) -> HashMap<Id, u64> {
        let inner = self.inner.lock().expect("stats poisoned");
        inner.by_device.clone()
    }

    pub fn recent(&self) -> Vec<RecentError> {
        let inner = self.inner.lock().expect("stats poisoned");
        inner
            .recent
            .iter()
            .map(|(at, device_id, operation, kind_label, message)| RecentError {
                device_id: device_id.clone(),
                operation: operation.clone(),
                kind_label: kind_label.to_string(),
                message: message.clone(),
                age: at.elapsed(),
            })
            .collect()
    }
}

fn kind_label(kind: &ErrorKind) -> &'static str {
    match kind {
        ErrorKind::ConnectionFailed(_) => "connection_failed",
        ErrorKind::Timeout => "timeout",
        ErrorKind::ProtocolError(_) => "protocol_error",
        ErrorKind::InvalidRegister(_) => "invalid_register",
        ErrorKind::DeviceBusy => "device_busy",
        ErrorKind::PoolExhausted => "pool_exhausted",
        ErrorKind::CircuitOpen(_) => "circuit_open",
        ErrorKind::Unknown(_) => "unknown",
        ErrorKind::ConfigInvalid(_) => "config_invalid",
        ErrorKind::RemoteUnavailable(_) => "remote_unavailable",
        ErrorKind::LocalStoreFailure(_) => "local_store_failure",
        ErrorKind::Cancelled => "cancelled",
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn tracks_totals_by_kind_and_device() {
        let stats = ErrorStats::new();
        let device = Id::new("meter-1");
        stats.record(&device, "collect", &ErrorKind::Timeout, "timed out");
        stats.record(&device, "collect", &ErrorKind::Timeout, "timed out again");

        assert_eq!(stats.totals_by_kind().get("timeout"), Some(&2));
        assert_eq!(stats.totals_by_device().get(&device), Some(&2));
    }

    #[test]
    fn recent_buffer_is_bounded() {
        let stats = ErrorStats::new();
        let device = Id::new("meter-2");
        for i in 0..150 {
            stats.record(&device, "collect", &ErrorKind::Timeout, &format!("failure {i}"));
        }
        assert_eq!(stats.recent().len(), RECENT_CAPACITY);
        // oldest entries have been evicted; the buffer should end on the last message
        assert_eq!(stats.recent().last().unwrap().message, "failure 149");
    }
}
