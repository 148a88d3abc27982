//! Per-device circuit breaker (spec.md §4.3). States: `Closed → Open →
//! HalfOpen → Closed`. Each device id gets its own lock so breaker state
//! for one device never blocks, or is affected by, another (Testable
//! Property 4).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use edge_common::Id;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Closed,
    Open,
    HalfOpen,
}

struct Entry {
    state: State,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

impl Default for Entry {
    fn default() -> Self {
        Entry {
            state: State::Closed,
            consecutive_failures: 0,
            opened_at: None,
        }
    }
}

pub struct CircuitBreaker {
    failure_threshold: u32,
    cb_timeout: Duration,
    devices: Mutex<HashMap<Id, Arc<Mutex<Entry>>>>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cb_timeout: Duration) -> Self {
        Self {
            failure_threshold,
            cb_timeout,
            devices: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(3, Duration::from_secs(1))
    }

    fn entry_for(&self, device_id: &Id) -> Arc<Mutex<Entry>> {
        let mut devices = self.devices.lock().expect("breaker map poisoned");
        devices
            .entry(device_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(Entry::default())))
            .clone()
    }

    /// Returns `true` if a call against `device_id` may proceed. A `false`
    /// result means the caller must surface `CircuitOpen` without
    /// touching the transport (spec.md §4.6: "If the breaker is open for
    /// that device, skip without opening a connection").
    pub fn admit(&self, device_id: &Id) -> bool {
        let entry_lock = self.entry_for(device_id);
        let mut entry = entry_lock.lock().expect("breaker entry poisoned");
        match entry.state {
            State::Closed => true,
            State::HalfOpen => false,
            State::Open => {
                let opened_at = entry.opened_at.expect("Open state always has opened_at");
                if opened_at.elapsed() >= self.cb_timeout {
                    entry.state = State::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self, device_id: &Id) {
        let entry_lock = self.entry_for(device_id);
        let mut entry = entry_lock.lock().expect("breaker entry poisoned");
        entry.state = State::Closed;
        entry.consecutive_failures = 0;
        entry.opened_at = None;
    }

    pub fn record_failure(&self, device_id: &Id) {
        let entry_lock = self.entry_for(device_id);
        let mut entry = entry_lock.lock().expect("breaker entry poisoned");
        match entry.state {
            State::HalfOpen => {
                entry.state = State::Open;
                entry.opened_at = Some(Instant::now());
            }
            State::Closed => {
                entry.consecutive_failures += 1;
                if entry.consecutive_failures >= self.failure_threshold {
                    entry.state = State::Open;
                    entry.opened_at = Some(Instant::now());
                }
            }
            State::Open => {}
        }
    }

    /// Manual reset (spec.md §4.3: "A manual `reset(deviceId)` is
    /// provided").
    pub fn reset(&self, device_id: &Id) {
        let entry_lock = self.entry_for(device_id);
        let mut entry = entry_lock.lock().expect("breaker entry poisoned");
        *entry = Entry::default();
    }

    pub fn is_open(&self, device_id: &Id) -> bool {
        let entry_lock = self.entry_for(device_id);
        let entry = entry_lock.lock().expect("breaker entry poisoned");
        matches!(entry.state, State::Open)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn trips_after_threshold_consecutive_failures() {
        let breaker = CircuitBreaker::new(3, Duration::from_millis(50));
        let device = Id::new("device-42");

        assert!(breaker.admit(&device));
        breaker.record_failure(&device);
        assert!(breaker.admit(&device));
        breaker.record_failure(&device);
        assert!(breaker.admit(&device));
        breaker.record_failure(&device);

        // Fourth call within cb_timeout: rejected without touching the transport.
        assert!(!breaker.admit(&device));
    }

    #[test]
    fn half_open_admits_exactly_one_probe() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(10));
        let device = Id::new("device-1");
        breaker.record_failure(&device); // trips on first failure (threshold 1)
        assert!(!breaker.admit(&device));

        std::thread::sleep(Duration::from_millis(15));
        assert!(breaker.admit(&device), "half-open should admit the probe");
        assert!(!breaker.admit(&device), "second concurrent caller must be rejected");
    }

    #[test]
    fn successful_probe_closes_breaker() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(10));
        let device = Id::new("device-2");
        breaker.record_failure(&device);
        std::thread::sleep(Duration::from_millis(15));
        assert!(breaker.admit(&device));
        breaker.record_success(&device);
        assert!(breaker.admit(&device));
        assert!(breaker.admit(&device), "closed state admits repeatedly");
    }

    #[test]
    fn failed_probe_reopens_breaker() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(10));
        let device = Id::new("device-3");
        breaker.record_failure(&device);
        std::thread::sleep(Duration::from_millis(15));
        assert!(breaker.admit(&device));
        breaker.record_failure(&device);
        assert!(!breaker.admit(&device));
    }

    #[test]
    fn devices_are_fully_independent() {
        let breaker = CircuitBreaker::new(1, Duration::from_secs(60));
        let d1 = Id::new("d1");
        let d2 = Id::new("d2");
        breaker.record_failure(&d1);
        assert!(!breaker.admit(&d1));
        assert!(breaker.admit(&d2), "d2 must be unaffected by d1's breaker state");
    }
}
