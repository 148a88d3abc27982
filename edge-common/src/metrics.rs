//! Statsd metrics wrapper, ported from the teacher's
//! `syncserver/src/server/metrics.rs`: a cloneable handle around an
//! optional `cadence::StatsdClient`, with an RAII timer that reports on
//! `Drop` so a pipeline can't forget to close out a measurement on an
//! early return.

use std::collections::HashMap;
use std::net::UdpSocket;
use std::time::Instant;

use cadence::{BufferedUdpMetricSink, Counted, Gauged, NopMetricSink, QueuingMetricSink, StatsdClient, Timed};

#[derive(Debug, Clone, Default)]
pub struct Metrics {
    client: Option<StatsdClient>,
    tags: HashMap<String, String>,
}

impl Metrics {
    pub fn new(client: StatsdClient) -> Self {
        Self {
            client: Some(client),
            tags: HashMap::new(),
        }
    }

    pub fn noop() -> Self {
        Self::default()
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn incr(&self, label: &str) {
        if let Some(client) = &self.client {
            if let Err(e) = client.incr(label) {
                warn!("metric incr {} failed: {:?}", label, e);
            }
        }
    }

    pub fn count(&self, label: &str, value: i64) {
        if let Some(client) = &self.client {
            if let Err(e) = client.count(label, value) {
                warn!("metric count {} failed: {:?}", label, e);
            }
        }
    }

    /// Periodic pool/threadpool gauges (spec.md's ambient observability
    /// stack), ported from the teacher's
    /// `server::spawn_metric_periodic_reporter`.
    pub fn gauge(&self, label: &str, value: u64) {
        if let Some(client) = &self.client {
            if let Err(e) = client.gauge(label, value) {
                warn!("metric gauge {} failed: {:?}", label, e);
            }
        }
    }

    pub fn start_timer(&self, label: &str) -> MetricTimer {
        MetricTimer {
            metrics: self.clone(),
            label: label.to_owned(),
            start: Instant::now(),
        }
    }
}

/// An RAII timer: reports the elapsed time as a statsd timer when dropped.
pub struct MetricTimer {
    metrics: Metrics,
    label: String,
    start: Instant,
}

impl Drop for MetricTimer {
    fn drop(&mut self) {
        let elapsed_ms = self.start.elapsed().as_millis() as u64;
        if let Some(client) = &self.metrics.client {
            if let Err(e) = client.time(&self.label, elapsed_ms) {
                warn!("metric timer {} failed: {:?}", self.label, e);
            }
        }
    }
}

/// Builds a statsd client pointed at `host:port`, following the teacher's
/// buffered/queuing sink stack so metric emission never blocks a
/// pipeline on a syscall. Falls back to a no-op sink if the host can't be
/// resolved (matching the teacher's non-fatal metrics posture).
pub fn statsd_client(prefix: &str, host: &str, port: u16) -> StatsdClient {
    let builder = match UdpSocket::bind("0.0.0.0:0").and_then(|socket| {
        socket.set_nonblocking(true)?;
        BufferedUdpMetricSink::from((host, port), socket)
    }) {
        Ok(udp_sink) => StatsdClient::builder(prefix, QueuingMetricSink::from(udp_sink)),
        Err(e) => {
            warn!("statsd socket init failed, using no-op sink: {:?}", e);
            StatsdClient::builder(prefix, NopMetricSink)
        }
    };
    builder.build()
}
