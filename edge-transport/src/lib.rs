//! Device transport layer (spec.md §4.1). Two protocol-specific clients
//! behind one trait, grounded on the `ProtocolAdapter` shape in
//! `other_examples/...scada-ingestion-src-adapters-mod.rs`. Each
//! transport owns one socket and serializes its own in-flight requests;
//! the `edge-pool` crate is what guarantees single-owner access across
//! concurrent callers.

pub mod bacnet;
pub mod decode;
pub mod error;
pub mod factory;
pub mod modbus;

use async_trait::async_trait;
use std::time::Duration;

pub use error::{TransportError, TransportResult};
pub use factory::{new_transport, Protocol};

/// How two 16-bit registers combine into a 32-bit value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WordOrder {
    HiLo,
    LoHi,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Endianness {
    Be,
    Le,
}

/// The width/interpretation of a register read, spec.md §4.1.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegisterKind {
    U16,
    U32 { order: WordOrder },
    Float32 { order: WordOrder, endian: Endianness },
}

impl RegisterKind {
    /// Number of 16-bit words this kind occupies on the wire.
    pub fn word_count(&self) -> u16 {
        match self {
            RegisterKind::U16 => 1,
            RegisterKind::U32 { .. } | RegisterKind::Float32 { .. } => 2,
        }
    }
}

/// A single point to read in a batched `read_multiple` call.
#[derive(Clone, Debug)]
pub struct ReadPoint {
    /// The effective (element-adjusted) register address.
    pub address: u32,
    pub kind: RegisterKind,
    pub scale: f64,
    /// Caller-supplied label threaded back through so the collector can
    /// match a raw reading to the register that asked for it.
    pub label: String,
}

/// One decoded value read back from a device.
#[derive(Clone, Debug)]
pub struct RawReading {
    pub label: String,
    pub value: f64,
}

/// Connection parameters shared by both protocols; BACnet ignores `unit`,
/// Modbus ignores nothing.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TransportConfig {
    pub host: String,
    pub port: u16,
    pub unit_id: u8,
    pub timeout: Duration,
}

/// One transport instance owns one socket and exactly one in-flight
/// request at a time (spec.md §4.1: "BACnet/Modbus-TCP are
/// request/response"). Implementations must serialize internally.
#[async_trait]
pub trait DeviceTransport: Send + Sync {
    async fn connect(&mut self, config: &TransportConfig) -> TransportResult<()>;

    async fn close(&mut self) -> TransportResult<()>;

    /// A lightweight liveness probe used by the connection pool's health
    /// check (spec.md §4.2).
    async fn probe(&mut self) -> TransportResult<()>;

    async fn read(&mut self, kind: RegisterKind, address: u32, count: u16) -> TransportResult<Vec<u16>>;

    /// Batched read of several points in one round trip where the
    /// underlying protocol supports it; implementations may fall back to
    /// sequential `read` calls when it doesn't.
    async fn read_multiple(&mut self, points: &[ReadPoint]) -> TransportResult<Vec<RawReading>>;

    fn is_connected(&self) -> bool;

    fn protocol_name(&self) -> &'static str;
}

/// Groups contiguous register ranges so `read_multiple` can issue fewer,
/// wider reads where a protocol supports it (spec.md §4.6: "build a
/// batched read plan grouped by contiguous ranges where possible").
pub fn group_contiguous(points: &[ReadPoint]) -> Vec<Vec<ReadPoint>> {
    let mut sorted = points.to_vec();
    sorted.sort_by_key(|p| p.address);

    let mut groups: Vec<Vec<ReadPoint>> = Vec::new();
    for point in sorted {
        let starts_new_group = match groups.last() {
            None => true,
            Some(group) => {
                let last = group.last().expect("group is never empty");
                let last_end = last.address + last.kind.word_count() as u32;
                point.address != last_end
            }
        };
        if starts_new_group {
            groups.push(vec![point]);
        } else {
            groups.last_mut().expect("just checked non-empty").push(point);
        }
    }
    groups
}

#[cfg(test)]
mod test {
    use super::*;

    fn point(address: u32) -> ReadPoint {
        ReadPoint {
            address,
            kind: RegisterKind::U16,
            scale: 1.0,
            label: address.to_string(),
        }
    }

    #[test]
    fn groups_contiguous_u16_registers() {
        let points = vec![point(100), point(101), point(102), point(200)];
        let groups = group_contiguous(&points);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].len(), 3);
        assert_eq!(groups[1].len(), 1);
    }

    #[test]
    fn non_contiguous_registers_form_separate_groups() {
        let points = vec![point(10), point(50), point(90)];
        let groups = group_contiguous(&points);
        assert_eq!(groups.len(), 3);
    }
}
