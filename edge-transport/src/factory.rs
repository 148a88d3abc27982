//! Builds a transport instance for a meter's configured protocol
//! (spec.md §3: `Meter.protocol ∈ {bacnet, modbus}`). Kept as a free
//! function rather than on the trait so `edge-pool` can stay generic over
//! `DeviceTransport` without knowing either concrete type.

use super::{bacnet::BacnetTransport, modbus::ModbusTransport, DeviceTransport};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Protocol {
    Bacnet,
    Modbus,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Bacnet => "bacnet",
            Protocol::Modbus => "modbus",
        }
    }
}

pub fn new_transport(protocol: Protocol) -> Box<dyn DeviceTransport> {
    match protocol {
        Protocol::Bacnet => Box::new(BacnetTransport::new()),
        Protocol::Modbus => Box::new(ModbusTransport::new()),
    }
}
