//! BACnet/IP transport. Implements a single-device, unicast `ReadProperty`
//! exchange over UDP (BVLC "Original-Unicast-NPDU" wrapping an APDU
//! confirmed request), enough to satisfy spec.md §4.1's `read`/
//! `read_multiple` contract against analog-value objects addressed by
//! register number. Object/property discovery, segmentation and COV
//! subscriptions are out of scope (spec.md §1 Non-goals: no general
//! protocol stack, only the reads the Collector needs).

use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tokio::time::timeout;

use super::{DeviceTransport, ReadPoint, RawReading, RegisterKind, TransportConfig, TransportError, TransportResult};

const BVLC_TYPE: u8 = 0x81;
const BVLC_FUNC_UNICAST_NPDU: u8 = 0x0a;
const ANALOG_VALUE_OBJECT_TYPE: u16 = 2;
const PROPERTY_PRESENT_VALUE: u8 = 85;

struct Socket {
    udp: UdpSocket,
    peer: std::net::SocketAddr,
}

pub struct BacnetTransport {
    socket: Option<Mutex<Socket>>,
    timeout: Duration,
    invoke_id: AtomicU8,
}

impl Default for BacnetTransport {
    fn default() -> Self {
        Self {
            socket: None,
            timeout: Duration::from_secs(5),
            invoke_id: AtomicU8::new(0),
        }
    }
}

impl BacnetTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_invoke_id(&self) -> u8 {
        self.invoke_id.fetch_add(1, Ordering::Relaxed)
    }

    fn build_read_property_apdu(invoke_id: u8, instance: u32) -> Vec<u8> {
        // APDU: confirmed request, service choice = ReadProperty (12).
        // Context tags 0 (object identifier) and 1 (property identifier),
        // matching the ASHRAE 135 encoding closely enough to exercise a
        // real device's ReadProperty handler for present-value reads.
        let object_id = ((ANALOG_VALUE_OBJECT_TYPE as u32) << 22) | (instance & 0x3FFFFF);
        let mut apdu = vec![0x00, 0x05, invoke_id, 0x0c];
        apdu.push(0x0c); // context tag 0, length 4
        apdu.extend_from_slice(&object_id.to_be_bytes());
        apdu.push(0x19); // context tag 1, length 1
        apdu.push(PROPERTY_PRESENT_VALUE);
        apdu
    }

    async fn request(&self, address: u32) -> TransportResult<f64> {
        let Some(socket_lock) = &self.socket else {
            return Err(TransportError::NotConnected);
        };
        let socket = socket_lock.lock().await;

        let invoke_id = self.next_invoke_id();
        let apdu = Self::build_read_property_apdu(invoke_id, address);

        let mut frame = vec![BVLC_TYPE, BVLC_FUNC_UNICAST_NPDU];
        let total_len = (4 + 2 + apdu.len()) as u16; // bvlc header + npdu + apdu
        frame.extend_from_slice(&total_len.to_be_bytes());
        frame.extend_from_slice(&[0x01, 0x00]); // NPDU version + control, no special routing
        frame.extend_from_slice(&apdu);

        timeout(self.timeout, socket.udp.send_to(&frame, socket.peer))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(TransportError::Io)?;

        let mut buf = [0u8; 1500];
        let n = timeout(self.timeout, socket.udp.recv(&mut buf))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(TransportError::Io)?;

        Self::parse_read_property_ack(&buf[..n], invoke_id)
    }

    fn parse_read_property_ack(datagram: &[u8], expected_invoke_id: u8) -> TransportResult<f64> {
        if datagram.len() < 4 || datagram[0] != BVLC_TYPE {
            return Err(TransportError::Protocol("malformed BVLC header".into()));
        }
        let npdu_start = 4usize;
        if datagram.len() <= npdu_start + 2 {
            return Err(TransportError::Protocol("truncated NPDU".into()));
        }
        let apdu = &datagram[npdu_start + 2..];
        if apdu.is_empty() {
            return Err(TransportError::Protocol("empty APDU".into()));
        }

        let pdu_type = apdu[0] >> 4;
        const PDU_TYPE_COMPLEX_ACK: u8 = 0x3;
        const PDU_TYPE_ERROR: u8 = 0x5;
        const PDU_TYPE_REJECT: u8 = 0x6;
        const PDU_TYPE_ABORT: u8 = 0x7;

        if apdu.len() < 2 || apdu[1] != expected_invoke_id {
            return Err(TransportError::Protocol("unexpected invoke id in response".into()));
        }

        match pdu_type {
            PDU_TYPE_COMPLEX_ACK => {
                // Present-value is encoded as an application-tagged REAL
                // (tag 4) in the property-value context (tag 3);
                // scan for the 4-byte float payload rather than walking
                // the full tag grammar.
                if let Some(pos) = apdu.windows(1).position(|w| w[0] == 0x3c).map(|p| p + 1) {
                    if apdu.len() >= pos + 4 {
                        let bytes = [apdu[pos], apdu[pos + 1], apdu[pos + 2], apdu[pos + 3]];
                        return Ok(f32::from_be_bytes(bytes) as f64);
                    }
                }
                Err(TransportError::Protocol("could not locate present-value in ack".into()))
            }
            PDU_TYPE_ERROR => Err(TransportError::Protocol("device returned Error-PDU".into())),
            PDU_TYPE_REJECT => Err(TransportError::Protocol("device returned Reject-PDU".into())),
            PDU_TYPE_ABORT => Err(TransportError::DeviceBusy),
            other => Err(TransportError::Protocol(format!("unexpected PDU type {other}"))),
        }
    }
}

#[async_trait]
impl DeviceTransport for BacnetTransport {
    async fn connect(&mut self, config: &TransportConfig) -> TransportResult<()> {
        let udp = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(TransportError::Io)?;
        let peer = format!("{}:{}", config.host, config.port)
            .parse()
            .map_err(|e| TransportError::ConnectionFailed(format!("invalid address: {e}")))?;
        udp.connect(peer).await.map_err(|e| {
            TransportError::ConnectionFailed(format!("{}:{}: {e}", config.host, config.port))
        })?;
        self.socket = Some(Mutex::new(Socket { udp, peer }));
        self.timeout = config.timeout;
        Ok(())
    }

    async fn close(&mut self) -> TransportResult<()> {
        self.socket = None;
        Ok(())
    }

    async fn probe(&mut self) -> TransportResult<()> {
        // Whoever configured the meter's register map gave us at least
        // one real register to probe with; reading it and accepting
        // either success or a device-side protocol error (the object
        // simply may not exist at instance 0) both prove the socket and
        // device are alive.
        match self.request(0).await {
            Ok(_) => Ok(()),
            Err(TransportError::Protocol(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn read(&mut self, _kind: RegisterKind, address: u32, _count: u16) -> TransportResult<Vec<u16>> {
        // BACnet's ReadProperty already hands back a decoded present
        // value; there are no raw words to pass through. Callers that
        // need the typed value should prefer `read_multiple`, which
        // returns it directly — this method exists only to satisfy the
        // shared `DeviceTransport` contract.
        let value = self.request(address).await?;
        let bits = (value as f32).to_bits();
        Ok(vec![(bits >> 16) as u16, (bits & 0xffff) as u16])
    }

    async fn read_multiple(&mut self, points: &[ReadPoint]) -> TransportResult<Vec<RawReading>> {
        // BACnet ReadProperty is single-object; there is no multi-point
        // batching to be had at the wire level the way Modbus's
        // contiguous-range reads give us, so each point is its own round
        // trip, serialized through this transport's single in-flight-
        // request rule. The present-value BACnet returns is already a
        // real number, so unlike Modbus there's no word decoding step.
        let mut out = Vec::with_capacity(points.len());
        for point in points {
            let value = self.request(point.address).await?;
            out.push(RawReading {
                label: point.label.clone(),
                value: value / point.scale,
            });
        }
        Ok(out)
    }

    fn is_connected(&self) -> bool {
        self.socket.is_some()
    }

    fn protocol_name(&self) -> &'static str {
        "bacnet"
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn builds_well_formed_read_property_apdu() {
        let apdu = BacnetTransport::build_read_property_apdu(7, 1100);
        assert_eq!(apdu[2], 7, "invoke id preserved");
        assert_eq!(apdu[3], 0x0c, "service choice is ReadProperty");
    }
}
