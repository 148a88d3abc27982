//! Modbus/TCP transport: MBAP header framing over a single TCP socket,
//! function codes 0x03 (read holding registers) and 0x04 (read input
//! registers).

use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;

use super::{decode, DeviceTransport, ReadPoint, RawReading, RegisterKind, TransportConfig, TransportError, TransportResult};

const FUNC_READ_HOLDING: u8 = 0x03;
const FUNC_READ_INPUT: u8 = 0x04;

pub struct ModbusTransport {
    stream: Option<Mutex<TcpStream>>,
    unit_id: u8,
    timeout: Duration,
    transaction_id: AtomicU16,
}

impl Default for ModbusTransport {
    fn default() -> Self {
        Self {
            stream: None,
            unit_id: 1,
            timeout: Duration::from_secs(5),
            transaction_id: AtomicU16::new(0),
        }
    }
}

impl ModbusTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_transaction_id(&self) -> u16 {
        self.transaction_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn request(&self, function: u8, address: u32, count: u16) -> TransportResult<Vec<u16>> {
        let Some(stream_lock) = &self.stream else {
            return Err(TransportError::NotConnected);
        };
        let mut stream = stream_lock.lock().await;

        let tx_id = self.next_transaction_id();
        let mut frame = Vec::with_capacity(12);
        frame.extend_from_slice(&tx_id.to_be_bytes());
        frame.extend_from_slice(&0u16.to_be_bytes()); // protocol id
        frame.extend_from_slice(&6u16.to_be_bytes()); // length: unit+func+addr+count
        frame.push(self.unit_id);
        frame.push(function);
        frame.extend_from_slice(&(address as u16).to_be_bytes());
        frame.extend_from_slice(&count.to_be_bytes());

        timeout(self.timeout, stream.write_all(&frame))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(TransportError::Io)?;

        let mut header = [0u8; 8];
        timeout(self.timeout, stream.read_exact(&mut header))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(TransportError::Io)?;

        let resp_tx_id = u16::from_be_bytes([header[0], header[1]]);
        if resp_tx_id != tx_id {
            return Err(TransportError::Protocol(format!(
                "transaction id mismatch: sent {tx_id} got {resp_tx_id}"
            )));
        }
        let resp_function = header[7];
        if resp_function & 0x80 != 0 {
            let mut exc = [0u8; 1];
            timeout(self.timeout, stream.read_exact(&mut exc))
                .await
                .map_err(|_| TransportError::Timeout)?
                .map_err(TransportError::Io)?;
            return Err(match exc[0] {
                0x02 => TransportError::InvalidRegister(format!("illegal data address {address}")),
                0x06 => TransportError::DeviceBusy,
                code => TransportError::Protocol(format!("exception code {code:#x}")),
            });
        }

        let mut byte_count_buf = [0u8; 1];
        timeout(self.timeout, stream.read_exact(&mut byte_count_buf))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(TransportError::Io)?;
        let byte_count = byte_count_buf[0] as usize;

        let mut payload = vec![0u8; byte_count];
        timeout(self.timeout, stream.read_exact(&mut payload))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(TransportError::Io)?;

        Ok(payload
            .chunks_exact(2)
            .map(|chunk| u16::from_be_bytes([chunk[0], chunk[1]]))
            .collect())
    }
}

#[async_trait]
impl DeviceTransport for ModbusTransport {
    async fn connect(&mut self, config: &TransportConfig) -> TransportResult<()> {
        let addr = format!("{}:{}", config.host, config.port);
        let stream = timeout(config.timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|e| TransportError::ConnectionFailed(format!("{addr}: {e}")))?;
        self.stream = Some(Mutex::new(stream));
        self.unit_id = config.unit_id;
        self.timeout = config.timeout;
        Ok(())
    }

    async fn close(&mut self) -> TransportResult<()> {
        self.stream = None;
        Ok(())
    }

    async fn probe(&mut self) -> TransportResult<()> {
        // Register 0 on most devices is a harmless, cheap read; if the
        // device rejects it as an invalid address that still proves the
        // socket is alive, which is all a health probe needs.
        match self.request(FUNC_READ_HOLDING, 0, 1).await {
            Ok(_) => Ok(()),
            Err(TransportError::InvalidRegister(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn read(&mut self, kind: RegisterKind, address: u32, count: u16) -> TransportResult<Vec<u16>> {
        let words_needed = count * kind.word_count();
        self.request(FUNC_READ_HOLDING, address, words_needed).await
    }

    async fn read_multiple(&mut self, points: &[ReadPoint]) -> TransportResult<Vec<RawReading>> {
        let mut out = Vec::with_capacity(points.len());
        for group in super::group_contiguous(points) {
            let start = group[0].address;
            let word_count: u16 = group.iter().map(|p| p.kind.word_count()).sum();
            let words = self.request(FUNC_READ_HOLDING, start, word_count).await?;

            let mut offset = 0usize;
            for point in &group {
                let n = point.kind.word_count() as usize;
                let slice = &words[offset..offset + n];
                offset += n;
                let value = match point.kind {
                    RegisterKind::U16 => decode::decode_u16(slice, point.scale),
                    RegisterKind::U32 { order } => {
                        decode::decode_u32(&[slice[0], slice[1]], order, point.scale)
                    }
                    RegisterKind::Float32 { order, endian } => {
                        decode::decode_float32(&[slice[0], slice[1]], order, endian, point.scale)
                    }
                };
                out.push(RawReading {
                    label: point.label.clone(),
                    value,
                });
            }
        }
        Ok(out)
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn protocol_name(&self) -> &'static str {
        "modbus"
    }
}

/// Disambiguates holding vs. input register reads; spec.md's §6 Modbus
/// map format carries a `source` field for exactly this. `ModbusTransport`
/// defaults every `read`/`read_multiple` call to holding registers since
/// that's what the collector's register map resolves to by default; a
/// dedicated input-register read goes through this free function instead.
pub async fn read_input_registers(
    transport: &mut ModbusTransport,
    address: u32,
    count: u16,
) -> TransportResult<Vec<u16>> {
    transport.request(FUNC_READ_INPUT, address, count).await
}
