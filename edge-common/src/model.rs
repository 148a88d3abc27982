//! Shared domain types (spec.md §3). These are the plain in-memory shapes
//! passed between the cache, store, remote and collector layers; each of
//! those crates adds its own on-the-wire or on-disk representation
//! (diesel `Queryable` rows, JSON DTOs) and converts to/from these.

use serde::{Deserialize, Serialize};

use crate::Id;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: Id,
    pub display_name: String,
    pub api_key: String,
    pub last_seen: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Register {
    pub id: Id,
    pub device_id: Id,
    pub name: String,
    pub base_number: i64,
    pub unit: String,
    pub field_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRegister {
    pub id: Id,
    pub device_id: Id,
    pub register_id: Id,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
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

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "bacnet" => Some(Protocol::Bacnet),
            "modbus" => Some(Protocol::Modbus),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meter {
    pub id: Id,
    pub display_name: String,
    pub ip: String,
    pub port: u16,
    pub protocol: Protocol,
    pub device_id: Id,
    /// Element tag, "A", "B", "C", ... selecting the per-meter register
    /// offset (spec.md §3's element-to-register mapping).
    pub element_tag: String,
    pub active: bool,
    /// Opaque JSON snapshot of the register map as last pulled from
    /// remote; the Collector is responsible for parsing it.
    pub register_map: Option<serde_json::Value>,
}

impl Meter {
    /// Position of `element_tag` in the alphabet, A=0, B=1, ... Returns
    /// `None` for anything outside `A-Z` (an unparseable element tag).
    pub fn element_position(&self) -> Option<u32> {
        let mut chars = self.element_tag.chars();
        let first = chars.next()?;
        if chars.next().is_some() || !first.is_ascii_alphabetic() {
            return None;
        }
        Some(first.to_ascii_uppercase() as u32 - 'A' as u32)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Good,
    Estimated,
    Questionable,
}

impl Default for Quality {
    fn default() -> Self {
        Quality::Good
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub id: Id,
    pub meter_id: Id,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub field_name: String,
    pub value: f64,
    pub unit: String,
    pub quality: Quality,
    pub synchronized: bool,
    pub retry_count: i32,
    pub quarantined: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncOperation {
    Upload,
    Pull,
    Cleanup,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncLogEntry {
    pub id: Id,
    pub operation: SyncOperation,
    pub batch_size: i64,
    pub success: bool,
    pub error_message: Option<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[cfg(test)]
mod test {
    use super::*;

    fn meter(tag: &str) -> Meter {
        Meter {
            id: Id::new("m1"),
            display_name: "m1".into(),
            ip: "10.0.0.1".into(),
            port: 502,
            protocol: Protocol::Modbus,
            device_id: Id::new("d1"),
            element_tag: tag.into(),
            active: true,
            register_map: None,
        }
    }

    #[test]
    fn element_position_parses_single_letters() {
        assert_eq!(meter("A").element_position(), Some(0));
        assert_eq!(meter("B").element_position(), Some(1));
        assert_eq!(meter("C").element_position(), Some(2));
    }

    #[test]
    fn element_position_rejects_multi_char_or_non_alpha() {
        assert_eq!(meter("AB").element_position(), None);
        assert_eq!(meter("1").element_position(), None);
    }
}
