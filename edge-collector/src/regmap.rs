//! Parses a `Meter.register_map` snapshot (spec.md §3: "register-map
//! snapshot") into per-field numeric decoding overrides. The shape
//! mirrors `edge_settings::ModbusMap`'s field entries (spec.md §6's
//! `MODBUS_MAP_FILE` JSON) but is kept as this crate's own minimal type
//! rather than a dependency on `edge-settings`, since the JSON blob here
//! comes from the pulled `meter` row rather than a local config file and
//! its absence or malformedness is a per-meter skip condition (spec.md
//! §4.6), not a process-fatal one.

use std::collections::HashMap;

use edge_transport::{Endianness, RegisterKind, WordOrder};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct RawRegisterMap {
    #[serde(default)]
    fields: Vec<RawField>,
}

#[derive(Debug, Deserialize)]
struct RawField {
    name: String,
    #[serde(default, rename = "type")]
    field_type: Option<String>,
    #[serde(default = "default_scale")]
    scale: f64,
    #[serde(default, rename = "wordOrder")]
    word_order: Option<String>,
    #[serde(default, rename = "floatEndian")]
    float_endian: Option<String>,
}

fn default_scale() -> f64 {
    1.0
}

#[derive(Debug, Clone, Copy)]
pub struct FieldDecoding {
    pub kind: RegisterKind,
    pub scale: f64,
}

impl Default for FieldDecoding {
    fn default() -> Self {
        Self {
            kind: RegisterKind::U16,
            scale: 1.0,
        }
    }
}

/// Parses the register-map JSON into a lookup by field name. `None`
/// input yields an empty map (every field decodes with the default
/// `u16`/scale-1 rule); malformed JSON is the "unparseable register map"
/// condition spec.md §4.6 has the Collector skip the meter for.
pub fn parse(raw: Option<&serde_json::Value>) -> Result<HashMap<String, FieldDecoding>, String> {
    let Some(value) = raw else {
        return Ok(HashMap::new());
    };
    let parsed: RawRegisterMap =
        serde_json::from_value(value.clone()).map_err(|e| format!("bad register map: {e}"))?;

    let mut out = HashMap::new();
    for field in parsed.fields {
        let word_order = match field.word_order.as_deref() {
            Some("LO_HI") | Some("lo_hi") => WordOrder::LoHi,
            _ => WordOrder::HiLo,
        };
        let float_endian = match field.float_endian.as_deref() {
            Some("LE") | Some("le") => Endianness::Le,
            _ => Endianness::Be,
        };
        let kind = match field.field_type.as_deref() {
            Some("u32") => RegisterKind::U32 { order: word_order },
            Some("float32") => RegisterKind::Float32 {
                order: word_order,
                endian: float_endian,
            },
            _ => RegisterKind::U16,
        };
        out.insert(
            field.name,
            FieldDecoding {
                kind,
                scale: field.scale,
            },
        );
    }
    Ok(out)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn absent_map_yields_empty_lookup() {
        assert!(parse(None).unwrap().is_empty());
    }

    #[test]
    fn parses_float32_field_with_scale() {
        let raw: serde_json::Value = serde_json::from_str(
            r#"{"fields":[{"name":"energy_kwh","type":"float32","address":1100,"scale":0.1}]}"#,
        )
        .unwrap();
        let map = parse(Some(&raw)).unwrap();
        let field = map.get("energy_kwh").unwrap();
        assert_eq!(field.scale, 0.1);
        assert!(matches!(field.kind, RegisterKind::Float32 { .. }));
    }

    #[test]
    fn malformed_json_is_reported_as_an_error() {
        let raw = serde_json::Value::String("not an object".into());
        assert!(parse(Some(&raw)).is_err());
    }
}
