//! The optional `MODBUS_MAP_FILE` JSON shape from spec.md §6:
//! `{ "fields": [ {name, source, type, address, scale?, wordOrder?, floatEndian?} ] }`.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ModbusMap {
    pub fields: Vec<ModbusField>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ModbusField {
    pub name: String,
    pub source: ModbusSource,
    #[serde(rename = "type")]
    pub field_type: ModbusFieldType,
    pub address: u16,
    #[serde(default = "default_scale")]
    pub scale: f64,
    #[serde(default, rename = "wordOrder")]
    pub word_order: WordOrder,
    #[serde(default, rename = "floatEndian")]
    pub float_endian: Endianness,
}

fn default_scale() -> f64 {
    1.0
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ModbusSource {
    Holding,
    Input,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ModbusFieldType {
    U16,
    U32,
    Float32,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub enum WordOrder {
    #[default]
    HiLo,
    LoHi,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub enum Endianness {
    #[default]
    Be,
    Le,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_documented_shape() {
        let raw = r#"{
            "fields": [
                {"name": "energy_kwh", "source": "holding", "type": "float32", "address": 1100, "scale": 0.1}
            ]
        }"#;
        let map: ModbusMap = serde_json::from_str(raw).unwrap();
        assert_eq!(map.fields.len(), 1);
        assert_eq!(map.fields[0].source, ModbusSource::Holding);
        assert_eq!(map.fields[0].field_type, ModbusFieldType::Float32);
        assert_eq!(map.fields[0].scale, 0.1);
        assert_eq!(map.fields[0].word_order, WordOrder::HiLo);
    }

    #[test]
    fn scale_defaults_to_one() {
        let raw = r#"{"fields": [{"name": "a", "source": "input", "type": "u16", "address": 5}]}"#;
        let map: ModbusMap = serde_json::from_str(raw).unwrap();
        assert_eq!(map.fields[0].scale, 1.0);
    }
}
