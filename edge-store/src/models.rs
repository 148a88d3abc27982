//! Row shapes for each table plus conversions to/from the shared domain
//! types in `edge_common::model`. Timestamps are stored as RFC3339 text;
//! SQLite has no native datetime type and this keeps the on-disk format
//! legible with `sqlite3`.

use chrono::{DateTime, Utc};
use diesel::prelude::*;

use edge_common::model::{
    DeviceRegister, Meter, Protocol, Quality, Reading, Register, SyncLogEntry, SyncOperation, Tenant,
};
use edge_common::Id;

use crate::error::StoreError;
use crate::schema::{device_register, meter, meter_reading, register, sync_log, tenant};

fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Decode(format!("bad timestamp {raw:?}: {e}")))
}

#[derive(Queryable, Insertable, AsChangeset)]
#[diesel(table_name = tenant)]
pub struct TenantRow {
    pub id: String,
    pub display_name: String,
    pub api_key: String,
    pub last_seen: Option<String>,
}

impl From<&Tenant> for TenantRow {
    fn from(t: &Tenant) -> Self {
        Self {
            id: t.id.0.clone(),
            display_name: t.display_name.clone(),
            api_key: t.api_key.clone(),
            last_seen: t.last_seen.map(format_ts),
        }
    }
}

impl TenantRow {
    pub fn into_domain(self) -> Result<Tenant, StoreError> {
        Ok(Tenant {
            id: Id::new(self.id),
            display_name: self.display_name,
            api_key: self.api_key,
            last_seen: self.last_seen.map(|s| parse_ts(&s)).transpose()?,
        })
    }
}

#[derive(Queryable, Insertable, AsChangeset)]
#[diesel(table_name = register)]
pub struct RegisterRow {
    pub id: String,
    pub device_id: String,
    pub name: String,
    pub base_number: i64,
    pub unit: String,
    pub field_name: String,
}

impl From<&Register> for RegisterRow {
    fn from(r: &Register) -> Self {
        Self {
            id: r.id.0.clone(),
            device_id: r.device_id.0.clone(),
            name: r.name.clone(),
            base_number: r.base_number,
            unit: r.unit.clone(),
            field_name: r.field_name.clone(),
        }
    }
}

impl RegisterRow {
    pub fn into_domain(self) -> Register {
        Register {
            id: Id::new(self.id),
            device_id: Id::new(self.device_id),
            name: self.name,
            base_number: self.base_number,
            unit: self.unit,
            field_name: self.field_name,
        }
    }
}

#[derive(Queryable, Insertable, AsChangeset)]
#[diesel(table_name = device_register)]
pub struct DeviceRegisterRow {
    pub id: String,
    pub device_id: String,
    pub register_id: String,
}

impl From<&DeviceRegister> for DeviceRegisterRow {
    fn from(d: &DeviceRegister) -> Self {
        Self {
            id: d.id.0.clone(),
            device_id: d.device_id.0.clone(),
            register_id: d.register_id.0.clone(),
        }
    }
}

impl DeviceRegisterRow {
    pub fn into_domain(self) -> DeviceRegister {
        DeviceRegister {
            id: Id::new(self.id),
            device_id: Id::new(self.device_id),
            register_id: Id::new(self.register_id),
        }
    }
}

#[derive(Queryable, Insertable, AsChangeset)]
#[diesel(table_name = meter)]
pub struct MeterRow {
    pub id: String,
    pub display_name: String,
    pub ip: String,
    pub port: i32,
    pub protocol: String,
    pub device_id: String,
    pub element_tag: String,
    pub active: bool,
    pub register_map: Option<String>,
    pub last_reading_at: Option<String>,
}

impl From<&Meter> for MeterRow {
    fn from(m: &Meter) -> Self {
        Self {
            id: m.id.0.clone(),
            display_name: m.display_name.clone(),
            ip: m.ip.clone(),
            port: m.port as i32,
            protocol: m.protocol.as_str().to_string(),
            device_id: m.device_id.0.clone(),
            element_tag: m.element_tag.clone(),
            active: m.active,
            register_map: m.register_map.as_ref().map(|v| v.to_string()),
            last_reading_at: None,
        }
    }
}

impl MeterRow {
    pub fn into_domain(self) -> Result<Meter, StoreError> {
        let protocol = Protocol::parse(&self.protocol)
            .ok_or_else(|| StoreError::Decode(format!("unknown protocol {:?}", self.protocol)))?;
        let register_map = self
            .register_map
            .map(|raw| serde_json::from_str(&raw))
            .transpose()
            .map_err(|e| StoreError::Decode(format!("bad register_map json: {e}")))?;
        Ok(Meter {
            id: Id::new(self.id),
            display_name: self.display_name,
            ip: self.ip,
            port: self.port as u16,
            protocol,
            device_id: Id::new(self.device_id),
            element_tag: self.element_tag,
            active: self.active,
            register_map,
        })
    }
}

#[derive(Queryable, Insertable, AsChangeset)]
#[diesel(table_name = meter_reading)]
pub struct ReadingRow {
    pub id: String,
    pub meter_id: String,
    pub ts: String,
    pub field_name: String,
    pub value: f64,
    pub unit: String,
    pub quality: String,
    pub synchronized: bool,
    pub retry_count: i32,
    pub quarantined: bool,
    pub created_at: String,
}

fn quality_str(q: Quality) -> &'static str {
    match q {
        Quality::Good => "good",
        Quality::Estimated => "estimated",
        Quality::Questionable => "questionable",
    }
}

fn parse_quality(raw: &str) -> Quality {
    match raw {
        "estimated" => Quality::Estimated,
        "questionable" => Quality::Questionable,
        _ => Quality::Good,
    }
}

impl From<&Reading> for ReadingRow {
    fn from(r: &Reading) -> Self {
        let ts = format_ts(r.timestamp);
        Self {
            id: r.id.0.clone(),
            meter_id: r.meter_id.0.clone(),
            ts: ts.clone(),
            field_name: r.field_name.clone(),
            value: r.value,
            unit: r.unit.clone(),
            quality: quality_str(r.quality).to_string(),
            synchronized: r.synchronized,
            retry_count: r.retry_count,
            quarantined: r.quarantined,
            created_at: ts,
        }
    }
}

impl ReadingRow {
    pub fn into_domain(self) -> Result<Reading, StoreError> {
        Ok(Reading {
            id: Id::new(self.id),
            meter_id: Id::new(self.meter_id),
            timestamp: parse_ts(&self.ts)?,
            field_name: self.field_name,
            value: self.value,
            unit: self.unit,
            quality: parse_quality(&self.quality),
            synchronized: self.synchronized,
            retry_count: self.retry_count,
            quarantined: self.quarantined,
        })
    }
}

#[derive(Queryable, Insertable)]
#[diesel(table_name = sync_log)]
pub struct SyncLogRow {
    pub id: String,
    pub operation: String,
    pub batch_size: i64,
    pub success: bool,
    pub error_message: Option<String>,
    pub ts: String,
}

fn operation_str(op: SyncOperation) -> &'static str {
    match op {
        SyncOperation::Upload => "upload",
        SyncOperation::Pull => "pull",
        SyncOperation::Cleanup => "cleanup",
    }
}

fn parse_operation(raw: &str) -> SyncOperation {
    match raw {
        "pull" => SyncOperation::Pull,
        "cleanup" => SyncOperation::Cleanup,
        _ => SyncOperation::Upload,
    }
}

impl From<&SyncLogEntry> for SyncLogRow {
    fn from(e: &SyncLogEntry) -> Self {
        Self {
            id: e.id.0.clone(),
            operation: operation_str(e.operation).to_string(),
            batch_size: e.batch_size,
            success: e.success,
            error_message: e.error_message.clone(),
            ts: format_ts(e.timestamp),
        }
    }
}

impl SyncLogRow {
    pub fn into_domain(self) -> Result<SyncLogEntry, StoreError> {
        Ok(SyncLogEntry {
            id: Id::new(self.id),
            operation: parse_operation(&self.operation),
            batch_size: self.batch_size,
            success: self.success,
            error_message: self.error_message,
            timestamp: parse_ts(&self.ts)?,
        })
    }
}
