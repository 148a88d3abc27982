//! `SELECT *` row shapes for the remote tables (spec.md §6: "Pull uses
//! simple `SELECT *` semantics; no cursors or CDC are assumed") and their
//! conversion into the shared domain types every other crate uses.

use chrono::{DateTime, NaiveDateTime, Utc};
use diesel::prelude::*;

use edge_common::model::{DeviceRegister, Meter, Protocol, Register, Tenant};
use edge_common::Id;

use crate::error::{RemoteError, RemoteResult};
use crate::schema::{device_register, meter, register, tenant};

#[derive(Queryable)]
pub struct RemoteTenantRow {
    pub id: String,
    pub display_name: String,
    pub api_key: String,
    pub last_seen: Option<NaiveDateTime>,
}

impl RemoteTenantRow {
    pub fn into_domain(self) -> Tenant {
        Tenant {
            id: Id::new(self.id),
            display_name: self.display_name,
            api_key: self.api_key,
            last_seen: self.last_seen.map(|dt| DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc)),
        }
    }
}

#[derive(Queryable)]
pub struct RemoteRegisterRow {
    pub id: String,
    pub device_id: String,
    pub name: String,
    pub base_number: i64,
    pub unit: String,
    pub field_name: String,
}

impl RemoteRegisterRow {
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

#[derive(Queryable)]
pub struct RemoteDeviceRegisterRow {
    pub id: String,
    pub device_id: String,
    pub register_id: String,
}

impl RemoteDeviceRegisterRow {
    pub fn into_domain(self) -> DeviceRegister {
        DeviceRegister {
            id: Id::new(self.id),
            device_id: Id::new(self.device_id),
            register_id: Id::new(self.register_id),
        }
    }
}

#[derive(Queryable)]
pub struct RemoteMeterRow {
    pub id: String,
    pub display_name: String,
    pub ip: String,
    pub port: i32,
    pub protocol: String,
    pub device_id: String,
    pub element_tag: String,
    pub active: bool,
    pub register_map: Option<String>,
}

impl RemoteMeterRow {
    pub fn into_domain(self) -> RemoteResult<Meter> {
        let protocol = Protocol::parse(&self.protocol)
            .ok_or_else(|| RemoteError::Decode(format!("unknown protocol {:?}", self.protocol)))?;
        let register_map = self
            .register_map
            .map(|raw| serde_json::from_str(&raw))
            .transpose()
            .map_err(|e| RemoteError::Decode(format!("bad register_map json: {e}")))?;
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

pub fn fetch_tenants(conn: &mut diesel::mysql::MysqlConnection) -> RemoteResult<Vec<Tenant>> {
    let rows = tenant::table.load::<RemoteTenantRow>(conn)?;
    Ok(rows.into_iter().map(RemoteTenantRow::into_domain).collect())
}

pub fn fetch_meters(conn: &mut diesel::mysql::MysqlConnection) -> RemoteResult<Vec<Meter>> {
    let rows = meter::table.load::<RemoteMeterRow>(conn)?;
    rows.into_iter().map(RemoteMeterRow::into_domain).collect()
}

pub fn fetch_registers(conn: &mut diesel::mysql::MysqlConnection) -> RemoteResult<Vec<Register>> {
    let rows = register::table.load::<RemoteRegisterRow>(conn)?;
    Ok(rows.into_iter().map(RemoteRegisterRow::into_domain).collect())
}

pub fn fetch_device_registers(
    conn: &mut diesel::mysql::MysqlConnection,
) -> RemoteResult<Vec<DeviceRegister>> {
    let rows = device_register::table.load::<RemoteDeviceRegisterRow>(conn)?;
    Ok(rows.into_iter().map(RemoteDeviceRegisterRow::into_domain).collect())
}
