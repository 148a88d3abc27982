//! Register and DeviceRegister join-table CRUD (spec.md §3). Both tables
//! are read-only from the Collector's point of view; only the Pull-Sync
//! Manager writes to them.

use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;

use edge_common::model::{DeviceRegister, Register};

use crate::error::StoreResult;
use crate::models::{DeviceRegisterRow, RegisterRow};
use crate::schema::{device_register, register};

pub fn upsert_register(conn: &mut SqliteConnection, r: &Register) -> StoreResult<()> {
    let row = RegisterRow::from(r);
    diesel::insert_into(register::table)
        .values(&row)
        .on_conflict(register::id)
        .do_update()
        .set((
            register::device_id.eq(&row.device_id),
            register::name.eq(&row.name),
            register::base_number.eq(row.base_number),
            register::unit.eq(&row.unit),
            register::field_name.eq(&row.field_name),
        ))
        .execute(conn)?;
    Ok(())
}

pub fn list_registers(conn: &mut SqliteConnection) -> StoreResult<Vec<Register>> {
    let rows = register::table.load::<RegisterRow>(conn)?;
    Ok(rows.into_iter().map(RegisterRow::into_domain).collect())
}

pub fn upsert_device_register(conn: &mut SqliteConnection, d: &DeviceRegister) -> StoreResult<()> {
    let row = DeviceRegisterRow::from(d);
    diesel::insert_into(device_register::table)
        .values(&row)
        .on_conflict(device_register::id)
        .do_update()
        .set((
            device_register::device_id.eq(&row.device_id),
            device_register::register_id.eq(&row.register_id),
        ))
        .execute(conn)?;
    Ok(())
}

pub fn list_device_registers(conn: &mut SqliteConnection) -> StoreResult<Vec<DeviceRegister>> {
    let rows = device_register::table.load::<DeviceRegisterRow>(conn)?;
    Ok(rows.into_iter().map(DeviceRegisterRow::into_domain).collect())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::pool::MIGRATIONS;
    use diesel::connection::Connection;
    use diesel_migrations::MigrationHarness;
    use edge_common::Id;

    fn test_conn() -> SqliteConnection {
        let mut conn = SqliteConnection::establish(":memory:").unwrap();
        conn.run_pending_migrations(MIGRATIONS).unwrap();
        conn
    }

    #[test]
    fn upsert_register_then_list_round_trips() {
        let mut conn = test_conn();
        let r = Register {
            id: Id::new("r1"),
            device_id: Id::new("d1"),
            name: "Energy".into(),
            base_number: 1100,
            unit: "kWh".into(),
            field_name: "energy_kwh".into(),
        };
        upsert_register(&mut conn, &r).unwrap();
        let all = list_registers(&mut conn).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].base_number, 1100);
    }

    #[test]
    fn upsert_device_register_is_idempotent() {
        let mut conn = test_conn();
        let d = DeviceRegister {
            id: Id::new("dr1"),
            device_id: Id::new("d1"),
            register_id: Id::new("r1"),
        };
        upsert_device_register(&mut conn, &d).unwrap();
        upsert_device_register(&mut conn, &d).unwrap();
        assert_eq!(list_device_registers(&mut conn).unwrap().len(), 1);
    }
}
