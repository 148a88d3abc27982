use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;

use edge_common::model::{Meter, Protocol};
use edge_common::Id;

use crate::error::{StoreError, StoreResult};
use crate::models::MeterRow;
use crate::schema::meter;

pub fn list_active(conn: &mut SqliteConnection) -> StoreResult<Vec<Meter>> {
    let rows = meter::table.filter(meter::active.eq(true)).load::<MeterRow>(conn)?;
    rows.into_iter().map(MeterRow::into_domain).collect()
}

pub fn list_all(conn: &mut SqliteConnection) -> StoreResult<Vec<Meter>> {
    let rows = meter::table.load::<MeterRow>(conn)?;
    rows.into_iter().map(MeterRow::into_domain).collect()
}

pub fn upsert(conn: &mut SqliteConnection, m: &Meter) -> StoreResult<()> {
    let row = MeterRow::from(m);
    diesel::insert_into(meter::table)
        .values(&row)
        .on_conflict(meter::id)
        .do_update()
        .set((
            meter::display_name.eq(&row.display_name),
            meter::ip.eq(&row.ip),
            meter::port.eq(row.port),
            meter::protocol.eq(&row.protocol),
            meter::device_id.eq(&row.device_id),
            meter::element_tag.eq(&row.element_tag),
            meter::active.eq(row.active),
            meter::register_map.eq(&row.register_map),
        ))
        .execute(conn)?;
    Ok(())
}

pub fn touch_last_reading(conn: &mut SqliteConnection, meter_id: &Id, ts: DateTime<Utc>) -> StoreResult<()> {
    diesel::update(meter::table.filter(meter::id.eq(&meter_id.0)))
        .set(meter::last_reading_at.eq(ts.to_rfc3339()))
        .execute(conn)?;
    Ok(())
}

/// Meter status summary backing the Control API's `GET /meters[/{id}]`
/// (spec.md §4.11): the bits of the row a human checking in on a
/// deployment actually wants, plus `last_reading_at` (which the shared
/// `edge_common::model::Meter` domain type doesn't carry, since nothing
/// in the collection/sync pipelines needs it).
#[derive(Debug, Clone, serde::Serialize)]
pub struct MeterStatus {
    pub id: Id,
    pub display_name: String,
    pub protocol: Protocol,
    pub device_id: Id,
    pub element_tag: String,
    pub active: bool,
    pub last_reading_at: Option<DateTime<Utc>>,
}

fn row_into_status(row: MeterRow) -> StoreResult<MeterStatus> {
    let protocol = Protocol::parse(&row.protocol)
        .ok_or_else(|| StoreError::Decode(format!("unknown protocol {:?}", row.protocol)))?;
    let last_reading_at = row
        .last_reading_at
        .map(|raw| {
            DateTime::parse_from_rfc3339(&raw)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| StoreError::Decode(format!("bad timestamp {raw:?}: {e}")))
        })
        .transpose()?;
    Ok(MeterStatus {
        id: Id::new(row.id),
        display_name: row.display_name,
        protocol,
        device_id: Id::new(row.device_id),
        element_tag: row.element_tag,
        active: row.active,
        last_reading_at,
    })
}

pub fn list_status(conn: &mut SqliteConnection) -> StoreResult<Vec<MeterStatus>> {
    let rows = meter::table.load::<MeterRow>(conn)?;
    rows.into_iter().map(row_into_status).collect()
}

pub fn get_status(conn: &mut SqliteConnection, id: &Id) -> StoreResult<Option<MeterStatus>> {
    let row = meter::table.filter(meter::id.eq(&id.0)).first::<MeterRow>(conn).optional()?;
    row.map(row_into_status).transpose()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::pool::MIGRATIONS;
    use diesel::connection::Connection;
    use diesel_migrations::MigrationHarness;
    use edge_common::model::Protocol;

    fn test_conn() -> SqliteConnection {
        let mut conn = SqliteConnection::establish(":memory:").unwrap();
        conn.run_pending_migrations(MIGRATIONS).unwrap();
        conn
    }

    fn meter_domain(id: &str, active: bool) -> Meter {
        Meter {
            id: Id::new(id),
            display_name: id.to_string(),
            ip: "10.0.0.1".into(),
            port: 502,
            protocol: Protocol::Modbus,
            device_id: Id::new("d1"),
            element_tag: "A".into(),
            active,
            register_map: None,
        }
    }

    #[test]
    fn upsert_then_list_active_filters_inactive() {
        let mut conn = test_conn();
        upsert(&mut conn, &meter_domain("m1", true)).unwrap();
        upsert(&mut conn, &meter_domain("m2", false)).unwrap();
        assert_eq!(list_active(&mut conn).unwrap().len(), 1);
        assert_eq!(list_all(&mut conn).unwrap().len(), 2);
    }

    #[test]
    fn status_reports_last_reading_after_touch() {
        let mut conn = test_conn();
        upsert(&mut conn, &meter_domain("m1", true)).unwrap();
        assert!(get_status(&mut conn, &Id::new("m1")).unwrap().unwrap().last_reading_at.is_none());

        let ts = Utc::now();
        touch_last_reading(&mut conn, &Id::new("m1"), ts).unwrap();
        let status = get_status(&mut conn, &Id::new("m1")).unwrap().unwrap();
        assert!(status.last_reading_at.is_some());
        assert_eq!(list_status(&mut conn).unwrap().len(), 1);
    }

    #[test]
    fn upsert_is_idempotent_on_id() {
        let mut conn = test_conn();
        upsert(&mut conn, &meter_domain("m1", true)).unwrap();
        let mut updated = meter_domain("m1", true);
        updated.display_name = "renamed".into();
        upsert(&mut conn, &updated).unwrap();
        let all = list_all(&mut conn).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].display_name, "renamed");
    }
}
