//! Reading CRUD (spec.md §4.5). Batch inserts run inside a single
//! transaction so partial inserts can't occur, mirroring the
//! transactional batch-append pattern in `syncstorage-mysql/src/batch.rs`.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;

use edge_common::model::Reading;
use edge_common::Id;

use crate::error::StoreResult;
use crate::models::ReadingRow;
use crate::schema::meter_reading;

pub fn insert(conn: &mut SqliteConnection, reading: &Reading) -> StoreResult<()> {
    diesel::insert_into(meter_reading::table)
        .values(ReadingRow::from(reading))
        .execute(conn)?;
    Ok(())
}

pub fn insert_batch(conn: &mut SqliteConnection, readings: &[Reading]) -> StoreResult<()> {
    conn.transaction(|conn| -> StoreResult<()> {
        for reading in readings {
            diesel::insert_into(meter_reading::table)
                .values(ReadingRow::from(reading))
                .execute(conn)?;
        }
        Ok(())
    })
}

pub fn list_unsynchronized(conn: &mut SqliteConnection, limit: i64) -> StoreResult<Vec<Reading>> {
    let rows = meter_reading::table
        .filter(meter_reading::synchronized.eq(false))
        .filter(meter_reading::quarantined.eq(false))
        .order(meter_reading::created_at.asc())
        .limit(limit)
        .load::<ReadingRow>(conn)?;
    rows.into_iter().map(ReadingRow::into_domain).collect()
}

pub fn increment_retry(conn: &mut SqliteConnection, ids: &[Id]) -> StoreResult<()> {
    let raw_ids: Vec<&str> = ids.iter().map(|id| id.0.as_str()).collect();
    conn.transaction(|conn| -> StoreResult<()> {
        diesel::update(meter_reading::table.filter(meter_reading::id.eq_any(&raw_ids)))
            .set(meter_reading::retry_count.eq(meter_reading::retry_count + 1))
            .execute(conn)?;
        Ok(())
    })
}

/// Marks readings as quarantined once `retry_count` has crossed
/// `max_retries` (spec.md §4.9's "increment retry_count ... the next
/// cycle will pick them up again" — bounded by the push-sync manager
/// quarantining ids that have exhausted their retries so they stop
/// being re-selected by `list_unsynchronized`).
pub fn quarantine(conn: &mut SqliteConnection, ids: &[Id]) -> StoreResult<()> {
    let raw_ids: Vec<&str> = ids.iter().map(|id| id.0.as_str()).collect();
    diesel::update(meter_reading::table.filter(meter_reading::id.eq_any(&raw_ids)))
        .set(meter_reading::quarantined.eq(true))
        .execute(conn)?;
    Ok(())
}

pub fn mark_synchronized(conn: &mut SqliteConnection, ids: &[Id]) -> StoreResult<()> {
    let raw_ids: Vec<&str> = ids.iter().map(|id| id.0.as_str()).collect();
    diesel::update(meter_reading::table.filter(meter_reading::id.eq_any(&raw_ids)))
        .set(meter_reading::synchronized.eq(true))
        .execute(conn)?;
    Ok(())
}

pub fn delete_ids(conn: &mut SqliteConnection, ids: &[Id]) -> StoreResult<usize> {
    let raw_ids: Vec<&str> = ids.iter().map(|id| id.0.as_str()).collect();
    let count = diesel::delete(meter_reading::table.filter(meter_reading::id.eq_any(&raw_ids))).execute(conn)?;
    Ok(count)
}

/// Backs the Control API's `GET /readings?meter_id&hours&limit` (spec.md
/// §4.11): newest first, optionally narrowed to one meter, within the
/// last `since`.
pub fn list_recent(
    conn: &mut SqliteConnection,
    meter_id: Option<&Id>,
    since: DateTime<Utc>,
    limit: i64,
) -> StoreResult<Vec<Reading>> {
    let since = since.to_rfc3339();
    let mut query = meter_reading::table.filter(meter_reading::created_at.ge(since)).into_boxed();
    if let Some(meter_id) = meter_id {
        query = query.filter(meter_reading::meter_id.eq(meter_id.0.clone()));
    }
    let rows = query
        .order(meter_reading::created_at.desc())
        .limit(limit)
        .load::<ReadingRow>(conn)?;
    rows.into_iter().map(ReadingRow::into_domain).collect()
}

/// Backs the Control API's `/status` (spec.md §7: quarantined readings are
/// "kept, flagged, excluded from batches, surfaced on `/status`") so an
/// operator can see them without a reading ever being silently dropped.
pub fn count_quarantined(conn: &mut SqliteConnection) -> StoreResult<i64> {
    let count = meter_reading::table
        .filter(meter_reading::quarantined.eq(true))
        .count()
        .get_result(conn)?;
    Ok(count)
}

pub fn delete_old_synchronized(conn: &mut SqliteConnection, cutoff: DateTime<Utc>) -> StoreResult<usize> {
    let cutoff = cutoff.to_rfc3339();
    let count = diesel::delete(
        meter_reading::table
            .filter(meter_reading::synchronized.eq(true))
            .filter(meter_reading::created_at.lt(cutoff)),
    )
    .execute(conn)?;
    Ok(count)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::pool::MIGRATIONS;
    use diesel::connection::Connection;
    use diesel_migrations::MigrationHarness;
    use edge_common::model::Quality;

    fn test_conn() -> SqliteConnection {
        let mut conn = SqliteConnection::establish(":memory:").unwrap();
        conn.run_pending_migrations(MIGRATIONS).unwrap();
        conn
    }

    fn reading(id: &str, synchronized: bool) -> Reading {
        Reading {
            id: Id::new(id),
            meter_id: Id::new("m1"),
            timestamp: Utc::now(),
            field_name: "kwh".into(),
            value: 42.0,
            unit: "kWh".into(),
            quality: Quality::Good,
            synchronized,
            retry_count: 0,
            quarantined: false,
        }
    }

    #[test]
    fn insert_batch_is_all_or_nothing() {
        let mut conn = test_conn();
        let readings = vec![reading("r1", false), reading("r2", false)];
        insert_batch(&mut conn, &readings).unwrap();
        let listed = list_unsynchronized(&mut conn, 10).unwrap();
        assert_eq!(listed.len(), 2);
    }

    #[test]
    fn increment_retry_then_quarantine_removes_from_unsynchronized_selection() {
        let mut conn = test_conn();
        insert(&mut conn, &reading("r1", false)).unwrap();
        increment_retry(&mut conn, &[Id::new("r1")]).unwrap();
        quarantine(&mut conn, &[Id::new("r1")]).unwrap();
        assert!(list_unsynchronized(&mut conn, 10).unwrap().is_empty());
    }

    #[test]
    fn list_recent_filters_by_meter_and_window() {
        let mut conn = test_conn();
        let mut r1 = reading("r1", true);
        r1.meter_id = Id::new("m1");
        let mut r2 = reading("r2", true);
        r2.meter_id = Id::new("m2");
        insert(&mut conn, &r1).unwrap();
        insert(&mut conn, &r2).unwrap();

        let since = Utc::now() - chrono::Duration::hours(1);
        let all = list_recent(&mut conn, None, since, 10).unwrap();
        assert_eq!(all.len(), 2);

        let m1_only = list_recent(&mut conn, Some(&Id::new("m1")), since, 10).unwrap();
        assert_eq!(m1_only.len(), 1);
        assert_eq!(m1_only[0].id, Id::new("r1"));
    }

    #[test]
    fn count_quarantined_reflects_quarantined_rows_only() {
        let mut conn = test_conn();
        insert(&mut conn, &reading("r1", false)).unwrap();
        insert(&mut conn, &reading("r2", false)).unwrap();
        quarantine(&mut conn, &[Id::new("r1")]).unwrap();
        assert_eq!(count_quarantined(&mut conn).unwrap(), 1);
    }

    #[test]
    fn delete_ids_removes_rows_and_reports_count() {
        let mut conn = test_conn();
        insert(&mut conn, &reading("r1", false)).unwrap();
        insert(&mut conn, &reading("r2", false)).unwrap();
        let deleted = delete_ids(&mut conn, &[Id::new("r1")]).unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(list_unsynchronized(&mut conn, 10).unwrap().len(), 1);
    }
}
