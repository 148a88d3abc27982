//! Append-only sync log (spec.md §3, §4.5: "append", "listRecent",
//! "stats", "purge"). Every pipeline cycle (upload, pull, cleanup) writes
//! exactly one row here regardless of outcome, which is what makes
//! `/status` able to show recent pipeline history without re-deriving it
//! from the readings table.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use uuid::Uuid;

use edge_common::model::{SyncLogEntry, SyncOperation};
use edge_common::Id;

use crate::error::StoreResult;
use crate::models::SyncLogRow;
use crate::schema::sync_log;

pub fn append(
    conn: &mut SqliteConnection,
    operation: SyncOperation,
    batch_size: i64,
    success: bool,
    error_message: Option<String>,
) -> StoreResult<()> {
    let entry = SyncLogEntry {
        id: Id::new(Uuid::new_v4().to_string()),
        operation,
        batch_size,
        success,
        error_message,
        timestamp: Utc::now(),
    };
    diesel::insert_into(sync_log::table)
        .values(SyncLogRow::from(&entry))
        .execute(conn)?;
    Ok(())
}

pub fn list_recent(conn: &mut SqliteConnection, limit: i64) -> StoreResult<Vec<SyncLogEntry>> {
    let rows = sync_log::table
        .order(sync_log::ts.desc())
        .limit(limit)
        .load::<SyncLogRow>(conn)?;
    rows.into_iter().map(SyncLogRow::into_domain).collect()
}

/// Success/failure counts per operation over the last `hours` (spec.md
/// §4.5's `stats(hours)`), surfaced on the Control API's `/status`.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct SyncLogStats {
    pub upload_success: i64,
    pub upload_failure: i64,
    pub pull_success: i64,
    pub pull_failure: i64,
    pub cleanup_success: i64,
    pub cleanup_failure: i64,
}

pub fn stats(conn: &mut SqliteConnection, hours: i64) -> StoreResult<SyncLogStats> {
    let cutoff = (Utc::now() - ChronoDuration::hours(hours)).to_rfc3339();
    let rows = sync_log::table
        .filter(sync_log::ts.ge(cutoff))
        .load::<SyncLogRow>(conn)?;

    let mut out = SyncLogStats::default();
    for row in rows {
        let entry = row.into_domain()?;
        match (entry.operation, entry.success) {
            (SyncOperation::Upload, true) => out.upload_success += 1,
            (SyncOperation::Upload, false) => out.upload_failure += 1,
            (SyncOperation::Pull, true) => out.pull_success += 1,
            (SyncOperation::Pull, false) => out.pull_failure += 1,
            (SyncOperation::Cleanup, true) => out.cleanup_success += 1,
            (SyncOperation::Cleanup, false) => out.cleanup_failure += 1,
        }
    }
    Ok(out)
}

pub fn purge(conn: &mut SqliteConnection, cutoff: DateTime<Utc>) -> StoreResult<usize> {
    let cutoff = cutoff.to_rfc3339();
    let count = diesel::delete(sync_log::table.filter(sync_log::ts.lt(cutoff))).execute(conn)?;
    Ok(count)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::pool::MIGRATIONS;
    use diesel::connection::Connection;
    use diesel_migrations::MigrationHarness;

    fn test_conn() -> SqliteConnection {
        let mut conn = SqliteConnection::establish(":memory:").unwrap();
        conn.run_pending_migrations(MIGRATIONS).unwrap();
        conn
    }

    #[test]
    fn append_then_list_recent_orders_newest_first() {
        let mut conn = test_conn();
        append(&mut conn, SyncOperation::Upload, 10, true, None).unwrap();
        append(&mut conn, SyncOperation::Upload, 5, false, Some("boom".into())).unwrap();
        let recent = list_recent(&mut conn, 10).unwrap();
        assert_eq!(recent.len(), 2);
    }

    #[test]
    fn stats_tallies_by_operation_and_outcome() {
        let mut conn = test_conn();
        append(&mut conn, SyncOperation::Upload, 10, true, None).unwrap();
        append(&mut conn, SyncOperation::Upload, 0, false, Some("fail".into())).unwrap();
        append(&mut conn, SyncOperation::Pull, 3, true, None).unwrap();

        let s = stats(&mut conn, 24).unwrap();
        assert_eq!(s.upload_success, 1);
        assert_eq!(s.upload_failure, 1);
        assert_eq!(s.pull_success, 1);
    }

    #[test]
    fn purge_removes_rows_older_than_cutoff() {
        let mut conn = test_conn();
        append(&mut conn, SyncOperation::Cleanup, 1, true, None).unwrap();
        let removed = purge(&mut conn, Utc::now() + ChronoDuration::seconds(1)).unwrap();
        assert_eq!(removed, 1);
        assert!(list_recent(&mut conn, 10).unwrap().is_empty());
    }
}
