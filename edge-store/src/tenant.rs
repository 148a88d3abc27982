//! Tenant table CRUD (spec.md §3: "exactly one 'current' tenant in cache
//! at a time"). The local table can hold more than one row across a
//! tenant migration, but `current` is what `edge-cache` actually loads.

use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;

use edge_common::model::Tenant;

use crate::error::StoreResult;
use crate::models::TenantRow;
use crate::schema::tenant;

pub fn upsert(conn: &mut SqliteConnection, t: &Tenant) -> StoreResult<()> {
    let row = TenantRow::from(t);
    diesel::insert_into(tenant::table)
        .values(&row)
        .on_conflict(tenant::id)
        .do_update()
        .set((
            tenant::display_name.eq(&row.display_name),
            tenant::api_key.eq(&row.api_key),
            tenant::last_seen.eq(&row.last_seen),
        ))
        .execute(conn)?;
    Ok(())
}

pub fn list_all(conn: &mut SqliteConnection) -> StoreResult<Vec<Tenant>> {
    let rows = tenant::table.load::<TenantRow>(conn)?;
    rows.into_iter().map(TenantRow::into_domain).collect()
}

/// Most recently seen tenant row, the "current" tenant spec.md §3 refers
/// to. `None` before the first successful pull-sync.
pub fn current(conn: &mut SqliteConnection) -> StoreResult<Option<Tenant>> {
    let row = tenant::table
        .order(tenant::last_seen.desc())
        .first::<TenantRow>(conn)
        .optional()?;
    row.map(TenantRow::into_domain).transpose()
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

    fn tenant(id: &str) -> Tenant {
        Tenant {
            id: Id::new(id),
            display_name: id.to_string(),
            api_key: "key".into(),
            last_seen: Some(chrono::Utc::now()),
        }
    }

    #[test]
    fn upsert_then_current_round_trips() {
        let mut conn = test_conn();
        upsert(&mut conn, &tenant("t1")).unwrap();
        let found = current(&mut conn).unwrap().unwrap();
        assert_eq!(found.id, Id::new("t1"));
    }

    #[test]
    fn upsert_is_idempotent_on_id() {
        let mut conn = test_conn();
        upsert(&mut conn, &tenant("t1")).unwrap();
        let mut renamed = tenant("t1");
        renamed.display_name = "renamed".into();
        upsert(&mut conn, &renamed).unwrap();
        assert_eq!(list_all(&mut conn).unwrap().len(), 1);
        assert_eq!(current(&mut conn).unwrap().unwrap().display_name, "renamed");
    }
}
