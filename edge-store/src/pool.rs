//! SQLite connection pool, grounded on `syncstorage-sqlite/src/pool.rs`'s
//! `SqliteDbPool`: an `r2d2`-pooled diesel connection manager plus
//! embedded, forward-only migrations run once at startup.

use diesel::r2d2::{ConnectionManager, Pool};
use diesel::sqlite::SqliteConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

use crate::error::{StoreError, StoreResult};

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

pub type SqlitePool = Pool<ConnectionManager<SqliteConnection>>;

#[derive(Clone)]
pub struct StorePool {
    pool: SqlitePool,
}

impl StorePool {
    /// Builds the pool and runs any pending migrations on a dedicated
    /// connection before handing any connection out (spec.md §4.5's
    /// table set is assumed to exist by every other operation).
    pub fn new(database_url: &str, max_size: u32) -> StoreResult<Self> {
        let manager = ConnectionManager::<SqliteConnection>::new(database_url);
        let pool = Pool::builder()
            .max_size(max_size)
            .build(manager)
            .map_err(|e| StoreError::Migration(e.to_string()))?;

        {
            let mut conn = pool.get().map_err(StoreError::Pool)?;
            conn.run_pending_migrations(MIGRATIONS)
                .map_err(|e| StoreError::Migration(e.to_string()))?;
        }

        Ok(Self { pool })
    }

    pub fn get(&self) -> StoreResult<diesel::r2d2::PooledConnection<ConnectionManager<SqliteConnection>>> {
        self.pool.get().map_err(StoreError::Pool)
    }

    pub fn raw(&self) -> &SqlitePool {
        &self.pool
    }
}
