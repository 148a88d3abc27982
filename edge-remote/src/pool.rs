//! Remote MySQL read pool (spec.md §6: "Remote → Local (pull)"),
//! grounded on the r2d2 pool shape in `syncstorage-sqlite/src/pool.rs`
//! (the teacher's own MySQL pool has since moved to `diesel_async` +
//! `deadpool`; this crate stays on `diesel`'s synchronous r2d2 pool
//! because pull's "simple `SELECT *`, no cursors" contract (spec.md §6)
//! has no need for that migration, and it keeps one pooling idiom across
//! both the local and remote stores). No migrations run against this
//! pool: the remote schema is owned by the backend service, not by this
//! agent.

use std::sync::Arc;

use diesel::mysql::MysqlConnection;
use diesel::r2d2::{ConnectionManager, Pool};

use edge_common::model::{DeviceRegister, Meter, Register, Tenant};
use edge_common::BlockingThreadpool;

use crate::error::RemoteResult;
use crate::rows;

pub type MysqlPool = Pool<ConnectionManager<MysqlConnection>>;

#[derive(Clone)]
pub struct RemoteDbPool {
    pool: MysqlPool,
    blocking: Arc<BlockingThreadpool>,
}

impl RemoteDbPool {
    pub fn new(database_url: &str, max_size: u32, blocking: Arc<BlockingThreadpool>) -> RemoteResult<Self> {
        let manager = ConnectionManager::<MysqlConnection>::new(database_url);
        let pool = Pool::builder().max_size(max_size).build(manager)?;
        Ok(Self { pool, blocking })
    }

    /// Copies every row of all four remote tables in one round of
    /// blocking calls, each its own connection checkout so a slow
    /// `device_register` scan doesn't hold the `meter` checkout idle.
    pub async fn fetch_all(
        &self,
    ) -> RemoteResult<(Vec<Tenant>, Vec<Meter>, Vec<Register>, Vec<DeviceRegister>)> {
        let tenants = self.fetch_tenants().await?;
        let meters = self.fetch_meters().await?;
        let registers = self.fetch_registers().await?;
        let device_registers = self.fetch_device_registers().await?;
        Ok((tenants, meters, registers, device_registers))
    }

    pub async fn fetch_tenants(&self) -> RemoteResult<Vec<Tenant>> {
        let pool = self.pool.clone();
        self.blocking
            .spawn(move || {
                let mut conn = pool.get()?;
                rows::fetch_tenants(&mut conn)
            })
            .await
    }

    pub async fn fetch_meters(&self) -> RemoteResult<Vec<Meter>> {
        let pool = self.pool.clone();
        self.blocking
            .spawn(move || {
                let mut conn = pool.get()?;
                rows::fetch_meters(&mut conn)
            })
            .await
    }

    pub async fn fetch_registers(&self) -> RemoteResult<Vec<Register>> {
        let pool = self.pool.clone();
        self.blocking
            .spawn(move || {
                let mut conn = pool.get()?;
                rows::fetch_registers(&mut conn)
            })
            .await
    }

    pub async fn fetch_device_registers(&self) -> RemoteResult<Vec<DeviceRegister>> {
        let pool = self.pool.clone();
        self.blocking
            .spawn(move || {
                let mut conn = pool.get()?;
                rows::fetch_device_registers(&mut conn)
            })
            .await
    }
}
