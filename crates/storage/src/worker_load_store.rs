use redis::AsyncCommands;

use recon_core::models::WorkerLoad;
use recon_core::{SchedulerError, SchedulerResult};

use crate::connection::StoreConnection;
use crate::keys;

/// 心跳键TTL，超时未续期即视为失联
const HEARTBEAT_TTL_SECS: u64 = 30;

/// Worker负载与心跳存储
///
/// 负载快照集中放在一个哈希里便于全量读取；心跳是独立的
/// 带TTL键，存在性即在线性。
#[derive(Clone)]
pub struct WorkerLoadStore {
    conn: StoreConnection,
}

impl WorkerLoadStore {
    pub fn new(conn: StoreConnection) -> Self {
        Self { conn }
    }

    /// 上报负载并续期心跳
    pub async fn report_load(&self, load: &WorkerLoad) -> SchedulerResult<()> {
        let payload = serde_json::to_string(load)?;
        let mut conn = self.conn.manager();
        let mut pipe = redis::pipe();
        pipe.hset(keys::WORKER_LOAD, &load.worker_name, payload)
            .ignore();
        pipe.set_ex(
            keys::worker_heartbeat(&load.worker_name),
            "1",
            HEARTBEAT_TTL_SECS,
        )
        .ignore();
        let _: () = pipe
            .query_async(&mut conn)
            .await
            .map_err(SchedulerError::Store)?;
        Ok(())
    }

    /// 全量读取已知Worker的负载
    pub async fn get_all_loads(&self) -> SchedulerResult<Vec<WorkerLoad>> {
        let mut conn = self.conn.manager();
        let entries: std::collections::HashMap<String, String> = conn
            .hgetall(keys::WORKER_LOAD)
            .await
            .map_err(SchedulerError::Store)?;

        let mut loads = Vec::with_capacity(entries.len());
        for (_, payload) in entries {
            // 单条损坏的记录不阻断整体读取
            if let Ok(load) = serde_json::from_str::<WorkerLoad>(&payload) {
                loads.push(load);
            }
        }
        Ok(loads)
    }

    pub async fn get_load(&self, worker_name: &str) -> SchedulerResult<Option<WorkerLoad>> {
        let mut conn = self.conn.manager();
        let payload: Option<String> = conn
            .hget(keys::WORKER_LOAD, worker_name)
            .await
            .map_err(SchedulerError::Store)?;
        match payload {
            Some(p) => Ok(Some(serde_json::from_str(&p)?)),
            None => Ok(None),
        }
    }

    pub async fn remove_worker(&self, worker_name: &str) -> SchedulerResult<()> {
        let mut conn = self.conn.manager();
        let _: () = conn
            .hdel(keys::WORKER_LOAD, worker_name)
            .await
            .map_err(SchedulerError::Store)?;
        Ok(())
    }

    /// 心跳键是否存在
    pub async fn is_heartbeat_alive(&self, worker_name: &str) -> SchedulerResult<bool> {
        let mut conn = self.conn.manager();
        conn.exists(keys::worker_heartbeat(worker_name))
            .await
            .map_err(SchedulerError::Store)
    }
}
