use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use recon_core::{SchedulerError, SchedulerResult};

use crate::connection::StoreConnection;
use crate::keys;

/// 结果记录保存时长
const RESULT_TTL_SECS: i64 = 24 * 3600;

/// 扫描结果存储
///
/// 资产与漏洞按主任务归档为列表，多个分片并发追加互不覆盖；
/// 阶段完成计数放在每个主任务一个的哈希里。结果类型由调用方
/// 定义，这里只负责序列化与归档。
#[derive(Clone)]
pub struct ResultStore {
    conn: StoreConnection,
}

impl ResultStore {
    pub fn new(conn: StoreConnection) -> Self {
        Self { conn }
    }

    /// 追加资产记录
    pub async fn append_assets<T: Serialize + Sync>(
        &self,
        main_task_id: &str,
        assets: &[T],
    ) -> SchedulerResult<()> {
        self.append(keys::task_assets(main_task_id), assets).await?;
        debug!(main_task_id, count = assets.len(), "资产已归档");
        Ok(())
    }

    /// 追加漏洞记录
    pub async fn append_vulnerabilities<T: Serialize + Sync>(
        &self,
        main_task_id: &str,
        vulns: &[T],
    ) -> SchedulerResult<()> {
        self.append(keys::task_vulns(main_task_id), vulns).await?;
        debug!(main_task_id, count = vulns.len(), "漏洞已归档");
        Ok(())
    }

    async fn append<T: Serialize>(&self, key: String, items: &[T]) -> SchedulerResult<()> {
        if items.is_empty() {
            return Ok(());
        }
        let mut payloads = Vec::with_capacity(items.len());
        for item in items {
            payloads.push(serde_json::to_string(item)?);
        }
        let mut conn = self.conn.manager();
        let mut pipe = redis::pipe();
        pipe.rpush(&key, payloads).ignore();
        pipe.expire(&key, RESULT_TTL_SECS).ignore();
        let _: () = pipe
            .query_async(&mut conn)
            .await
            .map_err(SchedulerError::Store)?;
        Ok(())
    }

    /// 读取主任务的全部资产
    pub async fn get_assets<T: DeserializeOwned>(
        &self,
        main_task_id: &str,
    ) -> SchedulerResult<Vec<T>> {
        self.read_all(keys::task_assets(main_task_id)).await
    }

    /// 读取主任务的全部漏洞
    pub async fn get_vulnerabilities<T: DeserializeOwned>(
        &self,
        main_task_id: &str,
    ) -> SchedulerResult<Vec<T>> {
        self.read_all(keys::task_vulns(main_task_id)).await
    }

    async fn read_all<T: DeserializeOwned>(&self, key: String) -> SchedulerResult<Vec<T>> {
        let mut conn = self.conn.manager();
        let payloads: Vec<String> = conn.lrange(key, 0, -1).await.map_err(SchedulerError::Store)?;
        let mut items = Vec::with_capacity(payloads.len());
        for payload in payloads {
            items.push(serde_json::from_str(&payload)?);
        }
        Ok(items)
    }

    /// 阶段完成计数加一，返回新值
    pub async fn increment_phase_completion(
        &self,
        main_task_id: &str,
        phase: &str,
    ) -> SchedulerResult<i64> {
        let key = keys::task_phase_completion(main_task_id);
        let mut conn = self.conn.manager();
        let count: i64 = conn
            .hincr(&key, phase, 1)
            .await
            .map_err(SchedulerError::Store)?;
        let _: () = conn
            .expire(&key, RESULT_TTL_SECS)
            .await
            .map_err(SchedulerError::Store)?;
        Ok(count)
    }

    /// 读取各阶段完成计数
    pub async fn get_phase_completion(
        &self,
        main_task_id: &str,
    ) -> SchedulerResult<std::collections::HashMap<String, i64>> {
        let mut conn = self.conn.manager();
        conn.hgetall(keys::task_phase_completion(main_task_id))
            .await
            .map_err(SchedulerError::Store)
    }

    /// 清理主任务的结果数据
    pub async fn cleanup(&self, main_task_id: &str) -> SchedulerResult<()> {
        let mut conn = self.conn.manager();
        let _: () = conn
            .del(vec![
                keys::task_assets(main_task_id),
                keys::task_vulns(main_task_id),
                keys::task_phase_completion(main_task_id),
            ])
            .await
            .map_err(SchedulerError::Store)?;
        Ok(())
    }
}
