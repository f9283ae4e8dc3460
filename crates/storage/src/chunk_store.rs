use redis::AsyncCommands;
use tracing::debug;

use recon_core::models::{ChunkStatus, SplitResult, TaskInfo};
use recon_core::{SchedulerError, SchedulerResult};

use crate::connection::StoreConnection;
use crate::keys;

/// 分片相关记录的保存时长
const CHUNK_TTL_SECS: u64 = 24 * 3600;

/// 分片记录存储
///
/// 拆分结果按父任务保存，分片状态与调度元数据按分片保存，
/// 全部带24小时TTL，过期自动清理。
#[derive(Clone)]
pub struct ChunkStore {
    conn: StoreConnection,
}

impl ChunkStore {
    pub fn new(conn: StoreConnection) -> Self {
        Self { conn }
    }

    /// 保存拆分结果
    pub async fn save_split_result(
        &self,
        task_id: &str,
        result: &SplitResult,
    ) -> SchedulerResult<()> {
        let payload = serde_json::to_string(result)?;
        let mut conn = self.conn.manager();
        let _: () = conn
            .set_ex(keys::chunk_info(task_id), payload, CHUNK_TTL_SECS)
            .await
            .map_err(SchedulerError::Store)?;
        debug!(task_id, chunks = result.chunk_count, "拆分结果已保存");
        Ok(())
    }

    pub async fn get_split_result(&self, task_id: &str) -> SchedulerResult<SplitResult> {
        let mut conn = self.conn.manager();
        let payload: Option<String> = conn
            .get(keys::chunk_info(task_id))
            .await
            .map_err(SchedulerError::Store)?;
        match payload {
            Some(p) => Ok(serde_json::from_str(&p)?),
            None => Err(SchedulerError::ChunkInfoNotFound {
                task_id: task_id.to_string(),
            }),
        }
    }

    /// 保存分片调度元数据
    pub async fn save_chunk_task(&self, chunk_id: &str, task: &TaskInfo) -> SchedulerResult<()> {
        let payload = serde_json::to_string(task)?;
        let mut conn = self.conn.manager();
        let _: () = conn
            .set_ex(keys::chunk_task(chunk_id), payload, CHUNK_TTL_SECS)
            .await
            .map_err(SchedulerError::Store)?;
        Ok(())
    }

    pub async fn get_chunk_task(&self, chunk_id: &str) -> SchedulerResult<Option<TaskInfo>> {
        let mut conn = self.conn.manager();
        let payload: Option<String> = conn
            .get(keys::chunk_task(chunk_id))
            .await
            .map_err(SchedulerError::Store)?;
        match payload {
            Some(p) => Ok(Some(serde_json::from_str(&p)?)),
            None => Ok(None),
        }
    }

    /// 更新分片执行状态
    pub async fn save_chunk_status(&self, status: &ChunkStatus) -> SchedulerResult<()> {
        let payload = serde_json::to_string(status)?;
        let mut conn = self.conn.manager();
        let _: () = conn
            .set_ex(keys::chunk_status(&status.chunk_id), payload, CHUNK_TTL_SECS)
            .await
            .map_err(SchedulerError::Store)?;
        Ok(())
    }

    /// 读取分片状态，缺失记录默认为PENDING
    pub async fn get_chunk_status(&self, chunk_id: &str) -> SchedulerResult<ChunkStatus> {
        let mut conn = self.conn.manager();
        let payload: Option<String> = conn
            .get(keys::chunk_status(chunk_id))
            .await
            .map_err(SchedulerError::Store)?;
        match payload {
            Some(p) => Ok(serde_json::from_str(&p)?),
            None => Ok(ChunkStatus::pending(chunk_id)),
        }
    }

    /// 批量读取分片状态
    pub async fn get_chunk_statuses(
        &self,
        chunk_ids: &[String],
    ) -> SchedulerResult<Vec<ChunkStatus>> {
        let mut statuses = Vec::with_capacity(chunk_ids.len());
        for chunk_id in chunk_ids {
            statuses.push(self.get_chunk_status(chunk_id).await?);
        }
        Ok(statuses)
    }

    /// 删除父任务派生的全部分片数据
    ///
    /// 未拆分过的任务也可安全调用。
    pub async fn cleanup_chunk_data(&self, task_id: &str) -> SchedulerResult<()> {
        let mut to_delete = vec![keys::chunk_info(task_id)];
        match self.get_split_result(task_id).await {
            Ok(result) => {
                for chunk in &result.chunks {
                    to_delete.push(keys::chunk_status(&chunk.chunk_id));
                    to_delete.push(keys::chunk_task(&chunk.chunk_id));
                }
            }
            Err(SchedulerError::ChunkInfoNotFound { .. }) => {}
            Err(e) => return Err(e),
        }

        let mut conn = self.conn.manager();
        let _: () = conn.del(to_delete).await.map_err(SchedulerError::Store)?;
        debug!(task_id, "分片数据已清理");
        Ok(())
    }
}
