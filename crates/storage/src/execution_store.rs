use chrono::Utc;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};

use recon_core::models::{TaskExecutionInfo, TaskInfo, TaskStatus};
use recon_core::{SchedulerError, SchedulerResult};

use crate::connection::StoreConnection;
use crate::keys;

/// 执行回执TTL
const RECEIPT_TTL_SECS: u64 = 3600;
/// 任务信息与状态记录TTL
const RECORD_TTL_SECS: u64 = 24 * 3600;

/// 任务状态记录
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatusRecord {
    pub task_id: String,
    pub state: TaskStatus,
    #[serde(default)]
    pub worker_name: String,
    #[serde(default)]
    pub result: String,
}

/// 执行回执与任务记录存储
///
/// 回执只由持有任务的Worker写入，1小时TTL兜底清理；
/// 任务信息与状态记录保存24小时。
#[derive(Clone)]
pub struct ExecutionStore {
    conn: StoreConnection,
}

impl ExecutionStore {
    pub fn new(conn: StoreConnection) -> Self {
        Self { conn }
    }

    /// 记录任务开始执行
    pub async fn record_task_start(
        &self,
        task_id: &str,
        worker_name: &str,
    ) -> SchedulerResult<()> {
        let receipt = TaskExecutionInfo::started(task_id, worker_name);
        self.save_receipt(&receipt).await
    }

    /// 更新执行进度，回执缺失时重建
    pub async fn update_progress(
        &self,
        task_id: &str,
        worker_name: &str,
        phase: &str,
        progress: i32,
    ) -> SchedulerResult<()> {
        let mut receipt = match self.get_receipt(task_id).await? {
            Some(r) => r,
            None => TaskExecutionInfo::started(task_id, worker_name),
        };
        receipt.last_update = Utc::now();
        receipt.phase = phase.to_string();
        receipt.progress = progress;
        self.save_receipt(&receipt).await
    }

    pub async fn save_receipt(&self, receipt: &TaskExecutionInfo) -> SchedulerResult<()> {
        let payload = serde_json::to_string(receipt)?;
        let mut conn = self.conn.manager();
        let _: () = conn
            .set_ex(keys::task_execution(&receipt.task_id), payload, RECEIPT_TTL_SECS)
            .await
            .map_err(SchedulerError::Store)?;
        Ok(())
    }

    pub async fn get_receipt(&self, task_id: &str) -> SchedulerResult<Option<TaskExecutionInfo>> {
        let mut conn = self.conn.manager();
        let payload: Option<String> = conn
            .get(keys::task_execution(task_id))
            .await
            .map_err(SchedulerError::Store)?;
        match payload {
            Some(p) => Ok(Some(serde_json::from_str(&p)?)),
            None => Ok(None),
        }
    }

    pub async fn remove_receipt(&self, task_id: &str) -> SchedulerResult<()> {
        let mut conn = self.conn.manager();
        let _: () = conn
            .del(keys::task_execution(task_id))
            .await
            .map_err(SchedulerError::Store)?;
        Ok(())
    }

    pub async fn save_task_info(&self, task: &TaskInfo) -> SchedulerResult<()> {
        let payload = serde_json::to_string(task)?;
        let mut conn = self.conn.manager();
        let _: () = conn
            .set_ex(keys::task_info(&task.task_id), payload, RECORD_TTL_SECS)
            .await
            .map_err(SchedulerError::Store)?;
        Ok(())
    }

    pub async fn get_task_info(&self, task_id: &str) -> SchedulerResult<Option<TaskInfo>> {
        let mut conn = self.conn.manager();
        let payload: Option<String> = conn
            .get(keys::task_info(task_id))
            .await
            .map_err(SchedulerError::Store)?;
        match payload {
            Some(p) => Ok(Some(serde_json::from_str(&p)?)),
            None => Ok(None),
        }
    }

    pub async fn save_task_status(&self, record: &TaskStatusRecord) -> SchedulerResult<()> {
        let payload = serde_json::to_string(record)?;
        let mut conn = self.conn.manager();
        let _: () = conn
            .set_ex(keys::task_status(&record.task_id), payload, RECORD_TTL_SECS)
            .await
            .map_err(SchedulerError::Store)?;
        Ok(())
    }

    pub async fn get_task_status(&self, task_id: &str) -> SchedulerResult<Option<TaskStatusRecord>> {
        let mut conn = self.conn.manager();
        let payload: Option<String> = conn
            .get(keys::task_status(task_id))
            .await
            .map_err(SchedulerError::Store)?;
        match payload {
            Some(p) => Ok(Some(serde_json::from_str(&p)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_record_wire_format() {
        let record = TaskStatusRecord {
            task_id: "t1".to_string(),
            state: TaskStatus::Failure,
            worker_name: "w1".to_string(),
            result: "任务执行超时".to_string(),
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"taskId\":\"t1\""));
        assert!(json.contains("\"FAILURE\""));
    }
}
