use serde::{Deserialize, Serialize};

use crate::config::TaskConfig;
use crate::SchedulerResult;

/// 任务状态
///
/// 任务的生命周期: CREATED -> PENDING -> STARTED -> SUCCESS/FAILURE/REVOKED。
/// PAUSED 的任务保留恢复状态，可重新入队继续执行。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TaskStatus {
    #[serde(rename = "CREATED")]
    Created,
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "STARTED")]
    Started,
    #[serde(rename = "SUCCESS")]
    Success,
    #[serde(rename = "FAILURE")]
    Failure,
    #[serde(rename = "REVOKED")]
    Revoked,
    #[serde(rename = "PAUSED")]
    Paused,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Success | TaskStatus::Failure | TaskStatus::Revoked
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Created => "CREATED",
            TaskStatus::Pending => "PENDING",
            TaskStatus::Started => "STARTED",
            TaskStatus::Success => "SUCCESS",
            TaskStatus::Failure => "FAILURE",
            TaskStatus::Revoked => "REVOKED",
            TaskStatus::Paused => "PAUSED",
        }
    }
}

/// 队列中的任务条目
///
/// 分片任务的 `task_id` 形如 `{main_task_id}-chunk-{n}`，子任务之间共享
/// `main_task_id`。`workers` 非空时任务只会进入指定 Worker 的专属队列。
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TaskInfo {
    pub task_id: String,
    pub main_task_id: String,
    pub workspace_id: String,
    pub task_name: String,
    /// JSON编码的任务配置（见 config::task::TaskConfig）
    pub config: String,
    pub priority: i32,
    #[serde(default)]
    pub create_time: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub workers: Vec<String>,
}

impl TaskInfo {
    /// 从分片任务ID还原主任务ID
    ///
    /// 资产与漏洞始终按主任务归档，报表查询才能正确关联。
    pub fn main_task_id_of(task_id: &str) -> &str {
        match task_id.find("-chunk-") {
            Some(idx) => &task_id[..idx],
            None => task_id,
        }
    }

    pub fn is_chunk(&self) -> bool {
        self.task_id.contains("-chunk-")
    }
}

/// 队列条目config字段的载荷
///
/// 把分片元数据和各阶段配置放进一个带结构的信封里，Worker侧
/// 解析一次即可，不再做动态字段探测。
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TaskPayload {
    /// 按行分隔的本分片目标
    pub target: String,
    #[serde(default)]
    pub chunk_index: usize,
    #[serde(default)]
    pub chunk_total: usize,
    #[serde(default)]
    pub chunk_id: String,
    #[serde(default)]
    pub parent_task_id: String,
    /// 恢复执行时携带，只跑剩余阶段
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_state: Option<super::execution::ResumeState>,
    #[serde(default)]
    pub config: TaskConfig,
}

impl TaskPayload {
    pub fn parse(raw: &str) -> SchedulerResult<Self> {
        let mut payload: TaskPayload = serde_json::from_str(raw)?;
        payload.config.apply_defaults();
        payload.config.validate()?;
        Ok(payload)
    }

    pub fn to_json(&self) -> SchedulerResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// 任务执行结果
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    pub task_id: String,
    pub status: TaskStatus,
    pub message: String,
    pub asset_count: usize,
    pub vul_count: usize,
    /// 执行时长（秒）
    pub duration: i64,
}

impl TaskResult {
    /// 终态必须携带可读摘要
    pub fn format_result(&self) -> String {
        format!(
            "assets:{} vulns:{} duration:{}s",
            self.asset_count, self.vul_count, self.duration
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_main_task_id_of_chunked_task() {
        assert_eq!(TaskInfo::main_task_id_of("abc123-chunk-0"), "abc123");
        assert_eq!(TaskInfo::main_task_id_of("abc123-chunk-17"), "abc123");
        assert_eq!(TaskInfo::main_task_id_of("abc123"), "abc123");
    }

    #[test]
    fn test_terminal_states() {
        assert!(TaskStatus::Success.is_terminal());
        assert!(TaskStatus::Failure.is_terminal());
        assert!(TaskStatus::Revoked.is_terminal());
        assert!(!TaskStatus::Paused.is_terminal());
        assert!(!TaskStatus::Started.is_terminal());
    }

    #[test]
    fn test_task_info_json_uses_camel_case() {
        let task = TaskInfo {
            task_id: "t1".to_string(),
            main_task_id: "t1".to_string(),
            workspace_id: "ws1".to_string(),
            task_name: "scan".to_string(),
            config: "{}".to_string(),
            priority: 3,
            create_time: String::new(),
            workers: vec![],
        };
        let json = serde_json::to_string(&task).unwrap();
        assert!(json.contains("\"taskId\""));
        assert!(json.contains("\"mainTaskId\""));
        // 空 workers 列表不序列化
        assert!(!json.contains("\"workers\""));
    }

    #[test]
    fn test_format_result() {
        let result = TaskResult {
            task_id: "t1".to_string(),
            status: TaskStatus::Success,
            message: String::new(),
            asset_count: 12,
            vul_count: 3,
            duration: 95,
        };
        assert_eq!(result.format_result(), "assets:12 vulns:3 duration:95s");
    }
}
