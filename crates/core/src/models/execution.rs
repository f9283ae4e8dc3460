use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 任务执行回执
///
/// Worker 开始执行任务时创建，每次进度更新时刷新 `last_update`，终态
/// 完成后删除。恢复管理器据此判断任务是否失联。回执只由持有任务的
/// Worker 写入，恢复管理器只读；过期判断由读方基于 `last_update` 推导。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskExecutionInfo {
    pub task_id: String,
    pub worker_name: String,
    pub start_time: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
    pub phase: String,
    pub progress: i32,
    pub retry_count: u32,
    pub max_retries: u32,
}

impl TaskExecutionInfo {
    pub fn started(task_id: impl Into<String>, worker_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            task_id: task_id.into(),
            worker_name: worker_name.into(),
            start_time: now,
            last_update: now,
            phase: "started".to_string(),
            progress: 0,
            retry_count: 0,
            max_retries: 3,
        }
    }
}

/// 任务控制动作
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ControlAction {
    #[serde(rename = "STOP")]
    Stop,
    #[serde(rename = "PAUSE")]
    Pause,
}

/// 任务控制信号
///
/// 写入存储供轮询，同时经广播频道推送；两条路径语义一致，
/// 轮询是权威来源。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlSignal {
    pub task_id: String,
    pub action: ControlAction,
    pub timestamp: DateTime<Utc>,
}

impl ControlSignal {
    pub fn new(task_id: impl Into<String>, action: ControlAction) -> Self {
        Self {
            task_id: task_id.into(),
            action,
            timestamp: Utc::now(),
        }
    }
}

/// 暂停时持久化的恢复状态
///
/// 重新提交携带该状态的任务时只会执行剩余阶段。
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ResumeState {
    pub completed_phases: Vec<String>,
    /// JSON编码的已发现资产列表
    #[serde(default)]
    pub assets: String,
}
