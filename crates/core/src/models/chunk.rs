use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 任务分片
///
/// 创建后不可变；所有分片的 targets 多重集合并起来恰好等于父任务的
/// 完整目标展开（不丢失、不跨片重复）。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskChunk {
    /// 分片索引（从0开始）
    pub index: usize,
    pub targets: Vec<String>,
    pub target_count: usize,
    pub chunk_id: String,
    pub priority: i32,
}

/// 拆分结果
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitResult {
    pub chunks: Vec<TaskChunk>,
    pub total_targets: usize,
    pub chunk_count: usize,
    pub need_split: bool,
    /// 预估执行时间（秒），仅用于预览展示，不参与调度决策
    pub estimated_time: u64,
    pub recommended_size: usize,
}

/// 拆分预览（不实际拆分）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitPreview {
    pub total_targets: usize,
    pub chunk_count: usize,
    pub chunk_size: usize,
    pub need_split: bool,
    pub estimated_time: u64,
    pub recommended_size: usize,
    /// 预估最大内存使用（MB）
    pub max_memory_usage: f64,
    pub parallel_capacity: usize,
}

/// 分片执行状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ChunkState {
    #[default]
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "STARTED")]
    Started,
    #[serde(rename = "SUCCESS")]
    Success,
    #[serde(rename = "FAILURE")]
    Failure,
    #[serde(rename = "UNKNOWN")]
    Unknown,
}

/// 分片执行记录
///
/// 只由执行该分片的 Worker 更新；查询时缺失的记录默认为 PENDING。
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ChunkStatus {
    pub chunk_id: String,
    pub status: ChunkState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// 执行时长（秒）
    #[serde(default)]
    pub duration: i64,
    #[serde(default)]
    pub target_count: usize,
    #[serde(default)]
    pub asset_count: usize,
    #[serde(default)]
    pub vul_count: usize,
    #[serde(default)]
    pub error_msg: String,
    #[serde(default)]
    pub worker_name: String,
}

impl ChunkStatus {
    pub fn pending(chunk_id: impl Into<String>) -> Self {
        Self {
            chunk_id: chunk_id.into(),
            status: ChunkState::Pending,
            ..Default::default()
        }
    }
}

/// 分片进度聚合
///
/// 按需从各分片的实时状态读数计算得出，从不持久化。
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ChunkProgress {
    pub task_id: String,
    pub total_chunks: usize,
    pub completed_chunks: usize,
    pub failed_chunks: usize,
    pub running_chunks: usize,
    pub total_targets: usize,
    pub completion_rate: f64,
    pub chunks: Vec<ChunkStatus>,
}

impl ChunkProgress {
    /// 由分片状态列表聚合进度
    pub fn aggregate(task_id: &str, total_targets: usize, chunks: Vec<ChunkStatus>) -> Self {
        let mut progress = ChunkProgress {
            task_id: task_id.to_string(),
            total_chunks: chunks.len(),
            total_targets,
            ..Default::default()
        };
        for status in &chunks {
            match status.status {
                ChunkState::Success => progress.completed_chunks += 1,
                ChunkState::Failure => progress.failed_chunks += 1,
                ChunkState::Started => progress.running_chunks += 1,
                _ => {}
            }
        }
        if progress.total_chunks > 0 {
            progress.completion_rate =
                progress.completed_chunks as f64 / progress.total_chunks as f64 * 100.0;
        }
        progress.chunks = chunks;
        progress
    }
}
