use tracing::{error, info, warn};

use recon_core::config::TaskConfig;
use recon_core::models::{ChunkProgress, SplitResult, TaskInfo, TaskPayload};
use recon_core::SchedulerResult;
use recon_storage::ChunkStore;

use crate::load_balancer::LoadBalancer;
use crate::splitter::{ChunkConfig, TaskSplitter};

/// 分片任务请求
#[derive(Debug, Clone)]
pub struct ChunkTaskRequest {
    /// 父任务ID
    pub task_id: String,
    pub task_name: String,
    /// 按行分隔的目标描述
    pub target: String,
    pub config: TaskConfig,
    pub workspace_id: String,
    pub main_task_id: String,
    pub priority: i32,
    /// 指定Worker列表，为空表示任意Worker
    pub workers: Vec<String>,
}

/// 分片任务响应
#[derive(Debug, Clone)]
pub struct ChunkTaskResponse {
    pub chunk_count: usize,
    pub total_targets: usize,
    pub chunk_ids: Vec<String>,
    pub split_result: SplitResult,
}

/// 分片管理器
///
/// 负责把一个多目标任务变成若干条队列条目：拆分、持久化分片
/// 记录、构造每个分片的调度任务，经负载均衡器分配后批量入队。
pub struct ChunkManager {
    splitter: TaskSplitter,
    chunk_store: ChunkStore,
    balancer: LoadBalancer,
}

impl ChunkManager {
    pub fn new(config: ChunkConfig, chunk_store: ChunkStore, balancer: LoadBalancer) -> Self {
        Self {
            splitter: TaskSplitter::new(config),
            chunk_store,
            balancer,
        }
    }

    /// 创建分片任务并持久化分片元数据，不入队
    pub async fn create_chunked_task(
        &self,
        req: &ChunkTaskRequest,
    ) -> SchedulerResult<(ChunkTaskResponse, Vec<TaskInfo>)> {
        let (split_result, warnings) =
            self.splitter
                .split_task(&req.task_id, &req.target, &req.config)?;
        for warning in &warnings {
            warn!(task_id = %req.task_id, warning, "目标展开警告");
        }
        info!(
            task_id = %req.task_id,
            total_targets = split_result.total_targets,
            chunk_count = split_result.chunk_count,
            need_split = split_result.need_split,
            "任务拆分完成"
        );

        self.chunk_store
            .save_split_result(&req.task_id, &split_result)
            .await?;

        let mut sched_tasks = Vec::with_capacity(split_result.chunk_count);
        let mut chunk_ids = Vec::with_capacity(split_result.chunk_count);

        for chunk in &split_result.chunks {
            let payload = TaskPayload {
                target: chunk.targets.join("\n"),
                chunk_index: chunk.index,
                chunk_total: split_result.chunk_count,
                chunk_id: chunk.chunk_id.clone(),
                parent_task_id: req.task_id.clone(),
                resume_state: None,
                config: req.config.clone(),
            };

            let sched_task = TaskInfo {
                task_id: chunk.chunk_id.clone(),
                main_task_id: req.main_task_id.clone(),
                workspace_id: req.workspace_id.clone(),
                task_name: req.task_name.clone(),
                config: payload.to_json()?,
                priority: chunk.priority.max(req.priority),
                create_time: String::new(),
                workers: req.workers.clone(),
            };

            // 单条元数据保存失败不中断整体创建，分片ID确定性可重试
            if let Err(e) = self
                .chunk_store
                .save_chunk_task(&chunk.chunk_id, &sched_task)
                .await
            {
                error!(chunk_id = %chunk.chunk_id, error = %e, "保存分片任务元数据失败");
            }

            chunk_ids.push(chunk.chunk_id.clone());
            sched_tasks.push(sched_task);
        }

        let response = ChunkTaskResponse {
            chunk_count: split_result.chunk_count,
            total_targets: split_result.total_targets,
            chunk_ids,
            split_result,
        };
        Ok((response, sched_tasks))
    }

    /// 创建、分配Worker并批量入队
    ///
    /// 元数据已持久化后入队失败不回滚，调用方可安全重试入队。
    pub async fn push_chunked_tasks(
        &self,
        req: &ChunkTaskRequest,
    ) -> SchedulerResult<ChunkTaskResponse> {
        let (response, mut sched_tasks) = self.create_chunked_task(req).await?;

        self.balancer.distribute_task_batch(&mut sched_tasks).await?;
        info!(
            task_id = %req.task_id,
            count = sched_tasks.len(),
            "分片任务已全部入队"
        );
        Ok(response)
    }

    /// 聚合父任务的分片进度
    ///
    /// 实时读数，分片状态缺失按PENDING计。
    pub async fn get_chunk_progress(&self, task_id: &str) -> SchedulerResult<ChunkProgress> {
        let split_result = self.chunk_store.get_split_result(task_id).await?;
        let chunk_ids: Vec<String> = split_result
            .chunks
            .iter()
            .map(|c| c.chunk_id.clone())
            .collect();
        let statuses = self.chunk_store.get_chunk_statuses(&chunk_ids).await?;
        Ok(ChunkProgress::aggregate(
            task_id,
            split_result.total_targets,
            statuses,
        ))
    }

    /// 清理父任务派生的全部分片数据
    pub async fn cleanup_chunk_data(&self, task_id: &str) -> SchedulerResult<()> {
        self.chunk_store.cleanup_chunk_data(task_id).await
    }
}
