use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Local, Utc};
use redis::AsyncCommands;
use tracing::debug;
use uuid::Uuid;

use recon_core::models::TaskInfo;
use recon_core::{SchedulerError, SchedulerResult};

use crate::connection::StoreConnection;
use crate::keys;

/// 优先级分数
///
/// 分数越小越先出队：基础分为创建时间戳，每级优先级减1000秒，
/// 保证高优先级任务即使创建较晚也先被处理。
pub fn priority_score(priority: i32, create_time: DateTime<Utc>) -> f64 {
    create_time.timestamp() as f64 - (priority as i64 * 1000) as f64
}

/// 批量入队时第index个任务的分数，同批任务按入参顺序出队
pub fn batch_priority_score(priority: i32, create_time: DateTime<Utc>, index: usize) -> f64 {
    priority_score(priority, create_time) + index as f64 * 0.001
}

/// 队列操作计数
#[derive(Debug, Default)]
pub struct QueueMetrics {
    push_count: AtomicU64,
    pop_count: AtomicU64,
}

impl QueueMetrics {
    pub fn record_push(&self, n: u64) {
        self.push_count.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_pop(&self) {
        self.pop_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn push_count(&self) -> u64 {
        self.push_count.load(Ordering::Relaxed)
    }

    pub fn pop_count(&self) -> u64 {
        self.pop_count.load(Ordering::Relaxed)
    }
}

/// 优先级任务队列
///
/// 公共队列为有序集合；指定了workers的任务进入每个Worker的专属
/// 队列。出队后任务ID加入处理中集合，完成时移除。
#[derive(Clone)]
pub struct TaskQueue {
    conn: StoreConnection,
    metrics: Arc<QueueMetrics>,
}

impl TaskQueue {
    pub fn new(conn: StoreConnection) -> Self {
        Self {
            conn,
            metrics: Arc::new(QueueMetrics::default()),
        }
    }

    pub fn metrics(&self) -> Arc<QueueMetrics> {
        self.metrics.clone()
    }

    /// 入队单个任务
    ///
    /// 缺少taskId时生成；createTime统一在入队时刻写入。
    pub async fn push_task(&self, task: &mut TaskInfo) -> SchedulerResult<()> {
        if task.task_id.is_empty() {
            task.task_id = Uuid::new_v4().to_string();
        }
        let now = Utc::now();
        task.create_time = now
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string();

        let payload = serde_json::to_string(task)?;
        let score = priority_score(task.priority, now);
        let mut conn = self.conn.manager();

        if task.workers.is_empty() {
            let _: () = conn
                .zadd(keys::TASK_QUEUE, payload, score)
                .await
                .map_err(SchedulerError::Store)?;
        } else {
            let mut pipe = redis::pipe();
            for worker in &task.workers {
                pipe.zadd(keys::worker_queue(worker), &payload, score).ignore();
            }
            let _: () = pipe
                .query_async(&mut conn)
                .await
                .map_err(SchedulerError::Store)?;
        }

        self.metrics.record_push(1);
        debug!(task_id = %task.task_id, priority = task.priority, "任务已入队");
        Ok(())
    }

    /// 批量入队，单次流水线提交
    pub async fn push_task_batch(&self, tasks: &mut [TaskInfo]) -> SchedulerResult<()> {
        if tasks.is_empty() {
            return Ok(());
        }
        let now = Utc::now();
        let create_time = now
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string();

        let mut pipe = redis::pipe();
        for (i, task) in tasks.iter_mut().enumerate() {
            if task.task_id.is_empty() {
                task.task_id = Uuid::new_v4().to_string();
            }
            task.create_time = create_time.clone();
            let payload = serde_json::to_string(task)?;
            let score = batch_priority_score(task.priority, now, i);

            if task.workers.is_empty() {
                pipe.zadd(keys::TASK_QUEUE, &payload, score).ignore();
            } else {
                for worker in &task.workers {
                    pipe.zadd(keys::worker_queue(worker), &payload, score).ignore();
                }
            }
        }

        let mut conn = self.conn.manager();
        let _: () = pipe
            .query_async(&mut conn)
            .await
            .map_err(SchedulerError::Store)?;
        self.metrics.record_push(tasks.len() as u64);
        debug!(count = tasks.len(), "批量任务已入队");
        Ok(())
    }

    /// 从公共队列弹出最高优先级任务
    pub async fn pop_task(&self) -> SchedulerResult<Option<TaskInfo>> {
        let mut conn = self.conn.manager();
        let popped: Vec<(String, f64)> = conn
            .zpopmin(keys::TASK_QUEUE, 1)
            .await
            .map_err(SchedulerError::Store)?;
        self.finish_pop(popped).await
    }

    /// 优先从Worker专属队列弹出，专属队列为空时回退公共队列
    pub async fn pop_task_for_worker(&self, worker_name: &str) -> SchedulerResult<Option<TaskInfo>> {
        let mut conn = self.conn.manager();
        let mut popped: Vec<(String, f64)> = conn
            .zpopmin(keys::worker_queue(worker_name), 1)
            .await
            .map_err(SchedulerError::Store)?;
        if popped.is_empty() {
            popped = conn
                .zpopmin(keys::TASK_QUEUE, 1)
                .await
                .map_err(SchedulerError::Store)?;
        }
        self.finish_pop(popped).await
    }

    async fn finish_pop(&self, popped: Vec<(String, f64)>) -> SchedulerResult<Option<TaskInfo>> {
        let Some((payload, _score)) = popped.into_iter().next() else {
            return Ok(None);
        };
        let task: TaskInfo = serde_json::from_str(&payload)?;

        let mut conn = self.conn.manager();
        let _: () = conn
            .sadd(keys::TASK_PROCESSING, &task.task_id)
            .await
            .map_err(SchedulerError::Store)?;
        self.metrics.record_pop();
        Ok(Some(task))
    }

    /// 查看队首任务但不出队
    pub async fn peek_task(&self) -> SchedulerResult<Option<TaskInfo>> {
        let mut conn = self.conn.manager();
        let head: Vec<String> = conn
            .zrange(keys::TASK_QUEUE, 0, 0)
            .await
            .map_err(SchedulerError::Store)?;
        match head.into_iter().next() {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }

    /// 标记任务处理结束，从处理中集合移除
    pub async fn complete_task(&self, task_id: &str) -> SchedulerResult<()> {
        let mut conn = self.conn.manager();
        let _: () = conn
            .srem(keys::TASK_PROCESSING, task_id)
            .await
            .map_err(SchedulerError::Store)?;
        Ok(())
    }

    pub async fn is_processing(&self, task_id: &str) -> SchedulerResult<bool> {
        let mut conn = self.conn.manager();
        conn.sismember(keys::TASK_PROCESSING, task_id)
            .await
            .map_err(SchedulerError::Store)
    }

    pub async fn queue_len(&self) -> SchedulerResult<i64> {
        let mut conn = self.conn.manager();
        conn.zcard(keys::TASK_QUEUE)
            .await
            .map_err(SchedulerError::Store)
    }

    pub async fn processing_count(&self) -> SchedulerResult<i64> {
        let mut conn = self.conn.manager();
        conn.scard(keys::TASK_PROCESSING)
            .await
            .map_err(SchedulerError::Store)
    }

    /// 处理中集合的全部任务ID，恢复扫描以此为准
    pub async fn processing_task_ids(&self) -> SchedulerResult<Vec<String>> {
        let mut conn = self.conn.manager();
        conn.smembers(keys::TASK_PROCESSING)
            .await
            .map_err(SchedulerError::Store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_higher_priority_scores_lower() {
        let t = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        assert!(priority_score(5, t) < priority_score(1, t));
        assert_eq!(priority_score(1, t) - priority_score(2, t), 1000.0);
    }

    #[test]
    fn test_priority_beats_creation_time() {
        let early = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        // 高优先级任务晚15分钟创建仍然先出队
        let late = early + chrono::Duration::minutes(15);
        assert!(priority_score(2, late) < priority_score(1, early));
    }

    #[test]
    fn test_batch_tiebreak_preserves_order() {
        let t = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let a = batch_priority_score(3, t, 0);
        let b = batch_priority_score(3, t, 1);
        let c = batch_priority_score(3, t, 2);
        assert!(a < b && b < c);
        // 批内顺序调整不跨越优先级档位
        assert!(c < priority_score(2, t));
    }

    #[test]
    fn test_metrics_counts() {
        let metrics = QueueMetrics::default();
        metrics.record_push(3);
        metrics.record_pop();
        assert_eq!(metrics.push_count(), 3);
        assert_eq!(metrics.pop_count(), 1);
    }
}
