use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use recon_core::models::{TaskExecutionInfo, TaskStatus};
use recon_core::SchedulerResult;
use recon_storage::{ChunkStore, ExecutionStore, TaskQueue, TaskStatusRecord, WorkerLoadStore};

/// 恢复检查的判定结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryDecision {
    /// 执行正常或尚无回执，不动
    Leave,
    /// 重新入队（携带原因）
    Requeue(String),
    /// 重试预算耗尽，标记失败
    Fail(String),
}

/// 恢复判定
///
/// 纯函数：Worker失联或回执超时才考虑恢复；回执缺失视为任务
/// 刚开始，留给下一轮。重复判定产生相同结果，扫描幂等。
pub fn decide_recovery(
    receipt: Option<&TaskExecutionInfo>,
    worker_online: bool,
    task_timeout: Duration,
    max_retries: u32,
    now: DateTime<Utc>,
) -> RecoveryDecision {
    let Some(receipt) = receipt else {
        return RecoveryDecision::Leave;
    };

    let reason = if !worker_online {
        Some(format!("Worker {} 已离线", receipt.worker_name))
    } else {
        let silent = now - receipt.last_update;
        if silent.to_std().map(|d| d > task_timeout).unwrap_or(false) {
            Some(format!("任务超时（{}秒无进度更新）", silent.num_seconds()))
        } else {
            None
        }
    };

    match reason {
        None => RecoveryDecision::Leave,
        Some(reason) => {
            if receipt.retry_count >= max_retries {
                RecoveryDecision::Fail(format!("重试次数耗尽: {}", reason))
            } else {
                RecoveryDecision::Requeue(reason)
            }
        }
    }
}

/// 任务恢复管理器
///
/// 独立于Worker监视处理中集合，把失联任务重新入队或判定失败。
pub struct TaskRecoveryManager {
    queue: TaskQueue,
    execution_store: ExecutionStore,
    chunk_store: ChunkStore,
    load_store: WorkerLoadStore,
    check_interval: Duration,
    task_timeout: Duration,
    max_retries: u32,
}

impl TaskRecoveryManager {
    pub fn new(
        queue: TaskQueue,
        execution_store: ExecutionStore,
        chunk_store: ChunkStore,
        load_store: WorkerLoadStore,
        check_interval: Duration,
        task_timeout: Duration,
        max_retries: u32,
    ) -> Self {
        Self {
            queue,
            execution_store,
            chunk_store,
            load_store,
            check_interval,
            task_timeout,
            max_retries,
        }
    }

    /// 监控循环，收到关闭信号后退出
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.check_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(
            interval_secs = self.check_interval.as_secs(),
            timeout_secs = self.task_timeout.as_secs(),
            "任务恢复监控启动"
        );
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("任务恢复监控退出");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.scan_once().await {
                        error!(error = %e, "恢复扫描失败");
                    }
                }
            }
        }
    }

    /// 单轮扫描，遍历处理中集合
    pub async fn scan_once(&self) -> SchedulerResult<usize> {
        let task_ids = self.queue.processing_task_ids().await?;
        if task_ids.is_empty() {
            return Ok(0);
        }

        let mut recovered = 0;
        for task_id in task_ids {
            match self.check_task(&task_id).await {
                Ok(true) => recovered += 1,
                Ok(false) => {}
                Err(e) => error!(task_id = %task_id, error = %e, "任务恢复检查失败"),
            }
        }
        Ok(recovered)
    }

    /// 检查单个任务，返回是否执行了恢复动作
    async fn check_task(&self, task_id: &str) -> SchedulerResult<bool> {
        let receipt = self.execution_store.get_receipt(task_id).await?;
        let worker_online = match receipt.as_ref() {
            Some(r) => self.load_store.is_heartbeat_alive(&r.worker_name).await?,
            None => true,
        };

        match decide_recovery(
            receipt.as_ref(),
            worker_online,
            self.task_timeout,
            self.max_retries,
            Utc::now(),
        ) {
            RecoveryDecision::Leave => Ok(false),
            RecoveryDecision::Requeue(reason) => {
                // decide_recovery 已保证此处回执存在
                if let Some(receipt) = receipt {
                    self.requeue_task(task_id, receipt, &reason).await?;
                }
                Ok(true)
            }
            RecoveryDecision::Fail(reason) => {
                self.mark_task_failed(task_id, &reason).await?;
                Ok(true)
            }
        }
    }

    async fn requeue_task(
        &self,
        task_id: &str,
        mut receipt: TaskExecutionInfo,
        reason: &str,
    ) -> SchedulerResult<()> {
        let task = match self.execution_store.get_task_info(task_id).await? {
            Some(t) => Some(t),
            None => self.chunk_store.get_chunk_task(task_id).await?,
        };
        let Some(mut task) = task else {
            warn!(task_id, "原始任务信息已丢失，按失败处理");
            self.mark_task_failed(task_id, "原始任务信息已丢失").await?;
            return Ok(());
        };

        self.queue.complete_task(task_id).await?;

        // 重新入队保留Worker指定（专属队列），否则进公共队列
        self.queue.push_task(&mut task).await?;

        receipt.retry_count += 1;
        receipt.max_retries = self.max_retries;
        receipt.last_update = Utc::now();
        self.execution_store.save_receipt(&receipt).await?;

        info!(
            task_id,
            retry = receipt.retry_count,
            max_retries = self.max_retries,
            reason,
            "任务已恢复入队"
        );
        Ok(())
    }

    async fn mark_task_failed(&self, task_id: &str, reason: &str) -> SchedulerResult<()> {
        self.queue.complete_task(task_id).await?;
        self.execution_store
            .save_task_status(&TaskStatusRecord {
                task_id: task_id.to_string(),
                state: TaskStatus::Failure,
                worker_name: String::new(),
                result: reason.to_string(),
            })
            .await?;
        self.execution_store.remove_receipt(task_id).await?;
        warn!(task_id, reason, "任务已标记失败");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn receipt(retry_count: u32, silent_secs: i64) -> TaskExecutionInfo {
        let mut r = TaskExecutionInfo::started("t1", "w1");
        r.retry_count = retry_count;
        r.last_update = Utc::now() - ChronoDuration::seconds(silent_secs);
        r
    }

    const TIMEOUT: Duration = Duration::from_secs(600);
    const BUDGET: u32 = 3;

    #[test]
    fn test_missing_receipt_is_left_alone() {
        assert_eq!(
            decide_recovery(None, false, TIMEOUT, BUDGET, Utc::now()),
            RecoveryDecision::Leave
        );
    }

    #[test]
    fn test_healthy_task_is_left_alone() {
        let r = receipt(0, 10);
        assert_eq!(
            decide_recovery(Some(&r), true, TIMEOUT, BUDGET, Utc::now()),
            RecoveryDecision::Leave
        );
    }

    #[test]
    fn test_offline_worker_triggers_requeue() {
        let r = receipt(0, 10);
        assert!(matches!(
            decide_recovery(Some(&r), false, TIMEOUT, BUDGET, Utc::now()),
            RecoveryDecision::Requeue(_)
        ));
    }

    #[test]
    fn test_silent_task_triggers_requeue() {
        let r = receipt(1, 700);
        assert!(matches!(
            decide_recovery(Some(&r), true, TIMEOUT, BUDGET, Utc::now()),
            RecoveryDecision::Requeue(_)
        ));
    }

    #[test]
    fn test_exhausted_retries_fail() {
        let r = receipt(3, 700);
        assert!(matches!(
            decide_recovery(Some(&r), true, TIMEOUT, BUDGET, Utc::now()),
            RecoveryDecision::Fail(_)
        ));
        // Worker离线同样受预算约束
        assert!(matches!(
            decide_recovery(Some(&r), false, TIMEOUT, BUDGET, Utc::now()),
            RecoveryDecision::Fail(_)
        ));
        // 预算放宽后同样的回执继续重试
        assert!(matches!(
            decide_recovery(Some(&r), true, TIMEOUT, 5, Utc::now()),
            RecoveryDecision::Requeue(_)
        ));
    }

    #[test]
    fn test_decision_is_idempotent() {
        let r = receipt(2, 700);
        let now = Utc::now();
        let first = decide_recovery(Some(&r), true, TIMEOUT, BUDGET, now);
        let second = decide_recovery(Some(&r), true, TIMEOUT, BUDGET, now);
        assert_eq!(first, second);
    }
}
