use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::warn;

use recon_core::models::{AvailabilityPolicy, TaskInfo, WorkerLoad};
use recon_core::SchedulerResult;
use recon_storage::{TaskQueue, WorkerLoadStore};

/// 可用Worker筛选与排序
///
/// 心跳新鲜、有空闲槽位、资源未超限的Worker按负载分数升序排列。
pub fn sort_available_workers(
    loads: Vec<WorkerLoad>,
    policy: &AvailabilityPolicy,
    now: DateTime<Utc>,
) -> Vec<WorkerLoad> {
    let mut available: Vec<WorkerLoad> = loads
        .into_iter()
        .filter(|w| w.is_available(policy, now))
        .collect();
    available.sort_by(|a, b| {
        a.load_score(policy)
            .total_cmp(&b.load_score(policy))
    });
    available
}

/// 把未指定Worker的任务按轮询方式分配到可用Worker
///
/// 按排序后的列表轮转而不是逐任务挑最优，一次调用内均匀摊开负载。
pub fn assign_round_robin(tasks: &mut [TaskInfo], workers: &[WorkerLoad]) {
    if workers.is_empty() {
        return;
    }
    let mut index = 0;
    for task in tasks.iter_mut() {
        if !task.workers.is_empty() {
            continue;
        }
        task.workers = vec![workers[index].worker_name.clone()];
        index = (index + 1) % workers.len();
    }
}

/// Worker集群统计
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerStats {
    pub total_workers: usize,
    pub available_workers: usize,
    pub total_capacity: i32,
    pub used_capacity: i32,
    pub avg_cpu_percent: f64,
    pub avg_mem_percent: f64,
}

/// 集群统计聚合
pub fn aggregate_worker_stats(
    loads: &[WorkerLoad],
    policy: &AvailabilityPolicy,
    now: DateTime<Utc>,
) -> WorkerStats {
    let mut stats = WorkerStats {
        total_workers: loads.len(),
        available_workers: 0,
        total_capacity: 0,
        used_capacity: 0,
        avg_cpu_percent: 0.0,
        avg_mem_percent: 0.0,
    };
    for load in loads {
        if load.is_available(policy, now) {
            stats.available_workers += 1;
        }
        stats.total_capacity += load.max_concurrency;
        stats.used_capacity += load.current_tasks;
        stats.avg_cpu_percent += load.cpu_percent;
        stats.avg_mem_percent += load.mem_percent;
    }
    if !loads.is_empty() {
        stats.avg_cpu_percent /= loads.len() as f64;
        stats.avg_mem_percent /= loads.len() as f64;
    }
    stats
}

struct LoadCache {
    loads: Vec<WorkerLoad>,
    fetched_at: Instant,
}

/// 负载均衡器
///
/// 负载快照经短TTL本地缓存读取，限制对共享存储的读放大。
pub struct LoadBalancer {
    load_store: WorkerLoadStore,
    queue: TaskQueue,
    policy: AvailabilityPolicy,
    cache_ttl: Duration,
    cache: RwLock<Option<LoadCache>>,
}

impl LoadBalancer {
    pub fn new(load_store: WorkerLoadStore, queue: TaskQueue) -> Self {
        Self {
            load_store,
            queue,
            policy: AvailabilityPolicy::default(),
            cache_ttl: Duration::from_secs(5),
            cache: RwLock::new(None),
        }
    }

    pub fn with_policy(mut self, policy: AvailabilityPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// 读取全部Worker负载，优先走缓存
    pub async fn get_worker_loads(&self) -> SchedulerResult<Vec<WorkerLoad>> {
        {
            let cache = self.cache.read().await;
            if let Some(entry) = cache.as_ref() {
                if entry.fetched_at.elapsed() < self.cache_ttl && !entry.loads.is_empty() {
                    return Ok(entry.loads.clone());
                }
            }
        }

        let loads = self.load_store.get_all_loads().await?;
        let mut cache = self.cache.write().await;
        *cache = Some(LoadCache {
            loads: loads.clone(),
            fetched_at: Instant::now(),
        });
        Ok(loads)
    }

    pub async fn get_available_workers(&self) -> SchedulerResult<Vec<WorkerLoad>> {
        let loads = self.get_worker_loads().await?;
        Ok(sort_available_workers(loads, &self.policy, Utc::now()))
    }

    /// 负载最低的可用Worker，没有则None
    pub async fn select_best_worker(&self) -> SchedulerResult<Option<WorkerLoad>> {
        let mut workers = self.get_available_workers().await?;
        Ok(if workers.is_empty() {
            None
        } else {
            Some(workers.remove(0))
        })
    }

    /// 单任务分发，返回选中的Worker名（公共队列时None）
    pub async fn distribute_task(&self, task: &mut TaskInfo) -> SchedulerResult<Option<String>> {
        if !task.workers.is_empty() {
            let pinned = task.workers[0].clone();
            self.queue.push_task(task).await?;
            return Ok(Some(pinned));
        }

        match self.select_best_worker().await? {
            Some(worker) => {
                task.workers = vec![worker.worker_name.clone()];
                self.queue.push_task(task).await?;
                Ok(Some(worker.worker_name))
            }
            None => {
                self.queue.push_task(task).await?;
                Ok(None)
            }
        }
    }

    /// 批量分发
    ///
    /// 无可用Worker时全部落回公共队列而不是阻塞等待。
    pub async fn distribute_task_batch(&self, tasks: &mut [TaskInfo]) -> SchedulerResult<()> {
        if tasks.is_empty() {
            return Ok(());
        }

        match self.get_available_workers().await {
            Ok(workers) if !workers.is_empty() => assign_round_robin(tasks, &workers),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "读取Worker负载失败，任务进入公共队列"),
        }
        self.queue.push_task_batch(tasks).await
    }

    pub async fn remove_worker(&self, worker_name: &str) -> SchedulerResult<()> {
        self.load_store.remove_worker(worker_name).await?;
        let mut cache = self.cache.write().await;
        if let Some(entry) = cache.as_mut() {
            entry.loads.retain(|w| w.worker_name != worker_name);
        }
        Ok(())
    }

    pub async fn get_worker_stats(&self) -> SchedulerResult<WorkerStats> {
        let loads = self.get_worker_loads().await?;
        Ok(aggregate_worker_stats(&loads, &self.policy, Utc::now()))
    }
}
