//! Worker守护进程。
//!
//! 一个拉取循环按自适应间隔从队列取任务，一个心跳循环上报负载，
//! 一个订阅循环接收控制信号推送；任务执行在独立的tokio任务里进行，
//! 槽位由自适应调度器统一记账。后台循环受监督，panic后延迟重启。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sysinfo::System;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, info, warn};

use recon_core::models::{
    ChunkState, ChunkStatus, ControlAction, TaskInfo, TaskPayload, TaskStatus, WorkerLoad,
};
use recon_core::SchedulerResult;
use recon_storage::{
    ChunkStore, ExecutionStore, ResultStore, SignalStore, TaskQueue, TaskStatusRecord,
    WorkerLoadStore,
};

use crate::adaptive::{sample_resources, AdaptiveScheduler};
use crate::contracts::{
    Asset, ControlSignalSource, ScanCancellation, Scanner, StatusReporter, Vulnerability,
};
use crate::runner::{RunOutcome, TaskRunner};

const RESTART_DELAY: Duration = Duration::from_secs(3);

/// 监督一个后台循环
///
/// 循环体在独立tokio任务里运行；正常返回视为收到关闭信号，不再
/// 拉起，panic则延迟后重建。重启等待期间收到关闭信号立即退出。
async fn supervise<F, Fut>(
    name: &'static str,
    mut shutdown: broadcast::Receiver<()>,
    restart_delay: Duration,
    mut factory: F,
) where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    loop {
        match tokio::spawn(factory()).await {
            Ok(()) => return,
            Err(e) => {
                error!(loop_name = name, error = %e, "后台循环异常退出，稍后重启");
            }
        }
        tokio::select! {
            _ = shutdown.recv() => return,
            _ = tokio::time::sleep(restart_delay) => {}
        }
    }
}

/// 存储后端的状态上报实现
///
/// 进度写进执行回执供恢复管理器观测，状态记录与扫描结果
/// 按主任务归档。
pub struct StoreReporter {
    execution_store: ExecutionStore,
    result_store: ResultStore,
    worker_name: String,
}

impl StoreReporter {
    pub fn new(
        execution_store: ExecutionStore,
        result_store: ResultStore,
        worker_name: impl Into<String>,
    ) -> Self {
        Self {
            execution_store,
            result_store,
            worker_name: worker_name.into(),
        }
    }
}

#[async_trait]
impl StatusReporter for StoreReporter {
    async fn save_assets(&self, main_task_id: &str, assets: &[Asset]) -> SchedulerResult<()> {
        self.result_store.append_assets(main_task_id, assets).await
    }

    async fn save_vulnerabilities(
        &self,
        main_task_id: &str,
        vulns: &[Vulnerability],
    ) -> SchedulerResult<()> {
        self.result_store
            .append_vulnerabilities(main_task_id, vulns)
            .await
    }

    async fn update_task_status(
        &self,
        task_id: &str,
        status: TaskStatus,
        progress: i32,
        message: &str,
    ) -> SchedulerResult<()> {
        self.execution_store
            .update_progress(task_id, &self.worker_name, message, progress)
            .await?;
        self.execution_store
            .save_task_status(&TaskStatusRecord {
                task_id: task_id.to_string(),
                state: status,
                worker_name: self.worker_name.clone(),
                result: message.to_string(),
            })
            .await
    }

    async fn increment_phase_completion(
        &self,
        main_task_id: &str,
        phase: &str,
    ) -> SchedulerResult<()> {
        self.result_store
            .increment_phase_completion(main_task_id, phase)
            .await?;
        Ok(())
    }
}

/// 双通道控制信号源
///
/// 订阅循环把推送的信号缓存在内存里，检查时先消费缓存再回落
/// 轮询；推送丢失时轮询兜底，语义不变。
pub struct WatchedSignalSource {
    store: SignalStore,
    pushed: Arc<RwLock<HashMap<String, ControlAction>>>,
}

impl WatchedSignalSource {
    pub fn new(store: SignalStore) -> Self {
        Self {
            store,
            pushed: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// 订阅推送频道，收到关闭信号或频道断开时退出
    pub async fn run_push_listener(&self, mut shutdown: broadcast::Receiver<()>) {
        let mut rx = match self.store.subscribe_signals().await {
            Ok(rx) => rx,
            Err(e) => {
                warn!(error = %e, "控制信号订阅失败，仅依赖轮询");
                return;
            }
        };
        info!("控制信号订阅已建立");
        loop {
            tokio::select! {
                _ = shutdown.recv() => return,
                signal = rx.recv() => {
                    match signal {
                        Some(signal) => {
                            debug!(task_id = %signal.task_id, action = ?signal.action, "收到控制信号推送");
                            self.pushed.write().await.insert(signal.task_id, signal.action);
                        }
                        None => {
                            warn!("控制信号频道已断开，仅依赖轮询");
                            return;
                        }
                    }
                }
            }
        }
    }
}

#[async_trait]
impl ControlSignalSource for WatchedSignalSource {
    async fn check(&self, task_id: &str) -> SchedulerResult<Option<ControlAction>> {
        if let Some(action) = self.pushed.write().await.remove(task_id) {
            return Ok(Some(action));
        }
        self.store.check_signal(task_id).await
    }
}

/// Worker守护进程
pub struct WorkerService {
    worker_name: String,
    queue: TaskQueue,
    execution_store: ExecutionStore,
    chunk_store: ChunkStore,
    load_store: WorkerLoadStore,
    signal_store: SignalStore,
    scheduler: Arc<AdaptiveScheduler>,
    runner: Arc<TaskRunner>,
    signals: Arc<WatchedSignalSource>,
    heartbeat_interval: Duration,
}

impl WorkerService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        worker_name: impl Into<String>,
        queue: TaskQueue,
        execution_store: ExecutionStore,
        result_store: ResultStore,
        chunk_store: ChunkStore,
        load_store: WorkerLoadStore,
        signal_store: SignalStore,
        scanner: Arc<dyn Scanner>,
        scheduler: Arc<AdaptiveScheduler>,
        heartbeat_interval: Duration,
    ) -> Arc<Self> {
        let worker_name = worker_name.into();
        let reporter = Arc::new(StoreReporter::new(
            execution_store.clone(),
            result_store,
            worker_name.clone(),
        ));
        let signals = Arc::new(WatchedSignalSource::new(signal_store.clone()));
        let runner = Arc::new(TaskRunner::new(scanner, reporter, signals.clone()));
        Arc::new(Self {
            worker_name,
            queue,
            execution_store,
            chunk_store,
            load_store,
            signal_store,
            scheduler,
            runner,
            signals,
            heartbeat_interval,
        })
    }

    pub fn worker_name(&self) -> &str {
        &self.worker_name
    }

    /// 启动全部循环并等待退出，每个循环都受panic监督
    pub async fn run(self: Arc<Self>, shutdown: broadcast::Receiver<()>) {
        info!(worker = %self.worker_name, "Worker启动");

        let adaptive = {
            let scheduler = self.scheduler.clone();
            let src = shutdown.resubscribe();
            tokio::spawn(async move {
                let monitor = src.resubscribe();
                supervise("自适应调节", monitor, RESTART_DELAY, move || {
                    let scheduler = scheduler.clone();
                    let rx = src.resubscribe();
                    async move { scheduler.run(rx).await }
                })
                .await;
            })
        };

        let listener = {
            let signals = self.signals.clone();
            let src = shutdown.resubscribe();
            tokio::spawn(async move {
                let monitor = src.resubscribe();
                supervise("控制信号订阅", monitor, RESTART_DELAY, move || {
                    let signals = signals.clone();
                    let rx = src.resubscribe();
                    async move { signals.run_push_listener(rx).await }
                })
                .await;
            })
        };

        let heartbeat = {
            let service = self.clone();
            let src = shutdown.resubscribe();
            tokio::spawn(async move {
                let monitor = src.resubscribe();
                supervise("心跳循环", monitor, RESTART_DELAY, move || {
                    let service = service.clone();
                    let rx = src.resubscribe();
                    async move { service.heartbeat_loop(rx).await }
                })
                .await;
            })
        };

        let pull = {
            let service = self.clone();
            let src = shutdown.resubscribe();
            tokio::spawn(async move {
                let monitor = src.resubscribe();
                supervise("任务拉取循环", monitor, RESTART_DELAY, move || {
                    let service = service.clone();
                    let rx = src.resubscribe();
                    async move { service.pull_loop(rx).await }
                })
                .await;
            })
        };

        let _ = tokio::join!(adaptive, listener, heartbeat, pull);
        info!(worker = %self.worker_name, "Worker已退出");
    }

    /// 任务拉取循环
    ///
    /// 每轮休眠时长由自适应调度器给出；取到任务先占槽位，
    /// 执行放到独立任务里，循环立刻回到休眠。
    async fn pull_loop(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        info!(worker = %self.worker_name, "任务拉取循环启动");
        loop {
            let interval = self.scheduler.pull_interval();
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("任务拉取循环退出");
                    return;
                }
                _ = tokio::time::sleep(interval) => {}
            }

            if !self.scheduler.acquire_slot() {
                continue;
            }
            match self.queue.pop_task_for_worker(&self.worker_name).await {
                Ok(Some(task)) => {
                    info!(task_id = %task.task_id, "取到任务");
                    let service = self.clone();
                    tokio::spawn(async move {
                        service.execute_task(task).await;
                    });
                }
                Ok(None) => self.scheduler.release_slot(),
                Err(e) => {
                    warn!(error = %e, "任务拉取失败");
                    self.scheduler.release_slot();
                }
            }
        }
    }

    /// 心跳循环，上报负载快照并续期心跳键
    async fn heartbeat_loop(&self, mut shutdown: broadcast::Receiver<()>) {
        let mut system = System::new();
        let mut tick = tokio::time::interval(self.heartbeat_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("心跳循环退出");
                    return;
                }
                _ = tick.tick() => {
                    let (cpu, mem) = sample_resources(&mut system);
                    let load = WorkerLoad {
                        worker_name: self.worker_name.clone(),
                        current_tasks: self.scheduler.current_tasks(),
                        max_concurrency: self.scheduler.current_concurrency() as i32,
                        cpu_percent: cpu,
                        mem_percent: mem,
                        last_heartbeat: Utc::now(),
                    };
                    if let Err(e) = self.load_store.report_load(&load).await {
                        warn!(error = %e, "负载上报失败");
                    }
                }
            }
        }
    }

    /// 执行单个任务，无论结果如何都会归还槽位并解除处理中标记
    async fn execute_task(self: Arc<Self>, task: TaskInfo) {
        let start = Utc::now();
        self.run_task(&task, start).await;
        if let Err(e) = self.queue.complete_task(&task.task_id).await {
            warn!(task_id = %task.task_id, error = %e, "处理中标记清除失败");
        }
        self.scheduler.release_slot();
    }

    async fn run_task(&self, task: &TaskInfo, start: chrono::DateTime<Utc>) {
        let payload = match TaskPayload::parse(&task.config) {
            Ok(p) => p,
            Err(e) => {
                error!(task_id = %task.task_id, error = %e, "任务配置非法");
                self.fail_task(task, start, 0, &format!("配置解析失败: {}", e))
                    .await;
                return;
            }
        };
        let target_count = payload
            .target
            .lines()
            .filter(|l| !l.trim().is_empty())
            .count();

        if let Err(e) = self
            .execution_store
            .record_task_start(&task.task_id, &self.worker_name)
            .await
        {
            warn!(task_id = %task.task_id, error = %e, "执行回执写入失败");
        }
        self.save_chunk_status(task, ChunkStatus {
            chunk_id: task.task_id.clone(),
            status: ChunkState::Started,
            start_time: Some(start),
            target_count,
            worker_name: self.worker_name.clone(),
            ..Default::default()
        })
        .await;

        match self.runner.run(task, &payload).await {
            Ok(RunOutcome::Completed {
                asset_count,
                vul_count,
            }) => {
                let end = Utc::now();
                self.save_chunk_status(task, ChunkStatus {
                    chunk_id: task.task_id.clone(),
                    status: ChunkState::Success,
                    start_time: Some(start),
                    end_time: Some(end),
                    duration: (end - start).num_seconds(),
                    target_count,
                    asset_count,
                    vul_count,
                    worker_name: self.worker_name.clone(),
                    ..Default::default()
                })
                .await;
                self.remove_receipt(task).await;
            }
            Ok(RunOutcome::Stopped) => {
                self.clear_signal(task).await;
                let end = Utc::now();
                self.save_chunk_status(task, ChunkStatus {
                    chunk_id: task.task_id.clone(),
                    status: ChunkState::Failure,
                    start_time: Some(start),
                    end_time: Some(end),
                    duration: (end - start).num_seconds(),
                    target_count,
                    error_msg: "任务已停止".to_string(),
                    worker_name: self.worker_name.clone(),
                    ..Default::default()
                })
                .await;
                self.remove_receipt(task).await;
            }
            Ok(RunOutcome::Paused(resume)) => {
                self.clear_signal(task).await;
                // 恢复状态写回任务信息，重新提交时只跑剩余阶段
                let mut resumed = payload.clone();
                resumed.resume_state = Some(resume);
                match resumed.to_json() {
                    Ok(config) => {
                        let mut updated = task.clone();
                        updated.config = config;
                        if let Err(e) = self.execution_store.save_task_info(&updated).await {
                            warn!(task_id = %task.task_id, error = %e, "恢复状态保存失败");
                        }
                    }
                    Err(e) => {
                        warn!(task_id = %task.task_id, error = %e, "恢复状态序列化失败")
                    }
                }
                self.remove_receipt(task).await;
            }
            Err(e) => {
                error!(task_id = %task.task_id, error = %e, "任务执行失败");
                self.fail_task(task, start, target_count, &e.to_string())
                    .await;
            }
        }
    }

    async fn fail_task(
        &self,
        task: &TaskInfo,
        start: chrono::DateTime<Utc>,
        target_count: usize,
        message: &str,
    ) {
        let end = Utc::now();
        self.save_chunk_status(task, ChunkStatus {
            chunk_id: task.task_id.clone(),
            status: ChunkState::Failure,
            start_time: Some(start),
            end_time: Some(end),
            duration: (end - start).num_seconds(),
            target_count,
            error_msg: message.to_string(),
            worker_name: self.worker_name.clone(),
            ..Default::default()
        })
        .await;
        if let Err(e) = self
            .execution_store
            .save_task_status(&TaskStatusRecord {
                task_id: task.task_id.clone(),
                state: TaskStatus::Failure,
                worker_name: self.worker_name.clone(),
                result: message.to_string(),
            })
            .await
        {
            warn!(task_id = %task.task_id, error = %e, "失败状态写入失败");
        }
        self.remove_receipt(task).await;
    }

    async fn save_chunk_status(&self, task: &TaskInfo, status: ChunkStatus) {
        if let Err(e) = self.chunk_store.save_chunk_status(&status).await {
            warn!(task_id = %task.task_id, error = %e, "分片状态写入失败");
        }
    }

    async fn remove_receipt(&self, task: &TaskInfo) {
        if let Err(e) = self.execution_store.remove_receipt(&task.task_id).await {
            warn!(task_id = %task.task_id, error = %e, "执行回执清除失败");
        }
    }

    async fn clear_signal(&self, task: &TaskInfo) {
        if let Err(e) = self.signal_store.clear_signal(&task.task_id).await {
            warn!(task_id = %task.task_id, error = %e, "控制信号清除失败");
        }
    }
}

/// 没有外部扫描器时的占位实现，原样返回目标作为存活资产
///
/// 集成真实扫描器时替换为对应的进程封装。
pub struct EchoScanner;

#[async_trait]
impl Scanner for EchoScanner {
    async fn scan(
        &self,
        config: crate::contracts::ScanConfig,
        _cancel: ScanCancellation,
    ) -> SchedulerResult<crate::contracts::ScanOutput> {
        let assets = config
            .target
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(|host| Asset {
                host: host.to_string(),
                ..Default::default()
            })
            .collect();
        Ok(crate::contracts::ScanOutput {
            assets,
            vulnerabilities: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_supervise_restarts_after_panic() {
        let (_tx, rx) = broadcast::channel::<()>(1);
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        supervise("测试循环", rx, Duration::from_millis(10), move || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    panic!("第一轮故意崩溃");
                }
            }
        })
        .await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_supervise_stops_on_normal_exit() {
        let (_tx, rx) = broadcast::channel::<()>(1);
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        supervise("测试循环", rx, Duration::from_millis(10), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        })
        .await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_supervise_shutdown_cancels_restart() {
        let (tx, rx) = broadcast::channel::<()>(1);
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let _ = tx.send(());
        // 首轮panic后，重启等待期间已有关闭信号，不再拉起
        supervise("测试循环", rx, Duration::from_secs(30), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                panic!("故意崩溃");
            }
        })
        .await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }
}
