use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use uuid::Uuid;

use recon_core::config::{AppConfig, TaskConfig};
use recon_core::retry::{retry_async, RetryPolicy};
use recon_dispatcher::{
    ChunkConfig, ChunkManager, ChunkTaskRequest, CronManager, LoadBalancer, TaskRecoveryManager,
};
use recon_storage::{
    ChunkStore, CronStore, ExecutionStore, ResultStore, SignalStore, StoreConnection, TaskQueue,
    WorkerLoadStore,
};
use recon_worker::{AdaptiveConfig, AdaptiveScheduler, EchoScanner, WorkerService};

/// 应用运行模式
#[derive(Debug, Clone, Copy)]
pub enum AppMode {
    Dispatcher,
    Worker,
    All,
}

/// 主应用程序
///
/// 持有共享存储连接与配置，按模式组装调度侧和Worker侧组件。
pub struct Application {
    config: AppConfig,
    mode: AppMode,
    conn: StoreConnection,
}

impl Application {
    pub async fn new(config: AppConfig, mode: AppMode) -> Result<Self> {
        info!(mode = ?mode, "初始化应用");
        let timeout = Duration::from_secs(config.redis.connection_timeout_seconds);
        let url = config.redis.url.clone();
        let conn = retry_async(&RetryPolicy::default(), None, "连接共享存储", || {
            StoreConnection::connect(&url, timeout)
        })
        .await
        .context("连接共享存储失败")?;

        Ok(Self { config, mode, conn })
    }

    pub async fn run(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        match self.mode {
            AppMode::Dispatcher => self.run_dispatcher(shutdown_rx).await,
            AppMode::Worker => self.run_worker(shutdown_rx).await,
            AppMode::All => self.run_all(shutdown_rx).await,
        }
    }

    /// 调度侧：恢复监控、定时任务管理、执行意图消费
    async fn run_dispatcher(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        info!("启动Dispatcher服务");
        let cfg = &self.config.dispatcher;

        let recovery = TaskRecoveryManager::new(
            TaskQueue::new(self.conn.clone()),
            ExecutionStore::new(self.conn.clone()),
            ChunkStore::new(self.conn.clone()),
            WorkerLoadStore::new(self.conn.clone()),
            Duration::from_secs(cfg.recovery_scan_interval_seconds),
            Duration::from_secs(cfg.task_timeout_seconds),
            cfg.max_retries,
        );
        let recovery_handle = {
            let rx = shutdown_rx.resubscribe();
            tokio::spawn(async move { recovery.run(rx).await })
        };

        let cron_manager = CronManager::new(CronStore::new(self.conn.clone()));
        cron_manager
            .load_tasks()
            .await
            .context("加载定时任务失败")?;
        let cron_handle = {
            let manager = cron_manager.clone();
            let rx = shutdown_rx.resubscribe();
            tokio::spawn(async move {
                if let Err(e) = manager.run_command_subscriber(rx).await {
                    error!(error = %e, "定时任务命令订阅异常退出");
                }
            })
        };

        let intent_handle = {
            let chunk_manager = self.build_chunk_manager();
            let cron_store = CronStore::new(self.conn.clone());
            let rx = shutdown_rx.resubscribe();
            tokio::spawn(async move {
                run_intent_consumer(chunk_manager, cron_store, rx).await;
            })
        };

        let _ = shutdown_rx.recv().await;
        info!("Dispatcher收到关闭信号");
        let _ = tokio::join!(recovery_handle, cron_handle, intent_handle);
        info!("Dispatcher服务已停止");
        Ok(())
    }

    /// Worker侧：自适应拉取执行、心跳、控制信号
    async fn run_worker(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let cfg = &self.config.worker;
        let worker_name = self.config.resolve_worker_name();
        info!(worker = %worker_name, "启动Worker服务");

        let mut adaptive = AdaptiveConfig::with_base_concurrency(cfg.base_concurrency);
        adaptive.min_pull_interval = Duration::from_millis(cfg.min_pull_interval_ms);
        adaptive.max_pull_interval = Duration::from_millis(cfg.max_pull_interval_ms);
        let scheduler = Arc::new(AdaptiveScheduler::new(adaptive));

        let service = WorkerService::new(
            worker_name,
            TaskQueue::new(self.conn.clone()),
            ExecutionStore::new(self.conn.clone()),
            ResultStore::new(self.conn.clone()),
            ChunkStore::new(self.conn.clone()),
            WorkerLoadStore::new(self.conn.clone()),
            SignalStore::new(self.conn.clone()),
            Arc::new(EchoScanner),
            scheduler,
            Duration::from_secs(cfg.heartbeat_interval_seconds),
        );
        service.run(shutdown_rx).await;
        info!("Worker服务已停止");
        Ok(())
    }

    async fn run_all(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        info!("启动全部组件");
        let dispatcher_rx = shutdown_rx.resubscribe();
        let worker_rx = shutdown_rx.resubscribe();
        let (dispatcher_result, worker_result) = tokio::join!(
            self.run_dispatcher(dispatcher_rx),
            self.run_worker(worker_rx),
        );
        dispatcher_result?;
        worker_result?;
        Ok(())
    }

    fn build_chunk_manager(&self) -> ChunkManager {
        let cfg = &self.config.dispatcher;
        let balancer = LoadBalancer::new(
            WorkerLoadStore::new(self.conn.clone()),
            TaskQueue::new(self.conn.clone()),
        )
        .with_cache_ttl(Duration::from_secs(cfg.worker_cache_ttl_seconds));
        ChunkManager::new(
            ChunkConfig {
                max_targets_per_chunk: cfg.max_targets_per_chunk,
                enable_chunking: true,
                min_chunk_size: cfg.min_targets_for_split,
                max_chunk_size: cfg.max_targets_per_chunk,
                max_expanded_targets: cfg.max_expanded_targets,
            },
            ChunkStore::new(self.conn.clone()),
            balancer,
        )
    }
}

/// 消费定时任务的执行意图，拆分后入队
async fn run_intent_consumer(
    chunk_manager: ChunkManager,
    cron_store: CronStore,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut intents = match cron_store.subscribe_executions().await {
        Ok(rx) => rx,
        Err(e) => {
            error!(error = %e, "执行意图订阅失败");
            return;
        }
    };
    info!("执行意图消费循环启动");
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                info!("执行意图消费循环退出");
                return;
            }
            intent = intents.recv() => {
                let Some(intent) = intent else {
                    warn!("执行意图频道已关闭");
                    return;
                };
                let config = match TaskConfig::parse(&intent.config) {
                    Ok(c) => c,
                    Err(e) => {
                        error!(cron_task_id = %intent.cron_task_id, error = %e, "执行意图配置非法");
                        continue;
                    }
                };
                let request = ChunkTaskRequest {
                    task_id: Uuid::new_v4().to_string(),
                    task_name: intent.task_name.clone(),
                    target: intent.target.clone(),
                    config,
                    workspace_id: intent.workspace_id.clone(),
                    main_task_id: intent.main_task_id.clone(),
                    priority: 0,
                    workers: Vec::new(),
                };
                match chunk_manager.push_chunked_tasks(&request).await {
                    Ok(response) => info!(
                        cron_task_id = %intent.cron_task_id,
                        chunks = response.chunk_count,
                        targets = response.total_targets,
                        "定时任务已入队"
                    ),
                    Err(e) => error!(
                        cron_task_id = %intent.cron_task_id,
                        error = %e,
                        "定时任务入队失败"
                    ),
                }
            }
        }
    }
}
