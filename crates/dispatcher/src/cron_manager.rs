use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use cron::Schedule;
use tokio::sync::{broadcast, oneshot, RwLock};
use tracing::{error, info, warn};

use recon_core::models::{CronExecutionIntent, CronStatus, CronTask, ScheduleType};
use recon_core::{SchedulerError, SchedulerResult};
use recon_storage::{CronCommand, CronStore};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// 校验cron表达式（六段式，含秒）
pub fn validate_cron_spec(spec: &str) -> SchedulerResult<Schedule> {
    Schedule::from_str(spec).map_err(|e| SchedulerError::InvalidCron {
        expr: spec.to_string(),
        message: e.to_string(),
    })
}

/// 下一次触发时间
pub fn next_run_after(spec: &str, after: DateTime<Local>) -> SchedulerResult<DateTime<Local>> {
    let schedule = validate_cron_spec(spec)?;
    schedule
        .after(&after)
        .next()
        .ok_or_else(|| SchedulerError::InvalidCron {
            expr: spec.to_string(),
            message: "表达式没有未来的触发时间".to_string(),
        })
}

/// 解析一次性任务的执行时间
pub fn parse_schedule_time(value: &str) -> SchedulerResult<DateTime<Local>> {
    let naive = NaiveDateTime::parse_from_str(value, TIME_FORMAT).map_err(|e| {
        SchedulerError::config_error("scheduleTime", &format!("时间格式错误: {}", e))
    })?;
    Local
        .from_local_datetime(&naive)
        .single()
        .ok_or_else(|| SchedulerError::config_error("scheduleTime", "时间无法映射到本地时区"))
}

struct ActiveEntry {
    task: CronTask,
    // 持有发送端，条目被移除（发送端析构）时触发循环退出
    _stop: Option<oneshot::Sender<()>>,
}

/// 定时任务管理器
///
/// 把存储里启用的条目物化为活动触发器。触发只发布执行意图，
/// 下游任务由订阅方创建。管理命令经频道下发并即时生效。
pub struct CronManager {
    store: CronStore,
    entries: RwLock<HashMap<String, ActiveEntry>>,
}

impl CronManager {
    pub fn new(store: CronStore) -> Arc<Self> {
        Arc::new(Self {
            store,
            entries: RwLock::new(HashMap::new()),
        })
    }

    /// 从存储加载全部条目，启用的立即物化
    pub async fn load_tasks(self: &Arc<Self>) -> SchedulerResult<()> {
        let tasks = self.store.list_tasks().await?;
        let count = tasks.len();
        for task in tasks {
            let stop = if task.is_enabled() {
                self.start_entry(&task)
            } else {
                None
            };
            self.entries.write().await.insert(
                task.id.clone(),
                ActiveEntry { task, _stop: stop },
            );
        }
        info!(count, "定时任务加载完成");
        Ok(())
    }

    /// 新增条目并立即启用
    pub async fn add_task(self: &Arc<Self>, mut task: CronTask) -> SchedulerResult<()> {
        if task.schedule_type == ScheduleType::Cron {
            let next = next_run_after(&task.cron_spec, Local::now())?;
            task.next_run_time = next.format(TIME_FORMAT).to_string();
        } else {
            parse_schedule_time(&task.schedule_time)?;
            task.next_run_time = task.schedule_time.clone();
        }
        task.status = CronStatus::Enable;

        self.store.save_task(&task).await?;
        let stop = self.start_entry(&task);
        self.entries
            .write()
            .await
            .insert(task.id.clone(), ActiveEntry { task, _stop: stop });
        Ok(())
    }

    pub async fn remove_task(self: &Arc<Self>, task_id: &str) -> SchedulerResult<()> {
        let removed = self.entries.write().await.remove(task_id);
        if removed.is_none() {
            return Err(SchedulerError::CronTaskNotFound {
                id: task_id.to_string(),
            });
        }
        self.store.remove_task(task_id).await
    }

    pub async fn enable_task(self: &Arc<Self>, task_id: &str) -> SchedulerResult<()> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(task_id)
            .ok_or_else(|| SchedulerError::CronTaskNotFound {
                id: task_id.to_string(),
            })?;
        if entry.task.is_enabled() {
            return Ok(());
        }
        entry.task.status = CronStatus::Enable;
        entry._stop = self.start_entry(&entry.task);
        self.store.save_task(&entry.task).await
    }

    pub async fn disable_task(self: &Arc<Self>, task_id: &str) -> SchedulerResult<()> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(task_id)
            .ok_or_else(|| SchedulerError::CronTaskNotFound {
                id: task_id.to_string(),
            })?;
        if !entry.task.is_enabled() {
            return Ok(());
        }
        entry.task.status = CronStatus::Disable;
        entry._stop = None;
        self.store.save_task(&entry.task).await
    }

    pub async fn list_tasks(&self) -> Vec<CronTask> {
        self.entries
            .read()
            .await
            .values()
            .map(|e| e.task.clone())
            .collect()
    }

    /// 从存储重读单个条目并重建触发器
    pub async fn reload_task(self: &Arc<Self>, task_id: &str) -> SchedulerResult<()> {
        self.entries.write().await.remove(task_id);
        let task = match self.store.get_task(task_id).await {
            Ok(t) => t,
            Err(SchedulerError::CronTaskNotFound { .. }) => return Ok(()),
            Err(e) => return Err(e),
        };
        let stop = if task.is_enabled() {
            self.start_entry(&task)
        } else {
            None
        };
        self.entries
            .write()
            .await
            .insert(task.id.clone(), ActiveEntry { task, _stop: stop });
        Ok(())
    }

    /// 绕过排程立即触发一次
    pub async fn run_task_now(self: &Arc<Self>, task_id: &str) -> SchedulerResult<()> {
        let task = match self.entries.read().await.get(task_id) {
            Some(entry) => entry.task.clone(),
            None => self.store.get_task(task_id).await?,
        };
        self.execute(task).await;
        Ok(())
    }

    /// 物化触发器
    ///
    /// 一次性任务的执行时间已过时不启动（条目保持原状，由编辑重新激活）。
    fn start_entry(self: &Arc<Self>, task: &CronTask) -> Option<oneshot::Sender<()>> {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let manager = Arc::clone(self);
        let task = task.clone();

        match task.schedule_type {
            ScheduleType::Once => {
                let fire_at = match parse_schedule_time(&task.schedule_time) {
                    Ok(t) => t,
                    Err(e) => {
                        warn!(cron_task_id = %task.id, error = %e, "一次性任务时间无效");
                        return None;
                    }
                };
                let delay = (fire_at - Local::now()).to_std().ok()?;
                tokio::spawn(async move {
                    tokio::select! {
                        _ = &mut stop_rx => {}
                        _ = tokio::time::sleep(delay) => {
                            manager.execute_if_enabled(&task.id).await;
                        }
                    }
                });
            }
            ScheduleType::Cron => {
                let schedule = match validate_cron_spec(&task.cron_spec) {
                    Ok(s) => s,
                    Err(e) => {
                        warn!(cron_task_id = %task.id, error = %e, "cron表达式无效");
                        return None;
                    }
                };
                tokio::spawn(async move {
                    loop {
                        let Some(next) = schedule.after(&Local::now()).next() else {
                            break;
                        };
                        let Ok(delay) = (next - Local::now()).to_std() else {
                            continue;
                        };
                        tokio::select! {
                            _ = &mut stop_rx => break,
                            _ = tokio::time::sleep(delay) => {
                                manager.execute_if_enabled(&task.id).await;
                            }
                        }
                    }
                });
            }
        }
        Some(stop_tx)
    }

    async fn execute_if_enabled(self: &Arc<Self>, task_id: &str) {
        let task = {
            let entries = self.entries.read().await;
            match entries.get(task_id) {
                Some(entry) if entry.task.is_enabled() => entry.task.clone(),
                _ => return,
            }
        };
        self.execute(task).await;
    }

    /// 触发一次：刷新运行时间、计数、发布执行意图
    async fn execute(self: &Arc<Self>, mut task: CronTask) {
        task.last_run_time = Local::now().format(TIME_FORMAT).to_string();
        match task.schedule_type {
            ScheduleType::Cron => {
                if let Ok(next) = next_run_after(&task.cron_spec, Local::now()) {
                    task.next_run_time = next.format(TIME_FORMAT).to_string();
                }
            }
            ScheduleType::Once => {
                // 一次性任务执行后自动禁用
                task.status = CronStatus::Disable;
                task.next_run_time = String::new();
            }
        }

        if let Err(e) = self.store.increment_run_count(&task.id).await {
            warn!(cron_task_id = %task.id, error = %e, "更新触发计数失败");
        }
        if let Err(e) = self.store.save_task(&task).await {
            error!(cron_task_id = %task.id, error = %e, "保存定时任务状态失败");
        }

        let intent = CronExecutionIntent {
            cron_task_id: task.id.clone(),
            workspace_id: task.workspace_id.clone(),
            main_task_id: task.main_task_id.clone(),
            task_name: task.name.clone(),
            target: task.target.clone(),
            config: task.config.clone(),
        };
        if let Err(e) = self.store.publish_execution(&intent).await {
            error!(cron_task_id = %task.id, error = %e, "发布执行意图失败");
        } else {
            info!(cron_task_id = %task.id, name = %task.name, "定时任务已触发");
        }

        if let Some(entry) = self.entries.write().await.get_mut(&task.id) {
            if task.status == CronStatus::Disable {
                entry._stop = None;
            }
            entry.task = task;
        }
    }

    /// 订阅管理命令直到收到关闭信号
    pub async fn run_command_subscriber(
        self: Arc<Self>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> SchedulerResult<()> {
        let mut commands = self.store.subscribe_commands().await?;
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("定时任务命令订阅退出");
                    return Ok(());
                }
                command = commands.recv() => {
                    let Some(command) = command else {
                        warn!("定时任务命令频道已关闭");
                        return Ok(());
                    };
                    let result = match &command {
                        CronCommand::Reload(id) => self.reload_task(id).await,
                        CronCommand::Remove(id) => match self.remove_task(id).await {
                            Err(SchedulerError::CronTaskNotFound { .. }) => Ok(()),
                            other => other,
                        },
                        CronCommand::RunNow(id) => self.run_task_now(id).await,
                    };
                    if let Err(e) = result {
                        error!(?command, error = %e, "定时任务命令处理失败");
                    }
                }
            }
        }
    }
}
