use futures::StreamExt;
use redis::AsyncCommands;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use recon_core::models::{CronExecutionIntent, CronTask};
use recon_core::{SchedulerError, SchedulerResult};

use crate::connection::StoreConnection;
use crate::keys;

/// 定时任务管理命令
///
/// 由外部API经频道下发，CronManager订阅处理。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CronCommand {
    /// 重新加载单个条目（新建或编辑后）
    Reload(String),
    Remove(String),
    RunNow(String),
}

/// 定时任务存储
#[derive(Clone)]
pub struct CronStore {
    conn: StoreConnection,
}

impl CronStore {
    pub fn new(conn: StoreConnection) -> Self {
        Self { conn }
    }

    pub async fn save_task(&self, task: &CronTask) -> SchedulerResult<()> {
        let payload = serde_json::to_string(task)?;
        let mut conn = self.conn.manager();
        let _: () = conn
            .hset(keys::CRON_TASKS, &task.id, payload)
            .await
            .map_err(SchedulerError::Store)?;
        Ok(())
    }

    pub async fn get_task(&self, task_id: &str) -> SchedulerResult<CronTask> {
        let mut conn = self.conn.manager();
        let payload: Option<String> = conn
            .hget(keys::CRON_TASKS, task_id)
            .await
            .map_err(SchedulerError::Store)?;
        match payload {
            Some(p) => Ok(serde_json::from_str(&p)?),
            None => Err(SchedulerError::CronTaskNotFound {
                id: task_id.to_string(),
            }),
        }
    }

    pub async fn list_tasks(&self) -> SchedulerResult<Vec<CronTask>> {
        let mut conn = self.conn.manager();
        let entries: std::collections::HashMap<String, String> = conn
            .hgetall(keys::CRON_TASKS)
            .await
            .map_err(SchedulerError::Store)?;

        let mut tasks = Vec::with_capacity(entries.len());
        for (id, payload) in entries {
            match serde_json::from_str::<CronTask>(&payload) {
                Ok(task) => tasks.push(task),
                Err(e) => warn!(cron_task_id = %id, error = %e, "定时任务记录解析失败"),
            }
        }
        Ok(tasks)
    }

    pub async fn remove_task(&self, task_id: &str) -> SchedulerResult<()> {
        let mut conn = self.conn.manager();
        let mut pipe = redis::pipe();
        pipe.hdel(keys::CRON_TASKS, task_id).ignore();
        pipe.del(keys::cron_run_count(task_id)).ignore();
        let _: () = pipe
            .query_async(&mut conn)
            .await
            .map_err(SchedulerError::Store)?;
        Ok(())
    }

    /// 触发计数加一，返回累计次数
    pub async fn increment_run_count(&self, task_id: &str) -> SchedulerResult<i64> {
        let mut conn = self.conn.manager();
        conn.incr(keys::cron_run_count(task_id), 1)
            .await
            .map_err(SchedulerError::Store)
    }

    pub async fn get_run_count(&self, task_id: &str) -> SchedulerResult<i64> {
        let mut conn = self.conn.manager();
        let count: Option<i64> = conn
            .get(keys::cron_run_count(task_id))
            .await
            .map_err(SchedulerError::Store)?;
        Ok(count.unwrap_or(0))
    }

    /// 发布执行意图，下游任务由订阅方创建
    pub async fn publish_execution(&self, intent: &CronExecutionIntent) -> SchedulerResult<()> {
        let payload = serde_json::to_string(intent)?;
        let mut conn = self.conn.manager();
        let _: () = conn
            .publish(keys::CHANNEL_CRON_EXECUTE, payload)
            .await
            .map_err(SchedulerError::Store)?;
        debug!(cron_task_id = %intent.cron_task_id, "执行意图已发布");
        Ok(())
    }

    /// 订阅执行意图
    pub async fn subscribe_executions(&self) -> SchedulerResult<mpsc::Receiver<CronExecutionIntent>> {
        let mut pubsub = self.conn.pubsub().await?;
        pubsub
            .subscribe(keys::CHANNEL_CRON_EXECUTE)
            .await
            .map_err(SchedulerError::Store)?;

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            let mut stream = pubsub.on_message();
            while let Some(msg) = stream.next().await {
                let payload: String = match msg.get_payload() {
                    Ok(p) => p,
                    Err(e) => {
                        warn!(error = %e, "执行意图读取失败");
                        continue;
                    }
                };
                match serde_json::from_str::<CronExecutionIntent>(&payload) {
                    Ok(intent) => {
                        if tx.send(intent).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "执行意图解析失败"),
                }
            }
        });
        Ok(rx)
    }

    /// 下发管理命令
    pub async fn publish_command(&self, command: &CronCommand) -> SchedulerResult<()> {
        let (channel, task_id) = match command {
            CronCommand::Reload(id) => (keys::CHANNEL_CRON_RELOAD, id),
            CronCommand::Remove(id) => (keys::CHANNEL_CRON_REMOVE, id),
            CronCommand::RunNow(id) => (keys::CHANNEL_CRON_RUNNOW, id),
        };
        let mut conn = self.conn.manager();
        let _: () = conn
            .publish(channel, task_id)
            .await
            .map_err(SchedulerError::Store)?;
        Ok(())
    }

    /// 订阅管理命令
    pub async fn subscribe_commands(&self) -> SchedulerResult<mpsc::Receiver<CronCommand>> {
        let mut pubsub = self.conn.pubsub().await?;
        for channel in [
            keys::CHANNEL_CRON_RELOAD,
            keys::CHANNEL_CRON_REMOVE,
            keys::CHANNEL_CRON_RUNNOW,
        ] {
            pubsub.subscribe(channel).await.map_err(SchedulerError::Store)?;
        }

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            let mut stream = pubsub.on_message();
            while let Some(msg) = stream.next().await {
                let channel = msg.get_channel_name().to_string();
                let task_id: String = match msg.get_payload() {
                    Ok(p) => p,
                    Err(e) => {
                        warn!(error = %e, "定时任务命令读取失败");
                        continue;
                    }
                };
                let command = match channel.as_str() {
                    keys::CHANNEL_CRON_RELOAD => CronCommand::Reload(task_id),
                    keys::CHANNEL_CRON_REMOVE => CronCommand::Remove(task_id),
                    keys::CHANNEL_CRON_RUNNOW => CronCommand::RunNow(task_id),
                    _ => continue,
                };
                if tx.send(command).await.is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }
}
