use futures::StreamExt;
use redis::AsyncCommands;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use recon_core::models::{ControlAction, ControlSignal};
use recon_core::{SchedulerError, SchedulerResult};

use crate::connection::StoreConnection;
use crate::keys;

/// 控制信号TTL，足够覆盖轮询间隔又不会永久残留
const SIGNAL_TTL_SECS: u64 = 300;

/// 任务控制信号存储
///
/// 信号同时走两条路径：带TTL的键供轮询（权威来源），
/// 广播频道供实时推送（尽力而为）。
#[derive(Clone)]
pub struct SignalStore {
    conn: StoreConnection,
}

impl SignalStore {
    pub fn new(conn: StoreConnection) -> Self {
        Self { conn }
    }

    /// 发布控制信号
    pub async fn send_signal(&self, task_id: &str, action: ControlAction) -> SchedulerResult<()> {
        let signal = ControlSignal::new(task_id, action);
        let payload = serde_json::to_string(&signal)?;

        let mut conn = self.conn.manager();
        let mut pipe = redis::pipe();
        pipe.set_ex(keys::task_cancel(task_id), &payload, SIGNAL_TTL_SECS)
            .ignore();
        pipe.publish(keys::CHANNEL_TASK_CANCEL, &payload).ignore();
        let _: () = pipe
            .query_async(&mut conn)
            .await
            .map_err(SchedulerError::Store)?;
        debug!(task_id, ?action, "控制信号已发布");
        Ok(())
    }

    /// 轮询读取控制信号
    pub async fn check_signal(&self, task_id: &str) -> SchedulerResult<Option<ControlAction>> {
        let mut conn = self.conn.manager();
        let payload: Option<String> = conn
            .get(keys::task_cancel(task_id))
            .await
            .map_err(SchedulerError::Store)?;
        match payload {
            Some(p) => {
                let signal: ControlSignal = serde_json::from_str(&p)?;
                Ok(Some(signal.action))
            }
            None => Ok(None),
        }
    }

    /// 消费信号后清除，避免重复触发
    pub async fn clear_signal(&self, task_id: &str) -> SchedulerResult<()> {
        let mut conn = self.conn.manager();
        let _: () = conn
            .del(keys::task_cancel(task_id))
            .await
            .map_err(SchedulerError::Store)?;
        Ok(())
    }

    /// 订阅控制信号推送
    ///
    /// 返回接收端；订阅任务在发送端关闭或连接中断时退出。
    /// 推送只是加速通道，丢失消息由轮询兜底。
    pub async fn subscribe_signals(&self) -> SchedulerResult<mpsc::Receiver<ControlSignal>> {
        let mut pubsub = self.conn.pubsub().await?;
        pubsub
            .subscribe(keys::CHANNEL_TASK_CANCEL)
            .await
            .map_err(SchedulerError::Store)?;

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            let mut stream = pubsub.on_message();
            while let Some(msg) = stream.next().await {
                let payload: String = match msg.get_payload() {
                    Ok(p) => p,
                    Err(e) => {
                        warn!(error = %e, "控制信号读取失败");
                        continue;
                    }
                };
                match serde_json::from_str::<ControlSignal>(&payload) {
                    Ok(signal) => {
                        if tx.send(signal).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "控制信号解析失败"),
                }
            }
        });
        Ok(rx)
    }
}
