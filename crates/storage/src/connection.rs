use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::Client;
use tracing::{debug, error};

use recon_core::{SchedulerError, SchedulerResult};

/// 共享存储连接
///
/// 封装redis的自动重连连接管理器，克隆开销很小，各组件各持一份。
#[derive(Clone)]
pub struct StoreConnection {
    client: Client,
    manager: ConnectionManager,
}

impl StoreConnection {
    pub async fn connect(url: &str, timeout: Duration) -> SchedulerResult<Self> {
        let client = Client::open(url).map_err(SchedulerError::Store)?;
        let manager = tokio::time::timeout(timeout, ConnectionManager::new(client.clone()))
            .await
            .map_err(|_| SchedulerError::Timeout(format!("连接存储超时: {}", url)))?
            .map_err(SchedulerError::Store)?;

        let conn = Self { client, manager };
        conn.ping().await?;
        debug!(url, "共享存储连接成功");
        Ok(conn)
    }

    pub fn manager(&self) -> ConnectionManager {
        self.manager.clone()
    }

    /// 订阅用的独立连接；连接管理器不支持订阅模式
    pub async fn pubsub(&self) -> SchedulerResult<redis::aio::PubSub> {
        self.client
            .get_async_pubsub()
            .await
            .map_err(SchedulerError::Store)
    }

    pub async fn ping(&self) -> SchedulerResult<()> {
        let mut conn = self.manager();
        let response: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(SchedulerError::Store)?;
        if response != "PONG" {
            error!(response, "PING返回异常");
            return Err(SchedulerError::store_error(format!(
                "PING返回异常: {}",
                response
            )));
        }
        Ok(())
    }
}
