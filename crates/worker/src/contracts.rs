//! Worker对外部能力的依赖契约。
//!
//! 扫描能力、持久化/状态上报、控制信号三个协作方都以trait出现，
//! 执行逻辑只面向契约编程，测试用mock替身。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use recon_core::config::TaskConfig;
use recon_core::models::{ControlAction, TaskStatus};
use recon_core::SchedulerResult;

/// 扫描取消信号的接收端
///
/// 运行侧在阶段执行期间轮询控制信号，命中后经配对的触发端取消；
/// 感知取消的实现尽快收尾返回，不感知的在阶段边界兜底终止。
#[derive(Debug, Clone)]
pub struct ScanCancellation {
    rx: watch::Receiver<bool>,
}

impl ScanCancellation {
    /// 永不触发的句柄，供独立调用和测试使用
    pub fn never() -> Self {
        let (_, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// 等待取消发生；触发端已析构且未取消时永远挂起
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if *rx.borrow() {
            return;
        }
        while rx.changed().await.is_ok() {
            if *rx.borrow() {
                return;
            }
        }
        std::future::pending::<()>().await;
    }
}

/// 扫描取消信号的触发端
#[derive(Debug)]
pub struct ScanCanceller {
    tx: watch::Sender<bool>,
}

impl ScanCanceller {
    pub fn new() -> (Self, ScanCancellation) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, ScanCancellation { rx })
    }

    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// 扫描发现的资产
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    pub host: String,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub title: String,
    /// 指纹识别出的应用名列表
    #[serde(default)]
    pub apps: Vec<String>,
    #[serde(default)]
    pub url: String,
}

/// 扫描发现的漏洞
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Vulnerability {
    pub target: String,
    pub name: String,
    #[serde(default)]
    pub severity: String,
    #[serde(default)]
    pub template_id: String,
    #[serde(default)]
    pub detail: String,
}

/// 单个阶段的扫描输入
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// 扫描器名称（naabu、nmap、subfinder等）
    pub scanner: String,
    pub phase: String,
    /// 按行分隔的目标
    pub target: String,
    /// 此前阶段累积的资产，供依赖上游结果的阶段使用
    pub prior_assets: Vec<Asset>,
    pub task_config: TaskConfig,
}

/// 扫描输出
#[derive(Debug, Clone, Default)]
pub struct ScanOutput {
    pub assets: Vec<Asset>,
    pub vulnerabilities: Vec<Vulnerability>,
}

/// 扫描能力
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Scanner: Send + Sync {
    async fn scan(
        &self,
        config: ScanConfig,
        cancel: ScanCancellation,
    ) -> SchedulerResult<ScanOutput>;
}

/// 阶段专用执行器
///
/// 注册到执行器表的阶段走专用实现，未注册的阶段回落为
/// 按名称转发给扫描器。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PhaseExecutor: Send + Sync {
    async fn execute(
        &self,
        config: ScanConfig,
        cancel: ScanCancellation,
    ) -> SchedulerResult<ScanOutput>;
}

/// 持久化与状态上报
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StatusReporter: Send + Sync {
    /// 批量保存资产
    async fn save_assets(&self, main_task_id: &str, assets: &[Asset]) -> SchedulerResult<()>;
    /// 批量保存漏洞
    async fn save_vulnerabilities(
        &self,
        main_task_id: &str,
        vulns: &[Vulnerability],
    ) -> SchedulerResult<()>;
    /// 更新任务状态与进度
    async fn update_task_status(
        &self,
        task_id: &str,
        status: TaskStatus,
        progress: i32,
        message: &str,
    ) -> SchedulerResult<()>;
    /// 子阶段完成计数加一
    async fn increment_phase_completion(&self, main_task_id: &str, phase: &str)
        -> SchedulerResult<()>;
}

/// 控制信号来源
///
/// 推送是加速通道，轮询是权威来源；实现方需保证两者语义一致。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ControlSignalSource: Send + Sync {
    async fn check(&self, task_id: &str) -> SchedulerResult<Option<ControlAction>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancellation_fires_once_triggered() {
        let (canceller, cancel) = ScanCanceller::new();
        assert!(!cancel.is_cancelled());
        canceller.cancel();
        assert!(cancel.is_cancelled());
        // 已触发的句柄立即返回
        cancel.cancelled().await;
    }

    #[test]
    fn test_never_handle_stays_uncancelled() {
        let cancel = ScanCancellation::never();
        assert!(!cancel.is_cancelled());
        assert!(!cancel.clone().is_cancelled());
    }
}
