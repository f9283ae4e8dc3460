//! Worker侧组件：自适应调度、多阶段任务执行、负载上报。

pub mod adaptive;
pub mod contracts;
pub mod runner;
pub mod service;

pub use adaptive::{AdaptiveConfig, AdaptiveScheduler, AdaptiveStats, ScheduleMode};
pub use contracts::{
    Asset, ControlSignalSource, PhaseExecutor, ScanCancellation, ScanCanceller, ScanConfig,
    ScanOutput, Scanner, StatusReporter, Vulnerability,
};
pub use runner::{RunOutcome, TaskRunner, PHASE_ORDER};
pub use service::{EchoScanner, StoreReporter, WatchedSignalSource, WorkerService};
