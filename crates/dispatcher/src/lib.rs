//! 调度侧组件：目标展开与任务拆分、分片管理、负载均衡、
//! 定时任务、失联任务恢复。

pub mod chunk_manager;
pub mod cron_manager;
pub mod load_balancer;
pub mod recovery;
pub mod splitter;

pub use chunk_manager::{ChunkManager, ChunkTaskRequest, ChunkTaskResponse};
pub use cron_manager::CronManager;
pub use load_balancer::{LoadBalancer, WorkerStats};
pub use recovery::{decide_recovery, RecoveryDecision, TaskRecoveryManager};
pub use splitter::{expand_targets, ChunkConfig, ExpandedTargets, TaskSplitter};
