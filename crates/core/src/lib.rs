//! 侦察调度系统的共享基础：数据模型、错误类型、配置与重试。

pub mod config;
pub mod errors;
pub mod models;
pub mod retry;

pub use errors::{SchedulerError, SchedulerResult};
