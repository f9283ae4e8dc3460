//! Redis共享协调存储
//!
//! 调度器与Worker之间的全部协调都走这里的实体：优先级队列、
//! 处理中集合、分片记录、负载哈希、执行回执、控制信号、定时任务。

pub mod chunk_store;
pub mod connection;
pub mod cron_store;
pub mod execution_store;
pub mod keys;
pub mod queue;
pub mod result_store;
pub mod signal_store;
pub mod worker_load_store;

pub use chunk_store::ChunkStore;
pub use connection::StoreConnection;
pub use cron_store::{CronCommand, CronStore};
pub use execution_store::{ExecutionStore, TaskStatusRecord};
pub use queue::{batch_priority_score, priority_score, QueueMetrics, TaskQueue};
pub use result_store::ResultStore;
pub use signal_store::SignalStore;
pub use worker_load_store::WorkerLoadStore;
