pub mod chunk;
pub mod cron;
pub mod execution;
pub mod task;
pub mod worker;

pub use chunk::{ChunkProgress, ChunkState, ChunkStatus, SplitPreview, SplitResult, TaskChunk};
pub use cron::{CronExecutionIntent, CronStatus, CronTask, ScheduleType};
pub use execution::{ControlAction, ControlSignal, ResumeState, TaskExecutionInfo};
pub use task::{TaskInfo, TaskPayload, TaskResult, TaskStatus};
pub use worker::{AvailabilityPolicy, WorkerLoad};
