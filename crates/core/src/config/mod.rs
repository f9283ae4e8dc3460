pub mod app;
pub mod task;

pub use app::{AppConfig, DispatcherConfig, LogConfig, RedisConfig, WorkerConfig};
pub use task::{
    DirScanConfig, DomainScanConfig, FingerprintConfig, PocScanConfig, PortIdentifyConfig,
    PortScanConfig, TaskConfig,
};
