use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("存储错误: {0}")]
    Store(#[from] redis::RedisError),
    #[error("存储操作错误: {0}")]
    StoreOperation(String),
    #[error("扫描错误 [{scanner}] target={target} phase={phase}: {message}")]
    Scan {
        scanner: String,
        target: String,
        phase: String,
        message: String,
    },
    #[error("配置错误: field={field} msg={message}")]
    Configuration { field: String, message: String },
    #[error("网络错误: {0}")]
    Network(String),
    #[error("任务未找到: {id}")]
    TaskNotFound { id: String },
    #[error("分片信息未找到: {task_id}")]
    ChunkInfoNotFound { task_id: String },
    #[error("定时任务未找到: {id}")]
    CronTaskNotFound { id: String },
    #[error("无效的CRON表达式: {expr} - {message}")]
    InvalidCron { expr: String, message: String },
    #[error("重试次数耗尽: {0}")]
    RetryExhausted(String),
    #[error("操作超时: {0}")]
    Timeout(String),
    #[error("序列化错误: {0}")]
    Serialization(String),
    #[error("内部错误: {0}")]
    Internal(String),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;

impl SchedulerError {
    pub fn scan_error<S: Into<String>>(scanner: S, target: S, phase: S, message: S) -> Self {
        Self::Scan {
            scanner: scanner.into(),
            target: target.into(),
            phase: phase.into(),
            message: message.into(),
        }
    }

    pub fn config_error<S: Into<String>>(field: S, message: S) -> Self {
        Self::Configuration {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn store_error<S: Into<String>>(msg: S) -> Self {
        Self::StoreOperation(msg.into())
    }

    /// 可重试性是错误类型的属性，与调用点无关。
    /// 网络/存储/超时类错误可重试，配置错误永不重试。
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SchedulerError::Store(_)
                | SchedulerError::StoreOperation(_)
                | SchedulerError::Network(_)
                | SchedulerError::Timeout(_)
        )
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SchedulerError::Configuration { .. } | SchedulerError::Internal(_)
        )
    }
}

impl From<serde_json::Error> for SchedulerError {
    fn from(err: serde_json::Error) -> Self {
        SchedulerError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for SchedulerError {
    fn from(err: anyhow::Error) -> Self {
        SchedulerError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_and_timeout_errors_are_retryable() {
        assert!(SchedulerError::Network("connection refused".to_string()).is_retryable());
        assert!(SchedulerError::Timeout("pop".to_string()).is_retryable());
        assert!(SchedulerError::StoreOperation("zadd failed".to_string()).is_retryable());
    }

    #[test]
    fn test_config_errors_are_not_retryable() {
        let err = SchedulerError::config_error("portscan.rate", "must be non-negative");
        assert!(!err.is_retryable());
        assert!(err.is_fatal());
    }

    #[test]
    fn test_scan_error_message_carries_context() {
        let err = SchedulerError::scan_error("naabu", "10.0.0.1", "portscan", "exit code 1");
        let msg = err.to_string();
        assert!(msg.contains("naabu"));
        assert!(msg.contains("10.0.0.1"));
        assert!(msg.contains("portscan"));
    }
}
