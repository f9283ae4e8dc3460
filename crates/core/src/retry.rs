use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::errors::{SchedulerError, SchedulerResult};

/// 重试策略
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// 第attempt次失败后的退避时长
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt as i32);
        let backoff = self.initial_backoff.mul_f64(factor);
        backoff.min(self.max_backoff)
    }
}

/// 按策略重试异步操作
///
/// 不可重试的错误立即返回；重试耗尽后返回最后一次错误。
/// 收到关闭信号时中断退避等待并返回当前错误。
pub async fn retry_async<F, Fut, T>(
    policy: &RetryPolicy,
    mut shutdown: Option<tokio::sync::broadcast::Receiver<()>>,
    operation_name: &str,
    mut operation: F,
) -> SchedulerResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = SchedulerResult<T>>,
{
    let mut last_err: Option<SchedulerError> = None;

    for attempt in 0..=policy.max_retries {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !err.is_retryable() {
                    return Err(err);
                }
                warn!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    error = %err,
                    "操作失败，准备重试"
                );
                last_err = Some(err);
            }
        }

        if attempt < policy.max_retries {
            let backoff = policy.backoff_for(attempt);
            match shutdown.as_mut() {
                Some(rx) => {
                    tokio::select! {
                        _ = rx.recv() => {
                            return Err(last_err.unwrap_or_else(|| {
                                SchedulerError::Internal("重试期间收到关闭信号".to_string())
                            }));
                        }
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
                None => tokio::time::sleep(backoff).await,
            }
        }
    }

    Err(last_err
        .unwrap_or_else(|| SchedulerError::RetryExhausted(operation_name.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_growth_is_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_for(0), Duration::from_secs(1));
        assert_eq!(policy.backoff_for(1), Duration::from_secs(2));
        assert_eq!(policy.backoff_for(2), Duration::from_secs(4));
        assert_eq!(policy.backoff_for(10), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let calls = AtomicU32::new(0);
        let result = retry_async(&RetryPolicy::default(), None, "op", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(SchedulerError::Network("暂时不可达".to_string()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_not_retried() {
        let calls = AtomicU32::new(0);
        let result: SchedulerResult<()> =
            retry_async(&RetryPolicy::default(), None, "op", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(SchedulerError::Configuration {
                        field: "x".to_string(),
                        message: "bad".to_string(),
                    })
                }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_last_error() {
        let policy = RetryPolicy::with_max_retries(2);
        let calls = AtomicU32::new(0);
        let result: SchedulerResult<()> = retry_async(&policy, None, "op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(SchedulerError::Timeout("超时".to_string())) }
        })
        .await;
        assert!(matches!(result, Err(SchedulerError::Timeout(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
