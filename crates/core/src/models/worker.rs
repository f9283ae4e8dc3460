use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Worker可用性判定与打分策略
#[derive(Debug, Clone)]
pub struct AvailabilityPolicy {
    pub heartbeat_timeout_secs: i64,
    pub cpu_threshold: f64,
    pub mem_threshold: f64,
    pub task_load_weight: f64,
    pub cpu_weight: f64,
    pub mem_weight: f64,
}

impl Default for AvailabilityPolicy {
    fn default() -> Self {
        Self {
            heartbeat_timeout_secs: 30,
            cpu_threshold: 90.0,
            mem_threshold: 90.0,
            task_load_weight: 0.5,
            cpu_weight: 0.3,
            mem_weight: 0.2,
        }
    }
}

/// Worker负载快照
///
/// 由 Worker 自己随心跳上报，其他组件只读。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerLoad {
    pub worker_name: String,
    pub current_tasks: i32,
    pub max_concurrency: i32,
    pub cpu_percent: f64,
    pub mem_percent: f64,
    pub last_heartbeat: DateTime<Utc>,
}

impl WorkerLoad {
    /// 负载分数，越低越好
    pub fn load_score(&self, policy: &AvailabilityPolicy) -> f64 {
        if self.max_concurrency == 0 {
            return 100.0;
        }
        let task_load = self.current_tasks as f64 / self.max_concurrency as f64 * 100.0;
        task_load * policy.task_load_weight
            + self.cpu_percent * policy.cpu_weight
            + self.mem_percent * policy.mem_weight
    }

    /// 心跳新鲜、有空闲槽位且资源未超限才算可用
    pub fn is_available(&self, policy: &AvailabilityPolicy, now: DateTime<Utc>) -> bool {
        if (now - self.last_heartbeat).num_seconds() > policy.heartbeat_timeout_secs {
            return false;
        }
        if self.current_tasks >= self.max_concurrency {
            return false;
        }
        if self.cpu_percent > policy.cpu_threshold || self.mem_percent > policy.mem_threshold {
            return false;
        }
        true
    }
}
