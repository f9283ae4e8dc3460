//! 共享存储中所有键与频道的统一构造。
//!
//! 键名规则只允许在这里出现，其他模块一律通过函数获取。

pub const TASK_QUEUE: &str = "recon:task:queue";
pub const TASK_PROCESSING: &str = "recon:task:processing";
pub const WORKER_LOAD: &str = "recon:worker:load";
pub const TASK_EXECUTION: &str = "recon:task:execution";
pub const CRON_TASKS: &str = "recon:cron:tasks";

pub const CHANNEL_CRON_EXECUTE: &str = "recon:cron:execute";
pub const CHANNEL_CRON_RELOAD: &str = "recon:cron:reload";
pub const CHANNEL_CRON_REMOVE: &str = "recon:cron:remove";
pub const CHANNEL_CRON_RUNNOW: &str = "recon:cron:runnow";
pub const CHANNEL_TASK_CANCEL: &str = "recon:task:cancel";

/// Worker专属队列
pub fn worker_queue(worker_name: &str) -> String {
    format!("recon:task:queue:worker:{}", worker_name.to_lowercase())
}

/// 拆分结果（按父任务）
pub fn chunk_info(task_id: &str) -> String {
    format!("recon:chunk:info:{}", task_id)
}

/// 分片执行状态（按分片）
pub fn chunk_status(chunk_id: &str) -> String {
    format!("recon:chunk:status:{}", chunk_id)
}

/// 分片调度元数据（按分片）
pub fn chunk_task(chunk_id: &str) -> String {
    format!("recon:chunk:task:{}", chunk_id)
}

/// 执行回执（按任务）
pub fn task_execution(task_id: &str) -> String {
    format!("{}:{}", TASK_EXECUTION, task_id)
}

/// 任务基础信息（按任务）
pub fn task_info(task_id: &str) -> String {
    format!("recon:task:info:{}", task_id)
}

/// 任务状态记录（按任务）
pub fn task_status(task_id: &str) -> String {
    format!("recon:task:status:{}", task_id)
}

/// 控制信号（按任务）
pub fn task_cancel(task_id: &str) -> String {
    format!("recon:task:cancel:{}", task_id)
}

/// Worker心跳
pub fn worker_heartbeat(worker_name: &str) -> String {
    format!("recon:worker:heartbeat:{}", worker_name)
}

/// 定时任务触发计数
pub fn cron_run_count(cron_task_id: &str) -> String {
    format!("recon:cron:runcount:{}", cron_task_id)
}

/// 任务发现的资产列表（按主任务）
pub fn task_assets(main_task_id: &str) -> String {
    format!("recon:task:assets:{}", main_task_id)
}

/// 任务发现的漏洞列表（按主任务）
pub fn task_vulns(main_task_id: &str) -> String {
    format!("recon:task:vulns:{}", main_task_id)
}

/// 阶段完成计数哈希（按主任务）
pub fn task_phase_completion(main_task_id: &str) -> String {
    format!("recon:task:phase:{}", main_task_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_queue_is_case_insensitive() {
        assert_eq!(worker_queue("Scanner-01"), "recon:task:queue:worker:scanner-01");
        assert_eq!(worker_queue("scanner-01"), worker_queue("SCANNER-01"));
    }

    #[test]
    fn test_chunk_keys_distinct_per_kind() {
        let id = "t1-chunk-0";
        assert_ne!(chunk_status(id), chunk_task(id));
        assert!(chunk_info("t1").ends_with(":t1"));
    }
}
