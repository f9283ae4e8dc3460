use serde::{Deserialize, Serialize};

/// 定时任务的调度方式
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ScheduleType {
    /// 六段式Cron表达式（秒 分 时 日 月 周）
    #[serde(rename = "cron")]
    Cron,
    /// 指定时间执行一次
    #[serde(rename = "once")]
    Once,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CronStatus {
    #[serde(rename = "enable")]
    Enable,
    #[serde(rename = "disable")]
    Disable,
}

/// 定时任务
///
/// 由外部API创建编辑并持久化；CronManager 负责把启用的条目物化为
/// 活动的触发器。触发时只发布执行意图事件，由调度侧消费后拆分入队。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CronTask {
    pub id: String,
    pub name: String,
    pub schedule_type: ScheduleType,
    /// scheduleType=cron 时使用
    #[serde(default)]
    pub cron_spec: String,
    /// scheduleType=once 时使用，格式 "%Y-%m-%d %H:%M:%S"
    #[serde(default)]
    pub schedule_time: String,
    pub workspace_id: String,
    pub main_task_id: String,
    pub task_name: String,
    pub target: String,
    pub config: String,
    pub status: CronStatus,
    #[serde(default)]
    pub last_run_time: String,
    #[serde(default)]
    pub next_run_time: String,
}

impl CronTask {
    pub fn is_enabled(&self) -> bool {
        self.status == CronStatus::Enable
    }
}

/// 定时任务触发时发布的执行意图
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CronExecutionIntent {
    pub cron_task_id: String,
    pub workspace_id: String,
    pub main_task_id: String,
    pub task_name: String,
    pub target: String,
    pub config: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_type_wire_format() {
        let json = serde_json::to_string(&ScheduleType::Cron).unwrap();
        assert_eq!(json, "\"cron\"");
        let parsed: ScheduleType = serde_json::from_str("\"once\"").unwrap();
        assert_eq!(parsed, ScheduleType::Once);
    }

    #[test]
    fn test_cron_task_round_trip() {
        let task = CronTask {
            id: "c1".to_string(),
            name: "nightly".to_string(),
            schedule_type: ScheduleType::Cron,
            cron_spec: "0 0 2 * * *".to_string(),
            schedule_time: String::new(),
            workspace_id: "ws".to_string(),
            main_task_id: "m1".to_string(),
            task_name: "scan".to_string(),
            target: "example.com".to_string(),
            config: "{}".to_string(),
            status: CronStatus::Enable,
            last_run_time: String::new(),
            next_run_time: String::new(),
        };
        let json = serde_json::to_string(&task).unwrap();
        let back: CronTask = serde_json::from_str(&json).unwrap();
        assert!(back.is_enabled());
        assert_eq!(back.cron_spec, "0 0 2 * * *");
    }
}
