//! 任务执行全链路测试：暂停保存状态后恢复执行，以及停止与
//! 阶段失败的行为，全部使用内存替身，不依赖外部存储。

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use recon_core::config::TaskConfig;
use recon_core::models::{ControlAction, TaskInfo, TaskPayload, TaskStatus};
use recon_core::SchedulerResult;
use recon_worker::{
    Asset, ControlSignalSource, RunOutcome, ScanCancellation, ScanConfig, ScanOutput, Scanner,
    StatusReporter, TaskRunner, Vulnerability,
};

/// 记录执行过的阶段，按阶段名返回固定结果
struct RecordingScanner {
    executed: Mutex<Vec<String>>,
}

impl RecordingScanner {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            executed: Mutex::new(Vec::new()),
        })
    }

    fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }
}

#[async_trait]
impl Scanner for RecordingScanner {
    async fn scan(
        &self,
        config: ScanConfig,
        _cancel: ScanCancellation,
    ) -> SchedulerResult<ScanOutput> {
        self.executed.lock().unwrap().push(config.phase.clone());
        let mut output = ScanOutput::default();
        match config.phase.as_str() {
            "portscan" => {
                output.assets.push(Asset {
                    host: "10.0.0.1".to_string(),
                    port: 80,
                    ..Default::default()
                });
            }
            "fingerprint" => {
                output.assets.push(Asset {
                    host: "10.0.0.1".to_string(),
                    port: 80,
                    apps: vec!["nginx".to_string()],
                    ..Default::default()
                });
            }
            "pocscan" => {
                // POC阶段依赖前序资产
                assert!(!config.prior_assets.is_empty());
                output.vulnerabilities.push(Vulnerability {
                    target: "10.0.0.1:80".to_string(),
                    name: "test-cve".to_string(),
                    ..Default::default()
                });
            }
            _ => {}
        }
        Ok(output)
    }
}

#[derive(Default)]
struct MemoryReporter {
    statuses: Mutex<Vec<(String, TaskStatus, i32)>>,
    saved_assets: Mutex<usize>,
    saved_vulns: Mutex<usize>,
}

#[async_trait]
impl StatusReporter for MemoryReporter {
    async fn save_assets(&self, _main_task_id: &str, assets: &[Asset]) -> SchedulerResult<()> {
        *self.saved_assets.lock().unwrap() += assets.len();
        Ok(())
    }

    async fn save_vulnerabilities(
        &self,
        _main_task_id: &str,
        vulns: &[Vulnerability],
    ) -> SchedulerResult<()> {
        *self.saved_vulns.lock().unwrap() += vulns.len();
        Ok(())
    }

    async fn update_task_status(
        &self,
        task_id: &str,
        status: TaskStatus,
        progress: i32,
        _message: &str,
    ) -> SchedulerResult<()> {
        self.statuses
            .lock()
            .unwrap()
            .push((task_id.to_string(), status, progress));
        Ok(())
    }

    async fn increment_phase_completion(
        &self,
        _main_task_id: &str,
        _phase: &str,
    ) -> SchedulerResult<()> {
        Ok(())
    }
}

/// 第N次检查时返回指定动作，其余放行
struct DelayedSignal {
    action: ControlAction,
    fire_on_check: usize,
    checks: Mutex<usize>,
}

impl DelayedSignal {
    fn new(action: ControlAction, fire_on_check: usize) -> Arc<Self> {
        Arc::new(Self {
            action,
            fire_on_check,
            checks: Mutex::new(0),
        })
    }
}

#[async_trait]
impl ControlSignalSource for DelayedSignal {
    async fn check(&self, _task_id: &str) -> SchedulerResult<Option<ControlAction>> {
        let mut checks = self.checks.lock().unwrap();
        *checks += 1;
        if *checks == self.fire_on_check {
            Ok(Some(self.action))
        } else {
            Ok(None)
        }
    }
}

struct Silent;

#[async_trait]
impl ControlSignalSource for Silent {
    async fn check(&self, _task_id: &str) -> SchedulerResult<Option<ControlAction>> {
        Ok(None)
    }
}

fn three_phase_payload() -> TaskPayload {
    TaskPayload {
        target: "10.0.0.1".to_string(),
        config: TaskConfig::parse(
            r#"{"portscan":{"enable":true},"fingerprint":{"enable":true},"pocscan":{"enable":true}}"#,
        )
        .unwrap(),
        ..Default::default()
    }
}

fn task(task_id: &str) -> TaskInfo {
    TaskInfo {
        task_id: task_id.to_string(),
        main_task_id: "main-1".to_string(),
        workspace_id: "ws-1".to_string(),
        task_name: "integration".to_string(),
        config: String::new(),
        priority: 0,
        create_time: String::new(),
        workers: vec![],
    }
}

#[tokio::test]
async fn pause_then_resume_runs_each_phase_exactly_once() {
    // 第一轮：第二次信号检查返回暂停，只有portscan完成
    let scanner = RecordingScanner::new();
    let reporter = Arc::new(MemoryReporter::default());
    let runner = TaskRunner::new(
        scanner.clone(),
        reporter.clone(),
        DelayedSignal::new(ControlAction::Pause, 2),
    );

    let outcome = runner
        .run(&task("main-1-chunk-0"), &three_phase_payload())
        .await
        .unwrap();
    let resume = match outcome {
        RunOutcome::Paused(resume) => resume,
        other => panic!("预期暂停, 实际 {:?}", other),
    };
    assert_eq!(scanner.executed(), vec!["portscan".to_string()]);
    assert_eq!(resume.completed_phases, vec!["portscan".to_string()]);

    // 第二轮：携带恢复状态重新执行，剩余两个阶段跑完
    let mut payload = three_phase_payload();
    payload.resume_state = Some(resume);
    let scanner2 = RecordingScanner::new();
    let runner2 = TaskRunner::new(scanner2.clone(), reporter.clone(), Arc::new(Silent));

    let outcome = runner2
        .run(&task("main-1-chunk-0"), &payload)
        .await
        .unwrap();
    match outcome {
        RunOutcome::Completed {
            asset_count,
            vul_count,
        } => {
            assert_eq!(asset_count, 1);
            assert_eq!(vul_count, 1);
        }
        other => panic!("预期完成, 实际 {:?}", other),
    }
    assert_eq!(
        scanner2.executed(),
        vec!["fingerprint".to_string(), "pocscan".to_string()]
    );

    // 两轮合计每个阶段恰好执行一次
    let mut all = scanner.executed();
    all.extend(scanner2.executed());
    all.sort();
    assert_eq!(all, vec!["fingerprint", "pocscan", "portscan"]);

    // 最终状态为成功
    let statuses = reporter.statuses.lock().unwrap();
    let last = statuses.last().unwrap();
    assert_eq!(last.1, TaskStatus::Success);
    assert_eq!(last.2, 100);
}

#[tokio::test]
async fn stop_signal_revokes_without_running_later_phases() {
    let scanner = RecordingScanner::new();
    let reporter = Arc::new(MemoryReporter::default());
    let runner = TaskRunner::new(
        scanner.clone(),
        reporter.clone(),
        DelayedSignal::new(ControlAction::Stop, 2),
    );

    let outcome = runner
        .run(&task("main-2"), &three_phase_payload())
        .await
        .unwrap();
    assert!(matches!(outcome, RunOutcome::Stopped));
    assert_eq!(scanner.executed(), vec!["portscan".to_string()]);

    let statuses = reporter.statuses.lock().unwrap();
    assert!(statuses.iter().any(|(_, s, _)| *s == TaskStatus::Revoked));
}

#[tokio::test]
async fn completed_run_persists_assets_and_vulns() {
    let scanner = RecordingScanner::new();
    let reporter = Arc::new(MemoryReporter::default());
    let runner = TaskRunner::new(scanner.clone(), reporter.clone(), Arc::new(Silent));

    let outcome = runner
        .run(&task("main-3"), &three_phase_payload())
        .await
        .unwrap();
    assert!(matches!(outcome, RunOutcome::Completed { .. }));
    assert_eq!(
        scanner.executed(),
        vec![
            "portscan".to_string(),
            "fingerprint".to_string(),
            "pocscan".to_string()
        ]
    );
    // 两个阶段各保存一次资产，漏洞一次
    assert_eq!(*reporter.saved_assets.lock().unwrap(), 2);
    assert_eq!(*reporter.saved_vulns.lock().unwrap(), 1);
}
