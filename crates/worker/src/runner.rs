//! 多阶段任务执行器。
//!
//! 按固定阶段顺序推进一个分片任务，在阶段边界检查控制信号，
//! 阶段产出增量合并进上下文，供后续阶段消费。阶段默认转发给
//! 扫描器，注册了专用执行器的阶段除外。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use recon_core::config::TaskConfig;
use recon_core::models::{ControlAction, ResumeState, TaskInfo, TaskPayload, TaskStatus};
use recon_core::SchedulerResult;

use crate::contracts::{
    Asset, ControlSignalSource, PhaseExecutor, ScanCanceller, ScanConfig, ScanOutput, Scanner,
    StatusReporter,
};

/// 阶段执行期间的控制信号轮询间隔
const SIGNAL_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// 阶段描述
///
/// 进度区间对应整个任务的完成百分比，阶段开始时上报区间起点，
/// 合并完成后上报区间终点。
#[derive(Debug, Clone, Copy)]
pub struct PhaseSpec {
    pub name: &'static str,
    pub default_scanner: &'static str,
    pub progress_start: i32,
    pub progress_end: i32,
    /// 阶段失败后是否继续执行后续阶段
    pub continue_on_error: bool,
}

/// 固定阶段顺序
pub const PHASE_ORDER: [PhaseSpec; 6] = [
    PhaseSpec {
        name: "domainscan",
        default_scanner: "subfinder",
        progress_start: 10,
        progress_end: 20,
        continue_on_error: true,
    },
    PhaseSpec {
        name: "portscan",
        default_scanner: "naabu",
        progress_start: 20,
        progress_end: 40,
        continue_on_error: true,
    },
    PhaseSpec {
        name: "portidentify",
        default_scanner: "nmap",
        progress_start: 40,
        progress_end: 50,
        continue_on_error: true,
    },
    PhaseSpec {
        name: "fingerprint",
        default_scanner: "builtin",
        progress_start: 50,
        progress_end: 70,
        continue_on_error: true,
    },
    PhaseSpec {
        name: "dirscan",
        default_scanner: "urlfinder",
        progress_start: 70,
        progress_end: 80,
        continue_on_error: true,
    },
    PhaseSpec {
        name: "pocscan",
        default_scanner: "nuclei",
        progress_start: 80,
        progress_end: 100,
        continue_on_error: true,
    },
];

/// 阶段使用的扫描器名称，配置里指定了工具则优先
pub fn scanner_for(spec: &PhaseSpec, config: &TaskConfig) -> String {
    let tool = match spec.name {
        "portscan" => config.portscan.as_ref().map(|c| c.tool.as_str()),
        "portidentify" => config.portidentify.as_ref().map(|c| c.tool.as_str()),
        "fingerprint" => config.fingerprint.as_ref().map(|c| c.tool.as_str()),
        _ => None,
    };
    match tool {
        Some(t) if !t.is_empty() => t.to_string(),
        _ => spec.default_scanner.to_string(),
    }
}

/// 从启用状态和已完成阶段推导执行计划
pub fn build_execution_plan(config: &TaskConfig, completed: &HashSet<String>) -> Vec<PhaseSpec> {
    PHASE_ORDER
        .iter()
        .filter(|spec| config.is_phase_enabled(spec.name) && !completed.contains(spec.name))
        .copied()
        .collect()
}

/// 增量合并资产
///
/// 同一资产（URL优先，否则host:port）在位更新非空字段，新资产追加，
/// 已有条目不会被后续阶段抹掉。
pub fn merge_assets(existing: &mut Vec<Asset>, incoming: Vec<Asset>) {
    for asset in incoming {
        let key = asset_key(&asset);
        match existing.iter_mut().find(|a| asset_key(a) == key) {
            Some(slot) => {
                if !asset.ip.is_empty() {
                    slot.ip = asset.ip;
                }
                if !asset.service.is_empty() {
                    slot.service = asset.service;
                }
                if !asset.title.is_empty() {
                    slot.title = asset.title;
                }
                if !asset.url.is_empty() {
                    slot.url = asset.url;
                }
                for app in asset.apps {
                    if !slot.apps.contains(&app) {
                        slot.apps.push(app);
                    }
                }
            }
            None => existing.push(asset),
        }
    }
}

fn asset_key(asset: &Asset) -> String {
    if !asset.url.is_empty() {
        asset.url.clone()
    } else {
        format!("{}:{}", asset.host, asset.port)
    }
}

/// 任务执行结果
#[derive(Debug)]
pub enum RunOutcome {
    Completed { asset_count: usize, vul_count: usize },
    /// 收到STOP信号，任务被撤销
    Stopped,
    /// 收到PAUSE信号，携带可恢复状态
    Paused(ResumeState),
}

/// 任务执行器
pub struct TaskRunner {
    scanner: Arc<dyn Scanner>,
    reporter: Arc<dyn StatusReporter>,
    signals: Arc<dyn ControlSignalSource>,
    executors: HashMap<&'static str, Arc<dyn PhaseExecutor>>,
}

impl TaskRunner {
    pub fn new(
        scanner: Arc<dyn Scanner>,
        reporter: Arc<dyn StatusReporter>,
        signals: Arc<dyn ControlSignalSource>,
    ) -> Self {
        Self {
            scanner,
            reporter,
            signals,
            executors: HashMap::new(),
        }
    }

    /// 为指定阶段注册专用执行器
    pub fn with_executor(mut self, phase: &'static str, executor: Arc<dyn PhaseExecutor>) -> Self {
        self.executors.insert(phase, executor);
        self
    }

    /// 执行一个分片任务的全部剩余阶段
    pub async fn run(&self, task: &TaskInfo, payload: &TaskPayload) -> SchedulerResult<RunOutcome> {
        let main_task_id = TaskInfo::main_task_id_of(&task.task_id).to_string();
        let mut completed: HashSet<String> = HashSet::new();
        let mut assets: Vec<Asset> = Vec::new();
        let mut vul_count = 0usize;

        if let Some(resume) = payload.resume_state.as_ref() {
            completed.extend(resume.completed_phases.iter().cloned());
            if !resume.assets.is_empty() {
                assets = serde_json::from_str(&resume.assets)?;
            }
            info!(
                task_id = %task.task_id,
                completed = resume.completed_phases.len(),
                restored_assets = assets.len(),
                "从暂停状态恢复执行"
            );
        }

        let plan = build_execution_plan(&payload.config, &completed);
        info!(
            task_id = %task.task_id,
            phases = plan.len(),
            "开始执行任务"
        );

        for spec in &plan {
            match self.signals.check(&task.task_id).await? {
                Some(ControlAction::Stop) => {
                    info!(task_id = %task.task_id, phase = spec.name, "收到停止信号，终止任务");
                    return self.finish_stopped(&task.task_id, spec.progress_start).await;
                }
                Some(ControlAction::Pause) => {
                    info!(task_id = %task.task_id, phase = spec.name, "收到暂停信号，保存恢复状态");
                    return self
                        .finish_paused(&task.task_id, &completed, &assets, spec.progress_start)
                        .await;
                }
                None => {}
            }

            self.reporter
                .update_task_status(
                    &task.task_id,
                    TaskStatus::Started,
                    spec.progress_start,
                    spec.name,
                )
                .await?;

            let scan_config = ScanConfig {
                scanner: scanner_for(spec, &payload.config),
                phase: spec.name.to_string(),
                target: payload.target.clone(),
                prior_assets: assets.clone(),
                task_config: payload.config.clone(),
            };
            let (result, interrupted) = self
                .run_phase(&task.task_id, spec.name, scan_config)
                .await?;
            if let Some(action) = interrupted {
                // 被中断扫描的结果作废，暂停恢复时该阶段整体重跑
                let _ = result;
                return match action {
                    ControlAction::Stop => {
                        self.finish_stopped(&task.task_id, spec.progress_start).await
                    }
                    ControlAction::Pause => {
                        self.finish_paused(&task.task_id, &completed, &assets, spec.progress_start)
                            .await
                    }
                };
            }
            match result {
                Ok(output) => {
                    if !output.assets.is_empty() {
                        self.reporter
                            .save_assets(&main_task_id, &output.assets)
                            .await?;
                    }
                    if !output.vulnerabilities.is_empty() {
                        self.reporter
                            .save_vulnerabilities(&main_task_id, &output.vulnerabilities)
                            .await?;
                        vul_count += output.vulnerabilities.len();
                    }
                    merge_assets(&mut assets, output.assets);
                    // 合并落地之后才算阶段完成，恢复时不会丢结果
                    completed.insert(spec.name.to_string());
                    self.reporter
                        .increment_phase_completion(&main_task_id, spec.name)
                        .await?;
                    self.reporter
                        .update_task_status(
                            &task.task_id,
                            TaskStatus::Started,
                            spec.progress_end,
                            spec.name,
                        )
                        .await?;
                }
                Err(e) if spec.continue_on_error => {
                    // 单阶段失败不中断任务，后续阶段基于已有资产继续；
                    // 容忍的失败同样计入已完成，恢复时不再重跑
                    warn!(
                        task_id = %task.task_id,
                        phase = spec.name,
                        error = %e,
                        "阶段执行失败，继续后续阶段"
                    );
                    completed.insert(spec.name.to_string());
                }
                Err(e) => {
                    warn!(
                        task_id = %task.task_id,
                        phase = spec.name,
                        error = %e,
                        "阶段执行失败，任务中止"
                    );
                    return Err(e);
                }
            }
        }

        self.reporter
            .update_task_status(&task.task_id, TaskStatus::Success, 100, "任务执行完成")
            .await?;
        info!(
            task_id = %task.task_id,
            assets = assets.len(),
            vulns = vul_count,
            "任务执行完成"
        );
        Ok(RunOutcome::Completed {
            asset_count: assets.len(),
            vul_count,
        })
    }

    /// 执行单个阶段，期间持续轮询控制信号
    ///
    /// 命中信号时触发取消并等待扫描返回；返回的动作由调用方处理，
    /// 被中断的扫描结果作废。
    async fn run_phase(
        &self,
        task_id: &str,
        phase: &'static str,
        config: ScanConfig,
    ) -> SchedulerResult<(SchedulerResult<ScanOutput>, Option<ControlAction>)> {
        let (canceller, cancel) = ScanCanceller::new();
        let scan = async {
            match self.executors.get(phase) {
                Some(executor) => executor.execute(config, cancel).await,
                None => self.scanner.scan(config, cancel).await,
            }
        };
        tokio::pin!(scan);

        let mut poll = tokio::time::interval(SIGNAL_POLL_INTERVAL);
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // 第一个tick立即完成，边界处刚检查过，跳过
        poll.tick().await;

        loop {
            tokio::select! {
                result = &mut scan => return Ok((result, None)),
                _ = poll.tick() => {
                    if let Some(action) = self.signals.check(task_id).await? {
                        info!(task_id, phase, action = ?action, "收到控制信号，中断当前阶段");
                        canceller.cancel();
                        let result = scan.as_mut().await;
                        return Ok((result, Some(action)));
                    }
                }
            }
        }
    }

    async fn finish_stopped(&self, task_id: &str, progress: i32) -> SchedulerResult<RunOutcome> {
        self.reporter
            .update_task_status(task_id, TaskStatus::Revoked, progress, "任务已停止")
            .await?;
        Ok(RunOutcome::Stopped)
    }

    async fn finish_paused(
        &self,
        task_id: &str,
        completed: &HashSet<String>,
        assets: &[Asset],
        progress: i32,
    ) -> SchedulerResult<RunOutcome> {
        let resume = ResumeState {
            completed_phases: completed.iter().cloned().collect(),
            assets: serde_json::to_string(assets)?,
        };
        info!(
            task_id,
            completed = resume.completed_phases.len(),
            "恢复状态已生成"
        );
        self.reporter
            .update_task_status(task_id, TaskStatus::Paused, progress, "任务已暂停")
            .await?;
        Ok(RunOutcome::Paused(resume))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::{
        MockControlSignalSource, MockPhaseExecutor, MockScanner, MockStatusReporter, ScanOutput,
        Vulnerability,
    };
    use recon_core::config::{PocScanConfig, PortScanConfig};

    fn two_phase_config() -> TaskConfig {
        let mut config = TaskConfig::default();
        config.portscan = Some(PortScanConfig {
            enable: true,
            tool: "naabu".to_string(),
            ..Default::default()
        });
        config.pocscan = Some(PocScanConfig {
            enable: true,
            ..Default::default()
        });
        config
    }

    fn task(task_id: &str) -> TaskInfo {
        TaskInfo {
            task_id: task_id.to_string(),
            main_task_id: "t1".to_string(),
            workspace_id: "ws1".to_string(),
            task_name: "scan".to_string(),
            config: String::new(),
            priority: 0,
            create_time: String::new(),
            workers: vec![],
        }
    }

    fn payload(config: TaskConfig) -> TaskPayload {
        TaskPayload {
            target: "192.168.1.1".to_string(),
            config,
            ..Default::default()
        }
    }

    fn permissive_reporter() -> MockStatusReporter {
        let mut reporter = MockStatusReporter::new();
        reporter.expect_save_assets().returning(|_, _| Ok(()));
        reporter
            .expect_save_vulnerabilities()
            .returning(|_, _| Ok(()));
        reporter
            .expect_update_task_status()
            .returning(|_, _, _, _| Ok(()));
        reporter
            .expect_increment_phase_completion()
            .returning(|_, _| Ok(()));
        reporter
    }

    fn quiet_signals() -> MockControlSignalSource {
        let mut signals = MockControlSignalSource::new();
        signals.expect_check().returning(|_| Ok(None));
        signals
    }

    fn asset(host: &str, port: u16) -> Asset {
        Asset {
            host: host.to_string(),
            port,
            ..Default::default()
        }
    }

    #[test]
    fn test_plan_skips_disabled_and_completed() {
        let config = two_phase_config();
        let plan = build_execution_plan(&config, &HashSet::new());
        let names: Vec<&str> = plan.iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["portscan", "pocscan"]);

        let mut done = HashSet::new();
        done.insert("portscan".to_string());
        let plan = build_execution_plan(&config, &done);
        let names: Vec<&str> = plan.iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["pocscan"]);
    }

    #[test]
    fn test_scanner_override_from_config() {
        let mut config = two_phase_config();
        let spec = PHASE_ORDER[1];
        assert_eq!(scanner_for(&spec, &config), "naabu");
        config.portscan.as_mut().unwrap().tool = "masscan".to_string();
        assert_eq!(scanner_for(&spec, &config), "masscan");
        // 未配置工具的阶段用默认扫描器
        assert_eq!(scanner_for(&PHASE_ORDER[5], &config), "nuclei");
    }

    #[test]
    fn test_merge_assets_updates_in_place() {
        let mut assets = vec![asset("192.168.1.1", 80)];
        let mut update = asset("192.168.1.1", 80);
        update.service = "http".to_string();
        update.apps = vec!["nginx".to_string()];
        merge_assets(&mut assets, vec![update, asset("192.168.1.2", 443)]);
        assert_eq!(assets.len(), 2);
        assert_eq!(assets[0].service, "http");
        assert_eq!(assets[0].apps, vec!["nginx".to_string()]);
        // 后续阶段的空字段不会抹掉已有值
        merge_assets(&mut assets, vec![asset("192.168.1.1", 80)]);
        assert_eq!(assets[0].service, "http");
    }

    #[tokio::test]
    async fn test_run_executes_phases_in_order() {
        let mut scanner = MockScanner::new();
        let mut seq = mockall::Sequence::new();
        scanner
            .expect_scan()
            .once()
            .in_sequence(&mut seq)
            .withf(|c, _| c.phase == "portscan")
            .returning(|_, _| {
                Ok(ScanOutput {
                    assets: vec![Asset {
                        host: "192.168.1.1".to_string(),
                        port: 80,
                        ..Default::default()
                    }],
                    ..Default::default()
                })
            });
        scanner
            .expect_scan()
            .once()
            .in_sequence(&mut seq)
            .withf(|c, _| c.phase == "pocscan" && c.prior_assets.len() == 1)
            .returning(|_, _| {
                Ok(ScanOutput {
                    vulnerabilities: vec![Vulnerability {
                        target: "192.168.1.1".to_string(),
                        name: "cve-x".to_string(),
                        ..Default::default()
                    }],
                    ..Default::default()
                })
            });

        let runner = TaskRunner::new(
            Arc::new(scanner),
            Arc::new(permissive_reporter()),
            Arc::new(quiet_signals()),
        );
        let outcome = runner
            .run(&task("t1"), &payload(two_phase_config()))
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
            other => panic!("意外的结果: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_registered_executor_takes_phase_over_scanner() {
        let mut scanner = MockScanner::new();
        scanner
            .expect_scan()
            .once()
            .withf(|c, _| c.phase == "portscan")
            .returning(|_, _| Ok(ScanOutput::default()));

        // pocscan注册了专用执行器，不再经过扫描器
        let mut executor = MockPhaseExecutor::new();
        executor
            .expect_execute()
            .once()
            .withf(|c, _| c.phase == "pocscan")
            .returning(|_, _| {
                Ok(ScanOutput {
                    vulnerabilities: vec![Vulnerability {
                        target: "192.168.1.1".to_string(),
                        name: "cve-y".to_string(),
                        ..Default::default()
                    }],
                    ..Default::default()
                })
            });

        let runner = TaskRunner::new(
            Arc::new(scanner),
            Arc::new(permissive_reporter()),
            Arc::new(quiet_signals()),
        )
        .with_executor("pocscan", Arc::new(executor));
        let outcome = runner
            .run(&task("t1"), &payload(two_phase_config()))
            .await
            .unwrap();
        assert!(matches!(outcome, RunOutcome::Completed { vul_count: 1, .. }));
    }

    #[tokio::test]
    async fn test_pause_saves_resume_state() {
        let mut scanner = MockScanner::new();
        scanner
            .expect_scan()
            .once()
            .withf(|c, _| c.phase == "portscan")
            .returning(|_, _| {
                Ok(ScanOutput {
                    assets: vec![Asset {
                        host: "192.168.1.1".to_string(),
                        port: 80,
                        ..Default::default()
                    }],
                    ..Default::default()
                })
            });

        // 第一次检查放行，第二次返回暂停
        let mut signals = MockControlSignalSource::new();
        let mut seq = mockall::Sequence::new();
        signals
            .expect_check()
            .once()
            .in_sequence(&mut seq)
            .returning(|_| Ok(None));
        signals
            .expect_check()
            .once()
            .in_sequence(&mut seq)
            .returning(|_| Ok(Some(ControlAction::Pause)));

        let runner = TaskRunner::new(
            Arc::new(scanner),
            Arc::new(permissive_reporter()),
            Arc::new(signals),
        );
        let outcome = runner
            .run(&task("t1"), &payload(two_phase_config()))
            .await
            .unwrap();
        match outcome {
            RunOutcome::Paused(resume) => {
                assert_eq!(resume.completed_phases, vec!["portscan".to_string()]);
                let restored: Vec<Asset> = serde_json::from_str(&resume.assets).unwrap();
                assert_eq!(restored.len(), 1);
            }
            other => panic!("意外的结果: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_resume_skips_completed_phases() {
        let mut scanner = MockScanner::new();
        scanner
            .expect_scan()
            .once()
            .withf(|c, _| c.phase == "pocscan" && c.prior_assets.len() == 1)
            .returning(|_, _| Ok(ScanOutput::default()));

        let mut p = payload(two_phase_config());
        p.resume_state = Some(ResumeState {
            completed_phases: vec!["portscan".to_string()],
            assets: serde_json::to_string(&vec![asset("192.168.1.1", 80)]).unwrap(),
        });

        let runner = TaskRunner::new(
            Arc::new(scanner),
            Arc::new(permissive_reporter()),
            Arc::new(quiet_signals()),
        );
        let outcome = runner.run(&task("t1"), &p).await.unwrap();
        assert!(matches!(
            outcome,
            RunOutcome::Completed { asset_count: 1, .. }
        ));
    }

    #[tokio::test]
    async fn test_stop_aborts_before_any_phase() {
        let scanner = MockScanner::new();
        let mut signals = MockControlSignalSource::new();
        signals
            .expect_check()
            .returning(|_| Ok(Some(ControlAction::Stop)));

        let runner = TaskRunner::new(
            Arc::new(scanner),
            Arc::new(permissive_reporter()),
            Arc::new(signals),
        );
        let outcome = runner
            .run(&task("t1"), &payload(two_phase_config()))
            .await
            .unwrap();
        assert!(matches!(outcome, RunOutcome::Stopped));
    }

    #[tokio::test]
    async fn test_phase_failure_does_not_abort_task() {
        let mut scanner = MockScanner::new();
        let mut seq = mockall::Sequence::new();
        scanner
            .expect_scan()
            .once()
            .in_sequence(&mut seq)
            .withf(|c, _| c.phase == "portscan")
            .returning(|_, _| {
                Err(recon_core::SchedulerError::scan_error(
                    "naabu",
                    "192.168.1.1",
                    "portscan",
                    "连接超时",
                ))
            });
        scanner
            .expect_scan()
            .once()
            .in_sequence(&mut seq)
            .withf(|c, _| c.phase == "pocscan")
            .returning(|_, _| Ok(ScanOutput::default()));

        let runner = TaskRunner::new(
            Arc::new(scanner),
            Arc::new(permissive_reporter()),
            Arc::new(quiet_signals()),
        );
        let outcome = runner
            .run(&task("t1"), &payload(two_phase_config()))
            .await
            .unwrap();
        assert!(matches!(outcome, RunOutcome::Completed { .. }));
    }

    #[tokio::test]
    async fn test_tolerated_failure_counts_phase_completed() {
        let mut scanner = MockScanner::new();
        scanner
            .expect_scan()
            .once()
            .withf(|c, _| c.phase == "portscan")
            .returning(|_, _| {
                Err(recon_core::SchedulerError::scan_error(
                    "naabu",
                    "192.168.1.1",
                    "portscan",
                    "连接超时",
                ))
            });

        // portscan失败被容忍，pocscan边界处暂停
        let mut signals = MockControlSignalSource::new();
        let mut seq = mockall::Sequence::new();
        signals
            .expect_check()
            .once()
            .in_sequence(&mut seq)
            .returning(|_| Ok(None));
        signals
            .expect_check()
            .once()
            .in_sequence(&mut seq)
            .returning(|_| Ok(Some(ControlAction::Pause)));

        let runner = TaskRunner::new(
            Arc::new(scanner),
            Arc::new(permissive_reporter()),
            Arc::new(signals),
        );
        let outcome = runner
            .run(&task("t1"), &payload(two_phase_config()))
            .await
            .unwrap();
        match outcome {
            RunOutcome::Paused(resume) => {
                // 容忍失败的阶段计入已完成，恢复后不会重跑
                assert_eq!(resume.completed_phases, vec!["portscan".to_string()]);
            }
            other => panic!("意外的结果: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stop_interrupts_running_phase() {
        /// 挂起直到被取消的扫描器
        struct HangingScanner;

        #[async_trait::async_trait]
        impl Scanner for HangingScanner {
            async fn scan(
                &self,
                config: ScanConfig,
                cancel: crate::contracts::ScanCancellation,
            ) -> SchedulerResult<ScanOutput> {
                cancel.cancelled().await;
                Err(recon_core::SchedulerError::scan_error(
                    config.scanner.as_str(),
                    config.target.as_str(),
                    config.phase.as_str(),
                    "扫描已取消",
                ))
            }
        }

        // 边界放行，阶段执行期间的轮询命中停止信号
        let mut signals = MockControlSignalSource::new();
        let mut seq = mockall::Sequence::new();
        signals
            .expect_check()
            .once()
            .in_sequence(&mut seq)
            .returning(|_| Ok(None));
        signals
            .expect_check()
            .once()
            .in_sequence(&mut seq)
            .returning(|_| Ok(Some(ControlAction::Stop)));

        let runner = TaskRunner::new(
            Arc::new(HangingScanner),
            Arc::new(permissive_reporter()),
            Arc::new(signals),
        );
        let outcome = runner
            .run(&task("t1"), &payload(two_phase_config()))
            .await
            .unwrap();
        assert!(matches!(outcome, RunOutcome::Stopped));
    }
}
