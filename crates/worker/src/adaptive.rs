use std::sync::atomic::{AtomicI32, AtomicI64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;
use sysinfo::System;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// 调度模式
///
/// 完全由平滑后的资源指标推导，驱动目标并发和扫描器参数建议。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleMode {
    /// 资源充裕，最大化吞吐
    Aggressive,
    Normal,
    /// 资源偏紧，收缩并发
    Conservative,
    /// 资源危急，最小化占用
    Critical,
}

impl ScheduleMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleMode::Aggressive => "aggressive",
            ScheduleMode::Normal => "normal",
            ScheduleMode::Conservative => "conservative",
            ScheduleMode::Critical => "critical",
        }
    }
}

/// 自适应调度配置
#[derive(Debug, Clone)]
pub struct AdaptiveConfig {
    pub base_concurrency: usize,
    pub min_concurrency: usize,
    pub max_concurrency: usize,
    pub cpu_low: f64,
    pub cpu_high: f64,
    pub cpu_critical: f64,
    pub mem_low: f64,
    pub mem_high: f64,
    pub mem_critical: f64,
    /// 指数平滑系数
    pub smoothing_factor: f64,
    pub sample_interval: Duration,
    pub adjust_interval: Duration,
    pub scale_up_cooldown: Duration,
    pub scale_down_cooldown: Duration,
    pub min_pull_interval: Duration,
    pub max_pull_interval: Duration,
}

impl AdaptiveConfig {
    pub fn with_base_concurrency(base_concurrency: usize) -> Self {
        let base = base_concurrency.max(1);
        Self {
            base_concurrency: base,
            min_concurrency: 1,
            max_concurrency: base,
            cpu_low: 40.0,
            cpu_high: 70.0,
            cpu_critical: 85.0,
            mem_low: 50.0,
            mem_high: 75.0,
            mem_critical: 90.0,
            smoothing_factor: 0.3,
            sample_interval: Duration::from_secs(1),
            adjust_interval: Duration::from_secs(5),
            scale_up_cooldown: Duration::from_secs(30),
            scale_down_cooldown: Duration::from_secs(10),
            min_pull_interval: Duration::from_secs(3),
            max_pull_interval: Duration::from_secs(10),
        }
    }
}

/// 模式判定，按危急、保守、激进、正常的优先级评估
pub fn determine_mode(config: &AdaptiveConfig, cpu: f64, mem: f64) -> ScheduleMode {
    if cpu >= config.cpu_critical || mem >= config.mem_critical {
        return ScheduleMode::Critical;
    }
    if cpu >= config.cpu_high || mem >= config.mem_high {
        return ScheduleMode::Conservative;
    }
    if cpu < config.cpu_low && mem < config.mem_low {
        return ScheduleMode::Aggressive;
    }
    ScheduleMode::Normal
}

/// 各模式对应的目标并发（基准的100/75/50/25%）
pub fn target_concurrency(base: usize, mode: ScheduleMode) -> usize {
    match mode {
        ScheduleMode::Aggressive => base,
        ScheduleMode::Normal => (base as f64 * 0.75) as usize,
        ScheduleMode::Conservative => (base as f64 * 0.5) as usize,
        ScheduleMode::Critical => (base as f64 * 0.25) as usize,
    }
}

/// 渐进式调整：单次变化不超过当前并发的25%（向上取整，至少1）
pub fn bounded_step(current: usize, target: usize) -> i64 {
    let max_change = ((current as f64) * 0.25).ceil().max(1.0) as i64;
    let diff = target as i64 - current as i64;
    diff.clamp(-max_change, max_change)
}

/// 扫描器参数建议
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScannerRecommendation {
    pub port_scan_rate: i64,
    pub port_scan_workers: i64,
    pub poc_concurrency: i64,
    pub poc_rate_limit: i64,
    pub fingerprint_concurrency: i64,
}

/// 按模式给出扫描器参数，内存/CPU超过80%再减半相应维度
pub fn recommend_scanner_config(mode: ScheduleMode, cpu: f64, mem: f64) -> ScannerRecommendation {
    let mut rec = match mode {
        ScheduleMode::Aggressive => ScannerRecommendation {
            port_scan_rate: 3000,
            port_scan_workers: 50,
            poc_concurrency: 25,
            poc_rate_limit: 150,
            fingerprint_concurrency: 20,
        },
        ScheduleMode::Normal => ScannerRecommendation {
            port_scan_rate: 2000,
            port_scan_workers: 30,
            poc_concurrency: 15,
            poc_rate_limit: 100,
            fingerprint_concurrency: 10,
        },
        ScheduleMode::Conservative => ScannerRecommendation {
            port_scan_rate: 1000,
            port_scan_workers: 20,
            poc_concurrency: 10,
            poc_rate_limit: 50,
            fingerprint_concurrency: 5,
        },
        ScheduleMode::Critical => ScannerRecommendation {
            port_scan_rate: 500,
            port_scan_workers: 10,
            poc_concurrency: 5,
            poc_rate_limit: 20,
            fingerprint_concurrency: 3,
        },
    };
    if mem > 80.0 {
        rec.port_scan_workers /= 2;
        rec.poc_concurrency /= 2;
    }
    if cpu > 80.0 {
        rec.port_scan_rate /= 2;
        rec.poc_rate_limit /= 2;
    }
    rec
}

/// 运行统计快照
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdaptiveStats {
    pub current_mode: &'static str,
    pub current_concurrency: usize,
    pub current_tasks: i32,
    pub smoothed_cpu: f64,
    pub smoothed_mem: f64,
    pub total_accepted: i64,
    pub total_rejected: i64,
    pub total_scale_ups: i64,
    pub total_scale_downs: i64,
    pub pull_interval_ms: u64,
}

struct AdaptiveState {
    mode: ScheduleMode,
    concurrency: usize,
    smoothed_cpu: f64,
    smoothed_mem: f64,
    last_scale_up: Option<Instant>,
    last_scale_down: Option<Instant>,
}

/// 自适应调度器
///
/// 1秒节奏采样CPU/内存并指数平滑，5秒节奏按平滑值调整并发；
/// 槽位计数独立走原子变量，准入判断不等慢速调整循环。
pub struct AdaptiveScheduler {
    config: AdaptiveConfig,
    state: Mutex<AdaptiveState>,
    current_tasks: AtomicI32,
    total_accepted: AtomicI64,
    total_rejected: AtomicI64,
    total_scale_ups: AtomicI64,
    total_scale_downs: AtomicI64,
}

impl AdaptiveScheduler {
    pub fn new(config: AdaptiveConfig) -> Self {
        let state = AdaptiveState {
            mode: ScheduleMode::Normal,
            concurrency: config.base_concurrency,
            smoothed_cpu: 0.0,
            smoothed_mem: 0.0,
            last_scale_up: None,
            last_scale_down: None,
        };
        Self {
            config,
            state: Mutex::new(state),
            current_tasks: AtomicI32::new(0),
            total_accepted: AtomicI64::new(0),
            total_rejected: AtomicI64::new(0),
            total_scale_ups: AtomicI64::new(0),
            total_scale_downs: AtomicI64::new(0),
        }
    }

    /// 喂入一次资源采样
    pub fn record_sample(&self, cpu: f64, mem: f64) {
        let alpha = self.config.smoothing_factor;
        let mut state = self.lock_state();
        state.smoothed_cpu = alpha * cpu + (1.0 - alpha) * state.smoothed_cpu;
        state.smoothed_mem = alpha * mem + (1.0 - alpha) * state.smoothed_mem;
    }

    /// 执行一次并发调整
    pub fn adjust(&self) {
        self.adjust_at(Instant::now());
    }

    fn adjust_at(&self, now: Instant) {
        let mut state = self.lock_state();
        let old_mode = state.mode;
        let old_concurrency = state.concurrency;

        let new_mode = determine_mode(&self.config, state.smoothed_cpu, state.smoothed_mem);
        state.mode = new_mode;

        let target = target_concurrency(self.config.base_concurrency, new_mode);
        if target > state.concurrency {
            if let Some(last) = state.last_scale_up {
                if now.duration_since(last) < self.config.scale_up_cooldown {
                    return;
                }
            }
            state.last_scale_up = Some(now);
            self.total_scale_ups.fetch_add(1, Ordering::Relaxed);
        } else if target < state.concurrency {
            if let Some(last) = state.last_scale_down {
                if now.duration_since(last) < self.config.scale_down_cooldown {
                    return;
                }
            }
            state.last_scale_down = Some(now);
            self.total_scale_downs.fetch_add(1, Ordering::Relaxed);
        }

        let step = bounded_step(state.concurrency, target);
        let next = (state.concurrency as i64 + step)
            .clamp(
                self.config.min_concurrency as i64,
                self.config.max_concurrency as i64,
            ) as usize;
        state.concurrency = next;

        if old_mode != new_mode || old_concurrency != next {
            info!(
                old_mode = old_mode.as_str(),
                new_mode = new_mode.as_str(),
                old_concurrency,
                new_concurrency = next,
                cpu = format!("{:.1}", state.smoothed_cpu),
                mem = format!("{:.1}", state.smoothed_mem),
                "调度参数已调整"
            );
        }
    }

    /// 准入判断
    ///
    /// 除并发上限外走一条快速资源通道：采样显示危急即拒绝，
    /// 不等下一次调整；危急模式下已有任务在跑就不接新任务。
    pub fn can_accept_task(&self) -> bool {
        let (mode, concurrency, cpu, mem) = {
            let state = self.lock_state();
            (
                state.mode,
                state.concurrency,
                state.smoothed_cpu,
                state.smoothed_mem,
            )
        };
        let current = self.current_tasks.load(Ordering::Acquire);

        if mode == ScheduleMode::Critical && current > 0 {
            self.total_rejected.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        if current as i64 >= concurrency as i64 {
            self.total_rejected.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        if cpu >= self.config.cpu_critical || mem >= self.config.mem_critical {
            self.total_rejected.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        self.total_accepted.fetch_add(1, Ordering::Relaxed);
        true
    }

    pub fn acquire_slot(&self) -> bool {
        if !self.can_accept_task() {
            return false;
        }
        self.current_tasks.fetch_add(1, Ordering::AcqRel);
        true
    }

    pub fn release_slot(&self) {
        // 不允许降到负数
        let _ = self
            .current_tasks
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
                if v > 0 {
                    Some(v - 1)
                } else {
                    None
                }
            });
    }

    /// 按模式和负载率推导任务拉取间隔
    pub fn pull_interval(&self) -> Duration {
        let (mode, concurrency) = {
            let state = self.lock_state();
            (state.mode, state.concurrency)
        };
        let current = self.current_tasks.load(Ordering::Acquire).max(0) as usize;

        let mut interval = match mode {
            ScheduleMode::Aggressive => self.config.min_pull_interval,
            ScheduleMode::Normal => self.config.min_pull_interval * 2,
            ScheduleMode::Conservative => self.config.min_pull_interval * 4,
            ScheduleMode::Critical => self.config.max_pull_interval,
        };

        if concurrency > 0 {
            let load_ratio = current as f64 / concurrency as f64;
            if load_ratio > 0.8 {
                interval = interval.mul_f64(1.0 + load_ratio);
            } else if load_ratio < 0.2 && current < concurrency {
                interval = interval.mul_f64(0.5);
            }
        }

        interval.clamp(self.config.min_pull_interval, self.config.max_pull_interval)
    }

    pub fn current_mode(&self) -> ScheduleMode {
        self.lock_state().mode
    }

    pub fn current_concurrency(&self) -> usize {
        self.lock_state().concurrency
    }

    pub fn current_tasks(&self) -> i32 {
        self.current_tasks.load(Ordering::Acquire)
    }

    pub fn scanner_recommendation(&self) -> ScannerRecommendation {
        let state = self.lock_state();
        recommend_scanner_config(state.mode, state.smoothed_cpu, state.smoothed_mem)
    }

    pub fn stats(&self) -> AdaptiveStats {
        let (mode, concurrency, cpu, mem) = {
            let state = self.lock_state();
            (
                state.mode,
                state.concurrency,
                state.smoothed_cpu,
                state.smoothed_mem,
            )
        };
        AdaptiveStats {
            current_mode: mode.as_str(),
            current_concurrency: concurrency,
            current_tasks: self.current_tasks(),
            smoothed_cpu: cpu,
            smoothed_mem: mem,
            total_accepted: self.total_accepted.load(Ordering::Relaxed),
            total_rejected: self.total_rejected.load(Ordering::Relaxed),
            total_scale_ups: self.total_scale_ups.load(Ordering::Relaxed),
            total_scale_downs: self.total_scale_downs.load(Ordering::Relaxed),
            pull_interval_ms: self.pull_interval().as_millis() as u64,
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, AdaptiveState> {
        // 互斥区极短且不跨await，poison只会来自panic的测试线程
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// 采样与调整循环，收到关闭信号后退出
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        let mut system = System::new();
        let mut sample_tick = tokio::time::interval(self.config.sample_interval);
        let mut adjust_tick = tokio::time::interval(self.config.adjust_interval);
        sample_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        adjust_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(
            base_concurrency = self.config.base_concurrency,
            "自适应调度循环启动"
        );

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("自适应调度循环退出");
                    return;
                }
                _ = sample_tick.tick() => {
                    let (cpu, mem) = sample_resources(&mut system);
                    self.record_sample(cpu, mem);
                    debug!(cpu = format!("{:.1}", cpu), mem = format!("{:.1}", mem), "资源采样");
                }
                _ = adjust_tick.tick() => {
                    self.adjust();
                }
            }
        }
    }
}

/// 读取当前CPU与内存使用率（百分比）
pub(crate) fn sample_resources(system: &mut System) -> (f64, f64) {
    system.refresh_cpu_usage();
    system.refresh_memory();
    let cpu = system.global_cpu_usage() as f64;
    let total = system.total_memory();
    let mem = if total > 0 {
        system.used_memory() as f64 / total as f64 * 100.0
    } else {
        0.0
    };
    (cpu, mem)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(base: usize) -> AdaptiveConfig {
        AdaptiveConfig::with_base_concurrency(base)
    }

    #[test]
    fn test_mode_priority_order() {
        let c = config(10);
        assert_eq!(determine_mode(&c, 90.0, 10.0), ScheduleMode::Critical);
        assert_eq!(determine_mode(&c, 10.0, 95.0), ScheduleMode::Critical);
        assert_eq!(determine_mode(&c, 75.0, 10.0), ScheduleMode::Conservative);
        assert_eq!(determine_mode(&c, 10.0, 80.0), ScheduleMode::Conservative);
        assert_eq!(determine_mode(&c, 10.0, 10.0), ScheduleMode::Aggressive);
        // CPU低但内存处于中档 -> Normal
        assert_eq!(determine_mode(&c, 10.0, 60.0), ScheduleMode::Normal);
    }

    #[test]
    fn test_target_concurrency_fractions() {
        assert_eq!(target_concurrency(20, ScheduleMode::Aggressive), 20);
        assert_eq!(target_concurrency(20, ScheduleMode::Normal), 15);
        assert_eq!(target_concurrency(20, ScheduleMode::Conservative), 10);
        assert_eq!(target_concurrency(20, ScheduleMode::Critical), 5);
    }

    #[test]
    fn test_bounded_step_caps_at_quarter() {
        // ⌈20*0.25⌉ = 5
        assert_eq!(bounded_step(20, 40), 5);
        assert_eq!(bounded_step(20, 5), -5);
        // 小并发时步长至少1
        assert_eq!(bounded_step(1, 10), 1);
        assert_eq!(bounded_step(2, 1), -1);
        assert_eq!(bounded_step(10, 10), 0);
    }

    #[test]
    fn test_smoothing_converges() {
        let scheduler = AdaptiveScheduler::new(config(10));
        for _ in 0..50 {
            scheduler.record_sample(60.0, 40.0);
        }
        let stats = scheduler.stats();
        assert!((stats.smoothed_cpu - 60.0).abs() < 1.0);
        assert!((stats.smoothed_mem - 40.0).abs() < 1.0);
    }

    #[test]
    fn test_concurrency_stays_within_bounds() {
        let scheduler = AdaptiveScheduler::new(config(8));
        // 持续危急采样，多轮调整后也不会低于最小并发
        for _ in 0..20 {
            scheduler.record_sample(99.0, 99.0);
            scheduler.adjust_at(Instant::now() + Duration::from_secs(3600));
        }
        assert!(scheduler.current_concurrency() >= 1);
        assert_eq!(scheduler.current_mode(), ScheduleMode::Critical);
    }

    #[test]
    fn test_critical_mode_rejects_when_busy() {
        let scheduler = AdaptiveScheduler::new(config(10));
        for _ in 0..50 {
            scheduler.record_sample(10.0, 10.0);
        }
        scheduler.adjust();
        assert!(scheduler.acquire_slot());

        // 进入危急状态后，已有任务在执行时拒绝新任务
        for _ in 0..50 {
            scheduler.record_sample(99.0, 99.0);
        }
        scheduler.adjust();
        assert_eq!(scheduler.current_mode(), ScheduleMode::Critical);
        assert!(!scheduler.can_accept_task());

        scheduler.release_slot();
        // 空闲后危急模式仍被快速资源通道拦截
        assert!(!scheduler.can_accept_task());
    }

    #[test]
    fn test_slot_accounting() {
        let scheduler = AdaptiveScheduler::new(config(2));
        for _ in 0..50 {
            scheduler.record_sample(10.0, 10.0);
        }
        assert!(scheduler.acquire_slot());
        assert!(scheduler.acquire_slot());
        assert!(!scheduler.acquire_slot());
        scheduler.release_slot();
        assert!(scheduler.acquire_slot());
        // 释放不会把计数带到负数
        scheduler.release_slot();
        scheduler.release_slot();
        scheduler.release_slot();
        assert_eq!(scheduler.current_tasks(), 0);
    }

    #[test]
    fn test_pull_interval_bounds_and_modes() {
        let scheduler = AdaptiveScheduler::new(config(10));
        for _ in 0..50 {
            scheduler.record_sample(10.0, 10.0);
        }
        scheduler.adjust();
        let aggressive = scheduler.pull_interval();
        assert!(aggressive >= Duration::from_millis(1500));
        assert!(aggressive <= Duration::from_secs(10));

        for _ in 0..50 {
            scheduler.record_sample(99.0, 99.0);
        }
        scheduler.adjust();
        assert_eq!(scheduler.pull_interval(), Duration::from_secs(10));
    }

    #[test]
    fn test_scanner_recommendation_scales_down() {
        let aggressive = recommend_scanner_config(ScheduleMode::Aggressive, 10.0, 10.0);
        assert_eq!(aggressive.port_scan_rate, 3000);
        let strained = recommend_scanner_config(ScheduleMode::Normal, 85.0, 85.0);
        assert_eq!(strained.port_scan_rate, 1000);
        assert_eq!(strained.port_scan_workers, 15);
        let critical = recommend_scanner_config(ScheduleMode::Critical, 10.0, 10.0);
        assert_eq!(critical.poc_concurrency, 5);
    }
}
