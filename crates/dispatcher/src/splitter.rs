use std::collections::HashSet;
use std::net::Ipv4Addr;

use recon_core::config::TaskConfig;
use recon_core::models::{SplitPreview, SplitResult, TaskChunk};
use recon_core::{SchedulerError, SchedulerResult};

/// 单次展开的IP数量默认上限，防止超大CIDR耗尽内存
const MAX_EXPANDED_IPS: usize = 10_000;

/// 分片配置
#[derive(Debug, Clone)]
pub struct ChunkConfig {
    pub max_targets_per_chunk: usize,
    pub enable_chunking: bool,
    pub min_chunk_size: usize,
    pub max_chunk_size: usize,
    /// 目标展开上限
    pub max_expanded_targets: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            max_targets_per_chunk: 30,
            enable_chunking: true,
            min_chunk_size: 10,
            max_chunk_size: 100,
            max_expanded_targets: MAX_EXPANDED_IPS,
        }
    }
}

impl ChunkConfig {
    /// 修正非法取值到可用范围
    fn normalized(mut self) -> Self {
        let defaults = ChunkConfig::default();
        if self.max_targets_per_chunk == 0 {
            self.max_targets_per_chunk = defaults.max_targets_per_chunk;
        }
        if self.min_chunk_size == 0 {
            self.min_chunk_size = defaults.min_chunk_size;
        }
        if self.max_chunk_size == 0 {
            self.max_chunk_size = defaults.max_chunk_size;
        }
        if self.min_chunk_size > self.max_chunk_size {
            self.min_chunk_size = self.max_chunk_size;
        }
        if self.max_expanded_targets == 0 {
            self.max_expanded_targets = defaults.max_expanded_targets;
        }
        self
    }
}

/// 目标展开结果
///
/// 截断与单行解析失败都不是致命错误，部分结果照常返回，
/// 问题以警告形式附带。
#[derive(Debug, Clone, Default)]
pub struct ExpandedTargets {
    pub targets: Vec<String>,
    pub warnings: Vec<String>,
}

impl ExpandedTargets {
    pub fn truncated(&self) -> bool {
        self.warnings.iter().any(|w| w.contains("已截断"))
    }
}

/// 目标展开器，使用默认的展开上限
pub fn expand_targets(spec: &str) -> ExpandedTargets {
    expand_targets_limited(spec, MAX_EXPANDED_IPS)
}

/// 目标展开器
///
/// 输入为按行分隔的目标描述：裸主机/域名、CIDR、IP范围。
/// 输出去重且保持首次出现的顺序。
pub fn expand_targets_limited(spec: &str, max_ips: usize) -> ExpandedTargets {
    let mut result = ExpandedTargets::default();
    let mut seen: HashSet<String> = HashSet::new();

    for (line_no, raw_line) in spec.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if line.contains('/') {
            match expand_cidr(line, max_ips) {
                Ok((ips, truncated)) => {
                    if truncated {
                        result.warnings.push(format!(
                            "行{}: CIDR {} 包含的IP数量过多（>{}），已截断",
                            line_no + 1,
                            line,
                            max_ips
                        ));
                    }
                    push_unique(&mut result.targets, &mut seen, ips);
                }
                Err(e) => result.warnings.push(format!(
                    "行{}: CIDR解析失败 '{}': {}",
                    line_no + 1,
                    line,
                    e
                )),
            }
        } else if let Some((start, end)) = parse_ip_range(line) {
            let (ips, truncated) = expand_ip_range(start, end, max_ips);
            if truncated {
                result.warnings.push(format!(
                    "行{}: IP范围 {} 包含的IP数量过多（>{}），已截断",
                    line_no + 1,
                    line,
                    max_ips
                ));
            }
            push_unique(&mut result.targets, &mut seen, ips);
        } else {
            push_unique(&mut result.targets, &mut seen, vec![line.to_string()]);
        }
    }

    result
}

fn push_unique(targets: &mut Vec<String>, seen: &mut HashSet<String>, batch: Vec<String>) {
    for target in batch {
        if seen.insert(target.clone()) {
            targets.push(target);
        }
    }
}

/// 展开CIDR，剔除网络地址和广播地址
fn expand_cidr(cidr: &str, max_ips: usize) -> Result<(Vec<String>, bool), String> {
    let (addr_part, mask_part) = cidr
        .split_once('/')
        .ok_or_else(|| "缺少掩码".to_string())?;
    let base: Ipv4Addr = addr_part
        .trim()
        .parse()
        .map_err(|_| "无效的IP地址".to_string())?;
    let prefix: u32 = mask_part
        .trim()
        .parse()
        .map_err(|_| "无效的掩码".to_string())?;
    if prefix > 32 {
        return Err("掩码超出范围".to_string());
    }

    let mask: u32 = if prefix == 0 { 0 } else { u32::MAX << (32 - prefix) };
    let network = u32::from(base) & mask;
    let broadcast = network | !mask;

    let total = (broadcast - network) as u64 + 1;
    let truncated = total > max_ips as u64;
    let last = if truncated {
        network + max_ips as u32 - 1
    } else {
        broadcast
    };

    let mut ips: Vec<String> = (network..=last)
        .map(|n| Ipv4Addr::from(n).to_string())
        .collect();

    // /31、/32 没有独立的网络/广播地址，保留全部
    if ips.len() > 2 {
        ips.remove(0);
        if !truncated {
            ips.pop();
        }
    }

    Ok((ips, truncated))
}

fn parse_ip_range(line: &str) -> Option<(Ipv4Addr, Ipv4Addr)> {
    let (start, end) = line.split_once('-')?;
    let start: Ipv4Addr = start.trim().parse().ok()?;
    let end: Ipv4Addr = end.trim().parse().ok()?;
    Some((start, end))
}

fn expand_ip_range(start: Ipv4Addr, end: Ipv4Addr, max_ips: usize) -> (Vec<String>, bool) {
    let (lo, hi) = {
        let (a, b) = (u32::from(start), u32::from(end));
        if a <= b { (a, b) } else { (b, a) }
    };
    let total = (hi - lo) as u64 + 1;
    let truncated = total > max_ips as u64;
    let last = if truncated { lo + max_ips as u32 - 1 } else { hi };
    let ips = (lo..=last).map(|n| Ipv4Addr::from(n).to_string()).collect();
    (ips, truncated)
}

/// 任务拆分器
#[derive(Debug, Clone)]
pub struct TaskSplitter {
    config: ChunkConfig,
}

impl TaskSplitter {
    pub fn new(config: ChunkConfig) -> Self {
        Self {
            config: config.normalized(),
        }
    }

    /// 拆分任务
    ///
    /// 目标无法全部解析时返回部分结果；完全没有可用目标才报错。
    pub fn split_task(
        &self,
        task_id: &str,
        target: &str,
        task_config: &TaskConfig,
    ) -> SchedulerResult<(SplitResult, Vec<String>)> {
        let expanded = expand_targets_limited(target, self.config.max_expanded_targets);
        if expanded.targets.is_empty() {
            return Err(SchedulerError::config_error(
                "target",
                &format!("没有可用目标: {}", expanded.warnings.join("; ")),
            ));
        }

        let total_targets = expanded.targets.len();
        let need_split =
            self.config.enable_chunking && total_targets > self.config.max_targets_per_chunk;
        let recommended_size = self.optimal_chunk_size(total_targets);
        let estimated_time = estimate_execution_time(total_targets, task_config);

        let chunks = if need_split {
            self.create_chunks(task_id, expanded.targets)
        } else {
            vec![TaskChunk {
                index: 0,
                target_count: total_targets,
                targets: expanded.targets,
                chunk_id: task_id.to_string(),
                priority: 1,
            }]
        };

        let result = SplitResult {
            chunk_count: chunks.len(),
            chunks,
            total_targets,
            need_split,
            estimated_time,
            recommended_size,
        };
        Ok((result, expanded.warnings))
    }

    /// 拆分预览，不实际生成分片
    pub fn split_preview(
        &self,
        target: &str,
        task_config: &TaskConfig,
    ) -> SchedulerResult<SplitPreview> {
        let expanded = expand_targets_limited(target, self.config.max_expanded_targets);
        if expanded.targets.is_empty() {
            return Err(SchedulerError::config_error(
                "target",
                &format!("没有可用目标: {}", expanded.warnings.join("; ")),
            ));
        }

        let total_targets = expanded.targets.len();
        let need_split =
            self.config.enable_chunking && total_targets > self.config.max_targets_per_chunk;
        let chunk_size = self.optimal_chunk_size(total_targets);
        let chunk_count = if need_split {
            total_targets.div_ceil(chunk_size)
        } else {
            1
        };

        Ok(SplitPreview {
            total_targets,
            chunk_count,
            chunk_size,
            need_split,
            estimated_time: estimate_execution_time(total_targets, task_config),
            recommended_size: chunk_size,
            max_memory_usage: total_targets as f64 / 1024.0,
            parallel_capacity: parallel_capacity(chunk_count),
        })
    }

    /// 分片大小随目标总量阶梯式增长，控制分片总数
    fn optimal_chunk_size(&self, total_targets: usize) -> usize {
        if total_targets <= self.config.min_chunk_size {
            return total_targets;
        }

        let mut size = if total_targets > 1000 {
            self.config.max_chunk_size
        } else if total_targets > 500 {
            (self.config.max_targets_per_chunk + self.config.max_chunk_size) / 2
        } else {
            self.config.max_targets_per_chunk
        };

        size = size.max(self.config.min_chunk_size);
        size.min(self.config.max_chunk_size)
    }

    fn create_chunks(&self, task_id: &str, targets: Vec<String>) -> Vec<TaskChunk> {
        let chunk_size = self.optimal_chunk_size(targets.len());
        let multiple = targets.len() > chunk_size;
        let mut chunks = Vec::new();

        for batch in targets.chunks(chunk_size) {
            let index = chunks.len();
            let chunk_id = if multiple {
                format!("{}-chunk-{}", task_id, index)
            } else {
                task_id.to_string()
            };
            chunks.push(TaskChunk {
                index,
                target_count: batch.len(),
                targets: batch.to_vec(),
                chunk_id,
                priority: self.chunk_priority(index, batch.len()),
            });
        }
        chunks
    }

    /// 小分片和靠前的分片完成更快，给更高优先级
    fn chunk_priority(&self, index: usize, target_count: usize) -> i32 {
        let mut priority = 1;
        if target_count <= self.config.min_chunk_size {
            priority += 2;
        } else if target_count <= self.config.max_targets_per_chunk {
            priority += 1;
        }
        if index < 3 {
            priority += 1;
        }
        priority
    }
}

/// 预估执行时间（秒），仅用于展示
pub fn estimate_execution_time(target_count: usize, config: &TaskConfig) -> u64 {
    const BASE_SECS_PER_TARGET: f64 = 30.0;
    let mut multiplier = 1.0;
    if config.is_phase_enabled("portscan") {
        multiplier += 0.5;
    }
    if config.is_phase_enabled("fingerprint") {
        multiplier += 0.3;
    }
    if config.is_phase_enabled("pocscan") {
        multiplier += 1.0;
    }
    if config.is_phase_enabled("dirscan") {
        multiplier += 0.8;
    }
    (target_count as f64 * BASE_SECS_PER_TARGET * multiplier) as u64
}

fn parallel_capacity(chunk_count: usize) -> usize {
    if chunk_count <= 5 {
        chunk_count
    } else if chunk_count <= 20 {
        5
    } else {
        10
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_cidr_strips_network_and_broadcast() {
        let expanded = expand_targets("10.0.0.0/30");
        assert_eq!(expanded.targets, vec!["10.0.0.1", "10.0.0.2"]);
        assert!(expanded.warnings.is_empty());
    }

    #[test]
    fn test_expand_slash_32_keeps_single_host() {
        let expanded = expand_targets("192.168.1.5/32");
        assert_eq!(expanded.targets, vec!["192.168.1.5"]);
    }

    #[test]
    fn test_expand_ip_range_inclusive() {
        let expanded = expand_targets("10.0.0.1-10.0.0.3");
        assert_eq!(expanded.targets, vec!["10.0.0.1", "10.0.0.2", "10.0.0.3"]);
    }

    #[test]
    fn test_mixed_spec_with_comments_and_dedup() {
        let expanded = expand_targets("# 内网资产\nexample.com\n10.0.0.1\n10.0.0.1-10.0.0.2\n\nexample.com");
        assert_eq!(
            expanded.targets,
            vec!["example.com", "10.0.0.1", "10.0.0.2"]
        );
    }

    #[test]
    fn test_oversized_cidr_truncates_with_warning() {
        let expanded = expand_targets("10.0.0.0/16");
        assert!(expanded.truncated());
        assert!(expanded.targets.len() <= MAX_EXPANDED_IPS);
        assert!(!expanded.targets.is_empty());
    }

    #[test]
    fn test_invalid_line_is_non_fatal() {
        let expanded = expand_targets("10.0.0.0/99\nexample.com");
        assert_eq!(expanded.targets, vec!["example.com"]);
        assert_eq!(expanded.warnings.len(), 1);
    }

    #[test]
    fn test_no_split_below_threshold() {
        let splitter = TaskSplitter::new(ChunkConfig::default());
        let (result, _) = splitter
            .split_task("t1", "10.0.0.1\n10.0.0.2", &TaskConfig::default())
            .unwrap();
        assert!(!result.need_split);
        assert_eq!(result.chunk_count, 1);
        assert_eq!(result.chunks[0].chunk_id, "t1");
    }

    #[test]
    fn test_split_ids_and_coverage() {
        let splitter = TaskSplitter::new(ChunkConfig {
            max_targets_per_chunk: 1,
            min_chunk_size: 1,
            max_chunk_size: 1,
            ..ChunkConfig::default()
        });
        let (result, _) = splitter
            .split_task("t1", "10.0.0.0/30\nexample.com", &TaskConfig::default())
            .unwrap();
        assert!(result.need_split);
        assert_eq!(result.chunk_count, 3);
        assert_eq!(result.chunks[0].chunk_id, "t1-chunk-0");
        assert_eq!(result.chunks[2].chunk_id, "t1-chunk-2");
        // 分片目标并集等于完整展开
        let all: Vec<&str> = result
            .chunks
            .iter()
            .flat_map(|c| c.targets.iter().map(String::as_str))
            .collect();
        assert_eq!(all, vec!["10.0.0.1", "10.0.0.2", "example.com"]);
    }

    #[test]
    fn test_chunk_size_step_function() {
        let splitter = TaskSplitter::new(ChunkConfig::default());
        assert_eq!(splitter.optimal_chunk_size(5), 5);
        assert_eq!(splitter.optimal_chunk_size(300), 30);
        assert_eq!(splitter.optimal_chunk_size(600), 65);
        assert_eq!(splitter.optimal_chunk_size(2000), 100);
    }

    #[test]
    fn test_chunk_priority_bonuses() {
        let splitter = TaskSplitter::new(ChunkConfig::default());
        // 小而靠前: 1 + 2 + 1
        assert_eq!(splitter.chunk_priority(0, 5), 4);
        // 中等大小靠后: 1 + 1
        assert_eq!(splitter.chunk_priority(10, 20), 2);
        // 大分片靠后: 1
        assert_eq!(splitter.chunk_priority(10, 80), 1);
    }

    #[test]
    fn test_estimate_scales_with_enabled_phases() {
        let base = TaskConfig::default();
        assert_eq!(estimate_execution_time(10, &base), 300);
        let full = TaskConfig::parse(
            r#"{"portscan":{"enable":true},"fingerprint":{"enable":true},"pocscan":{"enable":true},"dirscan":{"enable":true}}"#,
        )
        .unwrap();
        // 30 * 10 * (1 + 0.5 + 0.3 + 1.0 + 0.8)
        assert_eq!(estimate_execution_time(10, &full), 1080);
    }

    #[test]
    fn test_preview_matches_split_decision() {
        let splitter = TaskSplitter::new(ChunkConfig::default());
        let preview = splitter
            .split_preview("10.0.0.0/25", &TaskConfig::default())
            .unwrap();
        // /25 去掉网络和广播后126个目标
        assert_eq!(preview.total_targets, 126);
        assert!(preview.need_split);
        assert_eq!(preview.chunk_count, 126usize.div_ceil(preview.chunk_size));
        assert_eq!(preview.parallel_capacity, 5);
    }

    #[test]
    fn test_empty_spec_is_error() {
        let splitter = TaskSplitter::new(ChunkConfig::default());
        assert!(splitter
            .split_task("t1", "# 全是注释\n\n", &TaskConfig::default())
            .is_err());
    }
}
