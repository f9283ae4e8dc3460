use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub redis: RedisConfig,
    pub dispatcher: DispatcherConfig,
    pub worker: WorkerConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: String,
    pub connection_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    pub enabled: bool,
    /// 恢复扫描间隔(秒)
    pub recovery_scan_interval_seconds: u64,
    /// 任务执行超时(秒)，回执超过该时长未更新即判定失联
    pub task_timeout_seconds: u64,
    pub max_retries: u32,
    /// Worker负载缓存TTL(秒)
    pub worker_cache_ttl_seconds: u64,
    /// 目标展开上限
    pub max_expanded_targets: usize,
    /// 单分片最大目标数
    pub max_targets_per_chunk: usize,
    /// 触发拆分的最小目标数
    pub min_targets_for_split: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub enabled: bool,
    /// 为空时使用主机名
    pub worker_name: String,
    /// 自适应调节的基准并发
    pub base_concurrency: usize,
    pub heartbeat_interval_seconds: u64,
    /// 任务拉取间隔下限(毫秒)
    pub min_pull_interval_ms: u64,
    /// 任务拉取间隔上限(毫秒)
    pub max_pull_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    pub level: String,
    /// pretty 或 json
    pub format: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            redis: RedisConfig {
                url: "redis://127.0.0.1:6379".to_string(),
                connection_timeout_seconds: 5,
            },
            dispatcher: DispatcherConfig {
                enabled: true,
                recovery_scan_interval_seconds: 30,
                task_timeout_seconds: 600,
                max_retries: 3,
                worker_cache_ttl_seconds: 5,
                max_expanded_targets: 10_000,
                max_targets_per_chunk: 100,
                min_targets_for_split: 10,
            },
            worker: WorkerConfig {
                enabled: true,
                worker_name: String::new(),
                base_concurrency: 5,
                heartbeat_interval_seconds: 10,
                min_pull_interval_ms: 1_000,
                max_pull_interval_ms: 30_000,
            },
            log: LogConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        }
    }
}

impl AppConfig {
    /// 加载配置
    ///
    /// 优先使用显式路径，其次按默认路径查找；都不存在时使用内置默认值。
    /// 环境变量 `RECON_*` 可覆盖任意字段，如 `RECON_REDIS__URL`。
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if !Path::new(path).exists() {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        } else {
            let default_paths = ["config/recon.toml", "recon.toml", "/etc/recon/config.toml"];
            if let Some(path) = default_paths.iter().find(|p| Path::new(p).exists()) {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                let defaults = AppConfig::default();
                let serialized =
                    toml::to_string(&defaults).context("序列化默认配置失败")?;
                builder = builder
                    .add_source(File::from_str(&serialized, FileFormat::Toml));
            }
        }

        let config: AppConfig = builder
            .add_source(Environment::with_prefix("RECON").separator("__"))
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("解析配置失败")?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.redis.url.is_empty() {
            anyhow::bail!("redis.url 不能为空");
        }
        if self.dispatcher.max_targets_per_chunk == 0 {
            anyhow::bail!("dispatcher.max_targets_per_chunk 必须大于0");
        }
        if self.dispatcher.max_expanded_targets == 0 {
            anyhow::bail!("dispatcher.max_expanded_targets 必须大于0");
        }
        if self.worker.base_concurrency == 0 {
            anyhow::bail!("worker.base_concurrency 必须大于0");
        }
        if self.worker.min_pull_interval_ms > self.worker.max_pull_interval_ms {
            anyhow::bail!("worker.min_pull_interval_ms 不能大于 max_pull_interval_ms");
        }
        match self.log.format.as_str() {
            "pretty" | "json" => {}
            other => anyhow::bail!("log.format 必须是 pretty 或 json, 当前值 {}", other),
        }
        Ok(())
    }

    /// Worker名称，缺省取主机名
    pub fn resolve_worker_name(&self) -> String {
        if !self.worker.worker_name.is_empty() {
            return self.worker.worker_name.clone();
        }
        hostname_or_fallback()
    }
}

fn hostname_or_fallback() -> String {
    match hostname::get() {
        Ok(name) => name.to_string_lossy().into_owned(),
        Err(_) => "worker-unknown".to_string(),
    }
}
