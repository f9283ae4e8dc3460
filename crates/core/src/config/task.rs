use serde::{Deserialize, Serialize};

use crate::errors::{SchedulerError, SchedulerResult};

/// 任务配置
///
/// 每个阶段一个可选子配置；字段缺省时在 `apply_defaults` 中补全，
/// 未知字段在解析时直接拒绝而不是静默忽略。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub portscan: Option<PortScanConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub portidentify: Option<PortIdentifyConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domainscan: Option<DomainScanConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<FingerprintConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pocscan: Option<PocScanConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dirscan: Option<DirScanConfig>,
}

/// 端口扫描配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PortScanConfig {
    #[serde(default)]
    pub enable: bool,
    /// 扫描工具: tcp, masscan, nmap, naabu
    #[serde(default)]
    pub tool: String,
    #[serde(default)]
    pub ports: String,
    #[serde(default)]
    pub rate: i64,
    /// 端口扫描超时(秒)
    #[serde(default)]
    pub timeout: i64,
    /// 开放端口数量阈值，超过则判定为防火墙干扰并过滤该主机
    #[serde(default)]
    pub port_threshold: i64,
    #[serde(default)]
    pub skip_host_discovery: bool,
    #[serde(default)]
    pub exclude_hosts: String,
}

/// 端口服务识别配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PortIdentifyConfig {
    #[serde(default)]
    pub enable: bool,
    /// 识别工具: nmap, fingerprintx
    #[serde(default)]
    pub tool: String,
    /// 单个主机超时(秒)
    #[serde(default)]
    pub timeout: i64,
    /// 0 表示使用扫描器自身的默认并发
    #[serde(default)]
    pub concurrency: i64,
    #[serde(default)]
    pub args: String,
}

/// 子域名枚举配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DomainScanConfig {
    #[serde(default)]
    pub enable: bool,
    #[serde(default)]
    pub subfinder: bool,
    #[serde(default)]
    pub timeout: i64,
    /// 最大枚举时间(分钟)
    #[serde(default)]
    pub max_enumeration_time: i64,
    #[serde(default)]
    pub threads: i64,
    #[serde(default)]
    pub rate_limit: i64,
    #[serde(default)]
    pub remove_wildcard: bool,
    #[serde(default)]
    pub resolve_dns: bool,
    /// DNS解析并发数
    #[serde(default)]
    pub concurrent: i64,
    #[serde(default)]
    pub subdomain_dict_ids: Vec<String>,
}

/// 指纹识别配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FingerprintConfig {
    #[serde(default)]
    pub enable: bool,
    /// 探测工具: httpx, builtin
    #[serde(default)]
    pub tool: String,
    #[serde(default)]
    pub icon_hash: bool,
    #[serde(default)]
    pub screenshot: bool,
    #[serde(default)]
    pub active_scan: bool,
    /// 主动探测单请求超时(秒)
    #[serde(default)]
    pub active_timeout: i64,
    /// 总超时(秒)
    #[serde(default)]
    pub timeout: i64,
    /// 单个目标超时(秒)
    #[serde(default)]
    pub target_timeout: i64,
    #[serde(default)]
    pub concurrency: i64,
}

/// POC漏洞扫描配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PocScanConfig {
    #[serde(default)]
    pub enable: bool,
    #[serde(default)]
    pub use_nuclei: bool,
    /// 基于指纹结果自动选择模板
    #[serde(default)]
    pub automatic_scan: bool,
    /// 严重级别过滤，逗号分隔
    #[serde(default)]
    pub severity: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub exclude_tags: Vec<String>,
    #[serde(default)]
    pub rate_limit: i64,
    #[serde(default)]
    pub concurrency: i64,
    /// 单个目标超时(秒)
    #[serde(default)]
    pub target_timeout: i64,
    #[serde(default)]
    pub nuclei_template_ids: Vec<String>,
    #[serde(default)]
    pub custom_poc_ids: Vec<String>,
}

/// 目录扫描配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DirScanConfig {
    #[serde(default)]
    pub enable: bool,
    #[serde(default)]
    pub dict_ids: Vec<String>,
    #[serde(default)]
    pub threads: i64,
    /// 单个请求超时(秒)
    #[serde(default)]
    pub timeout: i64,
    #[serde(default)]
    pub status_codes: Vec<i64>,
    #[serde(default)]
    pub extensions: Vec<String>,
    #[serde(default)]
    pub follow_redirect: bool,
}

impl TaskConfig {
    /// 从JSON解析任务配置并补全默认值
    pub fn parse(raw: &str) -> SchedulerResult<Self> {
        let mut config: TaskConfig = serde_json::from_str(raw).map_err(|e| {
            SchedulerError::Configuration {
                field: "taskConfig".to_string(),
                message: e.to_string(),
            }
        })?;
        config.apply_defaults();
        config.validate()?;
        Ok(config)
    }

    /// 各阶段是否启用
    pub fn is_phase_enabled(&self, phase: &str) -> bool {
        match phase {
            "domainscan" => self.domainscan.as_ref().is_some_and(|c| c.enable),
            "portscan" => self.portscan.as_ref().is_some_and(|c| c.enable),
            "portidentify" => self.portidentify.as_ref().is_some_and(|c| c.enable),
            "fingerprint" => self.fingerprint.as_ref().is_some_and(|c| c.enable),
            "dirscan" => self.dirscan.as_ref().is_some_and(|c| c.enable),
            "pocscan" => self.pocscan.as_ref().is_some_and(|c| c.enable),
            _ => false,
        }
    }

    /// 为缺省字段补全默认值
    ///
    /// 只填零值，负数原样保留交由 `validate` 拒绝。
    pub fn apply_defaults(&mut self) {
        if let Some(c) = self.portscan.as_mut() {
            if c.tool.is_empty() {
                c.tool = "naabu".to_string();
            }
            if c.ports.is_empty() {
                c.ports = "80,443,8080".to_string();
            }
            if c.rate == 0 {
                c.rate = 1000;
            }
            if c.timeout == 0 {
                c.timeout = 5;
            }
            if c.port_threshold == 0 {
                c.port_threshold = 100;
            }
        }
        if let Some(c) = self.portidentify.as_mut() {
            if c.timeout == 0 {
                c.timeout = 30;
            }
            // concurrency 保持 0，由扫描器决定默认并发
        }
        if let Some(c) = self.domainscan.as_mut() {
            if c.timeout == 0 {
                c.timeout = 30;
            }
            if c.max_enumeration_time == 0 {
                c.max_enumeration_time = 10;
            }
            if c.threads == 0 {
                c.threads = 10;
            }
            if c.concurrent == 0 {
                c.concurrent = 100;
            }
        }
        if let Some(c) = self.fingerprint.as_mut() {
            if c.tool.is_empty() {
                c.tool = "builtin".to_string();
            }
            if c.timeout == 0 {
                c.timeout = 300;
            }
            if c.target_timeout == 0 {
                c.target_timeout = 30;
            }
            if c.concurrency == 0 {
                c.concurrency = 10;
            }
            if c.active_timeout == 0 {
                c.active_timeout = 10;
            }
        }
        if let Some(c) = self.pocscan.as_mut() {
            if c.severity.is_empty() {
                c.severity = "critical,high,medium".to_string();
            }
            if c.rate_limit == 0 {
                c.rate_limit = 150;
            }
            if c.concurrency == 0 {
                c.concurrency = 25;
            }
            if c.target_timeout == 0 {
                c.target_timeout = 600;
            }
        }
        if let Some(c) = self.dirscan.as_mut() {
            if c.threads == 0 {
                c.threads = 10;
            }
            if c.timeout == 0 {
                c.timeout = 10;
            }
            if c.status_codes.is_empty() {
                c.status_codes = vec![200, 201, 301, 302, 307, 401, 403];
            }
        }
    }

    /// 校验启用阶段的配置合法性
    pub fn validate(&self) -> SchedulerResult<()> {
        fn non_negative(field: &str, value: i64) -> SchedulerResult<()> {
            if value < 0 {
                return Err(SchedulerError::Configuration {
                    field: field.to_string(),
                    message: format!("不能为负数, 当前值 {}", value),
                });
            }
            Ok(())
        }
        fn one_of(field: &str, value: &str, allowed: &[&str]) -> SchedulerResult<()> {
            if value.is_empty() || allowed.contains(&value) {
                return Ok(());
            }
            Err(SchedulerError::Configuration {
                field: field.to_string(),
                message: format!("必须是 [{}] 之一, 当前值 {}", allowed.join(", "), value),
            })
        }

        if let Some(c) = self.portscan.as_ref().filter(|c| c.enable) {
            one_of("portscan.tool", &c.tool, &["tcp", "masscan", "nmap", "naabu"])?;
            non_negative("portscan.rate", c.rate)?;
            non_negative("portscan.timeout", c.timeout)?;
            non_negative("portscan.portThreshold", c.port_threshold)?;
        }
        if let Some(c) = self.portidentify.as_ref().filter(|c| c.enable) {
            one_of("portidentify.tool", &c.tool, &["nmap", "fingerprintx"])?;
            non_negative("portidentify.timeout", c.timeout)?;
            non_negative("portidentify.concurrency", c.concurrency)?;
        }
        if let Some(c) = self.domainscan.as_ref().filter(|c| c.enable) {
            non_negative("domainscan.timeout", c.timeout)?;
            non_negative("domainscan.maxEnumerationTime", c.max_enumeration_time)?;
            non_negative("domainscan.threads", c.threads)?;
            non_negative("domainscan.rateLimit", c.rate_limit)?;
            non_negative("domainscan.concurrent", c.concurrent)?;
        }
        if let Some(c) = self.fingerprint.as_ref().filter(|c| c.enable) {
            one_of("fingerprint.tool", &c.tool, &["httpx", "builtin"])?;
            non_negative("fingerprint.timeout", c.timeout)?;
            non_negative("fingerprint.activeTimeout", c.active_timeout)?;
            non_negative("fingerprint.concurrency", c.concurrency)?;
            non_negative("fingerprint.targetTimeout", c.target_timeout)?;
        }
        if let Some(c) = self.pocscan.as_ref().filter(|c| c.enable) {
            non_negative("pocscan.rateLimit", c.rate_limit)?;
            non_negative("pocscan.concurrency", c.concurrency)?;
            non_negative("pocscan.targetTimeout", c.target_timeout)?;
        }
        if let Some(c) = self.dirscan.as_ref().filter(|c| c.enable) {
            non_negative("dirscan.threads", c.threads)?;
            non_negative("dirscan.timeout", c.timeout)?;
            for code in &c.status_codes {
                non_negative("dirscan.statusCodes", *code)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_applies_defaults() {
        let config = TaskConfig::parse(r#"{"portscan":{"enable":true}}"#).unwrap();
        let portscan = config.portscan.unwrap();
        assert_eq!(portscan.tool, "naabu");
        assert_eq!(portscan.ports, "80,443,8080");
        assert_eq!(portscan.rate, 1000);
        assert_eq!(portscan.timeout, 5);
    }

    #[test]
    fn test_parse_rejects_unknown_field() {
        let err = TaskConfig::parse(r#"{"portscan":{"enable":true,"speeed":100}}"#).unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::Configuration { field, .. } if field == "taskConfig"
        ));
    }

    #[test]
    fn test_parse_rejects_negative_numeric() {
        // 负数不会被默认值悄悄覆盖
        let err = TaskConfig::parse(r#"{"portscan":{"enable":true,"rate":-5}}"#).unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::Configuration { field, .. } if field == "portscan.rate"
        ));
        let err =
            TaskConfig::parse(r#"{"pocscan":{"enable":true,"concurrency":-1}}"#).unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::Configuration { field, .. } if field == "pocscan.concurrency"
        ));
    }

    #[test]
    fn test_negative_rate_rejected() {
        let mut config = TaskConfig::default();
        config.portscan = Some(PortScanConfig {
            enable: true,
            tool: "naabu".to_string(),
            rate: -1,
            ..Default::default()
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_tool_rejected() {
        let mut config = TaskConfig::default();
        config.portscan = Some(PortScanConfig {
            enable: true,
            tool: "zmap".to_string(),
            ..Default::default()
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_poc_and_dir_defaults() {
        let config =
            TaskConfig::parse(r#"{"pocscan":{"enable":true},"dirscan":{"enable":true}}"#).unwrap();
        let poc = config.pocscan.unwrap();
        assert_eq!(poc.concurrency, 25);
        assert_eq!(poc.rate_limit, 150);
        assert_eq!(poc.severity, "critical,high,medium");
        let dir = config.dirscan.unwrap();
        assert_eq!(dir.status_codes, vec![200, 201, 301, 302, 307, 401, 403]);
    }

    #[test]
    fn test_phase_enabled_requires_flag() {
        let config = TaskConfig::parse(r#"{"portscan":{"enable":false}}"#).unwrap();
        assert!(!config.is_phase_enabled("portscan"));
        assert!(!config.is_phase_enabled("pocscan"));
        let config = TaskConfig::parse(r#"{"fingerprint":{"enable":true}}"#).unwrap();
        assert!(config.is_phase_enabled("fingerprint"));
    }
}
