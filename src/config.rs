//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `KALEB__*` 覆盖（双下划线表示嵌套，如 `KALEB__RETRY__MAX_RETRIES=5`）。
//! 核心组件只消费这里的值；validate() 失败属于 ConfigurationFailure，启动即终止。

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::core::{AgentError, ErrorKind};

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub retry: RetrySection,
    /// 按资源名配置滑动窗口：[rate_limit.email] window_seconds / capacity
    pub rate_limit: HashMap<String, RateLimitSection>,
    /// 外部服务：[integrations.calendar] enabled / base_url / api_key / timeout_secs
    pub integrations: HashMap<String, IntegrationSection>,
    pub memory: MemorySection,
    pub batch: BatchSection,
    pub health: HealthSection,
    pub logging: LoggingSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    /// 每个会话保留的交互条数
    pub max_history: usize,
    /// 路由未命中时使用的流水线
    pub default_pipeline: String,
    pub session_timeout_secs: u64,
    /// 批处理结果输出目录
    pub output_dir: PathBuf,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            max_history: 100,
            default_pipeline: "support".to_string(),
            session_timeout_secs: 3600,
            output_dir: PathBuf::from("output"),
        }
    }
}

/// 单个调用允许配置的最大重试次数
pub const MAX_RETRIES_LIMIT: u32 = 16;

/// memory.max_age_days 的上限（约一百年）
pub const MAX_AGE_DAYS_LIMIT: u64 = 36_500;

/// [retry] 段：第 k 次重试前等待 backoff_factor × 2^k 秒（单次最多 10 分钟）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_retries: u32,
    pub backoff_factor: f64,
    pub jitter: bool,
    pub retryable: Vec<ErrorKind>,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_factor: 1.0,
            jitter: true,
            retryable: vec![
                ErrorKind::Timeout,
                ErrorKind::ConnectionRefused,
                ErrorKind::RateLimited,
                ErrorKind::ServerError,
            ],
        }
    }
}

impl RetrySection {
    pub fn retryable_set(&self) -> HashSet<ErrorKind> {
        self.retryable.iter().copied().collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitSection {
    pub window_seconds: u64,
    pub capacity: usize,
}

impl RateLimitSection {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }
}

/// 单个外部服务（由 HttpAdapter 承载）
#[derive(Debug, Clone, Deserialize)]
pub struct IntegrationSection {
    #[serde(default)]
    pub enabled: bool,
    pub base_url: String,
    /// 存在时以 Bearer 方式携带
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_integration_timeout")]
    pub timeout_secs: u64,
}

fn default_integration_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MemoryBackend {
    #[default]
    Memory,
    Sqlite,
}

/// [memory] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemorySection {
    /// 每次流水线执行前检索的相关记忆条数
    pub relevance_limit: usize,
    pub backend: MemoryBackend,
    pub db_path: PathBuf,
    /// 只保留最近的 N 条记忆；None 表示不限
    pub max_records: Option<usize>,
    /// 删除早于 N 天的记忆；None 表示不限
    pub max_age_days: Option<u64>,
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            relevance_limit: 5,
            backend: MemoryBackend::Memory,
            db_path: PathBuf::from("data/memory.db"),
            max_records: None,
            max_age_days: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BatchSection {
    pub concurrency: usize,
}

impl Default for BatchSection {
    fn default() -> Self {
        Self { concurrency: 4 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HealthSection {
    pub interval_secs: u64,
}

impl Default for HealthSection {
    fn default() -> Self {
        Self { interval_secs: 30 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// 校验取值；任何一项非法都返回 Configuration 错误
    pub fn validate(&self) -> Result<(), AgentError> {
        if self.app.max_history == 0 {
            return Err(AgentError::Configuration("app.max_history must be > 0".into()));
        }
        if self.app.default_pipeline.trim().is_empty() {
            return Err(AgentError::Configuration("app.default_pipeline is required".into()));
        }
        if !self.retry.backoff_factor.is_finite() || self.retry.backoff_factor < 0.0 {
            return Err(AgentError::Configuration(format!(
                "retry.backoff_factor must be a non-negative number, got {}",
                self.retry.backoff_factor
            )));
        }
        if self.retry.max_retries > MAX_RETRIES_LIMIT {
            return Err(AgentError::Configuration(format!(
                "retry.max_retries must be <= {MAX_RETRIES_LIMIT}, got {}",
                self.retry.max_retries
            )));
        }
        if self.retry.retryable.contains(&ErrorKind::Configuration) {
            return Err(AgentError::Configuration(
                "configuration failures can never be retryable".into(),
            ));
        }
        for (resource, limit) in &self.rate_limit {
            if limit.capacity == 0 || limit.window_seconds == 0 {
                return Err(AgentError::Configuration(format!(
                    "rate_limit.{resource}: capacity and window_seconds must be > 0"
                )));
            }
        }
        for (name, integration) in self.integrations.iter().filter(|(_, i)| i.enabled) {
            if integration.base_url.trim().is_empty() {
                return Err(AgentError::Configuration(format!(
                    "integrations.{name}.base_url is required when enabled"
                )));
            }
        }
        if self.memory.max_records == Some(0) || self.memory.max_age_days == Some(0) {
            return Err(AgentError::Configuration(
                "memory.max_records and memory.max_age_days must be > 0 when set".into(),
            ));
        }
        if self.memory.max_age_days.is_some_and(|d| d > MAX_AGE_DAYS_LIMIT) {
            return Err(AgentError::Configuration(format!(
                "memory.max_age_days must be <= {MAX_AGE_DAYS_LIMIT}"
            )));
        }
        if self.batch.concurrency == 0 {
            return Err(AgentError::Configuration("batch.concurrency must be > 0".into()));
        }
        if self.health.interval_secs == 0 {
            return Err(AgentError::Configuration("health.interval_secs must be > 0".into()));
        }
        Ok(())
    }
}

/// 从 config 目录加载配置，环境变量 KALEB__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml，找到则作为第一源
/// 2. 若传入 config_path，则追加该文件（必须存在）
/// 3. 最后叠加环境变量 KALEB__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, AgentError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default"] {
        if std::path::Path::new(&format!("{name}.toml")).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(path) = config_path {
        builder = builder.add_source(config::File::from(path).required(true));
    }

    builder = builder.add_source(
        config::Environment::with_prefix("KALEB")
            .separator("__")
            .try_parsing(true),
    );

    let cfg: AppConfig = builder.build()?.try_deserialize()?;
    cfg.validate()?;
    Ok(cfg)
}
