//! 错误分类与严重级别
//!
//! 所有组件统一返回 AgentError；ErrorKind 作为可哈希的判别值供重试策略的「可重试集合」使用，
//! Severity 由 ErrorHandler 决定是升级（终止进程）还是随 ExecutionResult 返回给调用方。

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 外部调用失败的细分类型（决定是否可重试）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationKind {
    Timeout,
    ConnectionRefused,
    /// 对端限流（HTTP 429）
    RateLimited,
    /// 5xx
    ServerError,
    /// 除 408/429 之外的 4xx
    ClientError,
    Other,
}

/// 平台内所有失败
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AgentError {
    /// 步骤内部的业务逻辑错误
    #[error("Agent failure: {0}")]
    Agent(String),

    /// 流水线编排错误（未知流水线、步骤定义非法等）
    #[error("Pipeline failure: {0}")]
    Pipeline(String),

    #[error("Integration failure ({kind:?}): {message}")]
    Integration {
        kind: IntegrationKind,
        message: String,
        status_code: Option<u16>,
    },

    /// 配置错误：仅在启动阶段出现，永不重试
    #[error("Configuration failure: {0}")]
    Configuration(String),

    #[error("Memory failure: {0}")]
    Memory(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// 限流器拒绝：快速失败，是否稍后重试由调用方决定
    #[error("Rate limit exceeded for resource: {resource}")]
    RateLimitExceeded { resource: String },

    /// 重试耗尽，包装最后一次失败
    #[error("Retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: Box<AgentError> },
}

/// AgentError 的判别值（不含负载），用于配置可重试集合与日志字段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Agent,
    Pipeline,
    Timeout,
    ConnectionRefused,
    RateLimited,
    ServerError,
    ClientError,
    Integration,
    Configuration,
    Memory,
    SessionNotFound,
    RateLimitExceeded,
    RetriesExhausted,
}

/// 严重级别：Critical 终止进程，Error / Warning 随结果返回
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Error,
    Critical,
}

impl AgentError {
    pub fn integration(kind: IntegrationKind, message: impl Into<String>) -> Self {
        Self::Integration {
            kind,
            message: message.into(),
            status_code: None,
        }
    }

    /// 按 HTTP 状态码翻译外部调用失败：429 限流，408/504 超时，其余 5xx / 4xx 分开
    pub fn from_status(status_code: u16, message: impl Into<String>) -> Self {
        let kind = match status_code {
            429 => IntegrationKind::RateLimited,
            408 | 504 => IntegrationKind::Timeout,
            500..=599 => IntegrationKind::ServerError,
            400..=499 => IntegrationKind::ClientError,
            _ => IntegrationKind::Other,
        };
        Self::Integration {
            kind,
            message: message.into(),
            status_code: Some(status_code),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Agent(_) => ErrorKind::Agent,
            Self::Pipeline(_) => ErrorKind::Pipeline,
            Self::Integration { kind, .. } => match kind {
                IntegrationKind::Timeout => ErrorKind::Timeout,
                IntegrationKind::ConnectionRefused => ErrorKind::ConnectionRefused,
                IntegrationKind::RateLimited => ErrorKind::RateLimited,
                IntegrationKind::ServerError => ErrorKind::ServerError,
                IntegrationKind::ClientError => ErrorKind::ClientError,
                IntegrationKind::Other => ErrorKind::Integration,
            },
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Memory(_) => ErrorKind::Memory,
            Self::SessionNotFound(_) => ErrorKind::SessionNotFound,
            Self::RateLimitExceeded { .. } => ErrorKind::RateLimitExceeded,
            Self::RetriesExhausted { .. } => ErrorKind::RetriesExhausted,
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            Self::Configuration(_) => Severity::Critical,
            Self::RateLimitExceeded { .. } => Severity::Warning,
            _ => Severity::Error,
        }
    }

    /// 属于外部调用一类（含限流拒绝与重试耗尽）
    pub fn is_integration(&self) -> bool {
        matches!(
            self,
            Self::Integration { .. } | Self::RateLimitExceeded { .. } | Self::RetriesExhausted { .. }
        )
    }

    /// 剥掉 RetriesExhausted 包装，返回最初的失败
    pub fn root_cause(&self) -> &AgentError {
        match self {
            Self::RetriesExhausted { last, .. } => last.root_cause(),
            other => other,
        }
    }
}

impl From<rusqlite::Error> for AgentError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Memory(e.to_string())
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(e: serde_json::Error) -> Self {
        Self::Memory(format!("serialization: {e}"))
    }
}

impl From<config::ConfigError> for AgentError {
    fn from(e: config::ConfigError) -> Self {
        Self::Configuration(e.to_string())
    }
}
