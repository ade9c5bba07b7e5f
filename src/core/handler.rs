//! 统一错误处理策略
//!
//! 每个失败都经过 ErrorHandler：带完整上下文写日志、判定严重级别，
//! Critical 升级给进程（调用方应停止），Error / Warning 转为 ErrorDescriptor 随结果返回。
//! 不存在「静默吞掉」的分支。

use crate::core::{AgentError, ErrorDescriptor, Payload, Severity};

/// 处理策略给出的动作
#[derive(Debug, Clone, PartialEq)]
pub enum HandlingAction {
    /// 致命：交由进程终止（启动期配置错误）
    Escalate(AgentError),
    /// 作为 ExecutionResult 的 error 字段返回给调用方
    Report(ErrorDescriptor),
}

impl HandlingAction {
    /// 返回描述；Escalate 也能降级成描述，用于写入结果后再由上层退出
    pub fn descriptor(&self, context: Payload) -> ErrorDescriptor {
        match self {
            HandlingAction::Report(d) => d.clone(),
            HandlingAction::Escalate(err) => ErrorDescriptor::from_error(err, context),
        }
    }

    pub fn is_escalation(&self) -> bool {
        matches!(self, HandlingAction::Escalate(_))
    }
}

#[derive(Debug, Default, Clone)]
pub struct ErrorHandler;

impl ErrorHandler {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, err: &AgentError, context: Payload) -> HandlingAction {
        let ctx = serde_json::Value::Object(context.clone()).to_string();
        match err.severity() {
            Severity::Critical => {
                tracing::error!(kind = ?err.kind(), context = %ctx, "critical failure: {err}");
                HandlingAction::Escalate(err.clone())
            }
            Severity::Error => {
                tracing::error!(kind = ?err.kind(), context = %ctx, "{err}");
                HandlingAction::Report(ErrorDescriptor::from_error(err, context))
            }
            Severity::Warning => {
                tracing::warn!(kind = ?err.kind(), context = %ctx, "{err}");
                HandlingAction::Report(ErrorDescriptor::from_error(err, context))
            }
        }
    }
}
