//! Kaleb - Rust 业务任务自动化平台
//!
//! 模块划分：
//! - **router**: 任务描述 → 流水线 ID（可替换的分类器）
//! - **pipeline**: 步骤、流水线定义与执行引擎，以及 email / finance / scheduler / document / support 内置流水线
//! - **session**: 会话上下文与有界交互历史
//! - **memory**: 记忆记录、存储后端（内存 / SQLite）、相关性检索与保留策略
//! - **resilience**: 重试退避、滑动窗口限流、主备执行
//! - **integrations**: 外部服务适配器与注册表
//! - **core**: 错误分类与处理、编排器、构建器、健康监控
//! - **batch**: 批处理输入输出
//! - **config**: 应用配置加载（TOML + 环境变量）

pub mod batch;
pub mod config;
pub mod core;
pub mod integrations;
pub mod memory;
pub mod observability;
pub mod pipeline;
pub mod resilience;
pub mod router;
pub mod session;

pub use crate::core::{AgentError, ExecutionResult, Orchestrator, PlatformBuilder, Task, TaskType};
pub use router::{KeywordClassifier, TaskClassifier, TaskRouter};
