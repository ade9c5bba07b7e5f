//! 核心层：错误分类与处理、任务与结果、编排、构建、健康监控

pub mod builder;
pub mod error;
pub mod handler;
pub mod health;
pub mod orchestrator;
pub mod task;

pub use builder::{build_orchestrator, PlatformBuilder};
pub use error::{AgentError, ErrorKind, IntegrationKind, Severity};
pub use handler::{ErrorHandler, HandlingAction};
pub use health::{HealthMonitor, Maintenance, StatusProvider, SystemStatus};
pub use orchestrator::Orchestrator;
pub use task::{ErrorDescriptor, ExecutionResult, ExecutionStatus, Interaction, Payload, Task, TaskType};
