//! 任务、交互与执行结果
//!
//! Task 在派发后不可变；ExecutionResult 每个任务只产生一次，随后折叠进 Interaction 与 MemoryRecord。

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::{AgentError, ErrorKind, Severity};

/// 步骤之间传递的累积映射
pub type Payload = Map<String, Value>;

/// 任务类型，同时也是内置流水线的 ID（小写名）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Email,
    Finance,
    Scheduler,
    Document,
    Support,
}

impl TaskType {
    pub const ALL: [TaskType; 5] = [
        TaskType::Email,
        TaskType::Finance,
        TaskType::Scheduler,
        TaskType::Document,
        TaskType::Support,
    ];

    pub fn pipeline_id(&self) -> &'static str {
        match self {
            TaskType::Email => "email",
            TaskType::Finance => "finance",
            TaskType::Scheduler => "scheduler",
            TaskType::Document => "document",
            TaskType::Support => "support",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.pipeline_id())
    }
}

impl FromStr for TaskType {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskType::ALL
            .into_iter()
            .find(|t| t.pipeline_id() == s.trim().to_lowercase())
            .ok_or_else(|| AgentError::Pipeline(format!("unknown task type: {s}")))
    }
}

/// 一次请求对应的任务
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub description: String,
    pub declared_type: Option<TaskType>,
    pub payload: Payload,
    pub created_at: DateTime<Utc>,
}

impl Task {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            id: format!("task_{}", uuid::Uuid::new_v4()),
            description: description.into(),
            declared_type: None,
            payload: Payload::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_type(mut self, task_type: TaskType) -> Self {
        self.declared_type = Some(task_type);
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    /// 流水线的初始映射：任务自带的 payload 加上 task 描述
    pub fn seed_payload(&self) -> Payload {
        let mut seed = self.payload.clone();
        seed.insert("task".to_string(), Value::String(self.description.clone()));
        seed.insert("task_id".to_string(), Value::String(self.id.clone()));
        seed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Success,
    Error,
}

/// 可序列化的错误描述（嵌入 ExecutionResult）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDescriptor {
    pub kind: ErrorKind,
    pub message: String,
    pub severity: Severity,
    /// 出错位置等诊断信息（如 pipeline、step）
    pub context: Payload,
}

impl ErrorDescriptor {
    pub fn from_error(err: &AgentError, context: Payload) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
            severity: err.severity(),
            context,
        }
    }
}

/// 流水线执行结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    pub pipeline_id: String,
    pub payload: Payload,
    pub error: Option<ErrorDescriptor>,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
}

impl ExecutionResult {
    pub fn success(pipeline_id: impl Into<String>, payload: Payload, duration: Duration) -> Self {
        Self {
            status: ExecutionStatus::Success,
            pipeline_id: pipeline_id.into(),
            payload,
            error: None,
            duration,
        }
    }

    pub fn failure(
        pipeline_id: impl Into<String>,
        payload: Payload,
        error: ErrorDescriptor,
        duration: Duration,
    ) -> Self {
        Self {
            status: ExecutionStatus::Error,
            pipeline_id: pipeline_id.into(),
            payload,
            error: Some(error),
            duration,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }
}

/// 会话历史中的一条交互，追加后不可变
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub task: Task,
    pub result: ExecutionResult,
    pub timestamp: DateTime<Utc>,
    pub component_name: String,
}

impl Interaction {
    pub fn new(task: Task, result: ExecutionResult, component_name: impl Into<String>) -> Self {
        Self {
            task,
            result,
            timestamp: Utc::now(),
            component_name: component_name.into(),
        }
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
