//! 流水线步骤
//!
//! 步骤就是满足 `Payload -> Result<Payload, AgentError>` 的闭包，按名注册；
//! 需要访问外部服务的步骤通过 StepContext 里的 AdapterRegistry 调用（已包裹弹性层）。

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;

use crate::core::{AgentError, Payload, Task};
use crate::integrations::AdapterRegistry;
use crate::memory::MemoryRecord;

pub type StepFuture = BoxFuture<'static, Result<Payload, AgentError>>;

type StepFn = dyn Fn(Payload, StepContext) -> StepFuture + Send + Sync;

/// 步骤执行时可见的只读环境（均为快照）
#[derive(Clone)]
pub struct StepContext {
    pub pipeline_id: String,
    pub session_id: String,
    pub task: Arc<Task>,
    /// 执行开始时的会话上下文
    pub context: Arc<Payload>,
    /// 与任务描述相关的历史记忆，按相关度排序
    pub memories: Arc<Vec<MemoryRecord>>,
    pub adapters: Arc<AdapterRegistry>,
}

impl StepContext {
    pub fn new(pipeline_id: impl Into<String>, session_id: impl Into<String>, task: Task) -> Self {
        Self {
            pipeline_id: pipeline_id.into(),
            session_id: session_id.into(),
            task: Arc::new(task),
            context: Arc::new(Payload::new()),
            memories: Arc::new(Vec::new()),
            adapters: Arc::new(AdapterRegistry::default()),
        }
    }

    pub fn with_context(mut self, context: Payload) -> Self {
        self.context = Arc::new(context);
        self
    }

    pub fn with_memories(mut self, memories: Vec<MemoryRecord>) -> Self {
        self.memories = Arc::new(memories);
        self
    }

    pub fn with_adapters(mut self, adapters: Arc<AdapterRegistry>) -> Self {
        self.adapters = adapters;
        self
    }
}

#[derive(Clone)]
pub struct Step {
    name: String,
    func: Arc<StepFn>,
}

impl Step {
    /// 异步步骤
    pub fn new<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Payload, StepContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Payload, AgentError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(move |payload, ctx| Box::pin(f(payload, ctx))),
        }
    }

    /// 纯同步变换
    pub fn sync<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Payload, &StepContext) -> Result<Payload, AgentError> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Self::new(name, move |payload, ctx| {
            let f = f.clone();
            async move { f(payload, &ctx) }
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 执行步骤
    ///
    /// 配置错误只属于启动阶段；步骤在运行期返回的 Configuration 按 Pipeline 失败上报，
    /// 不会作为 Critical 从流水线中途冒出。
    pub async fn run(&self, payload: Payload, ctx: StepContext) -> Result<Payload, AgentError> {
        (self.func)(payload, ctx).await.map_err(|err| match err {
            AgentError::Configuration(msg) => {
                AgentError::Pipeline(format!("step {} hit a configuration error at runtime: {msg}", self.name))
            }
            other => other,
        })
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step").field("name", &self.name).finish()
    }
}

/// 取 payload 中的字符串字段，缺失时为空串
pub fn str_field<'a>(payload: &'a Payload, key: &str) -> &'a str {
    payload.get(key).and_then(|v| v.as_str()).unwrap_or_default()
}
