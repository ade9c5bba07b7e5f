//! 流水线执行引擎
//!
//! process 在累积的 payload 上按顺序执行步骤，任一步骤失败立即停止，结果中保留失败前的 payload。
//! 引擎内部不做重试（重试只在弹性层）。步骤全部结束后才产生副作用，且每次调用恰好一次：
//! 追加 Interaction → 更新 `last_<pipeline>_result` → 写入 MemoryRecord。
//! 记忆记录最后写，内容取自最终结果；会话写入失败时记录的是那次失败。
//! 调用方在此之前放弃（丢弃 future）不会留下半条记忆。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;

use crate::core::{AgentError, ErrorDescriptor, ErrorHandler, ExecutionResult, Interaction, Payload, Task};
use crate::integrations::AdapterRegistry;
use crate::memory::{MemoryRecord, MemoryRetriever};
use crate::pipeline::{PipelineDefinition, StepContext};
use crate::session::ContextManager;

/// 步骤可在 payload 中写入 tags（字符串数组），随记忆记录一起保存
pub const TAGS_KEY: &str = "tags";

pub struct PipelineEngine {
    pipelines: HashMap<String, Arc<PipelineDefinition>>,
    context: Arc<ContextManager>,
    memory: Arc<MemoryRetriever>,
    adapters: Arc<AdapterRegistry>,
    handler: ErrorHandler,
    relevance_limit: usize,
}

impl PipelineEngine {
    pub fn new(
        context: Arc<ContextManager>,
        memory: Arc<MemoryRetriever>,
        adapters: Arc<AdapterRegistry>,
    ) -> Self {
        Self {
            pipelines: HashMap::new(),
            context,
            memory,
            adapters,
            handler: ErrorHandler::new(),
            relevance_limit: 5,
        }
    }

    pub fn with_relevance_limit(mut self, limit: usize) -> Self {
        self.relevance_limit = limit;
        self
    }

    /// 注册流水线；ID 重复返回 Pipeline 错误
    pub fn register(&mut self, pipeline: PipelineDefinition) -> Result<(), AgentError> {
        let id = pipeline.id().to_string();
        if self.pipelines.contains_key(&id) {
            return Err(AgentError::Pipeline(format!("pipeline {id} already registered")));
        }
        tracing::debug!(pipeline = %id, steps = ?pipeline.step_names(), "pipeline registered");
        self.pipelines.insert(id, Arc::new(pipeline));
        Ok(())
    }

    pub fn has_pipeline(&self, pipeline_id: &str) -> bool {
        self.pipelines.contains_key(pipeline_id)
    }

    pub fn pipeline_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.pipelines.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn pipeline_count(&self) -> usize {
        self.pipelines.len()
    }

    pub fn context_manager(&self) -> &Arc<ContextManager> {
        &self.context
    }

    pub fn memory(&self) -> &Arc<MemoryRetriever> {
        &self.memory
    }

    pub fn adapters(&self) -> &Arc<AdapterRegistry> {
        &self.adapters
    }

    /// 在 session_id 对应的会话中执行任务；会话必须已存在
    ///
    /// 任何失败都以 status=error 的结果返回，不会向外抛出。
    pub async fn process(&self, pipeline_id: &str, task: &Task, session_id: &str) -> ExecutionResult {
        let start = Instant::now();
        let seed = task.seed_payload();

        let context_snapshot = match self.context.get_context(session_id).await {
            Ok(ctx) => ctx,
            Err(err) => {
                // 会话不存在时无处追加历史，直接返回
                let descriptor = self.describe(&err, diag(pipeline_id, None, session_id, task));
                return ExecutionResult::failure(pipeline_id, seed, descriptor, start.elapsed());
            }
        };

        let (payload, outcome) = self
            .run_steps(pipeline_id, task, session_id, &context_snapshot, seed)
            .await;

        let mut result = match outcome {
            Ok(()) => ExecutionResult::success(pipeline_id, payload, start.elapsed()),
            Err((step, err)) => {
                let descriptor = self.describe(&err, diag(pipeline_id, step.as_deref(), session_id, task));
                ExecutionResult::failure(pipeline_id, payload, descriptor, start.elapsed())
            }
        };

        if let Err(err) = self.record_session(pipeline_id, task, session_id, &result).await {
            let descriptor = self.describe(&err, diag(pipeline_id, None, session_id, task));
            result = ExecutionResult::failure(pipeline_id, result.payload, descriptor, result.duration);
        }
        if let Err(err) = self.remember(pipeline_id, task, session_id, &context_snapshot, &result) {
            let descriptor = self.describe(&err, diag(pipeline_id, None, session_id, task));
            result = ExecutionResult::failure(pipeline_id, result.payload, descriptor, result.duration);
        }

        tracing::info!(
            pipeline = %pipeline_id,
            session_id = %session_id,
            status = ?result.status,
            duration_ms = result.duration.as_millis() as u64,
            "pipeline finished"
        );
        result
    }

    fn describe(&self, err: &AgentError, ctx: Payload) -> ErrorDescriptor {
        self.handler.handle(err, ctx.clone()).descriptor(ctx)
    }

    /// 返回最终（或失败前）的 payload，以及失败的步骤名与错误
    async fn run_steps(
        &self,
        pipeline_id: &str,
        task: &Task,
        session_id: &str,
        context_snapshot: &Payload,
        seed: Payload,
    ) -> (Payload, Result<(), (Option<String>, AgentError)>) {
        let Some(pipeline) = self.pipelines.get(pipeline_id).cloned() else {
            let err = AgentError::Pipeline(format!("unknown pipeline: {pipeline_id}"));
            return (seed, Err((None, err)));
        };

        let memories = match self.memory.search(&task.description, self.relevance_limit) {
            Ok(m) => m,
            Err(err) => return (seed, Err((None, err))),
        };

        let ctx = StepContext::new(pipeline_id, session_id, task.clone())
            .with_context(context_snapshot.clone())
            .with_memories(memories)
            .with_adapters(self.adapters.clone());

        let mut payload = seed;
        for step in pipeline.steps() {
            tracing::debug!(pipeline = %pipeline_id, step = %step.name(), "step start");
            match step.run(payload.clone(), ctx.clone()).await {
                Ok(next) => payload = next,
                Err(err) => return (payload, Err((Some(step.name().to_string()), err))),
            }
        }
        (payload, Ok(()))
    }

    async fn record_session(
        &self,
        pipeline_id: &str,
        task: &Task,
        session_id: &str,
        result: &ExecutionResult,
    ) -> Result<(), AgentError> {
        self.context
            .add_to_history(Interaction::new(task.clone(), result.clone(), pipeline_id), session_id)
            .await?;
        self.context
            .update_context(
                format!("last_{pipeline_id}_result"),
                Value::Object(result.payload.clone()),
                session_id,
            )
            .await
    }

    fn remember(
        &self,
        pipeline_id: &str,
        task: &Task,
        session_id: &str,
        context_snapshot: &Payload,
        result: &ExecutionResult,
    ) -> Result<(), AgentError> {
        let status_tag = if result.is_success() { "success" } else { "error" };
        let step_tags = result
            .payload
            .get(TAGS_KEY)
            .and_then(Value::as_array)
            .map(|tags| tags.iter().filter_map(Value::as_str).map(str::to_string).collect::<Vec<_>>())
            .unwrap_or_default();
        let record = MemoryRecord::new(pipeline_id, session_id, task, result, context_snapshot)
            .with_tag(pipeline_id)
            .with_tag(status_tag)
            .with_tags(step_tags);
        self.memory.remember(record).map(|_| ())
    }
}

fn diag(pipeline_id: &str, step: Option<&str>, session_id: &str, task: &Task) -> Payload {
    let mut ctx = Payload::new();
    ctx.insert("pipeline".into(), Value::from(pipeline_id));
    if let Some(step) = step {
        ctx.insert("step".into(), Value::from(step));
    }
    ctx.insert("session_id".into(), Value::from(session_id));
    ctx.insert("task_id".into(), Value::from(task.id.as_str()));
    ctx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ErrorKind, ExecutionStatus, IntegrationKind};
    use crate::memory::{InMemoryStore, MemoryFilter};
    use crate::pipeline::PipelineBuilder;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    fn engine() -> PipelineEngine {
        PipelineEngine::new(
            Arc::new(ContextManager::new(100, 3600)),
            Arc::new(MemoryRetriever::new(Arc::new(InMemoryStore::new()))),
            Arc::new(AdapterRegistry::default()),
        )
    }

    fn counting_step(counter: Arc<AtomicUsize>, key: &'static str) -> impl Fn(Payload, &StepContext) -> Result<Payload, AgentError> {
        move |mut p: Payload, _: &StepContext| {
            counter.fetch_add(1, Ordering::SeqCst);
            p.insert(key.into(), Value::Bool(true));
            Ok(p)
        }
    }

    #[tokio::test]
    async fn test_short_circuit_keeps_partial_payload() {
        let calls: Vec<Arc<AtomicUsize>> = (0..4).map(|_| Arc::new(AtomicUsize::new(0))).collect();
        let second = calls[1].clone();
        let pipeline = PipelineBuilder::new("four")
            .then_sync("one", counting_step(calls[0].clone(), "one"))
            .then_sync("two", move |_, _| {
                second.fetch_add(1, Ordering::SeqCst);
                Err(AgentError::integration(IntegrationKind::Timeout, "calendar timed out"))
            })
            .then_sync("three", counting_step(calls[2].clone(), "three"))
            .then_sync("four", counting_step(calls[3].clone(), "four"))
            .build()
            .unwrap();

        let mut engine = engine();
        engine.register(pipeline).unwrap();
        let sid = engine.context_manager().create_session(None).await;
        let task = Task::new("book a room");

        let result = engine.process("four", &task, &sid).await;
        assert_eq!(result.status, ExecutionStatus::Error);
        assert!(result.payload.contains_key("one"));
        assert!(!result.payload.contains_key("three"));
        let counts: Vec<usize> = calls.iter().map(|c| c.load(Ordering::SeqCst)).collect();
        assert_eq!(counts, vec![1, 1, 0, 0]);

        let error = result.error.unwrap();
        assert_eq!(error.kind, ErrorKind::Timeout);
        assert_eq!(error.context["step"], "two");
    }

    #[tokio::test]
    async fn test_side_effects_happen_once() {
        let mut engine = engine();
        engine
            .register(
                PipelineBuilder::new("echo")
                    .then_sync("tag", |mut p, _| {
                        p.insert(TAGS_KEY.into(), serde_json::json!(["Invoice"]));
                        Ok(p)
                    })
                    .build()
                    .unwrap(),
            )
            .unwrap();
        let sid = engine.context_manager().create_session(None).await;
        let result = engine.process("echo", &Task::new("pay invoice"), &sid).await;
        assert!(result.is_success());

        assert_eq!(engine.context_manager().get_history(&sid).await.unwrap().len(), 1);
        let ctx = engine.context_manager().get_context(&sid).await.unwrap();
        assert_eq!(ctx["last_echo_result"]["task"], "pay invoice");

        let store = engine.memory().store();
        assert_eq!(store.len().unwrap(), 1);
        let tagged = store.query(&MemoryFilter::new().tag("invoice").tag("echo"), 5).unwrap();
        assert_eq!(tagged.len(), 1);
        assert_eq!(tagged[0].session_id, sid);
    }

    #[tokio::test]
    async fn test_unknown_pipeline_is_recorded_as_error() {
        let engine = engine();
        let sid = engine.context_manager().create_session(None).await;
        let result = engine.process("nope", &Task::new("anything"), &sid).await;
        assert_eq!(result.error.as_ref().unwrap().kind, ErrorKind::Pipeline);
        assert_eq!(result.payload["task"], "anything");
        assert_eq!(engine.context_manager().get_history(&sid).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let mut engine = engine();
        engine
            .register(PipelineBuilder::new("echo").then_sync("noop", |p, _| Ok(p)).build().unwrap())
            .unwrap();
        let result = engine.process("echo", &Task::new("x"), "missing").await;
        assert_eq!(result.error.unwrap().kind, ErrorKind::SessionNotFound);
        assert_eq!(engine.memory().store().len().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_steps_see_relevant_memories() {
        let mut engine = engine();
        engine
            .register(
                PipelineBuilder::new("recall")
                    .then_sync("count", |mut p, ctx| {
                        p.insert("recalled".into(), Value::from(ctx.memories.len()));
                        Ok(p)
                    })
                    .build()
                    .unwrap(),
            )
            .unwrap();
        let sid = engine.context_manager().create_session(None).await;

        let first = engine.process("recall", &Task::new("Amazon invoice"), &sid).await;
        assert_eq!(first.payload["recalled"], 0);
        let second = engine.process("recall", &Task::new("Another Amazon invoice"), &sid).await;
        assert_eq!(second.payload["recalled"], 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_call_leaves_no_side_effects() {
        let gate = Arc::new(Notify::new());
        let waiting = gate.clone();
        let mut engine = engine();
        engine
            .register(
                PipelineBuilder::new("slow")
                    .then_sync("mark", |mut p, _| {
                        p.insert("marked".into(), Value::Bool(true));
                        Ok(p)
                    })
                    .then("wait", move |p, _: StepContext| {
                        let gate = waiting.clone();
                        async move {
                            gate.notified().await;
                            Ok(p)
                        }
                    })
                    .build()
                    .unwrap(),
            )
            .unwrap();
        let sid = engine.context_manager().create_session(None).await;

        let outcome = tokio::time::timeout(
            Duration::from_millis(50),
            engine.process("slow", &Task::new("never finishes"), &sid),
        )
        .await;
        assert!(outcome.is_err());

        assert_eq!(engine.memory().store().len().unwrap(), 0);
        assert!(engine.context_manager().get_history(&sid).await.unwrap().is_empty());
        let ctx = engine.context_manager().get_context(&sid).await.unwrap();
        assert!(!ctx.contains_key("last_slow_result"));
    }

    #[tokio::test]
    async fn test_session_removed_mid_pipeline_is_not_recorded_as_success() {
        let context = Arc::new(ContextManager::new(100, 3600));
        let sessions = context.clone();
        let mut engine = PipelineEngine::new(
            context,
            Arc::new(MemoryRetriever::new(Arc::new(InMemoryStore::new()))),
            Arc::new(AdapterRegistry::default()),
        );
        engine
            .register(
                PipelineBuilder::new("logout")
                    .then("drop_session", move |p, ctx: StepContext| {
                        let sessions = sessions.clone();
                        async move {
                            sessions.remove_session(&ctx.session_id).await;
                            Ok(p)
                        }
                    })
                    .build()
                    .unwrap(),
            )
            .unwrap();
        let sid = engine.context_manager().create_session(None).await;

        let result = engine.process("logout", &Task::new("sign me out"), &sid).await;
        assert_eq!(result.status, ExecutionStatus::Error);
        assert_eq!(result.error.unwrap().kind, ErrorKind::SessionNotFound);

        let store = engine.memory().store();
        assert!(store.query(&MemoryFilter::new().tag("success"), 10).unwrap().is_empty());
        let recorded = store.query(&MemoryFilter::new().tag("logout").tag("error"), 10).unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].result_snapshot.status, ExecutionStatus::Error);
    }

    #[tokio::test]
    async fn test_configuration_error_in_step_is_reported_not_escalated() {
        let mut engine = engine();
        engine
            .register(
                PipelineBuilder::new("rules")
                    .then_sync("load_rules", |_, _| Err(AgentError::Configuration("rules table missing".into())))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        let sid = engine.context_manager().create_session(None).await;

        let result = engine.process("rules", &Task::new("apply discount rules"), &sid).await;
        let error = result.error.unwrap();
        assert_eq!(error.kind, ErrorKind::Pipeline);
        assert_eq!(error.severity, crate::core::Severity::Error);
        assert_eq!(error.context["step"], "load_rules");
        assert_eq!(engine.context_manager().get_history(&sid).await.unwrap().len(), 1);
    }
}
