//! 编排器：路由 → 建会话 → 流水线执行
//!
//! 单任务走 handle；批处理走 run_batch，用 Semaphore 限制并发，每个条目独占一个会话，
//! 结果顺序与输入一致。编排器同时实现 StatusProvider，供健康监控轮询；
//! 每次轮询前的维护会清理过期会话并执行配置的记忆保留策略。

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Semaphore;

use crate::batch::{BatchItem, BatchOutput};
use crate::core::health::{Maintenance, StatusProvider, SystemStatus};
use crate::core::{AgentError, ErrorDescriptor, ExecutionResult, Payload, Task};
use crate::memory::{apply_retention, RetentionPolicy};
use crate::pipeline::PipelineEngine;
use crate::router::TaskRouter;

pub struct Orchestrator {
    engine: Arc<PipelineEngine>,
    router: TaskRouter,
    concurrency: usize,
    retention: Vec<Box<dyn RetentionPolicy>>,
    started_at: Instant,
}

impl Orchestrator {
    pub fn new(engine: PipelineEngine, router: TaskRouter) -> Self {
        Self {
            engine: Arc::new(engine),
            router,
            concurrency: 4,
            retention: Vec::new(),
            started_at: Instant::now(),
        }
    }

    /// 批处理最大并发
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// 维护时依次执行的记忆保留策略
    pub fn with_retention(mut self, policy: impl RetentionPolicy + 'static) -> Self {
        self.retention.push(Box::new(policy));
        self
    }

    pub fn engine(&self) -> &Arc<PipelineEngine> {
        &self.engine
    }

    pub fn router(&self) -> &TaskRouter {
        &self.router
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// 处理单个任务；session_id 为 None 时新建会话
    pub async fn handle(&self, task: &Task, session_id: Option<&str>) -> ExecutionResult {
        let pipeline = self.router.resolve(task);
        let session = self.engine.context_manager().create_session(session_id).await;
        tracing::info!(
            task_id = %task.id,
            pipeline = %pipeline,
            session_id = %session,
            declared = task.declared_type.is_some(),
            "dispatching task"
        );
        self.engine.process(&pipeline, task, &session).await
    }

    /// 有界并发地处理一批任务，输出与输入一一对应
    pub async fn run_batch(self: &Arc<Self>, items: Vec<BatchItem>) -> Vec<BatchOutput> {
        let permits = Arc::new(Semaphore::new(self.concurrency));
        let total = items.len();
        tracing::info!(items = total, concurrency = self.concurrency, "batch started");

        let handles: Vec<_> = items
            .into_iter()
            .map(|item| {
                let orchestrator = Arc::clone(self);
                let permits = Arc::clone(&permits);
                let task = item.to_task();
                let pipeline = orchestrator.router.resolve(&task);
                let handle = tokio::spawn(async move {
                    let _permit = permits.acquire_owned().await.ok();
                    orchestrator.handle(&task, None).await
                });
                (item.task, pipeline, handle)
            })
            .collect();

        let mut outputs = Vec::with_capacity(total);
        for (task, pipeline_id, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => {
                    let err = AgentError::Agent(format!("batch worker failed: {e}"));
                    tracing::error!(pipeline = %pipeline_id, "{err}");
                    ExecutionResult::failure(
                        pipeline_id.clone(),
                        Payload::new(),
                        ErrorDescriptor::from_error(&err, Payload::new()),
                        Duration::ZERO,
                    )
                }
            };
            outputs.push(BatchOutput {
                task,
                pipeline_id,
                result,
            });
        }

        let failed = outputs.iter().filter(|o| !o.result.is_success()).count();
        tracing::info!(items = total, failed, "batch finished");
        outputs
    }
}

#[async_trait]
impl StatusProvider for Orchestrator {
    async fn maintain(&self) -> Maintenance {
        let expired_sessions = self.engine.context_manager().cleanup_expired().await;
        let mut pruned_memories = 0;
        for policy in &self.retention {
            match apply_retention(self.engine.memory(), policy.as_ref()) {
                Ok(n) => pruned_memories += n,
                Err(e) => tracing::warn!("memory retention failed: {e}"),
            }
        }
        Maintenance {
            expired_sessions,
            pruned_memories,
        }
    }

    async fn system_status(&self) -> SystemStatus {
        let stored_memories = self.engine.memory().store().len().unwrap_or_else(|e| {
            tracing::warn!("memory store unavailable for health check: {e}");
            0
        });
        SystemStatus {
            active_sessions: self.engine.context_manager().session_count().await,
            stored_memories,
            pipelines: self.engine.pipeline_count(),
            uptime_secs: self.uptime().as_secs(),
            checked_at: Some(Utc::now()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TaskType;
    use crate::integrations::AdapterRegistry;
    use crate::core::HealthMonitor;
    use crate::memory::{InMemoryStore, MaxCount, MemoryRetriever};
    use tokio_util::sync::CancellationToken;
    use crate::pipeline::builtin;
    use crate::session::ContextManager;

    fn orchestrator() -> Orchestrator {
        orchestrator_with_timeout(3600)
    }

    fn orchestrator_with_timeout(session_timeout_secs: u64) -> Orchestrator {
        let mut engine = PipelineEngine::new(
            Arc::new(ContextManager::new(100, session_timeout_secs)),
            Arc::new(MemoryRetriever::new(Arc::new(InMemoryStore::new()))),
            Arc::new(AdapterRegistry::default()),
        );
        builtin::register_all(&mut engine).unwrap();
        Orchestrator::new(engine, TaskRouter::new("support")).with_concurrency(2)
    }

    #[tokio::test]
    async fn test_handle_routes_by_description() {
        let orch = orchestrator();
        let result = orch.handle(&Task::new("Schedule a meeting for Monday 3pm"), None).await;
        assert!(result.is_success());
        assert_eq!(result.pipeline_id, "scheduler");
    }

    #[tokio::test]
    async fn test_declared_type_overrides_router() {
        let orch = orchestrator();
        let task = Task::new("Schedule a meeting").with_type(TaskType::Document);
        let result = orch.handle(&task, None).await;
        assert_eq!(result.pipeline_id, "document");
    }

    #[tokio::test]
    async fn test_reused_session_accumulates_history() {
        let orch = orchestrator();
        orch.handle(&Task::new("Reset my password"), Some("sess-a")).await;
        orch.handle(&Task::new("Pay the Amazon invoice $10"), Some("sess-a")).await;

        let history = orch.engine().context_manager().get_history("sess-a").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].result.pipeline_id, "support");
        assert_eq!(history[1].result.pipeline_id, "finance");
    }

    #[tokio::test]
    async fn test_batch_preserves_input_order() {
        let orch = Arc::new(orchestrator());
        let items = vec![
            BatchItem::new("Reply to the client email"),
            BatchItem::new("Pay invoice from Amazon for $120.50"),
            BatchItem::typed("Anything goes here", TaskType::Document),
            BatchItem::new("Water the plants"),
        ];

        let outputs = orch.run_batch(items.clone()).await;
        assert_eq!(outputs.len(), 4);
        let pipelines: Vec<&str> = outputs.iter().map(|o| o.pipeline_id.as_str()).collect();
        assert_eq!(pipelines, vec!["email", "finance", "document", "support"]);
        for (item, output) in items.iter().zip(&outputs) {
            assert_eq!(item.task, output.task);
            assert_eq!(output.result.pipeline_id, output.pipeline_id);
            assert!(output.result.is_success());
        }
        // 每个条目一个会话
        assert_eq!(orch.engine().context_manager().session_count().await, 4);
    }

    #[tokio::test]
    async fn test_status_reports_counts() {
        let orch = orchestrator();
        orch.handle(&Task::new("Reset my password"), None).await;
        let status = orch.system_status().await;
        assert_eq!(status.active_sessions, 1);
        assert_eq!(status.stored_memories, 1);
        assert_eq!(status.pipelines, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_ticks_reap_sessions_and_prune_memories() {
        let orch = Arc::new(orchestrator_with_timeout(0).with_retention(MaxCount(1)));
        for description in ["Reset my password", "Pay the Amazon invoice $10", "Book a meeting on Monday"] {
            orch.handle(&Task::new(description), None).await;
        }
        assert_eq!(orch.engine().context_manager().session_count().await, 3);
        assert_eq!(orch.engine().memory().store().len().unwrap(), 3);

        let token = CancellationToken::new();
        let monitor = HealthMonitor::spawn(orch.clone(), Duration::from_secs(30), token);
        let mut rx = monitor.subscribe();
        rx.changed().await.unwrap();

        assert_eq!(orch.engine().context_manager().session_count().await, 0);
        assert_eq!(orch.engine().memory().store().len().unwrap(), 1);
        assert_eq!(orch.engine().memory().indexed(), 1);
        let status = monitor.status();
        assert_eq!(status.active_sessions, 0);
        assert_eq!(status.stored_memories, 1);
        monitor.stop().await;
    }

    #[tokio::test]
    async fn test_maintain_keeps_live_sessions() {
        let orch = orchestrator();
        orch.handle(&Task::new("Reset my password"), Some("live")).await;

        let swept = orch.maintain().await;
        assert_eq!(swept, Maintenance::default());
        assert!(orch.engine().context_manager().get_context("live").await.is_ok());
        assert_eq!(orch.engine().memory().store().len().unwrap(), 1);
    }
}
