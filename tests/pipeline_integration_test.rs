//! 流水线集成测试：通过公开 API 组装平台并端到端执行

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use kaleb::config::{AppConfig, RateLimitSection};
    use kaleb::core::{AgentError, ErrorKind, ExecutionStatus, Orchestrator, Payload, PlatformBuilder, Severity, Task};
    use kaleb::integrations::{Adapter, AdapterRegistry, AdapterRequest, AdapterResponse};
    use kaleb::memory::MemoryFilter;
    use kaleb::pipeline::{PipelineBuilder, StepContext};
    use kaleb::resilience::Resilience;
    use kaleb::TaskRouter;
    use serde_json::{json, Value};

    /// 前 failures 次返回 503，之后成功
    struct FlakyCrm {
        failures: usize,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Adapter for FlakyCrm {
        fn name(&self) -> &str {
            "crm"
        }

        async fn execute(&self, request: AdapterRequest) -> Result<AdapterResponse, AgentError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Ok(AdapterResponse::failed(503, "crm unavailable"))
            } else {
                Ok(AdapterResponse::ok(json!({ "contact": "ACME", "target": request.target })))
            }
        }
    }

    fn fast_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.retry.backoff_factor = 0.0;
        config.retry.jitter = false;
        config
    }

    async fn lookup_contact(mut data: Payload, ctx: StepContext) -> Result<Payload, AgentError> {
        let contact = ctx.adapters.execute("crm", AdapterRequest::get("/contacts")).await?;
        data.insert("contact".into(), contact["contact"].clone());
        Ok(data)
    }

    fn reject_unpriced(mut data: Payload, _: &StepContext) -> Result<Payload, AgentError> {
        if !data.contains_key("price") {
            return Err(AgentError::Agent("quote has no price".into()));
        }
        data.insert("approved".into(), Value::Bool(true));
        Ok(data)
    }

    /// 平台 + 自定义的 quote 流水线（lookup_contact → reject_unpriced）
    fn platform(config: AppConfig, failures: usize) -> (Orchestrator, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = AdapterRegistry::new(Resilience::from_config(&config));
        registry.register(FlakyCrm {
            failures,
            calls: calls.clone(),
        });

        let mut engine = PlatformBuilder::new(config.clone())
            .with_registry(registry)
            .build_engine()
            .unwrap();
        let quote = PipelineBuilder::new("quote")
            .description("Look up the customer and approve the quote")
            .then("lookup_contact", lookup_contact)
            .then_sync("reject_unpriced", reject_unpriced)
            .build()
            .unwrap();
        engine.register(quote).unwrap();

        let router = TaskRouter::new(config.app.default_pipeline.clone());
        (Orchestrator::new(engine, router), calls)
    }

    #[tokio::test]
    async fn test_builtin_pipeline_side_effects() {
        let (orch, _) = platform(fast_config(), 0);

        let first = orch.handle(&Task::new("Pay invoice from Amazon for $99.90"), Some("s1")).await;
        assert_eq!(first.status, ExecutionStatus::Success);
        assert_eq!(first.pipeline_id, "finance");

        let context = orch.engine().context_manager().get_context("s1").await.unwrap();
        assert_eq!(context["last_finance_result"]["task"], "Pay invoice from Amazon for $99.90");

        let stored = orch
            .engine()
            .memory()
            .store()
            .query(&MemoryFilter::new().tag("finance").tag("success"), 10)
            .unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].session_id, "s1");

        // 第二次执行可以检索到第一次的记忆
        let second = orch.handle(&Task::new("Another Amazon invoice for $10.00"), Some("s1")).await;
        assert!(second.is_success());
        let history = orch.engine().context_manager().get_history("s1").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(orch.engine().memory().store().len().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_transient_adapter_failures_are_retried() {
        let (orch, calls) = platform(fast_config(), 2);
        let task = Task::new("Quote for ACME").with_field("price", 120);

        let result = orch.engine().process("quote", &task, &orch.engine().context_manager().create_session(None).await).await;
        assert!(result.is_success(), "unexpected error: {:?}", result.error);
        assert_eq!(result.payload["contact"], "ACME");
        assert_eq!(result.payload["approved"], true);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_step_failure_keeps_partial_payload_and_records_error() {
        let (orch, _) = platform(fast_config(), 0);
        let session = orch.engine().context_manager().create_session(None).await;

        let result = orch.engine().process("quote", &Task::new("Quote without price"), &session).await;
        assert_eq!(result.status, ExecutionStatus::Error);
        assert_eq!(result.payload["contact"], "ACME");
        assert!(!result.payload.contains_key("approved"));

        let error = result.error.unwrap();
        assert_eq!(error.kind, ErrorKind::Agent);
        assert_eq!(error.context["step"], "reject_unpriced");
        assert_eq!(error.context["pipeline"], "quote");

        let failures = orch
            .engine()
            .memory()
            .store()
            .query(&MemoryFilter::new().tag("quote").tag("error"), 10)
            .unwrap();
        assert_eq!(failures.len(), 1);
        let history = orch.engine().context_manager().get_history(&session).await.unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn test_rate_limited_resource_fails_fast() {
        let mut config = fast_config();
        config.rate_limit.insert(
            "crm".into(),
            RateLimitSection {
                window_seconds: 60,
                capacity: 1,
            },
        );
        let (orch, calls) = platform(config, 0);
        let session = orch.engine().context_manager().create_session(None).await;
        let task = Task::new("Quote for ACME").with_field("price", 5);

        assert!(orch.engine().process("quote", &task, &session).await.is_success());
        let limited = orch.engine().process("quote", &task, &session).await;
        let error = limited.error.unwrap();
        assert_eq!(error.kind, ErrorKind::RateLimitExceeded);
        assert_eq!(error.severity, Severity::Warning);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_session_leaves_no_trace() {
        let (orch, _) = platform(fast_config(), 0);
        let result = orch.engine().process("support", &Task::new("Help"), "ghost").await;
        assert_eq!(result.error.unwrap().kind, ErrorKind::SessionNotFound);
        assert!(orch.engine().memory().store().is_empty().unwrap());
    }
}
