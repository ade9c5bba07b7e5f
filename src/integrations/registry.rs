//! 适配器注册表
//!
//! 显式构造、注入给流水线，不存在全局查找。每次 execute 都经过弹性层：
//! 以适配器名作为限流资源，按重试策略退避，4xx / 5xx 翻译为 IntegrationFailure；
//! 每次调用输出一行 JSON 审计日志。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;

use crate::core::{AgentError, IntegrationKind};
use crate::integrations::{Adapter, AdapterRequest};
use crate::resilience::{operation, FallbackExecutor, Operation, Resilience};

#[derive(Default)]
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn Adapter>>,
    resilience: Resilience,
}

impl AdapterRegistry {
    pub fn new(resilience: Resilience) -> Self {
        Self {
            adapters: HashMap::new(),
            resilience,
        }
    }

    pub fn register(&mut self, adapter: impl Adapter + 'static) {
        self.register_arc(Arc::new(adapter));
    }

    pub fn register_arc(&mut self, adapter: Arc<dyn Adapter>) {
        let name = adapter.name().to_string();
        tracing::info!(adapter = %name, "adapter registered");
        self.adapters.insert(name, adapter);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Adapter>> {
        self.adapters.get(name).cloned()
    }

    /// 已注册的适配器名（排序）
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.adapters.keys().cloned().collect();
        names.sort();
        names
    }

    /// 只有启用的服务才会注册，因此注册即启用
    pub fn is_enabled(&self, name: &str) -> bool {
        self.adapters.contains_key(name)
    }

    pub fn resilience(&self) -> &Resilience {
        &self.resilience
    }

    /// 经弹性层调用指定适配器，返回响应 data
    pub async fn execute(&self, name: &str, request: AdapterRequest) -> Result<Value, AgentError> {
        match self.get(name) {
            Some(adapter) => guarded_call(adapter, self.resilience.clone(), request).await,
            None => Err(unknown_adapter(name)),
        }
    }

    /// 先调用 primary，失败后依次尝试 fallbacks；全部失败时返回 primary 的错误
    pub async fn execute_with_fallback(
        &self,
        primary: &str,
        fallbacks: &[&str],
        request: AdapterRequest,
    ) -> Result<Value, AgentError> {
        let to_op = |name: &str| -> Operation<Value> {
            let request = request.clone();
            let resilience = self.resilience.clone();
            match self.get(name) {
                Some(adapter) => operation(move || guarded_call(adapter, resilience, request)),
                None => {
                    let err = unknown_adapter(name);
                    operation(move || async move { Err(err) })
                }
            }
        };
        let primary_op = to_op(primary);
        let fallback_ops = fallbacks.iter().map(|name| to_op(name)).collect();
        FallbackExecutor::new().execute(primary_op, fallback_ops).await
    }
}

fn unknown_adapter(name: &str) -> AgentError {
    AgentError::integration(
        IntegrationKind::Other,
        format!("no adapter registered for service: {name}"),
    )
}

async fn guarded_call(
    adapter: Arc<dyn Adapter>,
    resilience: Resilience,
    request: AdapterRequest,
) -> Result<Value, AgentError> {
    let name = adapter.name().to_string();
    let start = Instant::now();
    let result = resilience
        .call(&name, || {
            let adapter = adapter.clone();
            let request = request.clone();
            async move { adapter.execute(request).await?.into_result() }
        })
        .await;

    let status_code = match &result {
        Ok(_) => None,
        Err(e) => match e.root_cause() {
            AgentError::Integration { status_code, .. } => *status_code,
            _ => None,
        },
    };
    let audit = serde_json::json!({
        "event": "adapter_audit",
        "adapter": name,
        "method": request.method,
        "target": request.target,
        "ok": result.is_ok(),
        "status_code": status_code,
        "error_kind": result.as_ref().err().map(|e| e.kind()),
        "duration_ms": start.elapsed().as_millis() as u64,
    });
    tracing::info!(audit = %audit.to_string(), "adapter");
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ErrorKind;
    use crate::integrations::AdapterResponse;
    use crate::resilience::{RateLimit, RateLimiter, RetryPolicy};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// 按预设状态码序列返回；序列耗尽后返回 200
    struct ScriptedAdapter {
        name: String,
        statuses: Vec<u16>,
        calls: Arc<AtomicUsize>,
    }

    impl ScriptedAdapter {
        fn new(name: &str, statuses: Vec<u16>) -> (Self, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    name: name.to_string(),
                    statuses,
                    calls: calls.clone(),
                },
                calls,
            )
        }
    }

    #[async_trait]
    impl Adapter for ScriptedAdapter {
        fn name(&self) -> &str {
            &self.name
        }

        async fn execute(&self, request: AdapterRequest) -> Result<AdapterResponse, AgentError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            match self.statuses.get(n) {
                Some(&code) if code >= 400 => Ok(AdapterResponse::failed(code, format!("{} failed", self.name))),
                _ => Ok(AdapterResponse::ok(serde_json::json!({
                    "adapter": self.name,
                    "target": request.target,
                }))),
            }
        }
    }

    fn registry(retries: u32) -> AdapterRegistry {
        AdapterRegistry::new(Resilience::new(
            RetryPolicy::new(retries, 1.0).with_jitter(false),
            RateLimiter::new(),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_errors_are_retried_then_succeed() {
        let mut reg = registry(3);
        let (adapter, calls) = ScriptedAdapter::new("calendar", vec![503, 502]);
        reg.register(adapter);

        let data = reg.execute("calendar", AdapterRequest::get("/slots")).await.unwrap();
        assert_eq!(data["target"], "/slots");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_error_is_not_retried() {
        let mut reg = registry(3);
        let (adapter, calls) = ScriptedAdapter::new("ticketing", vec![404]);
        reg.register(adapter);

        let err = reg.execute("ticketing", AdapterRequest::get("/x")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ClientError);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_failure_exhausts_retries() {
        let mut reg = registry(2);
        let (adapter, calls) = ScriptedAdapter::new("storage", vec![500, 500, 500, 500]);
        reg.register(adapter);

        let err = reg.execute("storage", AdapterRequest::get("/")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RetriesExhausted);
        assert_eq!(err.root_cause().kind(), ErrorKind::ServerError);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_unknown_adapter() {
        let reg = registry(3);
        let err = reg.execute("fax", AdapterRequest::get("/")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Integration);
        assert!(!reg.is_enabled("fax"));
    }

    #[tokio::test]
    async fn test_rate_limited_by_adapter_name() {
        let limiter = RateLimiter::new().with_limit("email", RateLimit::new(1, Duration::from_secs(60)));
        let mut reg = AdapterRegistry::new(Resilience::new(RetryPolicy::new(0, 1.0), limiter));
        let (adapter, calls) = ScriptedAdapter::new("email", vec![]);
        reg.register(adapter);

        assert!(reg.execute("email", AdapterRequest::get("/send")).await.is_ok());
        let err = reg.execute("email", AdapterRequest::get("/send")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RateLimitExceeded);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fallback_keeps_primary_error() {
        let mut reg = registry(0);
        let (primary, _) = ScriptedAdapter::new("email", vec![404, 404]);
        let (backup, _) = ScriptedAdapter::new("email_backup", vec![400, 400]);
        reg.register(primary);
        reg.register(backup);

        let err = reg
            .execute_with_fallback("email", &["email_backup"], AdapterRequest::get("/send"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Integration failure (ClientError): email failed");

        let (healthy, _) = ScriptedAdapter::new("email_relay", vec![]);
        reg.register(healthy);
        let data = reg
            .execute_with_fallback("email", &["email_backup", "email_relay"], AdapterRequest::get("/send"))
            .await
            .unwrap();
        assert_eq!(data["adapter"], "email_relay");
    }
}
