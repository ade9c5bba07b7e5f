//! 客服流水线：receive_request → triage_request → respond_or_escalate → create_ticket
//!
//! 路由未命中时的默认去处。

use chrono::Utc;
use serde_json::{json, Value};

use crate::core::{AgentError, Payload};
use crate::integrations::AdapterRequest;
use crate::pipeline::builtin::{contains_any, push_tag, short_id, task_text};
use crate::pipeline::{str_field, PipelineBuilder, PipelineDefinition, StepContext};

pub fn pipeline() -> Result<PipelineDefinition, AgentError> {
    PipelineBuilder::new("support")
        .description("Triage support requests and open tickets")
        .then_sync("receive_request", receive_request)
        .then_sync("triage_request", triage_request)
        .then_sync("respond_or_escalate", respond_or_escalate)
        .then("create_ticket", create_ticket)
        .build()
}

/// (priority, category)
pub fn triage(text: &str) -> (&'static str, &'static str) {
    let text = text.to_lowercase();
    let priority = if contains_any(
        &text,
        &["urgent", "asap", "emergency", "critical", "immediately", "urgente", "emergência", "crítico", "imediatamente"],
    ) {
        "high"
    } else if contains_any(&text, &["soon", "later", "whenever", "depois", "quando puder"]) {
        "low"
    } else {
        "medium"
    };

    let category = if contains_any(&text, &["password", "login", "account", "senha", "conta"]) {
        "account"
    } else if contains_any(&text, &["error", "bug", "crash", "technical", "erro", "falha", "problema", "sistema"]) {
        "technical"
    } else if contains_any(&text, &["security", "hack", "breach", "segurança"]) {
        "security"
    } else if contains_any(&text, &["billing", "payment", "invoice", "pagamento", "cobrança", "fatura"]) {
        "billing"
    } else if contains_any(&text, &["feature", "request", "suggestion", "sugestão", "funcionalidade"]) {
        "feature"
    } else {
        "general"
    };
    (priority, category)
}

fn auto_response(category: &str, priority: &str) -> String {
    let base = match category {
        "account" => "We've received your account issue and are working on it. Please check your email for further instructions.",
        "technical" => "Our technical team has been notified about your issue. We'll contact you as soon as we have a solution.",
        "billing" => "We've forwarded your billing inquiry to our finance team. They will contact you within 24 hours.",
        "feature" => "Thank you for your feature suggestion. We've added it to our development roadmap.",
        _ => "We've received your request and will respond as soon as possible.",
    };
    let note = match priority {
        "high" => " This is marked as high priority and will be addressed immediately.",
        "low" => " This will be addressed in our regular support cycle.",
        _ => "",
    };
    format!("{base}{note}")
}

fn receive_request(mut data: Payload, _: &StepContext) -> Result<Payload, AgentError> {
    data.insert("request_received".into(), Value::Bool(true));
    data.insert("reception_time".into(), Value::from(Utc::now().to_rfc3339()));
    Ok(data)
}

fn triage_request(mut data: Payload, _: &StepContext) -> Result<Payload, AgentError> {
    let (priority, category) = triage(&task_text(&data));
    data.insert(
        "triage_result".into(),
        Value::from(format!("Triaged as {category} with {priority} priority")),
    );
    data.insert("priority".into(), Value::from(priority));
    data.insert("category".into(), Value::from(category));
    push_tag(&mut data, category);
    Ok(data)
}

fn respond_or_escalate(mut data: Payload, _: &StepContext) -> Result<Payload, AgentError> {
    let priority = str_field(&data, "priority").to_string();
    let category = str_field(&data, "category").to_string();
    let (action, response) = if priority == "high" || matches!(category.as_str(), "technical" | "security") {
        (
            "escalate",
            format!("Escalating {category} issue with {priority} priority to specialist team"),
        )
    } else {
        ("respond", auto_response(&category, &priority))
    };
    data.insert("action".into(), Value::from(action));
    data.insert("response".into(), Value::from(response));
    Ok(data)
}

async fn create_ticket(mut data: Payload, ctx: StepContext) -> Result<Payload, AgentError> {
    let mut ticket = json!({
        "priority": data.get("priority").cloned().unwrap_or_else(|| Value::from("low")),
        "category": data.get("category").cloned().unwrap_or_else(|| Value::from("general")),
        "status": "open",
        "created_at": data.get("reception_time").cloned().unwrap_or(Value::Null),
        "description": str_field(&data, "task"),
    });

    let ticket_id = if ctx.adapters.is_enabled("ticketing") {
        let response = ctx
            .adapters
            .execute("ticketing", AdapterRequest::post("/tickets", ticket.clone()))
            .await?;
        response
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("TICKET-{}", short_id()))
    } else {
        format!("TICKET-{}", short_id())
    };

    ticket["id"] = Value::from(ticket_id.as_str());
    data.insert("ticket_created".into(), Value::Bool(true));
    data.insert("ticket_id".into(), Value::from(ticket_id));
    data.insert("ticket_details".into(), ticket);
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ErrorKind, IntegrationKind};
    use crate::integrations::{Adapter, AdapterRegistry, AdapterResponse};
    use crate::pipeline::builtin::tests::{run, run_with};
    use crate::resilience::{RateLimiter, Resilience, RetryPolicy};
    use async_trait::async_trait;
    use std::sync::Arc;

    #[test]
    fn test_triage() {
        assert_eq!(triage("I forgot my password"), ("medium", "account"));
        assert_eq!(triage("URGENT: checkout crash"), ("high", "technical"));
        assert_eq!(triage("Possible breach, look at it whenever"), ("low", "security"));
        assert_eq!(triage("Atender chamado de suporte nível 1 urgente"), ("high", "general"));
    }

    #[tokio::test]
    async fn test_billing_auto_response_and_ticket() {
        let def = pipeline().unwrap();
        let out = run(&def, "Question about my last payment").await.unwrap();
        assert_eq!(out["action"], "respond");
        assert!(out["response"].as_str().unwrap().contains("finance team"));
        let ticket_id = out["ticket_id"].as_str().unwrap();
        assert!(ticket_id.starts_with("TICKET-"));
        assert_eq!(ticket_id.len(), "TICKET-".len() + 8);
        assert_eq!(out["ticket_details"]["id"], ticket_id);
        assert_eq!(out["ticket_details"]["status"], "open");
    }

    #[tokio::test]
    async fn test_security_escalates() {
        let def = pipeline().unwrap();
        let out = run(&def, "We saw a security breach on the admin panel").await.unwrap();
        assert_eq!(out["action"], "escalate");
        assert_eq!(out["tags"], json!(["security"]));
    }

    struct DownTicketing;

    #[async_trait]
    impl Adapter for DownTicketing {
        fn name(&self) -> &str {
            "ticketing"
        }

        async fn execute(&self, _: AdapterRequest) -> Result<AdapterResponse, AgentError> {
            Err(AgentError::integration(IntegrationKind::ConnectionRefused, "ticketing unreachable"))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticketing_outage_surfaces_after_retries() {
        let mut registry = AdapterRegistry::new(Resilience::new(
            RetryPolicy::new(2, 0.5).with_jitter(false),
            RateLimiter::new(),
        ));
        registry.register(DownTicketing);

        let def = pipeline().unwrap();
        let err = run_with(&def, "Cannot login", Arc::new(registry)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RetriesExhausted);
        assert_eq!(err.root_cause().kind(), ErrorKind::ConnectionRefused);
    }
}
