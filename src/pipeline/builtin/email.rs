//! 邮件流水线：process_email → analyze_content → determine_action → execute_action

use serde_json::{json, Value};

use crate::core::{AgentError, Payload};
use crate::integrations::AdapterRequest;
use crate::pipeline::builtin::{contains_any, push_tag, task_text};
use crate::pipeline::{str_field, PipelineBuilder, PipelineDefinition, StepContext};

/// 相关记忆最多带入几条
const MAX_RELATED: usize = 3;

pub fn pipeline() -> Result<PipelineDefinition, AgentError> {
    PipelineBuilder::new("email")
        .description("Process, prioritise and act on e-mail tasks")
        .then_sync("process_email", process_email)
        .then_sync("analyze_content", analyze_content)
        .then_sync("determine_action", determine_action)
        .then("execute_action", execute_action)
        .build()
}

fn process_email(mut data: Payload, ctx: &StepContext) -> Result<Payload, AgentError> {
    let related: Vec<Value> = ctx
        .memories
        .iter()
        .take(MAX_RELATED)
        .map(|m| json!({ "memory_id": m.memory_id, "task": m.task_snapshot.description }))
        .collect();
    let summary = format!("Processed email task: {}", str_field(&data, "task"));
    data.insert(
        "processed_email".into(),
        json!({ "summary": summary, "related": related }),
    );
    Ok(data)
}

fn analyze_content(mut data: Payload, _: &StepContext) -> Result<Payload, AgentError> {
    let task = task_text(&data);
    let priority = if contains_any(&task, &["urgent", "asap", "urgente"]) {
        "high"
    } else if contains_any(&task, &["later", "tomorrow", "depois", "amanhã"]) {
        "low"
    } else {
        "normal"
    };
    data.insert("priority".into(), Value::from(priority));
    Ok(data)
}

fn determine_action(mut data: Payload, _: &StepContext) -> Result<Payload, AgentError> {
    let task = task_text(&data);
    let action = if contains_any(&task, &["reply", "respond", "responder"]) {
        "reply"
    } else if contains_any(&task, &["forward", "encaminhar"]) {
        "forward"
    } else if contains_any(&task, &["archive", "file", "arquivar"]) {
        "archive"
    } else {
        "classify"
    };
    data.insert("action".into(), Value::from(action));
    push_tag(&mut data, action);
    Ok(data)
}

async fn execute_action(mut data: Payload, ctx: StepContext) -> Result<Payload, AgentError> {
    let action = str_field(&data, "action").to_string();
    let task = str_field(&data, "task").to_string();
    let verb = match action.as_str() {
        "reply" => "Auto-replied to email",
        "forward" => "Forwarded email",
        "archive" => "Archived email",
        _ => "Classified email",
    };

    let delivery = if ctx.adapters.is_enabled("email") {
        let request = AdapterRequest::post(
            "/messages",
            json!({ "action": action, "task": task, "priority": data.get("priority") }),
        );
        ctx.adapters
            .execute_with_fallback("email", &["email_backup"], request)
            .await?
    } else {
        Value::from("simulated")
    };

    data.insert("result".into(), Value::from(format!("{verb}: {task}")));
    data.insert("delivery".into(), delivery);
    Ok(data)
}
