//! 日程流水线：receive_request → check_availability → create_event → send_invitation

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{json, Value};

use crate::core::{AgentError, Payload};
use crate::integrations::AdapterRequest;
use crate::pipeline::builtin::{short_id, static_regex};
use crate::pipeline::{str_field, PipelineBuilder, PipelineDefinition, StepContext};

static TIME_RE: OnceLock<Regex> = OnceLock::new();
static EMAIL_RE: OnceLock<Regex> = OnceLock::new();

const TITLE_MARKERS: &[&str] = &["meeting", "reunião", "discuss", "discutir"];
const DEFAULT_TITLE: &str = "General Meeting";
const UNKNOWN_TIME: &str = "unknown time";

pub fn pipeline() -> Result<PipelineDefinition, AgentError> {
    PipelineBuilder::new("scheduler")
        .description("Parse meeting requests, check availability and send invitations")
        .then_sync("receive_request", receive_request)
        .then("check_availability", check_availability)
        .then("create_event", create_event)
        .then_sync("send_invitation", send_invitation)
        .build()
}

/// 会议要素：标题、时间、参与者邮箱
pub fn parse_meeting_request(text: &str) -> Value {
    let time = static_regex(&TIME_RE, r"(?i)\b(\d{1,2}:\d{2}\s*(?:am|pm)?|\d{1,2}\s*(?:am|pm|h))\b")
        .find(text)
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_else(|| UNKNOWN_TIME.to_string());

    let participants: Vec<&str> = static_regex(&EMAIL_RE, r"[\w.\-]+@[\w.\-]+\.\w+")
        .find_iter(text)
        .map(|m| m.as_str())
        .collect();

    let lower = text.to_lowercase();
    let title = TITLE_MARKERS
        .iter()
        .find_map(|marker| lower.split_once(marker).map(|(_, rest)| rest))
        .map(|rest| rest.split_whitespace().take(5).collect::<Vec<_>>().join(" "))
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| DEFAULT_TITLE.to_string());

    json!({ "title": title, "time": time, "participants": participants })
}

fn detail<'a>(data: &'a Payload, key: &str) -> Option<&'a Value> {
    data.get("meeting_details").and_then(|d| d.get(key))
}

fn receive_request(mut data: Payload, _: &StepContext) -> Result<Payload, AgentError> {
    let details = parse_meeting_request(str_field(&data, "task"));
    data.insert("request_received".into(), Value::Bool(true));
    data.insert("meeting_details".into(), details);
    Ok(data)
}

async fn check_availability(mut data: Payload, ctx: StepContext) -> Result<Payload, AgentError> {
    let time = detail(&data, "time")
        .and_then(Value::as_str)
        .unwrap_or(UNKNOWN_TIME)
        .to_string();

    let available = if ctx.adapters.is_enabled("calendar") {
        let response = ctx
            .adapters
            .execute("calendar", AdapterRequest::get("/availability").with_param("time", time.as_str()))
            .await?;
        response.get("available").and_then(Value::as_bool).unwrap_or(true)
    } else {
        true
    };

    let summary = if available {
        format!("Time slot available at {time}")
    } else {
        format!("No availability at {time}")
    };
    data.insert("availability".into(), Value::from(summary));
    data.insert("is_available".into(), Value::Bool(available));
    Ok(data)
}

async fn create_event(mut data: Payload, ctx: StepContext) -> Result<Payload, AgentError> {
    if !data.get("is_available").and_then(Value::as_bool).unwrap_or(false) {
        data.insert("event_created".into(), Value::Bool(false));
        data.insert("scheduling_error".into(), Value::from("No available time slot"));
        return Ok(data);
    }

    let details = data.get("meeting_details").cloned().unwrap_or(Value::Null);
    let event_id = if ctx.adapters.is_enabled("calendar") {
        let response = ctx
            .adapters
            .execute("calendar", AdapterRequest::post("/events", details.clone()))
            .await?;
        response
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("EVT-{}", short_id()))
    } else {
        format!("EVT-{}", short_id())
    };

    data.insert("event_created".into(), Value::Bool(true));
    data.insert(
        "event_details".into(),
        json!({ "id": event_id, "title": details.get("title"), "time": details.get("time") }),
    );
    Ok(data)
}

fn send_invitation(mut data: Payload, _: &StepContext) -> Result<Payload, AgentError> {
    let created = data.get("event_created").and_then(Value::as_bool).unwrap_or(false);
    let participants: Vec<String> = detail(&data, "participants")
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default();

    let (sent, details) = if !created {
        (false, "Event not created, invitation not sent".to_string())
    } else if participants.is_empty() {
        (false, "No participants specified".to_string())
    } else {
        (true, format!("Invitations sent to {}", participants.join(", ")))
    };
    data.insert("invitation_sent".into(), Value::Bool(sent));
    data.insert("invitation_details".into(), Value::from(details));
    Ok(data)
}
