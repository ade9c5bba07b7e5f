//! 文档流水线：receive_document → process_content → classify_document → store_document → extract_metadata

use std::collections::BTreeSet;

use chrono::Utc;
use serde_json::{json, Value};

use crate::core::{AgentError, Payload};
use crate::integrations::AdapterRequest;
use crate::pipeline::builtin::{contains_any, push_tag, task_text};
use crate::pipeline::{str_field, PipelineBuilder, PipelineDefinition, StepContext};

const KNOWN_AUTHORS: &[&str] = &["John Doe", "Jane Smith", "Bob Johnson", "Alice Brown"];
const COMMON_WORDS: &[&str] = &[
    "the", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by", "is", "are",
    "was", "were", "para", "com", "dos", "das",
];
const MAX_KEYWORDS: usize = 10;
const WORDS_PER_PAGE: usize = 250;

pub fn pipeline() -> Result<PipelineDefinition, AgentError> {
    PipelineBuilder::new("document")
        .description("Classify, store and index documents")
        .then_sync("receive_document", receive_document)
        .then_sync("process_content", process_content)
        .then_sync("classify_document", classify_document)
        .then("store_document", store_document)
        .then_sync("extract_metadata", extract_metadata)
        .build()
}

pub fn classify(text: &str) -> &'static str {
    let text = text.to_lowercase();
    if contains_any(&text, &["contract", "agreement", "contrato"]) {
        "contract"
    } else if contains_any(&text, &["invoice", "bill", "fatura"]) {
        "invoice"
    } else if contains_any(&text, &["report", "relatório"]) {
        "report"
    } else if text.contains("email") {
        "email"
    } else {
        "general"
    }
}

fn storage_path(doc_type: &str) -> &'static str {
    match doc_type {
        "contract" => "contracts/",
        "invoice" => "invoices/",
        "report" => "reports/",
        "email" => "emails/",
        _ => "documents/",
    }
}

fn receive_document(mut data: Payload, _: &StepContext) -> Result<Payload, AgentError> {
    data.insert("document_received".into(), Value::Bool(true));
    data.insert("reception_time".into(), Value::from(Utc::now().to_rfc3339()));
    Ok(data)
}

fn process_content(mut data: Payload, _: &StepContext) -> Result<Payload, AgentError> {
    let words = str_field(&data, "task").split_whitespace().count();
    data.insert(
        "processing_result".into(),
        Value::from(format!("Processed document content ({words} words)")),
    );
    Ok(data)
}

fn classify_document(mut data: Payload, _: &StepContext) -> Result<Payload, AgentError> {
    let doc_type = classify(&task_text(&data));
    data.insert("document_type".into(), Value::from(doc_type));
    data.insert("classification_confidence".into(), json!(0.95));
    push_tag(&mut data, doc_type);
    Ok(data)
}

async fn store_document(mut data: Payload, ctx: StepContext) -> Result<Payload, AgentError> {
    let doc_type = str_field(&data, "document_type").to_string();
    let path = storage_path(&doc_type);

    let document_id = if ctx.adapters.is_enabled("storage") {
        let body = json!({ "path": path, "type": doc_type, "content": str_field(&data, "task") });
        let response = ctx
            .adapters
            .execute("storage", AdapterRequest::post("/documents", body))
            .await?;
        response
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
    } else {
        uuid::Uuid::new_v4().to_string()
    };

    data.insert("storage_path".into(), Value::from(path));
    data.insert("stored".into(), Value::Bool(true));
    data.insert("document_id".into(), Value::from(document_id));
    Ok(data)
}

fn extract_metadata(mut data: Payload, _: &StepContext) -> Result<Payload, AgentError> {
    let task = str_field(&data, "task").to_string();
    data.insert(
        "metadata".into(),
        json!({
            "title": extract_title(&task),
            "author": extract_author(&task),
            "keywords": extract_keywords(&task),
            "page_count": (task.split_whitespace().count() / WORDS_PER_PAGE).max(1),
            "file_size": format!("{} KB", (task.len() / 1000).max(1)),
        }),
    );
    Ok(data)
}

fn extract_title(text: &str) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() > 5 {
        format!("{}...", words[..5].join(" "))
    } else {
        text.to_string()
    }
}

fn extract_author(text: &str) -> &'static str {
    let lower = text.to_lowercase();
    KNOWN_AUTHORS
        .iter()
        .copied()
        .find(|author| {
            author
                .split_whitespace()
                .next()
                .map(|first| lower.contains(&first.to_lowercase()))
                .unwrap_or(false)
        })
        .unwrap_or("Unknown Author")
}

/// 去重、排序后的关键词，最多 10 个
fn extract_keywords(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() > 3 && !COMMON_WORDS.contains(w))
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .take(MAX_KEYWORDS)
        .collect()
}
