//! 内置业务流水线：email / finance / scheduler / document / support
//!
//! 关键词同时覆盖英文与葡萄牙文。调用外部服务的步骤只在对应适配器已注册时才发请求，
//! 否则记录模拟结果。

pub mod document;
pub mod email;
pub mod finance;
pub mod scheduler;
pub mod support;

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::core::{AgentError, Payload};
use crate::pipeline::{PipelineDefinition, PipelineEngine, TAGS_KEY};

/// 全部内置流水线，顺序与 TaskType::ALL 一致
pub fn definitions() -> Result<Vec<PipelineDefinition>, AgentError> {
    Ok(vec![
        email::pipeline()?,
        finance::pipeline()?,
        scheduler::pipeline()?,
        document::pipeline()?,
        support::pipeline()?,
    ])
}

pub fn register_all(engine: &mut PipelineEngine) -> Result<(), AgentError> {
    for def in definitions()? {
        engine.register(def)?;
    }
    Ok(())
}

/// 小写后的任务描述
pub(crate) fn task_text(payload: &Payload) -> String {
    payload
        .get("task")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_lowercase()
}

pub(crate) fn contains_any(text: &str, words: &[&str]) -> bool {
    words.iter().any(|w| text.contains(w))
}

/// 追加记忆标签（写入 payload["tags"]）
pub(crate) fn push_tag(payload: &mut Payload, tag: impl Into<String>) {
    let entry = payload
        .entry(TAGS_KEY)
        .or_insert_with(|| Value::Array(Vec::new()));
    if let Value::Array(tags) = entry {
        let tag = Value::String(tag.into());
        if !tags.contains(&tag) {
            tags.push(tag);
        }
    }
}

/// 字面量正则，首次使用时编译
pub(crate) fn static_regex(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).unwrap_or_else(|e| panic!("invalid pattern {pattern}: {e}")))
}

/// 8 位大写短 ID
pub(crate) fn short_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_uppercase()
}
