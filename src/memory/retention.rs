//! 记忆保留策略：只删除整条记录，从不修改
//!
//! 策略本身只负责挑出要删除的 memory_id，删除动作由 apply_retention 统一执行。

use chrono::{Duration, Utc};

use crate::core::AgentError;
use crate::memory::{MemoryRecord, MemoryRetriever};

pub trait RetentionPolicy: Send + Sync {
    /// records 按时间倒序给出，返回应删除的 ID
    fn select_expired(&self, records: &[MemoryRecord]) -> Vec<String>;
}

/// 删除早于 max_age 的记录
#[derive(Debug, Clone, Copy)]
pub struct MaxAge(pub Duration);

impl RetentionPolicy for MaxAge {
    fn select_expired(&self, records: &[MemoryRecord]) -> Vec<String> {
        let cutoff = Utc::now() - self.0;
        records
            .iter()
            .filter(|r| r.timestamp < cutoff)
            .map(|r| r.memory_id.clone())
            .collect()
    }
}

/// 只保留最近的 N 条
#[derive(Debug, Clone, Copy)]
pub struct MaxCount(pub usize);

impl RetentionPolicy for MaxCount {
    fn select_expired(&self, records: &[MemoryRecord]) -> Vec<String> {
        records.iter().skip(self.0).map(|r| r.memory_id.clone()).collect()
    }
}

/// 执行保留策略，返回删除条数（同步更新检索索引）
pub fn apply_retention(
    retriever: &MemoryRetriever,
    policy: &dyn RetentionPolicy,
) -> Result<usize, AgentError> {
    let mut records = retriever.store().all()?;
    records.sort_by(|a, b| {
        b.timestamp
            .cmp(&a.timestamp)
            .then_with(|| a.memory_id.cmp(&b.memory_id))
    });
    let mut removed = 0;
    for id in policy.select_expired(&records) {
        if retriever.forget(&id)? {
            removed += 1;
        }
    }
    if removed > 0 {
        tracing::info!(removed, remaining = records.len() - removed, "memory retention applied");
    }
    Ok(removed)
}
