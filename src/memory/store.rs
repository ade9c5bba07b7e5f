//! 记忆存储接口与内存实现
//!
//! 存储以追加为主；更新只允许整条替换（replace），不做字段级修改。

use std::sync::{PoisonError, RwLock};

use crate::core::AgentError;
use crate::memory::{MemoryFilter, MemoryRecord};

/// 持久化记忆存储：store / get / query / replace / delete
pub trait MemoryStore: Send + Sync {
    /// 写入新记录，返回 memory_id；ID 已存在时报错
    fn store(&self, record: MemoryRecord) -> Result<String, AgentError>;

    fn get(&self, memory_id: &str) -> Result<Option<MemoryRecord>, AgentError>;

    /// 按条件查询，最近的在前，最多 limit 条
    fn query(&self, filter: &MemoryFilter, limit: usize) -> Result<Vec<MemoryRecord>, AgentError>;

    /// 整条替换已有记录
    fn replace(&self, record: MemoryRecord) -> Result<(), AgentError>;

    /// 删除记录，返回是否存在
    fn delete(&self, memory_id: &str) -> Result<bool, AgentError>;

    /// 全部记录（构建索引、执行保留策略用）
    fn all(&self) -> Result<Vec<MemoryRecord>, AgentError>;

    fn len(&self) -> Result<usize, AgentError>;

    fn is_empty(&self) -> Result<bool, AgentError> {
        Ok(self.len()? == 0)
    }
}

/// 进程内存储（默认后端）
#[derive(Debug, Default)]
pub struct InMemoryStore {
    records: RwLock<Vec<MemoryRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn newest_first(records: &mut [MemoryRecord]) {
    records.sort_by(|a, b| {
        b.timestamp
            .cmp(&a.timestamp)
            .then_with(|| a.memory_id.cmp(&b.memory_id))
    });
}

impl MemoryStore for InMemoryStore {
    fn store(&self, record: MemoryRecord) -> Result<String, AgentError> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        if records.iter().any(|r| r.memory_id == record.memory_id) {
            return Err(AgentError::Memory(format!(
                "memory {} already exists",
                record.memory_id
            )));
        }
        let id = record.memory_id.clone();
        records.push(record);
        Ok(id)
    }

    fn get(&self, memory_id: &str) -> Result<Option<MemoryRecord>, AgentError> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        Ok(records.iter().find(|r| r.memory_id == memory_id).cloned())
    }

    fn query(&self, filter: &MemoryFilter, limit: usize) -> Result<Vec<MemoryRecord>, AgentError> {
        let mut hits: Vec<MemoryRecord> = self
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        newest_first(&mut hits);
        hits.truncate(limit);
        Ok(hits)
    }

    fn replace(&self, record: MemoryRecord) -> Result<(), AgentError> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        match records.iter_mut().find(|r| r.memory_id == record.memory_id) {
            Some(slot) => {
                *slot = record;
                Ok(())
            }
            None => Err(AgentError::Memory(format!(
                "memory {} not found",
                record.memory_id
            ))),
        }
    }

    fn delete(&self, memory_id: &str) -> Result<bool, AgentError> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        let before = records.len();
        records.retain(|r| r.memory_id != memory_id);
        Ok(records.len() != before)
    }

    fn all(&self) -> Result<Vec<MemoryRecord>, AgentError> {
        Ok(self
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn len(&self) -> Result<usize, AgentError> {
        Ok(self.records.read().unwrap_or_else(PoisonError::into_inner).len())
    }
}
