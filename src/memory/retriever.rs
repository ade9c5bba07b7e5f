//! 记忆检索：在 MemoryStore 之上维护词索引，按相关度排序
//!
//! 相关度打分可替换（RelevanceScorer）；同分时按时间倒序。空库返回空结果，不报错。

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};

use crate::core::AgentError;
use crate::memory::tokenizer::{overlap_score, tokenize_to_set};
use crate::memory::{MemoryRecord, MemoryStore};

/// 相关度打分。实现必须单调：查询中多出一个与记录完全匹配的词，记录得分不得下降。
pub trait RelevanceScorer: Send + Sync {
    fn score(&self, query: &HashSet<String>, document: &HashSet<String>) -> f64;
}

/// 查询词与记录词的交集大小
#[derive(Debug, Default, Clone, Copy)]
pub struct KeywordOverlapScorer;

impl RelevanceScorer for KeywordOverlapScorer {
    fn score(&self, query: &HashSet<String>, document: &HashSet<String>) -> f64 {
        overlap_score(query, document) as f64
    }
}

struct IndexEntry {
    tokens: HashSet<String>,
    timestamp: DateTime<Utc>,
}

pub struct MemoryRetriever {
    store: Arc<dyn MemoryStore>,
    scorer: Box<dyn RelevanceScorer>,
    index: RwLock<HashMap<String, IndexEntry>>,
}

impl MemoryRetriever {
    pub fn new(store: Arc<dyn MemoryStore>) -> Self {
        Self::with_scorer(store, KeywordOverlapScorer)
    }

    pub fn with_scorer(store: Arc<dyn MemoryStore>, scorer: impl RelevanceScorer + 'static) -> Self {
        Self {
            store,
            scorer: Box::new(scorer),
            index: RwLock::new(HashMap::new()),
        }
    }

    /// 打开已有存储时调用：从存储全量重建索引
    pub fn rebuild(&self) -> Result<usize, AgentError> {
        let records = self.store.all()?;
        let mut index = self.index.write().unwrap_or_else(PoisonError::into_inner);
        index.clear();
        for record in &records {
            index.insert(record.memory_id.clone(), entry_for(record));
        }
        Ok(index.len())
    }

    pub fn store(&self) -> &Arc<dyn MemoryStore> {
        &self.store
    }

    /// 写入存储并加入索引；存储失败时索引不变
    pub fn remember(&self, record: MemoryRecord) -> Result<String, AgentError> {
        let entry = entry_for(&record);
        let id = self.store.store(record)?;
        self.index
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), entry);
        Ok(id)
    }

    /// 从存储与索引中删除
    pub fn forget(&self, memory_id: &str) -> Result<bool, AgentError> {
        let existed = self.store.delete(memory_id)?;
        self.index
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(memory_id);
        Ok(existed)
    }

    pub fn indexed(&self) -> usize {
        self.index.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// 按相关度返回最多 limit 条记录；得分为 0 的记录不返回
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<MemoryRecord>, AgentError> {
        let query_tokens = tokenize_to_set(query);
        if query_tokens.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let mut ranked: Vec<(f64, DateTime<Utc>, String)> = {
            let index = self.index.read().unwrap_or_else(PoisonError::into_inner);
            index
                .iter()
                .map(|(id, e)| (self.scorer.score(&query_tokens, &e.tokens), e.timestamp, id.clone()))
                .filter(|(score, _, _)| *score > 0.0)
                .collect()
        };
        ranked.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.1.cmp(&a.1))
                .then_with(|| a.2.cmp(&b.2))
        });

        let mut hits = Vec::with_capacity(limit.min(ranked.len()));
        for (_, _, id) in ranked {
            if hits.len() == limit {
                break;
            }
            // 记录可能已被保留策略直接从存储删除
            if let Some(record) = self.store.get(&id)? {
                hits.push(record);
            }
        }
        Ok(hits)
    }
}

fn entry_for(record: &MemoryRecord) -> IndexEntry {
    IndexEntry {
        tokens: tokenize_to_set(&record.searchable_text()),
        timestamp: record.timestamp,
    }
}
