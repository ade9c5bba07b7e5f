//! 记忆记录与查询条件
//!
//! MemoryRecord 保存的是任务 / 结果 / 上下文的独立快照（值拷贝），与活动状态之间没有共享引用；
//! 记录写入后不再修改，只会被整条替换或按保留策略删除。

use std::collections::BTreeSet;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::core::{ExecutionResult, Payload, Task};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub memory_id: String,
    /// 产生该记录的组件（流水线 ID）
    pub owning_component: String,
    pub task_snapshot: Task,
    pub result_snapshot: ExecutionResult,
    pub context_snapshot: Payload,
    pub tags: BTreeSet<String>,
    /// 微秒精度，与 SQLite 后端的存储精度一致
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
}

impl MemoryRecord {
    pub fn new(
        owning_component: impl Into<String>,
        session_id: impl Into<String>,
        task: &Task,
        result: &ExecutionResult,
        context: &Payload,
    ) -> Self {
        Self {
            memory_id: format!("mem_{}", uuid::Uuid::new_v4()),
            owning_component: owning_component.into(),
            task_snapshot: task.clone(),
            result_snapshot: result.clone(),
            context_snapshot: context.clone(),
            tags: BTreeSet::new(),
            timestamp: Utc::now().trunc_subsecs(6),
            session_id: session_id.into(),
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into().to_lowercase());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for tag in tags {
            self.tags.insert(tag.into().to_lowercase());
        }
        self
    }

    /// 用于索引与关键词过滤的文本：任务描述、标签、结果中的顶层字符串字段
    pub fn searchable_text(&self) -> String {
        let mut parts: Vec<&str> = vec![self.task_snapshot.description.as_str()];
        parts.extend(self.tags.iter().map(String::as_str));
        parts.extend(
            self.result_snapshot
                .payload
                .values()
                .filter_map(|v| v.as_str()),
        );
        parts.join(" ")
    }
}

/// 查询条件；所有字段都是「与」关系，tags 要求全部命中
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryFilter {
    pub tags: Vec<String>,
    pub keyword: Option<String>,
    pub session_id: Option<String>,
    pub owning_component: Option<String>,
}

impl MemoryFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into().to_lowercase());
        self
    }

    pub fn keyword(mut self, keyword: impl Into<String>) -> Self {
        self.keyword = Some(keyword.into().to_lowercase());
        self
    }

    pub fn session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn component(mut self, component: impl Into<String>) -> Self {
        self.owning_component = Some(component.into());
        self
    }

    pub fn matches(&self, record: &MemoryRecord) -> bool {
        if let Some(ref s) = self.session_id {
            if &record.session_id != s {
                return false;
            }
        }
        if let Some(ref c) = self.owning_component {
            if &record.owning_component != c {
                return false;
            }
        }
        if !self.tags.iter().all(|t| record.tags.contains(t)) {
            return false;
        }
        match self.keyword {
            Some(ref k) => record.searchable_text().to_lowercase().contains(k.as_str()),
            None => true,
        }
    }
}
