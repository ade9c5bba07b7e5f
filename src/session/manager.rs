//! 会话上下文管理
//!
//! 会话表本身由一把 RwLock 保护，每个会话再各自持有一把 RwLock：
//! 同一会话的写入串行化（保证历史裁剪不变量），不同会话互不阻塞。
//! get_context / get_history 返回拷贝，调用方无法经由返回值修改内部状态。

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::core::{AgentError, Interaction, Payload};

pub type SessionId = String;

/// 单个会话
#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: SessionId,
    pub context: Payload,
    /// 最旧的在前
    pub history: VecDeque<Interaction>,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
}

impl Session {
    fn new(session_id: SessionId) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            context: Payload::new(),
            history: VecDeque::new(),
            created_at: now,
            last_accessed: now,
        }
    }

    fn touch(&mut self) {
        self.last_accessed = Utc::now();
    }

    fn is_expired(&self, timeout: Duration) -> bool {
        let idle = Utc::now()
            .signed_duration_since(self.last_accessed)
            .to_std()
            .unwrap_or_default();
        idle >= timeout
    }
}

/// 上下文管理器
pub struct ContextManager {
    sessions: RwLock<HashMap<SessionId, Arc<RwLock<Session>>>>,
    max_history: usize,
    session_timeout: Duration,
}

impl ContextManager {
    pub fn new(max_history: usize, session_timeout_secs: u64) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_history: max_history.max(1),
            session_timeout: Duration::from_secs(session_timeout_secs),
        }
    }

    pub fn max_history(&self) -> usize {
        self.max_history
    }

    async fn session(&self, session_id: &str) -> Result<Arc<RwLock<Session>>, AgentError> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| AgentError::SessionNotFound(session_id.to_string()))
    }

    /// 给定已知 ID 时返回该会话；未知 ID 按该 ID 新建；不给 ID 则分配新 ID
    pub async fn create_session(&self, session_id: Option<&str>) -> SessionId {
        if let Some(id) = session_id {
            if let Some(existing) = self.sessions.read().await.get(id) {
                existing.write().await.touch();
                return id.to_string();
            }
        }

        let id = session_id
            .map(str::to_string)
            .unwrap_or_else(|| format!("session_{}", uuid::Uuid::new_v4()));
        let mut sessions = self.sessions.write().await;
        // 读锁释放后可能已被并发创建
        sessions
            .entry(id.clone())
            .or_insert_with(|| Arc::new(RwLock::new(Session::new(id.clone()))));
        tracing::debug!(session_id = %id, "session created");
        id
    }

    /// 覆盖写入 key，不做合并
    pub async fn update_context(
        &self,
        key: impl Into<String>,
        value: Value,
        session_id: &str,
    ) -> Result<(), AgentError> {
        let session = self.session(session_id).await?;
        let mut guard = session.write().await;
        guard.context.insert(key.into(), value);
        guard.touch();
        Ok(())
    }

    /// 追加交互后从头部裁剪到 max_history
    pub async fn add_to_history(&self, interaction: Interaction, session_id: &str) -> Result<(), AgentError> {
        let session = self.session(session_id).await?;
        let mut guard = session.write().await;
        guard.history.push_back(interaction);
        while guard.history.len() > self.max_history {
            guard.history.pop_front();
        }
        guard.touch();
        Ok(())
    }

    pub async fn get_context(&self, session_id: &str) -> Result<Payload, AgentError> {
        let session = self.session(session_id).await?;
        let guard = session.read().await;
        Ok(guard.context.clone())
    }

    pub async fn get_history(&self, session_id: &str) -> Result<Vec<Interaction>, AgentError> {
        let session = self.session(session_id).await?;
        let guard = session.read().await;
        Ok(guard.history.iter().cloned().collect())
    }

    /// 整个会话的快照
    pub async fn snapshot(&self, session_id: &str) -> Result<Session, AgentError> {
        let session = self.session(session_id).await?;
        let guard = session.read().await;
        Ok(guard.clone())
    }

    pub async fn remove_session(&self, session_id: &str) -> bool {
        self.sessions.write().await.remove(session_id).is_some()
    }

    /// 清理超过 session_timeout 未访问的会话
    pub async fn cleanup_expired(&self) -> usize {
        let mut sessions = self.sessions.write().await;
        let mut expired = Vec::new();
        for (id, session) in sessions.iter() {
            if session.read().await.is_expired(self.session_timeout) {
                expired.push(id.clone());
            }
        }
        for id in &expired {
            sessions.remove(id);
        }
        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "expired sessions removed");
        }
        expired.len()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ExecutionResult, Task};

    fn interaction(n: usize) -> Interaction {
        let task = Task::new(format!("task {n}"));
        let result = ExecutionResult::success("support", task.seed_payload(), Duration::from_millis(1));
        Interaction::new(task, result, "support")
    }

    #[tokio::test]
    async fn test_history_is_bounded_and_evicts_oldest() {
        let ctx = ContextManager::new(100, 3600);
        let sid = ctx.create_session(None).await;
        for n in 0..100 {
            ctx.add_to_history(interaction(n), &sid).await.unwrap();
        }
        assert_eq!(ctx.get_history(&sid).await.unwrap().len(), 100);

        ctx.add_to_history(interaction(100), &sid).await.unwrap();
        let history = ctx.get_history(&sid).await.unwrap();
        assert_eq!(history.len(), 100);
        assert_eq!(history[0].task.description, "task 1");
        assert_eq!(history[99].task.description, "task 100");
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let ctx = ContextManager::new(10, 3600);
        let err = ctx
            .update_context("k", Value::from(1), "nope")
            .await
            .unwrap_err();
        assert_eq!(err, AgentError::SessionNotFound("nope".into()));
        assert!(ctx.get_history("nope").await.is_err());
    }

    #[tokio::test]
    async fn test_create_session_reuses_known_id() {
        let ctx = ContextManager::new(10, 3600);
        let sid = ctx.create_session(Some("abc")).await;
        assert_eq!(sid, "abc");
        ctx.update_context("user", Value::from("ana"), &sid).await.unwrap();

        assert_eq!(ctx.create_session(Some("abc")).await, "abc");
        assert_eq!(ctx.session_count().await, 1);
        assert_eq!(ctx.get_context("abc").await.unwrap()["user"], "ana");
    }

    #[tokio::test]
    async fn test_context_copies_and_isolation() {
        let ctx = ContextManager::new(10, 3600);
        let a = ctx.create_session(None).await;
        let b = ctx.create_session(None).await;
        ctx.update_context("vendor", Value::from("Amazon"), &a).await.unwrap();
        ctx.update_context("vendor", Value::from("Google"), &a).await.unwrap();

        let mut copy = ctx.get_context(&a).await.unwrap();
        copy.insert("vendor".into(), Value::from("tampered"));
        assert_eq!(ctx.get_context(&a).await.unwrap()["vendor"], "Google");
        assert!(ctx.get_context(&b).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_writers_keep_bound() {
        let ctx = Arc::new(ContextManager::new(5, 3600));
        let sid = ctx.create_session(None).await;
        let mut handles = Vec::new();
        for n in 0..20 {
            let ctx = ctx.clone();
            let sid = sid.clone();
            handles.push(tokio::spawn(async move {
                ctx.add_to_history(interaction(n), &sid).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(ctx.get_history(&sid).await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_cleanup_expired() {
        let ctx = ContextManager::new(10, 0);
        ctx.create_session(None).await;
        ctx.create_session(None).await;
        assert_eq!(ctx.cleanup_expired().await, 2);
        assert_eq!(ctx.session_count().await, 0);
    }
}
