//! 健康监控：独立的后台任务
//!
//! 按固定间隔先让 StatusProvider 做一次维护（过期会话、记忆保留），再轮询状态，
//! 把最新的 SystemStatus 发布到 watch 通道；与流水线逻辑之间只有 status() 这一个查询口。
//! 取消 token 即停止。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// 一次轮询得到的系统快照
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SystemStatus {
    pub active_sessions: usize,
    pub stored_memories: usize,
    pub pipelines: usize,
    pub uptime_secs: u64,
    /// 尚未轮询过时为 None
    pub checked_at: Option<DateTime<Utc>>,
}

/// 一次维护清理掉的数量
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Maintenance {
    pub expired_sessions: usize,
    pub pruned_memories: usize,
}

#[async_trait]
pub trait StatusProvider: Send + Sync {
    async fn system_status(&self) -> SystemStatus;

    /// 每次轮询前调用；默认什么都不做
    async fn maintain(&self) -> Maintenance {
        Maintenance::default()
    }
}

pub struct HealthMonitor {
    status_rx: watch::Receiver<SystemStatus>,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl HealthMonitor {
    /// 立即做第一次轮询，之后每隔 interval 一次
    pub fn spawn(provider: Arc<dyn StatusProvider>, interval: Duration, token: CancellationToken) -> Self {
        let (status_tx, status_rx) = watch::channel(SystemStatus::default());
        let period = interval.max(Duration::from_millis(1));
        let stop = token.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {
                        let swept = provider.maintain().await;
                        if swept != Maintenance::default() {
                            tracing::info!(
                                expired_sessions = swept.expired_sessions,
                                pruned_memories = swept.pruned_memories,
                                "maintenance"
                            );
                        }
                        let status = provider.system_status().await;
                        tracing::debug!(
                            active_sessions = status.active_sessions,
                            stored_memories = status.stored_memories,
                            pipelines = status.pipelines,
                            uptime_secs = status.uptime_secs,
                            "health check"
                        );
                        if status_tx.send(status).is_err() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("health monitor stopped");
        });

        Self {
            status_rx,
            token,
            handle,
        }
    }

    /// 最近一次轮询结果
    pub fn status(&self) -> SystemStatus {
        self.status_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SystemStatus> {
        self.status_rx.clone()
    }

    /// 取消并等待后台任务退出
    pub async fn stop(self) {
        self.token.cancel();
        if let Err(e) = self.handle.await {
            tracing::warn!("health monitor task failed: {e}");
        }
    }
}
