//! 指数退避重试
//!
//! 第 k 次重试（0 起）前等待 backoff_factor × 2^k 秒，开启 jitter 时再乘以 [0.5, 1.0] 的均匀随机数。
//! 只有 kind 在可重试集合内的失败才会重试；重试耗尽时把最后一次失败包装为 RetriesExhausted。
//! 等待使用 tokio::time::sleep，不阻塞工作线程。

use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::config::RetrySection;
use crate::core::{AgentError, ErrorKind};

/// 单次等待的上限
pub const MAX_BACKOFF: Duration = Duration::from_secs(600);

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_factor: f64,
    pub jitter: bool,
    retryable: HashSet<ErrorKind>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetrySection::default())
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff_factor: f64) -> Self {
        Self {
            max_retries,
            backoff_factor,
            ..Self::default()
        }
    }

    pub fn from_config(cfg: &RetrySection) -> Self {
        Self {
            max_retries: cfg.max_retries,
            backoff_factor: cfg.backoff_factor,
            jitter: cfg.jitter,
            retryable: cfg.retryable_set(),
        }
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_retryable(mut self, kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        self.retryable = kinds.into_iter().collect();
        self
    }

    /// 配置错误与业务校验错误永不重试，不论集合如何配置
    pub fn is_retryable(&self, err: &AgentError) -> bool {
        match err.kind() {
            ErrorKind::Configuration | ErrorKind::Agent => false,
            kind => self.retryable.contains(&kind),
        }
    }

    /// 第 attempt 次重试前的基础等待（不含 jitter），不超过 MAX_BACKOFF
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exp = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = (self.backoff_factor * 2f64.powi(exp)).max(0.0);
        Duration::try_from_secs_f64(secs).map_or(MAX_BACKOFF, |d| d.min(MAX_BACKOFF))
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if self.jitter {
            base.mul_f64(rand::rng().random_range(0.5..=1.0))
        } else {
            base
        }
    }

    /// 执行 op，按策略重试；总调用次数最多 1 + max_retries
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, AgentError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AgentError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if !self.is_retryable(&err) => return Err(err),
                Err(err) if attempt >= self.max_retries => {
                    tracing::warn!(attempts = attempt + 1, "retries exhausted: {err}");
                    return Err(AgentError::RetriesExhausted {
                        attempts: attempt + 1,
                        last: Box::new(err),
                    });
                }
                Err(err) => {
                    let delay = self.delay_for(attempt);
                    tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "retrying after: {err}");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
