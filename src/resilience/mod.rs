//! 弹性层：重试退避、滑动窗口限流、主备执行
//!
//! 三者相互独立、可组合；Resilience 把限流 + 重试组合成对外部协作方的一次「受保护调用」。

pub mod fallback;
pub mod rate_limit;
pub mod retry;

pub use fallback::{operation, FallbackExecutor, Operation};
pub use rate_limit::{RateLimit, RateLimiter};
pub use retry::RetryPolicy;

use std::future::Future;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::core::AgentError;

/// 限流器 + 重试策略，对每次外部调用生效
#[derive(Debug, Clone)]
pub struct Resilience {
    pub retry: RetryPolicy,
    pub limiter: Arc<RateLimiter>,
}

impl Default for Resilience {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            limiter: Arc::new(RateLimiter::new()),
        }
    }
}

impl Resilience {
    pub fn new(retry: RetryPolicy, limiter: RateLimiter) -> Self {
        Self {
            retry,
            limiter: Arc::new(limiter),
        }
    }

    pub fn from_config(cfg: &AppConfig) -> Self {
        Self::new(
            RetryPolicy::from_config(&cfg.retry),
            RateLimiter::from_config(&cfg.rate_limit),
        )
    }

    /// 每次尝试前检查 resource 的限额，再按重试策略执行
    ///
    /// 限流拒绝只有在 RateLimitExceeded 被配置为可重试时才会参与退避。
    pub async fn call<T, F, Fut>(&self, resource: &str, mut op: F) -> Result<T, AgentError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AgentError>>,
    {
        let limiter = self.limiter.clone();
        self.retry
            .run(|| {
                let admitted = limiter.check(resource);
                let fut = admitted.map(|_| op());
                async move {
                    match fut {
                        Ok(fut) => fut.await,
                        Err(e) => Err(e),
                    }
                }
            })
            .await
    }
}
