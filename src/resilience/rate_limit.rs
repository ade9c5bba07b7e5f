//! 按资源名的滑动窗口限流
//!
//! 每个资源一个窗口（最近 capacity 次放行的时间戳），窗口之间互不阻塞；
//! 同一资源的计数对所有并发调用方共享，更新在该资源自己的 Mutex 内完成。
//! 限流器只做判断，从不 sleep：被拒绝的调用以 RateLimitExceeded 快速失败。

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use tokio::time::Instant;

use crate::config::RateLimitSection;
use crate::core::AgentError;

/// 单个资源的限额
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub window: Duration,
    pub capacity: usize,
}

impl RateLimit {
    pub fn new(capacity: usize, window: Duration) -> Self {
        Self { window, capacity }
    }
}

impl From<&RateLimitSection> for RateLimit {
    fn from(s: &RateLimitSection) -> Self {
        Self::new(s.capacity, s.window())
    }
}

#[derive(Debug)]
struct Window {
    limit: RateLimit,
    hits: VecDeque<Instant>,
}

impl Window {
    fn try_acquire(&mut self, now: Instant) -> bool {
        while let Some(&oldest) = self.hits.front() {
            if now.duration_since(oldest) >= self.limit.window {
                self.hits.pop_front();
            } else {
                break;
            }
        }
        if self.hits.len() < self.limit.capacity {
            self.hits.push_back(now);
            true
        } else {
            false
        }
    }
}

/// 多资源限流器；未配置限额的资源不限流
#[derive(Debug, Default)]
pub struct RateLimiter {
    limits: HashMap<String, RateLimit>,
    windows: RwLock<HashMap<String, Arc<Mutex<Window>>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(sections: &HashMap<String, RateLimitSection>) -> Self {
        let mut limiter = Self::new();
        for (resource, section) in sections {
            limiter.set_limit(resource.clone(), RateLimit::from(section));
        }
        limiter
    }

    pub fn with_limit(mut self, resource: impl Into<String>, limit: RateLimit) -> Self {
        self.set_limit(resource, limit);
        self
    }

    pub fn set_limit(&mut self, resource: impl Into<String>, limit: RateLimit) {
        self.limits.insert(resource.into(), limit);
    }

    pub fn limit_for(&self, resource: &str) -> Option<RateLimit> {
        self.limits.get(resource).copied()
    }

    fn window(&self, resource: &str, limit: RateLimit) -> Arc<Mutex<Window>> {
        if let Some(w) = self
            .windows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(resource)
        {
            return w.clone();
        }
        self.windows
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(resource.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(Window {
                    limit,
                    hits: VecDeque::with_capacity(limit.capacity),
                }))
            })
            .clone()
    }

    /// 放行则记一次并返回 true
    pub fn allow(&self, resource: &str) -> bool {
        let Some(limit) = self.limit_for(resource) else {
            return true;
        };
        let window = self.window(resource, limit);
        let mut guard = window.lock().unwrap_or_else(PoisonError::into_inner);
        guard.try_acquire(Instant::now())
    }

    /// allow 的 Result 版本
    pub fn check(&self, resource: &str) -> Result<(), AgentError> {
        if self.allow(resource) {
            Ok(())
        } else {
            tracing::warn!(resource, "rate limit exceeded");
            Err(AgentError::RateLimitExceeded {
                resource: resource.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter() -> RateLimiter {
        RateLimiter::new().with_limit("calendar", RateLimit::new(2, Duration::from_secs(60)))
    }

    #[tokio::test(start_paused = true)]
    async fn test_third_call_in_window_is_denied() {
        let limiter = limiter();
        assert!(limiter.check("calendar").is_ok());
        assert!(limiter.check("calendar").is_ok());
        let err = limiter.check("calendar").unwrap_err();
        assert_eq!(
            err,
            AgentError::RateLimitExceeded { resource: "calendar".into() }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_elapses() {
        let limiter = limiter();
        assert!(limiter.allow("calendar"));
        assert!(limiter.allow("calendar"));
        assert!(!limiter.allow("calendar"));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(limiter.allow("calendar"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_slides() {
        let limiter = limiter();
        assert!(limiter.allow("calendar"));
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(limiter.allow("calendar"));
        tokio::time::advance(Duration::from_secs(31)).await;
        // 第一次已滑出窗口，第二次仍在
        assert!(limiter.allow("calendar"));
        assert!(!limiter.allow("calendar"));
    }

    #[tokio::test]
    async fn test_resources_are_independent() {
        let limiter = limiter().with_limit("email", RateLimit::new(1, Duration::from_secs(60)));
        assert!(limiter.allow("email"));
        assert!(!limiter.allow("email"));
        assert!(limiter.allow("calendar"));
        // 未配置的资源不限流
        for _ in 0..100 {
            assert!(limiter.allow("storage"));
        }
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_the_counter() {
        let limiter = Arc::new(
            RateLimiter::new().with_limit("storage", RateLimit::new(10, Duration::from_secs(60))),
        );
        let mut handles = Vec::new();
        for _ in 0..50 {
            let l = limiter.clone();
            handles.push(tokio::spawn(async move { l.allow("storage") }));
        }
        let mut allowed = 0;
        for h in handles {
            if h.await.unwrap() {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 10);
    }
}
