//! 主备执行
//!
//! 先执行主操作，失败后按顺序尝试备用操作；全部失败时返回主操作的原始错误，
//! 保留根因而不是最后一个备用的错误。

use futures_util::future::BoxFuture;

use crate::core::AgentError;

/// 可延迟执行的异步操作
pub type Operation<T> = Box<dyn FnOnce() -> BoxFuture<'static, Result<T, AgentError>> + Send>;

/// 把闭包装箱成 Operation
pub fn operation<T, F, Fut>(f: F) -> Operation<T>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = Result<T, AgentError>> + Send + 'static,
{
    Box::new(move || Box::pin(f()))
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FallbackExecutor;

impl FallbackExecutor {
    pub fn new() -> Self {
        Self
    }

    pub async fn execute<T>(
        &self,
        primary: Operation<T>,
        fallbacks: Vec<Operation<T>>,
    ) -> Result<T, AgentError> {
        let primary_err = match primary().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };
        tracing::warn!(fallbacks = fallbacks.len(), "primary failed: {primary_err}");

        for (index, fallback) in fallbacks.into_iter().enumerate() {
            match fallback().await {
                Ok(value) => {
                    tracing::info!(index, "fallback succeeded");
                    return Ok(value);
                }
                Err(e) => tracing::warn!(index, "fallback failed: {e}"),
            }
        }
        Err(primary_err)
    }
}
