use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// The unit of work bound to a task.
///
/// Implementations should observe `cancel` and return early once it fires;
/// the scheduler never interrupts a running executor on its own.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, cancel: CancellationToken) -> anyhow::Result<Value>;
}

/// Adapter turning an async closure into a [`TaskExecutor`].
pub struct FnExecutor<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> TaskExecutor for FnExecutor<F>
where
    F: Fn(CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Value>> + Send,
{
    async fn execute(&self, cancel: CancellationToken) -> anyhow::Result<Value> {
        (self.f)(cancel).await
    }
}

pub fn executor_fn<F, Fut>(f: F) -> Arc<dyn TaskExecutor>
where
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    Arc::new(FnExecutor { f })
}

/// 重试策略插件
pub trait RetryStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// Backoff before the task is re-queued after its `attempt`-th failure.
    /// `None` re-queues immediately.
    fn next_delay(&self, attempt: u32, error: &str) -> Option<Duration>;

    /// Fatal errors skip the remaining retry budget.
    fn is_fatal_error(&self, _error: &str) -> bool {
        false
    }
}

/// Default strategy: re-queue at the back of the queue without waiting.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDelay;

impl RetryStrategy for NoDelay {
    fn name(&self) -> &str {
        "none"
    }

    fn next_delay(&self, _attempt: u32, _error: &str) -> Option<Duration> {
        None
    }
}
