// Cooperative scheduling
// Long stretches of work hand control back to the runtime at defined checkpoints

use async_trait::async_trait;

/// Yield point used by the engine save path and the indexing pipeline
#[async_trait]
pub trait Scheduler: Send + Sync {
    async fn yield_now(&self);
}

/// Yields to the tokio scheduler so other tasks on the same worker make progress
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioScheduler;

#[async_trait]
impl Scheduler for TokioScheduler {
    #[inline]
    async fn yield_now(&self) {
        tokio::task::yield_now().await;
    }
}
