//! The queue-side capability a process scales against.

use async_trait::async_trait;

/// Reports pending work and winds down in-flight work on named queues.
///
/// Implementations own their error handling; both calls answer with a
/// plain boolean.
#[async_trait]
pub trait QueueSystem: Send + Sync {
    /// True if `queue` has work waiting or in progress.
    async fn has_pending_work(&self, queue: &str) -> bool;

    /// Ask workers on `queue` to stop taking new work so capacity can drop
    /// to `target` dynos. Returns true iff some in-flight work still needs
    /// to drain.
    async fn quietdown(&self, queue: &str, target: u32) -> bool;
}
