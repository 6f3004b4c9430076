//! Process-local event bus.
//!
//! This module contains:
//! - `EventBus` trait: the local publish/subscribe registry remote delivery feeds into
//! - `EventHandler` trait: for processing events published on a topic
//! - `LocalBus`: in-memory implementation

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::protocol::EventArgs;

pub mod local;

pub use local::LocalBus;

// ============================================================================
// Traits
// ============================================================================

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors that can occur while handling published events.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Handler failed: {0}")]
    Handler(String),
}

/// Identifier returned by a subscription, used to remove it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub(crate) u64);

/// Handler for events published on a topic.
pub trait EventHandler: Send + Sync {
    /// Process one occurrence.
    ///
    /// Arguments are shared between all handlers of the topic.
    fn handle(&self, args: Arc<EventArgs>) -> BoxFuture<'static, Result<()>>;
}

/// Outcome of a publish.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PublishResult {
    /// Handlers invoked successfully.
    pub handled: usize,
    /// Handlers that returned an error.
    pub failed: usize,
}

/// Interface to the local publish/subscribe registry.
///
/// Implementations provide their own mutual exclusion: publishes arrive concurrently
/// from inbound remote calls and from the application itself.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Register a handler for every future occurrence of `topic`.
    async fn subscribe(&self, topic: &str, handler: Arc<dyn EventHandler>) -> SubscriptionId;

    /// Register a handler for the next occurrence of `topic` only.
    async fn subscribe_once(&self, topic: &str, handler: Arc<dyn EventHandler>)
        -> SubscriptionId;

    /// Remove a handler. Returns `false` if it was not registered.
    async fn unsubscribe(&self, topic: &str, id: SubscriptionId) -> bool;

    /// Whether the handler `id` is still registered for `topic`.
    ///
    /// A once-handler stops being registered as soon as a publish selects it.
    async fn is_subscribed(&self, topic: &str, id: SubscriptionId) -> bool;

    /// Whether any handler is registered for `topic`.
    async fn has_subscribers(&self, topic: &str) -> bool;

    /// Invoke every handler registered for `topic`.
    ///
    /// Publishing to a topic without handlers is a no-op.
    async fn publish(&self, topic: &str, args: EventArgs) -> PublishResult;
}

// ============================================================================
// Closure adapter
// ============================================================================

struct FnHandler<F> {
    f: F,
}

impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(Arc<EventArgs>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    fn handle(&self, args: Arc<EventArgs>) -> BoxFuture<'static, Result<()>> {
        Box::pin((self.f)(args))
    }
}

/// Wrap an async closure as an [`EventHandler`].
///
/// ```ignore
/// let handler = handler_fn(|args| async move {
///     println!("received {:?}", args);
///     Ok(())
/// });
/// bus.subscribe("orders", handler).await;
/// ```
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn EventHandler>
where
    F: Fn(Arc<EventArgs>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(FnHandler { f })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_handler_fn_invokes_closure() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let handler = handler_fn(move |args| {
            let counter = counter.clone();
            async move {
                assert_eq!(*args, vec![json!(1)]);
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        handler.handle(Arc::new(vec![json!(1)])).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_handler_fn_propagates_error() {
        let handler = handler_fn(|_| async { Err(BusError::Handler("boom".to_string())) });
        let err = handler.handle(Arc::new(vec![])).await.unwrap_err();
        assert_eq!(err.to_string(), "Handler failed: boom");
    }
}
