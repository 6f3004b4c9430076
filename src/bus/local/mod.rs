//! In-memory topic registry.
//!
//! Routes published events directly to handlers registered in this process.
//! Remote deliveries received by a `Client` land here too, so application code
//! cannot tell a remote event from a local one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::{EventBus, EventHandler, PublishResult, SubscriptionId};
use crate::protocol::EventArgs;

struct Subscription {
    id: SubscriptionId,
    handler: Arc<dyn EventHandler>,
    once: bool,
}

/// In-process event bus.
///
/// Handlers run in registration order on the publishing task.
#[derive(Default)]
pub struct LocalBus {
    topics: RwLock<HashMap<String, Vec<Subscription>>>,
    next_id: AtomicU64,
}

impl LocalBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    async fn add(&self, topic: &str, handler: Arc<dyn EventHandler>, once: bool) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let count = {
            let mut topics = self.topics.write().await;
            let subs = topics.entry(topic.to_string()).or_default();
            subs.push(Subscription { id, handler, once });
            subs.len()
        };

        debug!(topic = %topic, once, handler_count = count, "Handler subscribed");
        id
    }

    /// Select the handlers for one occurrence.
    ///
    /// One-shot handlers are removed under the same write lock that selects them,
    /// so two concurrent publishes never both see the same one-shot handler.
    async fn take_handlers(&self, topic: &str) -> Vec<Arc<dyn EventHandler>> {
        let mut topics = self.topics.write().await;
        let Some(subs) = topics.get_mut(topic) else {
            return Vec::new();
        };

        let handlers: Vec<_> = subs.iter().map(|s| s.handler.clone()).collect();
        subs.retain(|s| !s.once);
        if subs.is_empty() {
            topics.remove(topic);
        }
        handlers
    }
}

#[async_trait]
impl EventBus for LocalBus {
    async fn subscribe(&self, topic: &str, handler: Arc<dyn EventHandler>) -> SubscriptionId {
        self.add(topic, handler, false).await
    }

    async fn subscribe_once(
        &self,
        topic: &str,
        handler: Arc<dyn EventHandler>,
    ) -> SubscriptionId {
        self.add(topic, handler, true).await
    }

    async fn unsubscribe(&self, topic: &str, id: SubscriptionId) -> bool {
        let mut topics = self.topics.write().await;
        let Some(subs) = topics.get_mut(topic) else {
            return false;
        };

        let before = subs.len();
        subs.retain(|s| s.id != id);
        let removed = subs.len() != before;
        if subs.is_empty() {
            topics.remove(topic);
        }
        removed
    }

    async fn is_subscribed(&self, topic: &str, id: SubscriptionId) -> bool {
        self.topics
            .read()
            .await
            .get(topic)
            .is_some_and(|subs| subs.iter().any(|s| s.id == id))
    }

    async fn has_subscribers(&self, topic: &str) -> bool {
        self.topics
            .read()
            .await
            .get(topic)
            .is_some_and(|subs| !subs.is_empty())
    }

    #[tracing::instrument(name = "bus.publish", skip_all, fields(topic = %topic))]
    async fn publish(&self, topic: &str, args: EventArgs) -> PublishResult {
        let handlers = self.take_handlers(topic).await;
        if handlers.is_empty() {
            debug!("Published event (no handlers)");
            return PublishResult::default();
        }

        let args = Arc::new(args);
        let mut result = PublishResult::default();
        for handler in handlers {
            match handler.handle(Arc::clone(&args)).await {
                Ok(()) => result.handled += 1,
                Err(e) => {
                    warn!(error = %e, "Handler failed");
                    result.failed += 1;
                }
            }
        }

        debug!(
            handled = result.handled,
            failed = result.failed,
            "Published event"
        );
        result
    }
}
