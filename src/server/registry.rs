//! Registrations held by a broker, keyed by topic.

use std::collections::HashMap;

use crate::bus::SubscriptionId;
use crate::protocol::SubscribeArg;

struct Entry {
    arg: SubscribeArg,
    id: SubscriptionId,
}

/// Remote subscribers per topic, with the local bus subscription feeding each one.
#[derive(Default)]
pub(crate) struct SubscriberRegistry {
    topics: HashMap<String, Vec<Entry>>,
}

impl SubscriberRegistry {
    pub(crate) fn contains(&self, arg: &SubscribeArg) -> bool {
        self.topics
            .get(&arg.topic)
            .is_some_and(|entries| entries.iter().any(|e| e.arg == *arg))
    }

    /// Bus subscription feeding `arg`, if registered.
    pub(crate) fn subscription(&self, arg: &SubscribeArg) -> Option<SubscriptionId> {
        self.topics
            .get(&arg.topic)?
            .iter()
            .find(|e| e.arg == *arg)
            .map(|e| e.id)
    }

    pub(crate) fn insert(&mut self, arg: SubscribeArg, id: SubscriptionId) {
        self.topics
            .entry(arg.topic.clone())
            .or_default()
            .push(Entry { arg, id });
    }

    /// Remove a registration, returning the bus subscription it owned.
    pub(crate) fn remove(&mut self, arg: &SubscribeArg) -> Option<SubscriptionId> {
        let entries = self.topics.get_mut(&arg.topic)?;
        let index = entries.iter().position(|e| e.arg == *arg)?;
        let entry = entries.remove(index);
        if entries.is_empty() {
            self.topics.remove(&arg.topic);
        }
        Some(entry.id)
    }

    pub(crate) fn subscribers(&self, topic: &str) -> Vec<SubscribeArg> {
        self.topics
            .get(topic)
            .map(|entries| entries.iter().map(|e| e.arg.clone()).collect())
            .unwrap_or_default()
    }
}
