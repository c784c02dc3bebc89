use std::sync::Arc;

use dashmap::{DashMap, DashSet};

use tidegate_core::protocol::Envelope;

/// Receives notifications fanned out from the backend link.
pub trait Subscriber: Send + Sync {
    /// Deliver one notification. Returning `false` means the subscriber is
    /// gone and its entry can be pruned.
    fn deliver(&self, envelope: &Envelope) -> bool;
}

/// Identity of one subscription on a channel: which socket, via which command.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionKey {
    pub socket_id: String,
    pub command: String,
}

impl SubscriptionKey {
    pub fn new(socket_id: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            socket_id: socket_id.into(),
            command: command.into(),
        }
    }
}

/// channel -> subscribers, socket -> (channel, command).
///
/// The reverse index lets a disconnecting socket drop every subscription it
/// holds without asking the backend.
#[derive(Default)]
pub struct SubscriptionTable {
    channel_to_subscribers: DashMap<String, DashMap<SubscriptionKey, Arc<dyn Subscriber>>>,
    socket_to_channels: DashMap<String, DashSet<(String, String)>>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, channel: &str, key: SubscriptionKey, subscriber: Arc<dyn Subscriber>) {
        self.socket_to_channels
            .entry(key.socket_id.clone())
            .or_insert_with(DashSet::new)
            .insert((channel.to_string(), key.command.clone()));

        self.channel_to_subscribers
            .entry(channel.to_string())
            .or_insert_with(DashMap::new)
            .insert(key, subscriber);
    }

    /// Returns whether a subscription was removed.
    pub fn unsubscribe(&self, channel: &str, key: &SubscriptionKey) -> bool {
        let removed = self
            .channel_to_subscribers
            .get(channel)
            .map(|subs| subs.remove(key).is_some())
            .unwrap_or(false);
        self.channel_to_subscribers
            .remove_if(channel, |_, subs| subs.is_empty());

        if let Some(set) = self.socket_to_channels.get(&key.socket_id) {
            set.remove(&(channel.to_string(), key.command.clone()));
        }
        self.socket_to_channels
            .remove_if(&key.socket_id, |_, set| set.is_empty());

        removed
    }

    /// Drop every subscription held by `socket_id`. Returns how many.
    pub fn cleanup_socket(&self, socket_id: &str) -> usize {
        let Some((_, held)) = self.socket_to_channels.remove(socket_id) else {
            return 0;
        };
        let mut removed = 0;
        for entry in held.iter() {
            let (channel, command) = entry.key();
            let key = SubscriptionKey::new(socket_id, command.as_str());
            if let Some(subs) = self.channel_to_subscribers.get(channel) {
                if subs.remove(&key).is_some() {
                    removed += 1;
                }
            }
            self.channel_to_subscribers
                .remove_if(channel, |_, subs| subs.is_empty());
        }
        removed
    }

    /// Fan `envelope` out to every subscriber of its `type`.
    /// Returns the number of subscribers it reached.
    pub fn publish(&self, envelope: &Envelope) -> usize {
        // Snapshot first so no shard lock is held while delivering.
        let targets: Vec<(SubscriptionKey, Arc<dyn Subscriber>)> = match self
            .channel_to_subscribers
            .get(&envelope.msg_type)
        {
            Some(subs) => subs
                .iter()
                .map(|e| (e.key().clone(), Arc::clone(e.value())))
                .collect(),
            None => return 0,
        };

        let mut delivered = 0;
        for (key, subscriber) in targets {
            if subscriber.deliver(envelope) {
                delivered += 1;
            } else {
                tracing::debug!(channel = %envelope.msg_type, socket = %key.socket_id, "pruning closed subscriber");
                self.unsubscribe(&envelope.msg_type, &key);
            }
        }
        delivered
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channel_to_subscribers
            .get(channel)
            .map(|subs| subs.len())
            .unwrap_or(0)
    }

    pub fn is_subscribed(&self, channel: &str, key: &SubscriptionKey) -> bool {
        self.channel_to_subscribers
            .get(channel)
            .map(|subs| subs.contains_key(key))
            .unwrap_or(false)
    }

    /// Channels currently held by one socket.
    pub fn channels_of(&self, socket_id: &str) -> Vec<String> {
        self.socket_to_channels
            .get(socket_id)
            .map(|set| set.iter().map(|e| e.key().0.clone()).collect())
            .unwrap_or_default()
    }
}
