use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use throttle_timing::Nanos;

pub type ConnectionId = [u8; 16];

#[derive(Default)]
pub struct SubscriptionMetrics {
    pub read_bytes: AtomicU64,
    pub write_bytes: AtomicU64,
}

pub struct Subscription {
    pub connection_id: ConnectionId,
    pub channel: Vec<u8>,
    pub subscribed_at: Nanos,
    pub metrics: SubscriptionMetrics,
}

/// Dual-indexed subscriber registry: by channel (for publish fan-out and
/// `channel`/`channels`) and by connection id (for teardown on disconnect).
/// A second identical `(id, channel)` subscribe is a no-op returning
/// success rather than a duplicate failure.
#[derive(Default)]
pub struct Subscriptions {
    by_channel: HashMap<Vec<u8>, Vec<Arc<Subscription>>>,
    by_connection: HashMap<ConnectionId, Vec<Arc<Subscription>>>,
}

impl Subscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, id: ConnectionId, channel: &[u8], now: Nanos) {
        if self.by_channel.get(channel).is_some_and(|subs| subs.iter().any(|s| s.connection_id == id)) {
            return;
        }

        let sub = Arc::new(Subscription {
            connection_id: id,
            channel: channel.to_vec(),
            subscribed_at: now,
            metrics: SubscriptionMetrics::default(),
        });
        self.by_channel.entry(channel.to_vec()).or_default().push(sub.clone());
        self.by_connection.entry(id).or_default().push(sub);
    }

    pub fn unsubscribe(&mut self, id: ConnectionId, channel: &[u8]) -> bool {
        let mut removed = false;
        if let Some(subs) = self.by_channel.get_mut(channel) {
            let before = subs.len();
            subs.retain(|s| s.connection_id != id);
            removed = subs.len() != before;
            if subs.is_empty() {
                self.by_channel.remove(channel);
            }
        }
        if let Some(subs) = self.by_connection.get_mut(&id) {
            subs.retain(|s| s.channel != channel);
            if subs.is_empty() {
                self.by_connection.remove(&id);
            }
        }
        removed
    }

    pub fn subscribers_of(&self, channel: &[u8]) -> &[Arc<Subscription>] {
        self.by_channel.get(channel).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn channels(&self) -> impl Iterator<Item = (&[u8], &[Arc<Subscription>])> + '_ {
        self.by_channel.iter().map(|(name, subs)| (name.as_slice(), subs.as_slice()))
    }

    pub fn drop_all_for(&mut self, id: ConnectionId) {
        if let Some(subs) = self.by_connection.remove(&id) {
            for sub in subs {
                if let Some(channel_subs) = self.by_channel.get_mut(&sub.channel) {
                    channel_subs.retain(|s| s.connection_id != id);
                    if channel_subs.is_empty() {
                        self.by_channel.remove(&sub.channel);
                    }
                }
            }
        }
    }

    pub fn total_subscriptions(&self) -> usize {
        self.by_channel.values().map(Vec::len).sum()
    }

    pub fn total_channels(&self) -> usize {
        self.by_channel.len()
    }
}

impl SubscriptionMetrics {
    pub fn record_publish(&self, bytes_written: u64) {
        self.write_bytes.fetch_add(bytes_written, Ordering::Relaxed);
    }

    pub fn record_receive(&self, bytes_read: u64) {
        self.read_bytes.fetch_add(bytes_read, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_subscribe_is_a_no_op() {
        let mut subs = Subscriptions::new();
        subs.subscribe([1; 16], b"news", Nanos(1));
        subs.subscribe([1; 16], b"news", Nanos(2));
        assert_eq!(subs.subscribers_of(b"news").len(), 1);
    }

    #[test]
    fn drop_all_for_clears_both_indices() {
        let mut subs = Subscriptions::new();
        subs.subscribe([1; 16], b"news", Nanos(1));
        subs.subscribe([1; 16], b"weather", Nanos(1));
        subs.drop_all_for([1; 16]);
        assert!(subs.subscribers_of(b"news").is_empty());
        assert!(subs.subscribers_of(b"weather").is_empty());
        assert_eq!(subs.total_channels(), 0);
    }

    #[test]
    fn unsubscribe_leaves_other_subscribers_intact() {
        let mut subs = Subscriptions::new();
        subs.subscribe([1; 16], b"news", Nanos(1));
        subs.subscribe([2; 16], b"news", Nanos(1));
        assert!(subs.unsubscribe([1; 16], b"news"));
        assert_eq!(subs.subscribers_of(b"news").len(), 1);
    }
}
