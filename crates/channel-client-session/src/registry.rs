//! Channel subscription registry.
//!
//! One subscriber per channel. Each subscriber owns an unbounded queue, so
//! dispatch from the update pump never waits on subscriber processing.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{PoisonError, RwLock},
};

use channel_client_core::{ChannelId, MessageBatch};
use thiserror::Error;
use tokio::{sync::mpsc, task::JoinHandle};

/// Receiving end of a channel subscription.
pub type BatchReceiver = mpsc::UnboundedReceiver<MessageBatch>;

/// Registry error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Already subscribed to channel {0}")]
    AlreadySubscribed(ChannelId),
}

/// Result of one [`SubscriptionRegistry::dispatch`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Batches handed to a live subscriber.
    pub delivered: usize,
    /// Subscribers removed because their receiver was gone.
    pub pruned: usize,
}

/// Active channel subscribers keyed by channel id.
#[derive(Default)]
pub struct SubscriptionRegistry {
    subscribers: RwLock<HashMap<ChannelId, mpsc::UnboundedSender<MessageBatch>>>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a queue for `channel_id`.
    ///
    /// # Errors
    /// Returns error if the channel already has a subscriber.
    pub fn subscribe(&self, channel_id: ChannelId) -> Result<BatchReceiver, RegistryError> {
        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if subscribers.contains_key(&channel_id) {
            return Err(RegistryError::AlreadySubscribed(channel_id));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        subscribers.insert(channel_id, tx);
        Ok(rx)
    }

    /// Register a callback for `channel_id`.
    ///
    /// The callback runs on a forwarder task, once per batch and in order.
    /// The task ends when the channel is unsubscribed.
    ///
    /// # Errors
    /// Returns error if the channel already has a subscriber.
    pub fn subscribe_with<F>(
        &self,
        channel_id: ChannelId,
        mut callback: F,
    ) -> Result<JoinHandle<()>, RegistryError>
    where
        F: FnMut(MessageBatch) + Send + 'static,
    {
        let mut rx = self.subscribe(channel_id)?;
        Ok(tokio::spawn(async move {
            while let Some(batch) = rx.recv().await {
                callback(batch);
            }
        }))
    }

    /// Remove the subscriber for `channel_id`.
    ///
    /// Returns whether a subscriber was removed.
    pub fn unsubscribe(&self, channel_id: ChannelId) -> bool {
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&channel_id)
            .is_some()
    }

    /// Whether `channel_id` has a subscriber.
    #[must_use]
    pub fn contains(&self, channel_id: ChannelId) -> bool {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&channel_id)
    }

    /// Number of subscribed channels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no channel is subscribed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver each batch to its channel's subscriber.
    ///
    /// Batches for channels without a subscriber are dropped. A subscriber
    /// whose receiver is gone is unsubscribed.
    pub fn dispatch(&self, batches: BTreeMap<ChannelId, MessageBatch>) -> DispatchOutcome {
        let mut delivered = 0;
        let mut closed = Vec::new();
        {
            let subscribers = self
                .subscribers
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            for (channel_id, batch) in batches {
                let Some(tx) = subscribers.get(&channel_id) else {
                    continue;
                };
                if tx.send(batch).is_ok() {
                    delivered += 1;
                } else {
                    closed.push(channel_id);
                }
            }
        }

        if closed.is_empty() {
            return DispatchOutcome {
                delivered,
                pruned: 0,
            };
        }

        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let mut pruned = 0;
        for channel_id in closed {
            // A fresh subscription may have replaced the closed one meanwhile.
            if subscribers
                .get(&channel_id)
                .is_some_and(mpsc::UnboundedSender::is_closed)
            {
                subscribers.remove(&channel_id);
                pruned += 1;
                tracing::debug!(channel_id, "Subscriber dropped its receiver, unsubscribed");
            }
        }
        DispatchOutcome { delivered, pruned }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(channel_id: ChannelId) -> MessageBatch {
        MessageBatch::new(channel_id)
    }

    #[test]
    fn test_double_subscribe_is_rejected() {
        let registry = SubscriptionRegistry::new();
        let _rx = registry.subscribe(10).unwrap();
        assert_eq!(
            registry.subscribe(10).unwrap_err(),
            RegistryError::AlreadySubscribed(10)
        );

        assert!(registry.unsubscribe(10));
        assert!(registry.subscribe(10).is_ok());
    }

    #[test]
    fn test_unsubscribe_unknown_is_noop() {
        let registry = SubscriptionRegistry::new();
        assert!(!registry.unsubscribe(42));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_dispatch_routes_by_channel() {
        let registry = SubscriptionRegistry::new();
        let mut rx10 = registry.subscribe(10).unwrap();
        let mut rx20 = registry.subscribe(20).unwrap();

        let batches = BTreeMap::from([(10, batch(10)), (30, batch(30))]);
        assert_eq!(registry.dispatch(batches).delivered, 1);

        assert_eq!(rx10.try_recv().unwrap().channel_id, 10);
        assert!(rx20.try_recv().is_err());
    }

    #[test]
    fn test_dispatch_prunes_dropped_receiver() {
        let registry = SubscriptionRegistry::new();
        drop(registry.subscribe(10).unwrap());
        let mut rx20 = registry.subscribe(20).unwrap();

        let outcome = registry.dispatch(BTreeMap::from([(10, batch(10)), (20, batch(20))]));
        assert_eq!(
            outcome,
            DispatchOutcome {
                delivered: 1,
                pruned: 1,
            }
        );
        assert!(!registry.contains(10));
        assert!(registry.contains(20));
        assert_eq!(rx20.try_recv().unwrap().channel_id, 20);

        // The channel can be subscribed again.
        assert!(registry.subscribe(10).is_ok());
    }

    #[test]
    fn test_dispatch_without_batch_keeps_dropped_receiver() {
        let registry = SubscriptionRegistry::new();
        drop(registry.subscribe(10).unwrap());
        assert_eq!(registry.dispatch(BTreeMap::new()), DispatchOutcome::default());
        assert!(registry.contains(10));
    }

    #[tokio::test]
    async fn test_callback_runs_per_batch() {
        let registry = SubscriptionRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let forwarder = registry
            .subscribe_with(10, move |batch| {
                let _ = tx.send(batch.channel_id);
            })
            .unwrap();

        registry.dispatch(BTreeMap::from([(10, batch(10))]));
        registry.dispatch(BTreeMap::from([(10, batch(10))]));
        assert_eq!(rx.recv().await, Some(10));
        assert_eq!(rx.recv().await, Some(10));

        registry.unsubscribe(10);
        forwarder.await.unwrap();
        assert_eq!(rx.recv().await, None);
    }
}
