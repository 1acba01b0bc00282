//! Realtime hub for change notifications.
//!
//! Tracks open subscriptions and fans change events out to every subscriber
//! of the affected table.
//!
//! Channel keys are scoped to the session that opened them, as with a hosted
//! realtime client: two sessions may both listen on the same key. Within one
//! session a key is a single slot, and subscribing under a key that session
//! already uses displaces the earlier subscriber, which stops receiving
//! events without being told. Collections avoid this by deriving a distinct
//! key per scope.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tasksync_engine::{ChangeEvent, EventSink, SubscriptionHandle};

/// Identifies the session that owns a subscription.
pub type SessionId = String;

/// A single open subscription.
#[derive(Debug)]
pub struct Subscriber {
    /// Identifier distinguishing re-subscriptions on one key
    pub id: String,
    /// Table the subscriber listens to
    pub table: String,
    /// Channel to push events to this subscriber
    pub sink: EventSink,
}

/// Manages open subscriptions, keyed by session and channel.
///
/// Thread-safe and can be shared via `Arc`.
#[derive(Debug, Default)]
pub struct RealtimeHub {
    channels: DashMap<(SessionId, String), Subscriber>,
    next_id: AtomicU64,
}

impl RealtimeHub {
    /// Create an empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a hub wrapped in Arc for sharing.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Register a subscriber for `session` under `channel`, displacing any
    /// previous subscriber that session had on the same key.
    pub fn subscribe(
        &self,
        session: &str,
        channel: &str,
        table: &str,
        sink: EventSink,
    ) -> SubscriptionHandle {
        let id = format!("sub-{}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let subscriber = Subscriber {
            id: id.clone(),
            table: table.to_string(),
            sink,
        };

        let key = (session.to_string(), channel.to_string());
        if let Some(previous) = self.channels.insert(key, subscriber) {
            tracing::warn!(
                session = %session,
                channel = %channel,
                displaced = %previous.id,
                "channel key reused, previous subscriber disconnected"
            );
        }
        tracing::info!(
            session = %session,
            channel = %channel,
            subscription = %id,
            table = %table,
            "subscription opened"
        );

        SubscriptionHandle {
            channel: channel.to_string(),
            id,
        }
    }

    /// Remove a subscription. A handle whose subscriber was displaced is ignored.
    pub fn unsubscribe(&self, session: &str, handle: &SubscriptionHandle) {
        let key = (session.to_string(), handle.channel.clone());
        let removed = self.channels.remove_if(&key, |_, sub| sub.id == handle.id);
        if removed.is_some() {
            tracing::info!(
                session = %session,
                channel = %handle.channel,
                subscription = %handle.id,
                "subscription closed"
            );
        }
    }

    /// Push `event` to every subscriber of its table.
    ///
    /// Returns the number of subscribers that received it. Subscribers whose
    /// receiver is gone are dropped.
    pub fn broadcast(&self, event: &ChangeEvent) -> usize {
        let mut sent = 0;
        let mut closed = Vec::new();

        for entry in self.channels.iter() {
            let sub = entry.value();
            if sub.table != event.table {
                continue;
            }
            if sub.sink.send(event.clone()).is_ok() {
                sent += 1;
            } else {
                closed.push((entry.key().clone(), sub.id.clone()));
            }
        }

        for (key, id) in closed {
            self.channels.remove_if(&key, |_, sub| sub.id == id);
        }

        tracing::debug!(
            kind = ?event.kind,
            record_id = ?event.record_id(),
            recipients = sent,
            "change broadcast"
        );

        sent
    }

    /// Whether `session` has a live subscription on `channel`.
    pub fn is_subscribed(&self, session: &str, channel: &str) -> bool {
        let key = (session.to_string(), channel.to_string());
        self.channels.contains_key(&key)
    }

    /// Get the number of open subscriptions across all sessions.
    pub fn subscription_count(&self) -> usize {
        self.channels.len()
    }
}
