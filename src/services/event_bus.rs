//! EventBus service for in-process publish/subscribe.
//!
//! A broadcast-based bus with sequence numbering and topic filtering.
//! Delivery is at-most-once: publishers never wait on subscribers, and a
//! subscriber that falls behind loses the messages it missed.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::domain::errors::DomainResult;

/// Unique identifier for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Message carried on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: EventId,
    /// Assigned by the bus on publish
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub topic: String,
    pub from: String,
    pub to: Option<String>,
    /// Message type, e.g. `task` or `heartbeat`
    pub kind: String,
    pub payload: serde_json::Value,
}

impl Envelope {
    pub fn new(
        topic: impl Into<String>,
        from: impl Into<String>,
        kind: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: EventId::new(),
            sequence: 0,
            timestamp: Utc::now(),
            topic: topic.into(),
            from: from.into(),
            to: None,
            kind: kind.into(),
            payload,
        }
    }

    pub fn to(mut self, recipient: impl Into<String>) -> Self {
        self.to = Some(recipient.into());
        self
    }
}

/// Whether `topic` matches `pattern`.
///
/// Patterns are `*` (everything), `prefix.*` (the prefix itself and
/// anything below it) or an exact topic.
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix(".*") {
        return topic == prefix
            || topic
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with('.'));
    }
    pattern == topic
}

/// Configuration for the EventBus.
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// Channel capacity for the broadcast channel.
    pub channel_capacity: usize,
    /// Number of recent envelopes retained for replay.
    pub history_capacity: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
            history_capacity: 200,
        }
    }
}

/// Receiver filtered to one topic pattern.
pub struct TopicSubscription {
    pattern: String,
    receiver: broadcast::Receiver<Envelope>,
}

impl TopicSubscription {
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Next matching envelope, or `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<Envelope> {
        loop {
            match self.receiver.recv().await {
                Ok(envelope) if topic_matches(&self.pattern, &envelope.topic) => {
                    return Some(envelope)
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(pattern = %self.pattern, skipped, "subscriber lagged, messages dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Handle to a spawned handler subscription.
pub struct Subscription {
    pattern: String,
    handle: JoinHandle<()>,
}

impl Subscription {
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn is_active(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Stop delivering to this handler.
    pub fn cancel(&self) {
        self.handle.abort();
    }
}

/// Process-local event bus. Constructed explicitly and shared by `Arc`.
pub struct EventBus {
    sender: broadcast::Sender<Envelope>,
    sequence: AtomicU64,
    history: RwLock<VecDeque<Envelope>>,
    config: EventBusConfig,
}

impl EventBus {
    /// Create a new EventBus with the given configuration.
    pub fn new(config: EventBusConfig) -> Self {
        let (sender, _) = broadcast::channel(config.channel_capacity.max(1));
        Self {
            sender,
            sequence: AtomicU64::new(0),
            history: RwLock::new(VecDeque::with_capacity(config.history_capacity)),
            config,
        }
    }

    /// Publish an envelope, returning the sequence number it was given.
    pub async fn publish(&self, mut envelope: Envelope) -> u64 {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        envelope.sequence = seq;

        {
            let mut history = self.history.write().await;
            if self.config.history_capacity > 0 {
                if history.len() >= self.config.history_capacity {
                    history.pop_front();
                }
                history.push_back(envelope.clone());
            }
        }

        // No receivers is not an error
        let _ = self.sender.send(envelope);
        seq
    }

    /// Subscribe to envelopes whose topic matches `pattern`.
    pub fn subscribe(&self, pattern: impl Into<String>) -> TopicSubscription {
        TopicSubscription {
            pattern: pattern.into(),
            receiver: self.sender.subscribe(),
        }
    }

    /// Run `handler` for each matching envelope on its own task.
    ///
    /// Handler errors are logged and delivery continues. A panicking
    /// handler only takes down its own task.
    pub fn subscribe_with<F, Fut>(&self, pattern: impl Into<String>, handler: F) -> Subscription
    where
        F: Fn(Envelope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = DomainResult<()>> + Send + 'static,
    {
        let pattern = pattern.into();
        let mut subscription = self.subscribe(pattern.clone());
        let handle = tokio::spawn(async move {
            while let Some(envelope) = subscription.recv().await {
                let topic = envelope.topic.clone();
                if let Err(e) = handler(envelope).await {
                    tracing::warn!(topic = %topic, error = %e, "event handler failed");
                }
            }
        });
        Subscription { pattern, handle }
    }

    /// Most recent envelopes, oldest first.
    pub async fn recent_events(&self, limit: usize) -> Vec<Envelope> {
        let history = self.history.read().await;
        let skip = history.len().saturating_sub(limit);
        history.iter().skip(skip).cloned().collect()
    }

    /// Get the current sequence number.
    pub fn current_sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    /// Get the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EventBusConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::domain::errors::DomainError;

    fn env(topic: &str) -> Envelope {
        Envelope::new(topic, "test", "note", serde_json::json!({}))
    }

    #[test]
    fn test_topic_matching() {
        assert!(topic_matches("*", "anything.at.all"));
        assert!(topic_matches("arbiter.*", "arbiter.task.completed"));
        assert!(topic_matches("arbiter.*", "arbiter"));
        assert!(!topic_matches("arbiter.*", "arbiters.task"));
        assert!(topic_matches("cognition.trace", "cognition.trace"));
        assert!(!topic_matches("cognition.trace", "cognition.trace.x"));
    }

    #[tokio::test]
    async fn test_publish_assigns_sequence() {
        let bus = EventBus::default();
        assert_eq!(bus.publish(env("a")).await, 0);
        assert_eq!(bus.publish(env("a")).await, 1);
        assert_eq!(bus.current_sequence(), 2);
    }

    #[tokio::test]
    async fn test_topic_subscription_filters() {
        let bus = EventBus::default();
        let mut sub = bus.subscribe("arbiter.*");
        bus.publish(env("cognition.trace")).await;
        bus.publish(env("arbiter.heartbeat").to("monitor")).await;

        let received = sub.recv().await.unwrap();
        assert_eq!(received.topic, "arbiter.heartbeat");
        assert_eq!(received.sequence, 1);
        assert_eq!(received.to.as_deref(), Some("monitor"));
    }

    #[tokio::test]
    async fn test_recent_events_bounded() {
        let bus = EventBus::new(EventBusConfig {
            channel_capacity: 16,
            history_capacity: 3,
        });
        for i in 0..5 {
            bus.publish(env(&format!("t.{i}"))).await;
        }
        let recent = bus.recent_events(10).await;
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].topic, "t.2");
        let last = bus.recent_events(1).await;
        assert_eq!(last[0].topic, "t.4");
    }

    #[tokio::test]
    async fn test_failing_handler_is_isolated() {
        let bus = EventBus::default();
        let seen = Arc::new(AtomicUsize::new(0));

        let _bad = bus.subscribe_with("x", |_| async {
            Err(DomainError::ExecutionFailed("handler broke".into()))
        });
        let counter = seen.clone();
        let good = bus.subscribe_with("x", move |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        bus.publish(env("x")).await;
        bus.publish(env("x")).await;

        for _ in 0..50 {
            if seen.load(Ordering::SeqCst) == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(seen.load(Ordering::SeqCst), 2);
        assert!(good.is_active());
        good.cancel();
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus = EventBus::default();
        assert_eq!(bus.subscriber_count(), 0);
        bus.publish(env("nobody.listens")).await;
        assert_eq!(bus.recent_events(5).await.len(), 1);
    }
}
