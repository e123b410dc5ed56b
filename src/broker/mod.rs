//! In-process topic broker.
//!
//! Topics are `/`-separated strings; subscriptions may use `+` (exactly one
//! segment) and `#` (any remaining segments, terminal only). The broker
//! decouples agents from each other: publishers never see who is listening,
//! and a failing subscriber never blocks delivery to the rest.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::error::RuntimeError;
use crate::message::AgentMessage;

/// Callback invoked for every delivered message. Must not block; agents use
/// it to enqueue onto their own processing queue.
pub type SubscriberFn = Arc<dyn Fn(&str, &AgentMessage) -> Result<(), RuntimeError> + Send + Sync>;

/// Predicate for one-shot subscriptions.
pub type MessagePredicate = Arc<dyn Fn(&AgentMessage) -> bool + Send + Sync>;

#[derive(Clone)]
enum Delivery {
    Callback(SubscriberFn),
    Once(OnceSlot),
}

#[derive(Clone)]
struct OnceSlot {
    predicate: Option<MessagePredicate>,
    state: Arc<WaiterState>,
}

struct WaiterState {
    slot: Mutex<Option<AgentMessage>>,
    notify: Notify,
}

#[derive(Clone)]
struct Subscription {
    subscriber: String,
    delivery: Delivery,
}

/// Handle returned by [`MessageBroker::subscribe_once`]; blocks until a
/// matching message arrives or the timeout expires.
pub struct Waiter {
    topic: String,
    state: Arc<WaiterState>,
}

impl Waiter {
    /// Wait for the message, surfacing [`RuntimeError::Timeout`] when none
    /// arrives in time.
    pub async fn wait(&self, timeout: Duration) -> Result<AgentMessage, RuntimeError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(message) = self.state.slot.lock().take() {
                return Ok(message);
            }
            if tokio::time::timeout_at(deadline, self.state.notify.notified())
                .await
                .is_err()
            {
                // The notification may have raced the deadline.
                return match self.state.slot.lock().take() {
                    Some(message) => Ok(message),
                    None => Err(RuntimeError::Timeout(self.topic.clone())),
                };
            }
        }
    }
}

/// Topic-based publish/subscribe bus.
#[derive(Default)]
pub struct MessageBroker {
    subscribers: Mutex<HashMap<String, Vec<Subscription>>>,
}

impl MessageBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `subscriber` under `topic`.
    ///
    /// Subsumption invariants: an exact duplicate or a topic already covered
    /// by one of the subscriber's wildcard subscriptions is a no-op; a new
    /// wildcard subscription prunes the subscriber's specific subscriptions
    /// it covers.
    pub fn subscribe(&self, topic: &str, subscriber: &str, callback: SubscriberFn) {
        let mut subs = self.subscribers.lock();

        if let Some(entries) = subs.get(topic) {
            if entries.iter().any(|s| s.subscriber == subscriber) {
                info!(topic, subscriber, "already subscribed to exact topic, ignoring");
                return;
            }
        }

        let covered = subs.iter().any(|(existing, entries)| {
            is_wildcard(existing)
                && matches(existing, topic)
                && entries.iter().any(|s| s.subscriber == subscriber)
        });
        if covered {
            info!(
                topic,
                subscriber, "subscription already covered by an existing wildcard, ignoring"
            );
            return;
        }

        if is_wildcard(topic) {
            let to_prune: Vec<String> = subs
                .iter()
                .filter(|(existing, entries)| {
                    !is_wildcard(existing)
                        && matches(topic, existing)
                        && entries.iter().any(|s| s.subscriber == subscriber)
                })
                .map(|(existing, _)| existing.clone())
                .collect();
            for pruned in to_prune {
                if let Some(entries) = subs.get_mut(&pruned) {
                    entries.retain(|s| s.subscriber != subscriber);
                    info!(
                        topic,
                        subscriber,
                        pruned = %pruned,
                        "wildcard subscription overrides existing specific subscription, removing it"
                    );
                    if entries.is_empty() {
                        subs.remove(&pruned);
                    }
                }
            }
        }

        subs.entry(topic.to_string()).or_default().push(Subscription {
            subscriber: subscriber.to_string(),
            delivery: Delivery::Callback(callback),
        });
        info!(topic, subscriber, "subscribed");
    }

    /// Remove the `(topic, subscriber)` pairing; drops the topic entry once
    /// it has no subscribers left.
    pub fn unsubscribe(&self, topic: &str, subscriber: &str) {
        let mut subs = self.subscribers.lock();
        if let Some(entries) = subs.get_mut(topic) {
            let before = entries.len();
            entries.retain(|s| s.subscriber != subscriber);
            if entries.len() < before {
                info!(topic, subscriber, "unsubscribed");
            }
            if entries.is_empty() {
                subs.remove(topic);
            }
        }
    }

    /// Deliver `message` to every subscriber whose topic pattern matches
    /// `topic`. A subscriber's failure is logged and does not prevent
    /// delivery to the others.
    pub fn publish(&self, topic: &str, message: &AgentMessage) {
        debug!(topic, "publishing message");
        let matched: Vec<(String, Subscription)> = {
            let subs = self.subscribers.lock();
            subs.iter()
                .filter(|(pattern, _)| matches(pattern, topic))
                .flat_map(|(pattern, entries)| {
                    entries
                        .iter()
                        .cloned()
                        .map(move |entry| (pattern.clone(), entry))
                })
                .collect()
        };

        let mut fired_once: Vec<(String, String)> = Vec::new();
        for (pattern, sub) in matched {
            match &sub.delivery {
                Delivery::Callback(callback) => {
                    if let Err(e) = callback(topic, message) {
                        error!(
                            topic,
                            subscriber = %sub.subscriber,
                            error = %e,
                            "error dispatching message"
                        );
                    }
                }
                Delivery::Once(slot) => {
                    let accept = slot.predicate.as_ref().map_or(true, |p| p(message));
                    if accept {
                        *slot.state.slot.lock() = Some(message.clone());
                        // notify_one stores a permit, so a waiter that has
                        // not yet registered still sees the message.
                        slot.state.notify.notify_one();
                        fired_once.push((pattern, sub.subscriber.clone()));
                    }
                }
            }
        }

        for (pattern, subscriber) in fired_once {
            self.unsubscribe(&pattern, &subscriber);
        }
    }

    /// Register a transient subscription that auto-unsubscribes once a
    /// message is accepted (by `predicate`, or unconditionally when no
    /// predicate is given). Block on the returned [`Waiter`] to receive it.
    pub fn subscribe_once(&self, topic: &str, predicate: Option<MessagePredicate>) -> Waiter {
        let state = Arc::new(WaiterState {
            slot: Mutex::new(None),
            notify: Notify::new(),
        });
        let subscriber = format!("__once:{}", Uuid::new_v4());
        self.subscribers
            .lock()
            .entry(topic.to_string())
            .or_default()
            .push(Subscription {
                subscriber,
                delivery: Delivery::Once(OnceSlot {
                    predicate,
                    state: state.clone(),
                }),
            });
        Waiter {
            topic: topic.to_string(),
            state,
        }
    }

    #[cfg(test)]
    fn subscription_count(&self, topic: &str) -> usize {
        self.subscribers
            .lock()
            .get(topic)
            .map(|entries| entries.len())
            .unwrap_or(0)
    }
}

fn is_wildcard(topic: &str) -> bool {
    topic.contains('+') || topic.contains('#')
}

/// Check whether a published topic matches a subscribed topic pattern.
fn matches(pattern: &str, topic: &str) -> bool {
    if pattern == topic {
        return true;
    }
    if !is_wildcard(pattern) {
        return false;
    }

    let pattern_parts: Vec<&str> = pattern.split('/').collect();
    let topic_parts: Vec<&str> = topic.split('/').collect();

    let pattern_len = pattern_parts.len();
    let topic_len = topic_parts.len();

    let mut i = 0;
    while i < pattern_len && i < topic_len {
        let part = pattern_parts[i];
        if part == "#" {
            return i == pattern_len - 1;
        }
        if part != "+" && part != topic_parts[i] {
            return false;
        }
        i += 1;
    }

    if i == pattern_len && i == topic_len {
        return true;
    }
    // Trailing `#` matches an empty tail.
    if i == topic_len && pattern_len == i + 1 && pattern_parts[i] == "#" {
        return true;
    }

    false
}
