//! Live delivery of frames to connected users.
//!
//! The [`DeliveryRouter`] maps each connected user to a single subscription
//! (a bounded outbound channel drained by the connection's writer task) and
//! tracks which subscriptions have joined which broadcast [`Topic`]s.
//!
//! Delivery is best-effort. Publishing to a user with no subscription is a
//! silent no-op, and every send is bounded by the delivery timeout so a slow
//! subscriber can only delay its own deliveries.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use futures_util::future::join_all;
use parley_proto::frame::ServerFrame;
use parley_proto::topic::Topic;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

/// Default capacity of each subscription's outbound channel.
pub const DEFAULT_OUTBOUND_BUFFER: usize = 256;

/// Default bound on a single delivery attempt.
pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_millis(500);

/// Identifies one live subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(Uuid);

impl SubscriptionHandle {
    fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl std::fmt::Display for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A registered subscription: its handle and the receiving end of its
/// outbound channel.
#[derive(Debug)]
pub struct Subscription {
    /// Handle used to unsubscribe and to manage topic membership.
    pub handle: SubscriptionHandle,
    /// Frames routed to this subscription.
    pub receiver: mpsc::Receiver<ServerFrame>,
}

/// Result of a delivery attempt that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The frame was queued on the subscriber's outbound channel.
    Delivered,
    /// No live subscription exists, or it closed mid-publish.
    NoSubscriber,
}

/// Errors from a delivery attempt.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// The subscriber's outbound channel stayed full past the timeout.
    #[error("delivery to {user} timed out after {timeout:?}")]
    Timeout {
        /// Username of the slow subscriber.
        user: String,
        /// The timeout that elapsed.
        timeout: Duration,
    },
}

#[derive(Debug)]
struct Subscriber {
    user: String,
    outbox: mpsc::Sender<ServerFrame>,
    topics: HashSet<Topic>,
}

#[derive(Debug, Default)]
struct Registry {
    subscribers: HashMap<SubscriptionHandle, Subscriber>,
    by_user: HashMap<String, SubscriptionHandle>,
    topics: HashMap<Topic, HashSet<SubscriptionHandle>>,
}

impl Registry {
    /// Removes a subscription together with its topic memberships.
    fn remove(&mut self, handle: SubscriptionHandle) -> Option<Subscriber> {
        let subscriber = self.subscribers.remove(&handle)?;
        for topic in &subscriber.topics {
            if let Some(members) = self.topics.get_mut(topic) {
                members.remove(&handle);
                if members.is_empty() {
                    self.topics.remove(topic);
                }
            }
        }
        if self.by_user.get(&subscriber.user) == Some(&handle) {
            self.by_user.remove(&subscriber.user);
        }
        Some(subscriber)
    }

    fn outbox_for_user(&self, user: &str) -> Option<mpsc::Sender<ServerFrame>> {
        let handle = self.by_user.get(user)?;
        self.subscribers.get(handle).map(|s| s.outbox.clone())
    }
}

/// Routes frames to live subscriptions by user and by topic.
#[derive(Debug)]
pub struct DeliveryRouter {
    registry: RwLock<Registry>,
    outbound_buffer: usize,
    delivery_timeout: Duration,
}

impl Default for DeliveryRouter {
    fn default() -> Self {
        Self::new(DEFAULT_OUTBOUND_BUFFER, DEFAULT_DELIVERY_TIMEOUT)
    }
}

impl DeliveryRouter {
    /// Creates a router whose subscriptions buffer up to `outbound_buffer`
    /// frames and whose sends wait at most `delivery_timeout`.
    #[must_use]
    pub fn new(outbound_buffer: usize, delivery_timeout: Duration) -> Self {
        Self {
            registry: RwLock::new(Registry::default()),
            outbound_buffer: outbound_buffer.max(1),
            delivery_timeout,
        }
    }

    /// Registers the live subscription for `user`.
    ///
    /// A previous subscription for the same user is removed and its channel
    /// closed, which ends that connection's writer.
    pub async fn subscribe(&self, user: &str) -> Subscription {
        let (outbox, receiver) = mpsc::channel(self.outbound_buffer);
        let handle = SubscriptionHandle::new();

        let mut registry = self.registry.write().await;
        if let Some(old) = registry.by_user.insert(user.to_string(), handle) {
            registry.remove(old);
            tracing::info!(user = %user, old = %old, "replaced existing subscription");
        }
        registry.subscribers.insert(
            handle,
            Subscriber {
                user: user.to_string(),
                outbox,
                topics: HashSet::new(),
            },
        );
        drop(registry);

        tracing::debug!(user = %user, handle = %handle, "subscription registered");
        Subscription { handle, receiver }
    }

    /// Removes a subscription. Returns `false` if it was already gone, for
    /// example because a newer subscription replaced it.
    pub async fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        let removed = self.registry.write().await.remove(handle);
        if let Some(subscriber) = &removed {
            tracing::debug!(user = %subscriber.user, handle = %handle, "subscription removed");
        }
        removed.is_some()
    }

    /// Adds a subscription to a topic. Returns `false` if the handle is not
    /// registered.
    pub async fn subscribe_topic(&self, handle: SubscriptionHandle, topic: Topic) -> bool {
        let mut registry = self.registry.write().await;
        let Some(subscriber) = registry.subscribers.get_mut(&handle) else {
            return false;
        };
        subscriber.topics.insert(topic.clone());
        registry.topics.entry(topic).or_default().insert(handle);
        true
    }

    /// Removes a subscription from a topic. Returns `false` if it was not a
    /// member.
    pub async fn unsubscribe_topic(&self, handle: SubscriptionHandle, topic: &Topic) -> bool {
        let mut registry = self.registry.write().await;
        let Some(subscriber) = registry.subscribers.get_mut(&handle) else {
            return false;
        };
        if !subscriber.topics.remove(topic) {
            return false;
        }
        if let Some(members) = registry.topics.get_mut(topic) {
            members.remove(&handle);
            if members.is_empty() {
                registry.topics.remove(topic);
            }
        }
        true
    }

    /// Returns `true` if `user` has a live subscription.
    pub async fn is_connected(&self, user: &str) -> bool {
        self.registry.read().await.by_user.contains_key(user)
    }

    /// Number of subscriptions that have joined `topic`.
    pub async fn topic_members(&self, topic: &Topic) -> usize {
        self.registry
            .read()
            .await
            .topics
            .get(topic)
            .map_or(0, HashSet::len)
    }

    /// Pushes `frame` to the live subscription of `user`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Timeout`] if the subscriber did not accept
    /// the frame within the delivery timeout.
    pub async fn publish_to_user(
        &self,
        user: &str,
        frame: ServerFrame,
    ) -> Result<Delivery, DeliveryError> {
        let outbox = self.registry.read().await.outbox_for_user(user);
        match outbox {
            Some(outbox) => self.deliver(user, &outbox, frame).await,
            None => Ok(Delivery::NoSubscriber),
        }
    }

    /// Pushes `frame` to one specific subscription.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Timeout`] if the subscriber did not accept
    /// the frame within the delivery timeout.
    pub async fn send_to_handle(
        &self,
        handle: SubscriptionHandle,
        frame: ServerFrame,
    ) -> Result<Delivery, DeliveryError> {
        let target = self
            .registry
            .read()
            .await
            .subscribers
            .get(&handle)
            .map(|s| (s.user.clone(), s.outbox.clone()));
        match target {
            Some((user, outbox)) => self.deliver(&user, &outbox, frame).await,
            None => Ok(Delivery::NoSubscriber),
        }
    }

    /// Pushes `frame` to every subscription that joined `topic`, returning
    /// how many accepted it.
    ///
    /// All members are attempted concurrently, so one slow member does not
    /// delay the others.
    ///
    /// # Errors
    ///
    /// Returns the first [`DeliveryError`] after every member was attempted.
    pub async fn publish_to_topic(
        &self,
        topic: &Topic,
        frame: ServerFrame,
    ) -> Result<usize, DeliveryError> {
        let targets: Vec<(String, mpsc::Sender<ServerFrame>)> = {
            let registry = self.registry.read().await;
            registry
                .topics
                .get(topic)
                .into_iter()
                .flatten()
                .filter_map(|handle| registry.subscribers.get(handle))
                .map(|s| (s.user.clone(), s.outbox.clone()))
                .collect()
        };

        let results = join_all(
            targets
                .iter()
                .map(|(user, outbox)| self.deliver(user, outbox, frame.clone())),
        )
        .await;

        let mut delivered = 0;
        let mut first_error = None;
        for result in results {
            match result {
                Ok(Delivery::Delivered) => delivered += 1,
                Ok(Delivery::NoSubscriber) => {}
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(delivered), Err)
    }

    async fn deliver(
        &self,
        user: &str,
        outbox: &mpsc::Sender<ServerFrame>,
        frame: ServerFrame,
    ) -> Result<Delivery, DeliveryError> {
        match outbox.send_timeout(frame, self.delivery_timeout).await {
            Ok(()) => Ok(Delivery::Delivered),
            // Subscriber disconnected between lookup and send.
            Err(SendTimeoutError::Closed(_)) => Ok(Delivery::NoSubscriber),
            Err(SendTimeoutError::Timeout(_)) => Err(DeliveryError::Timeout {
                user: user.to_string(),
                timeout: self.delivery_timeout,
            }),
        }
    }
}
