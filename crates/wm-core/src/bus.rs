//! In-process publish/subscribe event bus.
//!
//! The bus is constructed explicitly and handed to every component that
//! needs it. Subscriptions are keyed by message type and an optional
//! integer [`Channel`], so several dataset/fence pairs can share one bus
//! without cross-talk.
//!
//! Delivery is synchronous: [`EventBus::publish`] runs every handler that is
//! subscribed at the time of the call before returning. Nothing is queued or
//! replayed, and a message without subscribers is dropped.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use wm_core::EventBus;
//!
//! #[derive(Debug)]
//! struct Ping(u32);
//!
//! let bus = EventBus::new();
//! let owner = bus.owner();
//! let seen = Arc::new(AtomicUsize::new(0));
//!
//! let counter = Arc::clone(&seen);
//! bus.subscribe::<Ping, _>(owner, Some(1), move |p| {
//!     counter.fetch_add(p.0 as usize, Ordering::SeqCst);
//! });
//!
//! bus.publish_on(Ping(2), 1);
//! bus.publish_on(Ping(5), 2); // other channel, dropped
//! bus.publish(Ping(7)); // unchanneled, dropped
//! assert_eq!(seen.load(Ordering::SeqCst), 2);
//! ```

use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::trace;

use crate::error::{Error, Result};

/// Integer discriminator separating independent dataset/fence instances.
pub type Channel = u32;

/// Identifies the component that owns a group of subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OwnerId(u64);

/// Handle returned by [`EventBus::subscribe`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    id: u64,
    owner: OwnerId,
    key: Key,
}

impl Subscription {
    pub fn owner(&self) -> OwnerId {
        self.owner
    }

    pub fn channel(&self) -> Option<Channel> {
        self.key.1
    }
}

type Key = (TypeId, Option<Channel>);
type Handler<M> = Arc<dyn Fn(&M) + Send + Sync>;

struct Entry {
    id: u64,
    owner: OwnerId,
    /// Always a `Handler<M>` for the `M` in the entry's key.
    handler: Arc<dyn Any + Send + Sync>,
}

/// Explicitly constructed message bus.
pub struct EventBus {
    subscribers: Mutex<HashMap<Key, Vec<Entry>>>,
    next_id: AtomicU64,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let subscribers = self.lock();
        f.debug_struct("EventBus")
            .field("keys", &subscribers.len())
            .field(
                "subscriptions",
                &subscribers.values().map(Vec::len).sum::<usize>(),
            )
            .finish()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Allocate a fresh owner id for a subscribing component.
    pub fn owner(&self) -> OwnerId {
        OwnerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Subscribe `handler` to messages of type `M`.
    ///
    /// With `channel = None` only unchanneled publishes are delivered.
    pub fn subscribe<M, F>(
        &self,
        owner: OwnerId,
        channel: Option<Channel>,
        handler: F,
    ) -> Subscription
    where
        M: Any + Send + Sync,
        F: Fn(&M) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let key = (TypeId::of::<M>(), channel);
        let handler: Handler<M> = Arc::new(handler);

        self.lock().entry(key).or_default().push(Entry {
            id,
            owner,
            handler: Arc::new(handler),
        });
        trace!(
            "Subscribed {:?} to {} on {:?}",
            owner,
            type_name::<M>(),
            channel
        );

        Subscription { id, owner, key }
    }

    /// Publish an unchanneled message. Returns the number of handlers run.
    pub fn publish<M: Any + Send + Sync>(&self, message: M) -> usize {
        self.dispatch(None, &message)
    }

    /// Publish a message on `channel`. Returns the number of handlers run.
    pub fn publish_on<M: Any + Send + Sync>(&self, message: M, channel: Channel) -> usize {
        self.dispatch(Some(channel), &message)
    }

    fn dispatch<M: Any + Send + Sync>(&self, channel: Option<Channel>, message: &M) -> usize {
        // Snapshot under the lock, call outside it so handlers may publish.
        let handlers: Vec<Handler<M>> = self
            .lock()
            .get(&(TypeId::of::<M>(), channel))
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|e| e.handler.downcast_ref::<Handler<M>>().cloned())
                    .collect()
            })
            .unwrap_or_default();

        if handlers.is_empty() {
            trace!("Dropped {} on {:?}: no subscribers", type_name::<M>(), channel);
        }
        for handler in &handlers {
            handler(message);
        }
        handlers.len()
    }

    /// Remove one subscription. Returns false if it was already gone.
    pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
        let mut subscribers = self.lock();
        let Some(entries) = subscribers.get_mut(&subscription.key) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|e| e.id != subscription.id);
        let removed = entries.len() != before;
        if entries.is_empty() {
            subscribers.remove(&subscription.key);
        }
        removed
    }

    /// Remove every subscription held by `owner`. Returns how many were removed.
    pub fn unsubscribe_all(&self, owner: OwnerId) -> usize {
        let mut subscribers = self.lock();
        let mut removed = 0;
        subscribers.retain(|_, entries| {
            let before = entries.len();
            entries.retain(|e| e.owner != owner);
            removed += before - entries.len();
            !entries.is_empty()
        });
        trace!("Unsubscribed {} handler(s) of {:?}", removed, owner);
        removed
    }

    /// Number of handlers subscribed to `M` on `channel`.
    pub fn subscriber_count<M: Any>(&self, channel: Option<Channel>) -> usize {
        self.lock()
            .get(&(TypeId::of::<M>(), channel))
            .map_or(0, Vec::len)
    }

    /// Send `query` to the [`Request`] handlers on `channel` and return the reply.
    ///
    /// Exactly one handler must reply; with none the call fails with
    /// [`Error::NoResponder`].
    pub fn request<Q, R>(&self, query: Q, channel: Option<Channel>) -> Result<R>
    where
        Q: Any + Send + Sync,
        R: Any + Send,
    {
        let request = Request::<Q, R>::new(query);
        self.dispatch(channel, &request);
        request
            .take()
            .ok_or(Error::NoResponder(type_name::<Q>()))
    }

    /// Answer requests of type `Q` with `handler`.
    pub fn respond<Q, R, F>(
        &self,
        owner: OwnerId,
        channel: Option<Channel>,
        handler: F,
    ) -> Subscription
    where
        Q: Any + Send + Sync,
        R: Any + Send,
        F: Fn(&Q) -> R + Send + Sync + 'static,
    {
        self.subscribe::<Request<Q, R>, _>(owner, channel, move |request| {
            if request.reply(handler(&request.query)).is_err() {
                tracing::warn!("Second reply to {} ignored", type_name::<Q>());
            }
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Key, Vec<Entry>>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A query with a reply slot that exactly one handler fills.
pub struct Request<Q, R> {
    pub query: Q,
    slot: Mutex<Option<R>>,
}

impl<Q, R> Request<Q, R> {
    fn new(query: Q) -> Self {
        Self {
            query,
            slot: Mutex::new(None),
        }
    }

    /// Fill the reply slot. Fails if another handler already replied.
    pub fn reply(&self, value: R) -> Result<()> {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return Err(Error::AlreadyReplied);
        }
        *slot = Some(value);
        Ok(())
    }

    /// Whether a handler has replied.
    pub fn is_answered(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn take(self) -> Option<R> {
        self.slot.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}
