//! Event system for settings changes
//!
//! Listeners run synchronously on the thread that performed the change,
//! in registration order, right after the in-memory state was updated.
//! An [`StoreEvent::Update`] says nothing about durability; only
//! [`StoreEvent::Saved`] means the state reached the backend.

use crate::sync::RwLockExt;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Something that happened to the store.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    /// A key was written or removed (`value` is `null` on removal).
    Update {
        /// `None` for global settings
        scope: Option<String>,
        key: String,
        value: Value,
    },
    /// A physical write to the active backend completed.
    Saved,
    /// A group and all of its settings were removed.
    DeleteGroup { scope: String },
}

/// Event names listeners can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Update,
    Saved,
    DeleteGroup,
}

impl StoreEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            StoreEvent::Update { .. } => EventKind::Update,
            StoreEvent::Saved => EventKind::Saved,
            StoreEvent::DeleteGroup { .. } => EventKind::DeleteGroup,
        }
    }
}

/// Handle returned by subscribe calls, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Type alias for an event callback
pub type EventCallback = Arc<dyn Fn(&StoreEvent) + Send + Sync>;

struct Listener {
    id: SubscriptionId,
    /// `None` listens to every kind
    kind: Option<EventKind>,
    callback: EventCallback,
}

/// Observer registry for store events
pub struct EventManager {
    listeners: RwLock<Vec<Listener>>,
    next_id: AtomicU64,
}

impl EventManager {
    #[must_use]
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Listen to one kind of event.
    pub fn subscribe<F>(&self, kind: EventKind, callback: F) -> SubscriptionId
    where
        F: Fn(&StoreEvent) + Send + Sync + 'static,
    {
        self.register(Some(kind), Arc::new(callback))
    }

    /// Listen to every event.
    pub fn subscribe_all<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&StoreEvent) + Send + Sync + 'static,
    {
        self.register(None, Arc::new(callback))
    }

    fn register(&self, kind: Option<EventKind>, callback: EventCallback) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write_recovered()
            .push(Listener { id, kind, callback });
        id
    }

    /// Remove a listener. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.write_recovered();
        let before = listeners.len();
        listeners.retain(|listener| listener.id != id);
        listeners.len() != before
    }

    /// Deliver an event to every matching listener.
    ///
    /// Callbacks are collected first so a listener may subscribe or
    /// unsubscribe from inside its own callback.
    ///
    /// The store emits after releasing its state lock, so listeners can read
    /// and write the store. Events from one thread arrive in the order the
    /// changes were made; when several threads write at once, `update`s may
    /// arrive in a different order than the state changed. Read the store
    /// for the current value rather than trusting the last event seen.
    pub fn emit(&self, event: &StoreEvent) {
        let kind = event.kind();
        let callbacks: Vec<EventCallback> = self
            .listeners
            .read_recovered()
            .iter()
            .filter(|listener| listener.kind.is_none_or(|k| k == kind))
            .map(|listener| Arc::clone(&listener.callback))
            .collect();

        for callback in callbacks {
            callback(event);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read_recovered().len()
    }

    /// Clear all listeners
    pub fn clear(&self) {
        self.listeners.write_recovered().clear();
    }
}

impl Default for EventManager {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
