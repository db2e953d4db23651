//! Change notifications for the saved list.
//!
//! Listeners are held by the notifier and removed through the
//! [`Subscription`] returned on registration, either explicitly with
//! [`Subscription::unsubscribe`] or when the subscription is dropped.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

/// One batch of saved-list mutations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListChange {
    pub added: BTreeSet<String>,
    pub removed: BTreeSet<String>,
}

impl ListChange {
    pub fn added(key: impl Into<String>) -> Self {
        Self {
            added: BTreeSet::from([key.into()]),
            removed: BTreeSet::new(),
        }
    }

    pub fn removed(key: impl Into<String>) -> Self {
        Self {
            added: BTreeSet::new(),
            removed: BTreeSet::from([key.into()]),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

pub type Listener = Arc<dyn Fn(&ListChange) + Send + Sync>;

type Registry = Mutex<Vec<(u64, Listener)>>;

#[derive(Default)]
pub struct ChangeNotifier {
    listeners: Arc<Registry>,
    next_id: AtomicU64,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: Listener) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, listener));
        Subscription {
            id,
            registry: Arc::downgrade(&self.listeners),
        }
    }

    /// Deliver a batch to every listener. Listeners run outside the registry
    /// lock so they may subscribe or unsubscribe re-entrantly.
    pub fn notify(&self, change: &ListChange) {
        if change.is_empty() {
            return;
        }
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, l)| l.clone())
            .collect();
        for listener in listeners {
            listener(change);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Handle for a registered listener.
#[must_use = "dropping a Subscription unregisters the listener"]
pub struct Subscription {
    id: u64,
    registry: Weak<Registry>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        // Drop does the work
    }

    fn remove(&self) {
        if let Some(registry) = self.registry.upgrade() {
            registry
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .retain(|(id, _)| *id != self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.remove();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_notify_reaches_listener() {
        let notifier = ChangeNotifier::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let _sub = notifier.subscribe(Arc::new(move |change: &ListChange| {
            counter.fetch_add(change.added.len(), Ordering::SeqCst);
        }));

        notifier.notify(&ListChange::added("a"));
        notifier.notify(&ListChange::added("b"));
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let notifier = ChangeNotifier::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let sub = notifier.subscribe(Arc::new(move |_: &ListChange| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(notifier.listener_count(), 1);

        sub.unsubscribe();
        assert_eq!(notifier.listener_count(), 0);

        notifier.notify(&ListChange::removed("a"));
        assert_eq!(seen.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_subscription_outlives_notifier() {
        let notifier = ChangeNotifier::new();
        let sub = notifier.subscribe(Arc::new(|_: &ListChange| {}));
        drop(notifier);
        drop(sub);
    }

    #[test]
    fn test_empty_change_is_not_delivered() {
        let notifier = ChangeNotifier::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let _sub = notifier.subscribe(Arc::new(move |_: &ListChange| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        notifier.notify(&ListChange::default());
        assert_eq!(seen.load(Ordering::SeqCst), 0);
    }
}
