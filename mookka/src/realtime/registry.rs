use crate::events::{ChangeEvent, ChangeKind, EventFilter};
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

pub type ChangeCallback = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

type Slot = (String, EventFilter);

#[derive(Default)]
struct RegistryInner {
    slots: DashMap<Slot, Vec<(u64, ChangeCallback)>>,
    next_id: AtomicU64,
}

impl RegistryInner {
    fn remove(&self, slot: &Slot, id: u64) {
        if let Some(mut callbacks) = self.slots.get_mut(slot) {
            callbacks.retain(|(registered, _)| *registered != id);
        }
        self.slots.remove_if(slot, |_, callbacks| callbacks.is_empty());
    }
}

/// Client-side fan-out of change feed notifications, keyed by `(table, event)`.
#[derive(Clone, Default)]
pub struct SubscriptionRegistry {
    inner: Arc<RegistryInner>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for changes of `event` on `table`.
    /// The callback stays registered until the returned guard is unsubscribed or dropped.
    pub fn subscribe<F>(&self, table: impl Into<String>, event: EventFilter, callback: F) -> Subscription
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        let slot = (table.into(), event);
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        self.inner
            .slots
            .entry(slot.clone())
            .or_default()
            .push((id, Arc::new(callback)));

        debug!("Subscribed #{} to {}/{:?}", id, slot.0, slot.1);

        Subscription {
            registry: Arc::downgrade(&self.inner),
            slot,
            id,
            active: AtomicBool::new(true),
        }
    }

    /// Invoke every callback matching the change; returns how many ran.
    pub fn dispatch(&self, change: &ChangeEvent) -> usize {
        let mut callbacks: Vec<ChangeCallback> = Vec::new();
        for filter in [EventFilter::from(change.event_type), EventFilter::All] {
            if let Some(slot) = self.inner.slots.get(&(change.table.clone(), filter)) {
                callbacks.extend(slot.iter().map(|(_, callback)| callback.clone()));
            }
        }

        // Invoked with no map guard held so callbacks may (un)subscribe
        for callback in &callbacks {
            callback(change);
        }

        debug!(
            "Dispatched {} on '{}' to {} callback(s)",
            change.event_type,
            change.table,
            callbacks.len()
        );
        callbacks.len()
    }

    /// Notify every callback once, as after a gap in the change feed where
    /// changes may have been missed. Returns how many ran.
    pub fn resync(&self) -> usize {
        let callbacks: Vec<(ChangeEvent, ChangeCallback)> = self
            .inner
            .slots
            .iter()
            .flat_map(|slot| {
                let (table, filter) = slot.key();
                let kind = match filter {
                    EventFilter::Insert => ChangeKind::Insert,
                    EventFilter::Delete => ChangeKind::Delete,
                    EventFilter::Update | EventFilter::All => ChangeKind::Update,
                };
                let change = ChangeEvent::new(table.clone(), kind);
                slot.value()
                    .iter()
                    .map(|(_, callback)| (change.clone(), callback.clone()))
                    .collect::<Vec<_>>()
            })
            .collect();

        for (change, callback) in &callbacks {
            callback(change);
        }

        debug!("Resynced {} callback(s)", callbacks.len());
        callbacks.len()
    }

    /// Tables with at least one live subscription, sorted
    pub fn watched_tables(&self) -> Vec<String> {
        self.inner
            .slots
            .iter()
            .map(|slot| slot.key().0.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.slots.iter().map(|slot| slot.value().len()).sum()
    }
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Guard for one registered callback. Dropping it unsubscribes.
pub struct Subscription {
    registry: Weak<RegistryInner>,
    slot: Slot,
    id: u64,
    active: AtomicBool,
}

impl Subscription {
    /// Removes exactly this callback. Repeated calls are no-ops.
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(inner) = self.registry.upgrade() {
            inner.remove(&self.slot, self.id);
            debug!("Unsubscribed #{} from {}/{:?}", self.id, self.slot.0, self.slot.1);
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn table(&self) -> &str {
        &self.slot.0
    }

    pub fn event(&self) -> EventFilter {
        self.slot.1
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("table", &self.slot.0)
            .field("event", &self.slot.1)
            .field("active", &self.is_active())
            .finish()
    }
}
