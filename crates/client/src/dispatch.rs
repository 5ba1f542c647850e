// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Synchronous publish/subscribe fan-out for realtime events.
//!
//! One ordered subscriber list per [`EventKind`]. Registration order is
//! invocation order; the same closure may be registered twice and both
//! registrations fire. A panicking subscriber is logged and skipped so it
//! never blocks delivery to the rest.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{error, trace};

use crate::error::FailureKind;
use crate::events::{EventKind, RealtimeEvent};

/// Subscriber callback. Invoked on the connection task in registration
/// order; must not block.
pub type Callback = Arc<dyn Fn(&RealtimeEvent) + Send + Sync>;

/// Handle identifying one registration, returned by
/// [`Dispatcher::subscribe`] and consumed by [`Dispatcher::unsubscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

struct Entry {
    id: u64,
    callback: Callback,
}

/// Ordered per-kind subscriber registry.
///
/// The registry is only ever cleared by dropping the manager; delivery
/// never removes entries.
#[derive(Default)]
pub struct Dispatcher {
    next_id: AtomicU64,
    lists: Mutex<HashMap<EventKind, Vec<Entry>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `callback` to the list for `kind`.
    pub fn subscribe(&self, kind: EventKind, callback: Callback) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lists.lock().entry(kind).or_default().push(Entry { id, callback });
        SubscriptionId(id)
    }

    /// Remove the registration identified by `id`. Unknown handles are a
    /// no-op; other registrations of the same closure are untouched.
    pub fn unsubscribe(&self, kind: EventKind, id: SubscriptionId) {
        let mut lists = self.lists.lock();
        if let Some(list) = lists.get_mut(&kind) {
            if let Some(pos) = list.iter().position(|entry| entry.id == id.0) {
                list.remove(pos);
            }
        }
    }

    /// Deliver `event` to every subscriber of its kind, in registration
    /// order, on the calling task.
    pub fn emit(&self, event: &RealtimeEvent) {
        let kind = event.kind();
        // Snapshot outside the lock so callbacks can re-enter
        // subscribe/unsubscribe without deadlocking. Entries added during
        // delivery see the next event, not this one.
        let callbacks: Vec<Callback> = {
            let lists = self.lists.lock();
            lists
                .get(&kind)
                .map(|list| list.iter().map(|entry| Arc::clone(&entry.callback)).collect())
                .unwrap_or_default()
        };

        if callbacks.is_empty() {
            trace!(kind = %kind, "no subscribers for event");
            return;
        }

        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                error!(
                    kind = %kind,
                    reason = %FailureKind::Subscriber,
                    "subscriber panicked during dispatch, continuing with the rest"
                );
            }
        }
    }

    /// Kinds with at least one live subscriber, in [`EventKind::ALL`] order.
    pub fn subscribed_kinds(&self) -> Vec<EventKind> {
        let lists = self.lists.lock();
        EventKind::ALL
            .into_iter()
            .filter(|kind| lists.get(kind).is_some_and(|list| !list.is_empty()))
            .collect()
    }

    /// Live subscriber count for `kind`.
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.lists.lock().get(&kind).map(Vec::len).unwrap_or(0)
    }
}

#[cfg(test)]
#[path = "dispatch_tests.rs"]
mod tests;
