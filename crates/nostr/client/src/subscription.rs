//! Subscription registry: who asked for what, and which relays still owe an EOSE.
//!
//! Completion is a countdown over the set of relay URLs the `REQ` was sent to.
//! Every mutation of that set happens under one lock, and the entry is removed
//! in the same critical section that empties it, so `on_complete` can only be
//! taken (and fired) once. Callbacks always run after the lock is released.

use crate::error::Result;
use crate::filter::Filter;
use nostr::Event;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Callback type for handling received events.
pub type EventCallback = Arc<dyn Fn(Event) -> Result<()> + Send + Sync>;

/// Callback fired once when a subscription has caught up.
pub type CompletionCallback = Box<dyn FnOnce(Completion) + Send>;

/// How a subscription reached completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Every relay that received the request sent EOSE (or went away).
    AllEose,
    /// The subscription timeout elapsed first.
    TimedOut,
}

/// Generate a subscription id: `sub_` and 64 random bits in hex.
pub fn generate_subscription_id() -> String {
    format!("sub_{:016x}", rand::random::<u64>())
}

struct SubscriptionEntry {
    filters: Vec<Filter>,
    on_event: EventCallback,
    on_complete: Option<CompletionCallback>,
    outstanding: HashSet<String>,
    delivered: HashSet<String>,
    created_at: Instant,
    timer: Option<JoinHandle<()>>,
    /// While false, an emptied outstanding set does not complete the entry.
    armed: bool,
}

impl SubscriptionEntry {
    /// Finish the entry: stop its timer and hand back the completion callback.
    fn finish(mut self) -> Option<CompletionCallback> {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.on_complete.take()
    }
}

/// Snapshot of a live subscription.
#[derive(Debug, Clone)]
pub struct SubscriptionInfo {
    pub id: String,
    pub filters: Vec<Filter>,
    pub outstanding_relays: Vec<String>,
    pub age: std::time::Duration,
}

/// Maps subscription ids to their callbacks and completion bookkeeping.
#[derive(Default)]
pub struct SubscriptionRegistry {
    entries: Mutex<HashMap<String, SubscriptionEntry>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscription that expects an EOSE from each of `relays`.
    ///
    /// With no relays the subscription is already complete; `on_complete` is
    /// then fired from a spawned task so it never runs before the caller
    /// regains control.
    pub async fn register(
        &self,
        filters: Vec<Filter>,
        relays: impl IntoIterator<Item = String>,
        on_event: EventCallback,
        on_complete: Option<CompletionCallback>,
    ) -> String {
        self.insert(filters, relays, on_event, on_complete, true).await
    }

    /// Like [`SubscriptionRegistry::register`], but completion is held back
    /// until [`SubscriptionRegistry::arm`] is called.
    ///
    /// Relays may still report in the meantime; only the firing waits.
    pub async fn register_deferred(
        &self,
        filters: Vec<Filter>,
        relays: impl IntoIterator<Item = String>,
        on_event: EventCallback,
        on_complete: Option<CompletionCallback>,
    ) -> String {
        self.insert(filters, relays, on_event, on_complete, false).await
    }

    async fn insert(
        &self,
        filters: Vec<Filter>,
        relays: impl IntoIterator<Item = String>,
        on_event: EventCallback,
        on_complete: Option<CompletionCallback>,
        armed: bool,
    ) -> String {
        let outstanding: HashSet<String> = relays.into_iter().collect();
        let mut entries = self.entries.lock().await;

        let mut id = generate_subscription_id();
        while entries.contains_key(&id) {
            id = generate_subscription_id();
        }

        if outstanding.is_empty() {
            debug!("subscription {} has no relays, completing", id);
            if let Some(on_complete) = on_complete {
                tokio::spawn(async move { on_complete(Completion::AllEose) });
            }
            return id;
        }

        entries.insert(
            id.clone(),
            SubscriptionEntry {
                filters,
                on_event,
                on_complete,
                outstanding,
                delivered: HashSet::new(),
                created_at: Instant::now(),
                timer: None,
                armed,
            },
        );
        id
    }

    /// Attach the timeout task; it is aborted when the subscription finishes.
    ///
    /// Returns false (and aborts the task) if the subscription is already gone.
    pub async fn attach_timer(&self, subscription_id: &str, timer: JoinHandle<()>) -> bool {
        let mut entries = self.entries.lock().await;
        match entries.get_mut(subscription_id) {
            Some(entry) => {
                entry.timer = Some(timer);
                true
            }
            None => {
                timer.abort();
                false
            }
        }
    }

    /// Allow a deferred subscription to complete.
    ///
    /// If every relay already reported, the subscription completes now and
    /// `on_complete` runs on a spawned task. Returns true in that case.
    pub async fn arm(&self, subscription_id: &str) -> bool {
        let on_complete = {
            let mut entries = self.entries.lock().await;
            let Some(entry) = entries.get_mut(subscription_id) else {
                return false;
            };
            entry.armed = true;
            if !entry.outstanding.is_empty() {
                return false;
            }
            match entries.remove(subscription_id) {
                Some(entry) => entry.finish(),
                None => return false,
            }
        };

        if let Some(on_complete) = on_complete {
            tokio::spawn(async move { on_complete(Completion::AllEose) });
        }
        true
    }

    /// Mark `relay_url` as done for the subscription.
    ///
    /// Returns true only for the call that completed the subscription. Unknown
    /// ids and relays that were not outstanding are no-ops.
    pub async fn record_completion(&self, subscription_id: &str, relay_url: &str) -> bool {
        let on_complete = {
            let mut entries = self.entries.lock().await;
            let Some(entry) = entries.get_mut(subscription_id) else {
                debug!("EOSE for unknown subscription {}", subscription_id);
                return false;
            };
            if !entry.outstanding.remove(relay_url) {
                return false;
            }
            if !entry.outstanding.is_empty() || !entry.armed {
                return false;
            }
            match entries.remove(subscription_id) {
                Some(entry) => entry.finish(),
                None => return false,
            }
        };

        if let Some(on_complete) = on_complete {
            on_complete(Completion::AllEose);
        }
        true
    }

    /// Complete the subscription as if every outstanding relay had reported.
    pub async fn complete_all(&self, subscription_id: &str, completion: Completion) -> bool {
        let entry = self.entries.lock().await.remove(subscription_id);
        let Some(mut entry) = entry else {
            return false;
        };

        if !entry.outstanding.is_empty() {
            debug!(
                "subscription {} completing with {} relays outstanding",
                subscription_id,
                entry.outstanding.len()
            );
        }
        // The timer may be the caller; dropping the handle does not cancel it.
        entry.timer = None;

        if let Some(on_complete) = entry.finish() {
            on_complete(completion);
        }
        true
    }

    /// A relay went away: it will never report for any subscription.
    ///
    /// Returns the ids this completed.
    pub async fn relay_lost(&self, relay_url: &str) -> Vec<String> {
        let mut completed = Vec::new();
        let mut callbacks = Vec::new();
        {
            let mut entries = self.entries.lock().await;
            let finished: Vec<String> = entries
                .iter_mut()
                .filter_map(|(id, entry)| {
                    (entry.outstanding.remove(relay_url)
                        && entry.outstanding.is_empty()
                        && entry.armed)
                        .then(|| id.clone())
                })
                .collect();
            for id in finished {
                if let Some(entry) = entries.remove(&id) {
                    callbacks.extend(entry.finish());
                    completed.push(id);
                }
            }
        }

        for on_complete in callbacks {
            on_complete(Completion::AllEose);
        }
        completed
    }

    /// Remove a subscription without firing its completion. Idempotent.
    pub async fn unregister(&self, subscription_id: &str) -> bool {
        let entry = self.entries.lock().await.remove(subscription_id);
        match entry {
            Some(entry) => {
                drop(entry.finish());
                true
            }
            None => false,
        }
    }

    /// Drop every subscription without firing callbacks.
    pub async fn clear(&self) {
        let entries: Vec<SubscriptionEntry> =
            self.entries.lock().await.drain().map(|(_, entry)| entry).collect();
        for entry in entries {
            drop(entry.finish());
        }
    }

    /// Claim delivery of `event_id` to the subscription.
    ///
    /// Returns the callback only the first time a given event id is claimed for
    /// this subscription, so an event reaching it through several relays is
    /// delivered once.
    pub async fn claim_delivery(
        &self,
        subscription_id: &str,
        event_id: &str,
    ) -> Option<EventCallback> {
        let mut entries = self.entries.lock().await;
        let entry = entries.get_mut(subscription_id)?;
        entry
            .delivered
            .insert(event_id.to_string())
            .then(|| Arc::clone(&entry.on_event))
    }

    /// Whether the id names a live subscription.
    pub async fn contains(&self, subscription_id: &str) -> bool {
        self.entries.lock().await.contains_key(subscription_id)
    }

    /// Relays that have not reported for the subscription yet.
    pub async fn outstanding(&self, subscription_id: &str) -> Option<Vec<String>> {
        self.entries
            .lock()
            .await
            .get(subscription_id)
            .map(|entry| entry.outstanding.iter().cloned().collect())
    }

    pub async fn info(&self, subscription_id: &str) -> Option<SubscriptionInfo> {
        self.entries
            .lock()
            .await
            .get(subscription_id)
            .map(|entry| SubscriptionInfo {
                id: subscription_id.to_string(),
                filters: entry.filters.clone(),
                outstanding_relays: entry.outstanding.iter().cloned().collect(),
                age: entry.created_at.elapsed(),
            })
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

/// Run an event callback, logging instead of propagating its error.
pub(crate) fn deliver(subscription_id: &str, callback: &EventCallback, event: Event) {
    if let Err(error) = callback(event) {
        warn!("subscription {} callback error: {}", subscription_id, error);
    }
}
