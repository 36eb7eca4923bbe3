//! Frame routing between relay connections, the event store and subscriptions.
//!
//! Inbound, each connection's frames arrive here in relay order: events are
//! validated, verified and deduplicated before reaching a subscription, and
//! EOSE frames count down the subscription's outstanding relays. Outbound,
//! `REQ`, `CLOSE` and `EVENT` frames fan out to every open connection.

use crate::error::Result;
use crate::filter::Filter;
use crate::message::{ClientMessage, RelayMessage};
use crate::relay::RelayConnection;
use crate::store::EventStore;
use crate::subscription::{
    Completion, CompletionCallback, EventCallback, SubscriptionRegistry, deliver,
};
use futures_util::future::join_all;
use nostr::{Event, EventTemplate, Signer, validate_event};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Relays by URL, shared between the manager and the dispatcher.
pub(crate) type RelayTable = Arc<RwLock<HashMap<String, Arc<RelayConnection>>>>;

/// Result of attempting to send a published event to one relay.
///
/// The protocol layer does not wait for acknowledgements, so `sent` only
/// says the frame was written to the socket.
#[derive(Debug, Clone, Serialize)]
pub struct PublishOutcome {
    pub relay_url: String,
    pub event_id: String,
    pub sent: bool,
    pub message: String,
}

/// Dispatcher settings.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Upper bound on how long a subscription waits for EOSE from every relay.
    pub subscription_timeout: Duration,
    /// Optional bound on the event store.
    pub event_store_capacity: Option<usize>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            subscription_timeout: Duration::from_secs(5),
            event_store_capacity: None,
        }
    }
}

struct DispatcherInner {
    relays: RelayTable,
    registry: SubscriptionRegistry,
    store: Mutex<EventStore>,
    signer: Arc<dyn Signer>,
    config: DispatcherConfig,
}

/// Routes frames; cheap to clone, all clones share state.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

impl Dispatcher {
    pub(crate) fn new(
        relays: RelayTable,
        signer: Arc<dyn Signer>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                relays,
                registry: SubscriptionRegistry::new(),
                store: Mutex::new(EventStore::new(config.event_store_capacity)),
                signer,
                config,
            }),
        }
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.inner.registry
    }

    /// Route one inbound frame from `relay_url`.
    pub async fn handle_message(&self, relay_url: &str, message: RelayMessage) {
        match message {
            RelayMessage::Event(subscription_id, event) => {
                self.handle_event(relay_url, &subscription_id, event).await;
            }
            RelayMessage::Eose(subscription_id) => {
                debug!("EOSE from {} for {}", relay_url, subscription_id);
                if self
                    .inner
                    .registry
                    .record_completion(&subscription_id, relay_url)
                    .await
                {
                    self.close_remote(&subscription_id).await;
                }
            }
            RelayMessage::Notice(notice) => info!("notice from {}: {}", relay_url, notice),
        }
    }

    async fn handle_event(&self, relay_url: &str, subscription_id: &str, event: Event) {
        if !self.inner.registry.contains(subscription_id).await {
            debug!(
                "dropping event {} from {}: no subscription {}",
                event.id, relay_url, subscription_id
            );
            return;
        }

        if !validate_event(&event) {
            warn!(
                "dropping malformed event {:?} from {}",
                event.id, relay_url
            );
            return;
        }

        let known = self.inner.store.lock().await.get(&event.id).cloned();
        let event = match known {
            // Already verified; hand out the stored copy.
            Some(stored) => stored,
            None => {
                if !self.inner.signer.verify(&event) {
                    warn!(
                        "dropping event {} from {}: invalid id or signature",
                        event.id, relay_url
                    );
                    return;
                }
                self.inner.store.lock().await.put_if_absent(event).event
            }
        };

        if let Some(callback) = self
            .inner
            .registry
            .claim_delivery(subscription_id, &event.id)
            .await
        {
            deliver(subscription_id, &callback, event);
        }
    }

    /// Send a `REQ` to every open relay and track completion across them.
    ///
    /// Relays that are not open now are never waited on. Completion fires once,
    /// on the last EOSE or when the subscription timeout elapses.
    pub async fn subscribe(
        &self,
        filters: Vec<Filter>,
        on_event: EventCallback,
        on_complete: Option<CompletionCallback>,
    ) -> Result<String> {
        let relays = self.open_relays().await;
        let relay_urls: Vec<String> = relays
            .iter()
            .map(|relay| relay.url().to_string())
            .collect();
        let subscription_id = self
            .inner
            .registry
            .register_deferred(filters.clone(), relay_urls, on_event, on_complete)
            .await;

        if relays.is_empty() {
            debug!("subscription {} sent to no relays", subscription_id);
            return Ok(subscription_id);
        }

        self.start_timer(&subscription_id).await;

        let request = ClientMessage::Req {
            subscription_id: subscription_id.clone(),
            filters,
        }
        .to_json();
        let request = match request {
            Ok(request) => request,
            Err(error) => {
                self.unsubscribe(&subscription_id).await;
                return Err(error);
            }
        };

        let sends = relays.iter().map(|relay| {
            let request = request.clone();
            let subscription_id = subscription_id.as_str();
            async move {
                relay.add_subscription(subscription_id).await;
                match relay.send_text(request).await {
                    Ok(()) => None,
                    Err(error) => {
                        warn!(
                            "failed to send REQ {} to {}: {}",
                            subscription_id,
                            relay.url(),
                            error
                        );
                        relay.remove_subscription(subscription_id).await;
                        Some(relay.url().to_string())
                    }
                }
            }
        });

        for failed_url in join_all(sends).await.into_iter().flatten() {
            // A relay that never got the request cannot hold up completion.
            self.inner
                .registry
                .record_completion(&subscription_id, &failed_url)
                .await;
        }

        debug!(
            "subscription {} sent to {} relays",
            subscription_id,
            relays.len()
        );

        // Completion is held until here so `on_complete` never runs before
        // the caller has the id.
        if self.inner.registry.arm(&subscription_id).await {
            self.close_remote(&subscription_id).await;
        }
        Ok(subscription_id)
    }

    async fn start_timer(&self, subscription_id: &str) {
        let dispatcher = self.clone();
        let timer_id = subscription_id.to_string();
        let timeout = self.inner.config.subscription_timeout;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if dispatcher
                .inner
                .registry
                .complete_all(&timer_id, Completion::TimedOut)
                .await
            {
                debug!("subscription {} timed out after {:?}", timer_id, timeout);
                dispatcher.close_remote(&timer_id).await;
            }
        });
        self.inner.registry.attach_timer(subscription_id, timer).await;
    }

    /// Close the subscription on relays and forget it. Idempotent, never fires
    /// the completion callback.
    pub async fn unsubscribe(&self, subscription_id: &str) {
        let removed = self.inner.registry.unregister(subscription_id).await;
        self.close_remote(subscription_id).await;
        if removed {
            debug!("unsubscribed {}", subscription_id);
        }
    }

    /// Send `CLOSE` to every open relay holding the subscription.
    async fn close_remote(&self, subscription_id: &str) {
        let relays = self.open_relays().await;
        let closes = relays.iter().map(|relay| async move {
            if !relay.has_subscription(subscription_id).await {
                return;
            }
            let close = ClientMessage::Close {
                subscription_id: subscription_id.to_string(),
            };
            if let Err(error) = relay.send_message(&close).await {
                debug!(
                    "failed to send CLOSE {} to {}: {}",
                    subscription_id,
                    relay.url(),
                    error
                );
            }
            relay.remove_subscription(subscription_id).await;
        });
        join_all(closes).await;
    }

    /// Sign `template` and send it to every open relay.
    ///
    /// A signing failure is returned before anything is sent.
    pub async fn publish(&self, template: EventTemplate) -> Result<Vec<PublishOutcome>> {
        let event = self.inner.signer.sign(template).await?;
        let frame = ClientMessage::Event(event.clone()).to_json()?;

        let relays = self.open_relays().await;
        let sends = relays.iter().map(|relay| {
            let frame = frame.clone();
            let event_id = event.id.clone();
            async move {
                let result = relay.send_text(frame).await;
                if let Err(error) = &result {
                    warn!("failed to publish {} to {}: {}", event_id, relay.url(), error);
                }
                PublishOutcome {
                    relay_url: relay.url().to_string(),
                    event_id,
                    sent: result.is_ok(),
                    message: result.map_or_else(|error| error.to_string(), |()| "sent".to_string()),
                }
            }
        });

        let outcomes = join_all(sends).await;
        debug!("published {} to {} relays", event.id, outcomes.len());
        Ok(outcomes)
    }

    /// A relay closed: release every completion it still owed.
    pub async fn relay_lost(&self, relay_url: &str) {
        for subscription_id in self.inner.registry.relay_lost(relay_url).await {
            self.close_remote(&subscription_id).await;
        }
    }

    pub async fn cached_event(&self, event_id: &str) -> Option<Event> {
        self.inner.store.lock().await.get(event_id).cloned()
    }

    pub async fn cached_event_count(&self) -> usize {
        self.inner.store.lock().await.len()
    }

    /// Forget every subscription without firing callbacks.
    pub(crate) async fn clear(&self) {
        self.inner.registry.clear().await;
    }

    async fn open_relays(&self) -> Vec<Arc<RelayConnection>> {
        let relays: Vec<Arc<RelayConnection>> =
            self.inner.relays.read().await.values().cloned().collect();
        let mut open = Vec::with_capacity(relays.len());
        for relay in relays {
            if relay.is_connected().await {
                open.push(relay);
            }
        }
        open
    }
}
