//! Relay manager: owns the relay table, the dispatcher and its state.

use crate::dispatcher::{Dispatcher, DispatcherConfig, PublishOutcome, RelayTable};
use crate::error::{ClientError, Result};
use crate::filter::Filter;
use crate::relay::{ConnectionState, RelayConfig, RelayConnection};
use crate::subscription::{CompletionCallback, EventCallback};
use nostr::{Event, EventTemplate, Signer};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

/// Relay manager configuration.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Maximum number of relays in the table.
    pub max_relays: usize,
    pub connect_timeout: Duration,
    pub subscription_timeout: Duration,
    /// Bound on cached events; `None` keeps every event.
    pub event_store_capacity: Option<usize>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_relays: 16,
            connect_timeout: Duration::from_secs(5),
            subscription_timeout: Duration::from_secs(5),
            event_store_capacity: None,
        }
    }
}

/// Connects to relays and routes subscriptions and publishes across them.
///
/// All state (relays, subscriptions, the event cache) belongs to one manager
/// and lives until [`RelayManager::shutdown`]. Every connected relay gets a
/// pump task feeding its frames to the dispatcher in arrival order.
pub struct RelayManager {
    relays: RelayTable,
    dispatcher: Dispatcher,
    pumps: Mutex<HashMap<String, JoinHandle<()>>>,
    config: ManagerConfig,
}

impl RelayManager {
    pub fn new(config: ManagerConfig, signer: Arc<dyn Signer>) -> Self {
        let relays: RelayTable = Arc::new(RwLock::new(HashMap::new()));
        let dispatcher = Dispatcher::new(
            Arc::clone(&relays),
            signer,
            DispatcherConfig {
                subscription_timeout: config.subscription_timeout,
                event_store_capacity: config.event_store_capacity,
            },
        );
        Self {
            relays,
            dispatcher,
            pumps: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Connect to `url`, or return the relay already connected or connecting there.
    ///
    /// A relay that closed earlier is replaced by a fresh connection.
    pub async fn connect(&self, url: &str) -> Result<Arc<RelayConnection>> {
        let key = normalize_url(url)?;

        let relay = {
            let mut relays = self.relays.write().await;
            if let Some(existing) = relays.get(&key) {
                if existing.state().await == ConnectionState::Closed {
                    relays.remove(&key);
                } else {
                    return Ok(Arc::clone(existing));
                }
            }
            if relays.len() >= self.config.max_relays {
                return Err(ClientError::Internal(format!(
                    "maximum relay limit ({}) reached",
                    self.config.max_relays
                )));
            }
            let relay = Arc::new(RelayConnection::with_config(
                &key,
                RelayConfig {
                    connect_timeout: self.config.connect_timeout,
                },
            )?);
            relays.insert(key.clone(), Arc::clone(&relay));
            relay
        };

        if let Err(error) = relay.connect().await {
            self.forget(&key, &relay).await;
            warn!("failed to connect to {}: {}", key, error);
            return Err(error);
        }

        let Some(mut incoming) = relay.take_incoming().await else {
            self.forget(&key, &relay).await;
            return Err(ClientError::Internal(format!(
                "relay {} has no inbound channel",
                key
            )));
        };

        let dispatcher = self.dispatcher.clone();
        let relays = Arc::clone(&self.relays);
        let pumped = Arc::clone(&relay);
        let pump = tokio::spawn(async move {
            let url = pumped.url().to_string();
            while let Some(message) = incoming.recv().await {
                dispatcher.handle_message(&url, message).await;
            }

            {
                let mut relays = relays.write().await;
                if relays.get(&url).is_some_and(|current| Arc::ptr_eq(current, &pumped)) {
                    relays.remove(&url);
                }
            }
            dispatcher.relay_lost(&url).await;
            debug!("pump for {} stopped", url);
        });

        // A previous pump for this URL is finishing its own cleanup; let it run.
        self.pumps.lock().await.insert(key, pump);
        Ok(relay)
    }

    /// Connect to every URL, reporting each outcome. One failure never stops the rest.
    pub async fn connect_all<I, S>(&self, urls: I) -> Vec<(String, Result<()>)>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let attempts = urls.into_iter().map(|url| {
            let url = url.as_ref().to_string();
            async move {
                let result = self.connect(&url).await.map(|_| ());
                (url, result)
            }
        });
        let results = futures_util::future::join_all(attempts).await;

        let connected = results.iter().filter(|(_, result)| result.is_ok()).count();
        info!("connected to {}/{} relays", connected, results.len());
        results
    }

    /// Close the relay and release whatever it still owed. Unknown URLs are a no-op.
    pub async fn disconnect(&self, url: &str) -> Result<()> {
        let key = normalize_url(url)?;
        let Some(relay) = self.relays.write().await.remove(&key) else {
            return Ok(());
        };

        let result = relay.disconnect().await;
        if let Some(pump) = self.pumps.lock().await.remove(&key) {
            // The reader is gone, so the pump drains and exits on its own.
            if let Err(error) = pump.await {
                debug!("pump for {} ended abnormally: {}", key, error);
            }
        }
        self.dispatcher.relay_lost(&key).await;
        info!("disconnected from {}", key);
        result
    }

    pub async fn is_connected(&self, url: &str) -> bool {
        let Ok(key) = normalize_url(url) else {
            return false;
        };
        let relay = self.relays.read().await.get(&key).cloned();
        match relay {
            Some(relay) => relay.is_connected().await,
            None => false,
        }
    }

    /// URLs of relays currently open.
    pub async fn list_connected(&self) -> Vec<String> {
        let relays: Vec<Arc<RelayConnection>> =
            self.relays.read().await.values().cloned().collect();
        let mut connected = Vec::new();
        for relay in relays {
            if relay.is_connected().await {
                connected.push(relay.url().to_string());
            }
        }
        connected.sort();
        connected
    }

    pub async fn relay(&self, url: &str) -> Option<Arc<RelayConnection>> {
        let key = normalize_url(url).ok()?;
        self.relays.read().await.get(&key).cloned()
    }

    /// Subscribe on every connected relay. See [`Dispatcher::subscribe`].
    pub async fn subscribe(
        &self,
        filters: Vec<Filter>,
        on_event: EventCallback,
        on_complete: Option<CompletionCallback>,
    ) -> Result<String> {
        self.dispatcher.subscribe(filters, on_event, on_complete).await
    }

    pub async fn unsubscribe(&self, subscription_id: &str) {
        self.dispatcher.unsubscribe(subscription_id).await;
    }

    /// Sign and send to every connected relay.
    pub async fn publish(&self, template: EventTemplate) -> Result<Vec<PublishOutcome>> {
        self.dispatcher.publish(template).await
    }

    pub async fn cached_event(&self, event_id: &str) -> Option<Event> {
        self.dispatcher.cached_event(event_id).await
    }

    pub async fn cached_event_count(&self) -> usize {
        self.dispatcher.cached_event_count().await
    }

    pub async fn subscription_count(&self) -> usize {
        self.dispatcher.registry().len().await
    }

    pub async fn has_subscription(&self, subscription_id: &str) -> bool {
        self.dispatcher.registry().contains(subscription_id).await
    }

    /// Drop every subscription without firing callbacks, then close every relay.
    pub async fn shutdown(&self) {
        self.dispatcher.clear().await;

        let relays: Vec<(String, Arc<RelayConnection>)> =
            self.relays.write().await.drain().collect();
        for (url, relay) in relays {
            if let Err(error) = relay.disconnect().await {
                debug!("error closing {}: {}", url, error);
            }
        }

        let pumps: Vec<JoinHandle<()>> = self
            .pumps
            .lock()
            .await
            .drain()
            .map(|(_, pump)| pump)
            .collect();
        for pump in pumps {
            let _ = pump.await;
        }
        info!("relay manager shut down");
    }

    async fn forget(&self, key: &str, relay: &Arc<RelayConnection>) {
        let mut relays = self.relays.write().await;
        if relays.get(key).is_some_and(|current| Arc::ptr_eq(current, relay)) {
            relays.remove(key);
        }
    }
}

/// Canonical table key for a relay URL.
pub(crate) fn normalize_url(url: &str) -> Result<String> {
    Ok(Url::parse(url)?.to_string())
}
