//! Multi-relay Nostr client.
//!
//! - one WebSocket connection per relay, frames decoded in arrival order
//! - subscriptions fanned out to every connected relay, with events verified
//!   and deduplicated before delivery and a single bounded completion signal
//! - publish that signs once and sends to every connected relay
//! - NIP-54 wiki queries on top

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod filter;
pub mod manager;
pub mod message;
pub mod relay;
pub mod store;
pub mod subscription;
pub mod wiki;

pub use config::ClientConfig;
pub use dispatcher::{Dispatcher, DispatcherConfig, PublishOutcome};
pub use error::{ClientError, ConnectError, Result};
pub use filter::Filter;
pub use manager::{ManagerConfig, RelayManager};
pub use message::{ClientMessage, RelayMessage, parse_relay_message};
pub use relay::{ConnectionState, RelayConfig, RelayConnection};
pub use store::{EventStore, PutOutcome};
pub use subscription::{
    Completion, CompletionCallback, EventCallback, SubscriptionInfo, SubscriptionRegistry,
};
pub use wiki::WikiClient;
