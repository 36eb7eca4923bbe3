//! Relay protocol frames.
//!
//! Outbound: `["REQ", id, filter...]`, `["CLOSE", id]`, `["EVENT", event]`.
//! Inbound: `["EVENT", id, event]`, `["EOSE", id]`, `["NOTICE", text]`.
//! Any other inbound kind is ignored.

use crate::error::{ClientError, Result};
use crate::filter::Filter;
use nostr::Event;
use serde_json::{Value, json};

/// Frame sent from client to relay.
#[derive(Debug, Clone)]
pub enum ClientMessage {
    Req {
        subscription_id: String,
        filters: Vec<Filter>,
    },
    Close {
        subscription_id: String,
    },
    Event(Event),
}

impl ClientMessage {
    pub fn to_json(&self) -> Result<String> {
        let value = match self {
            Self::Req {
                subscription_id,
                filters,
            } => {
                let mut frame = Vec::with_capacity(filters.len() + 2);
                frame.push(json!("REQ"));
                frame.push(json!(subscription_id));
                for filter in filters {
                    frame.push(serde_json::to_value(filter)?);
                }
                Value::Array(frame)
            }
            Self::Close { subscription_id } => json!(["CLOSE", subscription_id]),
            Self::Event(event) => json!(["EVENT", event]),
        };
        Ok(serde_json::to_string(&value)?)
    }
}

/// Frame received from a relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayMessage {
    Event(String, Event),
    Eose(String),
    Notice(String),
}

impl RelayMessage {
    /// Subscription the frame belongs to, if any.
    pub fn subscription_id(&self) -> Option<&str> {
        match self {
            Self::Event(subscription_id, _) | Self::Eose(subscription_id) => {
                Some(subscription_id)
            }
            Self::Notice(_) => None,
        }
    }
}

/// Parse relay protocol JSON text message into typed relay message.
///
/// `Ok(None)` for frame kinds this client does not handle.
pub fn parse_relay_message(text: &str) -> Result<Option<RelayMessage>> {
    let value: Value = serde_json::from_str(text)?;
    let array = value
        .as_array()
        .ok_or_else(|| ClientError::Protocol("expected JSON array relay message".to_string()))?;
    if array.is_empty() {
        return Ok(None);
    }

    let kind = array[0]
        .as_str()
        .ok_or_else(|| ClientError::Protocol("missing relay message kind".to_string()))?;

    match kind {
        "EVENT" => {
            if array.len() < 3 {
                return Err(ClientError::Protocol("invalid EVENT message".to_string()));
            }
            let subscription_id = string_field(&array[1], "invalid EVENT subscription id")?;
            let event: Event = serde_json::from_value(array[2].clone())
                .map_err(|error| ClientError::MalformedEvent(error.to_string()))?;
            Ok(Some(RelayMessage::Event(subscription_id, event)))
        }
        "EOSE" => {
            if array.len() < 2 {
                return Err(ClientError::Protocol("invalid EOSE message".to_string()));
            }
            let subscription_id = string_field(&array[1], "invalid EOSE subscription id")?;
            Ok(Some(RelayMessage::Eose(subscription_id)))
        }
        "NOTICE" => {
            if array.len() < 2 {
                return Err(ClientError::Protocol("invalid NOTICE message".to_string()));
            }
            let message = string_field(&array[1], "invalid NOTICE message text")?;
            Ok(Some(RelayMessage::Notice(message)))
        }
        _ => Ok(None),
    }
}

fn string_field(value: &Value, error: &str) -> Result<String> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| ClientError::Protocol(error.to_string()))
}
