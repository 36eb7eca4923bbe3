//! NIP-01: the event value and its canonical digest and signature.
//!
//! An event's `id` is the lowercase hex SHA-256 of the compact JSON array
//! `[0, pubkey, created_at, kind, tags, content]`, and `sig` is a BIP-340
//! Schnorr signature over that id under the x-only `pubkey`.

use bitcoin::key::Secp256k1;
use bitcoin::secp256k1::{Keypair, Message, SecretKey, XOnlyPublicKey, schnorr};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Errors produced while hashing, signing or verifying events.
#[derive(Debug, Error)]
pub enum Nip01Error {
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid secret key: {0}")]
    InvalidSecretKey(String),

    #[error("invalid hex: {0}")]
    InvalidHex(String),

    #[error("clock error: {0}")]
    Clock(String),
}

/// A signed event as it travels on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Lowercase hex SHA-256 of the canonical serialization.
    pub id: String,
    /// Lowercase hex x-only public key of the author.
    pub pubkey: String,
    /// Unix timestamp in seconds.
    pub created_at: u64,
    pub kind: u16,
    /// Ordered tags; the first element of each tag is its name.
    pub tags: Vec<Vec<String>>,
    pub content: String,
    /// Lowercase hex Schnorr signature over `id`.
    pub sig: String,
}

impl Event {
    /// The event without `id` and `sig`, as it is hashed.
    pub fn unsigned(&self) -> UnsignedEvent {
        UnsignedEvent {
            pubkey: self.pubkey.clone(),
            created_at: self.created_at,
            kind: self.kind,
            tags: self.tags.clone(),
            content: self.content.clone(),
        }
    }
}

/// An event with an author but no id or signature yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedEvent {
    pub pubkey: String,
    pub created_at: u64,
    pub kind: u16,
    pub tags: Vec<Vec<String>>,
    pub content: String,
}

/// What a caller fills in before handing an event to a signer.
///
/// The author is not part of the template: the signer derives it from its key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventTemplate {
    pub created_at: u64,
    pub kind: u16,
    pub tags: Vec<Vec<String>>,
    pub content: String,
}

impl EventTemplate {
    /// Template stamped with the current time.
    pub fn now(kind: u16, tags: Vec<Vec<String>>, content: impl Into<String>) -> Self {
        Self {
            created_at: unix_now_secs().unwrap_or(0),
            kind,
            tags,
            content: content.into(),
        }
    }
}

/// Storage class of a kind as relays treat it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KindClassification {
    Regular,
    /// Latest per pubkey+kind.
    Replaceable,
    /// Not stored by relays.
    Ephemeral,
    /// Latest per pubkey+kind+`d` tag.
    Addressable,
    Unknown,
}

/// Current unix time in seconds.
pub fn unix_now_secs() -> Result<u64, Nip01Error> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .map_err(|error| Nip01Error::Clock(error.to_string()))
}

/// Fresh random 32-byte secret key.
pub fn generate_secret_key() -> [u8; 32] {
    let mut key = [0u8; 32];
    rand::rng().fill_bytes(&mut key);
    key
}

/// X-only public key for a secret key.
pub fn get_public_key(secret_key: &[u8; 32]) -> Result<[u8; 32], Nip01Error> {
    let secp = Secp256k1::signing_only();
    let secret = SecretKey::from_slice(secret_key)
        .map_err(|error| Nip01Error::InvalidSecretKey(error.to_string()))?;
    let (xonly, _parity) = secret.x_only_public_key(&secp);
    Ok(xonly.serialize())
}

pub fn get_public_key_hex(secret_key: &[u8; 32]) -> Result<String, Nip01Error> {
    get_public_key(secret_key).map(hex::encode)
}

/// Canonical serialization used for the id digest.
pub fn serialize_event(event: &UnsignedEvent) -> Result<String, Nip01Error> {
    if !is_lower_hex(&event.pubkey, 64) {
        return Err(Nip01Error::InvalidEvent(format!(
            "pubkey must be 64 lowercase hex characters, got {:?}",
            event.pubkey
        )));
    }

    serde_json::to_string(&(
        0,
        &event.pubkey,
        event.created_at,
        event.kind,
        &event.tags,
        &event.content,
    ))
    .map_err(|error| Nip01Error::Serialization(error.to_string()))
}

/// Event id: hex SHA-256 of [`serialize_event`].
pub fn get_event_hash(event: &UnsignedEvent) -> Result<String, Nip01Error> {
    let serialized = serialize_event(event)?;
    Ok(hex::encode(Sha256::digest(serialized.as_bytes())))
}

/// Structural check only: field encodings, not the digest or signature.
///
/// Hex fields must be lowercase so one event has exactly one id string.
pub fn validate_event(event: &Event) -> bool {
    is_lower_hex(&event.id, 64)
        && is_lower_hex(&event.pubkey, 64)
        && is_lower_hex(&event.sig, 128)
}

/// Sign a template, producing an event with a real id and signature.
pub fn finalize_event(
    template: &EventTemplate,
    secret_key: &[u8; 32],
) -> Result<Event, Nip01Error> {
    let secp = Secp256k1::signing_only();
    let secret = SecretKey::from_slice(secret_key)
        .map_err(|error| Nip01Error::InvalidSecretKey(error.to_string()))?;
    let keypair = Keypair::from_secret_key(&secp, &secret);
    let (xonly, _parity) = keypair.x_only_public_key();

    let unsigned = UnsignedEvent {
        pubkey: hex::encode(xonly.serialize()),
        created_at: template.created_at,
        kind: template.kind,
        tags: template.tags.clone(),
        content: template.content.clone(),
    };
    let id = get_event_hash(&unsigned)?;
    let digest = decode_fixed::<32>(&id)?;
    let sig = secp.sign_schnorr_no_aux_rand(&Message::from_digest(digest), &keypair);

    Ok(Event {
        id,
        pubkey: unsigned.pubkey,
        created_at: unsigned.created_at,
        kind: unsigned.kind,
        tags: unsigned.tags,
        content: unsigned.content,
        sig: hex::encode(sig.serialize()),
    })
}

/// Full verification: structure, recomputed id, then the Schnorr signature.
///
/// `Ok(false)` means the event is well-encoded but not authentic.
pub fn verify_event(event: &Event) -> Result<bool, Nip01Error> {
    if !validate_event(event) {
        return Ok(false);
    }

    if get_event_hash(&event.unsigned())? != event.id {
        return Ok(false);
    }

    let digest = decode_fixed::<32>(&event.id)?;
    let Ok(signature) = schnorr::Signature::from_slice(&decode_fixed::<64>(&event.sig)?) else {
        return Ok(false);
    };
    let Ok(pubkey) = XOnlyPublicKey::from_slice(&decode_fixed::<32>(&event.pubkey)?) else {
        return Ok(false);
    };

    let secp = Secp256k1::verification_only();
    Ok(secp
        .verify_schnorr(&signature, &Message::from_digest(digest), &pubkey)
        .is_ok())
}

pub fn classify_kind(kind: u16) -> KindClassification {
    match kind {
        1 | 2 | 4..=44 | 1000..=9999 => KindClassification::Regular,
        0 | 3 | 10000..=19999 => KindClassification::Replaceable,
        20000..=29999 => KindClassification::Ephemeral,
        30000..=39999 => KindClassification::Addressable,
        _ => KindClassification::Unknown,
    }
}

/// Newest first; ties broken by ascending id so the order is total.
pub fn sort_events(events: &mut [Event]) {
    events.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| a.id.cmp(&b.id))
    });
}

fn is_hex(value: &str, len: usize) -> bool {
    value.len() == len && value.chars().all(|c| c.is_ascii_hexdigit())
}

fn is_lower_hex(value: &str, len: usize) -> bool {
    is_hex(value, len) && !value.chars().any(|c| c.is_ascii_uppercase())
}

fn decode_fixed<const N: usize>(value: &str) -> Result<[u8; N], Nip01Error> {
    let bytes = hex::decode(value).map_err(|error| Nip01Error::InvalidHex(error.to_string()))?;
    bytes.try_into().map_err(|bytes: Vec<u8>| {
        Nip01Error::InvalidHex(format!("expected {N} bytes, got {}", bytes.len()))
    })
}
