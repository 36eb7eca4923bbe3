//! Signing collaborator used by clients to publish and to vet inbound events.

use async_trait::async_trait;
use thiserror::Error;

use crate::nip01::{
    Event, EventTemplate, Nip01Error, finalize_event, generate_secret_key, get_public_key_hex,
    verify_event,
};

/// Why a signer refused to produce an event.
#[derive(Debug, Error)]
pub enum SigningError {
    #[error("signer has no secret key")]
    NoSecretKey,

    #[error("invalid secret key: {0}")]
    InvalidKey(String),

    #[error("signing failed: {0}")]
    Failed(String),
}

impl From<Nip01Error> for SigningError {
    fn from(error: Nip01Error) -> Self {
        match error {
            Nip01Error::InvalidSecretKey(message) | Nip01Error::InvalidHex(message) => {
                Self::InvalidKey(message)
            }
            other => Self::Failed(other.to_string()),
        }
    }
}

/// Produces signed events and checks signatures of received ones.
///
/// `sign` is async so implementations may defer to an external key holder.
#[async_trait]
pub trait Signer: Send + Sync {
    async fn sign(&self, template: EventTemplate) -> Result<Event, SigningError>;

    /// True only when the id is the digest of the event and the signature
    /// is valid for it under `pubkey`.
    fn verify(&self, event: &Event) -> bool {
        verify_event(event).unwrap_or(false)
    }

    fn public_key_hex(&self) -> Option<String> {
        None
    }
}

/// Signer backed by an in-memory secret key.
#[derive(Clone)]
pub struct KeySigner {
    secret_key: [u8; 32],
    public_key_hex: String,
}

impl KeySigner {
    pub fn new(secret_key: [u8; 32]) -> Result<Self, SigningError> {
        let public_key_hex = get_public_key_hex(&secret_key)?;
        Ok(Self {
            secret_key,
            public_key_hex,
        })
    }

    pub fn from_hex(secret_key_hex: &str) -> Result<Self, SigningError> {
        let bytes = hex::decode(secret_key_hex.trim())
            .map_err(|error| SigningError::InvalidKey(error.to_string()))?;
        let secret_key: [u8; 32] = bytes.try_into().map_err(|bytes: Vec<u8>| {
            SigningError::InvalidKey(format!("expected 32 bytes, got {}", bytes.len()))
        })?;
        Self::new(secret_key)
    }

    pub fn generate() -> Result<Self, SigningError> {
        Self::new(generate_secret_key())
    }
}

impl std::fmt::Debug for KeySigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeySigner")
            .field("public_key_hex", &self.public_key_hex)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Signer for KeySigner {
    async fn sign(&self, template: EventTemplate) -> Result<Event, SigningError> {
        Ok(finalize_event(&template, &self.secret_key)?)
    }

    fn public_key_hex(&self) -> Option<String> {
        Some(self.public_key_hex.clone())
    }
}

/// Signer for read-only clients: verifies, never signs.
#[derive(Debug, Clone, Copy, Default)]
pub struct VerifyOnlySigner;

#[async_trait]
impl Signer for VerifyOnlySigner {
    async fn sign(&self, _template: EventTemplate) -> Result<Event, SigningError> {
        Err(SigningError::NoSecretKey)
    }
}
