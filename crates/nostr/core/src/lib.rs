//! Nostr protocol primitives: events, their digest and signatures, the
//! signing collaborator and the NIP-54 wiki article projection.

pub mod nip01;
pub mod nip54;
mod signer;
mod tag_parsing;

pub use nip01::{
    Event, EventTemplate, KindClassification, Nip01Error, UnsignedEvent, finalize_event,
    generate_secret_key, get_event_hash, get_public_key_hex, sort_events, unix_now_secs,
    validate_event, verify_event,
};
pub use nip54::{KIND_WIKI_ARTICLE, WikiArticle};
pub use signer::{KeySigner, Signer, SigningError, VerifyOnlySigner};
