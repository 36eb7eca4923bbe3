//! Subscription filters as sent in `REQ` frames.
//!
//! Matching happens on the relay; the client only builds and serializes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A NIP-01 filter. Tag filters serialize as `"#<letter>": [values]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authors: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kinds: Option<Vec<u16>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,

    /// Keyed by `#<letter>`.
    #[serde(flatten)]
    pub tags: BTreeMap<String, Vec<String>>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ids(mut self, ids: Vec<String>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn authors(mut self, authors: Vec<String>) -> Self {
        self.authors = Some(authors);
        self
    }

    pub fn kinds(mut self, kinds: Vec<u16>) -> Self {
        self.kinds = Some(kinds);
        self
    }

    pub fn since(mut self, timestamp: u64) -> Self {
        self.since = Some(timestamp);
        self
    }

    pub fn until(mut self, timestamp: u64) -> Self {
        self.until = Some(timestamp);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Accept events carrying a `letter` tag with any of `values`.
    pub fn tag(mut self, letter: char, values: Vec<String>) -> Self {
        self.tags.insert(format!("#{letter}"), values);
        self
    }

    /// `#d`, the identifier of addressable events.
    pub fn identifier(self, identifier: impl Into<String>) -> Self {
        self.tag('d', vec![identifier.into()])
    }

    /// `#t`, topic hashtags.
    pub fn topic(self, topic: impl Into<String>) -> Self {
        self.tag('t', vec![topic.into()])
    }
}
