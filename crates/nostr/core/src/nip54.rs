//! NIP-54: Wiki articles.
//!
//! A wiki article is an addressable event of kind 30818. Its `d` tag holds the
//! normalized article title, so every author's version of "Rust" shares the
//! address `30818:<pubkey>:rust`. Optional `title`, `summary` and `t` tags carry
//! a display title, a short summary and topic hashtags; the content is the
//! article body.
//!
//! This module is a pure projection: it never talks to relays.

use serde::{Deserialize, Serialize};

use crate::nip01::{Event, EventTemplate, unix_now_secs};
use crate::tag_parsing::{collect_tag_values, last_tag_value, tag};

pub const KIND_WIKI_ARTICLE: u16 = 30818;

/// Caller-side view of a wiki article event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WikiArticle {
    pub id: String,
    /// From the `d` tag, or the display title when `d` is missing.
    pub title: String,
    pub display_title: Option<String>,
    pub summary: String,
    pub topic_tags: Vec<String>,
    pub pubkey: String,
    pub timestamp: u64,
    pub content: String,
}

impl WikiArticle {
    pub fn from_event(event: &Event) -> Self {
        let display_title = last_tag_value(&event.tags, "title").map(str::to_string);
        let title = match last_tag_value(&event.tags, "d") {
            Some(title) if !title.is_empty() => title.to_string(),
            _ => display_title.clone().unwrap_or_default(),
        };

        Self {
            id: event.id.clone(),
            title,
            display_title,
            summary: last_tag_value(&event.tags, "summary")
                .unwrap_or_default()
                .to_string(),
            topic_tags: collect_tag_values(&event.tags, "t"),
            pubkey: event.pubkey.clone(),
            timestamp: event.created_at,
            content: event.content.clone(),
        }
    }

    /// Title to show a reader.
    pub fn heading(&self) -> &str {
        match &self.display_title {
            Some(display) if !display.is_empty() => display,
            _ => &self.title,
        }
    }

    /// Case-insensitive substring match on the title; an empty query matches.
    pub fn matches_query(&self, query: &str) -> bool {
        let query = query.trim();
        query.is_empty() || self.title.to_lowercase().contains(&query.to_lowercase())
    }
}

/// `d` tag form of a title: lowercase, whitespace runs become `-`.
pub fn normalize_title(title: &str) -> String {
    title
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("-")
}

/// Unsigned article event ready for a signer.
pub fn create_wiki_article_event(
    title: &str,
    summary: Option<&str>,
    topics: &[String],
    content: &str,
) -> EventTemplate {
    let mut tags = vec![tag("d", normalize_title(title)), tag("title", title.trim())];
    if let Some(summary) = summary.filter(|summary| !summary.trim().is_empty()) {
        tags.push(tag("summary", summary.trim()));
    }
    tags.extend(
        topics
            .iter()
            .filter(|topic| !topic.trim().is_empty())
            .map(|topic| tag("t", topic.trim())),
    );

    EventTemplate {
        created_at: unix_now_secs().unwrap_or(0),
        kind: KIND_WIKI_ARTICLE,
        tags,
        content: content.to_string(),
    }
}

/// `abcdef01...89abcdef` style abbreviation of a hex key.
pub fn format_pubkey(pubkey: &str) -> String {
    if pubkey.is_empty() {
        return "Unknown".to_string();
    }
    if pubkey.len() <= 16 || !pubkey.is_ascii() {
        return pubkey.to_string();
    }
    format!("{}...{}", &pubkey[..8], &pubkey[pubkey.len() - 8..])
}

/// UTC `YYYY-MM-DD HH:MM:SS`.
pub fn format_timestamp(timestamp: u64) -> String {
    i64::try_from(timestamp)
        .ok()
        .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0))
        .map_or_else(
            || timestamp.to_string(),
            |datetime| datetime.format("%Y-%m-%d %H:%M:%S").to_string(),
        )
}
