//! NIP-54 wiki queries on top of the relay manager.
//!
//! Every query is a one-shot subscription: events are collected until the
//! subscription completes (EOSE from every relay, or the timeout), then the
//! collected events are projected into [`WikiArticle`]s.

use crate::dispatcher::PublishOutcome;
use crate::error::{ClientError, Result};
use crate::filter::Filter;
use crate::manager::RelayManager;
use crate::subscription::{Completion, EventCallback};
use nostr::nip54::{create_wiki_article_event, normalize_title};
use nostr::{Event, KIND_WIKI_ARTICLE, WikiArticle, sort_events};
use rand::seq::IndexedRandom;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tracing::debug;

/// Default page size for listings.
pub const DEFAULT_LIMIT: u64 = 20;

/// How many articles a random pick is drawn from.
const RANDOM_POOL_SIZE: u64 = 100;

/// Wiki helper sharing a relay manager.
pub struct WikiClient {
    manager: Arc<RelayManager>,
}

impl WikiClient {
    pub fn new(manager: Arc<RelayManager>) -> Self {
        Self { manager }
    }

    /// Articles whose title contains `query`, newest first. An empty query lists everything.
    pub async fn search_articles(&self, query: &str, limit: u64) -> Result<Vec<WikiArticle>> {
        let filter = Filter::new().kinds(vec![KIND_WIKI_ARTICLE]).limit(limit);
        let articles = self
            .collect_articles(filter)
            .await?
            .into_iter()
            .filter(|article| article.matches_query(query))
            .collect();
        Ok(articles)
    }

    /// Newest version of the article, by any author.
    pub async fn get_article(&self, title: &str) -> Result<Option<WikiArticle>> {
        Ok(self.get_article_versions(title).await?.into_iter().next())
    }

    /// Every version of the article, newest first.
    pub async fn get_article_versions(&self, title: &str) -> Result<Vec<WikiArticle>> {
        let filter = Filter::new()
            .kinds(vec![KIND_WIKI_ARTICLE])
            .identifier(normalize_title(title));
        self.collect_articles(filter).await
    }

    pub async fn get_recent_changes(&self, limit: u64) -> Result<Vec<WikiArticle>> {
        let filter = Filter::new().kinds(vec![KIND_WIKI_ARTICLE]).limit(limit);
        let mut articles = self.collect_articles(filter).await?;
        articles.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(articles)
    }

    /// One article picked at random from a recent listing.
    pub async fn random_article(&self) -> Result<Option<WikiArticle>> {
        let articles = self.search_articles("", RANDOM_POOL_SIZE).await?;
        Ok(articles.choose(&mut rand::rng()).cloned())
    }

    /// Build, sign and publish a new article version.
    pub async fn publish_article(
        &self,
        title: &str,
        summary: Option<&str>,
        topics: &[String],
        content: &str,
    ) -> Result<Vec<PublishOutcome>> {
        if normalize_title(title).is_empty() {
            return Err(ClientError::Internal("article title is empty".to_string()));
        }
        let template = create_wiki_article_event(title, summary, topics, content);
        self.manager.publish(template).await
    }

    async fn collect_articles(&self, filter: Filter) -> Result<Vec<WikiArticle>> {
        let mut events = self.collect(filter).await?;
        sort_events(&mut events);
        Ok(events.iter().map(WikiArticle::from_event).collect())
    }

    /// Run a one-shot subscription and return what arrived before completion.
    async fn collect(&self, filter: Filter) -> Result<Vec<Event>> {
        let collected: Arc<Mutex<Vec<Event>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&collected);
        let on_event: EventCallback = Arc::new(move |event| {
            sink.lock()
                .map_err(|_| ClientError::Internal("collector lock poisoned".to_string()))?
                .push(event);
            Ok(())
        });

        let (done_tx, done_rx) = oneshot::channel();
        let subscription_id = self
            .manager
            .subscribe(
                vec![filter],
                on_event,
                Some(Box::new(move |completion| {
                    let _ = done_tx.send(completion);
                })),
            )
            .await?;

        let completion = match done_rx.await {
            Ok(completion) => completion,
            Err(_) => {
                self.manager.unsubscribe(&subscription_id).await;
                return Err(ClientError::Subscription(format!(
                    "subscription {} dropped before completing",
                    subscription_id
                )));
            }
        };
        if completion == Completion::TimedOut {
            debug!("subscription {} timed out; using partial results", subscription_id);
        }

        let events = std::mem::take(
            &mut *collected
                .lock()
                .map_err(|_| ClientError::Internal("collector lock poisoned".to_string()))?,
        );
        Ok(events)
    }
}
