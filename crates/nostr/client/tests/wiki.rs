//! NIP-54 wiki queries against a scripted relay.

mod support;

use nostr::{KeySigner, Signer, VerifyOnlySigner};
use nostr_client::WikiClient;
use nostr_client::wiki::DEFAULT_LIMIT;
use std::sync::Arc;
use std::time::Duration;
use support::{MockRelay, manager, signed_article};

#[tokio::test]
async fn test_article_versions_resolve_newest_first() -> anyhow::Result<()> {
    let alice = KeySigner::generate()?;
    let bob = KeySigner::generate()?;
    let older = signed_article(&alice, "Rust", 1_700_000_000, "Rust is fast.").await?;
    let newer = signed_article(&bob, "Rust", 1_700_000_500, "Rust is fast and safe.").await?;
    let unrelated = signed_article(&alice, "Go", 1_700_000_900, "Go is simple.").await?;

    let relay = MockRelay::serving(vec![older.clone(), newer.clone(), unrelated]).await?;
    let manager = Arc::new(manager(Duration::from_secs(5), Arc::new(VerifyOnlySigner)));
    manager.connect(&relay.url).await?;
    let wiki = WikiClient::new(Arc::clone(&manager));

    let versions = wiki.get_article_versions("Rust").await?;
    let ids: Vec<&str> = versions.iter().map(|article| article.id.as_str()).collect();
    assert_eq!(ids, vec![newer.id.as_str(), older.id.as_str()]);

    let requests = relay.frames("REQ").await;
    assert_eq!(requests[0][2]["#d"][0], "rust");
    assert_eq!(requests[0][2]["kinds"][0], 30818);

    let latest = wiki
        .get_article("rust ")
        .await?
        .ok_or_else(|| anyhow::anyhow!("no article"))?;
    assert_eq!(latest.id, newer.id);
    assert_eq!(latest.content, "Rust is fast and safe.");
    assert_eq!(latest.heading(), "Rust");

    assert!(wiki.get_article("Haskell").await?.is_none());
    manager.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_search_filters_titles_case_insensitively() -> anyhow::Result<()> {
    let author = KeySigner::generate()?;
    let rust = signed_article(&author, "Rust Language", 1_700_000_000, "...").await?;
    let trust = signed_article(&author, "Trust", 1_700_000_100, "...").await?;
    let go = signed_article(&author, "Go", 1_700_000_200, "...").await?;

    let relay = MockRelay::serving(vec![rust.clone(), trust.clone(), go]).await?;
    let manager = Arc::new(manager(Duration::from_secs(5), Arc::new(VerifyOnlySigner)));
    manager.connect(&relay.url).await?;
    let wiki = WikiClient::new(Arc::clone(&manager));

    let found = wiki.search_articles("RUST", DEFAULT_LIMIT).await?;
    let ids: Vec<&str> = found.iter().map(|article| article.id.as_str()).collect();
    assert_eq!(ids, vec![trust.id.as_str(), rust.id.as_str()]);

    let everything = wiki.search_articles("", DEFAULT_LIMIT).await?;
    assert_eq!(everything.len(), 3);

    let recent = wiki.get_recent_changes(2).await?;
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].title, "go");
    assert_eq!(relay.frames("REQ").await[2][2]["limit"], 2);

    assert!(wiki.random_article().await?.is_some());
    manager.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_publish_article_sends_signed_nip54_event() -> anyhow::Result<()> {
    let relay = MockRelay::silent().await?;
    let signer = KeySigner::generate()?;
    let author = signer
        .public_key_hex()
        .ok_or_else(|| anyhow::anyhow!("signer has no public key"))?;
    let manager = Arc::new(manager(Duration::from_secs(5), Arc::new(signer)));
    manager.connect(&relay.url).await?;
    let wiki = WikiClient::new(Arc::clone(&manager));

    let outcomes = wiki
        .publish_article(
            "Nostr Protocol",
            Some("Notes and other stuff transmitted by relays"),
            &["protocol".to_string()],
            "# Nostr\n\nA simple protocol.",
        )
        .await?;
    assert_eq!(outcomes.len(), 1);
    assert!(outcomes[0].sent);

    assert!(relay.wait_for("EVENT", 1).await);
    let frame = relay.frames("EVENT").await.remove(0);
    let event: nostr::Event = serde_json::from_value(frame[1].clone())?;
    assert!(nostr::verify_event(&event)?);
    assert_eq!(event.pubkey, author);

    let article = nostr::WikiArticle::from_event(&event);
    assert_eq!(article.title, "nostr-protocol");
    assert_eq!(article.heading(), "Nostr Protocol");
    assert_eq!(article.topic_tags, vec!["protocol".to_string()]);
    manager.shutdown().await;
    Ok(())
}
