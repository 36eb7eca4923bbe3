use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use nostr::nip54::{format_pubkey, format_timestamp};
use nostr::{KeySigner, Signer, VerifyOnlySigner, WikiArticle};
use nostr_client::wiki::DEFAULT_LIMIT;
use nostr_client::{ClientConfig, RelayManager, WikiClient};
use serde::Serialize;

/// Query and publish NIP-54 wiki articles across Nostr relays.
#[derive(Parser, Debug)]
#[command(name = "nostr-wiki", version)]
struct Args {
    /// TOML config file with the relay list and timeouts.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Relay URL; repeatable. Replaces the configured relay list.
    #[arg(long = "relay", global = true)]
    relays: Vec<String>,

    /// Print articles as readable text instead of JSON.
    #[arg(long, global = true)]
    text: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Search article titles.
    Search {
        #[arg(default_value = "")]
        query: String,
        #[arg(long, default_value_t = DEFAULT_LIMIT)]
        limit: u64,
    },
    /// Newest version of an article.
    Get { title: String },
    /// Every version of an article, newest first.
    Versions { title: String },
    /// Most recently published articles.
    Recent {
        #[arg(long, default_value_t = DEFAULT_LIMIT)]
        limit: u64,
    },
    /// A random article.
    Random,
    /// Sign and publish an article.
    Publish {
        title: String,
        #[arg(long)]
        content: String,
        #[arg(long)]
        summary: Option<String>,
        #[arg(long = "topic")]
        topics: Vec<String>,
        /// Hex secret key of the author.
        #[arg(long)]
        secret_key: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ClientConfig::load(path)
            .with_context(|| format!("load config {}", path.display()))?,
        None => ClientConfig::default(),
    };
    if !args.relays.is_empty() {
        config.relays.clone_from(&args.relays);
    }
    if config.relays.is_empty() {
        return Err(anyhow!("no relays configured; pass --relay or --config"));
    }

    let signer: Arc<dyn Signer> = match &args.command {
        Command::Publish { secret_key, .. } => Arc::new(
            KeySigner::from_hex(secret_key.trim()).context("parse secret key")?,
        ),
        _ => Arc::new(VerifyOnlySigner),
    };

    let manager = Arc::new(RelayManager::new(config.manager_config(), signer));
    let results = manager.connect_all(&config.relays).await;
    let connected = results.iter().filter(|(_, result)| result.is_ok()).count();
    for (url, result) in &results {
        if let Err(error) = result {
            tracing::warn!("skipping {}: {}", url, error);
        }
    }
    if connected == 0 {
        return Err(anyhow!("failed to connect to any relay"));
    }

    let wiki = WikiClient::new(Arc::clone(&manager));
    let outcome = run(&wiki, args.command, args.text).await;
    manager.shutdown().await;
    outcome
}

async fn run(wiki: &WikiClient, command: Command, text: bool) -> Result<()> {
    match command {
        Command::Search { query, limit } => {
            write_articles(&wiki.search_articles(&query, limit).await?, text)
        }
        Command::Get { title } => {
            let article = wiki
                .get_article(&title)
                .await?
                .ok_or_else(|| anyhow!("article not found: {}", title))?;
            write_article(&article, text)
        }
        Command::Versions { title } => {
            write_articles(&wiki.get_article_versions(&title).await?, text)
        }
        Command::Recent { limit } => write_articles(&wiki.get_recent_changes(limit).await?, text),
        Command::Random => {
            let article = wiki
                .random_article()
                .await?
                .ok_or_else(|| anyhow!("no articles found"))?;
            write_article(&article, text)
        }
        Command::Publish {
            title,
            content,
            summary,
            topics,
            secret_key: _,
        } => {
            let outcomes = wiki
                .publish_article(&title, summary.as_deref(), &topics, &content)
                .await
                .context("publish article")?;
            write_json(&outcomes)
        }
    }
}

fn write_articles(articles: &[WikiArticle], text: bool) -> Result<()> {
    if !text {
        return write_json(&articles);
    }
    let mut stdout = std::io::stdout().lock();
    for article in articles {
        writeln!(stdout, "{}", summary_line(article)).context("write output")?;
    }
    Ok(())
}

fn write_article(article: &WikiArticle, text: bool) -> Result<()> {
    if !text {
        return write_json(article);
    }
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{}", summary_line(article)).context("write output")?;
    if !article.summary.is_empty() {
        writeln!(stdout, "{}", article.summary).context("write output")?;
    }
    writeln!(stdout, "\n{}", article.content).context("write output")?;
    Ok(())
}

/// `2023-11-14 22:13:20  01234567...89abcdef  Heading`
fn summary_line(article: &WikiArticle) -> String {
    format!(
        "{}  {}  {}",
        format_timestamp(article.timestamp),
        format_pubkey(&article.pubkey),
        article.heading()
    )
}

fn write_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value).context("encode output")?;
    writeln!(stdout).context("write output")?;
    Ok(())
}
