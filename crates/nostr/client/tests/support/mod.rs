//! Scripted in-process relay for integration tests.

#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use nostr::{Event, EventTemplate, KeySigner, Signer};
use nostr_client::{
    Completion, CompletionCallback, EventCallback, ManagerConfig, RelayManager,
};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

/// Frames a relay answers a `REQ` with, given the subscription id and filters.
pub type Script = Arc<dyn Fn(&str, &[Value]) -> Vec<String> + Send + Sync>;

pub struct MockRelay {
    pub url: String,
    frames: Arc<Mutex<Vec<Value>>>,
    inject: broadcast::Sender<String>,
    task: JoinHandle<()>,
}

impl MockRelay {
    pub async fn start(script: Script) -> anyhow::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let url = format!("ws://{}", listener.local_addr()?);
        let frames = Arc::new(Mutex::new(Vec::new()));
        let (inject, _) = broadcast::channel(64);

        let task = tokio::spawn({
            let frames = Arc::clone(&frames);
            let inject = inject.clone();
            async move {
                while let Ok((stream, _)) = listener.accept().await {
                    tokio::spawn(serve(
                        stream,
                        Arc::clone(&script),
                        Arc::clone(&frames),
                        inject.subscribe(),
                    ));
                }
            }
        });

        Ok(Self {
            url,
            frames,
            inject,
            task,
        })
    }

    /// Relay that answers every `REQ` with the `events` its filters select,
    /// followed by EOSE. Only `kinds` and `#d` are honoured.
    pub async fn serving(events: Vec<Event>) -> anyhow::Result<Self> {
        Self::start(Arc::new(move |subscription_id: &str, filters: &[Value]| {
            let mut frames: Vec<String> = events
                .iter()
                .filter(|event| filters.iter().any(|filter| selects(filter, event)))
                .map(|event| event_frame(subscription_id, event))
                .collect();
            frames.push(eose_frame(subscription_id));
            frames
        }))
        .await
    }

    /// Relay that accepts requests and never answers.
    pub async fn silent() -> anyhow::Result<Self> {
        Self::start(Arc::new(|_: &str, _: &[Value]| Vec::new())).await
    }

    /// Push a raw frame to every connected client.
    pub fn push(&self, frame: String) {
        let _ = self.inject.send(frame);
    }

    /// Frames received so far whose first element is `kind`.
    pub async fn frames(&self, kind: &str) -> Vec<Value> {
        self.frames
            .lock()
            .await
            .iter()
            .filter(|frame| frame.get(0).and_then(Value::as_str) == Some(kind))
            .cloned()
            .collect()
    }

    /// Wait until at least `count` frames of `kind` arrived.
    pub async fn wait_for(&self, kind: &str, count: usize) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if self.frames(kind).await.len() >= count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }
}

impl Drop for MockRelay {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(
    stream: TcpStream,
    script: Script,
    frames: Arc<Mutex<Vec<Value>>>,
    mut injected: broadcast::Receiver<String>,
) {
    let Ok(socket) = accept_async(stream).await else {
        return;
    };
    let (mut sink, mut source) = socket.split();

    loop {
        tokio::select! {
            incoming = source.next() => {
                let Some(Ok(message)) = incoming else {
                    break;
                };
                let Message::Text(text) = message else {
                    continue;
                };
                let Ok(frame) = serde_json::from_str::<Value>(&text) else {
                    continue;
                };
                let filters: Vec<Value> = frame
                    .as_array()
                    .map(|items| items.iter().skip(2).cloned().collect())
                    .unwrap_or_default();
                let replies = match (
                    frame.get(0).and_then(Value::as_str),
                    frame.get(1).and_then(Value::as_str),
                ) {
                    (Some("REQ"), Some(subscription_id)) => script(subscription_id, &filters),
                    _ => Vec::new(),
                };
                frames.lock().await.push(frame);
                for reply in replies {
                    if sink.send(Message::Text(reply)).await.is_err() {
                        return;
                    }
                }
            }
            pushed = injected.recv() => {
                let Ok(frame) = pushed else {
                    break;
                };
                if sink.send(Message::Text(frame)).await.is_err() {
                    return;
                }
            }
        }
    }
}

fn selects(filter: &Value, event: &Event) -> bool {
    let kind_matches = filter
        .get("kinds")
        .and_then(Value::as_array)
        .is_none_or(|kinds| {
            kinds
                .iter()
                .any(|kind| kind.as_u64() == Some(u64::from(event.kind)))
        });
    let identifier_matches = filter
        .get("#d")
        .and_then(Value::as_array)
        .is_none_or(|wanted| {
            event.tags.iter().any(|tag| {
                tag.first().map(String::as_str) == Some("d")
                    && tag
                        .get(1)
                        .is_some_and(|d| wanted.iter().any(|value| value.as_str() == Some(d.as_str())))
            })
        });
    kind_matches && identifier_matches
}

pub fn event_frame(subscription_id: &str, event: &Event) -> String {
    json!(["EVENT", subscription_id, event]).to_string()
}

pub fn eose_frame(subscription_id: &str) -> String {
    json!(["EOSE", subscription_id]).to_string()
}

/// URL nothing listens on.
pub fn dead_relay_url() -> anyhow::Result<String> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    let url = format!("ws://{}", listener.local_addr()?);
    drop(listener);
    Ok(url)
}

pub async fn signed_article(
    signer: &KeySigner,
    title: &str,
    created_at: u64,
    content: &str,
) -> anyhow::Result<Event> {
    let mut template = nostr::nip54::create_wiki_article_event(title, None, &[], content);
    template.created_at = created_at;
    Ok(signer.sign(template).await?)
}

pub async fn signed_note(content: &str) -> anyhow::Result<Event> {
    let signer = KeySigner::generate()?;
    Ok(signer
        .sign(EventTemplate {
            created_at: 1_700_000_000,
            kind: 30818,
            tags: vec![vec!["d".to_string(), "note".to_string()]],
            content: content.to_string(),
        })
        .await?)
}

pub fn manager(subscription_timeout: Duration, signer: Arc<dyn Signer>) -> RelayManager {
    RelayManager::new(
        ManagerConfig {
            connect_timeout: Duration::from_secs(1),
            subscription_timeout,
            ..ManagerConfig::default()
        },
        signer,
    )
}

/// Event callback feeding a channel.
pub fn event_recorder() -> (EventCallback, mpsc::UnboundedReceiver<Event>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let callback: EventCallback = Arc::new(move |event| {
        let _ = tx.send(event);
        Ok(())
    });
    (callback, rx)
}

/// Completion callback feeding a channel, stamped with when it fired.
pub fn completion_recorder() -> (
    CompletionCallback,
    mpsc::UnboundedReceiver<(Completion, Instant)>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let callback: CompletionCallback = Box::new(move |completion| {
        let _ = tx.send((completion, Instant::now()));
    });
    (callback, rx)
}

pub fn drain<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> Vec<T> {
    let mut items = Vec::new();
    while let Ok(item) = rx.try_recv() {
        items.push(item);
    }
    items
}

pub async fn next_completion(
    rx: &mut mpsc::UnboundedReceiver<(Completion, Instant)>,
) -> Option<(Completion, Instant)> {
    tokio::time::timeout(Duration::from_secs(3), rx.recv())
        .await
        .ok()
        .flatten()
}
