//! Scripted in-process relay for socket-level tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::{SinkExt, StreamExt};
use polyglot_core::Record;
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use super::message::Filter;

/// How the mock answers a `REQ`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Behavior {
    /// Matching events, then `EOSE`.
    Serve,
    /// Matching events, never `EOSE`.
    Silent,
    /// Matching events, then drop the socket.
    CloseAfterEvents,
    /// An unparseable frame, then behave like `Serve`.
    Garbage,
}

pub(crate) struct MockRelay {
    pub url: String,
    connections: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl MockRelay {
    pub async fn spawn(records: Vec<Record>, behavior: Behavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let connections = Arc::new(AtomicUsize::new(0));
        let records = Arc::new(records);

        let counter = Arc::clone(&connections);
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve(stream, Arc::clone(&records), behavior));
            }
        });

        Self {
            url,
            connections,
            task,
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

impl Drop for MockRelay {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(stream: TcpStream, records: Arc<Vec<Record>>, behavior: Behavior) {
    let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };

    while let Some(Ok(frame)) = ws.next().await {
        let Message::Text(text) = frame else {
            continue;
        };
        let Ok(Value::Array(items)) = serde_json::from_str::<Value>(text.as_str()) else {
            continue;
        };
        if items.first().and_then(Value::as_str) != Some("REQ") {
            continue;
        }
        let id = items[1].as_str().unwrap_or_default().to_string();
        let filter: Filter = serde_json::from_value(items[2].clone()).unwrap();

        if behavior == Behavior::Garbage {
            let _ = ws.send(Message::text("[\"EVENT\",")).await;
        }
        for record in records.iter().filter(|r| filter.matches(r)) {
            let frame = serde_json::json!(["EVENT", id, record]).to_string();
            if ws.send(Message::text(frame)).await.is_err() {
                return;
            }
        }
        match behavior {
            Behavior::Serve | Behavior::Garbage => {
                let eose = serde_json::json!(["EOSE", id]).to_string();
                let _ = ws.send(Message::text(eose)).await;
            }
            Behavior::Silent => {}
            Behavior::CloseAfterEvents => {
                let _ = ws.close(None).await;
                return;
            }
        }
    }
}

/// Build a valid record: `n` seeds the id, `author` seeds the key.
pub(crate) fn record(n: u64, author: &str, created_at: u64) -> Record {
    let author_hex: String = author.bytes().map(|b| format!("{:02x}", b)).collect();
    Record {
        id: format!("{:064x}", n),
        pubkey: format!("{:0>64}", author_hex),
        created_at,
        kind: 1,
        content: String::new(),
        tags: Vec::new(),
        detected_language: None,
    }
}
