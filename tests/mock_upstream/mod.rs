//! In-process stand-in for the whisper backend
//!
//! Accepts any number of WebSocket connections, records everything they
//! send, and lets a test push text frames or close a connection.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{accept_async, tungstenite::Message};

/// Default wait for an expected event
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamEvent {
    Opened(usize),
    Received(usize, Message),
    Closed(usize, Option<u16>),
}

type Outbound = Arc<Mutex<HashMap<usize, mpsc::UnboundedSender<Message>>>>;

pub struct MockUpstream {
    url: String,
    events: mpsc::UnboundedReceiver<UpstreamEvent>,
    outbound: Outbound,
    open: Arc<AtomicUsize>,
    accept_task: JoinHandle<()>,
}

impl MockUpstream {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());

        let (events_tx, events) = mpsc::unbounded_channel();
        let outbound: Outbound = Arc::new(Mutex::new(HashMap::new()));
        let open = Arc::new(AtomicUsize::new(0));

        let accept_task = {
            let outbound = outbound.clone();
            let open = open.clone();
            tokio::spawn(async move {
                let mut next_id = 0;
                while let Ok((stream, _)) = listener.accept().await {
                    let id = next_id;
                    next_id += 1;
                    tokio::spawn(handle_connection(
                        id,
                        stream,
                        events_tx.clone(),
                        outbound.clone(),
                        open.clone(),
                    ));
                }
            })
        };

        Self {
            url,
            events,
            outbound,
            open,
            accept_task,
        }
    }

    pub fn url(&self) -> String {
        self.url.clone()
    }

    /// Connections currently open
    pub fn open_connections(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    /// Next recorded event; panics after [`EVENT_TIMEOUT`]
    pub async fn next_event(&mut self) -> UpstreamEvent {
        tokio::time::timeout(EVENT_TIMEOUT, self.events.recv())
            .await
            .expect("timed out waiting for upstream event")
            .expect("mock upstream stopped")
    }

    /// Next event if one arrives within `wait`
    pub async fn try_next_event(&mut self, wait: Duration) -> Option<UpstreamEvent> {
        tokio::time::timeout(wait, self.events.recv())
            .await
            .ok()
            .flatten()
    }

    /// Wait for a connection and its handshake; returns the connection id and API key
    pub async fn expect_handshake(&mut self) -> (usize, String) {
        let id = match self.next_event().await {
            UpstreamEvent::Opened(id) => id,
            other => panic!("expected a new connection, got {other:?}"),
        };
        match self.next_event().await {
            UpstreamEvent::Received(from, Message::Text(text)) if from == id => {
                let value: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
                let api_key = value["api_key"].as_str().unwrap().to_string();
                (id, api_key)
            }
            other => panic!("expected handshake on connection {id}, got {other:?}"),
        }
    }

    /// Send a text frame to one connection
    pub fn push(&self, connection: usize, text: &str) {
        if let Some(tx) = self.outbound.lock().get(&connection) {
            let _ = tx.send(Message::Text(text.to_string().into()));
        }
    }

    /// Close one connection from the backend side
    pub fn close(&self, connection: usize) {
        if let Some(tx) = self.outbound.lock().get(&connection) {
            let _ = tx.send(Message::Close(None));
        }
    }
}

impl Drop for MockUpstream {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn handle_connection(
    id: usize,
    stream: TcpStream,
    events: mpsc::UnboundedSender<UpstreamEvent>,
    outbound: Outbound,
    open: Arc<AtomicUsize>,
) {
    let Ok(ws_stream) = accept_async(stream).await else {
        return;
    };
    let (mut write, mut read) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    outbound.lock().insert(id, tx);

    open.fetch_add(1, Ordering::SeqCst);
    let _ = events.send(UpstreamEvent::Opened(id));

    let close_code = loop {
        tokio::select! {
            incoming = read.next() => match incoming {
                Some(Ok(Message::Close(frame))) => {
                    break frame.map(|f| u16::from(f.code));
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                Some(Ok(message)) => {
                    let _ = events.send(UpstreamEvent::Received(id, message));
                }
                Some(Err(_)) | None => break None,
            },
            Some(message) = rx.recv() => {
                let closing = matches!(message, Message::Close(_));
                if write.send(message).await.is_err() || closing {
                    break None;
                }
            }
        }
    };

    outbound.lock().remove(&id);
    open.fetch_sub(1, Ordering::SeqCst);
    let _ = events.send(UpstreamEvent::Closed(id, close_code));
}
