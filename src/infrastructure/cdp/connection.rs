//! DevTools protocol connection
//!
//! One background task owns the websocket. Calls travel to it over a command
//! channel carrying a oneshot for the reply; the task keeps the in-flight ids
//! and routes each response back to its caller. Everything without an id is an
//! event and goes out on a broadcast channel so any number of listeners (page
//! load waits, response captures) can follow it.

use crate::domain::errors::BrowserError;
use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, error, info, warn};

type Reply = oneshot::Sender<Result<Value, BrowserError>>;

/// Event pushed by the browser (`Network.responseReceived`, `Page.loadEventFired`, ...)
#[derive(Debug, Clone, PartialEq)]
pub struct CdpEvent {
    pub method: String,
    pub params: Value,
}

/// Commands sent to the connection task
#[derive(Debug)]
enum ConnectionCommand {
    Call {
        id: u64,
        method: String,
        params: Value,
        reply: Reply,
    },
    /// The caller gave up waiting for `id`.
    Cancel { id: u64 },
    Shutdown,
}

/// Callers waiting for a response, by call id.
#[derive(Default)]
struct PendingCalls(HashMap<u64, Reply>);

impl PendingCalls {
    fn insert(&mut self, id: u64, reply: Reply) {
        self.0.insert(id, reply);
    }

    /// Hand `outcome` to the caller of `id`. False when nobody waits for it.
    fn resolve(&mut self, id: u64, outcome: Result<Value, BrowserError>) -> bool {
        match self.0.remove(&id) {
            Some(reply) => {
                let _ = reply.send(outcome);
                true
            }
            None => false,
        }
    }

    fn cancel(&mut self, id: u64) {
        self.0.remove(&id);
    }

    fn len(&self) -> usize {
        self.0.len()
    }
}

/// One frame read from the socket
#[derive(Debug, PartialEq)]
pub(crate) enum Incoming {
    Response {
        id: u64,
        outcome: Result<Value, (i64, String)>,
    },
    Event(CdpEvent),
}

/// Classify a text frame. Frames that are neither a response nor an event
/// are ignored.
pub(crate) fn parse_incoming(text: &str) -> Option<Incoming> {
    let frame: Value = serde_json::from_str(text).ok()?;

    if let Some(id) = frame.get("id").and_then(Value::as_u64) {
        let outcome = match frame.get("error") {
            Some(error) => Err((
                error.get("code").and_then(Value::as_i64).unwrap_or_default(),
                error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string(),
            )),
            None => Ok(frame.get("result").cloned().unwrap_or(Value::Null)),
        };
        return Some(Incoming::Response { id, outcome });
    }

    let method = frame.get("method").and_then(Value::as_str)?;
    Some(Incoming::Event(CdpEvent {
        method: method.to_string(),
        params: frame.get("params").cloned().unwrap_or(Value::Null),
    }))
}

/// Handle to the connection task. Cheap to clone.
#[derive(Clone)]
pub struct CdpConnection {
    command_tx: mpsc::Sender<ConnectionCommand>,
    event_tx: broadcast::Sender<CdpEvent>,
    next_id: Arc<AtomicU64>,
}

impl CdpConnection {
    /// Open the websocket and start the background task.
    pub async fn connect(ws_url: &str) -> Result<Self> {
        let (ws_stream, _) = connect_async(ws_url)
            .await
            .with_context(|| format!("Failed to connect to DevTools at {}", ws_url))?;
        info!("CdpConnection: Connected to {}", ws_url);

        let (event_tx, _) = broadcast::channel(1000);
        let (command_tx, command_rx) = mpsc::channel(64);

        let task_events = event_tx.clone();
        tokio::spawn(async move {
            match Self::run_connection(ws_stream, command_rx, task_events).await {
                Ok(()) => info!("CdpConnection: Connection ended cleanly"),
                Err(e) => error!("CdpConnection: Connection failed: {}", e),
            }
        });

        Ok(Self {
            command_tx,
            event_tx,
            next_id: Arc::new(AtomicU64::new(1)),
        })
    }

    /// Receiver for every event seen from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<CdpEvent> {
        self.event_tx.subscribe()
    }

    /// Send one method call and wait for its result.
    pub async fn call(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, BrowserError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (reply, rx) = oneshot::channel();

        self.command_tx
            .send(ConnectionCommand::Call {
                id,
                method: method.to_string(),
                params,
                reply,
            })
            .await
            .map_err(|_| BrowserError::Disconnected)?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(BrowserError::Disconnected),
            Err(_) => {
                let _ = self.command_tx.send(ConnectionCommand::Cancel { id }).await;
                Err(BrowserError::Timeout {
                    method: method.to_string(),
                    duration_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    pub async fn shutdown(&self) {
        let _ = self.command_tx.send(ConnectionCommand::Shutdown).await;
    }

    async fn run_connection(
        ws_stream: tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
        mut command_rx: mpsc::Receiver<ConnectionCommand>,
        event_tx: broadcast::Sender<CdpEvent>,
    ) -> Result<()> {
        let (mut write, mut read) = ws_stream.split();
        // Dropping this map on exit fails every waiting caller with Disconnected
        let mut pending = PendingCalls::default();

        loop {
            tokio::select! {
                msg_result = read.next() => {
                    match msg_result {
                        Some(Ok(Message::Text(text))) => {
                            match parse_incoming(text.as_str()) {
                                Some(Incoming::Response { id, outcome }) => {
                                    let outcome = outcome.map_err(|(code, message)| {
                                        BrowserError::Protocol { code, message }
                                    });
                                    if !pending.resolve(id, outcome) {
                                        debug!("CdpConnection: Late response for call {}", id);
                                    }
                                }
                                Some(Incoming::Event(event)) => {
                                    let _ = event_tx.send(event);
                                }
                                None => warn!("CdpConnection: Unrecognised frame"),
                            }
                        }
                        Some(Ok(Message::Close(_))) => {
                            info!("CdpConnection: Connection closed by browser");
                            return Ok(());
                        }
                        Some(Err(e)) => {
                            return Err(e.into());
                        }
                        None => {
                            warn!("CdpConnection: Stream ended");
                            return Ok(());
                        }
                        _ => {}
                    }
                }

                cmd = command_rx.recv() => {
                    match cmd {
                        Some(ConnectionCommand::Call { id, method, params, reply }) => {
                            let frame = json!({ "id": id, "method": method, "params": params });
                            if let Err(e) = write.send(Message::Text(frame.to_string().into())).await {
                                let _ = reply.send(Err(BrowserError::Disconnected));
                                return Err(e.into());
                            }
                            pending.insert(id, reply);
                        }
                        Some(ConnectionCommand::Cancel { id }) => {
                            pending.cancel(id);
                            debug!("CdpConnection: Call {} abandoned, {} still pending", id, pending.len());
                        }
                        Some(ConnectionCommand::Shutdown) | None => {
                            info!("CdpConnection: Shutdown requested");
                            let _ = write.close().await;
                            return Ok(());
                        }
                    }
                }
            }
        }
    }
}
