//! Supabase realtime feed client: joins a `postgres_changes` channel for
//! UPDATE events on one table and forwards decoded configuration records
//! to the sync adapter. Reconnects with exponential backoff; malformed
//! messages are logged and dropped, never aborting the subscription.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::sync::McpRecord;

pub const DEFAULT_TABLE: &str = "playground-mcps";

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const INITIAL_RECONNECT_DELAY_SECONDS: u64 = 1;
const MAX_RECONNECT_DELAY_SECONDS: u64 = 60;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// The "ref" the join request is tagged with; its `phx_reply` carries
/// the subscription outcome.
const JOIN_REF: &str = "1";

#[derive(Debug, Error)]
enum FeedError {
    #[error("websocket error: {0}")]
    Socket(#[from] WsError),
    #[error("channel join rejected: {0}")]
    JoinRejected(String),
}

pub struct RealtimeFeed {
    socket_url: String,
    table: String,
    updates_tx: mpsc::Sender<McpRecord>,
}

impl RealtimeFeed {
    pub fn new(
        supabase_url: &str,
        service_role_key: &str,
        table: String,
        updates_tx: mpsc::Sender<McpRecord>,
    ) -> Self {
        Self {
            socket_url: format!(
                "{}/realtime/v1/websocket?apikey={}&vsn=1.0.0",
                websocket_base(supabase_url),
                service_role_key
            ),
            table,
            updates_tx,
        }
    }

    /// Run until the adapter side of the channel goes away, reconnecting
    /// on socket failure.
    pub async fn run(self) {
        let mut attempt = 0u32;
        loop {
            match connect_async(self.socket_url.as_str()).await {
                Ok((socket, _)) => {
                    info!("connected to realtime feed for table '{}'", self.table);
                    attempt = 0;
                    match self.session(socket).await {
                        Ok(()) => return,
                        Err(e) => warn!("realtime session ended: {}", e),
                    }
                }
                Err(e) => warn!("realtime connect failed: {}", e),
            }
            attempt = attempt.saturating_add(1);
            let delay = reconnect_delay(attempt);
            info!("reconnecting to realtime feed in {:?}", delay);
            tokio::time::sleep(delay).await;
        }
    }

    /// One joined session: subscribe, heartbeat, forward records.
    /// `Ok(())` means the receiver was dropped and the feed should stop.
    async fn session(&self, mut socket: WsStream) -> Result<(), FeedError> {
        let topic = format!("realtime:playground-mcps-{}", Uuid::new_v4());
        let join = json!({
            "topic": topic,
            "event": "phx_join",
            "ref": JOIN_REF,
            "payload": {
                "config": {
                    "postgres_changes": [{
                        "event": "UPDATE",
                        "schema": "public",
                        "table": self.table,
                    }]
                }
            },
        });
        socket.send(Message::text(join.to_string())).await?;

        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut heartbeat_ref = 1u64;

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    heartbeat_ref += 1;
                    let message = json!({
                        "topic": "phoenix",
                        "event": "heartbeat",
                        "payload": {},
                        "ref": heartbeat_ref.to_string(),
                    });
                    socket.send(Message::text(message.to_string())).await?;
                }
                message = socket.next() => match message {
                    Some(Ok(Message::Text(text))) => {
                        // A rejected join (bad key, unknown table) would
                        // otherwise leave us heartbeating while delivering
                        // nothing; surface it so the backoff path engages.
                        if let Some(reason) = join_rejection(text.as_str()) {
                            return Err(FeedError::JoinRejected(reason));
                        }
                        if let Some(record) = decode_record(text.as_str()) {
                            if self.updates_tx.send(record).await.is_err() {
                                return Ok(());
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => socket.send(Message::Pong(data)).await?,
                    Some(Ok(Message::Close(_))) | None => {
                        return Err(WsError::ConnectionClosed.into())
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                }
            }
        }
    }
}

fn websocket_base(supabase_url: &str) -> String {
    let base = supabase_url.trim_end_matches('/');
    if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        format!("wss://{}", base)
    }
}

fn reconnect_delay(attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(6);
    let exponential = INITIAL_RECONNECT_DELAY_SECONDS << exponent;
    Duration::from_secs(exponential.min(MAX_RECONNECT_DELAY_SECONDS))
}

/// The rejection reason when a phoenix envelope is an error reply to our
/// join request; `None` for everything else (heartbeat acks reply under
/// their own refs and never match).
fn join_rejection(raw: &str) -> Option<String> {
    let envelope: Value = serde_json::from_str(raw).ok()?;
    if envelope.get("event").and_then(Value::as_str) != Some("phx_reply")
        || envelope.get("ref").and_then(Value::as_str) != Some(JOIN_REF)
    {
        return None;
    }
    if envelope.pointer("/payload/status").and_then(Value::as_str) != Some("error") {
        return None;
    }
    Some(
        envelope
            .pointer("/payload/response")
            .map(Value::to_string)
            .unwrap_or_else(|| "no reason given".to_string()),
    )
}

/// Extract a configuration record from a phoenix envelope. Join replies,
/// heartbeat acks and system messages come through the same socket and
/// decode to `None` quietly; `postgres_changes` messages with a missing
/// or malformed record are logged and dropped.
pub fn decode_record(raw: &str) -> Option<McpRecord> {
    let envelope: Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(e) => {
            warn!("undecodable realtime message: {}", e);
            return None;
        }
    };
    if envelope.get("event").and_then(Value::as_str) != Some("postgres_changes") {
        debug!(
            "ignoring realtime event '{}'",
            envelope
                .get("event")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("<none>")
        );
        return None;
    }
    let Some(record) = envelope.pointer("/payload/data/record") else {
        warn!("postgres_changes message without a record payload; dropping");
        return None;
    };
    match serde_json::from_value(record.clone()) {
        Ok(record) => Some(record),
        Err(e) => {
            warn!("dropping malformed configuration record: {}", e);
            None
        }
    }
}
