use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use log::{info, warn};
use reqwest::header::AUTHORIZATION;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::connections::connection::{
    ChannelKind, ChatConnection, ConnectionFactory, Destination, InboundMessage,
};
use crate::connections::errors::ConnectionError;
use async_trait::async_trait;

pub const DEFAULT_API_BASE: &str = "https://discord.com/api/v10";

// GUILDS | GUILD_MESSAGES | MESSAGE_CONTENT
const GATEWAY_INTENTS: u64 = 1 | 512 | 32768;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A single gateway dispatch or control frame.
#[derive(Debug, Deserialize)]
struct GatewayPayload {
    op: u8,
    #[serde(default)]
    d: Value,
    #[serde(default)]
    s: Option<u64>,
    #[serde(default)]
    t: Option<String>,
}

struct GatewayHandle {
    shutdown_tx: mpsc::Sender<()>,
    task: tokio::task::JoinHandle<()>,
}

/// An authenticated Discord session: REST for channel resolution and
/// message delivery, plus a background gateway (websocket) task that keeps
/// the bot present and forwards MESSAGE_CREATE dispatches to subscribers.
pub struct DiscordConnection {
    token: String,
    api_base: String,
    http: reqwest::Client,
    inbound_tx: broadcast::Sender<InboundMessage>,
    gateway: Mutex<Option<GatewayHandle>>,
}

impl DiscordConnection {
    pub fn new(token: String, api_base: Option<String>) -> Self {
        let (inbound_tx, _) = broadcast::channel(256);
        Self {
            token,
            api_base: api_base.unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            http: reqwest::Client::new(),
            inbound_tx,
            gateway: Mutex::new(None),
        }
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.api_base.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    async fn get_json(&self, path: &str) -> Result<Value, ConnectionError> {
        let response = self
            .http
            .get(self.url(path))
            .header(AUTHORIZATION, format!("Bot {}", self.token))
            .send()
            .await?;
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(ConnectionError::Auth("invalid bot token".into()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ConnectionError::Http {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json().await?)
    }
}

fn heartbeat_message(last_seq: Option<u64>) -> Message {
    Message::text(json!({ "op": 1, "d": last_seq }).to_string())
}

/// Read gateway frames until a JSON payload arrives, answering pings and
/// surfacing close frames as errors.
async fn read_payload(ws: &mut WsStream) -> Result<GatewayPayload, ConnectionError> {
    while let Some(message) = ws.next().await {
        match message? {
            Message::Text(text) => return Ok(serde_json::from_str(text.as_str())?),
            Message::Ping(data) => ws.send(Message::Pong(data)).await?,
            Message::Close(frame) => {
                // 4004 is Discord's "authentication failed" close code.
                if let Some(frame) = frame {
                    if u16::from(frame.code) == 4004 {
                        return Err(ConnectionError::Auth("gateway rejected the token".into()));
                    }
                    return Err(ConnectionError::Gateway(format!(
                        "gateway closed the socket: {} {}",
                        u16::from(frame.code),
                        frame.reason
                    )));
                }
                return Err(ConnectionError::Closed);
            }
            _ => {}
        }
    }
    Err(ConnectionError::Closed)
}

fn decode_message_create(d: &Value) -> Option<InboundMessage> {
    let author = d.get("author")?;
    Some(InboundMessage {
        channel_id: d.get("channel_id")?.as_str()?.to_string(),
        author: author.get("username")?.as_str()?.to_string(),
        content: d
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        from_bot: author.get("bot").and_then(Value::as_bool).unwrap_or(false),
    })
}

/// Map Discord's numeric channel `type` onto our closed variant set.
/// Announcement channels, DMs and forums are deliberately `Other`: only
/// guild text channels and threads are postable here.
fn channel_kind(discord_type: u64) -> ChannelKind {
    match discord_type {
        0 => ChannelKind::Text,
        10 | 11 | 12 => ChannelKind::Thread,
        2 | 13 => ChannelKind::Voice,
        4 => ChannelKind::Category,
        _ => ChannelKind::Other,
    }
}

#[async_trait]
impl ChatConnection for DiscordConnection {
    async fn login(&mut self) -> Result<(), ConnectionError> {
        let gateway_info = self.get_json("/gateway/bot").await?;
        let gateway_url = gateway_info
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| ConnectionError::Gateway("gateway info missing url".into()))?;

        let ws_url = format!("{}/?v=10&encoding=json", gateway_url);
        let (mut ws, _) = connect_async(ws_url.as_str()).await?;

        // Handshake: Hello -> Identify -> READY.
        let hello = read_payload(&mut ws).await?;
        if hello.op != 10 {
            return Err(ConnectionError::Gateway(format!(
                "expected hello, got op {}",
                hello.op
            )));
        }
        let heartbeat_interval = hello
            .d
            .get("heartbeat_interval")
            .and_then(Value::as_u64)
            .ok_or_else(|| ConnectionError::Gateway("hello missing heartbeat_interval".into()))?;

        let identify = json!({
            "op": 2,
            "d": {
                "token": self.token,
                "intents": GATEWAY_INTENTS,
                "properties": {
                    "os": std::env::consts::OS,
                    "browser": "discord_mcp",
                    "device": "discord_mcp",
                },
            },
        });
        ws.send(Message::text(identify.to_string())).await?;

        let mut last_seq: Option<u64> = None;
        loop {
            let payload = read_payload(&mut ws).await?;
            if let Some(s) = payload.s {
                last_seq = Some(s);
            }
            match payload.op {
                0 if payload.t.as_deref() == Some("READY") => break,
                1 => ws.send(heartbeat_message(last_seq)).await?,
                9 => {
                    return Err(ConnectionError::Auth(
                        "gateway invalidated the session during identify".into(),
                    ))
                }
                _ => {}
            }
        }
        info!("discord gateway session is ready");

        // Keep the session alive and forward dispatches until told to stop.
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let inbound_tx = self.inbound_tx.clone();
        let mut heartbeat = tokio::time::interval(Duration::from_millis(heartbeat_interval));
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let task = tokio::spawn(async move {
            let mut last_seq = last_seq;
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        let _ = ws.close(None).await;
                        break;
                    }
                    _ = heartbeat.tick() => {
                        if ws.send(heartbeat_message(last_seq)).await.is_err() {
                            warn!("gateway heartbeat failed; ending gateway task");
                            break;
                        }
                    }
                    message = ws.next() => match message {
                        Some(Ok(Message::Text(text))) => {
                            match serde_json::from_str::<GatewayPayload>(text.as_str()) {
                                Ok(payload) => {
                                    if let Some(s) = payload.s {
                                        last_seq = Some(s);
                                    }
                                    match payload.op {
                                        0 if payload.t.as_deref() == Some("MESSAGE_CREATE") => {
                                            if let Some(msg) = decode_message_create(&payload.d) {
                                                let _ = inbound_tx.send(msg);
                                            }
                                        }
                                        1 => {
                                            let _ = ws.send(heartbeat_message(last_seq)).await;
                                        }
                                        7 | 9 => warn!(
                                            "gateway requested reconnect (op {}); not resuming",
                                            payload.op
                                        ),
                                        _ => {}
                                    }
                                }
                                Err(e) => warn!("undecodable gateway payload: {}", e),
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            let _ = ws.send(Message::Pong(data)).await;
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            info!("gateway socket closed");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!("gateway read error: {}", e);
                            break;
                        }
                    }
                }
            }
            info!("gateway task ended");
        });

        *self.gateway.lock().await = Some(GatewayHandle { shutdown_tx, task });
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<InboundMessage> {
        self.inbound_tx.subscribe()
    }

    async fn fetch_channel(&self, channel_id: &str) -> Result<Destination, ConnectionError> {
        let channel = match self.get_json(&format!("/channels/{}", channel_id)).await {
            Ok(channel) => channel,
            Err(ConnectionError::Http {
                status: 403 | 404, ..
            }) => return Err(ConnectionError::ChannelNotFound(channel_id.to_string())),
            Err(e) => return Err(e),
        };
        let discord_type = channel
            .get("type")
            .and_then(Value::as_u64)
            .ok_or_else(|| ConnectionError::Gateway("channel object missing type".into()))?;
        Ok(Destination {
            id: channel_id.to_string(),
            kind: channel_kind(discord_type),
            name: channel
                .get("name")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }

    async fn send_text(
        &self,
        destination: &Destination,
        text: &str,
    ) -> Result<String, ConnectionError> {
        let response = self
            .http
            .post(self.url(&format!("/channels/{}/messages", destination.id)))
            .header(AUTHORIZATION, format!("Bot {}", self.token))
            .json(&json!({ "content": text }))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ConnectionError::Http {
                status: status.as_u16(),
                body,
            });
        }
        let message: Value = response.json().await?;
        Ok(message
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }

    async fn destroy(&self) -> Result<(), ConnectionError> {
        let handle = self.gateway.lock().await.take();
        if let Some(GatewayHandle { shutdown_tx, task }) = handle {
            let _ = shutdown_tx.send(()).await;
            let _ = task.await;
        }
        Ok(())
    }
}

/// Opens `DiscordConnection`s for the registry. `api_base` is overridable
/// so tests and mock servers can redirect the REST calls.
pub struct DiscordConnectionFactory {
    api_base: Option<String>,
}

impl DiscordConnectionFactory {
    pub fn new(api_base: Option<String>) -> Self {
        Self { api_base }
    }
}

impl ConnectionFactory for DiscordConnectionFactory {
    fn open(&self, token: &str) -> Box<dyn ChatConnection> {
        Box::new(DiscordConnection::new(
            token.to_string(),
            self.api_base.clone(),
        ))
    }
}
