use async_trait::async_trait;
use tokio::sync::broadcast;

use super::errors::ConnectionError;

/// The kind of destination a channel identifier resolves to.
///
/// Discord exposes many channel flavors; only direct text channels and
/// threads accept plain text messages from us. Everything else is grouped
/// under the remaining variants so callers can pattern-match instead of
/// inspecting platform type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Text,
    Thread,
    Voice,
    Category,
    Other,
}

impl ChannelKind {
    /// Whether a plain text message can be posted to this destination.
    pub fn is_postable(self) -> bool {
        matches!(self, ChannelKind::Text | ChannelKind::Thread)
    }
}

/// A resolved, postable-or-not destination within a connection.
#[derive(Debug, Clone)]
pub struct Destination {
    pub id: String,
    pub kind: ChannelKind,
    pub name: Option<String>,
}

/// A message received over a connection's inbound event stream.
///
/// `from_bot` distinguishes synthetic (bot/self) senders from humans.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub channel_id: String,
    pub author: String,
    pub content: String,
    pub from_bot: bool,
}

/// A trait representing an authenticated link to a chat platform.
#[async_trait]
pub trait ChatConnection: Send + Sync {
    /// Authenticate and bring the session up. Resolves once the platform
    /// reports the session ready.
    async fn login(&mut self) -> Result<(), ConnectionError>;

    /// Subscribe to the inbound message stream. Must be called before
    /// `login` if no events are to be missed.
    fn subscribe(&self) -> broadcast::Receiver<InboundMessage>;

    /// Resolve a channel identifier to a destination descriptor.
    async fn fetch_channel(&self, channel_id: &str) -> Result<Destination, ConnectionError>;

    /// Deliver `text` to a previously resolved destination. Returns the
    /// platform's identifier for the created message.
    async fn send_text(&self, destination: &Destination, text: &str)
        -> Result<String, ConnectionError>;

    /// Tear the session down, releasing all network resources before
    /// returning.
    async fn destroy(&self) -> Result<(), ConnectionError>;
}

/// Builds not-yet-logged-in connections from a credential. Injected into
/// the registry so tests can substitute fakes.
pub trait ConnectionFactory: Send + Sync {
    fn open(&self, token: &str) -> Box<dyn ChatConnection>;
}
