//! A deterministic in-process stand-in for any type that implements
//! `discord_mcp_core::connections::connection::ChatConnection`.
//!
//! * **From the test's perspective**
//!   * Configure which channel ids resolve, and to what kind, via
//!     `FakeFactory::with_channel`.
//!   * Inspect everything the registry did through the shared `FakeState`
//!     (connections opened, logins, teardowns, delivered messages).
//!   * Push "inbound" platform messages through the sender kept in
//!     `FakeState::inbound`.
//!
//! * **Why this exists**: it lets integration tests exercise the real
//!   async machinery (spawned logins, installs, broadcasts) without
//!   talking to the Discord API.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use discord_mcp_core::connections::connection::{
    ChannelKind, ChatConnection, ConnectionFactory, Destination, InboundMessage,
};
use discord_mcp_core::connections::errors::ConnectionError;
use tokio::sync::broadcast;

/// Everything the fakes record, shared between the factory, the
/// connections it opens, and the test making assertions.
#[derive(Default)]
pub struct FakeState {
    pub opened: AtomicUsize,
    pub logins: AtomicUsize,
    pub destroys: AtomicUsize,
    /// Every token a connection was opened with, in order.
    pub tokens: Mutex<Vec<String>>,
    /// Every `(channel_id, text)` pair delivered via `send_text`.
    pub sent: Mutex<Vec<(String, String)>>,
    /// Inbound sender of the most recently opened connection, for tests
    /// that simulate platform messages.
    pub inbound: Mutex<Option<broadcast::Sender<InboundMessage>>>,
}

impl FakeState {
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn destroys(&self) -> usize {
        self.destroys.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn tokens(&self) -> Vec<String> {
        self.tokens.lock().unwrap().clone()
    }
}

/// Builds `FakeConnection`s for the registry under test.
pub struct FakeFactory {
    state: Arc<FakeState>,
    channels: HashMap<String, ChannelKind>,
    login_delay: Duration,
    fail_login: bool,
}

impl FakeFactory {
    pub fn new() -> (Self, Arc<FakeState>) {
        let state = Arc::new(FakeState::default());
        (
            Self {
                state: state.clone(),
                channels: HashMap::new(),
                login_delay: Duration::ZERO,
                fail_login: false,
            },
            state,
        )
    }

    /// Make `channel_id` resolvable on every opened connection.
    pub fn with_channel(mut self, channel_id: &str, kind: ChannelKind) -> Self {
        self.channels.insert(channel_id.to_string(), kind);
        self
    }

    /// Hold every login for `delay`, keeping the pending window open long
    /// enough for the test to observe it.
    pub fn with_login_delay(mut self, delay: Duration) -> Self {
        self.login_delay = delay;
        self
    }

    /// Make every login fail with an authentication error.
    pub fn failing_login(mut self) -> Self {
        self.fail_login = true;
        self
    }
}

impl ConnectionFactory for FakeFactory {
    fn open(&self, token: &str) -> Box<dyn ChatConnection> {
        self.state.opened.fetch_add(1, Ordering::SeqCst);
        self.state.tokens.lock().unwrap().push(token.to_string());
        let (inbound_tx, _) = broadcast::channel(32);
        *self.state.inbound.lock().unwrap() = Some(inbound_tx.clone());
        Box::new(FakeConnection {
            state: self.state.clone(),
            channels: self.channels.clone(),
            login_delay: self.login_delay,
            fail_login: self.fail_login,
            inbound_tx,
        })
    }
}

pub struct FakeConnection {
    state: Arc<FakeState>,
    channels: HashMap<String, ChannelKind>,
    login_delay: Duration,
    fail_login: bool,
    inbound_tx: broadcast::Sender<InboundMessage>,
}

#[async_trait]
impl ChatConnection for FakeConnection {
    async fn login(&mut self) -> Result<(), ConnectionError> {
        if !self.login_delay.is_zero() {
            tokio::time::sleep(self.login_delay).await;
        }
        if self.fail_login {
            return Err(ConnectionError::Auth("fake token rejected".into()));
        }
        self.state.logins.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<InboundMessage> {
        self.inbound_tx.subscribe()
    }

    async fn fetch_channel(&self, channel_id: &str) -> Result<Destination, ConnectionError> {
        self.channels
            .get(channel_id)
            .map(|kind| Destination {
                id: channel_id.to_string(),
                kind: *kind,
                name: None,
            })
            .ok_or_else(|| ConnectionError::ChannelNotFound(channel_id.to_string()))
    }

    async fn send_text(
        &self,
        destination: &Destination,
        text: &str,
    ) -> Result<String, ConnectionError> {
        let mut sent = self.state.sent.lock().unwrap();
        sent.push((destination.id.clone(), text.to_string()));
        Ok(format!("msg-{}", sent.len()))
    }

    async fn destroy(&self) -> Result<(), ConnectionError> {
        self.state.destroys.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
