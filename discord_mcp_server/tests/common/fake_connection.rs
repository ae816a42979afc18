//! Counting fakes for the sync adapter and transport tests: every
//! connection open, login, teardown and delivery is recorded on a shared
//! `FakeState` so tests can assert exactly which registry calls happened.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use discord_mcp_core::connections::connection::{
    ChannelKind, ChatConnection, ConnectionFactory, Destination, InboundMessage,
};
use discord_mcp_core::connections::errors::ConnectionError;
use tokio::sync::broadcast;

#[derive(Default)]
pub struct FakeState {
    pub opened: AtomicUsize,
    pub destroys: AtomicUsize,
    pub tokens: Mutex<Vec<String>>,
    pub sent: Mutex<Vec<(String, String)>>,
}

impl FakeState {
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn destroys(&self) -> usize {
        self.destroys.load(Ordering::SeqCst)
    }

    pub fn tokens(&self) -> Vec<String> {
        self.tokens.lock().unwrap().clone()
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

pub struct CountingFactory {
    state: Arc<FakeState>,
    channels: HashMap<String, ChannelKind>,
    fail_login: bool,
}

impl CountingFactory {
    pub fn new() -> (Self, Arc<FakeState>) {
        let state = Arc::new(FakeState::default());
        (
            Self {
                state: state.clone(),
                channels: HashMap::new(),
                fail_login: false,
            },
            state,
        )
    }

    pub fn with_channel(mut self, channel_id: &str, kind: ChannelKind) -> Self {
        self.channels.insert(channel_id.to_string(), kind);
        self
    }

    /// Make every login fail with an authentication error.
    pub fn failing_login(mut self) -> Self {
        self.fail_login = true;
        self
    }
}

impl ConnectionFactory for CountingFactory {
    fn open(&self, token: &str) -> Box<dyn ChatConnection> {
        self.state.opened.fetch_add(1, Ordering::SeqCst);
        self.state.tokens.lock().unwrap().push(token.to_string());
        let (inbound_tx, _) = broadcast::channel(8);
        Box::new(CountingConnection {
            state: self.state.clone(),
            channels: self.channels.clone(),
            fail_login: self.fail_login,
            inbound_tx,
        })
    }
}

pub struct CountingConnection {
    state: Arc<FakeState>,
    channels: HashMap<String, ChannelKind>,
    fail_login: bool,
    inbound_tx: broadcast::Sender<InboundMessage>,
}

#[async_trait]
impl ChatConnection for CountingConnection {
    async fn login(&mut self) -> Result<(), ConnectionError> {
        if self.fail_login {
            return Err(ConnectionError::Auth("fake token rejected".into()));
        }
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
