use std::collections::HashMap;
use std::sync::Arc;

use log::{error, info, warn};
use thiserror::Error;
use tokio::sync::{broadcast, oneshot, Mutex};
use uuid::Uuid;

use crate::connections::connection::{ChatConnection, ConnectionFactory, InboundMessage};
use crate::connections::errors::ConnectionError;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("no agent registered under id '{0}'")]
    AgentNotFound(String),
    #[error("channel '{0}' not found or is not a text channel")]
    ChannelNotFound(String),
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// A registered agent's entry: the credential it was registered with and
/// the live connection opened from it.
struct AgentEntry {
    token: String,
    connection: Arc<dyn ChatConnection>,
}

/// Snapshot of an entry for callers that must not touch the live handle
/// (the sync adapter diffs on the stored token).
#[derive(Debug, Clone)]
pub struct AgentInfo {
    pub session_id: String,
    pub token: String,
}

/// Confirmation of a delivered message.
#[derive(Debug, Clone)]
pub struct SendReceipt {
    pub channel_id: String,
    pub message_id: String,
}

/// Handle returned by `register`. The session id is available immediately;
/// `ready()` resolves once the login either installed the entry or failed.
pub struct AgentHandle {
    session_id: String,
    ready_rx: oneshot::Receiver<Result<(), ConnectionError>>,
}

impl AgentHandle {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Await the outcome of the registration. The remote-procedure path
    /// never calls this; the sync adapter and tests do.
    pub async fn ready(self) -> Result<(), ConnectionError> {
        match self.ready_rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(ConnectionError::Closed),
        }
    }
}

/// Maps session identifiers to live chat-platform connections.
///
/// The internal state is a HashMap behind an Arc and a Mutex, so the
/// registry can be cloned cheaply and shared across tasks. The lock is
/// only held for map access; logins, teardowns and message sends all
/// happen outside it on Arc-cloned handles.
///
/// Registration is eager: `register` hands the session id back right away
/// and spawns the login, and the entry becomes visible to lookups only
/// once the connection reports itself ready.
#[derive(Clone)]
pub struct AgentRegistry {
    inner: Arc<Mutex<HashMap<String, AgentEntry>>>,
    factory: Arc<dyn ConnectionFactory>,
}

impl AgentRegistry {
    pub fn new(factory: Arc<dyn ConnectionFactory>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            factory,
        }
    }

    /// Register a connection under `session_id` (a fresh UUID when `None`)
    /// using `token`.
    ///
    /// Re-registering an id whose stored token equals `token` is a no-op:
    /// the existing connection is left untouched and the returned handle
    /// is already ready. Otherwise a new connection is opened; its inbound
    /// observer is attached before login so no events are lost, and the
    /// entry is installed when the login resolves. A failed login leaves
    /// no entry behind and surfaces through `AgentHandle::ready()`.
    pub async fn register(&self, session_id: Option<String>, token: &str) -> AgentHandle {
        let id = session_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let (ready_tx, ready_rx) = oneshot::channel();

        {
            let map = self.inner.lock().await;
            if let Some(entry) = map.get(&id) {
                if entry.token == token {
                    info!("agent '{}' already registered with this token", id);
                    let _ = ready_tx.send(Ok(()));
                    return AgentHandle {
                        session_id: id,
                        ready_rx,
                    };
                }
            }
        }

        let mut connection = self.factory.open(token);

        // Attach the observer before login so nothing is missed once the
        // session is live. Messages from synthetic senders are ignored.
        let mut inbound = connection.subscribe();
        let observer_id = id.clone();
        tokio::spawn(async move {
            loop {
                match inbound.recv().await {
                    Ok(message) if !message.from_bot => info!(
                        "agent '{}': message from {} in {}: {}",
                        observer_id, message.author, message.channel_id, message.content
                    ),
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("agent '{}': observer lagged, {} messages dropped", observer_id, skipped)
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        let registry = self.clone();
        let task_id = id.clone();
        let task_token = token.to_string();
        tokio::spawn(async move {
            match connection.login().await {
                Ok(()) => {
                    let connection: Arc<dyn ChatConnection> = Arc::from(connection);
                    let displaced = {
                        let mut map = registry.inner.lock().await;
                        map.insert(
                            task_id.clone(),
                            AgentEntry {
                                token: task_token,
                                connection,
                            },
                        )
                    };
                    // A concurrent registration for the same id may have
                    // installed first; the displaced handle is torn down so
                    // at most one connection stays live per id.
                    if let Some(old) = displaced {
                        if let Err(e) = old.connection.destroy().await {
                            error!("failed to destroy displaced connection '{}': {}", task_id, e);
                        }
                    }
                    info!("agent '{}' is ready", task_id);
                    let _ = ready_tx.send(Ok(()));
                }
                Err(e) => {
                    error!("login failed for agent '{}': {}", task_id, e);
                    let _ = ready_tx.send(Err(e));
                }
            }
        });

        AgentHandle {
            session_id: id,
            ready_rx,
        }
    }

    /// Remove an agent, tearing its connection down before returning.
    /// Returns `false` when no entry exists.
    pub async fn deregister(&self, session_id: &str) -> bool {
        let entry = {
            let mut map = self.inner.lock().await;
            map.remove(session_id)
        };
        match entry {
            Some(entry) => {
                if let Err(e) = entry.connection.destroy().await {
                    error!("error while destroying connection '{}': {}", session_id, e);
                }
                info!("agent '{}' deregistered", session_id);
                true
            }
            None => {
                warn!("deregister: no agent with id '{}'", session_id);
                false
            }
        }
    }

    /// Pure read; never exposes the live handle.
    pub async fn lookup(&self, session_id: &str) -> Option<AgentInfo> {
        let map = self.inner.lock().await;
        map.get(session_id).map(|entry| AgentInfo {
            session_id: session_id.to_string(),
            token: entry.token.clone(),
        })
    }

    /// Subscribe to an agent's inbound message stream.
    pub async fn subscribe(&self, session_id: &str) -> Option<broadcast::Receiver<InboundMessage>> {
        let map = self.inner.lock().await;
        map.get(session_id).map(|entry| entry.connection.subscribe())
    }

    /// Resolve `channel_id` through the agent's connection and deliver
    /// `text` there. Only direct text channels and threads are accepted.
    pub async fn send_message(
        &self,
        session_id: &str,
        channel_id: &str,
        text: &str,
    ) -> Result<SendReceipt, RegistryError> {
        let connection = {
            let map = self.inner.lock().await;
            map.get(session_id).map(|entry| entry.connection.clone())
        }
        .ok_or_else(|| RegistryError::AgentNotFound(session_id.to_string()))?;

        let destination = match connection.fetch_channel(channel_id).await {
            Ok(destination) => destination,
            Err(ConnectionError::ChannelNotFound(_)) => {
                return Err(RegistryError::ChannelNotFound(channel_id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        if !destination.kind.is_postable() {
            return Err(RegistryError::ChannelNotFound(channel_id.to_string()));
        }

        let message_id = connection.send_text(&destination, text).await?;
        Ok(SendReceipt {
            channel_id: channel_id.to_string(),
            message_id,
        })
    }
}
