//! The sync adapter: keeps one well-known agent's credential in lockstep
//! with externally-sourced configuration records, issuing the minimal
//! register/deregister calls to converge.

use std::collections::HashMap;

use discord_mcp_core::AgentRegistry;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// Records for other integrations are ignored entirely.
pub const INTEGRATION_NAME: &str = "discord-mcp-server";
pub const TOKEN_VARIABLE: &str = "DISCORD_TOKEN";

/// A configuration record as delivered by the realtime feed. Unknown
/// fields on the wire are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct McpRecord {
    pub agent_id: String,
    pub config: McpConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct McpConfig {
    pub name: String,
    #[serde(rename = "envVariables", default)]
    pub env_variables: HashMap<String, String>,
}

/// Consume records one at a time so reconciliations for the same agent
/// never interleave: a credential change fully tears the old connection
/// down before the new login begins.
pub async fn run(registry: AgentRegistry, mut updates: mpsc::Receiver<McpRecord>) {
    while let Some(record) = updates.recv().await {
        reconcile(&registry, record).await;
    }
    info!("configuration feed closed; sync adapter exiting");
}

/// Diff one record against the registry and converge.
pub async fn reconcile(registry: &AgentRegistry, record: McpRecord) {
    if record.config.name != INTEGRATION_NAME {
        debug!(
            "ignoring update for unrelated integration '{}'",
            record.config.name
        );
        return;
    }

    let token = record
        .config
        .env_variables
        .get(TOKEN_VARIABLE)
        .cloned()
        .unwrap_or_default();

    match registry.lookup(&record.agent_id).await {
        Some(agent) if agent.token == token => {
            debug!(
                "agent '{}' already registered with this token; skipping",
                record.agent_id
            );
            return;
        }
        Some(_) => {
            info!("token changed for agent '{}'; reconnecting", record.agent_id);
            registry.deregister(&record.agent_id).await;
        }
        None => {}
    }

    let handle = registry.register(Some(record.agent_id.clone()), &token).await;
    if let Err(e) = handle.ready().await {
        error!("registration failed for agent '{}': {}", record.agent_id, e);
    }
}
