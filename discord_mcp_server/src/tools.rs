//! The two MCP tools backed by the agent registry.
//!
//! Logical failures (unknown agent, unresolvable channel) come back as
//! descriptive text in the result envelope, never as JSON-RPC faults, so
//! clients always receive a well-formed response.

use discord_mcp_core::{AgentRegistry, RegistryError};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::protocol::{RpcError, ToolResult};

pub const REGISTER_AGENT: &str = "register-agent";
pub const SEND_MESSAGE: &str = "send-message";

#[derive(Debug, Deserialize)]
struct RegisterArgs {
    #[serde(rename = "discordToken")]
    discord_token: String,
}

#[derive(Debug, Deserialize)]
struct SendArgs {
    uuid: String,
    #[serde(rename = "channelId")]
    channel_id: String,
    message: String,
}

#[derive(Clone)]
pub struct AgentService {
    registry: AgentRegistry,
}

impl AgentService {
    pub fn new(registry: AgentRegistry) -> Self {
        Self { registry }
    }

    /// Tool descriptors for `tools/list`.
    pub fn definitions() -> Value {
        json!([
            {
                "name": REGISTER_AGENT,
                "description": "Register a Discord agent with a bot token. Returns the UUID to use for subsequent operations.",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "discordToken": { "type": "string" }
                    },
                    "required": ["discordToken"]
                }
            },
            {
                "name": SEND_MESSAGE,
                "description": "Send a text message to a channel through a previously registered agent.",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "uuid": { "type": "string" },
                        "channelId": { "type": "string" },
                        "message": { "type": "string" }
                    },
                    "required": ["uuid", "channelId", "message"]
                }
            }
        ])
    }

    pub async fn call(&self, name: &str, arguments: Value) -> Result<ToolResult, RpcError> {
        match name {
            REGISTER_AGENT => {
                let args: RegisterArgs = serde_json::from_value(arguments)
                    .map_err(|e| RpcError::invalid_params(e.to_string()))?;
                // Registration is eager: the login runs in the background
                // and the UUID is handed back right away.
                let handle = self.registry.register(None, &args.discord_token).await;
                info!("registered agent {}", handle.session_id());
                Ok(ToolResult::text(format!(
                    "Agent registered with UUID: {}",
                    handle.session_id()
                )))
            }
            SEND_MESSAGE => {
                let args: SendArgs = serde_json::from_value(arguments)
                    .map_err(|e| RpcError::invalid_params(e.to_string()))?;
                let outcome = self
                    .registry
                    .send_message(&args.uuid, &args.channel_id, &args.message)
                    .await;
                let text = match outcome {
                    Ok(receipt) => format!("Message sent to channel {}", receipt.channel_id),
                    Err(RegistryError::AgentNotFound(_)) => {
                        format!("Agent with UUID {} not found.", args.uuid)
                    }
                    Err(RegistryError::ChannelNotFound(_)) => format!(
                        "Channel with ID {} not found or is not a text channel.",
                        args.channel_id
                    ),
                    Err(e) => format!("Failed to send to channel {}: {}", args.channel_id, e),
                };
                Ok(ToolResult::text(text))
            }
            other => Err(RpcError::invalid_params(format!("unknown tool '{}'", other))),
        }
    }
}
