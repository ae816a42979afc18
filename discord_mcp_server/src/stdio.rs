//! Line-delimited JSON-RPC loop over any AsyncRead/AsyncWrite pair:
//! stdin/stdout in production, duplex pipes in tests.
//!
//! Bad input never aborts the loop; unparsable lines are logged and
//! skipped, and the loop ends cleanly on EOF.

use std::io;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tracing::{debug, warn};

use crate::protocol::{Request, Response, RpcError, PROTOCOL_VERSION};
use crate::tools::AgentService;

const INSTRUCTIONS: &str = "This Discord MCP server provides access to Discord messages. \
Register an agent with the 'register-agent' tool and a Discord bot token, then reuse the \
returned UUID with the 'send-message' tool to post to a channel. Save the UUID for future use.";

pub async fn serve<R, W>(service: AgentService, reader: R, writer: W) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    let mut writer = BufWriter::new(writer);

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let request: Request = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(e) => {
                warn!("skipping unparsable request line: {}", e);
                continue;
            }
        };
        let Some(response) = handle_request(&service, request).await else {
            continue;
        };
        let encoded = serde_json::to_string(&response).map_err(io::Error::other)?;
        writer.write_all(encoded.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
    }
    debug!("stdin closed; stdio loop ending");
    Ok(())
}

/// Notifications produce no response; everything else produces exactly one.
async fn handle_request(service: &AgentService, request: Request) -> Option<Response> {
    if request.method.starts_with("notifications/") {
        debug!("client notification: {}", request.method);
        return None;
    }

    let id = request.id.clone().unwrap_or(Value::Null);
    let response = match request.method.as_str() {
        "initialize" => Response::success(
            id,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": { "tools": {} },
                "serverInfo": {
                    "name": "discord-mcp",
                    "version": env!("CARGO_PKG_VERSION"),
                },
                "instructions": INSTRUCTIONS,
            }),
        ),
        "ping" => Response::success(id, json!({})),
        "tools/list" => Response::success(id, json!({ "tools": AgentService::definitions() })),
        "tools/call" => {
            let params = request.params.unwrap_or(Value::Null);
            let name = params
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let arguments = params
                .get("arguments")
                .cloned()
                .unwrap_or_else(|| json!({}));
            match service.call(&name, arguments).await {
                Ok(result) => Response::success(id, result.into_value()),
                Err(error) => Response::failure(id, error),
            }
        }
        other => Response::failure(id, RpcError::method_not_found(other)),
    };
    Some(response)
}
