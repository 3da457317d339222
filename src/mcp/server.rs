// MCP server implementation

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::config::ServerConfig;
use crate::mcp::tools::{self, ToolContext};
use crate::pipeline::Pipeline;

/// JSON-RPC message
#[derive(Debug, Serialize, Deserialize)]
struct JsonRpcMessage {
    jsonrpc: String,
    id: Option<Value>,
    method: Option<String>,
    params: Option<Value>,
    result: Option<Value>,
    error: Option<JsonRpcError>,
}

/// JSON-RPC error
#[derive(Debug, Serialize, Deserialize)]
struct JsonRpcError {
    code: i32,
    message: String,
    data: Option<Value>,
}

/// MCP tool definition
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Tool {
    name: String,
    description: String,
    input_schema: Value,
}

/// MCP server capabilities
#[derive(Debug, Serialize, Deserialize)]
struct ServerCapabilities {
    tools: Option<Value>,
}

/// MCP server info
#[derive(Debug, Serialize, Deserialize)]
struct ServerInfo {
    name: String,
    version: String,
}

/// MCP initialize result
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitializeResult {
    protocol_version: String,
    capabilities: ServerCapabilities,
    server_info: ServerInfo,
}

/// MCP server
pub struct McpServer {
    ctx: Arc<ToolContext>,
}

impl McpServer {
    pub fn new(pipeline: Pipeline, config: &ServerConfig) -> Self {
        Self {
            ctx: Arc::new(ToolContext::with_max_sessions(pipeline, config.max_sessions)),
        }
    }

    /// Run the MCP server over stdin/stdout until stdin closes or a
    /// `shutdown` request arrives.
    pub async fn run(self) -> Result<()> {
        info!("Starting MCP server");

        let (tx, mut rx) = mpsc::unbounded_channel();

        // stdin is blocking; read it off the runtime
        std::thread::spawn(move || {
            let stdin = io::stdin();
            for line in stdin.lock().lines() {
                match line {
                    Ok(line) => {
                        if let Err(e) = tx.send(line) {
                            error!("Failed to send line to channel: {}", e);
                            break;
                        }
                    }
                    Err(e) => {
                        error!("Error reading from stdin: {}", e);
                        break;
                    }
                }
            }
        });

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let writer = tokio::spawn(async move {
            while let Some(response) = out_rx.recv().await {
                println!("{}", response);
                if let Err(e) = io::stdout().flush() {
                    error!("Failed to flush stdout: {}", e);
                    break;
                }
            }
        });

        // Each request runs in its own task so a long trace does not hold
        // up an edit or a superseding trace for the same session.
        while let Some(line) = rx.recv().await {
            if line.trim().is_empty() {
                continue;
            }
            debug!("Received: {}", line);

            if is_shutdown(&line) {
                info!("Received shutdown request, closing {} sessions", self.ctx.session_count());
                if let Ok(Some(response)) = Self::handle_message(&self.ctx, &line).await {
                    let _ = out_tx.send(response);
                }
                break;
            }

            let ctx = Arc::clone(&self.ctx);
            let out_tx = out_tx.clone();
            tokio::spawn(async move {
                let response = match Self::handle_message(&ctx, &line).await {
                    Ok(response) => response,
                    Err(e) => {
                        error!("Error handling message: {}", e);
                        Some(
                            json!({
                                "jsonrpc": "2.0",
                                "id": null,
                                "error": {
                                    "code": -32700,
                                    "message": format!("Parse error: {}", e)
                                }
                            })
                            .to_string(),
                        )
                    }
                };
                if let Some(response) = response {
                    let _ = out_tx.send(response);
                }
            });
        }

        let open: Vec<String> = self.ctx.sessions.iter().map(|entry| entry.key().clone()).collect();
        for id in open {
            self.ctx.close(&id);
        }

        drop(out_tx);
        let _ = writer.await;
        Ok(())
    }

    /// Handle a JSON-RPC message
    async fn handle_message(ctx: &ToolContext, message: &str) -> Result<Option<String>> {
        let msg: JsonRpcMessage = serde_json::from_str(message)?;

        // notifications get no response
        if msg.id.is_none() {
            debug!("Notification: {:?}", msg.method);
            return Ok(None);
        }

        let response = match msg.method.as_deref() {
            Some("initialize") => {
                let result = InitializeResult {
                    protocol_version: "2024-11-05".to_string(),
                    capabilities: ServerCapabilities {
                        tools: Some(json!({})),
                    },
                    server_info: ServerInfo {
                        name: "flowtrace".to_string(),
                        version: env!("CARGO_PKG_VERSION").to_string(),
                    },
                };
                json!({
                    "jsonrpc": "2.0",
                    "id": msg.id,
                    "result": result
                })
            }

            Some("tools/list") => json!({
                "jsonrpc": "2.0",
                "id": msg.id,
                "result": { "tools": list_tools() }
            }),

            Some("tools/call") => match &msg.params {
                Some(params) => match call_tool(ctx, params).await {
                    Ok(result) => json!({
                        "jsonrpc": "2.0",
                        "id": msg.id,
                        "result": result
                    }),
                    Err(e) => json!({
                        "jsonrpc": "2.0",
                        "id": msg.id,
                        "error": {
                            "code": -32602,
                            "message": e.to_string()
                        }
                    }),
                },
                None => json!({
                    "jsonrpc": "2.0",
                    "id": msg.id,
                    "error": {
                        "code": -32602,
                        "message": "Invalid params"
                    }
                }),
            },

            Some("shutdown") => json!({
                "jsonrpc": "2.0",
                "id": msg.id,
                "result": null
            }),

            _ => json!({
                "jsonrpc": "2.0",
                "id": msg.id,
                "error": {
                    "code": -32601,
                    "message": "Method not found"
                }
            }),
        };

        Ok(Some(serde_json::to_string(&response)?))
    }
}

fn is_shutdown(line: &str) -> bool {
    serde_json::from_str::<JsonRpcMessage>(line)
        .map(|msg| msg.method.as_deref() == Some("shutdown"))
        .unwrap_or(false)
}

fn source_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "path": { "type": "string" },
            "content": { "type": "string" }
        },
        "required": ["path", "content"]
    })
}

fn input_schema(required: &[&str]) -> Value {
    json!({
        "type": "object",
        "properties": {
            "session": {
                "type": "string",
                "description": "Session id; defaults to \"default\""
            },
            "language": {
                "type": "string",
                "enum": ["python", "c", "cpp", "rust", "java"]
            },
            "primaryFile": source_schema(),
            "auxiliaryFiles": {
                "type": "array",
                "items": source_schema()
            }
        },
        "required": required
    })
}

fn session_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "session": { "type": "string" }
        }
    })
}

/// List available tools
fn list_tools() -> Vec<Tool> {
    vec![
        Tool {
            name: "flowtrace_analyze".to_string(),
            description: "Resolve the files and return the flow graph, parse errors and unresolved references. \
                          Without files, analyzes the session's current revision."
                .to_string(),
            input_schema: input_schema(&[]),
        },
        Tool {
            name: "flowtrace_trace".to_string(),
            description: "Run the code in the sandbox and return the execution trace. A newer trace for the \
                          same session supersedes this one."
                .to_string(),
            input_schema: input_schema(&[]),
        },
        Tool {
            name: "flowtrace_edit".to_string(),
            description: "Record a new source revision in the session history".to_string(),
            input_schema: input_schema(&["language", "primaryFile"]),
        },
        Tool {
            name: "flowtrace_undo".to_string(),
            description: "Step the session history back one revision".to_string(),
            input_schema: session_schema(),
        },
        Tool {
            name: "flowtrace_redo".to_string(),
            description: "Step the session history forward one revision".to_string(),
            input_schema: session_schema(),
        },
        Tool {
            name: "flowtrace_close".to_string(),
            description: "Close the session: cancel its trace and drop its history".to_string(),
            input_schema: session_schema(),
        },
    ]
}

/// Call a tool
async fn call_tool(ctx: &ToolContext, params: &Value) -> Result<Value> {
    let tool_name = params["name"].as_str().ok_or_else(|| anyhow::anyhow!("Missing tool name"))?;
    let tool_args = match &params["arguments"] {
        Value::Object(map) => map.clone(),
        Value::Null => serde_json::Map::new(),
        _ => return Err(anyhow::anyhow!("Invalid arguments")),
    };

    let args_hashmap: std::collections::HashMap<String, Value> = tool_args.into_iter().collect();

    match tool_name {
        "flowtrace_analyze" => tools::analyze(ctx, &args_hashmap).await,
        "flowtrace_trace" => tools::trace(ctx, &args_hashmap).await,
        "flowtrace_edit" => tools::edit(ctx, &args_hashmap).await,
        "flowtrace_undo" => tools::undo(ctx, &args_hashmap).await,
        "flowtrace_redo" => tools::redo(ctx, &args_hashmap).await,
        "flowtrace_close" => tools::close(ctx, &args_hashmap).await,
        _ => Err(anyhow::anyhow!("Unknown tool: {}", tool_name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn request(ctx: &ToolContext, message: Value) -> Value {
        let response = McpServer::handle_message(ctx, &message.to_string()).await.unwrap().unwrap();
        serde_json::from_str(&response).unwrap()
    }

    #[tokio::test]
    async fn test_initialize_and_list() {
        let ctx = ToolContext::default();
        let init = request(&ctx, json!({ "jsonrpc": "2.0", "id": 1, "method": "initialize" })).await;
        assert_eq!(init["result"]["serverInfo"]["name"], "flowtrace");

        let list = request(&ctx, json!({ "jsonrpc": "2.0", "id": 2, "method": "tools/list" })).await;
        let names: Vec<&str> = list["result"]["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap())
            .collect();
        assert_eq!(
            names,
            vec![
                "flowtrace_analyze",
                "flowtrace_trace",
                "flowtrace_edit",
                "flowtrace_undo",
                "flowtrace_redo",
                "flowtrace_close"
            ]
        );
    }

    #[tokio::test]
    async fn test_tool_call_round_trip() {
        let ctx = ToolContext::default();
        let response = request(
            &ctx,
            json!({
                "jsonrpc": "2.0",
                "id": 3,
                "method": "tools/call",
                "params": {
                    "name": "flowtrace_analyze",
                    "arguments": {
                        "language": "python",
                        "primaryFile": { "path": "main.py", "content": "def main():\n    pass\n" }
                    }
                }
            }),
        )
        .await;
        let text = response["result"]["content"][0]["text"].as_str().unwrap();
        let analysis: Value = serde_json::from_str(text).unwrap();
        assert_eq!(analysis["graph"]["nodes"][1]["id"], "main.py#main");
    }

    #[tokio::test]
    async fn test_close_tool_call() {
        let ctx = ToolContext::default();
        let call = |id: i64, name: &str| {
            json!({
                "jsonrpc": "2.0",
                "id": id,
                "method": "tools/call",
                "params": {
                    "name": name,
                    "arguments": {
                        "session": "s1",
                        "language": "python",
                        "primaryFile": { "path": "main.py", "content": "x = 1\n" }
                    }
                }
            })
        };
        request(&ctx, call(6, "flowtrace_edit")).await;
        assert_eq!(ctx.session_count(), 1);
        let closed = request(&ctx, call(7, "flowtrace_close")).await;
        assert!(closed["result"]["content"][0]["text"].as_str().unwrap().contains("\"closed\":true"));
        assert_eq!(ctx.session_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_method_and_tool() {
        let ctx = ToolContext::default();
        let unknown = request(&ctx, json!({ "jsonrpc": "2.0", "id": 4, "method": "resources/list" })).await;
        assert_eq!(unknown["error"]["code"], -32601);

        let bad_tool = request(
            &ctx,
            json!({ "jsonrpc": "2.0", "id": 5, "method": "tools/call", "params": { "name": "nope" } }),
        )
        .await;
        assert_eq!(bad_tool["error"]["code"], -32602);
    }

    #[tokio::test]
    async fn test_notification_has_no_response() {
        let ctx = ToolContext::default();
        let message = json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }).to_string();
        assert!(McpServer::handle_message(&ctx, &message).await.unwrap().is_none());
    }
}
