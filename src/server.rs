use anyhow::Result;
use serde::Serialize;
use serde_json::{json, Value};
use std::io::{BufRead, Write};
use std::sync::Arc;

use crate::config::Config;
use crate::error::{Error, RequestError};
use crate::import::{add_host, get_file_content, host_tree, import_payload, list_hosts};
use crate::pack::{generate_context_pack, ContextPackRequest};
use crate::store::NodeStore;

const PROTOCOL_VERSION: &str = "2024-11-05";

pub struct ServerState {
    store: Arc<dyn NodeStore>,
    config: Config,
}

fn required_str<'a>(args: &'a Value, name: &str) -> Result<&'a str, Error> {
    args.get(name)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| RequestError::invalid(name, "is required").into())
}

fn optional_str<'a>(args: &'a Value, name: &str) -> Option<&'a str> {
    args.get(name).and_then(Value::as_str).filter(|s| !s.is_empty())
}

/// `part` is optional, but when present it must be a positive integer.
fn optional_part(args: &Value) -> Result<Option<u64>, Error> {
    match args.get("part") {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_u64()
            .filter(|n| *n >= 1)
            .map(Some)
            .ok_or_else(|| RequestError::invalid("part", format!("must be a positive integer, got {v}")).into()),
    }
}

fn to_text<T: Serialize>(value: &T) -> Result<String, Error> {
    serde_json::to_string_pretty(value).map_err(|e| crate::error::StoreError::Serialize(e).into())
}

impl ServerState {
    pub fn new(store: Arc<dyn NodeStore>, config: Config) -> Self {
        Self { store, config }
    }

    fn tool_list(&self, id: Value) -> Value {
        json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": {
                "tools": [
                    {
                        "name": "lanmap_import",
                        "description": "Import a LANMAP1 scan payload. Replaces the host's whole file tree in one atomic step. Returns {hostId, importedCount, skippedCount, warnings}.",
                        "inputSchema": {
                            "type": "object",
                            "properties": {
                                "payload": { "type": "string", "description": "Wire string: LANMAP1:<gzip-base64|deflate-base64>:<base64>" }
                            },
                            "required": ["payload"]
                        }
                    },
                    {
                        "name": "lanmap_hosts",
                        "description": "List known hosts, most recently updated first, with file counts and latest import paths.",
                        "inputSchema": { "type": "object", "properties": {} }
                    },
                    {
                        "name": "lanmap_add_host",
                        "description": "Register a host without importing. Fails if the address is already registered.",
                        "inputSchema": {
                            "type": "object",
                            "properties": {
                                "label": { "type": "string" },
                                "address": { "type": "string", "description": "Unique host address (IP or hostname)" }
                            },
                            "required": ["label", "address"]
                        }
                    },
                    {
                        "name": "lanmap_tree",
                        "description": "Hierarchical file tree of a host: directories first, then files, sorted by name.",
                        "inputSchema": {
                            "type": "object",
                            "properties": {
                                "hostId": { "type": "string" }
                            },
                            "required": ["hostId"]
                        }
                    },
                    {
                        "name": "lanmap_context_pack",
                        "description": "Size-bounded text parts summarizing a host (summary, priority paths, tree, inventory, key text snippets). Use `part` to fetch a single part.",
                        "inputSchema": {
                            "type": "object",
                            "properties": {
                                "hostId": { "type": "string" },
                                "snippetMode": { "type": "string", "enum": ["compact", "full"], "description": "Default compact (700 chars per file)" },
                                "chunkPreset": { "type": "string", "enum": ["small", "medium", "large"], "description": "Part budget 12k / 24k / 40k chars (default medium)" },
                                "part": { "type": "integer", "minimum": 1, "description": "Optional: return only this 1-based part's content" }
                            },
                            "required": ["hostId"]
                        }
                    },
                    {
                        "name": "lanmap_file",
                        "description": "Stored metadata and text content of a single file node.",
                        "inputSchema": {
                            "type": "object",
                            "properties": {
                                "id": { "type": "string", "description": "Node id from lanmap_tree" }
                            },
                            "required": ["id"]
                        }
                    }
                ]
            }
        })
    }

    fn run_tool(&self, name: &str, args: &Value) -> Result<String, Error> {
        let store = self.store.as_ref();
        match name {
            "lanmap_import" => {
                let payload = required_str(args, "payload")?;
                to_text(&import_payload(store, payload, &self.config.payload)?)
            }
            "lanmap_hosts" => to_text(&list_hosts(store)?),
            "lanmap_add_host" => {
                let label = required_str(args, "label")?;
                let address = required_str(args, "address")?;
                to_text(&add_host(store, label, address)?)
            }
            "lanmap_tree" => {
                let host_id = required_str(args, "hostId")?;
                to_text(&host_tree(store, host_id)?)
            }
            "lanmap_context_pack" => {
                let request = ContextPackRequest::parse(
                    required_str(args, "hostId")?,
                    optional_str(args, "snippetMode"),
                    optional_str(args, "chunkPreset"),
                )?;
                let part = optional_part(args)?;
                let pack = generate_context_pack(store, &request, &self.config.pack)?;

                match part {
                    None => to_text(&pack),
                    Some(n) => pack
                        .parts
                        .iter()
                        .find(|p| p.index as u64 == n)
                        .map(|p| p.content.clone())
                        .ok_or_else(|| {
                            RequestError::invalid("part", format!("{n} is out of range 1..={}", pack.parts.len())).into()
                        }),
                }
            }
            "lanmap_file" => {
                let id = required_str(args, "id")?;
                to_text(&get_file_content(store, id)?)
            }
            _ => Err(RequestError::NotFound(format!("Tool {name}")).into()),
        }
    }

    fn tool_call(&self, id: Value, params: &Value) -> Value {
        let name = params.get("name").and_then(|n| n.as_str()).unwrap_or("");
        let args = params.get("arguments").cloned().unwrap_or(json!({}));

        match self.run_tool(name, &args) {
            Ok(text) => json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": { "content": [{"type":"text","text": text }], "isError": false }
            }),
            Err(e) => {
                tracing::warn!(tool = name, kind = e.kind(), error = %e, "tool call failed");
                let body = json!({ "error": { "kind": e.kind(), "message": e.to_string() } });
                json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "result": { "content": [{"type":"text","text": body.to_string() }], "isError": true }
                })
            }
        }
    }

    /// Reply for one JSON-RPC message, or `None` for notifications.
    pub fn handle_message(&self, msg: &Value) -> Option<Value> {
        // Notifications have no "id"; never respond to them.
        let id = msg.get("id")?.clone();
        let method = msg.get("method").and_then(|m| m.as_str()).unwrap_or("");

        let reply = match method {
            "initialize" => json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": {
                    "protocolVersion": msg.get("params").and_then(|p| p.get("protocolVersion")).cloned().unwrap_or(json!(PROTOCOL_VERSION)),
                    "capabilities": { "tools": { "listChanged": false } },
                    "serverInfo": { "name": "lanmap", "version": env!("CARGO_PKG_VERSION") }
                }
            }),
            "ping" => json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": {}
            }),
            "tools/list" => self.tool_list(id),
            "tools/call" => {
                let params = msg.get("params").cloned().unwrap_or(json!({}));
                self.tool_call(id, &params)
            }
            "resources/list" => json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": { "resources": [] }
            }),
            "prompts/list" => json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": { "prompts": [] }
            }),
            _ => json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": { "code": -32601, "message": format!("Method not found: {method}") }
            }),
        };
        Some(reply)
    }
}

/// Serve newline-delimited JSON-RPC on stdin/stdout until stdin closes.
pub fn run_stdio_server(state: ServerState) -> Result<()> {
    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();

    for line in stdin.lock().lines() {
        let Ok(line) = line else { continue };
        if line.trim().is_empty() {
            continue;
        }

        let msg: Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(error = %e, "ignoring malformed message");
                continue;
            }
        };

        if let Some(reply) = state.handle_message(&msg) {
            writeln!(stdout, "{}", reply)?;
            stdout.flush()?;
        }
    }

    Ok(())
}
