//! Test-only mock MCP server speaking newline-delimited JSON-RPC on stdio.
//!
//! Implements `initialize`, `tools/list`, and `tools/call` with a set of
//! deliberately well- and mis-behaving tools the integration suite drives:
//!
//! - `echo`: returns its `payload` argument verbatim.
//! - `sleep_ms`: sleeps for `ms` milliseconds before answering.
//! - `fail`: answers with a JSON-RPC error object.
//! - `crash`: exits the process without answering.
//! - `stale_id`: answers with a wrong correlation id.
//! - `dual_fields`: answers with both `result` and `error`.
//! - `notify_then_echo`: emits a notification frame before the response.

use std::io::{self, BufRead, Write};
use std::thread;
use std::time::Duration;

use serde_json::{json, Value};

fn main() {
    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut out = stdout.lock();

    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let Ok(message) = serde_json::from_str::<Value>(trimmed) else {
            continue;
        };
        // Requests only; notifications carry no id and get no answer.
        let Some(id) = message.get("id").and_then(Value::as_u64) else {
            continue;
        };
        let method = message.get("method").and_then(Value::as_str).unwrap_or("");

        match method {
            "initialize" => {
                respond(
                    &mut out,
                    json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "result": {
                            "protocolVersion": "1.0.0",
                            "capabilities": {"tools": {}},
                            "serverInfo": {"name": "mock-tool-server", "version": "0.1.0"}
                        }
                    }),
                );
            },
            "tools/list" => {
                respond(
                    &mut out,
                    json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "result": {"tools": [
                            tool("echo", "Returns its payload argument verbatim"),
                            tool("sleep_ms", "Sleeps for ms milliseconds before answering"),
                            tool("fail", "Answers with a JSON-RPC error object"),
                            tool("crash", "Exits the process without answering"),
                            tool("stale_id", "Answers with a wrong correlation id"),
                            tool("dual_fields", "Answers with both result and error"),
                            tool("notify_then_echo", "Emits a notification before the response"),
                        ]}
                    }),
                );
            },
            "tools/call" => handle_call(&mut out, id, &message),
            _ => {
                respond(
                    &mut out,
                    json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "error": {"code": -32601, "message": "Method not found"}
                    }),
                );
            },
        }
    }
}

fn tool(name: &str, description: &str) -> Value {
    json!({
        "name": name,
        "description": description,
        "inputSchema": {"type": "object"}
    })
}

fn handle_call(out: &mut impl Write, id: u64, message: &Value) {
    let params = message.get("params").cloned().unwrap_or(Value::Null);
    let name = params.get("name").and_then(Value::as_str).unwrap_or("");
    let arguments = params.get("arguments").cloned().unwrap_or(Value::Null);

    match name {
        "echo" => {
            let payload = arguments.get("payload").cloned().unwrap_or(arguments);
            respond(out, json!({"jsonrpc": "2.0", "id": id, "result": payload}));
        },
        "sleep_ms" => {
            let ms = arguments.get("ms").and_then(Value::as_u64).unwrap_or(0);
            thread::sleep(Duration::from_millis(ms));
            respond(
                out,
                json!({"jsonrpc": "2.0", "id": id, "result": {"slept": ms}}),
            );
        },
        "fail" => {
            respond(
                out,
                json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": {"code": -32000, "message": "tool failure"}
                }),
            );
        },
        "crash" => {
            std::process::exit(1);
        },
        "stale_id" => {
            respond(
                out,
                json!({"jsonrpc": "2.0", "id": id + 1000, "result": {"ok": true}}),
            );
        },
        "dual_fields" => {
            respond(
                out,
                json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "result": {"ok": true},
                    "error": {"code": -32000, "message": "also broken"}
                }),
            );
        },
        "notify_then_echo" => {
            respond(
                out,
                json!({"jsonrpc": "2.0", "method": "progress", "params": {"step": 1}}),
            );
            respond(out, json!({"jsonrpc": "2.0", "id": id, "result": arguments}));
        },
        _ => {
            respond(
                out,
                json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": {"code": -32601, "message": format!("Unknown tool: {name}")}
                }),
            );
        },
    }
}

fn respond(out: &mut impl Write, frame: Value) {
    // A broken pipe means the client is gone; exiting quietly is fine.
    if writeln!(out, "{frame}").and_then(|()| out.flush()).is_err() {
        std::process::exit(0);
    }
}
