//! MCP test server binary for integration tests
//!
//! This binary implements a small capability server that speaks
//! newline-delimited JSON-RPC over stdin/stdout. Integration tests launch it
//! through the stdio transport instead of a real external server.
//!
//! # Modes
//!
//! Selected with the `MCP_TEST_SERVER_MODE` environment variable:
//!
//! - `normal` (default) -- tools, resources and prompts
//! - `noisy` -- like `normal`, but also writes non-JSON lines to stdout and
//!   progress lines to stderr
//! - `exit` -- prints a message to stderr and exits with status 3 before
//!   reading anything
//! - `silent` -- reads requests but never answers
//! - `broken-list` -- `tools/list` always fails
//!
//! # Tools
//!
//! - `echo` -- returns `arguments.message` as text
//! - `fail` -- returns a result with `isError: true`
//! - `grow` -- adds a `late` tool and sends `notifications/tools/list_changed`
//! - `crash` -- exits with status 5 without answering

use std::io::{self, BufRead, Write};

use serde_json::{json, Value};

struct State {
    mode: String,
    grown: bool,
}

fn main() {
    let mode = std::env::var("MCP_TEST_SERVER_MODE").unwrap_or_else(|_| "normal".to_string());

    if mode == "exit" {
        eprintln!("fatal: missing API token");
        std::process::exit(3);
    }

    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut state = State { mode, grown: false };

    if state.mode == "noisy" {
        let _ = writeln!(out, "starting up, this line is not JSON");
        let _ = out.flush();
        eprintln!("noisy server booting");
    }

    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let request: Value = match serde_json::from_str(trimmed) {
            Ok(v) => v,
            Err(_) => {
                let response = make_error(&Value::Null, -32700, "Parse error");
                if send(&mut out, &response).is_err() {
                    break;
                }
                continue;
            }
        };

        if state.mode == "silent" {
            continue;
        }

        let method = request.get("method").and_then(|m| m.as_str()).unwrap_or("");
        let Some(id) = request.get("id").cloned() else {
            // Notifications need no reply.
            continue;
        };

        if state.mode == "noisy" {
            eprintln!("handling {method}");
        }

        let response = match method {
            "initialize" => handle_initialize(&id),
            "ping" => json!({"jsonrpc": "2.0", "id": id, "result": {}}),
            "tools/list" => handle_tools_list(&id, &state),
            "tools/call" => match handle_tools_call(&id, &request, &mut state, &mut out) {
                Some(response) => response,
                None => continue,
            },
            "resources/list" => handle_resources_list(&id),
            "resources/read" => handle_resources_read(&id, &request),
            "prompts/list" => handle_prompts_list(&id),
            _ => make_error(&id, -32601, &format!("Method not found: {}", method)),
        };

        if send(&mut out, &response).is_err() {
            break;
        }
    }
}

fn send(out: &mut impl Write, message: &Value) -> io::Result<()> {
    writeln!(out, "{}", message)?;
    out.flush()
}

fn handle_initialize(id: &Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": {
            "protocolVersion": "2024-11-05",
            "capabilities": {
                "tools": { "listChanged": true },
                "resources": {},
                "prompts": {}
            },
            "serverInfo": {
                "name": "mcp-test-server",
                "version": "0.1.0"
            }
        }
    })
}

fn handle_tools_list(id: &Value, state: &State) -> Value {
    if state.mode == "broken-list" {
        return make_error(id, -32603, "tool index unavailable");
    }

    let mut tools = vec![
        json!({
            "name": "echo",
            "description": "Echoes input",
            "inputSchema": {
                "type": "object",
                "properties": { "message": { "type": "string" } },
                "required": ["message"]
            }
        }),
        json!({
            "name": "fail",
            "description": "Always reports an error",
            "inputSchema": { "type": "object" }
        }),
        json!({
            "name": "grow",
            "description": "Adds the late tool",
            "inputSchema": { "type": "object" }
        }),
        json!({
            "name": "crash",
            "description": "Exits the server",
            "inputSchema": { "type": "object" }
        }),
    ];
    if state.grown {
        tools.push(json!({
            "name": "late",
            "description": "Appears after grow",
            "inputSchema": { "type": "object" }
        }));
    }

    json!({"jsonrpc": "2.0", "id": id, "result": { "tools": tools }})
}

/// Returns `None` when no reply should be written.
fn handle_tools_call(
    id: &Value,
    request: &Value,
    state: &mut State,
    out: &mut impl Write,
) -> Option<Value> {
    let params = request.get("params").unwrap_or(&Value::Null);
    let tool_name = params.get("name").and_then(|n| n.as_str()).unwrap_or("");

    let response = match tool_name {
        "echo" => {
            let message = params
                .get("arguments")
                .and_then(|a| a.get("message"))
                .and_then(|m| m.as_str())
                .unwrap_or("");
            text_result(id, message, false)
        }
        "fail" => text_result(id, "something went wrong", true),
        "grow" => {
            state.grown = true;
            let reply = text_result(id, "grown", false);
            let _ = send(out, &reply);
            let notification = json!({
                "jsonrpc": "2.0",
                "method": "notifications/tools/list_changed"
            });
            let _ = send(out, &notification);
            return None;
        }
        "crash" => {
            eprintln!("crashing on request");
            std::process::exit(5);
        }
        other => make_error(id, -32602, &format!("Unknown tool: {}", other)),
    };
    Some(response)
}

fn text_result(id: &Value, text: &str, is_error: bool) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": {
            "content": [{ "type": "text", "text": text }],
            "isError": is_error
        }
    })
}

fn handle_resources_list(id: &Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": {
            "resources": [{
                "uri": "memo://readme",
                "name": "readme",
                "mimeType": "text/plain"
            }]
        }
    })
}

fn handle_resources_read(id: &Value, request: &Value) -> Value {
    let uri = request
        .get("params")
        .and_then(|p| p.get("uri"))
        .and_then(|u| u.as_str())
        .unwrap_or("");
    if uri != "memo://readme" {
        return make_error(id, -32002, &format!("Resource not found: {}", uri));
    }
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": {
            "contents": [{
                "uri": uri,
                "mimeType": "text/plain",
                "text": "hello from the test server"
            }]
        }
    })
}

fn handle_prompts_list(id: &Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": {
            "prompts": [{
                "name": "greet",
                "description": "Say hello",
                "arguments": [{ "name": "who", "required": true }]
            }]
        }
    })
}

fn make_error(id: &Value, code: i32, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message }
    })
}
