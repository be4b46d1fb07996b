//! Machine-readable output envelope shared by every command.
//!
//! All `--json` output has the same shape:
//! `{status, meta: {command, version}, data}`, with a structured `error`
//! payload when status is "error".

use serde_json::{json, Value};

pub fn envelope(command: &str, data: Value) -> Value {
    json!({
        "status": "success",
        "meta": {
            "command": command,
            "version": env!("CARGO_PKG_VERSION"),
        },
        "data": data,
    })
}

pub fn error_envelope(command: &str, kind: &str, message: &str) -> Value {
    json!({
        "status": "error",
        "meta": {
            "command": command,
            "version": env!("CARGO_PKG_VERSION"),
        },
        "error": {
            "kind": kind,
            "message": message,
        },
    })
}

pub fn print_json(value: &Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(e) => eprintln!("Failed to serialize output: {e}"),
    }
}
