//! Human-friendly and JSON rendering of entity snapshots.

use std::fmt::Write as _;

use chrono::Local;
use sensors_core::EntitySnapshot;
use serde_json::Value;

pub fn print_snapshot(snapshot: &EntitySnapshot, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(snapshot)?);
    } else {
        print!("{}", render(snapshot));
    }
    Ok(())
}

/// One line per change in JSON mode, so the output can be piped.
pub fn print_change(snapshot: &EntitySnapshot, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string(snapshot)?);
    } else {
        println!("[{}]", Local::now().format("%H:%M:%S"));
        print!("{}", render(snapshot));
    }
    Ok(())
}

fn render(snapshot: &EntitySnapshot) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}: {}", snapshot.name, snapshot.state);

    for (key, value) in &snapshot.attributes {
        match value {
            Value::Array(items) if !items.is_empty() => {
                let _ = writeln!(out, "  {key}:");
                for item in items {
                    let _ = writeln!(out, "    - {}", inline(item));
                }
            }
            other => {
                let _ = writeln!(out, "  {key}: {}", inline(other));
            }
        }
    }
    out
}

fn inline(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "-".to_string(),
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| format!("{k}={}", inline(v)))
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    }
}
