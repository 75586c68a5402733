use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use mtlipc_frame::{Command, Frame};
use mtlipc_peer::{RemoteEvent, Response};
use serde::Serialize;

#[derive(Clone, Debug, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct ResponseOutput<'a> {
    message_id: String,
    command: String,
    code: i32,
    kind: String,
    detail: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(skip)]
    raw: &'a str,
}

#[derive(Serialize)]
struct EventOutput<'a> {
    event: String,
    code: i32,
    kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    owner: Option<i64>,
    detail: serde_json::Value,
    #[serde(skip)]
    raw: &'a str,
    timestamp: String,
}

#[derive(Serialize)]
struct FrameOutput {
    message_id: String,
    event: bool,
    command: String,
    code: i32,
    kind: i32,
    payload_size: usize,
    payload: String,
}

#[derive(Serialize)]
struct CommandOutput {
    code: i32,
    name: &'static str,
    category: &'static str,
}

pub fn print_response(response: &Response, format: OutputFormat) {
    let out = ResponseOutput {
        message_id: response.message_id.to_string(),
        command: response.command.to_string(),
        code: response.command.code(),
        kind: response.kind.to_string(),
        detail: detail_value(&response.detail),
        description: (!response.is_success()).then(|| response.describe()),
        raw: &response.detail,
    };

    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table => {
            let mut table = new_table(vec!["COMMAND", "KIND", "DETAIL"]);
            table.add_row(vec![
                out.command.clone(),
                out.kind.clone(),
                out.description.clone().unwrap_or_else(|| out.raw.to_string()),
            ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!("{} -> {}", out.command, out.kind);
            match &out.description {
                Some(description) => println!("  {description}"),
                None => println!("  {}", pretty_detail(&out.detail, out.raw)),
            }
        }
        OutputFormat::Raw => print_raw(out.raw.as_bytes()),
    }
}

pub fn print_event(event: &RemoteEvent, format: OutputFormat) {
    let payload = event.payload();
    let out = EventOutput {
        event: payload.command.to_string(),
        code: payload.command.code(),
        kind: payload.kind.to_string(),
        owner: event.owner(),
        detail: payload
            .value
            .clone()
            .unwrap_or_else(|| serde_json::Value::String(payload.detail.clone())),
        raw: &payload.detail,
        timestamp: now_unix_seconds(),
    };

    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table => {
            let mut table = new_table(vec!["EVENT", "OWNER", "DETAIL"]);
            table.add_row(vec![
                out.event.clone(),
                out.owner.map(|owner| owner.to_string()).unwrap_or_default(),
                out.raw.to_string(),
            ]);
            println!("{table}");
        }
        OutputFormat::Pretty => match out.owner {
            Some(owner) => println!("event {} owner={owner} {}", out.event, out.raw),
            None => println!("event {} {}", out.event, out.raw),
        },
        OutputFormat::Raw => {
            print_raw(out.raw.as_bytes());
            print_raw(b"\n");
        }
    }
}

pub fn print_frames(frames: &[Frame], format: OutputFormat) {
    let rows: Vec<FrameOutput> = frames
        .iter()
        .map(|frame| FrameOutput {
            message_id: frame.message_id.to_string(),
            event: frame.is_event(),
            command: frame.command.to_string(),
            code: frame.command.code(),
            kind: frame.kind,
            payload_size: frame.payload.len(),
            payload: payload_preview(frame.payload.as_ref()),
        })
        .collect();

    match format {
        OutputFormat::Json => {
            for row in &rows {
                print_json(row);
            }
        }
        OutputFormat::Table => {
            let mut table = new_table(vec!["ID", "COMMAND", "KIND", "SIZE", "PAYLOAD"]);
            for row in &rows {
                let id = if row.event {
                    "<event>".to_string()
                } else {
                    row.message_id.clone()
                };
                table.add_row(vec![
                    id,
                    row.command.clone(),
                    row.kind.to_string(),
                    row.payload_size.to_string(),
                    row.payload.clone(),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for row in &rows {
                println!(
                    "{} {} kind={} size={} payload={}",
                    row.message_id, row.command, row.kind, row.payload_size, row.payload
                );
            }
        }
        OutputFormat::Raw => {
            for frame in frames {
                print_raw(frame.payload.as_ref());
            }
        }
    }
}

pub fn print_commands(format: OutputFormat) {
    let rows: Vec<CommandOutput> = Command::ALL
        .iter()
        .map(|command| CommandOutput {
            code: command.code(),
            name: command.name(),
            category: category(*command),
        })
        .collect();

    match format {
        OutputFormat::Json => print_json(&rows),
        OutputFormat::Table => {
            let mut table = new_table(vec!["CODE", "NAME", "CATEGORY"]);
            for row in &rows {
                table.add_row(vec![
                    row.code.to_string(),
                    row.name.to_string(),
                    row.category.to_string(),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty | OutputFormat::Raw => {
            for row in &rows {
                println!("{:>4}  {:<22} {}", row.code, row.name, row.category);
            }
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn print_json<T: Serialize + ?Sized>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

fn new_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    table
}

fn category(command: Command) -> &'static str {
    match command.code() {
        101..=199 => "event",
        201..=299 => "query",
        _ => "control",
    }
}

/// Structured detail when it is JSON, the bare string otherwise.
fn detail_value(detail: &str) -> serde_json::Value {
    serde_json::from_str(detail).unwrap_or_else(|_| serde_json::Value::String(detail.to_string()))
}

fn pretty_detail(value: &serde_json::Value, raw: &str) -> String {
    match value {
        serde_json::Value::String(_) => raw.to_string(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| raw.to_string()),
    }
}

fn payload_preview(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", payload.len()),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detail_prefers_json() {
        assert_eq!(detail_value(r#"{"teamside":1}"#)["teamside"], 1);
        assert_eq!(
            detail_value("DEBUGGER_NOT_RUNNING"),
            serde_json::Value::String("DEBUGGER_NOT_RUNNING".to_string())
        );
        // An empty detail is not JSON.
        assert_eq!(detail_value(""), serde_json::Value::String(String::new()));
    }

    #[test]
    fn command_categories() {
        assert_eq!(category(Command::Launch), "control");
        assert_eq!(category(Command::Exit), "control");
        assert_eq!(category(Command::IpcHitBreakpoint), "event");
        assert_eq!(category(Command::IpcGetTrigger), "query");
    }
}
