use std::io::{IsTerminal, Write};
use std::net::SocketAddr;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use serde_json::Value;

#[derive(Clone, Debug, Copy, ValueEnum)]
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
struct ListeningOutput<'a> {
    event: &'static str,
    addr: String,
    port: u16,
    commands: &'a [&'a str],
}

/// Announce the bound address so scripts can find an ephemeral port.
pub fn print_listening(addr: SocketAddr, commands: &[&str], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = ListeningOutput {
                event: "listening",
                addr: addr.to_string(),
                port: addr.port(),
                commands,
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["ADDRESS", "COMMANDS"])
                .add_row(vec![addr.to_string(), commands.join(", ")]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!("listening on {addr} commands={}", commands.join(","));
        }
        OutputFormat::Raw => {
            println!("{}", addr.port());
        }
    }
    let _ = std::io::stdout().flush();
}

/// Print every reply received for `command`.
pub fn print_replies(command: &str, replies: &[Value], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            for reply in replies {
                println!("{}", compact(reply));
            }
        }
        OutputFormat::Table => println!("{}", reply_table(command, replies)),
        OutputFormat::Pretty => {
            for reply in replies {
                println!(
                    "{}",
                    serde_json::to_string_pretty(reply).unwrap_or_else(|_| compact(reply))
                );
            }
        }
        OutputFormat::Raw => {
            for reply in replies {
                match reply {
                    Value::String(text) => print_raw(text.as_bytes()),
                    other => print_raw(compact(other).as_bytes()),
                }
            }
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn reply_table(command: &str, replies: &[Value]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["COMMAND", "#", "REPLY"]);
    if replies.is_empty() {
        table.add_row(vec![command.to_string(), "-".to_string(), "<no reply>".to_string()]);
    }
    for (index, reply) in replies.iter().enumerate() {
        table.add_row(vec![command.to_string(), index.to_string(), compact(reply)]);
    }
    table
}

fn compact(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
}
