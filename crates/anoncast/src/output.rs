use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use anoncast_frame::Frame;
use anoncast_keystore::{ChannelId, KeyPack};
use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

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
struct MessageOutput {
    channel: String,
    payload_size: usize,
    payload: String,
    timestamp: String,
}

pub fn print_frame(frame: &Frame, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = MessageOutput {
                channel: frame.channel.to_string(),
                payload_size: frame.payload.len(),
                payload: payload_preview(frame.payload.as_ref()),
                timestamp: now_unix_seconds(),
            };
            print_json(&out);
        }
        OutputFormat::Table => {
            let mut table = new_table(vec!["CHANNEL", "SIZE", "PAYLOAD"]);
            table.add_row(vec![
                frame.channel.to_string(),
                frame.payload.len().to_string(),
                payload_preview(frame.payload.as_ref()),
            ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "channel={} size={} payload={}",
                frame.channel,
                frame.payload.len(),
                payload_preview(frame.payload.as_ref())
            );
        }
        OutputFormat::Raw => print_raw(frame.payload.as_ref()),
    }
}

/// Key usage of one channel.
#[derive(Serialize)]
pub struct ChannelSummary {
    pub channel: String,
    pub id_out_used: u64,
    pub id_out_len: u64,
    pub payload_out_used: u64,
    pub payload_out_len: u64,
    pub payload_in_len: u64,
}

impl ChannelSummary {
    pub fn from_pack(pack: &KeyPack) -> Self {
        Self {
            channel: pack.id().to_string(),
            id_out_used: pack.id_out().position(),
            id_out_len: pack.id_out().len(),
            payload_out_used: pack.payload_out().position(),
            payload_out_len: pack.payload_out().len(),
            payload_in_len: pack.payload_in().len(),
        }
    }
}

pub fn print_channels(channels: &[ChannelSummary], format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&channels),
        OutputFormat::Table => {
            let mut table = new_table(vec!["CHANNEL", "ID KEY USED", "PAYLOAD KEY USED", "INBOUND"]);
            for summary in channels {
                table.add_row(vec![
                    summary.channel.clone(),
                    usage(summary.id_out_used, summary.id_out_len),
                    usage(summary.payload_out_used, summary.payload_out_len),
                    summary.payload_in_len.to_string(),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for summary in channels {
                println!(
                    "{} id={} payload={}",
                    summary.channel,
                    usage(summary.id_out_used, summary.id_out_len),
                    usage(summary.payload_out_used, summary.payload_out_len)
                );
            }
        }
        OutputFormat::Raw => {
            for summary in channels {
                println!("{}", summary.channel);
            }
        }
    }
}

#[derive(Serialize)]
struct EventOutput<'a> {
    event: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    channel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<&'a str>,
}

/// Report a completed action such as `created` or `imported`.
pub fn print_event(event: &str, channel: Option<ChannelId>, detail: Option<&str>, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&EventOutput {
            event,
            channel: channel.map(|id| id.to_string()),
            detail,
        }),
        OutputFormat::Raw => {
            if let Some(value) = channel.map(|id| id.to_string()).or(detail.map(str::to_string)) {
                println!("{value}");
            }
        }
        OutputFormat::Table | OutputFormat::Pretty => {
            let mut line = event.to_string();
            if let Some(id) = channel {
                line.push_str(&format!(" channel={id}"));
            }
            if let Some(detail) = detail {
                line.push_str(&format!(" {detail}"));
            }
            println!("{line}");
        }
    }
    let _ = std::io::stdout().flush();
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

/// Key stream usage as `used/total`.
pub fn usage(used: u64, total: u64) -> String {
    format!("{used}/{total}")
}

fn new_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    table
}

fn print_json<T: Serialize + ?Sized>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
    let _ = std::io::stdout().flush();
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
