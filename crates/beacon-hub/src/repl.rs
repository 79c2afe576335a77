//! Interactive line client for `beacon connect`.
//!
//! Each stdin line is sent as JSON when it parses, otherwise as text. Lines
//! starting with `/` are commands; `/help` lists them.

use anyhow::{Context, Result};
use beacon_client::{BeaconClient, ClientOptions, MessageRecord, Payload, RecordKind};
use beacon_settings::BeaconSettings;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

const HELP: &str = "\
commands:
  /status      connection phase and attempts
  /stats       full connection stats as JSON
  /recent      last 10 logged records
  /test        send a test message
  /clear       clear the message log
  /connect     connect (after /disconnect or giving up)
  /disconnect  close without reconnecting
  /quit        disconnect and exit
anything else is sent to the hub";

/// A parsed input line.
#[derive(Debug, PartialEq)]
enum Input {
    Status,
    Stats,
    Recent,
    Test,
    Clear,
    Connect,
    Disconnect,
    Quit,
    Help,
    Send(Payload),
    Empty,
}

impl Input {
    fn parse(line: &str) -> Self {
        let line = line.trim();
        match line {
            "" => Self::Empty,
            "/status" => Self::Status,
            "/stats" => Self::Stats,
            "/recent" => Self::Recent,
            "/test" => Self::Test,
            "/clear" => Self::Clear,
            "/connect" => Self::Connect,
            "/disconnect" => Self::Disconnect,
            "/quit" | "/exit" => Self::Quit,
            "/help" => Self::Help,
            _ => match serde_json::from_str::<Value>(line) {
                Ok(value) if value.is_object() || value.is_array() => Self::Send(Payload::Json(value)),
                _ => Self::Send(Payload::Text(line.to_owned())),
            },
        }
    }
}

fn render(record: &MessageRecord) -> String {
    let tag = match record.kind {
        RecordKind::Message => "<-",
        RecordKind::Text => "<~",
        RecordKind::Sent => "->",
    };
    let body = match &record.data {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    };
    format!("{tag} {body}")
}

/// Run until `/quit` or end of input.
pub async fn run(settings: &BeaconSettings) -> Result<()> {
    let client = BeaconClient::new();
    let _ = client.initialize(ClientOptions::from(&settings.client));
    let _ = client.connect().context("Failed to start connection")?;

    let printer = {
        let mut feed = client.subscribe_messages();
        let mut status = client.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    record = feed.recv() => match record {
                        Ok(record) if record.kind != RecordKind::Sent => println!("{}", render(&record)),
                        Ok(_) => {}
                        Err(RecvError::Lagged(n)) => println!("({n} records skipped)"),
                        Err(RecvError::Closed) => break,
                    },
                    changed = status.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let s = status.borrow_and_update().clone();
                        match s.last_error {
                            Some(error) => println!("[{:?}] attempts={} error={error}", s.phase, s.reconnect_attempts),
                            None => println!("[{:?}] attempts={}", s.phase, s.reconnect_attempts),
                        }
                    }
                }
            }
        })
    };

    println!("{HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        match Input::parse(&line) {
            Input::Empty => {}
            Input::Help => println!("{HELP}"),
            Input::Status => {
                let s = client.status();
                println!("{:?} attempts={} error={:?}", s.phase, s.reconnect_attempts, s.last_error);
            }
            Input::Stats => {
                let stats = serde_json::to_string_pretty(&client.connection_stats())
                    .context("Failed to encode stats")?;
                println!("{stats}");
            }
            Input::Recent => {
                for record in client.recent_messages() {
                    println!("{}", render(&record));
                }
            }
            Input::Test => {
                let _ = client.send_test_message();
            }
            Input::Clear => client.clear_messages(),
            Input::Connect => {
                if !client.connect().context("Failed to start connection")? {
                    println!("already connected or connecting");
                }
            }
            Input::Disconnect => client.disconnect(),
            Input::Quit => break,
            Input::Send(payload) => {
                if !client.send_message(payload) {
                    println!("not sent: not connected");
                }
            }
        }
    }

    client.disconnect();
    printer.abort();
    Ok(())
}
