//! Operator console.
//!
//! A line-oriented command loop over a fixed capability set: a broker
//! [`Client`] and, when the broker runs in-process, its [`BrokerStats`].
//! Command names map statically to [`ConsoleCommand`] variants; input is
//! parsed, never evaluated.

use std::str::FromStr;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::broker::engine::BrokerStats;
use crate::broker::message::{Message, MessageType, Payload};
use crate::client::Client;
use crate::utils::Result;

/// Name and usage of every command, in the order `help` lists them.
pub const COMMANDS: &[(&str, &str)] = &[
    ("exit", "exit"),
    ("fetch", "fetch <dest>"),
    ("help", "help"),
    ("send", "send <dest> <type> <json-payload>"),
    ("stats", "stats"),
];

pub const INVALID_COMMAND: &str = "Invalid command. Try \"help\".";

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Help,
    Exit,
    Stats,
    Fetch {
        dest: String,
    },
    Send {
        dest: String,
        msg_type: MessageType,
        payload: Payload,
    },
}

impl FromStr for ConsoleCommand {
    type Err = String;

    fn from_str(line: &str) -> std::result::Result<Self, Self::Err> {
        let mut parts = line.trim().splitn(4, char::is_whitespace);
        let name = parts.next().unwrap_or_default();
        let usage = COMMANDS
            .iter()
            .find(|(cmd, _)| *cmd == name)
            .map(|(_, usage)| format!("Usage: {usage}"))
            .ok_or_else(|| INVALID_COMMAND.to_string())?;

        match name {
            "help" => Ok(ConsoleCommand::Help),
            "exit" => Ok(ConsoleCommand::Exit),
            "stats" => Ok(ConsoleCommand::Stats),
            "fetch" => match parts.next() {
                Some(dest) if !dest.is_empty() => Ok(ConsoleCommand::Fetch {
                    dest: dest.to_string(),
                }),
                _ => Err(usage),
            },
            "send" => {
                let dest = parts.next().filter(|d| !d.is_empty()).ok_or(usage.clone())?;
                let msg_type = parts
                    .next()
                    .and_then(|t| t.parse::<MessageType>().ok())
                    .ok_or(usage.clone())?;
                let payload = match parts.next().map(str::trim) {
                    None | Some("") => Payload::new(),
                    Some(json) => serde_json::from_str(json)
                        .map_err(|e| format!("Invalid payload: {e}"))?,
                };
                Ok(ConsoleCommand::Send {
                    dest: dest.to_string(),
                    msg_type,
                    payload,
                })
            }
            _ => Err(usage),
        }
    }
}

/// What the loop should do after a command.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleOutput {
    Text(String),
    Exit,
}

pub struct Console {
    client: Client,
    source: String,
    stats: Option<BrokerStats>,
    prompt: String,
}

impl Console {
    /// `source` is the address stamped on messages sent from the console.
    pub fn new(client: Client, source: impl Into<String>, stats: Option<BrokerStats>) -> Self {
        Self {
            client,
            source: source.into(),
            stats,
            prompt: ">> ".to_string(),
        }
    }

    pub async fn execute(&self, command: ConsoleCommand) -> ConsoleOutput {
        let text = match command {
            ConsoleCommand::Exit => return ConsoleOutput::Exit,
            ConsoleCommand::Help => COMMANDS
                .iter()
                .map(|(_, usage)| *usage)
                .collect::<Vec<_>>()
                .join("\n"),
            ConsoleCommand::Stats => self.stats(),
            ConsoleCommand::Fetch { dest } => match self.client.fetch_next_msg(&dest).await {
                Ok(Some(msg)) => describe(&msg),
                Ok(None) => format!("No messages queued for {dest}."),
                Err(e) => format!("Fetch failed: {e}"),
            },
            ConsoleCommand::Send {
                dest,
                msg_type,
                payload,
            } => match self.send(dest, msg_type, payload).await {
                Ok(()) => "Sent.".to_string(),
                Err(e) => format!("Send failed: {e}"),
            },
        };
        ConsoleOutput::Text(text)
    }

    /// Read commands from `input` until `exit` or end of input.
    pub async fn run<R, W>(&self, input: R, mut output: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = input.lines();
        loop {
            output.write_all(self.prompt.as_bytes()).await?;
            output.flush().await?;

            let Some(line) = lines.next_line().await? else {
                break;
            };
            if line.trim().is_empty() {
                continue;
            }

            let reply = match line.parse::<ConsoleCommand>() {
                Ok(command) => self.execute(command).await,
                Err(message) => ConsoleOutput::Text(message),
            };
            match reply {
                ConsoleOutput::Exit => break,
                ConsoleOutput::Text(text) => {
                    output.write_all(text.as_bytes()).await?;
                    output.write_all(b"\n").await?;
                }
            }
        }
        output.flush().await?;
        Ok(())
    }

    async fn send(&self, dest: String, msg_type: MessageType, payload: Payload) -> Result<()> {
        let msg = Message::new(msg_type, self.source.clone(), dest, payload)?;
        self.client.send_msg(&msg).await
    }

    fn stats(&self) -> String {
        let Some(stats) = &self.stats else {
            return "Stats are only available for an in-process broker.".to_string();
        };
        let mut lines = vec![format!("intake: {}", stats.intake_len())];
        for dest in stats.destinations() {
            lines.push(format!("{dest}: {}", stats.queue_depth(&dest)));
        }
        lines.join("\n")
    }
}

fn describe(msg: &Message) -> String {
    let payload = serde_json::to_string(msg.payload())
        .unwrap_or_else(|e| format!("<unprintable payload: {e}>"));
    format!(
        "type {} from {} to {}: {payload}",
        msg.msg_type(),
        msg.source(),
        msg.dest()
    )
}
