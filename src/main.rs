//! CLI for edgebroker
//!
//! Subcommands:
//! - `server`: run the broker until Ctrl-C
//! - `send` / `fetch`: one-shot client calls against a running broker
//! - `console`: interactive operator console
//! - `demo`: start an in-process broker and push one position report through it

use std::time::Duration;

use clap::{Parser, Subcommand};
use edgebroker::broker::{Broker, Message, MessageType, Payload};
use edgebroker::client::Client;
use edgebroker::config::{Settings, load_config};
use edgebroker::console::Console;
use edgebroker::utils::logging;
use tokio::io::BufReader;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "edgebroker", about = "Minimal destination-keyed message broker")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the broker
    Server,
    /// Send one message to a running broker
    Send {
        #[arg(long, default_value = "cli")]
        source: String,
        #[arg(long)]
        dest: String,
        #[arg(long = "type", default_value_t = 6000)]
        msg_type: MessageType,
        /// Payload as a flat JSON object, e.g. '{"speed":22}'
        #[arg(long, default_value = "{}")]
        payload: String,
    },
    /// Fetch the next message queued for an address
    Fetch { dest: String },
    /// Interactive operator console against a running broker
    Console {
        #[arg(long, default_value = "console")]
        source: String,
    },
    /// Send a position report through an in-process broker and fetch it back
    Demo,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let settings = match load_config() {
        Ok(settings) => settings,
        Err(e) => {
            logging::init("info");
            error!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };
    logging::init(&settings.logging.level);

    if let Err(e) = run(cli.command, settings).await {
        error!("{e}");
        std::process::exit(1);
    }
}

async fn run(command: Command, settings: Settings) -> edgebroker::Result<()> {
    match command {
        Command::Server => {
            let handle = Broker::new(settings).start().await?;
            handle.run_until_shutdown().await
        }
        Command::Send {
            source,
            dest,
            msg_type,
            payload,
        } => {
            let payload: Payload = serde_json::from_str(&payload).map_err(|e| {
                edgebroker::BrokerError::malformed(format!("invalid payload JSON: {e}"))
            })?;
            let msg = Message::new(msg_type, source, dest, payload)?;
            Client::from_settings(&settings).send_msg(&msg).await?;
            println!("OK");
            Ok(())
        }
        Command::Fetch { dest } => {
            match Client::from_settings(&settings).fetch_next_msg(&dest).await? {
                Some(msg) => println!("{}", render(&msg)),
                None => println!("EMPTY"),
            }
            Ok(())
        }
        Command::Console { source } => {
            let console = Console::new(Client::from_settings(&settings), source, None);
            console
                .run(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
                .await
        }
        Command::Demo => demo(settings).await,
    }
}

async fn demo(mut settings: Settings) -> edgebroker::Result<()> {
    settings.server.send_port = 0;
    settings.server.fetch_port = 0;
    let tick = settings.broker.dispatch_interval();

    let handle = Broker::new(settings.clone()).start().await?;
    info!("Msg Broker started");

    let client = Client::new(
        handle.send_addr().to_string(),
        handle.fetch_addr().to_string(),
        settings.broker.max_msg_size,
        settings.client.clone(),
    );

    let payload: Payload = [
        ("sent", 0),
        ("loco", 1111),
        ("speed", 22),
        ("lat", 333),
        ("long", 444),
        ("base", 555),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.into()))
    .collect();
    let message = Message::new(6000, "sim.l.7357", "sim.b", payload)?;

    let sent = client.send_msg(&message).await;
    if sent.is_ok() {
        info!("Test msg sent to broker");
        tokio::time::sleep(tick + Duration::from_millis(200)).await;
    }

    let fetched = match sent {
        Ok(()) => client.fetch_next_msg(message.dest()).await,
        Err(e) => Err(e),
    };
    handle.shutdown().await;

    match fetched? {
        Some(msg) => println!("{}", render(&msg)),
        None => println!("EMPTY"),
    }
    Ok(())
}

fn render(msg: &Message) -> String {
    let payload = serde_json::to_string(msg.payload()).unwrap_or_default();
    format!(
        "type={} source={} dest={} payload={payload}",
        msg.msg_type(),
        msg.source(),
        msg.dest()
    )
}
