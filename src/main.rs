use anyhow::Result;
use clap::Parser;
use log::{error, info, LevelFilter};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

mod credentials;
mod utils;

use crate::credentials::{load_credentials, save_credentials, Credentials};
use remindersync::sync::{ConnectionManager, EngineEvent, SyncEngine, ViewEvent, EVENT_QUEUE_DEPTH};

/// Command line arguments for remindersync
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "remindersync: delivery-status synchronization for clinic reminder campaigns.",
    long_about = "Connects to the campaign sync server, keeps a live projection of every \
    outbound reminder's delivery status, and prints updates as they merge.\n\n\
    Operator commands on stdin: resync, start, reset, restart, destroy, logout, quit."
)]
struct Args {
    /// WebSocket URL of the sync server (falls back to stored credentials)
    #[arg(long)]
    server: Option<String>,

    /// Campaign date to reconcile, YYYY-MM-DD (defaults to today)
    #[arg(long)]
    date: Option<String>,

    /// Session token for the sync server; stored for later runs
    #[arg(long)]
    token: Option<String>,

    /// Append logs to this file instead of stderr
    #[arg(long, value_name = "PATH")]
    log_file: Option<String>,

    /// Log verbosity
    #[arg(long, default_value = "info")]
    log_level: LevelFilter,
}

/// Resolve server URL and token from flags, environment, and stored
/// credentials, persisting anything newly provided.
fn resolve_connection(args: &Args) -> Result<(String, Option<String>)> {
    let stored = load_credentials().unwrap_or(None);

    let server = args
        .server
        .clone()
        .or_else(|| std::env::var("REMINDERSYNC_SERVER").ok())
        .or_else(|| stored.as_ref().map(|c| c.server.clone()))
        .ok_or_else(|| anyhow::anyhow!("no server URL; pass --server or log in once"))?;

    let token = args
        .token
        .clone()
        .or_else(|| std::env::var("REMINDERSYNC_TOKEN").ok())
        .or_else(|| stored.as_ref().and_then(|c| c.get_token()));

    if args.server.is_some() || args.token.is_some() {
        if let Some(token) = &token {
            if let Err(e) = save_credentials(&Credentials::new(&server, token)) {
                error!("Failed to store credentials: {}", e);
            }
        }
    }

    Ok((server, token))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    utils::setup_logging(args.log_file.as_deref(), args.log_level)?;

    let (server, token) = resolve_connection(&args)?;
    let date = args
        .date
        .clone()
        .unwrap_or_else(|| chrono::Local::now().format("%Y-%m-%d").to_string());
    let url = match &token {
        Some(token) => format!("{}?token={}", server, token),
        None => server.clone(),
    };

    info!("Starting remindersync for campaign date {}", date);

    let (command_tx, command_rx) = mpsc::channel(32);
    let (engine_tx, engine_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);

    let (engine, mut view_rx) = SyncEngine::new(date, command_tx);
    let connection = ConnectionManager::new(url, engine_tx.clone(), command_rx);

    let engine_task = tokio::spawn(engine.run(engine_rx));
    let connection_task = tokio::spawn(connection.run());

    // Print merged view updates as they arrive.
    let view_task = tokio::spawn(async move {
        while let Some(event) = view_rx.recv().await {
            match event {
                ViewEvent::MessageUpdated(m) => println!(
                    "{} [{:?}] {} <{}>",
                    m.message_id, m.status, m.recipient_name, m.recipient_address
                ),
                ViewEvent::Summary(s) => println!(
                    "summary: {} total / {} pending / {} sent / {} delivered / {} read / {} played / {} failed",
                    s.total(), s.pending, s.sent, s.delivered, s.read, s.played, s.error
                ),
                ViewEvent::PhaseChanged(phase) => println!("session: {:?}", phase),
                ViewEvent::QrCode(qr) => println!("scan to authenticate: {}", qr),
                ViewEvent::Appointment(payload) => println!("appointment update: {}", payload),
                ViewEvent::ProviderError(message) => println!("provider error: {}", message),
                ViewEvent::AuthRetryAvailable => {
                    println!("authentication is stuck; type 'restart' to retry")
                }
            }
        }
    });

    // Operator commands from stdin.
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let event = match line.trim() {
            "" => continue,
            "resync" => EngineEvent::Resync,
            "start" => EngineEvent::StartSending,
            "reset" => EngineEvent::ResetCampaign,
            "restart" => EngineEvent::Restart,
            "destroy" => EngineEvent::Destroy,
            "logout" => EngineEvent::Logout,
            "quit" | "exit" => break,
            other => {
                println!("unknown command '{}'", other);
                continue;
            }
        };
        if engine_tx.send(event).await.is_err() {
            break;
        }
    }

    info!("Shutting down");
    drop(engine_tx);
    connection_task.abort();
    engine_task.abort();
    view_task.abort();
    Ok(())
}
