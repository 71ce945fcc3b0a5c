//! Soulkun Control - CLI client for the Soulkun daemon.
//!
//! Sends messages through the pipeline as a synthetic local room/user and
//! inspects daemon status. Useful for poking the Brain without a chat
//! transport.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use soulkun_shared::rpc::{SendMessageRequest, SendMessageResponse, StatusResponse};

const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:8787";

#[derive(Parser)]
#[command(name = "soulkunctl")]
#[command(about = "Soulkun - conversational business assistant", long_about = None)]
#[command(version)]
struct Cli {
    /// Daemon endpoint
    #[arg(long, default_value = DEFAULT_ENDPOINT)]
    endpoint: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show daemon status
    Status,

    /// Send a message through the pipeline
    Send {
        /// Message body
        body: String,

        /// Room to speak in
        #[arg(long, default_value = "local-room")]
        room: String,

        /// User to speak as
        #[arg(long, default_value = "local-user")]
        user: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    match cli.command {
        Commands::Status => {
            let status: StatusResponse = client
                .get(format!("{}/v1/status", cli.endpoint))
                .send()
                .await
                .context("daemon unreachable (is soulkund running?)")?
                .json()
                .await
                .context("unexpected status payload")?;

            println!("soulkund v{}", status.version);
            println!("  uptime:   {}s", status.uptime_seconds);
            println!("  requests: {}", status.requests_handled);
            println!("  model:    {}", status.llm_model);
            println!("  storage:  {}", status.storage);
        }
        Commands::Send { body, room, user } => {
            let request = SendMessageRequest {
                room_id: room,
                user_id: user,
                user_name: None,
                body,
            };
            let response: SendMessageResponse = client
                .post(format!("{}/v1/message", cli.endpoint))
                .json(&request)
                .send()
                .await
                .context("daemon unreachable (is soulkund running?)")?
                .json()
                .await
                .context("unexpected message payload")?;

            println!("{}", response.reply);
            eprintln!("[verdict: {} | {}ms]", response.verdict, response.latency_ms);
        }
    }

    Ok(())
}
