//! Development backend.
//!
//! Accepts live-update channels and broadcasts a demo generation cycle to
//! every connected user:
//!   cargo run -p livewire-devserver -- --port 8000 --interval-ms 5000

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use livewire_core::{EventKind, InboundEvent};
use livewire_devserver::DevServer;
use serde_json::json;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "livewire-devserver", about = "Local backend for Livewire channels")]
struct Args {
    /// Port to listen on (localhost only).
    #[arg(long, env = "LIVEWIRE_PORT", default_value_t = 8000)]
    port: u16,

    /// Pause between demo generation cycles.
    #[arg(long, default_value_t = 5000)]
    interval_ms: u64,

    /// Only accept this auth token; any token is accepted when unset.
    #[arg(long, env = "LIVEWIRE_TOKEN")]
    token: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("livewire_devserver=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let addr: SocketAddr = ([127, 0, 0, 1], args.port).into();

    let server = match args.token {
        Some(token) => DevServer::start_with_token(addr, token).await?,
        None => DevServer::start(addr).await?,
    };

    let mut ticker = tokio::time::interval(Duration::from_millis(args.interval_ms.max(1)));
    let mut draft = 0u64;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                draft += 1;
                run_cycle(&server, draft).await;
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    server.shutdown().await;
    Ok(())
}

/// Started, completed, new draft: the sequence a real backend emits around
/// one AI generation.
async fn run_cycle(server: &DevServer, draft: u64) {
    let id = format!("d{draft}");
    server.broadcast(&InboundEvent::new(
        EventKind::AiGenerationStarted,
        json!({ "draft_id": id }),
    ));
    tokio::time::sleep(Duration::from_millis(300)).await;
    server.broadcast(&InboundEvent::new(
        EventKind::AiGenerationCompleted,
        json!({ "draft_id": id }),
    ));
    server.broadcast(&InboundEvent::new(
        EventKind::NewAiDraft,
        json!({ "id": id, "text": format!("Draft #{draft}") }),
    ));
    tracing::info!("Published demo cycle for draft {}", id);
}
