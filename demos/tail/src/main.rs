//! Follow a user's live-update channel from the terminal.
//!
//! Run against the dev server:
//!   cargo run -p livewire-devserver
//!   cargo run -p livewire-demo-tail -- --user-id 42 --token dev

use std::path::PathBuf;

use clap::Parser;
use livewire_client::{ClientConfig, EventRegistry, LiveChannel, Status};
use livewire_core::{EventKind, InboundEvent};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "livewire-tail", about = "Print events pushed to a Livewire channel")]
struct Args {
    /// Backend origin; overrides the config file.
    #[arg(long, env = "LIVEWIRE_URL")]
    url: Option<String>,

    /// TOML client configuration.
    #[arg(long, env = "LIVEWIRE_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, env = "LIVEWIRE_USER_ID")]
    user_id: Option<String>,

    #[arg(long, env = "LIVEWIRE_TOKEN")]
    token: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("livewire_tail=info".parse()?)
                .add_directive("livewire_client=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => ClientConfig::load(path)?,
        None => ClientConfig::default(),
    };
    if let Some(url) = args.url {
        config.url = url;
    }

    let channel = LiveChannel::spawn(config, registry());
    channel.connect(args.user_id.as_deref(), args.token.as_deref());

    let mut status = channel.subscribe();
    let mut last = Status::default();
    loop {
        tokio::select! {
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = status.borrow_and_update().clone();
                report_transition(&last, &current);
                last = current;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, disconnecting");
                break;
            }
        }
    }

    channel.shutdown().await;
    Ok(())
}

/// One logging handler per known kind, so the output shows what an app
/// would react to.
fn registry() -> EventRegistry {
    let mut registry = EventRegistry::new();
    for kind in EventKind::KNOWN {
        registry.register(kind, log_event);
    }
    registry
}

fn log_event(event: &InboundEvent) {
    match &event.user_id {
        Some(user) => tracing::info!("[{}] from {}: {}", event.kind, user, event.data),
        None => tracing::info!("[{}] {}", event.kind, event.data),
    }
}

fn report_transition(previous: &Status, current: &Status) {
    if previous.state != current.state {
        tracing::info!("Channel is now {:?}", current.state);
    }
    if current.error != previous.error {
        if let Some(error) = &current.error {
            tracing::warn!("Channel error: {}", error);
        }
    }
}
