//! Local development backend for Livewire channels.
//!
//! Stands in for the real backend while working on a client: it accepts
//! connections on `/ws/{user_id}?token=...`, lets the caller push events to
//! users, kick sessions with a chosen close code, and inspect what clients
//! sent. Start and stop are explicit:
//!
//! ```no_run
//! # async fn demo() -> anyhow::Result<()> {
//! use livewire_core::{EventKind, InboundEvent};
//! use livewire_devserver::DevServer;
//!
//! let server = DevServer::start(([127, 0, 0, 1], 0).into()).await?;
//! server.wait_for_sessions("42", 1).await;
//! let event = InboundEvent::new(EventKind::NewAiDraft, serde_json::json!({"id": "d1"}));
//! server.publish("42", &event);
//! server.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod hub;
mod server;

pub use hub::Received;
pub use server::DevServer;
