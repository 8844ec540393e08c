//! Client for the Livewire live-update channel.
//!
//! A [`LiveChannel`] keeps one WebSocket connection to the backend's event
//! stream for a user, reconnects with exponential backoff when the
//! connection drops unexpectedly, and hands each pushed event to the
//! handlers registered in an [`EventRegistry`].
//!
//! ```no_run
//! use livewire_client::{ClientConfig, EventRegistry, LiveChannel};
//! use livewire_core::EventKind;
//!
//! # #[tokio::main] async fn main() {
//! let registry = EventRegistry::new()
//!     .on(EventKind::NewAiDraft, |event| println!("new draft: {}", event.data));
//!
//! let channel = LiveChannel::spawn(ClientConfig::new("wss://api.example.com"), registry);
//! channel.connect(Some("42"), Some("token"));
//! # }
//! ```

mod backoff;
mod channel;
mod config;
mod error;
mod link;
mod registry;
mod transport;

pub use backoff::{ReconnectPolicy, RetryState};
pub use channel::{LiveChannel, Status};
pub use config::{ClientConfig, DEFAULT_URL};
pub use error::ClientError;
pub use registry::{EventRegistry, Handler};
pub use transport::{Connecting, Connector, FrameSink, FrameStream, TungsteniteConnector};

pub use livewire_core::{ConnectionState, EventKind, InboundEvent};
