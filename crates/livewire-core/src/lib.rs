//! Core types for Livewire.
//!
//! This crate holds what both ends of a live-update channel agree on: the
//! event envelope, the endpoint layout, and the close codes. Supervision lives
//! in `livewire-client`.

mod endpoint;
mod event;

pub use endpoint::{
    CHANNEL_PATH, Credentials, CredentialsError, Endpoint, TargetParseError, parse_request_target,
};
pub use event::{EventKind, EventParseError, InboundEvent};

/// Close code for a deliberate, orderly shutdown. Never triggers a reconnect.
pub const NORMAL_CLOSURE: u16 = 1000;
/// Close frame arrived without a status code.
pub const NO_STATUS: u16 = 1005;
/// Transport went away without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    /// No live connection and none being opened.
    #[default]
    Disconnected,
    /// Handshake in progress.
    Connecting,
    /// Open and delivering events.
    Connected,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        self == ConnectionState::Connected
    }
}
