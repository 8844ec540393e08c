//! Errors surfaced to callers of the client.
//!
//! Connection trouble is not in here: it is absorbed by the supervisor and
//! reported through the channel's `error` observable instead.

/// Error returned by [`LiveChannel`](crate::LiveChannel) and its configuration.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("failed to encode outbound payload: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("invalid client configuration: {0}")]
    Config(#[from] toml::de::Error),
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),
    #[error("channel supervisor has stopped")]
    ChannelClosed,
}
