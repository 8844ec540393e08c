//! The seam between the supervisor and the network.

use std::pin::Pin;

use futures_util::future::BoxFuture;
use futures_util::{Sink, Stream, StreamExt};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

/// Write half of an open connection.
pub type FrameSink = Pin<Box<dyn Sink<Message, Error = WsError> + Send>>;
/// Read half of an open connection.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Message, WsError>> + Send>>;

/// Result of a connection attempt.
pub type Connecting = BoxFuture<'static, Result<(FrameSink, FrameStream), WsError>>;

/// Opens connections to a URL.
pub trait Connector: Send + Sync + 'static {
    /// Perform the handshake and hand back both halves of the connection.
    fn connect(&self, url: String) -> Connecting;
}

/// WebSocket connector backed by `tokio-tungstenite`.
///
/// Handles both `ws://` and `wss://`; TLS uses rustls with the platform's
/// root certificates.
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteConnector;

impl Connector for TungsteniteConnector {
    fn connect(&self, url: String) -> Connecting {
        Box::pin(async move {
            let (ws, _response) = tokio_tungstenite::connect_async(url).await?;
            let (sink, stream) = ws.split();
            Ok((Box::pin(sink) as FrameSink, Box::pin(stream) as FrameStream))
        })
    }
}
