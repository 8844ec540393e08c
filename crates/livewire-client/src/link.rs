//! One connection attempt, from handshake to close.
//!
//! A link task owns both halves of its transport and reports back to the
//! supervisor as `(link id, LinkEvent)`. It never decides whether to
//! reconnect; it only reports how the connection ended.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use livewire_core::{ABNORMAL_CLOSURE, NO_STATUS, NORMAL_CLOSURE};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

use crate::transport::Connector;

/// Identifies one connection attempt.
pub(crate) type LinkId = u64;

/// What a link reports to its supervisor.
#[derive(Debug)]
pub(crate) enum LinkEvent {
    /// Handshake completed.
    Opened,
    /// A text frame arrived.
    Text(String),
    /// A transport-level error; a `Closed` always follows.
    Failed(String),
    /// The connection is gone, with this close code.
    Closed(u16),
}

/// What the supervisor asks of a link.
#[derive(Debug)]
pub(crate) enum Outbound {
    Text(String),
    /// Close with the normal-closure code and stop.
    Close,
}

pub(crate) type LinkEvents = mpsc::UnboundedSender<(LinkId, LinkEvent)>;

/// Drive one connection until it closes.
pub(crate) async fn run(
    id: LinkId,
    connector: Arc<dyn Connector>,
    url: String,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    events: LinkEvents,
) {
    let report = |event: LinkEvent| {
        // The supervisor outlives its links unless it is shutting down.
        let _ = events.send((id, event));
    };

    let (mut sink, mut stream) = tokio::select! {
        result = connector.connect(url) => match result {
            Ok(halves) => halves,
            Err(e) => {
                report(LinkEvent::Failed(e.to_string()));
                report(LinkEvent::Closed(ABNORMAL_CLOSURE));
                return;
            }
        },
        // Superseded or disconnected before the handshake finished.
        _ = wait_for_close(&mut outbound) => {
            report(LinkEvent::Closed(NORMAL_CLOSURE));
            return;
        }
    };

    report(LinkEvent::Opened);

    let code = loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => report(LinkEvent::Text(text.as_str().to_owned())),
                Some(Ok(Message::Close(frame))) => {
                    break frame.map_or(NO_STATUS, |f| u16::from(f.code));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    report(LinkEvent::Failed(e.to_string()));
                    break ABNORMAL_CLOSURE;
                }
                None => break ABNORMAL_CLOSURE,
            },
            request = outbound.recv() => match request {
                Some(Outbound::Text(text)) => {
                    if let Err(e) = sink.send(Message::Text(text.into())).await {
                        report(LinkEvent::Failed(e.to_string()));
                        break ABNORMAL_CLOSURE;
                    }
                }
                Some(Outbound::Close) | None => {
                    let frame = CloseFrame {
                        code: CloseCode::Normal,
                        reason: "client disconnect".into(),
                    };
                    if let Err(e) = sink.send(Message::Close(Some(frame))).await {
                        tracing::debug!(link = id, "close frame not delivered: {}", e);
                    }
                    let _ = sink.close().await;
                    break NORMAL_CLOSURE;
                }
            },
        }
    };

    report(LinkEvent::Closed(code));
}

/// Resolves once the supervisor asks for a close, ignoring anything queued
/// before the handshake.
async fn wait_for_close(outbound: &mut mpsc::UnboundedReceiver<Outbound>) {
    loop {
        match outbound.recv().await {
            Some(Outbound::Close) | None => return,
            Some(Outbound::Text(_)) => {}
        }
    }
}
