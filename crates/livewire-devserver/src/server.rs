//! Dev server implementation.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use livewire_core::{Credentials, InboundEvent, parse_request_target};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

use crate::hub::{Hub, Push, Received};

/// A running development backend.
///
/// The server lives exactly as long as this handle: [`DevServer::shutdown`]
/// stops it gracefully, dropping the handle aborts it.
pub struct DevServer {
    addr: SocketAddr,
    hub: Arc<Hub>,
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl DevServer {
    /// Bind `addr` and start accepting channel connections with any token.
    pub async fn start(addr: SocketAddr) -> anyhow::Result<Self> {
        Self::bind(addr, None).await
    }

    /// Like [`DevServer::start`], but reject handshakes whose token is not
    /// `token`.
    pub async fn start_with_token(
        addr: SocketAddr,
        token: impl Into<String>,
    ) -> anyhow::Result<Self> {
        Self::bind(addr, Some(token.into())).await
    }

    async fn bind(addr: SocketAddr, token: Option<String>) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;
        let hub = Arc::new(Hub::new());
        let (stop_tx, stop_rx) = oneshot::channel();

        tracing::info!("Listening on ws://{}", addr);
        let task = tokio::spawn(accept_loop(listener, hub.clone(), token.map(Arc::from), stop_rx));

        Ok(Self {
            addr,
            hub,
            stop: Some(stop_tx),
            task: Some(task),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Base URL for clients, e.g. `ws://127.0.0.1:8000`.
    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Push `event` to every session of `user_id`.
    pub fn publish(&self, user_id: &str, event: &InboundEvent) {
        let delivered = self.hub.push(Push::Event {
            target: Some(user_id.to_string()),
            text: event.to_text(),
        });
        tracing::debug!(user = user_id, kind = %event.kind, delivered, "published");
    }

    /// Push `event` to every session.
    pub fn broadcast(&self, event: &InboundEvent) {
        let delivered = self.hub.push(Push::Event {
            target: None,
            text: event.to_text(),
        });
        tracing::debug!(kind = %event.kind, delivered, "broadcast");
    }

    /// Close every session of `user_id` with close code `code`.
    pub fn kick(&self, user_id: &str, code: u16) {
        tracing::info!(user = user_id, code, "kicking sessions");
        self.hub.push(Push::Kick {
            user_id: user_id.to_string(),
            code,
        });
    }

    /// Open sessions for `user_id`.
    pub fn session_count(&self, user_id: &str) -> usize {
        self.hub.session_count(user_id)
    }

    /// Wait until `user_id` has exactly `count` open sessions.
    pub async fn wait_for_sessions(&self, user_id: &str, count: usize) {
        self.hub.wait_for_sessions(user_id, count).await;
    }

    /// Everything clients have sent, in arrival order.
    pub async fn inbox(&self) -> Vec<Received> {
        self.hub.inbox().await
    }

    /// Stop accepting, close every session with "going away", and wait for
    /// the accept loop to finish.
    pub async fn shutdown(mut self) {
        self.stop_sessions();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        tracing::info!("Dev server on {} stopped", self.addr);
    }

    fn stop_sessions(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        self.hub.push(Push::Shutdown);
    }
}

impl Drop for DevServer {
    fn drop(&mut self) {
        self.stop_sessions();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    hub: Arc<Hub>,
    token: Option<Arc<str>>,
    mut stop: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, client_addr) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::warn!("Accept failed: {}", e);
                        continue;
                    }
                };
                let hub = hub.clone();
                let token = token.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, client_addr, hub, token).await {
                        tracing::warn!("Connection error from {}: {}", client_addr, e);
                    }
                });
            }
            _ = &mut stop => break,
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    hub: Arc<Hub>,
    token: Option<Arc<str>>,
) -> anyhow::Result<()> {
    let mut credentials: Option<Credentials> = None;
    let ws = tokio_tungstenite::accept_hdr_async(stream, |request: &Request, response: Response| {
        let target = request
            .uri()
            .path_and_query()
            .map_or("", |target| target.as_str());
        let parsed = parse_request_target(target).map_err(|e| e.to_string()).and_then(|c| {
            match token.as_deref() {
                Some(expected) if c.token() != expected => Err("invalid token".to_string()),
                _ => Ok(c),
            }
        });
        match parsed {
            Ok(c) => {
                credentials = Some(c);
                Ok(response)
            }
            Err(reason) => {
                tracing::warn!("Rejecting handshake from {}: {}", addr, reason);
                Err(unauthorized(reason))
            }
        }
    })
    .await?;

    let credentials =
        credentials.ok_or_else(|| anyhow::anyhow!("handshake accepted without credentials"))?;
    let user_id = credentials.user_id().to_string();
    tracing::debug!("New session for user {} from {}", user_id, addr);

    // Subscribe before counting the session, so anyone waiting on the count
    // can publish right away.
    let pushes = hub.subscribe();
    hub.join(&user_id);
    let result = run_session(ws, &user_id, &hub, pushes).await;
    hub.leave(&user_id);

    tracing::debug!("Session closed: user {} from {}", user_id, addr);
    result
}

async fn run_session(
    ws: WebSocketStream<TcpStream>,
    user_id: &str,
    hub: &Hub,
    mut pushes: broadcast::Receiver<Push>,
) -> anyhow::Result<()> {
    let (mut sink, mut stream) = ws.split();

    loop {
        tokio::select! {
            // Incoming message from the client
            msg = stream.next() => {
                let msg = match msg {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        tracing::debug!("WebSocket error: {}", e);
                        break;
                    }
                    None => break,
                };

                match msg {
                    Message::Text(text) => match serde_json::from_str(text.as_str()) {
                        Ok(payload) => hub.record(user_id, payload).await,
                        Err(e) => tracing::warn!("Invalid message from {}: {}", user_id, e),
                    },
                    Message::Close(_) => break,
                    _ => {}
                }
            }

            // Push from the server handle
            push = pushes.recv() => match push {
                Ok(Push::Event { target, text }) => {
                    if target.as_deref().is_none_or(|t| t == user_id) {
                        sink.send(Message::Text(text.into())).await?;
                    }
                }
                Ok(Push::Kick { user_id: kicked, code }) => {
                    if kicked == user_id {
                        close(&mut sink, CloseCode::from(code), "kicked").await;
                        break;
                    }
                }
                Ok(Push::Shutdown) | Err(broadcast::error::RecvError::Closed) => {
                    close(&mut sink, CloseCode::Away, "server shutting down").await;
                    break;
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Session for {} skipped {} pushes", user_id, skipped);
                }
            }
        }
    }

    Ok(())
}

async fn close<S>(sink: &mut S, code: CloseCode, reason: &'static str)
where
    S: futures_util::Sink<Message> + Unpin,
{
    let frame = CloseFrame {
        code,
        reason: reason.into(),
    };
    let _ = sink.send(Message::Close(Some(frame))).await;
    let _ = sink.close().await;
}

fn unauthorized(reason: String) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(reason));
    *response.status_mut() = StatusCode::UNAUTHORIZED;
    response
}
