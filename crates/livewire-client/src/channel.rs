//! The live-update channel.
//!
//! [`LiveChannel`] is a cheap handle; the work happens on a supervisor task
//! that owns the active link, the retry counter, the reconnect timer and the
//! event registry. Commands go in over a queue, state comes out over a
//! `watch` channel, so no call on the handle ever waits on the network.
//!
//! ```text
//!  LiveChannel ──Command──▶ Supervisor ──Outbound──▶ link task ──▶ server
//!       ▲                     │    ▲                    │
//!       └──── watch<Status> ──┘    └──(LinkId, LinkEvent)┘
//! ```

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use livewire_core::{ConnectionState, Credentials, Endpoint, InboundEvent, NORMAL_CLOSURE};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Sleep, sleep, timeout};

use crate::backoff::RetryState;
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::link::{self, LinkEvent, LinkEvents, LinkId, Outbound};
use crate::registry::EventRegistry;
use crate::transport::{Connector, TungsteniteConnector};

/// How long shutdown waits for the active link to finish its close handshake.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Observable state of a channel.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Status {
    pub state: ConnectionState,
    /// Most recent successfully parsed event.
    pub last_message: Option<InboundEvent>,
    /// Most recent transport error, cleared on the next successful open.
    pub error: Option<String>,
}

impl Status {
    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }
}

#[derive(Debug)]
enum Command {
    Connect(Credentials),
    Disconnect,
    Send(String),
}

/// Handle to a self-healing connection to the backend's event stream.
///
/// Dropping the handle disconnects and stops the supervisor without waiting
/// for it; use [`LiveChannel::shutdown`] to wait.
#[derive(Debug)]
pub struct LiveChannel {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<Status>,
    supervisor: JoinHandle<()>,
}

impl LiveChannel {
    /// Start a channel that connects over WebSocket. Must be called from
    /// within a tokio runtime.
    pub fn spawn(config: ClientConfig, registry: EventRegistry) -> Self {
        Self::with_connector(config, registry, Arc::new(TungsteniteConnector))
    }

    /// Start a channel on a custom transport.
    pub fn with_connector(
        config: ClientConfig,
        registry: EventRegistry,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (links_tx, links_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(Status::default());

        let supervisor = Supervisor {
            endpoint: config.endpoint(),
            retry: RetryState::new(config.reconnect),
            registry,
            connector,
            credentials: None,
            active: None,
            next_link: 0,
            links: links_tx,
            status: status_tx,
        };
        let supervisor = tokio::spawn(supervisor.run(commands_rx, links_rx));

        Self {
            commands: commands_tx,
            status: status_rx,
            supervisor,
        }
    }

    /// Open the channel for `user_id`, authenticating with `auth_token`.
    ///
    /// Does nothing but log a warning if either part is missing or empty.
    /// Any existing connection or pending reconnect is replaced.
    pub fn connect(&self, user_id: Option<&str>, auth_token: Option<&str>) {
        match Credentials::from_parts(user_id, auth_token) {
            Ok(credentials) => self.command(Command::Connect(credentials)),
            Err(e) => tracing::warn!("not connecting: {}", e),
        }
    }

    /// Close the channel and cancel any pending reconnect. Idempotent.
    pub fn disconnect(&self) {
        self.command(Command::Disconnect);
    }

    /// Disconnect and stop the supervisor, waiting for the server to be sent
    /// a normal close. Gives up on the close handshake after a short grace
    /// period.
    pub async fn shutdown(self) {
        let Self {
            commands,
            supervisor,
            ..
        } = self;
        drop(commands);
        if let Err(e) = supervisor.await {
            tracing::warn!("channel supervisor failed: {}", e);
        }
    }

    /// Serialize `payload` as JSON and send it if the channel is connected.
    ///
    /// Payloads sent while not connected are dropped with a warning, never
    /// queued. Only a serialization failure is reported as an error.
    pub fn send<T: Serialize + ?Sized>(&self, payload: &T) -> Result<(), ClientError> {
        let text = serde_json::to_string(payload)?;
        self.commands
            .send(Command::Send(text))
            .map_err(|_| ClientError::ChannelClosed)
    }

    pub fn is_connected(&self) -> bool {
        self.status.borrow().is_connected()
    }

    pub fn state(&self) -> ConnectionState {
        self.status.borrow().state
    }

    pub fn last_message(&self) -> Option<InboundEvent> {
        self.status.borrow().last_message.clone()
    }

    pub fn error(&self) -> Option<String> {
        self.status.borrow().error.clone()
    }

    /// Snapshot of the full status.
    pub fn status(&self) -> Status {
        self.status.borrow().clone()
    }

    /// Receiver that is notified on every status change.
    pub fn subscribe(&self) -> watch::Receiver<Status> {
        self.status.clone()
    }

    fn command(&self, command: Command) {
        if self.commands.send(command).is_err() {
            tracing::warn!("channel supervisor has stopped; command dropped");
        }
    }
}

/// The live connection, as seen by the supervisor.
struct ActiveLink {
    id: LinkId,
    outbound: mpsc::UnboundedSender<Outbound>,
    task: JoinHandle<()>,
}

struct Supervisor {
    endpoint: Endpoint,
    retry: RetryState,
    registry: EventRegistry,
    connector: Arc<dyn Connector>,
    credentials: Option<Credentials>,
    active: Option<ActiveLink>,
    next_link: LinkId,
    links: LinkEvents,
    status: watch::Sender<Status>,
}

impl Supervisor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut links: mpsc::UnboundedReceiver<(LinkId, LinkEvent)>,
    ) {
        let mut reconnect: Option<Pin<Box<Sleep>>> = None;

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Connect(credentials)) => {
                        reconnect = None;
                        self.connect(credentials);
                    }
                    Some(Command::Disconnect) => {
                        reconnect = None;
                        self.disconnect();
                    }
                    Some(Command::Send(text)) => self.send(text),
                    None => {
                        self.shutdown().await;
                        break;
                    }
                },
                Some((id, event)) = links.recv() => {
                    if let Some(delay) = self.on_link_event(id, event) {
                        reconnect = Some(Box::pin(sleep(delay)));
                    }
                }
                () = wait_for(&mut reconnect) => {
                    reconnect = None;
                    self.open();
                }
            }
        }

        tracing::debug!("channel supervisor stopped");
    }

    fn connect(&mut self, credentials: Credentials) {
        if let Some(previous) = self.active.take() {
            tracing::info!(link = previous.id, "superseding existing connection");
            let _ = previous.outbound.send(Outbound::Close);
        }
        self.credentials = Some(credentials);
        self.retry.reset();
        self.open();
    }

    /// Start a new link with the stored credentials.
    fn open(&mut self) {
        let Some(credentials) = &self.credentials else {
            return;
        };
        self.next_link += 1;
        let id = self.next_link;
        let url = self.endpoint.url_for(credentials);
        tracing::info!(
            link = id,
            attempt = self.retry.attempts(),
            url = %self.endpoint.redacted_url_for(credentials),
            "connecting"
        );

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(link::run(
            id,
            self.connector.clone(),
            url,
            outbound_rx,
            self.links.clone(),
        ));
        self.active = Some(ActiveLink {
            id,
            outbound: outbound_tx,
            task,
        });
        self.status
            .send_modify(|s| s.state = ConnectionState::Connecting);
    }

    fn disconnect(&mut self) {
        self.release();
        self.credentials = None;
        self.status.send_if_modified(|s| {
            let changed = s.state != ConnectionState::Disconnected;
            s.state = ConnectionState::Disconnected;
            changed
        });
    }

    /// Ask the active link, if any, to close normally and hand it back.
    fn release(&mut self) -> Option<ActiveLink> {
        let link = self.active.take()?;
        tracing::info!(link = link.id, "disconnecting");
        let _ = link.outbound.send(Outbound::Close);
        Some(link)
    }

    /// Disconnect and wait for the released link to finish closing.
    async fn shutdown(&mut self) {
        let released = self.release();
        self.disconnect();
        let Some(link) = released else {
            return;
        };
        match timeout(CLOSE_GRACE, link.task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(link = link.id, "link task failed: {}", e),
            Err(_) => tracing::debug!(link = link.id, "close handshake timed out"),
        }
    }

    fn send(&self, text: String) {
        match &self.active {
            Some(link) if self.status.borrow().is_connected() => {
                let _ = link.outbound.send(Outbound::Text(text));
            }
            _ => tracing::warn!("not connected; dropping outbound message"),
        }
    }

    /// Apply an event from a link. Returns a reconnect delay if one should be
    /// scheduled.
    fn on_link_event(&mut self, id: LinkId, event: LinkEvent) -> Option<Duration> {
        if self.active.as_ref().map(|link| link.id) != Some(id) {
            tracing::trace!(link = id, ?event, "ignoring event from superseded link");
            return None;
        }

        match event {
            LinkEvent::Opened => {
                tracing::info!(link = id, "connected");
                self.retry.on_open();
                self.status.send_modify(|s| {
                    s.state = ConnectionState::Connected;
                    s.error = None;
                });
                None
            }
            LinkEvent::Text(text) => {
                match InboundEvent::from_text(&text) {
                    Ok(event) => {
                        tracing::debug!(link = id, kind = %event.kind, "event received");
                        self.status
                            .send_modify(|s| s.last_message = Some(event.clone()));
                        self.registry.dispatch(&event);
                    }
                    Err(e) => tracing::warn!(link = id, "discarding message: {}", e),
                }
                None
            }
            LinkEvent::Failed(message) => {
                tracing::warn!(link = id, "transport error: {}", message);
                self.status.send_modify(|s| s.error = Some(message));
                None
            }
            LinkEvent::Closed(code) => {
                self.active = None;
                self.status
                    .send_modify(|s| s.state = ConnectionState::Disconnected);

                let delay = self.retry.on_close(code);
                match delay {
                    Some(delay) => tracing::info!(
                        link = id,
                        code,
                        attempt = self.retry.attempts(),
                        delay_ms = delay.as_millis() as u64,
                        "connection lost; reconnect scheduled"
                    ),
                    None if code != NORMAL_CLOSURE => tracing::warn!(
                        link = id,
                        code,
                        attempts = self.retry.attempts(),
                        "connection lost; giving up"
                    ),
                    None => tracing::info!(link = id, code, "connection closed"),
                }
                delay
            }
        }
    }
}

/// Resolves when the timer fires; pending forever if there is none.
async fn wait_for(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer.as_mut() {
        Some(timer) => timer.await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::SinkExt;
    use futures::channel::mpsc as wire;
    use livewire_core::{ABNORMAL_CLOSURE, EventKind, NORMAL_CLOSURE};
    use serde_json::json;
    use tokio::time::Instant;
    use tokio_tungstenite::tungstenite::protocol::CloseFrame;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
    use tokio_tungstenite::tungstenite::{Error as WsError, Message};

    use crate::backoff::ReconnectPolicy;
    use crate::transport::{Connecting, FrameSink, FrameStream};

    /// Server end of one scripted connection.
    struct Peer {
        frames: wire::UnboundedSender<Result<Message, WsError>>,
        written: wire::UnboundedReceiver<Message>,
    }

    // Sends to a link that has already gone away are dropped, as a real
    // server's would be.
    impl Peer {
        fn push(&self, text: &str) {
            let _ = self.frames.unbounded_send(Ok(Message::Text(text.into())));
        }

        fn close(&self, code: u16) {
            let frame = CloseFrame {
                code: CloseCode::from(code),
                reason: "".into(),
            };
            let _ = self.frames.unbounded_send(Ok(Message::Close(Some(frame))));
        }

        fn close_without_status(&self) {
            let _ = self.frames.unbounded_send(Ok(Message::Close(None)));
        }

        fn written(&mut self) -> Vec<Message> {
            let mut out = Vec::new();
            while let Ok(Some(message)) = self.written.try_next() {
                out.push(message);
            }
            out
        }
    }

    enum Step {
        Refuse,
        Accept {
            after: Duration,
            frames: wire::UnboundedReceiver<Result<Message, WsError>>,
            written: wire::UnboundedSender<Message>,
        },
    }

    /// Connector that plays back a queue of outcomes, refusing once the queue
    /// runs dry, and records when each attempt was made.
    #[derive(Default)]
    struct Scripted {
        steps: Mutex<VecDeque<Step>>,
        attempts: Mutex<Vec<(Instant, String)>>,
    }

    impl Scripted {
        fn refuse(&self) {
            self.steps.lock().unwrap().push_back(Step::Refuse);
        }

        fn accept(&self) -> Peer {
            self.accept_after(Duration::ZERO)
        }

        fn accept_after(&self, after: Duration) -> Peer {
            let (frames_tx, frames_rx) = wire::unbounded();
            let (written_tx, written_rx) = wire::unbounded();
            self.steps.lock().unwrap().push_back(Step::Accept {
                after,
                frames: frames_rx,
                written: written_tx,
            });
            Peer {
                frames: frames_tx,
                written: written_rx,
            }
        }

        fn attempt_times(&self) -> Vec<Instant> {
            self.attempts.lock().unwrap().iter().map(|(t, _)| *t).collect()
        }

        fn urls(&self) -> Vec<String> {
            self.attempts
                .lock()
                .unwrap()
                .iter()
                .map(|(_, url)| url.clone())
                .collect()
        }
    }

    impl Connector for Scripted {
        fn connect(&self, url: String) -> Connecting {
            self.attempts.lock().unwrap().push((Instant::now(), url));
            let step = self.steps.lock().unwrap().pop_front().unwrap_or(Step::Refuse);
            Box::pin(async move {
                match step {
                    Step::Refuse => Err(WsError::Io(std::io::Error::new(
                        std::io::ErrorKind::ConnectionRefused,
                        "connection refused",
                    ))),
                    Step::Accept {
                        after,
                        frames,
                        written,
                    } => {
                        tokio::time::sleep(after).await;
                        let sink: FrameSink =
                            Box::pin(written.sink_map_err(|_| WsError::ConnectionClosed));
                        let stream: FrameStream = Box::pin(frames);
                        Ok((sink, stream))
                    }
                }
            })
        }
    }

    fn start(registry: EventRegistry) -> (LiveChannel, Arc<Scripted>) {
        let connector = Arc::new(Scripted::default());
        let channel = LiveChannel::with_connector(
            ClientConfig::new("ws://test"),
            registry,
            connector.clone(),
        );
        (channel, connector)
    }

    /// Let every ready task run; virtual time moves by a millisecond.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    async fn wait_until(channel: &LiveChannel, condition: impl FnMut(&Status) -> bool) {
        let mut status = channel.subscribe();
        tokio::time::timeout(Duration::from_secs(600), status.wait_for(condition))
            .await
            .expect("condition not reached")
            .expect("supervisor stopped");
    }

    async fn wait_connected(channel: &LiveChannel) {
        wait_until(channel, Status::is_connected).await;
    }

    fn gaps(times: &[Instant]) -> Vec<u64> {
        times
            .windows(2)
            .map(|w| (w[1] - w[0]).as_millis() as u64)
            .collect()
    }

    fn is_normal_close(message: &Message) -> bool {
        matches!(message, Message::Close(Some(frame)) if frame.code == CloseCode::Normal)
    }

    #[tokio::test(start_paused = true)]
    async fn new_draft_event_reaches_handler_once() {
        let drafts = Arc::new(AtomicUsize::new(0));
        let registry = EventRegistry::new().on(EventKind::NewAiDraft, {
            let drafts = drafts.clone();
            move |_: &InboundEvent| {
                drafts.fetch_add(1, Ordering::SeqCst);
            }
        });
        let (channel, connector) = start(registry);
        let peer = connector.accept();

        channel.connect(Some("42"), Some("tok"));
        wait_connected(&channel).await;
        assert_eq!(connector.urls(), vec!["ws://test/ws/42?token=tok"]);

        peer.push(r#"{"event":"new_ai_draft","data":{"id":"d1"}}"#);
        wait_until(&channel, |s| s.last_message.is_some()).await;

        assert_eq!(
            channel.last_message(),
            Some(InboundEvent::new(EventKind::NewAiDraft, json!({"id": "d1"})))
        );
        assert_eq!(drafts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn refused_connections_back_off_then_give_up() {
        let (channel, connector) = start(EventRegistry::new());

        channel.connect(Some("42"), Some("tok"));
        tokio::time::sleep(Duration::from_secs(300)).await;

        let times = connector.attempt_times();
        assert_eq!(times.len(), 6, "initial attempt plus five reconnects");
        assert_eq!(gaps(&times), vec![1_000, 2_000, 4_000, 8_000, 16_000]);
        assert!(!channel.is_connected());
        assert_eq!(channel.state(), ConnectionState::Disconnected);
        assert!(channel.error().unwrap().contains("refused"));
    }

    #[tokio::test(start_paused = true)]
    async fn abnormal_close_schedules_growing_delays() {
        let (channel, connector) = start(EventRegistry::new());
        let peer = connector.accept();

        channel.connect(Some("42"), Some("tok"));
        wait_connected(&channel).await;

        let closed_at = Instant::now();
        peer.close(ABNORMAL_CLOSURE);
        tokio::time::sleep(Duration::from_secs(10)).await;

        let times = connector.attempt_times();
        assert_eq!(times.len(), 4);
        assert_eq!((times[1] - closed_at).as_millis(), 1_000);
        assert_eq!(gaps(&times[1..]), vec![2_000, 4_000]);
        assert!(!channel.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn close_frame_without_code_reconnects() {
        let (channel, connector) = start(EventRegistry::new());
        let peer = connector.accept();
        let _second = connector.accept();

        channel.connect(Some("42"), Some("tok"));
        wait_connected(&channel).await;

        let closed_at = Instant::now();
        peer.close_without_status();
        wait_until(&channel, |s| !s.is_connected()).await;
        wait_connected(&channel).await;

        let times = connector.attempt_times();
        assert_eq!(times.len(), 2);
        assert_eq!((times[1] - closed_at).as_millis(), 1_000);
    }

    #[tokio::test(start_paused = true)]
    async fn successful_open_resets_backoff() {
        let (channel, connector) = start(EventRegistry::new());
        connector.refuse();
        connector.refuse();
        let peer = connector.accept();

        channel.connect(Some("42"), Some("tok"));
        wait_connected(&channel).await;
        assert_eq!(gaps(&connector.attempt_times()), vec![1_000, 2_000]);

        let lost_at = Instant::now();
        drop(peer);
        tokio::time::sleep(Duration::from_millis(1_500)).await;

        let times = connector.attempt_times();
        assert_eq!(times.len(), 4);
        assert_eq!((times[3] - lost_at).as_millis(), 1_000);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_disconnect_closes_normally_and_never_reconnects() {
        let (channel, connector) = start(EventRegistry::new());
        let mut peer = connector.accept();

        channel.connect(Some("42"), Some("tok"));
        wait_connected(&channel).await;
        channel.disconnect();
        tokio::time::sleep(Duration::from_secs(120)).await;

        assert_eq!(connector.attempt_times().len(), 1);
        assert_eq!(channel.state(), ConnectionState::Disconnected);
        let written = peer.written();
        assert!(written.last().is_some_and(is_normal_close));
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_cancels_pending_reconnect() {
        let (channel, connector) = start(EventRegistry::new());

        channel.connect(Some("42"), Some("tok"));
        settle().await;
        assert_eq!(connector.attempt_times().len(), 1);

        channel.disconnect();
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(connector.attempt_times().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_without_connection_is_noop() {
        let (channel, connector) = start(EventRegistry::new());

        channel.disconnect();
        channel.disconnect();
        settle().await;

        assert_eq!(channel.status(), Status::default());
        assert!(connector.attempt_times().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn server_normal_close_does_not_reconnect() {
        let (channel, connector) = start(EventRegistry::new());
        let peer = connector.accept();

        channel.connect(Some("42"), Some("tok"));
        wait_connected(&channel).await;
        peer.close(NORMAL_CLOSURE);
        tokio::time::sleep(Duration::from_secs(120)).await;

        assert_eq!(connector.attempt_times().len(), 1);
        assert!(!channel.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn send_writes_only_while_connected() {
        let (channel, connector) = start(EventRegistry::new());
        let mut peer = connector.accept_after(Duration::from_secs(5));

        channel.send(&json!({"before": "connect"})).unwrap();
        channel.connect(Some("42"), Some("tok"));
        settle().await;
        assert_eq!(channel.state(), ConnectionState::Connecting);
        channel.send(&json!({"during": "handshake"})).unwrap();

        wait_connected(&channel).await;
        channel.send(&json!({"action": "refresh"})).unwrap();
        settle().await;

        channel.disconnect();
        channel.send(&json!({"after": "disconnect"})).unwrap();
        settle().await;

        let written = peer.written();
        assert_eq!(written.len(), 2);
        match &written[0] {
            Message::Text(text) => {
                let value: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
                assert_eq!(value, json!({"action": "refresh"}));
            }
            other => panic!("expected text frame, got {other:?}"),
        }
        assert!(is_normal_close(&written[1]));
    }

    #[tokio::test(start_paused = true)]
    async fn unserializable_payload_is_an_error() {
        let (channel, _connector) = start(EventRegistry::new());
        let payload: HashMap<(u8, u8), u8> = HashMap::from([((1, 2), 3)]);
        assert!(matches!(channel.send(&payload), Err(ClientError::Encode(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_message_leaves_status_untouched() {
        let hits = Arc::new(AtomicUsize::new(0));
        let registry = EventRegistry::new().on(EventKind::DraftUpdate, {
            let hits = hits.clone();
            move |_: &InboundEvent| {
                hits.fetch_add(1, Ordering::SeqCst);
            }
        });
        let (channel, connector) = start(registry);
        let peer = connector.accept();

        channel.connect(Some("42"), Some("tok"));
        wait_connected(&channel).await;
        let before = channel.status();

        peer.push("not json");
        peer.push(r#"{"data":{"id":"no tag"}}"#);
        settle().await;

        assert_eq!(channel.status(), before);
        assert!(channel.is_connected());
        assert_eq!(channel.error(), None);
        assert_eq!(channel.last_message(), None);
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        peer.push(r#"{"event":"draft_update","data":{"id":"d2"}}"#);
        wait_until(&channel, |s| s.last_message.is_some()).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unrecognized_kind_is_recorded_but_not_an_error() {
        let (channel, connector) = start(EventRegistry::new());
        let peer = connector.accept();

        channel.connect(Some("42"), Some("tok"));
        wait_connected(&channel).await;
        peer.push(r#"{"event":"car_returned","data":null,"user_id":"7"}"#);
        wait_until(&channel, |s| s.last_message.is_some()).await;

        let event = channel.last_message().unwrap();
        assert_eq!(event.kind, EventKind::Other("car_returned".into()));
        assert_eq!(event.user_id.as_deref(), Some("7"));
        assert!(channel.is_connected());
        assert_eq!(channel.error(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_credentials_do_not_connect() {
        let (channel, connector) = start(EventRegistry::new());

        channel.connect(None, Some("tok"));
        channel.connect(Some("42"), None);
        channel.connect(Some(""), Some("tok"));
        settle().await;

        assert!(connector.attempt_times().is_empty());
        assert_eq!(channel.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn superseded_link_is_closed_and_ignored() {
        let drafts = Arc::new(AtomicUsize::new(0));
        let registry = EventRegistry::new().on(EventKind::NewAiDraft, {
            let drafts = drafts.clone();
            move |_: &InboundEvent| {
                drafts.fetch_add(1, Ordering::SeqCst);
            }
        });
        let (channel, connector) = start(registry);
        let mut first = connector.accept();
        let second = connector.accept();

        channel.connect(Some("42"), Some("tok"));
        wait_connected(&channel).await;
        channel.connect(Some("43"), Some("tok"));
        settle().await;
        assert!(channel.is_connected());
        assert_eq!(connector.urls()[1], "ws://test/ws/43?token=tok");

        first.push(r#"{"event":"new_ai_draft","data":{"from":"first"}}"#);
        second.push(r#"{"event":"new_ai_draft","data":{"from":"second"}}"#);
        settle().await;

        assert_eq!(drafts.load(Ordering::SeqCst), 1);
        assert_eq!(channel.last_message().unwrap().data, json!({"from": "second"}));
        assert!(first.written().last().is_some_and(is_normal_close));

        // The first link's close must not trigger a reconnect.
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.attempt_times().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn error_is_reported_then_cleared_on_open() {
        let (channel, connector) = start(EventRegistry::new());
        connector.refuse();
        let _peer = connector.accept();

        channel.connect(Some("42"), Some("tok"));
        settle().await;
        assert!(channel.error().is_some());
        assert!(!channel.is_connected());

        wait_connected(&channel).await;
        assert_eq!(channel.error(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_after_exhaustion_starts_over() {
        let (channel, connector) = start(EventRegistry::new());

        channel.connect(Some("42"), Some("tok"));
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(connector.attempt_times().len(), 6);

        let _peer = connector.accept();
        channel.connect(Some("42"), Some("tok"));
        wait_connected(&channel).await;
        assert_eq!(connector.attempt_times().len(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn short_policy_from_config_is_honoured() {
        let connector = Arc::new(Scripted::default());
        let config = ClientConfig::new("ws://test").with_reconnect(ReconnectPolicy {
            base_delay_ms: 10,
            max_delay_ms: 25,
            max_attempts: 3,
        });
        let channel = LiveChannel::with_connector(config, EventRegistry::new(), connector.clone());

        channel.connect(Some("42"), Some("tok"));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(gaps(&connector.attempt_times()), vec![10, 20, 25]);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_handle_closes_connection() {
        let (channel, connector) = start(EventRegistry::new());
        let mut peer = connector.accept();

        channel.connect(Some("42"), Some("tok"));
        wait_connected(&channel).await;
        drop(channel);
        settle().await;

        assert!(peer.written().last().is_some_and(is_normal_close));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_returns_after_close_is_sent() {
        let (channel, connector) = start(EventRegistry::new());
        let mut peer = connector.accept();

        channel.connect(Some("42"), Some("tok"));
        wait_connected(&channel).await;
        channel.shutdown().await;

        assert!(peer.written().last().is_some_and(is_normal_close));
        assert_eq!(connector.attempt_times().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_while_idle_returns() {
        let (channel, connector) = start(EventRegistry::new());
        channel.shutdown().await;
        assert!(connector.attempt_times().is_empty());
    }
}
