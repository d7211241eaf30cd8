//! The connection engine: a single background task owning the WebSocket,
//! the correlator registry, the connection state, and the frame counter.
//! Callers interact through a cloneable [`Connection`] handle.

use std::future::pending;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use http::Request;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_tungstenite as ws;
use ws::tungstenite::Message;
use ws::MaybeTlsStream;

use crate::auth::AuthInfo;
use crate::correlator::{Correlator, InboundPayload};
use crate::errors::{DisconnectReason, WaError, WaResult};
use crate::events::{Event, EventBus, SubscriptionId};
use crate::framer::{self, ParsedFrame};
use crate::liveness::LivenessController;
use crate::node::Node;
use crate::query::Query;
use crate::state::{AutoReconnect, ConnectionState};
use crate::tagger::Tagger;

const ENDPOINT_URL: &str = "wss://web.whatsapp.com/ws";
const ORIGIN_URL: &str = "https://web.whatsapp.com";

type WsClient = ws::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Per-connect-attempt configuration. Immutable for the lifetime of one
/// `Connection`.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub max_idle_ms: u64,
    pub max_retries: u32,
    pub connect_cooldown_ms: u64,
    pub phone_response_ms: u64,
    pub always_use_takeover: bool,
    pub auto_reconnect: AutoReconnect,
    /// Overrides `ENDPOINT_URL`. Left at the default for production use;
    /// tests point this at a local `ws://` listener instead.
    pub endpoint: String,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        ConnectOptions {
            max_idle_ms: 30_000,
            max_retries: 3,
            connect_cooldown_ms: 3_000,
            phone_response_ms: 13_000,
            always_use_takeover: false,
            auto_reconnect: AutoReconnect::OnConnectionLost,
            endpoint: ENDPOINT_URL.to_owned(),
        }
    }
}

#[derive(Clone)]
struct StateSnapshot {
    state: ConnectionState,
    last_reason: Option<DisconnectReason>,
}

enum Command {
    Query(
        Query,
        oneshot::Sender<WaResult<(String, oneshot::Receiver<Result<InboundPayload, WaError>>)>>,
    ),
    CancelTag(String),
    /// Forces `Actor::unexpected_disconnect` for `reason`, signalling the
    /// given sender once the teardown (and any resulting reconnect attempt)
    /// has run to completion. Used by the 599 retry path, which must not
    /// resend over the same socket that served the bad reply.
    ForceDisconnect(DisconnectReason, oneshot::Sender<()>),
    Close,
    Logout,
}

/// A cloneable handle to a running connection engine. Cloning is cheap;
/// every clone shares the same background actor task.
#[derive(Clone)]
pub struct Connection {
    cmd_tx: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<StateSnapshot>,
    msg_count: Arc<AtomicU64>,
    events: EventBus,
}

impl Connection {
    /// Spawns the actor task and begins connecting immediately.
    pub fn connect(options: ConnectOptions, auth_info: Option<AuthInfo>) -> Connection {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(StateSnapshot {
            state: ConnectionState::Closed,
            last_reason: None,
        });
        let events = EventBus::new();
        let msg_count = Arc::new(AtomicU64::new(0));

        let actor = Actor {
            options,
            auth_info: auth_info.map(Arc::new),
            cmd_rx,
            state_tx,
            events: events.clone(),
            msg_count: msg_count.clone(),
            ws: None,
            tagger: Tagger::new(),
            correlator: Correlator::new(),
            liveness: LivenessController::new(0, 0),
            state: ConnectionState::Closed,
            phone_probe_tag: None,
            retry_count: 0,
        };

        tokio::spawn(actor.run());

        Connection {
            cmd_tx,
            state_rx,
            msg_count,
            events,
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: FnMut(&Event) + Send + 'static,
    {
        self.events.subscribe(handler)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.events.unsubscribe(id);
    }

    /// Current `msg_count`, i.e. the number of frames sent so far on this
    /// connect cycle. `set_query`'s epoch is resolved independently, inside
    /// the actor, at the moment it actually sends the frame; this is plain
    /// introspection for callers that want to observe the counter.
    pub fn epoch(&self) -> u64 {
        self.msg_count.load(Ordering::SeqCst)
    }

    pub fn close(&self) {
        let _ = self.cmd_tx.send(Command::Close);
    }

    pub fn logout(&self) {
        let _ = self.cmd_tx.send(Command::Logout);
    }

    /// Resolves once the connection reaches `Open`; rejects if `close`
    /// fires with reason `InvalidSession` or `Intentional`. With no
    /// timeout, waits forever; a zero timeout fails immediately with
    /// code 428.
    pub async fn wait_for_connection(&self, timeout: Option<Duration>) -> WaResult<()> {
        if let Some(d) = timeout {
            if d.is_zero() {
                return Err(WaError::Closed(428));
            }
            return match tokio::time::timeout(d, self.wait_for_open_forever()).await {
                Ok(r) => r,
                Err(_) => Err(WaError::Timeout),
            };
        }
        self.wait_for_open_forever().await
    }

    async fn wait_for_open_forever(&self) -> WaResult<()> {
        let mut rx = self.state_rx.clone();
        loop {
            {
                let snapshot = rx.borrow().clone();
                if snapshot.state == ConnectionState::Open {
                    return Ok(());
                }
                if let Some(reason) = snapshot.last_reason {
                    if reason == DisconnectReason::InvalidSession
                        || reason == DisconnectReason::Intentional
                    {
                        return Err(reason.into());
                    }
                }
            }
            if rx.changed().await.is_err() {
                return Err(WaError::NotConnected);
            }
        }
    }

    pub async fn query(&self, q: Query) -> WaResult<InboundPayload> {
        self.query_inner(q, false).await
    }

    fn query_inner<'a>(
        &'a self,
        q: Query,
        retried: bool,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = WaResult<InboundPayload>> + 'a>> {
        Box::pin(async move {
            if q.wait_for_open {
                self.wait_for_connection(q.timeout).await?;
            }

            let (setup_tx, setup_rx) = oneshot::channel();
            self.cmd_tx
                .send(Command::Query(q.clone(), setup_tx))
                .map_err(|_| WaError::NotConnected)?;
            let (tag, reply_rx) = setup_rx.await.map_err(|_| WaError::NotConnected)??;

            let reply = match q.timeout {
                None => reply_rx.await.map_err(|_| WaError::NotConnected)?,
                Some(d) => match tokio::time::timeout(d, reply_rx).await {
                    Ok(r) => r.map_err(|_| WaError::NotConnected)?,
                    Err(_) => {
                        let _ = self.cmd_tx.send(Command::CancelTag(tag.clone()));
                        return Err(WaError::Timeout);
                    }
                },
            };

            let payload = reply?;

            if q.expect_2xx {
                if let InboundPayload::Json(ref value) = payload {
                    if let Some(status) = value["status"].as_u16() {
                        if !(200..300).contains(&status) {
                            if status == 599 && !retried {
                                let (done_tx, done_rx) = oneshot::channel();
                                let _ = self.cmd_tx.send(Command::ForceDisconnect(
                                    DisconnectReason::BadSession,
                                    done_tx,
                                ));
                                let _ = done_rx.await;
                                return self.query_inner(q, true).await;
                            }
                            let status_text = value["status_text"]
                                .as_str()
                                .unwrap_or_default()
                                .to_owned();
                            return Err(WaError::ServerError {
                                status,
                                status_text,
                                query: q.json.dump(),
                            });
                        }
                    }
                }
            }

            Ok(payload)
        })
    }
}

struct Actor {
    options: ConnectOptions,
    auth_info: Option<Arc<AuthInfo>>,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    state_tx: watch::Sender<StateSnapshot>,
    events: EventBus,
    msg_count: Arc<AtomicU64>,
    ws: Option<WsClient>,
    tagger: Tagger,
    correlator: Correlator,
    liveness: LivenessController,
    state: ConnectionState,
    phone_probe_tag: Option<String>,
    retry_count: u32,
}

impl Actor {
    async fn run(mut self) {
        self.liveness =
            LivenessController::new(self.options.phone_response_ms, self.options.max_idle_ms);
        self.transition(ConnectionState::Connecting, None);
        if let Err(e) = self.do_connect().await {
            warn!("initial connect failed: {}", e);
            self.unexpected_disconnect(DisconnectReason::Transport).await;
        }

        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => {
                            if self.handle_command(cmd).await {
                                return;
                            }
                        }
                        None => return,
                    }
                }
                msg = self.next_ws_message() => {
                    match msg {
                        Some(Ok(m)) => {
                            if let Err(e) = self.handle_ws_message(m).await {
                                error!("error handling inbound frame: {}", e);
                            }
                        }
                        Some(Err(e)) => {
                            warn!("websocket error: {}", e);
                            self.unexpected_disconnect(DisconnectReason::Transport).await;
                        }
                        None => {
                            warn!("websocket stream closed");
                            self.unexpected_disconnect(DisconnectReason::Transport).await;
                        }
                    }
                }
                _ = self.liveness.tick_phone_probe() => {
                    self.on_phone_probe_tick().await;
                }
                _ = self.liveness.tick_debounce() => {
                    self.unexpected_disconnect(DisconnectReason::TimedOut).await;
                }
            }
        }
    }

    async fn next_ws_message(&mut self) -> Option<Result<Message, ws::tungstenite::Error>> {
        match &mut self.ws {
            Some(ws) => ws.next().await,
            None => pending().await,
        }
    }

    /// Keeps the phone-probe interval armed exactly while at least one
    /// `requires_phone` waiter is registered.
    fn maintain_phone_probe(&mut self) {
        if !self.correlator.any_requires_phone() {
            self.liveness.disarm_phone_probe();
        }
    }

    fn transition(&mut self, state: ConnectionState, reason: Option<DisconnectReason>) {
        self.state = state;
        let _ = self.state_tx.send(StateSnapshot {
            state,
            last_reason: reason,
        });
    }

    async fn do_connect(&mut self) -> WaResult<()> {
        let request = Request::builder()
            .uri(self.options.endpoint.as_str())
            .header("Origin", ORIGIN_URL)
            .body(())
            .expect("invalid endpoint/origin URL");
        let (stream, _) = ws::connect_async(request).await?;
        self.ws = Some(stream);
        self.tagger = Tagger::new();
        self.msg_count.store(0, Ordering::SeqCst);
        info!("connected to {}", self.options.endpoint);
        self.transition(ConnectionState::Open, None);
        self.events.publish(Event::Open);
        self.retry_count = 0;
        Ok(())
    }

    async fn handle_command(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::Query(q, resp) => {
                let result = self.start_query(q).await;
                let _ = resp.send(result);
            }
            Command::CancelTag(tag) => {
                self.correlator.cancel(&tag);
                self.maintain_phone_probe();
            }
            Command::ForceDisconnect(reason, done) => {
                self.unexpected_disconnect(reason).await;
                let _ = done.send(());
            }
            Command::Close => {
                self.transition(ConnectionState::Closing, None);
                self.close_internal(DisconnectReason::Intentional, false);
                return true;
            }
            Command::Logout => {
                self.transition(ConnectionState::Closing, None);
                self.send_json(&json::array!["admin", "Conn", "disconnect"]).await;
                self.close_internal(DisconnectReason::Intentional, false);
                self.auth_info = None;
                return true;
            }
        }
        false
    }

    /// Registers the waiter and sends the frame without yielding between
    /// the two steps, eliminating the reply-before-register race.
    async fn start_query(
        &mut self,
        mut q: Query,
    ) -> WaResult<(String, oneshot::Receiver<Result<InboundPayload, WaError>>)> {
        let tag = q
            .tag
            .clone()
            .unwrap_or_else(|| self.tagger.next_tag(q.long_tag));
        let rx = self.correlator.register(tag.clone(), q.requires_phone)?;

        if q.requires_phone {
            self.liveness.arm_phone_probe();
        }

        if let Some(nodes) = q.pending_action_nodes.take() {
            let epoch = self.msg_count.load(Ordering::SeqCst);
            q.json = crate::query::build_action_envelope(nodes, epoch);
        }

        match q.binary_flags {
            Some((metric, flag)) => {
                let auth = self.auth_info.clone().ok_or(WaError::InvalidSessionState)?;
                let node = Node::from_json(&q.json)?;
                let frame = framer::frame_binary_outbound(
                    &tag,
                    &node,
                    metric,
                    flag,
                    &auth.enc_key,
                    &auth.mac_key,
                )?;
                self.send_raw(frame).await;
            }
            None => {
                let frame = framer::frame_json(&tag, &q.json);
                self.send_raw(frame).await;
            }
        }

        if q.start_debounce {
            self.liveness.start_debounce();
        }

        Ok((tag, rx))
    }

    async fn send_json(&mut self, value: &json::JsonValue) {
        let tag = self.tagger.next_tag(false);
        let frame = framer::frame_json(&tag, value);
        self.send_raw(frame).await;
    }

    async fn send_raw(&mut self, frame: Vec<u8>) {
        if let Some(ws) = &mut self.ws {
            trace!("--> {:?}", frame);
            match ws.send(Message::Binary(frame)).await {
                Ok(()) => {
                    self.msg_count.fetch_add(1, Ordering::SeqCst);
                }
                Err(e) => warn!("failed to send frame: {}", e),
            }
        }
    }

    async fn handle_ws_message(&mut self, message: Message) -> WaResult<()> {
        self.liveness.reset_debounce();
        let bytes = match message {
            Message::Text(t) => t.into_bytes(),
            Message::Binary(b) => b,
            Message::Close(_) => {
                self.unexpected_disconnect(DisconnectReason::Transport).await;
                return Ok(());
            }
            _ => return Ok(()),
        };

        match framer::parse_frame(&bytes) {
            Ok(ParsedFrame::Json(tag, value)) => {
                debug!("<-- JSON (tag {}): {}", tag, value);
                if self.phone_probe_tag.as_deref() == Some(tag.as_str()) {
                    self.phone_probe_tag = None;
                    self.liveness.set_phone_connected(true);
                    self.events.publish(Event::PhoneChange { connected: true });
                    return Ok(());
                }
                self.correlator
                    .deliver(&tag, InboundPayload::Json(value), &self.events);
            }
            Ok(ParsedFrame::Binary(tag, sealed)) => {
                debug!("<-- binary (tag {}), {} bytes", tag, sealed.len());
                self.correlator
                    .deliver(&tag, InboundPayload::Binary(sealed), &self.events);
            }
            Err(e) => {
                error!("failed to parse inbound frame: {}", e);
            }
        }
        self.maintain_phone_probe();
        Ok(())
    }

    async fn on_phone_probe_tick(&mut self) {
        if self.state != ConnectionState::Open {
            return;
        }
        let tag = self.tagger.next_tag(false);
        let frame = framer::frame_json(&tag, &json::array!["admin", "test"]);
        self.send_raw(frame).await;
        self.phone_probe_tag = Some(tag);
        self.liveness.set_phone_connected(false);
        self.events.publish(Event::PhoneChange { connected: false });
    }

    async fn unexpected_disconnect(&mut self, reason: DisconnectReason) {
        let will_reconnect =
            self.options.auto_reconnect.should_reconnect(reason) && self.retry_count < self.options.max_retries;
        self.close_internal(reason, will_reconnect);
        if will_reconnect {
            self.retry_count += 1;
            info!(
                "reconnecting in {}ms (attempt {}/{})",
                self.options.connect_cooldown_ms, self.retry_count, self.options.max_retries
            );
            tokio::time::delay_for(Duration::from_millis(self.options.connect_cooldown_ms)).await;
            self.transition(ConnectionState::Connecting, None);
            if let Err(e) = self.do_connect().await {
                warn!("reconnect attempt failed: {}", e);
                self.close_internal(DisconnectReason::Transport, false);
            }
        }
    }

    fn close_internal(&mut self, reason: DisconnectReason, is_reconnecting: bool) {
        self.ws = None;
        self.liveness.cancel_all();
        self.phone_probe_tag = None;
        self.correlator.fail_all(reason);
        if reason == DisconnectReason::InvalidSession {
            self.auth_info = None;
        }
        self.transition(ConnectionState::Closed, Some(reason));
        self.events.publish(Event::WsClose { reason });
        self.events.publish(Event::Close {
            reason,
            is_reconnecting,
        });
    }
}
