//! Gateway connection: handshake, request correlation, read loop.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use tether_proto::{ConnectParams, ErrorShape, GatewayFrame, RequestFrame, error_codes};

use crate::errors::TransportError;
use crate::subscriptions::{EventHandler, SubscriptionId, SubscriptionTable};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type ReplyTx = oneshot::Sender<Result<Value, TransportError>>;

/// Default time allowed for a request's paired response.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
/// Default time allowed for socket establishment and the handshake ack.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Observable connection lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket.
    Disconnected,
    /// Socket/handshake in progress.
    Connecting,
    /// Handshake acknowledged.
    Connected,
}

/// Settings for one gateway connection.
#[derive(Clone, Debug)]
pub struct ConnectConfig {
    /// WebSocket URL (e.g. `ws://127.0.0.1:9800`).
    pub url: String,
    /// Handshake parameters.
    pub params: ConnectParams,
    /// Per-request response timeout.
    pub request_timeout: Duration,
    /// Socket + handshake timeout.
    pub handshake_timeout: Duration,
}

impl ConnectConfig {
    /// Config with default timeouts.
    pub fn new(url: impl Into<String>, params: ConnectParams) -> Self {
        Self {
            url: url.into(),
            params,
            request_timeout: REQUEST_TIMEOUT,
            handshake_timeout: HANDSHAKE_TIMEOUT,
        }
    }
}

/// Outbound traffic into the connection actor.
enum Command {
    /// Send a request frame and record the reply waiter.
    Request { frame: RequestFrame, reply: ReplyTx },
    /// Drop a pending entry (caller-side timeout).
    Cancel { id: String },
    /// Publish `Connected` after the handshake ack, from inside the actor
    /// so it serializes with the actor's own close handling.
    Promote { reply: oneshot::Sender<()> },
}

/// Handle to a live actor task.
struct ActiveLink {
    cmd_tx: mpsc::Sender<Command>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// One authenticated duplex channel to the gateway.
///
/// The socket and the pending-request table are owned by a single actor
/// task; this handle talks to it over a command channel. All pending
/// requests are rejected with [`TransportError::Closed`] when the socket
/// closes, and a fresh `connect()` starts with an empty table.
pub struct Connection {
    config: ConnectConfig,
    /// Process-unique tag prefixing request ids, so ids stay unique across
    /// reconnects within one process.
    conn_tag: String,
    next_req: AtomicU64,
    state_tx: watch::Sender<ConnectionState>,
    subscriptions: Arc<SubscriptionTable>,
    active: Mutex<Option<ActiveLink>>,
}

impl Connection {
    /// Create a disconnected connection.
    pub fn new(config: ConnectConfig) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let mut conn_tag = uuid::Uuid::new_v4().simple().to_string();
        conn_tag.truncate(8);
        Self {
            config,
            conn_tag,
            next_req: AtomicU64::new(0),
            state_tx,
            subscriptions: Arc::new(SubscriptionTable::default()),
            active: Mutex::new(None),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Watch feed of lifecycle state, so callers reflect
    /// connecting/connected/disconnected without polling.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Establish the socket and perform the versioned handshake.
    ///
    /// Resolves with the handshake ack payload. Fails fast if a connect is
    /// already in flight or the connection is established. On rejection,
    /// socket error, or timeout the state returns to `Disconnected`.
    pub async fn connect(&self) -> Result<Value, TransportError> {
        {
            let mut active = self.active.lock();
            match *self.state_tx.borrow() {
                ConnectionState::Connecting => return Err(TransportError::AlreadyConnecting),
                ConnectionState::Connected => return Err(TransportError::AlreadyConnected),
                ConnectionState::Disconnected => {}
            }
            // A previous actor may have exited on its own; make sure it is gone.
            if let Some(stale) = active.take() {
                stale.cancel.cancel();
            }
            let _ = self.state_tx.send_replace(ConnectionState::Connecting);
        }

        let params = match serde_json::to_value(&self.config.params) {
            Ok(params) => params,
            Err(e) => {
                let _ = self.state_tx.send_replace(ConnectionState::Disconnected);
                return Err(TransportError::Connect(format!("encode connect params: {e}")));
            }
        };

        // One deadline covers socket establishment and the handshake ack.
        let deadline = tokio::time::Instant::now() + self.config.handshake_timeout;
        let timeout_ms = u64::try_from(self.config.handshake_timeout.as_millis()).unwrap_or(u64::MAX);
        let ws = match tokio::time::timeout_at(deadline, connect_async(&self.config.url)).await {
            Err(_) => {
                let _ = self.state_tx.send_replace(ConnectionState::Disconnected);
                return Err(TransportError::ConnectTimeout(timeout_ms));
            }
            Ok(Err(e)) => {
                let _ = self.state_tx.send_replace(ConnectionState::Disconnected);
                return Err(TransportError::Connect(e.to_string()));
            }
            Ok(Ok((ws, _response))) => ws,
        };

        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(connection_loop(
            ws,
            cmd_rx,
            cancel.clone(),
            Arc::clone(&self.subscriptions),
            self.state_tx.clone(),
        ));
        *self.active.lock() = Some(ActiveLink {
            cmd_tx,
            cancel,
            task,
        });

        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        match self
            .request_with_timeout("connect", Some(params), remaining)
            .await
        {
            // The actor publishes Connected, so a socket that dies right
            // after the ack cannot leave a stale Connected state behind its
            // own close handling.
            Ok(payload) => {
                if self.promote().await {
                    debug!(url = %self.config.url, "gateway handshake acknowledged");
                    Ok(payload)
                } else {
                    self.teardown().await;
                    Err(TransportError::Closed)
                }
            }
            Err(e) => {
                self.teardown().await;
                Err(match e {
                    TransportError::Rejected { code, message } => {
                        TransportError::HandshakeRejected { code, message }
                    }
                    TransportError::RequestTimeout { .. } => {
                        TransportError::ConnectTimeout(timeout_ms)
                    }
                    other => other,
                })
            }
        }
    }

    /// Issue an RPC and await its paired response.
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, TransportError> {
        self.request_with_timeout(method, params, self.config.request_timeout)
            .await
    }

    async fn request_with_timeout(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, TransportError> {
        let cmd_tx = self
            .active
            .lock()
            .as_ref()
            .map(|link| link.cmd_tx.clone())
            .ok_or(TransportError::NotConnected)?;

        let seq = self.next_req.fetch_add(1, Ordering::Relaxed) + 1;
        let id = format!("{}-{seq}", self.conn_tag);
        let (reply, rx) = oneshot::channel();
        cmd_tx
            .send(Command::Request {
                frame: RequestFrame {
                    id: id.clone(),
                    method: method.to_owned(),
                    params,
                },
                reply,
            })
            .await
            .map_err(|_| TransportError::NotConnected)?;

        match tokio::time::timeout(timeout, rx).await {
            Err(_) => {
                // Drop the stale table entry; a late response must not leak.
                let _ = cmd_tx.try_send(Command::Cancel { id });
                Err(TransportError::RequestTimeout {
                    method: method.to_owned(),
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                })
            }
            // The actor dropped the waiter: connection closed mid-flight.
            Ok(Err(_)) => Err(TransportError::Closed),
            Ok(Ok(result)) => result,
        }
    }

    /// Register a handler for an event name (`*` for all events).
    pub fn subscribe(&self, event: impl Into<String>, handler: EventHandler) -> SubscriptionId {
        self.subscriptions.add(event, handler)
    }

    /// Remove a subscription.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscriptions.remove(id)
    }

    /// Close the socket and run close handling exactly once.
    pub async fn disconnect(&self) {
        self.teardown().await;
    }

    /// Ask the live actor to publish `Connected`. Returns `false` when the
    /// actor is already gone.
    async fn promote(&self) -> bool {
        let cmd_tx = self.active.lock().as_ref().map(|link| link.cmd_tx.clone());
        let Some(cmd_tx) = cmd_tx else {
            return false;
        };
        let (reply, rx) = oneshot::channel();
        if cmd_tx.send(Command::Promote { reply }).await.is_err() {
            return false;
        }
        rx.await.is_ok()
    }

    async fn teardown(&self) {
        let link = self.active.lock().take();
        if let Some(link) = link {
            link.cancel.cancel();
            let _ = link.task.await;
        }
    }
}

/// Actor loop: owns the socket and the pending-request table.
///
/// All mutation of the table happens here, on one task; callers interact
/// through the command channel only.
async fn connection_loop(
    ws: WsStream,
    mut cmd_rx: mpsc::Receiver<Command>,
    cancel: CancellationToken,
    subscriptions: Arc<SubscriptionTable>,
    state_tx: watch::Sender<ConnectionState>,
) {
    let (mut sink, mut stream) = ws.split();
    let mut pending: HashMap<String, ReplyTx> = HashMap::new();

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            cmd = cmd_rx.recv() => match cmd {
                None => break,
                Some(Command::Cancel { id }) => {
                    let _ = pending.remove(&id);
                }
                Some(Command::Promote { reply }) => {
                    let _ = state_tx.send_replace(ConnectionState::Connected);
                    let _ = reply.send(());
                }
                Some(Command::Request { frame, reply }) => {
                    let json = match serde_json::to_string(&GatewayFrame::Request(frame.clone())) {
                        Ok(json) => json,
                        Err(e) => {
                            let _ = reply.send(Err(TransportError::Connect(format!(
                                "encode frame: {e}"
                            ))));
                            continue;
                        }
                    };
                    let _ = pending.insert(frame.id, reply);
                    if let Err(e) = sink.send(Message::Text(json.into())).await {
                        warn!(error = %e, "socket write failed");
                        break;
                    }
                }
            },
            msg = stream.next() => match msg {
                None | Some(Ok(Message::Close(_))) => break,
                Some(Err(e)) => {
                    warn!(error = %e, "socket read failed");
                    break;
                }
                Some(Ok(Message::Text(text))) => {
                    handle_frame(text.as_str(), &mut pending, &subscriptions);
                }
                // Pings are answered by the protocol layer; other frames
                // carry nothing for us.
                Some(Ok(_)) => {}
            },
        }
    }

    // Close handling: mass-reject pending requests, drop subscriptions,
    // flip the state feed. Runs exactly once per actor.
    for (_, reply) in pending.drain() {
        let _ = reply.send(Err(TransportError::Closed));
    }
    subscriptions.clear();
    let _ = state_tx.send_replace(ConnectionState::Disconnected);
    let _ = sink.close().await;
    debug!("gateway connection closed");
}

fn handle_frame(text: &str, pending: &mut HashMap<String, ReplyTx>, subs: &SubscriptionTable) {
    match serde_json::from_str::<GatewayFrame>(text) {
        Err(e) => debug!(error = %e, "unparseable frame dropped"),
        Ok(GatewayFrame::Response(res)) => match pending.remove(&res.id) {
            // A response for an id we no longer track is dropped, never an error.
            None => trace!(id = %res.id, "response for unknown id dropped"),
            Some(reply) => {
                let result = if res.ok {
                    Ok(res.payload.unwrap_or(Value::Null))
                } else {
                    let err = res
                        .error
                        .unwrap_or_else(|| ErrorShape::new(error_codes::INTERNAL, "missing error body"));
                    Err(TransportError::Rejected {
                        code: err.code,
                        message: err.message,
                    })
                };
                let _ = reply.send(result);
            }
        },
        Ok(GatewayFrame::Event(ev)) => subs.dispatch(&ev),
        // Server-initiated RPC exists in newer protocol revisions; this
        // client surface is caller-initiated only.
        Ok(GatewayFrame::Request(req)) => {
            debug!(method = %req.method, "server-initiated request dropped");
        }
    }
}
