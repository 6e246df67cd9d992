//! The embeddable client facade.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use tether_chat::{ChatError, ChatRunner, DeltaSink, RunOutcome, SlotLease, SlotPool};
use tether_gateway::{AgentOps, CliTransport, Gateway, GatewayError, GatewayMode, SocketOps};
use tether_proto::ConnectParams;
use tether_transport::{ConnectConfig, Connection, ConnectionState};

use crate::config::TetherConfig;

/// Client identity sent in the connect handshake.
const CLIENT_ID: &str = "tether-editor";

/// Editor-side client: one gateway connection, a bounded set of chat
/// surfaces on top of it.
pub struct TetherClient {
    config: TetherConfig,
    conn: Arc<Connection>,
    gateway: Arc<Gateway>,
    pool: Arc<SlotPool>,
}

impl std::fmt::Debug for TetherClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TetherClient").finish_non_exhaustive()
    }
}

impl TetherClient {
    /// Connect to the gateway and assemble the operation surface.
    ///
    /// With fallback enabled, the CLI is located up front so a later
    /// demotion never has to search the filesystem mid-operation.
    pub async fn connect(config: TetherConfig) -> Result<Self, ChatError> {
        crate::logging::init_subscriber(&config.log_level);

        let mut params = ConnectParams::editor(CLIENT_ID, env!("CARGO_PKG_VERSION"));
        if let Some(token) = &config.token {
            params = params.with_token(token.clone());
        }
        let mut connect = ConnectConfig::new(&config.gateway_url, params);
        connect.request_timeout = Duration::from_secs(config.request_timeout_secs);
        connect.handshake_timeout = Duration::from_secs(config.handshake_timeout_secs);

        let conn = Arc::new(Connection::new(connect));
        let _ = conn.connect().await.map_err(GatewayError::from)?;
        info!(url = %config.gateway_url, "connected to gateway");

        let primary: Arc<dyn AgentOps> = Arc::new(SocketOps::new(Arc::clone(&conn)));
        let fallback: Option<Arc<dyn AgentOps>> = if config.fallback_enabled {
            match CliTransport::locate(config.cli_path.as_deref()) {
                Some(cli) => {
                    info!(program = %cli.program().display(), "fallback CLI available");
                    Some(Arc::new(cli))
                }
                None => {
                    warn!("fallback CLI not found; running without fallback");
                    None
                }
            }
        } else {
            None
        };

        let gateway = Arc::new(Gateway::new(primary, fallback));
        let pool = SlotPool::new(config.pool_capacity);
        Ok(Self {
            config,
            conn,
            gateway,
            pool,
        })
    }

    /// The active configuration.
    pub fn config(&self) -> &TetherConfig {
        &self.config
    }

    /// The gateway operation surface. Implements [`AgentOps`], so session
    /// listing, history, and settings calls go through here directly.
    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.gateway
    }

    /// Which transport currently serves operations.
    pub fn mode(&self) -> GatewayMode {
        self.gateway.mode()
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.conn.state()
    }

    /// Connection state feed, so embedders reflect connecting/connected/
    /// disconnected without polling.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.conn.watch_state()
    }

    /// Open a chat surface for a session, claiming a pool slot.
    ///
    /// Fails closed with [`ChatError::PoolExhausted`] when every slot is
    /// taken. The slot is returned when the surface drops.
    pub fn open_surface(&self, session_key: impl Into<String>) -> Result<ChatSurface, ChatError> {
        let lease = self.pool.acquire()?;
        let ops: Arc<dyn AgentOps> = Arc::clone(&self.gateway) as Arc<dyn AgentOps>;
        let runner = ChatRunner::new(ops, session_key)
            .with_idle_timeout(Duration::from_secs(self.config.idle_timeout_secs));
        Ok(ChatSurface { lease, runner })
    }

    /// Number of surfaces currently open.
    pub fn surfaces_open(&self) -> usize {
        self.pool.in_use()
    }

    /// Close the gateway connection.
    pub async fn disconnect(&self) {
        self.conn.disconnect().await;
    }
}

/// One chat session surface: a run tracker bound to a pool slot.
pub struct ChatSurface {
    lease: SlotLease,
    runner: ChatRunner,
}

impl std::fmt::Debug for ChatSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatSurface").finish_non_exhaustive()
    }
}

impl ChatSurface {
    /// The pool slot backing this surface, `1..=capacity`.
    pub fn slot(&self) -> usize {
        self.lease.number()
    }

    /// The session this surface drives.
    pub fn session_key(&self) -> &str {
        self.runner.session_key()
    }

    /// Whether a run is in flight.
    pub fn is_running(&self) -> bool {
        self.runner.is_running()
    }

    /// Send a message and stream the reply into the sink; resolves with the
    /// run's terminal outcome.
    pub async fn send(&self, message: &str, sink: DeltaSink) -> Result<RunOutcome, ChatError> {
        self.runner.run(message, sink).await
    }

    /// Ask the gateway to stop the in-flight run.
    pub async fn abort(&self) -> Result<(), ChatError> {
        self.runner.abort().await
    }
}
