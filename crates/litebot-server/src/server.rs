use crate::config::ServerEntry;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use litebot_commands::{OutboundMessage, ServerLink};
use litebot_protocol::{QueryClient, QueryError, QueryResponse, RconClient, RconError};
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

/// Sender half of an attached bridge session.
pub type BridgeSender = mpsc::UnboundedSender<OutboundMessage>;

struct BridgeHandle {
    generation: u64,
    tx: BridgeSender,
    replaced: oneshot::Sender<()>,
}

/// Returned by [`MinecraftServer::attach`].
pub struct Attachment {
    pub generation: u64,
    /// Resolves once a newer session takes over this server's bridge.
    pub replaced: oneshot::Receiver<()>,
}

/// One configured Minecraft server. Lives for the whole process; only its
/// bridge handle comes and goes.
pub struct MinecraftServer {
    name: String,
    operator: bool,
    bridge_channel_id: u64,
    ip: IpAddr,
    query_port: u16,
    query_timeout: Duration,
    rcon: tokio::sync::Mutex<RconClient>,
    bridge: Mutex<Option<BridgeHandle>>,
    next_generation: AtomicU64,
}

impl MinecraftServer {
    pub fn new(entry: &ServerEntry) -> Self {
        let rcon = RconClient::new(entry.ip.to_string(), entry.rcon_port, &entry.rcon_password)
            .with_tls(entry.rcon_tls)
            .with_command_delay(entry.rcon_command_delay());
        Self {
            name: entry.name.clone(),
            operator: entry.operator,
            bridge_channel_id: entry.bridge_channel_id,
            ip: entry.ip,
            query_port: entry.query_port,
            query_timeout: entry.query_timeout(),
            rcon: tokio::sync::Mutex::new(rcon),
            bridge: Mutex::new(None),
            next_generation: AtomicU64::new(1),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_operator(&self) -> bool {
        self.operator
    }

    pub fn bridge_channel_id(&self) -> u64 {
        self.bridge_channel_id
    }

    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    /// Install a bridge session, replacing any previous one. The previous
    /// session's `replaced` signal fires so its reader stops dispatching.
    pub fn attach(&self, tx: BridgeSender) -> Attachment {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let (replaced_tx, replaced) = oneshot::channel();
        let previous = self
            .bridge
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(BridgeHandle {
                generation,
                tx,
                replaced: replaced_tx,
            });
        if let Some(previous) = previous {
            info!(
                "{}: bridge session {} replaced by {}",
                self.name, previous.generation, generation
            );
            let _ = previous.replaced.send(());
        }
        Attachment {
            generation,
            replaced,
        }
    }

    /// Drop the bridge handle if it still belongs to `generation`.
    pub fn detach(&self, generation: u64) -> bool {
        let mut bridge = self.bridge.lock().unwrap_or_else(PoisonError::into_inner);
        match bridge.as_ref() {
            Some(handle) if handle.generation == generation => {
                *bridge = None;
                true
            }
            _ => false,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.bridge
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.tx.is_closed())
    }

    /// Queue a frame for the attached bridge; dropped when none is attached.
    pub fn send_message(&self, message: OutboundMessage) -> bool {
        let bridge = self.bridge.lock().unwrap_or_else(PoisonError::into_inner);
        match bridge.as_ref() {
            Some(handle) => handle.tx.send(message).is_ok(),
            None => {
                debug!("{}: bridge not connected, dropping message", self.name);
                false
            }
        }
    }

    /// Run an RCON command, logging in first if no session is open.
    ///
    /// Commands are serialized per server. A failed command closes the
    /// session; the next call reconnects.
    pub async fn rcon_command(&self, command: &str) -> Result<String, RconError> {
        let mut rcon = self.rcon.lock().await;
        if !rcon.is_connected() {
            rcon.connect().await?;
        }
        rcon.command(command).await
    }

    pub async fn rcon_disconnect(&self) {
        self.rcon.lock().await.disconnect().await;
    }

    /// Query status; any failure reads as offline.
    pub async fn status(&self) -> QueryResponse {
        match self.query().await {
            Ok(response) => response,
            Err(e) => {
                debug!("{}: query failed: {}", self.name, e);
                QueryResponse::offline()
            }
        }
    }

    async fn query(&self) -> Result<QueryResponse, QueryError> {
        let host = self.ip.to_string();
        let mut client = QueryClient::connect(&host, self.query_port, self.query_timeout).await?;
        client.handshake().await?;
        client.read_query().await
    }
}

impl std::fmt::Debug for MinecraftServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MinecraftServer")
            .field("name", &self.name)
            .field("operator", &self.operator)
            .field("bridge_channel_id", &self.bridge_channel_id)
            .field("ip", &self.ip)
            .field("query_port", &self.query_port)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl ServerLink for MinecraftServer {
    fn name(&self) -> &str {
        &self.name
    }

    fn send(&self, message: OutboundMessage) -> bool {
        self.send_message(message)
    }

    fn rcon<'a>(&'a self, command: &'a str) -> BoxFuture<'a, anyhow::Result<String>> {
        async move { anyhow::Ok(self.rcon_command(command).await?) }.boxed()
    }
}
