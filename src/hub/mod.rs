//! `SocketHub`: an accepting server that fans reads/writes out to
//! per-client tasks, with groups, broadcast, rate limiting and
//! authentication gating.
//!
//! Connection table (`connections: DashMap<Arc<str>, mpsc::Sender<Packet>>`),
//! a `broadcast::Sender<()>` shutdown signal, and one spawned task per
//! connection, generalized from MQTT packets to opaque `Message`s and
//! from a fixed listener to `start`/`stop`/`restart`.

mod client;
mod error;
mod group;
mod rate_limit;

pub use client::{ClientCounters, ClientId, Message, MessageKind};
pub use error::HubError;
pub use rate_limit::RateLimitConfig;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, info, warn};

use crate::transport::{TcpOptions, TcpTransport, TlsTransport, Transport};
use client::{ClientRecord, OutboundCommand};
use group::GroupRegistry;
use rate_limit::RateLimiter;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);
const READ_BUFFER_SIZE: usize = 4096;

/// TLS material for the accept side.
#[derive(Debug, Clone, Default)]
pub struct HubTlsConfig {
    pub cert_file: String,
    pub key_file: String,
    pub ca_file: Option<String>,
    pub dh_file: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HubConfig {
    pub use_ssl: bool,
    pub tls: Option<HubTlsConfig>,
    pub backlog: u32,
    pub connection_timeout: Duration,
    pub keep_alive: Option<Duration>,
    pub rate_limit: RateLimitConfig,
    pub log_level: LogLevel,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            use_ssl: false,
            tls: None,
            backlog: 1024,
            connection_timeout: Duration::ZERO,
            keep_alive: Some(Duration::from_secs(60)),
            rate_limit: RateLimitConfig::default(),
            log_level: LogLevel::Info,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SocketHubStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub errors: u64,
}

#[derive(Default)]
struct StatsInner {
    total_connections: AtomicU64,
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    errors: AtomicU64,
}

type MessageHandler = Arc<dyn Fn(Message, ClientId) + Send + Sync>;
type ConnectHandler = Arc<dyn Fn(ClientId, SocketAddr) + Send + Sync>;
type DisconnectHandler = Arc<dyn Fn(ClientId, String) + Send + Sync>;
type ErrorHandler = Arc<dyn Fn(String, ClientId) + Send + Sync>;
type Authenticator = Arc<dyn Fn(ClientId, &DashMap<String, String>) -> bool + Send + Sync>;
type LogHandler = Arc<dyn Fn(LogLevel, String) + Send + Sync>;

#[derive(Default)]
struct Handlers {
    on_message: RwLock<Vec<MessageHandler>>,
    on_connect: RwLock<Vec<ConnectHandler>>,
    on_disconnect: RwLock<Vec<DisconnectHandler>>,
    on_error: RwLock<Vec<ErrorHandler>>,
    authenticator: RwLock<Option<Authenticator>>,
    log_handler: RwLock<Option<LogHandler>>,
}

/// Severity for the hub's log-level control, independent of the crate's
/// `tracing` subscriber configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Fatal,
}

struct LoggingState {
    enabled: AtomicBool,
    level: parking_lot::Mutex<LogLevel>,
}

/// An accepting server fanning reads/writes out to per-client tasks.
///
/// Cheaply cloneable: internals live behind `Arc`, so a handle can be
/// captured by handler closures and the accept task alike.
#[derive(Clone)]
pub struct SocketHub {
    inner: Arc<Inner>,
}

struct Inner {
    config: HubConfig,
    clients: DashMap<ClientId, Arc<ClientRecord>>,
    groups: GroupRegistry,
    rate_limiter: RateLimiter,
    handlers: Handlers,
    stats: StatsInner,
    next_id: AtomicU64,
    running: AtomicBool,
    port: AtomicU16,
    shutdown: broadcast::Sender<()>,
    require_auth: AtomicBool,
    logging: LoggingState,
}

impl SocketHub {
    pub fn new(config: HubConfig) -> Self {
        let rate_limiter = RateLimiter::new(config.rate_limit);
        let (shutdown, _) = broadcast::channel(16);
        let logging = LoggingState {
            enabled: AtomicBool::new(true),
            level: parking_lot::Mutex::new(config.log_level),
        };
        Self {
            inner: Arc::new(Inner {
                config,
                clients: DashMap::new(),
                groups: GroupRegistry::default(),
                rate_limiter,
                handlers: Handlers::default(),
                stats: StatsInner::default(),
                next_id: AtomicU64::new(1),
                running: AtomicBool::new(false),
                port: AtomicU16::new(0),
                shutdown,
                require_auth: AtomicBool::new(false),
                logging,
            }),
        }
    }

    // -- lifecycle ---------------------------------------------------

    pub async fn start(&self, port: u16) -> Result<(), HubError> {
        if self.inner.running.swap(true, Ordering::AcqRel) {
            self.inner.running.store(true, Ordering::Release);
            return Err(HubError::AlreadyRunning);
        }

        let listener = match TcpListener::bind(("0.0.0.0", port)).await {
            Ok(l) => l,
            Err(e) => {
                self.log(LogLevel::Error, format!("failed to bind hub listener on port {}: {}", port, e))
                    .await;
                return Err(HubError::BindFailed);
            }
        };
        let bound_port = listener.local_addr().map(|a| a.port()).unwrap_or(port);
        self.inner.port.store(bound_port, Ordering::Release);
        self.log(LogLevel::Info, format!("socket hub listening on port {}", bound_port)).await;

        let tls_acceptor = if self.inner.config.use_ssl {
            let tls = self
                .inner
                .config
                .tls
                .as_ref()
                .ok_or(HubError::TlsConfig)?;
            let server_config = crate::transport::load_server_tls_config(
                &tls.cert_file,
                &tls.key_file,
                tls.ca_file.as_deref(),
            )
            .map_err(|_| HubError::TlsConfig)?;
            Some(tokio_rustls::TlsAcceptor::from(server_config))
        } else {
            None
        };

        let hub = self.clone();
        let mut shutdown_rx = self.inner.shutdown.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    result = shutdown_rx.recv() => {
                        match result {
                            Ok(()) | Err(broadcast::error::RecvError::Closed) => break,
                            Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        }
                    }
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((stream, addr)) => {
                                let hub = hub.clone();
                                let tls_acceptor = tls_acceptor.clone();
                                tokio::spawn(async move {
                                    hub.accept_connection(stream, addr, tls_acceptor).await;
                                });
                            }
                            Err(e) => {
                                hub.log(LogLevel::Warning, format!("accept failed: {}", e)).await;
                                hub.inner.stats.errors.fetch_add(1, Ordering::Relaxed);
                                hub.fire_error(format!("accept failed: {}", e), 0).await;
                            }
                        }
                    }
                }
            }
        });

        let hub = self.clone();
        let mut shutdown_rx = self.inner.shutdown.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                tokio::select! {
                    biased;
                    result = shutdown_rx.recv() => {
                        match result {
                            Ok(()) | Err(broadcast::error::RecvError::Closed) => break,
                            Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        }
                    }
                    _ = ticker.tick() => {
                        hub.sweep_inactive().await;
                    }
                }
            }
        });

        Ok(())
    }

    pub async fn stop(&self) -> Result<(), HubError> {
        if !self.inner.running.swap(false, Ordering::AcqRel) {
            return Err(HubError::NotRunning);
        }
        let ids: Vec<ClientId> = self.inner.clients.iter().map(|e| *e.key()).collect();
        for id in ids {
            self.disconnect(id, "server shutting down").await;
        }
        let _ = self.inner.shutdown.send(());
        Ok(())
    }

    pub async fn restart(&self) -> Result<(), HubError> {
        let port = self.inner.port.load(Ordering::Acquire);
        self.stop().await?;
        self.start(port).await
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// The port actually bound by `start`, useful when it was called with
    /// `0` to request an ephemeral port.
    pub fn local_port(&self) -> u16 {
        self.inner.port.load(Ordering::Acquire)
    }

    // -- accept / per-client loop -------------------------------------

    async fn accept_connection(
        &self,
        stream: TcpStream,
        addr: SocketAddr,
        tls_acceptor: Option<tokio_rustls::TlsAcceptor>,
    ) {
        if self.inner.config.rate_limit.enabled
            && !self.inner.rate_limiter.try_acquire_connection(addr.ip())
        {
            self.log(LogLevel::Debug, format!("rejecting {} due to connection rate limit", addr))
                .await;
            return;
        }

        let tcp_options = TcpOptions {
            nodelay: true,
            keepalive: self.inner.config.keep_alive,
        };

        let transport: Box<dyn Transport> = if let Some(acceptor) = tls_acceptor {
            match TlsTransport::from_accepted(stream, tcp_options, &acceptor).await {
                Ok(t) => Box::new(t),
                Err(_) => {
                    self.log(LogLevel::Warning, format!("tls handshake failed for {}", addr)).await;
                    self.inner.rate_limiter.release_connection(addr.ip());
                    return;
                }
            }
        } else {
            match TcpTransport::from_stream(stream, tcp_options) {
                Ok(t) => Box::new(t),
                Err(e) => {
                    self.log(LogLevel::Warning, format!("failed to configure tcp stream for {}: {}", addr, e))
                        .await;
                    self.inner.rate_limiter.release_connection(addr.ip());
                    return;
                }
            }
        };

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (outbound_tx, outbound_rx) = tokio::sync::mpsc::channel(256);
        let record = Arc::new(ClientRecord::new(id, addr, outbound_tx));
        self.inner.clients.insert(id, record.clone());
        self.inner.stats.total_connections.fetch_add(1, Ordering::Relaxed);

        self.fire_connect(id, addr).await;

        self.run_client(id, addr, transport, outbound_rx).await;
    }

    async fn run_client(
        &self,
        id: ClientId,
        addr: SocketAddr,
        mut transport: Box<dyn Transport>,
        mut outbound_rx: tokio::sync::mpsc::Receiver<OutboundCommand>,
    ) {
        let mut scratch = vec![0u8; READ_BUFFER_SIZE];
        let disconnect_reason;

        loop {
            tokio::select! {
                read = transport.read(&mut scratch) => {
                    match read {
                        Ok(0) => {
                            disconnect_reason = "connection closed by peer".to_string();
                            break;
                        }
                        Ok(n) => {
                            self.handle_inbound(id, addr, &scratch[..n]).await;
                        }
                        Err(_) => {
                            disconnect_reason = "connection closed by peer".to_string();
                            break;
                        }
                    }
                }
                cmd = outbound_rx.recv() => {
                    match cmd {
                        Some(OutboundCommand::Send(msg)) => {
                            if transport.write(&msg.payload).await.is_err() {
                                self.inner.stats.errors.fetch_add(1, Ordering::Relaxed);
                                self.fire_error("write failed".to_string(), id).await;
                            } else {
                                self.inner.stats.messages_sent.fetch_add(1, Ordering::Relaxed);
                                self.inner.stats.bytes_sent.fetch_add(msg.payload.len() as u64, Ordering::Relaxed);
                            }
                        }
                        Some(OutboundCommand::Close(reason)) => {
                            disconnect_reason = reason;
                            break;
                        }
                        None => {
                            disconnect_reason = "connection closed by peer".to_string();
                            break;
                        }
                    }
                }
            }
        }

        transport.close().await;
        self.finish_disconnect(id, addr, disconnect_reason).await;
    }

    async fn handle_inbound(&self, id: ClientId, addr: SocketAddr, bytes: &[u8]) {
        let Some(record) = self.inner.clients.get(&id).map(|e| e.clone()) else {
            return;
        };
        record.touch();
        record.counters.received.fetch_add(1, Ordering::Relaxed);
        record
            .counters
            .bytes_received
            .fetch_add(bytes.len() as u64, Ordering::Relaxed);
        self.inner.stats.messages_received.fetch_add(1, Ordering::Relaxed);
        self.inner
            .stats
            .bytes_received
            .fetch_add(bytes.len() as u64, Ordering::Relaxed);

        if self.inner.config.rate_limit.enabled
            && !self.inner.rate_limiter.can_send_message(addr.ip())
        {
            self.log(LogLevel::Debug, format!("dropping message from {} due to message rate limit", addr))
                .await;
            return;
        }

        if self.inner.require_auth.load(Ordering::Acquire) && !record.is_authenticated() {
            self.authenticate(id).await;
        }

        let msg = Message::text(bytes.to_vec(), id);
        let handlers = self.inner.handlers.on_message.read().await.clone();
        for handler in handlers {
            let msg = msg.clone();
            tokio::spawn(async move {
                handler(msg, id);
            });
        }
    }

    async fn finish_disconnect(&self, id: ClientId, addr: SocketAddr, reason: String) {
        self.inner.clients.remove(&id);
        self.inner.groups.remove_from_all(id);
        if self.inner.config.rate_limit.enabled {
            self.inner.rate_limiter.release_connection(addr.ip());
        }
        self.fire_disconnect(id, reason).await;
    }

    async fn sweep_inactive(&self) {
        let timeout = self.inner.config.connection_timeout;
        if timeout.is_zero() {
            return;
        }
        let now = Instant::now();
        let stale: Vec<ClientId> = self
            .inner
            .clients
            .iter()
            .filter(|e| now.duration_since(*e.value().last_activity.lock()) > timeout)
            .map(|e| *e.key())
            .collect();
        for id in stale {
            self.disconnect(id, "connection timeout").await;
        }
    }

    // -- messaging -----------------------------------------------------

    pub async fn send_to(&self, id: ClientId, message: Message) -> Result<(), HubError> {
        let record = self
            .inner
            .clients
            .get(&id)
            .map(|e| e.clone())
            .ok_or(HubError::UnknownClient)?;
        record
            .outbound
            .send(OutboundCommand::Send(message))
            .await
            .map_err(|_| HubError::UnknownClient)
    }

    pub async fn broadcast(&self, message: Message) {
        let snapshot: Vec<Arc<ClientRecord>> =
            self.inner.clients.iter().map(|e| e.value().clone()).collect();
        let len = message.payload.len() as u64;
        let mut sent = 0u64;
        for record in snapshot {
            if record
                .outbound
                .send(OutboundCommand::Send(message.clone()))
                .await
                .is_err()
            {
                self.fire_error("broadcast send failed".to_string(), record.id).await;
            } else {
                sent += 1;
            }
        }
        self.inner.stats.messages_sent.fetch_add(sent, Ordering::Relaxed);
        self.inner.stats.bytes_sent.fetch_add(len * sent, Ordering::Relaxed);
    }

    pub async fn broadcast_to_group(&self, name: &str, message: Message) {
        for id in self.inner.groups.members(name) {
            let _ = self.send_to(id, message.clone()).await;
        }
    }

    pub async fn disconnect(&self, id: ClientId, reason: &str) {
        if let Some(record) = self.inner.clients.get(&id) {
            let _ = record
                .outbound
                .send(OutboundCommand::Close(reason.to_string()))
                .await;
        }
    }

    // -- groups ----------------------------------------------------------

    pub fn create_group(&self, name: &str) {
        self.inner.groups.create(name);
    }

    pub fn add_to_group(&self, id: ClientId, name: &str) {
        self.inner.groups.add(name, id);
    }

    pub fn remove_from_group(&self, id: ClientId, name: &str) {
        self.inner.groups.remove(name, id);
    }

    pub fn list_groups(&self) -> Vec<String> {
        self.inner.groups.names()
    }

    pub fn clients_in_group(&self, name: &str) -> Vec<ClientId> {
        self.inner.groups.members(name)
    }

    // -- auth / metadata ---------------------------------------------------

    pub fn require_authentication(&self, required: bool) {
        self.inner.require_auth.store(required, Ordering::Release);
    }

    pub async fn set_authenticator<F>(&self, f: F)
    where
        F: Fn(ClientId, &DashMap<String, String>) -> bool + Send + Sync + 'static,
    {
        *self.inner.handlers.authenticator.write().await = Some(Arc::new(f));
    }

    pub async fn authenticate(&self, id: ClientId) -> bool {
        let Some(record) = self.inner.clients.get(&id).map(|e| e.clone()) else {
            return false;
        };
        if !self.inner.require_auth.load(Ordering::Acquire) {
            record.set_authenticated(true);
            return true;
        }
        let authenticator = self.inner.handlers.authenticator.read().await.clone();
        let ok = match authenticator {
            Some(f) => f(id, &record.metadata),
            None => false,
        };
        record.set_authenticated(ok);
        ok
    }

    pub fn is_authenticated(&self, id: ClientId) -> bool {
        self.inner
            .clients
            .get(&id)
            .map(|r| r.is_authenticated())
            .unwrap_or(false)
    }

    pub fn set_client_metadata(&self, id: ClientId, key: &str, value: &str) {
        if let Some(record) = self.inner.clients.get(&id) {
            record.metadata.insert(key.to_string(), value.to_string());
        }
    }

    pub fn get_client_metadata(&self, id: ClientId, key: &str) -> Option<String> {
        self.inner
            .clients
            .get(&id)
            .and_then(|r| r.metadata.get(key).map(|v| v.clone()))
    }

    // -- handlers ----------------------------------------------------------

    pub async fn on_message<F>(&self, f: F)
    where
        F: Fn(Message, ClientId) + Send + Sync + 'static,
    {
        self.inner.handlers.on_message.write().await.push(Arc::new(f));
    }

    pub async fn on_connect<F>(&self, f: F)
    where
        F: Fn(ClientId, SocketAddr) + Send + Sync + 'static,
    {
        self.inner.handlers.on_connect.write().await.push(Arc::new(f));
    }

    pub async fn on_disconnect<F>(&self, f: F)
    where
        F: Fn(ClientId, String) + Send + Sync + 'static,
    {
        self.inner.handlers.on_disconnect.write().await.push(Arc::new(f));
    }

    pub async fn on_error<F>(&self, f: F)
    where
        F: Fn(String, ClientId) + Send + Sync + 'static,
    {
        self.inner.handlers.on_error.write().await.push(Arc::new(f));
    }

    async fn fire_connect(&self, id: ClientId, addr: SocketAddr) {
        for h in self.inner.handlers.on_connect.read().await.iter() {
            h(id, addr);
        }
    }

    async fn fire_disconnect(&self, id: ClientId, reason: String) {
        for h in self.inner.handlers.on_disconnect.read().await.iter() {
            h(id, reason.clone());
        }
    }

    async fn fire_error(&self, message: String, id: ClientId) {
        for h in self.inner.handlers.on_error.read().await.iter() {
            h(message.clone(), id);
        }
    }

    // -- log-level control ------------------------------------------------

    /// Turns the hub's own event logging on or off and sets the minimum
    /// severity that gets through, independent of the `tracing` subscriber
    /// the host process installed.
    pub fn enable_logging(&self, enable: bool, level: LogLevel) {
        self.inner.logging.enabled.store(enable, Ordering::Release);
        *self.inner.logging.level.lock() = level;
    }

    /// Registers a callback that receives every hub log line at or above
    /// the configured level, in addition to the `tracing` emission.
    pub async fn set_log_handler<F>(&self, f: F)
    where
        F: Fn(LogLevel, String) + Send + Sync + 'static,
    {
        *self.inner.handlers.log_handler.write().await = Some(Arc::new(f));
    }

    async fn log(&self, level: LogLevel, message: String) {
        if !self.inner.logging.enabled.load(Ordering::Acquire) || level < *self.inner.logging.level.lock() {
            return;
        }
        match level {
            LogLevel::Debug => debug!("{}", message),
            LogLevel::Info => info!("{}", message),
            LogLevel::Warning => warn!("{}", message),
            LogLevel::Error | LogLevel::Fatal => error!("{}", message),
        }
        if let Some(handler) = self.inner.handlers.log_handler.read().await.clone() {
            handler(level, message);
        }
    }

    // -- introspection / stats ----------------------------------------------

    pub fn list_clients(&self) -> Vec<ClientId> {
        self.inner.clients.iter().map(|e| *e.key()).collect()
    }

    pub fn stats(&self) -> SocketHubStats {
        SocketHubStats {
            total_connections: self.inner.stats.total_connections.load(Ordering::Relaxed),
            active_connections: self.inner.clients.len() as u64,
            messages_sent: self.inner.stats.messages_sent.load(Ordering::Relaxed),
            messages_received: self.inner.stats.messages_received.load(Ordering::Relaxed),
            bytes_sent: self.inner.stats.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.inner.stats.bytes_received.load(Ordering::Relaxed),
            errors: self.inner.stats.errors.load(Ordering::Relaxed),
        }
    }
}

