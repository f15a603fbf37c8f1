//! `TcpClient`: a reconnecting outbound TCP/TLS client.
//!
//! Follows the hub's per-connection actor idiom: one task owns the
//! `Transport` exclusively, alternating via `tokio::select!` between
//! reading and draining a command channel carrying sends and explicit
//! receive requests, so callers never race the continuous receive loop
//! for the socket. Explicit `receive`/`receive_until` calls are served
//! from the same inbound byte stream the continuous loop observes,
//! rather than issuing a second, competing socket read.

mod config;
mod error;
mod stats;

pub use config::{ConnectionConfig, TlsClientConfig};
pub use error::TcpClientError;
pub use stats::ConnectionStats;

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::timer::BackoffCalculator;
use crate::transport::{TcpOptions, TcpTransport, TlsTransport, Transport};
use stats::StatsInner;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

enum IoCommand {
    Send(Bytes, oneshot::Sender<bool>),
    ReceiveExact(usize, oneshot::Sender<Vec<u8>>),
    ReceiveUntil(u8, oneshot::Sender<Vec<u8>>),
    CancelReceive,
    Close,
}

enum Pending {
    Exact(usize, oneshot::Sender<Vec<u8>>),
    Until(u8, oneshot::Sender<Vec<u8>>),
}

/// Drains as much of `acc` as the pending request needs. Leaves `pending`
/// set if there isn't enough data yet.
fn try_satisfy(acc: &mut Vec<u8>, pending: &mut Option<Pending>) {
    let ready = match pending {
        Some(Pending::Exact(n, _)) => acc.len() >= *n,
        Some(Pending::Until(delim, _)) => acc.contains(delim),
        None => return,
    };
    if !ready {
        return;
    }
    match pending.take() {
        Some(Pending::Exact(n, resp)) => {
            let rest = acc.split_off(n);
            let got = std::mem::replace(acc, rest);
            let _ = resp.send(got);
        }
        Some(Pending::Until(delim, resp)) => {
            let pos = acc.iter().position(|&b| b == delim).unwrap();
            let rest = acc.split_off(pos + 1);
            let got = std::mem::replace(acc, rest);
            let _ = resp.send(got);
        }
        None => {}
    }
}

type VoidHandler = Arc<dyn Fn() + Send + Sync>;
type DataHandler = Arc<dyn Fn(&[u8]) + Send + Sync>;
type ErrorHandler = Arc<dyn Fn(&str) + Send + Sync>;
type StateHandler = Arc<dyn Fn(ConnectionState, ConnectionState) + Send + Sync>;

#[derive(Default)]
struct Handlers {
    on_connecting: RwLock<Vec<VoidHandler>>,
    on_connected: RwLock<Vec<VoidHandler>>,
    on_disconnected: RwLock<Vec<VoidHandler>>,
    on_data_received: RwLock<Vec<DataHandler>>,
    on_error: RwLock<Vec<ErrorHandler>>,
    on_state_changed: RwLock<Vec<StateHandler>>,
    on_heartbeat: RwLock<Vec<VoidHandler>>,
}

struct IoHandle {
    tx: mpsc::Sender<IoCommand>,
    generation: u64,
}

struct Target {
    host: String,
    port: u16,
}

/// A reconnecting outbound TCP/TLS client.
#[derive(Clone)]
pub struct TcpClient {
    inner: Arc<Inner>,
}

struct Inner {
    config: RwLock<ConnectionConfig>,
    state: RwLock<ConnectionState>,
    target: RwLock<Option<Target>>,
    io: RwLock<Option<IoHandle>>,
    generation: AtomicU64,
    reconnect_remaining: AtomicU32,
    last_error: Mutex<Option<String>>,
    stats: StatsInner,
    properties: DashMap<String, String>,
    handlers: Handlers,
    heartbeat: Mutex<Option<(Duration, Bytes)>>,
}

impl TcpClient {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config: RwLock::new(config),
                state: RwLock::new(ConnectionState::Disconnected),
                target: RwLock::new(None),
                io: RwLock::new(None),
                generation: AtomicU64::new(0),
                reconnect_remaining: AtomicU32::new(0),
                last_error: Mutex::new(None),
                stats: StatsInner::default(),
                properties: DashMap::new(),
                handlers: Handlers::default(),
                heartbeat: Mutex::new(None),
            }),
        }
    }

    // -- connection lifecycle -------------------------------------------

    // Returns a manually boxed future (rather than `async fn`) because the
    // reconnect path spawns a task that calls back into `connect`, which
    // creates a self-referential opaque type that rustc cannot analyze for
    // auto-trait (Send) purposes. Boxing breaks that cycle without changing
    // behavior or the call-site `.await` usage.
    pub fn connect<'a>(
        &'a self,
        host: &'a str,
        port: u16,
        timeout: Option<Duration>,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
        Box::pin(async move {
            if matches!(
                *self.inner.state.read(),
                ConnectionState::Connected | ConnectionState::Connecting
            ) {
                return false;
            }

            self.change_state(ConnectionState::Connecting);
            self.fire_void(&self.inner.handlers.on_connecting);
            self.inner
                .stats
                .connection_attempts
                .fetch_add(1, Ordering::Relaxed);
            *self.inner.target.write() = Some(Target {
                host: host.to_string(),
                port,
            });

            let cfg = self.inner.config.read().clone();
            let connect_timeout = timeout.unwrap_or(cfg.connect_timeout);

            let result =
                tokio::time::timeout(connect_timeout, self.open_transport(host, port, &cfg)).await;

            let transport = match result {
                Ok(Ok(t)) => t,
                Ok(Err(e)) => {
                    self.fail_connect(format!("connect failed: {}", e));
                    return false;
                }
                Err(_) => {
                    self.fail_connect("connect timed out".to_string());
                    return false;
                }
            };

            let generation = self.inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
            let (tx, rx) = mpsc::channel(64);
            *self.inner.io.write() = Some(IoHandle { tx, generation });
            self.inner
                .reconnect_remaining
                .store(cfg.reconnect_attempts, Ordering::Relaxed);

            let buffer_size = cfg.receive_buffer_size;
            let client = self.clone();
            tokio::spawn(async move {
                client.run_io(transport, rx, generation, buffer_size).await;
            });

            self.inner.stats.record_connected();
            self.change_state(ConnectionState::Connected);
            self.fire_void(&self.inner.handlers.on_connected);
            self.maybe_start_heartbeat(generation);
            true
        })
    }

    pub async fn connect_async(&self, host: &str, port: u16) -> bool {
        let timeout = self.inner.config.read().connect_timeout;
        self.connect(host, port, Some(timeout)).await
    }

    async fn open_transport(
        &self,
        host: &str,
        port: u16,
        cfg: &ConnectionConfig,
    ) -> Result<Box<dyn Transport>, TcpClientError> {
        let tcp_options = TcpOptions {
            nodelay: true,
            keepalive: cfg.keep_alive.then_some(Duration::from_secs(60)),
        };
        if cfg.use_ssl {
            let client_config = crate::transport::load_client_tls_config(
                cfg.tls.ca_file.as_deref(),
                cfg.tls.client_cert_file.as_deref(),
                cfg.tls.client_key_file.as_deref(),
                cfg.tls.verify_certificate,
            )
            .map_err(|_| TcpClientError::TlsConfig)?;
            let mut transport = TlsTransport::new_client(tcp_options, client_config);
            transport
                .connect(host, port)
                .await
                .map_err(|_| TcpClientError::ConnectFailed)?;
            Ok(Box::new(transport))
        } else {
            let mut transport = TcpTransport::new(tcp_options);
            transport
                .connect(host, port)
                .await
                .map_err(|_| TcpClientError::ConnectFailed)?;
            Ok(Box::new(transport))
        }
    }

    fn fail_connect(&self, error: String) {
        self.inner
            .stats
            .failed_connections
            .fetch_add(1, Ordering::Relaxed);
        *self.inner.last_error.lock() = Some(error.clone());
        self.change_state(ConnectionState::Disconnected);
        self.fire_error(&error);
    }

    /// Idempotent: a second call while already `Disconnected` is a no-op.
    pub async fn disconnect(&self) {
        if *self.inner.state.read() == ConnectionState::Disconnected {
            return;
        }
        if let Some(io) = self.inner.io.write().take() {
            let _ = io.tx.send(IoCommand::Close).await;
        }
        self.inner.generation.fetch_add(1, Ordering::AcqRel);
        self.change_state(ConnectionState::Disconnected);
        self.fire_void(&self.inner.handlers.on_disconnected);
    }

    fn is_current(&self, generation: u64) -> bool {
        self.inner
            .io
            .read()
            .as_ref()
            .map(|io| io.generation == generation)
            .unwrap_or(false)
    }

    /// Invoked by the io task when the socket closes unexpectedly.
    async fn handle_io_error(&self, generation: u64, reason: String) {
        if !self.is_current(generation) {
            return;
        }
        *self.inner.io.write() = None;
        *self.inner.last_error.lock() = Some(reason.clone());
        self.fire_error(&reason);
        self.change_state(ConnectionState::Disconnected);
        self.fire_void(&self.inner.handlers.on_disconnected);

        let auto_reconnect = self.inner.config.read().auto_reconnect;
        let remaining = self.inner.reconnect_remaining.load(Ordering::Relaxed);
        if auto_reconnect && remaining > 0 {
            self.inner.reconnect_remaining.fetch_sub(1, Ordering::Relaxed);
            self.schedule_reconnect(generation).await;
        } else if auto_reconnect {
            self.change_state(ConnectionState::Failed);
        }
    }

    async fn schedule_reconnect(&self, generation: u64) {
        self.change_state(ConnectionState::Reconnecting);
        let delay = {
            let cfg = self.inner.config.read();
            let mut backoff = BackoffCalculator::new(cfg.backoff);
            let attempts_used = cfg
                .reconnect_attempts
                .saturating_sub(self.inner.reconnect_remaining.load(Ordering::Relaxed));
            for _ in 0..attempts_used {
                backoff.next_delay();
            }
            backoff.next_delay()
        };
        let client = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if client.inner.generation.load(Ordering::Acquire) != generation {
                return;
            }
            let target = client
                .inner
                .target
                .read()
                .as_ref()
                .map(|t| (t.host.clone(), t.port));
            if let Some((host, port)) = target {
                client.connect(&host, port, None).await;
            }
        });
    }

    pub fn configure_reconnection(&self, attempts: u32, delay: Duration) {
        let mut cfg = self.inner.config.write();
        cfg.reconnect_attempts = attempts;
        cfg.reconnect_delay = delay;
        cfg.backoff.base = delay;
    }

    pub fn set_heartbeat_interval(&self, interval: Duration, payload: Option<Bytes>) {
        let data = payload.unwrap_or_else(|| Bytes::from_static(b"PING"));
        *self.inner.heartbeat.lock() = if interval.is_zero() {
            None
        } else {
            Some((interval, data))
        };
        if *self.inner.state.read() == ConnectionState::Connected {
            if let Some(io) = self.inner.io.read().as_ref() {
                self.maybe_start_heartbeat(io.generation);
            }
        }
    }

    fn maybe_start_heartbeat(&self, generation: u64) {
        let Some((interval, payload)) = self.inner.heartbeat.lock().clone() else {
            return;
        };
        let client = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if !client.is_current(generation) {
                    break;
                }
                if !client.send(payload.clone()).await {
                    break;
                }
                client.fire_void(&client.inner.handlers.on_heartbeat);
            }
        });
    }

    // -- io actor ----------------------------------------------------------

    async fn run_io(
        &self,
        mut transport: Box<dyn Transport>,
        mut rx: mpsc::Receiver<IoCommand>,
        generation: u64,
        buffer_size: usize,
    ) {
        let mut scratch = vec![0u8; buffer_size.max(256)];
        let mut acc: Vec<u8> = Vec::new();
        let mut pending: Option<Pending> = None;
        let reason;

        loop {
            tokio::select! {
                cmd = rx.recv() => {
                    match cmd {
                        Some(IoCommand::Send(data, resp)) => {
                            let ok = transport.write(&data).await.is_ok();
                            if ok {
                                self.inner.stats.total_bytes_sent.fetch_add(data.len() as u64, Ordering::Relaxed);
                                self.inner.stats.touch_activity();
                            }
                            let _ = resp.send(ok);
                        }
                        Some(IoCommand::ReceiveExact(n, resp)) => {
                            pending = Some(Pending::Exact(n, resp));
                            try_satisfy(&mut acc, &mut pending);
                        }
                        Some(IoCommand::ReceiveUntil(delim, resp)) => {
                            pending = Some(Pending::Until(delim, resp));
                            try_satisfy(&mut acc, &mut pending);
                        }
                        Some(IoCommand::CancelReceive) => {
                            pending = None;
                        }
                        Some(IoCommand::Close) | None => {
                            reason = None;
                            break;
                        }
                    }
                }
                read = transport.read(&mut scratch) => {
                    match read {
                        Ok(0) => {
                            reason = Some("connection closed by peer".to_string());
                            break;
                        }
                        Ok(n) => {
                            self.inner.stats.total_bytes_received.fetch_add(n as u64, Ordering::Relaxed);
                            self.inner.stats.touch_activity();
                            self.fire_data(&scratch[..n]);
                            acc.extend_from_slice(&scratch[..n]);
                            try_satisfy(&mut acc, &mut pending);
                        }
                        Err(_) => {
                            reason = Some("connection read error".to_string());
                            break;
                        }
                    }
                }
            }
        }

        transport.close().await;
        debug!("tcp client io task for generation {} ended", generation);
        if let Some(reason) = reason {
            self.handle_io_error(generation, reason).await;
        }
    }

    // -- send / receive ------------------------------------------------

    pub async fn send(&self, data: Bytes) -> bool {
        self.send_with_timeout(data, self.inner.config.read().write_timeout)
            .await
    }

    pub async fn send_with_timeout(&self, data: Bytes, timeout: Duration) -> bool {
        let Some(tx) = self.inner.io.read().as_ref().map(|io| io.tx.clone()) else {
            return false;
        };
        let (resp_tx, resp_rx) = oneshot::channel();
        if tx.send(IoCommand::Send(data, resp_tx)).await.is_err() {
            return false;
        }
        matches!(tokio::time::timeout(timeout, resp_rx).await, Ok(Ok(true)))
    }

    pub async fn receive(&self, n: usize, timeout: Option<Duration>) -> Vec<u8> {
        let Some(tx) = self.inner.io.read().as_ref().map(|io| io.tx.clone()) else {
            return Vec::new();
        };
        let (resp_tx, resp_rx) = oneshot::channel();
        if tx.send(IoCommand::ReceiveExact(n, resp_tx)).await.is_err() {
            return Vec::new();
        }
        self.await_receive(tx, resp_rx, timeout).await
    }

    pub async fn receive_until(&self, delimiter: u8, timeout: Option<Duration>) -> String {
        let Some(tx) = self.inner.io.read().as_ref().map(|io| io.tx.clone()) else {
            return String::new();
        };
        let (resp_tx, resp_rx) = oneshot::channel();
        if tx.send(IoCommand::ReceiveUntil(delimiter, resp_tx)).await.is_err() {
            return String::new();
        }
        let bytes = self.await_receive(tx, resp_rx, timeout).await;
        String::from_utf8_lossy(&bytes).into_owned()
    }

    async fn await_receive(
        &self,
        tx: mpsc::Sender<IoCommand>,
        resp_rx: oneshot::Receiver<Vec<u8>>,
        timeout: Option<Duration>,
    ) -> Vec<u8> {
        match timeout {
            Some(d) => match tokio::time::timeout(d, resp_rx).await {
                Ok(Ok(bytes)) => bytes,
                _ => {
                    let _ = tx.send(IoCommand::CancelReceive).await;
                    Vec::new()
                }
            },
            None => resp_rx.await.unwrap_or_default(),
        }
    }

    pub async fn request_response(
        &self,
        request: Bytes,
        response_len: usize,
        timeout: Option<Duration>,
    ) -> Vec<u8> {
        if !self.send(request).await {
            return Vec::new();
        }
        self.receive(response_len, timeout).await
    }

    // -- properties / introspection -------------------------------------

    pub fn set_property(&self, key: &str, value: &str) {
        self.inner.properties.insert(key.to_string(), value.to_string());
    }

    pub fn get_property(&self, key: &str) -> Option<String> {
        self.inner.properties.get(key).map(|v| v.clone())
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.read()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner.last_error.lock().clone()
    }

    pub fn stats(&self) -> ConnectionStats {
        self.inner.stats.snapshot()
    }

    pub fn reset_stats(&self) {
        self.inner.stats.reset();
    }

    pub fn remote_address(&self) -> Option<String> {
        self.inner.target.read().as_ref().map(|t| t.host.clone())
    }

    pub fn remote_port(&self) -> Option<u16> {
        self.inner.target.read().as_ref().map(|t| t.port)
    }

    // -- callback registration -------------------------------------------

    pub fn on_connecting<F: Fn() + Send + Sync + 'static>(&self, f: F) {
        self.inner.handlers.on_connecting.write().push(Arc::new(f));
    }

    pub fn on_connected<F: Fn() + Send + Sync + 'static>(&self, f: F) {
        self.inner.handlers.on_connected.write().push(Arc::new(f));
    }

    pub fn on_disconnected<F: Fn() + Send + Sync + 'static>(&self, f: F) {
        self.inner.handlers.on_disconnected.write().push(Arc::new(f));
    }

    pub fn on_data_received<F: Fn(&[u8]) + Send + Sync + 'static>(&self, f: F) {
        self.inner.handlers.on_data_received.write().push(Arc::new(f));
    }

    pub fn on_error<F: Fn(&str) + Send + Sync + 'static>(&self, f: F) {
        self.inner.handlers.on_error.write().push(Arc::new(f));
    }

    pub fn on_state_changed<F: Fn(ConnectionState, ConnectionState) + Send + Sync + 'static>(&self, f: F) {
        self.inner.handlers.on_state_changed.write().push(Arc::new(f));
    }

    pub fn on_heartbeat<F: Fn() + Send + Sync + 'static>(&self, f: F) {
        self.inner.handlers.on_heartbeat.write().push(Arc::new(f));
    }

    fn change_state(&self, new: ConnectionState) {
        let old = {
            let mut state = self.inner.state.write();
            let old = *state;
            *state = new;
            old
        };
        if old != new {
            for h in self.inner.handlers.on_state_changed.read().iter() {
                h(old, new);
            }
        }
    }

    fn fire_void(&self, handlers: &RwLock<Vec<VoidHandler>>) {
        for h in handlers.read().iter() {
            h();
        }
    }

    fn fire_data(&self, data: &[u8]) {
        for h in self.inner.handlers.on_data_received.read().iter() {
            h(data);
        }
    }

    fn fire_error(&self, message: &str) {
        for h in self.inner.handlers.on_error.read().iter() {
            h(message);
        }
    }
}
