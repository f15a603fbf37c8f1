//! `MqttClient`: an MQTT 3.1.1 / 5.0 client over a pluggable transport.
//!
//! Follows the same per-connection actor idiom as the hub and the TCP
//! client: one task owns the `Transport` exclusively, alternating via
//! `tokio::select!` between reading (feeding a `ByteBuffer` that is
//! decoded in a loop) and draining an outbound command channel. Inbound
//! QoS acknowledgements (PUBACK/PUBREC/PUBREL/PUBCOMP/SUBACK/UNSUBACK)
//! are written back to the wire directly from the io task, since it is
//! the only task allowed to touch the transport.

mod config;
mod error;
mod stats;

pub use config::{generate_client_id, MqttConfig, MqttTlsConfig, WillConfig};
pub use error::MqttError;
pub use stats::ClientStats;

use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::buffer::ByteBuffer;
use crate::codec::{Decoder, Encoder};
use crate::protocol::{
    Connect, Disconnect, Packet, ProtocolVersion, PubAck, PubComp, PubRec, PubRel, Publish,
    Properties, QoS, ReasonCode, Subscribe, Subscription, SubscriptionOptions, Unsubscribe, Will,
};
use crate::timer::{BackoffCalculator, BackoffConfig};
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

/// A delivered PUBLISH, handed to the `on_message` handler.
#[derive(Debug, Clone)]
pub struct Message {
    pub topic: Arc<str>,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
}

enum PendingOp {
    Publish(oneshot::Sender<Result<(), MqttError>>),
    Subscribe(oneshot::Sender<Result<Vec<ReasonCode>, MqttError>>),
    Unsubscribe(oneshot::Sender<Result<Vec<ReasonCode>, MqttError>>),
}

enum MqttCommand {
    Send(Bytes),
    Close,
}

type MessageHandler = Arc<dyn Fn(&Message) + Send + Sync>;
type ConnectedHandler = Arc<dyn Fn(bool) + Send + Sync>;
type VoidHandler = Arc<dyn Fn() + Send + Sync>;
type ErrorHandler = Arc<dyn Fn(&str) + Send + Sync>;
type StateHandler = Arc<dyn Fn(ConnectionState, ConnectionState) + Send + Sync>;

#[derive(Default)]
struct Handlers {
    on_message: RwLock<Vec<MessageHandler>>,
    on_connected: RwLock<Vec<ConnectedHandler>>,
    on_disconnected: RwLock<Vec<VoidHandler>>,
    on_error: RwLock<Vec<ErrorHandler>>,
    on_state_changed: RwLock<Vec<StateHandler>>,
}

struct IoHandle {
    tx: mpsc::Sender<MqttCommand>,
    generation: u64,
}

/// An MQTT 3.1.1 / 5.0 client.
#[derive(Clone)]
pub struct MqttClient {
    inner: Arc<Inner>,
}

struct Inner {
    config: RwLock<MqttConfig>,
    state: RwLock<ConnectionState>,
    broker: RwLock<Option<(String, u16)>>,
    io: RwLock<Option<IoHandle>>,
    generation: AtomicU64,
    reconnect_attempt: AtomicU32,
    next_packet_id: AtomicU16,
    pending: DashMap<u16, PendingOp>,
    last_packet_received: Mutex<Option<Instant>>,
    last_error: Mutex<Option<String>>,
    connect_ack: Mutex<Option<oneshot::Sender<Result<(), MqttError>>>>,
    ping_outstanding: AtomicBool,
    stats: StatsInner,
    handlers: Handlers,
}

impl MqttClient {
    pub fn new(config: MqttConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config: RwLock::new(config),
                state: RwLock::new(ConnectionState::Disconnected),
                broker: RwLock::new(None),
                io: RwLock::new(None),
                generation: AtomicU64::new(0),
                reconnect_attempt: AtomicU32::new(0),
                next_packet_id: AtomicU16::new(0),
                pending: DashMap::new(),
                last_packet_received: Mutex::new(None),
                last_error: Mutex::new(None),
                connect_ack: Mutex::new(None),
                ping_outstanding: AtomicBool::new(false),
                stats: StatsInner::default(),
                handlers: Handlers::default(),
            }),
        }
    }

    // -- connection lifecycle -------------------------------------------

    pub async fn connect(&self, host: &str, port: u16, timeout: Option<Duration>) -> Result<(), MqttError> {
        if matches!(
            *self.inner.state.read(),
            ConnectionState::Connected | ConnectionState::Connecting
        ) {
            return Err(MqttError::AlreadyConnected);
        }

        self.change_state(ConnectionState::Connecting);
        *self.inner.broker.write() = Some((host.to_string(), port));

        let cfg = self.inner.config.read().clone();
        let connect_timeout = timeout.unwrap_or(Duration::from_secs(10));

        let mut transport = match tokio::time::timeout(connect_timeout, self.open_transport(host, port, &cfg)).await {
            Ok(Ok(t)) => t,
            Ok(Err(e)) => {
                self.fail_connect(e);
                return Err(e);
            }
            Err(_) => {
                self.fail_connect(MqttError::TimedOut);
                return Err(MqttError::TimedOut);
            }
        };

        let connect_packet = self.build_connect_packet(&cfg);
        let encoder = Encoder::new(cfg.version);
        let mut buf = BytesMut::new();
        if encoder
            .encode(&Packet::Connect(Box::new(connect_packet)), &mut buf)
            .is_err()
        {
            self.fail_connect(MqttError::ConnectFailed);
            return Err(MqttError::ConnectFailed);
        }
        if transport.write(&buf).await.is_err() {
            self.fail_connect(MqttError::ConnectFailed);
            return Err(MqttError::ConnectFailed);
        }

        let generation = self.inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let (tx, rx) = mpsc::channel(64);
        let (ack_tx, ack_rx) = oneshot::channel();
        *self.inner.io.write() = Some(IoHandle { tx, generation });
        *self.inner.connect_ack.lock() = Some(ack_tx);

        let mut decoder = Decoder::new();
        decoder.set_protocol_version(cfg.version);

        let client = self.clone();
        let version = cfg.version;
        tokio::spawn(async move {
            client.run_io(transport, rx, generation, decoder, version).await;
        });

        match tokio::time::timeout(connect_timeout, ack_rx).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(e))) => Err(e),
            _ => {
                self.disconnect().await;
                Err(MqttError::TimedOut)
            }
        }
    }

    async fn open_transport(
        &self,
        host: &str,
        port: u16,
        cfg: &MqttConfig,
    ) -> Result<Box<dyn Transport>, MqttError> {
        let tcp_options = TcpOptions {
            nodelay: true,
            keepalive: None,
        };
        if cfg.use_tls {
            let client_config = crate::transport::load_client_tls_config(
                cfg.tls.ca_cert_file.as_deref(),
                cfg.tls.cert_file.as_deref(),
                cfg.tls.private_key_file.as_deref(),
                cfg.tls.verify_certificate,
            )
            .map_err(|_| MqttError::TlsConfig)?;
            let mut transport = TlsTransport::new_client(tcp_options, client_config);
            transport
                .connect(host, port)
                .await
                .map_err(|_| MqttError::ConnectFailed)?;
            Ok(Box::new(transport))
        } else {
            let mut transport = TcpTransport::new(tcp_options);
            transport
                .connect(host, port)
                .await
                .map_err(|_| MqttError::ConnectFailed)?;
            Ok(Box::new(transport))
        }
    }

    fn build_connect_packet(&self, cfg: &MqttConfig) -> Connect {
        let client_id = if cfg.client_id.is_empty() {
            generate_client_id("mqtt")
        } else {
            cfg.client_id.clone()
        };
        Connect {
            protocol_version: cfg.version,
            client_id,
            clean_start: cfg.clean_session,
            keep_alive: cfg.keep_alive.as_secs().min(u16::MAX as u64) as u16,
            username: cfg.username.clone(),
            password: cfg.password.clone(),
            will: cfg.will.as_ref().map(|w| Will {
                topic: w.topic.clone(),
                payload: w.payload.clone(),
                qos: w.qos,
                retain: w.retain,
                properties: Properties::default(),
            }),
            properties: Properties::default(),
        }
    }

    fn fail_connect(&self, err: MqttError) {
        *self.inner.last_error.lock() = Some(err.to_string());
        self.change_state(ConnectionState::Disconnected);
        self.fire_error(&err.to_string());
    }

    /// Sends DISCONNECT, tears the transport down, and fails every pending
    /// operation. Idempotent.
    pub async fn disconnect(&self) {
        if *self.inner.state.read() == ConnectionState::Disconnected {
            return;
        }
        if let Some(io) = self.inner.io.read().as_ref() {
            let version = self.inner.config.read().version;
            let encoder = Encoder::new(version);
            let mut buf = BytesMut::new();
            if encoder
                .encode(&Packet::Disconnect(Disconnect::default()), &mut buf)
                .is_ok()
            {
                let _ = io.tx.send(MqttCommand::Send(buf.freeze())).await;
            }
            let _ = io.tx.send(MqttCommand::Close).await;
        }
        self.inner.io.write().take();
        self.inner.generation.fetch_add(1, Ordering::AcqRel);
        self.fail_all_pending(MqttError::NotConnected);
        self.change_state(ConnectionState::Disconnected);
        self.fire_disconnected();
    }

    fn is_current(&self, generation: u64) -> bool {
        self.inner
            .io
            .read()
            .as_ref()
            .map(|io| io.generation == generation)
            .unwrap_or(false)
    }

    async fn handle_transport_error(&self, generation: u64, reason: String) {
        if !self.is_current(generation) {
            return;
        }
        self.inner.io.write().take();
        self.fail_all_pending(MqttError::NotConnected);
        *self.inner.last_error.lock() = Some(reason.clone());
        self.fire_error(&reason);
        self.change_state(ConnectionState::Disconnected);
        self.fire_disconnected();
        if let Some(tx) = self.inner.connect_ack.lock().take() {
            let _ = tx.send(Err(MqttError::ConnectFailed));
        }

        if self.inner.config.read().auto_reconnect {
            self.schedule_reconnect(generation);
        } else {
            self.change_state(ConnectionState::Failed);
        }
    }

    /// 1s base doubling to a 60s cap, reset on the next successful CONNACK.
    /// Unlike `tcp_client`'s proportional-jitter backoff, this one carries
    /// no jitter of its own: the doubled delay is computed plain here and
    /// an additive uniform `[0, 1000)ms` term is added separately in
    /// `schedule_reconnect`.
    fn backoff_config() -> BackoffConfig {
        BackoffConfig {
            base: Duration::from_secs(1),
            max: Duration::from_secs(60),
            factor: 2.0,
            jitter_ratio: 0.0,
        }
    }

    fn schedule_reconnect(&self, generation: u64) {
        self.change_state(ConnectionState::Reconnecting);
        let attempt = self.inner.reconnect_attempt.fetch_add(1, Ordering::Relaxed);
        let delay = {
            let mut backoff = BackoffCalculator::new(Self::backoff_config());
            for _ in 0..attempt {
                backoff.next_delay();
            }
            let base_delay = backoff.next_delay();
            base_delay + Duration::from_millis(rand::random::<u64>() % 1000)
        };
        let client = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if client.inner.generation.load(Ordering::Acquire) != generation {
                return;
            }
            let broker = client.inner.broker.read().clone();
            if let Some((host, port)) = broker {
                let _ = client.connect(&host, port, None).await;
            }
        });
    }

    // -- io actor ----------------------------------------------------------

    async fn run_io(
        &self,
        mut transport: Box<dyn Transport>,
        mut rx: mpsc::Receiver<MqttCommand>,
        generation: u64,
        mut decoder: Decoder,
        version: ProtocolVersion,
    ) {
        let encoder = Encoder::new(version);
        let mut scratch = vec![0u8; 4096];
        let mut buf = ByteBuffer::with_capacity(4096);
        let reason: Option<String>;

        'outer: loop {
            tokio::select! {
                cmd = rx.recv() => {
                    match cmd {
                        Some(MqttCommand::Send(bytes)) => {
                            match transport.write(&bytes).await {
                                Ok(n) => {
                                    self.inner.stats.bytes_sent.fetch_add(n as u64, Ordering::Relaxed);
                                }
                                Err(_) => {
                                    reason = Some("write error".to_string());
                                    break 'outer;
                                }
                            }
                        }
                        Some(MqttCommand::Close) | None => {
                            reason = None;
                            break 'outer;
                        }
                    }
                }
                read = transport.read(&mut scratch) => {
                    match read {
                        Ok(0) => {
                            reason = Some("connection closed by peer".to_string());
                            break 'outer;
                        }
                        Ok(n) => {
                            buf.extend(&scratch[..n]);
                            loop {
                                match decoder.decode(buf.remaining()) {
                                    Ok(Some((packet, consumed))) => {
                                        let _ = buf.consume(consumed);
                                        if let Some(close_reason) =
                                            self.dispatch_inbound(packet, &mut transport, &encoder).await
                                        {
                                            reason = Some(close_reason);
                                            break 'outer;
                                        }
                                    }
                                    Ok(None) => break,
                                    Err(_) => {
                                        reason = Some("malformed packet".to_string());
                                        break 'outer;
                                    }
                                }
                            }
                            buf.compact();
                        }
                        Err(_) => {
                            reason = Some("read error".to_string());
                            break 'outer;
                        }
                    }
                }
            }
        }

        transport.close().await;
        debug!("mqtt client io task for generation {} ended", generation);
        if let Some(reason) = reason {
            self.handle_transport_error(generation, reason).await;
        }
    }

    /// Returns `Some(reason)` when the connection should be torn down.
    async fn dispatch_inbound(
        &self,
        packet: Packet,
        transport: &mut Box<dyn Transport>,
        encoder: &Encoder,
    ) -> Option<String> {
        *self.inner.last_packet_received.lock() = Some(Instant::now());

        if !packet.is_inbound_to_client() {
            return Some(format!(
                "broker sent a client-only packet type: {:?}",
                packet.packet_type()
            ));
        }

        match packet {
            Packet::ConnAck(ca) => {
                if ca.reason_code.is_success() {
                    let was_reconnect = self.inner.reconnect_attempt.swap(0, Ordering::Relaxed) > 0;
                    if was_reconnect {
                        self.inner.stats.reconnect_count.fetch_add(1, Ordering::Relaxed);
                    }
                    self.change_state(ConnectionState::Connected);
                    self.fire_connected(true);
                    self.maybe_start_keepalive(self.inner.generation.load(Ordering::Acquire));
                    if let Some(tx) = self.inner.connect_ack.lock().take() {
                        let _ = tx.send(Ok(()));
                    }
                    None
                } else {
                    if let Some(tx) = self.inner.connect_ack.lock().take() {
                        let _ = tx.send(Err(MqttError::ConnackRejected));
                    }
                    Some(format!("connack rejected: {:?}", ca.reason_code))
                }
            }
            Packet::Publish(p) => {
                if let Some(id) = p.packet_id {
                    let reply = match p.qos {
                        QoS::AtLeastOnce => Some(Packet::PubAck(PubAck::new(id))),
                        QoS::ExactlyOnce => Some(Packet::PubRec(PubRec::new(id))),
                        QoS::AtMostOnce => None,
                    };
                    if let Some(reply) = reply {
                        if let Some(reason) = self.write_packet(transport, encoder, &reply).await {
                            return Some(reason);
                        }
                    }
                }
                self.inner.stats.messages_received.fetch_add(1, Ordering::Relaxed);
                self.inner
                    .stats
                    .bytes_received
                    .fetch_add(p.payload.len() as u64, Ordering::Relaxed);
                let message = Message {
                    topic: p.topic.clone(),
                    payload: p.payload.clone(),
                    qos: p.qos,
                    retain: p.retain,
                };
                self.fire_message(&message);
                None
            }
            Packet::PubAck(a) => {
                self.complete_publish(a.packet_id, Ok(()));
                None
            }
            Packet::PubComp(c) => {
                self.complete_publish(c.packet_id, Ok(()));
                None
            }
            Packet::PubRec(r) => {
                self.write_packet(transport, encoder, &Packet::PubRel(PubRel::new(r.packet_id)))
                    .await
            }
            Packet::PubRel(r) => {
                self.write_packet(transport, encoder, &Packet::PubComp(PubComp::new(r.packet_id)))
                    .await
            }
            Packet::SubAck(s) => {
                self.complete_subscribe(s.packet_id, Ok(s.reason_codes.clone()));
                None
            }
            Packet::UnsubAck(u) => {
                self.complete_subscribe(u.packet_id, Ok(u.reason_codes.clone()));
                None
            }
            Packet::PingResp => {
                self.inner.ping_outstanding.store(false, Ordering::Relaxed);
                None
            }
            _ => Some("unexpected packet type".to_string()),
        }
    }

    async fn write_packet(&self, transport: &mut Box<dyn Transport>, encoder: &Encoder, packet: &Packet) -> Option<String> {
        let mut buf = BytesMut::new();
        if encoder.encode(packet, &mut buf).is_err() {
            return Some("encode error".to_string());
        }
        match transport.write(&buf).await {
            Ok(n) => {
                self.inner.stats.bytes_sent.fetch_add(n as u64, Ordering::Relaxed);
                None
            }
            Err(_) => Some("write error".to_string()),
        }
    }

    fn complete_publish(&self, id: u16, result: Result<(), MqttError>) {
        if let Some((_, PendingOp::Publish(tx))) = self.inner.pending.remove(&id) {
            let _ = tx.send(result);
        }
    }

    fn complete_subscribe(&self, id: u16, result: Result<Vec<ReasonCode>, MqttError>) {
        if let Some((_, op)) = self.inner.pending.remove(&id) {
            match op {
                PendingOp::Subscribe(tx) | PendingOp::Unsubscribe(tx) => {
                    let _ = tx.send(result);
                }
                PendingOp::Publish(_) => {}
            }
        }
    }

    fn fail_all_pending(&self, err: MqttError) {
        let ids: Vec<u16> = self.inner.pending.iter().map(|e| *e.key()).collect();
        for id in ids {
            if let Some((_, op)) = self.inner.pending.remove(&id) {
                match op {
                    PendingOp::Publish(tx) => {
                        let _ = tx.send(Err(err));
                    }
                    PendingOp::Subscribe(tx) | PendingOp::Unsubscribe(tx) => {
                        let _ = tx.send(Err(err));
                    }
                }
            }
        }
    }

    // -- keep-alive ----------------------------------------------------

    fn maybe_start_keepalive(&self, generation: u64) {
        let keep_alive = self.inner.config.read().keep_alive;
        if keep_alive.is_zero() {
            return;
        }
        let check_interval =
            Duration::from_secs_f64(keep_alive.as_secs_f64() * 0.75).max(Duration::from_millis(100));
        let client = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(check_interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if !client.is_current(generation) {
                    break;
                }
                let last = *client.inner.last_packet_received.lock();
                let stale = last.map(|t| t.elapsed() >= keep_alive).unwrap_or(true);
                if stale && !client.send_ping(generation).await {
                    break;
                }
            }
        });
    }

    async fn send_ping(&self, generation: u64) -> bool {
        let encoder = Encoder::new(self.inner.config.read().version);
        let mut buf = BytesMut::new();
        if encoder.encode(&Packet::PingReq, &mut buf).is_err() {
            return false;
        }
        if !self.send_raw(buf.freeze()).await {
            return false;
        }
        self.inner.ping_outstanding.store(true, Ordering::Relaxed);
        let client = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            if !client.is_current(generation) {
                return;
            }
            if client.inner.ping_outstanding.swap(false, Ordering::Relaxed) {
                client
                    .handle_transport_error(generation, "ping timeout".to_string())
                    .await;
            }
        });
        true
    }

    async fn send_raw(&self, bytes: Bytes) -> bool {
        let Some(tx) = self.inner.io.read().as_ref().map(|io| io.tx.clone()) else {
            return false;
        };
        tx.send(MqttCommand::Send(bytes)).await.is_ok()
    }

    fn next_packet_id(&self) -> u16 {
        let id = self.inner.next_packet_id.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        if id == 0 {
            self.inner.next_packet_id.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
        } else {
            id
        }
    }

    // -- publish / subscribe / unsubscribe -------------------------------

    pub async fn publish(&self, topic: &str, payload: Bytes, qos: QoS, retain: bool) -> Result<(), MqttError> {
        if !self.is_connected() {
            return Err(MqttError::NotConnected);
        }
        let packet_id = if qos == QoS::AtMostOnce {
            None
        } else {
            Some(self.next_packet_id())
        };
        let publish = Publish {
            dup: false,
            qos,
            retain,
            topic: Arc::from(topic),
            packet_id,
            payload,
            properties: Properties::default(),
        };
        let encoder = Encoder::new(self.inner.config.read().version);
        let mut buf = BytesMut::new();
        encoder
            .encode(&Packet::Publish(publish), &mut buf)
            .map_err(|_| MqttError::MalformedPacket)?;
        let bytes = buf.freeze();

        let rx = packet_id.map(|id| {
            let (tx, rx) = oneshot::channel();
            self.inner.pending.insert(id, PendingOp::Publish(tx));
            rx
        });

        if !self.send_raw(bytes.clone()).await {
            if let Some(id) = packet_id {
                self.inner.pending.remove(&id);
            }
            return Err(MqttError::NotConnected);
        }
        self.inner.stats.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.inner.stats.bytes_sent.fetch_add(bytes.len() as u64, Ordering::Relaxed);

        match rx {
            Some(rx) => match tokio::time::timeout(Duration::from_secs(30), rx).await {
                Ok(Ok(res)) => res,
                _ => {
                    if let Some(id) = packet_id {
                        self.inner.pending.remove(&id);
                    }
                    Err(MqttError::TimedOut)
                }
            },
            None => Ok(()),
        }
    }

    pub async fn subscribe(&self, filters: &[(&str, QoS)]) -> Result<Vec<ReasonCode>, MqttError> {
        if !self.is_connected() {
            return Err(MqttError::NotConnected);
        }
        let id = self.next_packet_id();
        let subscriptions = filters
            .iter()
            .map(|(filter, qos)| Subscription {
                filter: filter.to_string(),
                options: SubscriptionOptions {
                    qos: *qos,
                    ..Default::default()
                },
            })
            .collect();
        let packet = Subscribe {
            packet_id: id,
            subscriptions,
            properties: Properties::default(),
        };
        let encoder = Encoder::new(self.inner.config.read().version);
        let mut buf = BytesMut::new();
        encoder
            .encode(&Packet::Subscribe(packet), &mut buf)
            .map_err(|_| MqttError::MalformedPacket)?;

        let (tx, rx) = oneshot::channel();
        self.inner.pending.insert(id, PendingOp::Subscribe(tx));
        if !self.send_raw(buf.freeze()).await {
            self.inner.pending.remove(&id);
            return Err(MqttError::NotConnected);
        }
        match tokio::time::timeout(Duration::from_secs(30), rx).await {
            Ok(Ok(res)) => res,
            _ => {
                self.inner.pending.remove(&id);
                Err(MqttError::TimedOut)
            }
        }
    }

    pub async fn unsubscribe(&self, filters: &[&str]) -> Result<Vec<ReasonCode>, MqttError> {
        if !self.is_connected() {
            return Err(MqttError::NotConnected);
        }
        let id = self.next_packet_id();
        let packet = Unsubscribe {
            packet_id: id,
            filters: filters.iter().map(|f| f.to_string()).collect(),
            properties: Properties::default(),
        };
        let encoder = Encoder::new(self.inner.config.read().version);
        let mut buf = BytesMut::new();
        encoder
            .encode(&Packet::Unsubscribe(packet), &mut buf)
            .map_err(|_| MqttError::MalformedPacket)?;

        let (tx, rx) = oneshot::channel();
        self.inner.pending.insert(id, PendingOp::Unsubscribe(tx));
        if !self.send_raw(buf.freeze()).await {
            self.inner.pending.remove(&id);
            return Err(MqttError::NotConnected);
        }
        match tokio::time::timeout(Duration::from_secs(30), rx).await {
            Ok(Ok(res)) => res,
            _ => {
                self.inner.pending.remove(&id);
                Err(MqttError::TimedOut)
            }
        }
    }

    // -- introspection ---------------------------------------------------

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.read()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner.last_error.lock().clone()
    }

    pub fn stats(&self) -> ClientStats {
        self.inner.stats.snapshot()
    }

    /// Number of QoS 1/2 publishes and subscribe/unsubscribe requests
    /// still awaiting their broker response.
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    // -- callback registration -------------------------------------------

    pub fn on_message<F: Fn(&Message) + Send + Sync + 'static>(&self, f: F) {
        self.inner.handlers.on_message.write().push(Arc::new(f));
    }

    pub fn on_connected<F: Fn(bool) + Send + Sync + 'static>(&self, f: F) {
        self.inner.handlers.on_connected.write().push(Arc::new(f));
    }

    pub fn on_disconnected<F: Fn() + Send + Sync + 'static>(&self, f: F) {
        self.inner.handlers.on_disconnected.write().push(Arc::new(f));
    }

    pub fn on_error<F: Fn(&str) + Send + Sync + 'static>(&self, f: F) {
        self.inner.handlers.on_error.write().push(Arc::new(f));
    }

    pub fn on_state_changed<F: Fn(ConnectionState, ConnectionState) + Send + Sync + 'static>(&self, f: F) {
        self.inner.handlers.on_state_changed.write().push(Arc::new(f));
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

    fn fire_connected(&self, success: bool) {
        for h in self.inner.handlers.on_connected.read().iter() {
            h(success);
        }
    }

    fn fire_disconnected(&self) {
        for h in self.inner.handlers.on_disconnected.read().iter() {
            h();
        }
    }

    fn fire_error(&self, message: &str) {
        for h in self.inner.handlers.on_error.read().iter() {
            h(message);
        }
    }

    fn fire_message(&self, message: &Message) {
        for h in self.inner.handlers.on_message.read().iter() {
            h(message);
        }
    }
}
