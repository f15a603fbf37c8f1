//! Per-client data owned by the `SocketHub`.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::time::Instant;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::mpsc;

/// Monotonically increasing client identifier. Zero is reserved ("system/none")
/// and never assigned to a real connection.
pub type ClientId = u64;

/// Kind of an opaque message exchanged with a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Text,
    Binary,
    Ping,
    Pong,
    Close,
}

/// A message read from, or to be written to, a client.
#[derive(Debug, Clone)]
pub struct Message {
    pub kind: MessageKind,
    pub payload: Bytes,
    pub sender: ClientId,
}

impl Message {
    pub fn text(payload: impl Into<Bytes>, sender: ClientId) -> Self {
        Self {
            kind: MessageKind::Text,
            payload: payload.into(),
            sender,
        }
    }

    pub fn binary(payload: impl Into<Bytes>, sender: ClientId) -> Self {
        Self {
            kind: MessageKind::Binary,
            payload: payload.into(),
            sender,
        }
    }
}

/// Commands sent to a client's I/O task over its outbound channel.
pub(crate) enum OutboundCommand {
    Send(Message),
    Close(String),
}

/// Monotonic counters for one client connection.
#[derive(Debug, Default)]
pub struct ClientCounters {
    pub sent: AtomicU64,
    pub received: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub bytes_received: AtomicU64,
}

impl ClientCounters {
    pub fn snapshot(&self) -> (u64, u64, u64, u64) {
        (
            self.sent.load(Ordering::Relaxed),
            self.received.load(Ordering::Relaxed),
            self.bytes_sent.load(Ordering::Relaxed),
            self.bytes_received.load(Ordering::Relaxed),
        )
    }
}

/// The hub's record for one live connection.
///
/// Exists in the registry iff the transport is open; the per-client I/O
/// task owns the transport exclusively and drops it (closing the socket)
/// when the task exits, so record removal and transport close happen on
/// the same code path and are observed atomically by external callers.
pub struct ClientRecord {
    pub id: ClientId,
    pub remote_addr: SocketAddr,
    pub authenticated: AtomicBool,
    pub connect_time: Instant,
    pub last_activity: parking_lot::Mutex<Instant>,
    pub counters: ClientCounters,
    pub metadata: DashMap<String, String>,
    pub(crate) outbound: mpsc::Sender<OutboundCommand>,
}

impl ClientRecord {
    pub fn new(
        id: ClientId,
        remote_addr: SocketAddr,
        outbound: mpsc::Sender<OutboundCommand>,
    ) -> Self {
        let now = Instant::now();
        Self {
            id,
            remote_addr,
            authenticated: AtomicBool::new(false),
            connect_time: now,
            last_activity: parking_lot::Mutex::new(now),
            counters: ClientCounters::default(),
            metadata: DashMap::new(),
            outbound,
        }
    }

    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::Acquire)
    }

    pub fn set_authenticated(&self, value: bool) {
        self.authenticated.store(value, Ordering::Release);
    }
}

/// Per-remote-address connection/message accounting for rate limiting.
#[derive(Debug, Default)]
pub(crate) struct RemoteState {
    pub active_connections: AtomicI64,
}
