//! Pluggable byte-stream transport.
//!
//! Abstracts "open stream of bytes" so the TCP client and MQTT client can
//! be driven over plain TCP, TLS, or (in tests) an in-memory duplex pipe
//! without changing their state machines.

mod tcp;
mod tls;

pub use tcp::TcpTransport;
pub use tls::{load_client_tls_config, load_server_tls_config, TlsError, TlsTransport};

use async_trait::async_trait;

use crate::error::ErrorKind;

/// An open or openable stream of bytes.
///
/// Implementations own the underlying socket exclusively: once `close` is
/// called (or the transport is dropped) no further I/O is possible.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the stream to `host:port`. TLS implementations perform the
    /// handshake as part of this call, after the raw TCP connect
    /// succeeds and before returning.
    async fn connect(&mut self, host: &str, port: u16) -> Result<(), ErrorKind>;

    /// Read available bytes into `buf`, returning the number of bytes
    /// read. Returns `Ok(0)` on a clean peer close.
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, ErrorKind>;

    /// Write all of `buf`, returning the number of bytes written (always
    /// `buf.len()` on success).
    async fn write(&mut self, buf: &[u8]) -> Result<usize, ErrorKind>;

    /// Close the stream. Idempotent.
    async fn close(&mut self);

    fn is_open(&self) -> bool;
}

/// Configuration shared by TCP-backed transports.
#[derive(Debug, Clone, Default)]
pub struct TcpOptions {
    pub nodelay: bool,
    pub keepalive: Option<std::time::Duration>,
}
