//! Plain TCP transport.

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use super::{TcpOptions, Transport};
use crate::error::ErrorKind;

/// `Transport` backed by a raw `TcpStream`.
pub struct TcpTransport {
    stream: Option<TcpStream>,
    options: TcpOptions,
}

impl TcpTransport {
    pub fn new(options: TcpOptions) -> Self {
        Self {
            stream: None,
            options,
        }
    }

    /// Wrap an already-connected stream (used by `SocketHub` on accept).
    pub fn from_stream(stream: TcpStream, options: TcpOptions) -> std::io::Result<Self> {
        configure(&stream, &options)?;
        Ok(Self {
            stream: Some(stream),
            options,
        })
    }
}

fn configure(stream: &TcpStream, options: &TcpOptions) -> std::io::Result<()> {
    stream.set_nodelay(options.nodelay)?;
    if let Some(keepalive) = options.keepalive {
        let sock = socket2::SockRef::from(stream);
        let params = socket2::TcpKeepalive::new().with_time(keepalive);
        sock.set_tcp_keepalive(&params)?;
    }
    Ok(())
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&mut self, host: &str, port: u16) -> Result<(), ErrorKind> {
        let stream = TcpStream::connect((host, port)).await.map_err(|e| {
            debug!("tcp connect to {}:{} failed: {}", host, port, e);
            ErrorKind::ServerUnavailable
        })?;
        configure(&stream, &self.options).map_err(|_| ErrorKind::Unspecified)?;
        self.stream = Some(stream);
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, ErrorKind> {
        let stream = self.stream.as_mut().ok_or(ErrorKind::Closed)?;
        stream.read(buf).await.map_err(|_| ErrorKind::Closed)
    }

    async fn write(&mut self, buf: &[u8]) -> Result<usize, ErrorKind> {
        let stream = self.stream.as_mut().ok_or(ErrorKind::Closed)?;
        stream.write_all(buf).await.map_err(|_| ErrorKind::Closed)?;
        Ok(buf.len())
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }
}
