//! `TcpClient`-specific error type.

use std::fmt;

use crate::error::ErrorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpClientError {
    AlreadyConnected,
    NotConnected,
    ConnectFailed,
    TimedOut,
    SendFailed,
    TlsConfig,
}

impl fmt::Display for TcpClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TcpClientError::AlreadyConnected => "already connected",
            TcpClientError::NotConnected => "not connected",
            TcpClientError::ConnectFailed => "connect failed",
            TcpClientError::TimedOut => "timed out",
            TcpClientError::SendFailed => "send failed",
            TcpClientError::TlsConfig => "invalid tls configuration",
        };
        write!(f, "{}", s)
    }
}

impl std::error::Error for TcpClientError {}

impl From<TcpClientError> for ErrorKind {
    fn from(e: TcpClientError) -> Self {
        match e {
            TcpClientError::AlreadyConnected => ErrorKind::Unspecified,
            TcpClientError::NotConnected => ErrorKind::Closed,
            TcpClientError::ConnectFailed => ErrorKind::ServerUnavailable,
            TcpClientError::TimedOut => ErrorKind::TimedOut,
            TcpClientError::SendFailed => ErrorKind::Closed,
            TcpClientError::TlsConfig => ErrorKind::Unspecified,
        }
    }
}
