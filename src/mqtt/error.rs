//! `MqttClient`-specific error type.

use std::fmt;

use crate::error::ErrorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MqttError {
    AlreadyConnected,
    NotConnected,
    ConnectFailed,
    ConnackRejected,
    MalformedPacket,
    TimedOut,
    TlsConfig,
}

impl fmt::Display for MqttError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MqttError::AlreadyConnected => "already connected",
            MqttError::NotConnected => "not connected",
            MqttError::ConnectFailed => "connect failed",
            MqttError::ConnackRejected => "connack rejected",
            MqttError::MalformedPacket => "malformed packet",
            MqttError::TimedOut => "timed out",
            MqttError::TlsConfig => "invalid tls configuration",
        };
        write!(f, "{}", s)
    }
}

impl std::error::Error for MqttError {}

impl From<MqttError> for ErrorKind {
    fn from(e: MqttError) -> Self {
        match e {
            MqttError::AlreadyConnected => ErrorKind::Unspecified,
            MqttError::NotConnected => ErrorKind::Closed,
            MqttError::ConnectFailed => ErrorKind::ServerUnavailable,
            MqttError::ConnackRejected => ErrorKind::NotAuthorized,
            MqttError::MalformedPacket => ErrorKind::Malformed,
            MqttError::TimedOut => ErrorKind::TimedOut,
            MqttError::TlsConfig => ErrorKind::Unspecified,
        }
    }
}
