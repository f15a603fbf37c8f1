//! Crate-wide error taxonomy
//!
//! Every component funnels its failures into one of these kinds at its
//! boundary. Component-specific error enums (e.g. `mqtt::MqttError`,
//! `hub::HubError`) carry richer context and convert into `ErrorKind` via
//! `From` for callers that just need to dispatch on category.

use std::fmt;

/// Coarse-grained error category shared by all components.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Protocol parse failure (malformed bytes on the wire).
    Malformed,
    /// An operation exceeded its deadline.
    TimedOut,
    /// The remote peer is unreachable or refused the connection.
    ServerUnavailable,
    /// Authentication/authorization was required and missing or rejected.
    NotAuthorized,
    /// Bytes parsed but violated a protocol invariant.
    ProtocolError,
    /// A rate limit (connection or message quota) rejected the operation.
    RateLimited,
    /// A bounded queue was full.
    QueueFull,
    /// The operation was cancelled before completion.
    Cancelled,
    /// The transport or component is closed.
    Closed,
    /// A user-supplied handler raised or timed out.
    HandlerError,
    /// Catch-all for errors that don't fit another kind.
    Unspecified,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Malformed => "malformed packet",
            ErrorKind::TimedOut => "timed out",
            ErrorKind::ServerUnavailable => "server unavailable",
            ErrorKind::NotAuthorized => "not authorized",
            ErrorKind::ProtocolError => "protocol error",
            ErrorKind::RateLimited => "rate limited",
            ErrorKind::QueueFull => "queue full",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Closed => "closed",
            ErrorKind::HandlerError => "handler error",
            ErrorKind::Unspecified => "unspecified error",
        };
        write!(f, "{}", s)
    }
}

impl std::error::Error for ErrorKind {}
