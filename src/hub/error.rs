//! `SocketHub`-specific error type.

use std::fmt;

use crate::error::ErrorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubError {
    /// The hub has not been started, or `stop` has already been called.
    NotRunning,
    /// The hub is already running; `start` was called twice.
    AlreadyRunning,
    /// Binding the listening socket failed.
    BindFailed,
    /// The target client id is not connected.
    UnknownClient,
    /// The target group has no members (or does not exist).
    UnknownGroup,
    /// A connection/message quota was exceeded.
    RateLimited,
    /// TLS was requested but is misconfigured.
    TlsConfig,
}

impl fmt::Display for HubError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HubError::NotRunning => "hub is not running",
            HubError::AlreadyRunning => "hub is already running",
            HubError::BindFailed => "failed to bind listening socket",
            HubError::UnknownClient => "unknown client id",
            HubError::UnknownGroup => "unknown group",
            HubError::RateLimited => "rate limit exceeded",
            HubError::TlsConfig => "invalid tls configuration",
        };
        write!(f, "{}", s)
    }
}

impl std::error::Error for HubError {}

impl From<HubError> for ErrorKind {
    fn from(e: HubError) -> Self {
        match e {
            HubError::NotRunning | HubError::AlreadyRunning => ErrorKind::Unspecified,
            HubError::BindFailed => ErrorKind::ServerUnavailable,
            HubError::UnknownClient | HubError::UnknownGroup => ErrorKind::Unspecified,
            HubError::RateLimited => ErrorKind::RateLimited,
            HubError::TlsConfig => ErrorKind::Unspecified,
        }
    }
}
