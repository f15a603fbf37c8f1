//! `TcpClient` configuration.

use std::time::Duration;

use crate::timer::BackoffConfig;

#[derive(Debug, Clone)]
pub struct TlsClientConfig {
    pub verify_certificate: bool,
    pub ca_file: Option<String>,
    pub client_cert_file: Option<String>,
    pub client_key_file: Option<String>,
}

impl Default for TlsClientConfig {
    fn default() -> Self {
        Self {
            verify_certificate: true,
            ca_file: None,
            client_cert_file: None,
            client_key_file: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub use_ssl: bool,
    pub tls: TlsClientConfig,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub keep_alive: bool,
    pub reconnect_attempts: u32,
    pub reconnect_delay: Duration,
    pub auto_reconnect: bool,
    pub receive_buffer_size: usize,
    pub backoff: BackoffConfig,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            use_ssl: false,
            tls: TlsClientConfig::default(),
            connect_timeout: Duration::from_millis(5000),
            read_timeout: Duration::from_millis(5000),
            write_timeout: Duration::from_millis(5000),
            keep_alive: true,
            reconnect_attempts: 3,
            reconnect_delay: Duration::from_millis(1000),
            auto_reconnect: true,
            receive_buffer_size: 4096,
            backoff: BackoffConfig::default(),
        }
    }
}
