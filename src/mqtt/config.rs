//! `MqttClient` configuration.

use std::time::Duration;

use bytes::Bytes;

use crate::protocol::{ProtocolVersion, QoS};

#[derive(Debug, Clone)]
pub struct MqttTlsConfig {
    pub ca_cert_file: Option<String>,
    pub cert_file: Option<String>,
    pub private_key_file: Option<String>,
    pub verify_certificate: bool,
}

impl Default for MqttTlsConfig {
    fn default() -> Self {
        Self {
            ca_cert_file: None,
            cert_file: None,
            private_key_file: None,
            verify_certificate: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WillConfig {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
}

#[derive(Debug, Clone)]
pub struct MqttConfig {
    /// Auto-generated as `"<prefix>_<8 hex chars>"` if left empty.
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<Bytes>,
    pub keep_alive: Duration,
    pub clean_session: bool,
    pub will: Option<WillConfig>,
    pub version: ProtocolVersion,
    pub use_tls: bool,
    pub tls: MqttTlsConfig,
    pub auto_reconnect: bool,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            username: None,
            password: None,
            keep_alive: Duration::from_secs(60),
            clean_session: true,
            will: None,
            version: ProtocolVersion::V311,
            use_tls: false,
            tls: MqttTlsConfig::default(),
            auto_reconnect: true,
        }
    }
}

/// Generate `"<prefix>_<8 hex chars>"` when the configured client id is empty.
pub fn generate_client_id(prefix: &str) -> String {
    use rand::Rng;
    let suffix: u32 = rand::thread_rng().gen();
    format!("{}_{:08x}", prefix, suffix)
}
