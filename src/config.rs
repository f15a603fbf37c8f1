//! TOML-based configuration for the four components, with environment
//! variable overrides.
//!
//! A `config`-crate builder seeded with defaults, a TOML file layered on
//! top (after `${VAR}`/`${VAR:-def}` substitution), then
//! `VIBEMQAIO__SECTION__FIELD` environment overrides. Each section is
//! deserialized into a small settings struct here and converted into the
//! domain config type the component actually takes, so external field
//! names stay stable even if a domain struct's field layout changes.

use std::path::Path;
use std::time::Duration;

use config::{Environment, File, FileFormat};
use regex::Regex;
use serde::Deserialize;

use crate::hub::{HubConfig, HubTlsConfig, LogLevel, RateLimitConfig};
use crate::mqtt::{MqttConfig as MqttClientConfig, MqttTlsConfig, WillConfig};
use crate::protocol::{ProtocolVersion, QoS};
use crate::tcp_client::{ConnectionConfig, TlsClientConfig};
use crate::timer::BackoffConfig;

fn substitute_env_vars(content: &str) -> String {
    let re = Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}").unwrap();
    re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        std::env::var(var_name).unwrap_or_else(|_| default.to_string())
    })
    .to_string()
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Config(config::ConfigError),
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "parse error: {}", e),
            ConfigError::Config(e) => write!(f, "config error: {}", e),
            ConfigError::Validation(msg) => write!(f, "validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

impl From<config::ConfigError> for ConfigError {
    fn from(e: config::ConfigError) -> Self {
        ConfigError::Config(e)
    }
}

/// Root configuration: one section per component.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub log: LogSettings,
    pub hub: HubSettings,
    pub tcp_client: TcpClientSettings,
    pub mqtt: MqttSettings,
    pub signal: SignalSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub level: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Hub section of the configuration file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HubSettings {
    pub use_ssl: bool,
    pub backlog: u32,
    #[serde(with = "humantime_serde")]
    pub connection_timeout: Duration,
    pub keep_alive: Option<u64>,
    pub ssl_cert_file: Option<String>,
    pub ssl_key_file: Option<String>,
    pub ssl_dh_file: Option<String>,
    pub ssl_password: Option<String>,
    pub enable_rate_limiting: bool,
    pub max_connections_per_ip: i64,
    pub max_messages_per_minute: usize,
    pub log_level: String,
}

impl Default for HubSettings {
    fn default() -> Self {
        let defaults = HubConfig::default();
        Self {
            use_ssl: defaults.use_ssl,
            backlog: defaults.backlog,
            connection_timeout: defaults.connection_timeout,
            keep_alive: defaults.keep_alive.map(|d| d.as_secs()),
            ssl_cert_file: None,
            ssl_key_file: None,
            ssl_dh_file: None,
            ssl_password: None,
            enable_rate_limiting: defaults.rate_limit.enabled,
            max_connections_per_ip: defaults.rate_limit.max_connections_per_ip,
            max_messages_per_minute: defaults.rate_limit.max_messages_per_minute,
            log_level: "info".to_string(),
        }
    }
}

impl HubSettings {
    pub fn to_hub_config(&self) -> HubConfig {
        let tls = if self.use_ssl {
            Some(HubTlsConfig {
                cert_file: self.ssl_cert_file.clone().unwrap_or_default(),
                key_file: self.ssl_key_file.clone().unwrap_or_default(),
                ca_file: None,
                dh_file: self.ssl_dh_file.clone(),
                password: self.ssl_password.clone(),
            })
        } else {
            None
        };
        HubConfig {
            use_ssl: self.use_ssl,
            tls,
            backlog: self.backlog,
            connection_timeout: self.connection_timeout,
            keep_alive: self.keep_alive.map(Duration::from_secs),
            rate_limit: RateLimitConfig {
                enabled: self.enable_rate_limiting,
                max_connections_per_ip: self.max_connections_per_ip,
                max_messages_per_minute: self.max_messages_per_minute,
            },
            log_level: parse_hub_log_level(&self.log_level),
        }
    }
}

fn parse_hub_log_level(s: &str) -> LogLevel {
    match s.to_lowercase().as_str() {
        "debug" => LogLevel::Debug,
        "warning" | "warn" => LogLevel::Warning,
        "error" => LogLevel::Error,
        "fatal" => LogLevel::Fatal,
        _ => LogLevel::Info,
    }
}

/// TCP client section of the configuration file. Proxy dialing is not
/// part of the `Transport` trait, so proxy fields have no domain
/// counterpart and are intentionally omitted here.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TcpClientSettings {
    pub use_ssl: bool,
    pub verify_ssl: bool,
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub read_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub write_timeout: Duration,
    pub keep_alive: bool,
    pub reconnect_attempts: u32,
    #[serde(with = "humantime_serde")]
    pub reconnect_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub heartbeat_interval: Duration,
    pub receive_buffer_size: usize,
    pub auto_reconnect: bool,
    pub ssl_certificate_path: Option<String>,
    pub ssl_private_key_path: Option<String>,
    pub ca_certificate_path: Option<String>,
}

impl Default for TcpClientSettings {
    fn default() -> Self {
        let defaults = ConnectionConfig::default();
        Self {
            use_ssl: defaults.use_ssl,
            verify_ssl: defaults.tls.verify_certificate,
            connect_timeout: defaults.connect_timeout,
            read_timeout: defaults.read_timeout,
            write_timeout: defaults.write_timeout,
            keep_alive: defaults.keep_alive,
            reconnect_attempts: defaults.reconnect_attempts,
            reconnect_delay: defaults.reconnect_delay,
            heartbeat_interval: Duration::ZERO,
            receive_buffer_size: defaults.receive_buffer_size,
            auto_reconnect: defaults.auto_reconnect,
            ssl_certificate_path: None,
            ssl_private_key_path: None,
            ca_certificate_path: None,
        }
    }
}

impl TcpClientSettings {
    pub fn to_connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            use_ssl: self.use_ssl,
            tls: TlsClientConfig {
                verify_certificate: self.verify_ssl,
                ca_file: self.ca_certificate_path.clone(),
                client_cert_file: self.ssl_certificate_path.clone(),
                client_key_file: self.ssl_private_key_path.clone(),
            },
            connect_timeout: self.connect_timeout,
            read_timeout: self.read_timeout,
            write_timeout: self.write_timeout,
            keep_alive: self.keep_alive,
            reconnect_attempts: self.reconnect_attempts,
            reconnect_delay: self.reconnect_delay,
            auto_reconnect: self.auto_reconnect,
            receive_buffer_size: self.receive_buffer_size,
            backoff: BackoffConfig {
                base: self.reconnect_delay,
                ..BackoffConfig::default()
            },
        }
    }
}

/// MQTT section of the configuration file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MqttSettings {
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(with = "humantime_serde")]
    pub keep_alive: Duration,
    pub clean_session: bool,
    pub will_topic: Option<String>,
    pub will_payload: Option<String>,
    pub will_qos: u8,
    pub will_retain: bool,
    pub version: MqttVersionSetting,
    pub use_tls: bool,
    pub ca_cert_file: Option<String>,
    pub cert_file: Option<String>,
    pub private_key_file: Option<String>,
    pub verify_certificate: bool,
    pub auto_reconnect: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MqttVersionSetting {
    V311,
    V5,
}

impl Default for MqttVersionSetting {
    fn default() -> Self {
        MqttVersionSetting::V311
    }
}

impl Default for MqttSettings {
    fn default() -> Self {
        let defaults = MqttClientConfig::default();
        Self {
            client_id: defaults.client_id,
            username: defaults.username,
            password: None,
            keep_alive: defaults.keep_alive,
            clean_session: defaults.clean_session,
            will_topic: None,
            will_payload: None,
            will_qos: 0,
            will_retain: false,
            version: MqttVersionSetting::V311,
            use_tls: defaults.use_tls,
            ca_cert_file: None,
            cert_file: None,
            private_key_file: None,
            verify_certificate: defaults.tls.verify_certificate,
            auto_reconnect: defaults.auto_reconnect,
        }
    }
}

impl MqttSettings {
    pub fn to_mqtt_config(&self) -> Result<MqttClientConfig, ConfigError> {
        let will = match (&self.will_topic, &self.will_payload) {
            (Some(topic), Some(payload)) => Some(WillConfig {
                topic: topic.clone(),
                payload: bytes::Bytes::copy_from_slice(payload.as_bytes()),
                qos: QoS::from_u8(self.will_qos).ok_or_else(|| {
                    ConfigError::Validation(format!("will_qos must be 0, 1, or 2, got {}", self.will_qos))
                })?,
                retain: self.will_retain,
            }),
            (None, None) => None,
            _ => {
                return Err(ConfigError::Validation(
                    "will_topic and will_payload must be set together".to_string(),
                ))
            }
        };
        Ok(MqttClientConfig {
            client_id: self.client_id.clone(),
            username: self.username.clone(),
            password: self.password.as_ref().map(|p| bytes::Bytes::copy_from_slice(p.as_bytes())),
            keep_alive: self.keep_alive,
            clean_session: self.clean_session,
            will,
            version: match self.version {
                MqttVersionSetting::V311 => ProtocolVersion::V311,
                MqttVersionSetting::V5 => ProtocolVersion::V5,
            },
            use_tls: self.use_tls,
            tls: MqttTlsConfig {
                ca_cert_file: self.ca_cert_file.clone(),
                cert_file: self.cert_file.clone(),
                private_key_file: self.private_key_file.clone(),
                verify_certificate: self.verify_certificate,
            },
            auto_reconnect: self.auto_reconnect,
        })
    }
}

/// Settings needed to construct a non-default [`crate::signal::SignalBus`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SignalSettings {
    pub worker_count: usize,
    pub queue_capacity: usize,
    #[serde(with = "humantime_serde::option")]
    pub handler_timeout: Option<Duration>,
}

impl Default for SignalSettings {
    fn default() -> Self {
        Self {
            worker_count: 1,
            queue_capacity: 1000,
            handler_timeout: None,
        }
    }
}

impl Config {
    /// Loads from a TOML file with environment variable overrides. A
    /// missing file falls back to defaults, mirroring `from_env`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .set_default("log.level", "info")?
            .set_default("hub.backlog", 1024)?
            .set_default("hub.max_connections_per_ip", 10)?
            .set_default("hub.max_messages_per_minute", 100)?
            .set_default("tcp_client.connect_timeout", "5s")?
            .set_default("tcp_client.read_timeout", "5s")?
            .set_default("tcp_client.write_timeout", "5s")?
            .set_default("tcp_client.reconnect_attempts", 3)?
            .set_default("tcp_client.reconnect_delay", "1s")?
            .set_default("tcp_client.receive_buffer_size", 4096)?
            .set_default("mqtt.keep_alive", "60s")?
            .set_default("mqtt.verify_certificate", true)?
            .set_default("signal.worker_count", 1)?
            .set_default("signal.queue_capacity", 1000)?;

        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let substituted = substitute_env_vars(&content);
                builder = builder.add_source(File::from_str(&substituted, FileFormat::Toml));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(ConfigError::Io(e)),
        }

        let cfg = builder
            .add_source(
                Environment::with_prefix("VIBEMQAIO")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = cfg.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(Path::new(""))
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mqtt.will_qos > 2 {
            return Err(ConfigError::Validation(
                "mqtt.will_qos must be 0, 1, or 2".to_string(),
            ));
        }
        if self.hub.use_ssl && self.hub.ssl_cert_file.is_none() {
            return Err(ConfigError::Validation(
                "hub.ssl_cert_file is required when hub.use_ssl is set".to_string(),
            ));
        }
        if self.mqtt.use_tls && self.mqtt.cert_file.is_none() && self.mqtt.ca_cert_file.is_none() {
            return Err(ConfigError::Validation(
                "mqtt.use_tls requires at least one of cert_file or ca_cert_file".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_into_domain_configs() {
        let config = Config::default();
        let hub = config.hub.to_hub_config();
        assert!(!hub.use_ssl);
        let tcp = config.tcp_client.to_connection_config();
        assert_eq!(tcp.reconnect_attempts, 3);
        let mqtt = config.mqtt.to_mqtt_config().unwrap();
        assert_eq!(mqtt.version, ProtocolVersion::V311);
    }

    #[test]
    fn parses_toml_overrides() {
        let toml = r#"
            [hub]
            use_ssl = true
            ssl_cert_file = "cert.pem"
            ssl_key_file = "key.pem"
            max_connections_per_ip = 5

            [mqtt]
            client_id = "demo"
            will_topic = "clients/demo/lwt"
            will_payload = "offline"
            will_qos = 1
        "#;
        let config = Config::parse(toml).unwrap();
        assert!(config.hub.use_ssl);
        assert_eq!(config.hub.max_connections_per_ip, 5);
        let mqtt = config.mqtt.to_mqtt_config().unwrap();
        assert_eq!(mqtt.client_id, "demo");
        assert!(mqtt.will.is_some());
    }

    #[test]
    fn mismatched_will_fields_fail_validation() {
        let toml = r#"
            [mqtt]
            will_topic = "clients/demo/lwt"
        "#;
        let config = Config::parse(toml).unwrap();
        assert!(config.mqtt.to_mqtt_config().is_err());
    }

    #[test]
    fn substitutes_env_vars_in_file_content() {
        std::env::set_var("VIBEMQAIO_TEST_BIND", "127.0.0.1:9999");
        let content = "value = \"${VIBEMQAIO_TEST_BIND}\"";
        let out = substitute_env_vars(content);
        assert_eq!(out, "value = \"127.0.0.1:9999\"");
        std::env::remove_var("VIBEMQAIO_TEST_BIND");
    }
}
