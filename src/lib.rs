//! vibemq-aio: asynchronous networking primitives.
//!
//! Four independent components share a byte-buffer/error/transport
//! foundation: [`hub`] (an accepting server fanning reads out to
//! per-client tasks), `tcp_client` (a reconnecting outbound TCP/TLS
//! client), `mqtt` (an MQTT 3.1.1/5.0 client), and `signal` (a
//! priority-ordered signal dispatcher delivered off dedicated worker
//! threads).

pub mod buffer;
pub mod codec;
pub mod config;
pub mod error;
pub mod hub;
pub mod mqtt;
pub mod protocol;
pub mod signal;
pub mod tcp_client;
pub mod timer;
pub mod transport;

pub use config::Config;
pub use error::ErrorKind;
pub use hub::SocketHub;
pub use mqtt::MqttClient;
pub use signal::SignalBus;
pub use tcp_client::TcpClient;
