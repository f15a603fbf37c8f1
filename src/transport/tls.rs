//! TLS-over-TCP transport.
//!
//! Builds both a server acceptor config (for `SocketHub`) and a client
//! connector config (for `TcpClient` and `MqttClient`), since both
//! sides of this crate need TLS.

use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use tokio_rustls::rustls::pki_types::pem::PemObject;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use tokio_rustls::rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, ServerConfig, SignatureScheme};
use tokio_rustls::{client::TlsStream as ClientTlsStream, server::TlsStream as ServerTlsStream, TlsAcceptor, TlsConnector};

use super::{TcpOptions, Transport};
use crate::error::ErrorKind;

/// Errors that can occur while loading certificate/key material.
#[derive(Debug)]
pub enum TlsError {
    Io(std::io::Error),
    Certificate(String),
    PrivateKey(String),
    Config(String),
}

impl std::fmt::Display for TlsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TlsError::Io(e) => write!(f, "io error: {}", e),
            TlsError::Certificate(msg) => write!(f, "certificate error: {}", msg),
            TlsError::PrivateKey(msg) => write!(f, "private key error: {}", msg),
            TlsError::Config(msg) => write!(f, "tls config error: {}", msg),
        }
    }
}

impl std::error::Error for TlsError {}

impl From<std::io::Error> for TlsError {
    fn from(e: std::io::Error) -> Self {
        TlsError::Io(e)
    }
}

fn load_certs(path: &str) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let certs: Vec<CertificateDer<'static>> = CertificateDer::pem_reader_iter(reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsError::Certificate(format!("failed to parse {}: {}", path, e)))?;
    if certs.is_empty() {
        return Err(TlsError::Certificate(format!("no certificates in {}", path)));
    }
    Ok(certs)
}

fn load_private_key(path: &str) -> Result<PrivateKeyDer<'static>, TlsError> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    PrivateKeyDer::from_pem_reader(reader)
        .map_err(|e| TlsError::PrivateKey(format!("failed to parse {}: {}", path, e)))
}

fn load_root_store(path: &str) -> Result<RootCertStore, TlsError> {
    let mut store = RootCertStore::empty();
    for cert in load_certs(path)? {
        store
            .add(cert)
            .map_err(|e| TlsError::Certificate(format!("failed to add CA cert: {}", e)))?;
    }
    Ok(store)
}

/// Server-side config: certificate chain + private key, optional mutual TLS.
pub fn load_server_tls_config(
    cert_file: &str,
    key_file: &str,
    ca_file: Option<&str>,
) -> Result<Arc<ServerConfig>, TlsError> {
    let certs = load_certs(cert_file)?;
    let key = load_private_key(key_file)?;

    let builder = ServerConfig::builder();
    let config = if let Some(ca_path) = ca_file {
        let root_store = load_root_store(ca_path)?;
        let verifier = tokio_rustls::rustls::server::WebPkiClientVerifier::builder(Arc::new(root_store))
            .allow_unauthenticated()
            .build()
            .map_err(|e| TlsError::Config(format!("client verifier: {}", e)))?;
        builder
            .with_client_cert_verifier(verifier)
            .with_single_cert(certs, key)
    } else {
        builder.with_no_client_auth().with_single_cert(certs, key)
    }
    .map_err(|e| TlsError::Config(format!("server config: {}", e)))?;

    Ok(Arc::new(config))
}

/// Client-side config. `verify_certificate = false` installs a verifier
/// that accepts any server certificate (used only when the caller has
/// explicitly opted out of server verification).
pub fn load_client_tls_config(
    ca_file: Option<&str>,
    client_cert_file: Option<&str>,
    client_key_file: Option<&str>,
    verify_certificate: bool,
) -> Result<Arc<ClientConfig>, TlsError> {
    let with_client_cert = |builder: tokio_rustls::rustls::ConfigBuilder<
        ClientConfig,
        tokio_rustls::rustls::client::WantsClientCert,
    >|
     -> Result<Arc<ClientConfig>, TlsError> {
        let config = match (client_cert_file, client_key_file) {
            (Some(cert), Some(key)) => {
                let certs = load_certs(cert)?;
                let key = load_private_key(key)?;
                builder
                    .with_client_auth_cert(certs, key)
                    .map_err(|e| TlsError::Config(format!("client auth cert: {}", e)))?
            }
            _ => builder.with_no_client_auth(),
        };
        Ok(Arc::new(config))
    };

    if !verify_certificate {
        let builder = ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerifier));
        return with_client_cert(builder);
    }

    let ca_file = ca_file.ok_or_else(|| {
        TlsError::Config("verify_certificate requires ca_cert_file to be set".to_string())
    })?;
    let root_store = load_root_store(ca_file)?;
    with_client_cert(ClientConfig::builder().with_root_certificates(root_store))
}

/// Accepts any server certificate. Only reachable when the caller
/// disables verification explicitly (`verify_certificate = false`).
#[derive(Debug)]
struct NoVerifier;

impl ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, tokio_rustls::rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ED25519,
        ]
    }
}

enum State {
    Closed,
    Client(ClientTlsStream<TcpStream>),
    Server(ServerTlsStream<TcpStream>),
}

/// `Transport` implementation performing a TLS handshake over TCP.
///
/// Either wraps an already-accepted TCP stream as a server (`from_accepted`)
/// or connects and handshakes as a client (`connect`). The handshake
/// failure is surfaced as `ErrorKind::ServerUnavailable` distinctly from a
/// bare TCP connect failure by happening strictly after `connect` returns.
pub struct TlsTransport {
    state: State,
    tcp_options: TcpOptions,
    client_config: Option<Arc<ClientConfig>>,
}

impl TlsTransport {
    pub fn new_client(tcp_options: TcpOptions, client_config: Arc<ClientConfig>) -> Self {
        Self {
            state: State::Closed,
            tcp_options,
            client_config: Some(client_config),
        }
    }

    /// Accept a server-side connection by running the handshake on an
    /// already-connected socket (the `SocketHub` accept path).
    pub async fn from_accepted(
        stream: TcpStream,
        tcp_options: TcpOptions,
        acceptor: &TlsAcceptor,
    ) -> Result<Self, ErrorKind> {
        let sock = socket2::SockRef::from(&stream);
        if tcp_options.nodelay {
            let _ = sock.set_nodelay(true);
        }
        let tls_stream = acceptor
            .accept(stream)
            .await
            .map_err(|_| ErrorKind::ServerUnavailable)?;
        Ok(Self {
            state: State::Server(tls_stream),
            tcp_options,
            client_config: None,
        })
    }
}

#[async_trait]
impl Transport for TlsTransport {
    async fn connect(&mut self, host: &str, port: u16) -> Result<(), ErrorKind> {
        let config = self
            .client_config
            .clone()
            .ok_or(ErrorKind::Unspecified)?;
        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|_| ErrorKind::ServerUnavailable)?;
        stream.set_nodelay(self.tcp_options.nodelay).ok();

        let connector = TlsConnector::from(config);
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|_| ErrorKind::Malformed)?;
        let tls_stream = connector
            .connect(server_name, stream)
            .await
            .map_err(|_| ErrorKind::ServerUnavailable)?;

        self.state = State::Client(tls_stream);
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, ErrorKind> {
        match &mut self.state {
            State::Client(s) => s.read(buf).await.map_err(|_| ErrorKind::Closed),
            State::Server(s) => s.read(buf).await.map_err(|_| ErrorKind::Closed),
            State::Closed => Err(ErrorKind::Closed),
        }
    }

    async fn write(&mut self, buf: &[u8]) -> Result<usize, ErrorKind> {
        match &mut self.state {
            State::Client(s) => s.write_all(buf).await.map_err(|_| ErrorKind::Closed)?,
            State::Server(s) => s.write_all(buf).await.map_err(|_| ErrorKind::Closed)?,
            State::Closed => return Err(ErrorKind::Closed),
        };
        Ok(buf.len())
    }

    async fn close(&mut self) {
        match std::mem::replace(&mut self.state, State::Closed) {
            State::Client(mut s) => {
                let _ = s.shutdown().await;
            }
            State::Server(mut s) => {
                let _ = s.shutdown().await;
            }
            State::Closed => {}
        }
    }

    fn is_open(&self) -> bool {
        !matches!(self.state, State::Closed)
    }
}
