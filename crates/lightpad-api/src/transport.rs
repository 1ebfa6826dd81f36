// Device transport: TCP + TLS to a single Lightpad.
//
// Owns TLS policy and connect budgets. `DeviceTransport::connect` is one
// attempt per call; retry policy belongs to whoever calls it.

use std::fmt;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use rustls_pki_types::pem::PemObject;
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::auth::Session;
use crate::connection::Connection;
use crate::error::ConnectError;

/// Port the Lightpad control service listens on.
pub const DEFAULT_DEVICE_PORT: u16 = 8443;

/// Default reply budget for a single command.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

// ── DeviceEndpoint ───────────────────────────────────────────────────

/// Where a Lightpad lives and which logical load it drives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEndpoint {
    /// Logical load id the pad controls.
    pub id: String,
    pub address: IpAddr,
    pub port: u16,
    /// TLS on the control channel. Production pads always use it.
    pub encrypted: bool,
}

impl DeviceEndpoint {
    pub fn new(id: impl Into<String>, address: IpAddr) -> Self {
        Self {
            id: id.into(),
            address,
            port: DEFAULT_DEVICE_PORT,
            encrypted: true,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Plain TCP; only useful against simulators and test doubles.
    pub fn plaintext(mut self) -> Self {
        self.encrypted = false;
        self
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }
}

impl fmt::Display for DeviceEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.socket_addr())
    }
}

// ── TransportConfig ──────────────────────────────────────────────────

/// Certificate verification policy for the device channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsMode {
    /// Verify against the bundled web PKI roots.
    System,
    /// Verify against the CA certificates in the given PEM file.
    CustomCa(PathBuf),
    /// Accept any certificate. Pads ship self-signed certificates, so
    /// this is the default for local control.
    #[default]
    DangerAcceptInvalid,
}

/// Connect, handshake and command budgets plus TLS policy.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub tls: TlsMode,
    /// TCP connect and TLS handshake, each.
    pub connect_timeout: Duration,
    /// Reply to the `Hello` frame that presents the house access token.
    pub handshake_timeout: Duration,
    /// Reply to each command.
    pub command_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            tls: TlsMode::default(),
            connect_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(5),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }
}

impl TransportConfig {
    /// Build a rustls client config for this TLS mode.
    pub fn build_tls(&self) -> Result<ClientConfig, ConnectError> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let builder = ClientConfig::builder_with_provider(Arc::clone(&provider))
            .with_safe_default_protocol_versions()
            .map_err(|e| ConnectError::Tls(e.to_string()))?;

        let config = match &self.tls {
            TlsMode::System => {
                let mut roots = RootCertStore::empty();
                roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
                builder.with_root_certificates(roots).with_no_client_auth()
            }
            TlsMode::CustomCa(path) => builder
                .with_root_certificates(load_ca(path)?)
                .with_no_client_auth(),
            TlsMode::DangerAcceptInvalid => builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAnyCert(provider)))
                .with_no_client_auth(),
        };

        Ok(config)
    }
}

fn load_ca(path: &Path) -> Result<RootCertStore, ConnectError> {
    let certs = CertificateDer::pem_file_iter(path)
        .map_err(|e| ConnectError::Tls(format!("failed to read CA cert: {e}")))?;

    let mut roots = RootCertStore::empty();
    for cert in certs {
        let cert = cert.map_err(|e| ConnectError::Tls(format!("invalid CA cert: {e}")))?;
        roots
            .add(cert)
            .map_err(|e| ConnectError::Tls(format!("invalid CA cert: {e}")))?;
    }

    if roots.is_empty() {
        return Err(ConnectError::Tls(format!(
            "no certificates found in {}",
            path.display()
        )));
    }
    Ok(roots)
}

/// Verifier for self-signed pads: skips chain validation but still
/// checks handshake signatures so the session keys are bound to the
/// presented certificate.
#[derive(Debug)]
struct AcceptAnyCert(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

// ── Connector seam ───────────────────────────────────────────────────

/// Anything that can turn an endpoint plus a session into a live
/// [`Connection`]. The subscription layer is generic over this so tests
/// can count and script connect attempts.
pub trait DeviceConnector: Send + Sync {
    fn connect(
        &self,
        endpoint: &DeviceEndpoint,
        session: &Arc<Session>,
    ) -> impl Future<Output = Result<Connection, ConnectError>> + Send;
}

/// The real connector: TCP, optional TLS, then the `Hello` handshake.
pub struct DeviceTransport {
    config: TransportConfig,
    tls: tokio_rustls::TlsConnector,
}

impl DeviceTransport {
    pub fn new(config: TransportConfig) -> Result<Self, ConnectError> {
        let tls = tokio_rustls::TlsConnector::from(Arc::new(config.build_tls()?));
        Ok(Self { config, tls })
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }
}

impl DeviceConnector for DeviceTransport {
    async fn connect(
        &self,
        endpoint: &DeviceEndpoint,
        session: &Arc<Session>,
    ) -> Result<Connection, ConnectError> {
        if session.is_expired() {
            return Err(ConnectError::AuthRejected {
                reason: "session expired".into(),
            });
        }

        let addr = endpoint.socket_addr();
        let budget = self.config.connect_timeout;
        debug!(%endpoint, encrypted = endpoint.encrypted, "connecting to lightpad");

        let tcp = timeout(budget, TcpStream::connect(addr))
            .await
            .map_err(|_| ConnectError::Timeout {
                timeout_ms: millis(budget),
            })?
            .map_err(|e| ConnectError::Unreachable {
                addr: addr.to_string(),
                reason: e.to_string(),
            })?;
        if let Err(e) = tcp.set_nodelay(true) {
            debug!(error = %e, "could not disable Nagle");
        }

        if !endpoint.encrypted {
            return Connection::establish(tcp, endpoint.clone(), Arc::clone(session), &self.config)
                .await;
        }

        let server_name = ServerName::IpAddress(endpoint.address.into());
        let tls = timeout(budget, self.tls.connect(server_name, tcp))
            .await
            .map_err(|_| ConnectError::Timeout {
                timeout_ms: millis(budget),
            })?
            .map_err(|e| ConnectError::Tls(e.to_string()))?;

        Connection::establish(tls, endpoint.clone(), Arc::clone(session), &self.config).await
    }
}

pub(crate) fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;
    use std::net::Ipv4Addr;

    fn endpoint() -> DeviceEndpoint {
        DeviceEndpoint::new("load-1", IpAddr::V4(Ipv4Addr::new(192, 168, 1, 10)))
    }

    #[test]
    fn endpoint_defaults() {
        let ep = endpoint();
        assert_eq!(ep.port, DEFAULT_DEVICE_PORT);
        assert!(ep.encrypted);
        assert_eq!(ep.to_string(), "load-1@192.168.1.10:8443");

        let ep = ep.with_port(9000).plaintext();
        assert!(!ep.encrypted);
        assert_eq!(ep.socket_addr().port(), 9000);
    }

    #[test]
    fn default_config_trusts_self_signed_pads() {
        let config = TransportConfig::default();
        assert_eq!(config.tls, TlsMode::DangerAcceptInvalid);
        assert_eq!(config.command_timeout, Duration::from_secs(5));
        assert!(config.build_tls().is_ok());
    }

    #[test]
    fn system_roots_build() {
        let config = TransportConfig {
            tls: TlsMode::System,
            ..TransportConfig::default()
        };
        assert!(config.build_tls().is_ok());
    }

    #[test]
    fn missing_ca_file_is_tls_error() {
        let config = TransportConfig {
            tls: TlsMode::CustomCa("/nonexistent/lightpad-ca.pem".into()),
            ..TransportConfig::default()
        };
        assert!(matches!(config.build_tls(), Err(ConnectError::Tls(_))));
    }

    #[tokio::test]
    async fn expired_session_is_rejected_without_io() {
        let transport = DeviceTransport::new(TransportConfig::default()).unwrap();
        let session = Arc::new(Session::new(
            "house",
            SecretString::from("hat".to_string()),
            None,
        ));
        session.expire();

        // Port 9 on TEST-NET-1: would hang or fail if a socket were attempted.
        let ep = DeviceEndpoint::new("load", IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1))).with_port(9);
        let err = transport.connect(&ep, &session).await.unwrap_err();
        assert!(err.is_auth_rejected(), "got {err:?}");
    }

    #[tokio::test]
    async fn refused_port_is_unreachable() {
        // Bind then drop to get a local port that is very likely closed.
        let port = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        let transport = DeviceTransport::new(TransportConfig::default()).unwrap();
        let session = Arc::new(Session::new(
            "house",
            SecretString::from("hat".to_string()),
            None,
        ));
        let ep = DeviceEndpoint::new("load", IpAddr::V4(Ipv4Addr::LOCALHOST))
            .with_port(port)
            .plaintext();

        let err = transport.connect(&ep, &session).await.unwrap_err();
        assert!(matches!(err, ConnectError::Unreachable { .. }), "got {err:?}");
    }
}
