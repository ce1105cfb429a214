//! Dial configuration
//!
//! [`DialConfigBuilder`] assembles everything the connector needs: the
//! target URL, TLS settings, an optional forward proxy, and the extra
//! request headers (including Basic authentication for the tunnel endpoint).
//! The resulting [`DialConfig`] is immutable.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_tungstenite::tungstenite::http::header::{HeaderName, HeaderValue, AUTHORIZATION};
use tokio_tungstenite::tungstenite::http::HeaderMap;
use tracing::debug;
use url::Url;
use wspipe_auth::{basic_authorization, Credential};
use wspipe_transport::ConfigError;

const TARGET_SCHEMES: &str = "ws or wss";
const PROXY_SCHEMES: &str = "http";

/// Everything needed to dial the tunnel endpoint
#[derive(Debug, Clone)]
pub struct DialConfig {
    target: Url,
    tls: TlsSettings,
    forward_proxy: Option<ForwardProxy>,
    headers: HeaderMap,
    capture_rejection_body: bool,
}

impl DialConfig {
    pub fn builder(target: impl Into<String>) -> DialConfigBuilder {
        DialConfigBuilder::new(target)
    }

    pub fn target(&self) -> &Url {
        &self.target
    }

    pub fn tls(&self) -> &TlsSettings {
        &self.tls
    }

    pub fn forward_proxy(&self) -> Option<&ForwardProxy> {
        self.forward_proxy.as_ref()
    }

    /// Extra headers sent with the upgrade request
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Whether the body of a rejected upgrade is kept for diagnostics
    pub fn captures_rejection_body(&self) -> bool {
        self.capture_rejection_body
    }

    pub fn is_secure(&self) -> bool {
        self.target.scheme() == "wss"
    }
}

/// TLS settings for `wss` targets
#[derive(Clone)]
pub struct TlsSettings {
    insecure_skip_verify: bool,
    client_certificate: Option<PathBuf>,
    client_config: Arc<rustls::ClientConfig>,
}

impl std::fmt::Debug for TlsSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsSettings")
            .field("insecure_skip_verify", &self.insecure_skip_verify)
            .field("client_certificate", &self.client_certificate)
            .finish()
    }
}

impl TlsSettings {
    pub fn insecure_skip_verify(&self) -> bool {
        self.insecure_skip_verify
    }

    /// Path of the client certificate presented during the handshake
    pub fn client_certificate(&self) -> Option<&Path> {
        self.client_certificate.as_deref()
    }

    pub(crate) fn connector(&self) -> tokio_rustls::TlsConnector {
        tokio_rustls::TlsConnector::from(self.client_config.clone())
    }
}

/// Forward proxy the connection is routed through
#[derive(Clone)]
pub struct ForwardProxy {
    /// Proxy URL with the credential embedded as userinfo
    url: Url,
    credential: Credential,
}

impl std::fmt::Debug for ForwardProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForwardProxy")
            .field("host", &self.url.host_str())
            .field("port", &self.url.port_or_known_default())
            .field("username", &self.credential.username)
            .finish()
    }
}

impl ForwardProxy {
    fn new(raw: &str, credential: Credential) -> Result<Self, ConfigError> {
        let mut url = parse_url(raw)?;
        if url.scheme() != "http" {
            return Err(ConfigError::UnsupportedScheme {
                url: raw.to_string(),
                scheme: url.scheme().to_string(),
                expected: PROXY_SCHEMES,
            });
        }

        let embed_failed = |_| ConfigError::UrlParse {
            url: raw.to_string(),
            reason: "cannot carry credentials".to_string(),
        };
        url.set_username(&credential.username).map_err(embed_failed)?;
        url.set_password(Some(&credential.password))
            .map_err(embed_failed)?;

        Ok(Self { url, credential })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// `host:port` of the proxy itself, for log lines
    pub fn display_addr(&self) -> String {
        format!(
            "{}:{}",
            self.url.host_str().unwrap_or_default(),
            self.url.port_or_known_default().unwrap_or(80)
        )
    }

    /// Value of the `Proxy-Authorization` header sent with CONNECT
    pub fn authorization(&self) -> String {
        basic_authorization(&self.credential)
    }
}

/// Builder for [`DialConfig`]
#[derive(Debug, Default)]
pub struct DialConfigBuilder {
    target: String,
    insecure_skip_verify: bool,
    forward_proxy: Option<(String, Credential)>,
    basic_auth: Option<Credential>,
    client_certificate: Option<(PathBuf, PathBuf)>,
    headers: Vec<(String, String)>,
    capture_rejection_body: bool,
}

impl DialConfigBuilder {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            ..Default::default()
        }
    }

    /// Disable server certificate verification (INSECURE)
    pub fn insecure_skip_verify(mut self, insecure: bool) -> Self {
        self.insecure_skip_verify = insecure;
        self
    }

    /// Route the connection through an HTTP forward proxy
    pub fn forward_proxy(mut self, url: impl Into<String>, credential: Credential) -> Self {
        self.forward_proxy = Some((url.into(), credential));
        self
    }

    /// Authenticate to the tunnel endpoint with HTTP Basic auth
    pub fn basic_auth(mut self, credential: Credential) -> Self {
        self.basic_auth = Some(credential);
        self
    }

    /// Present a client certificate (PEM chain and PEM key)
    pub fn client_certificate(
        mut self,
        cert_path: impl Into<PathBuf>,
        key_path: impl Into<PathBuf>,
    ) -> Self {
        self.client_certificate = Some((cert_path.into(), key_path.into()));
        self
    }

    /// Add a header to the upgrade request
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Keep the response body when the endpoint rejects the upgrade
    pub fn capture_rejection_body(mut self, capture: bool) -> Self {
        self.capture_rejection_body = capture;
        self
    }

    pub fn build(self) -> Result<DialConfig, ConfigError> {
        let target = parse_url(&self.target)?;
        if !matches!(target.scheme(), "ws" | "wss") {
            return Err(ConfigError::UnsupportedScheme {
                url: self.target.clone(),
                scheme: target.scheme().to_string(),
                expected: TARGET_SCHEMES,
            });
        }

        let forward_proxy = self
            .forward_proxy
            .map(|(url, credential)| ForwardProxy::new(&url, credential))
            .transpose()?;

        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            let header_name =
                HeaderName::from_bytes(name.as_bytes()).map_err(|e| ConfigError::InvalidHeader {
                    name: name.clone(),
                    reason: e.to_string(),
                })?;
            let header_value =
                HeaderValue::from_str(value).map_err(|e| ConfigError::InvalidHeader {
                    name: name.clone(),
                    reason: e.to_string(),
                })?;
            headers.append(header_name, header_value);
        }

        if let Some(credential) = &self.basic_auth {
            let value = HeaderValue::from_str(&basic_authorization(credential)).map_err(|e| {
                ConfigError::InvalidHeader {
                    name: AUTHORIZATION.to_string(),
                    reason: e.to_string(),
                }
            })?;
            headers.insert(AUTHORIZATION, value);
        }

        let identity = self
            .client_certificate
            .as_ref()
            .map(|(cert, key)| load_client_identity(cert, key))
            .transpose()?;
        let client_config = build_client_config(self.insecure_skip_verify, identity)?;

        debug!(
            "Dial configuration ready for {} (proxy: {}, client cert: {}, insecure: {})",
            target,
            forward_proxy.is_some(),
            self.client_certificate.is_some(),
            self.insecure_skip_verify
        );

        Ok(DialConfig {
            target,
            tls: TlsSettings {
                insecure_skip_verify: self.insecure_skip_verify,
                client_certificate: self.client_certificate.map(|(cert, _)| cert),
                client_config,
            },
            forward_proxy,
            headers,
            capture_rejection_body: self.capture_rejection_body,
        })
    }
}

fn parse_url(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw).map_err(|e| ConfigError::UrlParse {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    if url.host().is_none() {
        return Err(ConfigError::UrlParse {
            url: raw.to_string(),
            reason: "missing host".to_string(),
        });
    }
    Ok(url)
}

type ClientIdentity = (
    Vec<rustls::pki_types::CertificateDer<'static>>,
    rustls::pki_types::PrivateKeyDer<'static>,
);

fn build_client_config(
    insecure_skip_verify: bool,
    identity: Option<ClientIdentity>,
) -> Result<Arc<rustls::ClientConfig>, ConfigError> {
    ensure_crypto_provider();

    let builder = rustls::ClientConfig::builder();
    let builder = if insecure_skip_verify {
        builder
            .dangerous()
            .with_custom_certificate_verifier(SkipVerification::new())
    } else {
        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        builder.with_root_certificates(roots)
    };

    let client_crypto = match identity {
        Some((chain, key)) => builder
            .with_client_auth_cert(chain, key)
            .map_err(|e| ConfigError::CertificateLoad(format!("Invalid cert/key: {}", e)))?,
        None => builder.with_no_client_auth(),
    };

    Ok(Arc::new(client_crypto))
}

// Initialize rustls crypto provider
static CRYPTO_PROVIDER_INIT: std::sync::Once = std::sync::Once::new();

fn ensure_crypto_provider() {
    CRYPTO_PROVIDER_INIT.call_once(|| {
        if rustls::crypto::ring::default_provider()
            .install_default()
            .is_err()
        {
            debug!("Rustls crypto provider already installed");
        }
    });
}

fn load_client_identity(cert_path: &Path, key_path: &Path) -> Result<ClientIdentity, ConfigError> {
    let chain = load_certs(cert_path)?;
    if chain.is_empty() {
        return Err(ConfigError::CertificateLoad(format!(
            "No certificates found in {:?}",
            cert_path
        )));
    }
    let key = load_private_key(key_path)?;
    Ok((chain, key))
}

fn load_certs(
    path: &Path,
) -> Result<Vec<rustls::pki_types::CertificateDer<'static>>, ConfigError> {
    let file = File::open(path).map_err(|e| {
        ConfigError::CertificateLoad(format!("Failed to open cert file {:?}: {}", path, e))
    })?;
    let mut reader = BufReader::new(file);

    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ConfigError::CertificateLoad(format!("Failed to parse certs: {}", e)))
}

fn load_private_key(path: &Path) -> Result<rustls::pki_types::PrivateKeyDer<'static>, ConfigError> {
    let file = File::open(path).map_err(|e| {
        ConfigError::CertificateLoad(format!("Failed to open key file {:?}: {}", path, e))
    })?;
    let mut reader = BufReader::new(file);

    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| ConfigError::CertificateLoad(format!("Failed to parse key: {}", e)))?
        .ok_or_else(|| {
            ConfigError::CertificateLoad(format!("No private key found in {:?}", path))
        })
}

// Certificate verifier that skips verification (INSECURE)
#[derive(Debug)]
struct SkipVerification;

impl SkipVerification {
    fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

impl rustls::client::danger::ServerCertVerifier for SkipVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
