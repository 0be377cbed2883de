//! TLS configuration for connections to PostgreSQL.
//!
//! The negotiated behaviour follows libpq's `sslmode`:
//!
//! | mode          | TLS attempted | plaintext fallback | chain checked | host name checked |
//! |---------------|---------------|--------------------|---------------|-------------------|
//! | `disable`     | no            | n/a                | no            | no                |
//! | `prefer`      | yes           | yes                | no            | no                |
//! | `require`     | yes           | no                 | only with CA  | no                |
//! | `verify-ca`   | yes           | no                 | yes           | no                |
//! | `verify-full` | yes           | no                 | yes           | yes               |

use crate::{Error, Result};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::{WantsClientCert, WebPkiServerVerifier};
use rustls::{
    CertificateError, ClientConfig, ConfigBuilder, DigitallySignedStruct, RootCertStore,
    SignatureScheme,
};
use rustls_pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// SSL/TLS connection mode matching PostgreSQL `sslmode` parameter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SslMode {
    /// No TLS (plaintext connection)
    Disable,
    /// Try TLS, fall back to plaintext if the server declines
    #[default]
    Prefer,
    /// TLS required, server certificate is not verified
    Require,
    /// TLS required, server certificate must chain to a trusted CA
    VerifyCa,
    /// Like `VerifyCa`, and the host name must match the certificate
    VerifyFull,
}

impl SslMode {
    /// Whether this mode requires certificate verification (CA or full)
    pub fn requires_verification(&self) -> bool {
        matches!(self, Self::VerifyCa | Self::VerifyFull)
    }

    /// Whether an SSLRequest is sent at all
    pub fn attempts_tls(&self) -> bool {
        !matches!(self, Self::Disable)
    }

    /// Whether a server that declines TLS is accepted over plaintext
    pub fn allows_plaintext(&self) -> bool {
        matches!(self, Self::Disable | Self::Prefer)
    }
}

impl std::fmt::Display for SslMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disable => write!(f, "disable"),
            Self::Prefer => write!(f, "prefer"),
            Self::Require => write!(f, "require"),
            Self::VerifyCa => write!(f, "verify-ca"),
            Self::VerifyFull => write!(f, "verify-full"),
        }
    }
}

impl std::str::FromStr for SslMode {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "disable" => Ok(Self::Disable),
            "prefer" => Ok(Self::Prefer),
            "require" => Ok(Self::Require),
            "verify-ca" => Ok(Self::VerifyCa),
            "verify-full" => Ok(Self::VerifyFull),
            _ => Err(Error::Config(format!(
                "invalid sslmode '{}': expected disable, prefer, require, verify-ca, or verify-full",
                s
            ))),
        }
    }
}

/// Compiled TLS settings for one connection target.
#[derive(Clone)]
pub struct TlsConfig {
    mode: SslMode,
    ca_cert_path: Option<PathBuf>,
    client_cert_path: Option<PathBuf>,
    client_config: Arc<ClientConfig>,
}

impl TlsConfig {
    /// Create a new TLS configuration builder.
    ///
    /// ```ignore
    /// let tls = TlsConfig::builder(SslMode::VerifyCa)
    ///     .ca_cert_path("/etc/ssl/pg/root.crt")
    ///     .build()?;
    /// ```
    pub fn builder(mode: SslMode) -> TlsConfigBuilder {
        TlsConfigBuilder {
            mode,
            ca_cert_path: None,
            client_cert_path: None,
            client_key_path: None,
        }
    }

    /// The `sslmode` this configuration was built for
    pub fn mode(&self) -> SslMode {
        self.mode
    }

    /// Get the rustls ClientConfig for this TLS configuration.
    pub fn client_config(&self) -> Arc<ClientConfig> {
        self.client_config.clone()
    }

    /// Whether a client certificate is presented
    pub fn has_client_cert(&self) -> bool {
        self.client_cert_path.is_some()
    }
}

impl std::fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConfig")
            .field("mode", &self.mode)
            .field("ca_cert_path", &self.ca_cert_path)
            .field("client_cert_path", &self.client_cert_path)
            .field("client_config", &"<ClientConfig>")
            .finish()
    }
}

/// Builder for [`TlsConfig`].
#[derive(Debug, Clone)]
pub struct TlsConfigBuilder {
    mode: SslMode,
    ca_cert_path: Option<PathBuf>,
    client_cert_path: Option<PathBuf>,
    client_key_path: Option<PathBuf>,
}

impl TlsConfigBuilder {
    /// Trust anchors in PEM format (`sslrootcert`).
    ///
    /// If not set, system root certificates are used, falling back to the
    /// bundled Mozilla roots when the system store is empty.
    pub fn ca_cert_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_cert_path = Some(path.into());
        self
    }

    /// Client certificate chain in PEM format (`sslcert`)
    pub fn client_cert_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.client_cert_path = Some(path.into());
        self
    }

    /// Client private key in PEM format (`sslkey`)
    pub fn client_key_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.client_key_path = Some(path.into());
        self
    }

    /// Build the TLS configuration.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if:
    /// - the mode is `disable`
    /// - a certificate or key file cannot be read or parsed
    /// - only one of client certificate and key is given
    pub fn build(self) -> Result<TlsConfig> {
        let builder = match self.mode {
            SslMode::Disable => {
                return Err(Error::Config(
                    "TLS configuration requested with sslmode=disable".into(),
                ))
            }
            // libpq verifies the chain in require mode once a root cert is given
            SslMode::Require if self.ca_cert_path.is_some() => {
                self.chain_only_builder(self.root_store()?)?
            }
            SslMode::Prefer | SslMode::Require => ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(NoVerifier)),
            SslMode::VerifyCa => self.chain_only_builder(self.root_store()?)?,
            SslMode::VerifyFull => ClientConfig::builder().with_root_certificates(self.root_store()?),
        };

        let config = match (&self.client_cert_path, &self.client_key_path) {
            (None, None) => builder.with_no_client_auth(),
            (Some(cert), Some(key)) => builder
                .with_client_auth_cert(load_certs(cert)?, load_private_key(key)?)
                .map_err(|e| Error::Config(format!("invalid client certificate: {}", e)))?,
            _ => {
                return Err(Error::Config(
                    "client certificate and key must be given together".into(),
                ))
            }
        };

        Ok(TlsConfig {
            mode: self.mode,
            ca_cert_path: self.ca_cert_path,
            client_cert_path: self.client_cert_path,
            client_config: Arc::new(config),
        })
    }

    fn chain_only_builder(
        &self,
        roots: RootCertStore,
    ) -> Result<ConfigBuilder<ClientConfig, WantsClientCert>> {
        let inner = WebPkiServerVerifier::builder(Arc::new(roots))
            .build()
            .map_err(|e| Error::Config(format!("failed to build certificate verifier: {}", e)))?;
        Ok(ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(ChainOnlyVerifier { inner })))
    }

    fn root_store(&self) -> Result<RootCertStore> {
        if let Some(ca_path) = &self.ca_cert_path {
            return load_custom_ca(ca_path);
        }

        let result = rustls_native_certs::load_native_certs();
        let mut store = RootCertStore::empty();
        let (added, _ignored) = store.add_parsable_certificates(result.certs);
        if !result.errors.is_empty() {
            tracing::debug!(
                errors = result.errors.len(),
                "some system root certificates could not be loaded"
            );
        }

        if added == 0 {
            tracing::debug!("no usable system root certificates, using bundled roots");
            store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        }
        Ok(store)
    }
}

fn read_pem(path: &Path, what: &str) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| {
        Error::Config(format!(
            "failed to read {} file '{}': {}",
            what,
            path.display(),
            e
        ))
    })
}

/// Load a custom CA certificate bundle from a PEM file.
fn load_custom_ca(path: &Path) -> Result<RootCertStore> {
    let mut root_store = RootCertStore::empty();
    let (added, _ignored) = root_store.add_parsable_certificates(load_certs(path)?);
    if added == 0 {
        return Err(Error::Config(format!(
            "no valid certificates found in '{}'",
            path.display()
        )));
    }
    Ok(root_store)
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let data = read_pem(path, "certificate")?;
    let certs = rustls_pemfile::certs(&mut data.as_slice())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|_| {
            Error::Config(format!(
                "failed to parse certificate from '{}'",
                path.display()
            ))
        })?;
    if certs.is_empty() {
        return Err(Error::Config(format!(
            "no valid certificates found in '{}'",
            path.display()
        )));
    }
    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let data = read_pem(path, "private key")?;
    rustls_pemfile::private_key(&mut data.as_slice())
        .map_err(|_| {
            Error::Config(format!(
                "failed to parse private key from '{}'",
                path.display()
            ))
        })?
        .ok_or_else(|| Error::Config(format!("no private key found in '{}'", path.display())))
}

/// Server name for SNI and host name verification.
pub fn server_name(host: &str) -> Result<ServerName<'static>> {
    let host = host.trim_end_matches('.');
    ServerName::try_from(host.to_string())
        .map_err(|_| Error::Config(format!("invalid hostname for TLS: '{}'", host)))
}

/// Accepts any certificate (`prefer` and `require`).
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
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
        ]
    }
}

/// Full WebPKI chain validation that tolerates a host name mismatch (`verify-ca`).
#[derive(Debug)]
struct ChainOnlyVerifier {
    inner: Arc<WebPkiServerVerifier>,
}

impl ServerCertVerifier for ChainOnlyVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        match self.inner.verify_server_cert(
            end_entity,
            intermediates,
            server_name,
            ocsp_response,
            now,
        ) {
            Err(rustls::Error::InvalidCertificate(
                CertificateError::NotValidForName | CertificateError::NotValidForNameContext { .. },
            )) => Ok(ServerCertVerified::assertion()),
            other => other,
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}
