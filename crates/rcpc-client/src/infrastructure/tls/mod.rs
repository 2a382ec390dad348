//! Secure session factory: the TLS client context used to reach the host.
//!
//! The host application is not rooted in a public CA.  It trusts exactly the
//! client certificates issued for it, and the client trusts exactly the host
//! certificate(s) shipped with it.  [`SecureSessionFactory`] turns that
//! credential material into a reusable `rustls` client configuration and hands
//! out [`TlsConnector`]s built from it.
//!
//! # Degraded mode
//!
//! When the credential material cannot be loaded the factory does not fail.
//! It logs the problem and falls back to a default context: public web PKI
//! roots, no client certificate.  Such a context cannot complete a handshake
//! with a real host, so callers that need mutual authentication check
//! [`SecureSessionFactory::is_mutual`] and treat the fallback as a
//! configuration error.
//!
//! Both contexts accept TLS 1.3 only.

use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::{ClientConfig, RootCertStore};
use thiserror::Error;
use tokio_rustls::TlsConnector;
use tracing::{info, warn};

use crate::infrastructure::storage::config::TlsSettings;

/// Errors raised while loading credential material or building the context.
#[derive(Debug, Error)]
pub enum CredentialError {
    /// A required credential path is not configured.
    #[error("no {0} configured")]
    MissingPath(&'static str),

    /// A credential file could not be read.
    #[error("cannot read {what} at {path}: {source}")]
    Io {
        what: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A PEM section could not be parsed.
    #[error("malformed PEM in {what}: {source}")]
    Pem {
        what: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// The PEM input contained no certificate.
    #[error("no certificate found in {0}")]
    NoCertificates(&'static str),

    /// The PEM input contained no private key.
    #[error("no private key found in client key")]
    NoPrivateKey,

    /// `rustls` rejected the material (bad key, key/cert mismatch, bad anchor).
    #[error("TLS configuration rejected: {0}")]
    Rustls(#[from] rustls::Error),
}

const CLIENT_CERT: &str = "client certificate";
const CLIENT_KEY: &str = "client key";
const TRUST_ANCHORS: &str = "trust anchors";

// ── Credential material ───────────────────────────────────────────────────────

/// Client identity plus the host certificates it trusts.
#[derive(Debug)]
pub struct CredentialMaterial {
    /// Certificate chain presented to the host, leaf first.
    pub cert_chain: Vec<CertificateDer<'static>>,
    /// Private key for the leaf certificate.
    pub private_key: PrivateKeyDer<'static>,
    /// Certificates the host must chain to.
    pub trust_anchors: Vec<CertificateDer<'static>>,
}

impl CredentialMaterial {
    /// Parses credential material from in-memory PEM data.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError`] if a section is malformed or empty.
    pub fn from_pem(
        cert_chain_pem: &[u8],
        private_key_pem: &[u8],
        trust_anchors_pem: &[u8],
    ) -> Result<Self, CredentialError> {
        Ok(Self {
            cert_chain: parse_certs(cert_chain_pem, CLIENT_CERT)?,
            private_key: parse_private_key(private_key_pem)?,
            trust_anchors: parse_certs(trust_anchors_pem, TRUST_ANCHORS)?,
        })
    }

    /// Reads the files named in `settings` and parses them.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::MissingPath`] if a path is unset, or the
    /// errors of [`CredentialMaterial::from_pem`] and file I/O.
    pub fn load(settings: &TlsSettings) -> Result<Self, CredentialError> {
        let cert = read_file(settings.client_cert.as_deref(), CLIENT_CERT)?;
        let key = read_file(settings.client_key.as_deref(), CLIENT_KEY)?;
        let anchors = read_file(settings.trust_anchors.as_deref(), TRUST_ANCHORS)?;
        Self::from_pem(&cert, &key, &anchors)
    }
}

fn read_file(path: Option<&Path>, what: &'static str) -> Result<Vec<u8>, CredentialError> {
    let path = path.ok_or(CredentialError::MissingPath(what))?;
    std::fs::read(path).map_err(|source| CredentialError::Io {
        what,
        path: path.to_path_buf(),
        source,
    })
}

fn parse_certs(pem: &[u8], what: &'static str) -> Result<Vec<CertificateDer<'static>>, CredentialError> {
    let certs = rustls_pemfile::certs(&mut BufReader::new(pem))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| CredentialError::Pem { what, source })?;
    if certs.is_empty() {
        return Err(CredentialError::NoCertificates(what));
    }
    Ok(certs)
}

fn parse_private_key(pem: &[u8]) -> Result<PrivateKeyDer<'static>, CredentialError> {
    rustls_pemfile::private_key(&mut BufReader::new(pem))
        .map_err(|source| CredentialError::Pem {
            what: CLIENT_KEY,
            source,
        })?
        .ok_or(CredentialError::NoPrivateKey)
}

// ── Factory ───────────────────────────────────────────────────────────────────

/// Which context the factory ended up with.
#[derive(Debug, Clone)]
pub enum TlsMode {
    /// Client certificate and pinned trust anchors are in place.
    Mutual,
    /// Credential loading failed; the default, unauthenticated context is used.
    Degraded(Arc<CredentialError>),
}

/// Produces TLS connectors for host connections.
///
/// Cheap to clone; the underlying configuration is shared.
#[derive(Clone)]
pub struct SecureSessionFactory {
    config: Arc<ClientConfig>,
    mode: TlsMode,
}

impl SecureSessionFactory {
    /// Builds a mutual-TLS factory from already loaded material.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Rustls`] if rustls rejects the key, the
    /// certificate chain, or a trust anchor.
    pub fn from_material(material: &CredentialMaterial) -> Result<Self, CredentialError> {
        let mut roots = RootCertStore::empty();
        for anchor in &material.trust_anchors {
            roots.add(anchor.clone())?;
        }

        let config = tls13_builder()?
            .with_root_certificates(roots)
            .with_client_auth_cert(material.cert_chain.clone(), material.private_key.clone_key())?;

        info!(
            "mutual TLS context ready ({} trust anchor(s))",
            material.trust_anchors.len()
        );
        Ok(Self {
            config: Arc::new(config),
            mode: TlsMode::Mutual,
        })
    }

    /// Loads credential material from `settings`, degrading to the default
    /// context if that fails.
    ///
    /// # Errors
    ///
    /// Only fails if not even the default TLS 1.3 context can be built, which
    /// means the crypto provider itself is unusable.
    pub fn load(settings: &TlsSettings) -> Result<Self, CredentialError> {
        match CredentialMaterial::load(settings).and_then(|m| Self::from_material(&m)) {
            Ok(factory) => Ok(factory),
            Err(cause) => {
                warn!("falling back to default TLS context without client authentication: {cause}");
                Self::degraded(cause)
            }
        }
    }

    /// Builds the default context (web PKI roots, no client certificate) and
    /// records `cause` as the reason for the degradation.
    ///
    /// # Errors
    ///
    /// See [`SecureSessionFactory::load`].
    pub fn degraded(cause: CredentialError) -> Result<Self, CredentialError> {
        let roots = RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
        };
        let config = tls13_builder()?
            .with_root_certificates(roots)
            .with_no_client_auth();

        Ok(Self {
            config: Arc::new(config),
            mode: TlsMode::Degraded(Arc::new(cause)),
        })
    }

    /// `true` when the context presents a client certificate.
    pub fn is_mutual(&self) -> bool {
        matches!(self.mode, TlsMode::Mutual)
    }

    /// Why the factory fell back to the default context, if it did.
    pub fn degradation(&self) -> Option<Arc<CredentialError>> {
        match &self.mode {
            TlsMode::Mutual => None,
            TlsMode::Degraded(cause) => Some(Arc::clone(cause)),
        }
    }

    pub fn mode(&self) -> &TlsMode {
        &self.mode
    }

    /// Returns a connector that performs the TLS handshake over a TCP stream.
    pub fn connector(&self) -> TlsConnector {
        TlsConnector::from(Arc::clone(&self.config))
    }
}

impl std::fmt::Debug for SecureSessionFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureSessionFactory")
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

fn tls13_builder(
) -> Result<rustls::ConfigBuilder<ClientConfig, rustls::WantsVerifier>, CredentialError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    Ok(ClientConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS13])?)
}

/// Picks the name the host certificate is verified against: `override_name`
/// if given, else `host` (an IP literal or DNS name).
///
/// # Errors
///
/// Returns the rejected name if it is neither a valid DNS name nor an IP address.
pub fn server_name_for(host: &str, override_name: Option<&str>) -> Result<ServerName<'static>, String> {
    let name = override_name.unwrap_or(host);
    let name = name.trim_start_matches('[').trim_end_matches(']');
    ServerName::try_from(name.to_owned()).map_err(|_| name.to_owned())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
