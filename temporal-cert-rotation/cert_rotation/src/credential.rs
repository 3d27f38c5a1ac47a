//! Client certificate / private key pairs and where they are read from.
//!
//! A [`CredentialLocation`] is fixed for the life of the process. Only the
//! bytes behind it change when the pair is rotated, and every call to
//! [`CredentialSource::load`] reads those bytes again.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::sign::CertifiedKey;
use rustls::{Error as TlsError, InconsistentKeys};
use temporal_client::ClientTlsConfig;
use thiserror::Error;

/// The crypto provider used to turn PEM keys into signing keys and to build
/// TLS configs. Selected explicitly so the crate never relies on a
/// process-wide default being installed.
pub fn default_crypto_provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Paths of the certificate chain and private key PEM files.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CredentialLocation {
    cert_path: PathBuf,
    key_path: PathBuf,
}

impl CredentialLocation {
    pub fn new(cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        Self {
            cert_path: cert_path.into(),
            key_path: key_path.into(),
        }
    }

    /// Like [`CredentialLocation::new`], but fails with
    /// [`CredentialLoadError::NotFound`] unless both files exist right now.
    /// Meant for process start, where a missing file is a configuration
    /// mistake rather than a rotation in progress.
    pub fn resolve(
        cert_path: impl Into<PathBuf>,
        key_path: impl Into<PathBuf>,
    ) -> Result<Self, CredentialLoadError> {
        let location = Self::new(cert_path, key_path);
        for path in [&location.cert_path, &location.key_path] {
            if !path.is_file() {
                return Err(CredentialLoadError::NotFound { path: path.clone() });
            }
        }
        Ok(location)
    }

    pub fn cert_path(&self) -> &Path {
        &self.cert_path
    }

    pub fn key_path(&self) -> &Path {
        &self.key_path
    }
}

impl fmt::Display for CredentialLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cert={} key={}",
            self.cert_path.display(),
            self.key_path.display()
        )
    }
}

/// Coarse classification of a [`CredentialLoadError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadFailureReason {
    NotFound,
    Unreadable,
    Malformed,
}

#[derive(Debug, Error)]
pub enum CredentialLoadError {
    #[error("credential file {} does not exist", path.display())]
    NotFound { path: PathBuf },

    #[error("failed reading credential file {}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("credential file {} is malformed: {detail}", path.display())]
    Malformed { path: PathBuf, detail: String },
}

impl CredentialLoadError {
    pub fn reason(&self) -> LoadFailureReason {
        match self {
            Self::NotFound { .. } => LoadFailureReason::NotFound,
            Self::Unreadable { .. } => LoadFailureReason::Unreadable,
            Self::Malformed { .. } => LoadFailureReason::Malformed,
        }
    }

    /// The file the failure concerns.
    pub fn path(&self) -> &Path {
        match self {
            Self::NotFound { path } | Self::Unreadable { path, .. } | Self::Malformed { path, .. } => {
                path
            }
        }
    }

    fn malformed(path: &Path, detail: impl Into<String>) -> Self {
        Self::Malformed {
            path: path.to_path_buf(),
            detail: detail.into(),
        }
    }
}

/// One loaded certificate chain and its private key.
///
/// Never mutated after construction. Cloning is cheap and shares the key.
#[derive(Clone)]
pub struct Credential {
    location: CredentialLocation,
    certified: Arc<CertifiedKey>,
    cert_pem: Arc<[u8]>,
    key_pem: Arc<[u8]>,
    subject: String,
    serial: String,
    not_after: SystemTime,
}

impl Credential {
    /// Where this credential was read from.
    pub fn location(&self) -> &CredentialLocation {
        &self.location
    }

    /// Leaf first, then any intermediates, as DER.
    pub fn cert_chain(&self) -> &[CertificateDer<'static>] {
        &self.certified.cert
    }

    pub fn leaf(&self) -> &CertificateDer<'static> {
        // Non-empty by construction.
        &self.certified.cert[0]
    }

    /// Chain and signing key in the form rustls presents during a handshake.
    pub fn certified_key(&self) -> Arc<CertifiedKey> {
        Arc::clone(&self.certified)
    }

    /// The PEM identity the Temporal client expects when dialing.
    pub fn client_tls_config(&self) -> ClientTlsConfig {
        ClientTlsConfig {
            client_cert: self.cert_pem.to_vec(),
            client_private_key: self.key_pem.to_vec(),
        }
    }

    /// Leaf subject, e.g. `CN=worker,O=acme`.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Leaf serial number as colon separated hex.
    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub fn not_after(&self) -> SystemTime {
        self.not_after
    }

    pub fn is_expired(&self) -> bool {
        self.not_after < SystemTime::now()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("location", &self.location)
            .field("subject", &self.subject)
            .field("serial", &self.serial)
            .field("chain_len", &self.certified.cert.len())
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Anything that can produce the current credential for a location.
///
/// Implementations must not cache: two calls separated by a rotation have to
/// observe the rotation.
pub trait CredentialSource: Send + Sync {
    fn load(&self, location: &CredentialLocation) -> Result<Credential, CredentialLoadError>;
}

/// Reads PEM files from the local file system on every call.
#[derive(Debug, Clone)]
pub struct FileCredentialSource {
    crypto: Arc<CryptoProvider>,
}

impl FileCredentialSource {
    pub fn new() -> Self {
        Self::with_crypto_provider(default_crypto_provider())
    }

    pub fn with_crypto_provider(crypto: Arc<CryptoProvider>) -> Self {
        Self { crypto }
    }
}

impl Default for FileCredentialSource {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialSource for FileCredentialSource {
    fn load(&self, location: &CredentialLocation) -> Result<Credential, CredentialLoadError> {
        let cert_path = location.cert_path();
        let key_path = location.key_path();

        let cert_pem = read(cert_path)?;
        let key_pem = read(key_path)?;

        let chain = parse_chain(cert_path, &cert_pem)?;
        let key = parse_key(key_path, &key_pem)?;
        let leaf = describe_leaf(cert_path, &chain[0])?;

        let signing_key = self
            .crypto
            .key_provider
            .load_private_key(key)
            .map_err(|e| CredentialLoadError::malformed(key_path, format!("unusable private key: {e}")))?;

        let certified = CertifiedKey::new(chain, signing_key);
        match certified.keys_match() {
            // Some key types cannot report their public half; trust the pair.
            Ok(()) | Err(TlsError::InconsistentKeys(InconsistentKeys::Unknown)) => {}
            Err(e) => {
                return Err(CredentialLoadError::malformed(
                    cert_path,
                    format!("certificate does not belong to {}: {e}", key_path.display()),
                ));
            }
        }

        Ok(Credential {
            location: location.clone(),
            certified: Arc::new(certified),
            cert_pem: cert_pem.into(),
            key_pem: key_pem.into(),
            subject: leaf.subject,
            serial: leaf.serial,
            not_after: leaf.not_after,
        })
    }
}

fn read(path: &Path) -> Result<Vec<u8>, CredentialLoadError> {
    fs::read(path).map_err(|source| CredentialLoadError::Unreadable {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_chain(path: &Path, pem: &[u8]) -> Result<Vec<CertificateDer<'static>>, CredentialLoadError> {
    let chain = rustls_pemfile::certs(&mut &pem[..])
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| CredentialLoadError::malformed(path, format!("invalid PEM: {e}")))?;
    if chain.is_empty() {
        return Err(CredentialLoadError::malformed(path, "no certificate found"));
    }
    Ok(chain)
}

fn parse_key(path: &Path, pem: &[u8]) -> Result<PrivateKeyDer<'static>, CredentialLoadError> {
    rustls_pemfile::private_key(&mut &pem[..])
        .map_err(|e| CredentialLoadError::malformed(path, format!("invalid PEM: {e}")))?
        .ok_or_else(|| CredentialLoadError::malformed(path, "no private key found"))
}

struct LeafSummary {
    subject: String,
    serial: String,
    not_after: SystemTime,
}

fn describe_leaf(path: &Path, der: &CertificateDer<'_>) -> Result<LeafSummary, CredentialLoadError> {
    let (_, cert) = x509_parser::parse_x509_certificate(der.as_ref())
        .map_err(|e| CredentialLoadError::malformed(path, format!("invalid X.509 certificate: {e}")))?;

    let not_after = match u64::try_from(cert.validity().not_after.timestamp()) {
        Ok(secs) => UNIX_EPOCH + Duration::from_secs(secs),
        Err(_) => UNIX_EPOCH,
    };

    Ok(LeafSummary {
        subject: cert.subject().to_string(),
        serial: cert.raw_serial_as_string(),
        not_after,
    })
}
