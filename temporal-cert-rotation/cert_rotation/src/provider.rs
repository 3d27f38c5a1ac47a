//! Handshake-time client certificate supply.
//!
//! [`RotatingCertProvider`] keeps nothing but the credential location. Each
//! time a TLS handshake asks for a client certificate it loads the pair from
//! its [`CredentialSource`] again, so a pair swapped on disk between two
//! handshakes is presented on the second one without a restart.

use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime};

use log::{debug, info, warn};
use rustls::client::ResolvesClientCert;
use rustls::sign::CertifiedKey;
use rustls::{ClientConfig, RootCertStore, SignatureScheme};

use crate::LOG_TARGET;
use crate::credential::{
    Credential, CredentialLoadError, CredentialLocation, CredentialSource, FileCredentialSource,
    default_crypto_provider,
};

/// What the peer told us when it requested a client certificate.
///
/// Dials that supply the identity up front (rather than from inside the TLS
/// stack) use [`HandshakeInfo::dial`], which carries no hints.
#[derive(Debug, Clone, Copy, Default)]
pub struct HandshakeInfo<'a> {
    acceptable_issuers: &'a [&'a [u8]],
    signature_schemes: &'a [SignatureScheme],
}

impl<'a> HandshakeInfo<'a> {
    pub fn new(
        acceptable_issuers: &'a [&'a [u8]],
        signature_schemes: &'a [SignatureScheme],
    ) -> Self {
        Self {
            acceptable_issuers,
            signature_schemes,
        }
    }

    pub fn dial() -> HandshakeInfo<'static> {
        HandshakeInfo::default()
    }

    /// DER-encoded distinguished names of CAs the server will accept.
    pub fn acceptable_issuers(&self) -> &'a [&'a [u8]] {
        self.acceptable_issuers
    }

    pub fn signature_schemes(&self) -> &'a [SignatureScheme] {
        self.signature_schemes
    }
}

/// Supplies the client certificate for one handshake.
pub trait CertificateProvider: Send + Sync {
    fn on_certificate_requested(
        &self,
        info: &HandshakeInfo<'_>,
    ) -> Result<Credential, CredentialLoadError>;
}

/// How many times a single certificate request may hit the source before
/// giving up. The default is one attempt with no delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadRetry {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl LoadRetry {
    pub const NONE: LoadRetry = LoadRetry {
        max_attempts: 1,
        delay: Duration::ZERO,
    };

    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }
}

impl Default for LoadRetry {
    fn default() -> Self {
        Self::NONE
    }
}

#[derive(Clone)]
pub struct RotatingCertProvider {
    location: CredentialLocation,
    source: Arc<dyn CredentialSource>,
    retry: LoadRetry,
}

impl RotatingCertProvider {
    /// Provider reading PEM files at `location` on every request.
    pub fn new(location: CredentialLocation) -> Self {
        Self::with_source(location, Arc::new(FileCredentialSource::new()))
    }

    pub fn with_source(location: CredentialLocation, source: Arc<dyn CredentialSource>) -> Self {
        Self {
            location,
            source,
            retry: LoadRetry::NONE,
        }
    }

    /// Retry a failed load within the same request. Blocks the calling
    /// handshake for up to `(max_attempts - 1) * delay`.
    pub fn with_retry(mut self, retry: LoadRetry) -> Self {
        self.retry = retry;
        self
    }

    pub fn location(&self) -> &CredentialLocation {
        &self.location
    }

    pub fn retry(&self) -> LoadRetry {
        self.retry
    }

    /// A client config that asks this provider for the certificate on every
    /// handshake. ALPN is set to `h2` for gRPC.
    pub fn client_config(self: Arc<Self>, roots: RootCertStore) -> Result<ClientConfig, rustls::Error> {
        let mut config = ClientConfig::builder_with_provider(default_crypto_provider())
            .with_safe_default_protocol_versions()?
            .with_root_certificates(roots)
            .with_client_cert_resolver(self);
        config.alpn_protocols = vec![b"h2".to_vec()];
        Ok(config)
    }

    fn log_loaded(&self, credential: &Credential) {
        let expires = humanize_expiry(credential.not_after());
        debug!(
            target: LOG_TARGET,
            "loaded client certificate subject={} serial={} expires={expires}",
            credential.subject(),
            credential.serial(),
        );
        if credential.is_expired() {
            warn!(
                target: LOG_TARGET,
                "client certificate at {} expired {expires}; presenting it anyway",
                self.location.cert_path().display(),
            );
        }
    }
}

impl CertificateProvider for RotatingCertProvider {
    fn on_certificate_requested(
        &self,
        info: &HandshakeInfo<'_>,
    ) -> Result<Credential, CredentialLoadError> {
        info!(
            target: LOG_TARGET,
            "loading X509 client certificate {}", self.location
        );
        debug!(
            target: LOG_TARGET,
            "peer offered {} acceptable issuers and {} signature schemes",
            info.acceptable_issuers().len(),
            info.signature_schemes().len(),
        );

        let mut attempt = 1;
        loop {
            match self.source.load(&self.location) {
                Ok(credential) => {
                    self.log_loaded(&credential);
                    return Ok(credential);
                }
                Err(err) if attempt < self.retry.max_attempts => {
                    warn!(
                        target: LOG_TARGET,
                        "client certificate load attempt {attempt}/{} failed: {err}; retrying in {:?}",
                        self.retry.max_attempts,
                        self.retry.delay,
                    );
                    thread::sleep(self.retry.delay);
                    attempt += 1;
                }
                Err(err) => {
                    warn!(target: LOG_TARGET, "client certificate load failed: {err}");
                    return Err(err);
                }
            }
        }
    }
}

impl ResolvesClientCert for RotatingCertProvider {
    fn resolve(
        &self,
        root_hint_subjects: &[&[u8]],
        sigschemes: &[SignatureScheme],
    ) -> Option<Arc<CertifiedKey>> {
        // rustls has no error channel here; returning `None` sends an empty
        // certificate and the server aborts the handshake.
        self.on_certificate_requested(&HandshakeInfo::new(root_hint_subjects, sigschemes))
            .ok()
            .map(|credential| credential.certified_key())
    }

    fn has_certs(&self) -> bool {
        true
    }
}

impl fmt::Debug for RotatingCertProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RotatingCertProvider")
            .field("location", &self.location)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

fn humanize_expiry(not_after: SystemTime) -> String {
    match not_after.duration_since(SystemTime::now()) {
        Ok(left) => format!("in {}h", left.as_secs() / 3600),
        Err(past) => format!("{}h ago", past.duration().as_secs() / 3600),
    }
}
