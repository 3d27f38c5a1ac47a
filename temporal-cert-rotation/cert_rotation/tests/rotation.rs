//! Loading behaviour of the rotating provider against real PEM files.

mod support;

use std::fs;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use cert_rotation::{
    CertificateProvider, Credential, CredentialLoadError, CredentialLocation, CredentialSource,
    FileCredentialSource, HandshakeInfo, LoadFailureReason, LoadRetry, RotatingCertProvider,
};
use support::TestPki;

fn request(provider: &RotatingCertProvider) -> Result<Credential, CredentialLoadError> {
    provider.on_certificate_requested(&HandshakeInfo::dial())
}

#[test]
fn valid_pair_loads_as_x509_with_matching_key() {
    let pki = TestPki::new();
    let issued = pki.rotate_to("worker-a");

    let credential = FileCredentialSource::new().load(&pki.location()).unwrap();

    assert_eq!(credential.leaf(), &issued.der);
    assert_eq!(credential.cert_chain().len(), 1);
    assert_eq!(credential.subject(), "CN=worker-a");
    assert!(!credential.serial().is_empty());
    assert!(!credential.is_expired());
    assert_eq!(credential.location(), &pki.location());

    let (_, parsed) = x509_parser::parse_x509_certificate(credential.leaf().as_ref()).unwrap();
    assert_eq!(parsed.subject().to_string(), "CN=worker-a");

    let identity = credential.client_tls_config();
    assert_eq!(identity.client_cert, issued.cert_pem.as_bytes());
    assert_eq!(identity.client_private_key, issued.key_pem.as_bytes());
}

#[test]
fn each_request_returns_the_latest_rotation() {
    let pki = TestPki::new();
    pki.rotate_to("worker-v0");
    let provider = RotatingCertProvider::new(pki.location());

    for version in 1..=5 {
        let issued = pki.rotate_to(&format!("worker-v{version}"));
        let credential = request(&provider).unwrap();
        assert_eq!(credential.leaf(), &issued.der, "rotation {version}");
        assert_eq!(credential.subject(), format!("CN=worker-v{version}"));
    }
}

#[test]
fn consecutive_requests_are_not_cached() {
    let pki = TestPki::new();
    pki.rotate_to("before");
    let provider = RotatingCertProvider::new(pki.location());

    let first = request(&provider).unwrap();
    pki.rotate_to("after");
    let second = request(&provider).unwrap();

    assert_ne!(first.leaf(), second.leaf());
    assert_eq!(first.subject(), "CN=before");
    assert_eq!(second.subject(), "CN=after");

    // An earlier credential is an independent value; rotation does not touch it.
    assert_eq!(first.subject(), "CN=before");
}

#[test]
fn deleted_key_fails_until_restored() {
    let pki = TestPki::new();
    let issued = pki.rotate_to("worker");
    let provider = RotatingCertProvider::new(
        CredentialLocation::resolve(pki.cert_path(), pki.key_path()).unwrap(),
    );

    fs::remove_file(pki.key_path()).unwrap();
    let err = request(&provider).unwrap_err();
    assert_eq!(err.reason(), LoadFailureReason::Unreadable);
    assert_eq!(err.path(), pki.key_path().as_path());

    pki.rotate(&issued);
    let credential = request(&provider).unwrap();
    assert_eq!(credential.leaf(), &issued.der);
}

#[test]
fn half_rotated_pair_is_malformed() {
    let pki = TestPki::new();
    let old = pki.rotate_to("old");
    let new = pki.issue_client("new");

    // New certificate is in place, key still the old one.
    fs::write(pki.cert_path(), new.cert_pem.as_bytes()).unwrap();
    fs::write(pki.key_path(), old.key_pem.as_bytes()).unwrap();

    let err = request(&RotatingCertProvider::new(pki.location())).unwrap_err();
    assert_eq!(err.reason(), LoadFailureReason::Malformed);
}

#[test]
fn truncated_certificate_is_malformed() {
    let pki = TestPki::new();
    let issued = pki.rotate_to("worker");
    let half = &issued.cert_pem[..issued.cert_pem.len() / 2];
    fs::write(pki.cert_path(), half).unwrap();

    let err = request(&RotatingCertProvider::new(pki.location())).unwrap_err();
    assert_eq!(err.reason(), LoadFailureReason::Malformed);
    assert_eq!(err.path(), pki.cert_path().as_path());
}

#[test]
fn key_file_without_a_key_is_malformed() {
    let pki = TestPki::new();
    let issued = pki.rotate_to("worker");
    // A certificate where the key should be.
    fs::write(pki.key_path(), issued.cert_pem.as_bytes()).unwrap();

    let err = request(&RotatingCertProvider::new(pki.location())).unwrap_err();
    assert_eq!(err.reason(), LoadFailureReason::Malformed);
    assert_eq!(err.path(), pki.key_path().as_path());
}

#[test]
fn concurrent_requests_all_succeed() {
    let pki = TestPki::new();
    let issued = pki.rotate_to("shared");
    let provider = RotatingCertProvider::new(pki.location());

    let loaded: Vec<Credential> = thread::scope(|scope| {
        let handles: Vec<_> = (0..16)
            .map(|_| scope.spawn(|| request(&provider)))
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap().unwrap())
            .collect()
    });

    assert_eq!(loaded.len(), 16);
    for credential in &loaded {
        assert_eq!(credential.leaf(), &issued.der);
    }
}

#[test]
fn concurrent_requests_during_rotation_never_see_a_torn_pair() {
    let pki = TestPki::new();
    pki.rotate_to("gen-0");
    let provider = RotatingCertProvider::new(pki.location());
    let generations: Vec<_> = (1..=5).map(|i| pki.issue_client(&format!("gen-{i}"))).collect();

    thread::scope(|scope| {
        let readers: Vec<_> = (0..8)
            .map(|_| {
                scope.spawn(|| {
                    for _ in 0..20 {
                        match request(&provider) {
                            // Whatever was read, the key belongs to the certificate.
                            Ok(credential) => assert!(credential.subject().starts_with("CN=gen-")),
                            // A reader may land between the two renames.
                            Err(err) => assert_eq!(err.reason(), LoadFailureReason::Malformed),
                        }
                    }
                })
            })
            .collect();

        for issued in &generations {
            pki.rotate(issued);
        }
        for reader in readers {
            reader.join().unwrap();
        }
    });

    assert_eq!(request(&provider).unwrap().subject(), "CN=gen-5");
}

/// Fails a fixed number of times, then delegates to the file source.
struct FlakySource {
    failures_left: AtomicUsize,
    calls: AtomicUsize,
    inner: FileCredentialSource,
}

impl CredentialSource for FlakySource {
    fn load(&self, location: &CredentialLocation) -> Result<Credential, CredentialLoadError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures_left.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_left.store(remaining - 1, Ordering::SeqCst);
            return Err(CredentialLoadError::Unreadable {
                path: location.key_path().to_path_buf(),
                source: std::io::Error::from(std::io::ErrorKind::Interrupted),
            });
        }
        self.inner.load(location)
    }
}

#[test]
fn configured_retry_absorbs_transient_failures() {
    let pki = TestPki::new();
    let issued = pki.rotate_to("worker");
    let source = Arc::new(FlakySource {
        failures_left: AtomicUsize::new(2),
        calls: AtomicUsize::new(0),
        inner: FileCredentialSource::new(),
    });
    let provider = RotatingCertProvider::with_source(pki.location(), source.clone())
        .with_retry(LoadRetry::new(3, Duration::from_millis(5)));

    let credential = request(&provider).unwrap();
    assert_eq!(credential.leaf(), &issued.der);
    assert_eq!(source.calls.load(Ordering::SeqCst), 3);
}

#[test]
fn without_retry_a_transient_failure_surfaces() {
    let pki = TestPki::new();
    pki.rotate_to("worker");
    let source = Arc::new(FlakySource {
        failures_left: AtomicUsize::new(1),
        calls: AtomicUsize::new(0),
        inner: FileCredentialSource::new(),
    });
    let provider = RotatingCertProvider::with_source(pki.location(), source.clone());

    assert_eq!(request(&provider).unwrap_err().reason(), LoadFailureReason::Unreadable);
    // The next handshake tries again and succeeds.
    assert!(request(&provider).is_ok());
    assert_eq!(source.calls.load(Ordering::SeqCst), 2);
}
