//! Test PKI: a throwaway CA, a server certificate for `localhost`, and client
//! certificates issued on demand and written where the provider reads them.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use cert_rotation::CredentialLocation;
use cert_rotation::credential::default_crypto_provider;
use rcgen::{
    BasicConstraints, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName};
use rustls::server::WebPkiClientVerifier;
use rustls::{ClientConfig, ClientConnection, RootCertStore, ServerConfig, ServerConnection};
use tempfile::TempDir;

pub struct IssuedCert {
    pub cert_pem: String,
    pub key_pem: String,
    pub der: CertificateDer<'static>,
}

pub struct TestPki {
    ca_cert: rcgen::Certificate,
    ca_key: KeyPair,
    server: IssuedCert,
    server_key_der: Vec<u8>,
    dir: TempDir,
}

impl TestPki {
    pub fn new() -> Self {
        let ca_key = KeyPair::generate().unwrap();
        let mut ca_params = CertificateParams::new(Vec::<String>::new()).unwrap();
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        ca_params
            .distinguished_name
            .push(DnType::CommonName, "cert_rotation test CA");
        let ca_cert = ca_params.self_signed(&ca_key).unwrap();

        let server_key = KeyPair::generate().unwrap();
        let mut server_params = CertificateParams::new(vec!["localhost".to_owned()]).unwrap();
        server_params
            .distinguished_name
            .push(DnType::CommonName, "localhost");
        server_params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        let server_cert = server_params
            .signed_by(&server_key, &ca_cert, &ca_key)
            .unwrap();

        let server = IssuedCert {
            cert_pem: server_cert.pem(),
            key_pem: server_key.serialize_pem(),
            der: server_cert.der().clone(),
        };

        Self {
            ca_cert,
            ca_key,
            server,
            server_key_der: server_key.serialize_der(),
            dir: tempfile::tempdir().unwrap(),
        }
    }

    /// Issue a client certificate with the given common name.
    pub fn issue_client(&self, common_name: &str) -> IssuedCert {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
        params.distinguished_name.push(DnType::CommonName, common_name);
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
        let cert = params.signed_by(&key, &self.ca_cert, &self.ca_key).unwrap();

        IssuedCert {
            cert_pem: cert.pem(),
            key_pem: key.serialize_pem(),
            der: cert.der().clone(),
        }
    }

    pub fn cert_path(&self) -> PathBuf {
        self.dir.path().join("client.pem")
    }

    pub fn key_path(&self) -> PathBuf {
        self.dir.path().join("client.key")
    }

    pub fn location(&self) -> CredentialLocation {
        CredentialLocation::new(self.cert_path(), self.key_path())
    }

    /// Replace the client pair on disk the way a rotation agent would:
    /// write aside, then rename over the live files.
    pub fn rotate(&self, issued: &IssuedCert) {
        replace(&self.cert_path(), issued.cert_pem.as_bytes());
        replace(&self.key_path(), issued.key_pem.as_bytes());
    }

    /// Issue a fresh client certificate and rotate it in.
    pub fn rotate_to(&self, common_name: &str) -> IssuedCert {
        let issued = self.issue_client(common_name);
        self.rotate(&issued);
        issued
    }

    pub fn roots(&self) -> RootCertStore {
        let mut roots = RootCertStore::empty();
        roots.add(self.ca_cert.der().clone()).unwrap();
        roots
    }

    /// Server side that refuses handshakes without a client certificate
    /// signed by the test CA.
    pub fn server_config(&self) -> Arc<ServerConfig> {
        let crypto = default_crypto_provider();
        let verifier =
            WebPkiClientVerifier::builder_with_provider(Arc::new(self.roots()), crypto.clone())
                .build()
                .unwrap();
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(self.server_key_der.clone()));
        let config = ServerConfig::builder_with_provider(crypto)
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_client_cert_verifier(verifier)
            .with_single_cert(vec![self.server.der.clone()], key)
            .unwrap();
        Arc::new(config)
    }
}

fn replace(path: &Path, contents: &[u8]) {
    let staging = path.with_extension("next");
    fs::write(&staging, contents).unwrap();
    fs::rename(&staging, path).unwrap();
}

macro_rules! transfer {
    ($from:expr, $to:expr) => {{
        let mut buf = Vec::new();
        while $from.wants_write() {
            $from
                .write_tls(&mut buf)
                .map_err(|e| rustls::Error::General(e.to_string()))?;
        }
        let mut rd = &buf[..];
        while !rd.is_empty() {
            $to.read_tls(&mut rd)
                .map_err(|e| rustls::Error::General(e.to_string()))?;
            $to.process_new_packets()?;
        }
    }};
}

/// Run one full handshake in memory and return the certificate chain the
/// server received from the client.
pub fn handshake(
    client_config: Arc<ClientConfig>,
    server_config: Arc<ServerConfig>,
) -> Result<Vec<CertificateDer<'static>>, rustls::Error> {
    let server_name = ServerName::try_from("localhost").unwrap();
    let mut client = ClientConnection::new(client_config, server_name)?;
    let mut server = ServerConnection::new(server_config)?;

    for _ in 0..10 {
        if !client.is_handshaking() && !server.is_handshaking() {
            break;
        }
        transfer!(client, server);
        transfer!(server, client);
    }
    if client.is_handshaking() || server.is_handshaking() {
        return Err(rustls::Error::General("handshake did not complete".into()));
    }

    Ok(server
        .peer_certificates()
        .map(|chain| chain.iter().map(|c| c.clone().into_owned()).collect())
        .unwrap_or_default())
}
