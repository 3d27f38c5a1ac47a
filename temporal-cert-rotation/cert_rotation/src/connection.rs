//! The single long-lived connection to the Temporal frontend.
//!
//! The Temporal client takes the client identity as PEM bytes when it dials,
//! so a rotated pair only reaches the wire through a new dial. The manager
//! remembers which leaf it last dialed with; [`Connection::refresh`] asks the
//! provider again and re-dials when the pair on disk has changed.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use log::info;
use rustls::pki_types::CertificateDer;
use temporal_client::{
    Client, ClientOptions, ConfiguredClient, RetryClient, TemporalServiceClientWithMetrics,
    TlsConfig,
};
use temporal_sdk::sdk_client_options;
use temporal_sdk_core::Url;
use thiserror::Error;

use crate::LOG_TARGET;
use crate::credential::{Credential, CredentialLoadError};
use crate::provider::{CertificateProvider, HandshakeInfo};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Namespace-less client produced by a re-dial, in the form a running core
/// worker accepts as a replacement.
pub type WorkerClient = ConfiguredClient<TemporalServiceClientWithMetrics>;

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub target_url: Url,
    pub namespace: String,
    /// PEM root for a private CA; the platform roots are used when `None`.
    pub server_root_ca_cert: Option<Vec<u8>>,
    /// TLS server name, when it differs from the host in `target_url`.
    pub server_name: Option<String>,
}

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("no client certificate available for {target}")]
    Credential {
        target: Url,
        #[source]
        source: CredentialLoadError,
    },

    #[error("invalid client options for {target}: {detail}")]
    Options { target: Url, detail: String },

    #[error("unable to connect to {target} (namespace {namespace})")]
    Dial {
        target: Url,
        namespace: String,
        #[source]
        source: BoxError,
    },
}

/// Client options for one dial, carrying `credential` as the client identity.
pub fn client_options(
    config: &ConnectionConfig,
    credential: &Credential,
) -> Result<ClientOptions, ConnectionError> {
    let target = &config.target_url;
    if config.namespace.trim().is_empty() {
        return Err(ConnectionError::Options {
            target: target.clone(),
            detail: "namespace must not be empty".to_owned(),
        });
    }

    let tls = TlsConfig {
        server_root_ca_cert: config.server_root_ca_cert.clone(),
        domain: config.server_name.clone(),
        client_tls_config: Some(credential.client_tls_config()),
    };

    sdk_client_options(target.clone())
        .tls_cfg(tls)
        .build()
        .map_err(|e| ConnectionError::Options {
            target: target.clone(),
            detail: e.to_string(),
        })
}

/// Dials the frontend with a client identity taken from a
/// [`CertificateProvider`].
///
/// The provider is asked at every dial, never when the manager is built.
/// Clones share the record of which leaf was presented last.
#[derive(Clone)]
pub struct ConnectionManager {
    config: ConnectionConfig,
    provider: Arc<dyn CertificateProvider>,
    presented: Arc<Mutex<Option<CertificateDer<'static>>>>,
}

impl ConnectionManager {
    pub fn new(config: ConnectionConfig, provider: Arc<dyn CertificateProvider>) -> Self {
        Self {
            config,
            provider,
            presented: Arc::new(Mutex::new(None)),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Establish the connection. Fails fast: the transport's own dial retries
    /// are the only retries.
    pub async fn connect(&self) -> Result<Connection, ConnectionError> {
        let target = self.config.target_url.clone();
        let credential = self.request_credential()?;
        let options = client_options(&self.config, &credential)?;

        info!(
            target: LOG_TARGET,
            "connecting to {target} namespace={} as {}",
            self.config.namespace,
            credential.subject(),
        );

        let client = options
            .connect(self.config.namespace.clone(), None)
            .await
            .map_err(|e| self.dial_error(e.into()))?;
        self.record_presented(&credential);

        info!(target: LOG_TARGET, "connected to {target}");

        Ok(Connection {
            client,
            manager: self.clone(),
        })
    }

    /// Ask the provider for the current pair and return it if its leaf differs
    /// from the one last dialed with. A failed load is returned as is; the
    /// previous pair is never offered in its place.
    pub fn rotated_credential(&self) -> Result<Option<Credential>, ConnectionError> {
        let credential = self.request_credential()?;
        let unchanged = self
            .presented
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|leaf| leaf == credential.leaf());
        Ok((!unchanged).then_some(credential))
    }

    /// Dial again with `credential` and return the new client for handing to
    /// a running worker.
    pub async fn redial(&self, credential: &Credential) -> Result<WorkerClient, ConnectionError> {
        let options = client_options(&self.config, credential)?;
        let client = options
            .connect_no_namespace(None)
            .await
            .map_err(|e| self.dial_error(e.into()))?;
        self.record_presented(credential);

        info!(
            target: LOG_TARGET,
            "re-dialed {} as {} serial={}",
            self.config.target_url,
            credential.subject(),
            credential.serial(),
        );
        Ok(client.into_inner())
    }

    fn request_credential(&self) -> Result<Credential, ConnectionError> {
        self.provider
            .on_certificate_requested(&HandshakeInfo::dial())
            .map_err(|source| ConnectionError::Credential {
                target: self.config.target_url.clone(),
                source,
            })
    }

    fn record_presented(&self, credential: &Credential) {
        *self.presented.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(credential.leaf().clone());
    }

    fn dial_error(&self, source: BoxError) -> ConnectionError {
        ConnectionError::Dial {
            target: self.config.target_url.clone(),
            namespace: self.config.namespace.clone(),
            source,
        }
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Owns the client session. Dropping the handle (or calling
/// [`Connection::close`]) releases it; either happens exactly once.
pub struct Connection {
    client: RetryClient<Client>,
    manager: ConnectionManager,
}

impl Connection {
    /// The client dialed by [`ConnectionManager::connect`]. It keeps the
    /// identity it was dialed with; see [`Connection::refresh`].
    pub fn client(&self) -> &RetryClient<Client> {
        &self.client
    }

    pub fn namespace(&self) -> &str {
        &self.manager.config.namespace
    }

    pub fn target(&self) -> &Url {
        &self.manager.config.target_url
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    /// Re-dial if the pair on disk has rotated since the last dial.
    /// `Ok(None)` means the presented certificate is still current.
    pub async fn refresh(&self) -> Result<Option<WorkerClient>, ConnectionError> {
        let Some(credential) = self.manager.rotated_credential()? else {
            return Ok(None);
        };
        info!(
            target: LOG_TARGET,
            "client certificate at {} rotated, re-dialing",
            credential.location().cert_path().display(),
        );
        self.manager.redial(&credential).await.map(Some)
    }

    /// Explicit end of scope, for call sites that want the release visible.
    pub fn close(self) {
        drop(self);
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        info!(target: LOG_TARGET, "closing connection to {}", self.target());
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("target", self.target())
            .field("namespace", &self.namespace())
            .finish_non_exhaustive()
    }
}
