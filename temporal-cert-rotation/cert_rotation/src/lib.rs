//! `cert_rotation` example crate.
//!
//! A Temporal worker that authenticates with an mTLS client certificate which
//! may be rotated on disk while the worker keeps running. The certificate and
//! key are re-read whenever a dial or rustls handshake needs them, and a
//! running worker re-dials once it sees a rotated pair, so nothing has to be
//! restarted or signalled after a rotation.
//!
//! The pieces, leaves first:
//!
//! - [`credential`]: loading a certificate/key pair from its location.
//! - [`provider`]: the per-handshake certificate supplier.
//! - [`connection`]: the client connection, re-dials after a rotation, and
//!   teardown.
//! - [`registry`] and [`executor`]: workflow registration and the run loop.
//! - [`workflow`]: the `GreetSomeone` workflow itself.

pub mod bootstrap;
pub mod connection;
pub mod credential;
pub mod executor;
pub mod provider;
pub mod registry;
pub mod workflow;

/// Log target for everything this crate emits.
pub const LOG_TARGET: &str = "cert_rotation";

pub use connection::{
    Connection, ConnectionConfig, ConnectionError, ConnectionManager, WorkerClient, client_options,
};
pub use credential::{
    Credential, CredentialLoadError, CredentialLocation, CredentialSource, FileCredentialSource,
    LoadFailureReason,
};
pub use executor::{
    DEFAULT_ROTATION_CHECK, RunLoopError, TaskExecutor, run_until_interrupted, shutdown_signal,
};
pub use provider::{CertificateProvider, HandshakeInfo, LoadRetry, RotatingCertProvider};
pub use registry::{HandlerRegistry, RegistrationError, WorkflowRegistry};
