//! Process configuration read once at startup.
//!
//! Every value comes from the environment (optionally seeded from a `.env`
//! file). Binaries build a [`Settings`] exactly once and hand the pieces to
//! the core crate; nothing below `main` reads the environment again.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, bail};
use temporal_sdk_core::Url;

/// Task queue the greeting worker polls when `TEMPORAL_TASK_QUEUE` is unset.
pub const DEFAULT_TASK_QUEUE: &str = "greeting-tasks";

const ADDRESS: &str = "TEMPORAL_ADDRESS";
const NAMESPACE: &str = "TEMPORAL_NAMESPACE";
const TLS_CERT: &str = "TEMPORAL_TLS_CERT";
const TLS_KEY: &str = "TEMPORAL_TLS_KEY";
const TLS_CA: &str = "TEMPORAL_TLS_CA";
const TLS_DOMAIN: &str = "TEMPORAL_TLS_DOMAIN";
const TASK_QUEUE: &str = "TEMPORAL_TASK_QUEUE";
const TLS_REFRESH_SECS: &str = "TEMPORAL_TLS_REFRESH_SECS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// `host:port` or a full URL of the Temporal frontend.
    pub address: String,
    pub namespace: String,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    /// PEM bundle for a private server root; system roots are used when unset.
    pub server_ca_path: Option<PathBuf>,
    /// Overrides the TLS server name derived from `address`.
    pub server_name: Option<String>,
    pub task_queue: String,
    /// How often a running worker re-checks the certificate files; the
    /// worker's default applies when unset.
    pub cert_refresh: Option<Duration>,
}

impl Settings {
    /// Read settings from the process environment, loading `.env` first if
    /// one exists in the working directory or its parents.
    pub fn from_env() -> anyhow::Result<Self> {
        tolerate_missing_env_file(dotenvy::dotenv())?;
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build settings from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let optional = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let required = |name: &str| {
            optional(name).with_context(|| format!("environment variable {name} must be set"))
        };

        Ok(Self {
            address: required(ADDRESS)?,
            namespace: required(NAMESPACE)?,
            cert_path: required(TLS_CERT)?.into(),
            key_path: required(TLS_KEY)?.into(),
            server_ca_path: optional(TLS_CA).map(PathBuf::from),
            server_name: optional(TLS_DOMAIN),
            task_queue: optional(TASK_QUEUE).unwrap_or_else(|| DEFAULT_TASK_QUEUE.to_owned()),
            cert_refresh: optional(TLS_REFRESH_SECS)
                .map(|raw| parse_refresh_secs(&raw))
                .transpose()?,
        })
    }

    /// The frontend URL. A bare `host:port` is given an `https://` scheme,
    /// since the worker always dials with a client certificate.
    pub fn target_url(&self) -> anyhow::Result<Url> {
        let raw = if self.address.contains("://") {
            self.address.clone()
        } else {
            format!("https://{}", self.address)
        };
        let url =
            Url::from_str(&raw).with_context(|| format!("invalid {ADDRESS} {:?}", self.address))?;
        if url.scheme() != "https" {
            bail!("{ADDRESS} must use https when a client certificate is configured, got {url}");
        }
        Ok(url)
    }
}

/// A missing `.env` is the normal case in deployments; one that exists but
/// does not parse is not.
fn tolerate_missing_env_file<T>(loaded: Result<T, dotenvy::Error>) -> anyhow::Result<()> {
    match loaded {
        Ok(_) => Ok(()),
        Err(e) if e.not_found() => Ok(()),
        Err(e) => Err(e).context("failed to load .env file"),
    }
}

fn parse_refresh_secs(raw: &str) -> anyhow::Result<Duration> {
    let secs: u64 = raw.trim().parse().with_context(|| {
        format!("{TLS_REFRESH_SECS} must be a whole number of seconds, got {raw:?}")
    })?;
    if secs == 0 {
        bail!("{TLS_REFRESH_SECS} must be greater than zero");
    }
    Ok(Duration::from_secs(secs))
}
