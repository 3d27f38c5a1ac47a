//! Turning [`Settings`] into a live [`Connection`].

use std::sync::Arc;

use anyhow::Context;
use helpers::Settings;

use crate::connection::{Connection, ConnectionConfig, ConnectionManager};
use crate::credential::CredentialLocation;
use crate::provider::RotatingCertProvider;

/// Resolve the credential location, build the rotating provider and dial.
pub async fn connect(settings: &Settings) -> anyhow::Result<Connection> {
    let location = CredentialLocation::resolve(&settings.cert_path, &settings.key_path)
        .context("client certificate location is not usable")?;
    let provider = Arc::new(RotatingCertProvider::new(location));

    let manager = ConnectionManager::new(connection_config(settings)?, provider);
    let connection = manager
        .connect()
        .await
        .context("unable to connect to Temporal")?;

    Ok(connection)
}

pub fn connection_config(settings: &Settings) -> anyhow::Result<ConnectionConfig> {
    let server_root_ca_cert = settings
        .server_ca_path
        .as_ref()
        .map(|path| {
            std::fs::read(path)
                .with_context(|| format!("failed reading server CA {}", path.display()))
        })
        .transpose()?;

    Ok(ConnectionConfig {
        target_url: settings.target_url()?,
        namespace: settings.namespace.clone(),
        server_root_ca_cert,
        server_name: settings.server_name.clone(),
    })
}
