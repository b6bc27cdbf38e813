use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use camino::Utf8PathBuf;
use tracing::info;

use crate::config::Config;
use crate::error::ConciergeError;
use crate::system::System;

const NAME: &str = "google";

/// Google Cloud. Nothing is installed; `prepare` only loads the credentials
/// Juju needs for bootstrap.
pub struct Google {
    pub(super) bootstrap: bool,
    pub(super) model_defaults: BTreeMap<String, String>,
    pub(super) bootstrap_constraints: BTreeMap<String, String>,
    credentials_file: Option<Utf8PathBuf>,
    credentials: Option<serde_yaml::Value>,
    system: Arc<dyn System>,
}

impl Google {
    pub fn new(system: Arc<dyn System>, config: &Config) -> Self {
        let google = &config.providers.google;
        Self {
            bootstrap: google.common.bootstrap,
            model_defaults: google.common.model_defaults.clone(),
            bootstrap_constraints: google.common.bootstrap_constraints.clone(),
            credentials_file: google.credentials_file.clone(),
            credentials: None,
            system,
        }
    }

    pub fn credentials(&self) -> Option<&serde_yaml::Value> {
        self.credentials.as_ref()
    }

    pub fn prepare(&mut self) -> Result<()> {
        let path = self.credentials_file.as_deref().ok_or_else(|| {
            ConciergeError::Config("google: no credentials file configured".to_string())
        })?;

        let contents = self.system.read_file(path)?;
        let credentials: serde_yaml::Value = serde_yaml::from_slice(&contents).map_err(|e| {
            ConciergeError::Config(format!("failed to parse google cloud credentials: {}", e))
        })?;
        self.credentials = Some(credentials);

        info!(provider = NAME, "prepared provider");
        Ok(())
    }

    pub fn restore(&self) -> Result<()> {
        info!(provider = NAME, "restored provider");
        Ok(())
    }
}
