//! Juju installation and controller bootstrap.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use camino::Utf8Path;
use serde_yaml::{Mapping, Value};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::ConciergeError;
use crate::packages::{SnapHandler, SnapPackage};
use crate::providers::Provider;
use crate::step::{Step, StepPolicy};
use crate::system::{Command, System};

const OWNER: &str = "juju";

/// Channel used when neither the config nor an override sets one.
pub const DEFAULT_CHANNEL: &str = "3/stable";

/// Juju's data directory, relative to the real user's home.
pub const DATA_DIR: &str = ".local/share/juju";

/// Model added to every bootstrapped controller.
const TEST_MODEL: &str = "testing";

/// Installs Juju and bootstraps one controller per provider.
pub struct JujuHandler {
    channel: String,
    agent_version: String,
    model_defaults: BTreeMap<String, String>,
    bootstrap_constraints: BTreeMap<String, String>,
    timeout: Duration,
    system: Arc<dyn System>,
}

/// Name of the controller concierge bootstraps onto `provider`.
pub fn controller_name(provider: &Provider) -> String {
    format!("concierge-{}", provider.name())
}

impl JujuHandler {
    pub fn new(system: Arc<dyn System>, config: &Config) -> Self {
        let juju = &config.juju;
        let channel = if juju.channel.is_empty() {
            DEFAULT_CHANNEL.to_string()
        } else {
            juju.channel.clone()
        };

        Self {
            channel,
            agent_version: juju.agent_version.clone(),
            model_defaults: juju.model_defaults.clone(),
            bootstrap_constraints: juju.bootstrap_constraints.clone(),
            timeout: config.wait_timeout(),
            system,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    fn snap(&self) -> SnapPackage {
        SnapPackage::new(OWNER, self.channel.clone())
    }

    /// Installs the snap, creates the data directory and writes
    /// `credentials.yaml` for the providers that report credentials.
    pub fn prepare(&self, providers: &[&Provider]) -> Result<()> {
        let handler = SnapHandler::new(self.system.clone(), vec![self.snap()]);
        StepPolicy::Essential.apply(OWNER, "install juju", handler.prepare())?;
        StepPolicy::Essential.apply(
            OWNER,
            "create data directory",
            self.system.mk_home_subdir(Utf8Path::new(DATA_DIR)),
        )?;
        StepPolicy::Essential.apply(OWNER, "write credentials", self.write_credentials(providers))?;
        Ok(())
    }

    fn write_credentials(&self, providers: &[&Provider]) -> Result<()> {
        let Some(document) = credentials_document(providers) else {
            debug!("no provider reports credentials");
            return Ok(());
        };
        let yaml = serde_yaml::to_string(&document)
            .map_err(|e| ConciergeError::Config(format!("failed to serialize credentials: {}", e)))?;
        self.system
            .write_home_file(&Utf8Path::new(DATA_DIR).join("credentials.yaml"), yaml.as_bytes())
    }

    /// Bootstraps a controller onto `provider` and adds the test model.
    ///
    /// A controller that `juju show-controller` already knows about is left
    /// untouched.
    pub fn bootstrap(&self, provider: &Provider) -> Result<()> {
        let controller = controller_name(provider);
        let owner = provider.name();

        if self.controller_exists(provider, &controller) {
            info!(provider = %owner, controller = %controller, "controller already bootstrapped");
            return Ok(());
        }

        Step::essential(
            format!("bootstrap controller {}", controller),
            self.elevate(provider, Command::new(OWNER, self.bootstrap_args(provider))),
        )
        .with_retries(self.timeout)
        .run(self.system.as_ref(), &owner)?;

        Step::essential(
            format!("add model {}", TEST_MODEL),
            self.elevate(
                provider,
                Command::new(OWNER, ["add-model", TEST_MODEL, "-c", controller.as_str()]),
            ),
        )
        .run(self.system.as_ref(), &owner)?;

        info!(provider = %owner, controller = %controller, "bootstrapped controller");
        Ok(())
    }

    fn controller_exists(&self, provider: &Provider, controller: &str) -> bool {
        let cmd = self.elevate(provider, Command::new(OWNER, ["show-controller", controller]));
        self.system.query(&cmd).is_ok()
    }

    /// Arguments of `juju bootstrap`; provider settings override global ones.
    pub fn bootstrap_args(&self, provider: &Provider) -> Vec<String> {
        let mut args = vec![
            "bootstrap".to_string(),
            provider.cloud_name().to_string(),
            controller_name(provider),
            "--verbose".to_string(),
        ];

        let merged = |global: &BTreeMap<String, String>, local: &BTreeMap<String, String>| {
            let mut merged = global.clone();
            merged.extend(local.iter().map(|(k, v)| (k.clone(), v.clone())));
            merged
        };

        for (key, value) in merged(&self.model_defaults, provider.model_defaults()) {
            args.extend(["--model-default".to_string(), format!("{}={}", key, value)]);
        }
        for (key, value) in merged(&self.bootstrap_constraints, provider.bootstrap_constraints()) {
            args.extend(["--bootstrap-constraints".to_string(), format!("{}={}", key, value)]);
        }
        if !self.agent_version.is_empty() {
            args.extend(["--agent-version".to_string(), self.agent_version.clone()]);
        }
        args
    }

    fn elevate(&self, provider: &Provider, cmd: Command) -> Command {
        let cmd = cmd.as_user(self.system.user().name.clone());
        match provider.group_name() {
            Some(group) => cmd.with_group(group),
            None => cmd,
        }
    }

    /// Removes Juju's data directory and purges the snap.
    pub fn restore(&self) -> Result<()> {
        let removed = self.system.remove_all_home(Utf8Path::new(DATA_DIR));
        let purged = SnapHandler::new(self.system.clone(), vec![self.snap()]).restore();
        if let (Err(dir), Err(_)) = (&removed, &purged) {
            warn!("failed to remove juju data directory: {:#}", dir);
        }
        purged?;
        removed?;
        info!("restored juju");
        Ok(())
    }
}

/// `credentials: {CLOUD: {concierge: CREDENTIALS}}` for every provider with
/// credentials, or `None` when there are none.
fn credentials_document(providers: &[&Provider]) -> Option<Value> {
    let mut clouds = Mapping::new();
    for provider in providers {
        if let Some(credentials) = provider.credentials() {
            let mut entry = Mapping::new();
            entry.insert(Value::from("concierge"), credentials.clone());
            clouds.insert(Value::from(provider.cloud_name()), Value::Mapping(entry));
        }
    }
    if clouds.is_empty() {
        return None;
    }

    let mut document = Mapping::new();
    document.insert(Value::from("credentials"), Value::Mapping(clouds));
    Some(Value::Mapping(document))
}
