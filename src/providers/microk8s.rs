use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use camino::Utf8Path;
use tracing::info;

use super::kube::{self, KUBE_DIR, kubectl_channel};
use crate::config::Config;
use crate::packages::{SnapHandler, SnapPackage};
use crate::step::{Step, StepPolicy, run_steps};
use crate::system::{Command, System};

const NAME: &str = "microk8s";

/// Channel used when neither the config nor an override sets one.
pub const DEFAULT_CHANNEL: &str = "1.32-strict/stable";

/// MicroK8s, a snap-packaged Kubernetes distribution.
pub struct MicroK8s {
    pub(super) bootstrap: bool,
    pub(super) model_defaults: BTreeMap<String, String>,
    pub(super) bootstrap_constraints: BTreeMap<String, String>,
    channel: String,
    addons: Vec<String>,
    timeout: Duration,
    snaps: Vec<SnapPackage>,
    system: Arc<dyn System>,
}

impl MicroK8s {
    pub fn new(system: Arc<dyn System>, config: &Config) -> Self {
        let microk8s = &config.providers.microk8s;
        let channel = if microk8s.channel.is_empty() {
            DEFAULT_CHANNEL.to_string()
        } else {
            microk8s.channel.clone()
        };
        let snaps = vec![
            SnapPackage::new(NAME, channel.clone()),
            SnapPackage::new("kubectl", kubectl_channel(system.as_ref(), &channel)),
        ];

        Self {
            bootstrap: microk8s.common.bootstrap,
            model_defaults: microk8s.common.model_defaults.clone(),
            bootstrap_constraints: microk8s.common.bootstrap_constraints.clone(),
            channel,
            addons: microk8s.addons.clone(),
            timeout: config.wait_timeout(),
            snaps,
            system,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// `snap_microk8s` for strictly confined channels, `microk8s` otherwise.
    pub fn group_name(&self) -> &'static str {
        if self.channel.contains("strict") {
            "snap_microk8s"
        } else {
            "microk8s"
        }
    }

    pub fn prepare(&self) -> Result<()> {
        let handler = SnapHandler::new(self.system.clone(), self.snaps.clone());
        StepPolicy::Essential.apply(NAME, "install snaps", handler.prepare())?;

        let user = self.system.user().name.clone();
        let mut steps = vec![
            Step::essential("wait for microk8s", Command::new(NAME, ["status", "--wait-ready"]))
                .with_retries(self.timeout),
        ];
        for addon in &self.addons {
            steps.push(
                Step::essential(
                    format!("enable addon {}", addon),
                    Command::new(NAME, ["enable", addon.as_str()]),
                )
                .with_retries(self.timeout),
            );
        }
        steps.push(Step::essential(
            "add user to microk8s group",
            Command::new("usermod", ["-a", "-G", self.group_name(), user.as_str()]),
        ));
        run_steps(self.system.as_ref(), NAME, &steps)?;

        let config = Step::essential("read kubeconfig", Command::new(NAME, ["config"]))
            .run(self.system.as_ref(), NAME)?
            .unwrap_or_default();
        StepPolicy::Essential.apply(
            NAME,
            "write kubeconfig",
            kube::write_kubeconfig(self.system.as_ref(), &config.stdout),
        )?;

        info!(provider = NAME, "prepared provider");
        Ok(())
    }

    pub fn restore(&self) -> Result<()> {
        let removed = SnapHandler::new(self.system.clone(), self.snaps.clone()).restore();
        self.system.remove_all_home(Utf8Path::new(KUBE_DIR))?;
        removed?;
        info!(provider = NAME, "restored provider");
        Ok(())
    }
}
