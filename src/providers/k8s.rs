use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use camino::Utf8Path;
use tracing::{debug, info};

use super::kube::{self, KUBE_DIR, kubectl_channel};
use crate::config::Config;
use crate::error::ConciergeError;
use crate::packages::{DebHandler, SnapHandler, SnapPackage};
use crate::serde_helpers::{OrderedMap, Scalar};
use crate::step::{Step, StepPolicy, run_steps};
use crate::system::{Command, System};

const NAME: &str = "k8s";

/// Channel used when neither the config nor an override sets one.
pub const DEFAULT_CHANNEL: &str = "1.32-classic/stable";

/// What `k8s status` prints on a node that was never bootstrapped.
const NOT_BOOTSTRAPPED: &str = "not part of a Kubernetes cluster";

/// Canonical Kubernetes.
pub struct K8s {
    pub(super) bootstrap: bool,
    pub(super) model_defaults: BTreeMap<String, String>,
    pub(super) bootstrap_constraints: BTreeMap<String, String>,
    channel: String,
    features: OrderedMap<OrderedMap<Scalar>>,
    timeout: Duration,
    snaps: Vec<SnapPackage>,
    debs: Vec<String>,
    system: Arc<dyn System>,
}

impl K8s {
    pub fn new(system: Arc<dyn System>, config: &Config) -> Self {
        let k8s = &config.providers.k8s;
        let channel = if k8s.channel.is_empty() {
            DEFAULT_CHANNEL.to_string()
        } else {
            k8s.channel.clone()
        };
        let snaps = vec![
            SnapPackage::new(NAME, channel.clone()),
            SnapPackage::new("kubectl", kubectl_channel(system.as_ref(), &channel)),
        ];

        Self {
            bootstrap: k8s.common.bootstrap,
            model_defaults: k8s.common.model_defaults.clone(),
            bootstrap_constraints: k8s.common.bootstrap_constraints.clone(),
            channel,
            features: k8s.features.clone(),
            timeout: config.wait_timeout(),
            snaps,
            debs: vec!["iptables".to_string()],
            system,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn prepare(&self) -> Result<()> {
        let debs = DebHandler::new(self.system.clone(), self.debs.clone());
        StepPolicy::Essential.apply(NAME, "install debs", debs.prepare())?;
        let snaps = SnapHandler::new(self.system.clone(), self.snaps.clone());
        StepPolicy::Essential.apply(NAME, "install snaps", snaps.prepare())?;

        if self.needs_bootstrap() {
            Step::essential("bootstrap cluster", Command::new(NAME, ["bootstrap"]))
                .run(self.system.as_ref(), NAME)?;
        }

        let mut steps = vec![
            Step::essential("wait for k8s", Command::new(NAME, ["status", "--wait-ready"]))
                .with_retries(self.timeout),
        ];
        steps.extend(self.feature_steps());
        run_steps(self.system.as_ref(), NAME, &steps)?;

        let config = Step::essential(
            "read kubeconfig",
            Command::new(NAME, ["kubectl", "config", "view", "--raw"]),
        )
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

    /// Asks `k8s status` whether the node already belongs to a cluster.
    ///
    /// A missing `k8s` executable (possible during a dry run, before the
    /// snap is installed) counts as "not bootstrapped".
    fn needs_bootstrap(&self) -> bool {
        match self.system.query(&Command::new(NAME, ["status"])) {
            Ok(_) => false,
            Err(e) => match e.downcast_ref::<ConciergeError>() {
                Some(ConciergeError::CommandNotFound { .. }) => true,
                Some(err) if err.command_output().is_some_and(|o| o.contains(NOT_BOOTSTRAPPED)) => {
                    true
                }
                _ => {
                    debug!(provider = NAME, "k8s status failed, assuming bootstrapped: {:#}", e);
                    false
                }
            },
        }
    }

    /// Features with options first (each option set before the feature is
    /// enabled), then features without options, both in document order.
    fn feature_steps(&self) -> Vec<Step> {
        let (configured, plain): (Vec<_>, Vec<_>) =
            self.features.iter().partition(|(_, options)| !options.is_empty());

        let mut steps = Vec::new();
        for (feature, options) in configured {
            for (key, value) in options.iter() {
                steps.push(
                    Step::essential(
                        format!("configure {}.{}", feature, key),
                        Command::new(NAME, ["set".to_string(), format!("{}.{}={}", feature, key, value)]),
                    )
                    .with_retries(self.timeout),
                );
            }
            steps.push(enable_step(feature, self.timeout));
        }
        for (feature, _) in plain {
            steps.push(enable_step(feature, self.timeout));
        }
        steps
    }

    pub fn restore(&self) -> Result<()> {
        let removed = SnapHandler::new(self.system.clone(), self.snaps.clone()).restore();
        self.system.remove_all_home(Utf8Path::new(KUBE_DIR))?;
        removed?;
        info!(provider = NAME, "restored provider");
        Ok(())
    }
}

fn enable_step(feature: &str, timeout: Duration) -> Step {
    Step::essential(format!("enable {}", feature), Command::new(NAME, ["enable", feature]))
        .with_retries(timeout)
}
