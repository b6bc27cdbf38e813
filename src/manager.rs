//! Provisioning manager: host packages, providers and controller bootstrap.
//!
//! The manager never stops at the first failure. Every component is
//! attempted and failures are aggregated into an [`Outcome`], which turns
//! into [`ConciergeError::Provisioning`] when anything failed.

use std::sync::Arc;

use anyhow::Result;
use camino::Utf8Path;
use tracing::{error, info, warn};

use crate::config::{CACHE_FILE, Config, Status};
use crate::error::ConciergeError;
use crate::juju::JujuHandler;
use crate::packages::{DebHandler, SnapHandler, SnapPackage};
use crate::providers::{Provider, ProviderKind};
use crate::system::System;

/// Lifecycle state of one provider within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderState {
    Prepared,
    Failed,
    Restored,
}

/// Result of a prepare or restore run.
#[derive(Debug, Default)]
pub struct Outcome {
    pub providers: Vec<(ProviderKind, ProviderState)>,
    pub failures: Vec<String>,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn state(&self, kind: ProviderKind) -> Option<ProviderState> {
        self.providers.iter().find(|(k, _)| *k == kind).map(|(_, s)| *s)
    }

    fn fail(&mut self, component: &str, err: &anyhow::Error) {
        error!("{} failed: {:#}", component, err);
        self.failures.push(format!("{}: {:#}", component, err));
    }

    pub fn into_result(self) -> Result<Self, ConciergeError> {
        if self.failures.is_empty() {
            Ok(self)
        } else {
            Err(ConciergeError::Provisioning {
                failures: self.failures,
            })
        }
    }
}

pub struct Manager {
    config: Config,
    system: Arc<dyn System>,
}

impl Manager {
    pub fn new(system: Arc<dyn System>, config: Config) -> Self {
        Self { config, system }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn host_snaps(&self) -> SnapHandler {
        let snaps = self
            .config
            .host
            .snaps
            .iter()
            .map(|(name, snap)| {
                SnapPackage::new(name, snap.channel.clone()).with_connections(snap.connections.clone())
            })
            .collect();
        SnapHandler::new(self.system.clone(), snaps)
    }

    fn host_debs(&self) -> DebHandler {
        DebHandler::new(self.system.clone(), self.config.host.packages.clone())
    }

    /// Provisions the host and bootstraps the requested controllers.
    pub fn prepare(&self) -> Outcome {
        let mut outcome = Outcome::default();
        self.record_status(Status::Provisioning);

        if let Err(e) = self.host_debs().prepare() {
            outcome.fail("host packages", &e);
        }
        if let Err(e) = self.host_snaps().prepare() {
            outcome.fail("host snaps", &e);
        }

        let mut providers = Provider::enabled(&self.system, &self.config);
        for provider in &mut providers {
            let state = match provider.prepare() {
                Ok(()) => ProviderState::Prepared,
                Err(e) => {
                    outcome.fail(&provider.name(), &e);
                    ProviderState::Failed
                }
            };
            outcome.providers.push((provider.kind(), state));
        }

        if self.config.juju.disable {
            info!("juju disabled, skipping controller bootstrap");
        } else {
            let bootstrapping: Vec<&Provider> = providers
                .iter()
                .filter(|p| p.bootstrap() && outcome.state(p.kind()) == Some(ProviderState::Prepared))
                .collect();
            self.bootstrap(&bootstrapping, &mut outcome);
        }

        let status = if outcome.is_success() { Status::Succeeded } else { Status::Failed };
        self.record_status(status);
        outcome
    }

    fn bootstrap(&self, providers: &[&Provider], outcome: &mut Outcome) {
        let juju = JujuHandler::new(self.system.clone(), &self.config);
        if let Err(e) = juju.prepare(providers) {
            outcome.fail("juju", &e);
            return;
        }
        for provider in providers {
            if let Err(e) = juju.bootstrap(provider) {
                outcome.fail(&format!("juju bootstrap on {}", provider.name()), &e);
            }
        }
    }

    /// Undoes `prepare`: Juju first, providers in reverse order, then host
    /// packages. Every part is attempted.
    pub fn restore(&self) -> Outcome {
        let mut outcome = Outcome::default();

        if !self.config.juju.disable
            && let Err(e) = JujuHandler::new(self.system.clone(), &self.config).restore()
        {
            outcome.fail("juju", &e);
        }

        let providers = Provider::enabled(&self.system, &self.config);
        for provider in providers.iter().rev() {
            let state = match provider.restore() {
                Ok(()) => ProviderState::Restored,
                Err(e) => {
                    outcome.fail(&provider.name(), &e);
                    ProviderState::Failed
                }
            };
            outcome.providers.push((provider.kind(), state));
        }

        if let Err(e) = self.host_snaps().restore() {
            outcome.fail("host snaps", &e);
        }
        if let Err(e) = self.host_debs().restore() {
            outcome.fail("host packages", &e);
        }

        if let Some(cache_dir) = Utf8Path::new(CACHE_FILE).parent()
            && let Err(e) = self.system.remove_all_home(cache_dir)
        {
            warn!("failed to remove runtime cache: {:#}", e);
        }
        outcome
    }

    /// Writes the effective configuration and `status` to the runtime cache.
    fn record_status(&self, status: Status) {
        let mut cached = self.config.clone();
        cached.status = Some(status);
        let result = cached
            .to_yaml()
            .map_err(anyhow::Error::from)
            .and_then(|yaml| self.system.write_home_file(Utf8Path::new(CACHE_FILE), yaml.as_bytes()));
        if let Err(e) = result {
            warn!("failed to record status {}: {:#}", status, e);
        }
    }
}

/// Reads the configuration recorded by the last `prepare`.
pub fn cached_config(system: &dyn System) -> Result<Config> {
    let contents = system.read_home_file(Utf8Path::new(CACHE_FILE)).map_err(|e| {
        ConciergeError::Config(format!("no runtime cache found (has prepare run?): {:#}", e))
    })?;
    let yaml = String::from_utf8_lossy(&contents);
    Ok(Config::parse(&yaml)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::mock::MockSystem;

    const CACHE: &str = "/home/test-user/.cache/concierge/concierge.yaml";

    fn cached_status(mock: &MockSystem) -> Option<Status> {
        let files = mock.created_files();
        let yaml = String::from_utf8(files.get(CACHE)?.clone()).ok()?;
        Config::parse(&yaml).ok()?.status
    }

    #[test]
    fn prepare_orders_host_providers_then_juju() {
        let mock = Arc::new(MockSystem::new());
        mock.mock_failure("sudo -u test-user -g lxd juju show-controller concierge-lxd", "");
        let config = Config::parse(
            "providers:\n  lxd:\n    enable: true\n    bootstrap: true\nhost:\n  packages: [make]\n  snaps:\n    jq:\n",
        )
        .unwrap();

        let outcome = Manager::new(mock.clone(), config).prepare();
        assert!(outcome.is_success(), "{:?}", outcome.failures);
        assert_eq!(outcome.state(ProviderKind::Lxd), Some(ProviderState::Prepared));

        let executed = mock.executed();
        let position = |cmd: &str| {
            executed
                .iter()
                .position(|c| c == cmd)
                .unwrap_or_else(|| panic!("{} not run: {:?}", cmd, executed))
        };
        assert!(position("apt-get install -y make") < position("snap install jq"));
        assert!(position("snap install jq") < position("snap install lxd"));
        assert!(position("iptables -P FORWARD ACCEPT") < position("snap install juju --channel 3/stable"));
        assert!(
            position("snap install juju --channel 3/stable")
                < position("sudo -u test-user -g lxd juju bootstrap localhost concierge-lxd --verbose")
        );
        assert_eq!(cached_status(&mock), Some(Status::Succeeded));
    }

    #[test]
    fn failed_provider_does_not_block_others_or_bootstrap() {
        let mock = Arc::new(MockSystem::new());
        mock.mock_failure("lxd init --minimal", "boom");
        mock.mock_failure("microceph status", "");
        let config = Config::parse(
            "providers:\n  lxd:\n    enable: true\n    bootstrap: true\n  microceph:\n    enable: true\n",
        )
        .unwrap();

        let outcome = Manager::new(mock.clone(), config).prepare();

        assert_eq!(outcome.state(ProviderKind::Lxd), Some(ProviderState::Failed));
        assert_eq!(outcome.state(ProviderKind::MicroCeph), Some(ProviderState::Prepared));
        assert!(!mock.executed().iter().any(|c| c.contains("juju bootstrap")));
        assert_eq!(cached_status(&mock), Some(Status::Failed));

        let err = outcome.into_result().unwrap_err();
        assert!(err.to_string().starts_with("provisioning failed: lxd: lxd: initialise lxd failed"));
    }

    #[test]
    fn disabled_juju_is_not_installed() {
        let mock = Arc::new(MockSystem::new());
        let config = Config::parse(
            "juju:\n  disable: true\nproviders:\n  lxd:\n    enable: true\n    bootstrap: true\n",
        )
        .unwrap();
        let outcome = Manager::new(mock.clone(), config).prepare();
        assert!(outcome.is_success());
        assert!(!mock.executed().iter().any(|c| c.contains("juju")));
    }

    #[test]
    fn bootstrap_failure_is_reported() {
        let mock = Arc::new(MockSystem::new());
        mock.mock_failure("sudo -u test-user -g lxd juju show-controller concierge-lxd", "");
        mock.mock_failure(
            "sudo -u test-user -g lxd juju bootstrap localhost concierge-lxd --verbose",
            "no space left",
        );
        let config =
            Config::parse("providers:\n  lxd:\n    enable: true\n    bootstrap: true\n").unwrap();

        let outcome = Manager::new(mock, config).prepare();
        assert_eq!(outcome.state(ProviderKind::Lxd), Some(ProviderState::Prepared));
        assert_eq!(outcome.failures.len(), 1);
        assert!(outcome.failures[0].starts_with("juju bootstrap on lxd"));
    }

    #[test]
    fn restore_reverses_order_and_attempts_everything() {
        let mock = Arc::new(MockSystem::new());
        mock.mock_snap_installed("juju", "3/stable");
        mock.mock_snap_installed("lxd", "");
        mock.mock_snap_installed("microceph", "");
        mock.mock_snap_installed("jq", "");
        mock.mock_failure("snap remove microceph --purge", "busy");
        let config = Config::parse(
            "providers:\n  lxd:\n    enable: true\n  microceph:\n    enable: true\nhost:\n  snaps:\n    jq:\n",
        )
        .unwrap();

        let outcome = Manager::new(mock.clone(), config).restore();

        assert_eq!(
            mock.executed(),
            vec![
                "snap remove juju --purge",
                "snap remove microceph --purge",
                "snap remove lxd --purge",
                "snap remove jq --purge",
            ]
        );
        assert_eq!(outcome.state(ProviderKind::MicroCeph), Some(ProviderState::Failed));
        assert_eq!(outcome.state(ProviderKind::Lxd), Some(ProviderState::Restored));
        assert_eq!(outcome.failures.len(), 1);
        assert!(mock.deleted().contains(&"/home/test-user/.cache/concierge".to_string()));
    }

    #[test]
    fn restore_of_untouched_host_succeeds() {
        let mock = Arc::new(MockSystem::new());
        let config = crate::config::presets::preset("dev").unwrap();
        let outcome = Manager::new(mock.clone(), config).restore();
        assert!(outcome.is_success(), "{:?}", outcome.failures);
        assert!(!mock.executed().iter().any(|c| c.contains("remove")));
    }

    #[test]
    fn cached_config_round_trips() {
        let mock = MockSystem::new();
        let mut config = Config::parse("providers:\n  k8s:\n    enable: true\n").unwrap();
        config.status = Some(Status::Succeeded);
        mock.mock_file(CACHE, config.to_yaml().unwrap().as_bytes());

        let cached = cached_config(&mock).unwrap();
        assert!(cached.providers.k8s.common.enable);
        assert_eq!(cached.status, Some(Status::Succeeded));
    }

    #[test]
    fn missing_cache_is_a_config_error() {
        let err = cached_config(&MockSystem::new()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConciergeError>(),
            Some(ConciergeError::Config(_))
        ));
    }
}
