//! Target platforms concierge can configure.
//!
//! [`Provider`] is a closed enum over the supported kinds; every capability
//! dispatches exhaustively, so adding a provider is a compile-checked change
//! to [`ProviderKind`] and the match arms below.

mod google;
mod k8s;
mod kube;
mod lxd;
mod microceph;
mod microk8s;

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};

use crate::config::Config;
use crate::system::System;

pub use google::Google;
pub use k8s::K8s;
pub use kube::{KUBECONFIG, kubectl_channel};
pub use lxd::Lxd;
pub use microceph::MicroCeph;
pub use microk8s::MicroK8s;

/// Supported providers, in preparation order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumString, EnumIter,
    Deserialize, Serialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Lxd,
    MicroK8s,
    K8s,
    Google,
    MicroCeph,
}

impl ProviderKind {
    /// Whether the configuration enables this provider.
    pub fn is_enabled(self, config: &Config) -> bool {
        let providers = &config.providers;
        match self {
            Self::Lxd => providers.lxd.common.enable,
            Self::MicroK8s => providers.microk8s.common.enable,
            Self::K8s => providers.k8s.common.enable,
            Self::Google => providers.google.common.enable,
            Self::MicroCeph => providers.microceph.common.enable,
        }
    }
}

/// One configured provider.
pub enum Provider {
    Lxd(Lxd),
    MicroK8s(MicroK8s),
    K8s(K8s),
    Google(Google),
    MicroCeph(MicroCeph),
}

impl Provider {
    pub fn new(kind: ProviderKind, system: Arc<dyn System>, config: &Config) -> Self {
        match kind {
            ProviderKind::Lxd => Self::Lxd(Lxd::new(system, config)),
            ProviderKind::MicroK8s => Self::MicroK8s(MicroK8s::new(system, config)),
            ProviderKind::K8s => Self::K8s(K8s::new(system, config)),
            ProviderKind::Google => Self::Google(Google::new(system, config)),
            ProviderKind::MicroCeph => Self::MicroCeph(MicroCeph::new(system, config)),
        }
    }

    /// Every enabled provider, in [`ProviderKind`] order.
    pub fn enabled(system: &Arc<dyn System>, config: &Config) -> Vec<Self> {
        ProviderKind::iter()
            .filter(|kind| kind.is_enabled(config))
            .map(|kind| Self::new(kind, system.clone(), config))
            .collect()
    }

    pub fn kind(&self) -> ProviderKind {
        match self {
            Self::Lxd(_) => ProviderKind::Lxd,
            Self::MicroK8s(_) => ProviderKind::MicroK8s,
            Self::K8s(_) => ProviderKind::K8s,
            Self::Google(_) => ProviderKind::Google,
            Self::MicroCeph(_) => ProviderKind::MicroCeph,
        }
    }

    /// Name used in logs, controller names and the runtime cache.
    pub fn name(&self) -> String {
        self.kind().to_string()
    }

    /// Installs and configures the provider.
    pub fn prepare(&mut self) -> Result<()> {
        match self {
            Self::Lxd(p) => p.prepare(),
            Self::MicroK8s(p) => p.prepare(),
            Self::K8s(p) => p.prepare(),
            Self::Google(p) => p.prepare(),
            Self::MicroCeph(p) => p.prepare(),
        }
    }

    /// Removes what `prepare` installed. Succeeds when nothing is installed.
    pub fn restore(&self) -> Result<()> {
        match self {
            Self::Lxd(p) => p.restore(),
            Self::MicroK8s(p) => p.restore(),
            Self::K8s(p) => p.restore(),
            Self::Google(p) => p.restore(),
            Self::MicroCeph(p) => p.restore(),
        }
    }

    /// Whether a Juju controller should be bootstrapped onto the provider.
    pub fn bootstrap(&self) -> bool {
        match self {
            Self::Lxd(p) => p.bootstrap,
            Self::MicroK8s(p) => p.bootstrap,
            Self::K8s(p) => p.bootstrap,
            Self::Google(p) => p.bootstrap,
            Self::MicroCeph(_) => false,
        }
    }

    /// Name of the provider as Juju sees it.
    pub fn cloud_name(&self) -> &'static str {
        match self {
            Self::Lxd(_) => "localhost",
            Self::MicroK8s(_) => "microk8s",
            Self::K8s(_) => "k8s",
            Self::Google(_) => "google",
            Self::MicroCeph(_) => "microceph",
        }
    }

    /// POSIX group that grants the real user access to the provider.
    pub fn group_name(&self) -> Option<&str> {
        match self {
            Self::Lxd(_) => Some("lxd"),
            Self::MicroK8s(p) => Some(p.group_name()),
            Self::MicroCeph(_) => Some("microceph"),
            Self::K8s(_) | Self::Google(_) => None,
        }
    }

    /// The provider's section of Juju's `credentials.yaml`.
    pub fn credentials(&self) -> Option<&serde_yaml::Value> {
        match self {
            Self::Google(p) => p.credentials(),
            _ => None,
        }
    }

    pub fn model_defaults(&self) -> &BTreeMap<String, String> {
        match self {
            Self::Lxd(p) => &p.model_defaults,
            Self::MicroK8s(p) => &p.model_defaults,
            Self::K8s(p) => &p.model_defaults,
            Self::Google(p) => &p.model_defaults,
            Self::MicroCeph(p) => &p.model_defaults,
        }
    }

    pub fn bootstrap_constraints(&self) -> &BTreeMap<String, String> {
        match self {
            Self::Lxd(p) => &p.bootstrap_constraints,
            Self::MicroK8s(p) => &p.bootstrap_constraints,
            Self::K8s(p) => &p.bootstrap_constraints,
            Self::Google(p) => &p.bootstrap_constraints,
            Self::MicroCeph(p) => &p.bootstrap_constraints,
        }
    }
}
