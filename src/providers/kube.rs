//! Helpers shared by the Kubernetes distributions.

use anyhow::Result;
use camino::Utf8Path;
use tracing::{debug, warn};

use crate::snapd::normalize_channel;
use crate::system::System;

/// Where the kubeconfig is written, relative to the real user's home.
pub const KUBECONFIG: &str = ".kube/config";

/// Directory removed on restore, relative to the real user's home.
pub(super) const KUBE_DIR: &str = ".kube";

/// Picks the `kubectl` channel matching a distribution channel.
///
/// `1.32-classic/stable` maps to `1.32/stable` when the store offers that
/// channel, otherwise to `stable`.
pub fn kubectl_channel(system: &dyn System, distribution_channel: &str) -> String {
    let normalized = normalize_channel(distribution_channel);
    let track = normalized.split('/').next().unwrap_or_default();
    let version = track.split('-').next().unwrap_or_default();
    let candidate = format!("{}/stable", version);

    match system.snap_channels("kubectl") {
        Ok(channels) if channels.contains(&candidate) => candidate,
        Ok(_) => {
            debug!("kubectl has no channel {}, using stable", candidate);
            "stable".to_string()
        }
        Err(e) => {
            warn!("failed to list kubectl channels, using stable: {:#}", e);
            "stable".to_string()
        }
    }
}

/// Writes a kubeconfig into the real user's home.
pub(super) fn write_kubeconfig(system: &dyn System, contents: &[u8]) -> Result<()> {
    system.write_home_file(Utf8Path::new(KUBECONFIG), contents)
}
