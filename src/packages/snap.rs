use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::error::ConciergeError;
use crate::snapd::normalize_channel;
use crate::system::{Command, SnapInfo, System};

/// A snap the host should have, at an optional channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapPackage {
    pub name: String,
    /// Desired channel; empty means the store default.
    pub channel: String,
    /// `plug` or `plug slot` strings; a plug without `:` belongs to this snap.
    pub connections: Vec<String>,
}

impl SnapPackage {
    pub fn new(name: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            channel: channel.into(),
            connections: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_connections(mut self, connections: Vec<String>) -> Self {
        self.connections = connections;
        self
    }
}

/// What the reconciler does for one snap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapAction {
    Install,
    Refresh,
    Skip,
}

/// Decides the action for a snap from its queried state.
pub fn plan(info: &SnapInfo, desired_channel: &str) -> SnapAction {
    if !info.installed {
        return SnapAction::Install;
    }
    if desired_channel.is_empty() {
        return SnapAction::Skip;
    }
    match &info.tracking_channel {
        Some(current) if *current == normalize_channel(desired_channel) => SnapAction::Skip,
        _ => SnapAction::Refresh,
    }
}

fn channel_args(verb: &str, snap: &SnapPackage, classic: bool) -> Vec<String> {
    let mut args = vec![verb.to_string(), snap.name.clone()];
    if !snap.channel.is_empty() {
        args.extend(["--channel".to_string(), snap.channel.clone()]);
    }
    if classic {
        args.push("--classic".to_string());
    }
    args
}

pub fn install_command(snap: &SnapPackage, classic: bool) -> Command {
    Command::new("snap", channel_args("install", snap, classic))
}

pub fn refresh_command(snap: &SnapPackage, classic: bool) -> Command {
    Command::new("snap", channel_args("refresh", snap, classic))
}

/// Reconciles a set of snaps against the host.
pub struct SnapHandler {
    system: Arc<dyn System>,
    snaps: Vec<SnapPackage>,
}

impl SnapHandler {
    pub fn new(system: Arc<dyn System>, snaps: Vec<SnapPackage>) -> Self {
        Self { system, snaps }
    }

    pub fn snaps(&self) -> &[SnapPackage] {
        &self.snaps
    }

    /// Installs or refreshes every snap, stopping at the first failure.
    pub fn prepare(&self) -> Result<()> {
        for snap in &self.snaps {
            self.ensure(snap)?;
        }
        Ok(())
    }

    /// Brings one snap to its desired channel and forms its connections.
    pub fn ensure(&self, snap: &SnapPackage) -> Result<SnapAction> {
        let info = self.system.snap_info(&snap.name, &snap.channel)?;
        let action = plan(&info, &snap.channel);
        match action {
            SnapAction::Install => {
                self.system.run_exclusive(&install_command(snap, info.classic))?;
            }
            SnapAction::Refresh => {
                self.system.run_exclusive(&refresh_command(snap, info.classic))?;
            }
            SnapAction::Skip => debug!(snap = %snap.name, "snap already at desired channel"),
        }
        self.connect(snap)?;
        info!(snap = %snap.name, "{}", match action {
            SnapAction::Install => "installed snap",
            SnapAction::Refresh => "refreshed snap",
            SnapAction::Skip => "snap up to date",
        });
        Ok(action)
    }

    fn connect(&self, snap: &SnapPackage) -> Result<()> {
        if snap.connections.is_empty() {
            return Ok(());
        }

        let existing = self.system.snap_connections(&snap.name)?;
        for connection in &snap.connections {
            let mut parts = connection.split_whitespace();
            let Some(plug) = parts.next() else {
                continue;
            };
            let plug = if plug.contains(':') {
                plug.to_string()
            } else {
                format!("{}:{}", snap.name, plug)
            };

            if existing.contains(&plug) {
                debug!(snap = %snap.name, plug = %plug, "already connected");
                continue;
            }

            let mut args = vec!["connect".to_string(), plug];
            args.extend(parts.map(str::to_string));
            self.system.run_exclusive(&Command::new("snap", args))?;
        }
        Ok(())
    }

    /// Purges every installed snap. All snaps are attempted; failures are
    /// reported together afterwards.
    pub fn restore(&self) -> Result<()> {
        let mut failures = Vec::new();
        for snap in &self.snaps {
            if let Err(e) = self.remove(snap) {
                warn!(snap = %snap.name, "failed to remove snap: {:#}", e);
                failures.push(format!("{}: {:#}", snap.name, e));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(ConciergeError::Provisioning { failures }.into())
        }
    }

    fn remove(&self, snap: &SnapPackage) -> Result<()> {
        if !self.system.snap_info(&snap.name, "")?.installed {
            debug!(snap = %snap.name, "snap not installed, nothing to remove");
            return Ok(());
        }
        self.system
            .run_exclusive(&Command::new("snap", ["remove", snap.name.as_str(), "--purge"]))?;
        info!(snap = %snap.name, "removed snap");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::mock::MockSystem;

    fn handler(mock: &Arc<MockSystem>, snaps: Vec<SnapPackage>) -> SnapHandler {
        SnapHandler::new(mock.clone(), snaps)
    }

    #[test]
    fn absent_snap_is_installed_once() {
        let mock = Arc::new(MockSystem::new());
        handler(&mock, vec![SnapPackage::new("juju", "3.6/stable")]).prepare().unwrap();
        assert_eq!(mock.executed(), vec!["snap install juju --channel 3.6/stable"]);
    }

    #[test]
    fn matching_channel_is_left_alone() {
        let mock = Arc::new(MockSystem::new());
        mock.mock_snap_installed("juju", "3.6/stable");
        handler(&mock, vec![SnapPackage::new("juju", "3.6")]).prepare().unwrap();
        assert!(mock.executed().is_empty());
    }

    #[test]
    fn empty_desired_channel_is_left_alone() {
        let mock = Arc::new(MockSystem::new());
        mock.mock_snap_installed("jq", "latest/stable");
        handler(&mock, vec![SnapPackage::new("jq", "")]).prepare().unwrap();
        assert!(mock.executed().is_empty());
    }

    #[test]
    fn different_channel_is_refreshed() {
        let mock = Arc::new(MockSystem::new());
        mock.mock_snap_installed("juju", "3.5/stable");
        handler(&mock, vec![SnapPackage::new("juju", "3.6/stable")]).prepare().unwrap();
        assert_eq!(mock.executed(), vec!["snap refresh juju --channel 3.6/stable"]);
    }

    #[test]
    fn classic_snap_gets_flag() {
        let mock = Arc::new(MockSystem::new());
        mock.mock_snap("charmcraft", SnapInfo {
            installed: false,
            tracking_channel: None,
            classic: true,
        });
        handler(&mock, vec![SnapPackage::new("charmcraft", "latest/stable")])
            .prepare()
            .unwrap();
        assert_eq!(
            mock.executed(),
            vec!["snap install charmcraft --channel latest/stable --classic"]
        );
    }

    #[test]
    fn only_missing_connections_are_formed() {
        let mock = Arc::new(MockSystem::new());
        mock.mock_connected("jhack", "jhack:dot-local-share-juju");
        let snap = SnapPackage::new("jhack", "").with_connections(vec![
            "jhack:dot-local-share-juju".to_string(),
            "ssh-read snapd:ssh-keys".to_string(),
        ]);
        handler(&mock, vec![snap]).prepare().unwrap();
        assert_eq!(
            mock.executed(),
            vec!["snap install jhack", "snap connect jhack:ssh-read snapd:ssh-keys"]
        );
    }

    #[test]
    fn restore_removes_installed_snaps_only() {
        let mock = Arc::new(MockSystem::new());
        mock.mock_snap_installed("lxd", "5.21/stable");
        handler(&mock, vec![SnapPackage::new("lxd", ""), SnapPackage::new("juju", "")])
            .restore()
            .unwrap();
        assert_eq!(mock.executed(), vec!["snap remove lxd --purge"]);
    }

    #[test]
    fn restore_attempts_every_snap() {
        let mock = Arc::new(MockSystem::new());
        mock.mock_snap_installed("k8s", "");
        mock.mock_snap_installed("kubectl", "");
        mock.mock_failure("snap remove k8s --purge", "busy");
        let err = handler(&mock, vec![SnapPackage::new("k8s", ""), SnapPackage::new("kubectl", "")])
            .restore()
            .unwrap_err();
        assert!(err.to_string().contains("k8s"));
        assert_eq!(
            mock.executed(),
            vec!["snap remove k8s --purge", "snap remove kubectl --purge"]
        );
    }
}
