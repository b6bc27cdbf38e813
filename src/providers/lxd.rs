use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::info;

use crate::config::Config;
use crate::packages::{self, SnapAction, SnapHandler, SnapPackage};
use crate::step::{Step, StepPolicy, run_steps};
use crate::system::{Command, System};

const NAME: &str = "lxd";

/// The LXD container hypervisor.
pub struct Lxd {
    pub(super) bootstrap: bool,
    pub(super) model_defaults: BTreeMap<String, String>,
    pub(super) bootstrap_constraints: BTreeMap<String, String>,
    channel: String,
    timeout: Duration,
    system: Arc<dyn System>,
}

impl Lxd {
    pub fn new(system: Arc<dyn System>, config: &Config) -> Self {
        let lxd = &config.providers.lxd;
        Self {
            bootstrap: lxd.common.bootstrap,
            model_defaults: lxd.common.model_defaults.clone(),
            bootstrap_constraints: lxd.common.bootstrap_constraints.clone(),
            channel: lxd.channel.clone(),
            timeout: config.wait_timeout(),
            system,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    fn snap(&self) -> SnapPackage {
        SnapPackage::new(NAME, self.channel.clone())
    }

    pub fn prepare(&self) -> Result<()> {
        StepPolicy::Essential.apply(NAME, "install lxd", self.install())?;

        let user = self.system.user().name.clone();
        let steps = [
            Step::essential("wait for lxd", Command::new("lxd", ["waitready"]))
                .with_retries(self.timeout),
            Step::essential("initialise lxd", Command::new("lxd", ["init", "--minimal"])),
            Step::essential(
                "disable ipv6 on lxdbr0",
                Command::new("lxc", ["network", "set", "lxdbr0", "ipv6.address", "none"]),
            ),
            Step::essential(
                "open lxd socket permissions",
                Command::new("chmod", ["a+wr", "/var/snap/lxd/common/lxd/unix.socket"]),
            ),
            Step::essential(
                "add user to lxd group",
                Command::new("usermod", ["-a", "-G", "lxd", user.as_str()]),
            ),
            Step::best_effort("flush FORWARD chain", Command::new("iptables", ["-F", "FORWARD"])),
            Step::best_effort(
                "accept forwarded traffic",
                Command::new("iptables", ["-P", "FORWARD", "ACCEPT"]),
            ),
        ];
        run_steps(self.system.as_ref(), NAME, &steps)?;

        info!(provider = NAME, "prepared provider");
        Ok(())
    }

    /// Installs LXD, or moves it to the desired channel.
    ///
    /// LXD must not be refreshed while running, so a refresh is wrapped in
    /// `snap stop` / `snap start`.
    fn install(&self) -> Result<()> {
        let snap = self.snap();
        let handler = SnapHandler::new(self.system.clone(), vec![snap.clone()]);
        let info = self.system.snap_info(NAME, &snap.channel)?;

        match packages::plan(&info, &snap.channel) {
            SnapAction::Install | SnapAction::Skip => {
                handler.ensure(&snap)?;
            }
            SnapAction::Refresh => {
                self.system.run_exclusive(&Command::new("snap", ["stop", NAME]))?;
                self.system
                    .run_exclusive(&packages::refresh_command(&snap, info.classic))?;
                self.system.run_exclusive(&Command::new("snap", ["start", NAME]))?;
            }
        }
        Ok(())
    }

    pub fn restore(&self) -> Result<()> {
        SnapHandler::new(self.system.clone(), vec![self.snap()]).restore()?;
        info!(provider = NAME, "restored provider");
        Ok(())
    }
}
