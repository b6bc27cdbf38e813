use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::error::ConciergeError;
use crate::system::{Command, System};

/// Reconciles archive packages. Debs have no channel: a package is installed
/// when absent and never reinstalled.
pub struct DebHandler {
    system: Arc<dyn System>,
    packages: Vec<String>,
}

impl DebHandler {
    pub fn new(system: Arc<dyn System>, packages: Vec<String>) -> Self {
        Self { system, packages }
    }

    /// Queries the package database.
    ///
    /// Only a package whose status is `installed` counts as present: a
    /// removed package that kept its configuration files is still known to
    /// dpkg but absent. A non-zero exit means dpkg has never heard of the
    /// package; a missing `dpkg-query` is an error.
    pub fn is_installed(&self, name: &str) -> Result<bool> {
        match self.system.query(&status_query(name)) {
            Ok(output) => {
                let status = output.stdout_lossy();
                let status = status.trim();
                if status != "installed" {
                    debug!(deb = %name, status, "package not installed");
                }
                Ok(status == "installed")
            }
            Err(e) if matches!(
                e.downcast_ref::<ConciergeError>(),
                Some(ConciergeError::Execution { .. })
            ) =>
            {
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Installs every absent package after a single index update.
    pub fn prepare(&self) -> Result<()> {
        let mut missing = Vec::new();
        for name in &self.packages {
            if self.is_installed(name)? {
                debug!(deb = %name, "package already installed");
            } else {
                missing.push(name.as_str());
            }
        }
        if missing.is_empty() {
            return Ok(());
        }

        self.system.run_exclusive(&Command::new("apt-get", ["update"]))?;
        for name in missing {
            self.system
                .run_exclusive(&Command::new("apt-get", ["install", "-y", name]))?;
            info!(deb = %name, "installed package");
        }
        Ok(())
    }

    /// Purges every installed package, attempting all of them.
    pub fn restore(&self) -> Result<()> {
        let mut failures = Vec::new();
        for name in &self.packages {
            let result = self.is_installed(name).and_then(|installed| {
                if installed {
                    self.system
                        .run_exclusive(&Command::new("apt-get", ["remove", "-y", "--purge", name.as_str()]))?;
                    info!(deb = %name, "removed package");
                }
                Ok(())
            });
            if let Err(e) = result {
                warn!(deb = %name, "failed to remove package: {:#}", e);
                failures.push(format!("{}: {:#}", name, e));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(ConciergeError::Provisioning { failures }.into())
        }
    }
}

fn status_query(name: &str) -> Command {
    Command::new("dpkg-query", ["-W", "-f=${db:Status-Status}", name])
}
