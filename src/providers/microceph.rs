use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::ConciergeError;
use crate::packages::{DebHandler, SnapHandler, SnapPackage};
use crate::step::{Step, StepPolicy, run_steps};
use crate::system::{Command, System};

const NAME: &str = "microceph";

/// Channel used when neither the config nor an override sets one.
pub const DEFAULT_CHANNEL: &str = "latest/stable";

const RADOSGW_ADMIN: &str = "microceph.radosgw-admin";
const S3_UID: &str = "user";
const S3_ACCESS_KEY: &str = "access-key";
const S3_SECRET_KEY: &str = "secret-key";

const BOOTSTRAP_TIMEOUT: Duration = Duration::from_secs(120);
const DISK_TIMEOUT: Duration = Duration::from_secs(60);
const SETTLE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Default, Deserialize)]
struct RadosUser {
    #[serde(default)]
    keys: Vec<RadosKey>,
}

#[derive(Debug, Deserialize)]
struct RadosKey {
    access_key: String,
}

/// MicroCeph, providing an S3-compatible RADOS gateway.
pub struct MicroCeph {
    pub(super) model_defaults: BTreeMap<String, String>,
    pub(super) bootstrap_constraints: BTreeMap<String, String>,
    channel: String,
    snaps: Vec<SnapPackage>,
    debs: Vec<String>,
    system: Arc<dyn System>,
}

impl MicroCeph {
    pub fn new(system: Arc<dyn System>, config: &Config) -> Self {
        let microceph = &config.providers.microceph;
        let channel = if microceph.channel.is_empty() {
            DEFAULT_CHANNEL.to_string()
        } else {
            microceph.channel.clone()
        };

        Self {
            model_defaults: microceph.common.model_defaults.clone(),
            bootstrap_constraints: microceph.common.bootstrap_constraints.clone(),
            snaps: vec![SnapPackage::new(NAME, channel.clone())],
            channel,
            debs: vec!["s3cmd".to_string()],
            system,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn prepare(&self) -> Result<()> {
        let snaps = SnapHandler::new(self.system.clone(), self.snaps.clone());
        StepPolicy::Essential.apply(NAME, "install microceph", snaps.prepare())?;

        if self.cluster_exists() {
            debug!(provider = NAME, "cluster already bootstrapped");
        } else {
            Step::essential("bootstrap cluster", Command::new(NAME, ["cluster", "bootstrap"]))
                .with_retries(BOOTSTRAP_TIMEOUT)
                .run(self.system.as_ref(), NAME)?;
        }

        let ceph_status = || {
            Step::best_effort("check ceph status", Command::new("microceph.ceph", ["-s"]))
                .with_retries(SETTLE_TIMEOUT)
        };
        let steps = [
            Step::best_effort("add loop disks", Command::new(NAME, ["disk", "add", "loop,4G,3"]))
                .with_retries(DISK_TIMEOUT),
            ceph_status(),
            // Alternate ports keep 80/443 free for other providers' ingress.
            Step::essential(
                "enable rados gateway",
                Command::new(NAME, ["enable", "rgw", "--port", "8080", "--ssl-port", "8443"]),
            )
            .with_retries(BOOTSTRAP_TIMEOUT),
            ceph_status(),
        ];
        run_steps(self.system.as_ref(), NAME, &steps)?;

        self.ensure_s3_user()?;

        let debs = DebHandler::new(self.system.clone(), self.debs.clone());
        StepPolicy::BestEffort.apply(NAME, "install s3cmd", debs.prepare())?;

        info!(provider = NAME, "prepared provider");
        Ok(())
    }

    /// `microceph status` fails until the cluster is bootstrapped.
    fn cluster_exists(&self) -> bool {
        match self.system.query(&Command::new(NAME, ["status"])) {
            Ok(_) => true,
            Err(e) if is_execution_failure(&e) => {
                debug!(provider = NAME, "no cluster yet: {:#}", e);
                false
            }
            Err(e) => {
                warn!(provider = NAME, "cannot query cluster status: {:#}", e);
                false
            }
        }
    }

    /// Creates the fixed S3 user and key pair unless they already exist.
    fn ensure_s3_user(&self) -> Result<()> {
        let uid = format!("--uid={}", S3_UID);
        let existing = match self
            .system
            .query(&Command::new(RADOSGW_ADMIN, ["user", "info", uid.as_str()]))
        {
            Ok(output) => Some(match serde_json::from_slice::<RadosUser>(&output.stdout) {
                Ok(user) => user,
                Err(e) => {
                    warn!(provider = NAME, "cannot parse s3 user info, recreating keys: {}", e);
                    RadosUser::default()
                }
            }),
            Err(e) if is_execution_failure(&e) => {
                debug!(provider = NAME, "s3 user absent: {:#}", e);
                None
            }
            Err(e) => {
                warn!(provider = NAME, "cannot query s3 user: {:#}", e);
                None
            }
        };

        if existing.is_none() {
            Step::best_effort(
                "create s3 user",
                Command::new(RADOSGW_ADMIN, ["user", "create", uid.as_str(), "--display-name=User"]),
            )
            .with_retries(SETTLE_TIMEOUT)
            .run(self.system.as_ref(), NAME)?;
        }

        let has_key = existing
            .is_some_and(|user| user.keys.iter().any(|k| k.access_key == S3_ACCESS_KEY));
        if has_key {
            debug!(provider = NAME, "s3 keys already exist");
            return Ok(());
        }

        Step::best_effort(
            "create s3 keys",
            Command::new(RADOSGW_ADMIN, [
                "key".to_string(),
                "create".to_string(),
                uid,
                "--key-type=s3".to_string(),
                format!("--access-key={}", S3_ACCESS_KEY),
                format!("--secret-key={}", S3_SECRET_KEY),
            ]),
        )
        .with_retries(SETTLE_TIMEOUT)
        .run(self.system.as_ref(), NAME)?;
        Ok(())
    }

    pub fn restore(&self) -> Result<()> {
        let removed = SnapHandler::new(self.system.clone(), self.snaps.clone()).restore();
        if let Err(e) = DebHandler::new(self.system.clone(), self.debs.clone()).restore() {
            warn!(provider = NAME, "failed to remove s3cmd: {:#}", e);
        }
        removed?;
        info!(provider = NAME, "restored provider");
        Ok(())
    }
}

fn is_execution_failure(e: &anyhow::Error) -> bool {
    matches!(e.downcast_ref::<ConciergeError>(), Some(ConciergeError::Execution { .. }))
}
