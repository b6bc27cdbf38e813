//! Configuration format, loading, overrides and validation.
//!
//! A configuration comes from exactly one source: a YAML file or one of the
//! built-in [`presets`]. CLI/environment [`Overrides`] are applied on top,
//! then [`Config::validate`] runs before anything touches the host.

pub mod presets;

use std::collections::BTreeMap;
use std::fs;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::ConciergeError;
use crate::serde_helpers::{OrderedMap, Scalar, string_map};

/// Config file picked up from the working directory when neither a file nor
/// a preset is given.
pub const DEFAULT_CONFIG_FILE: &str = "concierge.yaml";

/// Runtime cache of the last `prepare`, relative to the real user's home.
pub const CACHE_FILE: &str = ".cache/concierge/concierge.yaml";

/// Default bound for readiness waits and retried commands.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

const SNAP_NAME_PATTERN: &str = r"^[a-z0-9]+(-[a-z0-9]+)*$";
const DEB_NAME_PATTERN: &str = r"^[a-z0-9][a-z0-9+.\-]+$";
const CHANNEL_PATTERN: &str = r"^[A-Za-z0-9._\-]+(/[A-Za-z0-9._\-]+){0,2}$";

/// Provisioning status recorded in the runtime cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Deserialize, Serialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Provisioning,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Config {
    pub juju: JujuConfig,
    pub providers: ProvidersConfig,
    pub host: HostConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    /// Bound for readiness waits; set from `--timeout`.
    #[serde(skip)]
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct JujuConfig {
    pub disable: bool,
    pub channel: String,
    pub agent_version: String,
    #[serde(deserialize_with = "string_map")]
    pub model_defaults: BTreeMap<String, String>,
    #[serde(deserialize_with = "string_map")]
    pub bootstrap_constraints: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ProvidersConfig {
    pub lxd: LxdConfig,
    pub microk8s: MicroK8sConfig,
    pub k8s: K8sConfig,
    pub google: GoogleConfig,
    pub microceph: MicroCephConfig,
}

/// Juju bootstrap settings shared by every provider section.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct BootstrapConfig {
    pub enable: bool,
    pub bootstrap: bool,
    #[serde(deserialize_with = "string_map")]
    pub model_defaults: BTreeMap<String, String>,
    #[serde(deserialize_with = "string_map")]
    pub bootstrap_constraints: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct LxdConfig {
    #[serde(flatten)]
    pub common: BootstrapConfig,
    pub channel: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct MicroK8sConfig {
    #[serde(flatten)]
    pub common: BootstrapConfig,
    pub channel: String,
    /// `name` or `name:args`, enabled in order.
    pub addons: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct K8sConfig {
    #[serde(flatten)]
    pub common: BootstrapConfig,
    pub channel: String,
    /// Feature name to its `key: value` options, in document order.
    pub features: OrderedMap<OrderedMap<Scalar>>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct GoogleConfig {
    #[serde(flatten)]
    pub common: BootstrapConfig,
    pub credentials_file: Option<Utf8PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct MicroCephConfig {
    #[serde(flatten)]
    pub common: BootstrapConfig,
    pub channel: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct HostConfig {
    /// Archive packages.
    pub packages: Vec<String>,
    /// Snap name to its channel and connections, in document order.
    pub snaps: OrderedMap<SnapConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct SnapConfig {
    pub channel: String,
    pub connections: Vec<String>,
}

/// Values supplied by flags or `CONCIERGE_*` environment variables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    pub disable_juju: bool,
    pub juju_channel: Option<String>,
    pub k8s_channel: Option<String>,
    pub microk8s_channel: Option<String>,
    pub lxd_channel: Option<String>,
    pub microceph_channel: Option<String>,
    pub charmcraft_channel: Option<String>,
    pub snapcraft_channel: Option<String>,
    pub rockcraft_channel: Option<String>,
    pub google_credential_file: Option<Utf8PathBuf>,
    pub extra_snaps: Vec<String>,
    pub extra_debs: Vec<String>,
    pub timeout: Option<Duration>,
}

/// Where the configuration of a run comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(Utf8PathBuf),
    Preset(String),
    /// The runtime cache written by the last `prepare`.
    Cache,
}

impl ConfigSource {
    /// Picks the source from `-c`/`-p`.
    ///
    /// Without either, `concierge.yaml` in `cwd` is used when present;
    /// otherwise the runtime cache when `allow_cache` is set (restore).
    pub fn select(
        file: Option<&Utf8Path>,
        preset: Option<&str>,
        cwd: &Utf8Path,
        allow_cache: bool,
    ) -> Result<Self, ConciergeError> {
        match (file, preset) {
            (Some(_), Some(_)) => Err(ConciergeError::Config(
                "cannot proceed with both preset and configuration file specified".to_string(),
            )),
            (Some(file), None) => Ok(Self::File(file.to_owned())),
            (None, Some(preset)) => Ok(Self::Preset(preset.to_string())),
            (None, None) => {
                let default = cwd.join(DEFAULT_CONFIG_FILE);
                if default.is_file() {
                    Ok(Self::File(default))
                } else if allow_cache {
                    Ok(Self::Cache)
                } else {
                    Err(ConciergeError::Config(format!(
                        "no configuration: pass --config or --preset, or create {}",
                        DEFAULT_CONFIG_FILE
                    )))
                }
            }
        }
    }
}

impl Config {
    /// Parses a YAML document.
    pub fn parse(yaml: &str) -> Result<Self, ConciergeError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(yaml)
            .map_err(|e| ConciergeError::Config(format!("failed to parse yaml: {}", e)))
    }

    /// Loads a YAML file.
    pub fn load(path: &Utf8Path) -> Result<Self, ConciergeError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| ConciergeError::io(format!("failed to load file: {}", path), e))?;
        Self::parse(&contents).map_err(|e| match e {
            ConciergeError::Config(msg) => ConciergeError::Config(format!("{}: {}", path, msg)),
            other => other,
        })
    }

    pub fn to_yaml(&self) -> Result<String, ConciergeError> {
        serde_yaml::to_string(self)
            .map_err(|e| ConciergeError::Config(format!("failed to serialize config: {}", e)))
    }

    /// Applies CLI/environment overrides on top of the loaded document.
    pub fn apply_overrides(&mut self, overrides: &Overrides) {
        if overrides.disable_juju {
            self.juju.disable = true;
        }

        let channels = [
            (&overrides.juju_channel, &mut self.juju.channel),
            (&overrides.k8s_channel, &mut self.providers.k8s.channel),
            (&overrides.microk8s_channel, &mut self.providers.microk8s.channel),
            (&overrides.lxd_channel, &mut self.providers.lxd.channel),
            (&overrides.microceph_channel, &mut self.providers.microceph.channel),
        ];
        for (value, target) in channels {
            if let Some(channel) = value {
                *target = channel.clone();
            }
        }

        let craft_channels = [
            ("charmcraft", &overrides.charmcraft_channel),
            ("snapcraft", &overrides.snapcraft_channel),
            ("rockcraft", &overrides.rockcraft_channel),
        ];
        for (name, channel) in craft_channels {
            if let Some(channel) = channel {
                let connections = self
                    .host
                    .snaps
                    .get(name)
                    .map(|s| s.connections.clone())
                    .unwrap_or_default();
                self.host.snaps.insert(name, SnapConfig {
                    channel: channel.clone(),
                    connections,
                });
            }
        }

        if let Some(file) = &overrides.google_credential_file {
            self.providers.google.credentials_file = Some(file.clone());
        }

        for spec in &overrides.extra_snaps {
            let (name, channel) = spec.split_once('/').unwrap_or((spec.as_str(), ""));
            self.host.snaps.insert(name, SnapConfig {
                channel: channel.to_string(),
                connections: Vec::new(),
            });
        }

        for deb in &overrides.extra_debs {
            if !self.host.packages.contains(deb) {
                self.host.packages.push(deb.clone());
            }
        }

        if overrides.timeout.is_some() {
            self.timeout = overrides.timeout;
        }
    }

    /// Bound for readiness waits and retried commands.
    pub fn wait_timeout(&self) -> Duration {
        self.timeout.unwrap_or(DEFAULT_TIMEOUT)
    }

    pub fn validate(&self) -> Result<(), ConciergeError> {
        let snap_name = pattern(SNAP_NAME_PATTERN)?;
        let deb_name = pattern(DEB_NAME_PATTERN)?;
        let channel = pattern(CHANNEL_PATTERN)?;

        let check_channel = |owner: &str, value: &str| {
            if value.is_empty() || channel.is_match(value) {
                Ok(())
            } else {
                Err(ConciergeError::Validation(format!(
                    "{}: invalid channel '{}'",
                    owner, value
                )))
            }
        };

        check_channel("juju", &self.juju.channel)?;
        check_channel("lxd", &self.providers.lxd.channel)?;
        check_channel("microk8s", &self.providers.microk8s.channel)?;
        check_channel("k8s", &self.providers.k8s.channel)?;
        check_channel("microceph", &self.providers.microceph.channel)?;

        for (name, snap) in self.host.snaps.iter() {
            if !snap_name.is_match(name) {
                return Err(ConciergeError::Validation(format!("invalid snap name '{}'", name)));
            }
            check_channel(name, &snap.channel)?;
            if snap.connections.iter().any(|c| c.split_whitespace().next().is_none()) {
                return Err(ConciergeError::Validation(format!(
                    "{}: empty connection",
                    name
                )));
            }
        }

        for name in &self.host.packages {
            if !deb_name.is_match(name) {
                return Err(ConciergeError::Validation(format!("invalid package name '{}'", name)));
            }
        }

        if self.providers.k8s.features.iter().any(|(name, _)| name.trim().is_empty()) {
            return Err(ConciergeError::Validation("k8s: empty feature name".to_string()));
        }
        if self.providers.microk8s.addons.iter().any(|a| a.trim().is_empty()) {
            return Err(ConciergeError::Validation("microk8s: empty addon name".to_string()));
        }

        let google = &self.providers.google;
        if google.common.enable && google.credentials_file.is_none() {
            return Err(ConciergeError::Validation(
                "google: credentials-file is required when the provider is enabled".to_string(),
            ));
        }

        Ok(())
    }
}

fn pattern(re: &str) -> Result<Regex, ConciergeError> {
    Regex::new(re).map_err(|e| ConciergeError::Validation(format!("invalid pattern {}: {}", re, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn parses_full_document() {
        let config = Config::parse(
            r#"
juju:
  channel: 3.6/stable
  agent-version: "3.6.2"
  model-defaults:
    test-mode: true
  bootstrap-constraints:
    arch: amd64
providers:
  lxd:
    enable: true
    bootstrap: true
  k8s:
    enable: true
    features:
      load-balancer:
        l2-mode: true
        cidrs: 10.43.45.1/32
      local-storage:
  google:
    credentials-file: /home/ubuntu/creds.yaml
host:
  packages: [python3-pip]
  snaps:
    charmcraft:
      channel: latest/stable
    jhack:
      connections:
        - jhack:dot-local-share-juju
"#,
        )
        .unwrap();

        assert_eq!(config.juju.channel, "3.6/stable");
        assert_eq!(config.juju.model_defaults["test-mode"], "true");
        assert!(config.providers.lxd.common.enable);
        assert!(config.providers.lxd.common.bootstrap);
        assert_eq!(config.providers.k8s.features.len(), 2);
        assert_eq!(
            config.providers.google.credentials_file.as_deref(),
            Some(Utf8Path::new("/home/ubuntu/creds.yaml"))
        );
        assert_eq!(config.host.snaps.get("jhack").unwrap().connections.len(), 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn empty_document_is_default() {
        assert_eq!(Config::parse("{}").unwrap(), Config::default());
    }

    #[test]
    fn rejects_malformed_yaml() {
        let err = Config::parse("providers: [").unwrap_err();
        assert!(matches!(err, ConciergeError::Config(_)));
    }

    #[test]
    fn overrides_replace_channels_and_extend_packages() {
        let mut config = Config::parse("host:\n  packages: [make]\n").unwrap();
        config.apply_overrides(&Overrides {
            disable_juju: true,
            k8s_channel: Some("1.32/edge".to_string()),
            charmcraft_channel: Some("latest/edge".to_string()),
            extra_snaps: vec!["astral-uv/latest/edge".to_string(), "jq".to_string()],
            extra_debs: vec!["make".to_string(), "python3-tox".to_string()],
            timeout: Some(Duration::from_secs(60)),
            ..Default::default()
        });

        assert!(config.juju.disable);
        assert_eq!(config.providers.k8s.channel, "1.32/edge");
        assert_eq!(config.host.snaps.get("charmcraft").unwrap().channel, "latest/edge");
        assert_eq!(config.host.snaps.get("astral-uv").unwrap().channel, "latest/edge");
        assert_eq!(config.host.snaps.get("jq").unwrap().channel, "");
        assert_eq!(config.host.packages, vec!["make", "python3-tox"]);
        assert_eq!(config.wait_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn default_timeout() {
        assert_eq!(Config::default().wait_timeout(), DEFAULT_TIMEOUT);
    }

    #[test]
    fn validation_rejects_bad_names() {
        let config = Config::parse("host:\n  snaps:\n    Bad_Name:\n").unwrap();
        assert!(matches!(config.validate(), Err(ConciergeError::Validation(_))));

        let config = Config::parse("host:\n  packages: ['rm -rf']\n").unwrap();
        assert!(config.validate().is_err());

        let config = Config::parse("juju:\n  channel: 'a b'\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validation_requires_google_credentials() {
        let config = Config::parse("providers:\n  google:\n    enable: true\n").unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("credentials-file"));
    }

    #[test]
    fn status_round_trips_through_cache_format() {
        let mut config = Config::default();
        config.status = Some(Status::Succeeded);
        let yaml = config.to_yaml().unwrap();
        assert!(yaml.contains("status: succeeded"));
        assert_eq!(Config::parse(&yaml).unwrap().status, Some(Status::Succeeded));
        assert_eq!(Status::Provisioning.to_string(), "provisioning");
    }

    #[test]
    fn select_rejects_file_and_preset() {
        let dir = TempDir::new().unwrap();
        let cwd = Utf8Path::from_path(dir.path()).unwrap();
        let err = ConfigSource::select(Some(Utf8Path::new("a.yaml")), Some("dev"), cwd, false)
            .unwrap_err();
        assert!(err.to_string().contains("both preset and configuration file"));
    }

    #[test]
    fn select_falls_back_to_working_directory_then_cache() {
        let dir = TempDir::new().unwrap();
        let cwd = Utf8Path::from_path(dir.path()).unwrap();

        assert!(ConfigSource::select(None, None, cwd, false).is_err());
        assert_eq!(ConfigSource::select(None, None, cwd, true).unwrap(), ConfigSource::Cache);

        fs::write(cwd.join(DEFAULT_CONFIG_FILE), "{}").unwrap();
        assert_eq!(
            ConfigSource::select(None, None, cwd, false).unwrap(),
            ConfigSource::File(cwd.join(DEFAULT_CONFIG_FILE))
        );
    }
}
