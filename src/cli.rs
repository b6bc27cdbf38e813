use std::time::Duration;

use anyhow::Result;
use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;

use crate::config::Overrides;

#[derive(Parser, Debug)]
#[command(
    name = env!("CARGO_PKG_NAME"),
    version = env!("CARGO_PKG_VERSION"),
    about = env!("CARGO_PKG_DESCRIPTION"),
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Provision the machine according to the configuration
    Prepare(PrepareArgs),

    /// Undo what a previous `prepare` did
    Restore(RestoreArgs),

    /// Print the status recorded by the last `prepare`
    Status(StatusArgs),

    /// Generate shell completions for the given shell
    Completions(CompletionsArgs),
}

#[derive(Args, Debug)]
pub struct CommonArgs {
    /// Path to the YAML configuration file
    #[arg(short, long, env = "CONCIERGE_CONFIG")]
    pub config: Option<Utf8PathBuf>,

    /// Name of a built-in preset (machine, k8s, microk8s, dev, crafts)
    #[arg(short, long, env = "CONCIERGE_PRESET")]
    pub preset: Option<String>,

    /// Set the log level
    #[arg(short, long, default_value = "info")]
    pub log_level: LogLevel,

    /// Shorthand for `--log-level debug`
    #[arg(short, long)]
    pub verbose: bool,

    /// Print every executed command with its output
    #[arg(long)]
    pub trace: bool,

    /// Do not change the machine, just show what would be done
    #[arg(long)]
    pub dry_run: bool,
}

impl CommonArgs {
    /// The log level after applying `--verbose`.
    pub fn effective_log_level(&self) -> LogLevel {
        if self.verbose && self.log_level > LogLevel::Debug {
            LogLevel::Debug
        } else {
            self.log_level
        }
    }
}

#[derive(Args, Debug, Default)]
pub struct OverrideArgs {
    /// Skip installing Juju and bootstrapping controllers
    #[arg(long, env = "CONCIERGE_DISABLE_JUJU")]
    pub disable_juju: bool,

    /// Override the Juju snap channel
    #[arg(long, env = "CONCIERGE_JUJU_CHANNEL")]
    pub juju_channel: Option<String>,

    /// Override the k8s snap channel
    #[arg(long, env = "CONCIERGE_K8S_CHANNEL")]
    pub k8s_channel: Option<String>,

    /// Override the microk8s snap channel
    #[arg(long, env = "CONCIERGE_MICROK8S_CHANNEL")]
    pub microk8s_channel: Option<String>,

    /// Override the lxd snap channel
    #[arg(long, env = "CONCIERGE_LXD_CHANNEL")]
    pub lxd_channel: Option<String>,

    /// Override the microceph snap channel
    #[arg(long, env = "CONCIERGE_MICROCEPH_CHANNEL")]
    pub microceph_channel: Option<String>,

    /// Override the charmcraft snap channel
    #[arg(long, env = "CONCIERGE_CHARMCRAFT_CHANNEL")]
    pub charmcraft_channel: Option<String>,

    /// Override the snapcraft snap channel
    #[arg(long, env = "CONCIERGE_SNAPCRAFT_CHANNEL")]
    pub snapcraft_channel: Option<String>,

    /// Override the rockcraft snap channel
    #[arg(long, env = "CONCIERGE_ROCKCRAFT_CHANNEL")]
    pub rockcraft_channel: Option<String>,

    /// Credentials file for the google provider
    #[arg(long, env = "CONCIERGE_GOOGLE_CREDENTIAL_FILE")]
    pub google_credential_file: Option<Utf8PathBuf>,

    /// Additional snaps, comma separated (name[/track[/risk]])
    #[arg(long, env = "CONCIERGE_EXTRA_SNAPS", value_delimiter = ',')]
    pub extra_snaps: Vec<String>,

    /// Additional archive packages, comma separated
    #[arg(long, env = "CONCIERGE_EXTRA_DEBS", value_delimiter = ',')]
    pub extra_debs: Vec<String>,

    /// Bound in seconds for readiness waits and retried commands
    #[arg(long, env = "CONCIERGE_TIMEOUT")]
    pub timeout: Option<u64>,
}

impl OverrideArgs {
    pub fn into_overrides(self) -> Overrides {
        Overrides {
            disable_juju: self.disable_juju,
            juju_channel: self.juju_channel,
            k8s_channel: self.k8s_channel,
            microk8s_channel: self.microk8s_channel,
            lxd_channel: self.lxd_channel,
            microceph_channel: self.microceph_channel,
            charmcraft_channel: self.charmcraft_channel,
            snapcraft_channel: self.snapcraft_channel,
            rockcraft_channel: self.rockcraft_channel,
            google_credential_file: self.google_credential_file,
            extra_snaps: self.extra_snaps,
            extra_debs: self.extra_debs,
            timeout: self.timeout.map(Duration::from_secs),
        }
    }
}

#[derive(Args, Debug)]
pub struct PrepareArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    #[command(flatten)]
    pub overrides: OverrideArgs,
}

#[derive(Args, Debug)]
pub struct RestoreArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    #[command(flatten)]
    pub overrides: OverrideArgs,
}

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Set the log level
    #[arg(short, long, default_value = "warn")]
    pub log_level: LogLevel,
}

#[derive(Args, Debug)]
pub struct CompletionsArgs {
    /// The shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

/// Log levels accepted by `--log-level`, mapped onto `tracing` levels.
///
/// Variants are ordered from most to least verbose.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

pub fn parse_args() -> Result<Cli> {
    Ok(Cli::parse())
}
