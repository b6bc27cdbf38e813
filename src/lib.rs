pub mod cli;
pub mod config;
pub mod error;
pub mod juju;
pub mod manager;
pub mod packages;
pub mod providers;
pub mod serde_helpers;
pub mod snapd;
pub mod step;
pub mod system;

use std::env;
use std::sync::Arc;

use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use tracing::{debug, info};
use tracing_subscriber::{FmtSubscriber, filter::LevelFilter};

use crate::config::{Config, ConfigSource, Overrides};
use crate::error::ConciergeError;
use crate::manager::Manager;
use crate::system::{DryRunSystem, RealSystem, System};

pub fn init_logging(log_level: cli::LogLevel) -> Result<()> {
    let filter = match log_level {
        cli::LogLevel::Trace => LevelFilter::TRACE,
        cli::LogLevel::Debug => LevelFilter::DEBUG,
        cli::LogLevel::Info => LevelFilter::INFO,
        cli::LogLevel::Warn => LevelFilter::WARN,
        cli::LogLevel::Error => LevelFilter::ERROR,
    };

    tracing::subscriber::set_global_default(
        FmtSubscriber::builder().with_max_level(filter).finish(),
    )
    .context("failed to set global default tracing subscriber")
}

/// Builds the engine for this run. The dry-run engine wraps a real one so
/// state queries still see the machine.
pub fn build_system(dry_run: bool, trace: bool) -> Result<Arc<dyn System>> {
    let real: Arc<dyn System> = Arc::new(RealSystem::new(trace)?);
    if dry_run {
        Ok(Arc::new(DryRunSystem::new(real)))
    } else {
        Ok(real)
    }
}

/// Loads the configuration from its source, applies `overrides` and
/// validates the result.
pub fn resolve_config(
    args: &cli::CommonArgs,
    overrides: &Overrides,
    allow_cache: bool,
    system: &dyn System,
) -> Result<Config> {
    let cwd = env::current_dir().context("failed to read working directory")?;
    let cwd = Utf8PathBuf::from_path_buf(cwd).map_err(|path| {
        ConciergeError::Config(format!("working directory is not UTF-8: {}", path.display()))
    })?;

    let source = ConfigSource::select(
        args.config.as_deref(),
        args.preset.as_deref(),
        &cwd,
        allow_cache,
    )?;
    debug!("configuration source: {:?}", source);

    let mut config = match source {
        ConfigSource::File(path) => Config::load(&path)?,
        ConfigSource::Preset(name) => config::presets::preset(&name)?,
        ConfigSource::Cache => manager::cached_config(system)?,
    };
    config.apply_overrides(overrides);
    config.validate().context("configuration validation failed")?;
    Ok(config)
}

pub fn run_prepare(args: cli::PrepareArgs) -> Result<()> {
    let system = build_system(args.common.dry_run, args.common.trace)?;
    let overrides = args.overrides.into_overrides();
    let config = resolve_config(&args.common, &overrides, false, system.as_ref())?;

    Manager::new(system, config).prepare().into_result()?;
    info!("machine prepared");
    Ok(())
}

pub fn run_restore(args: cli::RestoreArgs) -> Result<()> {
    let system = build_system(args.common.dry_run, args.common.trace)?;
    let overrides = args.overrides.into_overrides();
    let config = resolve_config(&args.common, &overrides, true, system.as_ref())?;

    Manager::new(system, config).restore().into_result()?;
    info!("machine restored");
    Ok(())
}

/// Prints the status recorded by the last `prepare`.
pub fn run_status() -> Result<()> {
    let system = RealSystem::new(false)?;
    let config = manager::cached_config(&system)?;
    match config.status {
        Some(status) => println!("{}", status),
        None => println!("unknown"),
    }
    Ok(())
}
