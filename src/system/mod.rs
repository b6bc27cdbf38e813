//! Execution engine for concierge.
//!
//! This module provides:
//! - [`Command`]: immutable description of an external command
//! - [`System`]: the contract every provisioning component runs through
//! - [`RealSystem`]: runs commands and touches the filesystem for real
//! - [`DryRunSystem`]: prints what would happen, delegating read-only
//!   queries to a real system so branching still follows real state
//!
//! One `System` is selected at startup and passed explicitly, as
//! `Arc<dyn System>`, to every collaborator.

mod command;
mod dry_run;
mod locks;
#[cfg(test)]
pub(crate) mod mock;
mod pipe;
mod real;
mod retry;
mod trace;
mod user;

use std::collections::HashSet;
use std::time::Duration;

use anyhow::Result;
use camino::Utf8Path;

pub use command::Command;
pub use dry_run::DryRunSystem;
pub use locks::CommandLocks;
pub use real::RealSystem;
pub use retry::{INITIAL_BACKOFF, RetryPolicy};
pub use user::RealUser;

pub use crate::snapd::SnapInfo;

/// Captured output of a successful command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Contract for running commands and mutating the host.
///
/// Mutating operations are `run*`, `write*`, `mk*`, `remove*` and `chown_all`.
/// Everything else is a read-only query that a dry run still answers from the
/// real host.
///
/// Implementations must be `Send + Sync` so one instance can be shared as
/// `Arc<dyn System>`.
pub trait System: Send + Sync {
    /// The user concierge provisions for (see [`RealUser`]).
    fn user(&self) -> &RealUser;

    /// Runs a command, failing on a non-zero exit status.
    fn run(&self, cmd: &Command) -> Result<CommandOutput>;

    /// Runs commands in order, stopping at the first failure.
    fn run_many(&self, cmds: &[Command]) -> Result<()> {
        for cmd in cmds {
            self.run(cmd)?;
        }
        Ok(())
    }

    /// Runs a command while holding the lock for its executable, so two
    /// invocations of the same tool never overlap.
    fn run_exclusive(&self, cmd: &Command) -> Result<CommandOutput>;

    /// Runs a command with exponential backoff starting at one second,
    /// retrying non-zero exits until `max_duration` has elapsed.
    fn run_with_retries(&self, cmd: &Command, max_duration: Duration) -> Result<CommandOutput>;

    /// Runs a command that only inspects state.
    ///
    /// Unlike [`run`](Self::run), a dry run executes queries for real.
    fn query(&self, cmd: &Command) -> Result<CommandOutput>;

    /// Writes a file relative to the real user's home, creating parent
    /// directories; everything created is owned by the real user.
    fn write_home_file(&self, path: &Utf8Path, contents: &[u8]) -> Result<()>;

    /// Writes a file at an absolute path.
    fn write_file(&self, path: &Utf8Path, contents: &[u8]) -> Result<()>;

    /// Recursively creates a directory under the real user's home, owned by
    /// the real user.
    fn mk_home_subdir(&self, path: &Utf8Path) -> Result<()>;

    /// Recursively removes a path under the real user's home. A missing path
    /// is not an error.
    fn remove_all_home(&self, path: &Utf8Path) -> Result<()>;

    /// Reads a file relative to the real user's home.
    fn read_home_file(&self, path: &Utf8Path) -> Result<Vec<u8>>;

    /// Reads a file at an arbitrary path.
    fn read_file(&self, path: &Utf8Path) -> Result<Vec<u8>>;

    /// Recursively removes an absolute path. A missing path is not an error.
    fn remove_path(&self, path: &Utf8Path) -> Result<()>;

    /// Recursively creates a directory with the given permission bits.
    fn mkdir_all(&self, path: &Utf8Path, mode: u32) -> Result<()>;

    /// Recursively changes ownership of a path to `user`.
    fn chown_all(&self, path: &Utf8Path, user: &RealUser) -> Result<()>;

    /// Reports install state, tracked channel and confinement of a snap.
    fn snap_info(&self, name: &str, channel: &str) -> Result<SnapInfo>;

    /// Lists the store channels available for a snap.
    fn snap_channels(&self, name: &str) -> Result<Vec<String>>;

    /// Lists the connected plugs of a snap as `snap:plug` strings.
    fn snap_connections(&self, name: &str) -> Result<HashSet<String>>;
}
