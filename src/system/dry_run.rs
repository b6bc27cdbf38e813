//! A [`System`] that describes mutations instead of performing them.

use std::collections::HashSet;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::Result;
use camino::Utf8Path;

use super::user::RealUser;
use super::{Command, CommandOutput, SnapInfo, System};
use crate::error::ConciergeError;

/// Prints every mutating call and reports success without touching the host.
///
/// Read-only calls (`query`, file reads, snap queries, the real user) are
/// forwarded to the wrapped system so decisions taken during a dry run match
/// the ones a real run would take.
pub struct DryRunSystem {
    real: Arc<dyn System>,
    out: Mutex<Box<dyn Write + Send>>,
}

impl DryRunSystem {
    /// Wraps `real`, printing to stdout.
    pub fn new(real: Arc<dyn System>) -> Self {
        Self::with_writer(real, Box::new(io::stdout()))
    }

    /// Wraps `real`, printing to `out`.
    pub fn with_writer(real: Arc<dyn System>, out: Box<dyn Write + Send>) -> Self {
        Self {
            real,
            out: Mutex::new(out),
        }
    }

    fn print(&self, line: &str) -> Result<()> {
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        writeln!(out, "{}", line)
            .and_then(|()| out.flush())
            .map_err(|e| ConciergeError::io("failed to write dry-run output", e))?;
        Ok(())
    }

    fn print_command(&self, cmd: &Command) -> Result<CommandOutput> {
        self.print(&cmd.command_string())?;
        Ok(CommandOutput::default())
    }
}

impl System for DryRunSystem {
    fn user(&self) -> &RealUser {
        self.real.user()
    }

    fn run(&self, cmd: &Command) -> Result<CommandOutput> {
        self.print_command(cmd)
    }

    fn run_exclusive(&self, cmd: &Command) -> Result<CommandOutput> {
        self.print_command(cmd)
    }

    fn run_with_retries(&self, cmd: &Command, _max_duration: Duration) -> Result<CommandOutput> {
        self.print_command(cmd)
    }

    fn query(&self, cmd: &Command) -> Result<CommandOutput> {
        self.real.query(cmd)
    }

    fn write_home_file(&self, path: &Utf8Path, _contents: &[u8]) -> Result<()> {
        self.print(&format!("Would write file: {}", self.user().home.join(path)))
    }

    fn write_file(&self, path: &Utf8Path, _contents: &[u8]) -> Result<()> {
        self.print(&format!("Would write file: {}", path))
    }

    fn mk_home_subdir(&self, path: &Utf8Path) -> Result<()> {
        self.print(&format!("Would create directory: {}", self.user().home.join(path)))
    }

    fn remove_all_home(&self, path: &Utf8Path) -> Result<()> {
        self.print(&format!("Would remove: {}", self.user().home.join(path)))
    }

    fn read_home_file(&self, path: &Utf8Path) -> Result<Vec<u8>> {
        self.real.read_home_file(path)
    }

    fn read_file(&self, path: &Utf8Path) -> Result<Vec<u8>> {
        self.real.read_file(path)
    }

    fn remove_path(&self, path: &Utf8Path) -> Result<()> {
        self.print(&format!("Would remove: {}", path))
    }

    fn mkdir_all(&self, path: &Utf8Path, _mode: u32) -> Result<()> {
        self.print(&format!("Would create directory: {}", path))
    }

    fn chown_all(&self, path: &Utf8Path, user: &RealUser) -> Result<()> {
        self.print(&format!("Would chown {} to {}:{}", path, user.uid, user.gid))
    }

    fn snap_info(&self, name: &str, channel: &str) -> Result<SnapInfo> {
        self.real.snap_info(name, channel)
    }

    fn snap_channels(&self, name: &str) -> Result<Vec<String>> {
        self.real.snap_channels(name)
    }

    fn snap_connections(&self, name: &str) -> Result<HashSet<String>> {
        self.real.snap_connections(name)
    }
}
