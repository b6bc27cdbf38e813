//! Recording [`System`] used by unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use camino::{Utf8Path, Utf8PathBuf};

use super::user::RealUser;
use super::{Command, CommandOutput, SnapInfo, System};
use crate::error::ConciergeError;

enum MockReturn {
    Output(String),
    Failure(String),
    NotFound,
}

/// Records every command and filesystem mutation instead of performing it.
///
/// Commands succeed with empty output unless scripted. Snaps default to
/// "not installed", debs to "absent" (the `dpkg-query` status lookup fails
/// unless the deb was registered with [`mock_deb`](Self::mock_deb) or the
/// lookup was scripted).
pub(crate) struct MockSystem {
    user: RealUser,
    executed: Mutex<Vec<String>>,
    created_files: Mutex<HashMap<String, Vec<u8>>>,
    created_dirs: Mutex<Vec<String>>,
    deleted: Mutex<Vec<String>>,
    failing_removals: Mutex<HashSet<String>>,
    returns: Mutex<HashMap<String, MockReturn>>,
    snaps: Mutex<HashMap<String, SnapInfo>>,
    channels: Mutex<HashMap<String, Vec<String>>>,
    connections: Mutex<HashMap<String, HashSet<String>>>,
    debs: Mutex<HashSet<String>>,
    files: Mutex<HashMap<String, Vec<u8>>>,
}

impl MockSystem {
    pub(crate) fn new() -> Self {
        Self {
            user: RealUser {
                name: "test-user".to_string(),
                uid: 1000,
                gid: 1000,
                home: Utf8PathBuf::from("/home/test-user"),
            },
            executed: Mutex::default(),
            created_files: Mutex::default(),
            created_dirs: Mutex::default(),
            deleted: Mutex::default(),
            failing_removals: Mutex::default(),
            returns: Mutex::default(),
            snaps: Mutex::default(),
            channels: Mutex::default(),
            connections: Mutex::default(),
            debs: Mutex::default(),
            files: Mutex::default(),
        }
    }

    /// Makes `command` succeed with `stdout`.
    pub(crate) fn mock_output(&self, command: &str, stdout: &str) {
        self.returns
            .lock()
            .unwrap()
            .insert(command.to_string(), MockReturn::Output(stdout.to_string()));
    }

    /// Makes `command` exit non-zero, reporting `output`.
    pub(crate) fn mock_failure(&self, command: &str, output: &str) {
        self.returns
            .lock()
            .unwrap()
            .insert(command.to_string(), MockReturn::Failure(output.to_string()));
    }

    /// Makes `command` fail as if its executable were missing.
    pub(crate) fn mock_not_found(&self, command: &str) {
        self.returns
            .lock()
            .unwrap()
            .insert(command.to_string(), MockReturn::NotFound);
    }

    pub(crate) fn mock_snap(&self, name: &str, info: SnapInfo) {
        self.snaps.lock().unwrap().insert(name.to_string(), info);
    }

    pub(crate) fn mock_snap_installed(&self, name: &str, channel: &str) {
        self.mock_snap(name, SnapInfo {
            installed: true,
            tracking_channel: (!channel.is_empty()).then(|| channel.to_string()),
            classic: false,
        });
    }

    pub(crate) fn mock_channels(&self, name: &str, channels: &[&str]) {
        self.channels
            .lock()
            .unwrap()
            .insert(name.to_string(), channels.iter().map(|c| c.to_string()).collect());
    }

    pub(crate) fn mock_connected(&self, snap: &str, plug: &str) {
        self.connections
            .lock()
            .unwrap()
            .entry(snap.to_string())
            .or_default()
            .insert(plug.to_string());
    }

    /// Makes removing `path` fail after it is recorded.
    pub(crate) fn mock_removal_failure(&self, path: &str) {
        self.failing_removals.lock().unwrap().insert(path.to_string());
    }

    pub(crate) fn mock_deb(&self, name: &str) {
        self.debs.lock().unwrap().insert(name.to_string());
    }

    pub(crate) fn mock_file(&self, path: &str, contents: &[u8]) {
        self.files.lock().unwrap().insert(path.to_string(), contents.to_vec());
    }

    pub(crate) fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    /// Files written, keyed by absolute path.
    pub(crate) fn created_files(&self) -> HashMap<String, Vec<u8>> {
        self.created_files.lock().unwrap().clone()
    }

    pub(crate) fn created_dirs(&self) -> Vec<String> {
        self.created_dirs.lock().unwrap().clone()
    }

    pub(crate) fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    fn respond(&self, cmd: &Command) -> Result<CommandOutput> {
        let rendered = cmd.command_string();
        self.executed.lock().unwrap().push(rendered.clone());

        if cmd.executable() == "dpkg-query"
            && let [_, format, name] = cmd.args()
            && format == "-f=${db:Status-Status}"
            && !self.returns.lock().unwrap().contains_key(&rendered)
        {
            if self.debs.lock().unwrap().contains(name) {
                return Ok(CommandOutput {
                    stdout: b"installed".to_vec(),
                    stderr: Vec::new(),
                });
            }
            return Err(execution_failure(&rendered, format!("no packages found matching {}", name)));
        }

        match self.returns.lock().unwrap().get(&rendered) {
            None => Ok(CommandOutput::default()),
            Some(MockReturn::Output(stdout)) => Ok(CommandOutput {
                stdout: stdout.as_bytes().to_vec(),
                stderr: Vec::new(),
            }),
            Some(MockReturn::Failure(output)) => Err(execution_failure(&rendered, output.clone())),
            Some(MockReturn::NotFound) => Err(ConciergeError::CommandNotFound {
                command: cmd.executable().to_string(),
            }
            .into()),
        }
    }
}

fn execution_failure(command: &str, output: String) -> anyhow::Error {
    ConciergeError::Execution {
        command: command.to_string(),
        status: "exit status: 1".to_string(),
        output,
    }
    .into()
}

impl System for MockSystem {
    fn user(&self) -> &RealUser {
        &self.user
    }

    fn run(&self, cmd: &Command) -> Result<CommandOutput> {
        self.respond(cmd)
    }

    fn run_exclusive(&self, cmd: &Command) -> Result<CommandOutput> {
        self.respond(cmd)
    }

    fn run_with_retries(&self, cmd: &Command, _max_duration: Duration) -> Result<CommandOutput> {
        self.respond(cmd)
    }

    fn query(&self, cmd: &Command) -> Result<CommandOutput> {
        self.respond(cmd)
    }

    fn write_home_file(&self, path: &Utf8Path, contents: &[u8]) -> Result<()> {
        self.write_file(&self.user.home.join(path), contents)
    }

    fn write_file(&self, path: &Utf8Path, contents: &[u8]) -> Result<()> {
        self.created_files
            .lock()
            .unwrap()
            .insert(path.to_string(), contents.to_vec());
        Ok(())
    }

    fn mk_home_subdir(&self, path: &Utf8Path) -> Result<()> {
        self.mkdir_all(&self.user.home.join(path), 0o755)
    }

    fn remove_all_home(&self, path: &Utf8Path) -> Result<()> {
        self.remove_path(&self.user.home.join(path))
    }

    fn read_home_file(&self, path: &Utf8Path) -> Result<Vec<u8>> {
        self.read_file(&self.user.home.join(path))
    }

    fn read_file(&self, path: &Utf8Path) -> Result<Vec<u8>> {
        self.files.lock().unwrap().get(path.as_str()).cloned().ok_or_else(|| {
            ConciergeError::io(
                format!("failed to read {}", path),
                std::io::Error::from(std::io::ErrorKind::NotFound),
            )
            .into()
        })
    }

    fn remove_path(&self, path: &Utf8Path) -> Result<()> {
        self.deleted.lock().unwrap().push(path.to_string());
        if self.failing_removals.lock().unwrap().contains(path.as_str()) {
            return Err(ConciergeError::io(
                format!("failed to remove {}", path),
                std::io::Error::from(std::io::ErrorKind::PermissionDenied),
            )
            .into());
        }
        Ok(())
    }

    fn mkdir_all(&self, path: &Utf8Path, _mode: u32) -> Result<()> {
        self.created_dirs.lock().unwrap().push(path.to_string());
        Ok(())
    }

    fn chown_all(&self, _path: &Utf8Path, _user: &RealUser) -> Result<()> {
        Ok(())
    }

    fn snap_info(&self, name: &str, _channel: &str) -> Result<SnapInfo> {
        Ok(self.snaps.lock().unwrap().get(name).cloned().unwrap_or_default())
    }

    fn snap_channels(&self, name: &str) -> Result<Vec<String>> {
        Ok(self.channels.lock().unwrap().get(name).cloned().unwrap_or_default())
    }

    fn snap_connections(&self, name: &str) -> Result<HashSet<String>> {
        Ok(self.connections.lock().unwrap().get(name).cloned().unwrap_or_default())
    }
}
