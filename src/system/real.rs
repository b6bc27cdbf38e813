//! The [`System`] implementation that really executes.

use std::collections::HashSet;
use std::fs;
use std::io::{self, Write};
use std::os::unix::fs::DirBuilderExt;
use std::process::{Child, Stdio};
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::Result;
use camino::{Utf8Path, Utf8PathBuf};
use nix::unistd::{Gid, Uid, chown};
use which::which;

use super::locks::CommandLocks;
use super::pipe::{StreamType, capture_pipe, panic_message};
use super::retry::RetryPolicy;
use super::trace::trace_message;
use super::user::RealUser;
use super::{Command, CommandOutput, SnapInfo, System};
use crate::error::ConciergeError;
use crate::snapd::SnapdClient;

const FALLBACK_SHELL: &str = "/bin/sh";

/// Kills a child process and joins its reader threads.
///
/// Called from error paths in [`RealSystem::execute()`] so a failure to spawn
/// a reader thread or to wait never leaks a process.
fn cleanup_child_process<I>(child: &mut Child, handles: I)
where
    I: IntoIterator<Item = JoinHandle<Vec<u8>>>,
{
    let pid = child.id();
    if let Err(e) = child.kill() {
        tracing::debug!(pid = pid, "kill returned error (process may have already exited): {}", e);
    }
    if let Err(e) = child.wait() {
        tracing::warn!(pid = pid, "failed to wait for child process after kill: {}", e);
    }
    for handle in handles {
        if let Err(e) = handle.join() {
            tracing::warn!("reader thread panicked during cleanup: {}", panic_message(&*e));
        }
    }
}

/// Runs commands through the user's shell and mutates the real filesystem.
pub struct RealSystem {
    user: RealUser,
    trace: Option<Mutex<Box<dyn Write + Send>>>,
    shell: String,
    locks: CommandLocks,
    snapd: SnapdClient,
    initial_backoff: Duration,
}

impl RealSystem {
    /// Creates a system for the resolved real user.
    ///
    /// When `trace` is set, every executed command is echoed to stdout with
    /// its captured output.
    pub fn new(trace: bool) -> Result<Self, ConciergeError> {
        Ok(Self::with_user(RealUser::resolve()?, trace))
    }

    /// Creates a system acting on behalf of `user`.
    pub fn with_user(user: RealUser, trace: bool) -> Self {
        let shell = std::env::var("SHELL")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| FALLBACK_SHELL.to_string());

        Self {
            user,
            trace: trace.then(|| Mutex::new(Box::new(io::stdout()) as Box<dyn Write + Send>)),
            shell,
            locks: CommandLocks::new(),
            snapd: SnapdClient::default(),
            initial_backoff: super::INITIAL_BACKOFF,
        }
    }

    /// Uses a different snapd client (e.g. another socket path).
    #[must_use]
    pub fn with_snapd(mut self, snapd: SnapdClient) -> Self {
        self.snapd = snapd;
        self
    }

    /// Enables trace mode, writing transcripts to `out` instead of stdout.
    #[must_use]
    pub fn with_trace_writer(mut self, out: Box<dyn Write + Send>) -> Self {
        self.trace = Some(Mutex::new(out));
        self
    }

    /// Overrides the first retry delay.
    #[must_use]
    pub fn with_initial_backoff(mut self, initial_backoff: Duration) -> Self {
        self.initial_backoff = initial_backoff;
        self
    }

    fn home_path(&self, path: &Utf8Path) -> Utf8PathBuf {
        self.user.home.join(path)
    }

    fn execute(&self, cmd: &Command) -> Result<CommandOutput, ConciergeError> {
        let path = which(cmd.executable()).map_err(|_| ConciergeError::CommandNotFound {
            command: cmd.executable().to_string(),
        })?;
        tracing::trace!("command found: {}: {}", cmd.executable(), path.to_string_lossy());

        let invocation = cmd.shell_invocation()?;
        tracing::debug!(user = cmd.user(), group = cmd.group(), "running command: {}", cmd);

        let mut child = std::process::Command::new(&self.shell)
            .arg("-c")
            .arg(&invocation)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| execution_error(cmd, format!("failed to spawn {}: {}", self.shell, e)))?;

        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();

        let stdout_handle = match thread::Builder::new()
            .name("stdout-reader".to_string())
            .spawn(move || capture_pipe(stdout_pipe, StreamType::Stdout))
        {
            Ok(handle) => handle,
            Err(e) => {
                cleanup_child_process(&mut child, []);
                return Err(execution_error(
                    cmd,
                    format!("failed to spawn stdout reader thread: {}", e),
                ));
            }
        };

        let stderr_handle = match thread::Builder::new()
            .name("stderr-reader".to_string())
            .spawn(move || capture_pipe(stderr_pipe, StreamType::Stderr))
        {
            Ok(handle) => handle,
            Err(e) => {
                cleanup_child_process(&mut child, [stdout_handle]);
                return Err(execution_error(
                    cmd,
                    format!("failed to spawn stderr reader thread: {}", e),
                ));
            }
        };

        let status = match child.wait() {
            Ok(s) => s,
            Err(e) => {
                cleanup_child_process(&mut child, [stdout_handle, stderr_handle]);
                return Err(execution_error(cmd, format!("failed to wait for command: {}", e)));
            }
        };

        let mut panicked_streams = Vec::new();
        let mut join = |name: &str, handle: JoinHandle<Vec<u8>>| match handle.join() {
            Ok(bytes) => bytes,
            Err(e) => {
                let msg = panic_message(&*e).to_string();
                tracing::error!(stream = name, panic = %msg, "reader thread panicked");
                panicked_streams.push(format!("{}: {}", name, msg));
                Vec::new()
            }
        };
        let output = CommandOutput {
            stdout: join("stdout", stdout_handle),
            stderr: join("stderr", stderr_handle),
        };

        if !panicked_streams.is_empty() {
            return Err(execution_error(
                cmd,
                format!(
                    "reader thread(s) panicked during command execution: {}",
                    panicked_streams.join(", ")
                ),
            ));
        }

        if let Some(out) = &self.trace {
            let message =
                trace_message(&cmd.command_string(), &output.stdout_lossy(), &output.stderr_lossy());
            let mut out = out.lock().unwrap_or_else(PoisonError::into_inner);
            if let Err(e) = out.write_all(message.as_bytes()).and_then(|()| out.flush()) {
                tracing::warn!("failed to write trace output: {}", e);
            }
        }

        tracing::trace!("executed command: {}: success={}", cmd, status.success());

        if !status.success() {
            let mut combined = output.stdout_lossy();
            combined.push_str(&output.stderr_lossy());
            return Err(ConciergeError::Execution {
                command: cmd.command_string(),
                status: status.to_string(),
                output: combined,
            });
        }

        Ok(output)
    }

    fn chown_path(&self, path: &Utf8Path, user: &RealUser) -> Result<(), ConciergeError> {
        chown(
            path.as_std_path(),
            Some(Uid::from_raw(user.uid)),
            Some(Gid::from_raw(user.gid)),
        )
        .map_err(|e| ConciergeError::io(format!("failed to chown {}", path), e.into()))
    }
}

fn execution_error(cmd: &Command, status: String) -> ConciergeError {
    ConciergeError::Execution {
        command: cmd.command_string(),
        status,
        output: String::new(),
    }
}

impl System for RealSystem {
    fn user(&self) -> &RealUser {
        &self.user
    }

    fn run(&self, cmd: &Command) -> Result<CommandOutput> {
        Ok(self.execute(cmd)?)
    }

    fn run_exclusive(&self, cmd: &Command) -> Result<CommandOutput> {
        self.locks.with_lock(cmd.executable(), || self.run(cmd))
    }

    fn run_with_retries(&self, cmd: &Command, max_duration: Duration) -> Result<CommandOutput> {
        RetryPolicy::new(max_duration)
            .with_initial_backoff(self.initial_backoff)
            .run(|| self.run(cmd))
    }

    fn query(&self, cmd: &Command) -> Result<CommandOutput> {
        self.run(cmd)
    }

    fn write_home_file(&self, path: &Utf8Path, contents: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_str().is_empty()
        {
            self.mk_home_subdir(parent)?;
        }

        let full = self.home_path(path);
        self.write_file(&full, contents)?;
        self.chown_path(&full, &self.user)?;
        Ok(())
    }

    fn write_file(&self, path: &Utf8Path, contents: &[u8]) -> Result<()> {
        tracing::debug!("writing file: {}", path);
        fs::write(path, contents)
            .map_err(|e| ConciergeError::io(format!("failed to write {}", path), e))?;
        Ok(())
    }

    fn mk_home_subdir(&self, path: &Utf8Path) -> Result<()> {
        let full = self.home_path(path);
        fs::create_dir_all(&full)
            .map_err(|e| ConciergeError::io(format!("failed to create directory {}", full), e))?;

        // Every component below home may have been created by root.
        let mut current = self.user.home.clone();
        for component in path.components() {
            current.push(component);
            self.chown_path(&current, &self.user)?;
        }
        Ok(())
    }

    fn remove_all_home(&self, path: &Utf8Path) -> Result<()> {
        self.remove_path(&self.home_path(path))
    }

    fn read_home_file(&self, path: &Utf8Path) -> Result<Vec<u8>> {
        self.read_file(&self.home_path(path))
    }

    fn read_file(&self, path: &Utf8Path) -> Result<Vec<u8>> {
        Ok(fs::read(path).map_err(|e| ConciergeError::io(format!("failed to read {}", path), e))?)
    }

    fn remove_path(&self, path: &Utf8Path) -> Result<()> {
        let metadata = match fs::symlink_metadata(path) {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!("nothing to remove at {}", path);
                return Ok(());
            }
            Err(e) => return Err(ConciergeError::io(format!("failed to stat {}", path), e).into()),
        };

        tracing::debug!("removing {}", path);
        let result = if metadata.is_dir() {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        };
        result.map_err(|e| ConciergeError::io(format!("failed to remove {}", path), e))?;
        Ok(())
    }

    fn mkdir_all(&self, path: &Utf8Path, mode: u32) -> Result<()> {
        fs::DirBuilder::new()
            .recursive(true)
            .mode(mode)
            .create(path)
            .map_err(|e| ConciergeError::io(format!("failed to create directory {}", path), e))?;
        Ok(())
    }

    fn chown_all(&self, path: &Utf8Path, user: &RealUser) -> Result<()> {
        self.chown_path(path, user)?;

        let metadata = fs::symlink_metadata(path)
            .map_err(|e| ConciergeError::io(format!("failed to stat {}", path), e))?;
        if !metadata.is_dir() {
            return Ok(());
        }

        let entries = fs::read_dir(path)
            .map_err(|e| ConciergeError::io(format!("failed to read directory {}", path), e))?;
        for entry in entries {
            let entry = entry
                .map_err(|e| ConciergeError::io(format!("failed to read directory {}", path), e))?;
            let child = Utf8PathBuf::from_path_buf(entry.path()).map_err(|p| {
                ConciergeError::Validation(format!("path is not valid UTF-8: {}", p.display()))
            })?;
            self.chown_all(&child, user)?;
        }
        Ok(())
    }

    fn snap_info(&self, name: &str, channel: &str) -> Result<SnapInfo> {
        Ok(self.snapd.snap_info(name, channel)?)
    }

    fn snap_channels(&self, name: &str) -> Result<Vec<String>> {
        Ok(self.snapd.snap_channels(name)?)
    }

    fn snap_connections(&self, name: &str) -> Result<HashSet<String>> {
        Ok(self.snapd.connections(name)?)
    }
}
