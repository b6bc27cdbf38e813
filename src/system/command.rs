//! Immutable description of an external command.

use std::fmt;

use crate::error::ConciergeError;

/// An executable, its arguments and an optional elevation identity.
///
/// A `Command` never changes after construction; the builder methods consume
/// `self` and return a new value. Elevation is expressed by prefixing the
/// invocation with `sudo -u USER -g GROUP`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    executable: String,
    args: Vec<String>,
    user: Option<String>,
    group: Option<String>,
}

impl Command {
    /// Creates a command that runs with the current process identity.
    #[must_use]
    pub fn new<I, S>(executable: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            executable: executable.into(),
            args: args.into_iter().map(Into::into).collect(),
            user: None,
            group: None,
        }
    }

    /// Runs the command as `user`.
    #[must_use]
    pub fn as_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Runs the command with `group` as its primary group.
    #[must_use]
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn executable(&self) -> &str {
        &self.executable
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn group(&self) -> Option<&str> {
        self.group.as_deref()
    }

    /// All words of the invocation, elevation prefix included.
    fn words(&self) -> Vec<&str> {
        let mut words = Vec::with_capacity(self.args.len() + 5);
        if self.user.is_some() || self.group.is_some() {
            words.push("sudo");
        }
        if let Some(user) = &self.user {
            words.extend(["-u", user.as_str()]);
        }
        if let Some(group) = &self.group {
            words.extend(["-g", group.as_str()]);
        }
        words.push(&self.executable);
        words.extend(self.args.iter().map(String::as_str));
        words
    }

    /// Renders the command for logs, traces and dry-run output.
    pub fn command_string(&self) -> String {
        self.words().join(" ")
    }

    /// Renders the command as a single, shell-quoted string suitable for
    /// `sh -c`.
    pub fn shell_invocation(&self) -> Result<String, ConciergeError> {
        shlex::try_join(self.words()).map_err(|e| ConciergeError::Execution {
            command: self.command_string(),
            status: format!("cannot quote command for the shell: {}", e),
            output: String::new(),
        })
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command_string())
    }
}
