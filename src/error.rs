//! Domain-specific error types for concierge.
//!
//! `ConciergeError` is a `thiserror`-based enum with typed variants for the
//! failure modes the provisioning engine distinguishes. Library functions
//! return `Result<T, ConciergeError>` where callers need to branch on the
//! kind of failure, while the `System` trait boundary uses `anyhow::Result`.
//!
//! `ConciergeError` implements `Into<anyhow::Error>`, so `?` converts it at
//! trait boundaries, and `downcast_ref::<ConciergeError>()` recovers it.

use std::io;

/// Formats an IO error kind into a human-readable message.
///
/// Common kinds get a short, stable message ("I/O error: not found") rather
/// than the OS-level text; anything else falls back to the error's own
/// `Display`.
pub(crate) fn io_error_kind_message(err: &io::Error) -> String {
    match err.kind() {
        io::ErrorKind::NotFound => "I/O error: not found".to_string(),
        io::ErrorKind::PermissionDenied => "I/O error: permission denied".to_string(),
        io::ErrorKind::IsADirectory => "I/O error: is a directory".to_string(),
        _ => format!("I/O error: {}", err),
    }
}

/// Domain-specific error type for concierge.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConciergeError {
    /// The executable could not be resolved on `PATH`. Never retried.
    #[error("command not found: '{command}' not found in PATH")]
    CommandNotFound {
        /// The executable that was looked up.
        command: String,
    },

    /// A command ran but exited unsuccessfully, or could not be waited on.
    #[error("command execution failed: {command}: {status}")]
    Execution {
        /// The rendered command line.
        command: String,
        /// Exit code, signal or internal failure description.
        status: String,
        /// Combined stdout and stderr of the failed command.
        ///
        /// Some tools report state only through a failing exit status plus a
        /// message, so callers may need to inspect it.
        output: String,
    },

    /// A configuration file could not be read or parsed.
    #[error("configuration error: {0}")]
    Config(String),

    /// A validation constraint on the configuration was violated.
    #[error("validation error: {0}")]
    Validation(String),

    /// The snapd API reported that the snap is not installed (HTTP 404).
    #[error("snap not installed: {name}")]
    SnapNotInstalled {
        /// Snap name.
        name: String,
    },

    /// The snap store has no snap with this name (404 or empty result).
    #[error("snap not found: {name}")]
    SnapNotFound {
        /// Snap name.
        name: String,
    },

    /// Transport or protocol failure talking to snapd.
    #[error("snapd error: {0}")]
    Snapd(String),

    /// An essential provisioning step failed.
    #[error("{provider}: {step} failed")]
    Step {
        /// Owner of the step (provider name, `host` or `juju`).
        provider: String,
        /// Human-readable step description.
        step: String,
        /// The underlying failure.
        #[source]
        source: anyhow::Error,
    },

    /// One or more parts of a prepare/restore run failed.
    #[error("provisioning failed: {}", failures.join("; "))]
    Provisioning {
        /// One message per failed component.
        failures: Vec<String>,
    },

    /// An I/O operation failed with contextual information.
    #[error("{context}: {message}")]
    Io {
        /// What was being done, usually including the path.
        context: String,
        /// Message derived from [`io_error_kind_message`].
        message: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl ConciergeError {
    /// Creates an `Io` variant with the `message` derived from `source`.
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            message: io_error_kind_message(&source),
            source,
        }
    }

    /// Returns the captured output of a failed command, if this is an
    /// `Execution` error.
    pub fn command_output(&self) -> Option<&str> {
        match self {
            Self::Execution { output, .. } => Some(output),
            _ => None,
        }
    }

    /// Reports whether the failure may go away on a later attempt.
    ///
    /// Missing executables and configuration problems are permanent; a
    /// non-zero exit may just mean the tool is still starting up.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Execution { .. } | Self::Snapd(_))
    }
}

/// Extracts the captured command output from an `anyhow` error chain.
pub fn command_output(err: &anyhow::Error) -> Option<&str> {
    err.downcast_ref::<ConciergeError>()
        .and_then(ConciergeError::command_output)
}
