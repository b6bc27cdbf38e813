//! Provisioning steps and their failure policy.
//!
//! Every command a provider issues is wrapped in a [`Step`] that names it
//! and carries a [`StepPolicy`]. An essential step aborts the enclosing
//! prepare/restore with a [`ConciergeError::Step`]; a best-effort step logs a
//! warning and lets the sequence continue.

use std::time::Duration;

use anyhow::Result;
use tracing::{debug, warn};

use crate::error::ConciergeError;
use crate::system::{Command, CommandOutput, System};

/// Whether a failing step aborts its sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepPolicy {
    Essential,
    BestEffort,
}

impl StepPolicy {
    /// Classifies the result of a step.
    ///
    /// Returns `Ok(None)` for a tolerated best-effort failure, after logging
    /// it at warning level.
    pub fn apply<T>(self, owner: &str, step: &str, result: Result<T>) -> Result<Option<T>> {
        match (self, result) {
            (_, Ok(value)) => Ok(Some(value)),
            (Self::Essential, Err(source)) => Err(ConciergeError::Step {
                provider: owner.to_string(),
                step: step.to_string(),
                source,
            }
            .into()),
            (Self::BestEffort, Err(e)) => {
                warn!(provider = owner, "{} failed, continuing: {:#}", step, e);
                Ok(None)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExecMode {
    Plain,
    Exclusive,
    Retry(Duration),
}

/// A named command with a failure policy and an execution mode.
#[derive(Debug, Clone)]
pub struct Step {
    description: String,
    command: Command,
    policy: StepPolicy,
    mode: ExecMode,
}

impl Step {
    pub fn essential(description: impl Into<String>, command: Command) -> Self {
        Self::new(description, command, StepPolicy::Essential)
    }

    pub fn best_effort(description: impl Into<String>, command: Command) -> Self {
        Self::new(description, command, StepPolicy::BestEffort)
    }

    fn new(description: impl Into<String>, command: Command, policy: StepPolicy) -> Self {
        Self {
            description: description.into(),
            command,
            policy,
            mode: ExecMode::Plain,
        }
    }

    /// Runs the command under the lock for its executable.
    #[must_use]
    pub fn exclusive(mut self) -> Self {
        self.mode = ExecMode::Exclusive;
        self
    }

    /// Retries the command with backoff for up to `max_duration`.
    #[must_use]
    pub fn with_retries(mut self, max_duration: Duration) -> Self {
        self.mode = ExecMode::Retry(max_duration);
        self
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn command(&self) -> &Command {
        &self.command
    }

    pub fn policy(&self) -> StepPolicy {
        self.policy
    }

    /// Runs the step on behalf of `owner` (a provider name, `host` or `juju`).
    pub fn run(&self, system: &dyn System, owner: &str) -> Result<Option<CommandOutput>> {
        debug!(provider = owner, "{}", self.description);
        let result = match self.mode {
            ExecMode::Plain => system.run(&self.command),
            ExecMode::Exclusive => system.run_exclusive(&self.command),
            ExecMode::Retry(max) => system.run_with_retries(&self.command, max),
        };
        self.policy.apply(owner, &self.description, result)
    }
}

/// Runs steps in order, stopping at the first essential failure.
pub fn run_steps(system: &dyn System, owner: &str, steps: &[Step]) -> Result<()> {
    for step in steps {
        step.run(system, owner)?;
    }
    Ok(())
}
