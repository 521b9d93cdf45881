//! Decision journal.
//!
//! Every policy evaluation produces a [`DecisionRecord`] carrying the full
//! reasoning chain, whether it acted, refused, or only simulated. Live runs
//! persist records through the store; dry runs hand them back to the caller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::Side;

/// Whether a policy may mutate the store and the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Evaluate and log only.
    #[default]
    DryRun,
    Live,
}

impl ExecutionMode {
    #[must_use]
    pub const fn is_live(self) -> bool {
        matches!(self, Self::Live)
    }
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DryRun => write!(f, "dry_run"),
            Self::Live => write!(f, "live"),
        }
    }
}

/// Final outcome of one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Orders were placed and committed.
    Executed,
    /// Conditions were met but the mode was dry-run.
    Simulated,
    /// Conditions were not met; nothing to do.
    NoAction,
    /// A guard refused the action (cap, cooldown, duplicate, ...).
    Refused,
    /// Only a warning was raised.
    Warned,
    /// The evaluation failed and will be retried next cycle.
    Failed,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Executed => "executed",
            Self::Simulated => "simulated",
            Self::NoAction => "no_action",
            Self::Refused => "refused",
            Self::Warned => "warned",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One journal entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub component: String,
    pub instrument: String,
    pub side: Option<Side>,
    pub action: String,
    pub outcome: Outcome,
    pub mode: ExecutionMode,
    pub reason: String,
    pub steps: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Step-by-step log accumulated while a policy evaluates one instrument.
#[derive(Debug, Clone)]
pub struct DecisionLog {
    component: &'static str,
    instrument: String,
    side: Option<Side>,
    mode: ExecutionMode,
    steps: Vec<String>,
}

impl DecisionLog {
    #[must_use]
    pub fn new(
        component: &'static str,
        instrument: impl Into<String>,
        side: Option<Side>,
        mode: ExecutionMode,
    ) -> Self {
        Self {
            component,
            instrument: instrument.into(),
            side,
            mode,
            steps: Vec::new(),
        }
    }

    /// Appends one reasoning step and mirrors it to `tracing` at debug level.
    pub fn step(&mut self, step: impl Into<String>) {
        let step = step.into();
        tracing::debug!(
            component = self.component,
            instrument = %self.instrument,
            mode = %self.mode,
            "{step}"
        );
        self.steps.push(step);
    }

    #[must_use]
    pub fn steps(&self) -> &[String] {
        &self.steps
    }

    #[must_use]
    pub const fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Closes the log into a record.
    #[must_use]
    pub fn finish(
        self,
        action: impl Into<String>,
        outcome: Outcome,
        reason: impl Into<String>,
    ) -> DecisionRecord {
        DecisionRecord {
            component: self.component.to_string(),
            instrument: self.instrument,
            side: self.side,
            action: action.into(),
            outcome,
            mode: self.mode,
            reason: reason.into(),
            steps: self.steps,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_collects_steps_in_order() {
        let mut log = DecisionLog::new("loss_stop", "ADA-USDT-SWAP", Some(Side::Long), ExecutionMode::DryRun);
        log.step("profit_rate=-25");
        log.step("threshold=-20 breached");
        let record = log.finish("close_all", Outcome::Simulated, "stop loss");
        assert_eq!(record.steps, vec!["profit_rate=-25", "threshold=-20 breached"]);
        assert_eq!(record.mode, ExecutionMode::DryRun);
        assert_eq!(record.component, "loss_stop");
    }

    #[test]
    fn default_mode_is_dry_run() {
        assert_eq!(ExecutionMode::default(), ExecutionMode::DryRun);
        assert!(!ExecutionMode::DryRun.is_live());
    }
}
