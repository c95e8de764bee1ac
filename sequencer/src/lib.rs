//! Skyward sequencer
//!
//! Runs an observing plan against a telescope: slew, focus and stack each
//! target in order, retrying transient faults and carrying on past targets
//! that cannot be completed.

pub mod device_ops;
mod error;
pub mod executor;

pub use device_ops::{SharedTelescopeOps, TelescopeOps};
pub use error::{ExecutionError, ExecutionResult};
pub use executor::{ExecutionHandle, ExecutionOrchestrator};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Per-target phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Pending,
    Slewing,
    Focusing,
    Imaging,
    Complete,
    Failed,
}

impl Phase {
    pub fn is_finished(&self) -> bool {
        matches!(self, Phase::Complete | Phase::Failed)
    }
}

/// Run-level state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum GlobalState {
    #[default]
    Idle,
    Running,
    Aborted,
    Completed,
}

/// Execution record for one plan entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionState {
    pub catalog_id: String,
    pub name: String,
    pub phase: Phase,
    /// Retries spent across all phases of this target
    pub retry_count: u32,
    pub errors: Vec<String>,
    /// Focus failed and imaging went ahead anyway
    pub degraded_quality: bool,
    pub frames_stacked: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ExecutionState {
    pub fn new(catalog_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            catalog_id: catalog_id.into(),
            name: name.into(),
            phase: Phase::Pending,
            retry_count: 0,
            errors: Vec::new(),
            degraded_quality: false,
            frames_stacked: 0,
            started_at: None,
            finished_at: None,
        }
    }
}

/// Outcome counts for a finished run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub run_id: Uuid,
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    /// Targets never started
    pub skipped: usize,
    /// Completed targets imaged without a successful focus
    pub degraded: usize,
    pub final_state: GlobalState,
}

impl ExecutionSummary {
    pub fn from_states(run_id: Uuid, targets: &[ExecutionState], final_state: GlobalState) -> Self {
        let count = |phase: Phase| targets.iter().filter(|t| t.phase == phase).count();
        Self {
            run_id,
            total: targets.len(),
            completed: count(Phase::Complete),
            failed: count(Phase::Failed),
            skipped: targets.iter().filter(|t| !t.phase.is_finished()).count(),
            degraded: targets
                .iter()
                .filter(|t| t.phase == Phase::Complete && t.degraded_quality)
                .count(),
            final_state,
        }
    }
}

/// Snapshot of the current (or last) run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionProgress {
    pub run_id: Option<Uuid>,
    pub plan_id: Option<Uuid>,
    pub state: GlobalState,
    pub current_target_index: Option<usize>,
    pub phase: Option<Phase>,
    pub elapsed_secs: f64,
    pub estimated_remaining_secs: f64,
    pub targets: Vec<ExecutionState>,
    /// Bumped on every change
    pub revision: u64,
    pub message: Option<String>,
    pub summary: Option<ExecutionSummary>,
}

/// Events broadcast during a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExecutionEvent {
    StateChanged(GlobalState),
    TargetStarted {
        index: usize,
        catalog_id: String,
    },
    PhaseChanged {
        index: usize,
        phase: Phase,
    },
    TargetCompleted {
        index: usize,
        catalog_id: String,
        degraded: bool,
    },
    TargetFailed {
        index: usize,
        catalog_id: String,
        reason: String,
    },
    ExecutionFinished(ExecutionSummary),
}

/// Retry policy shared by slew, focus and imaging start
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay_ms: 2000,
        }
    }
}

impl RetryPolicy {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Orchestrator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub retry: RetryPolicy,
    pub poll_interval_ms: u64,
    pub slew_timeout_secs: u64,
    pub focus_timeout_secs: u64,
    /// Wait for each entry's scheduled start before slewing
    pub honor_start_times: bool,
    /// Run autofocus after each slew
    pub auto_focus: bool,
    pub event_buffer: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            poll_interval_ms: 1000,
            slew_timeout_secs: 180,
            focus_timeout_secs: 120,
            honor_start_times: true,
            auto_focus: true,
            event_buffer: 256,
        }
    }
}

impl ExecutorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn slew_timeout(&self) -> Duration {
        Duration::from_secs(self.slew_timeout_secs)
    }

    pub fn focus_timeout(&self) -> Duration {
        Duration::from_secs(self.focus_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.retry.max_attempts == 0 {
            return Err("retry.max_attempts must be >= 1".to_string());
        }
        if self.poll_interval_ms == 0 {
            return Err("poll_interval_ms must be > 0".to_string());
        }
        if self.slew_timeout_secs == 0 || self.focus_timeout_secs == 0 {
            return Err("phase timeouts must be > 0".to_string());
        }
        if self.event_buffer == 0 {
            return Err("event_buffer must be > 0".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_executor_config_defaults() {
        let config = ExecutorConfig::default();
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.retry_delay(), Duration::from_secs(2));
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.slew_timeout(), Duration::from_secs(180));
        assert_eq!(config.focus_timeout(), Duration::from_secs(120));
        assert!(config.honor_start_times);
        assert!(config.validate().is_ok());

        let partial: ExecutorConfig = serde_json::from_str(r#"{"retry": {"max_attempts": 5}}"#).unwrap();
        assert_eq!(partial.retry.max_attempts, 5);
        assert_eq!(partial.retry.retry_delay_ms, 2000);

        let bad = ExecutorConfig {
            retry: RetryPolicy {
                max_attempts: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_summary_counts() {
        let mut states = vec![
            ExecutionState::new("M31", "Andromeda"),
            ExecutionState::new("M33", "Triangulum"),
            ExecutionState::new("M42", "Orion"),
            ExecutionState::new("M45", "Pleiades"),
        ];
        states[0].phase = Phase::Complete;
        states[1].phase = Phase::Complete;
        states[1].degraded_quality = true;
        states[2].phase = Phase::Failed;

        let summary = ExecutionSummary::from_states(Uuid::nil(), &states, GlobalState::Aborted);
        assert_eq!(summary.total, 4);
        assert_eq!(summary.completed, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.degraded, 1);
        assert_eq!(summary.final_state, GlobalState::Aborted);

        // A target cut off mid-phase never finished either
        states[3].phase = Phase::Imaging;
        let summary = ExecutionSummary::from_states(Uuid::nil(), &states, GlobalState::Aborted);
        assert_eq!((summary.completed, summary.failed, summary.skipped), (2, 1, 1));
    }

    #[test]
    fn test_finished_phases() {
        assert!(Phase::Complete.is_finished());
        assert!(Phase::Failed.is_finished());
        for phase in [Phase::Pending, Phase::Slewing, Phase::Focusing, Phase::Imaging] {
            assert!(!phase.is_finished(), "{:?}", phase);
        }
    }
}
