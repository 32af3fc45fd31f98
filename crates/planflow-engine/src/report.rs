//! What a caller gets back from a run

use crate::context::StepRecord;
use crate::error::{EscalationReason, RunError};
use chrono::{DateTime, Utc};
use planflow_protocol::{RunStatus, Variables};
use serde::Serialize;
use uuid::Uuid;

/// Terminal status plus its explanation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunResult {
    /// Terminal status
    pub status: RunStatus,
    /// Set for `Failed` and `Cancelled`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RunError>,
    /// Set for `Escalated`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub escalation: Option<EscalationReason>,
}

impl RunResult {
    /// Root flow finished
    pub fn completed() -> Self {
        Self {
            status: RunStatus::Completed,
            error: None,
            escalation: None,
        }
    }

    /// Run failed with `error`
    pub fn failed(error: RunError) -> Self {
        Self {
            status: RunStatus::Failed,
            error: Some(error),
            escalation: None,
        }
    }

    /// Run needs external resolution
    pub fn escalated(reason: EscalationReason) -> Self {
        Self {
            status: RunStatus::Escalated,
            error: None,
            escalation: Some(reason),
        }
    }

    /// Caller cancelled the run
    pub fn cancelled() -> Self {
        Self {
            status: RunStatus::Cancelled,
            error: Some(RunError::Cancelled),
            escalation: None,
        }
    }

    /// Whether the run completed
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Completed
    }
}

/// Full record of a finished run
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    /// Unique id of this run
    pub run_id: Uuid,
    /// Root flow name
    pub flow: String,
    /// Outcome
    pub result: RunResult,
    /// Root scope when the run ended
    pub variables: Variables,
    /// Step executions across all frames
    pub steps_executed: u64,
    /// Executed steps in order
    pub trace: Vec<StepRecord>,
    /// Start time
    pub started_at: DateTime<Utc>,
    /// Finish time
    pub finished_at: DateTime<Utc>,
}

impl ExecutionReport {
    /// Terminal status
    pub fn status(&self) -> RunStatus {
        self.result.status
    }

    /// Wall-clock duration in milliseconds
    pub fn latency_ms(&self) -> u64 {
        (self.finished_at - self.started_at)
            .num_milliseconds()
            .max(0) as u64
    }

    /// Ids of executed steps, in order
    pub fn executed_steps(&self) -> Vec<&str> {
        self.trace.iter().map(|r| r.step_id.as_str()).collect()
    }
}
