//! Run ledger: pipeline runs and their per-stage result records.
//!
//! A run owns one [`StageResult`] per planned stage. Results move through
//! `pending → running → complete | error`; terminal states are never left and
//! a stage never returns to `pending`. The ledger is bounded and newest-first.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::gateway::{ResponseMeta, StageRequest};
use crate::stages::StageConfig;

/// Maximum number of runs kept; older runs are evicted silently.
pub const MAX_RUNS: usize = 20;

// =============================================================================
// Stage results
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Pending,
    Running,
    Complete,
    Error,
}

impl StageStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Complete => "complete",
            Self::Error => "error",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Error)
    }
}

/// A state change for one stage of one run.
#[derive(Debug, Clone, PartialEq)]
pub enum StageTransition {
    Started {
        started_at: DateTime<Utc>,
    },
    Completed {
        completed_at: DateTime<Utc>,
        duration_ms: u64,
        output: String,
        request: StageRequest,
        response: ResponseMeta,
    },
    Failed {
        completed_at: DateTime<Utc>,
        duration_ms: u64,
        error: String,
    },
}

impl StageTransition {
    /// Status a stage is in after this transition.
    pub fn status(&self) -> StageStatus {
        match self {
            Self::Started { .. } => StageStatus::Running,
            Self::Completed { .. } => StageStatus::Complete,
            Self::Failed { .. } => StageStatus::Error,
        }
    }

    fn allowed_from(&self, current: StageStatus) -> bool {
        match self {
            Self::Started { .. } => current == StageStatus::Pending,
            Self::Completed { .. } | Self::Failed { .. } => current == StageStatus::Running,
        }
    }
}

/// Execution record of one stage within one run.
///
/// Label, model and prompt are captured by value when the run is created, so
/// later configuration edits do not rewrite history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageResult {
    pub stage_id: String,
    pub stage_label: String,
    pub model_id: String,
    pub system_prompt: String,
    pub status: StageStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<StageRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<ResponseMeta>,
}

impl StageResult {
    pub fn pending(stage: &StageConfig) -> Self {
        Self {
            stage_id: stage.id.clone(),
            stage_label: stage.label.clone(),
            model_id: stage.model_id.clone(),
            system_prompt: stage.system_prompt.clone(),
            status: StageStatus::Pending,
            started_at: None,
            completed_at: None,
            duration_ms: None,
            output: None,
            error: None,
            request: None,
            response: None,
        }
    }

    /// Result of applying `transition`, or `None` if the state machine forbids it.
    pub fn transitioned(&self, transition: &StageTransition) -> Option<Self> {
        if !transition.allowed_from(self.status) {
            return None;
        }

        let mut next = self.clone();
        next.status = transition.status();
        match transition {
            StageTransition::Started { started_at } => {
                next.started_at = Some(*started_at);
            }
            StageTransition::Completed {
                completed_at,
                duration_ms,
                output,
                request,
                response,
            } => {
                next.completed_at = Some(*completed_at);
                next.duration_ms = Some(*duration_ms);
                next.output = Some(output.clone());
                next.request = Some(request.clone());
                next.response = Some(response.clone());
            }
            StageTransition::Failed {
                completed_at,
                duration_ms,
                error,
            } => {
                next.completed_at = Some(*completed_at);
                next.duration_ms = Some(*duration_ms);
                next.error = Some(error.clone());
            }
        }
        Some(next)
    }

    pub fn cost(&self) -> Option<f64> {
        self.response.as_ref().and_then(|r| r.cost)
    }

    pub fn total_tokens(&self) -> Option<u64> {
        self.response.as_ref().and_then(ResponseMeta::total_tokens)
    }
}

// =============================================================================
// Runs
// =============================================================================

/// One execution of the pipeline against one problem statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRun {
    pub id: String,
    pub problem: String,
    pub created_at: DateTime<Utc>,
    pub stages: Vec<StageResult>,
}

impl PipelineRun {
    /// Fresh run with every planned stage pending. `problem` is stored trimmed.
    pub fn new(problem: &str, plan: &[StageConfig]) -> Self {
        Self {
            id: new_run_id(),
            problem: problem.trim().to_string(),
            created_at: Utc::now(),
            stages: plan.iter().map(StageResult::pending).collect(),
        }
    }

    pub fn stage(&self, stage_id: &str) -> Option<&StageResult> {
        self.stages.iter().find(|s| s.stage_id == stage_id)
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary::of(self)
    }
}

/// Random v4 UUID; the OS entropy source is always available to us.
pub fn new_run_id() -> String {
    Uuid::new_v4().to_string()
}

/// Aggregates shown next to a run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    /// Sum of reported costs; `None` when no stage reported one.
    pub total_cost: Option<f64>,
    /// Sum of reported total tokens; `None` when no stage reported any.
    pub total_tokens: Option<u64>,
    pub pending: usize,
    pub running: usize,
    pub complete: usize,
    pub failed: usize,
}

impl RunSummary {
    pub fn of(run: &PipelineRun) -> Self {
        let mut summary = Self::default();
        for stage in &run.stages {
            if let Some(cost) = stage.cost() {
                *summary.total_cost.get_or_insert(0.0) += cost;
            }
            if let Some(tokens) = stage.total_tokens() {
                *summary.total_tokens.get_or_insert(0) += tokens;
            }
            match stage.status {
                StageStatus::Pending => summary.pending += 1,
                StageStatus::Running => summary.running += 1,
                StageStatus::Complete => summary.complete += 1,
                StageStatus::Error => summary.failed += 1,
            }
        }
        summary
    }
}

// =============================================================================
// Ledger
// =============================================================================

/// Newest-first, bounded collection of runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunLedger {
    runs: Vec<PipelineRun>,
}

impl RunLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn runs(&self) -> &[PipelineRun] {
        &self.runs
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// Prepend `run`, then keep only the [`MAX_RUNS`] most recent.
    pub fn push(&mut self, run: PipelineRun) {
        self.runs.insert(0, run);
        self.runs.truncate(MAX_RUNS);
    }

    pub fn get(&self, run_id: &str) -> Option<&PipelineRun> {
        self.runs.iter().find(|r| r.id == run_id)
    }

    pub fn latest(&self) -> Option<&PipelineRun> {
        self.runs.first()
    }

    /// The explicitly selected run if it still exists, else the most recent.
    pub fn selected(&self, selected_id: Option<&str>) -> Option<&PipelineRun> {
        selected_id
            .and_then(|id| self.get(id))
            .or_else(|| self.latest())
    }

    /// Replace one stage result with `updater(current)`.
    ///
    /// Returns `false` and leaves the ledger untouched when either id is unknown.
    pub fn update_stage<F>(&mut self, run_id: &str, stage_id: &str, updater: F) -> bool
    where
        F: FnOnce(&StageResult) -> StageResult,
    {
        let Some(run) = self.runs.iter_mut().find(|r| r.id == run_id) else {
            return false;
        };
        let Some(stage) = run.stages.iter_mut().find(|s| s.stage_id == stage_id) else {
            return false;
        };
        *stage = updater(stage);
        true
    }

    /// Apply a transition if the stage's state machine allows it.
    pub fn apply_transition(
        &mut self,
        run_id: &str,
        stage_id: &str,
        transition: &StageTransition,
    ) -> bool {
        let mut applied = false;
        let found = self.update_stage(run_id, stage_id, |current| {
            match current.transitioned(transition) {
                Some(next) => {
                    applied = true;
                    next
                }
                None => current.clone(),
            }
        });
        if found && !applied {
            warn!(
                run_id,
                stage_id,
                to = transition.status().as_str(),
                "ignoring illegal stage transition"
            );
        }
        applied
    }

    pub fn clear(&mut self) {
        self.runs.clear();
    }
}
