//! Sequential pipeline execution.
//!
//! Enabled stages run strictly in configured order; each one sees the outputs
//! of every stage completed before it. The first failure stops the run and
//! leaves all later stages pending, since they depend on the missing output.
//!
//! The executor never touches the ledger directly. It emits [`StageEvent`]s to
//! a [`StageObserver`], and whoever owns the ledger applies them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::gateway::CompletionClient;
use crate::ledger::{PipelineRun, StageTransition};
use crate::stages::StageConfig;

// =============================================================================
// Events
// =============================================================================

/// A transition of one stage of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct StageEvent {
    pub run_id: String,
    pub stage_id: String,
    pub transition: StageTransition,
}

/// Receives stage transitions in emission order. The executor awaits each
/// call before moving on.
#[async_trait]
pub trait StageObserver: Send + Sync {
    async fn on_event(&self, event: &StageEvent);
}

/// Forwards events into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    sender: mpsc::UnboundedSender<StageEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<StageEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl StageObserver for ChannelObserver {
    async fn on_event(&self, event: &StageEvent) {
        // A dropped receiver only means nobody is listening any more.
        let _ = self.sender.send(event.clone());
    }
}

// =============================================================================
// Launch preconditions
// =============================================================================

/// Why a launch would be a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchBlocker {
    EmptyProblem,
    NoEnabledStages,
    MissingCredential,
}

impl LaunchBlocker {
    pub fn describe(self) -> &'static str {
        match self {
            Self::EmptyProblem => "problem statement is empty",
            Self::NoEnabledStages => "no stages are enabled",
            Self::MissingCredential => "add an OpenRouter API key to run live requests",
        }
    }
}

/// First unmet launch precondition, if any.
pub fn launch_blocker(
    problem: &str,
    stages: &[StageConfig],
    api_key: &str,
) -> Option<LaunchBlocker> {
    if problem.trim().is_empty() {
        Some(LaunchBlocker::EmptyProblem)
    } else if !stages.iter().any(|s| s.enabled) {
        Some(LaunchBlocker::NoEnabledStages)
    } else if api_key.trim().is_empty() {
        Some(LaunchBlocker::MissingCredential)
    } else {
        None
    }
}

// =============================================================================
// Execution
// =============================================================================

/// Immutable snapshot of what one run will execute.
#[derive(Debug, Clone, PartialEq)]
pub struct RunPlan {
    pub run_id: String,
    /// Trimmed problem text.
    pub problem: String,
    /// Enabled stages in configured order.
    pub stages: Vec<StageConfig>,
}

impl RunPlan {
    /// Plan the enabled subset of `stages` and the matching pending run record.
    pub fn prepare(problem: &str, stages: &[StageConfig]) -> (Self, PipelineRun) {
        let planned: Vec<StageConfig> = stages.iter().filter(|s| s.enabled).cloned().collect();
        let run = PipelineRun::new(problem, &planned);
        let plan = Self {
            run_id: run.id.clone(),
            problem: run.problem.clone(),
            stages: planned,
        };
        (plan, run)
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub run_id: String,
    pub planned: usize,
    pub completed: usize,
    /// Stage id and message of the failure that halted the run.
    pub failure: Option<(String, String)>,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.failure.is_none() && self.completed == self.planned
    }
}

async fn emit(
    observer: &dyn StageObserver,
    plan: &RunPlan,
    stage: &StageConfig,
    transition: StageTransition,
) {
    observer
        .on_event(&StageEvent {
            run_id: plan.run_id.clone(),
            stage_id: stage.id.clone(),
            transition,
        })
        .await;
}

fn elapsed_ms(start: DateTime<Utc>, end: DateTime<Utc>) -> u64 {
    (end - start).num_milliseconds().max(0) as u64
}

/// Run every planned stage in order, stopping at the first failure.
pub async fn execute_plan(
    client: &dyn CompletionClient,
    plan: &RunPlan,
    observer: &dyn StageObserver,
) -> RunReport {
    info!(
        run_id = %plan.run_id,
        stages = plan.stages.len(),
        "pipeline run started"
    );

    let mut prior_outputs: Vec<String> = Vec::with_capacity(plan.stages.len());
    let mut failure = None;

    for stage in &plan.stages {
        let started_at = Utc::now();
        emit(observer, plan, stage, StageTransition::Started { started_at }).await;

        match client.complete(stage, &plan.problem, &prior_outputs).await {
            Ok(completion) => {
                let completed_at = Utc::now();
                let duration_ms = elapsed_ms(started_at, completed_at);
                info!(
                    run_id = %plan.run_id,
                    stage = %stage.id,
                    model = %stage.model_id,
                    duration_ms,
                    cost = completion.response.cost,
                    "stage complete"
                );
                prior_outputs.push(completion.content.clone());
                emit(
                    observer,
                    plan,
                    stage,
                    StageTransition::Completed {
                        completed_at,
                        duration_ms,
                        output: completion.content,
                        request: completion.request,
                        response: completion.response,
                    },
                )
                .await;
            }
            Err(err) => {
                let completed_at = Utc::now();
                let duration_ms = elapsed_ms(started_at, completed_at);
                let message = err.to_string();
                warn!(
                    run_id = %plan.run_id,
                    stage = %stage.id,
                    code = err.code(),
                    duration_ms,
                    error = %message,
                    "stage failed; halting run"
                );
                emit(
                    observer,
                    plan,
                    stage,
                    StageTransition::Failed {
                        completed_at,
                        duration_ms,
                        error: message.clone(),
                    },
                )
                .await;
                failure = Some((stage.id.clone(), message));
                break;
            }
        }
    }

    info!(
        run_id = %plan.run_id,
        completed = prior_outputs.len(),
        failed = failure.is_some(),
        "pipeline run finished"
    );

    RunReport {
        run_id: plan.run_id.clone(),
        planned: plan.stages.len(),
        completed: prior_outputs.len(),
        failure,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use crate::gateway::{Completion, CompletionError, ResponseMeta};
    use crate::ledger::{RunLedger, StageStatus};
    use crate::prompts::build_stage_request;
    use crate::stages::default_stages;

    /// Replies from a script and records the prior outputs each call saw.
    struct ScriptedClient {
        replies: Mutex<VecDeque<Result<String, String>>>,
        seen: Mutex<Vec<Vec<String>>>,
    }

    impl ScriptedClient {
        fn new(replies: Vec<Result<&str, &str>>) -> Self {
            Self {
                replies: Mutex::new(
                    replies
                        .into_iter()
                        .map(|r| r.map(str::to_string).map_err(str::to_string))
                        .collect(),
                ),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CompletionClient for ScriptedClient {
        async fn complete(
            &self,
            stage: &StageConfig,
            problem: &str,
            prior_outputs: &[String],
        ) -> Result<Completion, CompletionError> {
            self.seen.lock().unwrap().push(prior_outputs.to_vec());
            let reply = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .expect("unexpected call");
            match reply {
                Ok(content) => Ok(Completion {
                    content,
                    request: build_stage_request(stage, problem, prior_outputs),
                    response: ResponseMeta::default(),
                }),
                Err(message) => Err(CompletionError::request_failed(message)),
            }
        }
    }

    /// Applies events to a ledger, like the workbench does.
    struct LedgerObserver {
        ledger: Mutex<RunLedger>,
        events: Mutex<Vec<StageEvent>>,
    }

    #[async_trait]
    impl StageObserver for LedgerObserver {
        async fn on_event(&self, event: &StageEvent) {
            self.ledger
                .lock()
                .unwrap()
                .apply_transition(&event.run_id, &event.stage_id, &event.transition);
            self.events.lock().unwrap().push(event.clone());
        }
    }

    fn setup(problem: &str) -> (RunPlan, LedgerObserver) {
        let (plan, run) = RunPlan::prepare(problem, &default_stages());
        let mut ledger = RunLedger::new();
        ledger.push(run);
        (
            plan,
            LedgerObserver {
                ledger: Mutex::new(ledger),
                events: Mutex::new(Vec::new()),
            },
        )
    }

    fn statuses(observer: &LedgerObserver, run_id: &str) -> Vec<StageStatus> {
        let ledger = observer.ledger.lock().unwrap();
        ledger
            .get(run_id)
            .unwrap()
            .stages
            .iter()
            .map(|s| s.status)
            .collect()
    }

    #[tokio::test]
    async fn full_run_threads_outputs_in_order() {
        let (plan, observer) = setup("Design a cache");
        let client = ScriptedClient::new(vec![Ok("p"), Ok("s"), Ok("y"), Ok("r")]);

        let report = execute_plan(&client, &plan, &observer).await;
        assert!(report.succeeded());
        assert_eq!(report.completed, 4);

        let seen = client.seen.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![
                vec![],
                vec!["p".to_string()],
                vec!["p".to_string(), "s".to_string()],
                vec!["p".to_string(), "s".to_string(), "y".to_string()],
            ]
        );
        assert_eq!(
            statuses(&observer, &plan.run_id),
            vec![StageStatus::Complete; 4]
        );
    }

    #[tokio::test]
    async fn failure_halts_and_leaves_downstream_pending() {
        let (plan, observer) = setup("p");
        let client = ScriptedClient::new(vec![Ok("plan"), Err("upstream exploded")]);

        let report = execute_plan(&client, &plan, &observer).await;
        assert!(!report.succeeded());
        assert_eq!(report.completed, 1);
        assert_eq!(
            report.failure,
            Some(("solution".to_string(), "upstream exploded".to_string()))
        );
        assert_eq!(
            statuses(&observer, &plan.run_id),
            vec![
                StageStatus::Complete,
                StageStatus::Error,
                StageStatus::Pending,
                StageStatus::Pending
            ]
        );

        let ledger = observer.ledger.lock().unwrap();
        let failed = ledger.get(&plan.run_id).unwrap().stage("solution").unwrap();
        assert_eq!(failed.error.as_deref(), Some("upstream exploded"));
        assert!(failed.output.is_none());
        assert!(failed.duration_ms.is_some());
    }

    #[tokio::test]
    async fn running_always_precedes_terminal_event() {
        let (plan, observer) = setup("p");
        let client = ScriptedClient::new(vec![Ok("a"), Ok("b"), Ok("c"), Ok("d")]);
        execute_plan(&client, &plan, &observer).await;

        let events = observer.events.lock().unwrap();
        assert_eq!(events.len(), 8);
        for pair in events.chunks(2) {
            assert_eq!(pair[0].stage_id, pair[1].stage_id);
            assert_eq!(pair[0].transition.status(), StageStatus::Running);
            assert_eq!(pair[1].transition.status(), StageStatus::Complete);
        }
    }

    #[tokio::test]
    async fn channel_observer_forwards_in_emission_order() {
        let (plan, _) = RunPlan::prepare("p", &default_stages()[..1]);
        let (observer, mut rx) = ChannelObserver::new();
        let client = ScriptedClient::new(vec![Err("boom")]);
        execute_plan(&client, &plan, &observer).await;

        let started = rx.recv().await.unwrap();
        assert_eq!(started.stage_id, "planning");
        assert_eq!(started.transition.status(), StageStatus::Running);
        let failed = rx.recv().await.unwrap();
        assert_eq!(failed.transition.status(), StageStatus::Error);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn prepare_snapshots_only_enabled_stages() {
        let mut stages = default_stages();
        stages[1].enabled = false;
        let (plan, run) = RunPlan::prepare("  p  ", &stages);
        let ids: Vec<_> = plan.stages.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, ["planning", "synthesis", "review"]);
        assert_eq!(plan.problem, "p");
        assert_eq!(run.id, plan.run_id);
        assert_eq!(run.stages.len(), 3);
    }

    #[test]
    fn launch_blockers() {
        let stages = default_stages();
        assert_eq!(
            launch_blocker("   ", &stages, "k"),
            Some(LaunchBlocker::EmptyProblem)
        );
        let disabled: Vec<_> = stages
            .iter()
            .cloned()
            .map(|mut s| {
                s.enabled = false;
                s
            })
            .collect();
        assert_eq!(
            launch_blocker("p", &disabled, "k"),
            Some(LaunchBlocker::NoEnabledStages)
        );
        assert_eq!(
            launch_blocker("p", &stages, "  "),
            Some(LaunchBlocker::MissingCredential)
        );
        assert_eq!(launch_blocker("p", &stages, "k"), None);
    }
}
