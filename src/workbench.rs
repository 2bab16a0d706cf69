//! The application state holder and its control surface.
//!
//! A [`Workbench`] owns the current [`Snapshot`], persists it after every
//! observable change and runs at most one pipeline at a time. Handles are
//! cheap to clone; all clones share the same state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::executor::{
    execute_plan, launch_blocker, LaunchBlocker, RunPlan, RunReport, StageEvent, StageObserver,
};
use crate::gateway::{CompletionError, OpenRouterAdapter};
use crate::ledger::PipelineRun;
use crate::store::{
    load_snapshot, save_snapshot, KeyValueStore, Snapshot, SqliteStore, StoreError,
};

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum WorkbenchError {
    #[error("completion client: {0}")]
    Client(#[from] CompletionError),
    #[error("state store: {0}")]
    Store(#[from] StoreError),
}

struct Inner {
    state: Mutex<Snapshot>,
    running: AtomicBool,
    store: Arc<dyn KeyValueStore>,
    /// Serializes snapshot writes; each writer copies the state only once it
    /// holds the gate, so the last write always carries the newest state.
    write_gate: tokio::sync::Mutex<()>,
    http: reqwest::Client,
    referer: Option<String>,
    app_title: Option<String>,
    events: broadcast::Sender<StageEvent>,
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, Snapshot> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Full overwrite of the stored snapshot. Failures are logged; the
    /// in-memory state stays authoritative.
    async fn persist(&self) {
        let _gate = self.write_gate.lock().await;
        let snapshot = self.lock_state().clone();
        if let Err(err) = save_snapshot(self.store.as_ref(), &snapshot).await {
            warn!(error = %err, "failed to persist snapshot");
        }
    }
}

#[async_trait]
impl StageObserver for Inner {
    async fn on_event(&self, event: &StageEvent) {
        let applied = self
            .lock_state()
            .runs
            .apply_transition(&event.run_id, &event.stage_id, &event.transition);
        if !applied {
            debug!(
                run_id = %event.run_id,
                stage_id = %event.stage_id,
                "stage event not applied"
            );
        }
        self.persist().await;
        // No subscribers is fine.
        let _ = self.events.send(event.clone());
    }
}

/// Clears the in-progress flag when the run task ends, however it ends.
struct RunningGuard(Arc<Inner>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.running.store(false, Ordering::SeqCst);
    }
}

#[derive(Clone)]
pub struct Workbench {
    inner: Arc<Inner>,
}

impl Workbench {
    /// Open against the SQLite snapshot at `settings.state_path`.
    pub async fn open_sqlite(settings: &Settings) -> Result<Self, WorkbenchError> {
        let store = SqliteStore::open(&settings.state_path)?;
        Self::open(Arc::new(store), settings).await
    }

    /// Restore state from `store` (fresh defaults when absent or corrupt) and
    /// seed credential/base URL from the environment where the snapshot has none.
    pub async fn open(
        store: Arc<dyn KeyValueStore>,
        settings: &Settings,
    ) -> Result<Self, WorkbenchError> {
        let mut snapshot = match load_snapshot(store.as_ref()).await {
            Some(snapshot) => snapshot,
            None => {
                let mut fresh = Snapshot::default();
                if let Some(base_url) = &settings.base_url {
                    fresh.base_url = base_url.clone();
                }
                fresh
            }
        };
        if snapshot.api_key.trim().is_empty() {
            if let Some(api_key) = &settings.api_key {
                snapshot.api_key = api_key.clone();
            }
        }
        Self::new(
            snapshot,
            store,
            settings.referer.clone(),
            settings.app_title.clone(),
        )
    }

    pub fn new(
        snapshot: Snapshot,
        store: Arc<dyn KeyValueStore>,
        referer: Option<String>,
        app_title: Option<String>,
    ) -> Result<Self, WorkbenchError> {
        let http = OpenRouterAdapter::http_client()?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            inner: Arc::new(Inner {
                state: Mutex::new(snapshot),
                running: AtomicBool::new(false),
                store,
                write_gate: tokio::sync::Mutex::new(()),
                http,
                referer,
                app_title,
                events,
            }),
        })
    }

    // =========================================================================
    // Observation
    // =========================================================================

    pub fn snapshot(&self) -> Snapshot {
        self.inner.lock_state().clone()
    }

    /// Read the state without cloning it.
    pub fn with_state<R>(&self, read: impl FnOnce(&Snapshot) -> R) -> R {
        read(&self.inner.lock_state())
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Stream of stage transitions, delivered after they are applied.
    pub fn subscribe(&self) -> broadcast::Receiver<StageEvent> {
        self.inner.events.subscribe()
    }

    pub fn launch_blocker(&self) -> Option<LaunchBlocker> {
        self.with_state(|s| launch_blocker(&s.problem, s.stages.as_slice(), &s.api_key))
    }

    pub fn can_launch(&self) -> bool {
        !self.is_running() && self.launch_blocker().is_none()
    }

    /// The selected run, or the most recent one if the selection is unset or stale.
    pub fn selected_run(&self) -> Option<PipelineRun> {
        self.with_state(|s| s.runs.selected(s.selected_run_id.as_deref()).cloned())
    }

    // =========================================================================
    // Control surface
    // =========================================================================

    async fn mutate<R>(&self, apply: impl FnOnce(&mut Snapshot) -> R) -> R {
        let result = apply(&mut self.inner.lock_state());
        self.inner.persist().await;
        result
    }

    pub async fn set_api_key(&self, api_key: impl Into<String>) {
        let api_key = api_key.into();
        self.mutate(|s| s.api_key = api_key).await
    }

    pub async fn set_base_url(&self, base_url: impl Into<String>) {
        let base_url = base_url.into();
        self.mutate(|s| s.base_url = base_url).await
    }

    pub async fn set_problem(&self, problem: impl Into<String>) {
        let problem = problem.into();
        self.mutate(|s| s.problem = problem).await
    }

    pub async fn toggle_stage(&self, stage_id: &str) -> bool {
        self.mutate(|s| s.stages.toggle(stage_id)).await
    }

    pub async fn edit_prompt(&self, stage_id: &str, prompt: impl Into<String>) -> bool {
        let prompt = prompt.into();
        self.mutate(|s| s.stages.set_prompt(stage_id, prompt)).await
    }

    pub async fn edit_model(&self, stage_id: &str, model_id: impl Into<String>) -> bool {
        let model_id = model_id.into();
        self.mutate(|s| s.stages.set_model(stage_id, model_id)).await
    }

    pub async fn edit_temperature(&self, stage_id: &str, temperature: f64) -> bool {
        self.mutate(|s| s.stages.set_temperature(stage_id, temperature))
            .await
    }

    /// Clear the problem and restore default stages. History and credentials stay.
    pub async fn reset_configuration(&self) {
        self.mutate(|s| {
            s.problem.clear();
            s.stages.reset();
        })
        .await
    }

    /// Drop every run and the selection. Configuration stays.
    pub async fn clear_history(&self) {
        self.mutate(|s| {
            s.runs.clear();
            s.selected_run_id = None;
        })
        .await
    }

    /// Select a run by id; unknown ids are rejected.
    pub async fn select_run(&self, run_id: &str) -> bool {
        self.mutate(|s| {
            if s.runs.get(run_id).is_none() {
                return false;
            }
            s.selected_run_id = Some(run_id.to_string());
            true
        })
        .await
    }

    /// Run the enabled stages against the current problem.
    ///
    /// Returns `None` without creating a run when a precondition is unmet or
    /// another run is already in progress. The run itself executes on a
    /// spawned task: dropping this future stops the wait, not the run, and
    /// the in-progress flag stays set until the last stage settles.
    pub async fn launch(&self) -> Option<RunReport> {
        let (plan, client, running) = {
            let mut state = self.inner.lock_state();
            let blocker = launch_blocker(&state.problem, state.stages.as_slice(), &state.api_key);
            if let Some(blocker) = blocker {
                debug!(reason = blocker.describe(), "launch ignored");
                return None;
            }
            if self
                .inner
                .running
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                debug!("launch ignored; a run is already in progress");
                return None;
            }
            let running = RunningGuard(Arc::clone(&self.inner));

            let (plan, run) = RunPlan::prepare(&state.problem, state.stages.as_slice());
            state.runs.push(run);
            state.selected_run_id = Some(plan.run_id.clone());

            let client = OpenRouterAdapter::with_client(
                self.inner.http.clone(),
                state.api_key.trim(),
                state.base_url.clone(),
                self.inner.referer.clone(),
                self.inner.app_title.clone(),
            );
            (plan, client, running)
        };

        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            let _running = running;
            inner.persist().await;
            info!(run_id = %plan.run_id, "launching pipeline");
            execute_plan(&client, &plan, inner.as_ref()).await
        });

        match task.await {
            Ok(report) => Some(report),
            Err(err) => {
                warn!(error = %err, "pipeline task did not finish");
                None
            }
        }
    }
}
