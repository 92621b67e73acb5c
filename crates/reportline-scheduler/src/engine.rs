use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use reportline_core::{config::SchedulerConfig, Artifact};
use reportline_delivery::DeliveryDispatcher;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{timeout, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::{
    clock::Clock,
    db::SharedConnection,
    error::{Result, SchedulerError},
    generator::{GenerationRequest, ReportGenerator},
    store::ScheduleStore,
    templates::{TemplateResolver, TemplateStore},
    types::{
        ArtifactSummary, DefinitionInput, ExportDefinition, RunCompletion, RunOutcome, RunState,
        RunStatus,
    },
};

/// Error text recorded for runs a previous process left open.
const INTERRUPTED: &str = "INTERRUPTED: run did not finish before the engine stopped";

/// Timeouts and failure policy applied to every run.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub generation_timeout: Duration,
    pub delivery_timeout: Duration,
    /// Deactivate after this many consecutive failures. `None` never pauses.
    pub max_consecutive_failures: Option<u32>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from(&SchedulerConfig::default())
    }
}

impl From<&SchedulerConfig> for EngineSettings {
    fn from(cfg: &SchedulerConfig) -> Self {
        Self {
            generation_timeout: Duration::from_secs(cfg.generation_timeout_secs),
            delivery_timeout: Duration::from_secs(cfg.delivery_timeout_secs),
            max_consecutive_failures: cfg.max_consecutive_failures.filter(|n| *n > 0),
        }
    }
}

/// Runs export definitions: scheduled ticks, run-now requests and the
/// admin mutations that must coordinate with in-flight runs.
///
/// Each definition id has at most one run slot. A slot is taken with a
/// non-blocking insert into `running` and handed to the spawned run task,
/// which releases it on drop after the outcome is stored.
pub struct ExecutionEngine {
    store: ScheduleStore,
    resolver: TemplateResolver,
    generator: Arc<dyn ReportGenerator>,
    dispatcher: Arc<DeliveryDispatcher>,
    clock: Arc<dyn Clock>,
    running: Arc<DashMap<String, DateTime<Utc>>>,
    settings: EngineSettings,
}

/// Exclusive right to execute (or delete) one definition.
struct RunSlot {
    id: String,
    running: Arc<DashMap<String, DateTime<Utc>>>,
}

impl Drop for RunSlot {
    fn drop(&mut self) {
        self.running.remove(&self.id);
    }
}

/// A run that has been admitted and spawned.
#[derive(Debug)]
pub struct RunHandle {
    definition_id: String,
    join: JoinHandle<Result<RunCompletion>>,
}

impl RunHandle {
    pub fn definition_id(&self) -> &str {
        &self.definition_id
    }

    /// Wait for the run to finish and its outcome to be stored.
    pub async fn wait(self) -> Result<RunCompletion> {
        self.join
            .await
            .map_err(|e| SchedulerError::Internal(format!("run task failed: {e}")))?
    }
}

impl ExecutionEngine {
    pub fn new(
        conn: SharedConnection,
        generator: Arc<dyn ReportGenerator>,
        dispatcher: Arc<DeliveryDispatcher>,
        clock: Arc<dyn Clock>,
        settings: EngineSettings,
    ) -> Self {
        let templates = TemplateStore::new(conn.clone());
        Self {
            store: ScheduleStore::new(conn),
            resolver: TemplateResolver::new(templates),
            generator,
            dispatcher,
            clock,
            running: Arc::new(DashMap::new()),
            settings,
        }
    }

    pub fn store(&self) -> &ScheduleStore {
        &self.store
    }

    pub fn templates(&self) -> &TemplateStore {
        self.resolver.templates()
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub fn state(&self, id: &str) -> RunState {
        if self.running.contains_key(id) {
            RunState::Running
        } else {
            RunState::Idle
        }
    }

    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    // --- admin operations -------------------------------------------------

    pub fn create_definition(&self, input: DefinitionInput) -> Result<ExportDefinition> {
        self.store.create(input, self.clock.now())
    }

    pub fn update_definition(&self, id: &str, input: DefinitionInput) -> Result<ExportDefinition> {
        self.store.update(id, input, self.clock.now())
    }

    pub fn toggle_definition(&self, id: &str) -> Result<ExportDefinition> {
        self.store.toggle_active(id, self.clock.now())
    }

    /// Delete under the run slot so no run can start or be in flight.
    pub fn delete_definition(&self, id: &str) -> Result<()> {
        let _slot = self
            .try_acquire(id, self.clock.now())
            .ok_or_else(|| SchedulerError::RunInProgress { id: id.to_string() })?;
        self.store.delete(id)
    }

    // --- execution ----------------------------------------------------------

    /// Start a run of `id` now, regardless of `is_active` and `next_run`.
    pub fn run_now(self: &Arc<Self>, id: &str) -> Result<RunHandle> {
        let now = self.clock.now();
        let slot = self
            .try_acquire(id, now)
            .ok_or_else(|| SchedulerError::AlreadyRunning { id: id.to_string() })?;
        let def = self.store.get(id)?;
        info!(definition_id = %id, "run-now accepted");
        Ok(self.spawn_run(def, slot, now))
    }

    /// One evaluation pass: spawn a run for every active, due, idle definition.
    pub fn tick(self: &Arc<Self>) -> Result<Vec<RunHandle>> {
        let now = self.clock.now();
        let due = self.store.list_due(now)?;
        let mut started = Vec::with_capacity(due.len());

        for candidate in due {
            let Some(slot) = self.try_acquire(&candidate.id, now) else {
                debug!(definition_id = %candidate.id, "due but already running; skipped");
                continue;
            };
            // Re-read under the slot: a concurrent toggle or run may have
            // changed the row since list_due.
            let def = match self.store.get(&candidate.id) {
                Ok(def) if def.is_active && def.next_run <= now => def,
                Ok(_) | Err(SchedulerError::DefinitionNotFound { .. }) => continue,
                Err(e) => {
                    error!(definition_id = %candidate.id, "failed to reload due definition: {e}");
                    continue;
                }
            };
            started.push(self.spawn_run(def, slot, now));
        }

        if !started.is_empty() {
            info!(count = started.len(), "scheduled exports started");
        }
        Ok(started)
    }

    /// Close runs a previous process left in `running` as failures.
    ///
    /// Returns how many were closed.
    pub fn recover_interrupted(&self) -> Result<usize> {
        let open = self.store.interrupted_runs()?;
        let now = self.clock.now();
        let mut closed = 0;

        for run in open {
            let Some(_slot) = self.try_acquire(&run.definition_id, now) else {
                continue;
            };
            let outcome = RunOutcome {
                status: RunStatus::Failure,
                error: Some(INTERRUPTED.to_string()),
                delivery: None,
                artifact: None,
            };
            // Leave the schedule alone when a later run already re-anchored it.
            let stale = match self.store.get(&run.definition_id) {
                Ok(def) => def.last_run.is_some_and(|last| run.trigger_at < last),
                Err(e) => {
                    warn!(run_id = %run.id, "could not load definition of interrupted run: {e}");
                    continue;
                }
            };
            let result = if stale {
                self.store
                    .close_run(&run.definition_id, &run.id, &outcome, now)
                    .map(drop)
            } else {
                self.store
                    .record_run_outcome(
                        &run.definition_id,
                        &run.id,
                        &outcome,
                        run.trigger_at,
                        now,
                        self.settings.max_consecutive_failures,
                    )
                    .map(drop)
            };
            match result {
                Ok(()) => closed += 1,
                Err(e) => warn!(run_id = %run.id, "could not close interrupted run: {e}"),
            }
        }

        if closed > 0 {
            warn!(count = closed, "interrupted runs closed as failures");
        }
        Ok(closed)
    }

    // --- private helpers ----------------------------------------------------

    fn try_acquire(&self, id: &str, at: DateTime<Utc>) -> Option<RunSlot> {
        match self.running.entry(id.to_string()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(at);
                Some(RunSlot {
                    id: id.to_string(),
                    running: Arc::clone(&self.running),
                })
            }
        }
    }

    fn spawn_run(
        self: &Arc<Self>,
        def: ExportDefinition,
        slot: RunSlot,
        trigger_at: DateTime<Utc>,
    ) -> RunHandle {
        let engine = Arc::clone(self);
        let definition_id = def.id.clone();
        let join = tokio::spawn(async move {
            let result = engine.execute(def, trigger_at).await;
            drop(slot);
            result
        });
        RunHandle {
            definition_id,
            join,
        }
    }

    async fn execute(
        &self,
        def: ExportDefinition,
        trigger_at: DateTime<Utc>,
    ) -> Result<RunCompletion> {
        let run_id = self.store.record_run_start(&def.id, trigger_at)?;
        info!(definition_id = %def.id, %run_id, %trigger_at, "export run started");

        let outcome = self.attempt(&def, trigger_at).await;

        let done = self
            .store
            .record_run_outcome(
                &def.id,
                &run_id,
                &outcome,
                trigger_at,
                self.clock.now(),
                self.settings.max_consecutive_failures,
            )
            .inspect_err(|e| {
                error!(definition_id = %def.id, %run_id, "failed to store run outcome: {e}")
            })?;

        match outcome.error {
            None => info!(
                definition_id = %def.id,
                %run_id,
                next_run = %done.definition.next_run,
                "export run succeeded"
            ),
            Some(ref reason) => warn!(
                definition_id = %def.id,
                %run_id,
                next_run = %done.definition.next_run,
                "export run failed: {reason}"
            ),
        }
        Ok(done)
    }

    /// Resolve, generate, deliver. Never fails: every error becomes the
    /// failure outcome it maps to.
    async fn attempt(&self, def: &ExportDefinition, trigger_at: DateTime<Utc>) -> RunOutcome {
        let params = match self.resolver.resolve(def) {
            Ok(params) => params,
            Err(e) => return RunOutcome::failure(&e, None),
        };

        let request = GenerationRequest {
            definition_id: def.id.clone(),
            name: def.name.clone(),
            report_type: params.report_type,
            format: params.format,
            sections: params.sections,
            trigger_at,
        };
        let artifact = match self.generate(request).await {
            Ok(artifact) => artifact,
            Err(e) => return RunOutcome::failure(&e, None),
        };
        let summary = ArtifactSummary::of(&artifact);

        if let Some(ref template_id) = params.template_id {
            if let Err(e) = self.resolver.record_usage(template_id) {
                warn!(%template_id, "failed to record template usage: {e}");
            }
        }

        let delivery = self
            .dispatcher
            .deliver(&artifact, &def.destination, &def.recipients);
        match timeout(self.settings.delivery_timeout, delivery).await {
            Ok(Ok(result)) => RunOutcome::success(summary, result.summary()),
            Ok(Err(e)) => {
                RunOutcome::failure(&SchedulerError::DeliveryFailed(e.to_string()), Some(summary))
            }
            Err(_) => RunOutcome::failure(
                &SchedulerError::DeliveryFailed("timeout".to_string()),
                Some(summary),
            ),
        }
    }

    /// The generator call runs in its own task so a timeout leaves it
    /// detached instead of blocking the run.
    async fn generate(&self, request: GenerationRequest) -> Result<Artifact> {
        let generator = Arc::clone(&self.generator);
        let definition_id = request.definition_id.clone();
        let task = tokio::spawn(async move { generator.generate(&request).await });

        match timeout(self.settings.generation_timeout, task).await {
            Ok(Ok(Ok(artifact))) => Ok(artifact),
            Ok(Ok(Err(e))) => Err(SchedulerError::GenerationFailed(e.to_string())),
            Ok(Err(join)) => Err(SchedulerError::GenerationFailed(format!(
                "generator task failed: {join}"
            ))),
            Err(_) => {
                warn!(
                    %definition_id,
                    generator = self.generator.name(),
                    timeout_secs = self.settings.generation_timeout.as_secs(),
                    "report generation timed out"
                );
                Err(SchedulerError::DeliveryFailed("timeout".to_string()))
            }
        }
    }
}

/// Drives [`ExecutionEngine::tick`] on a fixed period until stopped.
pub struct TickLoop {
    engine: Arc<ExecutionEngine>,
    period: Duration,
}

/// Owned handle to a started [`TickLoop`].
pub struct TickLoopHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl TickLoop {
    pub fn new(engine: Arc<ExecutionEngine>, period: Duration) -> Self {
        Self {
            engine,
            period: period.max(Duration::from_millis(1)),
        }
    }

    pub fn start(self) -> TickLoopHandle {
        let (shutdown, mut rx) = watch::channel(false);
        let join = tokio::spawn(async move {
            info!(period_secs = self.period.as_secs_f64(), "export tick loop started");
            let mut interval = tokio::time::interval(self.period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = self.engine.tick() {
                            error!("export tick error: {e}");
                        }
                    }
                    changed = rx.changed() => {
                        if changed.is_err() || *rx.borrow() {
                            info!("export tick loop shutting down");
                            break;
                        }
                    }
                }
            }
        });
        TickLoopHandle { shutdown, join }
    }
}

impl TickLoopHandle {
    /// Stop ticking. In-flight runs are not awaited.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.join.await {
            warn!("tick loop task ended abnormally: {e}");
        }
    }
}
