//! Plan execution engine

use crate::device_ops::SharedTelescopeOps;
use crate::{
    ExecutionError, ExecutionEvent, ExecutionProgress, ExecutionResult, ExecutionState, ExecutionSummary,
    ExecutorConfig, GlobalState, Phase,
};
use chrono::Utc;
use skyward_link::protocol::stages;
use skyward_link::StageStatus;
use skyward_planner::{Plan, ScheduledTarget};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock as StdRwLock, RwLockWriteGuard};
use std::time::Duration;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

enum StepError {
    Aborted,
    Failed(String),
}

enum TargetOutcome {
    Complete,
    Failed(String),
    Aborted,
}

/// Per-run bookkeeping owned by the run task
struct RunContext {
    run_id: Uuid,
    started: Instant,
    /// Scheduled duration of each entry in seconds
    durations: Vec<f64>,
    slew_secs: f64,
}

impl RunContext {
    fn new(run_id: Uuid, plan: &Plan) -> Self {
        Self {
            run_id,
            started: Instant::now(),
            durations: plan.targets.iter().map(ScheduledTarget::duration_secs).collect(),
            slew_secs: plan.slew_seconds,
        }
    }

    /// Unimaged time of entry `index` plus every later entry and its slew
    fn remaining_secs(&self, index: usize, imaged_secs: f64) -> f64 {
        let current = self
            .durations
            .get(index)
            .map(|d| (d - imaged_secs).max(0.0))
            .unwrap_or(0.0);
        let later: f64 = self.durations.iter().skip(index + 1).map(|d| d + self.slew_secs).sum();
        current + later
    }
}

/// Handle to a spawned run
#[derive(Debug)]
pub struct ExecutionHandle {
    run_id: Uuid,
    task: JoinHandle<ExecutionSummary>,
}

impl ExecutionHandle {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Wait for the run to finish
    pub async fn wait(self) -> ExecutionResult<ExecutionSummary> {
        self.task.await.map_err(|e| ExecutionError::TaskFailed(e.to_string()))
    }
}

/// Drives a plan against the telescope, one target at a time
#[derive(Clone)]
pub struct ExecutionOrchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    telescope: SharedTelescopeOps,
    config: ExecutorConfig,
    progress: StdRwLock<ExecutionProgress>,
    running: AtomicBool,
    is_cancelled: AtomicBool,
    cancel_notify: Notify,
    finished_notify: Notify,
    event_tx: broadcast::Sender<ExecutionEvent>,
}

impl ExecutionOrchestrator {
    pub fn new(telescope: SharedTelescopeOps, config: ExecutorConfig) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_buffer.max(1));
        Self {
            inner: Arc::new(Inner {
                telescope,
                config,
                progress: StdRwLock::new(ExecutionProgress::default()),
                running: AtomicBool::new(false),
                is_cancelled: AtomicBool::new(false),
                cancel_notify: Notify::new(),
                finished_notify: Notify::new(),
                event_tx,
            }),
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.inner.config
    }

    /// Subscribe to run events
    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Snapshot of the current or most recent run
    pub fn progress(&self) -> ExecutionProgress {
        self.inner
            .progress
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Start executing `plan` in the background
    pub fn execute_plan(&self, plan: Plan) -> ExecutionResult<ExecutionHandle> {
        let violations = plan.invariant_violations();
        if !violations.is_empty() {
            return Err(ExecutionError::InvalidPlan(violations.join("; ")));
        }

        let run_id = Uuid::new_v4();
        let total = plan.targets.len();
        {
            // abort() takes the same lock, so it cannot land between the claim and the reset
            let mut progress = self.inner.write_progress();
            if self
                .inner
                .running
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                return Err(ExecutionError::AlreadyExecuting);
            }
            self.inner.is_cancelled.store(false, Ordering::SeqCst);

            let revision = progress.revision + 1;
            *progress = ExecutionProgress {
                run_id: Some(run_id),
                plan_id: Some(plan.id),
                state: GlobalState::Running,
                estimated_remaining_secs: plan.total_imaging_secs() + plan.slew_seconds * total as f64,
                targets: plan
                    .targets
                    .iter()
                    .map(|entry| ExecutionState::new(&entry.target.catalog_id, &entry.target.name))
                    .collect(),
                revision,
                message: Some(format!("Executing {} targets", total)),
                ..Default::default()
            };
        }

        info!("Starting run {} for plan {} ({} targets)", run_id, plan.id, total);
        self.inner.emit(ExecutionEvent::StateChanged(GlobalState::Running));

        let inner = self.inner.clone();
        let task = tokio::spawn(async move { inner.run(plan, run_id).await });

        Ok(ExecutionHandle { run_id, task })
    }

    /// Request the active run to stop. Returns false when nothing is running.
    ///
    /// The telescope is left where it is; use [`park_telescope`](Self::park_telescope) to park.
    pub fn abort(&self) -> bool {
        {
            let _progress = self.inner.write_progress();
            if !self.is_running() {
                debug!("Abort requested with no active run");
                return false;
            }
            self.inner.is_cancelled.store(true, Ordering::SeqCst);
        }
        info!("Abort requested");
        self.inner.cancel_notify.notify_waiters();
        true
    }

    /// Wait until no run is active
    pub async fn wait_until_idle(&self) {
        while self.is_running() {
            let finished = self.inner.finished_notify.notified();
            tokio::select! {
                _ = finished => {}
                _ = tokio::time::sleep(self.inner.config.poll_interval()) => {}
            }
        }
    }

    /// Park the telescope, aborting the active run first
    pub async fn park_telescope(&self) -> ExecutionResult<()> {
        if self.abort() {
            self.wait_until_idle().await;
        }
        info!("Parking telescope");
        self.inner.telescope.park().await?;
        Ok(())
    }
}

impl Inner {
    fn emit(&self, event: ExecutionEvent) {
        let _ = self.event_tx.send(event);
    }

    fn is_cancelled(&self) -> bool {
        self.is_cancelled.load(Ordering::SeqCst)
    }

    fn write_progress(&self) -> RwLockWriteGuard<'_, ExecutionProgress> {
        self.progress.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `f` and refresh timing for entry `index`
    fn update<F>(&self, ctx: &RunContext, index: usize, imaged_secs: f64, f: F)
    where
        F: FnOnce(&mut ExecutionProgress),
    {
        let mut progress = self.write_progress();
        f(&mut progress);
        progress.elapsed_secs = ctx.started.elapsed().as_secs_f64();
        progress.estimated_remaining_secs = ctx.remaining_secs(index, imaged_secs);
        progress.revision += 1;
    }

    /// Sleep unless cancelled first. Returns true when the run was cancelled.
    async fn cancellable_sleep(&self, duration: Duration) -> bool {
        // Register before reading the flag so an abort in between still wakes us
        let notified = self.cancel_notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if self.is_cancelled() {
            return true;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => self.is_cancelled(),
            _ = notified => true,
        }
    }

    async fn run(&self, plan: Plan, run_id: Uuid) -> ExecutionSummary {
        let ctx = RunContext::new(run_id, &plan);

        for (index, entry) in plan.targets.iter().enumerate() {
            if self.is_cancelled() {
                break;
            }
            if self.config.honor_start_times && !self.wait_for_start(&ctx, index, entry).await {
                break;
            }

            self.begin_target(&ctx, index, entry);
            match self.execute_target(&ctx, index, entry).await {
                TargetOutcome::Complete => self.complete_target(&ctx, index, entry),
                TargetOutcome::Failed(reason) => self.fail_target(&ctx, index, entry, reason),
                TargetOutcome::Aborted => {
                    warn!("{} during {}", ExecutionError::AbortRequested, entry.target.catalog_id);
                    self.fail_target(&ctx, index, entry, "aborted".to_string());
                    break;
                }
            }
        }

        self.finish_run(&ctx)
    }

    /// Returns false when cancelled while waiting
    async fn wait_for_start(&self, ctx: &RunContext, index: usize, entry: &ScheduledTarget) -> bool {
        let wait = (entry.start_time - Utc::now()).to_std().unwrap_or_default();
        if wait.is_zero() {
            return true;
        }
        info!("Waiting {:?} for {} scheduled start", wait, entry.target.catalog_id);
        self.update(ctx, index, 0.0, |p| {
            p.message = Some(format!("Waiting for {} at {}", entry.target.name, entry.start_time));
        });
        !self.cancellable_sleep(wait).await
    }

    fn begin_target(&self, ctx: &RunContext, index: usize, entry: &ScheduledTarget) {
        info!(
            "Target {}/{}: {} ({})",
            index + 1,
            ctx.durations.len(),
            entry.target.name,
            entry.target.catalog_id
        );
        self.update(ctx, index, 0.0, |p| {
            p.current_target_index = Some(index);
            p.targets[index].started_at = Some(Utc::now());
            p.message = Some(format!("Observing {}", entry.target.name));
        });
        self.emit(ExecutionEvent::TargetStarted {
            index,
            catalog_id: entry.target.catalog_id.clone(),
        });
    }

    fn set_phase(&self, ctx: &RunContext, index: usize, phase: Phase) {
        debug!("Target {} entering {:?}", index, phase);
        self.update(ctx, index, 0.0, |p| {
            p.phase = Some(phase);
            p.targets[index].phase = phase;
        });
        self.emit(ExecutionEvent::PhaseChanged { index, phase });
    }

    fn complete_target(&self, ctx: &RunContext, index: usize, entry: &ScheduledTarget) {
        let mut degraded = false;
        self.update(ctx, index, ctx.durations[index], |p| {
            let state = &mut p.targets[index];
            state.phase = Phase::Complete;
            state.finished_at = Some(Utc::now());
            degraded = state.degraded_quality;
            p.phase = Some(Phase::Complete);
        });
        info!(
            "Completed {}{}",
            entry.target.catalog_id,
            if degraded { " (degraded focus)" } else { "" }
        );
        self.emit(ExecutionEvent::TargetCompleted {
            index,
            catalog_id: entry.target.catalog_id.clone(),
            degraded,
        });
    }

    fn fail_target(&self, ctx: &RunContext, index: usize, entry: &ScheduledTarget, reason: String) {
        error!(
            "{}",
            ExecutionError::TargetExecutionFailed {
                target: entry.target.catalog_id.clone(),
                reason: reason.clone(),
            }
        );
        self.update(ctx, index, ctx.durations[index], |p| {
            let state = &mut p.targets[index];
            state.phase = Phase::Failed;
            state.finished_at = Some(Utc::now());
            state.errors.push(reason.clone());
            p.phase = Some(Phase::Failed);
        });
        self.emit(ExecutionEvent::TargetFailed {
            index,
            catalog_id: entry.target.catalog_id.clone(),
            reason,
        });
    }

    fn finish_run(&self, ctx: &RunContext) -> ExecutionSummary {
        let final_state = if self.is_cancelled() {
            GlobalState::Aborted
        } else {
            GlobalState::Completed
        };

        let summary = {
            let mut progress = self.write_progress();
            let summary = ExecutionSummary::from_states(ctx.run_id, &progress.targets, final_state);
            progress.state = final_state;
            progress.current_target_index = None;
            progress.phase = None;
            progress.elapsed_secs = ctx.started.elapsed().as_secs_f64();
            progress.estimated_remaining_secs = 0.0;
            progress.message = Some(format!(
                "{:?}: {} completed, {} failed, {} skipped",
                final_state, summary.completed, summary.failed, summary.skipped
            ));
            progress.summary = Some(summary.clone());
            progress.revision += 1;
            summary
        };

        info!(
            "Run {} finished {:?}: {}/{} completed, {} failed, {} skipped",
            ctx.run_id, final_state, summary.completed, summary.total, summary.failed, summary.skipped
        );
        self.emit(ExecutionEvent::StateChanged(final_state));
        self.emit(ExecutionEvent::ExecutionFinished(summary.clone()));

        self.running.store(false, Ordering::SeqCst);
        self.finished_notify.notify_waiters();
        summary
    }

    // =========================================================================
    // PER-TARGET PHASES
    // =========================================================================

    async fn execute_target(&self, ctx: &RunContext, index: usize, entry: &ScheduledTarget) -> TargetOutcome {
        self.set_phase(ctx, index, Phase::Slewing);
        match self.with_retry(ctx, index, "slew", || self.slew(entry)).await {
            Ok(()) => {}
            Err(StepError::Aborted) => {
                self.halt(Phase::Slewing).await;
                return TargetOutcome::Aborted;
            }
            Err(StepError::Failed(reason)) => return TargetOutcome::Failed(reason),
        }

        if self.config.auto_focus {
            self.set_phase(ctx, index, Phase::Focusing);
            match self.with_retry(ctx, index, "focus", || self.focus()).await {
                Ok(()) => {}
                Err(StepError::Aborted) => return TargetOutcome::Aborted,
                Err(StepError::Failed(reason)) => {
                    warn!(
                        "Imaging {} without a successful focus: {}",
                        entry.target.catalog_id, reason
                    );
                    self.update(ctx, index, 0.0, |p| p.targets[index].degraded_quality = true);
                }
            }
        }

        self.set_phase(ctx, index, Phase::Imaging);
        match self.with_retry(ctx, index, "imaging start", || self.start_imaging()).await {
            Ok(()) => {}
            Err(StepError::Aborted) => {
                self.halt(Phase::Imaging).await;
                return TargetOutcome::Aborted;
            }
            Err(StepError::Failed(reason)) => return TargetOutcome::Failed(reason),
        }

        self.image(ctx, index, entry).await
    }

    /// Run `op` up to `max_attempts` times, pausing `retry_delay` between tries
    async fn with_retry<F, Fut>(&self, ctx: &RunContext, index: usize, step: &str, mut op: F) -> Result<(), StepError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), StepError>>,
    {
        let max_attempts = self.config.retry.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            if self.is_cancelled() {
                return Err(StepError::Aborted);
            }
            match op().await {
                Ok(()) => return Ok(()),
                Err(StepError::Aborted) => return Err(StepError::Aborted),
                Err(StepError::Failed(reason)) => {
                    warn!("{} attempt {}/{} failed: {}", step, attempt, max_attempts, reason);
                    let retrying = attempt < max_attempts;
                    self.update(ctx, index, 0.0, |p| {
                        let state = &mut p.targets[index];
                        state.errors.push(format!("{} attempt {}: {}", step, attempt, reason));
                        if retrying {
                            state.retry_count += 1;
                        }
                    });
                    last_error = reason;
                    if retrying && self.cancellable_sleep(self.config.retry.retry_delay()).await {
                        return Err(StepError::Aborted);
                    }
                }
            }
        }

        Err(StepError::Failed(format!(
            "{} failed after {} attempts: {}",
            step, max_attempts, last_error
        )))
    }

    async fn slew(&self, entry: &ScheduledTarget) -> Result<(), StepError> {
        let target = &entry.target;
        self.telescope
            .goto(target.ra_hours, target.dec_degrees, &target.name)
            .await
            .map_err(|e| StepError::Failed(e.to_string()))?;

        let result = self.wait_for_stage(stages::AUTO_GOTO, self.config.slew_timeout()).await;
        if let Err(StepError::Failed(_)) = &result {
            self.halt(Phase::Slewing).await;
        }
        result
    }

    async fn focus(&self) -> Result<(), StepError> {
        self.telescope
            .auto_focus()
            .await
            .map_err(|e| StepError::Failed(e.to_string()))?;
        self.wait_for_stage(stages::AUTO_FOCUS, self.config.focus_timeout()).await
    }

    async fn start_imaging(&self) -> Result<(), StepError> {
        self.telescope
            .start_imaging(true)
            .await
            .map_err(|e| StepError::Failed(e.to_string()))
    }

    /// Poll a device stage until it finishes or `limit` elapses
    async fn wait_for_stage(&self, stage: &str, limit: Duration) -> Result<(), StepError> {
        let started = Instant::now();

        loop {
            if self.cancellable_sleep(self.config.poll_interval()).await {
                return Err(StepError::Aborted);
            }

            match self.telescope.view_state().await {
                Ok(view) => {
                    let status = view.stage_status(stage);
                    debug!("{} stage {:?}", stage, status);
                    match status {
                        StageStatus::Complete => return Ok(()),
                        StageStatus::Failed | StageStatus::Cancelled => {
                            let detail = view
                                .stage_report(stage)
                                .and_then(|r| r.error.clone())
                                .unwrap_or_else(|| format!("{:?}", status).to_lowercase());
                            return Err(StepError::Failed(format!("{} {}", stage, detail)));
                        }
                        _ => {}
                    }
                }
                Err(e) => warn!("View state poll failed during {}: {}", stage, e),
            }

            if started.elapsed() >= limit {
                return Err(StepError::Failed(format!("{} timed out after {:?}", stage, limit)));
            }
        }
    }

    /// Stay on target for the scheduled duration, tracking stacked frames
    async fn image(&self, ctx: &RunContext, index: usize, entry: &ScheduledTarget) -> TargetOutcome {
        let duration = entry.duration().to_std().unwrap_or_default();
        let poll_interval = self.config.poll_interval();
        let started = Instant::now();

        loop {
            let imaged = started.elapsed();
            if imaged >= duration {
                break;
            }
            if self.cancellable_sleep(poll_interval.min(duration - imaged)).await {
                self.halt(Phase::Imaging).await;
                return TargetOutcome::Aborted;
            }

            let imaged_secs = started.elapsed().as_secs_f64();
            match self.telescope.view_state().await {
                Ok(view) => {
                    let frames = view.stacked_frames();
                    self.update(ctx, index, imaged_secs, |p| {
                        let state = &mut p.targets[index];
                        state.frames_stacked = state.frames_stacked.max(frames);
                    });
                }
                Err(e) => {
                    warn!("Stack progress poll failed: {}", e);
                    self.update(ctx, index, imaged_secs, |_| {});
                }
            }
        }

        if let Err(e) = self.telescope.stop_imaging().await {
            warn!("Failed to stop imaging {}: {}", entry.target.catalog_id, e);
        }
        TargetOutcome::Complete
    }

    /// Stop whatever the telescope is doing in `phase`
    async fn halt(&self, phase: Phase) {
        let result = match phase {
            Phase::Slewing => self.telescope.stop_slew().await,
            Phase::Imaging => self.telescope.stop_imaging().await,
            _ => return,
        };
        if let Err(e) = result {
            warn!("Failed to stop {:?}: {}", phase, e);
        }
    }
}
