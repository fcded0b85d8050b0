//! Workflow state machine.
//!
//! The controller owns the run collection and every piece of batch-scoped state. It consumes
//! user commands and background task events and answers with effects for the runtime to
//! execute; it never performs I/O itself. Mutually exclusive modes live in one tagged union,
//! so combinations like "submitting while showing results" cannot be represented.

use crate::collection::{RunCollection, RunDraft};
use crate::error::PipelineError;
use crate::model::{BatchStatus, BulkConfig, RunDefinition, RunStatus, RunStatusItem, Statistics};
use crate::poller::{PollDecision, PollRequest, RetryPolicy, StatusPoller, TerminalOutcome};
use crate::submitter::{
    self, AcceptedRun, BatchContext, FailedRun, PreparedBatch, SubmissionOutcome,
    DEFAULT_PARALLELISM,
};
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowSettings {
    pub parallel: u32,
    pub poll_interval: Duration,
    pub retry: RetryPolicy,
    /// Forces `force` on every batch regardless of the config files.
    pub force_override: bool,
    pub title_override: Option<String>,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            parallel: DEFAULT_PARALLELISM,
            poll_interval: crate::poller::DEFAULT_POLL_INTERVAL,
            retry: RetryPolicy::default(),
            force_override: false,
            title_override: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Stage {
    Instructions,
    FileSelection,
    RunReview,
    RunEdit,
    Submitting,
    Monitoring,
    Results,
}

impl Stage {
    pub fn label(self) -> &'static str {
        match self {
            Stage::Instructions => "instructions",
            Stage::FileSelection => "file selection",
            Stage::RunReview => "run review",
            Stage::RunEdit => "run edit",
            Stage::Submitting => "submitting",
            Stage::Monitoring => "monitoring",
            Stage::Results => "results",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchOutcome {
    Completed,
    Failed,
    Cancelled,
    SubmissionFailed,
    MonitoringHalted,
}

impl From<TerminalOutcome> for BatchOutcome {
    fn from(o: TerminalOutcome) -> Self {
        match o {
            TerminalOutcome::Completed => BatchOutcome::Completed,
            TerminalOutcome::Failed => BatchOutcome::Failed,
            TerminalOutcome::Cancelled => BatchOutcome::Cancelled,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchResults {
    pub batch_id: Option<String>,
    pub outcome: BatchOutcome,
    pub repository: String,
    pub submitted: usize,
    pub successful: Vec<AcceptedRun>,
    pub failed: Vec<FailedRun>,
    pub statistics: Option<Statistics>,
    pub runs: Vec<RunStatusItem>,
    pub error: Option<String>,
}

/// User intents routed from a front-end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SelectFiles,
    LoadFiles(Vec<PathBuf>),
    ToggleRun(usize),
    ToggleAll,
    RemoveRun(usize),
    BeginEdit(usize),
    SaveEdit(RunDraft),
    CancelEdit,
    RequestSubmit,
    ConfirmSubmit,
    DismissSubmit,
    Submit,
    CancelBatch,
    BackToReview,
    StartNew,
    Back,
    Home,
}

/// Completions of background work. `cycle` identifies the batch submission they belong to.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskEvent {
    ConfigLoaded {
        result: Result<BulkConfig, PipelineError>,
    },
    SubmitFinished {
        cycle: u64,
        result: Result<SubmissionOutcome, PipelineError>,
    },
    PollFinished {
        cycle: u64,
        seq: u64,
        result: Result<BatchStatus, PipelineError>,
    },
    CancelFinished {
        cycle: u64,
        result: Result<(), PipelineError>,
    },
}

/// Background work requested by the controller.
#[derive(Debug, Clone)]
pub enum Effect {
    LoadConfig { paths: Vec<PathBuf> },
    Submit { cycle: u64, prepared: PreparedBatch },
    Poll { cycle: u64, request: PollRequest },
    Cancel { cycle: u64, batch_id: String },
}

/// Read-only view of the controller for presentation layers.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowSnapshot {
    pub stage: Stage,
    pub runs: Vec<RunDefinition>,
    pub context: Option<BatchContext>,
    pub config_paths: Vec<PathBuf>,
    pub loading: bool,
    pub confirm_submit: bool,
    pub editing: Option<usize>,
    #[serde(skip)]
    pub draft: Option<RunDraft>,
    pub batch_id: Option<String>,
    pub statistics: Option<Statistics>,
    pub cancel_requested: bool,
    pub results: Option<BatchResults>,
    pub notice: Option<String>,
}

#[derive(Debug)]
struct ActiveBatch {
    cycle: u64,
    prepared: PreparedBatch,
    submission: SubmissionOutcome,
    poller: StatusPoller,
    cancel_requested: bool,
    last_status: Option<BatchStatus>,
    run_index: HashMap<String, usize>,
    /// The current notice describes a retry or cancel in progress and clears on the next good poll.
    transient_notice: bool,
}

#[derive(Debug)]
enum WorkflowState {
    Instructions,
    FileSelection { loading: bool },
    RunReview { confirm_submit: bool },
    RunEdit { index: usize, draft: RunDraft },
    Submitting { cycle: u64, prepared: PreparedBatch },
    Monitoring(Box<ActiveBatch>),
    Results(Box<BatchResults>),
}

impl WorkflowState {
    fn stage(&self) -> Stage {
        match self {
            WorkflowState::Instructions => Stage::Instructions,
            WorkflowState::FileSelection { .. } => Stage::FileSelection,
            WorkflowState::RunReview { .. } => Stage::RunReview,
            WorkflowState::RunEdit { .. } => Stage::RunEdit,
            WorkflowState::Submitting { .. } => Stage::Submitting,
            WorkflowState::Monitoring(_) => Stage::Monitoring,
            WorkflowState::Results(_) => Stage::Results,
        }
    }
}

#[derive(Debug)]
pub struct WorkflowController {
    settings: WorkflowSettings,
    state: WorkflowState,
    collection: RunCollection,
    context: Option<BatchContext>,
    config_paths: Vec<PathBuf>,
    cycle: u64,
    notice: Option<String>,
}

fn unavailable(action: &str, stage: Stage) -> PipelineError {
    PipelineError::Validation(format!("{action} is not available during {}", stage.label()))
}

impl WorkflowController {
    pub fn new(settings: WorkflowSettings) -> Self {
        Self {
            settings,
            state: WorkflowState::Instructions,
            collection: RunCollection::new(),
            context: None,
            config_paths: Vec::new(),
            cycle: 0,
            notice: None,
        }
    }

    pub fn stage(&self) -> Stage {
        self.state.stage()
    }

    pub fn collection(&self) -> &RunCollection {
        &self.collection
    }

    pub fn context(&self) -> Option<&BatchContext> {
        self.context.as_ref()
    }

    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    pub fn results(&self) -> Option<&BatchResults> {
        match &self.state {
            WorkflowState::Results(r) => Some(r),
            _ => None,
        }
    }

    pub fn batch_id(&self) -> Option<&str> {
        match &self.state {
            WorkflowState::Monitoring(b) => Some(b.submission.batch_id.as_str()),
            WorkflowState::Results(r) => r.batch_id.as_deref(),
            _ => None,
        }
    }

    pub fn snapshot(&self) -> WorkflowSnapshot {
        let (editing, draft) = match &self.state {
            WorkflowState::RunEdit { index, draft } => (Some(*index), Some(draft.clone())),
            _ => (None, None),
        };
        let (statistics, cancel_requested) = match &self.state {
            WorkflowState::Monitoring(b) => (
                b.last_status.as_ref().map(|s| s.statistics),
                b.cancel_requested,
            ),
            WorkflowState::Results(r) => (r.statistics, false),
            _ => (None, false),
        };
        WorkflowSnapshot {
            stage: self.stage(),
            runs: self.collection().runs().to_vec(),
            context: self.context().cloned(),
            config_paths: self.config_paths.clone(),
            loading: matches!(self.state, WorkflowState::FileSelection { loading: true }),
            confirm_submit: self.confirm_pending(),
            editing,
            draft,
            batch_id: self.batch_id().map(str::to_string),
            statistics,
            cancel_requested,
            results: self.results().cloned(),
            notice: self.notice().map(str::to_string),
        }
    }

    fn transition(&mut self, next: WorkflowState) {
        let from = self.stage();
        let to = next.stage();
        if from != to {
            tracing::debug!(from = from.label(), to = to.label(), "workflow transition");
        }
        self.state = next;
    }

    /// Apply a command; failures are recorded as the current notice instead of propagating.
    pub fn handle_command(&mut self, cmd: Command) -> Vec<Effect> {
        match self.dispatch(cmd) {
            Ok(effects) => effects,
            Err(e) => {
                tracing::warn!(kind = e.kind(), "{e}");
                self.notice = Some(e.to_string());
                Vec::new()
            }
        }
    }

    pub fn dispatch(&mut self, cmd: Command) -> Result<Vec<Effect>, PipelineError> {
        match cmd {
            Command::SelectFiles => self.select_files().map(|_| Vec::new()),
            Command::LoadFiles(paths) => self.load_files(paths),
            Command::ToggleRun(i) => self.toggle_run(i).map(|_| Vec::new()),
            Command::ToggleAll => self.toggle_all().map(|_| Vec::new()),
            Command::RemoveRun(i) => self.remove_run(i).map(|_| Vec::new()),
            Command::BeginEdit(i) => self.begin_edit(i).map(|_| Vec::new()),
            Command::SaveEdit(draft) => self.save_edit(draft).map(|_| Vec::new()),
            Command::CancelEdit => self.cancel_edit().map(|_| Vec::new()),
            Command::RequestSubmit => self.request_submit().map(|_| Vec::new()),
            Command::ConfirmSubmit => self.confirm_submit(),
            Command::DismissSubmit => self.dismiss_submit().map(|_| Vec::new()),
            Command::Submit => self.submit(),
            Command::CancelBatch => self.cancel_batch(),
            Command::BackToReview => self.back_to_review().map(|_| Vec::new()),
            Command::StartNew => self.start_new().map(|_| Vec::new()),
            Command::Back => Ok(self.back()),
            Command::Home => {
                self.home();
                Ok(Vec::new())
            }
        }
    }

    fn enter_file_selection(&mut self) {
        if let WorkflowState::Monitoring(batch) = &mut self.state {
            batch.poller.stop();
        }
        self.collection = RunCollection::new();
        self.context = None;
        self.config_paths.clear();
        self.notice = None;
        self.transition(WorkflowState::FileSelection { loading: false });
    }

    pub fn select_files(&mut self) -> Result<(), PipelineError> {
        match self.stage() {
            Stage::Instructions => {
                self.enter_file_selection();
                Ok(())
            }
            stage => Err(unavailable("selecting files", stage)),
        }
    }

    pub fn load_files(&mut self, paths: Vec<PathBuf>) -> Result<Vec<Effect>, PipelineError> {
        match &self.state {
            WorkflowState::FileSelection { loading: false } => {}
            WorkflowState::FileSelection { loading: true } => {
                return Err(PipelineError::Validation("already loading files".into()))
            }
            other => return Err(unavailable("loading files", other.stage())),
        }
        if paths.is_empty() {
            return Err(PipelineError::ConfigLoad("no files selected".into()));
        }
        self.config_paths = paths.clone();
        self.state = WorkflowState::FileSelection { loading: true };
        Ok(vec![Effect::LoadConfig { paths }])
    }

    fn on_config_loaded(&mut self, result: Result<BulkConfig, PipelineError>) {
        if !matches!(self.state, WorkflowState::FileSelection { loading: true }) {
            tracing::debug!("discarding config load result outside file selection");
            return;
        }
        match result {
            Ok(cfg) => {
                let mut ctx = BatchContext::from(&cfg);
                ctx.force |= self.settings.force_override;
                if let Some(title) = self.settings.title_override.clone() {
                    ctx.batch_title = Some(title);
                }
                let runs: Vec<RunDefinition> = cfg.runs.into_iter().map(RunDefinition::from).collect();
                self.notice = Some(format!(
                    "Loaded {} run(s) for {}",
                    runs.len(),
                    ctx.repository
                ));
                self.collection = RunCollection::from_runs(runs);
                self.context = Some(ctx);
                self.transition(WorkflowState::RunReview {
                    confirm_submit: false,
                });
            }
            Err(e) => {
                tracing::warn!(kind = e.kind(), "{e}");
                self.notice = Some(e.to_string());
                self.transition(WorkflowState::Instructions);
            }
        }
    }

    fn require_review(&mut self, action: &str) -> Result<(), PipelineError> {
        match &mut self.state {
            WorkflowState::RunReview { confirm_submit } => {
                *confirm_submit = false;
                Ok(())
            }
            other => Err(unavailable(action, other.stage())),
        }
    }

    pub fn toggle_run(&mut self, index: usize) -> Result<bool, PipelineError> {
        self.require_review("toggling a run")?;
        self.collection
            .toggle_selection(index)
            .ok_or_else(|| PipelineError::Validation(format!("no run at position {}", index + 1)))
    }

    pub fn toggle_all(&mut self) -> Result<(), PipelineError> {
        self.require_review("toggling all runs")?;
        self.collection.toggle_select_all();
        Ok(())
    }

    pub fn remove_run(&mut self, index: usize) -> Result<RunDefinition, PipelineError> {
        self.require_review("removing a run")?;
        self.collection.remove(index)
    }

    pub fn begin_edit(&mut self, index: usize) -> Result<(), PipelineError> {
        self.require_review("editing a run")?;
        let run = self
            .collection
            .get(index)
            .ok_or_else(|| PipelineError::Validation(format!("no run at position {}", index + 1)))?;
        let draft = RunDraft::from_run(run);
        self.transition(WorkflowState::RunEdit { index, draft });
        Ok(())
    }

    pub fn save_edit(&mut self, draft: RunDraft) -> Result<(), PipelineError> {
        let index = match &self.state {
            WorkflowState::RunEdit { index, .. } => *index,
            other => return Err(unavailable("saving an edit", other.stage())),
        };
        if let Err(e) = self.collection.edit(index, &draft) {
            // Keep the user's text so the edit can be fixed.
            self.state = WorkflowState::RunEdit { index, draft };
            return Err(e);
        }
        self.transition(WorkflowState::RunReview {
            confirm_submit: false,
        });
        Ok(())
    }

    pub fn cancel_edit(&mut self) -> Result<(), PipelineError> {
        match self.stage() {
            Stage::RunEdit => {
                self.transition(WorkflowState::RunReview {
                    confirm_submit: false,
                });
                Ok(())
            }
            stage => Err(unavailable("cancelling an edit", stage)),
        }
    }

    fn prepare(&self) -> Result<PreparedBatch, PipelineError> {
        let ctx = self
            .context
            .as_ref()
            .ok_or_else(|| PipelineError::Validation("no batch configuration loaded".into()))?;
        submitter::prepare_batch(&self.collection, ctx, self.settings.parallel)
    }

    /// Validate the selection and ask for confirmation.
    pub fn request_submit(&mut self) -> Result<(), PipelineError> {
        match self.stage() {
            Stage::RunReview => {}
            stage => return Err(unavailable("submitting", stage)),
        }
        self.prepare()?;
        self.state = WorkflowState::RunReview {
            confirm_submit: true,
        };
        Ok(())
    }

    pub fn dismiss_submit(&mut self) -> Result<(), PipelineError> {
        self.require_review("dismissing the submit prompt")
    }

    pub fn confirm_submit(&mut self) -> Result<Vec<Effect>, PipelineError> {
        if !self.confirm_pending() {
            return Err(PipelineError::Validation("nothing to confirm".into()));
        }
        self.submit()
    }

    /// Build the batch from the selected runs and hand it to the runtime.
    ///
    /// Validation failures leave every piece of state untouched and produce no effect.
    pub fn submit(&mut self) -> Result<Vec<Effect>, PipelineError> {
        match self.stage() {
            Stage::RunReview => {}
            stage => return Err(unavailable("submitting", stage)),
        }
        let prepared = self.prepare()?;

        self.cycle += 1;
        let cycle = self.cycle;
        for s in &prepared.submitted {
            self.collection
                .set_content_hash(s.collection_index, s.content_hash.clone());
        }
        self.notice = None;
        self.transition(WorkflowState::Submitting {
            cycle,
            prepared: prepared.clone(),
        });
        Ok(vec![Effect::Submit { cycle, prepared }])
    }

    fn on_submit_finished(
        &mut self,
        cycle: u64,
        result: Result<SubmissionOutcome, PipelineError>,
    ) -> Vec<Effect> {
        let prepared = match &self.state {
            WorkflowState::Submitting { cycle: live, prepared } if *live == cycle => {
                prepared.clone()
            }
            _ => {
                tracing::debug!(cycle, "discarding stale submit result");
                return Vec::new();
            }
        };

        let outcome = match result {
            Ok(o) => o,
            Err(e) => {
                tracing::warn!(kind = e.kind(), "{e}");
                self.notice = Some(e.to_string());
                let results = BatchResults {
                    batch_id: None,
                    outcome: BatchOutcome::SubmissionFailed,
                    repository: prepared.request.repository_name.clone(),
                    submitted: prepared.submitted.len(),
                    successful: Vec::new(),
                    failed: Vec::new(),
                    statistics: None,
                    runs: Vec::new(),
                    error: Some(e.to_string()),
                };
                self.transition(WorkflowState::Results(Box::new(results)));
                return Vec::new();
            }
        };

        let mut run_index = HashMap::new();
        for f in &outcome.failed {
            self.collection.set_status(f.collection_index, RunStatus::Failed);
        }
        for s in &outcome.successful {
            let status = match s.status {
                RunStatus::Pending | RunStatus::Unknown => RunStatus::Queued,
                other => other,
            };
            self.collection.set_status(s.collection_index, status);
            run_index.insert(s.id.clone(), s.collection_index);
        }
        if !outcome.failed.is_empty() {
            self.notice = Some(format!(
                "{} of {} run(s) rejected",
                outcome.failed.len(),
                prepared.submitted.len()
            ));
        }

        let mut poller = StatusPoller::new(
            outcome.batch_id.clone(),
            self.settings.poll_interval,
            self.settings.retry,
        );
        let first = poller.start();
        self.transition(WorkflowState::Monitoring(Box::new(ActiveBatch {
            cycle,
            prepared,
            submission: outcome,
            poller,
            cancel_requested: false,
            last_status: None,
            run_index,
            transient_notice: false,
        })));
        first
            .map(|request| vec![Effect::Poll { cycle, request }])
            .unwrap_or_default()
    }

    fn on_poll_finished(
        &mut self,
        cycle: u64,
        seq: u64,
        result: Result<BatchStatus, PipelineError>,
    ) -> Vec<Effect> {
        let WorkflowState::Monitoring(batch) = &mut self.state else {
            tracing::debug!(cycle, seq, "discarding poll result outside monitoring");
            return Vec::new();
        };
        if batch.cycle != cycle {
            tracing::debug!(cycle, seq, "discarding poll result from an earlier batch");
            return Vec::new();
        }

        match batch.poller.on_result(seq, result) {
            PollDecision::Ignored => {
                tracing::debug!(cycle, seq, "discarding superseded poll result");
                Vec::new()
            }
            PollDecision::Continue { status, next } => {
                apply_status(&mut self.collection, batch, status);
                if batch.transient_notice {
                    batch.transient_notice = false;
                    self.notice = None;
                }
                vec![Effect::Poll {
                    cycle,
                    request: next,
                }]
            }
            PollDecision::Retry {
                error,
                attempt,
                next,
            } => {
                tracing::warn!(cycle, attempt, "{error}");
                batch.transient_notice = true;
                self.notice = Some(format!(
                    "{error} (retry {attempt}/{})",
                    self.settings.retry.max_retries
                ));
                vec![Effect::Poll {
                    cycle,
                    request: next,
                }]
            }
            // A cancel is pending; the next poll waits for its answer.
            PollDecision::Held(Ok(status)) => {
                apply_status(&mut self.collection, batch, status);
                Vec::new()
            }
            PollDecision::Held(Err(e)) => {
                tracing::warn!(cycle, kind = e.kind(), "{e}");
                Vec::new()
            }
            PollDecision::Terminal { outcome, status } => {
                tracing::info!(batch_id = %batch.submission.batch_id, ?outcome, "batch finished");
                apply_status(&mut self.collection, batch, status);
                self.finish_monitoring(outcome.into(), None);
                Vec::new()
            }
            PollDecision::Halted(e) => {
                tracing::warn!(kind = e.kind(), "monitoring halted: {e}");
                self.notice = Some(e.to_string());
                self.finish_monitoring(BatchOutcome::MonitoringHalted, Some(e));
                Vec::new()
            }
        }
    }

    fn finish_monitoring(&mut self, outcome: BatchOutcome, error: Option<PipelineError>) {
        let WorkflowState::Monitoring(batch) = &mut self.state else {
            return;
        };
        batch.poller.stop();
        let results = BatchResults {
            batch_id: Some(batch.submission.batch_id.clone()),
            outcome,
            repository: batch.prepared.request.repository_name.clone(),
            submitted: batch.prepared.submitted.len(),
            successful: batch.submission.successful.clone(),
            failed: batch.submission.failed.clone(),
            statistics: batch.last_status.as_ref().map(|s| s.statistics),
            runs: batch
                .last_status
                .as_ref()
                .map(|s| s.runs.clone())
                .unwrap_or_default(),
            error: error.map(|e| e.to_string()),
        };
        self.transition(WorkflowState::Results(Box::new(results)));
    }

    /// Ask the server to cancel the batch. Polling is held, not stopped, until it answers.
    pub fn cancel_batch(&mut self) -> Result<Vec<Effect>, PipelineError> {
        let stage = self.stage();
        let WorkflowState::Monitoring(batch) = &mut self.state else {
            return Err(unavailable("cancelling", stage));
        };
        if batch.cancel_requested {
            return Err(PipelineError::Validation("cancel already requested".into()));
        }
        batch.poller.hold();
        batch.cancel_requested = true;
        batch.transient_notice = true;
        tracing::info!(batch_id = %batch.submission.batch_id, "cancel requested");
        self.notice = Some("Cancelling…".into());
        Ok(vec![Effect::Cancel {
            cycle: batch.cycle,
            batch_id: batch.submission.batch_id.clone(),
        }])
    }

    fn on_cancel_finished(&mut self, cycle: u64, result: Result<(), PipelineError>) -> Vec<Effect> {
        let WorkflowState::Monitoring(batch) = &mut self.state else {
            tracing::debug!(cycle, "discarding cancel result outside monitoring");
            return Vec::new();
        };
        if batch.cycle != cycle || !batch.cancel_requested {
            return Vec::new();
        }
        match result {
            Ok(()) => {
                for s in &batch.submission.successful {
                    let done = self
                        .collection
                        .get(s.collection_index)
                        .map(|r| r.status.is_terminal())
                        .unwrap_or(true);
                    if !done {
                        self.collection
                            .set_status(s.collection_index, RunStatus::Cancelled);
                    }
                }
                self.notice = Some("Batch cancelled".into());
                self.finish_monitoring(BatchOutcome::Cancelled, None);
                Vec::new()
            }
            Err(e) => {
                // The batch stays where it was last observed; keep watching it.
                tracing::warn!(kind = e.kind(), "{e}");
                self.notice = Some(e.to_string());
                batch.cancel_requested = false;
                batch.transient_notice = true;
                batch
                    .poller
                    .release()
                    .map(|request| vec![Effect::Poll { cycle, request }])
                    .unwrap_or_default()
            }
        }
    }

    /// Return to review after a submission that never produced a batch.
    pub fn back_to_review(&mut self) -> Result<(), PipelineError> {
        match &self.state {
            WorkflowState::Results(r) if r.batch_id.is_none() && !self.collection.is_empty() => {
                self.notice = None;
                self.transition(WorkflowState::RunReview {
                    confirm_submit: false,
                });
                Ok(())
            }
            WorkflowState::Results(_) => Err(PipelineError::Validation(
                "batch was already created; start a new one instead".into(),
            )),
            other => Err(unavailable("returning to review", other.stage())),
        }
    }

    /// Begin a new batch cycle. Clears runs, batch identifiers, results, and errors.
    pub fn start_new(&mut self) -> Result<(), PipelineError> {
        match self.stage() {
            Stage::Results => {
                self.enter_file_selection();
                Ok(())
            }
            stage => Err(unavailable("starting a new batch", stage)),
        }
    }

    fn confirm_pending(&self) -> bool {
        matches!(
            self.state,
            WorkflowState::RunReview {
                confirm_submit: true
            }
        )
    }

    pub fn back(&mut self) -> Vec<Effect> {
        match self.stage() {
            // The submit call is already out; wait for it.
            Stage::Instructions | Stage::Submitting => {}
            Stage::FileSelection => self.transition(WorkflowState::Instructions),
            Stage::RunReview if self.confirm_pending() => {
                self.state = WorkflowState::RunReview {
                    confirm_submit: false,
                };
            }
            Stage::RunReview => self.enter_file_selection(),
            Stage::RunEdit => self.transition(WorkflowState::RunReview {
                confirm_submit: false,
            }),
            Stage::Monitoring | Stage::Results => self.home(),
        }
        Vec::new()
    }

    /// Escape to the start screen from anywhere. Monitoring stops without a server-side cancel.
    pub fn home(&mut self) {
        if let WorkflowState::Monitoring(batch) = &mut self.state {
            tracing::info!(
                batch_id = %batch.submission.batch_id,
                phase = ?batch.poller.phase(),
                "detached from batch"
            );
            batch.poller.stop();
        }
        self.transition(WorkflowState::Instructions);
    }

    pub fn handle_task(&mut self, event: TaskEvent) -> Vec<Effect> {
        match event {
            TaskEvent::ConfigLoaded { result } => {
                self.on_config_loaded(result);
                Vec::new()
            }
            TaskEvent::SubmitFinished { cycle, result } => self.on_submit_finished(cycle, result),
            TaskEvent::PollFinished { cycle, seq, result } => {
                self.on_poll_finished(cycle, seq, result)
            }
            TaskEvent::CancelFinished { cycle, result } => self.on_cancel_finished(cycle, result),
        }
    }
}

fn apply_status(collection: &mut RunCollection, batch: &mut ActiveBatch, status: BatchStatus) {
    for item in &status.runs {
        if let Some(&idx) = batch.run_index.get(&item.id) {
            collection.set_status(idx, item.status);
        }
    }
    tracing::debug!(
        batch_id = %batch.submission.batch_id,
        state = status.status.label(),
        total = status.statistics.total,
        finished = status.statistics.finished(),
        "batch status"
    );
    batch.last_status = Some(status);
}
