//! Effect execution loop.
//!
//! Feeds UI commands and background task completions into the [`WorkflowController`] and
//! spawns the work it asks for. Presentation layers only see [`WorkflowEvent`]s.

use super::controller::{BatchResults, Command, Effect, Stage, TaskEvent, WorkflowController, WorkflowSnapshot};
use crate::api::BatchApi;
use crate::error::PipelineError;
use crate::{loader, poller, submitter};
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::Duration;

/// Commands emitted by UI layers.
#[derive(Debug, Clone)]
pub(crate) enum UiCommand {
    Workflow(Command),
    Quit,
}

/// Updates for presentation layers.
#[derive(Debug, Clone)]
pub(crate) enum WorkflowEvent {
    Snapshot(Box<WorkflowSnapshot>),
    /// Sent once each time the workflow enters the results stage.
    Finished(Box<BatchResults>),
    Message(String),
}

/// Spawn the background work for one effect. Completion comes back on `task_tx`.
fn spawn_effect<A: BatchApi>(api: &Arc<A>, effect: Effect, task_tx: &UnboundedSender<TaskEvent>) {
    let tx = task_tx.clone();
    match effect {
        Effect::LoadConfig { paths } => {
            tokio::spawn(async move {
                let result = match tokio::task::spawn_blocking(move || loader::load_bulk_config(&paths)).await {
                    Ok(r) => r,
                    Err(e) => Err(PipelineError::ConfigLoad(format!("loader task failed: {e}"))),
                };
                let _ = tx.send(TaskEvent::ConfigLoaded { result });
            });
        }
        Effect::Submit { cycle, prepared } => {
            let api = Arc::clone(api);
            tokio::spawn(async move {
                let result = submitter::submit(api.as_ref(), &prepared).await;
                let _ = tx.send(TaskEvent::SubmitFinished { cycle, result });
            });
        }
        Effect::Poll { cycle, request } => {
            let api = Arc::clone(api);
            tokio::spawn(async move {
                // Cancelled before the call went out: nothing to report.
                let Some(result) = poller::poll_once(api.as_ref(), &request).await else {
                    return;
                };
                let result = result.map_err(|e| PipelineError::Polling(e.to_string()));
                let _ = tx.send(TaskEvent::PollFinished {
                    cycle,
                    seq: request.seq,
                    result,
                });
            });
        }
        Effect::Cancel { cycle, batch_id } => {
            let api = Arc::clone(api);
            tokio::spawn(async move {
                let result = api
                    .cancel_batch(&batch_id)
                    .await
                    .map_err(|e| PipelineError::Cancellation(e.to_string()));
                let _ = tx.send(TaskEvent::CancelFinished { cycle, result });
            });
        }
    }
}

fn publish(controller: &WorkflowController, event_tx: &UnboundedSender<WorkflowEvent>) {
    let _ = event_tx.send(WorkflowEvent::Snapshot(Box::new(controller.snapshot())));
}

/// Drive the workflow until the UI quits or drops its command channel.
pub(crate) async fn run_workflow<A: BatchApi>(
    api: Arc<A>,
    mut controller: WorkflowController,
    event_tx: UnboundedSender<WorkflowEvent>,
    mut cmd_rx: UnboundedReceiver<UiCommand>,
) -> Result<()> {
    let (task_tx, mut task_rx) = mpsc::unbounded_channel::<TaskEvent>();
    // Cancel watchdog: if the cancel call stalls, keep the UI informed.
    let mut cancel_deadline: Option<tokio::time::Instant> = None;
    let mut watchdog = tokio::time::interval(Duration::from_millis(500));

    publish(&controller, &event_tx);

    loop {
        let before = controller.stage();
        let effects = tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(UiCommand::Workflow(cmd)) => controller.handle_command(cmd),
                    Some(UiCommand::Quit) | None => {
                        // Leaving never cancels the batch server-side; it only stops polling.
                        controller.home();
                        break;
                    }
                }
            }
            Some(event) = task_rx.recv() => controller.handle_task(event),
            _ = watchdog.tick() => {
                if let Some(deadline) = cancel_deadline {
                    if tokio::time::Instant::now() >= deadline {
                        let _ = event_tx.send(WorkflowEvent::Message("Still cancelling…".into()));
                        cancel_deadline = None;
                    }
                }
                continue;
            }
        };

        for effect in effects {
            if matches!(effect, Effect::Cancel { .. }) {
                cancel_deadline = Some(tokio::time::Instant::now() + Duration::from_secs(3));
            }
            spawn_effect(&api, effect, &task_tx);
        }

        let after = controller.stage();
        if after != Stage::Monitoring {
            cancel_deadline = None;
        }
        publish(&controller, &event_tx);
        if before != Stage::Results && after == Stage::Results {
            if let Some(results) = controller.results() {
                let _ = event_tx.send(WorkflowEvent::Finished(Box::new(results.clone())));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BatchResponse, BatchState, RunCreated, RunStatus, Statistics};
    use crate::orchestrator::controller::{BatchOutcome, WorkflowSettings};
    use crate::poller::RetryPolicy;
    use crate::test_support::{status, MockBatchApi};
    use pretty_assertions::assert_eq;
    use std::io::Write;

    fn config_file() -> tempfile::NamedTempFile {
        let mut f = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            f,
            r#"{{"repository":"acme/app","runs":[{{"prompt":"one","title":"One"}},{{"prompt":"two"}}]}}"#
        )
        .unwrap();
        f
    }

    fn created(id: &str) -> RunCreated {
        RunCreated {
            id: id.into(),
            title: None,
            status: RunStatus::Queued,
        }
    }

    async fn wait_for_stage(rx: &mut UnboundedReceiver<WorkflowEvent>, stage: Stage) -> WorkflowSnapshot {
        while let Some(ev) = rx.recv().await {
            if let WorkflowEvent::Snapshot(s) = ev {
                if s.stage == stage {
                    return *s;
                }
            }
        }
        panic!("event channel closed before reaching {stage:?}");
    }

    async fn wait_for_finish(rx: &mut UnboundedReceiver<WorkflowEvent>) -> BatchResults {
        while let Some(ev) = rx.recv().await {
            if let WorkflowEvent::Finished(r) = ev {
                return *r;
            }
        }
        panic!("event channel closed before results");
    }

    struct Harness {
        api: Arc<MockBatchApi>,
        cmd_tx: UnboundedSender<UiCommand>,
        evt_rx: UnboundedReceiver<WorkflowEvent>,
        handle: tokio::task::JoinHandle<Result<()>>,
    }

    fn spawn(api: MockBatchApi, settings: WorkflowSettings) -> Harness {
        let api = Arc::new(api);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (evt_tx, evt_rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_workflow(
            Arc::clone(&api),
            WorkflowController::new(settings),
            evt_tx,
            cmd_rx,
        ));
        Harness {
            api,
            cmd_tx,
            evt_rx,
            handle,
        }
    }

    impl Harness {
        fn send(&self, cmd: Command) {
            self.cmd_tx.send(UiCommand::Workflow(cmd)).unwrap();
        }

        async fn load_and_submit(&mut self, path: &std::path::Path) {
            self.send(Command::SelectFiles);
            self.send(Command::LoadFiles(vec![path.to_path_buf()]));
            let review = wait_for_stage(&mut self.evt_rx, Stage::RunReview).await;
            assert_eq!(review.runs.len(), 2);
            self.send(Command::Submit);
        }

        async fn quit(self) {
            self.cmd_tx.send(UiCommand::Quit).unwrap();
            self.handle.await.unwrap().unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn end_to_end_completion() {
        let api = MockBatchApi::new();
        api.push_submit(Ok(BatchResponse {
            batch_id: "abc123".into(),
            successful: vec![created("r1"), created("r2")],
            failed: vec![],
        }));
        api.push_status(Ok(status(
            BatchState::Processing,
            Statistics {
                total: 2,
                processing: 2,
                ..Default::default()
            },
        )));
        api.push_status(Ok(status(
            BatchState::Completed,
            Statistics {
                total: 2,
                completed: 2,
                ..Default::default()
            },
        )));

        let file = config_file();
        let mut h = spawn(api, WorkflowSettings::default());
        h.load_and_submit(file.path()).await;

        let results = wait_for_finish(&mut h.evt_rx).await;
        assert_eq!(results.outcome, BatchOutcome::Completed);
        assert_eq!(results.batch_id.as_deref(), Some("abc123"));
        assert_eq!(results.statistics.map(|s| s.completed), Some(2));
        assert_eq!(h.api.status_calls(), 2);

        let sent = h.api.submitted_requests();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].runs[1].prompt, "two");
        assert!(sent[0].runs.iter().all(|r| r.file_hash.len() == 64));

        // No further polls once results are reached.
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(h.api.status_calls(), 2);
        h.quit().await;
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_with_poll_in_flight_ends_cancelled() {
        let api = MockBatchApi::new();
        api.push_submit(Ok(BatchResponse {
            batch_id: "abc123".into(),
            successful: vec![created("r1"), created("r2")],
            failed: vec![],
        }));
        // The first status call hangs long enough for the cancel to land first.
        api.push_status_delayed(
            Duration::from_secs(10),
            Ok(status(BatchState::Processing, Statistics::default())),
        );
        api.push_cancel(Ok(()));

        let file = config_file();
        let mut h = spawn(api, WorkflowSettings::default());
        h.load_and_submit(file.path()).await;
        wait_for_stage(&mut h.evt_rx, Stage::Monitoring).await;
        h.send(Command::CancelBatch);

        let results = wait_for_finish(&mut h.evt_rx).await;
        assert_eq!(results.outcome, BatchOutcome::Cancelled);
        assert_eq!(h.api.cancel_calls(), 1);

        // Let the hung poll resolve; it must not disturb the results.
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(h.api.status_calls(), 1);
        h.send(Command::BackToReview);
        let snap = wait_for_stage(&mut h.evt_rx, Stage::Results).await;
        assert_eq!(snap.results.map(|r| r.outcome), Some(BatchOutcome::Cancelled));
        h.quit().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failed_cancel_never_overlaps_status_calls() {
        let api = MockBatchApi::new();
        api.push_submit(Ok(BatchResponse {
            batch_id: "abc123".into(),
            successful: vec![created("r1"), created("r2")],
            failed: vec![],
        }));
        api.push_status_delayed(
            Duration::from_secs(10),
            Ok(status(BatchState::Processing, Statistics::default())),
        );
        api.push_status(Ok(status(
            BatchState::Completed,
            Statistics {
                total: 2,
                completed: 2,
                ..Default::default()
            },
        )));
        api.push_cancel(Err("HTTP 409".into()));

        let file = config_file();
        let mut h = spawn(api, WorkflowSettings::default());
        h.load_and_submit(file.path()).await;
        wait_for_stage(&mut h.evt_rx, Stage::Monitoring).await;
        h.send(Command::CancelBatch);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(h.api.cancel_calls(), 1);
        assert_eq!(h.api.status_calls(), 1);

        // The slow poll lands, then polling carries on to completion.
        let results = wait_for_finish(&mut h.evt_rx).await;
        assert_eq!(results.outcome, BatchOutcome::Completed);
        assert_eq!(h.api.status_calls(), 2);
        h.quit().await;
    }

    #[tokio::test(start_paused = true)]
    async fn submit_failure_reports_results_without_polling() {
        let api = MockBatchApi::new();
        api.push_submit(Err("HTTP 500".into()));

        let file = config_file();
        let mut h = spawn(
            api,
            WorkflowSettings {
                retry: RetryPolicy::halt_immediately(),
                ..Default::default()
            },
        );
        h.load_and_submit(file.path()).await;
        let results = wait_for_finish(&mut h.evt_rx).await;
        assert_eq!(results.outcome, BatchOutcome::SubmissionFailed);
        assert!(results.error.unwrap().contains("HTTP 500"));
        assert_eq!(h.api.status_calls(), 0);
        h.quit().await;
    }
}
