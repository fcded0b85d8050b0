//! Text summary builder for CLI output.
//!
//! Formats human-readable lines for text mode.

use crate::model::Statistics;
use crate::orchestrator::{BatchOutcome, BatchResults};

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    pub lines: Vec<String>,
}

pub(crate) fn outcome_label(outcome: BatchOutcome) -> &'static str {
    match outcome {
        BatchOutcome::Completed => "completed",
        BatchOutcome::Failed => "failed",
        BatchOutcome::Cancelled => "cancelled",
        BatchOutcome::SubmissionFailed => "submission failed",
        BatchOutcome::MonitoringHalted => "monitoring halted",
    }
}

/// One-line progress view of batch statistics.
pub(crate) fn statistics_line(stats: &Statistics) -> String {
    format!(
        "{}/{} finished (queued {}, processing {}, completed {}, failed {}, cancelled {})",
        stats.finished(),
        stats.total,
        stats.queued,
        stats.processing,
        stats.completed,
        stats.failed,
        stats.cancelled
    )
}

pub(crate) fn build_text_summary(results: &BatchResults) -> TextSummary {
    let mut lines = Vec::new();

    lines.push(format!("Repository: {}", results.repository));
    match results.batch_id.as_deref() {
        Some(id) => lines.push(format!("Batch: {id} ({})", outcome_label(results.outcome))),
        None => lines.push(format!("Batch: - ({})", outcome_label(results.outcome))),
    }
    if let Some(err) = results.error.as_deref() {
        lines.push(format!("Error: {err}"));
    }
    if results.batch_id.is_some() {
        lines.push(format!(
            "Submitted: {}  accepted: {}  rejected: {}",
            results.submitted,
            results.successful.len(),
            results.failed.len()
        ));
    }
    if let Some(stats) = results.statistics.as_ref() {
        lines.push(format!("Runs: {}", statistics_line(stats)));
    }

    for run in &results.successful {
        let status = results
            .runs
            .iter()
            .find(|r| r.id == run.id)
            .map(|r| r.status)
            .unwrap_or(run.status);
        lines.push(format!("  ok    {}  {}  [{}]", run.id, run.title, status.label()));
    }
    for run in &results.failed {
        let mut line = format!("  fail  {}: {}", run.title, run.message);
        if let Some(target) = run.target.as_deref() {
            line.push_str(&format!(" (target {target})"));
        }
        if let Some(existing) = run.existing_run_id.as_deref() {
            line.push_str(&format!(" (existing run {existing})"));
        }
        lines.push(line);
    }

    TextSummary { lines }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RunStatus, RunStatusItem};
    use crate::submitter::{AcceptedRun, FailedRun};
    use pretty_assertions::assert_eq;

    #[test]
    fn summary_lists_accepted_and_rejected_runs() {
        let results = BatchResults {
            batch_id: Some("abc123".into()),
            outcome: BatchOutcome::Completed,
            repository: "acme/app".into(),
            submitted: 2,
            successful: vec![AcceptedRun {
                id: "r1".into(),
                title: "One".into(),
                status: RunStatus::Queued,
                request_index: 0,
                collection_index: 0,
            }],
            failed: vec![FailedRun {
                request_index: 1,
                collection_index: 1,
                title: "Two".into(),
                target: Some("fix/two".into()),
                prompt: "two".into(),
                message: "duplicate".into(),
                existing_run_id: Some("old-7".into()),
            }],
            statistics: Some(Statistics {
                total: 1,
                completed: 1,
                ..Default::default()
            }),
            runs: vec![RunStatusItem {
                id: "r1".into(),
                title: None,
                status: RunStatus::Completed,
                message: None,
            }],
            error: None,
        };
        let summary = build_text_summary(&results);
        assert_eq!(
            summary.lines,
            vec![
                "Repository: acme/app".to_string(),
                "Batch: abc123 (completed)".into(),
                "Submitted: 2  accepted: 1  rejected: 1".into(),
                "Runs: 1/1 finished (queued 0, processing 0, completed 1, failed 0, cancelled 0)".into(),
                "  ok    r1  One  [completed]".into(),
                "  fail  Two: duplicate (target fix/two) (existing run old-7)".into(),
            ]
        );
    }

    #[test]
    fn submission_failure_shows_only_the_error() {
        let results = BatchResults {
            batch_id: None,
            outcome: BatchOutcome::SubmissionFailed,
            repository: "acme/app".into(),
            submitted: 3,
            successful: vec![],
            failed: vec![],
            statistics: None,
            runs: vec![],
            error: Some("submission failed: HTTP 401".into()),
        };
        let summary = build_text_summary(&results);
        assert_eq!(summary.lines.len(), 3);
        assert_eq!(summary.lines[1], "Batch: - (submission failed)");
    }
}
