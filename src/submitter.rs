//! Batch submission: build one atomic request from the selected runs, send it, and partition
//! the response back onto the pre-submission run definitions.

use crate::api::BatchApi;
use crate::collection::{content_hash, RunCollection};
use crate::error::PipelineError;
use crate::model::{
    BatchOptions, BatchRequest, BatchResponse, BulkConfig, RunDefinition, RunItem, RunStatus,
    RunType,
};
use serde::Serialize;
use std::collections::HashSet;

pub const DEFAULT_PARALLELISM: u32 = 5;

/// Batch-level fields that apply to every run in one submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchContext {
    pub repository: String,
    pub repo_id: Option<u64>,
    pub run_type: RunType,
    pub source_branch: Option<String>,
    pub batch_title: Option<String>,
    pub force: bool,
}

impl From<&BulkConfig> for BatchContext {
    fn from(cfg: &BulkConfig) -> Self {
        Self {
            repository: cfg.repository.clone(),
            repo_id: cfg.repo_id,
            run_type: cfg.run_type,
            source_branch: cfg.source.clone(),
            batch_title: cfg.batch_title.clone(),
            force: cfg.force,
        }
    }
}

/// A selected run captured at preparation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmittedRun {
    pub collection_index: usize,
    pub definition: RunDefinition,
    pub content_hash: String,
}

/// The request plus the snapshot needed to map the response back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedBatch {
    pub request: BatchRequest,
    pub submitted: Vec<SubmittedRun>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AcceptedRun {
    pub id: String,
    pub title: String,
    pub status: RunStatus,
    pub request_index: usize,
    pub collection_index: usize,
}

/// A rejected run with its title and target recovered from the pre-submission definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedRun {
    pub request_index: usize,
    pub collection_index: usize,
    pub title: String,
    pub target: Option<String>,
    pub prompt: String,
    pub message: String,
    pub existing_run_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmissionOutcome {
    pub batch_id: String,
    pub successful: Vec<AcceptedRun>,
    pub failed: Vec<FailedRun>,
}

/// Build the request from the selected runs, in collection order.
///
/// The ordinal fed into each content hash is the run's position among the selected runs.
pub fn prepare_batch(
    collection: &RunCollection,
    ctx: &BatchContext,
    parallel: u32,
) -> Result<PreparedBatch, PipelineError> {
    if ctx.repository.trim().is_empty() {
        return Err(PipelineError::Validation("repository is required".into()));
    }
    if collection.selected_count() == 0 {
        return Err(PipelineError::no_runs_selected());
    }

    let mut submitted = Vec::new();
    let mut items = Vec::new();
    for (ordinal, (collection_index, run)) in collection.selected().enumerate() {
        if run.prompt.trim().is_empty() {
            return Err(PipelineError::Validation(format!(
                "run {} is missing a prompt",
                collection_index + 1
            )));
        }
        let hash = content_hash(&ctx.repository, run, ordinal);
        items.push(RunItem {
            prompt: run.prompt.clone(),
            title: run.title.clone(),
            target: run.target.clone(),
            context: run.context.clone(),
            file_hash: hash.clone(),
        });
        submitted.push(SubmittedRun {
            collection_index,
            definition: run.clone(),
            content_hash: hash,
        });
    }

    let request = BatchRequest {
        repository_name: ctx.repository.clone(),
        repo_id: ctx.repo_id,
        run_type: ctx.run_type,
        source_branch: ctx.source_branch.clone(),
        batch_title: ctx.batch_title.clone(),
        force: ctx.force,
        runs: items,
        options: BatchOptions {
            parallel: parallel.max(1),
        },
    };
    Ok(PreparedBatch { request, submitted })
}

/// Partition a submit response onto the prepared runs.
///
/// Successful entries carry no request index; they fill the non-failed request positions
/// in ascending order.
pub fn reconcile(
    prepared: &PreparedBatch,
    response: BatchResponse,
) -> Result<SubmissionOutcome, PipelineError> {
    let count = prepared.submitted.len();
    if response.batch_id.trim().is_empty() {
        return Err(PipelineError::Submission("response carried no batch ID".into()));
    }
    if response.successful.len() + response.failed.len() != count {
        return Err(PipelineError::Submission(format!(
            "response accounts for {} of {} runs",
            response.successful.len() + response.failed.len(),
            count
        )));
    }

    let mut failed_indices = HashSet::new();
    let mut failed = Vec::with_capacity(response.failed.len());
    for f in response.failed {
        if f.request_index >= count || !failed_indices.insert(f.request_index) {
            return Err(PipelineError::Submission(format!(
                "invalid failure index {} for {} runs",
                f.request_index, count
            )));
        }
        let source = &prepared.submitted[f.request_index];
        failed.push(FailedRun {
            request_index: f.request_index,
            collection_index: source.collection_index,
            title: source.definition.display_title(),
            target: source.definition.target.clone(),
            prompt: if f.prompt.is_empty() {
                source.definition.prompt.clone()
            } else {
                f.prompt
            },
            message: f.message,
            existing_run_id: f.existing_run_id,
        });
    }
    failed.sort_by_key(|f| f.request_index);

    let open_slots = (0..count).filter(|i| !failed_indices.contains(i));
    let successful = response
        .successful
        .into_iter()
        .zip(open_slots)
        .map(|(created, request_index)| {
            let source = &prepared.submitted[request_index];
            AcceptedRun {
                title: created
                    .title
                    .filter(|t| !t.trim().is_empty())
                    .unwrap_or_else(|| source.definition.display_title()),
                id: created.id,
                status: created.status,
                request_index,
                collection_index: source.collection_index,
            }
        })
        .collect();

    Ok(SubmissionOutcome {
        batch_id: response.batch_id,
        successful,
        failed,
    })
}

/// Issue the single submit call for a prepared batch.
pub async fn submit<A: BatchApi>(
    api: &A,
    prepared: &PreparedBatch,
) -> Result<SubmissionOutcome, PipelineError> {
    tracing::info!(
        repository = %prepared.request.repository_name,
        runs = prepared.submitted.len(),
        force = prepared.request.force,
        "submitting batch"
    );
    let response = api
        .submit_batch(prepared.request.clone())
        .await
        .map_err(|e| PipelineError::Submission(e.to_string()))?;
    let outcome = reconcile(prepared, response)?;
    tracing::info!(
        batch_id = %outcome.batch_id,
        accepted = outcome.successful.len(),
        rejected = outcome.failed.len(),
        "batch accepted"
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RunCreated, RunFailure};
    use crate::test_support::MockBatchApi;
    use pretty_assertions::assert_eq;

    fn ctx() -> BatchContext {
        BatchContext {
            repository: "acme/app".into(),
            repo_id: Some(3),
            run_type: RunType::Run,
            source_branch: Some("main".into()),
            batch_title: Some("b".into()),
            force: false,
        }
    }

    fn runs() -> RunCollection {
        RunCollection::from_runs(vec![
            RunDefinition::new("p0").with_title("Zero"),
            RunDefinition::new("p1").with_title("One").with_target("t/one"),
            RunDefinition::new("p2").with_title("Two"),
            RunDefinition::new("p3").with_title("Three"),
        ])
    }

    fn created(id: &str) -> RunCreated {
        RunCreated {
            id: id.into(),
            title: None,
            status: RunStatus::Queued,
        }
    }

    #[test]
    fn prepare_uses_selected_runs_in_order() {
        let mut c = runs();
        c.toggle_selection(0);
        let p = prepare_batch(&c, &ctx(), 5).unwrap();
        let prompts: Vec<_> = p.request.runs.iter().map(|r| r.prompt.as_str()).collect();
        assert_eq!(prompts, vec!["p1", "p2", "p3"]);
        let idx: Vec<_> = p.submitted.iter().map(|s| s.collection_index).collect();
        assert_eq!(idx, vec![1, 2, 3]);
        assert_eq!(p.request.options.parallel, 5);
        assert_eq!(p.request.repo_id, Some(3));
    }

    #[test]
    fn hash_ordinal_follows_selected_subset() {
        let all = prepare_batch(&runs(), &ctx(), 5).unwrap();
        let mut c = runs();
        c.toggle_selection(0);
        let subset = prepare_batch(&c, &ctx(), 5).unwrap();
        // "p1" moves from ordinal 1 to ordinal 0 once "p0" is deselected.
        assert_ne!(all.request.runs[1].file_hash, subset.request.runs[0].file_hash);
        assert_eq!(
            subset.request.runs[0].file_hash,
            content_hash("acme/app", c.get(1).unwrap(), 0)
        );
    }

    #[test]
    fn nothing_selected_is_a_validation_error() {
        let mut c = runs();
        c.toggle_select_all();
        let err = prepare_batch(&c, &ctx(), 5).unwrap_err();
        assert_eq!(err, PipelineError::no_runs_selected());
    }

    #[test]
    fn reconcile_recovers_failed_titles_by_request_index() {
        let mut c = runs();
        c.toggle_selection(3);
        let p = prepare_batch(&c, &ctx(), 5).unwrap();
        let out = reconcile(
            &p,
            BatchResponse {
                batch_id: "abc123".into(),
                successful: vec![created("r0"), created("r2")],
                failed: vec![RunFailure {
                    request_index: 1,
                    prompt: "p1".into(),
                    message: "duplicate run".into(),
                    existing_run_id: Some("r-old".into()),
                }],
            },
        )
        .unwrap();
        assert_eq!(out.failed[0].title, "One");
        assert_eq!(out.failed[0].target.as_deref(), Some("t/one"));
        assert_eq!(out.failed[0].existing_run_id.as_deref(), Some("r-old"));
        let slots: Vec<_> = out
            .successful
            .iter()
            .map(|s| (s.id.as_str(), s.request_index, s.title.as_str()))
            .collect();
        assert_eq!(slots, vec![("r0", 0, "Zero"), ("r2", 2, "Two")]);
    }

    #[test]
    fn reconcile_rejects_inconsistent_responses() {
        let p = prepare_batch(&runs(), &ctx(), 5).unwrap();
        let short = BatchResponse {
            batch_id: "b".into(),
            successful: vec![created("a")],
            failed: vec![],
        };
        assert!(matches!(reconcile(&p, short), Err(PipelineError::Submission(_))));

        let failure = |i| RunFailure {
            request_index: i,
            prompt: String::new(),
            message: "x".into(),
            existing_run_id: None,
        };
        let dup = BatchResponse {
            batch_id: "b".into(),
            successful: vec![created("a"), created("b")],
            failed: vec![failure(1), failure(1)],
        };
        assert!(reconcile(&p, dup).is_err());

        let out_of_range = BatchResponse {
            batch_id: "b".into(),
            successful: vec![created("a"), created("b"), created("c")],
            failed: vec![failure(4)],
        };
        assert!(reconcile(&p, out_of_range).is_err());
    }

    #[tokio::test]
    async fn submit_makes_exactly_one_call() {
        let api = MockBatchApi::new();
        api.push_submit(Ok(BatchResponse {
            batch_id: "abc123".into(),
            successful: vec![created("1"), created("2"), created("3"), created("4")],
            failed: vec![],
        }));
        let p = prepare_batch(&runs(), &ctx(), 5).unwrap();
        let out = submit(&api, &p).await.unwrap();
        assert_eq!(out.batch_id, "abc123");
        assert_eq!(api.submit_calls(), 1);
        assert_eq!(api.submitted_requests()[0], p.request);
    }

    #[tokio::test]
    async fn transport_failure_is_a_submission_error() {
        let api = MockBatchApi::new();
        api.push_submit(Err("connection refused".into()));
        let p = prepare_batch(&runs(), &ctx(), 5).unwrap();
        let err = submit(&api, &p).await.unwrap_err();
        assert!(matches!(err, PipelineError::Submission(_)));
    }
}
