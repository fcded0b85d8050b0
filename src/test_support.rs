use crate::api::{ApiError, BatchApi};
use crate::model::{BatchRequest, BatchResponse, BatchState, BatchStatus, Statistics};
use reqwest::StatusCode;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

type Scripted<T> = Result<T, String>;

#[derive(Default)]
struct MockState {
    submits: VecDeque<Scripted<BatchResponse>>,
    statuses: VecDeque<(Duration, Scripted<BatchStatus>)>,
    cancels: VecDeque<Scripted<()>>,
    submitted: Vec<BatchRequest>,
    status_calls: usize,
    cancel_calls: usize,
}

/// Scripted `BatchApi` that records every call. Unscripted calls fail.
#[derive(Default)]
pub(crate) struct MockBatchApi {
    state: Mutex<MockState>,
}

fn scripted_error(message: String) -> ApiError {
    ApiError::Status {
        status: StatusCode::SERVICE_UNAVAILABLE,
        message,
    }
}

pub(crate) fn status(state: BatchState, stats: Statistics) -> BatchStatus {
    BatchStatus {
        status: state,
        statistics: stats,
        runs: Vec::new(),
    }
}

impl MockBatchApi {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poison| poison.into_inner())
    }

    pub(crate) fn push_submit(&self, r: Scripted<BatchResponse>) {
        self.lock().submits.push_back(r);
    }

    pub(crate) fn push_status(&self, r: Scripted<BatchStatus>) {
        self.lock().statuses.push_back((Duration::ZERO, r));
    }

    /// Status response that only resolves after `delay`.
    pub(crate) fn push_status_delayed(&self, delay: Duration, r: Scripted<BatchStatus>) {
        self.lock().statuses.push_back((delay, r));
    }

    pub(crate) fn push_cancel(&self, r: Scripted<()>) {
        self.lock().cancels.push_back(r);
    }

    pub(crate) fn submit_calls(&self) -> usize {
        self.lock().submitted.len()
    }

    pub(crate) fn submitted_requests(&self) -> Vec<BatchRequest> {
        self.lock().submitted.clone()
    }

    pub(crate) fn status_calls(&self) -> usize {
        self.lock().status_calls
    }

    pub(crate) fn cancel_calls(&self) -> usize {
        self.lock().cancel_calls
    }
}

impl BatchApi for MockBatchApi {
    async fn submit_batch(&self, request: BatchRequest) -> Result<BatchResponse, ApiError> {
        let next = {
            let mut st = self.lock();
            st.submitted.push(request);
            st.submits.pop_front()
        };
        next.unwrap_or_else(|| Err("no scripted submit response".into()))
            .map_err(scripted_error)
    }

    async fn batch_status(&self, _batch_id: &str) -> Result<BatchStatus, ApiError> {
        let (delay, next) = {
            let mut st = self.lock();
            st.status_calls += 1;
            st.statuses
                .pop_front()
                .unwrap_or((Duration::ZERO, Err("no scripted status response".into())))
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        next.map_err(scripted_error)
    }

    async fn cancel_batch(&self, _batch_id: &str) -> Result<(), ApiError> {
        let next = {
            let mut st = self.lock();
            st.cancel_calls += 1;
            st.cancels.pop_front()
        };
        next.unwrap_or(Ok(())).map_err(scripted_error)
    }
}
