//! Batch status polling.
//!
//! `StatusPoller` is the per-batch state machine (`NotStarted → Polling → Terminal`). It never
//! performs I/O itself: it hands out `PollRequest`s that the runtime executes with
//! [`poll_once`], and consumes their results one at a time. Each request carries a sequence
//! number, so a result is only accepted if it answers the request currently outstanding.

use crate::api::{ApiError, BatchApi};
use crate::error::PipelineError;
use crate::model::{BatchState, BatchStatus};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Bounded exponential backoff for transient poll failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Consecutive failures tolerated before monitoring halts. Zero halts on the first one.
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn halt_immediately() -> Self {
        Self {
            max_retries: 0,
            base_delay: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(2u32.saturating_pow(exponent))
            .min(MAX_RETRY_DELAY)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: DEFAULT_POLL_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalOutcome {
    Completed,
    Failed,
    Cancelled,
}

impl TerminalOutcome {
    pub fn from_state(state: BatchState) -> Option<Self> {
        match state {
            BatchState::Completed => Some(TerminalOutcome::Completed),
            BatchState::Failed => Some(TerminalOutcome::Failed),
            BatchState::Cancelled => Some(TerminalOutcome::Cancelled),
            BatchState::Queued | BatchState::Processing | BatchState::Unknown => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollPhase {
    NotStarted,
    Polling,
    /// Ended by cancel, navigation, or an exhausted retry budget.
    Stopped,
    Terminal(TerminalOutcome),
}

/// One scheduled status call.
#[derive(Debug, Clone)]
pub struct PollRequest {
    pub batch_id: String,
    pub seq: u64,
    pub delay: Duration,
    pub token: CancellationToken,
}

#[derive(Debug)]
pub enum PollDecision {
    /// Stale or unexpected result; nothing changes.
    Ignored,
    /// Non-terminal snapshot; the next poll is scheduled.
    Continue {
        status: BatchStatus,
        next: PollRequest,
    },
    /// Transient failure within the retry budget.
    Retry {
        error: PipelineError,
        attempt: u32,
        next: PollRequest,
    },
    /// Result accepted while held; the next poll waits for [`StatusPoller::release`].
    Held(Result<BatchStatus, PipelineError>),
    Terminal {
        outcome: TerminalOutcome,
        status: BatchStatus,
    },
    Halted(PipelineError),
}

#[derive(Debug)]
pub struct StatusPoller {
    batch_id: String,
    interval: Duration,
    retry: RetryPolicy,
    phase: PollPhase,
    token: CancellationToken,
    next_seq: u64,
    awaiting: Option<u64>,
    consecutive_failures: u32,
    held: bool,
    /// Delay owed to the poll that was withheld while held.
    deferred: Option<Duration>,
}

impl StatusPoller {
    pub fn new(batch_id: impl Into<String>, interval: Duration, retry: RetryPolicy) -> Self {
        Self {
            batch_id: batch_id.into(),
            interval,
            retry,
            phase: PollPhase::NotStarted,
            token: CancellationToken::new(),
            next_seq: 0,
            awaiting: None,
            consecutive_failures: 0,
            held: false,
            deferred: None,
        }
    }

    pub fn phase(&self) -> PollPhase {
        self.phase
    }

    pub fn in_flight(&self) -> bool {
        self.awaiting.is_some()
    }

    fn schedule(&mut self, delay: Duration) -> PollRequest {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.awaiting = Some(seq);
        PollRequest {
            batch_id: self.batch_id.clone(),
            seq,
            delay,
            token: self.token.clone(),
        }
    }

    /// Schedule the next poll, or park its delay while held.
    fn follow_up(&mut self, delay: Duration) -> Option<PollRequest> {
        if self.held {
            self.deferred = Some(delay);
            None
        } else {
            Some(self.schedule(delay))
        }
    }

    /// First poll fires immediately.
    pub fn start(&mut self) -> Option<PollRequest> {
        if self.phase != PollPhase::NotStarted {
            return None;
        }
        self.phase = PollPhase::Polling;
        Some(self.schedule(Duration::ZERO))
    }

    /// Stop scheduling polls for good. An in-flight call finishes but its result is ignored.
    pub fn stop(&mut self) {
        self.token.cancel();
        self.awaiting = None;
        self.held = false;
        self.deferred = None;
        if matches!(self.phase, PollPhase::NotStarted | PollPhase::Polling) {
            self.phase = PollPhase::Stopped;
        }
    }

    /// Keep consuming the outstanding result but schedule nothing after it.
    pub fn hold(&mut self) {
        if self.phase == PollPhase::Polling {
            self.held = true;
        }
    }

    /// Lift a hold. Returns the withheld poll, or `None` while the previous call is still out.
    pub fn release(&mut self) -> Option<PollRequest> {
        if !self.held {
            return None;
        }
        self.held = false;
        if self.phase != PollPhase::Polling || self.in_flight() {
            return None;
        }
        let delay = self.deferred.take().unwrap_or(Duration::ZERO);
        Some(self.schedule(delay))
    }

    pub fn on_result(&mut self, seq: u64, result: Result<BatchStatus, PipelineError>) -> PollDecision {
        if self.phase != PollPhase::Polling || self.awaiting != Some(seq) {
            return PollDecision::Ignored;
        }
        self.awaiting = None;

        match result {
            Ok(status) => {
                self.consecutive_failures = 0;
                if let Some(outcome) = TerminalOutcome::from_state(status.status) {
                    self.phase = PollPhase::Terminal(outcome);
                    self.held = false;
                    return PollDecision::Terminal { outcome, status };
                }
                match self.follow_up(self.interval) {
                    Some(next) => PollDecision::Continue { status, next },
                    None => PollDecision::Held(Ok(status)),
                }
            }
            Err(error) => {
                self.consecutive_failures += 1;
                if self.consecutive_failures > self.retry.max_retries {
                    self.token.cancel();
                    self.phase = PollPhase::Stopped;
                    self.held = false;
                    return PollDecision::Halted(error);
                }
                let attempt = self.consecutive_failures;
                match self.follow_up(self.retry.delay(attempt)) {
                    Some(next) => PollDecision::Retry {
                        error,
                        attempt,
                        next,
                    },
                    None => PollDecision::Held(Err(error)),
                }
            }
        }
    }
}

/// Execute one scheduled poll.
///
/// Returns `None` when the token is cancelled before the call goes out. Once the call is
/// issued it runs to completion; cancellation does not abort it.
pub async fn poll_once<A: BatchApi>(
    api: &A,
    request: &PollRequest,
) -> Option<Result<BatchStatus, ApiError>> {
    if !request.delay.is_zero() {
        tokio::select! {
            _ = request.token.cancelled() => return None,
            _ = tokio::time::sleep(request.delay) => {}
        }
    }
    if request.token.is_cancelled() {
        return None;
    }
    tracing::debug!(batch_id = %request.batch_id, seq = request.seq, "polling batch status");
    Some(api.batch_status(&request.batch_id).await)
}
