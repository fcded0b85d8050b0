//! Error taxonomy for the bulk-run pipeline.
//!
//! Every variant is recoverable: background tasks deliver these as typed events and the
//! workflow controller decides the resulting transition.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// Config file missing, unreadable, or not parseable.
    #[error("failed to load config: {0}")]
    ConfigLoad(String),

    /// Submission blocked before any network call.
    #[error("{0}")]
    Validation(String),

    /// The submit call failed as a whole; no batch was created.
    #[error("submission failed: {0}")]
    Submission(String),

    /// A status poll failed while monitoring.
    #[error("status poll failed: {0}")]
    Polling(String),

    /// The cancel call was rejected or could not be delivered.
    #[error("cancel failed: {0}")]
    Cancellation(String),
}

impl PipelineError {
    pub fn no_runs_selected() -> Self {
        PipelineError::Validation("no runs selected".into())
    }

    /// Short class label used in logs and the results view.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::ConfigLoad(_) => "config",
            PipelineError::Validation(_) => "validation",
            PipelineError::Submission(_) => "submission",
            PipelineError::Polling(_) => "polling",
            PipelineError::Cancellation(_) => "cancellation",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_message_is_shown_verbatim() {
        let err = PipelineError::no_runs_selected();
        assert_eq!(err.to_string(), "no runs selected");
        assert_eq!(err.kind(), "validation");
    }

    #[test]
    fn submission_error_is_prefixed() {
        let err = PipelineError::Submission("HTTP 500".into());
        assert_eq!(err.to_string(), "submission failed: HTTP 500");
    }
}
