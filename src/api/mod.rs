//! Remote run-service API.
//!
//! `BatchApi` is the seam between the pipeline and the network: the HTTP client implements
//! it for real use and tests substitute a scripted double.

mod client;

pub use client::{parse_error_message, ApiConfig, HttpBatchApi};

use crate::model::{BatchRequest, BatchResponse, BatchStatus};
use reqwest::StatusCode;
use std::future::Future;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(String),

    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("HTTP {status} {message}")]
    Status { status: StatusCode, message: String },

    #[error("unexpected response body: {0}")]
    Decode(#[from] serde_json::Error),
}

/// The three calls the bulk pipeline makes against the run service.
pub trait BatchApi: Send + Sync + 'static {
    fn submit_batch(
        &self,
        request: BatchRequest,
    ) -> impl Future<Output = Result<BatchResponse, ApiError>> + Send;

    fn batch_status(
        &self,
        batch_id: &str,
    ) -> impl Future<Output = Result<BatchStatus, ApiError>> + Send;

    fn cancel_batch(&self, batch_id: &str) -> impl Future<Output = Result<(), ApiError>> + Send;
}
