//! Completion callbacks
//!
//! A job may name a `callback_url`. Once its delivery is acked or
//! dead-lettered the pool POSTs the processing result there. Nothing is sent
//! for a delivery that will be retried. Delivery failures are logged and never
//! change the job's outcome.

use crate::error::{IndexingError, IndexingResult};
use crate::result::ProcessingResult;
use repoctx_common::redact_url_credentials;
use repoctx_data::{ClaimedJob, JobSpec};
use serde::Serialize;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Serialize)]
struct CallbackBody<'a> {
    message_id: Uuid,
    job_type: &'a str,
    attempt_count: u32,
    result: &'a ProcessingResult,
}

/// HTTP client for completion callbacks
#[derive(Debug, Clone)]
pub struct CompletionCallback {
    client: reqwest::Client,
}

impl CompletionCallback {
    /// # Errors
    /// Returns `IndexingError::Configuration` if the HTTP client cannot be built
    pub fn new(timeout: Duration) -> IndexingResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("repoctx/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                IndexingError::Configuration(format!("failed to build callback client: {e}"))
            })?;
        Ok(Self { client })
    }

    /// Callback URL of a delivery whose payload validates
    pub fn url_for(job: &ClaimedJob) -> Option<String> {
        JobSpec::from_value(&job.payload)
            .ok()
            .and_then(|spec| spec.callback_url)
    }

    /// POST `result` to `url`, logging instead of failing
    pub async fn notify(&self, url: &str, job: &ClaimedJob, result: &ProcessingResult) {
        let body = CallbackBody {
            message_id: job.message_id,
            job_type: &job.job_type,
            attempt_count: job.attempt_count,
            result,
        };
        let target = redact_url_credentials(url);

        let sent = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status);
        match sent {
            Ok(response) => tracing::info!(
                message_id = %job.message_id,
                callback = %target,
                status = response.status().as_u16(),
                "Completion callback delivered"
            ),
            Err(e) => tracing::error!(
                message_id = %job.message_id,
                callback = %target,
                error = %redact_url_credentials(&e.to_string()),
                "Completion callback failed"
            ),
        }
    }
}
