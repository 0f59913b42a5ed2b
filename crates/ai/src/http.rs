//! HTTP client for a remote feedback generator service.

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::debug;

use crate::generator::{FeedbackGenerator, GenerationRequest};
use crate::result::{Feedback, GenerationError};

/// Calls `POST {endpoint}` with the [`GenerationRequest`] as JSON and expects a
/// [`Feedback`] JSON body back.
///
/// No client-side timeout is set here: the processor owns the overall
/// deadline for an attempt.
#[derive(Debug, Clone)]
pub struct HttpFeedbackGenerator {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpFeedbackGenerator {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key: None,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }
}

#[async_trait]
impl FeedbackGenerator for HttpFeedbackGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<Feedback, GenerationError> {
        let mut call = self.client.post(&self.endpoint).json(request);
        if let Some(key) = &self.api_key {
            call = call.bearer_auth(key);
        }

        let res = call
            .send()
            .await
            .map_err(|e| GenerationError::Unavailable(e.to_string()))?;

        let status = res.status();
        debug!(job_id = %request.job_id, status = %status, "generator responded");

        match status {
            s if s.is_success() => res
                .json::<Feedback>()
                .await
                .map_err(|e| GenerationError::Failed(format!("invalid generator response: {e}"))),
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                let body = res.text().await.unwrap_or_default();
                Err(GenerationError::InvalidInput(body))
            }
            s if s.is_server_error() || s == StatusCode::TOO_MANY_REQUESTS => Err(
                GenerationError::Unavailable(format!("generator returned {s}")),
            ),
            s => Err(GenerationError::Failed(format!("generator returned {s}"))),
        }
    }
}
