//! JSON-over-HTTP collaborator client.
//!
//! One client can serve any collaborator role; each role posts to its own
//! path under the base URL (`/fetch`, `/classify`, `/rewrite`, `/assemble`,
//! `/evaluate`, `/optimize`).
//!
//! | Response | ProviderError |
//! |----------|---------------|
//! | timeout, connect failure, 5xx | `Transient` |
//! | 429 (optional `Retry-After` seconds) | `RateLimited` |
//! | other 4xx, undecodable body | `Permanent` |

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::debug;

use pressroom_core::{ProcessedItem, RawItem};
use pressroom_resilience::ProviderError;

use crate::collaborators::{
    AssembledOutput, Assembler, Classification, Classifier, EvaluationReport, Evaluator,
    FetchRequest, Fetcher, OptimizationOutcome, Optimizer, RewriteOutput, Rewriter,
};

#[derive(Debug, Clone)]
pub struct HttpCollaborator {
    name: String,
    base_url: String,
    client: reqwest::Client,
}

impl HttpCollaborator {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    async fn post<B, T>(&self, path: &str, body: &B) -> Result<T, ProviderError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        debug!(provider = %self.name, %url, "calling collaborator");

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let err = map_status(status, response.headers());
            debug!(provider = %self.name, status = status.as_u16(), error = %err, "collaborator error");
            return Err(err);
        }

        response
            .json::<T>()
            .await
            .map_err(|e| ProviderError::permanent(format!("malformed response from {}: {e}", self.name)))
    }
}

pub(crate) fn map_status(status: StatusCode, headers: &HeaderMap) -> ProviderError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = headers
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        return ProviderError::RateLimited { retry_after };
    }
    if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        return ProviderError::transient(format!("server returned {status}"));
    }
    ProviderError::permanent(format!("request rejected with {status}"))
}

fn map_transport_error(err: reqwest::Error) -> ProviderError {
    if err.is_builder() {
        return ProviderError::permanent(format!("invalid request: {err}"));
    }
    // Timeouts, refused connections, resets.
    ProviderError::transient(err.to_string())
}

#[async_trait]
impl Fetcher for HttpCollaborator {
    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<RawItem>, ProviderError> {
        self.post("/fetch", request).await
    }
}

#[async_trait]
impl Classifier for HttpCollaborator {
    async fn classify(&self, item: &ProcessedItem) -> Result<Classification, ProviderError> {
        self.post("/classify", &json!({ "item": item })).await
    }
}

#[async_trait]
impl Rewriter for HttpCollaborator {
    async fn rewrite(
        &self,
        item: &ProcessedItem,
        views: &[String],
    ) -> Result<RewriteOutput, ProviderError> {
        self.post("/rewrite", &json!({ "item": item, "views": views }))
            .await
    }
}

#[async_trait]
impl Assembler for HttpCollaborator {
    async fn assemble(&self, items: &[ProcessedItem]) -> Result<AssembledOutput, ProviderError> {
        self.post("/assemble", &json!({ "items": items })).await
    }
}

#[async_trait]
impl Evaluator for HttpCollaborator {
    async fn evaluate(&self, output: &AssembledOutput) -> Result<EvaluationReport, ProviderError> {
        self.post("/evaluate", &json!({ "output": output })).await
    }
}

#[async_trait]
impl Optimizer for HttpCollaborator {
    async fn optimize(
        &self,
        output: &AssembledOutput,
        evaluation: Option<&EvaluationReport>,
    ) -> Result<OptimizationOutcome, ProviderError> {
        self.post("/optimize", &json!({ "output": output, "evaluation": evaluation }))
            .await
    }
}
