//! HTTP job service - reference REST collaborator
//!
//! Speaks a Databricks-style jobs API:
//! - `POST {base}/api/2.0/jobs/submit`       → `{"job_id": "..."}`
//! - `GET  {base}/api/2.0/jobs/{id}`         → `{"status": "...", "detail": "..."}`
//! - `POST {base}/api/2.0/jobs/{id}/cancel`
//!
//! The endpoint must be an http(s) URL with a host; authentication is an
//! optional bearer token. Everything else about the remote system stays
//! behind the `JobService` trait.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

use super::{JobId, JobRequest, JobService, JobStatus};
use crate::error::{Result, WeirError};

/// Default timeout for a single HTTP request
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// REST implementation of the external job collaborator
#[derive(Debug)]
pub struct HttpJobService {
    client: reqwest::Client,
    /// Validated base URL without trailing slash
    base_url: String,
    name: String,
    bearer_token: Option<String>,
}

impl HttpJobService {
    /// Create a service pointing at `base_url`.
    ///
    /// Fails with `InvalidEndpoint` for non-http(s) schemes or host-less
    /// URLs.
    pub fn new(base_url: &str) -> Result<Self> {
        let parsed = Url::parse(base_url).map_err(|e| WeirError::InvalidEndpoint {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;

        match parsed.scheme() {
            "http" | "https" => {}
            scheme => {
                return Err(WeirError::InvalidEndpoint {
                    url: base_url.to_string(),
                    reason: format!("scheme '{scheme}' not allowed"),
                })
            }
        }

        if parsed.host_str().is_none() {
            return Err(WeirError::InvalidEndpoint {
                url: base_url.to_string(),
                reason: "URL has no host".to_string(),
            });
        }

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(Duration::from_secs(10))
            .redirect(reqwest::redirect::Policy::limited(5))
            .user_agent(concat!("weir/", env!("CARGO_PKG_VERSION")))
            .build()
            .expect("Failed to build HTTP client");

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            name: "http".to_string(),
            bearer_token: None,
        })
    }

    /// Override the diagnostic service name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Authenticate requests with a bearer token
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.bearer_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

/// Submit response payload
#[derive(Debug, Deserialize)]
struct SubmitResponse {
    job_id: String,
}

/// Remote status values the API may report
#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum RemoteStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Error,
}

/// Status response payload
#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: RemoteStatus,
    #[serde(default)]
    detail: Option<String>,
}

impl StatusResponse {
    fn into_status(self) -> JobStatus {
        match self.status {
            RemoteStatus::Pending | RemoteStatus::Running => JobStatus::Running,
            RemoteStatus::Succeeded => JobStatus::Succeeded,
            RemoteStatus::Failed | RemoteStatus::Error => JobStatus::Failed {
                reason: self
                    .detail
                    .unwrap_or_else(|| "external system reported failure".to_string()),
            },
        }
    }
}

#[async_trait]
impl JobService for HttpJobService {
    fn name(&self) -> &str {
        &self.name
    }

    async fn submit(&self, request: &JobRequest) -> Result<JobId> {
        let url = format!("{}/api/2.0/jobs/submit", self.base_url);

        let response = self
            .authorize(self.client.post(&url).json(request))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| WeirError::JobSubmit {
                service: self.name.clone(),
                reason: e.to_string(),
            })?;

        let body: SubmitResponse =
            response.json().await.map_err(|e| WeirError::JobSubmit {
                service: self.name.clone(),
                reason: format!("malformed submit response: {e}"),
            })?;

        Ok(JobId::new(body.job_id))
    }

    async fn poll(&self, job_id: &JobId) -> Result<JobStatus> {
        let url = format!("{}/api/2.0/jobs/{}", self.base_url, job_id);

        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| WeirError::ExternalJob {
                job_id: job_id.to_string(),
                detail: format!("status query failed: {e}"),
            })?;

        let body: StatusResponse =
            response.json().await.map_err(|e| WeirError::ExternalJob {
                job_id: job_id.to_string(),
                detail: format!("malformed status response: {e}"),
            })?;

        Ok(body.into_status())
    }

    async fn cancel(&self, job_id: &JobId) -> Result<()> {
        let url = format!("{}/api/2.0/jobs/{}/cancel", self.base_url, job_id);

        self.authorize(self.client.post(&url))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| WeirError::ExternalJob {
                job_id: job_id.to_string(),
                detail: format!("cancel request failed: {e}"),
            })?;

        Ok(())
    }
}
