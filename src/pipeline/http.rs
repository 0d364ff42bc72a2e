use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::de::DeserializeOwned;
use serde_json::json;
use uuid::Uuid;

use super::services::{
    AssetService, Assets, Configuration, ConfigurationProvider, Content, GenerationParams,
    GenerationService, Published, PublishingService, Structure,
};
use crate::error::JobError;
use crate::redact;

/// Collaborators reached through one HTTP gateway.
/// Endpoints: `POST /structure`, `/content`, `/assets`, `/publish`, `GET /configurations/{id}`.
pub struct HttpServices {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpServices {
    pub fn new(
        base_url: &str,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, JobError> {
        self.send(self.client.post(self.url(path)).json(body)).await
    }

    async fn send<T: DeserializeOwned>(&self, req: reqwest::RequestBuilder) -> Result<T, JobError> {
        let req = match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        };

        let resp = req.send().await.map_err(classify_transport)?;
        let status = resp.status();

        if status.is_success() {
            return resp
                .json::<T>()
                .await
                .map_err(|e| JobError::Validation(format!("Malformed service response: {e}")));
        }

        let retry_after = retry_after(resp.headers());
        let body = resp
            .text()
            .await
            .unwrap_or_default()
            .chars()
            .take(512)
            .collect::<String>();

        Err(classify_status(status, retry_after, &redact::redact_text(&body)))
    }
}

fn classify_transport(err: reqwest::Error) -> JobError {
    if err.is_timeout() || err.is_connect() {
        JobError::TransientService(format!("Service request failed: {err}"))
    } else if err.is_decode() {
        JobError::Validation(format!("Malformed service response: {err}"))
    } else {
        JobError::Unclassified(format!("Service request failed: {err}"))
    }
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Map a non-success HTTP status to the job error taxonomy.
pub fn classify_status(status: StatusCode, retry_after: Option<Duration>, body: &str) -> JobError {
    let code = status.as_u16();
    let detail = if body.is_empty() {
        format!("HTTP {code}")
    } else {
        format!("HTTP {code}: {body}")
    };

    match code {
        429 => JobError::rate_limited(detail, retry_after),
        401 | 403 => JobError::Configuration(format!("Credentials rejected ({detail})")),
        404 => JobError::Configuration(format!("Resource not found ({detail})")),
        400 | 422 => JobError::Validation(detail),
        408 | 500..=599 => JobError::TransientService(detail),
        _ => JobError::Unclassified(detail),
    }
}

#[async_trait]
impl GenerationService for HttpServices {
    async fn generate_structure(&self, params: &GenerationParams) -> Result<Structure, JobError> {
        self.post_json("/structure", &json!({ "params": params })).await
    }

    async fn generate_content(
        &self,
        structure: &Structure,
        params: &GenerationParams,
    ) -> Result<Content, JobError> {
        self.post_json(
            "/content",
            &json!({ "structure": structure, "params": params }),
        )
        .await
    }
}

#[async_trait]
impl AssetService for HttpServices {
    async fn generate_assets(&self, content: &Content) -> Result<Assets, JobError> {
        self.post_json("/assets", &json!({ "content": content })).await
    }
}

#[async_trait]
impl PublishingService for HttpServices {
    async fn publish(
        &self,
        content: &Content,
        assets: &Assets,
        target: &serde_json::Value,
    ) -> Result<Published, JobError> {
        self.post_json(
            "/publish",
            &json!({ "content": content, "assets": assets, "target": target }),
        )
        .await
    }
}

#[async_trait]
impl ConfigurationProvider for HttpServices {
    async fn get_configuration(&self, configuration_id: Uuid) -> Result<Configuration, JobError> {
        let req = self
            .client
            .get(self.url(&format!("/configurations/{configuration_id}")));
        self.send(req).await
    }
}
