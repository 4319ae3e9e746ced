//! # Relay HTTP Client
//!
//! Producer-side client for a running relay: pushes telemetry and reads back
//! audit records and network geometry. Requests go through
//! `reqwest_middleware` with exponential-backoff retries on transient errors.

use std::time::Duration;

use reqwest::{header::HeaderMap, Method, Url};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::model::ControlDecision;

/// A deserialized response plus HTTP metadata.
#[derive(Debug)]
pub struct ApiResponse<T> {
    /// The decoded body on success.
    pub data: Option<T>,
    /// The raw body on failure.
    pub error_body: Option<String>,
    /// HTTP status code.
    pub status: u16,
    /// Whether the status was 2xx.
    pub success: bool,
    /// Response headers.
    pub headers: HeaderMap,
}

/// Body of a `POST /update` reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateReply {
    /// The triggered decision, if any.
    pub decision: Option<ControlDecision>,
}

/// Client for one relay instance.
pub struct RelayClient {
    inner: ClientWithMiddleware,
    base_url: Url,
}

impl RelayClient {
    /// Client for the relay at `base_url` (e.g. `http://localhost:3000/`),
    /// which may be mounted under a path prefix, retrying transient failures up to `max_retries` times.
    ///
    /// # Errors
    /// Fails if `base_url` is not an absolute URL or the HTTP client cannot
    /// be built.
    pub fn new(base_url: &str, max_retries: u32) -> anyhow::Result<Self> {
        let mut url = Url::parse(base_url)?;
        // Relative joins replace the last segment unless the path ends in `/`.
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(max_retries);
        let http = reqwest::Client::builder().timeout(Duration::from_secs(10)).build()?;
        let client = ClientBuilder::new(http)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self { inner: client, base_url: url })
    }

    /// The relay's base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Performs a JSON request against `path`, relative to the base URL.
    ///
    /// Non-2xx statuses are not errors: they come back with `success ==
    /// false` and the raw body in `error_body`.
    pub async fn request<T, B>(&self, method: Method, path: &str, body: Option<&B>) -> anyhow::Result<ApiResponse<T>>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let full_url = self.base_url.join(path)?;
        let mut req = self.inner.request(method, full_url);

        if let Some(b) = body {
            use reqwest::header::CONTENT_TYPE;
            let json_body = serde_json::to_string(b)?;
            req = req.header(CONTENT_TYPE, "application/json").body(json_body);
        }

        let response: reqwest::Response = req.send().await?;
        let status = response.status();
        let headers = response.headers().clone();

        if status.is_success() {
            let data = response.json::<T>().await?;
            Ok(ApiResponse { data: Some(data), error_body: None, status: status.as_u16(), success: true, headers })
        } else {
            let error_body = response.text().await.ok();
            log::debug!("Relay answered {} for {}", status, path);
            Ok(ApiResponse { data: None, error_body, status: status.as_u16(), success: false, headers })
        }
    }

    /// `POST /api/ev_priority`.
    pub async fn send_priority(&self, telemetry: &Value) -> anyhow::Result<ApiResponse<ControlDecision>> {
        self.request(Method::POST, "api/ev_priority", Some(telemetry)).await
    }

    /// `POST /update`.
    pub async fn send_update(&self, telemetry: &Value) -> anyhow::Result<ApiResponse<UpdateReply>> {
        self.request(Method::POST, "update", Some(telemetry)).await
    }

    /// `GET /api/logs?limit=N`.
    pub async fn recent_logs(&self, limit: usize) -> anyhow::Result<ApiResponse<Vec<Value>>> {
        self.request::<_, ()>(Method::GET, &format!("api/logs?limit={limit}"), None).await
    }

    /// `GET /api/network`, as raw JSON.
    pub async fn network(&self) -> anyhow::Result<ApiResponse<Value>> {
        self.request::<_, ()>(Method::GET, "api/network", None).await
    }
}
