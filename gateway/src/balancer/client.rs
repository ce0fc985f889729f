//! HTTP client for talking to inference backends.
//!
//! Every call classifies its failure: network and protocol problems are
//! [`BackendError::Transient`] (the backend gets ejected), a non-2xx answer is
//! [`BackendError::Application`] (forwarded to the caller as is).

use std::time::{Duration, Instant};

use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use gateway_common::{is_healthy_response, GenerateResponse};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Response};
use serde_json::Value;

/// Raw body of a streaming backend response.
pub type ByteStream = BoxStream<'static, reqwest::Result<Bytes>>;

/// Failure of a single backend call.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// Connection refused/reset, read error, timeout, malformed response.
    #[error("{0}")]
    Transient(String),
    /// The backend answered with a non-2xx status.
    #[error("HTTP {status}: {body}")]
    Application {
        status: u16,
        content_type: Option<String>,
        body: String,
    },
}

/// Outcome of one health probe.
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub healthy: bool,
    /// HTTP status, when the backend answered at all.
    pub status: Option<u16>,
    /// Response body or error text.
    pub detail: String,
    pub elapsed: Duration,
}

/// Shared client for backend calls.
#[derive(Debug, Clone)]
pub struct BackendClient {
    http_client: Client,
    generate_timeout: Duration,
    probe_timeout: Duration,
}

impl BackendClient {
    pub fn new(generate_timeout: Duration, probe_timeout: Duration) -> Self {
        Self {
            http_client: Client::new(),
            generate_timeout,
            probe_timeout,
        }
    }

    /// POST `/generate` and decode the single JSON answer.
    pub async fn generate(
        &self,
        base_url: &str,
        payload: &Value,
    ) -> Result<GenerateResponse, BackendError> {
        let url = format!("{}/generate", base_url);
        tracing::debug!("Proxying generate request to {}", url);

        let response = self
            .http_client
            .post(&url)
            .json(payload)
            .timeout(self.generate_timeout)
            .send()
            .await
            .map_err(|e| BackendError::Transient(describe(&e)))?;

        let response = check_status(response).await?;

        response
            .json::<GenerateResponse>()
            .await
            .map_err(|e| BackendError::Transient(format!("malformed response: {}", describe(&e))))
    }

    /// POST `/stream` and hand back the body once the status line is in.
    ///
    /// No timeout: a stream lasts as long as the backend keeps generating.
    pub async fn open_stream(
        &self,
        base_url: &str,
        payload: &Value,
    ) -> Result<ByteStream, BackendError> {
        let url = format!("{}/stream", base_url);
        tracing::debug!("Proxying streaming request to {}", url);

        let response = self
            .http_client
            .post(&url)
            .json(payload)
            .send()
            .await
            .map_err(|e| BackendError::Transient(describe(&e)))?;

        let response = check_status(response).await?;
        Ok(response.bytes_stream().boxed())
    }

    /// GET `/healthz`, bounded by the probe timeout.
    pub async fn probe(&self, base_url: &str) -> ProbeResult {
        let url = format!("{}/healthz", base_url);
        let start = Instant::now();

        let result = async {
            let response = self
                .http_client
                .get(&url)
                .timeout(self.probe_timeout)
                .send()
                .await?;
            let status = response.status().as_u16();
            let body = response.text().await?;
            Ok::<_, reqwest::Error>((status, body))
        }
        .await;

        match result {
            Ok((status, body)) => ProbeResult {
                healthy: is_healthy_response(status, &body),
                status: Some(status),
                detail: body.trim().to_string(),
                elapsed: start.elapsed(),
            },
            Err(e) => ProbeResult {
                healthy: false,
                status: None,
                detail: describe(&e),
                elapsed: start.elapsed(),
            },
        }
    }
}

/// Turn a non-2xx answer into an application error, keeping status and body.
async fn check_status(response: Response) -> Result<Response, BackendError> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status().as_u16();
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = response.text().await.unwrap_or_default();

    Err(BackendError::Application {
        status,
        content_type,
        body,
    })
}

fn describe(error: &reqwest::Error) -> String {
    if error.is_timeout() {
        format!("timed out: {}", error)
    } else if error.is_connect() {
        format!("connection failed: {}", error)
    } else {
        error.to_string()
    }
}
