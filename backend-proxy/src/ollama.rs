//! Client for the Ollama generate and tags endpoints.

use std::time::Duration;

use bytes::Bytes;
use futures_util::Stream;
use gateway_common::GenerateResponse;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Response};
use serde_json::Value;

use crate::config::OllamaConfig;
use crate::error::{Error, Result};

/// Ollama server client.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    http_client: Client,
    base_url: String,
    default_model: String,
    generate_timeout: Duration,
    health_timeout: Duration,
}

impl OllamaClient {
    pub fn new(config: &OllamaConfig) -> Self {
        Self {
            http_client: Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            default_model: config.default_model.clone(),
            generate_timeout: config.generate_timeout(),
            health_timeout: config.health_timeout(),
        }
    }

    /// Single-shot generation via `/api/generate` with `stream: false`.
    pub async fn generate(&self, payload: Value) -> Result<GenerateResponse> {
        let payload = self.prepare(payload, Some(false))?;
        let url = format!("{}/api/generate", self.base_url);
        tracing::debug!("Sending generate request to Ollama: {}", url);

        let response = self
            .http_client
            .post(&url)
            .json(&payload)
            .timeout(self.generate_timeout)
            .send()
            .await
            .map_err(|e| Error::Communication(e.to_string()))?;

        let response = check_status(response).await?;

        response
            .json::<GenerateResponse>()
            .await
            .map_err(|e| Error::Communication(format!("Failed to parse Ollama response: {}", e)))
    }

    /// Streaming generation; returns Ollama's NDJSON body as it arrives.
    pub async fn stream(
        &self,
        payload: Value,
    ) -> Result<impl Stream<Item = reqwest::Result<Bytes>> + Send + 'static> {
        let payload = self.prepare(payload, None)?;
        let url = format!("{}/api/generate", self.base_url);
        tracing::debug!("Sending streaming request to Ollama: {}", url);

        let response = self
            .http_client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| Error::Communication(e.to_string()))?;

        let response = check_status(response).await?;
        Ok(response.bytes_stream())
    }

    /// Ollama is considered up when `/api/tags` answers 2xx.
    pub async fn health(&self) -> Result<()> {
        let url = format!("{}/api/tags", self.base_url);

        let response = self
            .http_client
            .get(&url)
            .timeout(self.health_timeout)
            .send()
            .await
            .map_err(|e| Error::Unavailable(e.to_string()))?;

        response
            .error_for_status()
            .map(|_| ())
            .map_err(|e| Error::Unavailable(e.to_string()))
    }

    /// Fill in the default model and the `stream` flag.
    ///
    /// `Some(flag)` forces the flag; `None` only defaults it to true.
    fn prepare(&self, mut payload: Value, stream: Option<bool>) -> Result<Value> {
        let obj = payload
            .as_object_mut()
            .ok_or_else(|| Error::InvalidRequest("request body must be a JSON object".to_string()))?;

        let has_model = obj
            .get("model")
            .and_then(Value::as_str)
            .is_some_and(|m| !m.is_empty());
        if !has_model {
            obj.insert("model".to_string(), Value::String(self.default_model.clone()));
        }

        match stream {
            Some(flag) => {
                obj.insert("stream".to_string(), Value::Bool(flag));
            }
            None => {
                obj.entry("stream").or_insert(Value::Bool(true));
            }
        }

        Ok(payload)
    }
}

async fn check_status(response: Response) -> Result<Response> {
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
    tracing::warn!("Ollama returned HTTP {}: {}", status, body);

    Err(Error::Upstream {
        status,
        content_type,
        body,
    })
}
