use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::config::GenerationConfig;
use crate::error::CoreError;
use crate::generation::build_http_client;
use crate::traits::{ChunkStream, Generator};
use crate::types::{ChatMessage, GenerationStatus, SamplingOverrides, SamplingParams};

/// Client for an Ollama-protocol generation endpoint.
///
/// `initialize` must succeed once before any generation call; until then
/// the client reports not-ready and refuses to send chat requests.
pub struct OllamaClient {
    client: Client,
    base_url: String,
    model: String,
    sampling: SamplingParams,
    ready: AtomicBool,
}

/// Validate the base URL for security.
/// - HTTPS is allowed anywhere
/// - HTTP is allowed only for localhost (local model servers)
fn validate_base_url(base_url: &str) -> Result<(), CoreError> {
    let parsed = reqwest::Url::parse(base_url)
        .map_err(|e| CoreError::connection(format!("invalid base_url '{}': {}", base_url, e)))?;

    let scheme = parsed.scheme();
    let host = parsed.host_str().unwrap_or("");

    match scheme {
        "https" => Ok(()),
        "http" => {
            let is_localhost =
                host == "localhost" || host == "127.0.0.1" || host == "[::1]" || host == "::1";

            if is_localhost {
                warn!(
                    "Using unencrypted HTTP for local model server at '{}'",
                    base_url
                );
                Ok(())
            } else {
                Err(CoreError::connection(format!(
                    "HTTP is not allowed for remote URLs (base_url: '{}'). \
                     Use HTTPS for remote endpoints; HTTP is only permitted for localhost.",
                    base_url
                )))
            }
        }
        _ => Err(CoreError::connection(format!(
            "unsupported URL scheme '{}' in base_url '{}'; only http and https are allowed",
            scheme, base_url
        ))),
    }
}

impl OllamaClient {
    pub fn new(config: &GenerationConfig) -> Result<Self, CoreError> {
        validate_base_url(&config.base_url)?;

        let client = build_http_client(Duration::from_secs(config.request_timeout_secs))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            sampling: config.sampling(),
            ready: AtomicBool::new(false),
        })
    }

    /// Probe the endpoint's model list. Success flips the client to ready;
    /// failure leaves it not-ready so a later probe can retry.
    pub async fn initialize(&self) -> Result<(), CoreError> {
        let models = self.fetch_models().await?;

        if !models.iter().any(|m| m == &self.model || m.starts_with(&format!("{}:", self.model))) {
            warn!(
                model = %self.model,
                available = models.len(),
                "configured model not in the endpoint's list; generation may fail until it is pulled"
            );
        }

        self.ready.store(true, Ordering::Relaxed);
        info!(model = %self.model, url = %self.base_url, "generation endpoint ready");
        Ok(())
    }

    async fn fetch_models(&self) -> Result<Vec<String>, CoreError> {
        let url = format!("{}/tags", self.base_url);

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| CoreError::connection_network(&e))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| CoreError::connection_network(&e))?;

        if !status.is_success() {
            return Err(CoreError::connection(format!(
                "model list request failed ({}): {}",
                status,
                text.trim()
            )));
        }

        let data: Value = serde_json::from_str(&text)
            .map_err(|e| CoreError::connection(format!("malformed model list: {}", e)))?;

        let models = data["models"]
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|m| m["name"].as_str().map(|s| s.to_string()))
                    .collect::<Vec<String>>()
            })
            .unwrap_or_default();

        Ok(models)
    }

    fn ensure_ready(&self) -> Result<(), CoreError> {
        if self.ready.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(CoreError::not_ready())
        }
    }

    fn chat_body(&self, messages: &[ChatMessage], params: &SamplingParams, stream: bool) -> Value {
        json!({
            "model": self.model,
            "messages": messages,
            "stream": stream,
            "options": {
                "temperature": params.temperature,
                "top_p": params.top_p,
                "top_k": params.top_k,
                "num_predict": params.num_predict,
            },
        })
    }
}

#[async_trait]
impl Generator for OllamaClient {
    async fn generate(
        &self,
        messages: &[ChatMessage],
        overrides: Option<&SamplingOverrides>,
    ) -> Result<String, CoreError> {
        self.ensure_ready()?;

        let params = match overrides {
            Some(o) => self.sampling.merged(o),
            None => self.sampling,
        };
        let body = self.chat_body(messages, &params, false);

        let url = format!("{}/chat", self.base_url);
        debug!(model = %self.model, messages = messages.len(), "calling generation endpoint");

        let resp = match self.client.post(&url).json(&body).send().await {
            Ok(r) => r,
            Err(e) => {
                error!("generation request failed: {}", e);
                return Err(CoreError::generation_network(&e));
            }
        };

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| CoreError::generation_network(&e))?;

        if !status.is_success() {
            error!(status = %status, "generation endpoint error: {}", text.trim());
            return Err(CoreError::generation_status(status.as_u16(), &text));
        }

        // Safely truncate for debug logging, respecting UTF-8 char boundaries
        debug!(
            "generation response: {}",
            crate::utils::truncate_str(&text, 2000)
        );

        let data: Value = serde_json::from_str(&text)
            .map_err(|e| CoreError::generation(format!("malformed response: {}", e)))?;

        match data["message"]["content"].as_str() {
            Some(content) => Ok(content.to_string()),
            None => Err(CoreError::generation(
                "malformed response: missing message.content",
            )),
        }
    }

    async fn generate_stream(&self, messages: &[ChatMessage]) -> Result<ChunkStream, CoreError> {
        self.ensure_ready()?;

        let body = self.chat_body(messages, &self.sampling, true);
        let url = format!("{}/chat", self.base_url);
        debug!(model = %self.model, messages = messages.len(), "starting generation stream");

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| CoreError::generation_network(&e))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            error!(status = %status, "generation stream refused: {}", text.trim());
            return Err(CoreError::generation_status(status.as_u16(), &text));
        }

        let byte_stream = resp.bytes_stream();

        let chunk_stream = async_stream::try_stream! {
            let mut buffer: Vec<u8> = Vec::new();
            futures::pin_mut!(byte_stream);

            while let Some(chunk) = byte_stream.next().await {
                let chunk = chunk
                    .map_err(|e| CoreError::generation(format!("stream read failed: {}", e)))?;
                buffer.extend_from_slice(&chunk);

                // One JSON object per line; a line may arrive split across
                // any number of byte chunks, possibly mid-codepoint. Only
                // complete lines are decoded.
                while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                    let line_bytes: Vec<u8> = buffer.drain(..=pos).collect();
                    let line = String::from_utf8_lossy(&line_bytes);
                    let line = line.trim();

                    if line.is_empty() {
                        continue;
                    }
                    let value: Value = match serde_json::from_str(line) {
                        Ok(v) => v,
                        Err(e) => {
                            debug!("skipping malformed stream line: {}", e);
                            continue;
                        }
                    };

                    if let Some(content) = value["message"]["content"].as_str() {
                        if !content.is_empty() {
                            yield content.to_string();
                        }
                    }
                    if value["done"].as_bool() == Some(true) {
                        return;
                    }
                }
            }

            // Endpoint closed without a done marker; flush any complete
            // trailing line.
            let tail = String::from_utf8_lossy(&buffer);
            let tail = tail.trim();
            if !tail.is_empty() {
                if let Ok(value) = serde_json::from_str::<Value>(tail) {
                    if let Some(content) = value["message"]["content"].as_str() {
                        if !content.is_empty() {
                            yield content.to_string();
                        }
                    }
                }
            }
        };

        Ok(chunk_stream.boxed())
    }

    async fn list_models(&self) -> Result<Vec<String>, CoreError> {
        self.fetch_models().await
    }

    fn status(&self) -> GenerationStatus {
        GenerationStatus {
            ready: self.ready.load(Ordering::Relaxed),
            model: self.model.clone(),
        }
    }
}
