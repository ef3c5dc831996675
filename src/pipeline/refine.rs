//! Refinement stage: ask an Ollama-hosted model to tidy raw Markdown.
//!
//! One non-streaming `POST {ollama_url}/api/generate` per document. The
//! prompt is the instruction from [`crate::prompts`] followed by the raw
//! Markdown; the answer is the `response` field of the reply.

use crate::config::ConverterConfig;
use crate::error::{ConvertError, RefinementError};
use crate::prompts::{refinement_prompt, DEFAULT_REFINEMENT_PROMPT};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Produces a cleaner rendition of raw Markdown.
#[async_trait]
pub trait Refiner: Send + Sync {
    async fn refine(&self, markdown: &str, model: &str) -> Result<String, RefinementError>;
}

/// Ollama API client.
pub struct OllamaClient {
    client: Client,
    base_url: String,
    timeout_secs: u64,
    temperature: f32,
    context_window: u32,
    instruction: String,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: String,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_ctx: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

impl OllamaClient {
    pub fn new(config: &ConverterConfig) -> Result<Self, ConvertError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.refinement_timeout_secs))
            .build()
            .map_err(|e| ConvertError::ClientInit {
                service: "Ollama",
                detail: e.to_string(),
            })?;

        Ok(Self {
            client,
            base_url: config.ollama_url.clone(),
            timeout_secs: config.refinement_timeout_secs,
            temperature: config.temperature,
            context_window: config.context_window,
            instruction: config
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_REFINEMENT_PROMPT.to_string()),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Check if Ollama is available
    pub async fn health_check(&self) -> bool {
        match self.client.get(&self.base_url).send().await {
            Ok(resp) if resp.status().is_success() => resp
                .text()
                .await
                .map(|body| body.contains("Ollama is running"))
                .unwrap_or(false),
            Ok(resp) => {
                debug!("Ollama probe returned HTTP {}", resp.status());
                false
            }
            Err(e) => {
                warn!(error = %e, "Ollama health check failed");
                false
            }
        }
    }

    fn transport_error(&self, url: &str, e: reqwest::Error) -> RefinementError {
        if e.is_timeout() {
            RefinementError::Timeout {
                secs: self.timeout_secs,
            }
        } else {
            RefinementError::Unreachable {
                url: url.to_string(),
                source: e,
            }
        }
    }
}

#[async_trait]
impl Refiner for OllamaClient {
    async fn refine(&self, markdown: &str, model: &str) -> Result<String, RefinementError> {
        let url = format!("{}/api/generate", self.base_url);
        let request = GenerateRequest {
            model,
            prompt: refinement_prompt(&self.instruction, markdown),
            stream: false,
            options: GenerateOptions {
                temperature: self.temperature,
                num_ctx: self.context_window,
            },
        };
        info!("Refining {} chars with model '{}'", markdown.len(), model);

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.transport_error(&url, e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| self.transport_error(&url, e))?;

        if !status.is_success() {
            return Err(RefinementError::ServiceStatus {
                status: status.as_u16(),
                body: body.chars().take(500).collect(),
            });
        }

        parse_generate_response(&body, model)
    }
}

/// Pull the generated text out of an `/api/generate` reply.
pub fn parse_generate_response(body: &str, model: &str) -> Result<String, RefinementError> {
    let reply: GenerateResponse =
        serde_json::from_str(body).map_err(|e| RefinementError::MalformedResponse {
            detail: e.to_string(),
        })?;

    if reply.response.trim().is_empty() {
        return Err(RefinementError::EmptyResponse {
            model: model.to_string(),
        });
    }
    Ok(reply.response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Retryable;

    #[test]
    fn test_request_shape() {
        let request = GenerateRequest {
            model: "llama3",
            prompt: "p".into(),
            stream: false,
            options: GenerateOptions {
                temperature: 0.25,
                num_ctx: 8192,
            },
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "llama3");
        assert_eq!(json["stream"], false);
        assert_eq!(json["options"]["num_ctx"], 8192);
        assert_eq!(json["options"]["temperature"], 0.25);
    }

    #[test]
    fn test_parse_generate_response() {
        let body = r##"{"model":"llama3","response":"# Clean\n","done":true}"##;
        assert_eq!(parse_generate_response(body, "llama3").unwrap(), "# Clean\n");
    }

    #[test]
    fn test_empty_response() {
        let err = parse_generate_response(r#"{"response":"  ","done":true}"#, "llama3").unwrap_err();
        assert!(matches!(err, RefinementError::EmptyResponse { .. }));
        assert!(!err.is_retryable());

        let err = parse_generate_response(r#"{"done":true}"#, "llama3").unwrap_err();
        assert!(matches!(err, RefinementError::EmptyResponse { .. }));
    }

    #[test]
    fn test_malformed_response() {
        let err = parse_generate_response("not json", "llama3").unwrap_err();
        assert!(matches!(err, RefinementError::MalformedResponse { .. }));
    }

    #[test]
    fn test_custom_instruction_is_used() {
        let config = ConverterConfig::builder()
            .system_prompt("Only fix typos.")
            .build()
            .unwrap();
        let client = OllamaClient::new(&config).unwrap();
        assert_eq!(client.instruction, "Only fix typos.");
        assert_eq!(client.base_url(), "http://ollama:11434");
    }

    #[tokio::test]
    async fn test_unreachable_server_is_retryable() {
        let config = ConverterConfig::builder()
            .ollama_url("http://127.0.0.1:9")
            .refinement_timeout_secs(2)
            .build()
            .unwrap();
        let client = OllamaClient::new(&config).unwrap();
        let err = client.refine("# x", "llama3").await.unwrap_err();
        assert!(err.is_retryable(), "got {err:?}");
        assert!(!client.health_check().await);
    }
}
