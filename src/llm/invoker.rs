//! Reasoner capability trait and the HTTP provider implementation.

use crate::config::LlmConfig;
use crate::error::{InvokeError, Result};
use crate::history::{ChatMessage, ChatRole};
use crate::llm::providers::{self, ApiDialect, MAX_RETRIES, RETRY_BASE_DELAY_MS};
use anyhow::Context as _;
use std::time::Duration;

/// Reply from one reasoning invocation.
#[derive(Debug, Clone)]
pub struct ReasonerReply {
    pub content: String,
}

/// Single-step reasoning capability: augmented history in, reply out.
///
/// The pipeline only ever sees this interface, so further steps can be
/// composed by explicit chaining later without a graph engine — and tests
/// substitute scripted implementations.
pub trait Reasoner: Send + Sync {
    /// `history` may carry the system message at position 0; implementations
    /// deliver it through their dialect's system slot and `system_prompt` is
    /// authoritative.
    fn invoke(
        &self,
        system_prompt: &str,
        history: &[ChatMessage],
    ) -> impl Future<Output = Result<ReasonerReply>> + Send;
}

/// HTTP reasoner speaking the Anthropic messages API or an OpenAI-compatible
/// chat completions API, selected by the provider prefix of the configured
/// model string.
pub struct HttpReasoner {
    http: reqwest::Client,
    model: String,
    dialect: ApiDialect,
    base_url: String,
    api_key: String,
}

impl HttpReasoner {
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let (provider, model) = providers::split_model(&config.model);
        let dialect = providers::dialect_for(provider);

        let api_key = match dialect {
            ApiDialect::Anthropic => config.anthropic_key.clone(),
            ApiDialect::OpenAiCompatible => config.openai_key.clone(),
        }
        .ok_or_else(|| InvokeError::MissingProviderKey(provider.to_string()))?;

        let base_url = config
            .base_url
            .clone()
            .or_else(|| providers::default_base_url(provider).map(String::from))
            .ok_or_else(|| InvokeError::UnknownProvider(provider.to_string()))?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            http,
            model: model.to_string(),
            dialect,
            base_url,
            api_key,
        })
    }

    async fn attempt(
        &self,
        system_prompt: &str,
        history: &[ChatMessage],
    ) -> std::result::Result<ReasonerReply, InvokeError> {
        match self.dialect {
            ApiDialect::Anthropic => self.call_anthropic(system_prompt, history).await,
            ApiDialect::OpenAiCompatible => self.call_openai(system_prompt, history).await,
        }
    }

    async fn call_anthropic(
        &self,
        system_prompt: &str,
        history: &[ChatMessage],
    ) -> std::result::Result<ReasonerReply, InvokeError> {
        let url = format!("{}/v1/messages", self.base_url.trim_end_matches('/'));

        let messages: Vec<serde_json::Value> = history
            .iter()
            .filter(|message| message.role != ChatRole::System)
            .map(|message| {
                let role = if message.role == ChatRole::Agent { "assistant" } else { "user" };
                serde_json::json!({
                    "role": role,
                    "content": message.content,
                })
            })
            .collect();

        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": 1024,
            "system": system_prompt,
            "messages": messages,
        });

        let response = self
            .http
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|error| InvokeError::Provider(error.to_string()))?;

        let status = response.status();
        let text = response.text().await.map_err(|error| {
            InvokeError::Provider(format!("failed to read response body: {error}"))
        })?;

        let body: serde_json::Value = serde_json::from_str(&text).map_err(|error| {
            InvokeError::Provider(format!(
                "Anthropic response ({status}) is not valid JSON: {error}"
            ))
        })?;

        if !status.is_success() {
            let message = body["error"]["message"].as_str().unwrap_or("unknown error");
            return Err(InvokeError::Provider(format!(
                "Anthropic API error ({status}): {message}"
            )));
        }

        let content = body["content"][0]["text"].as_str().ok_or_else(|| {
            InvokeError::Provider("Anthropic response carries no text content".into())
        })?;

        Ok(ReasonerReply {
            content: content.to_string(),
        })
    }

    async fn call_openai(
        &self,
        system_prompt: &str,
        history: &[ChatMessage],
    ) -> std::result::Result<ReasonerReply, InvokeError> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));

        let mut messages = vec![serde_json::json!({
            "role": "system",
            "content": system_prompt,
        })];
        messages.extend(
            history
                .iter()
                .filter(|message| message.role != ChatRole::System)
                .map(|message| {
                    let role = if message.role == ChatRole::Agent { "assistant" } else { "user" };
                    serde_json::json!({
                        "role": role,
                        "content": message.content,
                    })
                }),
        );

        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
        });

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|error| InvokeError::Provider(error.to_string()))?;

        let status = response.status();
        let text = response.text().await.map_err(|error| {
            InvokeError::Provider(format!("failed to read response body: {error}"))
        })?;

        let body: serde_json::Value = serde_json::from_str(&text).map_err(|error| {
            InvokeError::Provider(format!(
                "provider response ({status}) is not valid JSON: {error}"
            ))
        })?;

        if !status.is_success() {
            let message = body["error"]["message"].as_str().unwrap_or("unknown error");
            return Err(InvokeError::Provider(format!(
                "provider API error ({status}): {message}"
            )));
        }

        let content = body["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| InvokeError::Provider("provider reply carries no content".into()))?;

        Ok(ReasonerReply {
            content: content.to_string(),
        })
    }
}

impl Reasoner for HttpReasoner {
    /// Bounded retry with exponential backoff on retriable provider errors;
    /// auth and bad-request failures bail immediately.
    async fn invoke(&self, system_prompt: &str, history: &[ChatMessage]) -> Result<ReasonerReply> {
        let mut last_error = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                let delay_ms = RETRY_BASE_DELAY_MS * 2u64.pow((attempt - 1) as u32);
                tracing::debug!(model = %self.model, attempt = attempt + 1, delay_ms, "retrying after backoff");
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }

            match self.attempt(system_prompt, history).await {
                Ok(reply) => return Ok(reply),
                Err(error) => {
                    if !providers::is_retriable_error(&error.to_string()) {
                        return Err(error.into());
                    }
                    tracing::warn!(model = %self.model, attempt = attempt + 1, %error, "retriable provider error");
                    last_error = Some(error);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| InvokeError::Provider("retries exhausted".into()))
            .into())
    }
}
