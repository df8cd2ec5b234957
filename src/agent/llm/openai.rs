//! OpenAI-compatible chat completions client.
//!
//! Works with OpenAI, DashScope compatible mode, vLLM, Ollama's `/v1` and any
//! other service implementing the chat completions API.

use super::provider::{CompletionOptions, LlmError, LlmProvider};
use super::types::{CompletionResponse, FinishReason, Message, MessageRole, TokenUsage};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

const API_KEY_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// Where the bearer token comes from.
#[derive(Debug, Clone)]
pub enum ApiKeySource {
    None,
    Static(String),
    /// Shell command printing the key, run before every request so rotated
    /// tokens are picked up.
    Command(String),
}

impl ApiKeySource {
    async fn get_key(&self) -> Result<Option<String>, LlmError> {
        match self {
            ApiKeySource::None => Ok(None),
            ApiKeySource::Static(key) => Ok(Some(key.clone())),
            ApiKeySource::Command(cmd) => run_key_command(cmd).await.map(Some),
        }
    }
}

async fn run_key_command(cmd: &str) -> Result<String, LlmError> {
    debug!(command = %cmd, "Fetching API key via command");

    let output = match tokio::time::timeout(
        API_KEY_COMMAND_TIMEOUT,
        Command::new("sh").arg("-c").arg(cmd).output(),
    )
    .await
    {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            warn!(command = %cmd, error = %e, "api_key_command failed to execute");
            return Err(LlmError::Connection(format!(
                "Failed to execute api_key_command: {}",
                e
            )));
        }
        Err(_) => {
            warn!(command = %cmd, "api_key_command timed out");
            return Err(LlmError::Timeout);
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(LlmError::Connection(format!(
            "api_key_command failed with status {}: {}",
            output.status, stderr
        )));
    }

    let key = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if key.is_empty() {
        return Err(LlmError::Connection(
            "api_key_command returned empty key".to_string(),
        ));
    }
    Ok(key)
}

pub struct OpenAIProvider {
    client: Client,
    base_url: String,
    model: String,
    api_key_source: ApiKeySource,
}

impl OpenAIProvider {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key_source: ApiKeySource,
    ) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key_source,
        }
    }

    async fn authorized(
        &self,
        req_builder: reqwest::RequestBuilder,
    ) -> Result<reqwest::RequestBuilder, LlmError> {
        Ok(match self.api_key_source.get_key().await? {
            Some(key) => req_builder.header("Authorization", format!("Bearer {}", key)),
            None => req_builder,
        })
    }
}

fn map_send_error(e: reqwest::Error) -> LlmError {
    if e.is_timeout() {
        LlmError::Timeout
    } else {
        LlmError::Connection(e.to_string())
    }
}

#[async_trait]
impl LlmProvider for OpenAIProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<CompletionResponse, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = ChatRequest {
            model: &self.model,
            messages: messages.iter().map(ChatMessage::from).collect(),
            temperature: Some(options.temperature),
            max_tokens: options.max_tokens,
        };

        debug!(
            model = %self.model,
            message_count = messages.len(),
            "Sending chat completion request"
        );

        let req_builder = self.authorized(self.client.post(&url).json(&request)).await?;
        let response = req_builder
            .timeout(options.timeout)
            .send()
            .await
            .map_err(map_send_error)?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(LlmError::RateLimited);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| {
            LlmError::InvalidResponse(format!("Failed to parse completion response: {}", e))
        })?;
        into_completion(parsed)
    }

    async fn health_check(&self) -> Result<(), LlmError> {
        let url = format!("{}/models", self.base_url);
        let req_builder = self
            .authorized(self.client.get(&url).timeout(Duration::from_secs(5)))
            .await?;
        let response = req_builder.send().await.map_err(map_send_error)?;

        if !response.status().is_success() {
            return Err(LlmError::Api {
                status: response.status().as_u16(),
                message: "Health check failed".to_string(),
            });
        }
        Ok(())
    }
}

fn into_completion(response: ChatResponse) -> Result<CompletionResponse, LlmError> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::InvalidResponse("No choices in response".to_string()))?;

    let finish_reason = match choice.finish_reason.as_deref() {
        Some("length") => FinishReason::MaxTokens,
        _ => FinishReason::Stop,
    };

    Ok(CompletionResponse {
        message: Message {
            role: MessageRole::Assistant,
            content: choice.message.content.unwrap_or_default(),
        },
        finish_reason,
        usage: response.usage.map(|u| TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }),
    })
}

// Chat completions API types

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

impl<'a> From<&'a Message> for ChatMessage<'a> {
    fn from(msg: &'a Message) -> Self {
        Self {
            role: msg.role.as_str(),
            content: &msg.content,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}
