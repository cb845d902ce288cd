//! OpenAI-compatible LLM provider implementation.
//!
//! A single [`OpenAiCompatibleProvider`] talks to any gateway that speaks the
//! OpenAI chat completions protocol (the default is the Unbound gateway).
//!
//! Uses [`async_openai`] for type-safe request/response handling. Each HTTP
//! attempt is bounded by the configured timeout; transient failures are
//! retried with exponential backoff before the error reaches the engine.

use std::future::Future;
use std::time::Duration;

use async_openai::Client;
use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessage, ChatCompletionRequestAssistantMessageContent,
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
    ChatCompletionRequestSystemMessageContent, ChatCompletionRequestUserMessage,
    ChatCompletionRequestUserMessageContent, CreateChatCompletionRequest, FinishReason,
};
use backoff::ExponentialBackoffBuilder;
use secrecy::{ExposeSecret, SecretString};

use stepflow_core::llm::provider::LlmProvider;
use stepflow_types::config::ProviderConfig;
use stepflow_types::llm::{
    CompletionRequest, CompletionResponse, LlmError, MessageRole, StopReason, Usage,
};

/// Unified provider for any OpenAI-compatible API.
///
/// # API Key Security
///
/// Does NOT derive Debug to prevent accidental exposure of the API key
/// stored inside the `async_openai::Client`.
pub struct OpenAiCompatibleProvider {
    client: Client<OpenAIConfig>,
    provider_name: String,
    request_timeout: Duration,
    max_attempts: u32,
    backoff_unit: Duration,
}

impl OpenAiCompatibleProvider {
    /// Create a provider from the `[provider]` config section.
    pub fn new(config: &ProviderConfig, api_key: SecretString) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_key(api_key.expose_secret())
            .with_api_base(&config.base_url);

        // Attempts are counted by `with_transport_retry` alone, so the
        // client's own retry of 5xx and 429 responses is switched off.
        let no_retry = ExponentialBackoffBuilder::new()
            .with_max_elapsed_time(Some(Duration::ZERO))
            .build();

        Self {
            client: Client::with_config(openai_config).with_backoff(no_retry),
            provider_name: config.name.clone(),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            max_attempts: config.max_transport_attempts.max(1),
            backoff_unit: Duration::from_secs(1),
        }
    }

    /// Build a [`CreateChatCompletionRequest`] from a generic [`CompletionRequest`].
    fn build_request(&self, request: &CompletionRequest) -> CreateChatCompletionRequest {
        let mut messages: Vec<ChatCompletionRequestMessage> = Vec::new();

        if let Some(ref system) = request.system {
            messages.push(ChatCompletionRequestMessage::System(
                ChatCompletionRequestSystemMessage {
                    content: ChatCompletionRequestSystemMessageContent::Text(system.clone()),
                    name: None,
                },
            ));
        }

        for msg in &request.messages {
            let oai_msg = match msg.role {
                MessageRole::System => ChatCompletionRequestMessage::System(
                    ChatCompletionRequestSystemMessage {
                        content: ChatCompletionRequestSystemMessageContent::Text(
                            msg.content.clone(),
                        ),
                        name: None,
                    },
                ),
                MessageRole::User => ChatCompletionRequestMessage::User(
                    ChatCompletionRequestUserMessage {
                        content: ChatCompletionRequestUserMessageContent::Text(
                            msg.content.clone(),
                        ),
                        name: None,
                    },
                ),
                MessageRole::Assistant => {
                    #[allow(deprecated)]
                    ChatCompletionRequestMessage::Assistant(
                        ChatCompletionRequestAssistantMessage {
                            content: Some(ChatCompletionRequestAssistantMessageContent::Text(
                                msg.content.clone(),
                            )),
                            refusal: None,
                            name: None,
                            audio: None,
                            tool_calls: None,
                            function_call: None,
                        },
                    )
                }
            };
            messages.push(oai_msg);
        }

        CreateChatCompletionRequest {
            model: request.model.clone(),
            messages,
            max_completion_tokens: Some(request.max_tokens),
            temperature: request.temperature.map(|t| t as f32),
            ..Default::default()
        }
    }

    /// One HTTP round trip, bounded by the request timeout.
    async fn complete_once(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let oai_request = self.build_request(request);

        let response = tokio::time::timeout(self.request_timeout, self.client.chat().create(oai_request))
            .await
            .map_err(|_| LlmError::Timeout(self.request_timeout.as_secs()))?
            .map_err(map_openai_error)?;

        let choice = response.choices.first();
        let content = choice
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();

        let stop_reason = choice
            .and_then(|c| c.finish_reason.as_ref())
            .map(|fr| match fr {
                FinishReason::Length => StopReason::MaxTokens,
                FinishReason::ContentFilter => StopReason::ContentFilter,
                FinishReason::Stop | FinishReason::ToolCalls | FinishReason::FunctionCall => {
                    StopReason::EndTurn
                }
            })
            .unwrap_or(StopReason::EndTurn);

        let usage = response
            .usage
            .map(|u| Usage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            })
            .unwrap_or_default();

        Ok(CompletionResponse {
            id: response.id,
            content,
            model: response.model,
            stop_reason,
            usage,
        })
    }
}

// OpenAiCompatibleProvider intentionally does NOT derive Debug to prevent
// accidental exposure of the API key inside the async-openai Client.

impl LlmProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.provider_name
    }

    #[tracing::instrument(skip_all, fields(provider = %self.provider_name, model = %request.model))]
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
        tracing::debug!(
            prompt_chars = request.messages.iter().map(|m| m.content.len()).sum::<usize>(),
            "calling provider"
        );
        with_transport_retry(self.max_attempts, self.backoff_unit, || self.complete_once(request)).await
    }
}

/// Run `call` up to `max_attempts` times, retrying transient errors.
///
/// Attempt `n` (0-based) is preceded by a `2^n * backoff_unit` sleep, none
/// before the first. Non-transient errors return immediately.
async fn with_transport_retry<T, F, Fut>(
    max_attempts: u32,
    backoff_unit: Duration,
    mut call: F,
) -> Result<T, LlmError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, LlmError>>,
{
    let mut last_error = String::new();

    for attempt in 0..max_attempts {
        if attempt > 0 {
            let wait = backoff_unit.saturating_mul(2u32.saturating_pow(attempt));
            tracing::info!(
                attempt = attempt + 1,
                max_attempts,
                wait_ms = wait.as_millis() as u64,
                "retrying provider call"
            );
            tokio::time::sleep(wait).await;
        }

        match call().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() => {
                tracing::warn!(attempt = attempt + 1, error = %e, "transient provider error");
                last_error = e.to_string();
            }
            Err(e) => return Err(e),
        }
    }

    tracing::error!(max_attempts, last_error = last_error.as_str(), "provider retries exhausted");
    Err(LlmError::RetriesExhausted {
        attempts: max_attempts,
        last_error,
    })
}

/// Map an `async_openai::error::OpenAIError` to an [`LlmError`].
fn map_openai_error(err: async_openai::error::OpenAIError) -> LlmError {
    use async_openai::error::OpenAIError;

    match &err {
        OpenAIError::ApiError(api_err) => {
            let code = api_err.code.as_deref().unwrap_or("");
            let error_type = api_err.r#type.as_deref().unwrap_or("");

            if code == "authentication_error"
                || error_type == "authentication_error"
                || api_err.message.contains("Incorrect API key")
                || api_err.message.contains("Invalid API key")
            {
                LlmError::AuthenticationFailed
            } else if code == "rate_limit_exceeded" || error_type == "rate_limit_error" {
                LlmError::RateLimited {
                    retry_after_ms: None,
                }
            } else if code == "server_error"
                || error_type == "server_error"
                || error_type == "overloaded_error"
            {
                LlmError::Overloaded(api_err.message.clone())
            } else if error_type == "invalid_request_error" {
                LlmError::InvalidRequest(api_err.message.clone())
            } else if api_err.r#type.is_none() && api_err.code.is_none() {
                // 5xx bodies are passed through raw with no type or code.
                LlmError::Overloaded(truncate_message(&api_err.message))
            } else {
                LlmError::Provider {
                    message: err.to_string(),
                }
            }
        }
        OpenAIError::Reqwest(reqwest_err) => match reqwest_err.status() {
            Some(status) => match status.as_u16() {
                401 | 403 => LlmError::AuthenticationFailed,
                code => LlmError::Http {
                    status: code,
                    message: truncate_message(&err.to_string()),
                },
            },
            None if reqwest_err.is_timeout() => LlmError::Connection(format!("timed out: {reqwest_err}")),
            None => LlmError::Connection(reqwest_err.to_string()),
        },
        OpenAIError::JSONDeserialize(_, content) => {
            LlmError::Deserialization(format!("failed to parse response: {}", truncate_message(content)))
        }
        OpenAIError::InvalidArgument(msg) => LlmError::InvalidRequest(msg.clone()),
        _ => LlmError::Provider {
            message: err.to_string(),
        },
    }
}

/// Error bodies are cut to 200 characters before they reach stored records.
fn truncate_message(message: &str) -> String {
    message.chars().take(200).collect()
}
