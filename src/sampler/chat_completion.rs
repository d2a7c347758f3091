use super::{RetryPolicy, Sampler, SamplerError, with_retry, with_system_message};
use crate::config::ModelConfig;
use crate::models::{Message, MessageList, Role, SamplerResponse};
use async_openai::error::OpenAIError;
use async_openai::types::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequest, CreateChatCompletionRequestArgs, CreateChatCompletionResponse,
};
use async_openai::{Client, config::OpenAIConfig};
use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;

/// Sampler for OpenAI-compatible chat completion endpoints
pub struct ChatCompletionSampler {
    name: String,
    client: Client<OpenAIConfig>,
    model: String,
    temperature: f32,
    max_tokens: u32,
    system_message: Option<String>,
    retry: RetryPolicy,
}

impl ChatCompletionSampler {
    /// Create a sampler, reading the API key from the configured environment variable
    pub fn new(config: &ModelConfig, retry: RetryPolicy) -> Result<Self, SamplerError> {
        let api_key = std::env::var(&config.env_var_api_key)
            .map_err(|_| SamplerError::MissingApiKey(config.env_var_api_key.clone()))?;

        let openai_config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(&config.api_endpoint);

        // Rate limits are retried by `with_retry` under the configured ceiling only
        let no_client_retries = ExponentialBackoffBuilder::new()
            .with_max_elapsed_time(Some(Duration::ZERO))
            .build();

        Ok(Self {
            name: config.name.clone(),
            client: Client::with_config(openai_config).with_backoff(no_client_retries),
            model: config.model.clone(),
            temperature: config.temperature as f32,
            max_tokens: config.max_tokens,
            system_message: config.system_message.clone(),
            retry,
        })
    }

    /// Convert one conversation message into the request message type
    fn to_request_message(message: &Message) -> Result<ChatCompletionRequestMessage, SamplerError> {
        let built: Result<ChatCompletionRequestMessage, OpenAIError> = match message.role {
            Role::System => ChatCompletionRequestSystemMessageArgs::default()
                .content(message.content.clone())
                .build()
                .map(Into::into),
            Role::User => ChatCompletionRequestUserMessageArgs::default()
                .content(message.content.clone())
                .build()
                .map(Into::into),
            Role::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                .content(message.content.clone())
                .build()
                .map(Into::into),
        };
        built.map_err(map_openai_error)
    }

    /// Build the chat completion request
    fn build_request(&self, messages: &MessageList) -> Result<CreateChatCompletionRequest, SamplerError> {
        let request_messages = with_system_message(self.system_message.as_deref(), messages)
            .iter()
            .map(Self::to_request_message)
            .collect::<Result<Vec<_>, _>>()?;

        CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(request_messages)
            .temperature(self.temperature)
            .max_tokens(self.max_tokens)
            .build()
            .map_err(map_openai_error)
    }

    /// Execute a single request without retries
    async fn execute_request(
        &self,
        request: CreateChatCompletionRequest,
    ) -> Result<CreateChatCompletionResponse, SamplerError> {
        self.client
            .chat()
            .create(request)
            .await
            .map_err(map_openai_error)
    }

    /// Extract response text and usage metadata from the API response
    fn extract_response(
        response: CreateChatCompletionResponse,
        messages: &MessageList,
    ) -> Result<SamplerResponse, SamplerError> {
        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or(SamplerError::EmptyResponse)?;

        let mut metadata = HashMap::new();
        if let Some(usage) = response.usage {
            metadata.insert("prompt_tokens".to_string(), json!(usage.prompt_tokens));
            metadata.insert("completion_tokens".to_string(), json!(usage.completion_tokens));
            metadata.insert("total_tokens".to_string(), json!(usage.total_tokens));
        }

        Ok(SamplerResponse {
            response_text: content,
            actual_queried_message_list: messages.clone(),
            response_metadata: metadata,
        })
    }
}

#[async_trait]
impl Sampler for ChatCompletionSampler {
    async fn call(&self, messages: &MessageList) -> Result<SamplerResponse, SamplerError> {
        let request = self.build_request(messages)?;
        let response = with_retry(&self.retry, || self.execute_request(request.clone())).await?;
        Self::extract_response(response, messages)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

fn map_openai_error(error: OpenAIError) -> SamplerError {
    match error {
        OpenAIError::Reqwest(e) => SamplerError::Transport(e.to_string()),
        OpenAIError::ApiError(api_error) => {
            if api_error.r#type.as_deref() == Some("invalid_request_error") {
                SamplerError::InvalidRequest(api_error.message)
            } else {
                SamplerError::Api {
                    status: None,
                    message: api_error.message,
                }
            }
        }
        OpenAIError::InvalidArgument(message) => SamplerError::InvalidRequest(message),
        other => SamplerError::Transport(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Backend;
    use crate::sampler::pack_message;

    fn create_test_config(api_endpoint: &str, env_var: &str) -> ModelConfig {
        ModelConfig {
            name: "test-model".to_string(),
            backend: Backend::ChatCompletion,
            api_endpoint: api_endpoint.to_string(),
            env_var_api_key: env_var.to_string(),
            model: "gpt-4o".to_string(),
            temperature: 0.0,
            max_tokens: 256,
            system_message: Some("Answer in Burmese.".to_string()),
        }
    }

    #[test]
    fn test_new_missing_env_var() {
        let config = create_test_config("https://api.openai.com/v1", "MYEVAL_TEST_MISSING_KEY");
        unsafe {
            std::env::remove_var(&config.env_var_api_key);
        }

        let result = ChatCompletionSampler::new(&config, RetryPolicy::default());
        assert!(matches!(result, Err(SamplerError::MissingApiKey(_))));
    }

    #[test]
    fn test_build_request_prepends_system_message() {
        unsafe {
            std::env::set_var("MYEVAL_TEST_CHAT_KEY", "sk-test");
        }
        let config = create_test_config("https://api.openai.com/v1", "MYEVAL_TEST_CHAT_KEY");
        let sampler = ChatCompletionSampler::new(&config, RetryPolicy::default()).unwrap();

        let request = sampler
            .build_request(&vec![pack_message(Role::User, "မေးခွန်း")])
            .unwrap();
        assert_eq!(request.messages.len(), 2);
        assert!(matches!(request.messages[0], ChatCompletionRequestMessage::System(_)));
        assert!(matches!(request.messages[1], ChatCompletionRequestMessage::User(_)));
        assert_eq!(request.model, "gpt-4o");
    }

    #[tokio::test]
    async fn test_call_against_mock_server() {
        let mut server = mockito::Server::new_async().await;
        let body = r#"{
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "created": 1700000000,
            "model": "gpt-4o",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "အဖြေ: က"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 12, "completion_tokens": 4, "total_tokens": 16}
        }"#;
        let mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body)
            .expect(1)
            .create_async()
            .await;

        unsafe {
            std::env::set_var("MYEVAL_TEST_MOCK_CHAT_KEY", "sk-test");
        }
        let config = create_test_config(&server.url(), "MYEVAL_TEST_MOCK_CHAT_KEY");
        let sampler = ChatCompletionSampler::new(&config, RetryPolicy::default()).unwrap();

        let messages = vec![pack_message(Role::User, "မေးခွန်း")];
        let response = sampler.call(&messages).await.unwrap();

        mock.assert_async().await;
        assert_eq!(response.response_text, "အဖြေ: က");
        assert_eq!(response.actual_queried_message_list, messages);
        assert_eq!(response.response_metadata.get("total_tokens"), Some(&json!(16)));
        assert_eq!(sampler.name(), "test-model");
    }

    #[tokio::test]
    async fn test_rate_limit_respects_attempt_ceiling() {
        let mut server = mockito::Server::new_async().await;
        let body = r#"{"error": {"message": "Rate limit reached", "type": "rate_limit_exceeded", "param": null, "code": null}}"#;
        let mock = server
            .mock("POST", "/chat/completions")
            .with_status(429)
            .with_header("content-type", "application/json")
            .with_body(body)
            .expect(3)
            .create_async()
            .await;

        unsafe {
            std::env::set_var("MYEVAL_TEST_RATE_LIMIT_KEY", "sk-test");
        }
        let config = create_test_config(&server.url(), "MYEVAL_TEST_RATE_LIMIT_KEY");
        let retry = RetryPolicy {
            max_attempts: 3,
            initial_backoff_ms: 1,
            multiplier: 2.0,
            max_backoff_ms: 4,
        };
        let sampler = ChatCompletionSampler::new(&config, retry).unwrap();

        let result = tokio::time::timeout(
            Duration::from_secs(10),
            sampler.call(&vec![pack_message(Role::User, "q")]),
        )
        .await
        .expect("rate limited call should give up within the retry ceiling");

        mock.assert_async().await;
        assert!(matches!(result, Err(SamplerError::RetriesExhausted { attempts: 3, .. })));
    }
}
