use super::{RetryPolicy, Sampler, SamplerError, with_retry, with_system_message};
use crate::config::ModelConfig;
use crate::models::{MessageList, SamplerResponse};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Sampler for the Cohere v2 chat API
pub struct CohereSampler {
    name: String,
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f64,
    max_tokens: u32,
    system_message: Option<String>,
    retry: RetryPolicy,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a MessageList,
    max_tokens: u32,
    temperature: f64,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ResponseMessage,
    #[serde(default)]
    usage: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

impl CohereSampler {
    pub fn new(config: &ModelConfig, retry: RetryPolicy) -> Result<Self, SamplerError> {
        let api_key = std::env::var(&config.env_var_api_key)
            .map_err(|_| SamplerError::MissingApiKey(config.env_var_api_key.clone()))?;

        Ok(Self {
            name: config.name.clone(),
            http: reqwest::Client::new(),
            endpoint: format!("{}/v2/chat", config.api_endpoint.trim_end_matches('/')),
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            system_message: config.system_message.clone(),
            retry,
        })
    }

    /// Send one request and map the HTTP outcome onto sampler errors
    async fn execute_request(&self, messages: &MessageList) -> Result<ChatResponse, SamplerError> {
        let body = ChatRequest {
            model: &self.model,
            messages,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| SamplerError::Transport(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(SamplerError::RateLimited);
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(SamplerError::Api {
                status: Some(status.as_u16()),
                message,
            });
        }

        response
            .json::<ChatResponse>()
            .await
            .map_err(|e| SamplerError::Transport(e.to_string()))
    }
}

#[async_trait]
impl Sampler for CohereSampler {
    async fn call(&self, messages: &MessageList) -> Result<SamplerResponse, SamplerError> {
        let outgoing = with_system_message(self.system_message.as_deref(), messages);
        let response = with_retry(&self.retry, || self.execute_request(&outgoing)).await?;

        let text = response
            .message
            .content
            .into_iter()
            .find_map(|block| block.text)
            .ok_or(SamplerError::EmptyResponse)?;

        let mut metadata = HashMap::new();
        if let Some(usage) = response.usage {
            metadata.insert("usage".to_string(), usage);
        }

        Ok(SamplerResponse {
            response_text: text,
            actual_queried_message_list: messages.clone(),
            response_metadata: metadata,
        })
    }

    fn name(&self) -> &str {
        &self.name
    }
}
