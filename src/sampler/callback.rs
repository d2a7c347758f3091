use super::{RetryPolicy, Sampler, SamplerError, with_retry};
use crate::models::{MessageList, SamplerResponse};
use async_trait::async_trait;
use std::collections::HashMap;

/// Sampler backed by a user-supplied chat function
pub struct CallbackSampler<F> {
    name: String,
    chat: F,
    retry: RetryPolicy,
}

impl<F> CallbackSampler<F>
where
    F: Fn(&MessageList) -> Result<String, SamplerError> + Send + Sync,
{
    pub fn new(name: impl Into<String>, chat: F, retry: RetryPolicy) -> Self {
        Self {
            name: name.into(),
            chat,
            retry,
        }
    }
}

#[async_trait]
impl<F> Sampler for CallbackSampler<F>
where
    F: Fn(&MessageList) -> Result<String, SamplerError> + Send + Sync,
{
    async fn call(&self, messages: &MessageList) -> Result<SamplerResponse, SamplerError> {
        let response_text = with_retry(&self.retry, || async { (self.chat)(messages) }).await?;

        Ok(SamplerResponse {
            response_text,
            actual_queried_message_list: messages.clone(),
            response_metadata: HashMap::new(),
        })
    }

    fn name(&self) -> &str {
        &self.name
    }
}
