//! Model sampling backends.
//!
//! Every backend implements [`Sampler`]: a message list goes in, response text
//! comes out. Transient failures are retried through a shared [`RetryPolicy`];
//! once the policy gives up the caller gets [`SamplerError::RetriesExhausted`].

pub mod callback;
pub mod chat_completion;
pub mod cohere;

use crate::config::{Backend, ModelConfig};
use crate::models::{Message, MessageList, Role, SamplerResponse};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::warn;

pub use callback::CallbackSampler;
pub use chat_completion::ChatCompletionSampler;
pub use cohere::CohereSampler;

#[derive(Debug, Error)]
pub enum SamplerError {
    #[error("Environment variable {0} not found")]
    MissingApiKey(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Rate limited by backend")]
    RateLimited,
    #[error("Backend error (status {status:?}): {message}")]
    Api { status: Option<u16>, message: String },
    #[error("Backend returned no content")]
    EmptyResponse,
    #[error("Gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<SamplerError>,
    },
}

impl SamplerError {
    /// Whether another attempt could plausibly succeed
    pub fn is_transient(&self) -> bool {
        match self {
            SamplerError::Transport(_) | SamplerError::RateLimited => true,
            SamplerError::Api { status, .. } => match status {
                Some(code) => *code == 408 || *code == 429 || *code >= 500,
                None => true,
            },
            SamplerError::MissingApiKey(_)
            | SamplerError::InvalidRequest(_)
            | SamplerError::EmptyResponse
            | SamplerError::RetriesExhausted { .. } => false,
        }
    }
}

/// Model backend that turns a conversation into a response
#[async_trait]
pub trait Sampler: Send + Sync {
    async fn call(&self, messages: &MessageList) -> Result<SamplerResponse, SamplerError>;

    /// Display name used in logs and report filenames
    fn name(&self) -> &str;
}

/// Wrap a role and content into the canonical message shape
pub fn pack_message(role: Role, content: impl Into<String>) -> Message {
    Message {
        role,
        content: content.into(),
    }
}

/// Prepend the sampler's own system message, if any, to an outgoing request
pub(crate) fn with_system_message(system_message: Option<&str>, messages: &MessageList) -> MessageList {
    match system_message {
        Some(system) => std::iter::once(pack_message(Role::System, system))
            .chain(messages.iter().cloned())
            .collect(),
        None => messages.clone(),
    }
}

/// Exponential backoff with an attempt ceiling
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    8
}

fn default_initial_backoff_ms() -> u64 {
    1000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_backoff_ms() -> u64 {
    60_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            multiplier: default_multiplier(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0-based): initial * multiplier^retry, capped
    pub fn backoff(&self, retry: u32) -> Duration {
        let base = self.initial_backoff_ms as f64 * self.multiplier.powi(retry as i32);
        let capped = base.min(self.max_backoff_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }
}

/// Run `operation` until it succeeds, fails permanently, or the policy gives up
pub async fn with_retry<F, Fut, T>(policy: &RetryPolicy, operation: F) -> Result<T, SamplerError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, SamplerError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_transient() => return Err(e),
            Err(e) => {
                attempt += 1;
                if attempt >= max_attempts {
                    return Err(SamplerError::RetriesExhausted {
                        attempts: attempt,
                        last: Box::new(e),
                    });
                }

                let delay = policy.backoff(attempt - 1);
                warn!(
                    attempt,
                    max_attempts,
                    backoff_ms = delay.as_millis() as u64,
                    error = %e,
                    "Sampler call failed, retrying"
                );
                sleep(delay).await;
            }
        }
    }
}

/// Build the sampler described by a model entry of the run file
pub fn build_sampler(config: &ModelConfig, retry: &RetryPolicy) -> Result<Arc<dyn Sampler>, SamplerError> {
    let sampler: Arc<dyn Sampler> = match config.backend {
        Backend::ChatCompletion => Arc::new(ChatCompletionSampler::new(config, retry.clone())?),
        Backend::Cohere => Arc::new(CohereSampler::new(config, retry.clone())?),
    };
    Ok(sampler)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff_ms: 1,
            multiplier: 2.0,
            max_backoff_ms: 4,
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_secs(1));
        assert_eq!(policy.backoff(1), Duration::from_secs(2));
        assert_eq!(policy.backoff(3), Duration::from_secs(8));
        assert_eq!(policy.backoff(20), Duration::from_secs(60));
    }

    #[test]
    fn test_transient_classification() {
        assert!(SamplerError::RateLimited.is_transient());
        assert!(SamplerError::Transport("reset".into()).is_transient());
        assert!(SamplerError::Api { status: Some(503), message: String::new() }.is_transient());
        assert!(!SamplerError::Api { status: Some(400), message: String::new() }.is_transient());
        assert!(!SamplerError::MissingApiKey("KEY".into()).is_transient());
    }

    #[test]
    fn test_pack_message() {
        let message = pack_message(Role::User, "hello");
        assert_eq!(message.role, Role::User);
        assert_eq!(message.content, "hello");
    }

    #[test]
    fn test_with_system_message_prepends() {
        let messages = vec![pack_message(Role::User, "q")];
        let packed = with_system_message(Some("be brief"), &messages);
        assert_eq!(packed.len(), 2);
        assert_eq!(packed[0].role, Role::System);
        assert_eq!(with_system_message(None, &messages), messages);
    }

    #[tokio::test]
    async fn test_with_retry_recovers_after_transient_errors() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&fast_policy(5), || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(SamplerError::RateLimited)
            } else {
                Ok("done")
            }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_stops_at_ceiling() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&fast_policy(3), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(SamplerError::Transport("down".into()))
        })
        .await;

        match result {
            Err(SamplerError::RetriesExhausted { attempts, last }) => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last, SamplerError::Transport(_)));
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_does_not_retry_permanent_errors() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&fast_policy(5), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(SamplerError::InvalidRequest("bad".into()))
        })
        .await;

        assert!(matches!(result, Err(SamplerError::InvalidRequest(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
