use crate::sampler::RetryPolicy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Wire protocol used to reach a model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// OpenAI-compatible chat completions (OpenAI, OpenRouter, vLLM, ...)
    ChatCompletion,
    /// Cohere v2 chat API
    Cohere,
}

/// A model that can be evaluated or used as the rubric judge
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModelConfig {
    /// Name used in reports and on the command line
    pub name: String,
    #[serde(default = "default_backend")]
    pub backend: Backend,
    /// API base URL
    pub api_endpoint: String,
    /// Environment variable name containing the API key
    pub env_var_api_key: String,
    /// Model identifier sent to the backend
    pub model: String,
    #[serde(default)]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Optional system message prepended to every request
    #[serde(default)]
    pub system_message: Option<String>,
}

/// One benchmark to run against every selected model
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EvalConfig {
    pub name: String,
    /// JSON array or JSONL file of benchmark examples
    pub dataset: PathBuf,
    /// Seeded subsample size; all examples when absent
    #[serde(default)]
    pub num_examples: Option<usize>,
}

/// Bootstrap settings for the score confidence interval
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BootstrapConfig {
    #[serde(default = "default_bootstrap_samples")]
    pub samples: usize,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub seed: u64,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            samples: default_bootstrap_samples(),
            confidence: default_confidence(),
            seed: 0,
        }
    }
}

fn default_backend() -> Backend {
    Backend::ChatCompletion
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_concurrency() -> usize {
    50
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./output")
}

fn default_language() -> String {
    "MYA".to_string()
}

fn default_bootstrap_samples() -> usize {
    1000
}

fn default_confidence() -> f64 {
    0.95
}

/// Root configuration of a run file
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Maximum examples in flight at once
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Benchmark language; only Burmese (`MYA`) is supported
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub bootstrap: BootstrapConfig,
    /// Models available for evaluation
    pub models: Vec<ModelConfig>,
    /// Judge model for open-ended questions
    #[serde(default)]
    pub judge: Option<ModelConfig>,
    pub evals: Vec<EvalConfig>,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config: {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.language != "MYA" {
            anyhow::bail!("Language {} not supported", self.language);
        }
        if self.concurrency == 0 {
            anyhow::bail!("concurrency must be at least 1");
        }
        if !(0.0..1.0).contains(&self.bootstrap.confidence) {
            anyhow::bail!("bootstrap confidence must be in [0, 1)");
        }
        Ok(())
    }

    /// Look up a model entry by name
    pub fn model(&self, name: &str) -> Option<&ModelConfig> {
        self.models.iter().find(|m| m.name == name)
    }
}
