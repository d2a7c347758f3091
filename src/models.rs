use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

/// Kind of benchmark question, decides both the prompt template and the scoring path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QuestionType {
    #[serde(rename = "MCQ")]
    Mcq,
    #[serde(rename = "TOF")]
    Tof,
    #[serde(rename = "FIB")]
    Fib,
    #[serde(rename = "SHORT_QNA")]
    ShortQna,
    #[serde(rename = "LONG_QNA")]
    LongQna,
    #[serde(rename = "METAPHOR_QNA")]
    MetaphorQna,
}

impl QuestionType {
    /// Name used for the per-type metric key
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionType::Mcq => "MCQ",
            QuestionType::Tof => "TOF",
            QuestionType::Fib => "FIB",
            QuestionType::ShortQna => "SHORT_QNA",
            QuestionType::LongQna => "LONG_QNA",
            QuestionType::MetaphorQna => "METAPHOR_QNA",
        }
    }

    /// Open-ended types have no deterministic answer and go through the judge
    pub fn is_open_ended(&self) -> bool {
        match self {
            QuestionType::Mcq | QuestionType::Tof | QuestionType::Fib => false,
            QuestionType::ShortQna | QuestionType::LongQna | QuestionType::MetaphorQna => true,
        }
    }
}

impl fmt::Display for QuestionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuestionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MCQ" => Ok(QuestionType::Mcq),
            "TOF" => Ok(QuestionType::Tof),
            "FIB" => Ok(QuestionType::Fib),
            "SHORT_QNA" => Ok(QuestionType::ShortQna),
            "LONG_QNA" => Ok(QuestionType::LongQna),
            "METAPHOR_QNA" => Ok(QuestionType::MetaphorQna),
            other => Err(format!("Unknown question type: {}", other)),
        }
    }
}

/// A single benchmark record, read-only for the duration of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkExample {
    /// Stable identifier used when reporting failures
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    pub question: String,
    /// Ground truth; canonical letter for MCQ, `မှန်`/`မှား` for TOF
    pub answer: String,
    #[serde(default)]
    pub option_a: Option<String>,
    #[serde(default)]
    pub option_b: Option<String>,
    #[serde(default)]
    pub option_c: Option<String>,
    #[serde(default)]
    pub option_d: Option<String>,
    /// Subject or category tag reported as its own metric
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

/// Conversation order is replayed verbatim to the sampler
pub type MessageList = Vec<Message>;

/// Response from a sampler backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplerResponse {
    /// The generated text response
    pub response_text: String,
    /// Messages exactly as passed to the sampler
    pub actual_queried_message_list: MessageList,
    /// Backend metadata (tokens used, etc.)
    pub response_metadata: HashMap<String, serde_json::Value>,
}

/// Graded outcome of one benchmark example
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SingleEvalResult {
    pub score: f64,
    /// Sparse metric map; not every example reports every key
    pub metrics: BTreeMap<String, f64>,
    /// Rendered transcript fragment
    pub html: String,
    /// Prompt messages plus the sampled assistant turn
    pub convo: MessageList,
}

/// Pipeline stage at which an example failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Sampling,
    Grading,
    RubricValidation,
    Task,
}

/// Example that produced no result, kept for the fix pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedExample {
    pub example_id: String,
    pub question_type: QuestionType,
    pub stage: FailureStage,
    pub error: String,
}

/// Bootstrapped interval around the mean score
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceInterval {
    pub lower: f64,
    pub upper: f64,
    pub bootstrap_std: f64,
    pub confidence: f64,
}

/// Aggregate over all results of one (eval, model) run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalResult {
    /// Mean score; `None` when nothing was scored
    pub score: Option<f64>,
    pub metrics: BTreeMap<String, f64>,
    pub confidence_interval: Option<ConfidenceInterval>,
    pub htmls: Vec<String>,
    pub convos: Vec<MessageList>,
    pub failures: Vec<FailedExample>,
}
