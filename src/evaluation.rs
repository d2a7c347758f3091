use crate::extraction::{extract_answer, normalize_response};
use crate::models::{BenchmarkExample, Message, MessageList, QuestionType, Role, SingleEvalResult};
use crate::sampler::{Sampler, SamplerError, pack_message};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};
use thiserror::Error;
use tracing::debug;

pub const CONTENT_RELEVANCY: &str = "content_relevancy";
pub const REGISTER_APPROPRIATENESS: &str = "register_appropriateness";
pub const GRAMMATICAL_COMPETENCE: &str = "grammatical_competence";
pub const RUBRIC_SCORE: &str = "rubric_score";

/// Keys with a fixed meaning in metrics and reports; categories never take these
const RESERVED_METRIC_KEYS: &[&str] = &[
    CONTENT_RELEVANCY,
    REGISTER_APPROPRIATENESS,
    GRAMMATICAL_COMPETENCE,
    RUBRIC_SCORE,
    "score",
    "score_ci_lower",
    "score_ci_upper",
    "score_bootstrap_std",
    "failed_examples",
    "f1_score",
];

/// Metric key for an example category, prefixed when it would shadow a reserved key
pub fn category_key(category: &str) -> String {
    let shadows_question_type = category.parse::<QuestionType>().is_ok();
    if shadows_question_type || RESERVED_METRIC_KEYS.contains(&category) {
        format!("category_{}", category)
    } else {
        category.to_string()
    }
}

const JUDGE_TEMPLATE: &str = r#"You are grading an answer written in Burmese (Myanmar language).

Question:
{question}

Reference answer:
{target}

Candidate answer:
{response}

Score the candidate answer on three criteria:
- Content Relevancy (0-3): does it address the question and agree with the reference answer?
- Register Appropriateness (0-3): is the level of formality suitable for an exam answer in Burmese?
- Grammatical Competence (1-5): is the Burmese grammatical, well-formed and natural?

Briefly explain your reasoning, then end your reply with exactly these three lines:
Content Relevancy: <integer 0-3>
Register Appropriateness: <integer 0-3>
Grammatical Competence: <integer 1-5>"#;

static CONTENT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| label_pattern(r"content\s+relevancy"));
static REGISTER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| label_pattern(r"register\s+appropriateness"));
static GRAMMAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    label_pattern(r"gramm(?:atical|ar)(?:\s*(?:/|and)\s*syntactic)?\s+competence")
});

fn label_pattern(label: &str) -> Regex {
    let pattern = format!(r"(?i){label}\s*\**\s*[:：]\s*\**\s*(\d+)");
    match Regex::new(&pattern) {
        Ok(regex) => regex,
        Err(e) => panic!("invalid rubric pattern {pattern:?}: {e}"),
    }
}

#[derive(Debug, Error)]
pub enum GradeError {
    #[error("No judge sampler configured for {0} questions")]
    MissingJudge(QuestionType),
    #[error("Judge call failed: {0}")]
    Judge(#[from] SamplerError),
    #[error("Judge output failed rubric validation: {raw}")]
    RubricValidation { raw: String },
}

/// Validated judge scores
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RubricScores {
    /// 0..=3
    pub content_relevancy: u32,
    /// 0..=3
    pub register_appropriateness: u32,
    /// 1..=5
    pub grammatical_competence: u32,
}

impl RubricScores {
    /// Unweighted mean of the three sub-scores, each scaled to [0, 1]
    pub fn composite(&self) -> f64 {
        let content = self.content_relevancy as f64 / 3.0;
        let register = self.register_appropriateness as f64 / 3.0;
        let grammar = self.grammatical_competence as f64 / 5.0;
        (content + register + grammar) / 3.0
    }

    /// Normalized sub-scores and the composite under their own metric keys
    pub fn metrics(&self) -> BTreeMap<String, f64> {
        BTreeMap::from([
            (CONTENT_RELEVANCY.to_string(), self.content_relevancy as f64 / 3.0),
            (REGISTER_APPROPRIATENESS.to_string(), self.register_appropriateness as f64 / 3.0),
            (GRAMMATICAL_COMPETENCE.to_string(), self.grammatical_competence as f64 / 5.0),
            (RUBRIC_SCORE.to_string(), self.composite()),
        ])
    }
}

fn capture_score(pattern: &Regex, text: &str, range: std::ops::RangeInclusive<u32>) -> Option<u32> {
    pattern
        .captures(text)
        .and_then(|captures| captures.get(1))
        .and_then(|m| m.as_str().parse::<u32>().ok())
        .filter(|score| range.contains(score))
}

/// Parse the judge output; `None` unless every sub-score is present and in range
pub fn parse_rubric(judge_output: &str) -> Option<RubricScores> {
    Some(RubricScores {
        content_relevancy: capture_score(&CONTENT_PATTERN, judge_output, 0..=3)?,
        register_appropriateness: capture_score(&REGISTER_PATTERN, judge_output, 0..=3)?,
        grammatical_competence: capture_score(&GRAMMAR_PATTERN, judge_output, 1..=5)?,
    })
}

/// Build the grading prompt sent to the judge
pub fn build_judge_prompt(question: &str, target: &str, response: &str) -> String {
    JUDGE_TEMPLATE
        .replace("{question}", question.trim())
        .replace("{target}", target.trim())
        .replace("{response}", response.trim())
}

/// 1.0 when the extracted answer equals the ground truth exactly
pub fn exact_match_score(extracted: Option<&str>, answer: &str) -> f64 {
    match extracted {
        Some(extracted) if extracted == answer => 1.0,
        _ => 0.0,
    }
}

/// Scores model responses, either by exact match or through a judge model
pub struct Grader {
    judge: Option<Arc<dyn Sampler>>,
}

impl Grader {
    /// Create a grader; without a judge, open-ended questions cannot be graded
    pub fn new(judge: Option<Arc<dyn Sampler>>) -> Self {
        Self { judge }
    }

    /// Grade one response against its example
    pub async fn grade(
        &self,
        example: &BenchmarkExample,
        prompt_messages: &MessageList,
        response_text: &str,
    ) -> Result<SingleEvalResult, GradeError> {
        let response_text = normalize_response(response_text);
        let (score, extracted, mut metrics) = if example.question_type.is_open_ended() {
            let rubric = self.grade_rubric(example, &response_text).await?;
            (rubric.composite(), None, rubric.metrics())
        } else {
            let extracted = extract_answer(&response_text, example.question_type, &example.answer);
            let score = exact_match_score(extracted.as_deref(), &example.answer);
            (score, extracted, BTreeMap::new())
        };

        debug!(
            example_id = %example.id,
            question_type = %example.question_type,
            score,
            "Graded example"
        );

        metrics.insert(example.question_type.to_string(), score);
        if let Some(category) = &example.category {
            metrics.insert(category_key(category), score);
        }

        let assistant_turn = pack_message(Role::Assistant, response_text);
        let html = render_html(prompt_messages, &assistant_turn, score, &example.answer, extracted.as_deref());
        let mut convo = prompt_messages.clone();
        convo.push(assistant_turn);

        Ok(SingleEvalResult {
            score,
            metrics,
            html,
            convo,
        })
    }

    /// Ask the judge for rubric scores and validate them
    async fn grade_rubric(
        &self,
        example: &BenchmarkExample,
        response_text: &str,
    ) -> Result<RubricScores, GradeError> {
        let judge = self
            .judge
            .as_ref()
            .ok_or(GradeError::MissingJudge(example.question_type))?;

        let prompt = build_judge_prompt(&example.question, &example.answer, response_text);
        let judge_response = judge.call(&vec![pack_message(Role::User, prompt)]).await?;

        parse_rubric(&judge_response.response_text).ok_or(GradeError::RubricValidation {
            raw: judge_response.response_text,
        })
    }
}

fn render_message(role: Role, content: &str) -> String {
    format!(
        "<div class=\"message {role}\">\n<div class=\"role\">{role}</div>\n<div class=\"content\"><pre>{}</pre></div>\n</div>\n",
        html_escape::encode_text(content)
    )
}

/// Transcript fragment for one example
fn render_html(
    prompt_messages: &MessageList,
    next_message: &Message,
    score: f64,
    correct_answer: &str,
    extracted_answer: Option<&str>,
) -> String {
    let mut html = String::from("<h3>Prompt conversation</h3>\n");
    for message in prompt_messages {
        html.push_str(&render_message(message.role, &message.content));
    }
    html.push_str("<h3>Sampled message</h3>\n");
    html.push_str(&render_message(next_message.role, &next_message.content));
    html.push_str("<h3>Results</h3>\n");
    html.push_str(&format!(
        "<p>Correct Answer: {}</p>\n<p>Extracted Answer: {}</p>\n<p>Score: {}</p>\n",
        html_escape::encode_text(correct_answer),
        html_escape::encode_text(extracted_answer.unwrap_or("None")),
        score
    ));
    html
}
