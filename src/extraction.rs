//! Answer extraction from free-form model responses.
//!
//! The model is asked to finish with an announcement such as `အဖြေ: က`. The
//! extractor tries each announcement phrase in priority order with a
//! question-type specific pattern and keeps the first match.

use crate::models::QuestionType;
use regex::Regex;
use std::sync::LazyLock;

/// Ways of announcing the answer, in priority order
pub const ANSWER_ANNOUNCEMENTS: &[&str] = &[
    r"အဖြေ\s*:(?:\n{0,2})?",
    r"အဖြေမှန်\s*:(?:\n{0,2})?",
    r"Answer\s*:(?:\n{0,2})?",
];

/// Burmese choice letters and their canonical forms
const CHOICE_LETTERS: &[(&str, &str)] = &[("က", "A"), ("ခ", "B"), ("ဂ", "C"), ("ဃ", "D")];

pub const TRUE_TOKEN: &str = "မှန်";
pub const FALSE_TOKEN: &str = "မှား";

static TRUE_FALSE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    ANSWER_ANNOUNCEMENTS
        .iter()
        .map(|head| compile(&format!(r"(?i){head}[ \t]*(?:\()?({TRUE_TOKEN}|{FALSE_TOKEN})(?:\))?")))
        .collect()
});

static FILL_IN_BLANK_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    ANSWER_ANNOUNCEMENTS
        .iter()
        .map(|head| compile(&format!(r"(?im){head}[ \t]*(?:\()?(.*?)(?:\))?[ \t]*$")))
        .collect()
});

/// Whole single-line response, used when no announcement is present
static FILL_IN_BLANK_FALLBACK: LazyLock<Regex> =
    LazyLock::new(|| compile(r"^[ \t]*(?:\()?(.*?)(?:\))?[ \t]*$"));

/// Markup models wrap answers in, removed before matching
const MARKUP_FRAGMENTS: &[&str] = &[
    "**",
    "$\\boxed{",
    "}$",
    "\\$",
    "$\\text{",
    "$",
    "\\mathrm{",
    "\\{",
    "\\text",
    "\\(",
    "\\mathbf{",
    "{",
    "\\boxed",
];

const ZERO_WIDTH: &[char] = &['\u{200b}', '\u{200c}', '\u{200d}', '\u{feff}'];

fn compile(pattern: &str) -> Regex {
    match Regex::new(pattern) {
        Ok(regex) => regex,
        Err(e) => panic!("invalid built-in answer pattern {pattern:?}: {e}"),
    }
}

/// Strip markup and invisible characters so patterns see plain text
pub fn normalize_response(response: &str) -> String {
    let mut text: String = response.chars().filter(|c| !ZERO_WIDTH.contains(c)).collect();
    for fragment in MARKUP_FRAGMENTS {
        text = text.replace(fragment, "");
    }
    text.replace("\r\n", "\n").trim().to_string()
}

/// Map a Burmese choice letter to its canonical form; ASCII letters are upper-cased
pub fn normalize_choice(letter: &str) -> String {
    let letter = letter.trim();
    CHOICE_LETTERS
        .iter()
        .find(|(native, _)| *native == letter)
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or_else(|| letter.to_ascii_uppercase())
}

/// Canonical letter back to its Burmese form, used when rendering options
pub fn native_choice(index: usize) -> Option<&'static str> {
    CHOICE_LETTERS.get(index).map(|(native, _)| *native)
}

fn multiple_choice_patterns(expected: &str) -> Vec<Regex> {
    let expected = regex::escape(expected.trim());
    // A letter must stand alone, so prose such as "all" or "ခန့်မှန်း" is not a choice
    let alternatives = if expected.is_empty() {
        r"[က-ဃ]\b".to_string()
    } else {
        format!(r"(?:[က-ဃ]|{expected})\b")
    };
    ANSWER_ANNOUNCEMENTS
        .iter()
        .map(|head| compile(&format!(r"(?i){head}[ \t]*(?:\()?({alternatives})(?:\))?")))
        .collect()
}

fn first_capture(patterns: &[Regex], text: &str) -> Option<String> {
    patterns.iter().find_map(|pattern| {
        pattern
            .captures(text)
            .and_then(|captures| captures.get(1))
            .map(|m| m.as_str().trim().to_string())
    })
}

/// Extract the predicted answer from an already normalized response.
///
/// `expected` is only used for multiple choice, to accept the canonical
/// letter alongside the Burmese ones. Open-ended types always yield `None`.
pub fn extract_answer(response: &str, question_type: QuestionType, expected: &str) -> Option<String> {
    let extracted = match question_type {
        QuestionType::Mcq => first_capture(&multiple_choice_patterns(expected), response)
            .map(|letter| normalize_choice(&letter)),
        QuestionType::Tof => first_capture(&TRUE_FALSE_PATTERNS, response),
        QuestionType::Fib => first_capture(&FILL_IN_BLANK_PATTERNS, response)
            .or_else(|| first_capture(std::slice::from_ref(&*FILL_IN_BLANK_FALLBACK), response.trim())),
        QuestionType::ShortQna | QuestionType::LongQna | QuestionType::MetaphorQna => None,
    };
    extracted.filter(|answer| !answer.is_empty())
}
