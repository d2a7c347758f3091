//! Reading benchmark examples from JSON or JSONL files.

use crate::models::BenchmarkExample;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("Failed to read dataset {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("Invalid record in {path} at line {line}: {source}")]
    Record {
        path: String,
        line: usize,
        source: serde_json::Error,
    },
}

/// MMLU subject to broad category, keyed by the prefix of `subject/n` ids
const SUBJECT_CATEGORIES: &[(&str, &str)] = &[
    ("abstract_algebra", "stem"),
    ("anatomy", "other"),
    ("astronomy", "stem"),
    ("business_ethics", "other"),
    ("clinical_knowledge", "other"),
    ("college_biology", "stem"),
    ("college_chemistry", "stem"),
    ("college_computer_science", "stem"),
    ("college_mathematics", "stem"),
    ("college_medicine", "other"),
    ("college_physics", "stem"),
    ("computer_security", "stem"),
    ("conceptual_physics", "stem"),
    ("econometrics", "social_sciences"),
    ("electrical_engineering", "stem"),
    ("elementary_mathematics", "stem"),
    ("formal_logic", "humanities"),
    ("global_facts", "other"),
    ("high_school_biology", "stem"),
    ("high_school_chemistry", "stem"),
    ("high_school_computer_science", "stem"),
    ("high_school_european_history", "humanities"),
    ("high_school_geography", "social_sciences"),
    ("high_school_government_and_politics", "social_sciences"),
    ("high_school_macroeconomics", "social_sciences"),
    ("high_school_mathematics", "stem"),
    ("high_school_microeconomics", "social_sciences"),
    ("high_school_physics", "stem"),
    ("high_school_psychology", "social_sciences"),
    ("high_school_statistics", "stem"),
    ("high_school_us_history", "humanities"),
    ("high_school_world_history", "humanities"),
    ("human_aging", "other"),
    ("human_sexuality", "social_sciences"),
    ("international_law", "humanities"),
    ("jurisprudence", "humanities"),
    ("logical_fallacies", "humanities"),
    ("machine_learning", "stem"),
    ("management", "other"),
    ("marketing", "other"),
    ("medical_genetics", "other"),
    ("miscellaneous", "other"),
    ("moral_disputes", "humanities"),
    ("moral_scenarios", "humanities"),
    ("nutrition", "other"),
    ("philosophy", "humanities"),
    ("prehistory", "humanities"),
    ("professional_accounting", "other"),
    ("professional_law", "humanities"),
    ("professional_medicine", "other"),
    ("professional_psychology", "social_sciences"),
    ("public_relations", "social_sciences"),
    ("security_studies", "social_sciences"),
    ("sociology", "social_sciences"),
    ("us_foreign_policy", "social_sciences"),
    ("virology", "other"),
    ("world_religions", "humanities"),
];

/// Category for an MMLU-style `subject/n` id, if the subject is known
pub fn subject_category(id: &str) -> Option<&'static str> {
    let (subject, _) = id.split_once('/')?;
    SUBJECT_CATEGORIES
        .iter()
        .find(|(name, _)| *name == subject)
        .map(|(_, category)| *category)
}

/// Load examples from a JSON array or JSONL file.
///
/// Records without an id get their position as id, and `subject/n` ids fill
/// in a missing category. When `num_examples` is set, a seeded subsample in
/// original order is returned.
pub fn load_examples(
    path: &Path,
    num_examples: Option<usize>,
    seed: u64,
) -> Result<Vec<BenchmarkExample>, DatasetError> {
    let display = path.display().to_string();
    let content = std::fs::read_to_string(path).map_err(|source| DatasetError::Io {
        path: display.clone(),
        source,
    })?;

    let mut examples = parse_examples(&content).map_err(|(line, source)| DatasetError::Record {
        path: display,
        line,
        source,
    })?;

    for (index, example) in examples.iter_mut().enumerate() {
        if example.id.is_empty() {
            example.id = index.to_string();
        }
        if example.category.is_none() {
            example.category = subject_category(&example.id).map(str::to_string);
        }
    }

    Ok(match num_examples {
        Some(n) if n < examples.len() => sample_examples(examples, n, seed),
        _ => examples,
    })
}

fn parse_examples(content: &str) -> Result<Vec<BenchmarkExample>, (usize, serde_json::Error)> {
    if content.trim_start().starts_with('[') {
        return serde_json::from_str(content).map_err(|e| (e.line(), e));
    }

    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| serde_json::from_str(line).map_err(|e| (index + 1, e)))
        .collect()
}

fn sample_examples(examples: Vec<BenchmarkExample>, n: usize, seed: u64) -> Vec<BenchmarkExample> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut picked = rand::seq::index::sample(&mut rng, examples.len(), n).into_vec();
    picked.sort_unstable();

    let mut slots: Vec<Option<BenchmarkExample>> = examples.into_iter().map(Some).collect();
    picked.into_iter().filter_map(|index| slots[index].take()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::QuestionType;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_dataset(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", content).unwrap();
        file
    }

    #[test]
    fn test_load_jsonl_assigns_ids() {
        let file = write_dataset(
            "{\"type\": \"TOF\", \"question\": \"q1\", \"answer\": \"မှန်\"}\n\n{\"type\": \"FIB\", \"question\": \"q2\", \"answer\": \"x\"}\n",
        );
        let examples = load_examples(file.path(), None, 0).unwrap();
        assert_eq!(examples.len(), 2);
        assert_eq!(examples[0].id, "0");
        assert_eq!(examples[1].id, "1");
        assert_eq!(examples[1].question_type, QuestionType::Fib);
    }

    #[test]
    fn test_load_json_array_with_mmlu_ids() {
        let file = write_dataset(
            r#"[
                {"id": "astronomy/12", "type": "MCQ", "question": "q", "answer": "B",
                 "option_a": "a", "option_b": "b", "option_c": "c", "option_d": "d"},
                {"id": "philosophy/3", "type": "MCQ", "question": "q", "answer": "A", "category": "custom"}
            ]"#,
        );
        let examples = load_examples(file.path(), None, 0).unwrap();
        assert_eq!(examples[0].category.as_deref(), Some("stem"));
        assert_eq!(examples[1].category.as_deref(), Some("custom"));
    }

    #[test]
    fn test_invalid_record_reports_line() {
        let file = write_dataset("{\"type\": \"MCQ\", \"question\": \"q\", \"answer\": \"A\"}\n{\"type\": \"ESSAY\"}\n");
        match load_examples(file.path(), None, 0) {
            Err(DatasetError::Record { line, .. }) => assert_eq!(line, 2),
            other => panic!("unexpected result: {:?}", other.map(|e| e.len())),
        }
    }

    #[test]
    fn test_missing_file() {
        let result = load_examples(Path::new("/nonexistent/myeval.jsonl"), None, 0);
        assert!(matches!(result, Err(DatasetError::Io { .. })));
    }

    #[test]
    fn test_seeded_subsample_is_stable_and_ordered() {
        let lines: Vec<String> = (0..20)
            .map(|i| format!("{{\"type\": \"FIB\", \"question\": \"q{}\", \"answer\": \"a\"}}", i))
            .collect();
        let file = write_dataset(&lines.join("\n"));

        let first = load_examples(file.path(), Some(5), 0).unwrap();
        let second = load_examples(file.path(), Some(5), 0).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 5);

        let ids: Vec<usize> = first.iter().map(|e| e.id.parse().unwrap()).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn test_subject_category_lookup() {
        assert_eq!(subject_category("virology/1"), Some("other"));
        assert_eq!(subject_category("unknown_subject/1"), None);
        assert_eq!(subject_category("no-slash"), None);
    }
}
