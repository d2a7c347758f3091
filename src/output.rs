use crate::models::EvalResult;
use crate::runner::EvalReport;
use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Output format options
#[derive(Debug, Clone, Copy, ValueEnum, Serialize, Deserialize)]
pub enum OutputFormat {
    Plain,
    Json,
}

/// Files written for one (eval, model) pair
#[derive(Debug, Clone, PartialEq)]
pub struct ReportPaths {
    pub html: PathBuf,
    pub json: PathBuf,
}

/// File stem shared by the HTML and JSON reports
pub fn report_stem(eval_name: &str, model_name: &str, debug: bool) -> String {
    let suffix = if debug { "_DEBUG" } else { "" };
    format!("{}_{}{}", eval_name, model_name.replace('/', "_"), suffix)
}

/// Flattened metrics, score, interval bounds and failure count
pub fn metrics_json(result: &EvalResult) -> Map<String, Value> {
    let mut json: Map<String, Value> = result
        .metrics
        .iter()
        .map(|(key, value)| (key.clone(), Value::from(*value)))
        .collect();

    json.insert("score".to_string(), result.score.map_or(Value::Null, Value::from));
    if let Some(ci) = &result.confidence_interval {
        json.insert("score_ci_lower".to_string(), Value::from(ci.lower));
        json.insert("score_ci_upper".to_string(), Value::from(ci.upper));
        json.insert("score_bootstrap_std".to_string(), Value::from(ci.bootstrap_std));
    }
    json.insert("failed_examples".to_string(), Value::from(result.failures.len()));
    json
}

/// Full HTML page: metrics table, failures, then every transcript fragment
pub fn make_report(result: &EvalResult) -> String {
    let mut html = String::from(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<style>\n\
         .message { padding: 8px 16px; margin-bottom: 8px; border-radius: 4px; }\n\
         .message.user { background-color: #B2DFDB; }\n\
         .message.assistant { background-color: #B39DDB; }\n\
         .message.system { background-color: #EEEEEE; }\n\
         .role { font-weight: bold; }\n\
         pre { white-space: pre-wrap; }\n\
         </style>\n</head>\n<body>\n",
    );

    html.push_str("<h1>Metrics</h1>\n<table>\n<tr><th>Metric</th><th>Value</th></tr>\n");
    match result.score {
        Some(score) => html.push_str(&format!("<tr><td><b>Score</b></td><td>{:.3}</td></tr>\n", score)),
        None => html.push_str("<tr><td><b>Score</b></td><td>n/a</td></tr>\n"),
    }
    if let Some(ci) = &result.confidence_interval {
        html.push_str(&format!(
            "<tr><td>{:.0}% CI</td><td>[{:.3}, {:.3}]</td></tr>\n",
            ci.confidence * 100.0,
            ci.lower,
            ci.upper
        ));
    }
    for (name, value) in &result.metrics {
        html.push_str(&format!(
            "<tr><td>{}</td><td>{:.3}</td></tr>\n",
            html_escape::encode_text(name),
            value
        ));
    }
    html.push_str("</table>\n");

    if !result.failures.is_empty() {
        html.push_str("<h2>Failed examples</h2>\n<ul>\n");
        for failure in &result.failures {
            html.push_str(&format!(
                "<li>{} ({:?}): {}</li>\n",
                html_escape::encode_text(&failure.example_id),
                failure.stage,
                html_escape::encode_text(&failure.error)
            ));
        }
        html.push_str("</ul>\n");
    }

    html.push_str("<h1>Examples</h1>\n");
    for fragment in &result.htmls {
        html.push_str(fragment);
        html.push_str("<hr>\n");
    }
    html.push_str("</body>\n</html>\n");
    html
}

/// Write `{stem}.html` and `{stem}.json` under `output_dir`
pub fn write_report(
    output_dir: &Path,
    eval_name: &str,
    model_name: &str,
    debug: bool,
    result: &EvalResult,
) -> Result<ReportPaths> {
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create output directory: {}", output_dir.display()))?;

    let stem = report_stem(eval_name, model_name, debug);
    let paths = ReportPaths {
        html: output_dir.join(format!("{}.html", stem)),
        json: output_dir.join(format!("{}.json", stem)),
    };

    std::fs::write(&paths.html, make_report(result))
        .with_context(|| format!("Failed to write report: {}", paths.html.display()))?;

    let json = serde_json::to_string_pretty(&metrics_json(result))?;
    std::fs::write(&paths.json, json)
        .with_context(|| format!("Failed to write metrics: {}", paths.json.display()))?;

    Ok(paths)
}

/// Headline number of a metrics file: `f1_score` when present, else `score`
fn headline_score(metrics: &Map<String, Value>) -> Option<f64> {
    metrics
        .get("f1_score")
        .and_then(Value::as_f64)
        .or_else(|| metrics.get("score").and_then(Value::as_f64))
}

fn read_metrics(path: &Path) -> Result<Map<String, Value>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read metrics: {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse metrics: {}", path.display()))
}

/// Read every existing metrics file for the given evals and models; unreadable ones are skipped
pub fn collect_scores(
    output_dir: &Path,
    eval_names: &[String],
    model_names: &[String],
    debug: bool,
) -> Result<BTreeMap<(String, String), f64>> {
    let mut scores = BTreeMap::new();
    for eval_name in eval_names {
        for model_name in model_names {
            let path = output_dir.join(format!("{}.json", report_stem(eval_name, model_name, debug)));
            if !path.exists() {
                continue;
            }
            let metrics = match read_metrics(&path) {
                Ok(metrics) => metrics,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable metrics file");
                    continue;
                }
            };
            if let Some(score) = headline_score(&metrics) {
                scores.insert((model_name.clone(), eval_name.clone()), score);
            }
        }
    }
    Ok(scores)
}

/// Markdown pivot with one row per model and one column per eval
pub fn render_merge_table(
    scores: &BTreeMap<(String, String), f64>,
    eval_names: &[String],
    model_names: &[String],
) -> String {
    let mut table = format!("| Model | {} |\n", eval_names.join(" | "));
    table.push_str(&format!("|---|{}\n", "---|".repeat(eval_names.len())));

    for model_name in model_names {
        let cells: Vec<String> = eval_names
            .iter()
            .map(|eval_name| {
                scores
                    .get(&(model_name.clone(), eval_name.clone()))
                    .map_or_else(|| "-".to_string(), |score| format!("{:.3}", score))
            })
            .collect();
        table.push_str(&format!("| {} | {} |\n", model_name, cells.join(" | ")));
    }
    table
}

/// Merge all metrics files into `summary{_DEBUG}.md` and return the table
pub fn merge_reports(
    output_dir: &Path,
    eval_names: &[String],
    model_names: &[String],
    debug: bool,
) -> Result<String> {
    let scores = collect_scores(output_dir, eval_names, model_names, debug)?;
    let table = render_merge_table(&scores, eval_names, model_names);

    let path = output_dir.join(if debug { "summary_DEBUG.md" } else { "summary.md" });
    std::fs::write(&path, &table)
        .with_context(|| format!("Failed to write summary: {}", path.display()))?;
    Ok(table)
}

/// Print evaluation results in the specified format
pub fn print_results(reports: &[EvalReport], format: OutputFormat) {
    match format {
        OutputFormat::Plain => print_plain(reports),
        OutputFormat::Json => print_json(reports),
    }
}

fn print_plain(reports: &[EvalReport]) {
    for (i, report) in reports.iter().enumerate() {
        println!("=== {} / {} ===", report.eval_name, report.model_name);
        println!();
        print!("{}", format_summary(&report.result));
        println!("Report: {}", report.paths.html.display());
        println!("Metrics: {}", report.paths.json.display());

        if i < reports.len() - 1 {
            println!("{}", "=".repeat(50));
            println!();
        }
    }
}

/// Plain text score line, interval and metric table
fn format_summary(result: &EvalResult) -> String {
    let mut summary = match result.score {
        Some(score) => format!("Score: {:.3}", score),
        None => "Score: n/a (no graded examples)".to_string(),
    };
    if let Some(ci) = &result.confidence_interval {
        summary.push_str(&format!(
            "  ({:.0}% CI {:.3} to {:.3}, bootstrap std {:.3})",
            ci.confidence * 100.0,
            ci.lower,
            ci.upper,
            ci.bootstrap_std
        ));
    }
    summary.push('\n');

    if !result.metrics.is_empty() {
        summary.push_str(&format!("{:<28} {:<8}\n", "Metric", "Mean"));
        summary.push_str(&format!("{}\n", "-".repeat(37)));
        for (name, value) in &result.metrics {
            summary.push_str(&format!("{:<28} {:<8.3}\n", name, value));
        }
    }
    if !result.failures.is_empty() {
        summary.push_str(&format!("Failed examples: {}\n", result.failures.len()));
    }
    summary
}

fn print_json(reports: &[EvalReport]) {
    let entries: Vec<Value> = reports
        .iter()
        .map(|report| {
            let mut entry = metrics_json(&report.result);
            entry.insert("eval".to_string(), Value::from(report.eval_name.clone()));
            entry.insert("model".to_string(), Value::from(report.model_name.clone()));
            Value::Object(entry)
        })
        .collect();

    match serde_json::to_string_pretty(&entries) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error serializing results to JSON: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConfidenceInterval, FailedExample, FailureStage, QuestionType};

    fn create_test_result() -> EvalResult {
        EvalResult {
            score: Some(0.75),
            metrics: BTreeMap::from([("MCQ".to_string(), 0.75), ("stem".to_string(), 0.5)]),
            confidence_interval: Some(ConfidenceInterval {
                lower: 0.5,
                upper: 1.0,
                bootstrap_std: 0.125,
                confidence: 0.95,
            }),
            htmls: vec!["<p>first</p>\n".to_string(), "<p>second</p>\n".to_string()],
            convos: vec![vec![], vec![]],
            failures: vec![FailedExample {
                example_id: "<9>".to_string(),
                question_type: QuestionType::Mcq,
                stage: FailureStage::Sampling,
                error: "retries exhausted".to_string(),
            }],
        }
    }

    #[test]
    fn test_report_stem() {
        assert_eq!(report_stem("mg12l", "gpt-4o", false), "mg12l_gpt-4o");
        assert_eq!(report_stem("mg12l", "google/gemma", true), "mg12l_google_gemma_DEBUG");
    }

    #[test]
    fn test_metrics_json_flattens_fields() {
        let json = metrics_json(&create_test_result());
        assert_eq!(json["score"], 0.75);
        assert_eq!(json["MCQ"], 0.75);
        assert_eq!(json["score_ci_lower"], 0.5);
        assert_eq!(json["score_ci_upper"], 1.0);
        assert_eq!(json["score_bootstrap_std"], 0.125);
        assert_eq!(json["failed_examples"], 1);
    }

    #[test]
    fn test_metrics_json_empty_result() {
        let result = EvalResult {
            score: None,
            metrics: BTreeMap::new(),
            confidence_interval: None,
            htmls: vec![],
            convos: vec![],
            failures: vec![],
        };
        let json = metrics_json(&result);
        assert!(json["score"].is_null());
        assert!(!json.contains_key("score_ci_lower"));
    }

    #[test]
    fn test_make_report_contains_table_and_fragments() {
        let html = make_report(&create_test_result());
        assert!(html.contains("<tr><td><b>Score</b></td><td>0.750</td></tr>"));
        assert!(html.contains("<tr><td>stem</td><td>0.500</td></tr>"));
        assert!(html.contains("95% CI"));
        assert!(html.contains("&lt;9&gt;"));

        let first = html.find("<p>first</p>").unwrap();
        let second = html.find("<p>second</p>").unwrap();
        assert!(html.find("Metrics").unwrap() < first);
        assert!(first < second);
    }

    #[test]
    fn test_write_report_creates_files() {
        let dir = tempfile::tempdir().unwrap();
        let output_dir = dir.path().join("nested");
        let paths = write_report(&output_dir, "mg12l", "aya", true, &create_test_result()).unwrap();

        assert_eq!(paths.html, output_dir.join("mg12l_aya_DEBUG.html"));
        assert!(paths.html.exists());
        let json: Map<String, Value> =
            serde_json::from_str(&std::fs::read_to_string(&paths.json).unwrap()).unwrap();
        assert_eq!(json["score"], 0.75);
    }

    #[test]
    fn test_merge_prefers_f1_score() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("mg12l_aya.json"), r#"{"score": 0.5}"#).unwrap();
        std::fs::write(dir.path().join("flores_aya.json"), r#"{"score": 0.1, "f1_score": 0.9}"#).unwrap();
        std::fs::write(dir.path().join("mg12l_gpt-4o.json"), r#"{"score": 0.8126}"#).unwrap();

        let evals = vec!["mg12l".to_string(), "flores".to_string()];
        let models = vec!["aya".to_string(), "gpt-4o".to_string()];
        let table = merge_reports(dir.path(), &evals, &models, false).unwrap();

        assert_eq!(
            table,
            "| Model | mg12l | flores |\n|---|---|---|\n| aya | 0.500 | 0.900 |\n| gpt-4o | 0.813 | - |\n"
        );
        assert!(dir.path().join("summary.md").exists());
    }

    #[test]
    fn test_merge_skips_corrupt_metrics() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("mg12l_aya.json"), "not json").unwrap();
        std::fs::write(dir.path().join("mg12l_gpt-4o.json"), r#"{"score": 0.25}"#).unwrap();

        let models = vec!["aya".to_string(), "gpt-4o".to_string()];
        let scores = collect_scores(dir.path(), &["mg12l".to_string()], &models, false).unwrap();
        assert_eq!(scores.len(), 1);
        assert_eq!(scores[&("gpt-4o".to_string(), "mg12l".to_string())], 0.25);
    }

    #[test]
    fn test_format_summary() {
        let summary = format_summary(&create_test_result());
        assert!(summary.starts_with("Score: 0.750  (95% CI 0.500 to 1.000"));
        assert!(summary.contains("MCQ"));
        assert!(summary.contains("Failed examples: 1"));
    }
}
