//! Reduction of per-example results into a run-level [`EvalResult`].

use crate::config::BootstrapConfig;
use crate::models::{ConfidenceInterval, EvalResult, FailedExample, MessageList, SingleEvalResult};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;

/// Combine results into an overall score, sparse metric means and a bootstrap interval.
///
/// Each metric is averaged only over the results that reported it. An empty
/// input yields `score: None` rather than zero.
pub fn aggregate_results(
    results: Vec<SingleEvalResult>,
    failures: Vec<FailedExample>,
    bootstrap: &BootstrapConfig,
) -> EvalResult {
    let scores: Vec<f64> = results.iter().map(|r| r.score).collect();

    let mut sums: BTreeMap<String, (f64, usize)> = BTreeMap::new();
    for result in &results {
        for (key, value) in &result.metrics {
            let entry = sums.entry(key.clone()).or_insert((0.0, 0));
            entry.0 += value;
            entry.1 += 1;
        }
    }
    let metrics = sums
        .into_iter()
        .map(|(key, (sum, count))| (key, sum / count as f64))
        .collect();

    let (htmls, convos): (Vec<String>, Vec<MessageList>) = results.into_iter().map(|r| (r.html, r.convo)).unzip();

    EvalResult {
        score: calculate_mean(&scores),
        metrics,
        confidence_interval: bootstrap_interval(&scores, bootstrap),
        htmls,
        convos,
        failures,
    }
}

fn calculate_mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

fn calculate_std(values: &[f64]) -> f64 {
    match calculate_mean(values) {
        Some(mean) if values.len() > 1 => {
            let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
            variance.sqrt()
        }
        _ => 0.0,
    }
}

/// Percentile bootstrap interval of the mean with a seeded resampler
pub fn bootstrap_interval(samples: &[f64], config: &BootstrapConfig) -> Option<ConfidenceInterval> {
    let mean = calculate_mean(samples)?;
    if samples.len() < 2 || config.samples == 0 {
        return Some(ConfidenceInterval {
            lower: mean,
            upper: mean,
            bootstrap_std: 0.0,
            confidence: config.confidence,
        });
    }

    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let mut means: Vec<f64> = (0..config.samples)
        .map(|_| {
            let sum: f64 = (0..samples.len())
                .map(|_| samples[rng.next_u64() as usize % samples.len()])
                .sum();
            sum / samples.len() as f64
        })
        .collect();
    means.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let alpha = 1.0 - config.confidence;
    let last = means.len() - 1;
    let lower_idx = ((means.len() as f64 * (alpha / 2.0)).floor() as usize).min(last);
    let upper_idx = ((means.len() as f64 * (1.0 - alpha / 2.0)).ceil() as usize).min(last);

    Some(ConfidenceInterval {
        lower: means[lower_idx],
        upper: means[upper_idx],
        bootstrap_std: calculate_std(&means),
        confidence: config.confidence,
    })
}
