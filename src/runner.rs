use crate::aggregate::aggregate_results;
use crate::config::{Config, EvalConfig};
use crate::datasets::load_examples;
use crate::evaluation::{GradeError, Grader};
use crate::models::{
    BenchmarkExample, EvalResult, FailedExample, FailureStage, Role, SingleEvalResult,
};
use crate::output::{self, ReportPaths};
use crate::prompts::format_question;
use crate::sampler::{Sampler, pack_message};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

/// Receives progress updates from running tasks
pub trait ProgressReporter: Send + Sync {
    fn report(&self, completed: usize, total: usize);
}

/// Reports progress through the log
pub struct LogReporter;

impl ProgressReporter for LogReporter {
    fn report(&self, completed: usize, total: usize) {
        if completed == total || completed % 10 == 0 {
            info!(completed, total, "Evaluation progress");
        } else {
            debug!(completed, total, "Evaluation progress");
        }
    }
}

/// Results of one pass over a set of examples, keyed by submission index
#[derive(Debug, Default)]
pub struct RunOutcome {
    /// Sorted by the example's position in the submitted slice
    pub results: Vec<(usize, SingleEvalResult)>,
    /// Ids may repeat across a dataset; the index identifies the example
    pub failures: Vec<(usize, FailedExample)>,
}

impl RunOutcome {
    /// Drop the indices, keeping result order
    pub fn into_parts(self) -> (Vec<SingleEvalResult>, Vec<FailedExample>) {
        let results = self.results.into_iter().map(|(_, result)| result).collect();
        let failures = self.failures.into_iter().map(|(_, failure)| failure).collect();
        (results, failures)
    }
}

/// Drives examples through prompt, sampler and grader with bounded concurrency
pub struct Runner {
    concurrency: usize,
    reporter: Arc<dyn ProgressReporter>,
}

impl Runner {
    /// Create a runner allowing `concurrency` examples in flight
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
            reporter: Arc::new(LogReporter),
        }
    }

    /// Set a custom progress reporter
    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Evaluate every example; failures are recorded, never propagated
    pub async fn run(
        &self,
        examples: &[BenchmarkExample],
        sampler: Arc<dyn Sampler>,
        grader: Arc<Grader>,
    ) -> Result<RunOutcome> {
        let indices = (0..examples.len()).collect();
        self.run_indices(Arc::new(examples.to_vec()), indices, sampler, grader)
            .await
    }

    /// Re-query only the failed examples of a previous pass and merge what recovers
    pub async fn rerun_failed(
        &self,
        examples: &[BenchmarkExample],
        previous: RunOutcome,
        sampler: Arc<dyn Sampler>,
        grader: Arc<Grader>,
    ) -> Result<RunOutcome> {
        if previous.failures.is_empty() {
            return Ok(previous);
        }

        let indices: Vec<usize> = previous
            .failures
            .iter()
            .map(|(index, _)| *index)
            .filter(|index| *index < examples.len())
            .collect();

        info!(failed = indices.len(), "Re-running failed examples");
        let retried = self
            .run_indices(Arc::new(examples.to_vec()), indices, sampler, grader)
            .await?;

        let mut results = previous.results;
        results.extend(retried.results);
        results.sort_by_key(|(index, _)| *index);

        Ok(RunOutcome {
            results,
            failures: retried.failures,
        })
    }

    async fn run_indices(
        &self,
        examples: Arc<Vec<BenchmarkExample>>,
        indices: Vec<usize>,
        sampler: Arc<dyn Sampler>,
        grader: Arc<Grader>,
    ) -> Result<RunOutcome> {
        let total = indices.len();
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let completed = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::with_capacity(total);

        for index in indices {
            let permit = semaphore.clone().acquire_owned().await?;
            let examples = examples.clone();
            let sampler = sampler.clone();
            let grader = grader.clone();
            let completed = completed.clone();
            let reporter = self.reporter.clone();

            let handle = tokio::spawn(async move {
                let _permit = permit;
                let example = &examples[index];
                let outcome = evaluate_example(example, sampler.as_ref(), &grader).await;

                let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                reporter.report(done, total);
                outcome
            });
            handles.push((index, handle));
        }

        let mut outcome = RunOutcome::default();
        for (index, handle) in handles {
            match handle.await {
                Ok(Ok(result)) => outcome.results.push((index, result)),
                Ok(Err(failure)) => outcome.failures.push((index, failure)),
                Err(join_error) => {
                    let example = &examples[index];
                    error!(example_id = %example.id, error = %join_error, "Evaluation task panicked");
                    outcome
                        .failures
                        .push((index, failure(example, FailureStage::Task, join_error.to_string())));
                }
            }
        }

        Ok(outcome)
    }
}

/// Format, sample, extract and grade one example, strictly in that order
async fn evaluate_example(
    example: &BenchmarkExample,
    sampler: &dyn Sampler,
    grader: &Grader,
) -> Result<SingleEvalResult, FailedExample> {
    let prompt_messages = vec![pack_message(Role::User, format_question(example))];

    let response = sampler.call(&prompt_messages).await.map_err(|e| {
        warn!(example_id = %example.id, error = %e, "Sampling failed");
        failure(example, FailureStage::Sampling, e.to_string())
    })?;

    grader
        .grade(example, &prompt_messages, &response.response_text)
        .await
        .map_err(|e| {
            warn!(example_id = %example.id, error = %e, "Grading failed");
            let stage = match e {
                GradeError::RubricValidation { .. } => FailureStage::RubricValidation,
                GradeError::MissingJudge(_) | GradeError::Judge(_) => FailureStage::Grading,
            };
            failure(example, stage, e.to_string())
        })
}

fn failure(example: &BenchmarkExample, stage: FailureStage, error: String) -> FailedExample {
    FailedExample {
        example_id: example.id.clone(),
        question_type: example.question_type,
        stage,
        error,
    }
}

/// Options that come from the command line rather than the run file
#[derive(Debug, Clone, Default)]
pub struct SuiteOptions {
    pub debug: bool,
    /// Overrides every eval's `num_examples`
    pub num_examples: Option<usize>,
}

/// Outcome of one (eval, model) pair
#[derive(Debug)]
pub struct EvalReport {
    pub eval_name: String,
    pub model_name: String,
    pub result: EvalResult,
    pub paths: ReportPaths,
}

/// Runs every selected eval against every selected model and writes the reports
pub struct EvaluationSuite {
    config: Config,
    samplers: Vec<Arc<dyn Sampler>>,
    grader: Arc<Grader>,
    runner: Runner,
    options: SuiteOptions,
}

impl EvaluationSuite {
    pub fn new(
        config: Config,
        samplers: Vec<Arc<dyn Sampler>>,
        judge: Option<Arc<dyn Sampler>>,
        options: SuiteOptions,
    ) -> Self {
        let runner = Runner::new(config.concurrency);
        Self {
            config,
            samplers,
            grader: Arc::new(Grader::new(judge)),
            runner,
            options,
        }
    }

    /// Run all evaluations, model by model
    pub async fn run_evaluations(&self, evals: &[EvalConfig]) -> Result<Vec<EvalReport>> {
        let mut reports = Vec::new();

        for eval in evals {
            let examples = self.load_eval_examples(eval)?;
            info!(eval = %eval.name, examples = examples.len(), "Loaded evaluation");

            for sampler in &self.samplers {
                let report = self.run_single_evaluation(eval, &examples, sampler.clone()).await?;
                reports.push(report);
            }
        }

        Ok(reports)
    }

    fn load_eval_examples(&self, eval: &EvalConfig) -> Result<Vec<BenchmarkExample>> {
        let num_examples = match (self.options.num_examples, self.options.debug) {
            (Some(n), _) => Some(n),
            (None, true) => Some(5),
            (None, false) => eval.num_examples,
        };

        load_examples(&eval.dataset, num_examples, self.config.bootstrap.seed)
            .with_context(|| format!("Failed to load examples for evaluation {}", eval.name))
    }

    /// Run one eval against one model, including a fix pass over failures
    async fn run_single_evaluation(
        &self,
        eval: &EvalConfig,
        examples: &[BenchmarkExample],
        sampler: Arc<dyn Sampler>,
    ) -> Result<EvalReport> {
        let model_name = sampler.name().to_string();
        info!(eval = %eval.name, model = %model_name, "Running evaluation");

        let first_pass = self
            .runner
            .run(examples, sampler.clone(), self.grader.clone())
            .await?;
        let outcome = self
            .runner
            .rerun_failed(examples, first_pass, sampler, self.grader.clone())
            .await?;

        if !outcome.failures.is_empty() {
            warn!(
                eval = %eval.name,
                model = %model_name,
                failed = outcome.failures.len(),
                "Examples excluded from scoring after fix pass"
            );
        }

        let (results, failures) = outcome.into_parts();
        let result = aggregate_results(results, failures, &self.config.bootstrap);

        let paths = output::write_report(
            &self.config.output_dir,
            &eval.name,
            &model_name,
            self.options.debug,
            &result,
        )?;

        Ok(EvalReport {
            eval_name: eval.name.clone(),
            model_name,
            result,
            paths,
        })
    }
}
