use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod aggregate;
mod config;
mod datasets;
mod evaluation;
mod extraction;
mod models;
mod output;
mod prompts;
mod runner;
mod sampler;

use crate::config::{Config, EvalConfig};
use crate::output::OutputFormat;
use crate::runner::{EvaluationSuite, SuiteOptions};
use crate::sampler::{Sampler, build_sampler};

/// Burmese LLM benchmark runner - query models on exam questions and grade the answers
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML run file
    run_file: PathBuf,

    /// Evaluate only this model (by its name in the run file)
    #[arg(short, long)]
    model: Option<String>,

    /// Comma-separated evals to run; all when omitted
    #[arg(long, value_delimiter = ',')]
    evals: Vec<String>,

    /// Number of examples per eval; overrides the run file
    #[arg(long)]
    examples: Option<usize>,

    /// Debug mode: 5 examples per eval, outputs suffixed with _DEBUG
    #[arg(long)]
    debug: bool,

    /// List the models in the run file and exit
    #[arg(long)]
    list_models: bool,

    /// Output format: plain or json
    #[arg(short, long, default_value = "plain")]
    output: OutputFormat,

    /// Verbose output - log every graded example and retry
    #[arg(short, long)]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn select_evals(config: &Config, names: &[String]) -> Result<Vec<EvalConfig>> {
    if names.is_empty() {
        return Ok(config.evals.clone());
    }
    names
        .iter()
        .map(|name| {
            config
                .evals
                .iter()
                .find(|eval| &eval.name == name)
                .cloned()
                .with_context(|| format!("Unknown eval: {}", name))
        })
        .collect()
}

fn build_samplers(config: &Config, only: Option<&str>) -> Result<Vec<Arc<dyn Sampler>>> {
    let selected: Vec<_> = match only {
        Some(name) => vec![
            config
                .model(name)
                .with_context(|| format!("Unknown model: {}", name))?,
        ],
        None => config.models.iter().collect(),
    };

    selected
        .into_iter()
        .map(|model| {
            build_sampler(model, &config.retry)
                .with_context(|| format!("Failed to create sampler for {}", model.name))
        })
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let config = Config::from_file(&args.run_file)?;

    if args.list_models {
        for model in &config.models {
            println!("{}", model.name);
        }
        return Ok(());
    }

    let evals = select_evals(&config, &args.evals)?;
    let samplers = build_samplers(&config, args.model.as_deref())?;
    let judge = config
        .judge
        .as_ref()
        .map(|judge| build_sampler(judge, &config.retry))
        .transpose()
        .context("Failed to create judge sampler")?;

    if args.debug {
        info!("Debug mode enabled");
    }

    let output_dir = config.output_dir.clone();
    let eval_names: Vec<String> = config.evals.iter().map(|e| e.name.clone()).collect();
    let model_names: Vec<String> = config.models.iter().map(|m| m.name.clone()).collect();

    let options = SuiteOptions {
        debug: args.debug,
        num_examples: args.examples,
    };
    let suite = EvaluationSuite::new(config, samplers, judge, options);
    let reports = suite.run_evaluations(&evals).await?;

    output::print_results(&reports, args.output);

    let table = output::merge_reports(&output_dir, &eval_names, &model_names, args.debug)?;
    if matches!(args.output, OutputFormat::Plain) {
        println!();
        println!("All results:");
        println!("{}", table);
    }

    Ok(())
}
