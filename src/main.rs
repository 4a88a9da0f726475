//! judgekit CLI - evaluate JSONL datasets with LLM judges.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use judgekit::agreement::kappa_report;
use judgekit::client::{BpeTokenizer, CompletionCache, LLMClient};
use judgekit::eval::{Backend, Metric, build_evaluator};
use judgekit::models::{Config, Dataset, Prediction, WarningLog};
use judgekit::runner::LocalRunner;
use judgekit::{interpret_kappa, kappa_for_column};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "judgekit")]
#[command(version)]
#[command(about = "LLM-as-judge evaluation of text datasets")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "judgekit.toml")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the configured evaluator over a dataset
    Run {
        /// Path to input JSONL file
        #[arg(short, long)]
        dataset: PathBuf,

        /// Path to output JSONL file
        #[arg(short, long)]
        output: PathBuf,

        /// Evaluate every row this many times
        #[arg(short, long, default_value = "1")]
        num: usize,

        /// Do not draw a progress bar
        #[arg(long)]
        no_progress: bool,
    },

    /// Inter-rater agreement of result columns
    Kappa {
        /// Path to JSONL file
        #[arg(short, long)]
        dataset: PathBuf,

        /// One list-valued column of repeats, or several columns as raters
        #[arg(short = 'k', long = "column", default_values_t = vec!["result".to_string()])]
        columns: Vec<String>,
    },

    /// Score a result column against a reference column
    Score {
        /// Path to JSONL file
        #[arg(short, long)]
        dataset: PathBuf,

        /// Column holding predictions
        #[arg(short = 'k', long, default_value = "result")]
        column: String,

        /// Column holding reference answers
        #[arg(short, long)]
        reference: String,

        /// Metric to compute
        #[arg(short, long, default_value = "accuracy")]
        metric: Metric,
    },

    /// Validate configuration file
    Validate,

    /// Show example configuration
    Example,
}

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("judgekit: a tracing subscriber is already installed");
    }
}

fn print_example_config() {
    let example = r#"# judgekit configuration file

[completion]
# API key (can also use the env var named by api_key_env)
# api_key = "sk-..."
api_key_env = "OPENAI_API_KEY"
base_url = "https://api.openai.com/v1"
timeout_secs = 15
max_retries = 3
cache = true

[completion.fallback_models]
"gpt-3.5-turbo" = "gpt-3.5-turbo-16k"
"gpt-4" = "gpt-4-32k"

[runner]
# NUM_THREADS overrides this
num_threads = 8
output_column = "result"
show_progress = true

[evaluator]
kind = "classify"          # classify | grade | rag
model = "gpt-3.5-turbo"
context = "Classify the sentiment of the movie review."
strategy = "consensus"     # shuffle | consensus
seed = 42
chain_of_thought = false
# context_column = "topic"

[evaluator.labels]
POSITIVE = "The review is positive"
NEGATIVE = "The review is negative"

[[evaluator.references]]
input = "A masterpiece from start to finish."
output = "POSITIVE"

# Grading:
# kind = "grade"
# number_from = 1
# number_to = 5

# RAG:
# kind = "rag"
# metric = "faithfulness"  # faithfulness | answer_relevancy | context_relevancy | context_recall
"#;
    println!("{example}");
}

fn load_config(path: &Path) -> Result<Config> {
    Config::from_file(path).with_context(|| format!("Failed to load config from {path:?}"))
}

fn load_dataset(path: &Path) -> Result<Dataset> {
    Dataset::from_jsonl(path).with_context(|| format!("Failed to load dataset from {path:?}"))
}

fn predictions(dataset: &Dataset, column: &str) -> Result<Vec<Option<Prediction>>> {
    let values = dataset
        .column(column)
        .with_context(|| format!("Column {column:?} not found"))?;
    Ok(values.iter().map(Prediction::from_value).collect())
}

fn print_warnings(warnings: &WarningLog) {
    let entries = warnings.drain();
    if entries.is_empty() {
        return;
    }
    println!("Warnings:    {}", entries.len());
    for warning in &entries {
        println!("  {warning}");
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match cli.command {
        Commands::Example => {
            print_example_config();
        }

        Commands::Validate => {
            let config = load_config(&cli.config)?;
            config
                .resolve_api_key()
                .context("Failed to resolve API key")?;
            let num_threads = config
                .resolve_num_threads()
                .context("Failed to resolve thread cap")?;

            info!("Configuration is valid");
            info!("  Evaluator: {:?} on {}", config.evaluator.kind, config.evaluator.model);
            info!("  Threads: {num_threads}");
            info!("  Output column: {}", config.runner.output_column);
        }

        Commands::Run {
            dataset,
            output,
            num,
            no_progress,
        } => {
            let config = load_config(&cli.config)?;
            let api_key = config
                .resolve_api_key()
                .context("Failed to resolve API key")?;
            let num_threads = config
                .resolve_num_threads()
                .context("Failed to resolve thread cap")?;

            let warnings = WarningLog::new();
            let cache = config
                .completion
                .cache
                .then(|| Arc::new(CompletionCache::new()));
            let client = Arc::new(
                LLMClient::new(&config.completion, Some(api_key), cache, warnings.clone())
                    .context("Failed to create completion client")?,
            );
            let backend = Backend::new(
                client.clone(),
                Arc::new(BpeTokenizer::new()),
                warnings.clone(),
            );
            let evaluator = build_evaluator(&config.evaluator, backend)
                .context("Failed to build evaluator")?;

            let input = load_dataset(&dataset)?;
            let runner = LocalRunner::new(
                evaluator.as_ref(),
                &input,
                config.runner.output_column.clone(),
            )?
            .with_config(&config.runner)?
            .with_num_threads(num_threads)?
            .show_progress(config.runner.show_progress && !no_progress)
            .with_warnings(warnings.clone());

            let result = runner.run(num)?;
            result
                .to_jsonl(&output)
                .with_context(|| format!("Failed to write {output:?}"))?;

            let (input_tokens, output_tokens) = client.total_tokens();
            println!("\n=== Evaluation Complete ===");
            println!("Rows:        {}", result.len());
            println!("Repeats:     {num}");
            println!("Requests:    {}", client.total_requests());
            println!("Tokens:      {input_tokens} in / {output_tokens} out");
            if num > 1 {
                match kappa_for_column(&result, runner.output_column()) {
                    Ok(score) => println!("Kappa:       {score:.3} ({})", interpret_kappa(score)),
                    Err(e) => println!("Kappa:       n/a ({e})"),
                }
            }
            print_warnings(&warnings);
            println!("Output:      {output:?}");
        }

        Commands::Kappa { dataset, columns } => {
            let data = load_dataset(&dataset)?;
            let report = match columns.as_slice() {
                [] => bail!("At least one column is required"),
                [column] => {
                    let score = kappa_for_column(&data, column)
                        .with_context(|| format!("Failed to compute kappa for {column:?}"))?;
                    println!("Kappa:       {score:.4}");
                    println!("Agreement:   {}", interpret_kappa(score));
                    return Ok(());
                }
                columns => {
                    let raters = columns
                        .iter()
                        .map(|column| predictions(&data, column))
                        .collect::<Result<Vec<_>>>()?;
                    kappa_report(&raters).context("Failed to compute kappa")?
                }
            };
            println!("Method:      {}", report.method);
            println!("Raters:      {}", report.raters);
            println!("Items:       {}", report.items);
            println!("Kappa:       {:.4}", report.score);
            println!("Agreement:   {}", report.interpretation);
        }

        Commands::Score {
            dataset,
            column,
            reference,
            metric,
        } => {
            let data = load_dataset(&dataset)?;
            let predicted = predictions(&data, &column)?;
            let references = predictions(&data, &reference)?;

            let warnings = WarningLog::new();
            let score = metric
                .compute(&predicted, &references, &warnings)
                .with_context(|| format!("Failed to compute {metric}"))?;
            println!("{metric}: {score:.4}");
            print_warnings(&warnings);
        }
    }

    Ok(())
}
