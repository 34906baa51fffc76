//! Trialbench CLI: train and test model configurations side by side.

mod commands;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};
use trialbench_core::BenchError;
use trialbench_core::error::EvaluationError;

/// Trialbench: compare model configurations across data fractions, runs and folds
#[derive(Parser, Debug)]
#[command(name = "trialbench", version, about, long_about = None)]
struct Cli {
    /// Workspace directory
    #[arg(short, long, default_value = ".", global = true)]
    workspace: PathBuf,

    /// Maximum number of runs executed at once (overrides the configuration)
    #[arg(short, long, global = true)]
    jobs: Option<usize>,

    /// Record failed runs and keep going instead of stopping at the first failure
    #[arg(long, global = true)]
    keep_going: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Train configurations on percentages of the training data
    Train {
        #[command(subcommand)]
        target: TrainTarget,
    },
    /// Test dialogue and NLU models (both when no target is given)
    #[command(args_conflicts_with_subcommands = true)]
    Test {
        #[command(subcommand)]
        target: Option<TestTarget>,

        #[command(flatten)]
        args: TestArgs,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
enum TrainTarget {
    /// Compare dialogue configurations trained on story subsets
    Core(TrainArgs),
    /// Compare NLU configurations trained on utterance subsets
    Nlu(TrainArgs),
}

#[derive(clap::Subcommand, Debug)]
enum TestTarget {
    /// Test dialogue models on test stories
    Core(TestArgs),
    /// Test NLU models, compare NLU configurations, or cross-validate
    Nlu(TestArgs),
}

#[derive(clap::Args, Debug, Clone, Default)]
struct TrainArgs {
    /// Model configuration files to compare
    #[arg(short, long, num_args = 1.., required = true)]
    config: Vec<PathBuf>,

    /// Training data file or directory
    #[arg(short, long, visible_alias = "stories")]
    data: Option<PathBuf>,

    /// Number of repetitions per configuration and percentage
    #[arg(long)]
    runs: Option<usize>,

    /// Percentages of the training data to train on
    #[arg(long, num_args = 1..)]
    percentages: Vec<u8>,

    /// Output directory for the trained models
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(clap::Args, Debug, Clone, Default)]
struct TestArgs {
    /// Model files, or a directory whose newest model is used
    #[arg(short, long, num_args = 1..)]
    model: Vec<PathBuf>,

    /// Test stories file or directory
    #[arg(short, long)]
    stories: Option<PathBuf>,

    /// Maximum number of test stories
    #[arg(long)]
    max_stories: Option<usize>,

    /// Endpoint configuration passed to the evaluator
    #[arg(long)]
    endpoints: Option<PathBuf>,

    /// Fail when any prediction is wrong
    #[arg(long)]
    fail_on_prediction_errors: bool,

    /// URL test data is fetched from
    #[arg(long)]
    url: Option<String>,

    /// Compare the models of a `train core` output directory (given with --model)
    #[arg(long)]
    evaluate_model_directory: bool,

    /// NLU data file or directory
    #[arg(short = 'u', long)]
    nlu: Option<PathBuf>,

    /// Model configuration files
    #[arg(short, long, num_args = 1..)]
    config: Vec<PathBuf>,

    /// Run k-fold cross-validation over the configurations
    #[arg(long)]
    cross_validation: bool,

    /// Number of cross-validation folds
    #[arg(short, long)]
    folds: Option<usize>,

    /// Number of comparison runs
    #[arg(short, long)]
    runs: Option<usize>,

    /// Percentages of the training data to train on
    #[arg(short, long, num_args = 1..)]
    percentages: Vec<u8>,

    /// Skip plot rendering
    #[arg(long)]
    no_plot: bool,

    /// Also write successful predictions
    #[arg(long)]
    successes: bool,

    /// Do not write prediction errors
    #[arg(long)]
    no_errors: bool,

    /// Output directory for results
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Create a default configuration file
    Init,
    /// Show current configuration
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    // Results go to stdout, so human-readable logs go to stderr
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(EnvFilter::new(filter));

    let log_dir = directories::ProjectDirs::from("dev", "trialbench", "trialbench")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "trialbench.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    let overrides = commands::Overrides {
        jobs: cli.jobs,
        keep_going: cli.keep_going,
    };
    match commands::handle_command(cli.command, &workspace, &overrides).await {
        Err(e) => match no_model_message(&e) {
            Some(message) => {
                println!("{message}");
                drop(_guard);
                std::process::exit(1);
            }
            None => Err(e),
        },
        Ok(()) => Ok(()),
    }
}

/// The diagnostic printed when no model could be found, without the
/// wrapping error's prefix.
fn no_model_message(error: &anyhow::Error) -> Option<String> {
    match error.downcast_ref::<BenchError>() {
        Some(BenchError::Evaluation(inner @ EvaluationError::NoModelAvailable)) => {
            Some(inner.to_string())
        }
        _ => None,
    }
}
