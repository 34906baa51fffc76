//! CLI subcommand handlers.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use trialbench_core::config::{
    BenchConfig, DEFAULT_CORE_PERCENTAGES, DEFAULT_NLU_PERCENTAGES, PlotRendererConfig,
    TestOptions, TrainComparisonOptions, load_config, workspace_config_path,
};
use trialbench_core::data::{DatasetKind, Example};
use trialbench_core::error::ExternalError;
use trialbench_core::evaluation::ModelInput;
use trialbench_core::training::TrainingJob;
use trialbench_core::{
    ChartRenderer, CommandEvaluator, CommandPlotRenderer, CommandTrainer, EvaluationContext,
    Evaluator, FailurePolicy, GroupSummary, MetricReport, PlotRenderer, ResultSet, Suite,
    SuiteOutcome, Trainer,
};

use crate::{Commands, ConfigAction, TestArgs, TestTarget, TrainArgs, TrainTarget};

/// Global flags that override the loaded configuration.
#[derive(Debug, Default)]
pub struct Overrides {
    pub jobs: Option<usize>,
    pub keep_going: bool,
}

/// Handle a CLI subcommand.
pub async fn handle_command(
    command: Commands,
    workspace: &Path,
    overrides: &Overrides,
) -> anyhow::Result<()> {
    match command {
        Commands::Config { action } => handle_config(action, workspace),
        Commands::Train { target } => handle_train(target, workspace, overrides).await,
        Commands::Test { target, args } => handle_test(target, args, workspace, overrides).await,
    }
}

fn handle_config(action: ConfigAction, workspace: &Path) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_path = workspace_config_path(workspace);
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }
            if let Some(parent) = config_path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let toml_str = toml::to_string_pretty(&BenchConfig::default())?;
            std::fs::write(&config_path, &toml_str)?;
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
            Ok(())
        }
        ConfigAction::Show => {
            let config = load(workspace, &Overrides::default())?;
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn load(workspace: &Path, overrides: &Overrides) -> anyhow::Result<BenchConfig> {
    let mut config = load_config(Some(workspace), None)
        .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
    if let Some(jobs) = overrides.jobs {
        config.execution.max_concurrent_runs = jobs;
    }
    if overrides.keep_going {
        config.execution.failure_policy = FailurePolicy::Continue;
    }
    Ok(config)
}

/// Build a suite whose collaborators come from `config`.
fn build_suite(config: BenchConfig, workspace: &Path) -> Suite {
    let trainer: Arc<dyn Trainer> = match &config.trainer {
        Some(command) => Arc::new(CommandTrainer::new(command.clone(), workspace.to_path_buf())),
        None => Arc::new(Unconfigured),
    };
    let evaluator: Arc<dyn Evaluator> = match &config.evaluator {
        Some(command) => Arc::new(CommandEvaluator::new(
            command.clone(),
            workspace.to_path_buf(),
        )),
        None => Arc::new(Unconfigured),
    };
    let renderer: Arc<dyn PlotRenderer> = match &config.plots.renderer {
        PlotRendererConfig::Builtin => Arc::new(ChartRenderer::new()),
        PlotRendererConfig::Command(command) => Arc::new(CommandPlotRenderer::new(
            command.clone(),
            workspace.to_path_buf(),
        )),
    };
    Suite::new(workspace.to_path_buf(), config, trainer, evaluator, renderer)
}

/// Stands in for a trainer or evaluator missing from the configuration.
struct Unconfigured;

impl Unconfigured {
    fn error(section: &str) -> ExternalError {
        ExternalError::Failed(format!(
            "no {section} command configured; add a [{section}] section to .trialbench/config.toml"
        ))
    }
}

#[async_trait]
impl Trainer for Unconfigured {
    async fn train(&self, _job: &TrainingJob<'_>) -> Result<Vec<u8>, ExternalError> {
        Err(Self::error("trainer"))
    }
}

#[async_trait]
impl Evaluator for Unconfigured {
    async fn evaluate(
        &self,
        _model: &ModelInput,
        _held_out: &[Example],
        _context: &EvaluationContext,
    ) -> Result<MetricReport, ExternalError> {
        Err(Self::error("evaluator"))
    }
}

fn train_options(args: TrainArgs, kind: DatasetKind, config: &BenchConfig) -> TrainComparisonOptions {
    let defaults = TrainComparisonOptions::default();
    let percentages = match (args.percentages.is_empty(), kind) {
        (false, _) => args.percentages,
        (true, DatasetKind::Stories) => DEFAULT_CORE_PERCENTAGES.to_vec(),
        (true, DatasetKind::Nlu) => DEFAULT_NLU_PERCENTAGES.to_vec(),
    };
    TrainComparisonOptions {
        config_paths: args.config,
        data_path: args.data.unwrap_or(defaults.data_path),
        runs: args.runs.unwrap_or(defaults.runs),
        percentages,
        out: args.out.unwrap_or_else(|| config.output.models_dir.clone()),
    }
}

fn test_options(args: TestArgs, config: &BenchConfig) -> TestOptions {
    let defaults = TestOptions::default();
    TestOptions {
        model_paths: if args.model.is_empty() {
            vec![config.output.models_dir.clone()]
        } else {
            args.model
        },
        stories_path: args.stories.unwrap_or(defaults.stories_path),
        max_stories: args.max_stories,
        endpoints: args.endpoints,
        fail_on_prediction_errors: args.fail_on_prediction_errors,
        url: args.url,
        evaluate_model_directory: args.evaluate_model_directory,
        nlu_path: args.nlu.unwrap_or(defaults.nlu_path),
        config_paths: if args.config.is_empty() {
            defaults.config_paths
        } else {
            args.config
        },
        cross_validation: args.cross_validation,
        folds: args.folds.unwrap_or(defaults.folds),
        runs: args.runs.unwrap_or(defaults.runs),
        percentages: if args.percentages.is_empty() {
            defaults.percentages
        } else {
            args.percentages
        },
        no_plot: args.no_plot,
        successes: args.successes,
        no_errors: args.no_errors,
        out: args.out.unwrap_or_else(|| config.output.results_dir.clone()),
    }
}

async fn handle_train(
    target: TrainTarget,
    workspace: &Path,
    overrides: &Overrides,
) -> anyhow::Result<()> {
    let config = load(workspace, overrides)?;
    let (args, kind) = match target {
        TrainTarget::Core(args) => (args, DatasetKind::Stories),
        TrainTarget::Nlu(args) => (args, DatasetKind::Nlu),
    };
    let options = train_options(args, kind, &config);
    let suite = build_suite(config, workspace);

    let results = suite.train_comparison(&options, kind).await?;
    print_failures(&results);
    println!(
        "Trained {} models into {}",
        results.len() - results.failures().count(),
        options.out.display()
    );
    Ok(())
}

async fn handle_test(
    target: Option<TestTarget>,
    args: TestArgs,
    workspace: &Path,
    overrides: &Overrides,
) -> anyhow::Result<()> {
    let config = load(workspace, overrides)?;
    let primary = config.plots.primary_metrics.clone();

    let outcomes = match target {
        Some(TestTarget::Core(args)) => {
            let suite = build_suite(config.clone(), workspace);
            vec![suite.test_core(&test_options(args, &config)).await?]
        }
        Some(TestTarget::Nlu(args)) => {
            let suite = build_suite(config.clone(), workspace);
            vec![suite.test_nlu(&test_options(args, &config)).await?]
        }
        None => {
            let suite = build_suite(config.clone(), workspace);
            suite.test_all(&test_options(args, &config)).await?
        }
    };

    for outcome in &outcomes {
        match outcome {
            SuiteOutcome::Comparison(comparison) => {
                print_failures(&comparison.results);
                print_summaries(&comparison.summaries, &primary);
            }
            SuiteOutcome::Evaluation(evaluation) => {
                for (metric, value) in &evaluation.report.metrics {
                    println!("{metric}: {value:.4}");
                }
            }
        }
    }
    Ok(())
}

fn print_failures(results: &ResultSet) {
    for record in results.failures() {
        if let Some(failure) = record.outcome.failure() {
            println!("FAILED {} ({}): {}", record.run, failure.stage, failure.message);
        }
    }
}

fn print_summaries(summaries: &[GroupSummary], primary: &[String]) {
    for summary in summaries {
        let slice = summary
            .slice
            .map(|s| format!(" [{s}]"))
            .unwrap_or_default();
        let metric = primary
            .iter()
            .find_map(|name| summary.metrics.get(name).map(|stats| (name, stats)));
        match metric {
            Some((name, stats)) => println!(
                "{}{}: {name} {:.4} ± {:.4} over {} runs",
                summary.configuration, slice, stats.mean, stats.std_dev, summary.run_count
            ),
            None => println!(
                "{}{}: no metrics ({} of {} runs failed)",
                summary.configuration, slice, summary.failed_count, summary.run_count
            ),
        }
    }
}
