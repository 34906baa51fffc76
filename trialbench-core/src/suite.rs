//! Command-level dispatch: turns [`TestOptions`] and [`TrainComparisonOptions`]
//! into orchestrations over a workspace directory.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use crate::config::{BenchConfig, ModelConfiguration, TestOptions, TrainComparisonOptions};
use crate::data::{Dataset, DatasetKind};
use crate::error::{ConfigError, EvaluationError, Result};
use crate::evaluation::{EvaluationContext, Evaluator, resolve_model_paths};
use crate::orchestrator::{ComparisonOutcome, EvaluationOutcome, ExecutionOptions, Orchestrator};
use crate::report::{EvaluationReportOptions, PlotRenderer};
use crate::results::ResultSet;
use crate::store::{ArtifactKey, ArtifactStore, FsArtifactStore};
use crate::training::Trainer;

/// What a `test` invocation produced.
#[derive(Debug, Clone)]
pub enum SuiteOutcome {
    Comparison(ComparisonOutcome),
    Evaluation(EvaluationOutcome),
}

/// Runs `test` and `train` invocations against a workspace.
pub struct Suite {
    workspace: PathBuf,
    store: Arc<dyn ArtifactStore>,
    config: BenchConfig,
    trainer: Arc<dyn Trainer>,
    evaluator: Arc<dyn Evaluator>,
    renderer: Arc<dyn PlotRenderer>,
}

impl Suite {
    pub fn new(
        workspace: PathBuf,
        config: BenchConfig,
        trainer: Arc<dyn Trainer>,
        evaluator: Arc<dyn Evaluator>,
        renderer: Arc<dyn PlotRenderer>,
    ) -> Self {
        Self {
            store: Arc::new(FsArtifactStore::new(workspace.clone())),
            workspace,
            config,
            trainer,
            evaluator,
            renderer,
        }
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    fn orchestrator(&self, no_plot: bool, strict: bool, context: EvaluationContext) -> Orchestrator {
        let renderer = (!no_plot).then(|| self.renderer.clone());
        let options = ExecutionOptions {
            strict_predictions: strict,
            ..ExecutionOptions::from(&self.config.execution)
        };
        Orchestrator::new(
            self.store.clone(),
            self.trainer.clone(),
            self.evaluator.clone(),
            renderer,
        )
        .with_options(options)
        .with_context(context)
        .with_primary_metrics(self.config.plots.primary_metrics.clone())
        .with_test_fraction(self.config.nlu.test_fraction)
    }

    fn test_orchestrator(&self, options: &TestOptions) -> Orchestrator {
        let context = EvaluationContext {
            endpoints: options.endpoints.as_ref().map(|p| self.resolve(p)),
            url: options.url.clone(),
        };
        self.orchestrator(options.no_plot, options.fail_on_prediction_errors, context)
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.workspace.join(path)
        }
    }

    /// Store key of a path inside the workspace.
    ///
    /// Absolute paths must lie under the workspace, and no path may climb out
    /// of it with `..`.
    fn key_for(&self, path: &Path) -> Result<ArtifactKey> {
        let relative = if path.is_absolute() {
            path.strip_prefix(&self.workspace).ok()
        } else {
            Some(path)
        };
        match relative {
            Some(relative) if !relative.components().any(|c| c == Component::ParentDir) => {
                Ok(ArtifactKey::from_path(relative))
            }
            _ => Err(ConfigError::Invalid {
                message: format!("{} is outside the workspace", path.display()),
            }
            .into()),
        }
    }

    fn load_configurations(&self, paths: &[PathBuf]) -> Result<Vec<ModelConfiguration>> {
        paths
            .iter()
            .map(|p| ModelConfiguration::load(&self.resolve(p)).map_err(Into::into))
            .collect()
    }

    fn report_options(options: &TestOptions, kind: DatasetKind) -> EvaluationReportOptions {
        EvaluationReportOptions {
            kind,
            successes: options.successes,
            no_errors: options.no_errors,
        }
    }

    /// Test dialogue models on stories.
    ///
    /// - `evaluate_model_directory`: compare the models of a training comparison
    /// - two or more models: compare them on the full test stories
    /// - one model: evaluate it
    pub async fn test_core(&self, options: &TestOptions) -> Result<SuiteOutcome> {
        options.validate()?;
        let orchestrator = self.test_orchestrator(options);
        let out = self.key_for(&options.out)?;

        if options.evaluate_model_directory {
            let dir = options
                .model_paths
                .first()
                .cloned()
                .unwrap_or_else(|| self.config.output.models_dir.clone());
            if !self.resolve(&dir).is_dir() {
                return Err(EvaluationError::NoModelAvailable.into());
            }
            let stories = self.load_stories(options)?;
            let outcome = orchestrator
                .evaluate_model_directory(&self.key_for(&dir)?, &stories, &out)
                .await?;
            return Ok(SuiteOutcome::Comparison(outcome));
        }

        let paths: Vec<PathBuf> = options.model_paths.iter().map(|p| self.resolve(p)).collect();
        let models = resolve_model_paths(&paths)?;
        let stories = self.load_stories(options)?;

        if models.len() >= 2 {
            let outcome = orchestrator.compare_models(&models, &stories, &out).await?;
            Ok(SuiteOutcome::Comparison(outcome))
        } else {
            let outcome = orchestrator
                .evaluate_single(
                    models.into_iter().next(),
                    &stories,
                    &out,
                    &Self::report_options(options, DatasetKind::Stories),
                )
                .await?;
            Ok(SuiteOutcome::Evaluation(outcome))
        }
    }

    fn load_stories(&self, options: &TestOptions) -> Result<Dataset> {
        let stories = Dataset::load(&self.resolve(&options.stories_path), DatasetKind::Stories)?;
        Ok(match options.max_stories {
            Some(max) => stories.truncate(max),
            None => stories,
        })
    }

    /// Test NLU configurations or models.
    ///
    /// - `cross_validation`: k-fold over every configuration
    /// - two or more configurations: percentage comparison
    /// - otherwise: evaluate a single model
    pub async fn test_nlu(&self, options: &TestOptions) -> Result<SuiteOutcome> {
        options.validate()?;
        let orchestrator = self.test_orchestrator(options);
        let out = self.key_for(&options.out)?;

        if options.cross_validation {
            let configurations = self.load_configurations(&options.config_paths)?;
            let data = Dataset::load(&self.resolve(&options.nlu_path), DatasetKind::Nlu)?;
            let outcome = orchestrator
                .cross_validate(
                    &configurations,
                    &data,
                    options.folds,
                    &out,
                    &Self::report_options(options, DatasetKind::Nlu),
                )
                .await?;
            return Ok(SuiteOutcome::Comparison(outcome));
        }

        if options.config_paths.len() >= 2 {
            let configurations = self.load_configurations(&options.config_paths)?;
            let data = Dataset::load(&self.resolve(&options.nlu_path), DatasetKind::Nlu)?;
            let outcome = orchestrator
                .compare_nlu(
                    &configurations,
                    &data,
                    &options.percentages,
                    options.runs,
                    &out,
                )
                .await?;
            return Ok(SuiteOutcome::Comparison(outcome));
        }

        let paths: Vec<PathBuf> = options.model_paths.iter().map(|p| self.resolve(p)).collect();
        let model = resolve_model_paths(&paths)?.into_iter().next();
        let data = Dataset::load(&self.resolve(&options.nlu_path), DatasetKind::Nlu)?;
        let outcome = orchestrator
            .evaluate_single(
                model,
                &data,
                &out,
                &Self::report_options(options, DatasetKind::Nlu),
            )
            .await?;
        Ok(SuiteOutcome::Evaluation(outcome))
    }

    /// `test` without a subcommand: core, then NLU.
    pub async fn test_all(&self, options: &TestOptions) -> Result<Vec<SuiteOutcome>> {
        let core = self.test_core(options).await?;
        let nlu = self.test_nlu(options).await?;
        Ok(vec![core, nlu])
    }

    /// Train every configuration on percentages of the data, `runs` times.
    pub async fn train_comparison(
        &self,
        options: &TrainComparisonOptions,
        kind: DatasetKind,
    ) -> Result<ResultSet> {
        options.validate()?;
        let configurations = self.load_configurations(&options.config_paths)?;
        let data = Dataset::load(&self.resolve(&options.data_path), kind)?;
        let out = self.key_for(&options.out)?;

        info!(
            configurations = configurations.len(),
            examples = data.len(),
            kind = %kind,
            "Training comparison models"
        );
        self.orchestrator(true, false, EvaluationContext::default())
            .train_comparison(&configurations, &data, &options.percentages, options.runs, &out)
            .await
    }
}
