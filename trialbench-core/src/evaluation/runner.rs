//! Runs an [`Evaluator`] against a model source and held-out examples.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use tracing::{debug, info, warn};

use crate::data::Example;
use crate::error::{EvaluationError, RunError};
use crate::evaluation::{EvaluationContext, Evaluator, MetricReport, ModelInput, ModelSource};
use crate::planning::RunSpec;
use crate::store::{ArtifactKey, ArtifactStore, put_json};

/// File name of a run's metric report inside its run directory.
pub const REPORT_FILE: &str = "report.json";

/// Evaluates models and optionally escalates wrong predictions.
#[derive(Clone)]
pub struct EvaluationRunner {
    evaluator: Arc<dyn Evaluator>,
    store: Arc<dyn ArtifactStore>,
    context: EvaluationContext,
    strict: bool,
}

impl EvaluationRunner {
    pub fn new(
        evaluator: Arc<dyn Evaluator>,
        store: Arc<dyn ArtifactStore>,
        context: EvaluationContext,
    ) -> Self {
        Self {
            evaluator,
            store,
            context,
            strict: false,
        }
    }

    /// Escalate any wrong prediction to [`EvaluationError::PredictionErrors`].
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Evaluate the model from `source` on `held_out`.
    pub async fn evaluate(
        &self,
        source: Option<&ModelSource>,
        held_out: &[Example],
    ) -> Result<MetricReport, EvaluationError> {
        let source = source.ok_or(EvaluationError::NoModelAvailable)?;
        let input = self.model_input(source)?;

        debug!(model = %input.name(), examples = held_out.len(), "Evaluating model");
        let report = self
            .evaluator
            .evaluate(&input, held_out, &self.context)
            .await?;

        if self.strict {
            let failed = report.failure_count();
            if failed > 0 {
                return Err(EvaluationError::PredictionErrors {
                    failed,
                    total: report.predictions.len(),
                });
            }
        }
        Ok(report)
    }

    /// Evaluate one run and persist `report.json` into its run directory.
    pub async fn evaluate_run(
        &self,
        run: &RunSpec,
        source: &ModelSource,
        held_out: &[Example],
        root: &ArtifactKey,
    ) -> Result<MetricReport, RunError> {
        let failed = |cause: String| RunError::EvaluationFailed {
            run: run.clone(),
            cause,
        };

        info!(run = %run, examples = held_out.len(), "Evaluation started");
        let report = self
            .evaluate(Some(source), held_out)
            .await
            .map_err(|e| failed(e.to_string()))?;

        let key = run.run_dir(root).join(REPORT_FILE);
        put_json(self.store.as_ref(), &key, &report)
            .map_err(|e| failed(format!("failed to persist report: {e}")))?;
        Ok(report)
    }

    fn model_input(&self, source: &ModelSource) -> Result<ModelInput, EvaluationError> {
        match source {
            ModelSource::Supplied(path) => {
                if !path.exists() {
                    return Err(EvaluationError::ModelNotFound { path: path.clone() });
                }
                Ok(ModelInput::Path(path.clone()))
            }
            ModelSource::Trained(artifact) => {
                if let Some(path) = self.store.local_path(&artifact.model)
                    && path.is_file()
                {
                    return Ok(ModelInput::Path(path));
                }
                let not_found = || EvaluationError::ModelNotFound {
                    path: PathBuf::from(artifact.model.as_str()),
                };
                let data = self
                    .store
                    .get(&artifact.model)
                    .map_err(|_| not_found())?
                    .ok_or_else(not_found)?;
                Ok(ModelInput::Bytes {
                    name: artifact.run.configuration.clone(),
                    data,
                })
            }
        }
    }
}

fn is_model_archive(path: &Path) -> bool {
    path.is_file()
        && path
            .file_name()
            .is_some_and(|n| n.to_string_lossy().ends_with(".tar.gz"))
}

fn latest_model_in(dir: &Path) -> std::io::Result<Option<PathBuf>> {
    let mut latest: Option<(SystemTime, PathBuf)> = None;
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if !is_model_archive(&path) {
            continue;
        }
        let modified = path.metadata()?.modified()?;
        let newer = latest
            .as_ref()
            .is_none_or(|(time, current)| (modified, &path) > (*time, current));
        if newer {
            latest = Some((modified, path));
        }
    }
    Ok(latest.map(|(_, path)| path))
}

/// Resolve user-supplied model paths.
///
/// Files are taken as they are; a directory resolves to its most recently
/// modified `*.tar.gz`. Paths that do not exist, and directories without a
/// model, are skipped with a warning.
pub fn resolve_model_paths(paths: &[PathBuf]) -> Result<Vec<PathBuf>, EvaluationError> {
    let mut resolved = Vec::new();
    for path in paths {
        if path.is_file() {
            resolved.push(path.clone());
        } else if path.is_dir() {
            match latest_model_in(path) {
                Ok(Some(model)) => resolved.push(model),
                Ok(None) => warn!(dir = %path.display(), "No model archive found in directory"),
                Err(e) => warn!(dir = %path.display(), error = %e, "Failed to scan model directory"),
            }
        } else {
            warn!(path = %path.display(), "Model path does not exist");
        }
    }
    if resolved.is_empty() {
        return Err(EvaluationError::NoModelAvailable);
    }
    Ok(resolved)
}
