//! Evaluation: the [`Evaluator`] seam, metric reports, and model sources.

pub mod command;
pub mod discovery;
pub mod runner;

pub use command::CommandEvaluator;
pub use discovery::{DiscoveredModel, discover_comparison_models, parse_run_dir};
pub use runner::{EvaluationRunner, resolve_model_paths};

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::data::{Example, StoryStep};
use crate::error::ExternalError;
use crate::training::ModelArtifact;

/// What a prediction was made for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionKind {
    Intent,
    Story,
}

/// One prediction of an evaluated model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub kind: PredictionKind,
    pub input: String,
    pub expected: String,
    pub predicted: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl PredictionRecord {
    pub fn is_correct(&self) -> bool {
        self.expected == self.predicted
    }
}

/// Metrics and predictions produced for one evaluated model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricReport {
    pub metrics: BTreeMap<String, f64>,
    #[serde(default)]
    pub predictions: Vec<PredictionRecord>,
}

impl MetricReport {
    /// Build a report whose metrics are derived from `predictions`.
    ///
    /// Intent predictions yield `accuracy`, macro `precision` and macro
    /// `f1_score`; story predictions yield `accuracy` and `correct_stories`.
    pub fn from_predictions(predictions: Vec<PredictionRecord>) -> Self {
        let mut metrics = BTreeMap::new();
        let total = predictions.len();
        if total > 0 {
            let correct = predictions.iter().filter(|p| p.is_correct()).count();
            metrics.insert("accuracy".to_string(), correct as f64 / total as f64);

            if predictions.iter().any(|p| p.kind == PredictionKind::Story) {
                metrics.insert("correct_stories".to_string(), correct as f64);
            }
            if predictions.iter().any(|p| p.kind == PredictionKind::Intent) {
                let (precision, f1) = macro_scores(&predictions);
                metrics.insert("precision".to_string(), precision);
                metrics.insert("f1_score".to_string(), f1);
            }
        }
        Self {
            metrics,
            predictions,
        }
    }

    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }

    pub fn failures(&self) -> impl Iterator<Item = &PredictionRecord> {
        self.predictions.iter().filter(|p| !p.is_correct())
    }

    pub fn successes(&self) -> impl Iterator<Item = &PredictionRecord> {
        self.predictions.iter().filter(|p| p.is_correct())
    }

    /// Number of wrong predictions.
    pub fn failure_count(&self) -> usize {
        self.failures().count()
    }
}

fn macro_scores(predictions: &[PredictionRecord]) -> (f64, f64) {
    let labels: BTreeSet<&str> = predictions
        .iter()
        .flat_map(|p| [p.expected.as_str(), p.predicted.as_str()])
        .collect();
    if labels.is_empty() {
        return (0.0, 0.0);
    }

    let mut precision_sum = 0.0;
    let mut f1_sum = 0.0;
    for label in &labels {
        let tp = predictions
            .iter()
            .filter(|p| p.expected == *label && p.predicted == *label)
            .count() as f64;
        let predicted = predictions.iter().filter(|p| p.predicted == *label).count() as f64;
        let actual = predictions.iter().filter(|p| p.expected == *label).count() as f64;

        let precision = if predicted > 0.0 { tp / predicted } else { 0.0 };
        let recall = if actual > 0.0 { tp / actual } else { 0.0 };
        precision_sum += precision;
        if precision + recall > 0.0 {
            f1_sum += 2.0 * precision * recall / (precision + recall);
        }
    }
    let n = labels.len() as f64;
    (precision_sum / n, f1_sum / n)
}

/// A model handed to an evaluator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelInput {
    /// A model file on disk.
    Path(PathBuf),
    /// Model bytes from a store without local paths.
    Bytes { name: String, data: Vec<u8> },
}

impl ModelInput {
    pub fn name(&self) -> String {
        match self {
            ModelInput::Path(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
            ModelInput::Bytes { name, .. } => name.clone(),
        }
    }
}

/// Where the model under evaluation comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelSource {
    /// A model trained in this invocation (or found next to its manifest).
    Trained(ModelArtifact),
    /// A model file supplied by the user.
    Supplied(PathBuf),
}

impl ModelSource {
    /// Name used for the model in comparison results.
    ///
    /// Supplied models are named by their file name without the `.tar.gz`
    /// suffix.
    pub fn name(&self) -> String {
        match self {
            ModelSource::Trained(artifact) => artifact.run.configuration.clone(),
            ModelSource::Supplied(path) => {
                let file = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.display().to_string());
                file.strip_suffix(".tar.gz").map(str::to_string).unwrap_or(file)
            }
        }
    }
}

/// Comparison names for supplied models, unique across `paths`.
///
/// Models sharing a file name are prefixed with their parent directory name;
/// any clash left after that gets the model's 1-based position appended.
pub fn supplied_model_names(paths: &[PathBuf]) -> Vec<String> {
    let mut names: Vec<String> = paths
        .iter()
        .map(|p| ModelSource::Supplied(p.clone()).name())
        .collect();

    let clashing = duplicates(&names);
    for (name, path) in names.iter_mut().zip(paths) {
        if !clashing.contains(name.as_str()) {
            continue;
        }
        if let Some(parent) = path.parent().and_then(Path::file_name) {
            *name = format!("{}_{name}", parent.to_string_lossy());
        }
    }

    let clashing = duplicates(&names);
    for (i, name) in names.iter_mut().enumerate() {
        if clashing.contains(name.as_str()) {
            name.push_str(&format!("_{}", i + 1));
        }
    }
    names
}

fn duplicates(names: &[String]) -> HashSet<String> {
    let mut seen = HashSet::new();
    names
        .iter()
        .filter(|name| !seen.insert(name.as_str()))
        .cloned()
        .collect()
}

/// Evaluation settings passed through from the command line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationContext {
    /// Endpoint configuration file for the model under test.
    pub endpoints: Option<PathBuf>,
    /// URL test data is fetched from.
    pub url: Option<String>,
}

/// Trait for external model evaluators.
#[async_trait]
pub trait Evaluator: Send + Sync {
    /// Evaluate `model` on `held_out` examples.
    async fn evaluate(
        &self,
        model: &ModelInput,
        held_out: &[Example],
        context: &EvaluationContext,
    ) -> Result<MetricReport, ExternalError>;
}

/// A deterministic evaluator for tests.
///
/// Predicts the expected label of every example except those whose label was
/// marked with [`MockEvaluator::mislabel`].
pub struct MockEvaluator {
    mislabeled: HashSet<String>,
    failing_models: Vec<String>,
    extra_metrics: BTreeMap<String, f64>,
    delay: Option<Duration>,
    calls: Mutex<Vec<String>>,
}

impl MockEvaluator {
    pub fn new() -> Self {
        Self {
            mislabeled: HashSet::new(),
            failing_models: Vec::new(),
            extra_metrics: BTreeMap::new(),
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Predict a wrong label for every example labeled `label`.
    pub fn mislabel(mut self, label: &str) -> Self {
        self.mislabeled.insert(label.to_string());
        self
    }

    /// Fail evaluation of every model whose name contains `pattern`.
    pub fn fail_for(mut self, pattern: &str) -> Self {
        self.failing_models.push(pattern.to_string());
        self
    }

    /// Add a constant metric to every report.
    pub fn with_metric(mut self, name: &str, value: f64) -> Self {
        self.extra_metrics.insert(name.to_string(), value);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Names of the models evaluated so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn predict(&self, example: &Example) -> PredictionRecord {
        let (kind, input) = match example {
            Example::Utterance(u) => (PredictionKind::Intent, u.text.clone()),
            Example::Story(s) => (
                PredictionKind::Story,
                s.steps
                    .iter()
                    .map(|step| match step {
                        StoryStep::User { intent, .. } => intent.as_str(),
                        StoryStep::Action { action } => action.as_str(),
                    })
                    .collect::<Vec<_>>()
                    .join(" > "),
            ),
        };
        let expected = example.label().to_string();
        let predicted = if self.mislabeled.contains(&expected) {
            format!("not_{expected}")
        } else {
            expected.clone()
        };
        PredictionRecord {
            kind,
            input,
            expected,
            predicted,
            confidence: Some(1.0),
        }
    }
}

impl Default for MockEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Evaluator for MockEvaluator {
    async fn evaluate(
        &self,
        model: &ModelInput,
        held_out: &[Example],
        _context: &EvaluationContext,
    ) -> Result<MetricReport, ExternalError> {
        let name = model.name();
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(name.clone());
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing_models.iter().any(|p| name.contains(p.as_str())) {
            return Err(ExternalError::Failed(format!("mock evaluation failure for {name}")));
        }
        let mut report =
            MetricReport::from_predictions(held_out.iter().map(|e| self.predict(e)).collect());
        report.metrics.extend(self.extra_metrics.clone());
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intent(expected: &str, predicted: &str) -> PredictionRecord {
        PredictionRecord {
            kind: PredictionKind::Intent,
            input: "text".into(),
            expected: expected.into(),
            predicted: predicted.into(),
            confidence: None,
        }
    }

    #[test]
    fn test_metrics_from_predictions() {
        let report = MetricReport::from_predictions(vec![
            intent("greet", "greet"),
            intent("greet", "bye"),
            intent("bye", "bye"),
            intent("bye", "bye"),
        ]);
        assert_eq!(report.metric("accuracy"), Some(0.75));
        assert_eq!(report.failure_count(), 1);
        // greet: p=1, r=.5, f1=2/3; bye: p=2/3, r=1, f1=.8
        let f1 = report.metric("f1_score").unwrap();
        assert!((f1 - (2.0 / 3.0 + 0.8) / 2.0).abs() < 1e-12);
        assert!(report.metric("correct_stories").is_none());
    }

    #[test]
    fn test_empty_predictions_have_no_metrics() {
        assert!(MetricReport::from_predictions(Vec::new()).metrics.is_empty());
    }

    #[test]
    fn test_supplied_model_names_disambiguate_shared_file_names() {
        let names = supplied_model_names(&[
            PathBuf::from("/ws/a/model.tar.gz"),
            PathBuf::from("/ws/b/model.tar.gz"),
            PathBuf::from("/ws/b/other.tar.gz"),
        ]);
        assert_eq!(names, vec!["a_model", "b_model", "other"]);
    }

    #[test]
    fn test_supplied_model_names_fall_back_to_position() {
        let names = supplied_model_names(&[
            PathBuf::from("/x/run_1/model.tar.gz"),
            PathBuf::from("/y/run_1/model.tar.gz"),
            PathBuf::from("/y/run_2/model.tar.gz"),
        ]);
        assert_eq!(names, vec!["run_1_model_1", "run_1_model_2", "run_2_model"]);
        assert_eq!(names.iter().collect::<HashSet<_>>().len(), 3);
    }

    #[test]
    fn test_model_source_names() {
        assert_eq!(
            ModelSource::Supplied(PathBuf::from("models/20240101-core.tar.gz")).name(),
            "20240101-core"
        );
        assert_eq!(
            ModelInput::Path(PathBuf::from("a/b/model.tar.gz")).name(),
            "model.tar.gz"
        );
    }

    #[tokio::test]
    async fn test_mock_evaluator_mislabels() {
        let evaluator = MockEvaluator::new().mislabel("bye").with_metric("loss", 0.5);
        let report = evaluator
            .evaluate(
                &ModelInput::Path(PathBuf::from("m.tar.gz")),
                &[
                    Example::utterance("hi", "greet"),
                    Example::utterance("ciao", "bye"),
                ],
                &EvaluationContext::default(),
            )
            .await
            .unwrap();
        assert_eq!(report.metric("accuracy"), Some(0.5));
        assert_eq!(report.metric("loss"), Some(0.5));
        assert_eq!(report.failures().next().unwrap().predicted, "not_bye");
    }

    #[tokio::test]
    async fn test_mock_evaluator_story_metrics() {
        let evaluator = MockEvaluator::new();
        let story = Example::story(
            "happy path",
            vec![
                StoryStep::User {
                    intent: "greet".into(),
                    user: None,
                },
                StoryStep::Action {
                    action: "utter_greet".into(),
                },
            ],
        );
        let report = evaluator
            .evaluate(
                &ModelInput::Path(PathBuf::from("m.tar.gz")),
                &[story],
                &EvaluationContext::default(),
            )
            .await
            .unwrap();
        assert_eq!(report.metric("correct_stories"), Some(1.0));
        assert_eq!(report.predictions[0].input, "greet > utter_greet");
    }
}
