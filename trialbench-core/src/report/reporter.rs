//! Writes structured results and plots for comparisons and single evaluations.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::data::DatasetKind;
use crate::error::ReportError;
use crate::evaluation::{MetricReport, PredictionRecord};
use crate::planning::RunSpec;
use crate::report::layout::{
    self, ComparisonKind, FAILED_STORIES_FILE, INTENT_CONFUSION_MATRIX, INTENT_ERRORS_FILE,
    INTENT_HISTOGRAM, INTENT_REPORT_FILE, INTENT_SUCCESSES_FILE, PlotArtifact, RESULTS_FILE,
    STORY_CONFUSION_MATRIX, STORY_REPORT_FILE, SUCCESSFUL_STORIES_FILE,
};
use crate::report::plot::{Plot, PlotFormat, PlotRenderer};
use crate::results::{GroupSummary, MetricTuple, ResultSet, RunStage};
use crate::store::{ArtifactKey, ArtifactStore, put_json};

/// What a single-model evaluation report contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvaluationReportOptions {
    pub kind: DatasetKind,
    /// Also write correctly predicted examples.
    pub successes: bool,
    /// Skip writing wrongly predicted examples.
    pub no_errors: bool,
}

#[derive(Debug, Serialize)]
struct FailureEntry<'a> {
    run: &'a RunSpec,
    stage: RunStage,
    message: &'a str,
}

#[derive(Debug, Serialize)]
struct ComparisonDocument<'a> {
    kind: ComparisonKind,
    tuples: Vec<MetricTuple>,
    groups: &'a [GroupSummary],
    failures: Vec<FailureEntry<'a>>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    training_sizes: BTreeMap<String, usize>,
}

#[derive(Debug, Serialize)]
struct EvaluationDocument<'a> {
    metrics: &'a BTreeMap<String, f64>,
    total: usize,
    failed: usize,
}

#[derive(Debug, Serialize)]
struct StoryEntry<'a> {
    story: &'a str,
    expected: &'a str,
    predicted: &'a str,
}

/// Emits the artifacts of a finished orchestration.
#[derive(Clone)]
pub struct ComparisonReporter {
    store: Arc<dyn ArtifactStore>,
    renderer: Option<Arc<dyn PlotRenderer>>,
    primary_metrics: Vec<String>,
}

impl ComparisonReporter {
    /// `renderer: None` disables plotting.
    pub fn new(store: Arc<dyn ArtifactStore>, renderer: Option<Arc<dyn PlotRenderer>>) -> Self {
        Self {
            store,
            renderer,
            primary_metrics: Vec::new(),
        }
    }

    /// Metrics preferred for the stable comparison-graph file, in priority order.
    pub fn with_primary_metrics(mut self, metrics: Vec<String>) -> Self {
        self.primary_metrics = metrics;
        self
    }

    pub fn plots_enabled(&self) -> bool {
        self.renderer.is_some()
    }

    /// Write `results.json` and, when plotting, one graph per metric.
    ///
    /// Returns the keys written, `results.json` first.
    pub async fn report_comparison(
        &self,
        results: &ResultSet,
        summaries: &[GroupSummary],
        output: &ArtifactKey,
        kind: ComparisonKind,
    ) -> Result<Vec<ArtifactKey>, ReportError> {
        self.store.create_dir(output)?;

        let failures = results
            .failures()
            .filter_map(|record| {
                record.outcome.failure().map(|failure| FailureEntry {
                    run: &record.run,
                    stage: failure.stage,
                    message: &failure.message,
                })
            })
            .collect();
        let document = ComparisonDocument {
            kind,
            tuples: results.tuples(),
            groups: summaries,
            failures,
            training_sizes: results.training_sizes(),
        };
        let results_key = output.join(RESULTS_FILE);
        put_json(self.store.as_ref(), &results_key, &document)?;
        let mut written = vec![results_key];

        if self.renderer.is_some() {
            let metrics: BTreeSet<&str> = summaries
                .iter()
                .flat_map(|s| s.metrics.keys().map(String::as_str))
                .collect();
            let primary = self
                .primary_metrics
                .iter()
                .map(String::as_str)
                .find(|m| metrics.contains(m))
                .or_else(|| metrics.iter().next().copied());

            let graph = kind.graph();
            for metric in &metrics {
                let stem = if Some(*metric) == primary {
                    graph.stem.to_string()
                } else {
                    format!("{}_{}", graph.stem, sanitize(metric))
                };
                let plot = Plot::comparison(&comparison_title(kind), metric, summaries);
                if let Some(key) = self.write_plot(&plot, &stem, graph.preferred, output).await? {
                    written.push(key);
                }
            }
        }

        info!(output = %output, runs = results.len(), "Comparison results written");
        Ok(written)
    }

    /// Write the report of a single-model evaluation.
    pub async fn report_evaluation(
        &self,
        report: &MetricReport,
        output: &ArtifactKey,
        options: &EvaluationReportOptions,
    ) -> Result<Vec<ArtifactKey>, ReportError> {
        self.store.create_dir(output)?;
        let mut written = Vec::new();

        let failures: Vec<&PredictionRecord> = report.failures().collect();
        let document = EvaluationDocument {
            metrics: &report.metrics,
            total: report.predictions.len(),
            failed: failures.len(),
        };

        match options.kind {
            DatasetKind::Nlu => {
                let key = output.join(INTENT_REPORT_FILE);
                put_json(self.store.as_ref(), &key, &document)?;
                written.push(key);

                if options.successes {
                    let successes: Vec<&PredictionRecord> = report.successes().collect();
                    let key = output.join(INTENT_SUCCESSES_FILE);
                    put_json(self.store.as_ref(), &key, &successes)?;
                    written.push(key);
                }
                if !options.no_errors {
                    let key = output.join(INTENT_ERRORS_FILE);
                    put_json(self.store.as_ref(), &key, &failures)?;
                    written.push(key);
                }

                if self.renderer.is_some() {
                    let plots = [
                        (
                            INTENT_HISTOGRAM,
                            Plot::confidence_histogram(
                                "Intent Prediction Confidence Distribution",
                                &report.predictions,
                            ),
                        ),
                        (
                            INTENT_CONFUSION_MATRIX,
                            Plot::confusion_matrix("Intent Confusion matrix", &report.predictions),
                        ),
                    ];
                    written.extend(self.write_artifacts(&plots, output).await?);
                }
            }
            DatasetKind::Stories => {
                let key = output.join(STORY_REPORT_FILE);
                put_json(self.store.as_ref(), &key, &document)?;
                written.push(key);

                if !failures.is_empty() {
                    let key = output.join(FAILED_STORIES_FILE);
                    self.store
                        .put(&key, stories_yaml(failures.iter().copied())?.as_bytes())?;
                    written.push(key);
                }
                if options.successes {
                    let key = output.join(SUCCESSFUL_STORIES_FILE);
                    self.store
                        .put(&key, stories_yaml(report.successes())?.as_bytes())?;
                    written.push(key);
                }

                if self.renderer.is_some() {
                    let plots = [(
                        STORY_CONFUSION_MATRIX,
                        Plot::confusion_matrix("Action Confusion matrix", &report.predictions),
                    )];
                    written.extend(self.write_artifacts(&plots, output).await?);
                }
            }
        }

        info!(output = %output, kind = %options.kind, failed = failures.len(), "Evaluation results written");
        Ok(written)
    }

    async fn write_artifacts(
        &self,
        plots: &[(PlotArtifact, Plot)],
        output: &ArtifactKey,
    ) -> Result<Vec<ArtifactKey>, ReportError> {
        let mut written = Vec::new();
        for (artifact, plot) in plots {
            if let Some(key) = self
                .write_plot(plot, artifact.stem, artifact.preferred, output)
                .await?
            {
                written.push(key);
            }
        }
        Ok(written)
    }

    async fn write_plot(
        &self,
        plot: &Plot,
        stem: &str,
        preferred: PlotFormat,
        output: &ArtifactKey,
    ) -> Result<Option<ArtifactKey>, ReportError> {
        let Some(renderer) = &self.renderer else {
            return Ok(None);
        };
        let rendered = renderer.render(plot, preferred).await?;
        if rendered.format != preferred {
            return Err(ReportError::Render {
                message: format!(
                    "renderer produced {} for '{stem}', expected {}",
                    rendered.format.extension(),
                    preferred.extension()
                ),
            });
        }
        let key = output.join(layout::plot_file_name(stem, preferred));
        self.store.put(&key, &rendered.bytes)?;
        debug!(plot = %key, "Plot written");
        Ok(Some(key))
    }
}

fn comparison_title(kind: ComparisonKind) -> String {
    match kind {
        ComparisonKind::Core => "Core model comparison".to_string(),
        ComparisonKind::Nlu => "NLU model comparison".to_string(),
        ComparisonKind::CrossValidation => "Cross-validation".to_string(),
    }
}

fn sanitize(metric: &str) -> String {
    metric
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn stories_yaml<'a>(
    records: impl Iterator<Item = &'a PredictionRecord>,
) -> Result<String, serde_yaml::Error> {
    let entries: Vec<StoryEntry<'_>> = records
        .map(|p| StoryEntry {
            story: &p.input,
            expected: &p.expected,
            predicted: &p.predicted,
        })
        .collect();
    serde_yaml::to_string(&entries)
}
