//! Result collection and aggregation.
//!
//! Outcomes are appended to a [`ResultAggregator`] from any number of tasks,
//! frozen into a [`ResultSet`] and reduced to per-group statistics by
//! [`aggregate`]. Aggregation sorts by RunSpec before summing, so the output is
//! bit-identical regardless of the order in which runs finished.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ResultError, RunError};
use crate::evaluation::MetricReport;
use crate::planning::{DataSlice, RunSpec};

/// Stage of a run that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    Training,
    Evaluation,
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStage::Training => write!(f, "training"),
            RunStage::Evaluation => write!(f, "evaluation"),
        }
    }
}

/// Failure recorded in place of a report under the continue policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFailure {
    pub stage: RunStage,
    pub message: String,
}

impl RunFailure {
    /// `None` for cancellations, which are never recorded.
    pub fn from_error(error: &RunError) -> Option<Self> {
        match error {
            RunError::TrainingFailed { cause, .. } => Some(Self {
                stage: RunStage::Training,
                message: cause.clone(),
            }),
            RunError::EvaluationFailed { cause, .. } => Some(Self {
                stage: RunStage::Evaluation,
                message: cause.clone(),
            }),
            RunError::Cancelled { .. } => None,
        }
    }
}

/// Outcome of one RunSpec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "result", rename_all = "snake_case")]
pub enum RunOutcome {
    Completed(MetricReport),
    Failed(RunFailure),
}

impl RunOutcome {
    pub fn report(&self) -> Option<&MetricReport> {
        match self {
            RunOutcome::Completed(report) => Some(report),
            RunOutcome::Failed(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&RunFailure> {
        match self {
            RunOutcome::Completed(_) => None,
            RunOutcome::Failed(failure) => Some(failure),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, RunOutcome::Failed(_))
    }
}

/// One entry of a [`ResultSet`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run: RunSpec,
    pub outcome: RunOutcome,
    /// Number of examples the model was trained on, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub training_examples: Option<usize>,
}

/// Collects run outcomes from concurrent tasks.
#[derive(Debug, Default)]
pub struct ResultAggregator {
    inner: Mutex<Collected>,
}

#[derive(Debug, Default)]
struct Collected {
    records: Vec<RunRecord>,
    seen: HashSet<RunSpec>,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the outcome of `run`. Recording a RunSpec twice is an error.
    pub fn record(
        &self,
        run: RunSpec,
        outcome: RunOutcome,
        training_examples: Option<usize>,
    ) -> Result<(), ResultError> {
        let mut inner = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !inner.seen.insert(run.clone()) {
            return Err(ResultError::DuplicateRun { run });
        }
        if let RunOutcome::Failed(failure) = &outcome {
            warn!(run = %run, stage = %failure.stage, error = %failure.message, "Run failed");
        }
        inner.records.push(RunRecord {
            run,
            outcome,
            training_examples,
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|i| i.records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop collecting; records are ordered by RunSpec.
    pub fn freeze(self) -> ResultSet {
        let inner = self
            .inner
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        ResultSet::from_records(inner.records)
    }
}

/// One `(configuration, slice, run_index, metric, value)` tuple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricTuple {
    pub configuration: String,
    pub slice: DataSlice,
    pub run_index: usize,
    pub metric: String,
    pub value: f64,
}

/// Frozen, RunSpec-ordered outcomes of one orchestration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultSet {
    records: Vec<RunRecord>,
}

impl ResultSet {
    pub fn from_records(mut records: Vec<RunRecord>) -> Self {
        records.sort_by(|a, b| a.run.cmp(&b.run));
        Self { records }
    }

    pub fn records(&self) -> &[RunRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, run: &RunSpec) -> Option<&RunRecord> {
        self.records
            .binary_search_by(|r| r.run.cmp(run))
            .ok()
            .map(|i| &self.records[i])
    }

    /// Records whose outcome is a failure.
    pub fn failures(&self) -> impl Iterator<Item = &RunRecord> {
        self.records.iter().filter(|r| r.outcome.is_failed())
    }

    /// Every metric value of every completed run.
    pub fn tuples(&self) -> Vec<MetricTuple> {
        self.records
            .iter()
            .filter_map(|r| r.outcome.report().map(|report| (r, report)))
            .flat_map(|(record, report)| {
                report.metrics.iter().map(move |(metric, value)| MetricTuple {
                    configuration: record.run.configuration.clone(),
                    slice: record.run.slice,
                    run_index: record.run.run_index,
                    metric: metric.clone(),
                    value: *value,
                })
            })
            .collect()
    }

    /// Training-set size per slice label, taken from the first run that reports one.
    pub fn training_sizes(&self) -> BTreeMap<String, usize> {
        let mut sizes = BTreeMap::new();
        for record in &self.records {
            if let Some(n) = record.training_examples {
                sizes.entry(record.run.slice.to_string()).or_insert(n);
            }
        }
        sizes
    }
}

/// How runs are grouped for statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GroupBy {
    /// One group per configuration and slice.
    #[default]
    ConfigurationAndSlice,
    /// One group per configuration, pooling slices (cross-validation folds).
    Configuration,
}

/// Summary statistics of one metric across runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricStats {
    pub mean: f64,
    /// Population standard deviation.
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
    /// Values in RunSpec order.
    pub values: Vec<f64>,
}

impl MetricStats {
    pub fn from_values(values: Vec<f64>) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Some(Self {
            mean,
            std_dev: variance.sqrt(),
            min,
            max,
            values,
        })
    }
}

/// Aggregated statistics of one group of runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSummary {
    pub configuration: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slice: Option<DataSlice>,
    pub run_count: usize,
    pub failed_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub training_examples: Option<usize>,
    pub metrics: BTreeMap<String, MetricStats>,
}

/// Reduce a result set to per-group metric statistics.
///
/// Failed runs count towards `failed_count` and are excluded from the
/// statistics. Groups are returned in `(configuration, slice)` order.
pub fn aggregate(results: &ResultSet, group_by: GroupBy) -> Vec<GroupSummary> {
    let mut ordered: Vec<&RunRecord> = results.records.iter().collect();
    ordered.sort_by(|a, b| a.run.cmp(&b.run));

    let mut groups: BTreeMap<(String, Option<DataSlice>), Vec<&RunRecord>> = BTreeMap::new();
    for record in ordered {
        let slice = match group_by {
            GroupBy::ConfigurationAndSlice => Some(record.run.slice),
            GroupBy::Configuration => None,
        };
        groups
            .entry((record.run.configuration.clone(), slice))
            .or_default()
            .push(record);
    }

    groups
        .into_iter()
        .map(|((configuration, slice), records)| {
            let mut values: BTreeMap<String, Vec<f64>> = BTreeMap::new();
            let mut failed_count = 0;
            for record in &records {
                match &record.outcome {
                    RunOutcome::Completed(report) => {
                        for (metric, value) in &report.metrics {
                            values.entry(metric.clone()).or_default().push(*value);
                        }
                    }
                    RunOutcome::Failed(_) => failed_count += 1,
                }
            }
            GroupSummary {
                configuration,
                slice,
                run_count: records.len(),
                failed_count,
                training_examples: records.iter().find_map(|r| r.training_examples),
                metrics: values
                    .into_iter()
                    .filter_map(|(metric, v)| MetricStats::from_values(v).map(|s| (metric, s)))
                    .collect(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn report(accuracy: f64) -> RunOutcome {
        RunOutcome::Completed(MetricReport {
            metrics: BTreeMap::from([("accuracy".to_string(), accuracy)]),
            predictions: Vec::new(),
        })
    }

    fn spec(config: &str, percentage: u8, run: usize) -> RunSpec {
        RunSpec::new(config, DataSlice::Percentage(percentage), run)
    }

    #[test]
    fn test_duplicate_run_is_rejected() {
        let aggregator = ResultAggregator::new();
        aggregator.record(spec("a", 50, 1), report(0.5), None).unwrap();
        let err = aggregator
            .record(spec("a", 50, 1), report(0.6), None)
            .unwrap_err();
        assert!(matches!(err, ResultError::DuplicateRun { .. }));
        assert_eq!(aggregator.len(), 1);
    }

    #[test]
    fn test_aggregate_mean_and_population_std() {
        let aggregator = ResultAggregator::new();
        aggregator.record(spec("a", 50, 1), report(0.5), Some(10)).unwrap();
        aggregator.record(spec("a", 50, 2), report(0.7), Some(10)).unwrap();
        let summaries = aggregate(&aggregator.freeze(), GroupBy::default());

        assert_eq!(summaries.len(), 1);
        let stats = &summaries[0].metrics["accuracy"];
        assert!((stats.mean - 0.6).abs() < 1e-12);
        assert!((stats.std_dev - 0.1).abs() < 1e-12);
        assert_eq!(stats.min, 0.5);
        assert_eq!(stats.max, 0.7);
        assert_eq!(summaries[0].training_examples, Some(10));
    }

    #[test]
    fn test_aggregate_is_insertion_order_invariant() {
        let records = vec![
            (spec("b", 25, 1), 0.1),
            (spec("a", 75, 2), 0.2),
            (spec("a", 75, 1), 0.3),
            (spec("b", 25, 2), 0.4),
            (spec("a", 25, 1), 0.5),
        ];
        let forward = ResultAggregator::new();
        for (run, v) in records.iter().cloned() {
            forward.record(run, report(v), None).unwrap();
        }
        let backward = ResultAggregator::new();
        for (run, v) in records.into_iter().rev() {
            backward.record(run, report(v), None).unwrap();
        }

        let a = forward.freeze();
        let b = backward.freeze();
        assert_eq!(a, b);
        assert_eq!(aggregate(&a, GroupBy::default()), aggregate(&b, GroupBy::default()));
    }

    #[test]
    fn test_failed_runs_are_counted_not_averaged() {
        let aggregator = ResultAggregator::new();
        aggregator.record(spec("a", 50, 1), report(0.8), None).unwrap();
        aggregator
            .record(
                spec("a", 50, 2),
                RunOutcome::Failed(RunFailure {
                    stage: RunStage::Training,
                    message: "boom".into(),
                }),
                None,
            )
            .unwrap();
        let set = aggregator.freeze();
        let summaries = aggregate(&set, GroupBy::default());
        assert_eq!(summaries[0].run_count, 2);
        assert_eq!(summaries[0].failed_count, 1);
        assert_eq!(summaries[0].metrics["accuracy"].values, vec![0.8]);
        assert_eq!(set.failures().count(), 1);
    }

    #[test]
    fn test_group_by_configuration_pools_folds() {
        let aggregator = ResultAggregator::new();
        for index in 0..3 {
            aggregator
                .record(
                    RunSpec::new("cfg", DataSlice::Fold { index, count: 3 }, 1),
                    report(index as f64),
                    None,
                )
                .unwrap();
        }
        let summaries = aggregate(&aggregator.freeze(), GroupBy::Configuration);
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].slice, None);
        assert_eq!(summaries[0].metrics["accuracy"].values, vec![0.0, 1.0, 2.0]);
    }

    #[test]
    fn test_concurrent_recording() {
        let aggregator = Arc::new(ResultAggregator::new());
        let handles: Vec<_> = (1..=8)
            .map(|run| {
                let aggregator = aggregator.clone();
                std::thread::spawn(move || {
                    aggregator
                        .record(spec("a", 50, run), report(run as f64), None)
                        .unwrap()
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(aggregator.len(), 8);
    }

    #[test]
    fn test_tuples_and_training_sizes() {
        let aggregator = ResultAggregator::new();
        aggregator.record(spec("a", 25, 1), report(0.5), Some(3)).unwrap();
        aggregator.record(spec("a", 75, 1), report(0.9), Some(8)).unwrap();
        let set = aggregator.freeze();
        let tuples = set.tuples();
        assert_eq!(tuples.len(), 2);
        assert_eq!(tuples[0].slice, DataSlice::Percentage(25));
        assert_eq!(
            set.training_sizes(),
            BTreeMap::from([("25%".to_string(), 3), ("75%".to_string(), 8)])
        );
        assert!(set.get(&spec("a", 75, 1)).is_some());
    }
}
