//! The comparison orchestrator.
//!
//! Wires partitioning, planning, training, evaluation, aggregation and
//! reporting together. RunSpecs execute inline in plan order when
//! `max_concurrent_runs <= 1`, otherwise as spawned tasks bounded by a
//! semaphore. Under [`FailurePolicy::FailFast`] the first failure cancels all
//! remaining work; under [`FailurePolicy::Continue`] failures are recorded in
//! place of the run's report.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{ExecutionConfig, ModelConfiguration};
use crate::data::{
    Dataset, Partition, PartitionTag, derive_seed, k_fold_shuffled, partition_by_percentage,
    split_held_out,
};
use crate::error::{BenchError, EvaluationError, Result, RunError};
use crate::evaluation::{
    EvaluationContext, EvaluationRunner, Evaluator, MetricReport, ModelSource,
    discover_comparison_models, supplied_model_names,
};
use crate::planning::{self, DataSlice, RunSpec};
use crate::report::layout::TRAINING_SIZES_FILE;
use crate::report::{ComparisonKind, ComparisonReporter, EvaluationReportOptions, PlotRenderer};
use crate::results::{
    GroupBy, GroupSummary, ResultAggregator, ResultSet, RunFailure, RunOutcome, aggregate,
};
use crate::store::{ArtifactKey, ArtifactStore, put_json};
use crate::training::{Trainer, TrainingOrchestrator};

/// What happens to the remaining runs when one fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Cancel everything on the first failure.
    #[default]
    FailFast,
    /// Record the failure and keep going.
    Continue,
}

/// Scheduling options of one orchestration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOptions {
    pub max_concurrent_runs: usize,
    pub failure_policy: FailurePolicy,
    pub base_seed: u64,
    /// Treat any wrong prediction as an evaluation failure.
    pub strict_predictions: bool,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self::from(&ExecutionConfig::default())
    }
}

impl From<&ExecutionConfig> for ExecutionOptions {
    fn from(config: &ExecutionConfig) -> Self {
        Self {
            max_concurrent_runs: config.max_concurrent_runs,
            failure_policy: config.failure_policy,
            base_seed: config.base_seed,
            strict_predictions: false,
        }
    }
}

/// Everything an orchestration produced.
#[derive(Debug, Clone)]
pub struct ComparisonOutcome {
    pub results: ResultSet,
    pub summaries: Vec<GroupSummary>,
    /// Keys of the report files written.
    pub written: Vec<ArtifactKey>,
}

/// Result of evaluating a single model.
#[derive(Debug, Clone)]
pub struct EvaluationOutcome {
    pub report: MetricReport,
    pub written: Vec<ArtifactKey>,
}

struct JobOutput {
    report: MetricReport,
    training_examples: Option<usize>,
}

#[async_trait]
trait RunJob: Send + Sync {
    async fn run(&self, spec: &RunSpec) -> std::result::Result<JobOutput, RunError>;
}

/// Data a run trains and evaluates on; shared by every configuration of the
/// same (slice, run).
struct RunInputs {
    train: Dataset,
    partition: Partition,
    test: Dataset,
}

type InputKey = (DataSlice, usize);

fn input_key(spec: &RunSpec) -> InputKey {
    (spec.slice, spec.run_index)
}

struct TrainEvaluateJob {
    training: TrainingOrchestrator,
    evaluation: Option<EvaluationRunner>,
    configurations: HashMap<String, ModelConfiguration>,
    inputs: HashMap<InputKey, Arc<RunInputs>>,
    root: ArtifactKey,
}

#[async_trait]
impl RunJob for TrainEvaluateJob {
    async fn run(&self, spec: &RunSpec) -> std::result::Result<JobOutput, RunError> {
        let missing = |what: &str| RunError::TrainingFailed {
            run: spec.clone(),
            cause: format!("no {what} prepared for this run"),
        };
        let configuration = self
            .configurations
            .get(&spec.configuration)
            .ok_or_else(|| missing("configuration"))?;
        let inputs = self
            .inputs
            .get(&input_key(spec))
            .ok_or_else(|| missing("partition"))?;

        let artifact = self
            .training
            .train(spec, configuration, &inputs.train, &inputs.partition, &self.root)
            .await?;
        let training_examples = Some(artifact.training_examples);

        let report = match &self.evaluation {
            Some(evaluation) => {
                evaluation
                    .evaluate_run(
                        spec,
                        &ModelSource::Trained(artifact),
                        inputs.test.examples(),
                        &self.root,
                    )
                    .await?
            }
            None => MetricReport::default(),
        };
        Ok(JobOutput {
            report,
            training_examples,
        })
    }
}

struct EvaluateModelJob {
    evaluation: EvaluationRunner,
    models: HashMap<RunSpec, (ModelSource, Option<usize>)>,
    test: Dataset,
    root: ArtifactKey,
}

#[async_trait]
impl RunJob for EvaluateModelJob {
    async fn run(&self, spec: &RunSpec) -> std::result::Result<JobOutput, RunError> {
        let (source, training_examples) =
            self.models
                .get(spec)
                .ok_or_else(|| RunError::EvaluationFailed {
                    run: spec.clone(),
                    cause: "no model for this run".into(),
                })?;
        let report = self
            .evaluation
            .evaluate_run(spec, source, self.test.examples(), &self.root)
            .await?;
        Ok(JobOutput {
            report,
            training_examples: *training_examples,
        })
    }
}

/// Shared state of one execution.
struct Execution {
    aggregator: ResultAggregator,
    token: CancellationToken,
    first_error: Mutex<Option<BenchError>>,
    policy: FailurePolicy,
}

impl Execution {
    fn fail(&self, error: BenchError) {
        self.token.cancel();
        let mut first = self
            .first_error
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if first.is_none() {
            *first = Some(error);
        }
    }

    async fn run_one(&self, spec: RunSpec, job: &dyn RunJob) {
        if self.token.is_cancelled() {
            debug!(run = %spec, "Skipping cancelled run");
            return;
        }
        let result = tokio::select! {
            _ = self.token.cancelled() => Err(RunError::Cancelled { run: spec.clone() }),
            result = job.run(&spec) => result,
        };

        let recorded = match result {
            Ok(output) => self.aggregator.record(
                spec,
                RunOutcome::Completed(output.report),
                output.training_examples,
            ),
            Err(RunError::Cancelled { run }) => {
                debug!(run = %run, "Run cancelled");
                return;
            }
            Err(error) => match (self.policy, RunFailure::from_error(&error)) {
                (FailurePolicy::Continue, Some(failure)) => {
                    self.aggregator
                        .record(spec, RunOutcome::Failed(failure), None)
                }
                _ => {
                    warn!(error = %error, "Run failed, cancelling remaining runs");
                    self.fail(error.into());
                    return;
                }
            },
        };
        if let Err(e) = recorded {
            self.fail(e.into());
        }
    }

    fn finish(self) -> Result<ResultSet> {
        let first = self
            .first_error
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match first {
            Some(error) => Err(error),
            None => Ok(self.aggregator.freeze()),
        }
    }
}

/// Coordinates trainer, evaluator, artifact store and reporter.
pub struct Orchestrator {
    store: Arc<dyn ArtifactStore>,
    trainer: Arc<dyn Trainer>,
    evaluator: Arc<dyn Evaluator>,
    reporter: ComparisonReporter,
    options: ExecutionOptions,
    context: EvaluationContext,
    test_fraction: f64,
}

impl Orchestrator {
    /// `renderer: None` disables plotting.
    pub fn new(
        store: Arc<dyn ArtifactStore>,
        trainer: Arc<dyn Trainer>,
        evaluator: Arc<dyn Evaluator>,
        renderer: Option<Arc<dyn PlotRenderer>>,
    ) -> Self {
        Self {
            reporter: ComparisonReporter::new(store.clone(), renderer),
            store,
            trainer,
            evaluator,
            options: ExecutionOptions::default(),
            context: EvaluationContext::default(),
            test_fraction: 0.2,
        }
    }

    pub fn with_options(mut self, options: ExecutionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_context(mut self, context: EvaluationContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_primary_metrics(mut self, metrics: Vec<String>) -> Self {
        self.reporter = self.reporter.with_primary_metrics(metrics);
        self
    }

    /// Fraction of the data held out per run of an NLU comparison.
    pub fn with_test_fraction(mut self, fraction: f64) -> Self {
        self.test_fraction = fraction;
        self
    }

    pub fn options(&self) -> &ExecutionOptions {
        &self.options
    }

    pub fn store(&self) -> &Arc<dyn ArtifactStore> {
        &self.store
    }

    fn training(&self) -> TrainingOrchestrator {
        TrainingOrchestrator::new(self.trainer.clone(), self.store.clone(), self.options.base_seed)
    }

    fn evaluation(&self) -> EvaluationRunner {
        EvaluationRunner::new(self.evaluator.clone(), self.store.clone(), self.context.clone())
            .strict(self.options.strict_predictions)
    }

    /// Execute every RunSpec through `job` and collect the outcomes.
    async fn execute(&self, specs: Vec<RunSpec>, job: Arc<dyn RunJob>) -> Result<ResultSet> {
        let execution = Arc::new(Execution {
            aggregator: ResultAggregator::new(),
            token: CancellationToken::new(),
            first_error: Mutex::new(None),
            policy: self.options.failure_policy,
        });
        let total = specs.len();
        info!(
            runs = total,
            max_concurrent = self.options.max_concurrent_runs,
            policy = ?self.options.failure_policy,
            "Executing runs"
        );

        if self.options.max_concurrent_runs <= 1 {
            for spec in specs {
                execution.run_one(spec, job.as_ref()).await;
                if execution.token.is_cancelled() {
                    break;
                }
            }
        } else {
            let semaphore = Arc::new(Semaphore::new(self.options.max_concurrent_runs));
            let mut handles = Vec::with_capacity(total);
            for spec in specs {
                let execution = execution.clone();
                let job = job.clone();
                let sem = semaphore.clone();
                handles.push(tokio::spawn(async move {
                    let _permit = tokio::select! {
                        _ = execution.token.cancelled() => return,
                        permit = sem.acquire_owned() => match permit {
                            Ok(permit) => permit,
                            Err(_) => return,
                        },
                    };
                    execution.run_one(spec, job.as_ref()).await;
                }));
            }
            for joined in join_all(handles).await {
                if let Err(e) = joined {
                    execution.fail(BenchError::Io(std::io::Error::other(format!(
                        "run task failed: {e}"
                    ))));
                }
            }
        }

        let execution = Arc::try_unwrap(execution).map_err(|_| {
            BenchError::Io(std::io::Error::other("run tasks still hold the execution state"))
        })?;
        execution.finish()
    }

    fn configuration_map(configurations: &[ModelConfiguration]) -> HashMap<String, ModelConfiguration> {
        configurations
            .iter()
            .map(|c| (c.name.clone(), c.clone()))
            .collect()
    }

    fn configuration_names(configurations: &[ModelConfiguration]) -> Vec<&str> {
        configurations.iter().map(|c| c.name.as_str()).collect()
    }

    /// Train every configuration on percentages of `dataset`, `runs` times.
    ///
    /// Models land in `<out>/run_<N>/<config>__percentage_<P>/`; the number
    /// of training examples per percentage goes to `<out>/training_sizes.json`.
    pub async fn train_comparison(
        &self,
        configurations: &[ModelConfiguration],
        dataset: &Dataset,
        percentages: &[u8],
        runs: usize,
        out: &ArtifactKey,
    ) -> Result<ResultSet> {
        let specs = planning::plan(&Self::configuration_names(configurations), percentages, runs)?;

        let mut inputs = HashMap::new();
        let mut sizes = BTreeMap::new();
        for spec in &specs {
            let key = input_key(spec);
            if inputs.contains_key(&key) {
                continue;
            }
            let DataSlice::Percentage(percentage) = spec.slice else {
                continue;
            };
            let partition =
                partition_by_percentage(dataset, percentage, spec.seed(self.options.base_seed))?;
            sizes.insert(percentage, partition.train_len());
            inputs.insert(
                key,
                Arc::new(RunInputs {
                    train: dataset.clone(),
                    partition,
                    test: Dataset::new(dataset.kind(), Vec::new()),
                }),
            );
        }

        info!(
            configurations = configurations.len(),
            runs,
            out = %out,
            "Starting training comparison"
        );
        self.store.create_dir(out)?;
        let job = TrainEvaluateJob {
            training: self.training(),
            evaluation: None,
            configurations: Self::configuration_map(configurations),
            inputs,
            root: out.clone(),
        };
        let results = self.execute(specs, Arc::new(job)).await?;
        put_json(self.store.as_ref(), &out.join(TRAINING_SIZES_FILE), &sizes)?;
        Ok(results)
    }

    /// Compare NLU configurations trained on percentages of the data.
    ///
    /// Each run holds out a fresh test set; every configuration and
    /// percentage of that run trains on a subset of the remaining examples.
    pub async fn compare_nlu(
        &self,
        configurations: &[ModelConfiguration],
        dataset: &Dataset,
        percentages: &[u8],
        runs: usize,
        out: &ArtifactKey,
    ) -> Result<ComparisonOutcome> {
        let specs = planning::plan(&Self::configuration_names(configurations), percentages, runs)?;

        let mut splits: HashMap<usize, (Dataset, Dataset)> = HashMap::new();
        let mut inputs = HashMap::new();
        for spec in &specs {
            let key = input_key(spec);
            if inputs.contains_key(&key) {
                continue;
            }
            let DataSlice::Percentage(percentage) = spec.slice else {
                continue;
            };
            let run_seed = spec.seed(self.options.base_seed);
            if !splits.contains_key(&spec.run_index) {
                let split = split_held_out(dataset, self.test_fraction, run_seed)?;
                splits.insert(spec.run_index, split);
            }
            let Some((train, test)) = splits.get(&spec.run_index) else {
                continue;
            };
            let partition = partition_by_percentage(train, percentage, derive_seed(run_seed, 1))?;
            inputs.insert(
                key,
                Arc::new(RunInputs {
                    train: train.clone(),
                    partition,
                    test: test.clone(),
                }),
            );
        }

        info!(
            configurations = configurations.len(),
            runs,
            out = %out,
            "Starting NLU comparison"
        );
        let job = TrainEvaluateJob {
            training: self.training(),
            evaluation: Some(self.evaluation()),
            configurations: Self::configuration_map(configurations),
            inputs,
            root: out.clone(),
        };
        let results = self.execute(specs, Arc::new(job)).await?;
        self.report(results, GroupBy::ConfigurationAndSlice, out, ComparisonKind::Nlu)
            .await
    }

    /// k-fold cross-validation of every configuration.
    ///
    /// Besides the per-fold comparison, the predictions of all folds are
    /// pooled into a single intent evaluation report in `out`.
    pub async fn cross_validate(
        &self,
        configurations: &[ModelConfiguration],
        dataset: &Dataset,
        folds: usize,
        out: &ArtifactKey,
        report_options: &EvaluationReportOptions,
    ) -> Result<ComparisonOutcome> {
        let specs = planning::plan_cv(&Self::configuration_names(configurations), folds)?;
        let partitions = k_fold_shuffled(dataset, folds, self.options.base_seed)?;

        let mut inputs = HashMap::new();
        for partition in partitions {
            let PartitionTag::Fold { index, count } = partition.tag else {
                continue;
            };
            let test = dataset.subset(&partition.held_out);
            inputs.insert(
                (DataSlice::Fold { index, count }, 1),
                Arc::new(RunInputs {
                    train: dataset.clone(),
                    partition,
                    test,
                }),
            );
        }

        info!(configurations = configurations.len(), folds, out = %out, "Starting cross-validation");
        let job = TrainEvaluateJob {
            training: self.training(),
            evaluation: Some(self.evaluation()),
            configurations: Self::configuration_map(configurations),
            inputs,
            root: out.clone(),
        };
        let results = self.execute(specs, Arc::new(job)).await?;

        let pooled = MetricReport::from_predictions(
            results
                .records()
                .iter()
                .filter_map(|r| r.outcome.report())
                .flat_map(|report| report.predictions.iter().cloned())
                .collect(),
        );
        let mut outcome = self
            .report(results, GroupBy::Configuration, out, ComparisonKind::CrossValidation)
            .await?;
        let written = self
            .reporter
            .report_evaluation(&pooled, out, report_options)
            .await?;
        outcome.written.extend(written);
        Ok(outcome)
    }

    /// Evaluate the models of an earlier training comparison stored in `models_dir`.
    pub async fn evaluate_model_directory(
        &self,
        models_dir: &ArtifactKey,
        test_data: &Dataset,
        out: &ArtifactKey,
    ) -> Result<ComparisonOutcome> {
        let discovered = discover_comparison_models(self.store.as_ref(), models_dir)?;
        if discovered.is_empty() {
            return Err(EvaluationError::NoModelAvailable.into());
        }
        info!(models = discovered.len(), dir = %models_dir, "Evaluating comparison models");

        let specs: Vec<RunSpec> = discovered.iter().map(|m| m.run.clone()).collect();
        let job = EvaluateModelJob {
            evaluation: self.evaluation(),
            models: discovered
                .into_iter()
                .map(|m| (m.run, (m.source, m.training_examples)))
                .collect(),
            test: test_data.clone(),
            root: out.clone(),
        };
        let results = self.execute(specs, Arc::new(job)).await?;
        self.report(results, GroupBy::ConfigurationAndSlice, out, ComparisonKind::Core)
            .await
    }

    /// Compare pre-existing models on the same test data.
    pub async fn compare_models(
        &self,
        models: &[PathBuf],
        test_data: &Dataset,
        out: &ArtifactKey,
    ) -> Result<ComparisonOutcome> {
        if models.is_empty() {
            return Err(EvaluationError::NoModelAvailable.into());
        }
        let names = supplied_model_names(models);
        let specs = planning::plan_models(&names)?;
        let sources = models.iter().cloned().map(ModelSource::Supplied);

        info!(models = specs.len(), out = %out, "Comparing models");
        let job = EvaluateModelJob {
            evaluation: self.evaluation(),
            models: specs
                .iter()
                .cloned()
                .zip(sources.map(|s| (s, None)))
                .collect(),
            test: test_data.clone(),
            root: out.clone(),
        };
        let results = self.execute(specs, Arc::new(job)).await?;
        self.report(results, GroupBy::ConfigurationAndSlice, out, ComparisonKind::Core)
            .await
    }

    /// Evaluate one model and write its report to `out`.
    ///
    /// Fails with `NoModelAvailable` before anything is written when `model`
    /// is `None`.
    pub async fn evaluate_single(
        &self,
        model: Option<PathBuf>,
        test_data: &Dataset,
        out: &ArtifactKey,
        report_options: &EvaluationReportOptions,
    ) -> Result<EvaluationOutcome> {
        let source = model.map(ModelSource::Supplied);
        let report = self
            .evaluation()
            .evaluate(source.as_ref(), test_data.examples())
            .await?;
        let written = self
            .reporter
            .report_evaluation(&report, out, report_options)
            .await?;
        Ok(EvaluationOutcome { report, written })
    }

    async fn report(
        &self,
        results: ResultSet,
        group_by: GroupBy,
        out: &ArtifactKey,
        kind: ComparisonKind,
    ) -> Result<ComparisonOutcome> {
        let summaries = aggregate(&results, group_by);
        let written = self
            .reporter
            .report_comparison(&results, &summaries, out, kind)
            .await?;
        Ok(ComparisonOutcome {
            results,
            summaries,
            written,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{DatasetKind, Example};
    use crate::evaluation::MockEvaluator;
    use crate::report::ChartRenderer;
    use crate::store::InMemoryArtifactStore;
    use crate::training::MockTrainer;
    use crate::training::test_support::configuration;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn nlu_data(n: usize) -> Dataset {
        Dataset::new(
            DatasetKind::Nlu,
            (0..n)
                .map(|i| Example::utterance(&format!("utterance {i}"), &format!("intent_{}", i % 4)))
                .collect(),
        )
    }

    fn orchestrator(
        store: Arc<InMemoryArtifactStore>,
        trainer: MockTrainer,
        evaluator: MockEvaluator,
        options: ExecutionOptions,
    ) -> Orchestrator {
        let renderer: Arc<dyn PlotRenderer> = Arc::new(ChartRenderer::new());
        Orchestrator::new(store, Arc::new(trainer), Arc::new(evaluator), Some(renderer))
            .with_options(options)
    }

    fn configs() -> Vec<ModelConfiguration> {
        vec![configuration("config_1"), configuration("config_2")]
    }

    #[tokio::test]
    async fn test_nlu_comparison_groups() {
        let store = Arc::new(InMemoryArtifactStore::new());
        let orchestrator = orchestrator(
            store.clone(),
            MockTrainer::new(),
            MockEvaluator::new(),
            ExecutionOptions::default(),
        );
        let outcome = orchestrator
            .compare_nlu(&configs(), &nlu_data(40), &[25, 75], 2, &ArtifactKey::new("results"))
            .await
            .unwrap();

        assert_eq!(outcome.results.len(), 8);
        assert_eq!(outcome.summaries.len(), 4);
        assert!(outcome.summaries.iter().all(|s| s.run_count == 2));
        assert!(store.exists(&ArtifactKey::new("results/run_1")));
        assert!(store.exists(&ArtifactKey::new("results/run_2")));
        assert!(store.exists(&ArtifactKey::new(
            "results/run_2/config_2__percentage_75/report.json"
        )));
        assert!(store.exists(&ArtifactKey::new("results/results.json")));
        assert!(store.exists(&ArtifactKey::new(
            "results/nlu_model_comparison_graph.pdf"
        )));
    }

    #[tokio::test]
    async fn test_configurations_share_training_subsets() {
        let store = Arc::new(InMemoryArtifactStore::new());
        let orchestrator = orchestrator(
            store.clone(),
            MockTrainer::new(),
            MockEvaluator::new(),
            ExecutionOptions::default(),
        );
        let results = orchestrator
            .train_comparison(&configs(), &nlu_data(20), &[50], 1, &ArtifactKey::new("models"))
            .await
            .unwrap();
        let sizes: Vec<_> = results.records().iter().map(|r| r.training_examples).collect();
        assert_eq!(sizes, vec![Some(10), Some(10)]);

        let model = |config: &str| {
            store
                .get(&ArtifactKey::new(format!(
                    "models/run_1/{config}__percentage_50/model.tar.gz"
                )))
                .unwrap()
                .unwrap()
        };
        // The mock encodes the seed; both configurations saw the same run seed.
        let a = String::from_utf8(model("config_1")).unwrap();
        let b = String::from_utf8(model("config_2")).unwrap();
        assert_eq!(a.split(':').nth(2), b.split(':').nth(2));

        let sizes: BTreeMap<String, usize> =
            crate::store::get_json(store.as_ref(), &ArtifactKey::new("models/training_sizes.json"))
                .unwrap()
                .unwrap();
        assert_eq!(sizes, BTreeMap::from([("50".to_string(), 10)]));
    }

    #[tokio::test]
    async fn test_fail_fast_returns_first_error() {
        let store = Arc::new(InMemoryArtifactStore::new());
        let trainer = MockTrainer::new().fail_for("config_1");
        let orchestrator = orchestrator(
            store.clone(),
            trainer,
            MockEvaluator::new(),
            ExecutionOptions::default(),
        );
        let err = orchestrator
            .compare_nlu(&configs(), &nlu_data(20), &[50], 2, &ArtifactKey::new("results"))
            .await
            .unwrap_err();
        match err {
            BenchError::Run(RunError::TrainingFailed { run, .. }) => {
                assert_eq!(run, RunSpec::new("config_1", DataSlice::Percentage(50), 1));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!store.exists(&ArtifactKey::new("results/results.json")));
        assert!(!store.exists(&ArtifactKey::new("results/run_1/config_2__percentage_50")));
    }

    #[tokio::test]
    async fn test_fail_fast_cancels_concurrent_runs() {
        let store = Arc::new(InMemoryArtifactStore::new());
        let trainer = MockTrainer::new()
            .fail_for("config_1")
            .with_delay(Duration::from_millis(20));
        let options = ExecutionOptions {
            max_concurrent_runs: 2,
            ..ExecutionOptions::default()
        };
        let orchestrator = orchestrator(store.clone(), trainer, MockEvaluator::new(), options);
        let err = orchestrator
            .train_comparison(
                &configs(),
                &nlu_data(20),
                &[25, 50, 75, 100],
                3,
                &ArtifactKey::new("models"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BenchError::Run(RunError::TrainingFailed { .. })));
        // config_1 runs come first in plan order; with two slots the failure
        // stops the remaining 22 runs well before config_2 is reached.
        let trained = store.list(&ArtifactKey::new("models")).unwrap();
        assert!(trained.len() < 24);
    }

    #[tokio::test]
    async fn test_continue_policy_records_failures() {
        let store = Arc::new(InMemoryArtifactStore::new());
        let options = ExecutionOptions {
            failure_policy: FailurePolicy::Continue,
            ..ExecutionOptions::default()
        };
        let orchestrator = orchestrator(
            store.clone(),
            MockTrainer::new().fail_for("config_1"),
            MockEvaluator::new(),
            options,
        );
        let outcome = orchestrator
            .compare_nlu(&configs(), &nlu_data(20), &[50], 2, &ArtifactKey::new("results"))
            .await
            .unwrap();

        assert_eq!(outcome.results.len(), 4);
        assert_eq!(outcome.results.failures().count(), 2);
        let failed = &outcome.summaries[0];
        assert_eq!(failed.configuration, "config_1");
        assert_eq!(failed.failed_count, 2);
        assert!(failed.metrics.is_empty());
        assert_eq!(outcome.summaries[1].metrics["accuracy"].values.len(), 2);
    }

    #[tokio::test]
    async fn test_sequential_and_concurrent_parity() {
        let run = |max_concurrent_runs| async move {
            let store = Arc::new(InMemoryArtifactStore::new());
            let options = ExecutionOptions {
                max_concurrent_runs,
                ..ExecutionOptions::default()
            };
            let orchestrator = orchestrator(
                store,
                MockTrainer::new(),
                MockEvaluator::new().mislabel("intent_1"),
                options,
            );
            orchestrator
                .compare_nlu(&configs(), &nlu_data(30), &[30, 60, 100], 3, &ArtifactKey::new("r"))
                .await
                .unwrap()
        };
        let sequential = run(1).await;
        let concurrent = run(4).await;
        assert_eq!(sequential.summaries, concurrent.summaries);
        assert_eq!(sequential.results.tuples(), concurrent.results.tuples());
    }

    #[tokio::test]
    async fn test_cross_validation_layout() {
        let store = Arc::new(InMemoryArtifactStore::new());
        let orchestrator = orchestrator(
            store.clone(),
            MockTrainer::new(),
            MockEvaluator::new(),
            ExecutionOptions::default(),
        );
        let report_options = EvaluationReportOptions {
            kind: DatasetKind::Nlu,
            successes: false,
            no_errors: false,
        };
        let outcome = orchestrator
            .cross_validate(
                &[configuration("config")],
                &nlu_data(10),
                2,
                &ArtifactKey::new("results"),
                &report_options,
            )
            .await
            .unwrap();

        assert_eq!(outcome.summaries.len(), 1);
        assert_eq!(outcome.summaries[0].run_count, 2);
        for key in [
            "results/fold_1/config/model.tar.gz",
            "results/fold_2/config/report.json",
            "results/results.json",
            "results/cross_validation_graph.pdf",
            "results/intent_histogram.png",
            "results/intent_confusion_matrix.png",
        ] {
            assert!(store.exists(&ArtifactKey::new(key)), "missing {key}");
        }
    }

    #[tokio::test]
    async fn test_model_directory_round_trip() {
        let store = Arc::new(InMemoryArtifactStore::new());
        let orchestrator = orchestrator(
            store.clone(),
            MockTrainer::new(),
            MockEvaluator::new(),
            ExecutionOptions::default(),
        );
        let models = ArtifactKey::new("comparison_models");
        orchestrator
            .train_comparison(&configs(), &nlu_data(12), &[50, 100], 2, &models)
            .await
            .unwrap();

        let outcome = orchestrator
            .evaluate_model_directory(&models, &nlu_data(12), &ArtifactKey::new("results"))
            .await
            .unwrap();
        assert_eq!(outcome.results.len(), 8);
        assert_eq!(outcome.summaries.len(), 4);
        assert_eq!(outcome.summaries[0].training_examples, Some(6));
        assert!(store.exists(&ArtifactKey::new("results/results.json")));
        assert!(store.exists(&ArtifactKey::new(
            "results/core_model_comparison_graph.pdf"
        )));
    }

    #[tokio::test]
    async fn test_empty_model_directory_has_no_model() {
        let store = Arc::new(InMemoryArtifactStore::new());
        let orchestrator = orchestrator(
            store.clone(),
            MockTrainer::new(),
            MockEvaluator::new(),
            ExecutionOptions::default(),
        );
        let err = orchestrator
            .evaluate_model_directory(
                &ArtifactKey::new("nothing"),
                &nlu_data(4),
                &ArtifactKey::new("results"),
            )
            .await
            .unwrap_err();
        assert!(err.is_no_model());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_evaluate_single_without_model() {
        let store = Arc::new(InMemoryArtifactStore::new());
        let orchestrator = orchestrator(
            store.clone(),
            MockTrainer::new(),
            MockEvaluator::new(),
            ExecutionOptions::default(),
        );
        let options = EvaluationReportOptions {
            kind: DatasetKind::Nlu,
            successes: false,
            no_errors: false,
        };
        let err = orchestrator
            .evaluate_single(None, &nlu_data(4), &ArtifactKey::new("results"), &options)
            .await
            .unwrap_err();
        assert!(err.is_no_model());
        assert!(!store.exists(&ArtifactKey::new("results")));
    }
}
