//! # Trialbench Core
//!
//! Core library for trialbench, a training/evaluation comparison orchestrator.
//! Provides dataset partitioning, run planning, training and evaluation
//! scheduling against external commands, result aggregation, and reporting.

pub mod config;
pub mod data;
pub mod error;
pub mod evaluation;
pub mod orchestrator;
pub mod persistence;
pub mod planning;
pub mod process;
pub mod report;
pub mod results;
pub mod store;
pub mod suite;
pub mod training;

// Re-export commonly used types at the crate root.
pub use config::{
    BenchConfig, ExternalCommand, ModelConfiguration, PlotRendererConfig, TestOptions,
    TrainComparisonOptions, load_config,
};
pub use data::{Dataset, DatasetKind, Example, Partition, PartitionTag};
pub use error::{BenchError, Result};
pub use evaluation::{
    CommandEvaluator, EvaluationContext, Evaluator, MetricReport, MockEvaluator, ModelSource,
};
pub use orchestrator::{
    ComparisonOutcome, EvaluationOutcome, ExecutionOptions, FailurePolicy, Orchestrator,
};
pub use planning::{DataSlice, RunSpec};
pub use report::{
    ChartRenderer, CommandPlotRenderer, ComparisonKind, ComparisonReporter,
    EvaluationReportOptions, PlotRenderer,
};
pub use results::{GroupBy, GroupSummary, ResultSet, RunOutcome, RunRecord, aggregate};
pub use store::{ArtifactKey, ArtifactStore, FsArtifactStore, InMemoryArtifactStore};
pub use suite::{Suite, SuiteOutcome};
pub use training::{CommandTrainer, MockTrainer, ModelArtifact, Trainer, TrainingOrchestrator};
