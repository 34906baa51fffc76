//! Error types for the trialbench core library.
//!
//! Uses `thiserror` for public API error types, with one enum per domain
//! (partitioning, planning, run execution, evaluation, results, reporting,
//! data loading, configuration) wrapped by [`BenchError`].

use std::path::PathBuf;

use crate::planning::RunSpec;

/// Top-level error type for the trialbench core library.
#[derive(Debug, thiserror::Error)]
pub enum BenchError {
    #[error("Partition error: {0}")]
    Partition(#[from] PartitionError),

    #[error("Planning error: {0}")]
    Plan(#[from] PlanError),

    #[error("Run error: {0}")]
    Run(#[from] RunError),

    #[error("Evaluation error: {0}")]
    Evaluation(#[from] EvaluationError),

    #[error("Result error: {0}")]
    Result(#[from] ResultError),

    #[error("Report error: {0}")]
    Report(#[from] ReportError),

    #[error("Data error: {0}")]
    Data(#[from] DataError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BenchError {
    /// Whether this error means no model was available to evaluate.
    pub fn is_no_model(&self) -> bool {
        matches!(self, BenchError::Evaluation(EvaluationError::NoModelAvailable))
    }
}

/// Errors from dataset partitioning.
#[derive(Debug, thiserror::Error)]
pub enum PartitionError {
    #[error("Insufficient data: {required} examples required, {available} available")]
    InsufficientData { available: usize, required: usize },

    #[error("Invalid percentage {percentage}: must be between 1 and 100")]
    InvalidPercentage { percentage: u8 },

    #[error("Invalid fold count {folds}: at least 2 folds are required")]
    InvalidFoldCount { folds: usize },

    #[error("Invalid held-out fraction {fraction}: must be strictly between 0 and 1")]
    InvalidFraction { fraction: f64 },
}

/// Errors from run planning.
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("No configurations to compare")]
    NoConfigurations,

    #[error("No percentages given")]
    NoPercentages,

    #[error("Invalid run count {runs}: at least one run is required")]
    InvalidRunCount { runs: usize },

    #[error("Duplicate configuration name '{name}'; result directories would collide")]
    DuplicateConfiguration { name: String },

    #[error("Duplicate percentage {percentage}")]
    DuplicatePercentage { percentage: u8 },

    #[error("Invalid fold count {folds}: at least 2 folds are required")]
    InvalidFoldCount { folds: usize },
}

/// Errors attached to a single RunSpec.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RunError {
    #[error("Training failed for {run}: {cause}")]
    TrainingFailed { run: RunSpec, cause: String },

    #[error("Evaluation failed for {run}: {cause}")]
    EvaluationFailed { run: RunSpec, cause: String },

    #[error("Run {run} was cancelled")]
    Cancelled { run: RunSpec },
}

impl RunError {
    pub fn run(&self) -> &RunSpec {
        match self {
            RunError::TrainingFailed { run, .. }
            | RunError::EvaluationFailed { run, .. }
            | RunError::Cancelled { run } => run,
        }
    }
}

/// Errors from model evaluation.
#[derive(Debug, thiserror::Error)]
pub enum EvaluationError {
    #[error(
        "No model provided. Please make sure to specify the model to test with '--model'."
    )]
    NoModelAvailable,

    #[error("Model not found: {path}")]
    ModelNotFound { path: PathBuf },

    #[error("{failed} of {total} predictions were wrong")]
    PredictionErrors { failed: usize, total: usize },

    #[error("Evaluator failed: {0}")]
    Evaluator(#[from] ExternalError),
}

/// Errors from result collection.
#[derive(Debug, thiserror::Error)]
pub enum ResultError {
    #[error("Run {run} was recorded twice")]
    DuplicateRun { run: RunSpec },
}

/// Errors from report generation.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("Plot rendering failed: {message}")]
    Render { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Errors from loading training data or model configurations.
#[derive(Debug, thiserror::Error)]
pub enum DataError {
    #[error("Training data not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Unsupported training data format: {path}")]
    UnsupportedFormat { path: PathBuf },

    #[error("Failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("No training examples found in {path}")]
    Empty { path: PathBuf },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },
}

/// Errors raised by external collaborators (trainers, evaluators, plot renderers).
#[derive(Debug, thiserror::Error)]
pub enum ExternalError {
    #[error("{0}")]
    Failed(String),

    #[error("timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("invalid output: {0}")]
    InvalidOutput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A type alias for results using the top-level `BenchError`.
pub type Result<T> = std::result::Result<T, BenchError>;
