//! Configuration system for trialbench.
//!
//! Uses `figment` for layered configuration: defaults -> user config file ->
//! workspace config file -> environment -> explicit overrides. Configuration
//! is loaded from `~/.config/trialbench/config.toml` and/or
//! `.trialbench/config.toml` in the workspace directory.
//!
//! This module also holds the typed records crossing the orchestration
//! boundary: [`ModelConfiguration`] (one model's pipeline/policies, read from
//! YAML) and the [`TestOptions`] / [`TrainComparisonOptions`] records built
//! from command-line flags.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::orchestrator::FailurePolicy;

/// Default inclusion percentages for NLU comparisons.
pub const DEFAULT_NLU_PERCENTAGES: [u8; 4] = [100, 75, 50, 25];

/// Default inclusion percentages for training comparisons.
pub const DEFAULT_CORE_PERCENTAGES: [u8; 7] = [100, 95, 75, 50, 30, 10, 5];

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BenchConfig {
    #[serde(default)]
    pub execution: ExecutionConfig,
    /// External trainer invocation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trainer: Option<ExternalCommand>,
    /// External evaluator invocation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluator: Option<ExternalCommand>,
    #[serde(default)]
    pub plots: PlotConfig,
    #[serde(default)]
    pub nlu: NluConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// How RunSpecs are scheduled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Maximum number of RunSpecs in flight; 1 runs them sequentially.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_runs: usize,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    /// Seed every per-run shuffle is derived from.
    #[serde(default = "default_base_seed")]
    pub base_seed: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_concurrent_runs: default_max_concurrent(),
            failure_policy: FailurePolicy::default(),
            base_seed: default_base_seed(),
        }
    }
}

fn default_max_concurrent() -> usize {
    1
}

fn default_base_seed() -> u64 {
    42
}

/// An external program with `{placeholder}` arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_command_timeout")]
    pub timeout_secs: u64,
}

impl ExternalCommand {
    pub fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            timeout_secs: default_command_timeout(),
        }
    }
}

fn default_command_timeout() -> u64 {
    3600
}

/// Plot rendering configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlotConfig {
    #[serde(default)]
    pub renderer: PlotRendererConfig,
    /// Metrics drawn into the stable comparison-graph file, in priority order.
    #[serde(default = "default_primary_metrics")]
    pub primary_metrics: Vec<String>,
}

impl Default for PlotConfig {
    fn default() -> Self {
        Self {
            renderer: PlotRendererConfig::default(),
            primary_metrics: default_primary_metrics(),
        }
    }
}

fn default_primary_metrics() -> Vec<String> {
    vec![
        "correct_stories".to_string(),
        "f1_score".to_string(),
        "accuracy".to_string(),
    ]
}

/// Which renderer draws plots.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlotRendererConfig {
    /// Built-in chart renderer.
    #[default]
    Builtin,
    /// External program that reads the plot as JSON on stdin and writes the
    /// rendered file to stdout.
    Command(ExternalCommand),
}

/// NLU comparison settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NluConfig {
    /// Fraction of the data held out as the test set of each run.
    #[serde(default = "default_test_fraction")]
    pub test_fraction: f64,
}

impl Default for NluConfig {
    fn default() -> Self {
        Self {
            test_fraction: default_test_fraction(),
        }
    }
}

fn default_test_fraction() -> f64 {
    0.2
}

/// Default output locations, relative to the workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,
    #[serde(default = "default_models_dir")]
    pub models_dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            results_dir: default_results_dir(),
            models_dir: default_models_dir(),
        }
    }
}

fn default_results_dir() -> PathBuf {
    PathBuf::from("results")
}

fn default_models_dir() -> PathBuf {
    PathBuf::from("models")
}

/// Path of the workspace-level configuration file.
pub fn workspace_config_path(workspace: &Path) -> PathBuf {
    workspace.join(".trialbench").join("config.toml")
}

/// Load configuration with layered sources.
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&BenchConfig>,
) -> Result<BenchConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(BenchConfig::default()));

    // User-level config
    if let Some(config_dir) = directories::ProjectDirs::from("dev", "trialbench", "trialbench") {
        let user_config = config_dir.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    // Workspace-level config
    if let Some(ws) = workspace {
        let ws_config = workspace_config_path(ws);
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // Environment variables (TRIALBENCH_EXECUTION__MAX_CONCURRENT_RUNS, ...)
    figment = figment.merge(Env::prefixed("TRIALBENCH_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(Box::new)
}

/// A named pipeline/policy component with free-form parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentSpec {
    pub name: String,
    #[serde(flatten)]
    pub params: BTreeMap<String, serde_yaml::Value>,
}

/// Either a named pipeline template or an explicit component list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PipelineSpec {
    Template(String),
    Components(Vec<ComponentSpec>),
}

#[derive(Debug, Deserialize)]
struct RawModelConfiguration {
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    pipeline: Option<PipelineSpec>,
    #[serde(default)]
    policies: Option<Vec<ComponentSpec>>,
}

/// One model configuration under comparison.
///
/// Identity is the file stem: `configs/config_1.yml` is named `config_1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfiguration {
    pub name: String,
    pub source: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<PipelineSpec>,
    #[serde(default)]
    pub policies: Vec<ComponentSpec>,
}

impl ModelConfiguration {
    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.is_file() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ParseError {
            message: format!("{}: {e}", path.display()),
        })?;
        Self::from_yaml_str(&Self::name_for(path), path, &content)
    }

    /// Parse and validate configuration YAML.
    pub fn from_yaml_str(name: &str, source: &Path, content: &str) -> Result<Self, ConfigError> {
        let raw: RawModelConfiguration =
            serde_yaml::from_str(content).map_err(|e| ConfigError::ParseError {
                message: format!("{}: {e}", source.display()),
            })?;
        let config = Self {
            name: name.to_string(),
            source: source.to_path_buf(),
            language: raw.language,
            pipeline: raw.pipeline,
            policies: raw.policies.unwrap_or_default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Configuration name derived from a file path.
    pub fn name_for(path: &Path) -> String {
        path.file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: String| ConfigError::Invalid { message };

        if self.name.trim().is_empty() {
            return Err(invalid("configuration name is empty".into()));
        }
        let pipeline_len = match &self.pipeline {
            None => 0,
            Some(PipelineSpec::Template(t)) if t.trim().is_empty() => {
                return Err(invalid(format!("{}: pipeline template is empty", self.name)));
            }
            Some(PipelineSpec::Template(_)) => 1,
            Some(PipelineSpec::Components(components)) => components.len(),
        };
        if pipeline_len == 0 && self.policies.is_empty() {
            return Err(invalid(format!(
                "{}: configuration defines neither a pipeline nor policies",
                self.name
            )));
        }
        let components = match &self.pipeline {
            Some(PipelineSpec::Components(c)) => c.iter().chain(self.policies.iter()),
            _ => [].iter().chain(self.policies.iter()),
        };
        for component in components {
            if component.name.trim().is_empty() {
                return Err(invalid(format!("{}: component without a name", self.name)));
            }
        }
        Ok(())
    }
}

/// Options of a `test` invocation, as passed on the command line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestOptions {
    pub model_paths: Vec<PathBuf>,
    pub stories_path: PathBuf,
    pub max_stories: Option<usize>,
    pub endpoints: Option<PathBuf>,
    pub fail_on_prediction_errors: bool,
    pub url: Option<String>,
    pub evaluate_model_directory: bool,
    pub nlu_path: PathBuf,
    pub config_paths: Vec<PathBuf>,
    pub cross_validation: bool,
    pub folds: usize,
    pub runs: usize,
    pub percentages: Vec<u8>,
    pub no_plot: bool,
    pub successes: bool,
    pub no_errors: bool,
    pub out: PathBuf,
}

impl Default for TestOptions {
    fn default() -> Self {
        Self {
            model_paths: Vec::new(),
            stories_path: PathBuf::from("tests"),
            max_stories: None,
            endpoints: None,
            fail_on_prediction_errors: false,
            url: None,
            evaluate_model_directory: false,
            nlu_path: PathBuf::from("data"),
            config_paths: vec![PathBuf::from("config.yml")],
            cross_validation: false,
            folds: 5,
            runs: 3,
            percentages: DEFAULT_NLU_PERCENTAGES.to_vec(),
            no_plot: false,
            successes: false,
            no_errors: false,
            out: default_results_dir(),
        }
    }
}

impl TestOptions {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cross_validation && self.folds < 2 {
            return Err(ConfigError::Invalid {
                message: format!("cross-validation needs at least 2 folds, got {}", self.folds),
            });
        }
        if self.runs == 0 {
            return Err(ConfigError::Invalid {
                message: "at least one run is required".into(),
            });
        }
        validate_percentages(&self.percentages)
    }
}

/// Options of a `train` comparison invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainComparisonOptions {
    pub config_paths: Vec<PathBuf>,
    pub data_path: PathBuf,
    pub runs: usize,
    pub percentages: Vec<u8>,
    pub out: PathBuf,
}

impl Default for TrainComparisonOptions {
    fn default() -> Self {
        Self {
            config_paths: vec![PathBuf::from("config.yml")],
            data_path: PathBuf::from("data"),
            runs: 3,
            percentages: DEFAULT_CORE_PERCENTAGES.to_vec(),
            out: default_models_dir(),
        }
    }
}

impl TrainComparisonOptions {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.config_paths.is_empty() {
            return Err(ConfigError::Invalid {
                message: "at least one configuration file is required".into(),
            });
        }
        if self.runs == 0 {
            return Err(ConfigError::Invalid {
                message: "at least one run is required".into(),
            });
        }
        validate_percentages(&self.percentages)
    }
}

fn validate_percentages(percentages: &[u8]) -> Result<(), ConfigError> {
    if let Some(p) = percentages.iter().find(|&&p| p == 0 || p > 100) {
        return Err(ConfigError::Invalid {
            message: format!("percentage {p} is outside 1..=100"),
        });
    }
    Ok(())
}
