//! Trainer backed by an external program.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use crate::config::ExternalCommand;
use crate::data::Dataset;
use crate::error::ExternalError;
use crate::process;
use crate::training::{MODEL_FILE, Trainer, TrainingJob};

/// Runs a configured program once per training job.
///
/// Argument placeholders:
/// - `{config}`: the model configuration file
/// - `{data}`: the training examples, as training-data YAML
/// - `{out}`: where the program must write the trained model
/// - `{seed}`: the run seed
pub struct CommandTrainer {
    command: ExternalCommand,
    workspace: PathBuf,
}

impl CommandTrainer {
    pub fn new(command: ExternalCommand, workspace: PathBuf) -> Self {
        Self { command, workspace }
    }
}

#[async_trait]
impl Trainer for CommandTrainer {
    async fn train(&self, job: &TrainingJob<'_>) -> Result<Vec<u8>, ExternalError> {
        let scratch = tempfile::Builder::new().prefix("trialbench-train-").tempdir()?;

        let config_path = scratch.path().join("config.yml");
        let config_yaml = match tokio::fs::read(&job.configuration.source).await {
            Ok(bytes) => bytes,
            Err(_) => serde_yaml::to_string(job.configuration)
                .map_err(|e| ExternalError::InvalidOutput(e.to_string()))?
                .into_bytes(),
        };
        tokio::fs::write(&config_path, config_yaml).await?;

        let data_path = scratch.path().join("data.yml");
        let data_yaml = Dataset::to_yaml(job.examples)
            .map_err(|e| ExternalError::InvalidOutput(e.to_string()))?;
        tokio::fs::write(&data_path, data_yaml).await?;

        let out_path = scratch.path().join(MODEL_FILE);
        let vars = [
            ("config", config_path.display().to_string()),
            ("data", data_path.display().to_string()),
            ("out", out_path.display().to_string()),
            ("seed", job.seed.to_string()),
        ];

        debug!(run = %job.run, "Invoking external trainer");
        process::run(&self.command, &vars, &self.workspace, None).await?;

        match tokio::fs::read(&out_path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ExternalError::InvalidOutput(
                format!("trainer did not write a model to {}", out_path.display()),
            )),
            Err(e) => Err(e.into()),
        }
    }
}
