//! Evaluator backed by an external program.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use crate::config::ExternalCommand;
use crate::data::{Dataset, Example};
use crate::error::ExternalError;
use crate::evaluation::{EvaluationContext, Evaluator, MetricReport, ModelInput};
use crate::process;

/// Runs a configured program once per evaluation and parses a JSON
/// [`MetricReport`] from its stdout.
///
/// Argument placeholders: `{model}`, `{data}` (held-out examples as
/// training-data YAML), `{endpoints}` and `{url}` (empty when unset).
pub struct CommandEvaluator {
    command: ExternalCommand,
    workspace: PathBuf,
}

impl CommandEvaluator {
    pub fn new(command: ExternalCommand, workspace: PathBuf) -> Self {
        Self { command, workspace }
    }
}

#[async_trait]
impl Evaluator for CommandEvaluator {
    async fn evaluate(
        &self,
        model: &ModelInput,
        held_out: &[Example],
        context: &EvaluationContext,
    ) -> Result<MetricReport, ExternalError> {
        let scratch = tempfile::Builder::new().prefix("trialbench-eval-").tempdir()?;

        let model_path = match model {
            ModelInput::Path(path) => path.clone(),
            ModelInput::Bytes { name, data } => {
                let path = scratch.path().join(format!("{name}.tar.gz"));
                tokio::fs::write(&path, data).await?;
                path
            }
        };

        let data_path = scratch.path().join("test.yml");
        let data_yaml =
            Dataset::to_yaml(held_out).map_err(|e| ExternalError::InvalidOutput(e.to_string()))?;
        tokio::fs::write(&data_path, data_yaml).await?;

        let vars = [
            ("model", model_path.display().to_string()),
            ("data", data_path.display().to_string()),
            (
                "endpoints",
                context
                    .endpoints
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default(),
            ),
            ("url", context.url.clone().unwrap_or_default()),
        ];

        debug!(model = %model.name(), "Invoking external evaluator");
        let stdout = process::run(&self.command, &vars, &self.workspace, None).await?;
        serde_json::from_slice(&stdout)
            .map_err(|e| ExternalError::InvalidOutput(format!("invalid metric report JSON: {e}")))
    }
}
