//! Runs a [`Trainer`] for one RunSpec and persists the resulting model.

use std::sync::Arc;

use tracing::{debug, info};

use crate::config::ModelConfiguration;
use crate::data::{Dataset, Partition};
use crate::error::RunError;
use crate::planning::RunSpec;
use crate::store::{ArtifactKey, ArtifactStore, put_json};
use crate::training::{ARTIFACT_FILE, MODEL_FILE, ModelArtifact, Trainer, TrainingJob};

/// Drives a trainer and writes its output into the run's artifact directory.
#[derive(Clone)]
pub struct TrainingOrchestrator {
    trainer: Arc<dyn Trainer>,
    store: Arc<dyn ArtifactStore>,
    base_seed: u64,
}

impl TrainingOrchestrator {
    pub fn new(trainer: Arc<dyn Trainer>, store: Arc<dyn ArtifactStore>, base_seed: u64) -> Self {
        Self {
            trainer,
            store,
            base_seed,
        }
    }

    /// Train `configuration` on the training side of `partition`.
    ///
    /// Writes `<root>/<run_dir>/model.tar.gz` and `artifact.json`. Repeating
    /// the same RunSpec overwrites both.
    pub async fn train(
        &self,
        run: &RunSpec,
        configuration: &ModelConfiguration,
        dataset: &Dataset,
        partition: &Partition,
        root: &ArtifactKey,
    ) -> Result<ModelArtifact, RunError> {
        let examples = dataset.select(&partition.train);
        let job = TrainingJob {
            run,
            configuration,
            examples: &examples,
            seed: run.seed(self.base_seed),
        };

        info!(run = %run, examples = examples.len(), "Training run started");

        let bytes = self
            .trainer
            .train(&job)
            .await
            .map_err(|e| RunError::TrainingFailed {
                run: run.clone(),
                cause: e.to_string(),
            })?;

        let dir = run.run_dir(root);
        let model_key = dir.join(MODEL_FILE);
        let artifact = ModelArtifact::describe(run.clone(), model_key.clone(), &bytes, examples.len());

        let persist_failed = |e: std::io::Error| RunError::TrainingFailed {
            run: run.clone(),
            cause: format!("failed to persist model: {e}"),
        };
        self.store.put(&model_key, &bytes).map_err(persist_failed)?;
        put_json(self.store.as_ref(), &dir.join(ARTIFACT_FILE), &artifact).map_err(persist_failed)?;

        debug!(
            run = %run,
            model = %model_key,
            size_bytes = artifact.size_bytes,
            "Model persisted"
        );
        Ok(artifact)
    }
}
