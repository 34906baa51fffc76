//! Training: the [`Trainer`] seam, the model artifact it produces, and the
//! orchestrator that turns a RunSpec plus its partition into a persisted model.

pub mod command;
pub mod orchestrator;

pub use command::CommandTrainer;
pub use orchestrator::TrainingOrchestrator;

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::ModelConfiguration;
use crate::data::Example;
use crate::error::ExternalError;
use crate::planning::RunSpec;
use crate::store::ArtifactKey;

/// File name of the serialized model inside a run directory.
pub const MODEL_FILE: &str = "model.tar.gz";

/// File name of the artifact manifest inside a run directory.
pub const ARTIFACT_FILE: &str = "artifact.json";

/// Everything a trainer needs for one run.
#[derive(Debug, Clone, Copy)]
pub struct TrainingJob<'a> {
    pub run: &'a RunSpec,
    pub configuration: &'a ModelConfiguration,
    pub examples: &'a [Example],
    pub seed: u64,
}

/// Trait for external model trainers.
#[async_trait]
pub trait Trainer: Send + Sync {
    /// Train a model and return its serialized bytes.
    async fn train(&self, job: &TrainingJob<'_>) -> Result<Vec<u8>, ExternalError>;
}

/// Manifest of a trained model, persisted next to the model bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub run: RunSpec,
    /// Key of the model bytes in the artifact store.
    pub model: ArtifactKey,
    pub size_bytes: u64,
    /// Hex-encoded SHA-256 of the model bytes.
    pub sha256: String,
    pub training_examples: usize,
    pub created_at: DateTime<Utc>,
}

impl ModelArtifact {
    pub fn describe(run: RunSpec, model: ArtifactKey, bytes: &[u8], training_examples: usize) -> Self {
        Self {
            run,
            model,
            size_bytes: bytes.len() as u64,
            sha256: format!("{:x}", Sha256::digest(bytes)),
            training_examples,
            created_at: Utc::now(),
        }
    }
}

/// A deterministic trainer for tests.
///
/// The produced bytes encode the configuration name, seed and training set
/// size, so identical jobs produce identical models.
pub struct MockTrainer {
    failing: HashSet<String>,
    calls: Mutex<Vec<RunSpec>>,
    delay: Option<std::time::Duration>,
}

impl MockTrainer {
    pub fn new() -> Self {
        Self {
            failing: HashSet::new(),
            calls: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// Make training fail for every run of `configuration`.
    pub fn fail_for(mut self, configuration: &str) -> Self {
        self.failing.insert(configuration.to_string());
        self
    }

    /// Sleep before returning from each job.
    pub fn with_delay(mut self, delay: std::time::Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// RunSpecs trained so far, in call order.
    pub fn calls(&self) -> Vec<RunSpec> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

impl Default for MockTrainer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Trainer for MockTrainer {
    async fn train(&self, job: &TrainingJob<'_>) -> Result<Vec<u8>, ExternalError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(job.run.clone());
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.contains(&job.configuration.name) {
            return Err(ExternalError::Failed(format!(
                "mock training failure for {}",
                job.configuration.name
            )));
        }
        Ok(format!(
            "model:{}:seed={}:examples={}",
            job.configuration.name,
            job.seed,
            job.examples.len()
        )
        .into_bytes())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::Path;

    use crate::config::ModelConfiguration;

    pub fn configuration(name: &str) -> ModelConfiguration {
        ModelConfiguration::from_yaml_str(
            name,
            Path::new(&format!("{name}.yml")),
            "pipeline: KeywordIntentClassifier\npolicies:\n- name: MemoizationPolicy\n",
        )
        .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planning::DataSlice;

    #[tokio::test]
    async fn test_mock_trainer_is_deterministic() {
        let config = test_support::configuration("cfg");
        let run = RunSpec::new("cfg", DataSlice::Percentage(50), 1);
        let examples = vec![Example::utterance("hi", "greet")];
        let job = TrainingJob {
            run: &run,
            configuration: &config,
            examples: &examples,
            seed: 7,
        };
        let trainer = MockTrainer::new();
        let a = trainer.train(&job).await.unwrap();
        let b = trainer.train(&job).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(trainer.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_mock_trainer_failure() {
        let config = test_support::configuration("broken");
        let run = RunSpec::new("broken", DataSlice::Full, 1);
        let job = TrainingJob {
            run: &run,
            configuration: &config,
            examples: &[],
            seed: 1,
        };
        let trainer = MockTrainer::new().fail_for("broken");
        assert!(trainer.train(&job).await.is_err());
    }

    #[test]
    fn test_artifact_hash() {
        let run = RunSpec::new("cfg", DataSlice::Full, 1);
        let artifact = ModelArtifact::describe(run, ArtifactKey::new("m"), b"abc", 3);
        assert_eq!(artifact.size_bytes, 3);
        assert_eq!(
            artifact.sha256,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
