//! Discovery of the models produced by an earlier training comparison.

use std::io;

use tracing::{debug, warn};

use crate::evaluation::ModelSource;
use crate::planning::{DataSlice, RunSpec};
use crate::store::{ArtifactKey, ArtifactStore, get_json};
use crate::training::{ARTIFACT_FILE, MODEL_FILE, ModelArtifact};

/// A model found below a comparison output directory.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredModel {
    pub run: RunSpec,
    pub source: ModelSource,
    pub training_examples: Option<usize>,
}

/// Parse `run_<N>` and `<config>__percentage_<P>` directory names.
pub fn parse_run_dir(run_dir: &str, model_dir: &str) -> Option<RunSpec> {
    let run_index: usize = run_dir.strip_prefix("run_")?.parse().ok()?;
    let (configuration, percentage) = model_dir.rsplit_once("__percentage_")?;
    let percentage: u8 = percentage.parse().ok()?;
    if run_index == 0 || configuration.is_empty() || !(1..=100).contains(&percentage) {
        return None;
    }
    Some(RunSpec::new(
        configuration,
        DataSlice::Percentage(percentage),
        run_index,
    ))
}

/// Find every `run_<N>/<config>__percentage_<P>/model.tar.gz` below `dir`.
///
/// The manifest next to a model is used when present; otherwise the model
/// bytes are hashed on the spot. Results are ordered by RunSpec.
pub fn discover_comparison_models(
    store: &dyn ArtifactStore,
    dir: &ArtifactKey,
) -> io::Result<Vec<DiscoveredModel>> {
    let mut models = Vec::new();
    for key in store.list(dir)? {
        let Some(segments) = key.strip_prefix(dir) else {
            continue;
        };
        let [run_dir, model_dir, file] = segments.as_slice() else {
            continue;
        };
        if *file != MODEL_FILE {
            continue;
        }
        let Some(run) = parse_run_dir(run_dir, model_dir) else {
            debug!(key = %key, "Skipping model outside the comparison layout");
            continue;
        };

        let manifest_key = key.parent().map(|p| p.join(ARTIFACT_FILE));
        let manifest: Option<ModelArtifact> = match manifest_key {
            Some(k) => match get_json(store, &k) {
                Ok(manifest) => manifest,
                Err(e) => {
                    warn!(manifest = %k, error = %e, "Unreadable model manifest, describing the model without it");
                    None
                }
            },
            None => None,
        };
        let artifact = match manifest {
            Some(mut artifact) => {
                artifact.model = key.clone();
                artifact.run = run.clone();
                artifact
            }
            None => {
                let bytes = store.get(&key)?.unwrap_or_default();
                ModelArtifact::describe(run.clone(), key.clone(), &bytes, 0)
            }
        };
        let training_examples = (artifact.training_examples > 0).then_some(artifact.training_examples);
        models.push(DiscoveredModel {
            run,
            source: ModelSource::Trained(artifact),
            training_examples,
        });
    }
    models.sort_by(|a, b| a.run.cmp(&b.run));
    Ok(models)
}
