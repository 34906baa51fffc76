//! Run planning: enumerating the (configuration, slice, run) work items of a
//! comparison.
//!
//! A [`RunSpec`] is the identity of one train+evaluate unit. Its artifact
//! directory and its shuffle seed are both derived from that identity alone.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::data::derive_seed;
use crate::error::PlanError;
use crate::store::ArtifactKey;

/// Which portion of the data a run trains on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSlice {
    /// Percentage of the training data, in `1..=100`.
    Percentage(u8),
    /// Cross-validation fold; `index` is 0-based.
    Fold { index: usize, count: usize },
    /// All of the data (comparison of pre-existing models).
    Full,
}

impl fmt::Display for DataSlice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataSlice::Percentage(p) => write!(f, "{p}%"),
            DataSlice::Fold { index, count } => write!(f, "fold {}/{count}", index + 1),
            DataSlice::Full => write!(f, "full"),
        }
    }
}

/// One (configuration, slice, run) unit of work.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RunSpec {
    pub configuration: String,
    pub slice: DataSlice,
    /// 1-based repetition index.
    pub run_index: usize,
}

impl RunSpec {
    pub fn new(configuration: impl Into<String>, slice: DataSlice, run_index: usize) -> Self {
        Self {
            configuration: configuration.into(),
            slice,
            run_index,
        }
    }

    /// Artifact directory of this run below `root`.
    ///
    /// - percentage: `run_<N>/<config>__percentage_<P>`
    /// - fold: `fold_<I+1>/<config>`
    /// - full: `<config>`
    pub fn run_dir(&self, root: &ArtifactKey) -> ArtifactKey {
        match self.slice {
            DataSlice::Percentage(p) => root
                .join(format!("run_{}", self.run_index))
                .join(format!("{}__percentage_{p}", self.configuration)),
            DataSlice::Fold { index, .. } => root
                .join(format!("fold_{}", index + 1))
                .join(&self.configuration),
            DataSlice::Full => root.join(&self.configuration),
        }
    }

    /// Seed for this run's shuffles.
    ///
    /// Independent of the configuration, so every configuration of the same
    /// repetition sees the same data.
    pub fn seed(&self, base_seed: u64) -> u64 {
        derive_seed(base_seed, self.run_index)
    }
}

impl fmt::Display for RunSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] run {}",
            self.configuration, self.slice, self.run_index
        )
    }
}

fn check_configurations<S: AsRef<str>>(configs: &[S]) -> Result<(), PlanError> {
    if configs.is_empty() {
        return Err(PlanError::NoConfigurations);
    }
    let mut seen = HashSet::new();
    for name in configs {
        if !seen.insert(name.as_ref()) {
            return Err(PlanError::DuplicateConfiguration {
                name: name.as_ref().to_string(),
            });
        }
    }
    Ok(())
}

/// Plan a percentage comparison.
///
/// Ordered configuration-major, then percentage, then run.
pub fn plan<S: AsRef<str>>(
    configs: &[S],
    percentages: &[u8],
    runs: usize,
) -> Result<Vec<RunSpec>, PlanError> {
    check_configurations(configs)?;
    if percentages.is_empty() {
        return Err(PlanError::NoPercentages);
    }
    if runs == 0 {
        return Err(PlanError::InvalidRunCount { runs });
    }
    let mut seen = HashSet::new();
    for &percentage in percentages {
        if !seen.insert(percentage) {
            return Err(PlanError::DuplicatePercentage { percentage });
        }
    }

    let mut specs = Vec::with_capacity(configs.len() * percentages.len() * runs);
    for config in configs {
        for &percentage in percentages {
            for run_index in 1..=runs {
                specs.push(RunSpec::new(
                    config.as_ref(),
                    DataSlice::Percentage(percentage),
                    run_index,
                ));
            }
        }
    }
    Ok(specs)
}

/// Plan a cross-validation over `fold_count` folds.
pub fn plan_cv<S: AsRef<str>>(configs: &[S], fold_count: usize) -> Result<Vec<RunSpec>, PlanError> {
    check_configurations(configs)?;
    if fold_count < 2 {
        return Err(PlanError::InvalidFoldCount { folds: fold_count });
    }
    Ok(configs
        .iter()
        .flat_map(|config| {
            (0..fold_count).map(move |index| {
                RunSpec::new(
                    config.as_ref(),
                    DataSlice::Fold {
                        index,
                        count: fold_count,
                    },
                    1,
                )
            })
        })
        .collect())
}

/// Plan an evaluation of pre-existing models, one run each on the full data.
pub fn plan_models<S: AsRef<str>>(names: &[S]) -> Result<Vec<RunSpec>, PlanError> {
    check_configurations(names)?;
    Ok(names
        .iter()
        .map(|name| RunSpec::new(name.as_ref(), DataSlice::Full, 1))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_plan_order_and_count() {
        let specs = plan(&["c1", "c2"], &[25, 75], 2).unwrap();
        assert_eq!(specs.len(), 8);
        let rendered: Vec<String> = specs.iter().map(|s| s.to_string()).collect();
        assert_eq!(
            rendered,
            vec![
                "c1 [25%] run 1",
                "c1 [25%] run 2",
                "c1 [75%] run 1",
                "c1 [75%] run 2",
                "c2 [25%] run 1",
                "c2 [25%] run 2",
                "c2 [75%] run 1",
                "c2 [75%] run 2",
            ]
        );
    }

    #[test]
    fn test_plan_validation() {
        let none: [&str; 0] = [];
        assert!(matches!(plan(&none, &[50], 1), Err(PlanError::NoConfigurations)));
        assert!(matches!(plan(&["a"], &[], 1), Err(PlanError::NoPercentages)));
        assert!(matches!(
            plan(&["a"], &[50], 0),
            Err(PlanError::InvalidRunCount { runs: 0 })
        ));
        assert!(matches!(
            plan(&["a", "a"], &[50], 1),
            Err(PlanError::DuplicateConfiguration { .. })
        ));
        assert!(matches!(
            plan(&["a"], &[50, 50], 1),
            Err(PlanError::DuplicatePercentage { percentage: 50 })
        ));
    }

    #[test]
    fn test_plan_cv() {
        let specs = plan_cv(&["cfg"], 3).unwrap();
        assert_eq!(specs.len(), 3);
        assert_eq!(specs[2].slice, DataSlice::Fold { index: 2, count: 3 });
        assert!(specs.iter().all(|s| s.run_index == 1));
        assert!(matches!(
            plan_cv(&["cfg"], 1),
            Err(PlanError::InvalidFoldCount { folds: 1 })
        ));
    }

    #[test]
    fn test_plan_models() {
        let specs = plan_models(&["a", "b"]).unwrap();
        assert_eq!(specs, vec![
            RunSpec::new("a", DataSlice::Full, 1),
            RunSpec::new("b", DataSlice::Full, 1),
        ]);
    }

    #[test]
    fn test_run_dir_layout() {
        let root = ArtifactKey::new("results");
        assert_eq!(
            RunSpec::new("config_1", DataSlice::Percentage(25), 2)
                .run_dir(&root)
                .as_str(),
            "results/run_2/config_1__percentage_25"
        );
        assert_eq!(
            RunSpec::new("cfg", DataSlice::Fold { index: 0, count: 2 }, 1)
                .run_dir(&root)
                .as_str(),
            "results/fold_1/cfg"
        );
        assert_eq!(
            RunSpec::new("model_a", DataSlice::Full, 1)
                .run_dir(&root)
                .as_str(),
            "results/model_a"
        );
    }

    #[test]
    fn test_seed_is_shared_across_configurations() {
        let a = RunSpec::new("a", DataSlice::Percentage(50), 1);
        let b = RunSpec::new("b", DataSlice::Percentage(25), 1);
        let c = RunSpec::new("a", DataSlice::Percentage(50), 2);
        assert_eq!(a.seed(42), b.seed(42));
        assert_ne!(a.seed(42), c.seed(42));
    }

    #[test]
    fn test_run_spec_ordering() {
        let mut specs = vec![
            RunSpec::new("b", DataSlice::Percentage(25), 1),
            RunSpec::new("a", DataSlice::Percentage(75), 1),
            RunSpec::new("a", DataSlice::Percentage(25), 2),
            RunSpec::new("a", DataSlice::Percentage(25), 1),
        ];
        specs.sort();
        assert_eq!(specs[0], RunSpec::new("a", DataSlice::Percentage(25), 1));
        assert_eq!(specs[3], RunSpec::new("b", DataSlice::Percentage(25), 1));
    }
}
