//! Labeled datasets and the YAML training-data format.
//!
//! Training data files use the `nlu:` / `stories:` layout:
//!
//! ```yaml
//! nlu:
//! - intent: greet
//!   examples: |
//!     - hey
//!     - hello there
//! stories:
//! - story: happy path
//!   steps:
//!   - intent: greet
//!   - action: utter_greet
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::error::DataError;

/// Which kind of examples a dataset holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetKind {
    Nlu,
    Stories,
}

impl std::fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatasetKind::Nlu => write!(f, "nlu"),
            DatasetKind::Stories => write!(f, "stories"),
        }
    }
}

/// A single user utterance labeled with its intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utterance {
    pub text: String,
    pub intent: String,
}

/// One turn of a story.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StoryStep {
    User {
        intent: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user: Option<String>,
    },
    Action {
        action: String,
    },
}

/// A named conversation used to train and test dialogue policies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Story {
    pub name: String,
    pub steps: Vec<StoryStep>,
}

/// A labeled training or test example.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Example {
    Utterance(Utterance),
    Story(Story),
}

impl Example {
    pub fn utterance(text: &str, intent: &str) -> Self {
        Example::Utterance(Utterance {
            text: text.to_string(),
            intent: intent.to_string(),
        })
    }

    pub fn story(name: &str, steps: Vec<StoryStep>) -> Self {
        Example::Story(Story {
            name: name.to_string(),
            steps,
        })
    }

    pub fn kind(&self) -> DatasetKind {
        match self {
            Example::Utterance(_) => DatasetKind::Nlu,
            Example::Story(_) => DatasetKind::Stories,
        }
    }

    /// The label an evaluator is expected to reproduce.
    pub fn label(&self) -> &str {
        match self {
            Example::Utterance(u) => &u.intent,
            Example::Story(s) => &s.name,
        }
    }
}

/// An immutable, ordered sequence of examples.
///
/// Cloning is cheap; partitions refer to examples by index and never copy or
/// mutate the underlying sequence.
#[derive(Debug, Clone)]
pub struct Dataset {
    kind: DatasetKind,
    examples: Arc<[Example]>,
}

impl Dataset {
    pub fn new(kind: DatasetKind, examples: Vec<Example>) -> Self {
        Self {
            kind,
            examples: examples.into(),
        }
    }

    pub fn kind(&self) -> DatasetKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    pub fn examples(&self) -> &[Example] {
        &self.examples
    }

    pub fn get(&self, index: usize) -> Option<&Example> {
        self.examples.get(index)
    }

    /// Clone the examples at `indices`, in the given order.
    pub fn select(&self, indices: &[usize]) -> Vec<Example> {
        indices
            .iter()
            .filter_map(|&i| self.examples.get(i).cloned())
            .collect()
    }

    /// A new dataset holding the examples at `indices`.
    pub fn subset(&self, indices: &[usize]) -> Dataset {
        Dataset::new(self.kind, self.select(indices))
    }

    /// Keep at most `max` examples, preserving order.
    pub fn truncate(&self, max: usize) -> Dataset {
        if max >= self.len() {
            return self.clone();
        }
        Dataset::new(self.kind, self.examples[..max].to_vec())
    }

    /// Distinct labels in first-appearance order.
    pub fn labels(&self) -> Vec<String> {
        let mut labels: Vec<String> = Vec::new();
        for example in self.examples.iter() {
            if !labels.iter().any(|l| l == example.label()) {
                labels.push(example.label().to_string());
            }
        }
        labels
    }

    /// Load examples of `kind` from a training-data file or directory.
    ///
    /// Directories are walked recursively in file-name order; files that are
    /// not YAML are skipped. A single file must be YAML.
    pub fn load(path: &Path, kind: DatasetKind) -> Result<Self, DataError> {
        if !path.exists() {
            return Err(DataError::FileNotFound {
                path: path.to_path_buf(),
            });
        }

        let files: Vec<PathBuf> = if path.is_dir() {
            WalkDir::new(path)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file() && is_yaml(e.path()))
                .map(|e| e.into_path())
                .collect()
        } else if is_yaml(path) {
            vec![path.to_path_buf()]
        } else {
            return Err(DataError::UnsupportedFormat {
                path: path.to_path_buf(),
            });
        };

        let mut examples = Vec::new();
        for file in files {
            let content = std::fs::read_to_string(&file)?;
            let parsed = parse_training_yaml(&content, &file)?;
            examples.extend(parsed.into_iter().filter(|e| e.kind() == kind));
        }

        if examples.is_empty() {
            return Err(DataError::Empty {
                path: path.to_path_buf(),
            });
        }

        tracing::debug!(
            path = %path.display(),
            kind = %kind,
            examples = examples.len(),
            "Loaded training data"
        );
        Ok(Dataset::new(kind, examples))
    }

    /// Parse examples of `kind` from YAML text.
    pub fn from_yaml_str(content: &str, kind: DatasetKind) -> Result<Self, DataError> {
        let origin = Path::new("<inline>");
        let examples: Vec<Example> = parse_training_yaml(content, origin)?
            .into_iter()
            .filter(|e| e.kind() == kind)
            .collect();
        if examples.is_empty() {
            return Err(DataError::Empty {
                path: origin.to_path_buf(),
            });
        }
        Ok(Dataset::new(kind, examples))
    }

    /// Render examples back into the training-data YAML layout.
    pub fn to_yaml(examples: &[Example]) -> Result<String, serde_yaml::Error> {
        let mut intents: Vec<(String, Vec<String>)> = Vec::new();
        let mut stories = Vec::new();

        for example in examples {
            match example {
                Example::Utterance(u) => {
                    match intents.iter_mut().find(|(intent, _)| intent == &u.intent) {
                        Some((_, texts)) => texts.push(u.text.clone()),
                        None => intents.push((u.intent.clone(), vec![u.text.clone()])),
                    }
                }
                Example::Story(s) => stories.push(StoryBlock {
                    story: s.name.clone(),
                    steps: s.steps.iter().map(step_to_raw).collect(),
                }),
            }
        }

        let file = TrainingDataFile {
            version: Some("3.1".to_string()),
            nlu: intents
                .into_iter()
                .map(|(intent, texts)| NluBlock {
                    intent: Some(intent),
                    examples: texts.iter().map(|t| format!("- {t}\n")).collect(),
                })
                .collect(),
            stories,
        };
        serde_yaml::to_string(&file)
    }
}

fn is_yaml(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext == "yml" || ext == "yaml")
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct TrainingDataFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    version: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    nlu: Vec<NluBlock>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    stories: Vec<StoryBlock>,
}

#[derive(Debug, Serialize, Deserialize)]
struct NluBlock {
    // Synonym, regex and lookup blocks carry no intent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    intent: Option<String>,
    #[serde(default)]
    examples: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoryBlock {
    story: String,
    #[serde(default)]
    steps: Vec<BTreeMap<String, serde_yaml::Value>>,
}

fn parse_training_yaml(content: &str, origin: &Path) -> Result<Vec<Example>, DataError> {
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }
    let file: TrainingDataFile =
        serde_yaml::from_str(content).map_err(|e| DataError::Parse {
            path: origin.to_path_buf(),
            message: e.to_string(),
        })?;

    let mut examples = Vec::new();
    for block in file.nlu {
        let Some(intent) = block.intent else {
            continue;
        };
        for line in block.examples.lines() {
            let Some(text) = line.trim().strip_prefix('-') else {
                continue;
            };
            let text = text.trim();
            if !text.is_empty() {
                examples.push(Example::utterance(text, &intent));
            }
        }
    }
    for block in file.stories {
        let steps = block.steps.iter().filter_map(step_from_raw).collect();
        examples.push(Example::story(&block.story, steps));
    }
    Ok(examples)
}

fn yaml_str(map: &BTreeMap<String, serde_yaml::Value>, key: &str) -> Option<String> {
    map.get(key).and_then(|v| v.as_str()).map(str::to_string)
}

// Checkpoints, slot events and `or` branches are not scored and are dropped.
fn step_from_raw(raw: &BTreeMap<String, serde_yaml::Value>) -> Option<StoryStep> {
    if let Some(intent) = yaml_str(raw, "intent") {
        return Some(StoryStep::User {
            intent,
            user: yaml_str(raw, "user"),
        });
    }
    yaml_str(raw, "action").map(|action| StoryStep::Action { action })
}

fn step_to_raw(step: &StoryStep) -> BTreeMap<String, serde_yaml::Value> {
    let mut map = BTreeMap::new();
    match step {
        StoryStep::User { intent, user } => {
            if let Some(user) = user {
                map.insert("user".to_string(), serde_yaml::Value::from(user.as_str()));
            }
            map.insert("intent".to_string(), serde_yaml::Value::from(intent.as_str()));
        }
        StoryStep::Action { action } => {
            map.insert("action".to_string(), serde_yaml::Value::from(action.as_str()));
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    const NLU_YAML: &str = r#"
version: "3.1"
nlu:
- intent: greet
  examples: |
    - hey
    - hello there
- intent: goodbye
  examples: |
    - bye
- synonym: savings
  examples: |
    - pink pig
"#;

    const STORIES_YAML: &str = r#"
stories:
- story: happy path 1
  steps:
  - intent: greet
  - action: utter_greet
  - checkpoint: check_greet
  - user: I am great
    intent: mood_great
  - action: utter_happy
"#;

    #[test]
    fn test_parse_nlu_blocks() {
        let dataset = Dataset::from_yaml_str(NLU_YAML, DatasetKind::Nlu).unwrap();
        assert_eq!(dataset.len(), 3);
        assert_eq!(dataset.get(0), Some(&Example::utterance("hey", "greet")));
        assert_eq!(dataset.get(2), Some(&Example::utterance("bye", "goodbye")));
        assert_eq!(dataset.labels(), vec!["greet", "goodbye"]);
    }

    #[test]
    fn test_parse_story_steps_skips_checkpoints() {
        let dataset = Dataset::from_yaml_str(STORIES_YAML, DatasetKind::Stories).unwrap();
        assert_eq!(dataset.len(), 1);
        let Some(Example::Story(story)) = dataset.get(0) else {
            panic!("expected a story");
        };
        assert_eq!(story.name, "happy path 1");
        assert_eq!(story.steps.len(), 4);
        assert_eq!(
            story.steps[2],
            StoryStep::User {
                intent: "mood_great".into(),
                user: Some("I am great".into()),
            }
        );
    }

    #[test]
    fn test_wrong_kind_is_empty() {
        let err = Dataset::from_yaml_str(NLU_YAML, DatasetKind::Stories).unwrap_err();
        assert!(matches!(err, DataError::Empty { .. }));
    }

    #[test]
    fn test_yaml_roundtrip_preserves_examples() {
        let dataset = Dataset::from_yaml_str(NLU_YAML, DatasetKind::Nlu).unwrap();
        let yaml = Dataset::to_yaml(dataset.examples()).unwrap();
        let reparsed = Dataset::from_yaml_str(&yaml, DatasetKind::Nlu).unwrap();
        assert_eq!(reparsed.examples(), dataset.examples());

        let stories = Dataset::from_yaml_str(STORIES_YAML, DatasetKind::Stories).unwrap();
        let yaml = Dataset::to_yaml(stories.examples()).unwrap();
        let reparsed = Dataset::from_yaml_str(&yaml, DatasetKind::Stories).unwrap();
        assert_eq!(reparsed.examples(), stories.examples());
    }

    #[test]
    fn test_load_directory_filters_kind() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("nlu.yml"), NLU_YAML).unwrap();
        std::fs::write(dir.path().join("stories.yml"), STORIES_YAML).unwrap();
        std::fs::write(dir.path().join("README.md"), "# not data").unwrap();

        let nlu = Dataset::load(dir.path(), DatasetKind::Nlu).unwrap();
        assert_eq!(nlu.len(), 3);
        let stories = Dataset::load(dir.path(), DatasetKind::Stories).unwrap();
        assert_eq!(stories.len(), 1);
    }

    #[test]
    fn test_load_rejects_non_yaml_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stories.md");
        std::fs::write(&path, "## story").unwrap();
        let err = Dataset::load(&path, DatasetKind::Stories).unwrap_err();
        assert!(matches!(err, DataError::UnsupportedFormat { .. }));
    }

    #[test]
    fn test_load_missing_path() {
        let err = Dataset::load(Path::new("/nonexistent/data"), DatasetKind::Nlu).unwrap_err();
        assert!(matches!(err, DataError::FileNotFound { .. }));
    }

    #[test]
    fn test_truncate_and_subset() {
        let dataset = Dataset::from_yaml_str(NLU_YAML, DatasetKind::Nlu).unwrap();
        assert_eq!(dataset.truncate(2).len(), 2);
        assert_eq!(dataset.truncate(10).len(), 3);
        let subset = dataset.subset(&[2, 0]);
        assert_eq!(subset.get(0), Some(&Example::utterance("bye", "goodbye")));
    }
}
