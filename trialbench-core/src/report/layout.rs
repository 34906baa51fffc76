//! Stable names of every file the reporter writes.

use serde::{Deserialize, Serialize};

use crate::report::plot::PlotFormat;

pub const RESULTS_FILE: &str = "results.json";
pub const TRAINING_SIZES_FILE: &str = "training_sizes.json";

pub const INTENT_REPORT_FILE: &str = "intent_report.json";
pub const STORY_REPORT_FILE: &str = "story_report.json";
pub const INTENT_SUCCESSES_FILE: &str = "intent_successes.json";
pub const INTENT_ERRORS_FILE: &str = "intent_errors.json";
pub const FAILED_STORIES_FILE: &str = "failed_test_stories.yml";
pub const SUCCESSFUL_STORIES_FILE: &str = "successful_test_stories.yml";

/// A plot file: its stem and the format it is written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlotArtifact {
    pub stem: &'static str,
    pub preferred: PlotFormat,
}

pub const INTENT_HISTOGRAM: PlotArtifact = PlotArtifact {
    stem: "intent_histogram",
    preferred: PlotFormat::Png,
};

pub const INTENT_CONFUSION_MATRIX: PlotArtifact = PlotArtifact {
    stem: "intent_confusion_matrix",
    preferred: PlotFormat::Png,
};

pub const STORY_CONFUSION_MATRIX: PlotArtifact = PlotArtifact {
    stem: "story_confmat",
    preferred: PlotFormat::Pdf,
};

pub const CORE_COMPARISON_GRAPH: PlotArtifact = PlotArtifact {
    stem: "core_model_comparison_graph",
    preferred: PlotFormat::Pdf,
};

pub const NLU_COMPARISON_GRAPH: PlotArtifact = PlotArtifact {
    stem: "nlu_model_comparison_graph",
    preferred: PlotFormat::Pdf,
};

pub const CROSS_VALIDATION_GRAPH: PlotArtifact = PlotArtifact {
    stem: "cross_validation_graph",
    preferred: PlotFormat::Pdf,
};

/// Which kind of comparison produced a result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonKind {
    /// Dialogue models, either trained here or pre-existing.
    Core,
    /// NLU configurations trained on percentages of the data.
    Nlu,
    /// k-fold cross-validation.
    CrossValidation,
}

impl ComparisonKind {
    pub fn graph(self) -> PlotArtifact {
        match self {
            ComparisonKind::Core => CORE_COMPARISON_GRAPH,
            ComparisonKind::Nlu => NLU_COMPARISON_GRAPH,
            ComparisonKind::CrossValidation => CROSS_VALIDATION_GRAPH,
        }
    }
}

/// File name of the plot `stem` written as `format`.
pub fn plot_file_name(stem: &str, format: PlotFormat) -> String {
    format!("{stem}.{}", format.extension())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plot_file_names() {
        assert_eq!(
            plot_file_name(INTENT_HISTOGRAM.stem, INTENT_HISTOGRAM.preferred),
            "intent_histogram.png"
        );
        assert_eq!(
            plot_file_name(STORY_CONFUSION_MATRIX.stem, STORY_CONFUSION_MATRIX.preferred),
            "story_confmat.pdf"
        );
        let core = ComparisonKind::Core.graph();
        assert_eq!(
            plot_file_name(core.stem, core.preferred),
            "core_model_comparison_graph.pdf"
        );
    }
}
