//! Comparison reporting: output layout, plots and the reporter.

pub mod layout;
pub mod plot;
pub mod reporter;

pub use layout::{ComparisonKind, PlotArtifact};
pub use plot::{
    ChartRenderer, CommandPlotRenderer, Plot, PlotFormat, PlotKind, PlotRenderer, RenderedPlot,
};
pub use reporter::{ComparisonReporter, EvaluationReportOptions};
