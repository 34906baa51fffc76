//! Plot descriptions and renderers.
//!
//! The reporter builds renderer-independent [`Plot`] values; a
//! [`PlotRenderer`] turns them into file bytes. The built-in
//! [`ChartRenderer`] draws PNG, PDF or SVG itself; [`CommandPlotRenderer`]
//! hands the plot as JSON to an external program.

use std::collections::BTreeSet;
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::OnceLock;

use async_trait::async_trait;
use genpdf::SimplePageDecorator;
use genpdf::fonts::{FontData, FontFamily};
use image::{DynamicImage, ImageOutputFormat, RgbImage};
use plotters::coord::Shift;
use plotters::prelude::*;
use plotters::style::text_anchor::{HPos, Pos, VPos};
use serde::{Deserialize, Serialize};

use crate::config::ExternalCommand;
use crate::error::ReportError;
use crate::evaluation::PredictionRecord;
use crate::planning::DataSlice;
use crate::process;
use crate::results::GroupSummary;

/// Output format of a rendered plot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlotFormat {
    Svg,
    Png,
    Pdf,
}

impl PlotFormat {
    pub fn extension(self) -> &'static str {
        match self {
            PlotFormat::Svg => "svg",
            PlotFormat::Png => "png",
            PlotFormat::Pdf => "pdf",
        }
    }
}

/// One point of a series: x, y and the error bar half-height.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    pub error: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    pub name: String,
    pub points: Vec<Point>,
}

/// One histogram bin, split into correct and wrong predictions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bin {
    pub label: String,
    pub correct: usize,
    pub wrong: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlotKind {
    Line {
        x_label: String,
        y_label: String,
        series: Vec<Series>,
    },
    Histogram {
        x_label: String,
        bins: Vec<Bin>,
    },
    ConfusionMatrix {
        labels: Vec<String>,
        /// `counts[expected][predicted]`
        counts: Vec<Vec<usize>>,
    },
}

/// A renderer-independent plot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plot {
    pub title: String,
    #[serde(flatten)]
    pub kind: PlotKind,
}

impl Plot {
    /// Mean of `metric` per configuration across slices, with std-dev error bars.
    pub fn comparison(title: &str, metric: &str, summaries: &[GroupSummary]) -> Self {
        let use_sizes = summaries.iter().all(|s| s.training_examples.is_some());
        let mut series: Vec<Series> = Vec::new();
        for summary in summaries {
            let Some(stats) = summary.metrics.get(metric) else {
                continue;
            };
            let x = if use_sizes {
                summary.training_examples.unwrap_or_default() as f64
            } else {
                slice_position(summary.slice)
            };
            let point = Point {
                x,
                y: stats.mean,
                error: stats.std_dev,
            };
            match series.iter_mut().find(|s| s.name == summary.configuration) {
                Some(s) => s.points.push(point),
                None => series.push(Series {
                    name: summary.configuration.clone(),
                    points: vec![point],
                }),
            }
        }
        for s in &mut series {
            s.points.sort_by(|a, b| a.x.total_cmp(&b.x));
        }
        let x_label = if use_sizes {
            "Number of training examples"
        } else {
            "Training data slice"
        };
        Self {
            title: title.to_string(),
            kind: PlotKind::Line {
                x_label: x_label.to_string(),
                y_label: metric.to_string(),
                series,
            },
        }
    }

    /// Confidence histogram of correct and wrong predictions in ten bins.
    pub fn confidence_histogram(title: &str, predictions: &[PredictionRecord]) -> Self {
        let mut bins: Vec<Bin> = (0..10)
            .map(|i| Bin {
                label: format!("{:.1}-{:.1}", i as f64 / 10.0, (i + 1) as f64 / 10.0),
                correct: 0,
                wrong: 0,
            })
            .collect();
        for prediction in predictions {
            let confidence = prediction.confidence.unwrap_or(1.0).clamp(0.0, 1.0);
            let index = ((confidence * 10.0) as usize).min(9);
            if prediction.is_correct() {
                bins[index].correct += 1;
            } else {
                bins[index].wrong += 1;
            }
        }
        Self {
            title: title.to_string(),
            kind: PlotKind::Histogram {
                x_label: "Confidence".to_string(),
                bins,
            },
        }
    }

    /// Confusion matrix over every expected and predicted label.
    pub fn confusion_matrix(title: &str, predictions: &[PredictionRecord]) -> Self {
        let labels: Vec<String> = predictions
            .iter()
            .flat_map(|p| [p.expected.clone(), p.predicted.clone()])
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let mut counts = vec![vec![0usize; labels.len()]; labels.len()];
        for prediction in predictions {
            let row = labels.binary_search(&prediction.expected);
            let col = labels.binary_search(&prediction.predicted);
            if let (Ok(row), Ok(col)) = (row, col) {
                counts[row][col] += 1;
            }
        }
        Self {
            title: title.to_string(),
            kind: PlotKind::ConfusionMatrix { labels, counts },
        }
    }
}

fn slice_position(slice: Option<DataSlice>) -> f64 {
    match slice {
        Some(DataSlice::Percentage(p)) => f64::from(p),
        Some(DataSlice::Fold { index, .. }) => (index + 1) as f64,
        Some(DataSlice::Full) | None => 0.0,
    }
}

/// Bytes of a rendered plot and the format they are in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPlot {
    pub format: PlotFormat,
    pub bytes: Vec<u8>,
}

/// Trait for plot renderers.
#[async_trait]
pub trait PlotRenderer: Send + Sync {
    /// Render `plot`, in `preferred` format if supported.
    async fn render(&self, plot: &Plot, preferred: PlotFormat) -> Result<RenderedPlot, ReportError>;
}

/// Bundled so charts render the same on hosts without system fonts.
static FONT: &[u8] = include_bytes!("../../assets/DejaVuSans.ttf");

const PALETTE: [RGBColor; 6] = [
    RGBColor(31, 119, 180),
    RGBColor(255, 127, 14),
    RGBColor(44, 160, 44),
    RGBColor(214, 39, 40),
    RGBColor(148, 103, 189),
    RGBColor(140, 86, 75),
];
const CORRECT: RGBColor = RGBColor(0, 146, 146);
const WRONG: RGBColor = RGBColor(255, 109, 182);

/// Pixel size of a drawn chart. Sizes of text and strokes scale with the width.
#[derive(Debug, Clone, Copy)]
struct Canvas {
    width: u32,
    height: u32,
}

const SCREEN: Canvas = Canvas {
    width: 960,
    height: 720,
};

/// 152 x 114 mm at the 300 DPI images are placed into PDFs with.
const PRINT: Canvas = Canvas {
    width: 1800,
    height: 1350,
};

impl Canvas {
    fn px(self, value: u32) -> u32 {
        value * self.width / SCREEN.width
    }

    fn font(self, size: f64) -> (&'static str, f64) {
        ("sans-serif", size * f64::from(self.width) / f64::from(SCREEN.width))
    }
}

/// Built-in renderer drawing charts with `plotters`.
///
/// PNG comes from the bitmap backend and SVG from the SVG backend. PDF is a
/// single A4 landscape page holding the chart, laid out with `genpdf`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChartRenderer;

impl ChartRenderer {
    pub fn new() -> Self {
        Self
    }

    /// Render synchronously; `render` runs this on the blocking pool.
    pub fn render_bytes(plot: &Plot, format: PlotFormat) -> Result<Vec<u8>, ReportError> {
        register_font()?;
        match format {
            PlotFormat::Svg => to_svg(plot),
            PlotFormat::Png => to_png(plot),
            PlotFormat::Pdf => to_pdf(plot),
        }
    }
}

#[async_trait]
impl PlotRenderer for ChartRenderer {
    async fn render(&self, plot: &Plot, preferred: PlotFormat) -> Result<RenderedPlot, ReportError> {
        let plot = plot.clone();
        let bytes = tokio::task::spawn_blocking(move || Self::render_bytes(&plot, preferred))
            .await
            .map_err(render_error)??;
        Ok(RenderedPlot {
            format: preferred,
            bytes,
        })
    }
}

fn render_error(e: impl std::fmt::Display) -> ReportError {
    ReportError::Render {
        message: e.to_string(),
    }
}

fn register_font() -> Result<(), ReportError> {
    static REGISTERED: OnceLock<bool> = OnceLock::new();
    let registered = *REGISTERED.get_or_init(|| {
        plotters::style::register_font("sans-serif", FontStyle::Normal, FONT).is_ok()
    });
    if registered {
        Ok(())
    } else {
        Err(render_error("bundled chart font could not be loaded"))
    }
}

fn to_svg(plot: &Plot) -> Result<Vec<u8>, ReportError> {
    let mut svg = String::new();
    {
        let root = SVGBackend::with_string(&mut svg, (SCREEN.width, SCREEN.height))
            .into_drawing_area();
        draw(&root, plot, SCREEN).map_err(render_error)?;
        root.present().map_err(render_error)?;
    }
    Ok(svg.into_bytes())
}

fn bitmap(plot: &Plot, canvas: Canvas) -> Result<RgbImage, ReportError> {
    let mut pixels = vec![0u8; canvas.width as usize * canvas.height as usize * 3];
    {
        let root = BitMapBackend::with_buffer(&mut pixels, (canvas.width, canvas.height))
            .into_drawing_area();
        draw(&root, plot, canvas).map_err(render_error)?;
        root.present().map_err(render_error)?;
    }
    RgbImage::from_raw(canvas.width, canvas.height, pixels)
        .ok_or_else(|| render_error("chart buffer does not match the canvas size"))
}

fn to_png(plot: &Plot) -> Result<Vec<u8>, ReportError> {
    let image = DynamicImage::ImageRgb8(bitmap(plot, SCREEN)?);
    let mut bytes = Cursor::new(Vec::new());
    image
        .write_to(&mut bytes, ImageOutputFormat::Png)
        .map_err(render_error)?;
    Ok(bytes.into_inner())
}

fn to_pdf(plot: &Plot) -> Result<Vec<u8>, ReportError> {
    let chart = genpdf::elements::Image::from_dynamic_image(DynamicImage::ImageRgb8(bitmap(
        plot, PRINT,
    )?))
    .map_err(render_error)?;

    let font = || FontData::new(FONT.to_vec(), None).map_err(render_error);
    let mut doc = genpdf::Document::new(FontFamily {
        regular: font()?,
        bold: font()?,
        italic: font()?,
        bold_italic: font()?,
    });
    doc.set_title(plot.title.as_str());
    doc.set_paper_size(genpdf::Size::new(297, 210));
    let mut decorator = SimplePageDecorator::new();
    decorator.set_margins(10);
    doc.set_page_decorator(decorator);
    doc.push(chart);

    let mut bytes = Vec::new();
    doc.render(&mut bytes).map_err(render_error)?;
    Ok(bytes)
}

fn draw<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    plot: &Plot,
    canvas: Canvas,
) -> DrawResult<(), DB> {
    root.fill(&WHITE)?;
    let area = root.titled(&plot.title, canvas.font(22.0))?;
    match &plot.kind {
        PlotKind::Line {
            x_label,
            y_label,
            series,
        } => draw_lines(&area, x_label, y_label, series, canvas),
        PlotKind::Histogram { x_label, bins } => draw_histogram(&area, x_label, bins, canvas),
        PlotKind::ConfusionMatrix { labels, counts } => {
            draw_matrix(&area, labels, counts, canvas)
        }
    }
}

fn span(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let (lo, hi) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    });
    if !lo.is_finite() || !hi.is_finite() {
        (0.0, 1.0)
    } else if (hi - lo).abs() < f64::EPSILON {
        (lo - 0.5, hi + 0.5)
    } else {
        let pad = (hi - lo) * 0.05;
        (lo - pad, hi + pad)
    }
}

fn draw_lines<DB: DrawingBackend>(
    area: &DrawingArea<DB, Shift>,
    x_label: &str,
    y_label: &str,
    series: &[Series],
    canvas: Canvas,
) -> DrawResult<(), DB> {
    let points = || series.iter().flat_map(|s| s.points.iter());
    let (x_min, x_max) = span(points().map(|p| p.x));
    let (y_min, y_max) = span(points().flat_map(|p| [p.y - p.error, p.y + p.error]));

    let mut chart = ChartBuilder::on(area)
        .margin(canvas.px(20))
        .x_label_area_size(canvas.px(50))
        .y_label_area_size(canvas.px(70))
        .build_cartesian_2d(x_min..x_max, y_min..y_max)?;
    chart
        .configure_mesh()
        .x_desc(x_label)
        .y_desc(y_label)
        .label_style(canvas.font(12.0))
        .axis_desc_style(canvas.font(14.0))
        .draw()?;

    for (i, s) in series.iter().enumerate() {
        let color = PALETTE[i % PALETTE.len()];
        chart
            .draw_series(LineSeries::new(
                s.points.iter().map(|p| (p.x, p.y)),
                color.stroke_width(canvas.px(2)),
            ))?
            .label(s.name.as_str())
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
        chart.draw_series(s.points.iter().map(|p| {
            ErrorBar::new_vertical(
                p.x,
                p.y - p.error,
                p.y,
                p.y + p.error,
                color.filled(),
                canvas.px(8),
            )
        }))?;
    }
    chart
        .configure_series_labels()
        .label_font(canvas.font(12.0))
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()
}

fn draw_histogram<DB: DrawingBackend>(
    area: &DrawingArea<DB, Shift>,
    x_label: &str,
    bins: &[Bin],
    canvas: Canvas,
) -> DrawResult<(), DB> {
    let max = bins
        .iter()
        .map(|b| b.correct.max(b.wrong))
        .max()
        .unwrap_or(0)
        .max(1) as f64;
    let width = 1.0 / bins.len().max(1) as f64;

    let mut chart = ChartBuilder::on(area)
        .margin(canvas.px(20))
        .x_label_area_size(canvas.px(50))
        .y_label_area_size(canvas.px(70))
        .build_cartesian_2d(0f64..1f64, 0f64..max * 1.1)?;
    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_desc(x_label)
        .y_desc("Number of samples")
        .label_style(canvas.font(12.0))
        .axis_desc_style(canvas.font(14.0))
        .draw()?;

    for (name, color, wrong) in [("Correct", CORRECT, false), ("Wrong", WRONG, true)] {
        let offset = if wrong { width / 2.0 } else { 0.0 };
        chart
            .draw_series(bins.iter().enumerate().map(|(i, bin)| {
                let count = if wrong { bin.wrong } else { bin.correct };
                let left = i as f64 * width + offset;
                Rectangle::new(
                    [(left, 0.0), (left + width / 2.0, count as f64)],
                    color.filled(),
                )
            }))?
            .label(name)
            .legend(move |(x, y)| Rectangle::new([(x, y - 5), (x + 10, y + 5)], color.filled()));
    }
    chart
        .configure_series_labels()
        .label_font(canvas.font(12.0))
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()
}

/// Label of the cell centered at `value`, or nothing between cells.
fn cell_label(labels: &[String], value: f64, flip: bool) -> String {
    let rounded = value.round();
    if (value - rounded).abs() > 1e-6 || rounded < 0.0 {
        return String::new();
    }
    let index = rounded as usize;
    let index = if flip {
        labels.len().checked_sub(index + 1)
    } else {
        Some(index)
    };
    index
        .and_then(|i| labels.get(i))
        .cloned()
        .unwrap_or_default()
}

fn draw_matrix<DB: DrawingBackend>(
    area: &DrawingArea<DB, Shift>,
    labels: &[String],
    counts: &[Vec<usize>],
    canvas: Canvas,
) -> DrawResult<(), DB> {
    let n = labels.len();
    let max = counts.iter().flatten().copied().max().unwrap_or(0).max(1) as f64;
    let upper = n.max(1) as f64 - 0.5;

    let mut chart = ChartBuilder::on(area)
        .margin(canvas.px(20))
        .x_label_area_size(canvas.px(60))
        .y_label_area_size(canvas.px(140))
        .build_cartesian_2d(-0.5f64..upper, -0.5f64..upper)?;
    chart
        .configure_mesh()
        .disable_mesh()
        .x_labels(n.max(1))
        .y_labels(n.max(1))
        .x_label_formatter(&|v| cell_label(labels, *v, false))
        .y_label_formatter(&|v| cell_label(labels, *v, true))
        .x_desc("Predicted label")
        .y_desc("True label")
        .label_style(canvas.font(12.0))
        .axis_desc_style(canvas.font(14.0))
        .draw()?;

    // Expected labels run top to bottom.
    let cells = || {
        counts.iter().enumerate().flat_map(move |(row, values)| {
            values
                .iter()
                .enumerate()
                .map(move |(col, &count)| (col as f64, (n - 1 - row) as f64, count))
        })
    };
    chart.draw_series(cells().map(|(x, y, count)| {
        let shade = (255.0 - count as f64 / max * 200.0) as u8;
        Rectangle::new(
            [(x - 0.5, y - 0.5), (x + 0.5, y + 0.5)],
            RGBColor(shade, shade, 255).filled(),
        )
    }))?;
    let center = Pos::new(HPos::Center, VPos::Center);
    chart.draw_series(cells().map(|(x, y, count)| {
        Text::new(
            count.to_string(),
            (x, y),
            TextStyle::from(canvas.font(14.0)).pos(center),
        )
    }))?;
    Ok(())
}

/// Renderer delegating to an external program.
///
/// The plot is written as JSON to the program's stdin; the rendered file is
/// read from its stdout. Placeholder: `{format}` (`svg`, `png` or `pdf`).
pub struct CommandPlotRenderer {
    command: ExternalCommand,
    workspace: PathBuf,
}

impl CommandPlotRenderer {
    pub fn new(command: ExternalCommand, workspace: PathBuf) -> Self {
        Self { command, workspace }
    }
}

#[async_trait]
impl PlotRenderer for CommandPlotRenderer {
    async fn render(&self, plot: &Plot, preferred: PlotFormat) -> Result<RenderedPlot, ReportError> {
        let input = serde_json::to_vec(plot)?;
        let vars = [("format", preferred.extension().to_string())];
        let bytes = process::run(&self.command, &vars, &self.workspace, Some(&input))
            .await
            .map_err(|e| ReportError::Render {
                message: e.to_string(),
            })?;
        if bytes.is_empty() {
            return Err(ReportError::Render {
                message: format!("'{}' produced no output", self.command.program),
            });
        }
        Ok(RenderedPlot {
            format: preferred,
            bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::PredictionKind;
    use crate::results::MetricStats;
    use std::collections::BTreeMap;

    fn prediction(expected: &str, predicted: &str, confidence: f64) -> PredictionRecord {
        PredictionRecord {
            kind: PredictionKind::Intent,
            input: "x".into(),
            expected: expected.into(),
            predicted: predicted.into(),
            confidence: Some(confidence),
        }
    }

    fn summary(config: &str, percentage: u8, mean: f64) -> GroupSummary {
        GroupSummary {
            configuration: config.into(),
            slice: Some(DataSlice::Percentage(percentage)),
            run_count: 1,
            failed_count: 0,
            training_examples: None,
            metrics: BTreeMap::from([(
                "accuracy".to_string(),
                MetricStats::from_values(vec![mean]).unwrap(),
            )]),
        }
    }

    #[test]
    fn test_comparison_plot_series() {
        let plot = Plot::comparison(
            "NLU",
            "accuracy",
            &[summary("a", 75, 0.9), summary("a", 25, 0.5), summary("b", 25, 0.4)],
        );
        let PlotKind::Line { series, x_label, .. } = plot.kind else {
            panic!("expected a line plot");
        };
        assert_eq!(x_label, "Training data slice");
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].points[0].x, 25.0);
        assert_eq!(series[0].points[1].y, 0.9);
    }

    #[test]
    fn test_histogram_bins() {
        let plot = Plot::confidence_histogram(
            "Intent prediction confidence distribution",
            &[prediction("a", "a", 0.95), prediction("a", "b", 0.15), prediction("a", "a", 1.0)],
        );
        let PlotKind::Histogram { bins, .. } = plot.kind else {
            panic!("expected a histogram");
        };
        assert_eq!(bins.len(), 10);
        assert_eq!(bins[9].correct, 2);
        assert_eq!(bins[1].wrong, 1);
    }

    #[test]
    fn test_confusion_matrix_counts() {
        let plot = Plot::confusion_matrix(
            "Intent Confusion matrix",
            &[prediction("a", "a", 1.0), prediction("a", "b", 1.0), prediction("b", "b", 1.0)],
        );
        let PlotKind::ConfusionMatrix { labels, counts } = plot.kind else {
            panic!("expected a confusion matrix");
        };
        assert_eq!(labels, vec!["a", "b"]);
        assert_eq!(counts, vec![vec![1, 1], vec![0, 1]]);
    }

    fn comparison_plot() -> Plot {
        Plot::comparison(
            "Core Model Comparison",
            "accuracy",
            &[summary("a", 50, 0.6), summary("a", 100, 0.9), summary("b", 100, 0.7)],
        )
    }

    #[tokio::test]
    async fn test_chart_renderer_writes_png() {
        let plot = Plot::confidence_histogram(
            "Intent Prediction Confidence Distribution",
            &[prediction("a", "a", 0.95), prediction("a", "b", 0.15)],
        );
        let rendered = ChartRenderer::new()
            .render(&plot, PlotFormat::Png)
            .await
            .unwrap();
        assert_eq!(rendered.format, PlotFormat::Png);
        assert!(rendered.bytes.starts_with(b"\x89PNG\r\n\x1a\n"));
    }

    #[tokio::test]
    async fn test_chart_renderer_writes_pdf() {
        let rendered = ChartRenderer::new()
            .render(&comparison_plot(), PlotFormat::Pdf)
            .await
            .unwrap();
        assert_eq!(rendered.format, PlotFormat::Pdf);
        assert!(rendered.bytes.starts_with(b"%PDF"));
    }

    #[test]
    fn test_chart_renderer_writes_svg() {
        let plot = Plot::confusion_matrix(
            "Story Confusion matrix",
            &[prediction("greet", "greet", 1.0), prediction("greet", "deny", 1.0)],
        );
        let bytes = ChartRenderer::render_bytes(&plot, PlotFormat::Svg).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("<svg"));
        assert!(text.contains("Story Confusion matrix"));
    }

    #[test]
    fn test_empty_plots_still_render() {
        let empty = [
            Plot::comparison("Empty", "accuracy", &[]),
            Plot::confidence_histogram("Empty", &[]),
            Plot::confusion_matrix("Empty", &[]),
        ];
        for plot in &empty {
            let bytes = ChartRenderer::render_bytes(plot, PlotFormat::Png).unwrap();
            assert!(!bytes.is_empty());
        }
    }

    #[test]
    fn test_cell_labels_follow_cell_centers() {
        let labels = vec!["affirm".to_string(), "deny".to_string(), "greet".to_string()];
        assert_eq!(cell_label(&labels, 0.0, false), "affirm");
        assert_eq!(cell_label(&labels, 2.0, false), "greet");
        assert_eq!(cell_label(&labels, 0.0, true), "greet");
        assert_eq!(cell_label(&labels, 0.5, false), "");
        assert_eq!(cell_label(&labels, 3.0, false), "");
        assert_eq!(cell_label(&labels, -1.0, true), "");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_renderer_uses_preferred_format() {
        let dir = tempfile::TempDir::new().unwrap();
        let renderer = CommandPlotRenderer::new(
            ExternalCommand::new("sh", &["-c", "cat > /dev/null; printf {format}"]),
            dir.path().to_path_buf(),
        );
        let plot = Plot::confidence_histogram("h", &[]);
        let rendered = renderer.render(&plot, PlotFormat::Png).await.unwrap();
        assert_eq!(rendered.format, PlotFormat::Png);
        assert_eq!(rendered.bytes, b"png");
    }
}
