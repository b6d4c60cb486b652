//! Churn charts rendered with Plotters

use crate::error::{ChurnError, Result};
use crate::evaluation::{ConfusionMatrix, RocCurve, CLASS_NAMES};
use crate::features::{bucketize, TENURE_BINS, TENURE_LABELS};
use ndarray::Array1;
use plotters::coord::Shift;
use plotters::prelude::*;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

/// Line colors for model comparison charts
const MODEL_COLORS: [RGBColor; 5] = [BLUE, RED, GREEN, MAGENTA, CYAN];

const SALMON: RGBColor = RGBColor(250, 128, 114);

impl<E: std::error::Error + Send + Sync> From<DrawingAreaErrorKind<E>> for ChurnError {
    fn from(e: DrawingAreaErrorKind<E>) -> Self {
        ChurnError::Chart(e.to_string())
    }
}

fn open_canvas(path: &Path, size: (u32, u32)) -> Result<DrawingArea<BitMapBackend<'_>, Shift>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let root = BitMapBackend::new(path, size).into_drawing_area();
    root.fill(&WHITE)?;
    Ok(root)
}

/// `reports/figures/random_forest_confusion_matrix.png` style file names
pub fn figure_path(dir: &Path, model_name: &str, suffix: &str) -> PathBuf {
    let stem = model_name.to_lowercase().replace(' ', "_");
    dir.join(format!("{stem}_{suffix}.png"))
}

/// `(retained, churned)` counts
pub fn churn_counts(y: &Array1<usize>) -> (usize, usize) {
    let churned = y.iter().filter(|&&v| v == 1).count();
    (y.len() - churned, churned)
}

/// Churn rate per tenure segment, in segment order. Missing tenure counts as
/// 0 and rows without a churn label are ignored; empty segments have no rate.
pub fn tenure_segment_churn(tenure: &[Option<f64>], churn: &[Option<f64>]) -> Vec<(String, Option<f64>)> {
    let mut totals: BTreeMap<&str, (f64, usize)> = BTreeMap::new();
    for (t, c) in tenure.iter().zip(churn) {
        let (Some(label), Some(c)) = (bucketize(t.unwrap_or(0.0), &TENURE_BINS, &TENURE_LABELS), c) else {
            continue;
        };
        let entry = totals.entry(label).or_insert((0.0, 0));
        entry.0 += c;
        entry.1 += 1;
    }
    TENURE_LABELS
        .iter()
        .map(|label| {
            let rate = totals.get(label).map(|&(sum, n)| sum / n as f64);
            (label.to_string(), rate)
        })
        .collect()
}

/// Churn rate per category, highest first
pub fn category_churn(categories: &[Option<String>], churn: &[Option<f64>]) -> Vec<(String, f64)> {
    let mut totals: BTreeMap<&str, (f64, usize)> = BTreeMap::new();
    for (category, c) in categories.iter().zip(churn) {
        if let (Some(category), Some(c)) = (category, c) {
            let entry = totals.entry(category.as_str()).or_insert((0.0, 0));
            entry.0 += c;
            entry.1 += 1;
        }
    }
    let mut rates: Vec<(String, f64)> = totals
        .into_iter()
        .map(|(category, (sum, n))| (category.to_string(), sum / n as f64))
        .collect();
    rates.sort_by(|a, b| b.1.total_cmp(&a.1));
    rates
}

/// Bar per class with count and share labels
pub fn plot_churn_distribution(y: &Array1<usize>, output_path: &Path) -> Result<()> {
    let (retained, churned) = churn_counts(y);
    let total = (retained + churned).max(1) as f64;
    let bars = [("No Churn", retained, GREEN), ("Churn", churned, RED)];
    let max_count = retained.max(churned).max(1) as f64;

    let root = open_canvas(output_path, (800, 600))?;
    let mut chart = ChartBuilder::on(&root)
        .caption("Churn Distribution", ("sans-serif", 30))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(-0.5f64..1.5f64, 0f64..(max_count * 1.15))?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(3)
        .x_label_formatter(&|x| category_label(*x, &["No Churn", "Churn"]))
        .y_desc("Count")
        .axis_desc_style(("sans-serif", 15))
        .draw()?;

    for (i, (_, count, color)) in bars.iter().enumerate() {
        let x = i as f64;
        chart.draw_series(std::iter::once(Rectangle::new(
            [(x - 0.35, 0.0), (x + 0.35, *count as f64)],
            color.mix(0.7).filled(),
        )))?;
        chart.draw_series(std::iter::once(Text::new(
            format!("{} ({:.1}%)", count, *count as f64 / total * 100.0),
            (x - 0.2, *count as f64 + max_count * 0.05),
            ("sans-serif", 18).into_font(),
        )))?;
    }

    root.present()?;
    info!(path = %output_path.display(), "Churn distribution chart saved");
    Ok(())
}

/// Axis label for integer positions of a categorical float axis
fn category_label(x: f64, labels: &[&str]) -> String {
    let idx = x.round();
    if (x - idx).abs() > 1e-6 || idx < 0.0 {
        return String::new();
    }
    labels.get(idx as usize).map(|s| s.to_string()).unwrap_or_default()
}

pub fn plot_confusion_matrix(cm: &ConfusionMatrix, model_name: &str, output_path: &Path) -> Result<()> {
    let counts = cm.to_array();
    let max = counts.iter().copied().max().unwrap_or(0).max(1) as f64;

    let root = open_canvas(output_path, (700, 600))?;
    let mut chart = ChartBuilder::on(&root)
        .caption(format!("Confusion Matrix - {model_name}"), ("sans-serif", 26))
        .margin(20)
        .x_label_area_size(50)
        .y_label_area_size(110)
        .build_cartesian_2d(-0.5f64..1.5f64, -0.5f64..1.5f64)?;

    chart
        .configure_mesh()
        .disable_mesh()
        .x_labels(3)
        .y_labels(3)
        .x_label_formatter(&|x| category_label(*x, &CLASS_NAMES))
        // actual classes read top to bottom
        .y_label_formatter(&|y| category_label(1.0 - *y, &CLASS_NAMES))
        .x_desc("Predicted")
        .y_desc("Actual")
        .draw()?;

    for ((actual, predicted), &count) in counts.indexed_iter() {
        let x = predicted as f64;
        let y = 1.0 - actual as f64;
        let shade = 0.15 + 0.85 * count as f64 / max;
        chart.draw_series(std::iter::once(Rectangle::new(
            [(x - 0.5, y - 0.5), (x + 0.5, y + 0.5)],
            BLUE.mix(shade).filled(),
        )))?;
        chart.draw_series(std::iter::once(Text::new(
            count.to_string(),
            (x - 0.05, y),
            ("sans-serif", 24).into_font(),
        )))?;
    }

    root.present()?;
    info!(path = %output_path.display(), "Confusion matrix saved");
    Ok(())
}

pub fn plot_roc_curve(curve: &RocCurve, auc: f64, model_name: &str, output_path: &Path) -> Result<()> {
    plot_roc_curves(
        &[(model_name.to_string(), curve.clone(), auc)],
        &format!("ROC Curve - {model_name}"),
        output_path,
    )
}

/// One curve per `(model, curve, auc)` on shared axes
pub fn plot_roc_curves(curves: &[(String, RocCurve, f64)], title: &str, output_path: &Path) -> Result<()> {
    let root = open_canvas(output_path, (800, 650))?;
    {
        let mut chart = ChartBuilder::on(&root)
            .caption(title, ("sans-serif", 26))
            .margin(15)
            .x_label_area_size(50)
            .y_label_area_size(60)
            .build_cartesian_2d(0f64..1f64, 0f64..1.05f64)?;
        chart
            .configure_mesh()
            .x_desc("False Positive Rate")
            .y_desc("True Positive Rate")
            .axis_desc_style(("sans-serif", 15))
            .draw()?;
        chart
            .draw_series(LineSeries::new(vec![(0.0, 0.0), (1.0, 1.0)], BLACK.mix(0.4)))?
            .label("Random Classifier")
            .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], BLACK.mix(0.4)));
        for (i, (name, curve, auc)) in curves.iter().enumerate() {
            let color = MODEL_COLORS[i % MODEL_COLORS.len()];
            let points: Vec<(f64, f64)> = curve.fpr.iter().copied().zip(curve.tpr.iter().copied()).collect();
            chart
                .draw_series(LineSeries::new(points, color.stroke_width(2)))?
                .label(format!("{name} (AUC = {auc:.3})"))
                .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
        }
        chart
            .configure_series_labels()
            .position(SeriesLabelPosition::LowerRight)
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .draw()?;
    }
    root.present()?;
    info!(path = %output_path.display(), curves = curves.len(), "ROC chart saved");
    Ok(())
}

/// Bar chart of churn rates (0..1) per group, with an optional overall line
pub fn plot_churn_rates(
    rates: &[(String, Option<f64>)],
    overall: Option<f64>,
    title: &str,
    x_desc: &str,
    output_path: &Path,
) -> Result<()> {
    let labels: Vec<&str> = rates.iter().map(|(l, _)| l.as_str()).collect();
    let n = rates.len().max(1) as f64;
    let top = rates
        .iter()
        .filter_map(|(_, r)| *r)
        .chain(overall)
        .fold(0.0f64, f64::max)
        * 100.0;

    let root = open_canvas(output_path, (900, 600))?;
    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 28))
        .margin(15)
        .x_label_area_size(50)
        .y_label_area_size(60)
        .build_cartesian_2d(-0.5f64..(n - 0.5), 0f64..(top * 1.2).max(1.0))?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(rates.len() * 2 + 1)
        .x_label_formatter(&|x| category_label(*x, &labels))
        .x_desc(x_desc)
        .y_desc("Churn Rate (%)")
        .axis_desc_style(("sans-serif", 15))
        .draw()?;

    for (i, (_, rate)) in rates.iter().enumerate() {
        let Some(rate) = rate else { continue };
        let x = i as f64;
        let height = rate * 100.0;
        chart.draw_series(std::iter::once(Rectangle::new(
            [(x - 0.35, 0.0), (x + 0.35, height)],
            SALMON.filled(),
        )))?;
        chart.draw_series(std::iter::once(Rectangle::new(
            [(x - 0.35, 0.0), (x + 0.35, height)],
            BLACK.stroke_width(1),
        )))?;
        chart.draw_series(std::iter::once(Text::new(
            format!("{height:.1}%"),
            (x - 0.12, height + top * 0.03 + 0.5),
            ("sans-serif", 16).into_font(),
        )))?;
    }

    if let Some(overall) = overall {
        let y = overall * 100.0;
        chart
            .draw_series(LineSeries::new(vec![(-0.5, y), (n - 0.5, y)], RED.stroke_width(2)))?
            .label(format!("Overall Churn Rate: {y:.1}%"))
            .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], RED));
        chart
            .configure_series_labels()
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .draw()?;
    }

    root.present()?;
    info!(path = %output_path.display(), "Churn rate chart saved");
    Ok(())
}

/// Print target distribution to console
pub fn print_churn_statistics(y: &Array1<usize>) {
    let (retained, churned) = churn_counts(y);
    let total = y.len().max(1) as f64;
    println!("\n=== Target Distribution ===");
    println!("Total customers: {}", y.len());
    println!("  Not Churned: {} ({:.1}%)", retained, retained as f64 / total * 100.0);
    println!("  Churned:     {} ({:.1}%)", churned, churned as f64 / total * 100.0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_churn_counts() {
        assert_eq!(churn_counts(&array![0, 1, 1, 0, 0]), (3, 2));
    }

    #[test]
    fn test_tenure_segment_rates() {
        let tenure = vec![Some(3.0), Some(12.0), None, Some(30.0), Some(60.0), Some(20.0)];
        let churn = vec![Some(1.0), Some(0.0), Some(1.0), Some(0.0), None, Some(1.0)];
        let rates = tenure_segment_churn(&tenure, &churn);

        assert_eq!(rates.len(), 4);
        assert_eq!(rates[0].0, "0-1 year");
        // 3, 12 and missing (as 0): two of three churned
        assert!((rates[0].1.unwrap() - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(rates[1].1, Some(1.0));
        assert_eq!(rates[2].1, Some(0.0));
        assert_eq!(rates[3].1, None);
    }

    #[test]
    fn test_category_rates_sorted_descending() {
        let contract = vec![
            Some("Month-to-month".to_string()),
            Some("Two year".to_string()),
            Some("Month-to-month".to_string()),
            Some("One year".to_string()),
        ];
        let churn = vec![Some(1.0), Some(0.0), Some(0.0), Some(1.0)];
        let rates = category_churn(&contract, &churn);
        assert_eq!(rates[0], ("One year".to_string(), 1.0));
        assert_eq!(rates[1], ("Month-to-month".to_string(), 0.5));
        assert_eq!(rates[2], ("Two year".to_string(), 0.0));
    }

    #[test]
    fn test_figure_path() {
        let path = figure_path(Path::new("reports/figures"), "Random Forest", "confusion_matrix");
        assert_eq!(path, Path::new("reports/figures/random_forest_confusion_matrix.png"));
    }

    #[test]
    fn test_category_label_only_on_integer_ticks() {
        assert_eq!(category_label(1.0, &["a", "b"]), "b");
        assert_eq!(category_label(0.5, &["a", "b"]), "");
        assert_eq!(category_label(2.0, &["a", "b"]), "");
    }
}
