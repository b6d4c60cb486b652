//! Classification metrics, reports and model comparison

use crate::data::write_polars_csv;
use crate::error::{ChurnError, Result};
use crate::model::Classifier;
use linfa::metrics::{BinaryClassification, ReceiverOperatingCharacteristic};
use linfa::prelude::Pr;
use ndarray::{Array1, Array2};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::Path;
use tracing::{error, info, warn};

pub const CLASS_NAMES: [&str; 2] = ["Not Churned", "Churned"];

/// Test-set metrics for one model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetrics {
    pub model: String,
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    pub roc_auc: f64,
}

impl ModelMetrics {
    fn rounded(&self, decimals: i32) -> Self {
        let factor = 10f64.powi(decimals);
        let round = |v: f64| (v * factor).round() / factor;
        Self {
            model: self.model.clone(),
            accuracy: round(self.accuracy),
            precision: round(self.precision),
            recall: round(self.recall),
            f1_score: round(self.f1_score),
            roc_auc: round(self.roc_auc),
        }
    }
}

/// Binary confusion counts; rows are actual, columns predicted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfusionMatrix {
    pub true_negatives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
    pub true_positives: usize,
}

impl ConfusionMatrix {
    pub fn to_array(&self) -> Array2<usize> {
        ndarray::array![
            [self.true_negatives, self.false_positives],
            [self.false_negatives, self.true_positives]
        ]
    }

    pub fn total(&self) -> usize {
        self.true_negatives + self.false_positives + self.false_negatives + self.true_positives
    }

    pub fn accuracy(&self) -> f64 {
        ratio(self.true_negatives + self.true_positives, self.total())
    }

    pub fn precision(&self) -> f64 {
        ratio(self.true_positives, self.true_positives + self.false_positives)
    }

    pub fn recall(&self) -> f64 {
        ratio(self.true_positives, self.true_positives + self.false_negatives)
    }

    pub fn f1(&self) -> f64 {
        f1(self.precision(), self.recall())
    }

    /// Precision, recall and support for the negative class
    fn negative_class(&self) -> (f64, f64, usize) {
        let support = self.true_negatives + self.false_positives;
        (
            ratio(self.true_negatives, self.true_negatives + self.false_negatives),
            ratio(self.true_negatives, support),
            support,
        )
    }
}

/// Zero when the denominator is zero
fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

fn f1(precision: f64, recall: f64) -> f64 {
    if precision + recall == 0.0 {
        0.0
    } else {
        2.0 * precision * recall / (precision + recall)
    }
}

fn check_lengths(n_true: usize, n_other: usize) -> Result<()> {
    if n_true == 0 {
        return Err(ChurnError::EmptyDataset("no samples to evaluate".to_string()));
    }
    if n_true != n_other {
        return Err(ChurnError::LengthMismatch {
            features: n_other,
            labels: n_true,
        });
    }
    Ok(())
}

pub fn confusion_matrix(y_true: &Array1<usize>, y_pred: &Array1<usize>) -> ConfusionMatrix {
    // counted locally: linfa's matrix drops samples whose true label never appears in the predictions
    let mut cm = ConfusionMatrix::default();
    for (&actual, &predicted) in y_true.iter().zip(y_pred.iter()) {
        match (actual == 1, predicted == 1) {
            (false, false) => cm.true_negatives += 1,
            (false, true) => cm.false_positives += 1,
            (true, false) => cm.false_negatives += 1,
            (true, true) => cm.true_positives += 1,
        }
    }
    cm
}

// linfa seeds its threshold scan at 0.0, so a score of exactly zero would lose
// the curve origin. Scores are mapped into [0.25, 0.75] before scanning.
fn shift_score(p: f64) -> Pr {
    Pr::new_unchecked((0.25 + 0.5 * p.clamp(0.0, 1.0)) as f32)
}

fn unshift_threshold(t: f32) -> f64 {
    ((t as f64 - 0.25) * 2.0).clamp(0.0, 1.0)
}

fn linfa_roc(y_true: &Array1<usize>, scores: &Array1<f64>) -> Result<ReceiverOperatingCharacteristic> {
    check_lengths(y_true.len(), scores.len())?;
    let n_pos = y_true.iter().filter(|&&v| v == 1).count();
    let n_neg = y_true.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return Err(ChurnError::invalid(
            "y_true",
            format!("{n_pos} positives, {n_neg} negatives"),
            "ROC needs both classes",
        ));
    }
    if let Some(bad) = scores.iter().find(|s| !s.is_finite()) {
        return Err(ChurnError::invalid("scores", bad, "must be finite"));
    }

    let shifted: Vec<Pr> = scores.iter().map(|&p| shift_score(p)).collect();
    let truth: Vec<bool> = y_true.iter().map(|&y| y == 1).collect();
    shifted
        .as_slice()
        .roc(truth.as_slice())
        .map_err(|e| ChurnError::Training(format!("ROC: {e}")))
}

/// Area under the ROC curve; tied scores count half. Both classes must be present.
pub fn roc_auc(y_true: &Array1<usize>, scores: &Array1<f64>) -> Result<f64> {
    Ok(linfa_roc(y_true, scores)?.area_under_curve() as f64)
}

/// Points of the ROC curve, one per distinct score, starting at (0, 0)
#[derive(Debug, Clone, PartialEq)]
pub struct RocCurve {
    pub fpr: Vec<f64>,
    pub tpr: Vec<f64>,
    pub thresholds: Vec<f64>,
}

/// ROC points ordered by descending threshold.
///
/// linfa reports the rates of samples scored *below* each threshold, in
/// ascending order; they are flipped into the usual above-threshold rates here.
pub fn roc_curve(y_true: &Array1<usize>, scores: &Array1<f64>) -> Result<RocCurve> {
    let roc = linfa_roc(y_true, scores)?;
    let below = roc.get_curve();
    let thresholds = roc.get_thresholds();

    let mut curve = RocCurve {
        fpr: Vec::with_capacity(below.len()),
        tpr: Vec::with_capacity(below.len()),
        thresholds: Vec::with_capacity(below.len()),
    };
    for (i, &(tp_below, fp_below)) in below.iter().enumerate().rev() {
        curve.tpr.push(1.0 - tp_below as f64);
        curve.fpr.push(1.0 - fp_below as f64);
        curve
            .thresholds
            .push(thresholds.get(i).map_or(f64::INFINITY, |&t| unshift_threshold(t)));
    }
    Ok(curve)
}

/// Per-class precision/recall/F1 table
pub fn classification_report(y_true: &Array1<usize>, y_pred: &Array1<usize>) -> String {
    let cm = confusion_matrix(y_true, y_pred);
    let (neg_precision, neg_recall, neg_support) = cm.negative_class();
    let pos_support = cm.true_positives + cm.false_negatives;
    let rows = [
        (CLASS_NAMES[0], neg_precision, neg_recall, neg_support),
        (CLASS_NAMES[1], cm.precision(), cm.recall(), pos_support),
    ];
    let total = cm.total();

    let mut out = String::new();
    let _ = writeln!(out, "{:>14}{:>11}{:>10}{:>10}{:>10}\n", "", "precision", "recall", "f1-score", "support");
    for (name, p, r, support) in rows {
        let _ = writeln!(out, "{:>14}{:>11.2}{:>10.2}{:>10.2}{:>10}", name, p, r, f1(p, r), support);
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "{:>14}{:>11}{:>10}{:>10.2}{:>10}", "accuracy", "", "", cm.accuracy(), total);

    let macro_p = (rows[0].1 + rows[1].1) / 2.0;
    let macro_r = (rows[0].2 + rows[1].2) / 2.0;
    let macro_f = (f1(rows[0].1, rows[0].2) + f1(rows[1].1, rows[1].2)) / 2.0;
    let _ = writeln!(out, "{:>14}{:>11.2}{:>10.2}{:>10.2}{:>10}", "macro avg", macro_p, macro_r, macro_f, total);

    let weight = |a: f64, b: f64| {
        if total == 0 {
            0.0
        } else {
            (a * neg_support as f64 + b * pos_support as f64) / total as f64
        }
    };
    let _ = writeln!(
        out,
        "{:>14}{:>11.2}{:>10.2}{:>10.2}{:>10}",
        "weighted avg",
        weight(rows[0].1, rows[1].1),
        weight(rows[0].2, rows[1].2),
        weight(f1(rows[0].1, rows[0].2), f1(rows[1].1, rows[1].2)),
        total
    );
    out
}

/// Score a fitted model on held-out data and print its report
pub fn evaluate_model<M: Classifier + ?Sized>(
    model: &M,
    x_test: &Array2<f64>,
    y_test: &Array1<usize>,
    model_name: &str,
) -> Result<ModelMetrics> {
    check_lengths(y_test.len(), x_test.nrows())?;

    let proba = model.predict_proba(x_test).map_err(|e| {
        error!(model = model_name, "Error during model evaluation: {e}");
        e
    })?;
    let y_pred = proba.mapv(|p| usize::from(p >= crate::model::DECISION_THRESHOLD));
    let cm = confusion_matrix(y_test, &y_pred);
    let metrics = ModelMetrics {
        model: model_name.to_string(),
        accuracy: cm.accuracy(),
        precision: cm.precision(),
        recall: cm.recall(),
        f1_score: cm.f1(),
        roc_auc: roc_auc(y_test, &proba)?,
    };

    println!("\n{}", "=".repeat(70));
    println!("{model_name} Performance");
    println!("{}", "=".repeat(70));
    println!("Accuracy:  {:.4}", metrics.accuracy);
    println!("Precision: {:.4}", metrics.precision);
    println!("Recall:    {:.4}", metrics.recall);
    println!("F1-Score:  {:.4}", metrics.f1_score);
    println!("ROC-AUC:   {:.4}", metrics.roc_auc);
    println!("\nClassification Report:");
    println!("{}", classification_report(y_test, &y_pred));

    Ok(metrics)
}

/// Round to four decimals, sort by ROC-AUC (best first) and print the table
pub fn compare_models(results: &[ModelMetrics]) -> Vec<ModelMetrics> {
    if results.is_empty() {
        warn!("No evaluation results provided");
        return Vec::new();
    }
    let mut table: Vec<ModelMetrics> = results.iter().map(|m| m.rounded(4)).collect();
    table.sort_by(|a, b| b.roc_auc.total_cmp(&a.roc_auc));

    println!("\n{}", "=".repeat(70));
    println!("MODEL COMPARISON SUMMARY");
    println!("{}", "=".repeat(70));
    println!(
        "\n{:<22}{:>10}{:>11}{:>9}{:>10}{:>9}",
        "Model", "Accuracy", "Precision", "Recall", "F1_Score", "ROC_AUC"
    );
    for m in &table {
        println!(
            "{:<22}{:>10.4}{:>11.4}{:>9.4}{:>10.4}{:>9.4}",
            m.model, m.accuracy, m.precision, m.recall, m.f1_score, m.roc_auc
        );
    }
    if let Some(best) = table.first() {
        println!("\nBEST MODEL: {} (ROC-AUC: {:.4})", best.model, best.roc_auc);
    }
    table
}

fn comparison_frame(results: &[ModelMetrics]) -> PolarsResult<DataFrame> {
    let names: Vec<&str> = results.iter().map(|m| m.model.as_str()).collect();
    let column = |name: &str, f: fn(&ModelMetrics) -> f64| {
        let values: Vec<f64> = results.iter().map(f).collect();
        Series::new(name, values)
    };
    DataFrame::new(vec![
        Series::new("Model", names),
        column("Accuracy", |m| m.accuracy),
        column("Precision", |m| m.precision),
        column("Recall", |m| m.recall),
        column("F1_Score", |m| m.f1_score),
        column("ROC_AUC", |m| m.roc_auc),
    ])
}

/// Write the comparison table as CSV; failures are logged and reported as `false`
pub fn write_comparison_csv(results: &[ModelMetrics], path: impl AsRef<Path>) -> bool {
    let path = path.as_ref();
    let written = comparison_frame(results)
        .map_err(ChurnError::from)
        .and_then(|mut df| write_polars_csv(&mut df, path));
    match written {
        Ok(()) => {
            info!(path = %path.display(), models = results.len(), "Saved model comparison");
            true
        }
        Err(e) => {
            error!(path = %path.display(), "Failed to save model comparison: {e}");
            false
        }
    }
}
