//! Derived customer features: tenure and charge buckets, revenue, service and
//! contract flags.
//!
//! Every derivation declares its source columns. [`FeatureEngineer::plan`]
//! checks them against the input schema and only derivations whose sources are
//! all present are applied, so the output width depends on the input schema.

use crate::config::ColumnNames;
use crate::data::is_text;
use crate::error::Result;
use crate::preprocess::clean::{coerce_numeric_columns, impute_missing};
use crate::preprocess::Prepared;
use polars::prelude::*;
use tracing::{debug, info};

/// Tenure bucket edges in months; buckets are `(a, b]` with 0 included
pub const TENURE_BINS: [f64; 5] = [0.0, 12.0, 24.0, 48.0, 72.0];
pub const TENURE_LABELS: [&str; 4] = ["0-1 year", "1-2 years", "2-4 years", "4+ years"];

/// Monthly charge bucket edges
pub const CHARGE_BINS: [f64; 4] = [0.0, 35.0, 70.0, 120.0];
pub const CHARGE_LABELS: [&str; 3] = ["Low", "Medium", "High"];

const MONTHLY_CONTRACT: &str = "Month-to-month";
const YES: &str = "Yes";

/// A feature this module knows how to derive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DerivedFeature {
    TenureGroup,
    IsNewCustomer,
    IsLongTerm,
    TotalRevenue,
    ChargeCategory,
    ChargeRatio,
    NumServices,
    IsMonthlyContract,
    PaperlessBillingBinary,
    FamilySize,
}

impl DerivedFeature {
    pub const ALL: [DerivedFeature; 10] = [
        DerivedFeature::TenureGroup,
        DerivedFeature::IsNewCustomer,
        DerivedFeature::IsLongTerm,
        DerivedFeature::TotalRevenue,
        DerivedFeature::ChargeCategory,
        DerivedFeature::ChargeRatio,
        DerivedFeature::NumServices,
        DerivedFeature::IsMonthlyContract,
        DerivedFeature::PaperlessBillingBinary,
        DerivedFeature::FamilySize,
    ];

    /// Output column name
    pub fn name(&self) -> &'static str {
        match self {
            DerivedFeature::TenureGroup => "tenure_group",
            DerivedFeature::IsNewCustomer => "is_new_customer",
            DerivedFeature::IsLongTerm => "is_long_term",
            DerivedFeature::TotalRevenue => "total_revenue",
            DerivedFeature::ChargeCategory => "charge_category",
            DerivedFeature::ChargeRatio => "charge_ratio",
            DerivedFeature::NumServices => "num_services",
            DerivedFeature::IsMonthlyContract => "is_monthly_contract",
            DerivedFeature::PaperlessBillingBinary => "paperless_billing_binary",
            DerivedFeature::FamilySize => "family_size",
        }
    }

    /// Columns that must all be present, except `NumServices` which needs any one
    fn sources<'a>(&self, cols: &'a ColumnNames) -> Vec<&'a str> {
        match self {
            DerivedFeature::TenureGroup | DerivedFeature::IsNewCustomer | DerivedFeature::IsLongTerm => {
                vec![&cols.tenure]
            }
            DerivedFeature::TotalRevenue => vec![&cols.monthly_charges, &cols.tenure],
            DerivedFeature::ChargeCategory => vec![&cols.monthly_charges],
            DerivedFeature::ChargeRatio => {
                vec![&cols.total_charges, &cols.monthly_charges, &cols.tenure]
            }
            DerivedFeature::NumServices => cols.services.iter().map(String::as_str).collect(),
            DerivedFeature::IsMonthlyContract => vec![&cols.contract],
            DerivedFeature::PaperlessBillingBinary => vec![&cols.paperless_billing],
            // demographic block: only derived when the senior flag is present too
            DerivedFeature::FamilySize => {
                vec![&cols.senior_citizen, &cols.partner, &cols.dependents]
            }
        }
    }
}

/// Derivations that can run on a given schema and those that cannot
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeaturePlan {
    pub present: Vec<DerivedFeature>,
    /// Skipped derivations with the source columns they lack
    pub absent: Vec<(DerivedFeature, Vec<String>)>,
}

impl FeaturePlan {
    pub fn contains(&self, feature: DerivedFeature) -> bool {
        self.present.contains(&feature)
    }
}

/// Stateless feature deriver
#[derive(Debug, Clone, Default)]
pub struct FeatureEngineer {
    columns: ColumnNames,
}

impl FeatureEngineer {
    pub fn new(columns: ColumnNames) -> Self {
        Self { columns }
    }

    /// Check every derivation's source columns against `frame`
    pub fn plan(&self, frame: &DataFrame) -> FeaturePlan {
        let names = frame.get_column_names();
        let mut plan = FeaturePlan::default();
        for feature in DerivedFeature::ALL {
            let sources = feature.sources(&self.columns);
            let missing: Vec<String> = sources
                .iter()
                .filter(|s| !names.contains(*s))
                .map(|s| s.to_string())
                .collect();
            let available = match feature {
                DerivedFeature::NumServices => missing.len() < sources.len(),
                _ => missing.is_empty(),
            };
            if available {
                plan.present.push(feature);
            } else {
                plan.absent.push((feature, missing));
            }
        }
        plan
    }

    /// Derive every feature the input schema supports
    pub fn engineer(&self, frame: &DataFrame) -> Result<DataFrame> {
        info!("Creating engineered features");
        let mut out = frame.clone();
        self.validate_numeric(&mut out)?;

        let plan = self.plan(&out);
        for (feature, missing) in &plan.absent {
            debug!(feature = feature.name(), missing = ?missing, "Skipped feature");
        }
        for &feature in &plan.present {
            let series = self.derive(feature, &out)?;
            debug!(feature = feature.name(), "Created feature");
            out.with_column(series)?;
        }

        info!(
            rows = out.height(),
            columns = out.width(),
            "Added {} new features",
            out.width().saturating_sub(frame.width())
        );
        Ok(out)
    }

    /// Known numeric sources arriving as text are parsed, gaps filled with the median
    fn validate_numeric(&self, frame: &mut DataFrame) -> Result<()> {
        let known = self.columns.known_numeric();
        // threshold above 1 restricts coercion to the known columns
        let coerced = coerce_numeric_columns(frame, f64::INFINITY, &known, &[])?;
        if coerced.is_empty() {
            return Ok(());
        }
        let skip: Vec<String> = frame
            .get_column_names()
            .into_iter()
            .filter(|name| !coerced.iter().any(|c| c == name))
            .map(str::to_string)
            .collect();
        let skip: Vec<&str> = skip.iter().map(String::as_str).collect();
        for (column, filled) in impute_missing(frame, &skip)? {
            debug!(column = %column, filled, "Converted to numeric");
        }
        Ok(())
    }

    fn derive(&self, feature: DerivedFeature, frame: &DataFrame) -> Result<Series> {
        let cols = &self.columns;
        let name = feature.name();

        let series = match feature {
            DerivedFeature::TenureGroup => numeric(frame, &cols.tenure)?
                .into_iter()
                .map(|t| t.and_then(|t| bucketize(t, &TENURE_BINS, &TENURE_LABELS)))
                .collect::<StringChunked>()
                .into_series(),
            DerivedFeature::IsNewCustomer => numeric(frame, &cols.tenure)?
                .apply_values(|t| flag(t < TENURE_BINS[1]))
                .into_series(),
            DerivedFeature::IsLongTerm => numeric(frame, &cols.tenure)?
                .apply_values(|t| flag(t > TENURE_BINS[3]))
                .into_series(),
            DerivedFeature::TotalRevenue => {
                let monthly = numeric(frame, &cols.monthly_charges)?;
                let tenure = numeric(frame, &cols.tenure)?;
                (&monthly * &tenure).into_series()
            }
            DerivedFeature::ChargeCategory => numeric(frame, &cols.monthly_charges)?
                .into_iter()
                .map(|m| m.and_then(|m| bucketize(m, &CHARGE_BINS, &CHARGE_LABELS)))
                .collect::<StringChunked>()
                .into_series(),
            DerivedFeature::ChargeRatio => {
                let total = numeric(frame, &cols.total_charges)?;
                let monthly = numeric(frame, &cols.monthly_charges)?;
                let tenure = numeric(frame, &cols.tenure)?;
                total
                    .into_iter()
                    .zip(monthly.into_iter())
                    .zip(tenure.into_iter())
                    .map(|((total, m), t)| charge_ratio(total?, m?, t?))
                    .collect::<Float64Chunked>()
                    .into_series()
            }
            DerivedFeature::NumServices => {
                let mut counts = Float64Chunked::full(name, 0.0, frame.height());
                for service in &cols.services {
                    counts = &counts + &equals_flags(frame, service, YES)?;
                }
                counts.into_series()
            }
            DerivedFeature::IsMonthlyContract => {
                equals_flags(frame, &cols.contract, MONTHLY_CONTRACT)?.into_series()
            }
            DerivedFeature::PaperlessBillingBinary => {
                equals_flags(frame, &cols.paperless_billing, YES)?.into_series()
            }
            DerivedFeature::FamilySize => {
                let partner = equals_flags(frame, &cols.partner, YES)?;
                let dependents = equals_flags(frame, &cols.dependents, YES)?;
                (&partner + &dependents).into_series()
            }
        };
        Ok(series.with_name(name))
    }
}

fn flag(condition: bool) -> f64 {
    if condition {
        1.0
    } else {
        0.0
    }
}

fn numeric(frame: &DataFrame, column: &str) -> Result<Float64Chunked> {
    let values = frame.column(column)?.cast(&DataType::Float64)?;
    Ok(values.f64()?.clone())
}

/// 1 where the text column equals `expected`, 0 otherwise (including missing)
fn equals_flags(frame: &DataFrame, column: &str, expected: &str) -> Result<Float64Chunked> {
    match frame.column(column) {
        Ok(series) if is_text(series) => Ok(series
            .str()?
            .into_iter()
            .map(|v| Some(flag(v == Some(expected))))
            .collect()),
        _ => Ok(Float64Chunked::full(column, 0.0, frame.height())),
    }
}

/// Label of the right-closed bucket `(edges[i], edges[i + 1]]` holding `value`.
///
/// The lowest edge belongs to the first bucket and values past the last edge
/// are clamped into the last bucket; values below the lowest edge have no label.
pub fn bucketize(value: f64, edges: &[f64], labels: &[&'static str]) -> Option<&'static str> {
    if value.is_nan() || edges.is_empty() || value < edges[0] {
        return None;
    }
    let idx = edges[1..]
        .iter()
        .position(|&upper| value <= upper)
        .unwrap_or(labels.len().saturating_sub(1));
    labels.get(idx).copied()
}

/// `total / (monthly * tenure + 1)`; the +1 keeps tenure 0 finite
pub fn charge_ratio(total: f64, monthly: f64, tenure: f64) -> Option<f64> {
    let denominator = monthly * tenure + 1.0;
    if denominator == 0.0 {
        None
    } else {
        Some(total / denominator)
    }
}

/// Before/after overview printed once a run has prepared its features
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSummary {
    pub original_columns: usize,
    pub engineered_columns: usize,
    pub encoded_columns: usize,
    pub final_features: usize,
    pub churn_rate: f64,
    pub churned: usize,
    pub retained: usize,
}

impl FeatureSummary {
    pub fn new(original: &DataFrame, engineered: &DataFrame, prepared: &Prepared) -> Self {
        let (churned, total) = prepared
            .target
            .as_ref()
            .map(|y| (y.iter().filter(|&&v| v == 1).count(), y.len()))
            .unwrap_or((0, 0));
        Self {
            original_columns: original.width(),
            engineered_columns: engineered.width(),
            encoded_columns: prepared.encoded_width,
            final_features: prepared.feature_names.len(),
            churn_rate: if total > 0 {
                churned as f64 / total as f64
            } else {
                0.0
            },
            churned,
            retained: total - churned,
        }
    }

    pub fn print(&self) {
        println!("\n=== Feature Engineering Summary ===");
        println!("Original columns:      {}", self.original_columns);
        println!("After engineering:     {}", self.engineered_columns);
        println!("After encoding:        {}", self.encoded_columns);
        println!("Features for modeling: {}", self.final_features);
        println!("Churn rate:            {:.2}%", self.churn_rate * 100.0);
        println!("Churned customers:     {}", self.churned);
        println!("Retained customers:    {}", self.retained);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{numeric_values, text_values};
    use ndarray::{array, Array2};

    fn telco_frame() -> DataFrame {
        df!(
            "tenure" => &[5.0, 0.0, 12.0, 60.0],
            "MonthlyCharges" => &[50.0, 20.0, 70.0, 110.0],
            "TotalCharges" => &["250", " ", "840", "6600"],
            "Contract" => &["Month-to-month", "Month-to-month", "One year", "Two year"],
            "PaperlessBilling" => &["Yes", "No", "Yes", "No"],
            "SeniorCitizen" => &[0.0, 1.0, 0.0, 0.0],
            "Partner" => &["Yes", "No", "Yes", "Yes"],
            "Dependents" => &["Yes", "No", "No", "Yes"],
            "PhoneService" => &["Yes", "No", "Yes", "Yes"],
            "StreamingTV" => &["No", "No", "Yes", "Yes"]
        )
        .unwrap()
    }

    fn engineered() -> DataFrame {
        FeatureEngineer::default().engineer(&telco_frame()).unwrap()
    }

    #[test]
    fn test_new_customer_scenario() {
        let out = engineered();
        assert_eq!(numeric_values(&out, "is_new_customer").unwrap()[0], Some(1.0));
        assert_eq!(numeric_values(&out, "is_long_term").unwrap()[0], Some(0.0));
        assert_eq!(numeric_values(&out, "total_revenue").unwrap()[0], Some(250.0));
        assert_eq!(text_values(&out, "tenure_group").unwrap()[0].as_deref(), Some("0-1 year"));
    }

    #[test]
    fn test_zero_tenure_charge_ratio_is_finite() {
        let ratio = numeric_values(&engineered(), "charge_ratio").unwrap();
        // blank TotalCharges filled with the median of 250, 840 and 6600
        assert_eq!(ratio[1], Some(840.0));
        assert_eq!(charge_ratio(100.0, 50.0, 0.0), Some(100.0));
        assert!(ratio.iter().all(|r| r.map(f64::is_finite).unwrap_or(false)));
    }

    #[test]
    fn test_bucket_boundaries() {
        assert_eq!(bucketize(12.0, &TENURE_BINS, &TENURE_LABELS), Some("0-1 year"));
        assert_eq!(bucketize(12.5, &TENURE_BINS, &TENURE_LABELS), Some("1-2 years"));
        assert_eq!(bucketize(0.0, &TENURE_BINS, &TENURE_LABELS), Some("0-1 year"));
        assert_eq!(bucketize(48.0, &TENURE_BINS, &TENURE_LABELS), Some("2-4 years"));
        assert_eq!(bucketize(90.0, &TENURE_BINS, &TENURE_LABELS), Some("4+ years"));
        assert_eq!(bucketize(-1.0, &TENURE_BINS, &TENURE_LABELS), None);
        assert_eq!(bucketize(35.0, &CHARGE_BINS, &CHARGE_LABELS), Some("Low"));
        assert_eq!(bucketize(70.01, &CHARGE_BINS, &CHARGE_LABELS), Some("High"));
    }

    #[test]
    fn test_flags_and_counts() {
        let out = engineered();
        assert_eq!(
            numeric_values(&out, "num_services").unwrap(),
            vec![Some(1.0), Some(0.0), Some(2.0), Some(2.0)]
        );
        assert_eq!(
            numeric_values(&out, "is_monthly_contract").unwrap(),
            vec![Some(1.0), Some(1.0), Some(0.0), Some(0.0)]
        );
        assert_eq!(
            numeric_values(&out, "paperless_billing_binary").unwrap(),
            vec![Some(1.0), Some(0.0), Some(1.0), Some(0.0)]
        );
        assert_eq!(
            numeric_values(&out, "family_size").unwrap(),
            vec![Some(2.0), Some(0.0), Some(1.0), Some(2.0)]
        );
        assert_eq!(text_values(&out, "charge_category").unwrap()[3].as_deref(), Some("High"));
    }

    #[test]
    fn test_family_size_requires_senior_flag() {
        let mut frame = telco_frame();
        frame.drop_in_place("SeniorCitizen").unwrap();
        let engineer = FeatureEngineer::default();

        let plan = engineer.plan(&frame);
        assert!(!plan.contains(DerivedFeature::FamilySize));
        let (_, missing) = plan
            .absent
            .iter()
            .find(|(f, _)| *f == DerivedFeature::FamilySize)
            .unwrap();
        assert_eq!(missing, &vec!["SeniorCitizen".to_string()]);

        let out = engineer.engineer(&frame).unwrap();
        assert!(out.column("family_size").is_err());
    }

    #[test]
    fn test_missing_sources_are_skipped() {
        let frame = df!(
            "tenure" => &[3.0, 50.0],
            "Contract" => &["Two year", "Month-to-month"]
        )
        .unwrap();
        let engineer = FeatureEngineer::default();
        let plan = engineer.plan(&frame);

        assert!(plan.contains(DerivedFeature::TenureGroup));
        assert!(plan.contains(DerivedFeature::IsMonthlyContract));
        assert!(!plan.contains(DerivedFeature::TotalRevenue));
        assert!(!plan.contains(DerivedFeature::NumServices));
        let (_, missing) = plan
            .absent
            .iter()
            .find(|(f, _)| *f == DerivedFeature::ChargeRatio)
            .unwrap();
        assert_eq!(missing, &vec!["TotalCharges".to_string(), "MonthlyCharges".to_string()]);

        let out = engineer.engineer(&frame).unwrap();
        assert_eq!(out.width(), 2 + plan.present.len());
        assert!(out.column("total_revenue").is_err());
        assert_eq!(numeric_values(&out, "is_long_term").unwrap(), vec![Some(0.0), Some(1.0)]);
    }

    #[test]
    fn test_engineering_is_deterministic() {
        assert!(engineered().equals_missing(&engineered()));
    }

    #[test]
    fn test_summary_counts_encoded_columns() {
        let original = df!("tenure" => &[1.0, 2.0], "Contract" => &["a", "b"]).unwrap();
        let engineered = df!(
            "tenure" => &[1.0, 2.0],
            "Contract" => &["a", "b"],
            "tenure_group" => &["0-1 year", "0-1 year"]
        )
        .unwrap();
        let prepared = Prepared {
            features: Array2::zeros((2, 2)),
            feature_names: vec!["tenure".to_string(), "Contract".to_string()],
            encoded_width: 3,
            target: Some(array![1, 0]),
        };

        let summary = FeatureSummary::new(&original, &engineered, &prepared);
        assert_eq!(summary.original_columns, 2);
        assert_eq!(summary.engineered_columns, 3);
        assert_eq!(summary.encoded_columns, 3);
        assert_eq!(summary.final_features, 2);
        assert_eq!((summary.churned, summary.retained), (1, 1));
        assert!((summary.churn_rate - 0.5).abs() < 1e-12);
    }
}
