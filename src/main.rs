//! ChurnForge: customer churn analytics CLI
//!
//! Entry point that runs cleaning, feature engineering, preprocessing, model
//! training, evaluation, persistence and reporting over one customer table.

use anyhow::{Context, Result};
use churnforge::data::{check_missing_values, numeric_values, take_rows, text_values};
use churnforge::evaluation::{confusion_matrix, roc_curve, write_comparison_csv};
use churnforge::viz;
use churnforge::{
    compare_models, evaluate_model, load_dataframe, save_dataframe, stratified_split, Args,
    ChurnError, ChurnModelTrainer, Classifier, FeatureEngineer, FeatureSummary, ModelMetrics,
    PipelineConfig, Preprocessor,
};
use polars::prelude::DataFrame;
use clap::Parser;
use std::path::Path;
use std::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse();
    init_tracing(args.verbose);

    if args.verbose {
        println!("ChurnForge - Customer Churn Analytics");
        println!("=====================================\n");
    }

    let config = args.load_config().context("Failed to load configuration")?;
    run_pipeline(&args, &config)
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "churnforge=debug" } else { "churnforge=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Report chart failures without aborting the run
fn chart(result: churnforge::Result<()>, what: &str) {
    if let Err(e) = result {
        warn!("Could not render {what}: {e}");
    }
}

/// Target values as sortable strings, for stratification
fn target_keys(frame: &DataFrame, target: &str) -> Result<Vec<String>> {
    if let Some(values) = numeric_values(frame, target) {
        return Ok(values
            .iter()
            .map(|v| v.map(|x| x.to_string()).unwrap_or_default())
            .collect());
    }
    let values =
        text_values(frame, target).ok_or_else(|| ChurnError::MissingColumn(target.to_string()))?;
    Ok(values.into_iter().map(Option::unwrap_or_default).collect())
}

/// Run the full churn pipeline
fn run_pipeline(args: &Args, config: &PipelineConfig) -> Result<()> {
    println!("=== Churn Analytics Pipeline ===\n");
    let start_time = Instant::now();
    let target = config.columns.target.as_str();
    let output = &config.output;

    // Step 1: Load and clean data
    if args.verbose {
        println!("Step 1: Loading and cleaning data");
        println!("  Input file: {}", args.input.display());
    }
    let raw = load_dataframe(&args.input)
        .with_context(|| format!("Failed to load {}", args.input.display()))?;
    let (rows, cols) = raw.shape();
    println!("✓ Data loaded: {rows} rows, {cols} columns");
    for report in check_missing_values(&raw) {
        info!(
            column = %report.column,
            missing = report.missing,
            "Missing values: {:.2}%",
            report.percentage
        );
    }

    let preprocessor = Preprocessor::new(config);
    let cleaned = preprocessor.clean_data(&raw, Some(target))?;
    println!("✓ Data cleaned: {} rows", cleaned.frame.height());
    save_dataframe(
        &cleaned.frame,
        output.processed_dir.join("cleaned_data.csv"),
        "cleaned data",
    );

    // Step 2: Feature engineering
    let engineer = FeatureEngineer::new(config.columns.clone());
    let plan = engineer.plan(&cleaned.frame);
    for (feature, missing) in &plan.absent {
        warn!(feature = feature.name(), sources = ?missing, "Skipping derived feature");
    }
    let engineered = engineer.engineer(&cleaned.frame)?;
    println!(
        "✓ Features engineered: {} derived, {} columns total",
        plan.present.len(),
        engineered.width()
    );
    save_dataframe(
        &engineered,
        output.processed_dir.join("engineered_features.csv"),
        "engineered features",
    );

    // Step 3: Stratified split, then fit preprocessing on the training rows only
    let labels = target_keys(&engineered, target)?;
    let (train_rows, test_rows) =
        stratified_split(&labels, config.training.test_size, config.training.seed)?;
    let train_frame = take_rows(&engineered, &train_rows)?;
    let test_frame = take_rows(&engineered, &test_rows)?;

    let (train, state) = preprocessor.fit_transform(&train_frame, target)?;
    let test = preprocessor.transform(&test_frame, target, &state)?;
    let y_train = train
        .target
        .clone()
        .with_context(|| format!("Target column '{target}' missing from training data"))?;
    let y_test = test
        .target
        .clone()
        .with_context(|| format!("Target column '{target}' missing from test data"))?;
    println!(
        "✓ Preprocessed: {} train / {} test rows, {} features",
        train.n_samples(),
        test.n_samples(),
        train.feature_names.len()
    );
    if args.verbose {
        println!("  Features: {}", train.feature_names.join(", "));
    }

    FeatureSummary::new(&raw, &engineered, &train).print();
    viz::print_churn_statistics(&y_train);

    // Step 4: Train and cross-validate
    let train_start = Instant::now();
    let mut trainer = ChurnModelTrainer::new(config.training.clone());
    let (_, y_fit) = trainer.train_all_models(&train.features, &y_train)?;
    println!(
        "\n✓ {} models trained on {} samples",
        trainer.models().len(),
        y_fit.len()
    );
    if args.verbose {
        println!("  Training time: {:.2}s", train_start.elapsed().as_secs_f64());
    }

    let cv_scores = trainer.cross_validate(&train.features, &y_train, config.training.cv_folds)?;
    println!("\n=== Cross-Validation ROC-AUC ({} folds) ===", config.training.cv_folds);
    for (kind, score) in &cv_scores {
        println!("{:<22} {:.4} (+/- {:.4})", kind.name(), score.mean, score.std);
    }

    // Step 5: Evaluate on the held-out set
    let mut results: Vec<ModelMetrics> = Vec::with_capacity(trainer.models().len());
    let mut curves = Vec::with_capacity(trainer.models().len());
    for model in trainer.models() {
        let name = model.kind().name();
        let metrics = evaluate_model(model, &test.features, &y_test, name)?;

        let proba = model.predict_proba(&test.features)?;
        let cm = confusion_matrix(&y_test, &model.predict(&test.features)?);
        chart(
            viz::plot_confusion_matrix(
                &cm,
                name,
                &viz::figure_path(&output.figures_dir, name, "confusion_matrix"),
            ),
            "confusion matrix",
        );
        match roc_curve(&y_test, &proba) {
            Ok(curve) => curves.push((name.to_string(), curve, metrics.roc_auc)),
            Err(e) => warn!("No ROC curve for {name}: {e}"),
        }
        results.push(metrics);
    }

    let comparison = compare_models(&results);
    write_comparison_csv(&comparison, output.metrics_dir.join("model_comparison.csv"));
    write_json(&cv_scores, &output.metrics_dir.join("cv_scores.json"));

    // Step 6: Persist the best model and the fitted preprocessing
    if let Some(best) = comparison.first() {
        let path = output.models_dir.join("best_model.zst");
        if trainer.save_model(&best.model, &path, 3, true) {
            println!("\n✓ Best model ({}) saved to {}", best.model, path.display());
        }
        write_json(&state, &output.models_dir.join("preprocess_state.json"));
    }

    // Step 7: Charts
    let figures = &output.figures_dir;
    chart(
        viz::plot_churn_distribution(&y_train, &figures.join("churn_distribution.png")),
        "churn distribution",
    );
    chart(
        viz::plot_roc_curves(&curves, "ROC Curves - Model Comparison", &figures.join("roc_curves.png")),
        "ROC curves",
    );
    let churn = numeric_values(&engineered, target).unwrap_or_default();
    let overall = mean_rate(&churn);
    if let Some(tenure) = numeric_values(&engineered, &config.columns.tenure) {
        chart(
            viz::plot_churn_rates(
                &viz::tenure_segment_churn(&tenure, &churn),
                overall,
                "Churn Rate by Tenure Segment",
                "Tenure Segment",
                &figures.join("churn_by_tenure.png"),
            ),
            "tenure segment chart",
        );
    }
    if let Some(contract) = text_values(&engineered, &config.columns.contract) {
        let rates: Vec<(String, Option<f64>)> = viz::category_churn(&contract, &churn)
            .into_iter()
            .map(|(category, rate)| (category, Some(rate)))
            .collect();
        chart(
            viz::plot_churn_rates(
                &rates,
                overall,
                "Churn Rate by Contract Type",
                "Contract",
                &figures.join("churn_by_contract.png"),
            ),
            "contract chart",
        );
    }

    let total_time = start_time.elapsed();
    println!("\n=== Pipeline Complete ===");
    println!("Total processing time: {:.2}s", total_time.as_secs_f64());
    println!("Reports saved under: {}", output.metrics_dir.display());
    println!("Figures saved under: {}", figures.display());

    Ok(())
}

fn mean_rate(values: &[Option<f64>]) -> Option<f64> {
    let known: Vec<f64> = values.iter().flatten().copied().collect();
    if known.is_empty() {
        None
    } else {
        Some(known.iter().sum::<f64>() / known.len() as f64)
    }
}

/// Best-effort pretty JSON report
fn write_json<T: serde::Serialize>(value: &T, path: &Path) {
    let written = path
        .parent()
        .map_or(Ok(()), std::fs::create_dir_all)
        .map_err(anyhow::Error::from)
        .and_then(|()| Ok(serde_json::to_vec_pretty(value)?))
        .and_then(|bytes| Ok(std::fs::write(path, bytes)?));
    match written {
        Ok(()) => info!(path = %path.display(), "Saved report"),
        Err(e) => warn!(path = %path.display(), "Failed to save report: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::df;

    #[test]
    fn test_target_keys_from_numeric_and_text() {
        let frame = df!(
            "Churn" => &[Some(1.0), None, Some(0.0)],
            "Label" => &["Yes", "No", "Yes"]
        )
        .unwrap();

        assert_eq!(target_keys(&frame, "Churn").unwrap(), vec!["1", "", "0"]);
        assert_eq!(target_keys(&frame, "Label").unwrap(), vec!["Yes", "No", "Yes"]);
        assert!(target_keys(&frame, "Exited").is_err());
    }

    #[test]
    fn test_mean_rate_ignores_missing() {
        assert_eq!(mean_rate(&[Some(1.0), None, Some(0.0)]), Some(0.5));
        assert_eq!(mean_rate(&[None]), None);
    }
}
