//! Command-line interface definitions and argument parsing

use crate::config::PipelineConfig;
use crate::error::{ChurnError, Result};
use clap::Parser;
use std::path::PathBuf;

/// Customer churn analytics: clean, engineer, train, evaluate and report
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the raw customer CSV file
    #[arg(short, long, default_value = "data/raw/telco_churn.csv")]
    pub input: PathBuf,

    /// Base directory for processed data, reports and models
    #[arg(short, long, default_value = ".")]
    pub output_dir: PathBuf,

    /// Optional TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Name of the churn target column
    #[arg(short, long)]
    pub target: Option<String>,

    /// Held-out fraction of rows for the test set
    #[arg(long)]
    pub test_size: Option<f64>,

    /// Number of cross-validation folds
    #[arg(long)]
    pub cv_folds: Option<usize>,

    /// Random seed for splitting, sampling and model training
    #[arg(long)]
    pub seed: Option<u64>,

    /// Train on the raw class distribution instead of SMOTE-balanced data
    #[arg(long)]
    pub no_balance: bool,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    /// Configuration file (or defaults) with command-line overrides applied
    pub fn load_config(&self) -> Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_file(path)?,
            None => PipelineConfig::default(),
        };
        self.apply_overrides(&mut config)?;
        Ok(config)
    }

    /// Apply flag values on top of `config` and root the output layout at
    /// `--output-dir`
    pub fn apply_overrides(&self, config: &mut PipelineConfig) -> Result<()> {
        if let Some(target) = &self.target {
            config.columns.target = target.clone();
        }
        if let Some(test_size) = self.test_size {
            if !(test_size > 0.0 && test_size < 1.0) {
                return Err(ChurnError::invalid("test_size", test_size, "must be in (0, 1)"));
            }
            config.training.test_size = test_size;
        }
        if let Some(folds) = self.cv_folds {
            if folds < 2 {
                return Err(ChurnError::invalid("cv_folds", folds, "must be at least 2"));
            }
            config.training.cv_folds = folds;
        }
        if let Some(seed) = self.seed {
            config.training.seed = seed;
        }
        if self.no_balance {
            config.training.balance = false;
        }

        let output = &mut config.output;
        for dir in [
            &mut output.processed_dir,
            &mut output.metrics_dir,
            &mut output.figures_dir,
            &mut output.models_dir,
        ] {
            *dir = self.output_dir.join(&*dir);
        }
        Ok(())
    }
}
