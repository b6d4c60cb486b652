//! ChurnForge: customer churn analytics on subscription records
//!
//! The library cleans raw customer tables, derives churn-oriented features,
//! encodes and scales them into a model matrix, and trains, evaluates and
//! saves a fixed set of binary classifiers.

pub mod cli;
pub mod config;
pub mod data;
pub mod error;
pub mod evaluation;
pub mod features;
pub mod model;
pub mod persist;
pub mod preprocess;
pub mod sampling;
pub mod training;
pub mod viz;

// Re-export public items for easier access
pub use cli::Args;
pub use config::{PipelineConfig, UnmappedTargetPolicy};
pub use data::{load_dataframe, save_dataframe};
pub use error::{ChurnError, Result};
pub use evaluation::{compare_models, evaluate_model, ModelMetrics};
pub use features::{FeatureEngineer, FeatureSummary};
pub use model::{Classifier, ModelKind, TrainedModel};
pub use persist::{load_model, ModelArtifact};
pub use preprocess::{PreprocessState, Prepared, Preprocessor};
pub use training::{stratified_split, ChurnModelTrainer};
