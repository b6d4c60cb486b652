//! Stratified splitting, class balancing, model fitting and cross-validation

use crate::config::TrainingConfig;
use crate::error::{ChurnError, Result};
use crate::evaluation::roc_auc;
use crate::model::{
    Classifier, GradientBoosting, LogisticRegression, ModelKind, RandomForest, TrainedModel,
};
use crate::sampling::Smote;
use ndarray::{Array1, Array2, Axis};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{error, info, warn};

/// Train/test partition of a feature matrix
#[derive(Debug, Clone)]
pub struct Split {
    pub x_train: Array2<f64>,
    pub x_test: Array2<f64>,
    pub y_train: Array1<usize>,
    pub y_test: Array1<usize>,
}

/// Cross-validated ROC-AUC of one model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CvScore {
    pub mean: f64,
    /// Population standard deviation across folds
    pub std: f64,
    pub scores: Vec<f64>,
}

impl CvScore {
    pub fn from_scores(scores: Vec<f64>) -> Self {
        let n = scores.len().max(1) as f64;
        let mean = scores.iter().sum::<f64>() / n;
        let var = scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n;
        Self {
            mean,
            std: var.sqrt(),
            scores,
        }
    }
}

fn group_by_label<T: Ord + Clone>(labels: &[T]) -> BTreeMap<T, Vec<usize>> {
    let mut groups: BTreeMap<T, Vec<usize>> = BTreeMap::new();
    for (i, label) in labels.iter().enumerate() {
        groups.entry(label.clone()).or_default().push(i);
    }
    groups
}

/// Split row positions into `(train, test)` keeping each label's share.
///
/// Every label with at least two rows contributes at least one row to each
/// side; both lists come back sorted.
pub fn stratified_split<T: Ord + Clone>(
    labels: &[T],
    test_size: f64,
    seed: u64,
) -> Result<(Vec<usize>, Vec<usize>)> {
    if !(test_size > 0.0 && test_size < 1.0) {
        return Err(ChurnError::invalid("test_size", test_size, "must be in (0, 1)"));
    }
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let (mut train, mut test) = (Vec::new(), Vec::new());
    for (_, mut rows) in group_by_label(labels) {
        rows.shuffle(&mut rng);
        let n = rows.len();
        let n_test = if n < 2 {
            0
        } else {
            ((n as f64 * test_size).round() as usize).clamp(1, n - 1)
        };
        test.extend_from_slice(&rows[..n_test]);
        train.extend_from_slice(&rows[n_test..]);
    }
    if train.is_empty() || test.is_empty() {
        return Err(ChurnError::invalid(
            "test_size",
            test_size,
            &format!("leaves an empty partition for {} rows", labels.len()),
        ));
    }
    train.sort_unstable();
    test.sort_unstable();
    Ok((train, test))
}

/// `k` stratified folds as `(train, test)` position lists
pub fn stratified_folds<T: Ord + Clone>(
    labels: &[T],
    k: usize,
    seed: u64,
) -> Result<Vec<(Vec<usize>, Vec<usize>)>> {
    if k < 2 {
        return Err(ChurnError::invalid("cv_folds", k, "must be at least 2"));
    }
    if labels.len() < k {
        return Err(ChurnError::invalid(
            "cv_folds",
            k,
            &format!("exceeds the {} available samples", labels.len()),
        ));
    }
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut assignment = vec![0usize; labels.len()];
    let mut next_fold = 0;
    for (_, mut rows) in group_by_label(labels) {
        rows.shuffle(&mut rng);
        for row in rows {
            assignment[row] = next_fold;
            next_fold = (next_fold + 1) % k;
        }
    }
    Ok((0..k)
        .map(|fold| {
            let (test, train): (Vec<usize>, Vec<usize>) =
                (0..labels.len()).partition(|&i| assignment[i] == fold);
            (train, test)
        })
        .collect())
}

/// Trains the fixed model set and keeps the fitted models by name
#[derive(Debug, Clone, Default)]
pub struct ChurnModelTrainer {
    config: TrainingConfig,
    models: Vec<TrainedModel>,
}

impl ChurnModelTrainer {
    pub fn new(config: TrainingConfig) -> Self {
        Self {
            config,
            models: Vec::new(),
        }
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Fitted models in training order
    pub fn models(&self) -> &[TrainedModel] {
        &self.models
    }

    pub fn model(&self, name: &str) -> Option<&TrainedModel> {
        self.models.iter().find(|m| m.kind().name() == name)
    }

    pub fn model_names(&self) -> Vec<&'static str> {
        self.models.iter().map(|m| m.kind().name()).collect()
    }

    /// Stratified train/test split of a bare matrix
    pub fn prepare_data(&self, x: &Array2<f64>, y: &Array1<usize>) -> Result<Split> {
        if x.nrows() != y.len() {
            return Err(ChurnError::LengthMismatch {
                features: x.nrows(),
                labels: y.len(),
            });
        }
        info!("Splitting data into train and test sets");
        let labels = y.to_vec();
        let (train, test) = stratified_split(&labels, self.config.test_size, self.config.seed)?;
        info!(train = train.len(), test = test.len(), "Split complete");
        Ok(Split {
            x_train: x.select(Axis(0), &train),
            x_test: x.select(Axis(0), &test),
            y_train: y.select(Axis(0), &train),
            y_test: y.select(Axis(0), &test),
        })
    }

    /// SMOTE on the training partition; on failure the input comes back unchanged
    pub fn handle_imbalance(&self, x: &Array2<f64>, y: &Array1<usize>) -> (Array2<f64>, Array1<usize>) {
        let x = x.mapv(|v| if v.is_nan() { 0.0 } else { v });
        let smote = Smote::new(self.config.smote_k, self.config.seed);
        match smote.fit_resample(&x, y) {
            Ok((x_res, y_res)) => {
                info!("Applied SMOTE: {} -> {} samples", y.len(), y_res.len());
                (x_res, y_res)
            }
            Err(e) => {
                error!("SMOTE failed: {e}");
                warn!("Returning original data without balancing");
                (x, y.clone())
            }
        }
    }

    /// Unfitted model of `kind` with the configured hyperparameters
    pub fn build_model(&self, kind: ModelKind) -> TrainedModel {
        let seed = self.config.seed;
        match kind {
            ModelKind::RandomForest => {
                TrainedModel::RandomForest(RandomForest::new(self.config.random_forest.clone(), seed))
            }
            ModelKind::LogisticRegression => {
                TrainedModel::LogisticRegression(LogisticRegression::new(self.config.logistic.clone()))
            }
            ModelKind::GradientBoosting => TrainedModel::GradientBoosting(GradientBoosting::new(
                self.config.gradient_boosting.clone(),
                seed,
            )),
        }
    }

    fn train(&mut self, kind: ModelKind, x: &Array2<f64>, y: &Array1<usize>) -> Result<&TrainedModel> {
        info!("Training {kind}");
        let mut model = self.build_model(kind);
        model.fit(x, y)?;
        info!("{kind} trained");

        self.models.retain(|m| m.kind() != kind);
        self.models.push(model);
        self.models
            .last()
            .ok_or_else(|| ChurnError::Training(format!("{kind} missing after fit")))
    }

    pub fn train_random_forest(&mut self, x: &Array2<f64>, y: &Array1<usize>) -> Result<&TrainedModel> {
        self.train(ModelKind::RandomForest, x, y)
    }

    pub fn train_logistic_regression(&mut self, x: &Array2<f64>, y: &Array1<usize>) -> Result<&TrainedModel> {
        self.train(ModelKind::LogisticRegression, x, y)
    }

    pub fn train_gradient_boosting(&mut self, x: &Array2<f64>, y: &Array1<usize>) -> Result<&TrainedModel> {
        self.train(ModelKind::GradientBoosting, x, y)
    }

    /// Balance the training data when configured, then fit every model.
    ///
    /// Returns the (possibly resampled) training data the models saw.
    pub fn train_all_models(
        &mut self,
        x_train: &Array2<f64>,
        y_train: &Array1<usize>,
    ) -> Result<(Array2<f64>, Array1<usize>)> {
        info!("Training all models");
        let (x, y) = if self.config.balance {
            self.handle_imbalance(x_train, y_train)
        } else {
            (x_train.clone(), y_train.clone())
        };
        for kind in ModelKind::ALL {
            self.train(kind, &x, &y)?;
        }
        info!("Trained {} models", self.models.len());
        Ok((x, y))
    }

    /// Stratified k-fold ROC-AUC for every trained model's configuration.
    ///
    /// A model whose folds fail is logged and left out of the result.
    pub fn cross_validate(&self, x: &Array2<f64>, y: &Array1<usize>, k: usize) -> Result<Vec<(ModelKind, CvScore)>> {
        info!("Running {k}-fold cross-validation");
        if x.nrows() != y.len() {
            return Err(ChurnError::LengthMismatch {
                features: x.nrows(),
                labels: y.len(),
            });
        }
        let x = x.mapv(|v| if v.is_nan() { 0.0 } else { v });
        let folds = stratified_folds(&y.to_vec(), k, self.config.seed)?;

        let mut results = Vec::with_capacity(self.models.len());
        for trained in &self.models {
            let kind = trained.kind();
            match cross_val_auc(trained, &x, y, &folds) {
                Ok(scores) => {
                    let score = CvScore::from_scores(scores);
                    info!("{kind}: ROC-AUC = {:.4} (+/- {:.4})", score.mean, score.std);
                    results.push((kind, score));
                }
                Err(e) => warn!("Cross-validation failed for {kind}: {e}"),
            }
        }
        Ok(results)
    }
}

fn cross_val_auc(
    template: &TrainedModel,
    x: &Array2<f64>,
    y: &Array1<usize>,
    folds: &[(Vec<usize>, Vec<usize>)],
) -> Result<Vec<f64>> {
    folds
        .iter()
        .map(|(train, test)| {
            let mut model = template.unfitted();
            model.fit(&x.select(Axis(0), train), &y.select(Axis(0), train))?;
            let proba = model.predict_proba(&x.select(Axis(0), test))?;
            roc_auc(&y.select(Axis(0), test), &proba)
        })
        .collect()
}
