//! Model artifacts on disk: JSON, optionally zstd-compressed

use crate::error::{ChurnError, Result};
use crate::model::TrainedModel;
use crate::training::ChurnModelTrainer;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

pub const ARTIFACT_VERSION: &str = "1.0.0";

/// Extensions accepted for model files
pub const MODEL_EXTENSIONS: [&str; 2] = ["json", "zst"];

const ZSTD_MAGIC: [u8; 4] = [0x28, 0xb5, 0x2f, 0xfd];
const MAX_ZSTD_LEVEL: i32 = 22;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub model_name: String,
    pub saved_at: DateTime<Utc>,
    pub model_type: String,
    pub version: String,
}

impl ModelMetadata {
    pub fn for_model(model_name: &str, model: &TrainedModel) -> Self {
        Self {
            model_name: model_name.to_string(),
            saved_at: Utc::now(),
            model_type: model.type_name().to_string(),
            version: ARTIFACT_VERSION.to_string(),
        }
    }
}

/// A saved model and, unless saved without it, its metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub model: TrainedModel,
    pub metadata: Option<ModelMetadata>,
}

/// On-disk layouts; files holding only the model predate metadata
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredModel {
    Artifact(ModelArtifact),
    Legacy(TrainedModel),
}

/// Replace an unsupported extension with `.json`
pub fn normalize_model_path(path: &Path) -> PathBuf {
    let supported = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| MODEL_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false);
    if supported {
        return path.to_path_buf();
    }
    let normalized = path.with_extension("json");
    warn!(
        given = %path.display(),
        using = %normalized.display(),
        "Model file extension should be .json or .zst"
    );
    normalized
}

/// Serialize `artifact` to `path`; `compress` is the zstd level, 0 for plain JSON
pub fn write_artifact(artifact: &ModelArtifact, path: &Path, compress: i32) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_vec(artifact)?;
    let bytes = if compress > 0 {
        zstd::encode_all(json.as_slice(), compress.min(MAX_ZSTD_LEVEL))?
    } else {
        json
    };
    fs::write(path, bytes)?;
    Ok(())
}

pub fn read_artifact(path: &Path) -> Result<ModelArtifact> {
    if !path.exists() {
        return Err(ChurnError::MissingFile(path.to_path_buf()));
    }
    let raw = fs::read(path)?;
    let json = if raw.starts_with(&ZSTD_MAGIC) {
        zstd::decode_all(raw.as_slice())?
    } else {
        raw
    };
    Ok(match serde_json::from_slice::<StoredModel>(&json)? {
        StoredModel::Artifact(artifact) => artifact,
        StoredModel::Legacy(model) => ModelArtifact {
            model,
            metadata: None,
        },
    })
}

impl ChurnModelTrainer {
    /// Save a trained model by name. Returns `false` (after logging) when the
    /// name is unknown or writing fails.
    pub fn save_model(
        &self,
        model_name: &str,
        filepath: impl AsRef<Path>,
        compress: i32,
        save_metadata: bool,
    ) -> bool {
        let Some(model) = self.model(model_name) else {
            error!(
                "Model '{model_name}' not found. Available models: {:?}",
                self.model_names()
            );
            return false;
        };
        let path = normalize_model_path(filepath.as_ref());
        let artifact = ModelArtifact {
            model: model.clone(),
            metadata: save_metadata.then(|| ModelMetadata::for_model(model_name, model)),
        };

        match write_artifact(&artifact, &path, compress) {
            Ok(()) => {
                info!(path = %path.display(), "Model '{model_name}' successfully saved");
                if let Some(metadata) = &artifact.metadata {
                    debug!(?metadata, "Model metadata");
                }
                true
            }
            Err(e) => {
                error!(path = %path.display(), "Failed to save model '{model_name}': {e}");
                false
            }
        }
    }
}

/// Load a model artifact, or `None` (after logging) when it cannot be read
pub fn load_model(filepath: impl AsRef<Path>) -> Option<ModelArtifact> {
    let path = filepath.as_ref();
    match read_artifact(path) {
        Ok(artifact) => {
            info!(path = %path.display(), "Model loaded");
            if let Some(metadata) = &artifact.metadata {
                info!(
                    model_name = %metadata.model_name,
                    model_type = %metadata.model_type,
                    saved_at = %metadata.saved_at.to_rfc3339(),
                    "Model metadata"
                );
            }
            Some(artifact)
        }
        Err(e) => {
            error!(path = %path.display(), "Failed to load model: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrainingConfig;
    use crate::model::Classifier;
    use ndarray::array;

    fn trained() -> ChurnModelTrainer {
        let mut trainer = ChurnModelTrainer::new(TrainingConfig::default());
        trainer
            .train_logistic_regression(
                &array![[0.0, 1.0], [1.0, 0.0], [2.0, 1.0], [3.0, 0.0]],
                &array![0, 0, 1, 1],
            )
            .unwrap();
        trainer
    }

    #[test]
    fn test_save_and_load_compressed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models").join("best.zst");
        let trainer = trained();
        assert!(trainer.save_model("Logistic Regression", &path, 3, true));

        let raw = fs::read(&path).unwrap();
        assert!(raw.starts_with(&ZSTD_MAGIC));

        let artifact = load_model(&path).unwrap();
        let metadata = artifact.metadata.unwrap();
        assert_eq!(metadata.model_name, "Logistic Regression");
        assert_eq!(metadata.model_type, "LogisticRegression");
        assert_eq!(metadata.version, ARTIFACT_VERSION);

        let x = array![[0.5, 0.5], [2.5, 0.5]];
        let original = trainer.model("Logistic Regression").unwrap();
        let loaded = artifact.model.predict_proba(&x).unwrap();
        let expected = original.predict_proba(&x).unwrap();
        assert!(loaded.iter().zip(expected.iter()).all(|(a, b)| (a - b).abs() < 1e-9));
    }

    #[test]
    fn test_unknown_model_name_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        assert!(!trained().save_model("Random Forest", &path, 0, true));
        assert!(!path.exists());
    }

    #[test]
    fn test_unsupported_extension_becomes_json() {
        let dir = tempfile::tempdir().unwrap();
        let trainer = trained();
        assert!(trainer.save_model("Logistic Regression", dir.path().join("model.pkl"), 0, false));

        let saved = dir.path().join("model.json");
        assert!(saved.exists());
        let artifact = load_model(&saved).unwrap();
        assert!(artifact.metadata.is_none());
    }

    #[test]
    fn test_legacy_bare_model_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("legacy.json");
        let model = trained().model("Logistic Regression").unwrap().clone();
        fs::write(&path, serde_json::to_vec(&model).unwrap()).unwrap();

        let artifact = load_model(&path).unwrap();
        assert!(artifact.metadata.is_none());
        assert!(artifact.model.is_fitted());
    }

    #[test]
    fn test_missing_file_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_model(dir.path().join("absent.json")).is_none());
        assert!(matches!(
            read_artifact(&dir.path().join("absent.json")),
            Err(ChurnError::MissingFile(_))
        ));
    }
}
