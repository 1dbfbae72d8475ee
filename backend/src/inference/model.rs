use log::{error, info};
use shared::ModelStatus;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::preprocess::PreprocessedTensor;

/// Anything that maps a preprocessed batch to one probability per class, in
/// `ClassLabel` order.
pub trait Classifier: Send + Sync {
    fn predict(&self, batch: &PreprocessedTensor) -> Result<Vec<f32>, InferenceError>;
}

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("Model is not loaded")]
    ModelUnavailable,
    #[cfg(feature = "torch")]
    #[error("Model error: {0}")]
    Model(String),
    #[error("Invalid model output: {0}")]
    InvalidOutput(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ModelLoadError {
    #[error("Model file not found at {}", .0.display())]
    FileMissing(PathBuf),
    #[cfg(feature = "torch")]
    #[error("Failed to load model from {}: {reason}", .path.display())]
    Backend { path: PathBuf, reason: String },
    #[cfg(not(feature = "torch"))]
    #[error("Built without the `torch` feature; cannot load {}", .0.display())]
    Unsupported(PathBuf),
}

/// The classifier loaded at startup, or the reason there is none.
#[derive(Clone)]
pub struct ModelHandle {
    classifier: Option<Arc<dyn Classifier>>,
    model_path: PathBuf,
    load_error: Option<String>,
}

impl ModelHandle {
    /// Loads once. Failure is logged and leaves the handle empty; it never
    /// aborts startup.
    pub fn load(model_path: &Path) -> Self {
        match load_classifier(model_path) {
            Ok(classifier) => {
                info!("Model loaded successfully from {}", model_path.display());
                Self {
                    classifier: Some(classifier),
                    model_path: model_path.to_path_buf(),
                    load_error: None,
                }
            }
            Err(e) => {
                error!("{}", e);
                Self {
                    classifier: None,
                    model_path: model_path.to_path_buf(),
                    load_error: Some(e.to_string()),
                }
            }
        }
    }

    #[cfg(test)]
    pub fn from_classifier(
        classifier: Arc<dyn Classifier>,
        model_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            classifier: Some(classifier),
            model_path: model_path.into(),
            load_error: None,
        }
    }

    pub fn classifier(&self) -> Result<&dyn Classifier, InferenceError> {
        self.classifier
            .as_deref()
            .ok_or(InferenceError::ModelUnavailable)
    }

    pub fn is_ready(&self) -> bool {
        self.classifier.is_some()
    }

    pub fn status(&self) -> ModelStatus {
        ModelStatus {
            ready: self.is_ready(),
            model_path: self.model_path.display().to_string(),
            error: self.load_error.clone(),
        }
    }
}

fn load_classifier(model_path: &Path) -> Result<Arc<dyn Classifier>, ModelLoadError> {
    if !model_path.exists() {
        return Err(ModelLoadError::FileMissing(model_path.to_path_buf()));
    }
    load_backend(model_path)
}

#[cfg(feature = "torch")]
fn load_backend(model_path: &Path) -> Result<Arc<dyn Classifier>, ModelLoadError> {
    Ok(Arc::new(super::torch::TorchClassifier::load(model_path)?))
}

#[cfg(not(feature = "torch"))]
fn load_backend(model_path: &Path) -> Result<Arc<dyn Classifier>, ModelLoadError> {
    Err(ModelLoadError::Unsupported(model_path.to_path_buf()))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use shared::CLASS_COUNT;

    /// Returns a fixed distribution regardless of input.
    pub(crate) struct FixedClassifier(pub Vec<f32>);

    impl FixedClassifier {
        /// `winner` gets `p`, the rest share `1 - p` evenly.
        pub(crate) fn favouring(winner: usize, p: f32) -> Self {
            let rest = (1.0 - p) / (CLASS_COUNT - 1) as f32;
            let mut scores = vec![rest; CLASS_COUNT];
            scores[winner] = p;
            Self(scores)
        }
    }

    impl Classifier for FixedClassifier {
        fn predict(&self, batch: &PreprocessedTensor) -> Result<Vec<f32>, InferenceError> {
            assert_eq!(batch.shape(), &[1, 32, 32, 3]);
            Ok(self.0.clone())
        }
    }

    #[test]
    fn missing_file_leaves_handle_empty() {
        let dir = tempfile::tempdir().unwrap();
        let handle = ModelHandle::load(&dir.path().join("absent.pt"));

        assert!(!handle.is_ready());
        assert!(matches!(
            handle.classifier().err(),
            Some(InferenceError::ModelUnavailable)
        ));
        let status = handle.status();
        assert!(!status.ready);
        assert!(status.error.unwrap().contains("not found"));
    }

    #[cfg(not(feature = "torch"))]
    #[test]
    fn existing_file_without_backend_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.pt");
        std::fs::write(&path, b"weights").unwrap();

        let handle = ModelHandle::load(&path);
        assert!(!handle.is_ready());
        assert!(handle.status().error.unwrap().contains("torch"));
    }

    #[test]
    fn injected_classifier_is_ready() {
        let handle = ModelHandle::from_classifier(
            Arc::new(FixedClassifier::favouring(3, 0.9)),
            "fake.pt",
        );
        assert!(handle.is_ready());
        let batch = PreprocessedTensor::zeros((1, 32, 32, 3));
        let scores = handle.classifier().unwrap().predict(&batch).unwrap();
        assert_eq!(scores.len(), CLASS_COUNT);
        assert_eq!(handle.status().model_path, "fake.pt");
    }
}
