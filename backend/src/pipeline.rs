use image::ImageFormat;
use log::{error, info, warn};
use std::path::PathBuf;

use crate::inference::model::{InferenceError, ModelHandle};
use crate::inference::preprocess::{self, PreprocessError, Preprocessed};
use crate::inference::result::ClassificationResult;
use crate::storage::local_service::{LocalStorage, StorageError};
use crate::timer::Timer;

pub struct UploadedImage {
    pub filename: String,
    pub data: Vec<u8>,
}

#[derive(Debug)]
pub struct ClassificationReport {
    pub filename: String,
    pub result: ClassificationResult,
    pub processed_path: Option<PathBuf>,
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Invalid filename: {0:?}")]
    InvalidFilename(String),
    #[error("Upload of {size} bytes exceeds limit of {limit}")]
    TooLarge { size: usize, limit: usize },
    #[error("Failed to store upload: {0}")]
    Storage(#[source] StorageError),
    #[error("{0}")]
    ImageDecode(#[source] PreprocessError),
    #[error("Model is not loaded")]
    ModelUnavailable,
    #[error("Inference failed: {0}")]
    Inference(#[source] InferenceError),
    #[error("Failed to write processed image: {0}")]
    Artifact(String),
}

impl From<StorageError> for PipelineError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::InvalidFilename(name) => PipelineError::InvalidFilename(name),
            StorageError::FileTooLarge { size, limit } => PipelineError::TooLarge { size, limit },
            other => PipelineError::Storage(other),
        }
    }
}

impl From<InferenceError> for PipelineError {
    fn from(err: InferenceError) -> Self {
        match err {
            InferenceError::ModelUnavailable => PipelineError::ModelUnavailable,
            other => PipelineError::Inference(other),
        }
    }
}

impl PipelineError {
    /// Message safe to show the uploader; details stay in the log.
    pub fn client_message(&self) -> String {
        match self {
            PipelineError::InvalidFilename(_) => "Invalid filename".to_string(),
            PipelineError::TooLarge { limit, .. } => {
                format!("File too large (limit is {} bytes)", limit)
            }
            PipelineError::Storage(_) => "Failed to store image".to_string(),
            PipelineError::ImageDecode(_) | PipelineError::Artifact(_) => {
                "Error processing image".to_string()
            }
            PipelineError::ModelUnavailable => "Model is not available".to_string(),
            PipelineError::Inference(_) => "Error classifying image".to_string(),
        }
    }
}

/// received -> stored-raw -> preprocessed -> classified -> [stored-processed]
/// -> reported. Any failure ends the run.
#[derive(Clone)]
pub struct UploadPipeline {
    storage: LocalStorage,
    model: ModelHandle,
    save_processed: bool,
}

impl UploadPipeline {
    pub fn new(storage: LocalStorage, model: ModelHandle, save_processed: bool) -> Self {
        Self {
            storage,
            model,
            save_processed,
        }
    }

    pub fn storage(&self) -> &LocalStorage {
        &self.storage
    }

    pub fn model(&self) -> &ModelHandle {
        &self.model
    }

    pub fn process(&self, upload: UploadedImage) -> Result<ClassificationReport, PipelineError> {
        info!(
            "Received upload {} ({} bytes)",
            upload.filename,
            upload.data.len()
        );
        let t = Timer::start("Upload pipeline");
        let report = self.run(&upload);
        let elapsed = t.stop();

        match &report {
            Ok(report) => {
                info!(
                    "Upload {} classified in {} msec",
                    upload.filename,
                    elapsed.as_millis()
                );
                if let Some(path) = &report.processed_path {
                    info!("Processed image saved to {}", path.display());
                }
            }
            Err(e) => error!("Error processing upload {}: {}", upload.filename, e),
        }
        report
    }

    fn run(&self, upload: &UploadedImage) -> Result<ClassificationReport, PipelineError> {
        let filename = upload.filename.as_str();
        self.storage.write_raw(filename, &upload.data)?;

        let t = Timer::start("Preprocessing");
        let preprocessed =
            preprocess::preprocess(&upload.data).map_err(PipelineError::ImageDecode)?;
        t.stop();

        let classifier = self.model.classifier()?;
        let t = Timer::start("Classification");
        let predictions = classifier.predict(&preprocessed.tensor)?;
        t.stop();
        info!("Predictions: {:?}", predictions);

        let result = ClassificationResult::from_probabilities(&predictions)?;
        info!(
            "Predicted class: {} with probability {}",
            result.predicted, result.probability
        );

        let processed_path = if self.save_processed {
            Some(self.store_processed(filename, &preprocessed)?)
        } else {
            None
        };

        Ok(ClassificationReport {
            filename: filename.to_string(),
            result,
            processed_path,
        })
    }

    /// Writes the model's view of the image in the upload's own format, or as
    /// PNG when that format is unknown or cannot hold 8-bit RGB.
    fn store_processed(
        &self,
        filename: &str,
        preprocessed: &Preprocessed,
    ) -> Result<PathBuf, PipelineError> {
        let image = preprocess::to_image(&preprocessed.tensor)
            .map_err(|e| PipelineError::Artifact(e.to_string()))?;
        let encoded = match preprocessed.format {
            Some(format) if format != ImageFormat::Png => {
                preprocess::encode(&image, format).or_else(|e| {
                    warn!(
                        "Cannot write {} as {:?} ({}); saving it as PNG",
                        filename, format, e
                    );
                    preprocess::encode(&image, ImageFormat::Png)
                })
            }
            _ => preprocess::encode(&image, ImageFormat::Png),
        };
        let bytes = encoded.map_err(|e| PipelineError::Artifact(e.to_string()))?;
        self.storage
            .write_processed(filename, &bytes)
            .map_err(|e| PipelineError::Artifact(e.to_string()))
    }
}
