use shared::{CLASS_COUNT, ClassLabel, ClassificationResponse, ProbabilityTable};

use super::model::InferenceError;

const SUM_TOLERANCE: f32 = 1e-4;

#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationResult {
    pub predicted: ClassLabel,
    pub probability: f32,
    pub probabilities: ProbabilityTable,
}

impl ClassificationResult {
    /// Checks the classifier output is a distribution over the ten labels and
    /// picks the top one.
    pub fn from_probabilities(predictions: &[f32]) -> Result<Self, InferenceError> {
        if predictions.len() != CLASS_COUNT {
            return Err(InferenceError::InvalidOutput(format!(
                "expected {} probabilities, got {}",
                CLASS_COUNT,
                predictions.len()
            )));
        }
        if let Some(bad) = predictions.iter().find(|p| !p.is_finite() || **p < 0.0) {
            return Err(InferenceError::InvalidOutput(format!(
                "probability out of range: {}",
                bad
            )));
        }
        let total: f32 = predictions.iter().sum();
        if (total - 1.0).abs() > SUM_TOLERANCE {
            return Err(InferenceError::InvalidOutput(format!(
                "probabilities sum to {}",
                total
            )));
        }

        let probabilities = ProbabilityTable::from_scores(predictions)
            .ok_or_else(|| InferenceError::InvalidOutput("label count mismatch".into()))?;
        let (predicted, probability) = probabilities.top();

        Ok(Self {
            predicted,
            probability,
            probabilities,
        })
    }

    pub fn into_response(self, filename: String) -> ClassificationResponse {
        ClassificationResponse {
            filename,
            predicted_class: self.predicted,
            probability: self.probability,
            probabilities: self.probabilities,
        }
    }
}
