use std::path::Path;
use std::sync::Mutex;
use tch::{CModule, Device, Kind, Tensor};

use super::model::{Classifier, InferenceError, ModelLoadError};
use super::preprocess::PreprocessedTensor;

/// TorchScript export of the CIFAR-10 network. Takes the NHWC batch as-is and
/// softmaxes the last dimension of its output.
pub struct TorchClassifier {
    model: Mutex<CModule>,
    device: Device,
}

impl TorchClassifier {
    pub fn load(model_path: &Path) -> Result<Self, ModelLoadError> {
        let device = Device::cuda_if_available();
        let model =
            CModule::load_on_device(model_path, device).map_err(|e| ModelLoadError::Backend {
                path: model_path.to_path_buf(),
                reason: e.to_string(),
            })?;
        log::info!("TorchScript module placed on {:?}", device);
        Ok(Self {
            model: Mutex::new(model),
            device,
        })
    }
}

impl Classifier for TorchClassifier {
    fn predict(&self, batch: &PreprocessedTensor) -> Result<Vec<f32>, InferenceError> {
        let shape: Vec<i64> = batch.shape().iter().map(|&d| d as i64).collect();
        let data = batch
            .as_slice()
            .ok_or_else(|| InferenceError::Model("input tensor is not contiguous".into()))?;
        let input = Tensor::from_slice(data)
            .view(shape.as_slice())
            .to_device(self.device);

        let model = self
            .model
            .lock()
            .map_err(|_| InferenceError::Model("model lock poisoned".into()))?;
        let output = tch::no_grad(|| model.forward_ts(&[input]))
            .map_err(|e| InferenceError::Model(e.to_string()))?;

        let output = output.softmax(-1, Kind::Float);
        let output_flat = output.to_device(Device::Cpu).view([-1]);
        let num_elements = output_flat.size()[0] as usize;
        let mut output_vec = vec![0.0f32; num_elements];
        output_flat.copy_data(&mut output_vec, num_elements);
        Ok(output_vec)
    }
}
