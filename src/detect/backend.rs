use anyhow::Result;

use super::preprocess::{InputSpec, InputTensor};

/// Shape and size metadata reported by `/model_info`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ModelShape {
    pub input_shape: Vec<Option<usize>>,
    pub output_shape: Vec<Option<usize>>,
    pub total_params: Option<u64>,
}

/// Classifier backend trait.
///
/// A backend is a black box: it receives a preprocessed tensor and returns
/// one raw score per class. It is loaded once and shared read-only across
/// every stream worker, hence `&self` and `Send + Sync`.
pub trait ClassifierBackend: Send + Sync {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Input the backend expects.
    fn input_spec(&self) -> InputSpec;

    /// Run inference. Returns one score per output class.
    fn infer(&self, input: &InputTensor) -> Result<Vec<f32>>;

    fn shape(&self) -> ModelShape {
        let spec = self.input_spec();
        ModelShape {
            input_shape: spec.shape().iter().map(|d| Some(*d)).collect(),
            output_shape: Vec::new(),
            total_params: None,
        }
    }

    /// Short name of the framework behind the backend.
    fn framework(&self) -> &'static str {
        self.name()
    }
}
