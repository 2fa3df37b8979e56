use anyhow::{anyhow, Result};

use crate::detect::backend::{ClassifierBackend, ModelShape};
use crate::detect::preprocess::{InputSpec, InputTensor};

/// Stub backend for demos and tests. Returns a fixed output vector.
pub struct StubBackend {
    output: Vec<f32>,
    spec: InputSpec,
}

impl StubBackend {
    pub fn new(output: Vec<f32>, spec: InputSpec) -> Self {
        Self { output, spec }
    }
}

impl ClassifierBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn input_spec(&self) -> InputSpec {
        self.spec
    }

    fn infer(&self, input: &InputTensor) -> Result<Vec<f32>> {
        if input.shape != self.spec.shape() {
            return Err(anyhow!(
                "input shape {:?} does not match stub input {:?}",
                input.shape,
                self.spec.shape()
            ));
        }
        Ok(self.output.clone())
    }

    fn shape(&self) -> ModelShape {
        ModelShape {
            input_shape: self.spec.shape().iter().map(|d| Some(*d)).collect(),
            output_shape: vec![Some(1), Some(self.output.len())],
            total_params: Some(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::preprocess::{ChannelOrder, TensorLayout};

    #[test]
    fn stub_backend_checks_input_shape() {
        let spec = InputSpec {
            size: 2,
            layout: TensorLayout::Nhwc,
            channel_order: ChannelOrder::Rgb,
        };
        let backend = StubBackend::new(vec![0.2, 0.8], spec);

        let good = InputTensor {
            shape: [1, 2, 2, 3],
            data: vec![0.0; 12],
        };
        assert_eq!(backend.infer(&good).unwrap(), vec![0.2, 0.8]);

        let bad = InputTensor {
            shape: [1, 3, 2, 2],
            data: vec![0.0; 12],
        };
        assert!(backend.infer(&bad).is_err());
        assert_eq!(backend.shape().output_shape, vec![Some(1), Some(2)]);
    }
}
