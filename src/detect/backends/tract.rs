#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;
use tract_onnx::tract_hir::internal::DimLike;

use crate::detect::backend::{ClassifierBackend, ModelShape};
use crate::detect::preprocess::{InputSpec, InputTensor};

/// Tract-based backend for ONNX classifiers.
///
/// Loads a local model file once and runs it on preprocessed frames. The plan
/// is immutable after load and shared between stream workers.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>,
    spec: InputSpec,
    shape: ModelShape,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, spec: InputSpec) -> Result<Self> {
        let model_path = model_path.as_ref();
        let input_shape = spec.shape();
        let typed = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(
                    input_shape[0],
                    input_shape[1],
                    input_shape[2],
                    input_shape[3]
                )),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?;

        let shape = ModelShape {
            input_shape: input_shape.iter().map(|d| Some(*d)).collect(),
            output_shape: output_dims(&typed),
            total_params: Some(count_params(&typed)),
        };

        let model = typed
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self { model, spec, shape })
    }

    fn build_input(&self, input: &InputTensor) -> Result<Tensor> {
        let expected = self.spec.shape();
        if input.shape != expected {
            return Err(anyhow!(
                "input shape {:?} does not match model input {:?}",
                input.shape,
                expected
            ));
        }
        let tensor = Tensor::from_shape(&input.shape, &input.data)
            .context("failed to build input tensor")?;
        Ok(tensor)
    }
}

fn output_dims(model: &TypedModel) -> Vec<Option<usize>> {
    match model.output_fact(0) {
        Ok(fact) => fact.shape.iter().map(|d| d.to_usize().ok()).collect(),
        Err(_) => Vec::new(),
    }
}

/// Total element count of constant (weight) tensors in the graph.
fn count_params(model: &TypedModel) -> u64 {
    model
        .nodes()
        .iter()
        .filter(|node| node.inputs.is_empty())
        .filter_map(|node| node.outputs.first())
        .filter_map(|outlet| outlet.fact.konst.as_ref())
        .map(|tensor| tensor.len() as u64)
        .sum()
}

impl ClassifierBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn input_spec(&self) -> InputSpec {
        self.spec
    }

    fn infer(&self, input: &InputTensor) -> Result<Vec<f32>> {
        let tensor = self.build_input(input)?;
        let outputs = self
            .model
            .run(tvec!(tensor.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let scores = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        Ok(scores.iter().copied().collect())
    }

    fn shape(&self) -> ModelShape {
        self.shape.clone()
    }

    fn framework(&self) -> &'static str {
        "onnx"
    }
}
