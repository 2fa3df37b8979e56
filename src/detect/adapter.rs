use anyhow::{anyhow, Result};
use image::RgbImage;
use serde::Serialize;

use crate::config::{ModelBackendKind, ModelSettings, OutputKind};
use crate::error::DetectError;

use super::backend::ClassifierBackend;
use super::backends::StubBackend;
use super::preprocess::{preprocess, InputSpec};
use super::result::{round3, ClassProbability, Classification, Detection, FULL_IMAGE};

/// Wraps the pretrained classifier.
///
/// `classify` never fails: a model that did not load, or any error during
/// preprocessing or inference, yields an empty `Classification` and a log line.
pub struct InferenceAdapter {
    backend: Option<Box<dyn ClassifierBackend>>,
    classes: Vec<String>,
    background_class: String,
    output: OutputKind,
}

#[derive(Clone, Debug, Serialize)]
pub struct ModelInfo {
    pub model_loaded: bool,
    pub model_type: &'static str,
    pub model_framework: &'static str,
    pub backend: &'static str,
    pub classes: Vec<String>,
    pub num_classes: usize,
    pub input_shape: Vec<Option<usize>>,
    pub output_shape: Vec<Option<usize>>,
    pub total_params: Option<u64>,
}

impl InferenceAdapter {
    /// Load the configured backend. A load failure is logged and leaves the
    /// adapter in the degraded (unloaded) state.
    pub fn load(settings: &ModelSettings) -> Self {
        let backend = match load_backend(settings) {
            Ok(backend) => {
                log::info!(
                    "model loaded: backend={} classes={:?}",
                    backend.name(),
                    settings.classes
                );
                Some(backend)
            }
            Err(err) => {
                log::error!("critical: failed to load model: {:#}", err);
                None
            }
        };
        Self {
            backend,
            classes: settings.classes.clone(),
            background_class: settings.background_class.clone(),
            output: settings.output,
        }
    }

    pub fn with_backend<B: ClassifierBackend + 'static>(
        backend: B,
        classes: Vec<String>,
        background_class: impl Into<String>,
    ) -> Self {
        Self {
            backend: Some(Box::new(backend)),
            classes,
            background_class: background_class.into(),
            output: OutputKind::Probabilities,
        }
    }

    pub fn unloaded(classes: Vec<String>, background_class: impl Into<String>) -> Self {
        Self {
            backend: None,
            classes,
            background_class: background_class.into(),
            output: OutputKind::Probabilities,
        }
    }

    pub fn with_output(mut self, output: OutputKind) -> Self {
        self.output = output;
        self
    }

    pub fn is_loaded(&self) -> bool {
        self.backend.is_some()
    }

    pub fn require_loaded(&self) -> Result<(), DetectError> {
        if self.is_loaded() {
            Ok(())
        } else {
            Err(DetectError::ModelUnavailable)
        }
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn is_background(&self, class_name: &str) -> bool {
        class_name.eq_ignore_ascii_case(&self.background_class)
    }

    /// Classify the whole frame.
    pub fn classify(&self, frame: &RgbImage, confidence_threshold: f32) -> Classification {
        let Some(backend) = self.backend.as_deref() else {
            log::warn!("model is not loaded, skipping classification");
            return Classification::empty();
        };
        match self.try_classify(backend, frame, confidence_threshold) {
            Ok(result) => result,
            Err(err) => {
                log::error!("error during classification: {:#}", err);
                Classification::empty()
            }
        }
    }

    fn try_classify(
        &self,
        backend: &dyn ClassifierBackend,
        frame: &RgbImage,
        confidence_threshold: f32,
    ) -> Result<Classification> {
        let input = preprocess(frame, &backend.input_spec())?;
        let raw = backend.infer(&input)?;
        let scores = match self.output {
            OutputKind::Probabilities => raw,
            OutputKind::Logits => softmax(&raw),
        };
        let result = classification_from_scores(
            &scores,
            &self.classes,
            confidence_threshold,
            frame.width(),
            frame.height(),
        )?;
        if let Some(top) = result.detections.first() {
            log::debug!(
                "classification: predicted={} confidence={:.3}",
                top.class_name,
                top.confidence
            );
        }
        Ok(result)
    }

    pub fn model_info(&self) -> Option<ModelInfo> {
        let backend = self.backend.as_deref()?;
        let shape = backend.shape();
        Some(ModelInfo {
            model_loaded: true,
            model_type: "classification",
            model_framework: backend.framework(),
            backend: backend.name(),
            classes: self.classes.clone(),
            num_classes: self.classes.len(),
            input_shape: shape.input_shape,
            output_shape: shape.output_shape,
            total_params: shape.total_params,
        })
    }
}

fn load_backend(settings: &ModelSettings) -> Result<Box<dyn ClassifierBackend>> {
    let spec = InputSpec {
        size: settings.input_size,
        layout: settings.layout,
        channel_order: settings.channel_order,
    };
    match settings.backend {
        ModelBackendKind::Stub => Ok(Box::new(StubBackend::new(
            settings.stub_output.clone(),
            spec,
        ))),
        ModelBackendKind::Tract => load_tract(settings, spec),
    }
}

#[cfg(feature = "backend-tract")]
fn load_tract(settings: &ModelSettings, spec: InputSpec) -> Result<Box<dyn ClassifierBackend>> {
    let backend = super::backends::TractBackend::new(&settings.path, spec)?;
    Ok(Box::new(backend))
}

#[cfg(not(feature = "backend-tract"))]
fn load_tract(settings: &ModelSettings, _spec: InputSpec) -> Result<Box<dyn ClassifierBackend>> {
    Err(anyhow!(
        "model {} requires the backend-tract feature",
        settings.path.display()
    ))
}

/// Build the classification result from per-class scores.
///
/// One detection is produced iff the arg-max score is >= `confidence_threshold`.
pub fn classification_from_scores(
    scores: &[f32],
    classes: &[String],
    confidence_threshold: f32,
    width: u32,
    height: u32,
) -> Result<Classification> {
    if scores.is_empty() {
        return Err(anyhow!("model produced an empty output vector"));
    }
    if scores.iter().any(|s| !s.is_finite()) {
        return Err(anyhow!("model produced non-finite scores"));
    }

    let mut best = 0usize;
    for (idx, score) in scores.iter().enumerate() {
        if *score > scores[best] {
            best = idx;
        }
    }
    let confidence = scores[best];

    let mut detections = Vec::new();
    if confidence >= confidence_threshold {
        detections.push(Detection {
            bbox: [0, 0, width, height],
            confidence: round3(confidence),
            class_name: class_name(classes, best),
            class_id: best,
            classification_type: FULL_IMAGE.to_string(),
        });
    }

    let all_predictions = scores
        .iter()
        .enumerate()
        .map(|(idx, prob)| ClassProbability {
            class_name: class_name(classes, idx),
            class_id: idx,
            probability: round3(*prob),
        })
        .collect();

    Ok(Classification {
        detections,
        all_predictions,
    })
}

fn class_name(classes: &[String], idx: usize) -> String {
    classes
        .get(idx)
        .cloned()
        .unwrap_or_else(|| format!("class_{}", idx))
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|v| v / sum).collect()
}
