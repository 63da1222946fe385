#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::InferenceEngine;
use crate::detect::labels::LabelMap;
use crate::detect::result::RawDetections;
use crate::preprocess::{Tensor as InputTensor, TensorData};

/// Settings for loading a `TractEngine`.
#[derive(Clone, Debug)]
pub struct TractSettings {
    pub input_width: u32,
    pub input_height: u32,
    pub floating: bool,
    pub min_conf_threshold: f32,
}

/// Tract-based engine for SSD-style ONNX detectors.
///
/// The model takes one NHWC image tensor (`u8`, or `f32` when floating) and
/// produces post-processed outputs in the order boxes `[1, N, 4]`,
/// classes `[1, N]`, scores `[1, N]`. A trailing count output is ignored.
/// No network I/O and no disk access beyond model loading.
pub struct TractEngine {
    model: TypedRunnableModel<TypedModel>,
    settings: TractSettings,
    labels: LabelMap,
}

impl TractEngine {
    pub fn new<P: AsRef<Path>>(model_path: P, settings: TractSettings, labels: LabelMap) -> Result<Self> {
        let model_path = model_path.as_ref();
        let datum = if settings.floating {
            f32::datum_type()
        } else {
            u8::datum_type()
        };
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    datum,
                    tvec!(
                        1,
                        settings.input_height as usize,
                        settings.input_width as usize,
                        3
                    ),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            settings,
            labels,
        })
    }

    fn build_input(&self, tensor: &InputTensor) -> Result<tract_onnx::prelude::Tensor> {
        let [n, h, w, c] = tensor.shape();
        let input = match tensor.data() {
            TensorData::U8(data) => {
                tract_ndarray::Array4::from_shape_vec((n, h, w, c), data.clone())
                    .context("u8 input does not match its shape")?
                    .into_tensor()
            }
            TensorData::F32(data) => {
                tract_ndarray::Array4::from_shape_vec((n, h, w, c), data.clone())
                    .context("f32 input does not match its shape")?
                    .into_tensor()
            }
        };
        Ok(input)
    }

    fn extract(&self, outputs: TVec<TValue>) -> Result<RawDetections> {
        if outputs.len() < 3 {
            return Err(anyhow!(
                "model produced {} outputs, expected boxes, classes and scores",
                outputs.len()
            ));
        }
        let boxes = outputs[0]
            .to_array_view::<f32>()
            .context("boxes output tensor was not f32")?;
        let classes = outputs[1]
            .to_array_view::<f32>()
            .context("classes output tensor was not f32")?;
        let scores = outputs[2]
            .to_array_view::<f32>()
            .context("scores output tensor was not f32")?;

        let flat_boxes: Vec<f32> = boxes.iter().copied().collect();
        if flat_boxes.len() % 4 != 0 {
            return Err(anyhow!(
                "boxes output has {} values, not a multiple of 4",
                flat_boxes.len()
            ));
        }
        let boxes = flat_boxes
            .chunks_exact(4)
            .map(|b| [b[0], b[1], b[2], b[3]])
            .collect();

        Ok(RawDetections::new(
            boxes,
            classes.iter().copied().collect(),
            scores.iter().copied().collect(),
        ))
    }
}

impl InferenceEngine for TractEngine {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn input_width(&self) -> u32 {
        self.settings.input_width
    }

    fn input_height(&self) -> u32 {
        self.settings.input_height
    }

    fn is_floating(&self) -> bool {
        self.settings.floating
    }

    fn min_conf_threshold(&self) -> f32 {
        self.settings.min_conf_threshold
    }

    fn labels(&self) -> &LabelMap {
        &self.labels
    }

    fn infer(&mut self, tensor: &InputTensor) -> Result<RawDetections> {
        let input = self.build_input(tensor)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.extract(outputs)
    }
}
