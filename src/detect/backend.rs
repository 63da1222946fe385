use anyhow::Result;

use crate::detect::labels::LabelMap;
use crate::detect::result::RawDetections;
use crate::preprocess::Tensor;

/// Inference engine boundary.
///
/// The pipeline treats the engine as opaque: it reads the declared input
/// geometry once at construction, then calls `infer` once per cycle.
/// `infer` is synchronous and may dominate cycle latency.
///
/// An `Err` from `infer` is fatal for the pipeline instance. There is no retry.
pub trait InferenceEngine: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Declared model input width in pixels.
    fn input_width(&self) -> u32;

    /// Declared model input height in pixels.
    fn input_height(&self) -> u32;

    /// True when the model expects mean/std normalized `f32` input.
    fn is_floating(&self) -> bool;

    /// Confidence threshold configured at load time (0..1).
    fn min_conf_threshold(&self) -> f32;

    /// Class index to display name mapping.
    fn labels(&self) -> &LabelMap;

    /// Run the model on one tensor. Outputs are parallel sequences.
    fn infer(&mut self, tensor: &Tensor) -> Result<RawDetections>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
