mod backend;
pub mod backends;
mod filter;
mod labels;
mod result;

use anyhow::Result;

use crate::config::PipelineConfig;

pub use backend::InferenceEngine;
pub use backends::StubEngine;
#[cfg(feature = "backend-tract")]
pub use backends::TractEngine;
pub use filter::{DetectionFilter, FilterConfig};
pub use labels::LabelMap;
pub use result::{BoundingBox, Detection, RawDetections};

/// Model identifiers with this prefix load the scripted stub engine.
pub const STUB_MODEL_PREFIX: &str = "stub://";

/// Load the label map and the inference engine named by the configuration.
///
/// Any failure here is a configuration error: the pipeline must not start.
pub fn load_engine(config: &PipelineConfig) -> Result<Box<dyn InferenceEngine>> {
    let labels = LabelMap::load(&config.model.labels_path())?;
    log::info!(
        "loaded {} labels from {}",
        labels.len(),
        config.model.labels_path().display()
    );

    if config.model.enable_edge_tpu {
        log::warn!("edge TPU delegate is not available; running inference on the CPU");
    }

    if config.model.model_file.starts_with(STUB_MODEL_PREFIX) {
        log::warn!(
            "model {} is a stub: no detections will be produced",
            config.model.model_file
        );
        let engine = StubEngine::new(config.model.input_width, config.model.input_height)
            .with_floating(config.model.floating)
            .with_threshold(config.detection.min_conf_threshold)
            .with_labels(labels);
        return Ok(Box::new(engine));
    }

    #[cfg(feature = "backend-tract")]
    {
        let settings = backends::tract::TractSettings {
            input_width: config.model.input_width,
            input_height: config.model.input_height,
            floating: config.model.floating,
            min_conf_threshold: config.detection.min_conf_threshold,
        };
        let mut engine = TractEngine::new(config.model.model_path(), settings, labels)?;
        engine.warm_up()?;
        Ok(Box::new(engine))
    }
    #[cfg(not(feature = "backend-tract"))]
    {
        anyhow::bail!(
            "model {} requires the backend-tract feature",
            config.model.model_file
        )
    }
}
