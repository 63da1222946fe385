//! Thresholding and pixel mapping of raw model output.
//!
//! Box coordinates arrive fractional in `(ymin, xmin, ymax, xmax)` order.
//! The `y` pair is scaled and clamped by the camera *width* and the `x` pair by
//! the camera *height*. That pairing looks transposed but matches the readings
//! already stored downstream, so it is kept bit-for-bit.

use crate::detect::labels::LabelMap;
use crate::detect::result::{BoundingBox, Detection, RawDetections};

/// Settings for `DetectionFilter`.
#[derive(Clone, Debug, PartialEq)]
pub struct FilterConfig {
    /// Entries must score strictly above this value.
    pub min_conf_threshold: f32,
    /// The only class index that is accepted.
    pub target_class: usize,
    pub camera_width: u32,
    pub camera_height: u32,
}

pub struct DetectionFilter {
    config: FilterConfig,
    labels: LabelMap,
}

impl DetectionFilter {
    pub fn new(config: FilterConfig, labels: LabelMap) -> Self {
        Self { config, labels }
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    /// Accepted detections in source array order.
    ///
    /// Iterates up to the shortest of the three arrays; length agreement is
    /// checked at the inference boundary.
    pub fn apply(&self, raw: &RawDetections) -> Vec<Detection> {
        let mut accepted = Vec::new();
        for ((bbox, class), score) in raw.boxes.iter().zip(&raw.classes).zip(&raw.scores) {
            if !(*score > self.config.min_conf_threshold) {
                continue;
            }
            match class_index(*class) {
                Some(index) if index == self.config.target_class => {}
                _ => continue,
            }

            let bounding_box = self.map_box(bbox);
            if !bounding_box.is_valid() {
                log::debug!(
                    "dropping degenerate box {:?} from raw {:?}",
                    bounding_box,
                    bbox
                );
                continue;
            }

            accepted.push(Detection {
                label: self.labels.name_or_default(self.config.target_class),
                score: percent(*score),
                bounding_box,
            });
        }
        accepted
    }

    fn map_box(&self, bbox: &[f32; 4]) -> BoundingBox {
        let width = self.config.camera_width as f64;
        let height = self.config.camera_height as f64;

        let ymin_model = round3(bbox[0]);
        let xmin_model = round3(bbox[1]);
        let ymax_model = round3(bbox[2]);
        let xmax_model = round3(bbox[3]);

        let ymin = (ymin_model * width).max(1.0) as i32;
        let xmin = (xmin_model * height).max(1.0) as i32;
        let ymax = (ymax_model * width).min(width) as i32;
        let xmax = (xmax_model * height).min(height) as i32;

        BoundingBox {
            x1: xmin,
            y1: ymin,
            x2: xmax,
            y2: ymax,
        }
    }
}

fn class_index(class: f32) -> Option<usize> {
    if class.is_finite() && class >= 0.0 && class.fract() == 0.0 {
        Some(class as usize)
    } else {
        None
    }
}

fn round3(value: f32) -> f64 {
    (value as f64 * 1000.0).round() / 1000.0
}

fn percent(score: f32) -> u8 {
    (score as f64 * 100.0).round().clamp(0.0, 100.0) as u8
}
