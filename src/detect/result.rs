use anyhow::{anyhow, Result};
use serde::Serialize;

/// Raw model output for one inference call.
///
/// The three vectors are parallel: entry `i` of each describes one candidate.
/// Boxes are fractional `[ymin, xmin, ymax, xmax]` relative to the model input.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RawDetections {
    pub boxes: Vec<[f32; 4]>,
    pub classes: Vec<f32>,
    pub scores: Vec<f32>,
}

impl RawDetections {
    pub fn new(boxes: Vec<[f32; 4]>, classes: Vec<f32>, scores: Vec<f32>) -> Self {
        Self {
            boxes,
            classes,
            scores,
        }
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// Reject outputs whose parallel arrays disagree in length.
    pub fn check_parallel(&self) -> Result<()> {
        if self.boxes.len() != self.scores.len() || self.classes.len() != self.scores.len() {
            return Err(anyhow!(
                "malformed inference output: {} boxes, {} classes, {} scores",
                self.boxes.len(),
                self.classes.len(),
                self.scores.len()
            ));
        }
        Ok(())
    }
}

/// Pixel-space box. Invariant: `x1 < x2` and `y1 < y2`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct BoundingBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BoundingBox {
    pub fn is_valid(&self) -> bool {
        self.x1 < self.x2 && self.y1 < self.y2
    }
}

/// One accepted detection in pixel space.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Detection {
    pub label: String,
    /// Confidence as an integer percentage, 0..=100.
    pub score: u8,
    pub bounding_box: BoundingBox,
}
