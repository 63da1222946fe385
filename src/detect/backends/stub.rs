use anyhow::{anyhow, Result};
use std::collections::VecDeque;

use crate::detect::backend::InferenceEngine;
use crate::detect::labels::LabelMap;
use crate::detect::result::RawDetections;
use crate::preprocess::Tensor;

/// Scripted engine for tests and `stub://` models.
///
/// Each `infer` call pops the next scripted output; once the script is
/// exhausted the `repeat` output (empty by default) is returned.
pub struct StubEngine {
    width: u32,
    height: u32,
    floating: bool,
    threshold: f32,
    labels: LabelMap,
    script: VecDeque<Result<RawDetections, String>>,
    repeat: RawDetections,
    calls: u64,
    last_shape: Option<[usize; 4]>,
}

impl StubEngine {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            floating: false,
            threshold: 0.5,
            labels: LabelMap::from_pairs([(0, "person")]),
            script: VecDeque::new(),
            repeat: RawDetections::default(),
            calls: 0,
            last_shape: None,
        }
    }

    pub fn with_floating(mut self, floating: bool) -> Self {
        self.floating = floating;
        self
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_labels(mut self, labels: LabelMap) -> Self {
        self.labels = labels;
        self
    }

    /// Queue one output for the next unscripted call.
    pub fn then_output(mut self, output: RawDetections) -> Self {
        self.script.push_back(Ok(output));
        self
    }

    /// Queue a failing call.
    pub fn then_fail(mut self, message: &str) -> Self {
        self.script.push_back(Err(message.to_string()));
        self
    }

    /// Output returned once the script is exhausted.
    pub fn repeating(mut self, output: RawDetections) -> Self {
        self.repeat = output;
        self
    }

    pub fn calls(&self) -> u64 {
        self.calls
    }

    pub fn last_shape(&self) -> Option<[usize; 4]> {
        self.last_shape
    }
}

impl InferenceEngine for StubEngine {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn input_width(&self) -> u32 {
        self.width
    }

    fn input_height(&self) -> u32 {
        self.height
    }

    fn is_floating(&self) -> bool {
        self.floating
    }

    fn min_conf_threshold(&self) -> f32 {
        self.threshold
    }

    fn labels(&self) -> &LabelMap {
        &self.labels
    }

    fn infer(&mut self, tensor: &Tensor) -> Result<RawDetections> {
        self.calls += 1;
        self.last_shape = Some(tensor.shape());
        match self.script.pop_front() {
            Some(Ok(output)) => Ok(output),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Ok(self.repeat.clone()),
        }
    }
}
