//! Frame to model-input conversion.
//!
//! BGR→RGB, nearest-neighbour resize to the model's declared size, a leading
//! batch dimension of 1, and mean/std normalization for floating models.

use anyhow::{anyhow, Result};
use image::imageops::{self, FilterType};
use image::RgbImage;

use crate::frame::{Frame, FRAME_CHANNELS};

#[derive(Clone, Debug, PartialEq)]
pub enum TensorData {
    U8(Vec<u8>),
    F32(Vec<f32>),
}

impl TensorData {
    pub fn len(&self) -> usize {
        match self {
            TensorData::U8(data) => data.len(),
            TensorData::F32(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// NHWC model input.
#[derive(Clone, Debug, PartialEq)]
pub struct Tensor {
    shape: [usize; 4],
    data: TensorData,
}

impl Tensor {
    pub fn new(shape: [usize; 4], data: TensorData) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if data.len() != expected {
            return Err(anyhow!(
                "tensor data has {} values, shape {:?} needs {}",
                data.len(),
                shape,
                expected
            ));
        }
        Ok(Self { shape, data })
    }

    /// `[batch, height, width, channels]`
    pub fn shape(&self) -> [usize; 4] {
        self.shape
    }

    pub fn data(&self) -> &TensorData {
        &self.data
    }
}

/// Builds model-ready tensors from frames.
#[derive(Clone, Debug)]
pub struct Preprocessor {
    model_width: u32,
    model_height: u32,
    floating: bool,
    mean: f32,
    std: f32,
}

impl Preprocessor {
    pub fn new(model_width: u32, model_height: u32, floating: bool, mean: f32, std: f32) -> Result<Self> {
        if model_width == 0 || model_height == 0 {
            return Err(anyhow!(
                "model input must be non-empty, got {}x{}",
                model_width,
                model_height
            ));
        }
        if floating && std == 0.0 {
            return Err(anyhow!("input_std must be non-zero for floating models"));
        }
        Ok(Self {
            model_width,
            model_height,
            floating,
            mean,
            std,
        })
    }

    /// Reject frame geometry the pipeline cannot process.
    ///
    /// The channel count is fixed by `Frame`, whose constructor rejects
    /// buffers that are not `width * height * 3` bytes.
    pub fn validate_frame_dims(width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 {
            return Err(anyhow!("frame has zero area ({}x{})", width, height));
        }
        Ok(())
    }

    pub fn is_floating(&self) -> bool {
        self.floating
    }

    pub fn prepare(&self, frame: &Frame) -> Result<Tensor> {
        Self::validate_frame_dims(frame.width, frame.height)?;
        let rgb: Vec<u8> = frame
            .data()
            .chunks_exact(3)
            .flat_map(|bgr| [bgr[2], bgr[1], bgr[0]])
            .collect();
        let image = RgbImage::from_raw(frame.width, frame.height, rgb)
            .ok_or_else(|| anyhow!("frame buffer does not match {}x{}", frame.width, frame.height))?;

        let resized = if image.width() == self.model_width && image.height() == self.model_height {
            image
        } else {
            imageops::resize(&image, self.model_width, self.model_height, FilterType::Nearest)
        };

        let shape = [
            1,
            self.model_height as usize,
            self.model_width as usize,
            FRAME_CHANNELS as usize,
        ];
        let pixels = resized.into_raw();
        let data = if self.floating {
            TensorData::F32(
                pixels
                    .iter()
                    .map(|&p| (p as f32 - self.mean) / self.std)
                    .collect(),
            )
        } else {
            TensorData::U8(pixels)
        };
        Tensor::new(shape, data)
    }
}
