//! V4L2 camera capture.
//!
//! Opens a local device node (e.g. `/dev/video0`), asks for BGR24 at the
//! configured size, and falls back to whatever RGB24/YUYV format the driver
//! settles on. Frames are converted to BGR24 in memory.

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;

use super::capture::CaptureConfig;
use super::normalize::{normalize_to_bgr, PixelFormat};
use crate::frame::Frame;

pub(crate) struct DeviceCapture {
    config: CaptureConfig,
    state: DeviceState,
    format: PixelFormat,
    active_width: u32,
    active_height: u32,
}

#[self_referencing]
struct DeviceState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl DeviceCapture {
    pub(crate) fn open(config: CaptureConfig) -> Result<Self> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&config.device)
            .with_context(|| format!("open v4l2 device {}", config.device))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = config.width;
        format.height = config.height;
        format.fourcc = v4l::FourCC::new(b"BGR3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "capture: failed to set BGR3 on {}: {}",
                    config.device,
                    err
                );
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };

        let pixel_format = match &format.fourcc.repr {
            b"BGR3" => PixelFormat::Bgr24,
            b"RGB3" => PixelFormat::Rgb24,
            b"YUYV" => PixelFormat::Yuyv,
            other => {
                return Err(anyhow!(
                    "v4l2 device {} settled on unsupported format {}",
                    config.device,
                    String::from_utf8_lossy(other)
                ))
            }
        };

        if config.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(config.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!("capture: failed to set fps on {}: {}", config.device, err);
            }
        }

        if format.width != config.width || format.height != config.height {
            log::warn!(
                "capture: {} delivers {}x{} instead of {}x{}",
                config.device,
                format.width,
                format.height,
                config.width,
                config.height
            );
        }

        let state = DeviceStateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;

        log::info!(
            "capture: opened {} ({}x{} {:?})",
            config.device,
            format.width,
            format.height,
            pixel_format
        );

        Ok(Self {
            active_width: format.width,
            active_height: format.height,
            format: pixel_format,
            config,
            state,
        })
    }

    pub(crate) fn next_frame(&mut self, sequence: u64) -> Result<Frame> {
        use v4l::io::traits::CaptureStream;

        let (buf, _meta) = self
            .state
            .with_mut(|fields| fields.stream.next())
            .context("capture v4l2 frame")?;
        let bgr = normalize_to_bgr(buf, self.active_width, self.active_height, self.format)?;
        Frame::new(bgr, self.active_width, self.active_height, sequence)
    }

    pub(crate) fn device(&self) -> &str {
        &self.config.device
    }
}
