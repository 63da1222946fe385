//! Threaded camera capture.
//!
//! `CaptureStream` runs its own thread that keeps overwriting a `FrameSlot`
//! with the newest frame. The processing loop never waits on this thread
//! beyond the first frame; frames it is too slow to consume are dropped.
//!
//! The capture thread is responsible for:
//! - opening and configuring the device
//! - converting device pixels to BGR24
//! - stamping frames with a capture sequence number
//!
//! The capture thread MUST NOT:
//! - queue more than one frame
//! - block the consumer on device I/O

use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use std::time::Duration;

use super::FrameSource;
use crate::config::CameraSettings;
use crate::frame::{Frame, FrameSlot};

#[cfg(feature = "ingest-v4l2")]
use super::v4l2::DeviceCapture;

const STUB_PREFIX: &str = "stub://";
const ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Configuration for a capture stream.
#[derive(Clone, Debug, PartialEq)]
pub struct CaptureConfig {
    /// Device path (e.g. "/dev/video0") or `stub://name` for synthetic frames.
    pub device: String,
    pub width: u32,
    pub height: u32,
    /// Requested frame rate. Synthetic sources pace themselves to it.
    pub target_fps: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            width: 640,
            height: 480,
            target_fps: 30,
        }
    }
}

impl CaptureConfig {
    /// Resolve a camera selector. A bare index `N` means `/dev/videoN`.
    pub fn from_camera(camera: &CameraSettings) -> Self {
        let id = camera.id.trim();
        let device = if id.parse::<u32>().is_ok() {
            format!("/dev/video{}", id)
        } else {
            id.to_string()
        };
        Self {
            device,
            width: camera.width,
            height: camera.height,
            target_fps: camera.target_fps,
        }
    }
}

/// Statistics for a capture stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CaptureStats {
    pub frames_captured: u64,
    pub capture_errors: u64,
    pub device: String,
}

/// Camera source with its own capture thread.
pub struct CaptureStream {
    device: String,
    slot: Arc<FrameSlot>,
    shutdown: Arc<AtomicBool>,
    frames: Arc<AtomicU64>,
    errors: Arc<AtomicU64>,
    join: Option<JoinHandle<()>>,
}

impl CaptureStream {
    /// Open the device and start capturing.
    ///
    /// The device is opened on the capture thread; open/configure failures are
    /// returned here so a misconfigured camera stops startup.
    pub fn start(config: CaptureConfig) -> Result<Self> {
        let slot = Arc::new(FrameSlot::new());
        let shutdown = Arc::new(AtomicBool::new(false));
        let frames = Arc::new(AtomicU64::new(0));
        let errors = Arc::new(AtomicU64::new(0));
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<()>>(1);

        let device = config.device.clone();
        let join = {
            let slot = slot.clone();
            let shutdown = shutdown.clone();
            let frames = frames.clone();
            let errors = errors.clone();
            std::thread::Builder::new()
                .name("frame-capture".to_string())
                .spawn(move || {
                    let mut backend = match CaptureBackend::open(config) {
                        Ok(backend) => {
                            let _ = ready_tx.send(Ok(()));
                            backend
                        }
                        Err(err) => {
                            let _ = ready_tx.send(Err(err));
                            return;
                        }
                    };
                    capture_loop(&mut backend, &slot, &shutdown, &frames, &errors);
                })?
        };

        let ready = ready_rx
            .recv()
            .map_err(|_| anyhow!("capture thread exited before reporting readiness"));
        if let Err(err) = ready.and_then(|opened| opened) {
            let _ = join.join();
            return Err(err);
        }

        Ok(Self {
            device,
            slot,
            shutdown,
            frames,
            errors,
            join: Some(join),
        })
    }

    pub fn stats(&self) -> CaptureStats {
        CaptureStats {
            frames_captured: self.frames.load(Ordering::Relaxed),
            capture_errors: self.errors.load(Ordering::Relaxed),
            device: self.device.clone(),
        }
    }
}

impl FrameSource for CaptureStream {
    fn has_frame(&self) -> bool {
        self.slot.has_frame()
    }

    fn wait_for_frame(&self, timeout: Duration) -> bool {
        self.slot.wait_for_frame(timeout)
    }

    fn read(&self) -> Option<Frame> {
        self.slot.latest()
    }

    fn stop(&mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("capture thread for {} panicked", self.device))?;
            log::info!(
                "capture stopped for {} after {} frames",
                self.device,
                self.frames.load(Ordering::Relaxed)
            );
        }
        Ok(())
    }
}

impl Drop for CaptureStream {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            log::warn!("{}", err);
        }
    }
}

fn capture_loop(
    backend: &mut CaptureBackend,
    slot: &FrameSlot,
    shutdown: &AtomicBool,
    frames: &AtomicU64,
    errors: &AtomicU64,
) {
    let mut sequence = 0u64;
    while !shutdown.load(Ordering::SeqCst) {
        match backend.next_frame(sequence + 1) {
            Ok(frame) => {
                sequence += 1;
                slot.store(frame);
                frames.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                let count = errors.fetch_add(1, Ordering::Relaxed) + 1;
                log::warn!("capture error #{} on {}: {:#}", count, backend.device(), err);
                std::thread::sleep(ERROR_BACKOFF);
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Backends
// ----------------------------------------------------------------------------

enum CaptureBackend {
    Synthetic(SyntheticCapture),
    #[cfg(feature = "ingest-v4l2")]
    Device(DeviceCapture),
}

impl CaptureBackend {
    fn open(config: CaptureConfig) -> Result<Self> {
        if config.width == 0 || config.height == 0 {
            return Err(anyhow!(
                "capture size must be non-zero, got {}x{}",
                config.width,
                config.height
            ));
        }
        if config.device.starts_with(STUB_PREFIX) {
            log::info!("capture: opened {} (synthetic)", config.device);
            return Ok(CaptureBackend::Synthetic(SyntheticCapture::new(config)));
        }
        #[cfg(feature = "ingest-v4l2")]
        {
            Ok(CaptureBackend::Device(DeviceCapture::open(config)?))
        }
        #[cfg(not(feature = "ingest-v4l2"))]
        {
            Err(anyhow!(
                "camera {} requires the ingest-v4l2 feature",
                config.device
            ))
        }
    }

    fn next_frame(&mut self, sequence: u64) -> Result<Frame> {
        match self {
            CaptureBackend::Synthetic(source) => source.next_frame(sequence),
            #[cfg(feature = "ingest-v4l2")]
            CaptureBackend::Device(source) => source.next_frame(sequence),
        }
    }

    fn device(&self) -> &str {
        match self {
            CaptureBackend::Synthetic(source) => &source.config.device,
            #[cfg(feature = "ingest-v4l2")]
            CaptureBackend::Device(source) => source.device(),
        }
    }
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://) for tests and demos
// ----------------------------------------------------------------------------

struct SyntheticCapture {
    config: CaptureConfig,
    frame_interval: Option<Duration>,
}

impl SyntheticCapture {
    fn new(config: CaptureConfig) -> Self {
        let frame_interval = if config.target_fps == 0 {
            None
        } else {
            Some(Duration::from_millis(1000 / config.target_fps as u64))
        };
        Self {
            config,
            frame_interval,
        }
    }

    fn next_frame(&mut self, sequence: u64) -> Result<Frame> {
        if let Some(interval) = self.frame_interval {
            std::thread::sleep(interval);
        }
        Frame::new(self.generate_pixels(sequence), self.config.width, self.config.height, sequence)
    }

    /// Grey background with a bright vertical bar that drifts one column per frame.
    fn generate_pixels(&self, sequence: u64) -> Vec<u8> {
        let width = self.config.width as usize;
        let height = self.config.height as usize;
        let bar_width = (width / 8).max(1);
        let bar_start = (sequence as usize) % width;

        let mut pixels = vec![96u8; width * height * 3];
        for row in pixels.chunks_exact_mut(width * 3) {
            for i in 0..bar_width {
                let x = (bar_start + i) % width;
                row[x * 3..x * 3 + 3].copy_from_slice(&[200, 200, 200]);
            }
        }
        pixels
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn stub_config() -> CaptureConfig {
        CaptureConfig {
            device: "stub://test".to_string(),
            width: 64,
            height: 48,
            target_fps: 200,
        }
    }

    #[test]
    fn camera_index_maps_to_device_path() {
        let camera = CameraSettings {
            id: "2".to_string(),
            width: 320,
            height: 240,
            target_fps: 15,
        };
        assert_eq!(CaptureConfig::from_camera(&camera).device, "/dev/video2");

        let camera = CameraSettings {
            id: "stub://front".to_string(),
            ..camera
        };
        assert_eq!(CaptureConfig::from_camera(&camera).device, "stub://front");
    }

    #[test]
    fn capture_stream_fills_slot() -> Result<()> {
        let mut stream = CaptureStream::start(stub_config())?;
        assert!(stream.wait_for_frame(Duration::from_secs(5)));

        let frame = stream.read().expect("frame after wait");
        assert_eq!(frame.width, 64);
        assert_eq!(frame.height, 48);
        assert!(frame.sequence >= 1);

        stream.stop()?;
        let captured = stream.stats().frames_captured;
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(stream.stats().frames_captured, captured);
        Ok(())
    }

    #[test]
    fn stop_is_idempotent() -> Result<()> {
        let mut stream = CaptureStream::start(stub_config())?;
        stream.stop()?;
        stream.stop()?;
        Ok(())
    }

    #[test]
    fn zero_size_capture_fails_at_start() {
        let config = CaptureConfig {
            width: 0,
            ..stub_config()
        };
        assert!(CaptureStream::start(config).is_err());
    }

    #[cfg(not(feature = "ingest-v4l2"))]
    #[test]
    fn device_capture_requires_feature() {
        let config = CaptureConfig {
            device: "/dev/video0".to_string(),
            ..stub_config()
        };
        let err = CaptureStream::start(config).err().expect("start should fail");
        assert!(format!("{err}").contains("ingest-v4l2"));
    }
}
