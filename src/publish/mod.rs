//! Latest-annotated-frame hand-off to live viewers.
//!
//! The pipeline writes one annotated frame per cycle; viewers read on their
//! own schedule. `LatestFrame` swaps a whole `Arc<Frame>` under a mutex, so a
//! reader sees either the previous frame or the new one, never a partial one.

pub mod mjpeg;

use anyhow::Result;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use crate::frame::Frame;

pub use mjpeg::{MjpegConfig, MjpegHandle, MjpegServer};

/// Receives the latest annotated frame, replacing any previous one.
pub trait FramePublisher: Send + Sync {
    fn publish(&self, frame: Frame) -> Result<()>;
}

#[derive(Default)]
struct Published {
    generation: u64,
    frame: Option<Arc<Frame>>,
}

/// Mutex-guarded latest frame with a generation counter for waiting readers.
#[derive(Default)]
pub struct LatestFrame {
    inner: Mutex<Published>,
    updated: Condvar,
}

impl LatestFrame {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current frame and its generation (0 before the first publish).
    pub fn latest(&self) -> (u64, Option<Arc<Frame>>) {
        let guard = self.lock();
        (guard.generation, guard.frame.clone())
    }

    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// Wait up to `timeout` for a frame newer than `seen`.
    pub fn wait_newer(&self, seen: u64, timeout: Duration) -> Option<(u64, Arc<Frame>)> {
        let guard = self.lock();
        let (guard, _) = self
            .updated
            .wait_timeout_while(guard, timeout, |published| published.generation <= seen)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if guard.generation <= seen {
            return None;
        }
        guard.frame.clone().map(|frame| (guard.generation, frame))
    }

    fn lock(&self) -> MutexGuard<'_, Published> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl FramePublisher for LatestFrame {
    fn publish(&self, frame: Frame) -> Result<()> {
        let frame = Arc::new(frame);
        {
            let mut guard = self.lock();
            guard.generation += 1;
            guard.frame = Some(frame);
        }
        self.updated.notify_all();
        Ok(())
    }
}
