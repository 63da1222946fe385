//! Frame storage and the single-slot hand-off between capture and processing.
//!
//! - `Frame`: dense BGR pixel buffer. `Clone` is a deep copy; every stage that
//!   needs a frame it does not own takes a copy.
//! - `FrameSlot`: the one shared mutable resource between the capture thread
//!   and the processing thread. The producer overwrites it, the consumer copies
//!   the latest value out. Frames are dropped, never queued.

use anyhow::{anyhow, Result};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

/// Channel count of every frame handled by the pipeline (BGR24).
pub const FRAME_CHANNELS: u32 = 3;

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// One captured image in BGR byte order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Capture order assigned by the producer.
    pub sequence: u64,
}

impl Frame {
    /// Wrap a BGR24 buffer. The buffer length must match the dimensions.
    pub fn new(data: Vec<u8>, width: u32, height: u32, sequence: u64) -> Result<Self> {
        let expected = frame_len(width, height)?;
        if data.len() != expected {
            return Err(anyhow!(
                "BGR frame length mismatch: expected {}, got {}",
                expected,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
            sequence,
        })
    }

    /// A frame filled with a single BGR color.
    pub fn filled(width: u32, height: u32, bgr: [u8; 3]) -> Self {
        let pixels = width as usize * height as usize;
        let mut data = Vec::with_capacity(pixels * FRAME_CHANNELS as usize);
        for _ in 0..pixels {
            data.extend_from_slice(&bgr);
        }
        Self {
            data,
            width,
            height,
            sequence: 0,
        }
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn channels(&self) -> u32 {
        FRAME_CHANNELS
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = self.offset(x, y);
        Some([
            self.data[offset],
            self.data[offset + 1],
            self.data[offset + 2],
        ])
    }

    /// Write one pixel; coordinates outside the frame are ignored.
    pub(crate) fn put_pixel(&mut self, x: i32, y: i32, bgr: [u8; 3]) {
        if x < 0 || y < 0 || x >= self.width as i32 || y >= self.height as i32 {
            return;
        }
        let offset = self.offset(x as u32, y as u32);
        self.data[offset..offset + 3].copy_from_slice(&bgr);
    }

    fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * FRAME_CHANNELS as usize
    }
}

pub(crate) fn frame_len(width: u32, height: u32) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(FRAME_CHANNELS as usize))
        .ok_or_else(|| anyhow!("frame dimensions overflow"))
}

// ----------------------------------------------------------------------------
// FrameSlot
// ----------------------------------------------------------------------------

/// Single-slot latest-frame cell shared by the capture and processing threads.
///
/// Contract:
/// - `store` replaces the previous frame and wakes anyone waiting for the first one.
/// - `latest` returns a copy; the caller never aliases the producer's buffer.
/// - `has_frame` answers "has a frame ever arrived" and never goes back to false.
#[derive(Default)]
pub struct FrameSlot {
    state: Mutex<SlotState>,
    stored: Condvar,
}

#[derive(Default)]
struct SlotState {
    frame: Option<Frame>,
    arrived: bool,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, frame: Frame) {
        let mut guard = self.lock();
        guard.frame = Some(frame);
        guard.arrived = true;
        drop(guard);
        self.stored.notify_all();
    }

    pub fn latest(&self) -> Option<Frame> {
        self.lock().frame.clone()
    }

    pub fn has_frame(&self) -> bool {
        self.lock().arrived
    }

    /// Drop the held frame, e.g. when the producer discards a stale one.
    ///
    /// `has_frame` stays true; readers see an empty slot until the next `store`.
    pub fn clear(&self) {
        self.lock().frame = None;
    }

    /// Block until a frame has ever arrived or `timeout` elapses. Returns `has_frame()`.
    pub fn wait_for_frame(&self, timeout: Duration) -> bool {
        let guard = self.lock();
        let (guard, _) = self
            .stored
            .wait_timeout_while(guard, timeout, |state| !state.arrived)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.arrived
    }

    // A poisoned slot still holds a whole frame or nothing: `store` is a single assignment.
    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
