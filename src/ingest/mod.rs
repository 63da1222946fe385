//! Frame sources.
//!
//! A source owns its capture thread and the single-slot buffer that thread
//! fills. The processing loop only ever:
//! - asks whether a frame has arrived (`has_frame` / `wait_for_frame`)
//! - copies the latest frame out (`read`)
//! - releases the capture resources (`stop`)
//!
//! Sources:
//! - `CaptureStream`: threaded capture from a camera (`stub://` synthetic, or a
//!   V4L2 device with the `ingest-v4l2` feature)
//! - `SlotSource`: frames pushed by an external producer into a shared slot

pub mod capture;
mod normalize;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::frame::{Frame, FrameSlot};

pub use capture::{CaptureConfig, CaptureStats, CaptureStream};

/// Consumer side of a frame producer.
pub trait FrameSource: Send {
    /// Non-blocking: has any frame ever arrived?
    fn has_frame(&self) -> bool;

    /// Block up to `timeout` for the first frame. Returns `has_frame()`.
    fn wait_for_frame(&self, timeout: Duration) -> bool;

    /// Copy of the latest frame, or `None` when the slot is empty.
    fn read(&self) -> Option<Frame>;

    /// Release capture resources. Idempotent.
    fn stop(&mut self) -> Result<()>;
}

/// Source backed by a slot that something else fills.
///
/// `stop` only marks the source stopped; the external producer may check
/// `is_stopped` to wind down.
#[derive(Clone)]
pub struct SlotSource {
    slot: Arc<FrameSlot>,
    stopped: Arc<AtomicBool>,
}

impl SlotSource {
    pub fn new(slot: Arc<FrameSlot>) -> Self {
        Self {
            slot,
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn slot(&self) -> Arc<FrameSlot> {
        self.slot.clone()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl FrameSource for SlotSource {
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
        self.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_source_reads_what_producer_stores() {
        let slot = Arc::new(FrameSlot::new());
        let mut source = SlotSource::new(slot.clone());
        assert!(!source.has_frame());
        assert!(source.read().is_none());

        slot.store(Frame::filled(2, 2, [1, 2, 3]).with_sequence(7));
        assert!(source.has_frame());
        assert_eq!(source.read().map(|f| f.sequence), Some(7));

        source.stop().unwrap();
        assert!(source.is_stopped());
    }
}
