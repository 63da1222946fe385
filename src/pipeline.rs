//! Per-frame processing loop.
//!
//! One `Pipeline` drives one camera. Each cycle:
//!
//! 1. copy the latest frame out of the source slot
//! 2. preprocess and run inference
//! 3. filter detections and flatten them into a readings record
//! 4. render the annotated preview frame
//! 5. honour a pending shutdown, or hand the record to the sink and the
//!    annotated frame to the publisher
//!
//! Shutdown is cooperative and checked once per cycle, after rendering. An
//! in-flight inference call always completes first. Once shutdown is observed
//! nothing more is published.

use anyhow::{anyhow, Context, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::config::PipelineConfig;
use crate::detect::{DetectionFilter, FilterConfig, InferenceEngine};
use crate::ingest::FrameSource;
use crate::preprocess::Preprocessor;
use crate::publish::FramePublisher;
use crate::readings::ReadingRecord;
use crate::render::AnnotationRenderer;
use crate::sink::{IngestRecord, IngestionSink};

/// FPS shown on the first cycle, before any interval has been measured.
const INITIAL_FPS: f64 = 1.0;
const FIRST_FRAME_POLL: Duration = Duration::from_millis(100);
const EMPTY_SLOT_BACKOFF: Duration = Duration::from_millis(10);
const STATS_LOG_INTERVAL: u64 = 100;

// ----------------------------------------------------------------------------
// Shutdown state
// ----------------------------------------------------------------------------

/// Lifecycle of a pipeline. Transitions only move forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum PipelineState {
    Running = 0,
    ShuttingDown = 1,
    Stopped = 2,
}

impl PipelineState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => PipelineState::Running,
            1 => PipelineState::ShuttingDown,
            _ => PipelineState::Stopped,
        }
    }
}

#[derive(Debug)]
struct ShutdownFlags {
    requested: AtomicBool,
    state: AtomicU8,
}

/// Cloneable handle for requesting shutdown from any thread.
#[derive(Clone, Debug)]
pub struct ShutdownHandle {
    inner: Arc<ShutdownFlags>,
}

impl ShutdownHandle {
    fn new() -> Self {
        Self {
            inner: Arc::new(ShutdownFlags {
                requested: AtomicBool::new(false),
                state: AtomicU8::new(PipelineState::Running as u8),
            }),
        }
    }

    /// Set the shutdown flag. Never blocks.
    pub fn request_shutdown(&self) {
        self.inner.requested.store(true, Ordering::SeqCst);
        self.advance(PipelineState::ShuttingDown);
    }

    pub fn is_requested(&self) -> bool {
        self.inner.requested.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> PipelineState {
        PipelineState::from_u8(self.inner.state.load(Ordering::SeqCst))
    }

    fn advance(&self, next: PipelineState) {
        self.inner.state.fetch_max(next as u8, Ordering::SeqCst);
    }
}

// ----------------------------------------------------------------------------
// Statistics
// ----------------------------------------------------------------------------

/// Snapshot of a pipeline's counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Cycles that ran inference.
    pub cycles: u64,
    /// Cycles skipped because no frame or no usable tensor was available.
    pub skipped_cycles: u64,
    /// Detections accepted across all cycles.
    pub detections: u64,
    pub ingest_failures: u64,
    pub publish_failures: u64,
}

#[derive(Debug, Default)]
struct StatsCounters {
    cycles: AtomicU64,
    skipped_cycles: AtomicU64,
    detections: AtomicU64,
    ingest_failures: AtomicU64,
    publish_failures: AtomicU64,
}

impl StatsCounters {
    fn snapshot(&self) -> PipelineStats {
        PipelineStats {
            cycles: self.cycles.load(Ordering::Relaxed),
            skipped_cycles: self.skipped_cycles.load(Ordering::Relaxed),
            detections: self.detections.load(Ordering::Relaxed),
            ingest_failures: self.ingest_failures.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
        }
    }
}

// ----------------------------------------------------------------------------
// Pipeline
// ----------------------------------------------------------------------------

/// Warns once per run of empty-slot cycles, then drops to debug.
#[derive(Debug, Default)]
struct EmptySlotLog {
    warned: bool,
}

impl EmptySlotLog {
    fn on_empty(&mut self) -> log::Level {
        if std::mem::replace(&mut self.warned, true) {
            log::Level::Debug
        } else {
            log::Level::Warn
        }
    }

    fn on_frame(&mut self) {
        self.warned = false;
    }
}

enum CycleOutcome {
    Continue,
    Shutdown,
}

pub struct Pipeline {
    asset_name: String,
    shutdown_grace: Duration,
    source: Box<dyn FrameSource>,
    engine: Box<dyn InferenceEngine>,
    sink: Box<dyn IngestionSink>,
    publisher: Arc<dyn FramePublisher>,
    preprocessor: Preprocessor,
    filter: DetectionFilter,
    renderer: AnnotationRenderer,
    empty_slot: EmptySlotLog,
    shutdown: ShutdownHandle,
    stats: Arc<StatsCounters>,
}

impl Pipeline {
    /// Validate the configuration against the engine and wire the stages.
    pub fn new(
        config: &PipelineConfig,
        source: Box<dyn FrameSource>,
        engine: Box<dyn InferenceEngine>,
        sink: Box<dyn IngestionSink>,
        publisher: Arc<dyn FramePublisher>,
    ) -> Result<Self> {
        Preprocessor::validate_frame_dims(config.camera.width, config.camera.height)
            .context("invalid camera configuration")?;
        let preprocessor = Preprocessor::new(
            engine.input_width(),
            engine.input_height(),
            engine.is_floating(),
            config.detection.input_mean,
            config.detection.input_std,
        )
        .with_context(|| format!("invalid input geometry for {} engine", engine.name()))?;

        let filter = DetectionFilter::new(
            FilterConfig {
                min_conf_threshold: engine.min_conf_threshold(),
                target_class: config.detection.target_class,
                camera_width: config.camera.width,
                camera_height: config.camera.height,
            },
            engine.labels().clone(),
        );

        if config.output.enable_window {
            log::warn!("local display is not available; use the preview stream instead");
        }

        log::info!(
            "pipeline: {} engine, model input {}x{} ({}), camera {}x{}, threshold {}",
            engine.name(),
            engine.input_width(),
            engine.input_height(),
            if engine.is_floating() { "float" } else { "u8" },
            config.camera.width,
            config.camera.height,
            engine.min_conf_threshold()
        );

        Ok(Self {
            asset_name: config.output.asset_name.clone(),
            shutdown_grace: config.output.shutdown_grace,
            source,
            engine,
            sink,
            publisher,
            preprocessor,
            filter,
            renderer: AnnotationRenderer::new(),
            empty_slot: EmptySlotLog::default(),
            shutdown: ShutdownHandle::new(),
            stats: Arc::new(StatsCounters::default()),
        })
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats.snapshot()
    }

    /// Run on a dedicated "frame-processor" thread.
    pub fn spawn(self) -> Result<PipelineHandle> {
        let shutdown = self.shutdown.clone();
        let stats = self.stats.clone();
        let join = std::thread::Builder::new()
            .name("frame-processor".to_string())
            .spawn(move || self.run())?;
        Ok(PipelineHandle {
            shutdown,
            stats,
            join: Some(join),
        })
    }

    /// Block until shutdown completes or inference fails.
    pub fn run(mut self) -> Result<()> {
        if !self.wait_for_first_frame() {
            log::info!("pipeline: shutdown requested before the first frame");
            return self.finish();
        }

        let mut fps = INITIAL_FPS;
        let mut last_cycle_start: Option<Instant> = None;
        loop {
            let cycle_start = Instant::now();
            if let Some(previous) = last_cycle_start {
                let elapsed = cycle_start.duration_since(previous).as_secs_f64();
                if elapsed > 0.0 {
                    fps = 1.0 / elapsed;
                }
            }
            last_cycle_start = Some(cycle_start);

            match self.cycle(fps) {
                Ok(CycleOutcome::Continue) => {}
                Ok(CycleOutcome::Shutdown) => return self.finish(),
                Err(err) => {
                    log::error!("pipeline: {:#}", err);
                    self.stop_source();
                    self.shutdown.advance(PipelineState::Stopped);
                    return Err(err);
                }
            }
        }
    }

    fn wait_for_first_frame(&self) -> bool {
        if self.source.has_frame() {
            return true;
        }
        log::info!("pipeline: waiting for the first frame");
        loop {
            if self.source.wait_for_frame(FIRST_FRAME_POLL) {
                return true;
            }
            if self.shutdown.is_requested() {
                return false;
            }
        }
    }

    fn cycle(&mut self, fps: f64) -> Result<CycleOutcome> {
        let frame = match self.source.read() {
            Some(frame) => frame,
            None => {
                log::log!(
                    self.empty_slot.on_empty(),
                    "pipeline: frame slot empty, skipping cycle"
                );
                self.stats.skipped_cycles.fetch_add(1, Ordering::Relaxed);
                std::thread::sleep(EMPTY_SLOT_BACKOFF);
                return Ok(self.poll_shutdown());
            }
        };

        self.empty_slot.on_frame();

        let tensor = match self.preprocessor.prepare(&frame) {
            Ok(tensor) => tensor,
            Err(err) => {
                log::warn!("pipeline: skipping frame {}: {:#}", frame.sequence, err);
                self.stats.skipped_cycles.fetch_add(1, Ordering::Relaxed);
                return Ok(self.poll_shutdown());
            }
        };

        let raw = self
            .engine
            .infer(&tensor)
            .with_context(|| format!("{} inference failed", self.engine.name()))?;
        raw.check_parallel()?;

        let detections = self.filter.apply(&raw);
        let readings = ReadingRecord::from_detections(&detections);
        let annotated = self.renderer.render(&frame, &detections, fps);

        let cycles = self.stats.cycles.fetch_add(1, Ordering::Relaxed) + 1;
        self.stats
            .detections
            .fetch_add(detections.len() as u64, Ordering::Relaxed);

        if let CycleOutcome::Shutdown = self.poll_shutdown() {
            return Ok(CycleOutcome::Shutdown);
        }

        if let Err(err) = self.sink.ingest(IngestRecord::new(&self.asset_name, readings)) {
            self.stats.ingest_failures.fetch_add(1, Ordering::Relaxed);
            log::warn!("pipeline: {} sink rejected readings: {:#}", self.sink.name(), err);
        }
        if let Err(err) = self.publisher.publish(annotated) {
            self.stats.publish_failures.fetch_add(1, Ordering::Relaxed);
            log::warn!("pipeline: failed to publish annotated frame: {:#}", err);
        }

        if cycles % STATS_LOG_INTERVAL == 0 {
            log::debug!("pipeline: {:?} at {:.2} fps", self.stats.snapshot(), fps);
        }
        Ok(CycleOutcome::Continue)
    }

    fn poll_shutdown(&self) -> CycleOutcome {
        if self.shutdown.is_requested() {
            CycleOutcome::Shutdown
        } else {
            CycleOutcome::Continue
        }
    }

    /// Release the source, let in-flight producer writes settle, then stop.
    fn finish(mut self) -> Result<()> {
        self.shutdown.advance(PipelineState::ShuttingDown);
        self.stop_source();
        if !self.shutdown_grace.is_zero() {
            std::thread::sleep(self.shutdown_grace);
        }
        self.shutdown.advance(PipelineState::Stopped);
        log::info!("pipeline stopped: {:?}", self.stats.snapshot());
        Ok(())
    }

    fn stop_source(&mut self) {
        if let Err(err) = self.source.stop() {
            log::warn!("pipeline: failed to stop frame source: {:#}", err);
        }
    }
}

/// Handle to a pipeline running on its own thread.
pub struct PipelineHandle {
    shutdown: ShutdownHandle,
    stats: Arc<StatsCounters>,
    join: Option<JoinHandle<Result<()>>>,
}

impl PipelineHandle {
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub fn request_shutdown(&self) {
        self.shutdown.request_shutdown();
    }

    pub fn state(&self) -> PipelineState {
        self.shutdown.state()
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats.snapshot()
    }

    pub fn is_finished(&self) -> bool {
        self.join.as_ref().map_or(true, |join| join.is_finished())
    }

    /// Wait for the pipeline thread and return its result.
    pub fn join(mut self) -> Result<()> {
        match self.join.take() {
            Some(join) => join
                .join()
                .map_err(|_| anyhow!("pipeline thread panicked"))?,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{RawDetections, StubEngine};
    use crate::frame::{Frame, FrameSlot};
    use crate::ingest::SlotSource;
    use crate::publish::LatestFrame;
    use crate::sink::ChannelSink;

    fn config() -> PipelineConfig {
        let mut cfg = PipelineConfig::default();
        cfg.camera.width = 64;
        cfg.camera.height = 48;
        cfg.output.shutdown_grace = Duration::ZERO;
        cfg
    }

    #[test]
    fn shutdown_state_is_monotonic() {
        let handle = ShutdownHandle::new();
        assert_eq!(handle.state(), PipelineState::Running);
        handle.advance(PipelineState::Stopped);
        handle.request_shutdown();
        assert!(handle.is_requested());
        assert_eq!(handle.state(), PipelineState::Stopped);
    }

    #[test]
    fn empty_slot_warns_once_per_gap() {
        let mut gap = EmptySlotLog::default();
        assert_eq!(gap.on_empty(), log::Level::Warn);
        assert_eq!(gap.on_empty(), log::Level::Debug);
        assert_eq!(gap.on_empty(), log::Level::Debug);
        gap.on_frame();
        assert_eq!(gap.on_empty(), log::Level::Warn);
    }

    #[test]
    fn zero_sized_camera_is_rejected() {
        let mut cfg = config();
        cfg.camera.width = 0;
        let source = SlotSource::new(Arc::new(FrameSlot::new()));
        let (sink, _rx) = ChannelSink::new();
        let result = Pipeline::new(
            &cfg,
            Box::new(source),
            Box::new(StubEngine::new(8, 8)),
            Box::new(sink),
            Arc::new(LatestFrame::new()),
        );
        assert!(result.is_err());
    }

    #[test]
    fn shutdown_before_first_frame_stops_cleanly() -> Result<()> {
        let source = SlotSource::new(Arc::new(FrameSlot::new()));
        let (sink, rx) = ChannelSink::new();
        let pipeline = Pipeline::new(
            &config(),
            Box::new(source.clone()),
            Box::new(StubEngine::new(8, 8)),
            Box::new(sink),
            Arc::new(LatestFrame::new()),
        )?;
        let shutdown = pipeline.shutdown_handle();
        let handle = pipeline.spawn()?;
        shutdown.request_shutdown();
        handle.join()?;

        assert_eq!(shutdown.state(), PipelineState::Stopped);
        assert!(source.is_stopped());
        assert!(rx.try_recv().is_err());
        Ok(())
    }

    #[test]
    fn malformed_inference_output_is_fatal() -> Result<()> {
        let slot = Arc::new(FrameSlot::new());
        slot.store(Frame::filled(64, 48, [0, 0, 0]));
        let source = SlotSource::new(slot);
        let engine = StubEngine::new(8, 8).then_output(RawDetections::new(
            vec![[0.1, 0.1, 0.5, 0.5]],
            vec![],
            vec![0.9],
        ));
        let (sink, rx) = ChannelSink::new();
        let pipeline = Pipeline::new(
            &config(),
            Box::new(source.clone()),
            Box::new(engine),
            Box::new(sink),
            Arc::new(LatestFrame::new()),
        )?;
        let shutdown = pipeline.shutdown_handle();

        let err = pipeline.run().err().expect("run should fail");
        assert!(format!("{err:#}").contains("malformed inference output"));
        assert_eq!(shutdown.state(), PipelineState::Stopped);
        assert!(source.is_stopped());
        assert!(rx.try_recv().is_err());
        Ok(())
    }
}
