//! Single-camera person detection.
//!
//! Frames from one camera are pushed through an object-detection model; person
//! detections are flattened into a readings record for ingestion, and an
//! annotated copy of the frame is published for live viewing.
//!
//! # Architecture
//!
//! Two threads share one single-slot frame buffer:
//!
//! - the capture thread (`ingest`) keeps overwriting the slot with the newest
//!   frame; frames the consumer is too slow for are dropped, never queued
//! - the processing thread (`pipeline`) copies the latest frame out at the
//!   start of each cycle and runs it to completion
//!
//! The annotated frame is handed to viewers through a mutex-guarded latest
//! frame cell (`publish`), so a reader never sees a partially drawn frame.
//!
//! # Module Structure
//!
//! - `config`: JSON file plus environment configuration
//! - `frame`: BGR frames and the capture/processing hand-off slot
//! - `ingest`: frame sources (threaded camera capture, external slot)
//! - `preprocess`: frame to model tensor
//! - `detect`: inference engines, labels, thresholding and pixel mapping
//! - `readings`: detections flattened into an ordered readings record
//! - `render`: boxes, labels and the FPS overlay
//! - `sink`: readings ingestion (log, JSON lines, MQTT)
//! - `publish`: latest annotated frame and the MJPEG preview server
//! - `pipeline`: per-cycle orchestration and the shutdown state machine

pub mod config;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod pipeline;
pub mod preprocess;
pub mod publish;
pub mod readings;
pub mod render;
pub mod sink;

pub use config::PipelineConfig;
pub use detect::{load_engine, BoundingBox, Detection, InferenceEngine, LabelMap, RawDetections};
pub use frame::{Frame, FrameSlot};
pub use ingest::{CaptureConfig, CaptureStream, FrameSource, SlotSource};
pub use pipeline::{Pipeline, PipelineHandle, PipelineState, PipelineStats, ShutdownHandle};
pub use preprocess::{Tensor, TensorData};
pub use publish::{FramePublisher, LatestFrame};
pub use readings::{ReadingRecord, ReadingValue};
pub use render::AnnotationRenderer;
pub use sink::{build_sink, IngestRecord, IngestionSink};
