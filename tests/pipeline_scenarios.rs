use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};

use person_detection::detect::StubEngine;
use person_detection::readings::ReadingValue;
use person_detection::{
    AnnotationRenderer, BoundingBox, Detection, Frame, FramePublisher, FrameSlot, IngestRecord,
    IngestionSink, Pipeline, PipelineConfig, PipelineState, RawDetections, ShutdownHandle,
    SlotSource,
};

const WIDTH: u32 = 640;
const HEIGHT: u32 = 480;

/// Forwards records and requests shutdown once `limit` records have arrived.
struct StopAfter {
    limit: usize,
    seen: usize,
    shutdown: Arc<Mutex<Option<ShutdownHandle>>>,
    tx: mpsc::Sender<IngestRecord>,
}

impl IngestionSink for StopAfter {
    fn name(&self) -> &'static str {
        "stop-after"
    }

    fn ingest(&mut self, record: IngestRecord) -> Result<()> {
        self.seen += 1;
        self.tx.send(record).map_err(|_| anyhow!("receiver gone"))?;
        if self.seen >= self.limit {
            if let Some(handle) = self.shutdown.lock().unwrap().as_ref() {
                handle.request_shutdown();
            }
        }
        Ok(())
    }
}

#[derive(Default)]
struct RecordingPublisher {
    frames: Mutex<Vec<Frame>>,
}

impl RecordingPublisher {
    fn frames(&self) -> Vec<Frame> {
        self.frames.lock().unwrap().clone()
    }
}

impl FramePublisher for RecordingPublisher {
    fn publish(&self, frame: Frame) -> Result<()> {
        self.frames.lock().unwrap().push(frame);
        Ok(())
    }
}

struct FailingPublisher;

impl FramePublisher for FailingPublisher {
    fn publish(&self, _frame: Frame) -> Result<()> {
        Err(anyhow!("viewer transport down"))
    }
}

struct Harness {
    pipeline: Pipeline,
    source: SlotSource,
    records: mpsc::Receiver<IngestRecord>,
}

fn config() -> PipelineConfig {
    let mut cfg = PipelineConfig::default();
    cfg.camera.width = WIDTH;
    cfg.camera.height = HEIGHT;
    cfg.output.shutdown_grace = Duration::ZERO;
    cfg
}

fn captured_frame() -> Frame {
    Frame::filled(WIDTH, HEIGHT, [40, 40, 40]).with_sequence(1)
}

fn harness(
    engine: StubEngine,
    stop_after: usize,
    publisher: Arc<dyn FramePublisher>,
) -> Result<Harness> {
    let slot = Arc::new(FrameSlot::new());
    slot.store(captured_frame());
    let source = SlotSource::new(slot);
    let (tx, records) = mpsc::channel();
    let shutdown_slot = Arc::new(Mutex::new(None));
    let sink = StopAfter {
        limit: stop_after,
        seen: 0,
        shutdown: shutdown_slot.clone(),
        tx,
    };
    let pipeline = Pipeline::new(
        &config(),
        Box::new(source.clone()),
        Box::new(engine),
        Box::new(sink),
        publisher,
    )?;
    *shutdown_slot.lock().unwrap() = Some(pipeline.shutdown_handle());
    Ok(Harness {
        pipeline,
        source,
        records,
    })
}

#[test]
fn empty_scene_publishes_count_zero_and_fps_only_frame() -> Result<()> {
    let publisher = Arc::new(RecordingPublisher::default());
    let Harness {
        pipeline,
        source,
        records,
    } = harness(StubEngine::new(300, 300), 1, publisher.clone())?;
    let shutdown = pipeline.shutdown_handle();

    pipeline.run()?;

    let received: Vec<IngestRecord> = records.try_iter().collect();
    assert_eq!(received.len(), 1);
    let record = &received[0];
    assert_eq!(record.asset, "person_detection");
    assert_eq!(record.readings.count(), 0);
    assert_eq!(record.readings.keys().collect::<Vec<_>>(), vec!["count"]);

    // First cycle renders with the seeded FPS value and no detections.
    let frames = publisher.frames();
    assert_eq!(frames.len(), 1);
    let expected = AnnotationRenderer::new().render(&captured_frame(), &[], 1.0);
    assert_eq!(frames[0], expected);
    assert_ne!(frames[0], captured_frame());

    assert_eq!(shutdown.state(), PipelineState::Stopped);
    assert!(source.is_stopped());
    Ok(())
}

#[test]
fn single_person_is_reported_with_transposed_box() -> Result<()> {
    let person = RawDetections::new(
        vec![[0.1, 0.2, 0.5, 0.6], [0.0, 0.0, 0.9, 0.9]],
        vec![0.0, 2.0],
        vec![0.91, 0.99],
    );
    let publisher = Arc::new(RecordingPublisher::default());
    let Harness {
        pipeline, records, ..
    } = harness(
        StubEngine::new(300, 300).then_output(person),
        1,
        publisher.clone(),
    )?;

    pipeline.run()?;

    let record = records.try_recv()?;
    let readings = &record.readings;
    assert_eq!(readings.count(), 1);
    assert_eq!(
        readings.get("person_1_label"),
        Some(&ReadingValue::Text("person".to_string()))
    );
    let int = |key: &str| readings.get(key).and_then(ReadingValue::as_integer);
    assert_eq!(int("person_1_score"), Some(91));
    assert_eq!(int("person_1_x1"), Some(96));
    assert_eq!(int("person_1_y1"), Some(64));
    assert_eq!(int("person_1_x2"), Some(288));
    assert_eq!(int("person_1_y2"), Some(320));
    assert!(readings.get("person_2_label").is_none());

    let expected_detection = Detection {
        label: "person".to_string(),
        score: 91,
        bounding_box: BoundingBox {
            x1: 96,
            y1: 64,
            x2: 288,
            y2: 320,
        },
    };
    let expected = AnnotationRenderer::new().render(&captured_frame(), &[expected_detection], 1.0);
    assert_eq!(publisher.frames()[0], expected);
    Ok(())
}

#[test]
fn nothing_is_published_after_shutdown_is_observed() -> Result<()> {
    let publisher = Arc::new(RecordingPublisher::default());
    let Harness {
        pipeline,
        source,
        records,
    } = harness(StubEngine::new(300, 300), 3, publisher.clone())?;
    let shutdown = pipeline.shutdown_handle();

    let handle = pipeline.spawn()?;
    handle.join()?;

    // Shutdown is requested while the third record is ingested; the fourth
    // cycle runs inference but must not emit anything.
    assert_eq!(records.try_iter().count(), 3);
    assert_eq!(publisher.frames().len(), 3);
    assert_eq!(shutdown.state(), PipelineState::Stopped);
    assert!(source.is_stopped());
    Ok(())
}

#[test]
fn grace_period_delays_stopped_state() -> Result<()> {
    let slot = Arc::new(FrameSlot::new());
    slot.store(captured_frame());
    let mut cfg = config();
    cfg.output.shutdown_grace = Duration::from_millis(300);
    let (sink, _records) = person_detection::sink::ChannelSink::new();
    let pipeline = Pipeline::new(
        &cfg,
        Box::new(SlotSource::new(slot)),
        Box::new(StubEngine::new(300, 300)),
        Box::new(sink),
        Arc::new(RecordingPublisher::default()),
    )?;
    let shutdown = pipeline.shutdown_handle();
    let handle = pipeline.spawn()?;

    std::thread::sleep(Duration::from_millis(50));
    shutdown.request_shutdown();
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(shutdown.state(), PipelineState::ShuttingDown);

    handle.join()?;
    assert_eq!(shutdown.state(), PipelineState::Stopped);
    Ok(())
}

#[test]
fn inference_failure_stops_the_pipeline() -> Result<()> {
    let publisher = Arc::new(RecordingPublisher::default());
    let engine = StubEngine::new(300, 300)
        .then_output(RawDetections::default())
        .then_fail("delegate crashed");
    let Harness {
        pipeline,
        source,
        records,
    } = harness(engine, usize::MAX, publisher.clone())?;
    let shutdown = pipeline.shutdown_handle();

    let err = pipeline.run().err().expect("inference failure is fatal");
    assert!(format!("{err:#}").contains("delegate crashed"));
    assert_eq!(records.try_iter().count(), 1);
    assert_eq!(publisher.frames().len(), 1);
    assert_eq!(shutdown.state(), PipelineState::Stopped);
    assert!(source.is_stopped());
    Ok(())
}

#[test]
fn publish_failures_are_counted_not_fatal() -> Result<()> {
    let Harness {
        pipeline, records, ..
    } = harness(StubEngine::new(300, 300), 2, Arc::new(FailingPublisher))?;

    let handle = pipeline.spawn()?;
    let shutdown = handle.shutdown_handle();
    handle.join()?;

    assert_eq!(records.try_iter().count(), 2);
    assert_eq!(shutdown.state(), PipelineState::Stopped);
    Ok(())
}

#[test]
fn emptied_slot_skips_cycles_until_refilled() -> Result<()> {
    let slot = Arc::new(FrameSlot::new());
    slot.store(captured_frame());
    let (sink, records) = person_detection::sink::ChannelSink::new();
    let pipeline = Pipeline::new(
        &config(),
        Box::new(SlotSource::new(slot.clone())),
        Box::new(StubEngine::new(300, 300)),
        Box::new(sink),
        Arc::new(RecordingPublisher::default()),
    )?;
    let handle = pipeline.spawn()?;

    records.recv_timeout(Duration::from_secs(5))?;
    slot.clear();
    // Drain anything produced from a frame read before the slot was cleared.
    std::thread::sleep(Duration::from_millis(300));
    while records.try_recv().is_ok() {}
    std::thread::sleep(Duration::from_millis(50));
    assert!(records.try_recv().is_err());
    assert!(handle.stats().skipped_cycles > 0);

    slot.store(captured_frame().with_sequence(2));
    records.recv_timeout(Duration::from_secs(5))?;

    handle.request_shutdown();
    handle.join()?;
    Ok(())
}
