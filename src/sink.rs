//! Readings ingestion.
//!
//! Every processed cycle produces one `IngestRecord`:
//!
//! ```json
//! {"asset": "person_detection", "timestamp": "...", "readings": {"count": 0}}
//! ```
//!
//! Sinks receive records synchronously on the processing thread. A sink
//! failure is reported to the caller, which logs it and keeps going; records
//! are never retried or buffered.

use anyhow::{anyhow, Context, Result};
use rumqttc::v5::{mqttbytes::QoS, Client, Connection, Event, Incoming, MqttOptions};
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::config::{SinkKind, SinkSettings};
use crate::readings::ReadingRecord;

/// Local wall-clock timestamp with microseconds and UTC offset.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f%:z";

const MQTT_QUEUE_CAPACITY: usize = 10;
const MQTT_RECONNECT_BACKOFF: Duration = Duration::from_millis(500);
const MQTT_CLOSE_WAIT: Duration = Duration::from_secs(2);

/// One readings record tagged with its asset name and capture time.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct IngestRecord {
    pub asset: String,
    pub timestamp: String,
    pub readings: ReadingRecord,
}

impl IngestRecord {
    /// Stamp `readings` with the current local time.
    pub fn new(asset: &str, readings: ReadingRecord) -> Self {
        Self {
            asset: asset.to_string(),
            timestamp: local_timestamp(),
            readings,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).context("serialize readings record")
    }
}

pub fn local_timestamp() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Destination for readings records.
pub trait IngestionSink: Send {
    fn name(&self) -> &'static str;

    fn ingest(&mut self, record: IngestRecord) -> Result<()>;
}

/// Build the sink selected in the configuration.
pub fn build_sink(settings: &SinkSettings) -> Result<Box<dyn IngestionSink>> {
    match settings.kind {
        SinkKind::Log => Ok(Box::new(LogSink)),
        SinkKind::JsonLines => {
            let path = settings
                .path
                .as_ref()
                .ok_or_else(|| anyhow!("jsonl sink requires an output path"))?;
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("open readings file {}", path.display()))?;
            log::info!("readings: appending to {}", path.display());
            Ok(Box::new(JsonLinesSink::new(BufWriter::new(file))))
        }
        SinkKind::Mqtt => Ok(Box::new(MqttSink::connect(settings)?)),
    }
}

/// Logs each record at info level.
pub struct LogSink;

impl IngestionSink for LogSink {
    fn name(&self) -> &'static str {
        "log"
    }

    fn ingest(&mut self, record: IngestRecord) -> Result<()> {
        log::info!("readings: {}", record.to_json()?);
        Ok(())
    }
}

/// Writes one JSON object per line and flushes after each record.
pub struct JsonLinesSink<W: Write + Send> {
    writer: W,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> IngestionSink for JsonLinesSink<W> {
    fn name(&self) -> &'static str {
        "jsonl"
    }

    fn ingest(&mut self, record: IngestRecord) -> Result<()> {
        let line = record.to_json()?;
        writeln!(self.writer, "{}", line).context("write readings record")?;
        self.writer.flush().context("flush readings record")?;
        Ok(())
    }
}

/// Hands records to an in-process receiver.
pub struct ChannelSink {
    tx: mpsc::Sender<IngestRecord>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::Receiver<IngestRecord>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx }, rx)
    }
}

impl IngestionSink for ChannelSink {
    fn name(&self) -> &'static str {
        "channel"
    }

    fn ingest(&mut self, record: IngestRecord) -> Result<()> {
        self.tx
            .send(record)
            .map_err(|_| anyhow!("readings receiver disconnected"))
    }
}

/// Publishes records as JSON to an MQTT topic with QoS 1.
///
/// `ingest` only queues the record for the connection thread and fails fast
/// when the queue is full, so a slow or absent broker never stalls the
/// processing loop. The connection thread keeps reconnecting until the sink
/// is dropped.
pub struct MqttSink {
    client: Client,
    topic: String,
    closing: Arc<AtomicBool>,
    connection_handle: Option<JoinHandle<()>>,
}

impl MqttSink {
    pub fn connect(settings: &SinkSettings) -> Result<Self> {
        if settings.mqtt_topic.trim().is_empty() {
            return Err(anyhow!("mqtt sink requires a topic"));
        }
        let mut options = MqttOptions::new(
            settings.mqtt_client_id.as_str(),
            settings.mqtt_host.as_str(),
            settings.mqtt_port,
        );
        options.set_keep_alive(Duration::from_secs(60));
        options.set_clean_start(true);

        let (client, connection) = Client::new(options, MQTT_QUEUE_CAPACITY);
        let closing = Arc::new(AtomicBool::new(false));
        log::info!(
            "readings: publishing to mqtt://{}:{}/{}",
            settings.mqtt_host,
            settings.mqtt_port,
            settings.mqtt_topic
        );
        Ok(Self {
            client,
            topic: settings.mqtt_topic.clone(),
            connection_handle: Some(drive_connection(connection, closing.clone())?),
            closing,
        })
    }
}

fn drive_connection(mut connection: Connection, closing: Arc<AtomicBool>) -> Result<JoinHandle<()>> {
    let handle = std::thread::Builder::new()
        .name("mqtt-connection".to_string())
        .spawn(move || {
            let mut failures = 0u64;
            for event in connection.iter() {
                match event {
                    Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                        if failures > 0 {
                            log::info!("MQTT reconnected after {} failed attempts", failures);
                        }
                        failures = 0;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        if closing.load(Ordering::SeqCst) {
                            break;
                        }
                        failures += 1;
                        if failures == 1 {
                            log::warn!("MQTT connection error: {}; reconnecting", e);
                        } else {
                            log::debug!("MQTT reconnect attempt {} failed: {}", failures, e);
                        }
                        std::thread::sleep(MQTT_RECONNECT_BACKOFF);
                    }
                }
            }
        })?;
    Ok(handle)
}

impl IngestionSink for MqttSink {
    fn name(&self) -> &'static str {
        "mqtt"
    }

    fn ingest(&mut self, record: IngestRecord) -> Result<()> {
        let payload = record.to_json()?;
        self.client
            .try_publish(self.topic.as_str(), QoS::AtLeastOnce, false, payload.into_bytes())
            .context("queue readings record for mqtt")?;
        Ok(())
    }
}

impl Drop for MqttSink {
    fn drop(&mut self) {
        self.closing.store(true, Ordering::SeqCst);
        if let Err(err) = self.client.try_disconnect() {
            log::debug!("mqtt disconnect: {}", err);
        }
        if let Some(handle) = self.connection_handle.take() {
            // A connect attempt in flight only ends at its timeout; don't hold shutdown for it.
            let deadline = Instant::now() + MQTT_CLOSE_WAIT;
            while !handle.is_finished() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(20));
            }
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                log::debug!("mqtt connection thread still closing, detaching");
            }
        }
    }
}
