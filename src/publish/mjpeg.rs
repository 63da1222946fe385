//! Loopback MJPEG preview server.
//!
//! Routes:
//! - `GET /`          small HTML page embedding the stream
//! - `GET /stream`    `multipart/x-mixed-replace` JPEG stream of annotated frames
//! - `GET /frame.jpg` latest annotated frame as a single JPEG
//! - `GET /health`    `{"status":"ok"}`
//!
//! The accept loop runs on its own thread; each client gets a thread that
//! encodes frames as they are published. Slow clients skip frames.

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use super::LatestFrame;
use crate::frame::Frame;

const MAX_REQUEST_BYTES: usize = 8192;
const BOUNDARY: &str = "frame";
const FRAME_WAIT: Duration = Duration::from_millis(500);
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

const INDEX_HTML: &str = "<!doctype html>\n<html><head><title>person detection</title></head>\n<body style=\"margin:0;background:#111\"><img src=\"/stream\" style=\"width:100%\"></body></html>\n";

#[derive(Clone, Debug)]
pub struct MjpegConfig {
    pub addr: String,
    /// JPEG quality, 1..=100.
    pub quality: u8,
}

impl Default for MjpegConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8085".to_string(),
            quality: 80,
        }
    }
}

#[derive(Debug)]
pub struct MjpegHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl MjpegHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("preview server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct MjpegServer {
    cfg: MjpegConfig,
    latest: Arc<LatestFrame>,
}

impl MjpegServer {
    pub fn new(cfg: MjpegConfig, latest: Arc<LatestFrame>) -> Self {
        Self { cfg, latest }
    }

    pub fn spawn(self) -> Result<MjpegHandle> {
        if self.cfg.quality == 0 || self.cfg.quality > 100 {
            return Err(anyhow!("jpeg quality must be 1..=100, got {}", self.cfg.quality));
        }
        let configured_addr: SocketAddr = self
            .cfg
            .addr
            .parse()
            .with_context(|| format!("invalid preview address '{}'", self.cfg.addr))?;
        let listener = TcpListener::bind(configured_addr)
            .with_context(|| format!("bind preview server on {}", configured_addr))?;
        let addr = listener.local_addr()?;
        if configured_addr.ip().is_loopback() && !addr.ip().is_loopback() {
            return Err(anyhow!(
                "preview configured for loopback address '{}', but bound to non-loopback address '{}'",
                configured_addr,
                addr
            ));
        }
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let quality = self.cfg.quality;
        let latest = self.latest;
        let join = std::thread::Builder::new()
            .name("mjpeg-preview".to_string())
            .spawn(move || {
                if let Err(err) = run_server(listener, latest, quality, shutdown_thread) {
                    log::error!("preview server stopped: {}", err);
                }
            })?;
        log::info!("preview: serving http://{}/", addr);

        Ok(MjpegHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_server(
    listener: TcpListener,
    latest: Arc<LatestFrame>,
    quality: u8,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    let mut clients: Vec<JoinHandle<()>> = Vec::new();
    let result = loop {
        if shutdown.load(Ordering::SeqCst) {
            break Ok(());
        }
        clients.retain(|client| !client.is_finished());
        match listener.accept() {
            Ok((stream, peer)) => {
                let latest = latest.clone();
                let shutdown = shutdown.clone();
                let spawned = std::thread::Builder::new()
                    .name("mjpeg-client".to_string())
                    .spawn(move || {
                        if let Err(err) = handle_connection(stream, &latest, quality, &shutdown) {
                            log::debug!("preview client {} dropped: {:#}", peer, err);
                        }
                    });
                match spawned {
                    Ok(client) => clients.push(client),
                    Err(err) => log::warn!("preview: failed to spawn client thread: {}", err),
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_BACKOFF);
            }
            Err(err) => break Err(err.into()),
        }
    };
    for client in clients {
        let _ = client.join();
    }
    result
}

fn handle_connection(
    mut stream: TcpStream,
    latest: &LatestFrame,
    quality: u8,
    shutdown: &AtomicBool,
) -> Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_write_timeout(Some(Duration::from_secs(2)))?;
    let (method, path) = read_request(&mut stream)?;
    if method != "GET" {
        return write_response(&mut stream, 405, "application/json", br#"{"error":"method_not_allowed"}"#);
    }
    match path.as_str() {
        "/" => write_response(&mut stream, 200, "text/html; charset=utf-8", INDEX_HTML.as_bytes()),
        "/health" => write_response(&mut stream, 200, "application/json", br#"{"status":"ok"}"#),
        "/frame.jpg" => match latest.latest() {
            (_, Some(frame)) => {
                let jpeg = encode_jpeg(&frame, quality)?;
                write_response(&mut stream, 200, "image/jpeg", &jpeg)
            }
            (_, None) => write_response(&mut stream, 503, "application/json", br#"{"error":"no_frame"}"#),
        },
        "/stream" => stream_frames(&mut stream, latest, quality, shutdown),
        _ => write_response(&mut stream, 404, "application/json", br#"{"error":"not_found"}"#),
    }
}

fn stream_frames(
    stream: &mut TcpStream,
    latest: &LatestFrame,
    quality: u8,
    shutdown: &AtomicBool,
) -> Result<()> {
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: multipart/x-mixed-replace; boundary={BOUNDARY}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n"
    );
    stream.write_all(header.as_bytes())?;

    // Send whatever is current right away, then each newer frame.
    let mut seen = 0u64;
    if let (generation, Some(frame)) = latest.latest() {
        write_part(stream, &encode_jpeg(&frame, quality)?)?;
        seen = generation;
    }
    while !shutdown.load(Ordering::SeqCst) {
        if let Some((generation, frame)) = latest.wait_newer(seen, FRAME_WAIT) {
            write_part(stream, &encode_jpeg(&frame, quality)?)?;
            seen = generation;
        }
    }
    Ok(())
}

fn write_part(stream: &mut TcpStream, jpeg: &[u8]) -> Result<()> {
    let header = format!(
        "--{BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        jpeg.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(jpeg)?;
    stream.write_all(b"\r\n")?;
    stream.flush()?;
    Ok(())
}

/// Encode a BGR frame as JPEG.
pub fn encode_jpeg(frame: &Frame, quality: u8) -> Result<Vec<u8>> {
    let mut rgb = frame.data().to_vec();
    for px in rgb.chunks_exact_mut(3) {
        px.swap(0, 2);
    }
    let image = RgbImage::from_raw(frame.width, frame.height, rgb)
        .ok_or_else(|| anyhow!("frame buffer does not match {}x{}", frame.width, frame.height))?;
    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, quality)
        .encode_image(&image)
        .map_err(|err| anyhow!("JPEG encode failed: {err}"))?;
    Ok(buffer)
}

fn read_request(stream: &mut TcpStream) -> Result<(String, String)> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("request too large"));
        }
        if data.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    let text = String::from_utf8_lossy(&data);
    let request_line = text
        .split("\r\n")
        .next()
        .ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let path = raw_path.split('?').next().unwrap_or(raw_path);
    Ok((method.to_string(), path.to_string()))
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        503 => "HTTP/1.1 503 Service Unavailable",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    Ok(())
}
