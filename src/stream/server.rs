//! MJPEG streaming server.
//!
//! One accept thread polls a nonblocking listener; each accepted client gets
//! its own thread, so a stalled viewer only ever blocks itself. Frames are
//! JPEG-encoded on read and the encoding is shared by every client that
//! asks for the same generation.

use anyhow::{anyhow, Result};
use image::codecs::jpeg::JpegEncoder;
use serde::Serialize;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::{
    metrics, FrameSlot, PipelineState, PipelineStatus, PublishedFrame, SlotRead, StatusBoard,
};
use crate::config::StreamingSettings;
use crate::error::StreamingClientError;

const MAX_REQUEST_BYTES: usize = 8192;
const ACCEPT_POLL: Duration = Duration::from_millis(50);
const FRAME_WAIT: Duration = Duration::from_millis(500);
const BOUNDARY: &str = "frame";

#[derive(Debug)]
pub struct StreamHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl StreamHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("stream server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct StreamingServer {
    settings: StreamingSettings,
    frames: Arc<FrameSlot>,
    status: Arc<StatusBoard>,
}

impl StreamingServer {
    pub fn new(
        settings: StreamingSettings,
        frames: Arc<FrameSlot>,
        status: Arc<StatusBoard>,
    ) -> Self {
        Self {
            settings,
            frames,
            status,
        }
    }

    pub fn spawn(self) -> Result<StreamHandle> {
        let listener = TcpListener::bind(self.settings.addr())?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let ctx = Arc::new(ServerContext {
            settings: self.settings,
            frames: self.frames,
            status: self.status,
            jpeg: JpegCache::default(),
            shutdown: shutdown.clone(),
            clients: AtomicUsize::new(0),
        });
        let join = thread::Builder::new()
            .name("stream-accept".to_string())
            .spawn(move || {
                if let Err(err) = run_server(listener, ctx) {
                    log::error!("stream server stopped: {}", err);
                }
            })?;
        log::info!("streaming on http://{addr}/stream");

        Ok(StreamHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

struct ServerContext {
    settings: StreamingSettings,
    frames: Arc<FrameSlot>,
    status: Arc<StatusBoard>,
    jpeg: JpegCache,
    shutdown: Arc<AtomicBool>,
    clients: AtomicUsize,
}

impl ServerContext {
    fn stopping(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

/// Releases a client slot when the client thread ends.
struct ClientSlot<'a>(&'a AtomicUsize);

impl Drop for ClientSlot<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// JPEG bytes of the most recently encoded generation.
#[derive(Default)]
struct JpegCache {
    latest: Mutex<Option<(u64, Arc<Vec<u8>>)>>,
}

impl JpegCache {
    fn get(
        &self,
        generation: u64,
        frame: &PublishedFrame,
        quality: u8,
    ) -> Result<Arc<Vec<u8>>, StreamingClientError> {
        let mut latest = self.latest.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((cached, bytes)) = latest.as_ref() {
            if *cached == generation {
                return Ok(Arc::clone(bytes));
            }
        }
        let bytes = Arc::new(encode_jpeg(frame, quality)?);
        *latest = Some((generation, Arc::clone(&bytes)));
        Ok(bytes)
    }
}

fn encode_jpeg(frame: &PublishedFrame, quality: u8) -> Result<Vec<u8>, StreamingClientError> {
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100))
        .encode_image(frame.image.as_ref())
        .map_err(|e| StreamingClientError::Encode(e.to_string()))?;
    Ok(out)
}

fn run_server(listener: TcpListener, ctx: Arc<ServerContext>) -> Result<()> {
    loop {
        if ctx.stopping() {
            break;
        }
        match listener.accept() {
            Ok((stream, peer)) => accept_client(stream, peer, &ctx),
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL);
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn accept_client(stream: TcpStream, peer: SocketAddr, ctx: &Arc<ServerContext>) {
    let ctx = Arc::clone(ctx);
    let spawned = thread::Builder::new()
        .name(format!("stream-client-{peer}"))
        .spawn(move || {
            let active = ctx.clients.fetch_add(1, Ordering::SeqCst);
            let _slot = ClientSlot(&ctx.clients);
            let over_limit = active >= ctx.settings.max_clients;
            if over_limit {
                log::warn!("stream client {peer} refused: {active} clients connected");
            }
            if let Err(err) = handle_client(stream, &ctx, over_limit) {
                log::debug!("stream client {peer}: {err}");
            }
        });
    if let Err(err) = spawned {
        log::warn!("stream client {peer} dropped: {err}");
    }
}

fn handle_client(
    mut stream: TcpStream,
    ctx: &ServerContext,
    over_limit: bool,
) -> Result<(), StreamingClientError> {
    stream.set_nonblocking(false)?;
    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(StreamingClientError::TooLarge) => {
            return write_json(&mut stream, 413, r#"{"error":"request_too_large"}"#);
        }
        Err(StreamingClientError::BadRequest(reason)) => {
            write_json(&mut stream, 400, r#"{"error":"bad_request"}"#)?;
            return Err(StreamingClientError::BadRequest(reason));
        }
        Err(err) => return Err(err),
    };
    if over_limit {
        return write_json(&mut stream, 503, r#"{"error":"too_many_clients"}"#);
    }
    if request.method != "GET" {
        return write_json(&mut stream, 405, r#"{"error":"method_not_allowed"}"#);
    }
    if request.path != "/health" && !authorized(&request, ctx.settings.auth_token.as_deref()) {
        return write_json(&mut stream, 401, r#"{"error":"unauthorized"}"#);
    }
    match request.path.as_str() {
        "/stream" => serve_stream(stream, ctx),
        "/snapshot" => serve_snapshot(&mut stream, ctx),
        "/status" => serve_status(&mut stream, ctx),
        "/metrics" => serve_metrics(&mut stream, ctx),
        "/health" => serve_health(&mut stream, ctx),
        _ => write_json(&mut stream, 404, r#"{"error":"not_found"}"#),
    }
}

fn authorized(request: &HttpRequest, token: Option<&str>) -> bool {
    let Some(expected) = token else {
        return true;
    };
    request.bearer_token().as_deref() == Some(expected)
        || request.query_param("token").as_deref() == Some(expected)
}

fn serve_stream(mut stream: TcpStream, ctx: &ServerContext) -> Result<(), StreamingClientError> {
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: multipart/x-mixed-replace; boundary={BOUNDARY}\r\nCache-Control: no-cache, no-store\r\nPragma: no-cache\r\nConnection: close\r\n\r\n"
    );
    stream.write_all(header.as_bytes())?;
    let min_interval = Duration::from_secs_f64(1.0 / f64::from(ctx.settings.max_fps.max(1)));
    let mut seen = 0u64;
    let mut last_sent: Option<Instant> = None;
    while !ctx.stopping() {
        let (mut generation, mut frame) = match ctx.frames.wait_newer(seen, FRAME_WAIT) {
            SlotRead::Value { generation, value } => (generation, value),
            SlotRead::Timeout => continue,
            SlotRead::Closed => break,
        };
        if let Some(last) = last_sent {
            let elapsed = last.elapsed();
            if elapsed < min_interval {
                thread::sleep(min_interval - elapsed);
                if let Some((newer, value)) = ctx.frames.latest() {
                    generation = newer;
                    frame = value;
                }
            }
        }
        let jpeg = ctx.jpeg.get(generation, &frame, ctx.settings.quality)?;
        let part = format!(
            "--{BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\nX-Frame-Sequence: {}\r\n\r\n",
            jpeg.len(),
            frame.sequence
        );
        stream.write_all(part.as_bytes())?;
        stream.write_all(&jpeg)?;
        stream.write_all(b"\r\n")?;
        stream.flush()?;
        seen = generation;
        last_sent = Some(Instant::now());
    }
    Ok(())
}

fn serve_snapshot(stream: &mut TcpStream, ctx: &ServerContext) -> Result<(), StreamingClientError> {
    match ctx.frames.latest() {
        Some((generation, frame)) => {
            let jpeg = ctx.jpeg.get(generation, &frame, ctx.settings.quality)?;
            write_response(stream, 200, "image/jpeg", &jpeg)
        }
        None => write_json(stream, 503, r#"{"error":"no_frame"}"#),
    }
}

#[derive(Serialize)]
struct StatusResponse {
    #[serde(flatten)]
    pipeline: PipelineStatus,
    stream_clients: usize,
}

fn serve_status(stream: &mut TcpStream, ctx: &ServerContext) -> Result<(), StreamingClientError> {
    let body = StatusResponse {
        pipeline: ctx.status.snapshot(),
        stream_clients: ctx.clients.load(Ordering::SeqCst),
    };
    let payload =
        serde_json::to_vec(&body).map_err(|e| StreamingClientError::Encode(e.to_string()))?;
    write_response(stream, 200, "application/json", &payload)
}

fn serve_metrics(stream: &mut TcpStream, ctx: &ServerContext) -> Result<(), StreamingClientError> {
    let body = metrics::render(&ctx.status.snapshot(), ctx.clients.load(Ordering::SeqCst));
    write_response(stream, 200, metrics::CONTENT_TYPE, body.as_bytes())
}

/// `None` when healthy, otherwise the reason reported with the 503.
fn health_problem(ctx: &ServerContext) -> Option<&'static str> {
    match ctx.status.state() {
        PipelineState::Running => {}
        other => return Some(other.as_str()),
    }
    let stale_after = ctx.settings.stale_after();
    match ctx.frames.latest() {
        None => Some("no_frame"),
        Some((_, frame)) if frame.published_at.elapsed() > stale_after => Some("stale"),
        Some(_) => None,
    }
}

fn serve_health(stream: &mut TcpStream, ctx: &ServerContext) -> Result<(), StreamingClientError> {
    match health_problem(ctx) {
        None => write_json(stream, 200, r#"{"status":"ok"}"#),
        Some(reason) => {
            let body = format!(r#"{{"status":"{reason}"}}"#);
            write_json(stream, 503, &body)
        }
    }
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest, StreamingClientError> {
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
            return Err(StreamingClientError::TooLarge);
        }
        if data.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    let text = String::from_utf8_lossy(&data);
    let mut lines = text.split("\r\n");
    let request_line = lines
        .next()
        .filter(|line| !line.is_empty())
        .ok_or(StreamingClientError::BadRequest("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts
        .next()
        .ok_or(StreamingClientError::BadRequest("missing method"))?;
    let raw_path = parts
        .next()
        .ok_or(StreamingClientError::BadRequest("missing path"))?;
    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }
    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
        headers,
        raw_path: raw_path.to_string(),
    })
}

fn write_json(stream: &mut TcpStream, status: u16, body: &str) -> Result<(), StreamingClientError> {
    write_response(stream, status, "application/json", body.as_bytes())
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<(), StreamingClientError> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        400 => "HTTP/1.1 400 Bad Request",
        401 => "HTTP/1.1 401 Unauthorized",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        413 => "HTTP/1.1 413 Payload Too Large",
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

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    headers: HashMap<String, String>,
    raw_path: String,
}

impl HttpRequest {
    fn bearer_token(&self) -> Option<String> {
        let value = self.headers.get("authorization")?;
        let parts: Vec<&str> = value.split_whitespace().collect();
        if parts.len() == 2 && parts[0].eq_ignore_ascii_case("bearer") {
            return Some(parts[1].to_string());
        }
        None
    }

    fn query_param(&self, name: &str) -> Option<String> {
        let query = self.raw_path.split('?').nth(1)?;
        query
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.to_string())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
