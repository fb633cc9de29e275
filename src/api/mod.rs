//! HTTP surface of the monitor.
//!
//! A small blocking server on `std::net`: one accept thread polling a
//! non-blocking listener, and one worker thread per connection so a
//! long-lived `/video_feed` never stalls `/status`.
//!
//! Routes:
//! - `GET /` — viewer page
//! - `GET /status` — model and configuration summary
//! - `GET /video_feed` — annotated multipart MJPEG stream
//! - `POST /detect` — single-shot detection on a base64 data URL

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::annotate::Annotator;
use crate::capture::CaptureLoop;
use crate::compliance::ComplianceAggregator;
use crate::config::MonitorConfig;
use crate::detect::SharedDetector;
use crate::encode::MultipartEncoder;
use crate::error::PipelineError;
use crate::inspect::{decode_data_url, Inspector, StatusReport};

const MAX_HEADER_BYTES: usize = 8192;
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>PPE Monitor</title></head>
<body style="font-family: sans-serif; background: #111; color: #eee;">
<h1>PPE Compliance Monitor</h1>
<p id="status">checking model...</p>
<img src="/video_feed" alt="live stream" style="max-width: 100%;">
<script>
fetch('/status').then(r => r.json()).then(s => {
  document.getElementById('status').textContent =
    s.status + ' | required: ' + s.required_ppe.join(', ');
});
</script>
</body>
</html>
"#;

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    /// Stop accepting connections and cancel open streams.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

/// State shared by every connection worker.
struct ApiContext {
    config: MonitorConfig,
    detector: Option<SharedDetector>,
    inspector: Inspector,
    shutdown: Arc<AtomicBool>,
}

pub struct ApiServer {
    config: MonitorConfig,
    detector: Option<SharedDetector>,
}

impl ApiServer {
    /// `detector` is `None` when the model could not be loaded; the server
    /// still answers `/status` so the problem is visible.
    pub fn new(config: MonitorConfig, detector: Option<SharedDetector>) -> Self {
        Self { config, detector }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr = self.config.api.addr();
        let listener = TcpListener::bind(&configured_addr)
            .with_context(|| format!("bind api listener on {configured_addr}"))?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let context = Arc::new(ApiContext {
            inspector: Inspector::new(
                ComplianceAggregator::new(self.config.required.clone()),
                Annotator::default(),
            ),
            config: self.config,
            detector: self.detector,
            shutdown: shutdown.clone(),
        });
        let join = std::thread::spawn(move || {
            if let Err(err) = run_api(listener, context) {
                log::error!("api server stopped: {}", err);
            }
        });

        log::info!("api listening on http://{}", addr);
        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(listener: TcpListener, context: Arc<ApiContext>) -> Result<()> {
    loop {
        if context.shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                let context = context.clone();
                std::thread::spawn(move || {
                    if let Err(err) = handle_connection(stream, &context) {
                        log::warn!("api request from {} rejected: {:#}", peer, err);
                    }
                });
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(mut stream: TcpStream, context: &ApiContext) -> Result<()> {
    stream.set_nonblocking(false)?;
    let request = read_request(&mut stream)?;
    log::debug!("{} {}", request.method, request.path);

    match (request.method.as_str(), request.path.as_str()) {
        ("OPTIONS", _) => write_response(&mut stream, 204, "text/plain", b""),
        ("GET", "/") => write_response(
            &mut stream,
            200,
            "text/html; charset=utf-8",
            INDEX_HTML.as_bytes(),
        ),
        ("GET", "/status") => {
            let report = StatusReport::from_config(&context.config);
            write_json(&mut stream, 200, &serde_json::to_value(report)?)
        }
        ("GET", "/video_feed") => stream_video(&mut stream, context),
        ("POST", "/detect") => handle_detect(&mut stream, context, &request.body),
        (_, "/" | "/status" | "/video_feed" | "/detect") => write_json(
            &mut stream,
            405,
            &json!({"error": "method_not_allowed"}),
        ),
        _ => write_json(&mut stream, 404, &json!({"error": "not_found"})),
    }
}

fn stream_video(stream: &mut TcpStream, context: &ApiContext) -> Result<()> {
    let config = &context.config;
    let mut capture = CaptureLoop::new(
        config.camera.clone(),
        context.detector.clone(),
        ComplianceAggregator::new(config.required.clone()),
        Annotator::default(),
        MultipartEncoder::new(config.jpeg_quality),
    )
    .with_cancel(context.shutdown.clone());

    if let Err(err) = capture.open() {
        let status = match err {
            PipelineError::ResourceUnavailable(_) if context.detector.is_none() => 500,
            _ => 503,
        };
        return write_json(stream, status, &json!({"error": err.to_string()}));
    }

    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nCache-Control: no-store\r\nAccess-Control-Allow-Origin: *\r\nConnection: close\r\n\r\n",
        capture.content_type()
    );
    stream.write_all(header.as_bytes())?;

    for chunk in capture.by_ref() {
        match chunk {
            Ok(chunk) => {
                if let Err(err) = stream.write_all(&chunk).and_then(|_| stream.flush()) {
                    // Client went away; dropping the loop releases the camera.
                    log::info!("video_feed client disconnected: {}", err);
                    break;
                }
            }
            Err(err) => {
                log::error!("video_feed ended: {}", err);
                break;
            }
        }
    }
    Ok(())
}

#[derive(Deserialize)]
struct DetectRequest {
    #[serde(default)]
    image: Option<String>,
}

fn handle_detect(stream: &mut TcpStream, context: &ApiContext, body: &[u8]) -> Result<()> {
    let Some(detector) = context.detector.as_ref() else {
        return write_json(stream, 500, &json!({"error": "Model not loaded"}));
    };
    let request: DetectRequest = match serde_json::from_slice(body) {
        Ok(request) => request,
        Err(err) => {
            return write_json(stream, 400, &json!({"error": format!("invalid json: {err}")}));
        }
    };
    let image_data = match request.image {
        Some(image) if !image.trim().is_empty() => image,
        _ => return write_json(stream, 400, &json!({"error": "No image provided"})),
    };
    let image = match decode_data_url(&image_data) {
        Ok(image) => image,
        Err(err) => return write_json(stream, 400, &json!({"error": err.to_string()})),
    };

    let inspection = {
        let mut detector = detector
            .lock()
            .map_err(|_| anyhow!("detector lock poisoned"))?;
        let threshold = detector.confidence_threshold();
        context.inspector.inspect(&mut detector, &image, threshold)
    };
    let response = match inspection.and_then(|i| i.to_response(context.config.jpeg_quality)) {
        Ok(response) => response,
        Err(err) => {
            log::error!("detect failed: {}", err);
            return write_json(stream, 500, &json!({"error": err.to_string()}));
        }
    };
    write_json(stream, 200, &serde_json::to_value(response)?)
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(5)))?;
    let mut buf = [0u8; 4096];
    let mut data = Vec::new();
    let header_end = loop {
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        if data.len() > MAX_HEADER_BYTES {
            return Err(anyhow!("request headers too large"));
        }
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("connection closed before request completed"));
        }
        data.extend_from_slice(&buf[..n]);
    };

    let mut request = parse_head(&data[..header_end])?;
    let content_length = match request.headers.get("content-length") {
        Some(value) => value
            .parse::<usize>()
            .map_err(|_| anyhow!("invalid content-length"))?,
        None => 0,
    };
    if content_length > MAX_BODY_BYTES {
        return Err(anyhow!("request body too large"));
    }
    let mut body = data.split_off(header_end + 4);
    while body.len() < content_length {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("connection closed before body completed"));
        }
        body.extend_from_slice(&buf[..n]);
    }
    body.truncate(content_length);
    request.body = body;
    Ok(request)
}

fn parse_head(head: &[u8]) -> Result<HttpRequest> {
    let text = String::from_utf8_lossy(head);
    let mut lines = text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let mut headers = HashMap::new();
    for line in lines {
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }
    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_ascii_uppercase(),
        path,
        headers,
        body: Vec::new(),
    })
}

fn write_json(stream: &mut TcpStream, status: u16, body: &serde_json::Value) -> Result<()> {
    let payload = serde_json::to_vec(body)?;
    write_response(stream, status, "application/json", &payload)
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        204 => "HTTP/1.1 204 No Content",
        400 => "HTTP/1.1 400 Bad Request",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        503 => "HTTP/1.1 503 Service Unavailable",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nAccess-Control-Allow-Origin: *\r\nAccess-Control-Allow-Methods: GET, POST, OPTIONS\r\nAccess-Control-Allow-Headers: Content-Type\r\nConnection: close\r\n\r\n",
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    stream.flush()?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    headers: HashMap<String, String>,
    body: Vec<u8>,
}
