//! Blocking HTTP front end for the analyzer.
//!
//! One thread accepts connections; each connection is served on its own
//! thread against a shared `Analyzer`. An analysis is cancelled when its
//! client disconnects or the server shuts down.

pub mod multipart;

use crate::config::ServerSettings;
use crate::pipeline::{Analyzer, CancelFlag};
use anyhow::{anyhow, Context, Result};
use rand::RngCore;
use std::collections::HashMap;
use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const MAX_HEADER_BYTES: usize = 16 * 1024;
const VIDEO_EXTENSIONS: [&str; 3] = [".mp4", ".mov", ".avi"];
const DISCONNECT_POLL: Duration = Duration::from_millis(100);

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    /// Stop accepting, cancel in-flight analyses and wait for the accept loop.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ApiServer {
    settings: ServerSettings,
    analyzer: Arc<Analyzer>,
}

impl ApiServer {
    pub fn new(settings: ServerSettings, analyzer: Arc<Analyzer>) -> Self {
        Self { settings, analyzer }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self
            .settings
            .addr
            .parse()
            .with_context(|| format!("invalid listen address '{}'", self.settings.addr))?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let settings = Arc::new(self.settings);
        let analyzer = self.analyzer;
        let join = std::thread::spawn(move || {
            if let Err(err) = run_api(listener, settings, analyzer, shutdown_thread) {
                log::error!("api server stopped: {}", err);
            }
        });

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(
    listener: TcpListener,
    settings: Arc<ServerSettings>,
    analyzer: Arc<Analyzer>,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                let settings = settings.clone();
                let analyzer = analyzer.clone();
                let shutdown = shutdown.clone();
                std::thread::spawn(move || {
                    let request_id = request_id();
                    if let Err(err) =
                        handle_connection(stream, &request_id, &settings, &analyzer, &shutdown)
                    {
                        log::warn!("[{}] request from {} failed: {:#}", request_id, peer, err);
                    }
                });
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn request_id() -> String {
    let mut id = [0u8; 6];
    rand::thread_rng().fill_bytes(&mut id);
    hex::encode(id)
}

fn handle_connection(
    mut stream: TcpStream,
    request_id: &str,
    settings: &ServerSettings,
    analyzer: &Analyzer,
    shutdown: &AtomicBool,
) -> Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(Duration::from_secs(settings.read_timeout_secs.max(1))))?;

    let request = read_head(&mut stream)?;
    let cors = cors_headers(settings, &request);
    log::info!("[{}] {} {}", request_id, request.method, request.path);

    if request.method == "OPTIONS" {
        return write_response(&mut stream, 204, &cors, "text/plain", b"");
    }

    let route = (request.method.clone(), request.path.clone());
    match (route.0.as_str(), route.1.as_str()) {
        ("GET", "/") => {
            let body = serde_json::json!({
                "service": "ball-speed",
                "version": env!("CARGO_PKG_VERSION"),
                "backend": analyzer.backend_name(),
            });
            write_json(&mut stream, 200, &cors, &body)
        }
        ("GET", "/health") => write_json(&mut stream, 200, &cors, &serde_json::json!({"status": "ok"})),
        ("POST", "/api/analyze") => {
            analyze_upload(stream, request, request_id, settings, analyzer, shutdown, &cors)
        }
        (_, "/" | "/health" | "/api/analyze") => write_json(
            &mut stream,
            405,
            &cors,
            &serde_json::json!({"detail": "method not allowed"}),
        ),
        _ => write_json(&mut stream, 404, &cors, &serde_json::json!({"detail": "not found"})),
    }
}

fn analyze_upload(
    mut stream: TcpStream,
    mut request: HttpRequest,
    request_id: &str,
    settings: &ServerSettings,
    analyzer: &Analyzer,
    shutdown: &AtomicBool,
    cors: &[(String, String)],
) -> Result<()> {
    let length = match request.content_length() {
        Some(length) => length,
        None => {
            return write_json(
                &mut stream,
                411,
                cors,
                &serde_json::json!({"detail": "Content-Length required"}),
            )
        }
    };
    if length > settings.max_upload_bytes {
        return write_json(
            &mut stream,
            413,
            cors,
            &serde_json::json!({"detail": format!("upload exceeds {} bytes", settings.max_upload_bytes)}),
        );
    }
    read_body(&mut stream, &mut request.body, length)?;

    let content_type = request.headers.get("content-type").cloned().unwrap_or_default();
    let video = match upload_file(&content_type, &request.body) {
        Ok(video) => video,
        Err(err) => {
            log::info!("[{}] upload rejected: {}", request_id, err);
            return write_json(
                &mut stream,
                400,
                cors,
                &serde_json::json!({"detail": "Please upload a video file (.mp4, .mov or .avi)"}),
            );
        }
    };

    log::info!("[{}] analyzing {} bytes", request_id, video.len());
    let started = Instant::now();
    let cancel = CancelFlag::new();
    let done = AtomicBool::new(false);
    let watch_stream = stream.try_clone()?;

    let result = std::thread::scope(|scope| {
        scope.spawn(|| watch_disconnect(watch_stream, &cancel, &done, shutdown, request_id));
        let result = analyzer.analyze(video, &cancel);
        done.store(true, Ordering::SeqCst);
        result
    });

    if cancel.is_cancelled() {
        log::info!("[{}] analysis cancelled", request_id);
        return Ok(());
    }
    // the watcher switched the shared socket to non-blocking
    stream.set_nonblocking(false)?;
    log::info!(
        "[{}] done in {:.2}s success={} speed_kmh={:?}",
        request_id,
        started.elapsed().as_secs_f64(),
        result.success,
        result.speed_kmh
    );
    let body = serde_json::to_value(&result)?;
    write_json(&mut stream, 200, cors, &body)
}

/// The single video file part of a multipart upload.
fn upload_file<'a>(content_type: &str, body: &'a [u8]) -> Result<&'a [u8]> {
    let boundary = multipart::boundary(content_type)?;
    let parts = multipart::parse(body, &boundary)?;
    let mut files = parts.into_iter().filter(|part| part.filename.is_some());
    let file = files
        .next()
        .ok_or_else(|| anyhow!("no file part in upload"))?;
    if files.next().is_some() {
        return Err(anyhow!("more than one file in upload"));
    }
    let filename = file.filename.as_deref().unwrap_or_default().to_lowercase();
    if !VIDEO_EXTENSIONS.iter().any(|ext| filename.ends_with(ext)) {
        return Err(anyhow!("'{}' is not a supported video file", filename));
    }
    Ok(file.data)
}

/// Cancels the analysis when the peer closes its socket or the server stops.
fn watch_disconnect(
    stream: TcpStream,
    cancel: &CancelFlag,
    done: &AtomicBool,
    shutdown: &AtomicBool,
    request_id: &str,
) {
    if stream.set_nonblocking(true).is_err() {
        return;
    }
    let mut probe = [0u8; 1];
    while !done.load(Ordering::SeqCst) {
        if shutdown.load(Ordering::SeqCst) {
            log::info!("[{}] server shutting down, cancelling", request_id);
            cancel.cancel();
            return;
        }
        match stream.peek(&mut probe) {
            Ok(0) => {
                log::info!("[{}] client disconnected, cancelling", request_id);
                cancel.cancel();
                return;
            }
            Err(err) if err.kind() != ErrorKind::WouldBlock && err.kind() != ErrorKind::Interrupted => {
                cancel.cancel();
                return;
            }
            _ => {}
        }
        std::thread::sleep(DISCONNECT_POLL);
    }
}

fn cors_headers(settings: &ServerSettings, request: &HttpRequest) -> Vec<(String, String)> {
    let Some(origin) = request.headers.get("origin") else {
        return Vec::new();
    };
    let allowed = settings
        .allowed_origins
        .iter()
        .any(|allowed| allowed == "*" || allowed == origin);
    if !allowed {
        return Vec::new();
    }
    let allow_headers = request
        .headers
        .get("access-control-request-headers")
        .cloned()
        .unwrap_or_else(|| "*".to_string());
    vec![
        ("Access-Control-Allow-Origin".into(), origin.clone()),
        ("Access-Control-Allow-Credentials".into(), "true".into()),
        ("Access-Control-Allow-Methods".into(), "GET, POST, OPTIONS".into()),
        ("Access-Control-Allow-Headers".into(), allow_headers),
        ("Vary".into(), "Origin".into()),
    ]
}

/// Read the request line and headers. Bytes read past the header end are kept
/// as the start of the body.
fn read_head(stream: &mut TcpStream) -> Result<HttpRequest> {
    let mut buf = [0u8; 4096];
    let mut data = Vec::new();
    let header_end = loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("connection closed before request headers"));
        }
        data.extend_from_slice(&buf[..n]);
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        if data.len() > MAX_HEADER_BYTES {
            return Err(anyhow!("request headers too large"));
        }
    };

    let text = String::from_utf8_lossy(&data[..header_end]).into_owned();
    let body = data[header_end + 4..].to_vec();
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
        method: method.to_uppercase(),
        path,
        headers,
        body,
    })
}

fn read_body(stream: &mut TcpStream, body: &mut Vec<u8>, length: usize) -> Result<()> {
    if body.len() > length {
        body.truncate(length);
        return Ok(());
    }
    body.reserve(length - body.len());
    let mut buf = vec![0u8; 64 * 1024];
    while body.len() < length {
        let want = (length - body.len()).min(buf.len());
        let n = stream.read(&mut buf[..want])?;
        if n == 0 {
            return Err(anyhow!(
                "connection closed after {} of {} body bytes",
                body.len(),
                length
            ));
        }
        body.extend_from_slice(&buf[..n]);
    }
    Ok(())
}

fn write_json(
    stream: &mut TcpStream,
    status: u16,
    extra: &[(String, String)],
    body: &serde_json::Value,
) -> Result<()> {
    let payload = serde_json::to_vec(body)?;
    write_response(stream, status, extra, "application/json", &payload)
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    extra: &[(String, String)],
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        204 => "HTTP/1.1 204 No Content",
        400 => "HTTP/1.1 400 Bad Request",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        411 => "HTTP/1.1 411 Length Required",
        413 => "HTTP/1.1 413 Payload Too Large",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let mut header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    for (name, value) in extra {
        header.push_str(&format!("{}: {}\r\n", name, value));
    }
    header.push_str("\r\n");
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

impl HttpRequest {
    fn content_length(&self) -> Option<usize> {
        self.headers
            .get("content-length")
            .and_then(|value| value.parse().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(headers: &[(&str, &str)]) -> HttpRequest {
        HttpRequest {
            method: "POST".into(),
            path: "/api/analyze".into(),
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            body: Vec::new(),
        }
    }

    #[test]
    fn cors_echoes_allowed_origin_only() {
        let settings = ServerSettings::default();
        let allowed = cors_headers(&settings, &request(&[("origin", "http://localhost:3000")]));
        assert!(allowed
            .iter()
            .any(|(k, v)| k == "Access-Control-Allow-Origin" && v == "http://localhost:3000"));

        let denied = cors_headers(&settings, &request(&[("origin", "http://evil.example")]));
        assert!(denied.is_empty());
        assert!(cors_headers(&settings, &request(&[])).is_empty());
    }

    #[test]
    fn upload_requires_video_extension() {
        let body = b"--b\r\nContent-Disposition: form-data; name=\"file\"; filename=\"notes.txt\"\r\n\r\nhi\r\n--b--\r\n";
        assert!(upload_file("multipart/form-data; boundary=b", body).is_err());

        let body = b"--b\r\nContent-Disposition: form-data; name=\"file\"; filename=\"Pitch.MOV\"\r\n\r\nhi\r\n--b--\r\n";
        assert_eq!(upload_file("multipart/form-data; boundary=b", body).unwrap(), b"hi");
    }
}
