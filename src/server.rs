// ABOUTME: Development server for the slidefold application
// ABOUTME: Serves the output directory over HTTP and pushes reload signals to connected browsers

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use serde::Serialize;
use std::fs;
use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tiny_http::{Header, Request, Response, Server, StatusCode};
use tungstenite::handshake::derive_accept_key;
use tungstenite::protocol::Role;
use tungstenite::{Message, WebSocket};

use crate::config::Config;
use crate::errors::{FoldError, Result};

/// Polling endpoint answering whether a newer build exists
pub const RELOAD_POLL_PATH: &str = "/__reload";

/// WebSocket endpoint that receives `reload` pushes
pub const RELOAD_SOCKET_PATH: &str = "/__livereload";

trait Stream: Read + Write + Send {}
impl<T: Read + Write + Send> Stream for T {}

type ReloadSocket = WebSocket<Box<dyn Stream>>;

/// Body of the polling endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReloadStatus {
    pub generation: u64,
    pub reload: bool,
    pub built_at: Option<String>,
}

struct HubState {
    generation: u64,
    built_at: Option<DateTime<Utc>>,
    sockets: Vec<ReloadSocket>,
}

/// Shared reload state between the rebuild loop and the dev server
pub struct ReloadHub {
    state: Mutex<HubState>,
}

impl Default for ReloadHub {
    fn default() -> Self {
        Self::new()
    }
}

impl ReloadHub {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(HubState {
                generation: 0,
                built_at: None,
                sockets: Vec::new(),
            }),
        }
    }

    /// Number of successful rebuilds announced so far
    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    pub fn client_count(&self) -> usize {
        self.state.lock().sockets.len()
    }

    /// Status for a client that last saw generation `since`
    pub fn status(&self, since: Option<u64>) -> ReloadStatus {
        let state = self.state.lock();
        ReloadStatus {
            generation: state.generation,
            reload: since.is_some_and(|seen| state.generation > seen),
            built_at: state.built_at.map(|t| t.to_rfc3339()),
        }
    }

    /// Announce a new build; returns how many sockets received the push
    pub fn notify_reload(&self) -> usize {
        let mut state = self.state.lock();
        state.generation += 1;
        state.built_at = Some(Utc::now());

        state.sockets.retain_mut(|socket| {
            match socket.send(Message::Text("reload".to_string())) {
                Ok(()) => true,
                Err(e) => {
                    debug!("Dropping live reload client: {}", e);
                    false
                }
            }
        });
        state.sockets.len()
    }

    fn add_socket(&self, socket: ReloadSocket) {
        let mut state = self.state.lock();
        state.sockets.push(socket);
        debug!("Live reload client connected ({} total)", state.sockets.len());
    }

    fn close_all(&self) {
        let mut state = self.state.lock();
        for socket in state.sockets.iter_mut() {
            let _ = socket.close(None);
            let _ = socket.flush();
        }
        state.sockets.clear();
    }
}

/// Why a request path could not be mapped onto a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathRejection {
    BadRequest,
    Forbidden,
}

/// Map a URL path onto a file below `root`, refusing anything that escapes it
pub fn resolve_request_path(
    root: &Path,
    index: &str,
    url_path: &str,
) -> std::result::Result<PathBuf, PathRejection> {
    let decoded = urlencoding::decode(url_path).map_err(|_| PathRejection::BadRequest)?;
    let relative = decoded.trim_start_matches('/');
    if relative.is_empty() {
        return Ok(root.join(index));
    }

    let relative = Path::new(relative);
    if !relative
        .components()
        .all(|c| matches!(c, Component::Normal(_)))
    {
        return Err(PathRejection::Forbidden);
    }

    let path = root.join(relative);
    if path.is_dir() {
        Ok(path.join("index.html"))
    } else {
        Ok(path)
    }
}

/// Content type based on file extension
pub fn content_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "js" | "mjs" => "application/javascript; charset=utf-8",
        "json" => "application/json",
        "md" | "markdown" | "txt" | "mermaid" => "text/plain; charset=utf-8",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "ico" => "image/x-icon",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}

fn header(name: &str, value: &str) -> Header {
    Header::from_bytes(name.as_bytes(), value.as_bytes()).expect("Failed to create header")
}

fn respond_status(request: Request, code: u16, body: &str) {
    let response = Response::from_string(body).with_status_code(StatusCode(code));
    if let Err(e) = request.respond(response) {
        debug!("Failed to send response: {}", e);
    }
}

struct Site {
    root: PathBuf,
    index: String,
    hub: Option<Arc<ReloadHub>>,
}

impl Site {
    fn handle(&self, request: Request) {
        let raw_url = request.url().to_string();
        let Ok(url) = url::Url::parse("http://localhost").and_then(|base| base.join(&raw_url))
        else {
            respond_status(request, 400, "400 Bad Request");
            return;
        };
        debug!("Request for {}", raw_url);

        if let Some(hub) = &self.hub {
            if url.path() == RELOAD_POLL_PATH {
                let since = url
                    .query_pairs()
                    .find(|(key, _)| key == "since")
                    .and_then(|(_, value)| value.parse::<u64>().ok());
                self.respond_reload_status(request, hub, since);
                return;
            }
            if url.path() == RELOAD_SOCKET_PATH {
                upgrade_socket(request, hub);
                return;
            }
        }

        match resolve_request_path(&self.root, &self.index, url.path()) {
            Ok(file) => serve_file(request, &file),
            Err(PathRejection::Forbidden) => respond_status(request, 403, "403 Forbidden"),
            Err(PathRejection::BadRequest) => respond_status(request, 400, "400 Bad Request"),
        }
    }

    fn respond_reload_status(&self, request: Request, hub: &ReloadHub, since: Option<u64>) {
        let body = match serde_json::to_string(&hub.status(since)) {
            Ok(body) => body,
            Err(e) => {
                error!("Failed to encode reload status: {}", e);
                respond_status(request, 500, "500 Internal Server Error");
                return;
            }
        };
        let response = Response::from_string(body)
            .with_header(header("Content-Type", "application/json"))
            .with_header(header("Cache-Control", "no-store"))
            .with_header(header("Access-Control-Allow-Origin", "*"));
        if let Err(e) = request.respond(response) {
            debug!("Failed to send reload status: {}", e);
        }
    }
}

fn serve_file(request: Request, file: &Path) {
    if !file.is_file() {
        respond_status(request, 404, "404 Not Found");
        return;
    }
    match fs::read(file) {
        Ok(content) => {
            let response = Response::from_data(content)
                .with_header(header("Content-Type", content_type(file)))
                .with_header(header("Cache-Control", "no-cache"));
            if let Err(e) = request.respond(response) {
                error!("Failed to send response: {}", e);
            }
        }
        Err(e) => {
            error!("Failed to read file {:?}: {}", file, e);
            respond_status(request, 500, &format!("Failed to read file: {}", e));
        }
    }
}

fn upgrade_socket(request: Request, hub: &ReloadHub) {
    let key = request
        .headers()
        .iter()
        .find(|h| h.field.equiv("Sec-WebSocket-Key"))
        .map(|h| h.value.as_str().to_string());
    let Some(key) = key else {
        respond_status(request, 400, "Expected a WebSocket upgrade");
        return;
    };

    let response = Response::new_empty(StatusCode(101))
        .with_header(header("Upgrade", "websocket"))
        .with_header(header("Connection", "Upgrade"))
        .with_header(header("Sec-WebSocket-Accept", &derive_accept_key(key.as_bytes())));

    let stream: Box<dyn Stream> = Box::new(request.upgrade("websocket", response));
    hub.add_socket(WebSocket::from_raw_socket(stream, Role::Server, None));
}

/// Static file server for the output directory
pub struct DevServer {
    server: Arc<Server>,
    hub: Option<Arc<ReloadHub>>,
    handle: Option<JoinHandle<()>>,
    port: u16,
}

impl DevServer {
    /// Bind to the configured port and start serving on a background thread
    ///
    /// Port 0 picks a free port; see [`DevServer::port`].
    pub fn start(config: &Config, hub: Option<Arc<ReloadHub>>) -> Result<Self> {
        let server = Server::http(format!("0.0.0.0:{}", config.port)).map_err(|e| {
            FoldError::ServerError(format!(
                "Failed to start HTTP server on port {}: {}",
                config.port, e
            ))
        })?;
        let port = server
            .server_addr()
            .to_ip()
            .map(|addr| addr.port())
            .unwrap_or(config.port);

        let site = Site {
            root: config.output_dir(),
            index: config
                .output_path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "index.html".to_string()),
            hub: hub.clone(),
        };

        let server = Arc::new(server);
        let server_thread = server.clone();
        let handle = thread::spawn(move || {
            for request in server_thread.incoming_requests() {
                site.handle(request);
            }
            debug!("HTTP server loop finished");
        });

        info!("HTTP server listening on http://localhost:{}", port);
        Ok(Self {
            server,
            hub,
            handle: Some(handle),
            port,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Stop accepting requests, close reload sockets and join the server thread
    pub fn shutdown(mut self) {
        self.server.unblock();
        if let Some(hub) = &self.hub {
            hub.close_all();
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("HTTP server thread panicked");
            }
        }
        info!("HTTP server on port {} stopped", self.port);
    }
}
