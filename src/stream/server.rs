//! HTTP streaming server
//!
//! Exposes the files of one torrent as `GET /<index>` with byte-range support.
//! Reads go through the swarm, so serving can start before the download is
//! complete. The server reports once, through a watch channel, that a client
//! has connected.

use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::ops::Range;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, Request, State};
use axum::http::header::{ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::io::ReaderStream;

use crate::error::SessionError;
use crate::models::{format_bytes, StreamEndpoint};
use crate::swarm::{Swarm, SwarmError};

// =============================================================================
// Binding
// =============================================================================

fn is_retryable(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::AddrInUse | std::io::ErrorKind::PermissionDenied
    )
}

/// Bind `preferred`, retrying exactly once on an OS-assigned port when the
/// preferred one is taken or not permitted. Any other error is final.
pub async fn bind_with_retry<T, F, Fut>(preferred: u16, mut bind: F) -> Result<T, SessionError>
where
    F: FnMut(u16) -> Fut,
    Fut: Future<Output = std::io::Result<T>>,
{
    match bind(preferred).await {
        Ok(listener) => Ok(listener),
        Err(e) if preferred != 0 && is_retryable(&e) => {
            tracing::info!(port = preferred, "port unavailable ({}), using an ephemeral port", e);
            bind(0)
                .await
                .map_err(|source| SessionError::Bind { port: 0, source })
        }
        Err(source) => Err(SessionError::Bind {
            port: preferred,
            source,
        }),
    }
}

// =============================================================================
// Server
// =============================================================================

struct ServerState {
    swarm: Arc<dyn Swarm>,
    connected: watch::Sender<bool>,
}

pub struct StreamServer {
    endpoint: StreamEndpoint,
    local_addr: SocketAddr,
    swarm: Arc<dyn Swarm>,
    connected: watch::Receiver<bool>,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl StreamServer {
    /// Bind on `address:preferred_port` (with the single ephemeral retry) and
    /// start serving the swarm's files
    pub async fn bind(
        swarm: Arc<dyn Swarm>,
        address: IpAddr,
        preferred_port: u16,
    ) -> Result<Self, SessionError> {
        let listener =
            bind_with_retry(preferred_port, |port| TcpListener::bind((address, port))).await?;
        let local_addr = listener.local_addr().map_err(|source| SessionError::Bind {
            port: preferred_port,
            source,
        })?;

        let (connected_tx, connected) = watch::channel(false);
        let state = Arc::new(ServerState {
            swarm: swarm.clone(),
            connected: connected_tx,
        });
        let app = Router::new()
            .route("/", get(list_files))
            .route("/{index}", get(serve_file))
            .layer(middleware::from_fn_with_state(state.clone(), observe_connection))
            .with_state(state);

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.wait_for(|closed| *closed).await;
                })
                .await;
            if let Err(e) = result {
                tracing::error!("streaming server error: {}", e);
            }
        });

        tracing::info!(%local_addr, "streaming server listening");
        Ok(Self {
            endpoint: StreamEndpoint::new("localhost", local_addr.port()),
            local_addr,
            swarm,
            connected,
            shutdown,
            task: Some(task),
        })
    }

    pub fn endpoint(&self) -> &StreamEndpoint {
        &self.endpoint
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Mark `index` as the streamed file and prioritize it in the swarm
    pub fn select(&mut self, index: usize) -> Result<(), SwarmError> {
        self.swarm.select_file(index)?;
        self.endpoint.selected_index = Some(index);
        Ok(())
    }

    /// Flips to true on the first request and stays there
    pub fn connections(&self) -> watch::Receiver<bool> {
        self.connected.clone()
    }

    pub fn has_connection(&self) -> bool {
        *self.connected.borrow()
    }

    /// Stop accepting connections. Idempotent.
    pub fn close(&mut self) {
        if let Some(task) = self.task.take() {
            let _ = self.shutdown.send(true);
            task.abort();
            tracing::debug!("streaming server closed");
        }
    }
}

impl Drop for StreamServer {
    fn drop(&mut self) {
        self.close();
    }
}

async fn observe_connection(
    State(state): State<Arc<ServerState>>,
    request: Request,
    next: Next,
) -> Response {
    state.connected.send_if_modified(|seen| {
        let first = !*seen;
        *seen = true;
        first
    });
    next.run(request).await
}

// =============================================================================
// Handlers
// =============================================================================

/// Outcome of a Range header against a known length
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ByteRange {
    /// No (usable) range, send everything
    Full,
    /// Half-open byte range
    Partial(Range<u64>),
    /// Nothing of the file is inside the range
    Unsatisfiable,
}

/// Parse a single `bytes=` range. Multi-range requests get the full body.
pub fn parse_range(headers: &HeaderMap, length: u64) -> ByteRange {
    let Some(value) = headers.get("range").and_then(|v| v.to_str().ok()) else {
        return ByteRange::Full;
    };
    let Some(spec) = value.trim().strip_prefix("bytes=") else {
        return ByteRange::Full;
    };
    if spec.contains(',') {
        return ByteRange::Full;
    }
    let Some((start, end)) = spec.trim().split_once('-') else {
        return ByteRange::Full;
    };

    let (start, end) = match (start.trim(), end.trim()) {
        ("", suffix) => match suffix.parse::<u64>() {
            Ok(0) => return ByteRange::Unsatisfiable,
            Ok(n) => (length.saturating_sub(n), length),
            Err(_) => return ByteRange::Full,
        },
        (start, "") => match start.parse::<u64>() {
            Ok(start) => (start, length),
            Err(_) => return ByteRange::Full,
        },
        (start, end) => match (start.parse::<u64>(), end.parse::<u64>()) {
            (Ok(start), Ok(end)) if start <= end => (start, end.saturating_add(1).min(length)),
            _ => return ByteRange::Full,
        },
    };

    if start >= length {
        return ByteRange::Unsatisfiable;
    }
    ByteRange::Partial(start..end)
}

async fn serve_file(
    State(state): State<Arc<ServerState>>,
    Path(index): Path<String>,
    headers: HeaderMap,
) -> Response {
    let Ok(index) = index.parse::<usize>() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let Some(metadata) = state.swarm.metadata() else {
        return (StatusCode::SERVICE_UNAVAILABLE, "torrent metadata not ready").into_response();
    };
    let Some(file) = metadata.file(index) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let length = file.length;
    let content_type = mime_guess::from_path(&file.name)
        .first_or_octet_stream()
        .to_string();

    let (status, range) = match parse_range(&headers, length) {
        ByteRange::Full => (StatusCode::OK, 0..length),
        ByteRange::Partial(range) => (StatusCode::PARTIAL_CONTENT, range),
        ByteRange::Unsatisfiable => {
            return (
                StatusCode::RANGE_NOT_SATISFIABLE,
                [(CONTENT_RANGE, format!("bytes */{}", length))],
            )
                .into_response();
        }
    };

    tracing::debug!(index, start = range.start, end = range.end, "serving file");
    let reader = match state.swarm.open_file(index, range.clone()).await {
        Ok(reader) => reader,
        Err(e) => {
            tracing::warn!(index, "could not open file: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
        }
    };

    let mut response = Response::builder()
        .status(status)
        .header(CONTENT_TYPE, content_type)
        .header(ACCEPT_RANGES, "bytes")
        .header(CONTENT_LENGTH, (range.end - range.start).to_string());
    if status == StatusCode::PARTIAL_CONTENT {
        response = response.header(
            CONTENT_RANGE,
            format!("bytes {}-{}/{}", range.start, range.end - 1, length),
        );
    }

    response
        .body(Body::from_stream(ReaderStream::new(reader)))
        .unwrap_or_else(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response())
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

async fn list_files(State(state): State<Arc<ServerState>>) -> Response {
    let Some(metadata) = state.swarm.metadata() else {
        return (StatusCode::SERVICE_UNAVAILABLE, "torrent metadata not ready").into_response();
    };
    let items: String = metadata
        .files
        .iter()
        .map(|f| {
            format!(
                "<li><a href=\"/{}\">{}</a> ({})</li>",
                f.index,
                escape_html(&f.path.to_string_lossy()),
                format_bytes(f.length)
            )
        })
        .collect();
    Html(format!(
        "<!DOCTYPE html><html><head><title>{name}</title></head>\
<body><h1>{name}</h1><ol start=\"0\">{items}</ol></body></html>",
        name = escape_html(&metadata.name),
        items = items
    ))
    .into_response()
}

// =============================================================================
// Tests
// =============================================================================
