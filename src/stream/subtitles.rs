//! Subtitle server for network devices
//!
//! Cast receivers cannot read a local path, so the subtitle file is exposed
//! over a second, short-lived HTTP server. It binds lazily on an OS-assigned
//! port the first time a URL is requested, at most once per session, and only
//! ever serves that one file (plus a WebVTT rendition of SRT input, which is
//! what Chromecast receivers expect).

use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::extract::{Path as UrlPath, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tokio::sync::{watch, OnceCell};
use tokio::task::JoinHandle;

/// Convert SRT to WebVTT format
///
/// Only timestamp lines are rewritten (`,` -> `.`); dialogue is kept as-is.
pub fn srt_to_webvtt(srt: &str) -> String {
    let mut webvtt = String::from("WEBVTT\n\n");

    for line in srt.lines() {
        let converted = if line.contains(" --> ") {
            line.replace(',', ".")
        } else {
            line.to_string()
        };
        webvtt.push_str(&converted);
        webvtt.push('\n');
    }

    webvtt
}

struct SubtitleFile {
    path: PathBuf,
    name: String,
    webvtt_name: Option<String>,
}

struct Bound {
    port: u16,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

pub struct SubtitleServer {
    file: Arc<SubtitleFile>,
    bound: OnceCell<Bound>,
}

impl SubtitleServer {
    pub fn new(path: PathBuf) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let is_srt = path
            .extension()
            .map(|e| e.eq_ignore_ascii_case("srt"))
            .unwrap_or(false);
        let webvtt_name = is_srt.then(|| {
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            format!("{}.vtt", stem)
        });
        Self {
            file: Arc::new(SubtitleFile {
                path,
                name,
                webvtt_name,
            }),
            bound: OnceCell::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.file.path
    }

    pub fn is_bound(&self) -> bool {
        self.bound.initialized()
    }

    /// Port of the running server, None until the first URL was handed out
    pub fn port(&self) -> Option<u16> {
        self.bound.get().map(|b| b.port)
    }

    /// URL of the subtitle file as seen from `host`, binding on first use
    pub async fn url(&self, host: &str) -> std::io::Result<String> {
        let port = self.ensure_bound().await?;
        Ok(format!(
            "http://{}:{}/{}",
            host,
            port,
            urlencoding::encode(&self.file.name)
        ))
    }

    /// WebVTT URL for receivers that only play WebVTT. Same as [`url`] when
    /// the file is not SRT.
    ///
    /// [`url`]: SubtitleServer::url
    pub async fn webvtt_url(&self, host: &str) -> std::io::Result<String> {
        match &self.file.webvtt_name {
            Some(name) => {
                let port = self.ensure_bound().await?;
                Ok(format!("http://{}:{}/{}", host, port, urlencoding::encode(name)))
            }
            None => self.url(host).await,
        }
    }

    async fn ensure_bound(&self) -> std::io::Result<u16> {
        let bound = self
            .bound
            .get_or_try_init(|| async {
                let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0));
                let listener = tokio::net::TcpListener::bind(addr).await?;
                let port = listener.local_addr()?.port();
                let (shutdown, mut rx) = watch::channel(false);
                let app = Router::new()
                    .route("/{name}", get(serve_subtitles))
                    .with_state(self.file.clone());
                let task = tokio::spawn(async move {
                    let result = axum::serve(listener, app)
                        .with_graceful_shutdown(async move {
                            let _ = rx.wait_for(|closed| *closed).await;
                        })
                        .await;
                    if let Err(e) = result {
                        tracing::warn!("subtitle server failed: {}", e);
                    }
                });
                tracing::debug!(port, file = %self.file.name, "subtitle server listening");
                Ok::<_, std::io::Error>(Bound {
                    port,
                    shutdown,
                    task,
                })
            })
            .await?;
        Ok(bound.port)
    }

    /// Stop serving. Safe to call when never bound or already closed.
    pub fn close(&self) {
        if let Some(bound) = self.bound.get() {
            let _ = bound.shutdown.send(true);
            bound.task.abort();
        }
    }
}

async fn serve_subtitles(
    State(file): State<Arc<SubtitleFile>>,
    UrlPath(name): UrlPath<String>,
) -> Response {
    let webvtt = file.webvtt_name.as_deref() == Some(name.as_str());
    if name != file.name && !webvtt {
        return StatusCode::NOT_FOUND.into_response();
    }

    let bytes = match tokio::fs::read(&file.path).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!("could not read subtitles: {}", e);
            return StatusCode::NOT_FOUND.into_response();
        }
    };

    if webvtt {
        let text = srt_to_webvtt(&String::from_utf8_lossy(&bytes));
        return ([(header::CONTENT_TYPE, "text/vtt; charset=utf-8")], text).into_response();
    }

    let mime = mime_guess::from_path(&file.path).first_or_text_plain();
    ([(header::CONTENT_TYPE, mime.to_string())], bytes).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SRT: &str = "1\n00:00:01,000 --> 00:00:04,000\nHello, world\n";

    #[test]
    fn test_srt_to_webvtt_keeps_dialogue_commas() {
        let vtt = srt_to_webvtt(SRT);
        assert!(vtt.starts_with("WEBVTT\n\n"));
        assert!(vtt.contains("00:00:01.000 --> 00:00:04.000"));
        assert!(vtt.contains("Hello, world"));
    }

    #[tokio::test]
    async fn test_binds_lazily_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("movie en.srt");
        std::fs::write(&path, SRT).unwrap();

        let server = SubtitleServer::new(path);
        assert!(!server.is_bound());

        let first = server.url("127.0.0.1").await.unwrap();
        let port = server.port().unwrap();
        assert_ne!(port, 0);
        let second = server.url("127.0.0.1").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first, format!("http://127.0.0.1:{}/movie%20en.srt", port));

        let body = reqwest::get(&first).await.unwrap().text().await.unwrap();
        assert_eq!(body, SRT);

        let vtt = server.webvtt_url("127.0.0.1").await.unwrap();
        assert!(vtt.ends_with("/movie%20en.vtt"));
        let response = reqwest::get(&vtt).await.unwrap();
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/vtt; charset=utf-8"
        );
        assert!(response.text().await.unwrap().starts_with("WEBVTT"));

        server.close();
        server.close();
    }

    #[tokio::test]
    async fn test_only_the_subtitle_file_is_served() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("subs.vtt");
        std::fs::write(&path, "WEBVTT\n").unwrap();
        std::fs::write(dir.path().join("secret.txt"), "nope").unwrap();

        let server = SubtitleServer::new(path);
        let url = server.url("127.0.0.1").await.unwrap();
        assert_eq!(server.webvtt_url("127.0.0.1").await.unwrap(), url);

        let other = format!("http://127.0.0.1:{}/secret.txt", server.port().unwrap());
        let response = reqwest::get(&other).await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
        server.close();
    }
}
