//! Test utilities for integration tests.
//!
//! This module provides a mock rendering engine, builders for mbtiles and
//! pmtiles fixture archives, and a small local HTTP server that understands
//! HEAD and `Range` requests.

use bytes::Bytes;
use flate2::write::GzEncoder;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::io::Write;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use tilesmith::error::EngineError;
use tilesmith::source::pmtiles::{
    write_directory, zxy_to_tile_id, Compression, Entry, Header, HEADER_SIZE,
};
use tilesmith::{AssetSource, RenderParams, Renderer, RendererFactory, RendererOptions};

// =============================================================================
// Mock Rendering Engine
// =============================================================================

/// What the mock engine saw, shared by every instance a factory creates.
#[derive(Default)]
pub struct EngineLog {
    pub created: AtomicUsize,
    pub renders: AtomicUsize,
    pub dropped: AtomicUsize,
    pub params: Mutex<Vec<RenderParams>>,
    pub options: Mutex<Vec<RendererOptions>>,
    pub assets: Mutex<Vec<(String, Bytes)>>,
}

impl EngineLog {
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn renders(&self) -> usize {
        self.renders.load(Ordering::SeqCst)
    }

    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::SeqCst)
    }

    pub fn last_params(&self) -> Option<RenderParams> {
        self.params.lock().unwrap().last().cloned()
    }

    pub fn assets(&self) -> Vec<(String, Bytes)> {
        self.assets.lock().unwrap().clone()
    }
}

/// Engine stand-in driven by the style's `metadata`:
///
/// - `test:color`: `[r, g, b, a]` fill colour (default opaque red)
/// - `test:assets`: URLs requested from the asset source on every render
/// - `test:fail`: the render call fails
/// - `test:reject`: instance creation fails
pub struct MockFactory {
    pub log: Arc<EngineLog>,
}

impl MockFactory {
    pub fn new() -> Self {
        Self {
            log: Arc::new(EngineLog::default()),
        }
    }
}

impl RendererFactory for MockFactory {
    fn create(
        &self,
        style: &Value,
        options: RendererOptions,
        assets: Arc<dyn AssetSource>,
    ) -> Result<Box<dyn Renderer>, EngineError> {
        let metadata = style.get("metadata").cloned().unwrap_or(Value::Null);
        if metadata.get("test:reject").and_then(Value::as_bool) == Some(true) {
            return Err(EngineError("style rejected by engine".to_string()));
        }

        let color = metadata
            .get("test:color")
            .and_then(Value::as_array)
            .map(|c| {
                let mut rgba = [0u8; 4];
                for (slot, v) in rgba.iter_mut().zip(c) {
                    *slot = v.as_u64().unwrap_or(0) as u8;
                }
                rgba
            })
            .unwrap_or([255, 0, 0, 255]);
        let urls = metadata
            .get("test:assets")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default();
        let fail = metadata.get("test:fail").and_then(Value::as_bool) == Some(true);

        self.log.created.fetch_add(1, Ordering::SeqCst);
        self.log.options.lock().unwrap().push(options);

        Ok(Box::new(MockRenderer {
            log: self.log.clone(),
            assets,
            pixel_ratio: options.pixel_ratio,
            color,
            urls,
            fail,
        }))
    }
}

struct MockRenderer {
    log: Arc<EngineLog>,
    assets: Arc<dyn AssetSource>,
    pixel_ratio: u32,
    color: [u8; 4],
    urls: Vec<String>,
    fail: bool,
}

impl Renderer for MockRenderer {
    fn render(&mut self, params: &RenderParams) -> Result<Vec<u8>, EngineError> {
        self.log.renders.fetch_add(1, Ordering::SeqCst);
        self.log.params.lock().unwrap().push(params.clone());

        for url in &self.urls {
            let body = self.assets.request(url);
            self.log.assets.lock().unwrap().push((url.clone(), body));
        }

        if self.fail {
            return Err(EngineError("mock render failure".to_string()));
        }

        let pixels = (params.width * self.pixel_ratio * params.height * self.pixel_ratio) as usize;
        Ok(self.color.repeat(pixels))
    }
}

impl Drop for MockRenderer {
    fn drop(&mut self) {
        self.log.dropped.fetch_add(1, Ordering::SeqCst);
    }
}

/// A minimal valid style with the given metadata.
pub fn style_with(metadata: Value) -> Value {
    json!({
        "version": 8,
        "name": "test",
        "metadata": metadata,
        "sources": {},
        "layers": [
            {"id": "background", "type": "background"}
        ]
    })
}

// =============================================================================
// Archive Fixtures
// =============================================================================

pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut enc = GzEncoder::new(Vec::new(), flate2::Compression::default());
    enc.write_all(data).unwrap();
    enc.finish().unwrap()
}

/// Write an mbtiles file; tiles are given in XYZ and stored gzipped under
/// their TMS row.
pub fn write_mbtiles(path: &Path, tiles: &[((u8, u32, u32), &[u8])]) {
    let conn = rusqlite::Connection::open(path).unwrap();
    conn.execute_batch(
        "CREATE TABLE metadata (name TEXT, value TEXT);
         CREATE TABLE tiles (zoom_level INTEGER, tile_column INTEGER, tile_row INTEGER, tile_data BLOB);
         INSERT INTO metadata VALUES ('format', 'pbf');",
    )
    .unwrap();

    for ((z, x, y), data) in tiles {
        let tms_row = (1u32 << z) - 1 - y;
        conn.execute(
            "INSERT INTO tiles VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![z, x, tms_row, gzip(data)],
        )
        .unwrap();
    }
}

/// Assemble a single-directory pmtiles archive with uncompressed tiles.
pub fn build_pmtiles(tiles: &[((u8, u32, u32), &[u8])]) -> Bytes {
    let mut sorted: Vec<(u64, &[u8])> = tiles
        .iter()
        .map(|((z, x, y), data)| (zxy_to_tile_id(*z, *x, *y), *data))
        .collect();
    sorted.sort_by_key(|(id, _)| *id);

    let mut tile_data = Vec::new();
    let mut entries = Vec::new();
    for (id, data) in &sorted {
        entries.push(Entry {
            tile_id: *id,
            offset: tile_data.len() as u64,
            length: data.len() as u32,
            run_length: 1,
        });
        tile_data.extend_from_slice(data);
    }

    let root = write_directory(&entries);
    let max_zoom = tiles.iter().map(|((z, _, _), _)| *z).max().unwrap_or(0);
    let header = Header {
        root_dir_offset: HEADER_SIZE as u64,
        root_dir_length: root.len() as u64,
        leaf_dirs_offset: (HEADER_SIZE + root.len()) as u64,
        leaf_dirs_length: 0,
        tile_data_offset: (HEADER_SIZE + root.len()) as u64,
        tile_data_length: tile_data.len() as u64,
        addressed_tiles: entries.len() as u64,
        tile_entries: entries.len() as u64,
        tile_contents: entries.len() as u64,
        internal_compression: Compression::None,
        tile_compression: Compression::None,
        max_zoom,
        ..Header::default()
    };

    let mut out = header.to_bytes().to_vec();
    out.extend_from_slice(&root);
    out.extend_from_slice(&tile_data);
    Bytes::from(out)
}

// =============================================================================
// Local HTTP Server
// =============================================================================

const ETAG_VALUE: &str = "\"fixture-v1\"";

#[derive(Default)]
struct ServerState {
    routes: HashMap<String, Bytes>,
    gets: HashMap<String, usize>,
    heads: HashMap<String, usize>,
}

/// HTTP/1.1 server on 127.0.0.1 serving fixed bodies by path.
///
/// Every response closes the connection. Unknown paths answer 404. GET and
/// HEAD requests are counted per path.
pub struct TestServer {
    addr: SocketAddr,
    state: Arc<Mutex<ServerState>>,
}

impl TestServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(Mutex::new(ServerState::default()));

        let accept_state = state.clone();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let state = accept_state.clone();
                tokio::spawn(async move {
                    let _ = serve(socket, state).await;
                });
            }
        });

        Self { addr, state }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn put(&self, path: &str, body: impl Into<Bytes>) {
        self.state
            .lock()
            .unwrap()
            .routes
            .insert(path.to_string(), body.into());
    }

    pub fn gets(&self, path: &str) -> usize {
        self.state.lock().unwrap().gets.get(path).copied().unwrap_or(0)
    }

    pub fn heads(&self, path: &str) -> usize {
        self.state.lock().unwrap().heads.get(path).copied().unwrap_or(0)
    }
}

async fn serve(mut socket: TcpStream, state: Arc<Mutex<ServerState>>) -> std::io::Result<()> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    let head = String::from_utf8_lossy(&buf).to_string();
    let mut lines = head.lines();
    let mut request_line = lines.next().unwrap_or_default().split_whitespace();
    let method = request_line.next().unwrap_or_default().to_string();
    let path = request_line.next().unwrap_or_default().to_string();
    let range = lines.find_map(|line| {
        let (name, value) = line.split_once(':')?;
        name.trim()
            .eq_ignore_ascii_case("range")
            .then(|| value.trim().to_string())
    });

    let body = {
        let mut state = state.lock().unwrap();
        let counter = if method == "HEAD" {
            &mut state.heads
        } else {
            &mut state.gets
        };
        *counter.entry(path.clone()).or_insert(0) += 1;
        state.routes.get(&path).cloned()
    };

    let (status, headers, payload) = match body {
        None => ("404 Not Found", String::new(), Bytes::new()),
        Some(body) if method == "HEAD" => (
            "200 OK",
            format!("ETag: {}\r\nContent-Length: {}\r\n", ETAG_VALUE, body.len()),
            Bytes::new(),
        ),
        Some(body) => match range.as_deref().and_then(|r| parse_range(r, body.len())) {
            Some((start, end)) => (
                "206 Partial Content",
                format!(
                    "ETag: {}\r\nContent-Range: bytes {}-{}/{}\r\n",
                    ETAG_VALUE,
                    start,
                    end,
                    body.len()
                ),
                body.slice(start..=end),
            ),
            None => ("200 OK", format!("ETag: {}\r\n", ETAG_VALUE), body),
        },
    };

    let content_length = if method == "HEAD" {
        String::new()
    } else {
        format!("Content-Length: {}\r\n", payload.len())
    };
    let response = format!(
        "HTTP/1.1 {}\r\n{}{}Connection: close\r\n\r\n",
        status, headers, content_length
    );

    socket.write_all(response.as_bytes()).await?;
    socket.write_all(&payload).await?;
    socket.shutdown().await
}

/// Parse `bytes=a-b`, clamping `b` to the body.
fn parse_range(value: &str, len: usize) -> Option<(usize, usize)> {
    let (start, end) = value.strip_prefix("bytes=")?.split_once('-')?;
    let start: usize = start.parse().ok()?;
    let end: usize = end.parse().ok()?;
    if len == 0 || start >= len || end < start {
        return None;
    }
    Some((start, end.min(len - 1)))
}
