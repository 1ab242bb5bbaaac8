//! Style loading, validation and the parsed-style memo.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use super::fingerprint::{FingerprintAlgorithm, StyleFingerprint};
use crate::error::RenderError;
use crate::singleflight::SingleFlight;
use crate::source::SourceResolver;

/// A style given by URI or inline.
#[derive(Debug, Clone)]
pub enum StyleRef {
    Uri(String),
    Inline(Arc<Value>),
}

impl StyleRef {
    pub fn uri(uri: impl Into<String>) -> Self {
        StyleRef::Uri(uri.into())
    }

    pub fn inline(style: Value) -> Self {
        StyleRef::Inline(Arc::new(style))
    }
}

/// Checks a JSON value is a usable style document.
pub trait StyleValidator: Send + Sync {
    /// `Err` carries a human-readable reason.
    fn validate(&self, style: &Value) -> Result<(), String>;
}

/// Structural checks every renderable style passes.
///
/// - the document is an object with `"version": 8`
/// - `sources` is an object
/// - `layers` is an array of objects with string `id` and `type`, ids unique
#[derive(Debug, Clone, Copy, Default)]
pub struct MinimalStyleValidator;

impl StyleValidator for MinimalStyleValidator {
    fn validate(&self, style: &Value) -> Result<(), String> {
        let doc = style.as_object().ok_or("style must be a JSON object")?;

        if doc.get("version").and_then(Value::as_u64) != Some(8) {
            return Err("version must be 8".to_string());
        }
        if !doc.get("sources").is_some_and(Value::is_object) {
            return Err("sources must be an object".to_string());
        }

        let layers = doc
            .get("layers")
            .and_then(Value::as_array)
            .ok_or("layers must be an array")?;

        let mut seen = std::collections::HashSet::new();
        for (i, layer) in layers.iter().enumerate() {
            let id = layer
                .get("id")
                .and_then(Value::as_str)
                .ok_or_else(|| format!("layers[{i}]: id must be a string"))?;
            if layer.get("type").and_then(Value::as_str).is_none() {
                return Err(format!("layers[{i}]: type must be a string"));
            }
            if !seen.insert(id) {
                return Err(format!("layers[{i}]: duplicate layer id \"{id}\""));
            }
        }

        Ok(())
    }
}

/// A parsed, validated style and its fingerprint.
#[derive(Debug, Clone)]
pub struct LoadedStyle {
    pub document: Arc<Value>,
    pub fingerprint: StyleFingerprint,
}

/// Turns [`StyleRef`]s into [`LoadedStyle`]s.
///
/// Styles fetched by URI are memoized per URI in a small LRU, and
/// concurrent loads of one URI share a single fetch.
pub struct StyleStore {
    resolver: Arc<SourceResolver>,
    validator: Arc<dyn StyleValidator>,
    algorithm: FingerprintAlgorithm,
    memo: Mutex<LruCache<String, LoadedStyle>>,
    loads: SingleFlight<String, Result<LoadedStyle, RenderError>>,
}

impl StyleStore {
    pub fn new(
        resolver: Arc<SourceResolver>,
        validator: Arc<dyn StyleValidator>,
        algorithm: FingerprintAlgorithm,
        memo_capacity: usize,
    ) -> Self {
        let capacity = NonZeroUsize::new(memo_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            resolver,
            validator,
            algorithm,
            memo: Mutex::new(LruCache::new(capacity)),
            loads: SingleFlight::new(),
        }
    }

    pub async fn load(&self, style: &StyleRef) -> Result<LoadedStyle, RenderError> {
        match style {
            StyleRef::Inline(document) => self.prepare(document.clone()),
            StyleRef::Uri(uri) => self.load_uri(uri).await,
        }
    }

    /// Number of memoized styles.
    pub async fn memoized(&self) -> usize {
        self.memo.lock().await.len()
    }

    async fn load_uri(&self, uri: &str) -> Result<LoadedStyle, RenderError> {
        if let Some(hit) = self.memo.lock().await.get(uri) {
            return Ok(hit.clone());
        }

        self.loads
            .run(uri.to_string(), || async move {
                if let Some(hit) = self.memo.lock().await.get(uri) {
                    return Ok(hit.clone());
                }

                let bytes = self
                    .resolver
                    .resolve(uri)
                    .await?
                    .ok_or_else(|| RenderError::StyleFetch {
                        uri: uri.to_string(),
                    })?;
                let document: Value =
                    serde_json::from_slice(&bytes).map_err(|e| RenderError::StyleParse {
                        message: e.to_string(),
                    })?;

                let loaded = self.prepare(Arc::new(document))?;
                self.memo.lock().await.put(uri.to_string(), loaded.clone());
                debug!(uri, fingerprint = %loaded.fingerprint, "Loaded style");
                Ok(loaded)
            })
            .await
    }

    fn prepare(&self, document: Arc<Value>) -> Result<LoadedStyle, RenderError> {
        self.validator
            .validate(&document)
            .map_err(|reason| RenderError::StyleInvalid { reason })?;
        let fingerprint = StyleFingerprint::compute(&document, self.algorithm);
        Ok(LoadedStyle {
            document,
            fingerprint,
        })
    }
}
