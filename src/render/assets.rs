//! Bridge from the engine's synchronous asset requests to the async resolver.

use std::sync::Arc;

use bytes::Bytes;
use tokio::runtime::Handle;
use tracing::{debug, warn};

use super::codec::{transparent_placeholder, OutputFormat};
use super::renderer::AssetSource;
use crate::source::SourceResolver;

/// [`AssetSource`] that resolves through a [`SourceResolver`].
///
/// Requests block the calling thread on the runtime, so they must come
/// from outside it; renders run on the blocking pool, which satisfies this.
/// A miss or a resolver failure is answered with [`placeholder_for`] so
/// one missing tile or sprite does not fail the whole render.
pub struct ResolverAssets {
    resolver: Arc<SourceResolver>,
    runtime: Handle,
}

impl ResolverAssets {
    pub fn new(resolver: Arc<SourceResolver>, runtime: Handle) -> Self {
        Self { resolver, runtime }
    }
}

impl AssetSource for ResolverAssets {
    fn request(&self, url: &str) -> Bytes {
        match self.runtime.block_on(self.resolver.resolve(url)) {
            Ok(Some(data)) => data,
            Ok(None) => {
                debug!(url, "Asset missing; using placeholder");
                placeholder_for(url)
            }
            Err(e) => {
                warn!(url, error = %e, "Asset request failed; using placeholder");
                placeholder_for(url)
            }
        }
    }
}

/// Stand-in body for a missing asset, chosen by the URL's extension.
///
/// Image extensions get a 1x1 placeholder in that format; anything else
/// (vector tiles, glyphs, JSON) gets an empty body.
pub fn placeholder_for(url: &str) -> Bytes {
    match extension(url).and_then(|ext| OutputFormat::from_extension(&ext)) {
        Some(format) => transparent_placeholder(format),
        None => Bytes::new(),
    }
}

/// Lowercased extension of the URL's last path segment, query and
/// fragment removed. Archive URIs end in `/{z}/{x}/{y}` and have none.
fn extension(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let basename = path.rsplit('/').next().unwrap_or(path);
    let (_, ext) = basename.split_once('.')?;
    let ext = ext.split('.').next().unwrap_or(ext);
    Some(ext.to_ascii_lowercase())
}
