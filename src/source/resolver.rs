use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, warn};

use super::archives::{pmtiles_error, ArchiveHandles};
use super::cog::{fetch_cog_tile, CogTileDecoder};
use super::uri::{ArchiveLocator, SourceUri, TileCoord};
use crate::cache::{NoneCache, SharedCache};
use crate::config::StorageConfig;
use crate::error::{IoError, SourceError};
use crate::io::{
    create_gcs_client, create_s3_client, get_object, NetworkTimeouts, DEFAULT_BLOCK_CAPACITY,
    DEFAULT_BLOCK_SIZE,
};
use crate::singleflight::SingleFlight;

/// Resolves source URIs to bytes.
///
/// `Ok(None)` means there is genuinely nothing at the URI (404, missing
/// key, no tile in the archive, transient network failure). `Err` is kept
/// for unsupported schemes, malformed URIs and broken local resources.
///
/// # Caching
///
/// | Scheme | Cached | Key |
/// |---|---|---|
/// | `http(s)://` | yes | full URI |
/// | `pmtiles://` remote locator | yes | full URI |
/// | everything else | no | |
///
/// Concurrent resolutions of the same URI share one fetch, except for
/// `file://`, which is read directly.
pub struct SourceResolver {
    cache: SharedCache,
    http: reqwest::Client,
    s3: Option<aws_sdk_s3::Client>,
    gcs: Option<aws_sdk_s3::Client>,
    cog: Option<Arc<dyn CogTileDecoder>>,
    archives: ArchiveHandles,
    flights: SingleFlight<String, Result<Option<Bytes>, SourceError>>,
}

impl SourceResolver {
    pub fn builder() -> SourceResolverBuilder {
        SourceResolverBuilder::default()
    }

    /// Build a resolver with S3 and GCS clients from `storage`.
    pub async fn from_config(cache: SharedCache, storage: &StorageConfig) -> Result<Self, IoError> {
        let timeouts = storage.timeouts();
        let s3 = create_s3_client(
            storage.s3_endpoint.as_deref(),
            &storage.s3_region,
            storage.s3_force_path_style,
            timeouts,
        )
        .await;
        let gcs = create_gcs_client(
            &storage.gcs_endpoint,
            storage.gcs_hmac_key_filename.as_deref(),
            timeouts,
        )
        .await?;

        Ok(Self::builder()
            .cache(cache)
            .http_client(timeouts.http_client()?)
            .s3_client(s3)
            .gcs_client(gcs)
            .block_cache(storage.archive_block_size, storage.archive_blocks)
            .build())
    }

    /// The cache backing network fetches.
    pub fn cache(&self) -> &SharedCache {
        &self.cache
    }

    /// Open archive handles.
    pub fn archives(&self) -> &ArchiveHandles {
        &self.archives
    }

    /// Resolve `uri` to its bytes.
    pub async fn resolve(&self, uri: &str) -> Result<Option<Bytes>, SourceError> {
        let parsed = SourceUri::parse(uri)?;

        if let SourceUri::File(path) = &parsed {
            return read_file(path).await.map(Some);
        }

        self.flights
            .run(uri.to_string(), move || self.fetch(uri, parsed))
            .await
    }

    async fn fetch(&self, uri: &str, parsed: SourceUri) -> Result<Option<Bytes>, SourceError> {
        match parsed {
            SourceUri::Http(url) => Ok(self.fetch_http(&url).await),
            SourceUri::File(path) => read_file(&path).await.map(Some),
            SourceUri::S3 { bucket, key } => {
                let client = self.s3.as_ref().ok_or_else(|| not_configured("s3", uri))?;
                Ok(fetch_object(client, &bucket, &key, uri).await)
            }
            SourceUri::Gcs { bucket, key } => {
                let client = self.gcs.as_ref().ok_or_else(|| not_configured("gs", uri))?;
                Ok(fetch_object(client, &bucket, &key, uri).await)
            }
            SourceUri::Mbtiles { path, tile } => {
                let archive = self.archives.mbtiles(&path).await?;
                let data = archive.tile(tile).await?;
                if data.is_none() {
                    debug!(archive = %path.display(), %tile, "No such tile");
                }
                Ok(data)
            }
            SourceUri::Pmtiles { locator, tile } => self.fetch_pmtiles(uri, &locator, tile).await,
            SourceUri::Cog { path, tile } => {
                let decoder = self.cog.as_ref().ok_or_else(|| not_configured("cog", uri))?;
                Ok(fetch_cog_tile(decoder.as_ref(), &path, tile).await)
            }
        }
    }

    async fn fetch_http(&self, url: &str) -> Option<Bytes> {
        if let Some(hit) = self.cache.get(url).await {
            debug!(url, cache = self.cache.name(), "Cache hit");
            return Some(hit);
        }

        let resp = match self.http.get(url).send().await {
            Ok(resp) => resp,
            Err(e) => {
                warn!(url, error = %e, "HTTP fetch failed");
                return None;
            }
        };

        let status = resp.status();
        if !status.is_success() {
            if status == reqwest::StatusCode::NOT_FOUND {
                debug!(url, "HTTP 404");
            } else {
                warn!(url, %status, "HTTP fetch returned non-success status");
            }
            return None;
        }

        match resp.bytes().await {
            Ok(body) => {
                self.cache.set(url, body.clone()).await;
                Some(body)
            }
            Err(e) => {
                warn!(url, error = %e, "HTTP body read failed");
                None
            }
        }
    }

    async fn fetch_pmtiles(
        &self,
        uri: &str,
        locator: &ArchiveLocator,
        tile: TileCoord,
    ) -> Result<Option<Bytes>, SourceError> {
        let remote = locator.is_remote();
        if remote {
            if let Some(hit) = self.cache.get(uri).await {
                debug!(uri, cache = self.cache.name(), "Cache hit");
                return Ok(Some(hit));
            }
        }

        let archive = match self.archives.pmtiles(locator).await {
            Ok(archive) => archive,
            Err(e) => return remote_miss(uri, locator, e),
        };
        let data = match archive.tile(tile).await {
            Ok(data) => data,
            Err(e) => {
                let err = pmtiles_error(locator, e);
                if matches!(err, SourceError::Io(IoError::PreconditionFailed(_))) {
                    // The object was replaced; reopen on the next request
                    self.archives.evict_pmtiles(locator).await;
                }
                return remote_miss(uri, locator, err);
            }
        };

        match &data {
            Some(bytes) if remote => self.cache.set(uri, bytes.clone()).await,
            Some(_) => {}
            None => debug!(archive = %locator, %tile, "No such tile"),
        }
        Ok(data)
    }
}

/// Degrade network failures on a remote archive to a miss.
///
/// Corrupt archives and anything local stay errors.
fn remote_miss(
    uri: &str,
    locator: &ArchiveLocator,
    err: SourceError,
) -> Result<Option<Bytes>, SourceError> {
    if !locator.is_remote() {
        return Err(err);
    }
    match &err {
        SourceError::Io(IoError::NotFound(_)) => {
            debug!(uri, "Archive not found");
            Ok(None)
        }
        SourceError::Io(
            IoError::Connection(_)
            | IoError::Http(_)
            | IoError::S3(_)
            | IoError::PreconditionFailed(_),
        ) => {
            warn!(uri, error = %err, "Archive read failed");
            Ok(None)
        }
        _ => Err(err),
    }
}

async fn read_file(path: &Path) -> Result<Bytes, SourceError> {
    tokio::fs::read(path)
        .await
        .map(Bytes::from)
        .map_err(|e| SourceError::Local {
            path: path.display().to_string(),
            message: e.to_string(),
        })
}

async fn fetch_object(
    client: &aws_sdk_s3::Client,
    bucket: &str,
    key: &str,
    uri: &str,
) -> Option<Bytes> {
    match get_object(client, bucket, key).await {
        Ok(Some(data)) => Some(data),
        Ok(None) => {
            debug!(uri, "No such key");
            None
        }
        Err(e) => {
            warn!(uri, error = %e, "Object fetch failed");
            None
        }
    }
}

fn not_configured(scheme: &'static str, uri: &str) -> SourceError {
    SourceError::NotConfigured {
        scheme,
        uri: uri.to_string(),
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`SourceResolver`].
///
/// Every collaborator is optional: without a cache nothing is cached,
/// and schemes without a client report `NotConfigured`.
pub struct SourceResolverBuilder {
    cache: SharedCache,
    http: Option<reqwest::Client>,
    s3: Option<aws_sdk_s3::Client>,
    gcs: Option<aws_sdk_s3::Client>,
    cog: Option<Arc<dyn CogTileDecoder>>,
    block_size: usize,
    block_capacity: usize,
}

impl Default for SourceResolverBuilder {
    fn default() -> Self {
        Self {
            cache: Arc::new(NoneCache),
            http: None,
            s3: None,
            gcs: None,
            cog: None,
            block_size: DEFAULT_BLOCK_SIZE,
            block_capacity: DEFAULT_BLOCK_CAPACITY,
        }
    }
}

impl SourceResolverBuilder {
    pub fn cache(mut self, cache: SharedCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http = Some(client);
        self
    }

    pub fn s3_client(mut self, client: aws_sdk_s3::Client) -> Self {
        self.s3 = Some(client);
        self
    }

    pub fn gcs_client(mut self, client: aws_sdk_s3::Client) -> Self {
        self.gcs = Some(client);
        self
    }

    pub fn cog_decoder(mut self, decoder: Arc<dyn CogTileDecoder>) -> Self {
        self.cog = Some(decoder);
        self
    }

    /// Block size and count for remote archive range reads.
    pub fn block_cache(mut self, block_size: usize, block_capacity: usize) -> Self {
        self.block_size = block_size;
        self.block_capacity = block_capacity;
        self
    }

    pub fn build(self) -> SourceResolver {
        let http = match self.http {
            Some(client) => client,
            None => NetworkTimeouts::default().http_client().unwrap_or_else(|e| {
                warn!(error = %e, "Falling back to an HTTP client without timeouts");
                reqwest::Client::default()
            }),
        };
        SourceResolver {
            cache: self.cache,
            archives: ArchiveHandles::new(
                http.clone(),
                self.s3.clone(),
                self.block_size,
                self.block_capacity,
            ),
            http,
            s3: self.s3,
            gcs: self.gcs,
            cog: self.cog,
            flights: SingleFlight::new(),
        }
    }
}
