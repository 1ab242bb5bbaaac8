//! Process-wide registry of open tile archives.
//!
//! Each archive path (or remote locator) is opened at most once. Concurrent
//! first lookups share one open; a failed open is not remembered, so a
//! later request retries.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};

use super::mbtiles::MbtilesArchive;
use super::pmtiles::PmtilesArchive;
use super::uri::ArchiveLocator;
use crate::error::{PmtilesError, SourceError};
use crate::io::{BlockCache, HttpRangeReader, LocalFileReader, RangeReader, S3RangeReader};
use crate::singleflight::SingleFlight;

/// Open archive handles keyed by location.
pub struct ArchiveHandles {
    http: reqwest::Client,
    s3: Option<aws_sdk_s3::Client>,
    block_size: usize,
    block_capacity: usize,

    mbtiles: RwLock<HashMap<PathBuf, MbtilesArchive>>,
    mbtiles_opens: SingleFlight<PathBuf, Result<MbtilesArchive, SourceError>>,

    pmtiles: RwLock<HashMap<ArchiveLocator, Arc<PmtilesArchive>>>,
    pmtiles_opens: SingleFlight<ArchiveLocator, Result<Arc<PmtilesArchive>, SourceError>>,
}

impl ArchiveHandles {
    /// Create an empty registry.
    ///
    /// Remote pmtiles readers are wrapped in a [`BlockCache`] of
    /// `block_capacity` blocks of `block_size` bytes.
    pub fn new(
        http: reqwest::Client,
        s3: Option<aws_sdk_s3::Client>,
        block_size: usize,
        block_capacity: usize,
    ) -> Self {
        Self {
            http,
            s3,
            block_size,
            block_capacity,
            mbtiles: RwLock::new(HashMap::new()),
            mbtiles_opens: SingleFlight::new(),
            pmtiles: RwLock::new(HashMap::new()),
            pmtiles_opens: SingleFlight::new(),
        }
    }

    /// Get or open the mbtiles archive at `path`.
    pub async fn mbtiles(&self, path: &Path) -> Result<MbtilesArchive, SourceError> {
        if let Some(archive) = self.mbtiles.read().await.get(path) {
            return Ok(archive.clone());
        }

        let key = path.to_path_buf();
        let key_ref = &key;
        self.mbtiles_opens
            .run(key.clone(), || async move {
                if let Some(archive) = self.mbtiles.read().await.get(key_ref) {
                    return Ok(archive.clone());
                }

                let archive = MbtilesArchive::open(key_ref).await?;
                self.mbtiles
                    .write()
                    .await
                    .insert(key_ref.clone(), archive.clone());
                info!(path = %key_ref.display(), "Opened mbtiles archive");
                Ok(archive)
            })
            .await
    }

    /// Get or open the pmtiles archive at `locator`.
    pub async fn pmtiles(&self, locator: &ArchiveLocator) -> Result<Arc<PmtilesArchive>, SourceError> {
        if let Some(archive) = self.pmtiles.read().await.get(locator) {
            return Ok(archive.clone());
        }

        self.pmtiles_opens
            .run(locator.clone(), || async move {
                if let Some(archive) = self.pmtiles.read().await.get(locator) {
                    return Ok(archive.clone());
                }

                let reader = self.open_reader(locator).await?;
                let archive = PmtilesArchive::open(reader)
                    .await
                    .map_err(|e| pmtiles_error(locator, e))?;
                let archive = Arc::new(archive);

                self.pmtiles
                    .write()
                    .await
                    .insert(locator.clone(), archive.clone());
                info!(archive = %locator, "Opened pmtiles archive");
                Ok(archive)
            })
            .await
    }

    /// Drop a cached pmtiles handle so the next lookup reopens it.
    pub async fn evict_pmtiles(&self, locator: &ArchiveLocator) {
        if self.pmtiles.write().await.remove(locator).is_some() {
            debug!(archive = %locator, "Evicted pmtiles archive");
        }
    }

    /// Number of open archives of each kind.
    pub async fn open_counts(&self) -> (usize, usize) {
        (self.mbtiles.read().await.len(), self.pmtiles.read().await.len())
    }

    async fn open_reader(&self, locator: &ArchiveLocator) -> Result<Arc<dyn RangeReader>, SourceError> {
        let reader: Arc<dyn RangeReader> = match locator {
            ArchiveLocator::Local(path) => Arc::new(LocalFileReader::open(path).await?),
            ArchiveLocator::Http(url) => {
                let reader = HttpRangeReader::new(self.http.clone(), url.clone()).await?;
                Arc::new(BlockCache::with_capacity(
                    reader,
                    self.block_size,
                    self.block_capacity,
                ))
            }
            ArchiveLocator::S3 { bucket, key } => {
                let client = self.s3.clone().ok_or_else(|| SourceError::NotConfigured {
                    scheme: "s3",
                    uri: locator.to_string(),
                })?;
                let reader = S3RangeReader::new(client, bucket.clone(), key.clone()).await?;
                Arc::new(BlockCache::with_capacity(
                    reader,
                    self.block_size,
                    self.block_capacity,
                ))
            }
        };
        Ok(reader)
    }
}

/// Map archive failures, keeping I/O failures distinguishable.
pub(crate) fn pmtiles_error(locator: &ArchiveLocator, err: PmtilesError) -> SourceError {
    match err {
        PmtilesError::Io(io) => SourceError::Io(io),
        other => SourceError::Archive {
            path: locator.to_string(),
            message: other.to_string(),
        },
    }
}
