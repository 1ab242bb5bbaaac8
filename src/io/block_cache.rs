use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use lru::LruCache;

use super::range_reader::check_bounds;
use super::RangeReader;
use crate::error::IoError;
use crate::singleflight::SingleFlight;

/// Default block size: 64KB.
///
/// Covers the 16KB PMTiles header prefetch plus a typical leaf directory in
/// one request, while keeping a single vector tile fetch small.
pub const DEFAULT_BLOCK_SIZE: usize = 64 * 1024;

/// Default cache capacity in number of blocks (16MB at the default size).
pub const DEFAULT_BLOCK_CAPACITY: usize = 256;

/// Block-based caching layer that wraps any remote RangeReader.
///
/// Archive lookups issue many small reads at scattered offsets: the header,
/// the root directory, a leaf directory, then the tile. Rounding each read
/// out to fixed-size blocks turns repeat lookups into memory hits.
///
/// - LRU eviction when the cache reaches capacity
/// - Concurrent requests for the same block share one fetch
/// - Reads spanning several blocks are stitched together
pub struct BlockCache<R> {
    inner: Arc<R>,
    block_size: usize,
    cache: Mutex<LruCache<u64, Bytes>>,
    fetches: SingleFlight<u64, Result<Bytes, IoError>>,
}

impl<R: RangeReader> BlockCache<R> {
    /// Create a new BlockCache with the default block size and capacity.
    pub fn new(inner: R) -> Self {
        Self::with_capacity(inner, DEFAULT_BLOCK_SIZE, DEFAULT_BLOCK_CAPACITY)
    }

    /// Create a new BlockCache with custom block size and capacity.
    ///
    /// Zero values are bumped to one.
    pub fn with_capacity(inner: R, block_size: usize, capacity: usize) -> Self {
        Self {
            inner: Arc::new(inner),
            block_size: block_size.max(1),
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
            )),
            fetches: SingleFlight::new(),
        }
    }

    /// Access the wrapped reader.
    pub fn inner(&self) -> &R {
        &self.inner
    }

    fn cached(&self, block_idx: u64) -> Option<Bytes> {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.get(&block_idx).cloned()
    }

    /// Get a block from cache or fetch it from the underlying reader.
    async fn get_block(&self, block_idx: u64) -> Result<Bytes, IoError> {
        if let Some(data) = self.cached(block_idx) {
            return Ok(data);
        }

        self.fetches
            .run(block_idx, || async move {
                // A previous leader may have filled the slot while we queued
                if let Some(data) = self.cached(block_idx) {
                    return Ok(data);
                }

                let data = self.fetch_block_from_source(block_idx).await?;
                self.cache
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .put(block_idx, data.clone());
                Ok(data)
            })
            .await
    }

    /// Fetch a block directly from the underlying reader.
    async fn fetch_block_from_source(&self, block_idx: u64) -> Result<Bytes, IoError> {
        let offset = block_idx * self.block_size as u64;
        let size = self.inner.size();

        // The last block may be short
        let remaining = size.saturating_sub(offset);
        if remaining == 0 {
            return Err(IoError::RangeOutOfBounds {
                offset,
                requested: self.block_size as u64,
                size,
            });
        }

        let len = std::cmp::min(self.block_size as u64, remaining) as usize;
        let data = self.inner.read_exact_at(offset, len).await?;
        if data.len() != len {
            return Err(IoError::Connection(format!(
                "{}: short block read at offset {}, expected {} bytes, got {}",
                self.inner.identifier(),
                offset,
                len,
                data.len()
            )));
        }
        Ok(data)
    }

    #[inline]
    fn block_for_offset(&self, offset: u64) -> u64 {
        offset / self.block_size as u64
    }

    #[inline]
    fn offset_within_block(&self, offset: u64) -> usize {
        (offset % self.block_size as u64) as usize
    }
}

fn slice_block(block: &Bytes, start: usize, len: usize) -> Result<Bytes, IoError> {
    match start.checked_add(len) {
        Some(end) if end <= block.len() => Ok(block.slice(start..end)),
        _ => Err(IoError::RangeOutOfBounds {
            offset: start as u64,
            requested: len as u64,
            size: block.len() as u64,
        }),
    }
}

#[async_trait]
impl<R: RangeReader + 'static> RangeReader for BlockCache<R> {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        check_bounds(offset, len, self.inner.size())?;

        if len == 0 {
            return Ok(Bytes::new());
        }

        let start_block = self.block_for_offset(offset);
        let end_block = self.block_for_offset(offset + len as u64 - 1);

        if start_block == end_block {
            let block = self.get_block(start_block).await?;
            let block_offset = self.offset_within_block(offset);
            return slice_block(&block, block_offset, len);
        }

        let mut result = BytesMut::with_capacity(len);
        let mut remaining = len;
        let mut current_offset = offset;

        for block_idx in start_block..=end_block {
            let block = self.get_block(block_idx).await?;
            let block_offset = self.offset_within_block(current_offset);
            let bytes_in_block = std::cmp::min(block.len().saturating_sub(block_offset), remaining);
            if bytes_in_block == 0 {
                return Err(IoError::Connection(format!(
                    "{}: block {} ends before offset {}",
                    self.inner.identifier(),
                    block_idx,
                    current_offset
                )));
            }

            result.extend_from_slice(&slice_block(&block, block_offset, bytes_in_block)?);

            remaining -= bytes_in_block;
            current_offset += bytes_in_block as u64;
        }

        Ok(result.freeze())
    }

    fn size(&self) -> u64 {
        self.inner.size()
    }

    fn identifier(&self) -> &str {
        self.inner.identifier()
    }
}
