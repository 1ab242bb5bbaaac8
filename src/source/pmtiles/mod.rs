//! PMTiles v3 archive reader.
//!
//! An archive is one file holding a header, a root directory, optional leaf
//! directories and the tile data. Lookups read only what they need through
//! a [`RangeReader`]:
//!
//! ```text
//! open:  [ header | root directory ]   one 16KB read at offset 0
//! tile:  root dir -> leaf dir (0-3 levels) -> tile bytes
//! ```
//!
//! Parsed leaf directories are kept in a small LRU per archive.

mod directory;
mod header;

pub use directory::{find_tile, parse_directory, write_directory, zxy_to_tile_id, Entry};
pub use header::{Compression, Header, TileType, HEADER_SIZE};

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use lru::LruCache;
use tracing::debug;

use super::compression::gunzip;
use super::uri::TileCoord;
use crate::error::PmtilesError;
use crate::io::RangeReader;

/// Bytes read on open; covers the header and, for most archives, the root.
const PREFETCH_LEN: u64 = 16 * 1024;

/// Leaf nesting allowed below the root directory.
const MAX_DIRECTORY_DEPTH: usize = 3;

/// Parsed leaf directories kept per archive.
const LEAF_CACHE_CAPACITY: usize = 64;

/// An open PMTiles archive.
pub struct PmtilesArchive {
    reader: Arc<dyn RangeReader>,
    header: Header,
    root: Arc<Vec<Entry>>,
    leaves: Mutex<LruCache<u64, Arc<Vec<Entry>>>>,
}

impl PmtilesArchive {
    /// Read the header and root directory.
    pub async fn open(reader: Arc<dyn RangeReader>) -> Result<Self, PmtilesError> {
        let size = reader.size();
        if size < HEADER_SIZE as u64 {
            return Err(PmtilesError::FileTooSmall {
                required: HEADER_SIZE as u64,
                actual: size,
            });
        }

        let prefetch = reader.read_exact_at(0, PREFETCH_LEN.min(size) as usize).await?;
        let header = Header::parse(&prefetch)?;

        let root_end = header.root_dir_offset.saturating_add(header.root_dir_length);
        let raw_root = if root_end <= prefetch.len() as u64 {
            prefetch.slice(header.root_dir_offset as usize..root_end as usize)
        } else {
            reader
                .read_exact_at(header.root_dir_offset, header.root_dir_length as usize)
                .await?
        };
        let root = parse_directory(&decompress(raw_root, header.internal_compression, "directory")?)?;

        debug!(
            archive = reader.identifier(),
            entries = root.len(),
            min_zoom = header.min_zoom,
            max_zoom = header.max_zoom,
            "Opened PMTiles archive"
        );

        Ok(Self {
            reader,
            header,
            root: Arc::new(root),
            leaves: Mutex::new(LruCache::new(
                NonZeroUsize::new(LEAF_CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN),
            )),
        })
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn identifier(&self) -> &str {
        self.reader.identifier()
    }

    /// Look up one tile, decompressed per the header's tile compression.
    ///
    /// `Ok(None)` when the archive has no entry for the tile or the tile is
    /// outside the archive's zoom range.
    pub async fn tile(&self, tile: TileCoord) -> Result<Option<Bytes>, PmtilesError> {
        if tile.z < self.header.min_zoom || tile.z > self.header.max_zoom {
            return Ok(None);
        }

        let tile_id = zxy_to_tile_id(tile.z, tile.x, tile.y);
        let mut directory = self.root.clone();

        for _ in 0..=MAX_DIRECTORY_DEPTH {
            let entry = match find_tile(&directory, tile_id) {
                Some(entry) => *entry,
                None => return Ok(None),
            };

            if !entry.is_leaf_pointer() {
                let offset = section_offset(self.header.tile_data_offset, entry.offset)?;
                let data = self
                    .reader
                    .read_exact_at(offset, entry.length as usize)
                    .await?;
                return decompress(data, self.header.tile_compression, "tile").map(Some);
            }

            let offset = section_offset(self.header.leaf_dirs_offset, entry.offset)?;
            directory = self.leaf(offset, entry.length).await?;
        }

        Err(PmtilesError::DirectoryTooDeep(MAX_DIRECTORY_DEPTH))
    }

    async fn leaf(&self, offset: u64, length: u32) -> Result<Arc<Vec<Entry>>, PmtilesError> {
        let cached = self.lock_leaves().get(&offset).cloned();
        if let Some(dir) = cached {
            return Ok(dir);
        }

        let raw = self.reader.read_exact_at(offset, length as usize).await?;
        let dir = Arc::new(parse_directory(&decompress(
            raw,
            self.header.internal_compression,
            "directory",
        )?)?);

        self.lock_leaves().put(offset, dir.clone());
        Ok(dir)
    }

    fn lock_leaves(&self) -> std::sync::MutexGuard<'_, LruCache<u64, Arc<Vec<Entry>>>> {
        self.leaves.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Absolute position of an entry inside the leaf or tile data section.
fn section_offset(section: u64, offset: u64) -> Result<u64, PmtilesError> {
    section.checked_add(offset).ok_or_else(|| {
        PmtilesError::MalformedDirectory(format!(
            "entry offset {} overflows section at {}",
            offset, section
        ))
    })
}

fn decompress(
    data: Bytes,
    compression: Compression,
    context: &'static str,
) -> Result<Bytes, PmtilesError> {
    match compression {
        Compression::None | Compression::Unknown => Ok(data),
        Compression::Gzip => gunzip(&data).map_err(|e| PmtilesError::Decompress(e.to_string())),
        other => Err(PmtilesError::UnsupportedCompression {
            context,
            method: other.name(),
        }),
    }
}
