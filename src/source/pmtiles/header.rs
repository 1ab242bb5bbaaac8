//! PMTiles v3 header parsing.
//!
//! # Layout (127 bytes, little-endian)
//! ```text
//! Bytes   0-6:   Magic "PMTiles"
//! Byte      7:   Version (3)
//! Bytes   8-71:  Offset/length pairs: root directory, metadata,
//!                leaf directories, tile data (u64 each)
//! Bytes  72-95:  Addressed tiles, tile entries, tile contents (u64 each)
//! Byte     96:   Clustered flag
//! Bytes  97-99:  Internal compression, tile compression, tile type
//! Bytes 100-101: Min zoom, max zoom
//! Bytes 102-117: Bounds as i32 degrees * 1e7 (min lon, min lat, max lon, max lat)
//! Byte    118:   Center zoom
//! Bytes 119-126: Center lon, center lat as i32 degrees * 1e7
//! ```

use crate::error::PmtilesError;
use crate::io::{read_i32_le, read_u64_le};

// =============================================================================
// Constants
// =============================================================================

/// Leading magic bytes.
const MAGIC: &[u8; 7] = b"PMTiles";

/// The only version this reader understands.
const VERSION: u8 = 3;

/// Size of the fixed header in bytes.
pub const HEADER_SIZE: usize = 127;

// =============================================================================
// Enumerations
// =============================================================================

/// Compression applied to directories/metadata (internal) or to tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Unknown,
    None,
    Gzip,
    Brotli,
    Zstd,
}

impl Compression {
    pub fn from_byte(b: u8) -> Self {
        match b {
            1 => Compression::None,
            2 => Compression::Gzip,
            3 => Compression::Brotli,
            4 => Compression::Zstd,
            _ => Compression::Unknown,
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            Compression::Unknown => 0,
            Compression::None => 1,
            Compression::Gzip => 2,
            Compression::Brotli => 3,
            Compression::Zstd => 4,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Compression::Unknown => "unknown",
            Compression::None => "none",
            Compression::Gzip => "gzip",
            Compression::Brotli => "brotli",
            Compression::Zstd => "zstd",
        }
    }
}

/// Format of the tiles stored in the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileType {
    Unknown,
    Mvt,
    Png,
    Jpeg,
    Webp,
    Avif,
}

impl TileType {
    pub fn from_byte(b: u8) -> Self {
        match b {
            1 => TileType::Mvt,
            2 => TileType::Png,
            3 => TileType::Jpeg,
            4 => TileType::Webp,
            5 => TileType::Avif,
            _ => TileType::Unknown,
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            TileType::Unknown => 0,
            TileType::Mvt => 1,
            TileType::Png => 2,
            TileType::Jpeg => 3,
            TileType::Webp => 4,
            TileType::Avif => 5,
        }
    }
}

// =============================================================================
// Header
// =============================================================================

/// Parsed PMTiles v3 header.
#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    pub root_dir_offset: u64,
    pub root_dir_length: u64,
    pub metadata_offset: u64,
    pub metadata_length: u64,
    pub leaf_dirs_offset: u64,
    pub leaf_dirs_length: u64,
    pub tile_data_offset: u64,
    pub tile_data_length: u64,
    pub addressed_tiles: u64,
    pub tile_entries: u64,
    pub tile_contents: u64,
    pub clustered: bool,
    pub internal_compression: Compression,
    pub tile_compression: Compression,
    pub tile_type: TileType,
    pub min_zoom: u8,
    pub max_zoom: u8,
    /// `[min_lon, min_lat, max_lon, max_lat]` in degrees
    pub bounds: [f64; 4],
    pub center_zoom: u8,
    /// `[lon, lat]` in degrees
    pub center: [f64; 2],
}

impl Header {
    /// Parse the header from the first bytes of an archive.
    ///
    /// # Errors
    /// - `FileTooSmall` if fewer than 127 bytes are given
    /// - `InvalidMagic` if the archive does not start with "PMTiles"
    /// - `UnsupportedVersion` for anything but v3
    pub fn parse(bytes: &[u8]) -> Result<Self, PmtilesError> {
        if bytes.len() < HEADER_SIZE {
            return Err(PmtilesError::FileTooSmall {
                required: HEADER_SIZE as u64,
                actual: bytes.len() as u64,
            });
        }

        if &bytes[0..7] != MAGIC {
            return Err(PmtilesError::InvalidMagic);
        }

        if bytes[7] != VERSION {
            return Err(PmtilesError::UnsupportedVersion(bytes[7]));
        }

        let u64_at = |offset: usize| read_u64_le(&bytes[offset..offset + 8]);
        let deg_at = |offset: usize| f64::from(read_i32_le(&bytes[offset..offset + 4])) / 1e7;

        Ok(Self {
            root_dir_offset: u64_at(8),
            root_dir_length: u64_at(16),
            metadata_offset: u64_at(24),
            metadata_length: u64_at(32),
            leaf_dirs_offset: u64_at(40),
            leaf_dirs_length: u64_at(48),
            tile_data_offset: u64_at(56),
            tile_data_length: u64_at(64),
            addressed_tiles: u64_at(72),
            tile_entries: u64_at(80),
            tile_contents: u64_at(88),
            clustered: bytes[96] == 1,
            internal_compression: Compression::from_byte(bytes[97]),
            tile_compression: Compression::from_byte(bytes[98]),
            tile_type: TileType::from_byte(bytes[99]),
            min_zoom: bytes[100],
            max_zoom: bytes[101],
            bounds: [deg_at(102), deg_at(106), deg_at(110), deg_at(114)],
            center_zoom: bytes[118],
            center: [deg_at(119), deg_at(123)],
        })
    }

    /// Serialize back to the 127-byte on-disk form.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0..7].copy_from_slice(MAGIC);
        out[7] = VERSION;

        let words = [
            self.root_dir_offset,
            self.root_dir_length,
            self.metadata_offset,
            self.metadata_length,
            self.leaf_dirs_offset,
            self.leaf_dirs_length,
            self.tile_data_offset,
            self.tile_data_length,
            self.addressed_tiles,
            self.tile_entries,
            self.tile_contents,
        ];
        for (i, word) in words.iter().enumerate() {
            let at = 8 + i * 8;
            out[at..at + 8].copy_from_slice(&word.to_le_bytes());
        }

        out[96] = u8::from(self.clustered);
        out[97] = self.internal_compression.to_byte();
        out[98] = self.tile_compression.to_byte();
        out[99] = self.tile_type.to_byte();
        out[100] = self.min_zoom;
        out[101] = self.max_zoom;

        let e7 = |deg: f64| ((deg * 1e7).round() as i32).to_le_bytes();
        for (i, deg) in self.bounds.iter().enumerate() {
            let at = 102 + i * 4;
            out[at..at + 4].copy_from_slice(&e7(*deg));
        }
        out[118] = self.center_zoom;
        out[119..123].copy_from_slice(&e7(self.center[0]));
        out[123..127].copy_from_slice(&e7(self.center[1]));

        out
    }
}

impl Default for Header {
    fn default() -> Self {
        Self {
            root_dir_offset: HEADER_SIZE as u64,
            root_dir_length: 0,
            metadata_offset: HEADER_SIZE as u64,
            metadata_length: 0,
            leaf_dirs_offset: HEADER_SIZE as u64,
            leaf_dirs_length: 0,
            tile_data_offset: HEADER_SIZE as u64,
            tile_data_length: 0,
            addressed_tiles: 0,
            tile_entries: 0,
            tile_contents: 0,
            clustered: true,
            internal_compression: Compression::None,
            tile_compression: Compression::None,
            tile_type: TileType::Mvt,
            min_zoom: 0,
            max_zoom: 0,
            bounds: [-180.0, -85.0511287, 180.0, 85.0511287],
            center_zoom: 0,
            center: [0.0, 0.0],
        }
    }
}
