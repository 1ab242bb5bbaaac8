//! Source URI parsing.
//!
//! URIs are dispatched strictly by scheme prefix. Archive schemes carry a
//! trailing `/{z}/{x}/{y}` with decimal components; everything before it is
//! the archive locator.

use std::fmt;
use std::path::PathBuf;

use crate::error::SourceError;

/// Deepest zoom level accepted in a tile address.
pub const MAX_ZOOM: u8 = 30;

/// Tile address in the XYZ (top-left origin) convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileCoord {
    pub z: u8,
    pub x: u32,
    pub y: u32,
}

impl TileCoord {
    /// Create a coordinate, rejecting ones outside the zoom's grid.
    pub fn new(z: u8, x: u32, y: u32) -> Option<Self> {
        if z > MAX_ZOOM {
            return None;
        }
        let n = 1u64 << z;
        if u64::from(x) >= n || u64::from(y) >= n {
            return None;
        }
        Some(Self { z, x, y })
    }

    /// Row in the TMS (bottom-left origin) convention used by mbtiles.
    pub fn tms_row(&self) -> u32 {
        ((1u64 << self.z) - 1 - u64::from(self.y)) as u32
    }
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.z, self.x, self.y)
    }
}

/// Where a range-readable archive lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ArchiveLocator {
    Local(PathBuf),
    /// Full `http(s)://` URL
    Http(String),
    S3 { bucket: String, key: String },
}

impl ArchiveLocator {
    pub fn is_remote(&self) -> bool {
        !matches!(self, ArchiveLocator::Local(_))
    }
}

impl fmt::Display for ArchiveLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchiveLocator::Local(path) => write!(f, "{}", path.display()),
            ArchiveLocator::Http(url) => f.write_str(url),
            ArchiveLocator::S3 { bucket, key } => write!(f, "s3://{}/{}", bucket, key),
        }
    }
}

/// A parsed source URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceUri {
    /// `http://` or `https://`, kept verbatim
    Http(String),
    /// `file://path`
    File(PathBuf),
    /// `s3://bucket/key`
    S3 { bucket: String, key: String },
    /// `gs://bucket/key`
    Gcs { bucket: String, key: String },
    /// `mbtiles://path/{z}/{x}/{y}`
    Mbtiles { path: PathBuf, tile: TileCoord },
    /// `pmtiles://{locator}/{z}/{x}/{y}`
    Pmtiles {
        locator: ArchiveLocator,
        tile: TileCoord,
    },
    /// `cog://{path}/{z}/{x}/{y}`, where path may itself be a URL
    Cog { path: String, tile: TileCoord },
}

impl SourceUri {
    /// Parse `uri` by scheme prefix.
    pub fn parse(uri: &str) -> Result<Self, SourceError> {
        if uri.starts_with("http://") || uri.starts_with("https://") {
            return Ok(SourceUri::Http(uri.to_string()));
        }
        if let Some(rest) = uri.strip_prefix("file://") {
            return Ok(SourceUri::File(PathBuf::from(rest)));
        }
        if let Some(rest) = uri.strip_prefix("s3://") {
            let (bucket, key) = split_bucket(uri, rest)?;
            return Ok(SourceUri::S3 { bucket, key });
        }
        if let Some(rest) = uri.strip_prefix("gs://") {
            let (bucket, key) = split_bucket(uri, rest)?;
            return Ok(SourceUri::Gcs { bucket, key });
        }
        if let Some(rest) = uri.strip_prefix("mbtiles://") {
            let (path, tile) = split_tile(uri, rest)?;
            return Ok(SourceUri::Mbtiles {
                path: PathBuf::from(path),
                tile,
            });
        }
        if let Some(rest) = uri.strip_prefix("pmtiles://") {
            let (locator, tile) = split_tile(uri, rest)?;
            let locator = if locator.starts_with("http://") || locator.starts_with("https://") {
                ArchiveLocator::Http(locator.to_string())
            } else if let Some(object) = locator.strip_prefix("s3://") {
                let (bucket, key) = split_bucket(uri, object)?;
                ArchiveLocator::S3 { bucket, key }
            } else {
                ArchiveLocator::Local(PathBuf::from(locator))
            };
            return Ok(SourceUri::Pmtiles { locator, tile });
        }
        if let Some(rest) = uri.strip_prefix("cog://") {
            let (path, tile) = split_tile(uri, rest)?;
            return Ok(SourceUri::Cog {
                path: path.to_string(),
                tile,
            });
        }

        Err(SourceError::UnsupportedScheme {
            uri: uri.to_string(),
        })
    }

    /// Short scheme name for logs.
    pub fn scheme(&self) -> &'static str {
        match self {
            SourceUri::Http(_) => "http",
            SourceUri::File(_) => "file",
            SourceUri::S3 { .. } => "s3",
            SourceUri::Gcs { .. } => "gs",
            SourceUri::Mbtiles { .. } => "mbtiles",
            SourceUri::Pmtiles { .. } => "pmtiles",
            SourceUri::Cog { .. } => "cog",
        }
    }
}

fn invalid(uri: &str, reason: &str) -> SourceError {
    SourceError::InvalidUri {
        uri: uri.to_string(),
        reason: reason.to_string(),
    }
}

/// Split `bucket/key` at the first slash.
fn split_bucket(uri: &str, rest: &str) -> Result<(String, String), SourceError> {
    match rest.split_once('/') {
        Some((bucket, key)) if !bucket.is_empty() && !key.is_empty() => {
            Ok((bucket.to_string(), key.to_string()))
        }
        _ => Err(invalid(uri, "expected bucket/key")),
    }
}

/// Split `locator/{z}/{x}/{y}` into the locator and the tile.
fn split_tile<'a>(uri: &str, rest: &'a str) -> Result<(&'a str, TileCoord), SourceError> {
    let mut parts = rest.rsplitn(4, '/');
    let (y, x, z, locator) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(y), Some(x), Some(z), Some(locator)) => (y, x, z, locator),
        _ => return Err(invalid(uri, "expected a trailing /{z}/{x}/{y}")),
    };

    if locator.is_empty() {
        return Err(invalid(uri, "missing archive path"));
    }

    let z: u8 = parse_component(uri, z)?;
    let x: u32 = parse_component(uri, x)?;
    let y: u32 = parse_component(uri, y)?;
    let tile = TileCoord::new(z, x, y).ok_or_else(|| invalid(uri, "tile is outside the zoom's grid"))?;

    Ok((locator, tile))
}

fn parse_component<T: std::str::FromStr>(uri: &str, s: &str) -> Result<T, SourceError> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid(uri, "tile components must be decimal integers"));
    }
    s.parse().map_err(|_| invalid(uri, "tile component out of range"))
}
