//! Multi-protocol source resolution.
//!
//! Styles, sprites, glyphs and tiles are all addressed by URI. The
//! [`SourceResolver`] dispatches on scheme:
//!
//! - `http(s)://` - GET, cached
//! - `file://` - local read, uncached
//! - `s3://`, `gs://` - whole-object GET
//! - `mbtiles://path/{z}/{x}/{y}` - SQLite tile archive
//! - `pmtiles://{locator}/{z}/{x}/{y}` - PMTiles v3 over local, HTTP or S3 range reads
//! - `cog://{path}/{z}/{x}/{y}` - external Cloud-Optimized GeoTIFF decoder

mod archives;
mod cog;
mod compression;
mod mbtiles;
pub mod pmtiles;
mod resolver;
mod uri;

pub use archives::ArchiveHandles;
pub use cog::{CogTileDecoder, EMPTY_COG_TILE_LEN};
pub use compression::decompress_auto;
pub use mbtiles::MbtilesArchive;
pub use pmtiles::PmtilesArchive;
pub use resolver::{SourceResolver, SourceResolverBuilder};
pub use uri::{ArchiveLocator, SourceUri, TileCoord, MAX_ZOOM};
