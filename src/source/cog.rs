use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, warn};

use super::uri::TileCoord;

/// Byte length of the standard empty tile produced for nodata regions.
pub const EMPTY_COG_TILE_LEN: usize = 129;

/// External decoder turning a Cloud-Optimized GeoTIFF into XYZ tiles.
#[async_trait]
pub trait CogTileDecoder: Send + Sync {
    /// Render tile `tile` of the COG at `path` (a local path or URL).
    async fn render_tile(
        &self,
        path: &str,
        tile: TileCoord,
    ) -> Result<Bytes, Box<dyn std::error::Error + Send + Sync>>;

    /// Length of the decoder's "nothing here" tile, reported as a miss.
    fn empty_tile_len(&self) -> usize {
        EMPTY_COG_TILE_LEN
    }
}

/// Fetch a COG tile, folding empty tiles and decoder failures into a miss.
pub(crate) async fn fetch_cog_tile(
    decoder: &dyn CogTileDecoder,
    path: &str,
    tile: TileCoord,
) -> Option<Bytes> {
    match decoder.render_tile(path, tile).await {
        Ok(data) if data.len() == decoder.empty_tile_len() => {
            debug!(path, %tile, "COG tile is empty");
            None
        }
        Ok(data) => Some(data),
        Err(e) => {
            warn!(path, %tile, error = %e, "COG decoder failed");
            None
        }
    }
}
