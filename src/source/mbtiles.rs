use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use rusqlite::{Connection, OpenFlags, OptionalExtension};

use super::compression::decompress_auto;
use super::uri::TileCoord;
use crate::error::SourceError;

const TILE_QUERY: &str =
    "SELECT tile_data FROM tiles WHERE zoom_level = ?1 AND tile_column = ?2 AND tile_row = ?3";

/// Read-only handle to an mbtiles (SQLite) tile archive.
///
/// Tiles are addressed in XYZ and converted to the archive's TMS rows.
/// Queries run on the blocking pool; the connection is shared behind a
/// mutex, so concurrent lookups through one handle serialize.
#[derive(Clone)]
pub struct MbtilesArchive {
    path: PathBuf,
    conn: Arc<Mutex<Connection>>,
}

impl MbtilesArchive {
    /// Open `path` read-only.
    ///
    /// Fails if the file is missing or has no `tiles` table.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let path = path.as_ref().to_path_buf();
        let open_path = path.clone();

        let conn = tokio::task::spawn_blocking(move || -> Result<Connection, rusqlite::Error> {
            let conn = Connection::open_with_flags(
                &open_path,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?;
            // Fail on open rather than on the first tile
            conn.prepare_cached(TILE_QUERY)?;
            Ok(conn)
        })
        .await
        .map_err(|e| archive_error(&path, e.to_string()))?
        .map_err(|e| archive_error(&path, e.to_string()))?;

        Ok(Self {
            path,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Fetch and inflate one tile. `Ok(None)` when the archive has no row.
    pub async fn tile(&self, tile: TileCoord) -> Result<Option<Bytes>, SourceError> {
        let conn = self.conn.clone();

        let blob = tokio::task::spawn_blocking(move || -> Result<Option<Vec<u8>>, rusqlite::Error> {
            let conn = conn.lock().unwrap_or_else(|e| e.into_inner());
            let mut stmt = conn.prepare_cached(TILE_QUERY)?;
            let blob = stmt
                .query_row((tile.z, tile.x, tile.tms_row()), |row| row.get(0))
                .optional()?;
            Ok(blob)
        })
        .await
        .map_err(|e| archive_error(&self.path, e.to_string()))?
        .map_err(|e| archive_error(&self.path, e.to_string()))?;

        match blob {
            None => Ok(None),
            Some(data) => decompress_auto(Bytes::from(data))
                .map(Some)
                .map_err(|e| archive_error(&self.path, format!("tile {}: {}", tile, e))),
        }
    }
}

fn archive_error(path: &Path, message: String) -> SourceError {
    SourceError::Archive {
        path: path.display().to_string(),
        message,
    }
}
