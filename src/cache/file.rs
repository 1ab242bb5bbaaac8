use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::{escape_key, ByteCache};
use crate::error::CacheError;

/// Longest escaped key used verbatim as a file name.
const MAX_NAME_LEN: usize = 200;

/// On-disk cache: one regular file per key under a base directory.
///
/// Entries expire `ttl` after their last write, judged by file mtime. A
/// file that cannot be read is treated as a miss and removed. Writes land
/// in a temporary file first and are renamed into place, so readers never
/// see a half-written entry.
pub struct FileCache {
    dir: PathBuf,
    ttl: Duration,
    tmp_counter: AtomicU64,
}

impl FileCache {
    /// Open (creating if needed) a cache rooted at `dir`.
    pub async fn open(dir: impl AsRef<Path>, ttl: Duration) -> Result<Self, CacheError> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| CacheError::Setup {
                backend: "file",
                message: format!("{}: {}", dir.display(), e),
            })?;

        Ok(Self {
            dir,
            ttl,
            tmp_counter: AtomicU64::new(0),
        })
    }

    /// Base directory of the cache.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file holding `key`.
    ///
    /// Long keys are truncated and suffixed with a SHA-256 digest of the
    /// full key to stay under file-name limits.
    pub fn path_for(&self, key: &str) -> PathBuf {
        let escaped = escape_key(key);
        let name = if escaped.len() <= MAX_NAME_LEN {
            escaped
        } else {
            let digest = hex::encode(Sha256::digest(key.as_bytes()));
            let mut cut = MAX_NAME_LEN - digest.len() - 1;
            while !escaped.is_char_boundary(cut) {
                cut -= 1;
            }
            format!("{}-{}", &escaped[..cut], digest)
        };
        self.dir.join(name)
    }

    async fn discard(&self, path: &Path) {
        if let Err(e) = tokio::fs::remove_file(path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %path.display(), error = %e, "Failed to delete cache entry");
            }
        }
    }
}

#[async_trait]
impl ByteCache for FileCache {
    async fn get(&self, key: &str) -> Option<Bytes> {
        let path = self.path_for(key);

        let metadata = match tokio::fs::metadata(&path).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(key, error = %e, "File cache stat failed");
                self.discard(&path).await;
                return None;
            }
        };

        let age = metadata
            .modified()
            .ok()
            .and_then(|mtime| SystemTime::now().duration_since(mtime).ok())
            .unwrap_or_default();
        if age >= self.ttl {
            debug!(key, "File cache entry expired");
            self.discard(&path).await;
            return None;
        }

        match tokio::fs::read(&path).await {
            Ok(data) => Some(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!(key, error = %e, "File cache read failed, dropping entry");
                self.discard(&path).await;
                None
            }
        }
    }

    async fn set(&self, key: &str, value: Bytes) {
        let path = self.path_for(key);
        let tmp = self.dir.join(format!(
            ".tmp-{}-{}",
            std::process::id(),
            self.tmp_counter.fetch_add(1, Ordering::Relaxed)
        ));

        if let Err(e) = tokio::fs::write(&tmp, &value).await {
            warn!(key, error = %e, "File cache write failed");
            self.discard(&tmp).await;
            return;
        }

        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            warn!(key, error = %e, "File cache rename failed");
            self.discard(&tmp).await;
        }
    }

    fn name(&self) -> &'static str {
        "file"
    }
}
