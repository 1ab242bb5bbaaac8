use async_trait::async_trait;
use aws_sdk_s3::Client;
use bytes::Bytes;
use tracing::{debug, warn};

use super::{escape_key, ByteCache};
use crate::io::{get_object, put_object};

/// Which object store backs an [`ObjectStoreCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectProvider {
    S3,
    /// Google Cloud Storage through its S3-compatible API
    Gcs,
}

/// Cache backed by an S3 or GCS bucket.
///
/// There is no client-side expiry: configure a lifecycle rule on the bucket
/// to delete objects past the retention window. Every failure degrades to
/// a miss or a dropped write.
pub struct ObjectStoreCache {
    client: Client,
    provider: ObjectProvider,
    bucket: String,
    prefix: String,
}

impl ObjectStoreCache {
    pub fn new(
        client: Client,
        provider: ObjectProvider,
        bucket: impl Into<String>,
        prefix: Option<&str>,
    ) -> Self {
        Self {
            client,
            provider,
            bucket: bucket.into(),
            prefix: prefix.unwrap_or("").trim_end_matches('/').to_string(),
        }
    }

    /// Object key for a cache key.
    pub fn object_key(&self, key: &str) -> String {
        object_key(&self.prefix, key)
    }
}

fn object_key(prefix: &str, key: &str) -> String {
    let escaped = escape_key(key);
    if prefix.is_empty() {
        escaped
    } else {
        format!("{}/{}", prefix, escaped)
    }
}

#[async_trait]
impl ByteCache for ObjectStoreCache {
    async fn get(&self, key: &str) -> Option<Bytes> {
        let object = self.object_key(key);
        match get_object(&self.client, &self.bucket, &object).await {
            Ok(Some(data)) => Some(data),
            Ok(None) => {
                debug!(bucket = %self.bucket, key = %object, "Object cache miss");
                None
            }
            Err(e) => {
                warn!(bucket = %self.bucket, key = %object, error = %e, "Object cache read failed");
                None
            }
        }
    }

    async fn set(&self, key: &str, value: Bytes) {
        let object = self.object_key(key);
        if let Err(e) = put_object(&self.client, &self.bucket, &object, value).await {
            warn!(bucket = %self.bucket, key = %object, error = %e, "Object cache write failed");
        }
    }

    fn name(&self) -> &'static str {
        match self.provider {
            ObjectProvider::S3 => "s3",
            ObjectProvider::Gcs => "gcs",
        }
    }
}
