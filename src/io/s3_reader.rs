use std::path::Path;

use async_trait::async_trait;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;
use serde::Deserialize;

use super::range_reader::check_bounds;
use super::{NetworkTimeouts, RangeReader};
use crate::error::IoError;

/// Default endpoint for Google Cloud Storage's S3-compatible XML API.
pub const DEFAULT_GCS_ENDPOINT: &str = "https://storage.googleapis.com";

/// S3-backed implementation of RangeReader.
///
/// Reads byte ranges from objects in S3 or S3-compatible storage (MinIO, GCS
/// interop) using HTTP range requests. The object size and ETag are fetched
/// once on creation via HEAD; later range GETs carry `If-Match` so a
/// replaced object fails loudly instead of yielding torn reads.
#[derive(Clone)]
pub struct S3RangeReader {
    client: Client,
    bucket: String,
    key: String,
    size: u64,
    etag: Option<String>,
    identifier: String,
}

impl S3RangeReader {
    /// Create a new S3RangeReader for the given bucket and key.
    ///
    /// This performs a HEAD request to determine the object size.
    /// Returns an error if the object does not exist or is inaccessible.
    pub async fn new(client: Client, bucket: String, key: String) -> Result<Self, IoError> {
        let identifier = format!("s3://{}/{}", bucket, key);

        let head = client
            .head_object()
            .bucket(&bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| {
                let is_not_found = e
                    .as_service_error()
                    .map(|se| se.is_not_found())
                    .unwrap_or(false);

                if is_not_found || status_of(&e) == Some(404) {
                    return IoError::NotFound(identifier.clone());
                }

                IoError::S3(e.to_string())
            })?;

        let size = head.content_length().unwrap_or(0).max(0) as u64;
        let etag = head.e_tag().map(str::to_string);

        Ok(Self {
            client,
            bucket,
            key,
            size,
            etag,
            identifier,
        })
    }

    /// Get the bucket name.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Get the object key.
    pub fn key(&self) -> &str {
        &self.key
    }
}

#[async_trait]
impl RangeReader for S3RangeReader {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        check_bounds(offset, len, self.size)?;

        if len == 0 {
            return Ok(Bytes::new());
        }

        // Build range header: "bytes=start-end" (inclusive on both ends)
        let range = format!("bytes={}-{}", offset, offset + len as u64 - 1);

        let mut request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&self.key)
            .range(range);
        if let Some(etag) = &self.etag {
            request = request.if_match(etag);
        }

        let resp = request.send().await.map_err(|e| {
            if status_of(&e) == Some(412) {
                IoError::PreconditionFailed(self.identifier.clone())
            } else {
                IoError::S3(e.to_string())
            }
        })?;

        let data = resp
            .body
            .collect()
            .await
            .map_err(|e| IoError::Connection(e.to_string()))?
            .into_bytes();

        if data.len() != len {
            return Err(IoError::Connection(format!(
                "{}: short read, expected {} bytes, got {}",
                self.identifier,
                len,
                data.len()
            )));
        }

        Ok(data)
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}

// =============================================================================
// Whole-object helpers
// =============================================================================

/// Fetch a whole object.
///
/// A missing key is `Ok(None)`; every other failure is an error.
pub async fn get_object(client: &Client, bucket: &str, key: &str) -> Result<Option<Bytes>, IoError> {
    let resp = match client.get_object().bucket(bucket).key(key).send().await {
        Ok(resp) => resp,
        Err(e) => {
            let no_such_key = e
                .as_service_error()
                .map(|se| se.is_no_such_key())
                .unwrap_or(false);
            if no_such_key || status_of(&e) == Some(404) {
                return Ok(None);
            }
            return Err(IoError::S3(e.to_string()));
        }
    };

    let data = resp
        .body
        .collect()
        .await
        .map_err(|e| IoError::Connection(e.to_string()))?
        .into_bytes();

    Ok(Some(data))
}

/// Upload a whole object, replacing any previous version.
pub async fn put_object(client: &Client, bucket: &str, key: &str, data: Bytes) -> Result<(), IoError> {
    client
        .put_object()
        .bucket(bucket)
        .key(key)
        .body(ByteStream::from(data))
        .send()
        .await
        .map_err(|e| IoError::S3(e.to_string()))?;
    Ok(())
}

fn status_of<E>(err: &SdkError<E, HttpResponse>) -> Option<u16> {
    err.raw_response().map(|resp| resp.status().as_u16())
}

// =============================================================================
// Client construction
// =============================================================================

/// Create an S3 client with optional custom endpoint and region.
///
/// Use a custom endpoint for S3-compatible services like MinIO:
/// ```ignore
/// let client = create_s3_client(Some("http://localhost:9000"), "us-east-1", true, NetworkTimeouts::default()).await;
/// ```
///
/// For AWS S3, pass `None` to use the default endpoint:
/// ```ignore
/// let client = create_s3_client(None, "us-east-1", false, NetworkTimeouts::default()).await;
/// ```
pub async fn create_s3_client(
    endpoint_url: Option<&str>,
    region: &str,
    force_path_style: bool,
    timeouts: NetworkTimeouts,
) -> Client {
    let region = aws_config::Region::new(region.to_string());
    let mut config_loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(region)
        .timeout_config(timeouts.aws_timeout_config());

    if let Some(endpoint) = endpoint_url {
        config_loader = config_loader.endpoint_url(endpoint);
    }

    let sdk_config = config_loader.load().await;

    // S3-compatible services usually need path-style addressing
    let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
        .force_path_style(force_path_style || endpoint_url.is_some())
        .build();

    Client::from_conf(s3_config)
}

/// HMAC key file for Google Cloud Storage interoperability access.
#[derive(Debug, Deserialize)]
struct GcsHmacKey {
    access_key_id: String,
    secret_access_key: String,
}

/// Create a client for Google Cloud Storage through its S3-compatible API.
///
/// With `hmac_key_filename`, credentials are read from a JSON file holding
/// `access_key_id` and `secret_access_key` (a GCS HMAC key). Without it,
/// the default AWS credential chain is used, which picks up HMAC keys
/// exported as `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY`.
pub async fn create_gcs_client(
    endpoint_url: &str,
    hmac_key_filename: Option<&Path>,
    timeouts: NetworkTimeouts,
) -> Result<Client, IoError> {
    let region = aws_config::Region::new("auto");
    let mut config_loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(region)
        .endpoint_url(endpoint_url)
        .timeout_config(timeouts.aws_timeout_config());

    if let Some(path) = hmac_key_filename {
        let raw = tokio::fs::read(path)
            .await
            .map_err(|e| IoError::Local(format!("{}: {}", path.display(), e)))?;
        let key: GcsHmacKey = serde_json::from_slice(&raw)
            .map_err(|e| IoError::Local(format!("{}: {}", path.display(), e)))?;
        config_loader = config_loader.credentials_provider(Credentials::new(
            key.access_key_id,
            key.secret_access_key,
            None,
            None,
            "gcs-hmac-key-file",
        ));
    }

    let sdk_config = config_loader.load().await;
    let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
        .force_path_style(true)
        .build();

    Ok(Client::from_conf(s3_config))
}
