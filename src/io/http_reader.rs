use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{CONTENT_LENGTH, ETAG, IF_MATCH, RANGE};
use reqwest::{Client, ClientBuilder, StatusCode};

use super::range_reader::check_bounds;
use super::RangeReader;
use crate::error::IoError;

/// Connect and per-request limits shared by the HTTP and object store clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkTimeouts {
    pub connect: Duration,
    /// Whole request, body included.
    pub request: Duration,
}

impl Default for NetworkTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(5),
            request: Duration::from_secs(30),
        }
    }
}

impl NetworkTimeouts {
    /// A reqwest builder carrying these limits.
    pub fn http_client_builder(&self) -> ClientBuilder {
        Client::builder()
            .connect_timeout(self.connect)
            .timeout(self.request)
    }

    pub fn http_client(&self) -> Result<Client, IoError> {
        self.http_client_builder()
            .build()
            .map_err(|e| IoError::Connection(format!("failed to build HTTP client: {}", e)))
    }

    /// The same limits for the AWS SDK.
    pub fn aws_timeout_config(&self) -> aws_config::timeout::TimeoutConfig {
        aws_config::timeout::TimeoutConfig::builder()
            .connect_timeout(self.connect)
            .operation_attempt_timeout(self.request)
            .build()
    }
}

/// HTTP(S) implementation of RangeReader.
///
/// The object size and ETag are fetched once on creation via HEAD. Every
/// range read sends `Range: bytes=a-b` and, when the server supplied an
/// ETag, `If-Match` so a replaced object is detected instead of being read
/// as a mix of old and new bytes.
#[derive(Clone)]
pub struct HttpRangeReader {
    client: Client,
    url: String,
    size: u64,
    etag: Option<String>,
}

impl HttpRangeReader {
    /// Create a new HttpRangeReader for `url`.
    ///
    /// Returns `IoError::NotFound` on 404 and `IoError::Http` for any other
    /// non-success status or a missing `Content-Length`.
    pub async fn new(client: Client, url: String) -> Result<Self, IoError> {
        let resp = client
            .head(&url)
            .send()
            .await
            .map_err(|e| IoError::Connection(format!("{}: {}", url, e)))?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Err(IoError::NotFound(url));
        }
        if !status.is_success() {
            return Err(IoError::Http(format!("{} returned {}", url, status)));
        }

        // reqwest reports a zero body length for HEAD, so read the header.
        let size = resp
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .ok_or_else(|| IoError::Http(format!("{} did not report Content-Length", url)))?;

        let etag = resp
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        Ok(Self {
            client,
            url,
            size,
            etag,
        })
    }

    /// Get the ETag recorded at open time, if the server sent one.
    pub fn etag(&self) -> Option<&str> {
        self.etag.as_deref()
    }
}

#[async_trait]
impl RangeReader for HttpRangeReader {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        check_bounds(offset, len, self.size)?;

        if len == 0 {
            return Ok(Bytes::new());
        }

        let end = offset + len as u64 - 1;
        let mut request = self
            .client
            .get(&self.url)
            .header(RANGE, format!("bytes={}-{}", offset, end));
        if let Some(etag) = &self.etag {
            request = request.header(IF_MATCH, etag.as_str());
        }

        let resp = request
            .send()
            .await
            .map_err(|e| IoError::Connection(format!("{}: {}", self.url, e)))?;

        let status = resp.status();
        if status == StatusCode::PRECONDITION_FAILED {
            return Err(IoError::PreconditionFailed(self.url.clone()));
        }
        if status == StatusCode::NOT_FOUND {
            return Err(IoError::NotFound(self.url.clone()));
        }
        if !status.is_success() {
            return Err(IoError::Http(format!("{} returned {}", self.url, status)));
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| IoError::Connection(format!("{}: {}", self.url, e)))?;

        // A server that ignores Range answers 200 with the whole object.
        let data = if status == StatusCode::PARTIAL_CONTENT {
            body
        } else if body.len() as u64 >= end + 1 {
            body.slice(offset as usize..=end as usize)
        } else {
            body
        };

        if data.len() != len {
            return Err(IoError::Connection(format!(
                "{}: short read, expected {} bytes, got {}",
                self.url,
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
        &self.url
    }
}
