//! Configuration management for tilesmith.
//!
//! Every option can be given on the command line or through an environment
//! variable with the `TILESMITH_` prefix, and every option has a default.
//! The sections are plain `clap::Args` structs so an embedding server can
//! flatten them into its own CLI.
//!
//! # Environment Variables
//!
//! - `TILESMITH_CACHE` - Cache backend: none, memory, file, s3, gcs (default: none)
//! - `TILESMITH_CACHE_TTL` - Cache entry lifetime in seconds (default: 3600)
//! - `TILESMITH_MEMORY_CACHE_MAX_ITEMS` - Memory cache item bound (default: 1000)
//! - `TILESMITH_FILE_CACHE_DIR` - File cache directory (default: ./.cache)
//! - `TILESMITH_S3_CACHE_BUCKET` / `TILESMITH_GCS_CACHE_BUCKET` - Object cache buckets
//! - `TILESMITH_CACHE_PREFIX` - Key prefix inside the object cache bucket
//! - `TILESMITH_S3_REGION` - AWS region (default: us-east-1)
//! - `TILESMITH_S3_ENDPOINT` - Custom S3 endpoint for S3-compatible services
//! - `TILESMITH_S3_FORCE_PATH_STYLE` - Path-style S3 addressing
//! - `TILESMITH_GCS_ENDPOINT` - GCS interop endpoint
//! - `TILESMITH_GCS_HMAC_KEY_FILENAME` - JSON file with a GCS HMAC key
//! - `TILESMITH_CONNECT_TIMEOUT_MS` / `TILESMITH_REQUEST_TIMEOUT_MS` - Network limits for HTTP, S3 and GCS
//! - `TILESMITH_POOL_MAX_INSTANCES` - Renderer instances per pool (default: 4)
//! - `TILESMITH_POOL_MAX_STYLES` - Pools kept before LRU eviction (default: 16)

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use std::time::Duration;

use crate::io::{NetworkTimeouts, DEFAULT_BLOCK_CAPACITY, DEFAULT_BLOCK_SIZE, DEFAULT_GCS_ENDPOINT};
use crate::render::FingerprintAlgorithm;

// =============================================================================
// Default Values
// =============================================================================

/// Default cache entry lifetime in seconds (1 hour).
pub const DEFAULT_CACHE_TTL_SECS: u64 = 3600;

/// Default item bound of the memory cache.
pub const DEFAULT_MEMORY_CACHE_MAX_ITEMS: usize = 1000;

/// Default file cache directory.
pub const DEFAULT_FILE_CACHE_DIR: &str = "./.cache";

/// Default AWS region.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Default connect timeout for remote sources in milliseconds.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;

/// Default whole-request timeout for remote sources in milliseconds.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;

/// Default renderer instances per pool.
pub const DEFAULT_POOL_MAX_INSTANCES: usize = 4;

/// Default number of style pools kept alive.
pub const DEFAULT_POOL_MAX_STYLES: usize = 16;

/// Default wait for a free renderer instance.
pub const DEFAULT_ACQUIRE_TIMEOUT_MS: u64 = 30_000;

/// Default upper bound on a single render call.
pub const DEFAULT_RENDER_TIMEOUT_MS: u64 = 60_000;

/// Default number of parsed styles memoized by URI.
pub const DEFAULT_STYLE_MEMO_CAPACITY: usize = 5;

// =============================================================================
// Cache
// =============================================================================

/// Which ByteCache backs network fetches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum CacheBackend {
    /// Never cache
    #[default]
    None,
    /// Bounded in-process LRU with TTL
    Memory,
    /// Files under a local directory with TTL
    File,
    /// Objects in an S3 bucket
    S3,
    /// Objects in a Google Cloud Storage bucket
    Gcs,
}

impl CacheBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheBackend::None => "none",
            CacheBackend::Memory => "memory",
            CacheBackend::File => "file",
            CacheBackend::S3 => "s3",
            CacheBackend::Gcs => "gcs",
        }
    }
}

/// Cache selection and per-backend options.
#[derive(Args, Debug, Clone)]
pub struct CacheConfig {
    /// Cache backend for network-origin fetches.
    #[arg(long = "cache", value_enum, default_value_t = CacheBackend::None, env = "TILESMITH_CACHE")]
    pub backend: CacheBackend,

    /// Entry lifetime in seconds (memory and file backends).
    ///
    /// Object-storage caches rely on a bucket lifecycle rule instead.
    #[arg(long = "cache-ttl", default_value_t = DEFAULT_CACHE_TTL_SECS, env = "TILESMITH_CACHE_TTL")]
    pub ttl_secs: u64,

    /// Maximum number of entries in the memory cache.
    #[arg(
        long = "memory-cache-max-items",
        default_value_t = DEFAULT_MEMORY_CACHE_MAX_ITEMS,
        env = "TILESMITH_MEMORY_CACHE_MAX_ITEMS"
    )]
    pub memory_max_items: usize,

    /// Directory for the file cache.
    #[arg(long = "file-cache-dir", default_value = DEFAULT_FILE_CACHE_DIR, env = "TILESMITH_FILE_CACHE_DIR")]
    pub file_dir: PathBuf,

    /// Bucket for the S3 cache.
    #[arg(long = "s3-cache-bucket", env = "TILESMITH_S3_CACHE_BUCKET")]
    pub s3_bucket: Option<String>,

    /// Bucket for the GCS cache.
    #[arg(long = "gcs-cache-bucket", env = "TILESMITH_GCS_CACHE_BUCKET")]
    pub gcs_bucket: Option<String>,

    /// Key prefix for object-storage caches.
    #[arg(long = "cache-prefix", env = "TILESMITH_CACHE_PREFIX")]
    pub prefix: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::None,
            ttl_secs: DEFAULT_CACHE_TTL_SECS,
            memory_max_items: DEFAULT_MEMORY_CACHE_MAX_ITEMS,
            file_dir: PathBuf::from(DEFAULT_FILE_CACHE_DIR),
            s3_bucket: None,
            gcs_bucket: None,
            prefix: None,
        }
    }
}

impl CacheConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        match self.backend {
            CacheBackend::Memory if self.memory_max_items == 0 => {
                return Err("memory-cache-max-items must be greater than 0".to_string());
            }
            CacheBackend::S3 if self.s3_bucket.as_deref().map_or(true, str::is_empty) => {
                return Err(
                    "S3 cache selected but no bucket given. Set --s3-cache-bucket or TILESMITH_S3_CACHE_BUCKET"
                        .to_string(),
                );
            }
            CacheBackend::Gcs if self.gcs_bucket.as_deref().map_or(true, str::is_empty) => {
                return Err(
                    "GCS cache selected but no bucket given. Set --gcs-cache-bucket or TILESMITH_GCS_CACHE_BUCKET"
                        .to_string(),
                );
            }
            _ => {}
        }

        if matches!(self.backend, CacheBackend::Memory | CacheBackend::File) && self.ttl_secs == 0 {
            return Err("cache-ttl must be greater than 0".to_string());
        }

        Ok(())
    }
}

// =============================================================================
// Object Storage
// =============================================================================

/// Object storage clients used by `s3://`, `gs://` and remote archives.
#[derive(Args, Debug, Clone)]
pub struct StorageConfig {
    /// AWS region for S3.
    #[arg(long, default_value = DEFAULT_REGION, env = "TILESMITH_S3_REGION")]
    pub s3_region: String,

    /// Custom S3 endpoint URL for S3-compatible services (MinIO, etc.).
    #[arg(long, env = "TILESMITH_S3_ENDPOINT")]
    pub s3_endpoint: Option<String>,

    /// Use path-style S3 addressing.
    #[arg(long, default_value_t = false, env = "TILESMITH_S3_FORCE_PATH_STYLE")]
    pub s3_force_path_style: bool,

    /// Endpoint of the GCS S3-compatible API.
    #[arg(long, default_value = DEFAULT_GCS_ENDPOINT, env = "TILESMITH_GCS_ENDPOINT")]
    pub gcs_endpoint: String,

    /// JSON file holding a GCS HMAC key (`access_key_id`, `secret_access_key`).
    ///
    /// When unset, `gs://` access uses the default credential chain.
    #[arg(long, env = "TILESMITH_GCS_HMAC_KEY_FILENAME")]
    pub gcs_hmac_key_filename: Option<PathBuf>,

    /// Connect timeout for HTTP, S3 and GCS in milliseconds.
    #[arg(long, default_value_t = DEFAULT_CONNECT_TIMEOUT_MS, env = "TILESMITH_CONNECT_TIMEOUT_MS")]
    pub connect_timeout_ms: u64,

    /// Timeout for one HTTP, S3 or GCS request in milliseconds, body included.
    #[arg(long, default_value_t = DEFAULT_REQUEST_TIMEOUT_MS, env = "TILESMITH_REQUEST_TIMEOUT_MS")]
    pub request_timeout_ms: u64,

    /// Block size in bytes for remote archive range reads.
    #[arg(long, default_value_t = DEFAULT_BLOCK_SIZE, env = "TILESMITH_ARCHIVE_BLOCK_SIZE")]
    pub archive_block_size: usize,

    /// Blocks cached per remote archive.
    #[arg(long, default_value_t = DEFAULT_BLOCK_CAPACITY, env = "TILESMITH_ARCHIVE_BLOCKS")]
    pub archive_blocks: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            s3_region: DEFAULT_REGION.to_string(),
            s3_endpoint: None,
            s3_force_path_style: false,
            gcs_endpoint: DEFAULT_GCS_ENDPOINT.to_string(),
            gcs_hmac_key_filename: None,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            archive_block_size: DEFAULT_BLOCK_SIZE,
            archive_blocks: DEFAULT_BLOCK_CAPACITY,
        }
    }
}

impl StorageConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.archive_block_size < 1024 || self.archive_block_size > 16 * 1024 * 1024 {
            return Err("archive-block-size must be between 1KB and 16MB".to_string());
        }
        if self.archive_blocks == 0 {
            return Err("archive-blocks must be greater than 0".to_string());
        }
        if self.connect_timeout_ms == 0 || self.request_timeout_ms == 0 {
            return Err("connect-timeout-ms and request-timeout-ms must be greater than 0".to_string());
        }
        Ok(())
    }

    pub fn timeouts(&self) -> NetworkTimeouts {
        NetworkTimeouts {
            connect: Duration::from_millis(self.connect_timeout_ms),
            request: Duration::from_millis(self.request_timeout_ms),
        }
    }
}

// =============================================================================
// Render Pools
// =============================================================================

/// Renderer pool bounds and timeouts.
#[derive(Args, Debug, Clone)]
pub struct PoolConfig {
    /// Maximum renderer instances per style pool.
    #[arg(long, default_value_t = DEFAULT_POOL_MAX_INSTANCES, env = "TILESMITH_POOL_MAX_INSTANCES")]
    pub pool_max_instances: usize,

    /// Maximum number of style pools kept before the least recently used is destroyed.
    #[arg(long, default_value_t = DEFAULT_POOL_MAX_STYLES, env = "TILESMITH_POOL_MAX_STYLES")]
    pub pool_max_styles: usize,

    /// How long a request waits for a free renderer instance.
    #[arg(long, default_value_t = DEFAULT_ACQUIRE_TIMEOUT_MS, env = "TILESMITH_POOL_ACQUIRE_TIMEOUT_MS")]
    pub pool_acquire_timeout_ms: u64,

    /// Upper bound on one render call; the instance is discarded on expiry.
    #[arg(long, default_value_t = DEFAULT_RENDER_TIMEOUT_MS, env = "TILESMITH_RENDER_TIMEOUT_MS")]
    pub render_timeout_ms: u64,

    /// Number of parsed styles memoized by URI.
    #[arg(long, default_value_t = DEFAULT_STYLE_MEMO_CAPACITY, env = "TILESMITH_STYLE_MEMO_CAPACITY")]
    pub style_memo_capacity: usize,

    /// Style fingerprint algorithm used to key pools.
    #[arg(long, value_enum, default_value_t = FingerprintAlgorithm::Sha256, env = "TILESMITH_FINGERPRINT")]
    pub fingerprint: FingerprintAlgorithm,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_max_instances: DEFAULT_POOL_MAX_INSTANCES,
            pool_max_styles: DEFAULT_POOL_MAX_STYLES,
            pool_acquire_timeout_ms: DEFAULT_ACQUIRE_TIMEOUT_MS,
            render_timeout_ms: DEFAULT_RENDER_TIMEOUT_MS,
            style_memo_capacity: DEFAULT_STYLE_MEMO_CAPACITY,
            fingerprint: FingerprintAlgorithm::Sha256,
        }
    }
}

impl PoolConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.pool_max_instances == 0 {
            return Err("pool-max-instances must be greater than 0".to_string());
        }
        if self.pool_max_styles == 0 {
            return Err("pool-max-styles must be greater than 0".to_string());
        }
        if self.style_memo_capacity == 0 {
            return Err("style-memo-capacity must be greater than 0".to_string());
        }
        if self.pool_acquire_timeout_ms == 0 || self.render_timeout_ms == 0 {
            return Err("pool timeouts must be greater than 0".to_string());
        }
        Ok(())
    }
}

// =============================================================================
// Combined Service Configuration
// =============================================================================

/// Everything needed to construct the resolver and render service.
#[derive(Args, Debug, Clone, Default)]
pub struct ServiceConfig {
    #[command(flatten)]
    pub cache: CacheConfig,

    #[command(flatten)]
    pub storage: StorageConfig,

    #[command(flatten)]
    pub pool: PoolConfig,
}

impl ServiceConfig {
    /// Validate every section, returning the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        self.cache.validate()?;
        self.storage.validate()?;
        self.pool.validate()
    }
}

// =============================================================================
// CLI Arguments
// =============================================================================

/// tilesmith - tile source resolution and render coordination.
///
/// The binary exposes the resolver and fingerprinting for operators; the
/// render pipeline is used as a library with a concrete rendering engine.
#[derive(Parser, Debug, Clone)]
#[command(name = "tilesmith")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Resolve a source URI and write its bytes to stdout or a file.
    Fetch(FetchArgs),

    /// Print the fingerprint of a style document.
    Fingerprint(FingerprintArgs),
}

#[derive(Args, Debug, Clone)]
pub struct FetchArgs {
    /// URI to resolve (http(s), file, s3, gs, mbtiles, pmtiles).
    pub uri: String,

    /// Write to this file instead of stdout.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    #[command(flatten)]
    pub config: ServiceConfig,
}

#[derive(Args, Debug, Clone)]
pub struct FingerprintArgs {
    /// URI of the style document.
    pub style: String,

    #[command(flatten)]
    pub config: ServiceConfig,
}

// =============================================================================
// Tests
// =============================================================================
