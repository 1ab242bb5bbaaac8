use thiserror::Error;

/// I/O errors that can occur when reading byte ranges from local or remote storage.
#[derive(Debug, Clone, Error)]
pub enum IoError {
    /// Error from S3 or S3-compatible storage (GCS interop included)
    #[error("S3 error: {0}")]
    S3(String),

    /// HTTP request completed with an unexpected status
    #[error("HTTP error: {0}")]
    Http(String),

    /// Requested range exceeds resource bounds
    #[error("Range out of bounds: requested {requested} bytes at offset {offset}, size is {size}")]
    RangeOutOfBounds {
        offset: u64,
        requested: u64,
        size: u64,
    },

    /// Network or connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Object not found
    #[error("Object not found: {0}")]
    NotFound(String),

    /// The remote object changed since it was opened (`If-Match` rejected)
    #[error("Object changed while reading: {0}")]
    PreconditionFailed(String),

    /// Local filesystem error
    #[error("Local I/O error: {0}")]
    Local(String),
}

/// Errors raised while constructing a cache backend.
///
/// Cache reads and writes never fail; only setup does.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    #[error("Failed to set up {backend} cache: {message}")]
    Setup {
        backend: &'static str,
        message: String,
    },
}

/// Errors from the source resolver.
///
/// Routine misses (404, missing key, no tile in archive) are not errors:
/// the resolver reports them as `Ok(None)`. Everything here is either a
/// misconfiguration or a broken resource.
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    /// URI scheme is not one the resolver understands
    #[error("Unsupported source scheme: {uri}")]
    UnsupportedScheme { uri: String },

    /// URI has a known scheme but a malformed body
    #[error("Invalid source URI {uri}: {reason}")]
    InvalidUri { uri: String, reason: String },

    /// A scheme's client or collaborator was not configured
    #[error("No {scheme} backend configured for {uri}")]
    NotConfigured { scheme: &'static str, uri: String },

    /// Reading a local file failed
    #[error("Failed to read {path}: {message}")]
    Local { path: String, message: String },

    /// A tile archive could not be opened or is corrupt
    #[error("Archive error in {path}: {message}")]
    Archive { path: String, message: String },

    /// Range-read failure underneath an archive
    #[error("I/O error: {0}")]
    Io(#[from] IoError),
}

/// Errors from reading a PMTiles v3 archive.
#[derive(Debug, Clone, Error)]
pub enum PmtilesError {
    #[error("Not a PMTiles archive (bad magic)")]
    InvalidMagic,

    #[error("Unsupported PMTiles version {0} (only v3 is supported)")]
    UnsupportedVersion(u8),

    #[error("Archive too small: need {required} bytes, have {actual}")]
    FileTooSmall { required: u64, actual: u64 },

    #[error("Unsupported {context} compression: {method}")]
    UnsupportedCompression {
        context: &'static str,
        method: &'static str,
    },

    #[error("Malformed directory: {0}")]
    MalformedDirectory(String),

    #[error("Directory nesting exceeds {0} levels")]
    DirectoryTooDeep(usize),

    #[error("Decompression failed: {0}")]
    Decompress(String),

    #[error(transparent)]
    Io(#[from] IoError),
}

/// Errors from viewport geometry calculations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeometryError {
    #[error("Invalid dimensions: {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("Invalid scale: {0} (must be at least 1)")]
    InvalidScale(u32),

    #[error("Invalid tile size: {0}")]
    InvalidTileSize(u32),

    #[error("Tile {z}/{x}/{y} is outside the zoom level's grid")]
    TileOutOfRange { z: u8, x: u32, y: u32 },

    #[error("Invalid bbox [{min_lon}, {min_lat}, {max_lon}, {max_lat}]")]
    InvalidBbox {
        min_lon: f64,
        min_lat: f64,
        max_lon: f64,
        max_lat: f64,
    },

    #[error("Invalid camera: {0}")]
    InvalidCamera(String),
}

/// Failure reported by the external rendering engine.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct EngineError(pub String);

/// Errors from renderer pools.
#[derive(Debug, Clone, Error)]
pub enum PoolError {
    /// The engine refused to construct an instance for this style
    #[error("Failed to load style into renderer: {0}")]
    StyleLoad(String),

    /// No instance became free before the acquire timeout
    #[error("Renderer pool exhausted after waiting {waited_ms}ms")]
    Exhausted { waited_ms: u64 },

    /// The pool was shut down
    #[error("Renderer pool closed")]
    Closed,
}

/// Errors surfaced by the render pipeline.
///
/// This is the only error type callers of [`crate::render::RenderService`] see.
#[derive(Debug, Clone, Error)]
pub enum RenderError {
    /// The style URI resolved to nothing
    #[error("Could not fetch style: {uri}")]
    StyleFetch { uri: String },

    /// The style bytes are not JSON
    #[error("Style is not valid JSON: {message}")]
    StyleParse { message: String },

    /// The style JSON failed validation
    #[error("Invalid style: {reason}")]
    StyleInvalid { reason: String },

    /// The resolver failed while fetching the style
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("Geometry error: {0}")]
    Geometry(#[from] GeometryError),

    /// The engine failed while rendering
    #[error("Renderer failed: {0}")]
    Renderer(String),

    /// The engine did not finish within the render timeout
    #[error("Render timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    /// The engine returned a buffer of the wrong size
    #[error("Renderer returned {actual} bytes, expected {expected}")]
    InvalidPixels { expected: usize, actual: usize },

    /// Encoding raw pixels failed
    #[error("Encode error: {0}")]
    Encode(String),
}

impl RenderError {
    /// Whether this failure concerns the style itself rather than rendering.
    ///
    /// HTTP layers map these to "could not fetch style" rather than
    /// "failed to render".
    pub fn is_style_error(&self) -> bool {
        matches!(
            self,
            RenderError::StyleFetch { .. }
                | RenderError::StyleParse { .. }
                | RenderError::StyleInvalid { .. }
                | RenderError::Source(_)
        )
    }
}
