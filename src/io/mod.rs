mod block_cache;
mod file_reader;
mod http_reader;
mod range_reader;
mod s3_reader;

pub use block_cache::{BlockCache, DEFAULT_BLOCK_CAPACITY, DEFAULT_BLOCK_SIZE};
pub use file_reader::LocalFileReader;
pub use http_reader::{HttpRangeReader, NetworkTimeouts};
pub use range_reader::{read_i32_le, read_u64_le, RangeReader};
pub use s3_reader::{
    create_gcs_client, create_s3_client, get_object, put_object, S3RangeReader,
    DEFAULT_GCS_ENDPOINT,
};
