use std::io::Read;

use bytes::Bytes;
use flate2::read::{GzDecoder, ZlibDecoder};

/// Inflate a blob that may be gzip- or zlib-wrapped.
///
/// The wrapper is sniffed from the leading bytes, matching what zlib's
/// `unzip` accepts. Anything else (PNG raster tiles, raw protobuf) is
/// returned unchanged.
pub fn decompress_auto(data: Bytes) -> std::io::Result<Bytes> {
    if is_gzip(&data) {
        gunzip(&data)
    } else if is_zlib(&data) {
        let mut out = Vec::with_capacity(data.len() * 4);
        ZlibDecoder::new(&data[..]).read_to_end(&mut out)?;
        Ok(Bytes::from(out))
    } else {
        Ok(data)
    }
}

/// Inflate a gzip stream.
pub fn gunzip(data: &[u8]) -> std::io::Result<Bytes> {
    let mut out = Vec::with_capacity(data.len() * 4);
    GzDecoder::new(data).read_to_end(&mut out)?;
    Ok(Bytes::from(out))
}

fn is_gzip(data: &[u8]) -> bool {
    data.len() >= 2 && data[0] == 0x1f && data[1] == 0x8b
}

/// zlib header: CM=8 and a header checksum divisible by 31.
fn is_zlib(data: &[u8]) -> bool {
    data.len() >= 2
        && data[0] & 0x0f == 8
        && data[0] >> 4 <= 7
        && (u16::from(data[0]) << 8 | u16::from(data[1])) % 31 == 0
}
