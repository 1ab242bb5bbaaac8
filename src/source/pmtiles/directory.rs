//! PMTiles directories and Hilbert tile ids.
//!
//! A directory is a list of entries sorted by tile id, serialized as four
//! varint columns after an entry count:
//!
//! ```text
//! count
//! tile_id deltas   (count varints)
//! run lengths      (count varints; 0 marks a leaf directory pointer)
//! lengths          (count varints)
//! offsets          (count varints; 0 = previous offset + previous length,
//!                   otherwise stored value - 1)
//! ```

use crate::error::PmtilesError;

/// One directory entry.
///
/// With `run_length > 0` the entry addresses tile data for tile ids
/// `tile_id .. tile_id + run_length`. With `run_length == 0` it points at a
/// leaf directory covering ids from `tile_id` on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry {
    pub tile_id: u64,
    pub offset: u64,
    pub length: u32,
    pub run_length: u32,
}

impl Entry {
    pub fn is_leaf_pointer(&self) -> bool {
        self.run_length == 0
    }
}

/// Convert a tile address into its position along the Hilbert curve,
/// counting every tile of every shallower zoom first.
pub fn zxy_to_tile_id(z: u8, x: u32, y: u32) -> u64 {
    // Tiles in zooms 0..z: (4^z - 1) / 3
    let base = ((1u64 << (2 * u32::from(z))) - 1) / 3;

    let n = 1u64 << z;
    let (mut x, mut y) = (u64::from(x), u64::from(y));
    let mut d = 0u64;
    let mut s = n >> 1;
    while s > 0 {
        let rx = u64::from((x & s) > 0);
        let ry = u64::from((y & s) > 0);
        d += s * s * ((3 * rx) ^ ry);

        // Rotate the quadrant so the curve stays continuous
        if ry == 0 {
            if rx == 1 {
                x = n - 1 - x;
                y = n - 1 - y;
            }
            std::mem::swap(&mut x, &mut y);
        }
        s >>= 1;
    }

    base + d
}

/// Find the entry that covers `tile_id`.
///
/// Returns a leaf pointer when the id falls into a leaf directory's range;
/// the caller then descends into that leaf.
pub fn find_tile(entries: &[Entry], tile_id: u64) -> Option<&Entry> {
    match entries.binary_search_by_key(&tile_id, |e| e.tile_id) {
        Ok(i) => Some(&entries[i]),
        Err(0) => None,
        Err(i) => {
            let entry = &entries[i - 1];
            if entry.is_leaf_pointer() || tile_id - entry.tile_id < u64::from(entry.run_length) {
                Some(entry)
            } else {
                None
            }
        }
    }
}

/// Decode an (already decompressed) directory.
pub fn parse_directory(data: &[u8]) -> Result<Vec<Entry>, PmtilesError> {
    let mut cursor = VarintCursor { data, pos: 0 };

    let count = cursor.next()? as usize;
    // Every entry needs at least four bytes
    if count > data.len() / 4 + 1 {
        return Err(PmtilesError::MalformedDirectory(format!(
            "{} entries cannot fit in {} bytes",
            count,
            data.len()
        )));
    }

    let mut entries = Vec::with_capacity(count);
    let mut last_id = 0u64;
    for _ in 0..count {
        last_id = last_id
            .checked_add(cursor.next()?)
            .ok_or_else(|| PmtilesError::MalformedDirectory("tile id overflow".to_string()))?;
        entries.push(Entry {
            tile_id: last_id,
            offset: 0,
            length: 0,
            run_length: 1,
        });
    }

    for entry in entries.iter_mut() {
        entry.run_length = narrow(cursor.next()?, "run length")?;
    }
    for entry in entries.iter_mut() {
        entry.length = narrow(cursor.next()?, "length")?;
    }
    for i in 0..count {
        let v = cursor.next()?;
        entries[i].offset = if v == 0 && i > 0 {
            entries[i - 1]
                .offset
                .checked_add(u64::from(entries[i - 1].length))
                .ok_or_else(|| PmtilesError::MalformedDirectory("offset overflow".to_string()))?
        } else if v == 0 {
            return Err(PmtilesError::MalformedDirectory(
                "first entry has no offset".to_string(),
            ));
        } else {
            v - 1
        };
    }

    Ok(entries)
}

/// Encode entries in directory form (uncompressed).
pub fn write_directory(entries: &[Entry]) -> Vec<u8> {
    let mut out = Vec::new();
    write_varint(&mut out, entries.len() as u64);

    let mut last_id = 0u64;
    for entry in entries {
        write_varint(&mut out, entry.tile_id - last_id);
        last_id = entry.tile_id;
    }
    for entry in entries {
        write_varint(&mut out, u64::from(entry.run_length));
    }
    for entry in entries {
        write_varint(&mut out, u64::from(entry.length));
    }
    for (i, entry) in entries.iter().enumerate() {
        let contiguous = i > 0
            && entries[i - 1].offset.checked_add(u64::from(entries[i - 1].length))
                == Some(entry.offset);
        if contiguous {
            write_varint(&mut out, 0);
        } else {
            write_varint(&mut out, entry.offset + 1);
        }
    }

    out
}

fn narrow(v: u64, what: &str) -> Result<u32, PmtilesError> {
    u32::try_from(v).map_err(|_| PmtilesError::MalformedDirectory(format!("{} {} overflows", what, v)))
}

fn write_varint(out: &mut Vec<u8>, mut v: u64) {
    while v >= 0x80 {
        out.push((v as u8) | 0x80);
        v >>= 7;
    }
    out.push(v as u8);
}

struct VarintCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl VarintCursor<'_> {
    fn next(&mut self) -> Result<u64, PmtilesError> {
        let mut value = 0u64;
        let mut shift = 0u32;
        loop {
            let byte = *self.data.get(self.pos).ok_or_else(|| {
                PmtilesError::MalformedDirectory("unexpected end of directory".to_string())
            })?;
            self.pos += 1;

            if shift >= 64 {
                return Err(PmtilesError::MalformedDirectory("varint too long".to_string()));
            }
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
        }
    }
}
