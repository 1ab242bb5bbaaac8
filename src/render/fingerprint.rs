//! Style fingerprints.
//!
//! A fingerprint identifies a style document by content, so structurally
//! equal documents share one renderer pool however they were obtained
//! (inline body or URI) and whatever their key order.
//!
//! Both algorithms hash the canonical serialization: object keys sorted,
//! no insignificant whitespace. Both are fixed algorithms, so a fingerprint
//! printed by one build matches the one computed by any other.

use std::fmt;

use clap::ValueEnum;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// How fingerprints are computed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, ValueEnum)]
pub enum FingerprintAlgorithm {
    /// SHA-256, collision resistant
    #[default]
    Sha256,
    /// First 64 bits of BLAKE3, cheaper but only collision-unlikely
    Structural,
}

/// Content identifier of a style document.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StyleFingerprint(String);

impl StyleFingerprint {
    pub fn compute(style: &Value, algorithm: FingerprintAlgorithm) -> Self {
        let canonical = canonical_json(style);
        match algorithm {
            FingerprintAlgorithm::Sha256 => {
                let digest = Sha256::digest(canonical.as_bytes());
                Self(format!("sha256:{}", hex::encode(digest)))
            }
            FingerprintAlgorithm::Structural => {
                let digest = blake3::hash(canonical.as_bytes());
                Self(format!("structural:{}", hex::encode(&digest.as_bytes()[..8])))
            }
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StyleFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Serialize `value` with object keys in sorted order.
///
/// Keys are sorted here rather than relying on `serde_json::Map`, whose
/// iteration order depends on the `preserve_order` feature.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_unstable_by(|a, b| a.0.cmp(b.0));

            out.push('{');
            for (i, (key, value)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(value, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
