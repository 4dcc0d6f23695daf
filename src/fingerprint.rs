// 🔏 Row Fingerprint - order-independent content hash
//
// NOTE: This is for CHANGE DETECTION, not IDENTITY!
// Identity = key column, Equality = fingerprint
//
// Values hash by their rendered text plus a null marker, so a column that
// type inference read as Number in one snapshot and Text in the next does
// not flag every row as changed.

use crate::table::{Table, Value};
use sha2::{Digest, Sha256};
use std::fmt;

/// SHA-256 over a row's (column, value) pairs sorted by column name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// Fingerprint a set of (column, value) pairs. Input order does not matter.
pub fn fingerprint_pairs(pairs: &[(&str, &Value)]) -> Fingerprint {
    let mut sorted: Vec<&(&str, &Value)> = pairs.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(b.0));

    let mut hasher = Sha256::new();
    for (column, value) in sorted {
        // Length prefixes keep ("ab","c") and ("a","bc") apart
        let rendered = value.to_string();
        hasher.update((column.len() as u64).to_le_bytes());
        hasher.update(column.as_bytes());
        hasher.update([u8::from(value.is_null())]);
        hasher.update((rendered.len() as u64).to_le_bytes());
        hasher.update(rendered.as_bytes());
    }
    let mut digest = [0u8; 32];
    digest.copy_from_slice(&hasher.finalize());
    Fingerprint(digest)
}

/// Fingerprint row `index` of a table
pub fn fingerprint_row(table: &Table, index: usize) -> Fingerprint {
    fingerprint_pairs(&table.row_pairs(index))
}
