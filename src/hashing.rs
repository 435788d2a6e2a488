//! Hashing System - SHA-256 for rendered files and reproducibility keys
//!
//! Each rendered certificate carries the digest of its PNG and a job hash
//! naming exactly what produced it. The batch manifest seals itself, see
//! [`crate::pipeline::BulkReport::verify`].

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::layout::{DataRow, Layout};

/// Compute SHA-256 hash of bytes, return hex string
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Reproducibility key of one certificate.
///
/// Covers the template id, the typed layout with fields in draw order,
/// the data row with keys sorted, and the engine version. Each part is
/// length-prefixed. Field order is part of the key because later fields
/// draw over earlier ones; row key order is not.
pub fn job_hash(
    template_id: &str,
    layout: &Layout,
    row: &DataRow,
    engine_version: &str,
) -> Result<String, serde_json::Error> {
    let sorted_row: BTreeMap<&str, &str> = row.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
    let layout = serde_json::to_vec(layout)?;
    let row = serde_json::to_vec(&sorted_row)?;

    let mut hasher = Sha256::new();
    for part in [template_id.as_bytes(), layout.as_slice(), row.as_slice(), engine_version.as_bytes()] {
        hasher.update((part.len() as u64).to_be_bytes());
        hasher.update(part);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn layout(names: &[&str]) -> Layout {
        let spec = json!({"x": 0, "y": 0, "size": 12, "font": "f.ttf", "color": "#000", "align": "left"});
        let fields: serde_json::Map<_, _> = names.iter().map(|n| (n.to_string(), spec.clone())).collect();
        Layout::from_value(&json!({ "fields": fields })).unwrap()
    }

    fn row(pairs: &[(&str, &str)]) -> DataRow {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_known_digest() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_job_hash_ignores_row_key_order() {
        let layout = layout(&["name", "course"]);
        let a = row(&[("name", "Alice"), ("course", "Rust")]);
        let b = row(&[("course", "Rust"), ("name", "Alice")]);
        let h1 = job_hash("gold", &layout, &a, "1.0.0").unwrap();
        assert_eq!(h1, job_hash("gold", &layout, &b, "1.0.0").unwrap());
        assert_ne!(h1, job_hash("silver", &layout, &b, "1.0.0").unwrap());
        assert_ne!(h1, job_hash("gold", &layout, &b, "1.0.1").unwrap());
    }

    #[test]
    fn test_job_hash_tracks_draw_order() {
        let data = row(&[("name", "Alice"), ("course", "Rust")]);
        assert_ne!(
            job_hash("gold", &layout(&["name", "course"]), &data, "1.0.0").unwrap(),
            job_hash("gold", &layout(&["course", "name"]), &data, "1.0.0").unwrap()
        );
    }

    #[test]
    fn test_parts_do_not_run_together() {
        let layout = layout(&[]);
        let data = DataRow::new();
        assert_ne!(
            job_hash("ab", &layout, &data, "1.0").unwrap(),
            job_hash("a", &layout, &data, "b1.0").unwrap()
        );
    }
}
