use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::BuildError;

/// SHA-256 of the canonical JSON encoding of `value`.
///
/// Callers must only pass values whose JSON form is ordered (structs,
/// `Vec`, `BTreeMap`), never `HashMap`.
pub fn content_hash<T: Serialize>(value: &T) -> Result<String, BuildError> {
    let bytes = serde_json::to_vec(value)?;
    let digest = Sha256::digest(&bytes);
    Ok(hex::encode(digest))
}
