use sha2::{Digest, Sha256};
use std::path::Path;

use crate::utils::{Result, ShareError};

pub struct HashUtils;

impl HashUtils {
    /// Hex SHA-256 digest of a byte slice: the canonical file identifier.
    /// Identical bytes always yield the identical hash.
    pub fn hash_data(data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        hex::encode(hasher.finalize())
    }

    pub fn hash_file(path: &Path) -> Result<String> {
        let content = std::fs::read(path)
            .map_err(|e| ShareError::Io(format!("Failed to read {}: {}", path.display(), e)))?;
        Ok(Self::hash_data(&content))
    }
}
