use sha2::{Digest, Sha256};

/// Hex SHA-256 of an archive's bytes, recorded on its audit entry.
pub fn content_hash(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    let digest = hasher.finalize();
    hex::encode(digest)
}
