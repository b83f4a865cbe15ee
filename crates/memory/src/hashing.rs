use sha2::{Digest, Sha256};

/// Length of the truncated hex digests used for ids and cache keys.
pub const SHORT_HASH_LEN: usize = 16;

pub fn sha256_hex(data: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// First [`SHORT_HASH_LEN`] hex chars of the SHA-256 digest.
pub fn short_hash(data: &str) -> String {
    let mut hex = sha256_hex(data);
    hex.truncate(SHORT_HASH_LEN);
    hex
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_hex() {
        let hash = sha256_hex("hello");
        assert_eq!(hash.len(), 64);
        assert_eq!(
            hash,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn short_hash_is_prefix() {
        assert_eq!(short_hash("hello"), "2cf24dba5fb0a30e");
    }
}
