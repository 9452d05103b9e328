//! SHA-256 digests for chunks and reassembled files.
//!
//! Digests are advisory: they are logged and shown to callers, but a
//! transfer completes on volume (every index present), not on hash match.

use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of `data`.
pub fn digest_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Leading 16 hex chars, enough to tell digests apart in logs.
pub fn short(digest: &str) -> &str {
    digest.get(..16).unwrap_or(digest)
}

/// Incremental digest fed while streaming a file through.
#[derive(Default)]
pub struct StreamingDigest {
    inner: Sha256,
}

impl StreamingDigest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    pub fn finish(self) -> String {
        hex::encode(self.inner.finalize())
    }
}
