/// Idempotency keys and run digests for emitted events
use sha2::{Digest, Sha256};

pub fn generate_idempotency_key(components: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for component in components {
        hasher.update(component.as_bytes());
        hasher.update(b"|");
    }
    let result = hasher.finalize();
    format!("{:x}", result)
}

/// Running SHA-256 over the keys of every event seen, in order.
/// Two runs over identical input must end with identical digests.
pub struct StreamDigest {
    hasher: Sha256,
    count: u64,
}

impl StreamDigest {
    pub fn new() -> Self {
        StreamDigest {
            hasher: Sha256::new(),
            count: 0,
        }
    }

    pub fn update(&mut self, key: &str) {
        self.hasher.update(key.as_bytes());
        self.hasher.update(b"\n");
        self.count += 1;
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn finalize(self) -> String {
        format!("{:x}", self.hasher.finalize())
    }
}

impl Default for StreamDigest {
    fn default() -> Self {
        Self::new()
    }
}
