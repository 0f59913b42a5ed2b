//! Shared-secret authentication for internal endpoints (scheduler tick,
//! processor run). These are called by machines, not users.

/// A shared secret compared in constant time.
#[derive(Clone)]
pub struct SharedSecret(Vec<u8>);

impl SharedSecret {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into().into_bytes())
    }

    /// Constant-time comparison against a presented value.
    ///
    /// An empty configured secret never matches.
    pub fn verify(&self, presented: &str) -> bool {
        let presented = presented.as_bytes();
        if self.0.is_empty() || presented.len() != self.0.len() {
            return false;
        }
        self.0
            .iter()
            .zip(presented)
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

impl core::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("SharedSecret(<redacted>)")
    }
}
