//! Deterministic asset bodies.

use bytes::Bytes;

/// Minimal xorshift64 PRNG, deterministic and reproducible.
pub struct Xorshift64(u64);

impl Xorshift64 {
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self(seed.max(1))
    }

    pub fn next_u64(&mut self) -> u64 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        self.0
    }

    pub fn fill(&mut self, buf: &mut [u8]) {
        for chunk in buf.chunks_mut(8) {
            let word = self.next_u64().to_le_bytes();
            chunk.copy_from_slice(&word[..chunk.len()]);
        }
    }
}

/// `len` pseudo-random bytes; identical for identical `len`.
#[must_use]
pub fn test_asset(len: usize) -> Bytes {
    let mut buf = vec![0u8; len];
    Xorshift64::new(0x5eed ^ len as u64).fill(&mut buf);
    Bytes::from(buf)
}
