//! Pooled SHA-256 digesters with scoped acquisition (`withDigest`,
//! SPEC_FULL.md §4.3/§5). Constructing a fresh `Sha256` is cheap, so the
//! pool never blocks a caller — it hands out a pooled instance if one is
//! free, otherwise just builds a new one, matching the parking_lot-backed
//! shared-state idiom used in `chunk_store::store`.

use parking_lot::Mutex;
use sha2::{Digest, Sha256};

/// Bounded pool of reusable [`Sha256`] hashers.
pub struct HasherPool {
    idle: Mutex<Vec<Sha256>>,
    capacity: usize,
}

impl HasherPool {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            idle: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
        }
    }

    /// Acquire a hasher for the duration of the returned guard. The hasher
    /// is reset before use and returned to the pool on drop (unless the
    /// pool is already at capacity, in which case it's simply dropped).
    pub fn acquire(&self) -> PooledHasher<'_> {
        let hasher = self.idle.lock().pop().unwrap_or_default();
        PooledHasher {
            pool: self,
            hasher: Some(hasher),
        }
    }

    fn release(&self, hasher: Sha256) {
        let mut idle = self.idle.lock();
        if idle.len() < self.capacity {
            idle.push(hasher);
        }
    }
}

impl Default for HasherPool {
    fn default() -> Self {
        Self::new(2 * num_cpus())
    }
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(4)
}

/// A borrowed hasher; guaranteed release on all exit paths via `Drop`.
pub struct PooledHasher<'a> {
    pool: &'a HasherPool,
    hasher: Option<Sha256>,
}

impl PooledHasher<'_> {
    /// Hash `bytes` per the crate's empty-chunk convention: a zero-length
    /// chunk hashes as the single byte `0x00` rather than `H("")`, to align
    /// with reference trees built by other implementations of this format.
    #[must_use]
    pub fn hash_chunk(&mut self, bytes: &[u8]) -> [u8; 32] {
        let hasher = self.hasher.as_mut().expect("hasher present until drop");
        hasher.update(if bytes.is_empty() { &[0u8] } else { bytes });
        hasher.finalize_reset().into()
    }

    /// Hash two concatenated 32-byte child hashes into a parent hash.
    #[must_use]
    pub fn hash_internal(&mut self, left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
        let hasher = self.hasher.as_mut().expect("hasher present until drop");
        hasher.update(left);
        hasher.update(right);
        hasher.finalize_reset().into()
    }
}

impl Drop for PooledHasher<'_> {
    fn drop(&mut self) {
        if let Some(hasher) = self.hasher.take() {
            self.pool.release(hasher);
        }
    }
}

/// Free functions for one-off hashing outside a pool (e.g. tests).
#[must_use]
pub fn hash_chunk(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(if bytes.is_empty() { &[0u8] } else { bytes });
    hasher.finalize().into()
}

#[must_use]
pub fn hash_internal(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_chunk_hashes_as_single_zero_byte() {
        assert_eq!(hash_chunk(&[]), hash_chunk(&[0u8]));
    }

    #[test]
    fn pool_reuses_released_hashers() {
        let pool = HasherPool::new(1);
        {
            let mut h = pool.acquire();
            let _ = h.hash_chunk(b"abc");
        }
        assert_eq!(pool.idle.lock().len(), 1);
        {
            let mut h = pool.acquire();
            let _ = h.hash_chunk(b"def");
        }
        assert_eq!(pool.idle.lock().len(), 1);
    }

    #[test]
    fn pooled_and_free_function_agree() {
        let pool = HasherPool::new(1);
        let mut h = pool.acquire();
        assert_eq!(h.hash_chunk(b"hello"), hash_chunk(b"hello"));
    }
}
