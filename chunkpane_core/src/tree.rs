//! Memory-mapped hash array + valid-chunk bitset + footer-framed tree file
//! (SPEC_FULL.md §4.3). One `MerkleTree` per artifact side (local, mutable;
//! reference, read-only — see `reference.rs`).
//!
//! File layout, in order: `nodeCount * 32` hash bytes, `ceil(capLeaf/8)`
//! bitset bytes (LSB-first), the 17-byte [`crate::footer::MerkleFooter`].

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use memmap2::{MmapMut, MmapOptions};
use parking_lot::RwLock;
use rayon::prelude::*;

use crate::error::TreeError;
use crate::footer::MerkleFooter;
use crate::hasher_pool::{self, HasherPool};
use crate::shape::MerkleShape;

const HASH_LEN: u64 = 32;

/// A hand-rolled LSB-first bitset over `cap_leaf` bits, matching the
/// on-disk layout in SPEC_FULL.md/§6. There's no crate precedent in the
/// reference corpus for a *committed wire-format* bitset, so this is
/// written directly against the byte layout, the same way the footer is.
#[derive(Debug, Clone)]
struct Bitset {
    bytes: Vec<u8>,
}

impl Bitset {
    fn zeroed(bits: u64) -> Self {
        Self {
            bytes: vec![0u8; Self::byte_len(bits)],
        }
    }

    fn byte_len(bits: u64) -> usize {
        ((bits + 7) / 8) as usize
    }

    fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    fn get(&self, bit: u64) -> bool {
        let byte = bit / 8;
        let offset = bit % 8;
        self.bytes
            .get(byte as usize)
            .is_some_and(|b| b & (1 << offset) != 0)
    }

    fn set(&mut self, bit: u64, value: bool) {
        let byte = (bit / 8) as usize;
        let offset = bit % 8;
        if value {
            self.bytes[byte] |= 1 << offset;
        } else {
            self.bytes[byte] &= !(1 << offset);
        }
    }

    fn set_all(&mut self, value: bool) {
        let fill = if value { 0xFF } else { 0x00 };
        self.bytes.fill(fill);
    }
}

struct TreeState {
    shape: MerkleShape,
    hashes: MmapMut,
    bitset: Bitset,
}

/// A memory-mapped, footer-framed Merkle tree: the hash array plus the
/// valid-chunk bitset for one artifact.
pub struct MerkleTree {
    state: RwLock<TreeState>,
    path: PathBuf,
    hasher_pool: HasherPool,
}

impl MerkleTree {
    /// Create a brand-new, all-invalid tree file for `shape` at `path`.
    /// Used to initialize a fresh local artifact before any chunk has been
    /// downloaded.
    ///
    /// # Errors
    /// Propagates I/O errors creating or sizing the file.
    pub fn create_empty(path: impl AsRef<Path>, shape: MerkleShape) -> Result<Self, TreeError> {
        let path = path.as_ref().to_path_buf();
        let hash_region_len = shape.node_count() * HASH_LEN;
        let bitset_len = Bitset::byte_len(shape.cap_leaf()) as u64;
        let total_len = hash_region_len + bitset_len + crate::footer::FOOTER_LEN as u64;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        file.set_len(total_len)?;

        let hashes = unsafe {
            MmapOptions::new()
                .offset(0)
                .len(hash_region_len as usize)
                .map_mut(&file)?
        };

        let tree = Self {
            state: RwLock::new(TreeState {
                shape,
                hashes,
                bitset: Bitset::zeroed(shape.cap_leaf()),
            }),
            path,
            hasher_pool: HasherPool::default(),
        };

        tree.write_bitset_and_footer()?;
        Ok(tree)
    }

    /// Open an existing tree file, mapping the hash region read/write and
    /// reading the bitset and footer.
    ///
    /// # Errors
    /// `TreeError::CorruptTree` if the file is shorter than its own footer
    /// claims, or the footer is malformed/legacy.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, TreeError> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;

        let file_len = file.metadata()?.len();
        if file_len < crate::footer::FOOTER_LEN as u64 {
            return Err(TreeError::CorruptTree(
                "file shorter than minimum footer size".into(),
            ));
        }

        let mut tail = vec![0u8; crate::footer::FOOTER_LEN];
        file.seek(SeekFrom::End(-(crate::footer::FOOTER_LEN as i64)))?;
        file.read_exact(&mut tail)?;
        let footer = MerkleFooter::decode_tail(&tail)?;

        let shape = MerkleShape::for_content(footer.total_size, footer.chunk_size)
            .map_err(|e| TreeError::CorruptTree(format!("footer implies invalid shape: {e}")))?;

        let hash_region_len = shape.node_count() * HASH_LEN;
        let bitset_len = Bitset::byte_len(shape.cap_leaf()) as u64;
        let expected_len = hash_region_len + bitset_len + crate::footer::FOOTER_LEN as u64;
        if file_len != expected_len {
            return Err(TreeError::CorruptTree(format!(
                "file length {file_len} does not match shape-derived length {expected_len}"
            )));
        }

        let mut bitset_bytes = vec![0u8; bitset_len as usize];
        file.seek(SeekFrom::Start(hash_region_len))?;
        file.read_exact(&mut bitset_bytes)?;

        let hashes = unsafe {
            MmapOptions::new()
                .offset(0)
                .len(hash_region_len as usize)
                .map_mut(&file)?
        };

        Ok(Self {
            state: RwLock::new(TreeState {
                shape,
                hashes,
                bitset: Bitset::from_bytes(bitset_bytes),
            }),
            path,
            hasher_pool: HasherPool::default(),
        })
    }

    /// Build a tree by hashing `content_path` in full, in parallel, then
    /// folding internal hashes bottom-up. Every real leaf's bit is set
    /// (this is how a [`crate::reference::ReferenceTree`] is constructed —
    /// the reference is, by definition, complete and authoritative).
    ///
    /// # Errors
    /// Propagates I/O errors reading `content_path` or writing `tree_path`.
    pub fn build(
        content_path: impl AsRef<Path>,
        tree_path: impl AsRef<Path>,
        shape: MerkleShape,
    ) -> Result<Self, TreeError> {
        let tree = Self::create_empty(&tree_path, shape)?;
        let content = std::fs::read(content_path)?;

        let leaf_hashes: Vec<(u64, [u8; 32])> = (0..shape.leaf_count())
            .into_par_iter()
            .map(|leaf| {
                let (lo, hi) = shape.chunk_range(leaf);
                let bytes = &content[lo as usize..hi as usize];
                (leaf, hasher_pool::hash_chunk(bytes))
            })
            .collect();

        {
            let mut state = tree.state.write();
            for (leaf, hash) in leaf_hashes {
                let idx = state.shape.leaf_node_index(leaf);
                state.hashes[(idx * HASH_LEN) as usize..((idx + 1) * HASH_LEN) as usize]
                    .copy_from_slice(&hash);
                state.bitset.set(leaf, true);
            }
        }

        tree.compute_all_internals();
        tree.flush()?;
        Ok(tree)
    }

    #[must_use]
    pub fn shape(&self) -> MerkleShape {
        self.state.read().shape
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the stored hash at `node_idx`. For an internal node, this is
    /// only authoritative immediately after [`Self::compute_all_internals`]
    /// — if any descendant leaf is invalid, the value is stale/zero.
    #[must_use]
    pub fn get_hash(&self, node_idx: u64) -> [u8; 32] {
        let state = self.state.read();
        let start = (node_idx * HASH_LEN) as usize;
        let mut out = [0u8; 32];
        out.copy_from_slice(&state.hashes[start..start + 32]);
        out
    }

    fn set_hash_locked(state: &mut TreeState, node_idx: u64, hash: [u8; 32]) {
        let start = (node_idx * HASH_LEN) as usize;
        state.hashes[start..start + 32].copy_from_slice(&hash);
    }

    /// Whether `chunk`'s bit is set (its content is claimed authoritative).
    #[must_use]
    pub fn is_valid(&self, chunk: u64) -> bool {
        self.state.read().bitset.get(chunk)
    }

    /// Hash `bytes` and store it at `chunk`'s leaf slot. Does **not** set
    /// the valid bit — callers (the painter, via the pane) set it only
    /// after comparing against the reference hash.
    pub fn hash_leaf(&self, chunk: u64, bytes: &[u8]) -> [u8; 32] {
        let hash = {
            let mut h = self.hasher_pool.acquire();
            h.hash_chunk(bytes)
        };
        let mut state = self.state.write();
        let idx = state.shape.leaf_node_index(chunk);
        Self::set_hash_locked(&mut state, idx, hash);
        hash
    }

    /// Store a precomputed leaf hash directly, without rehashing. Used by
    /// the painter once it has already hashed and verified the bytes
    /// itself (`submitChunkWithHash`).
    pub fn store_leaf_hash(&self, chunk: u64, hash: [u8; 32]) {
        let mut state = self.state.write();
        let idx = state.shape.leaf_node_index(chunk);
        Self::set_hash_locked(&mut state, idx, hash);
    }

    /// Mark `chunk`'s bit set. Does not touch the hash; callers must have
    /// already stored the correct leaf hash.
    pub fn mark_valid(&self, chunk: u64) {
        self.state.write().bitset.set(chunk, true);
    }

    /// Clear `chunk`'s bit, zero its leaf hash, and zero every ancestor
    /// hash on the path to the root — tightening Open Question (b): no
    /// code path may leave a stale ancestor hash reachable via `get_hash`.
    pub fn invalidate_leaf(&self, chunk: u64) {
        let mut state = self.state.write();
        state.bitset.set(chunk, false);
        let leaf_idx = state.shape.leaf_node_index(chunk);
        Self::set_hash_locked(&mut state, leaf_idx, [0u8; 32]);
        Self::clear_ancestors_locked(&mut state, chunk);
    }

    /// Zero every ancestor hash on `chunk`'s path to the root, leaving the
    /// leaf's own bit and hash untouched. Callers that just stored a new,
    /// correct leaf hash still need this: the old ancestor hashes were
    /// folded from the *previous* leaf value and are now stale until the
    /// next [`Self::compute_all_internals`] pass, so `get_hash` must not be
    /// allowed to return them as if still authoritative (§4.5's "on match:
    /// ... clear ancestor hashes" step).
    pub fn clear_ancestors_of(&self, chunk: u64) {
        let mut state = self.state.write();
        Self::clear_ancestors_locked(&mut state, chunk);
    }

    fn clear_ancestors_locked(state: &mut TreeState, chunk: u64) {
        let ancestors: Vec<u64> = state.shape.ancestors_of(chunk).collect();
        for ancestor in ancestors {
            Self::set_hash_locked(state, ancestor, [0u8; 32]);
        }
    }

    /// Recompute every internal hash bottom-up, `H(left || right)`.
    /// Idempotent; required before the root hash (node 0) is meaningful.
    pub fn compute_all_internals(&self) {
        let mut state = self.state.write();
        let internal_count = state.shape.internal_count();
        for idx in (0..internal_count).rev() {
            let left_start = ((2 * idx + 1) * HASH_LEN) as usize;
            let right_start = ((2 * idx + 2) * HASH_LEN) as usize;
            let mut left = [0u8; 32];
            let mut right = [0u8; 32];
            left.copy_from_slice(&state.hashes[left_start..left_start + 32]);
            right.copy_from_slice(&state.hashes[right_start..right_start + 32]);
            let combined = hasher_pool::hash_internal(&left, &right);
            Self::set_hash_locked(&mut state, idx, combined);
        }
    }

    /// msync the hash mmap, rewrite the bitset and footer via positional
    /// I/O, and ensure this file's mtime strictly exceeds `content_path`'s
    /// (SPEC_FULL.md §4.3, §7 step 5).
    ///
    /// # Errors
    /// Propagates I/O errors; `TreeError::MtimeNotAdvanced` if the mtime
    /// bump itself fails.
    pub fn flush(&self) -> Result<(), TreeError> {
        {
            let state = self.state.read();
            state.hashes.flush()?;
        }
        self.write_bitset_and_footer()?;
        Ok(())
    }

    /// Bump this tree file's mtime to strictly exceed `content_path`'s.
    ///
    /// # Errors
    /// `TreeError::MtimeNotAdvanced` if filesystem metadata can't be read
    /// or set.
    pub fn ensure_mtime_after(&self, content_path: &Path) -> Result<(), TreeError> {
        let content_mtime = std::fs::metadata(content_path)
            .and_then(|m| m.modified())
            .map_err(|_| TreeError::MtimeNotAdvanced)?;
        let tree_mtime = std::fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .map_err(|_| TreeError::MtimeNotAdvanced)?;

        if tree_mtime <= content_mtime {
            let bumped = content_mtime + std::time::Duration::from_millis(1);
            let bumped_ft = filetime::FileTime::from_system_time(bumped);
            filetime::set_file_mtime(&self.path, bumped_ft)
                .map_err(|_| TreeError::MtimeNotAdvanced)?;
        }
        Ok(())
    }

    fn write_bitset_and_footer(&self) -> Result<(), TreeError> {
        let state = self.state.read();
        let hash_region_len = state.shape.node_count() * HASH_LEN;
        let footer = MerkleFooter::new(state.shape.chunk_size(), state.shape.content_size());

        let mut file = OpenOptions::new().write(true).open(&self.path)?;
        file.seek(SeekFrom::Start(hash_region_len))?;
        file.write_all(&state.bitset.bytes)?;
        file.write_all(&footer.encode())?;
        file.sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn small_shape() -> MerkleShape {
        MerkleShape::for_content(4096, 1024).unwrap()
    }

    #[test]
    fn create_empty_roundtrips_through_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.mrkl");
        let shape = small_shape();
        {
            let tree = MerkleTree::create_empty(&path, shape).unwrap();
            assert!(!tree.is_valid(0));
        }
        let reopened = MerkleTree::open(&path).unwrap();
        assert_eq!(reopened.shape(), shape);
        assert!(!reopened.is_valid(0));
    }

    #[test]
    fn hash_leaf_then_mark_valid_roundtrips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.mrkl");
        let shape = small_shape();
        let tree = MerkleTree::create_empty(&path, shape).unwrap();

        let hash = tree.hash_leaf(0, b"hello");
        assert!(!tree.is_valid(0));
        tree.mark_valid(0);
        assert!(tree.is_valid(0));
        assert_eq!(tree.get_hash(shape.leaf_node_index(0)), hash);
    }

    #[test]
    fn invalidate_leaf_clears_bit_hash_and_ancestors() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.mrkl");
        let shape = small_shape();
        let tree = MerkleTree::create_empty(&path, shape).unwrap();

        for leaf in 0..shape.leaf_count() {
            tree.hash_leaf(leaf, format!("chunk-{leaf}").as_bytes());
            tree.mark_valid(leaf);
        }
        tree.compute_all_internals();
        let root_before = tree.get_hash(0);
        assert_ne!(root_before, [0u8; 32]);

        tree.invalidate_leaf(0);
        assert!(!tree.is_valid(0));
        assert_eq!(tree.get_hash(shape.leaf_node_index(0)), [0u8; 32]);
        for ancestor in shape.ancestors_of(0) {
            assert_eq!(tree.get_hash(ancestor), [0u8; 32]);
        }
    }

    #[test]
    fn compute_all_internals_is_idempotent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.mrkl");
        let shape = small_shape();
        let tree = MerkleTree::create_empty(&path, shape).unwrap();
        for leaf in 0..shape.leaf_count() {
            tree.hash_leaf(leaf, b"x");
            tree.mark_valid(leaf);
        }
        tree.compute_all_internals();
        let root_once = tree.get_hash(0);
        tree.compute_all_internals();
        assert_eq!(tree.get_hash(0), root_once);
    }

    #[test]
    fn build_hashes_whole_file_and_validates_every_real_leaf() {
        let dir = tempdir().unwrap();
        let content_path = dir.path().join("content.bin");
        let tree_path = dir.path().join("content.mref");
        let data: Vec<u8> = (0..4096u32).map(|i| (i % 256) as u8).collect();
        std::fs::write(&content_path, &data).unwrap();

        let shape = MerkleShape::for_content(data.len() as u64, 1024).unwrap();
        let tree = MerkleTree::build(&content_path, &tree_path, shape).unwrap();

        for leaf in 0..shape.leaf_count() {
            assert!(tree.is_valid(leaf));
            let (lo, hi) = shape.chunk_range(leaf);
            assert_eq!(
                tree.get_hash(shape.leaf_node_index(leaf)),
                hasher_pool::hash_chunk(&data[lo as usize..hi as usize])
            );
        }
        assert_ne!(tree.get_hash(0), [0u8; 32]);
    }

    #[test]
    fn flush_bumps_mtime_past_content_file() {
        let dir = tempdir().unwrap();
        let content_path = dir.path().join("content.bin");
        std::fs::write(&content_path, b"abc").unwrap();
        let tree_path = dir.path().join("content.mrkl");
        let shape = MerkleShape::for_content(3, 1024).unwrap();
        let tree = MerkleTree::create_empty(&tree_path, shape).unwrap();

        tree.flush().unwrap();
        tree.ensure_mtime_after(&content_path).unwrap();

        let content_mtime = std::fs::metadata(&content_path).unwrap().modified().unwrap();
        let tree_mtime = std::fs::metadata(&tree_path).unwrap().modified().unwrap();
        assert!(tree_mtime > content_mtime);
    }

    #[test]
    fn rejects_legacy_footer_on_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("legacy.mrkl");
        let mut buf = vec![0u8; 49];
        buf[48] = 49;
        std::fs::write(&path, &buf).unwrap();
        assert!(matches!(MerkleTree::open(&path), Err(TreeError::Footer(_))));
    }
}
