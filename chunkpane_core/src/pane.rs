//! The persistent state holder for one artifact: content file + local
//! [`MerkleTree`] + [`ReferenceTree`], with commit semantics
//! (SPEC_FULL.md §4.5).

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{trace, warn};

use crate::error::{ChunkSubmissionError, PaneError};
use crate::hasher_pool;
use crate::reference::ReferenceTree;
use crate::shape::MerkleShape;
use crate::tree::MerkleTree;

/// Half-open byte boundary of a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkBoundary {
    pub start_incl: u64,
    pub end_excl: u64,
}

/// Owns the sparse content file, the local tree, and the reference tree for
/// one artifact. Shared across a painter via `Arc<MerklePane>`.
pub struct MerklePane {
    content: std::sync::Mutex<File>,
    content_path: PathBuf,
    tree: MerkleTree,
    reference: ReferenceTree,
}

impl MerklePane {
    /// Open or create the local artifact at `content_path`, deriving shape
    /// from `reference`. The content file and local tree file are created
    /// if absent.
    ///
    /// # Errors
    /// Propagates I/O errors opening/creating the content or tree files.
    pub fn open(
        content_path: impl AsRef<Path>,
        tree_path: impl AsRef<Path>,
        reference: ReferenceTree,
    ) -> Result<Self, PaneError> {
        let content_path = content_path.as_ref().to_path_buf();
        let shape = reference.shape();

        let content = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&content_path)
            .map_err(|e| PaneError::Tree(e.into()))?;
        content
            .set_len(shape.content_size())
            .map_err(|e| PaneError::Tree(e.into()))?;

        let tree = if tree_path.as_ref().exists() {
            MerkleTree::open(tree_path.as_ref())?
        } else {
            MerkleTree::create_empty(tree_path.as_ref(), shape)?
        };

        Ok(Self {
            content: std::sync::Mutex::new(content),
            content_path,
            tree,
            reference,
        })
    }

    #[must_use]
    pub fn shape(&self) -> MerkleShape {
        self.tree.shape()
    }

    #[must_use]
    pub fn content_path(&self) -> &Path {
        &self.content_path
    }

    #[must_use]
    pub fn tree_path(&self) -> &Path {
        self.tree.path()
    }

    /// Whether `chunk`'s bit is set in the local tree's bitset.
    #[must_use]
    pub fn is_chunk_intact(&self, chunk: u64) -> bool {
        self.tree.is_valid(chunk)
    }

    /// The byte boundary covered by `chunk`, clamped at `content_size`.
    #[must_use]
    pub fn get_chunk_boundary(&self, chunk: u64) -> ChunkBoundary {
        let (start_incl, end_excl) = self.shape().chunk_range(chunk);
        ChunkBoundary {
            start_incl,
            end_excl,
        }
    }

    /// Hash `bytes`, compare against the reference leaf hash, and on match
    /// commit: write bytes to the content file, store the leaf hash, set
    /// the intact bit, and clear ancestor hashes. Returns `false` without
    /// touching content or bitset on mismatch (when `verify` is true).
    ///
    /// # Errors
    /// `ChunkSubmissionError::Io` on a positional write failure.
    pub fn submit_chunk(
        &self,
        chunk: u64,
        bytes: &[u8],
        verify: bool,
    ) -> Result<bool, ChunkSubmissionError> {
        let hash = hasher_pool::hash_chunk(bytes);
        if verify {
            let expected = self.reference.leaf_hash(chunk);
            if hash != expected {
                return Ok(false);
            }
        }
        self.commit_chunk(chunk, bytes, hash)?;
        Ok(true)
    }

    /// Same as [`Self::submit_chunk`], but trusts `precomputed_hash` equals
    /// `H(bytes)` — used by the painter after it has already hashed and
    /// compared the bytes itself, to avoid rehashing.
    ///
    /// # Errors
    /// `ChunkSubmissionError::Io` on a positional write failure.
    pub fn submit_chunk_with_hash(
        &self,
        chunk: u64,
        bytes: &[u8],
        precomputed_hash: [u8; 32],
    ) -> Result<(), ChunkSubmissionError> {
        self.commit_chunk(chunk, bytes, precomputed_hash)
    }

    fn commit_chunk(
        &self,
        chunk: u64,
        bytes: &[u8],
        hash: [u8; 32],
    ) -> Result<(), ChunkSubmissionError> {
        let boundary = self.get_chunk_boundary(chunk);
        {
            let mut content = self.content.lock().expect("content mutex poisoned");
            content
                .seek(SeekFrom::Start(boundary.start_incl))
                .map_err(|source| ChunkSubmissionError::Io { chunk, source })?;
            content
                .write_all(bytes)
                .map_err(|source| ChunkSubmissionError::Io { chunk, source })?;
        }
        self.tree.store_leaf_hash(chunk, hash);
        self.tree.mark_valid(chunk);
        self.tree.clear_ancestors_of(chunk);
        trace!(chunk, "CHUNK_VFY_OK");
        Ok(())
    }

    /// Re-read `chunk`'s bytes from the content file, hash them, and
    /// compare against the reference. Sets or clears the intact bit to
    /// match reality.
    ///
    /// # Errors
    /// `ChunkSubmissionError::Io` if the region can't be read.
    pub fn verify_chunk(&self, chunk: u64) -> Result<bool, ChunkSubmissionError> {
        let boundary = self.get_chunk_boundary(chunk);
        let len = (boundary.end_excl - boundary.start_incl) as usize;
        let mut buf = vec![0u8; len];
        {
            let mut content = self.content.lock().expect("content mutex poisoned");
            content
                .seek(SeekFrom::Start(boundary.start_incl))
                .map_err(|source| ChunkSubmissionError::Io { chunk, source })?;
            content
                .read_exact(&mut buf)
                .map_err(|source| ChunkSubmissionError::Io { chunk, source })?;
        }
        let hash = hasher_pool::hash_chunk(&buf);
        let matches = hash == self.reference.leaf_hash(chunk);
        if matches {
            self.tree.store_leaf_hash(chunk, hash);
            self.tree.mark_valid(chunk);
            self.tree.clear_ancestors_of(chunk);
        } else {
            warn!(chunk, "CHUNK_VFY_FAIL");
            self.tree.invalidate_leaf(chunk);
        }
        Ok(matches)
    }

    /// Shutdown sequence step 3+4: recompute derivable internals, persist
    /// bitset/footer, flush content and tree, and bump the tree's mtime
    /// past the content file's. Steps 1/2 (stop accepting work, close
    /// transport) are the caller's (`MerklePainter::close`) responsibility.
    ///
    /// # Errors
    /// Propagates I/O errors flushing the tree or content file.
    pub fn close(&self) -> Result<(), PaneError> {
        self.tree.compute_all_internals();
        self.tree.flush()?;
        {
            let content = self.content.lock().expect("content mutex poisoned");
            content.sync_all().map_err(|e| PaneError::Tree(e.into()))?;
        }
        self.tree.ensure_mtime_after(&self.content_path)?;
        Ok(())
    }

    #[must_use]
    pub fn reference(&self) -> &ReferenceTree {
        &self.reference
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn build_reference(dir: &Path, data: &[u8], chunk_size: u64) -> ReferenceTree {
        let content_path = dir.join("remote.bin");
        std::fs::write(&content_path, data).unwrap();
        let reference_path = ReferenceTree::sidecar_path(&content_path);
        ReferenceTree::build(&content_path, &reference_path, chunk_size).unwrap()
    }

    #[test]
    fn submit_chunk_commits_on_match_and_rejects_on_mismatch() {
        let dir = tempdir().unwrap();
        let data = vec![9u8; 4096];
        let reference = build_reference(dir.path(), &data, 1024);

        let content_path = dir.path().join("local.bin");
        let tree_path = dir.path().join("local.mrkl");
        let pane = MerklePane::open(&content_path, &tree_path, reference).unwrap();

        let chunk0 = &data[0..1024];
        assert!(pane.submit_chunk(0, chunk0, true).unwrap());
        assert!(pane.is_chunk_intact(0));

        assert!(!pane.submit_chunk(1, b"wrong bytes here totally", true).unwrap());
        assert!(!pane.is_chunk_intact(1));
    }

    #[test]
    fn verify_chunk_detects_bit_rot() {
        let dir = tempdir().unwrap();
        let data = vec![5u8; 2048];
        let reference = build_reference(dir.path(), &data, 1024);

        let content_path = dir.path().join("local.bin");
        let tree_path = dir.path().join("local.mrkl");
        let pane = MerklePane::open(&content_path, &tree_path, reference).unwrap();

        pane.submit_chunk(0, &data[0..1024], true).unwrap();
        assert!(pane.verify_chunk(0).unwrap());

        {
            let mut content = pane.content.lock().unwrap();
            content.seek(SeekFrom::Start(0)).unwrap();
            content.write_all(&[0xFFu8; 8]).unwrap();
        }
        assert!(!pane.verify_chunk(0).unwrap());
        assert!(!pane.is_chunk_intact(0));
    }

    #[test]
    fn commit_after_internals_computed_clears_stale_ancestor_hashes() {
        let dir = tempdir().unwrap();
        let data = vec![2u8; 4096];
        let reference = build_reference(dir.path(), &data, 1024);

        let content_path = dir.path().join("local.bin");
        let tree_path = dir.path().join("local.mrkl");
        let pane = MerklePane::open(&content_path, &tree_path, reference).unwrap();

        for chunk in 0..4u64 {
            let lo = (chunk * 1024) as usize;
            assert!(pane.submit_chunk(chunk, &data[lo..lo + 1024], true).unwrap());
        }
        pane.tree.compute_all_internals();
        let root_before = pane.tree.get_hash(0);
        assert_ne!(root_before, [0u8; 32]);

        // Re-commit chunk 0 with the same (still-correct) bytes; the stale
        // ancestor hashes folded from before this commit must not survive.
        assert!(pane.submit_chunk(0, &data[0..1024], true).unwrap());
        let shape = pane.shape();
        for ancestor in shape.ancestors_of(0) {
            assert_eq!(pane.tree.get_hash(ancestor), [0u8; 32]);
        }
    }

    #[test]
    fn close_bumps_tree_mtime_past_content() {
        let dir = tempdir().unwrap();
        let data = vec![1u8; 1024];
        let reference = build_reference(dir.path(), &data, 1024);

        let content_path = dir.path().join("local.bin");
        let tree_path = dir.path().join("local.mrkl");
        let pane = MerklePane::open(&content_path, &tree_path, reference).unwrap();
        pane.submit_chunk(0, &data, true).unwrap();
        pane.close().unwrap();

        let content_mtime = std::fs::metadata(&content_path).unwrap().modified().unwrap();
        let tree_mtime = std::fs::metadata(&tree_path).unwrap().modified().unwrap();
        assert!(tree_mtime > content_mtime);
    }
}
