//! Pure Merkle-tree geometry: given `(contentSize, chunkSize)`, derive leaf
//! count, internal count, node count, and the index arithmetic that maps
//! chunks to tree nodes and byte ranges. No I/O, no allocation on the hot
//! paths (see SPEC_FULL.md §4.1).

use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeError {
    #[error("chunk size must be a power of two, got {0}")]
    ChunkSizeNotPowerOfTwo(u64),

    #[error("chunk size must be nonzero")]
    ZeroChunkSize,
}

/// Immutable geometry of a Merkle tree over a content blob.
///
/// The tree is a complete binary tree over `cap_leaf` leaves (`cap_leaf` is
/// the next power of two at or above `leaf_count`). Leaves beyond
/// `leaf_count` are "virtual": structurally present, permanently invalid,
/// hashed as all-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MerkleShape {
    chunk_size: u64,
    content_size: u64,
    leaf_count: u64,
    cap_leaf: u64,
    internal_count: u64,
    node_count: u64,
}

impl MerkleShape {
    /// Derive the shape for a given content size and chunk size.
    ///
    /// # Errors
    /// Returns [`ShapeError`] if `chunk_size` is zero or not a power of two.
    pub fn for_content(content_size: u64, chunk_size: u64) -> Result<Self, ShapeError> {
        if chunk_size == 0 {
            return Err(ShapeError::ZeroChunkSize);
        }
        if !chunk_size.is_power_of_two() {
            return Err(ShapeError::ChunkSizeNotPowerOfTwo(chunk_size));
        }

        let leaf_count = if content_size == 0 {
            1
        } else {
            content_size.div_ceil(chunk_size)
        };
        let cap_leaf = leaf_count.next_power_of_two();
        let internal_count = cap_leaf - 1;
        let node_count = 2 * cap_leaf - 1;

        Ok(Self {
            chunk_size,
            content_size,
            leaf_count,
            cap_leaf,
            internal_count,
            node_count,
        })
    }

    #[must_use]
    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    #[must_use]
    pub fn content_size(&self) -> u64 {
        self.content_size
    }

    /// Number of leaves that actually carry content.
    #[must_use]
    pub fn leaf_count(&self) -> u64 {
        self.leaf_count
    }

    /// Leaves in the tree, including virtual padding leaves. Always a power
    /// of two and in `[leaf_count, 2*leaf_count]`.
    #[must_use]
    pub fn cap_leaf(&self) -> u64 {
        self.cap_leaf
    }

    /// Number of internal nodes (`cap_leaf - 1`); also the index of the
    /// first leaf slot, since the root occupies index 0.
    #[must_use]
    pub fn internal_count(&self) -> u64 {
        self.internal_count
    }

    /// Total node count in the flattened array representation
    /// (`2*cap_leaf - 1`).
    #[must_use]
    pub fn node_count(&self) -> u64 {
        self.node_count
    }

    /// The flat-array index of leaf `leaf`.
    #[must_use]
    pub fn leaf_node_index(&self, leaf: u64) -> u64 {
        self.internal_count + leaf
    }

    /// Whether `leaf` is beyond `leaf_count` (structurally present, never
    /// valid, zero-hashed).
    #[must_use]
    pub fn is_virtual(&self, leaf: u64) -> bool {
        leaf >= self.leaf_count
    }

    /// The chunk index that covers `byte_offset`.
    #[must_use]
    pub fn leaf_index(&self, byte_offset: u64) -> u64 {
        byte_offset / self.chunk_size
    }

    /// The half-open byte range `[lo, hi)` covered by `chunk`, clamped to
    /// `content_size`. Returns `(content_size, content_size)` for a chunk at
    /// or beyond `leaf_count`.
    #[must_use]
    pub fn chunk_range(&self, chunk: u64) -> (u64, u64) {
        if chunk >= self.leaf_count {
            return (self.content_size, self.content_size);
        }
        let lo = chunk * self.chunk_size;
        let hi = (lo + self.chunk_size).min(self.content_size);
        (lo, hi)
    }

    /// The inclusive-first chunk index and the exclusive-last chunk index
    /// covering byte range `[a, b)`. Returns `None` if the range is empty.
    #[must_use]
    pub fn chunks_covering(&self, a: u64, b: u64) -> Option<(u64, u64)> {
        if a >= b || a >= self.content_size {
            return None;
        }
        let b = b.min(self.content_size);
        let start_chunk = self.leaf_index(a);
        let end_chunk = self.leaf_index(b - 1) + 1;
        Some((start_chunk, end_chunk))
    }

    /// Walk from `leaf`'s node index up to (but not including) the root,
    /// yielding internal-node indices closest-first.
    #[must_use]
    pub fn ancestors_of(&self, leaf: u64) -> AncestorIter {
        AncestorIter {
            next: Some(self.leaf_node_index(leaf)),
        }
    }
}

/// Iterator over ancestor node indices, closest-to-leaf first, stopping
/// before the root (index 0 has no parent).
pub struct AncestorIter {
    next: Option<u64>,
}

impl Iterator for AncestorIter {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        let current = self.next?;
        if current == 0 {
            self.next = None;
            return None;
        }
        let parent = (current - 1) / 2;
        self.next = Some(parent);
        Some(parent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_power_of_two_chunk_size() {
        assert!(matches!(
            MerkleShape::for_content(100, 3),
            Err(ShapeError::ChunkSizeNotPowerOfTwo(3))
        ));
    }

    #[test]
    fn rejects_zero_chunk_size() {
        assert!(matches!(
            MerkleShape::for_content(100, 0),
            Err(ShapeError::ZeroChunkSize)
        ));
    }

    #[test]
    fn exact_power_of_two_leaves_needs_no_padding() {
        let shape = MerkleShape::for_content(4 * 1024, 1024).unwrap();
        assert_eq!(shape.leaf_count(), 4);
        assert_eq!(shape.cap_leaf(), 4);
        assert_eq!(shape.internal_count(), 3);
        assert_eq!(shape.node_count(), 7);
    }

    #[test]
    fn non_power_of_two_leaf_count_is_padded_up() {
        // 10 MiB / 1 MiB = 10 leaves -> capLeaf = 16
        let shape = MerkleShape::for_content(10 * 1024 * 1024, 1024 * 1024).unwrap();
        assert_eq!(shape.leaf_count(), 10);
        assert_eq!(shape.cap_leaf(), 16);
        assert_eq!(shape.internal_count(), 15);
        assert_eq!(shape.node_count(), 31);
    }

    #[test]
    fn virtual_leaves_are_flagged() {
        let shape = MerkleShape::for_content(10 * 1024 * 1024, 1024 * 1024).unwrap();
        assert!(!shape.is_virtual(9));
        assert!(shape.is_virtual(10));
        assert!(shape.is_virtual(15));
    }

    #[test]
    fn empty_content_still_has_one_leaf() {
        let shape = MerkleShape::for_content(0, 1024).unwrap();
        assert_eq!(shape.leaf_count(), 1);
        assert_eq!(shape.cap_leaf(), 1);
        assert_eq!(shape.node_count(), 1);
        assert_eq!(shape.chunk_range(0), (0, 0));
    }

    #[test]
    fn chunk_range_clamps_last_chunk() {
        let shape = MerkleShape::for_content(2500, 1024).unwrap();
        assert_eq!(shape.leaf_count(), 3);
        assert_eq!(shape.chunk_range(0), (0, 1024));
        assert_eq!(shape.chunk_range(1), (1024, 2048));
        assert_eq!(shape.chunk_range(2), (2048, 2500));
    }

    #[test]
    fn leaf_index_and_chunks_covering() {
        let shape = MerkleShape::for_content(4096, 1024).unwrap();
        assert_eq!(shape.leaf_index(0), 0);
        assert_eq!(shape.leaf_index(1023), 0);
        assert_eq!(shape.leaf_index(1024), 1);
        assert_eq!(shape.chunks_covering(100, 500), Some((0, 1)));
        assert_eq!(shape.chunks_covering(900, 1100), Some((0, 2)));
        assert_eq!(shape.chunks_covering(0, 4096), Some((0, 4)));
        assert_eq!(shape.chunks_covering(10, 10), None);
    }

    #[test]
    fn ancestors_walk_to_just_below_root() {
        let shape = MerkleShape::for_content(4096, 1024).unwrap();
        // leaf 0 -> node index internal_count + 0 = 3
        let path: Vec<u64> = shape.ancestors_of(0).collect();
        // parent(3) = 1, parent(1) = 0 (root, excluded)
        assert_eq!(path, vec![1, 0]);
    }

    #[test]
    fn ancestors_of_root_adjacent_leaf_is_empty_for_single_leaf_tree() {
        let shape = MerkleShape::for_content(100, 1024).unwrap();
        // single leaf tree: leaf node index == 0 == root
        let path: Vec<u64> = shape.ancestors_of(0).collect();
        assert!(path.is_empty());
    }

    #[quickcheck_macros::quickcheck]
    fn prop_p3_geometry(content_size: u64, power: u8) -> bool {
        let chunk_size = 1u64 << (power % 40); // keep it in sane range
        match MerkleShape::for_content(content_size, chunk_size) {
            Ok(shape) => {
                shape.leaf_count() <= shape.cap_leaf()
                    && shape.cap_leaf() <= 2 * shape.leaf_count().max(1)
                    && shape.node_count() == 2 * shape.cap_leaf() - 1
            }
            Err(_) => chunk_size == 0,
        }
    }
}
