//! The reference (authoritative) side of a pane: a fully-built, read-only
//! [`MerkleTree`] over the complete content, materialized once as a
//! sidecar `.mref` file (SPEC_FULL.md §4.4).

use std::path::{Path, PathBuf};

use crate::error::{FooterError, TreeError};
use crate::shape::MerkleShape;
use crate::transport::ChunkedTransport;
use crate::tree::MerkleTree;

/// Thin, read-oriented wrapper around a [`MerkleTree`] built from complete
/// local content. Used to verify downloaded chunks against.
pub struct ReferenceTree {
    tree: MerkleTree,
}

impl ReferenceTree {
    /// Build a reference tree from complete content already on disk,
    /// materializing it at `reference_path` (conventionally `<content>.mref`).
    ///
    /// # Errors
    /// Propagates I/O errors building or writing the tree.
    pub fn build(
        content_path: impl AsRef<Path>,
        reference_path: impl AsRef<Path>,
        chunk_size: u64,
    ) -> Result<Self, TreeError> {
        let content_size = std::fs::metadata(content_path.as_ref())?.len();
        let shape = MerkleShape::for_content(content_size, chunk_size)?;
        let tree = MerkleTree::build(content_path.as_ref(), reference_path.as_ref(), shape)?;
        Ok(Self { tree })
    }

    /// Reopen a previously materialized `.mref` file.
    ///
    /// # Errors
    /// Propagates I/O or corruption errors from [`MerkleTree::open`].
    pub fn open(reference_path: impl AsRef<Path>) -> Result<Self, TreeError> {
        let tree = MerkleTree::open(reference_path)?;
        Ok(Self { tree })
    }

    /// One-shot bootstrap against a remote source (§4.4): if
    /// `reference_path` isn't present yet, fetch the whole `.mref` in a
    /// single GET through `transport` — a reference tree is itself a small
    /// footer-framed file, no different in format from a local one, so
    /// there's no chunk-level range logic to reuse here — write it to
    /// `reference_path`, then open it exactly like a local tree. If it's
    /// already present (a prior materialize, or shipped alongside the
    /// content from the start), the transport is never touched.
    ///
    /// # Errors
    /// Propagates a wrapped transport failure, or I/O errors writing the
    /// fetched bytes / opening the result.
    pub async fn materialize(
        reference_path: impl AsRef<Path>,
        transport: &dyn ChunkedTransport,
    ) -> Result<Self, TreeError> {
        let reference_path = reference_path.as_ref();
        if !reference_path.exists() {
            let bytes = transport
                .fetch_all()
                .await
                .map_err(FooterError::Transport)?;
            std::fs::write(reference_path, &bytes)?;
        }
        Self::open(reference_path)
    }

    #[must_use]
    pub fn shape(&self) -> MerkleShape {
        self.tree.shape()
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        self.tree.path()
    }

    /// The expected leaf hash for `chunk`, to compare a downloaded chunk
    /// against.
    #[must_use]
    pub fn leaf_hash(&self, chunk: u64) -> [u8; 32] {
        self.tree.get_hash(self.shape().leaf_node_index(chunk))
    }

    /// The root digest of the complete content.
    #[must_use]
    pub fn root_hash(&self) -> [u8; 32] {
        self.tree.get_hash(0)
    }

    /// Derive the conventional sidecar path `<content_path>.mref`.
    #[must_use]
    pub fn sidecar_path(content_path: impl AsRef<Path>) -> PathBuf {
        let mut p = content_path.as_ref().as_os_str().to_owned();
        p.push(".mref");
        PathBuf::from(p)
    }
}
