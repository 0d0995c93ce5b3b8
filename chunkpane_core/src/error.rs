//! Crate-wide error taxonomy (see SPEC_FULL.md §7).

use thiserror::Error;

use crate::shape::ShapeError;

/// Errors from footer encode/decode and remote bootstrap.
#[derive(Error, Debug)]
pub enum FooterError {
    #[error("corrupt footer: expected length 17, got {0}")]
    CorruptFooter(u8),

    #[error("legacy 49-byte footer with embedded digest is not accepted; rebuild the tree")]
    LegacyFormat,

    #[error("footer buffer too short: need at least {need} bytes, got {got}")]
    BufferTooShort { need: usize, got: usize },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Errors from `MerkleTree` construction, persistence, and mutation.
#[derive(Error, Debug)]
pub enum TreeError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Shape(#[from] ShapeError),

    #[error(transparent)]
    Footer(#[from] FooterError),

    #[error("corrupt tree: {0}")]
    CorruptTree(String),

    #[error("node index {index} out of range (nodeCount={node_count})")]
    NodeOutOfRange { index: u64, node_count: u64 },

    #[error("tree file mtime did not advance past content file mtime after flush")]
    MtimeNotAdvanced,
}

/// Errors surfaced by a [`crate::transport::ChunkedTransport`].
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("transport returned {got} bytes, expected {expected}")]
    ShortRead { expected: u32, got: usize },

    #[error("non-success status from remote: {0}")]
    Status(u16),

    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("transport io error: {0}")]
    Io(String),

    #[error("transport cancelled")]
    Cancelled,
}

/// A single chunk's verification failed after retries.
#[derive(Error, Debug, Clone)]
#[error("verification failed for chunk {chunk}: expected {expected}, got {got}")]
pub struct VerificationError {
    pub chunk: u64,
    pub expected: String,
    pub got: String,
}

/// Errors from [`crate::pane::MerklePane::submit_chunk`] and friends.
#[derive(Error, Debug)]
pub enum ChunkSubmissionError {
    #[error("io error writing chunk {chunk}: {source}")]
    Io {
        chunk: u64,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Tree(#[from] TreeError),
}

/// The error returned by `MerklePainter::paint` / surfaced through a
/// `DownloadProgress`.
#[derive(Error, Debug)]
pub enum PaintError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("verification failed for {0} chunk(s), first: {first}", .0.len(), first = .0.first().map(|e| e.chunk).unwrap_or_default())]
    Verification(Vec<VerificationError>),

    #[error(transparent)]
    Submission(#[from] ChunkSubmissionError),

    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error("operation cancelled")]
    Cancelled,
}

/// Top-level error type, used where callers want one enum for the whole
/// crate (e.g. `MerklePane::close`).
#[derive(Error, Debug)]
pub enum PaneError {
    #[error(transparent)]
    Shape(#[from] ShapeError),

    #[error(transparent)]
    Footer(#[from] FooterError),

    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Submission(#[from] ChunkSubmissionError),

    #[error(transparent)]
    Paint(#[from] PaintError),
}
