//! The active orchestrator: plans downloads, de-duplicates in-flight
//! fetches, verifies chunks, and commits via [`crate::pane::MerklePane`]
//! (SPEC_FULL.md §4.6, "the hard part").

pub mod plan;
pub mod progress;

mod chunk_fetch;
mod painter_impl;

pub use chunk_fetch::ChunkFetch;
pub use painter_impl::MerklePainter;
