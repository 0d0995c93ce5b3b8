//! The transport contract (SPEC_FULL.md §6) and a reference HTTP
//! implementation. The trait itself has no network dependency, so tests can
//! supply an in-memory fake (see `tests` submodule below and
//! `painter::tests`).

pub mod http;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::TransportError;

/// A byte-range-capable remote data source.
#[async_trait]
pub trait ChunkedTransport: Send + Sync {
    /// Fetch exactly `length` bytes starting at `offset`. Must return
    /// `TransportError::ShortRead` rather than silently truncating.
    async fn fetch_range(&self, offset: u64, length: u32) -> Result<Bytes, TransportError>;

    /// Fetch the entire remote object. Used as a fallback when the remote
    /// doesn't honor ranges, and for small reference-tree bootstraps.
    async fn fetch_all(&self) -> Result<Bytes, TransportError>;

    /// Total size of the remote object in bytes.
    async fn content_length(&self) -> Result<u64, TransportError>;

    /// Upper bound on concurrent requests this transport will sustain.
    fn max_concurrent_connections(&self) -> u32;

    /// Release any held resources (connection pools, etc).
    async fn close(&self);
}

/// An in-memory [`ChunkedTransport`] over a fixed byte buffer, used by tests
/// throughout this crate and a reasonable starting point for embedding this
/// crate against a non-HTTP source (e.g. a local mirror).
#[derive(Debug)]
pub struct MemoryTransport {
    data: Bytes,
    max_connections: u32,
}

impl MemoryTransport {
    #[must_use]
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            max_connections: 8,
        }
    }

    #[must_use]
    pub fn with_max_connections(mut self, n: u32) -> Self {
        self.max_connections = n;
        self
    }
}

#[async_trait]
impl ChunkedTransport for MemoryTransport {
    async fn fetch_range(&self, offset: u64, length: u32) -> Result<Bytes, TransportError> {
        let start = offset as usize;
        let end = start + length as usize;
        if end > self.data.len() {
            return Err(TransportError::ShortRead {
                expected: length,
                got: self.data.len().saturating_sub(start),
            });
        }
        Ok(self.data.slice(start..end))
    }

    async fn fetch_all(&self) -> Result<Bytes, TransportError> {
        Ok(self.data.clone())
    }

    async fn content_length(&self) -> Result<u64, TransportError> {
        Ok(self.data.len() as u64)
    }

    fn max_concurrent_connections(&self) -> u32 {
        self.max_connections
    }

    async fn close(&self) {}
}
