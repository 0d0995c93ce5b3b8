//! Fixed-width trailer for a Merkle tree file: `chunkSize:u64, totalSize:u64,
//! footerLength:u8`, little-endian, 17 bytes total. The last byte of the
//! file is always `footerLength`, so a 1-byte tail read is enough to learn
//! how many more bytes to fetch (see SPEC_FULL.md §4.2).

use crate::error::FooterError;
use crate::transport::ChunkedTransport;

/// Size in bytes of the current (non-legacy) footer format.
pub const FOOTER_LEN: usize = 17;

/// The legacy footer length (32-byte digest + the two u64 fields + the
/// length byte itself) that this crate refuses to silently accept — see
/// Open Question (a) in spec.md §9.
const LEGACY_FOOTER_LEN: u8 = 49;

/// How many trailing bytes to probe for a remote tail-fetch bootstrap.
const TAIL_PROBE_BYTES: u64 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MerkleFooter {
    pub chunk_size: u64,
    pub total_size: u64,
}

impl MerkleFooter {
    #[must_use]
    pub fn new(chunk_size: u64, total_size: u64) -> Self {
        Self {
            chunk_size,
            total_size,
        }
    }

    /// Encode to the on-disk 17-byte representation.
    #[must_use]
    pub fn encode(&self) -> [u8; FOOTER_LEN] {
        let mut buf = [0u8; FOOTER_LEN];
        buf[0..8].copy_from_slice(&self.chunk_size.to_le_bytes());
        buf[8..16].copy_from_slice(&self.total_size.to_le_bytes());
        buf[16] = FOOTER_LEN as u8;
        buf
    }

    /// Decode a footer from a buffer whose *last byte* is the footer length.
    /// `bytes` must contain at least the footer itself at its tail (callers
    /// performing a tail read typically hand over the whole tail probe).
    ///
    /// # Errors
    /// `FooterError::LegacyFormat` if the trailing length byte is the
    /// legacy 49-byte form; `FooterError::CorruptFooter` for any other
    /// mismatch; `FooterError::BufferTooShort` if `bytes` doesn't even hold
    /// a length byte plus the claimed length.
    pub fn decode_tail(bytes: &[u8]) -> Result<Self, FooterError> {
        let length_byte = *bytes
            .last()
            .ok_or(FooterError::BufferTooShort { need: 1, got: 0 })?;

        if length_byte == LEGACY_FOOTER_LEN {
            return Err(FooterError::LegacyFormat);
        }
        if length_byte as usize != FOOTER_LEN {
            return Err(FooterError::CorruptFooter(length_byte));
        }
        if bytes.len() < FOOTER_LEN {
            return Err(FooterError::BufferTooShort {
                need: FOOTER_LEN,
                got: bytes.len(),
            });
        }

        let footer_bytes = &bytes[bytes.len() - FOOTER_LEN..];
        let chunk_size = u64::from_le_bytes(footer_bytes[0..8].try_into().unwrap());
        let total_size = u64::from_le_bytes(footer_bytes[8..16].try_into().unwrap());

        Ok(Self {
            chunk_size,
            total_size,
        })
    }

    /// Bootstrap a footer from a remote artifact: learn the content length,
    /// ranged-GET the tail, fall back to a full GET if the transport
    /// doesn't give us exactly what we asked for.
    ///
    /// # Errors
    /// Propagates [`FooterError::Transport`] on transport failure, or a
    /// decode error if the remote tail isn't a valid footer.
    pub async fn fetch_remote(
        transport: &dyn ChunkedTransport,
    ) -> Result<Self, FooterError> {
        let size = transport.content_length().await?;
        let probe_len = TAIL_PROBE_BYTES.min(size);
        let offset = size.saturating_sub(probe_len);

        let tail = match transport
            .fetch_range(offset, probe_len as u32)
            .await
        {
            Ok(bytes) => bytes,
            Err(_) => transport.fetch_all().await?,
        };

        Self::decode_tail(&tail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_p4() {
        let footer = MerkleFooter::new(1024 * 1024, 123_456_789);
        let encoded = footer.encode();
        let decoded = MerkleFooter::decode_tail(&encoded).unwrap();
        assert_eq!(footer, decoded);
    }

    #[test]
    fn decode_tail_from_larger_buffer_reads_only_the_trailing_footer() {
        let footer = MerkleFooter::new(4096, 999);
        let mut buf = vec![0xAAu8; 64];
        buf.extend_from_slice(&footer.encode());
        let decoded = MerkleFooter::decode_tail(&buf).unwrap();
        assert_eq!(footer, decoded);
    }

    #[test]
    fn rejects_legacy_49_byte_footer() {
        let mut buf = vec![0u8; 49];
        buf[48] = 49;
        assert!(matches!(
            MerkleFooter::decode_tail(&buf),
            Err(FooterError::LegacyFormat)
        ));
    }

    #[test]
    fn rejects_garbage_length_byte() {
        let buf = vec![7u8; 10];
        assert!(matches!(
            MerkleFooter::decode_tail(&buf),
            Err(FooterError::CorruptFooter(7))
        ));
    }

    #[test]
    fn rejects_buffer_shorter_than_claimed_length() {
        let buf = vec![17u8; 5];
        assert!(matches!(
            MerkleFooter::decode_tail(&buf),
            Err(FooterError::BufferTooShort { need: 17, got: 5 })
        ));
    }

    #[quickcheck_macros::quickcheck]
    fn prop_p4_footer_roundtrip(chunk_size: u64, total_size: u64) -> bool {
        let footer = MerkleFooter::new(chunk_size, total_size);
        matches!(MerkleFooter::decode_tail(&footer.encode()), Ok(decoded) if decoded == footer)
    }
}
