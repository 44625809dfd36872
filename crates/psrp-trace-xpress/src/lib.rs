//! XPRESS block-framed stream decompression (§4.5).
//!
//! The compression algorithm itself is treated as an external collaborator:
//! this crate owns the block framing only, and calls out to a
//! [`Decompressor`] trait object for the actual decompress step. There is no
//! XPRESS/LZXPRESS crate in the Rust ecosystem this workspace can depend on,
//! so a production binary is expected to supply its own implementation (for
//! example, an FFI binding to a system DLL) and wire it in at the CLI layer;
//! [`MissingDecompressor`] is the default used until one is.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

#[derive(Debug, thiserror::Error)]
pub enum XpressError {
    #[error("XPRESS block header truncated: need at least 4 bytes, got {0}")]
    HeaderTruncated(usize),

    #[error("XPRESS block body truncated: expected {expected} bytes, got {got}")]
    BodyTruncated { expected: usize, got: usize },
}

/// A decompression backend for one XPRESS block.
///
/// Implementations must write exactly `expected_len` bytes on success, or
/// return a [`DecompressError`] describing why they couldn't.
pub trait Decompressor {
    /// Decompress `input` into a fresh buffer of `expected_len` bytes.
    fn decompress(&self, input: &[u8], expected_len: usize) -> Result<Vec<u8>, DecompressError>;
}

#[derive(Debug, thiserror::Error)]
pub enum DecompressError {
    #[error("no XPRESS decompressor backend is configured")]
    NoBackend,

    #[error("XPRESS decompression failed: {0}")]
    Failed(String),
}

/// Stand-in backend that always fails. This is the production default: the
/// XPRESS algorithm is out of scope for this workspace, so a real
/// implementation must be injected by whoever assembles the CLI binary for a
/// platform that has one available.
#[derive(Debug, Default, Clone, Copy)]
pub struct MissingDecompressor;

impl Decompressor for MissingDecompressor {
    fn decompress(&self, _input: &[u8], _expected_len: usize) -> Result<Vec<u8>, DecompressError> {
        Err(DecompressError::NoBackend)
    }
}

/// Decompresses an XPRESS-block-framed stream (§4.5's framing), delegating
/// each non-verbatim block to a [`Decompressor`].
///
/// One instance is created per stream and reused across all the blocks
/// within it, matching the spec's "decompressor instance is created once
/// and reused" requirement — the instance itself carries no per-block
/// state, so reuse here is really about amortizing backend setup cost in
/// whatever concrete `Decompressor` is plugged in.
pub struct XpressStreamDecompressor<D: Decompressor> {
    backend: D,
}

impl<D: Decompressor> XpressStreamDecompressor<D> {
    pub fn new(backend: D) -> Self {
        Self { backend }
    }

    /// Decompress the full stream. A block whose decompression primitive
    /// fails does not abort the stream: whatever the backend managed to
    /// produce (if anything) is appended, the error is logged, and framing
    /// continues with the next block.
    pub fn decompress(&self, mut data: &[u8]) -> Result<Vec<u8>, XpressError> {
        let mut out = Vec::new();
        while !data.is_empty() {
            if data.len() < 4 {
                return Err(XpressError::HeaderTruncated(data.len()));
            }
            let mut cursor = Cursor::new(data);
            let uncompressed_size = usize::from(cursor.read_u16::<LittleEndian>().unwrap()) + 1;
            let compressed_size = usize::from(cursor.read_u16::<LittleEndian>().unwrap()) + 1;

            let body_start = 4;
            let body_end = body_start + compressed_size;
            if data.len() < body_end {
                return Err(XpressError::BodyTruncated {
                    expected: compressed_size,
                    got: data.len() - body_start,
                });
            }
            let block = &data[body_start..body_end];

            if uncompressed_size == compressed_size {
                out.extend_from_slice(block);
            } else {
                match self.backend.decompress(block, uncompressed_size) {
                    Ok(decompressed) => out.extend_from_slice(&decompressed),
                    Err(err) => {
                        tracing::error!(%err, uncompressed_size, compressed_size, "XPRESS block decompression failed");
                    }
                }
            }

            data = &data[body_end..];
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Identity;
    impl Decompressor for Identity {
        fn decompress(&self, input: &[u8], expected_len: usize) -> Result<Vec<u8>, DecompressError> {
            assert_eq!(input.len(), expected_len, "identity backend used only for same-size test blocks");
            Ok(input.to_vec())
        }
    }

    struct AlwaysFails;
    impl Decompressor for AlwaysFails {
        fn decompress(&self, _input: &[u8], _expected_len: usize) -> Result<Vec<u8>, DecompressError> {
            Err(DecompressError::Failed("boom".to_string()))
        }
    }

    fn verbatim_block(payload: &[u8]) -> Vec<u8> {
        let mut block = Vec::new();
        let n = (payload.len() - 1) as u16;
        block.extend_from_slice(&n.to_le_bytes());
        block.extend_from_slice(&n.to_le_bytes());
        block.extend_from_slice(payload);
        block
    }

    #[test]
    fn verbatim_block_round_trips_unchanged() {
        let decompressor = XpressStreamDecompressor::new(MissingDecompressor);
        let framed = verbatim_block(b"ABCDE");
        let out = decompressor.decompress(&framed).unwrap();
        assert_eq!(out, b"ABCDE");
    }

    #[test]
    fn multiple_verbatim_blocks_concatenate() {
        let decompressor = XpressStreamDecompressor::new(MissingDecompressor);
        let mut framed = verbatim_block(b"AB");
        framed.extend_from_slice(&verbatim_block(b"CD"));
        let out = decompressor.decompress(&framed).unwrap();
        assert_eq!(out, b"ABCD");
    }

    #[test]
    fn compressed_block_invokes_backend() {
        let decompressor = XpressStreamDecompressor::new(Identity);
        let mut block = Vec::new();
        block.extend_from_slice(&4u16.to_le_bytes());
        block.extend_from_slice(&4u16.to_le_bytes());
        block.extend_from_slice(b"WXYZ");
        let out = decompressor.decompress(&block).unwrap();
        assert_eq!(out, b"WXYZ");
    }

    #[test]
    fn failed_block_is_skipped_without_aborting_the_stream() {
        let decompressor = XpressStreamDecompressor::new(AlwaysFails);
        let mut framed = verbatim_block(b"ok");
        // compressed != uncompressed so this block goes to the backend and fails
        framed.extend_from_slice(&5u16.to_le_bytes());
        framed.extend_from_slice(&3u16.to_le_bytes());
        framed.extend_from_slice(b"xyz");
        framed.extend_from_slice(&verbatim_block(b"tail"));

        let out = decompressor.decompress(&framed).unwrap();
        assert_eq!(out, b"oktail", "failed block contributes nothing but does not abort the stream");
    }

    #[test]
    fn truncated_header_is_rejected() {
        let decompressor = XpressStreamDecompressor::new(MissingDecompressor);
        let err = decompressor.decompress(&[0u8; 2]).unwrap_err();
        assert!(matches!(err, XpressError::HeaderTruncated(2)));
    }

    #[test]
    fn truncated_body_is_rejected() {
        let decompressor = XpressStreamDecompressor::new(MissingDecompressor);
        let mut framed = verbatim_block(b"ABCDE");
        framed.truncate(framed.len() - 1);
        let err = decompressor.decompress(&framed).unwrap_err();
        assert!(matches!(err, XpressError::BodyTruncated { .. }));
    }

    #[test]
    fn missing_decompressor_fails_non_verbatim_blocks() {
        let decompressor = XpressStreamDecompressor::new(MissingDecompressor);
        let mut block = Vec::new();
        block.extend_from_slice(&4u16.to_le_bytes());
        block.extend_from_slice(&3u16.to_le_bytes());
        block.extend_from_slice(b"xyz");
        let out = decompressor.decompress(&block).unwrap();
        assert!(out.is_empty(), "missing backend logs and contributes nothing");
    }
}
