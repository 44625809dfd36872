//! PSRP fragment wire format, defragmentation, and message-header parsing.
//!
//! This crate covers the two innermost layers of the reconstruction
//! pipeline: turning a stream of `(object_id, fragment_id, ...)` fragments
//! back into complete PSRP objects (§4.3), and decoding a complete object
//! into a typed [`PsrpMessage`] (§4.4).

pub mod clixml;
pub mod fragmentation;
pub mod message;

pub use clixml::{deserialize_and_unescape, deserialize_string};
pub use fragmentation::{CompletedPsrpObject, Defragmenter, Fragment};
pub use message::{MessageType, PsrpMessage};

#[derive(Debug, thiserror::Error)]
pub enum PsrpError {
    #[error("PSRP fragment header truncated: need at least 21 bytes, got {0}")]
    FragmentHeaderTruncated(usize),

    #[error("PSRP fragment payload truncated: expected {expected} bytes, got {got}")]
    FragmentPayloadTruncated { expected: usize, got: usize },

    #[error("PSRP message header truncated: need at least 40 bytes, got {0}")]
    MessageHeaderTruncated(usize),

    #[error("PSRP message body is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),
}

impl From<std::io::Error> for PsrpError {
    fn from(_: std::io::Error) -> Self {
        // Cursor reads over an in-memory byte slice only fail at
        // end-of-buffer; `Fragment::unpack`'s own length check reports that
        // case with more context, so this conversion exists only to let `?`
        // be used against `std::io::Cursor` reads.
        PsrpError::FragmentHeaderTruncated(0)
    }
}
