use std::io;

use thiserror::Error;

/// Everything that can go wrong decoding or encoding a tagged value or
/// a frame around one.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("unknown value tag {0}")]
    UnknownTag(u8),
    #[error("payload truncated: expected {expected} bytes, got {got}")]
    Truncated { expected: u64, got: usize },
    #[error("payload for tag {tag} has invalid length {len}")]
    InvalidLength { tag: u8, len: u64 },
    #[error("text payload is not valid utf-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
    #[error("integer payload exceeds 64 bits")]
    IntTooWide,
    #[error("wire magic mismatch")]
    BadMagic,
    #[error(transparent)]
    Io(#[from] io::Error),
}
