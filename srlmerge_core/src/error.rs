use thiserror::Error;

/// Every failure the merger can surface from `append` or `finish`.
///
/// Header-classification errors are raised before any output mutation.
/// Structural errors raised mid-merge roll the output buffer back to its
/// pre-append length, so the merger stays usable for further inputs.
#[derive(Debug, Error)]
pub enum MergeError {
    #[error("protocol version {0} not supported")]
    UnsupportedVersion(u8),

    #[error("document type {0} not supported")]
    UnsupportedDocType(u8),

    #[error("{encoding} compression not valid for protocol version {version}")]
    CompressionVersionMismatch {
        encoding: &'static str,
        version: u8,
    },

    #[error("invalid magic bytes, not a Sereal document")]
    InvalidMagic,

    #[error("invalid magic bytes, document appears UTF-8 mangled (transferred in text mode?)")]
    MangledMagic,

    #[error("truncated document")]
    TruncatedDocument,

    #[error("malformed varint")]
    BadVarint,

    #[error("bad string length {0}")]
    BadStringLength(u64),

    #[error("bad array or hash length {0}")]
    BadArrayOrHashLength(u64),

    #[error("tag 0x{tag:02x} refers to invalid offset {offset}")]
    BadBackReference { tag: u8, offset: u64 },

    #[error("unknown tag 0x{tag:02x} at offset {offset}")]
    UnknownTag { tag: u8, offset: usize },

    #[error("unexpected start of new document inside a body")]
    UnexpectedPacketStart,

    #[error("invalid top-level element (only array and arrayref are supported)")]
    InvalidTopLevel,

    #[error("merged document already finished")]
    FinishedDocument,

    #[error("merge pass outgrew its buffer reservation")]
    BufferReservationViolated,

    #[error("{0} decompression failed: {1}")]
    Decompress(&'static str, anyhow::Error),
}
