//! Input document reader: header parsing, body-encoding classification, and
//! decompression dispatch.

use std::borrow::Cow;

use srlmerge_codecs::{Decompressor, SnappyDecompressor, ZlibDecompressor};

use crate::error::MergeError;
use crate::format::{
    DOC_TYPE_RAW, DOC_TYPE_SNAPPY, DOC_TYPE_SNAPPY_INCREMENTAL, DOC_TYPE_ZLIB, HEADER_SIZE, MAGIC,
    MAGIC_HIGH_BIT, MAGIC_HIGH_BIT_UTF8, PROTOCOL_VERSION_MAX,
};
use crate::varint;

/// How a document body is stored on the wire, per the type nibble of the
/// version byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyEncoding {
    Raw,
    /// Legacy v1 form: the entire body is one snappy block with no framing.
    Snappy,
    /// The body is varint(compressed length) + snappy block.
    SnappyIncremental,
    /// The body is varint(raw length) + varint(compressed length) + stream.
    Zlib,
}

impl BodyEncoding {
    pub fn name(&self) -> &'static str {
        match self {
            BodyEncoding::Raw => "raw",
            BodyEncoding::Snappy => "snappy",
            BodyEncoding::SnappyIncremental => "snappy-incremental",
            BodyEncoding::Zlib => "zlib",
        }
    }
}

/// Decoded representation of a document's fixed header.
#[derive(Debug, Clone)]
pub struct DocHeader {
    pub version: u8,
    pub encoding: BodyEncoding,
    /// Index of the first body byte: past the magic, the version byte, and
    /// the varint-lengthed user header.
    pub body_start: usize,
}

/// Parse and validate the fixed header of `doc`.
///
/// The magic must agree with the version nibble (low magic for versions 1-2,
/// high-bit magic for 3 and up), and compressed encodings are gated on the
/// versions that introduced them.
pub fn read_header(doc: &[u8]) -> Result<DocHeader, MergeError> {
    if doc.len() < HEADER_SIZE + 1 {
        return Err(MergeError::TruncatedDocument);
    }

    let magic = &doc[..4];
    if magic == MAGIC_HIGH_BIT_UTF8 {
        return Err(MergeError::MangledMagic);
    }
    if magic != MAGIC && magic != MAGIC_HIGH_BIT {
        return Err(MergeError::InvalidMagic);
    }

    let version = doc[4] & 0x0f;
    let doc_type = doc[4] >> 4;

    if version == 0 || version > PROTOCOL_VERSION_MAX {
        return Err(MergeError::UnsupportedVersion(version));
    }
    // the magic changed with protocol 3; the two must agree
    let expected: &[u8] = if version < 3 { &MAGIC } else { &MAGIC_HIGH_BIT };
    if magic != expected {
        return Err(MergeError::InvalidMagic);
    }

    let encoding = match doc_type {
        DOC_TYPE_RAW => BodyEncoding::Raw,
        DOC_TYPE_SNAPPY => {
            if version != 1 {
                return Err(MergeError::CompressionVersionMismatch {
                    encoding: "snappy",
                    version,
                });
            }
            BodyEncoding::Snappy
        }
        DOC_TYPE_SNAPPY_INCREMENTAL => BodyEncoding::SnappyIncremental,
        DOC_TYPE_ZLIB => {
            if version < 3 {
                return Err(MergeError::CompressionVersionMismatch {
                    encoding: "zlib",
                    version,
                });
            }
            BodyEncoding::Zlib
        }
        other => return Err(MergeError::UnsupportedDocType(other)),
    };

    let (suffix_len, sz) = varint::decode(&doc[HEADER_SIZE..])?;
    let body_start = HEADER_SIZE + sz + suffix_len as usize;
    if body_start > doc.len() {
        return Err(MergeError::TruncatedDocument);
    }

    Ok(DocHeader {
        version,
        encoding,
        body_start,
    })
}

/// Strip the header of `doc` and return its raw body, decompressing when the
/// type nibble calls for it.
///
/// Raw bodies are borrowed; decompressed bodies are owned. Whole-body
/// decompression is deliberate: the track-table pass needs random access.
pub fn read_body(doc: &[u8]) -> Result<(DocHeader, Cow<'_, [u8]>), MergeError> {
    let header = read_header(doc)?;
    let body = &doc[header.body_start..];

    let body = match header.encoding {
        BodyEncoding::Raw => Cow::Borrowed(body),

        BodyEncoding::Snappy => Cow::Owned(inflate(&SnappyDecompressor, body, None)?),

        BodyEncoding::SnappyIncremental => {
            let (comp_len, sz) = varint::decode(body)?;
            let end = sz + comp_len as usize;
            if end > body.len() {
                return Err(MergeError::TruncatedDocument);
            }
            Cow::Owned(inflate(&SnappyDecompressor, &body[sz..end], None)?)
        }

        BodyEncoding::Zlib => {
            let (raw_len, sz1) = varint::decode(body)?;
            let (comp_len, sz2) = varint::decode(&body[sz1..])?;
            let start = sz1 + sz2;
            let end = start + comp_len as usize;
            if end > body.len() {
                return Err(MergeError::TruncatedDocument);
            }
            Cow::Owned(inflate(
                &ZlibDecompressor,
                &body[start..end],
                Some(raw_len as usize),
            )?)
        }
    };

    Ok((header, body))
}

fn inflate(
    codec: &dyn Decompressor,
    input: &[u8],
    size_hint: Option<usize>,
) -> Result<Vec<u8>, MergeError> {
    codec
        .decompress(input, size_hint)
        .map_err(|e| MergeError::Decompress(codec.name(), e))
}
