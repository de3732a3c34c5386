//! Sereal wire-format constants and shared shape helpers.

use std::ops::Range;

use crate::error::MergeError;
use crate::varint;

/// Magic bytes for protocol versions 1 and 2: "=srl".
pub const MAGIC: [u8; 4] = [0x3d, 0x73, 0x72, 0x6c];

/// Magic bytes for protocol version 3 and up: "=\xF3rl".
pub const MAGIC_HIGH_BIT: [u8; 4] = [0x3d, 0xf3, 0x72, 0x6c];

/// First four bytes of a high-bit magic that went through a UTF-8 transcode
/// ("=\xC3\xB3rl"). Detected only to produce a useful diagnostic.
pub const MAGIC_HIGH_BIT_UTF8: [u8; 4] = [0x3d, 0xc3, 0xb3, 0x72];

/// Highest protocol version this implementation can emit and accept.
pub const PROTOCOL_VERSION_MAX: u8 = 4;

/// Fixed part of a document header: 4 magic bytes + 1 version/type byte.
/// The varint-lengthed user header follows.
pub const HEADER_SIZE: usize = 5;

/// PAD bytes reserved for the top-level element-count varint.
pub const RESERVED_LENGTH_BYTES: usize = 8;

// ── Document type nibble (high half of the version byte) ───────────────────

pub const DOC_TYPE_RAW: u8 = 0;
pub const DOC_TYPE_SNAPPY: u8 = 1;
pub const DOC_TYPE_SNAPPY_INCREMENTAL: u8 = 2;
pub const DOC_TYPE_ZLIB: u8 = 3;

// ── Tag bytes ──────────────────────────────────────────────────────────────

/// High bit of a tag byte: the position may be the target of an alias or
/// back-reference.
pub const TRACK_FLAG: u8 = 0x80;

/// Mask selecting the base tag with the track flag cleared.
pub const TYPE_MASK: u8 = 0x7f;

// 0x00..=0x0f are POS_0..POS_15, 0x10..=0x1f are NEG_16..NEG_1; both ranges
// are recognized as "tag < TAG_VARINT".
pub const TAG_VARINT: u8 = 0x20;
pub const TAG_ZIGZAG: u8 = 0x21;
pub const TAG_FLOAT: u8 = 0x22;
pub const TAG_DOUBLE: u8 = 0x23;
pub const TAG_LONG_DOUBLE: u8 = 0x24;
pub const TAG_UNDEF: u8 = 0x25;
pub const TAG_BINARY: u8 = 0x26;
pub const TAG_STR_UTF8: u8 = 0x27;
pub const TAG_REFN: u8 = 0x28;
pub const TAG_REFP: u8 = 0x29;
pub const TAG_HASH: u8 = 0x2a;
pub const TAG_ARRAY: u8 = 0x2b;
pub const TAG_OBJECT: u8 = 0x2c;
pub const TAG_OBJECTV: u8 = 0x2d;
pub const TAG_ALIAS: u8 = 0x2e;
pub const TAG_COPY: u8 = 0x2f;
pub const TAG_WEAKEN: u8 = 0x30;
pub const TAG_REGEXP: u8 = 0x31;
pub const TAG_OBJECT_FREEZE: u8 = 0x32;
pub const TAG_OBJECTV_FREEZE: u8 = 0x33;
// 0x34..=0x38 reserved
pub const TAG_CANONICAL_UNDEF: u8 = 0x39;
pub const TAG_FALSE: u8 = 0x3a;
pub const TAG_TRUE: u8 = 0x3b;
pub const TAG_MANY: u8 = 0x3c;
pub const TAG_PACKET_START: u8 = 0x3d;
pub const TAG_EXTEND: u8 = 0x3e;
pub const TAG_PAD: u8 = 0x3f;
pub const TAG_ARRAYREF_0: u8 = 0x40; // ..=0x4f
pub const TAG_HASHREF_0: u8 = 0x50; // ..=0x5f
pub const TAG_SHORT_BINARY_0: u8 = 0x60; // ..=0x7f

#[inline]
pub fn is_arrayref(tag: u8) -> bool {
    (TAG_ARRAYREF_0..TAG_ARRAYREF_0 + 16).contains(&tag)
}

#[inline]
pub fn is_hashref(tag: u8) -> bool {
    (TAG_HASHREF_0..TAG_HASHREF_0 + 16).contains(&tag)
}

#[inline]
pub fn is_short_binary(tag: u8) -> bool {
    tag >= TAG_SHORT_BINARY_0
}

// ── String shapes ──────────────────────────────────────────────────────────

/// Extent of one string-shaped tag (`BINARY`, `STR_UTF8`, `SHORT_BINARY_n`)
/// within a body.
pub struct StringSpan {
    /// On-wire width: tag byte + length varint (if any) + payload.
    pub total: usize,
    /// Payload byte range within the body, without tag and length prefix.
    pub payload: Range<usize>,
}

/// Measure the string-shaped tag starting at `idx`, validating its length
/// against the end of the body. Both merge passes and the object/regexp
/// handling share this scanner.
pub fn string_span(body: &[u8], idx: usize) -> Result<StringSpan, MergeError> {
    let raw = *body.get(idx).ok_or(MergeError::TruncatedDocument)?;

    let (total, payload_start) = match raw & TYPE_MASK {
        TAG_BINARY | TAG_STR_UTF8 => {
            let (len, sz) = varint::decode(&body[idx + 1..])?;
            if len > u32::MAX as u64 {
                return Err(MergeError::BadStringLength(len));
            }
            (1 + sz + len as usize, idx + 1 + sz)
        }
        tag if is_short_binary(tag) => {
            let len = (tag & 0x1f) as usize;
            (1 + len, idx + 1)
        }
        tag => {
            return Err(MergeError::UnknownTag { tag, offset: idx });
        }
    };

    if idx + total > body.len() {
        return Err(MergeError::TruncatedDocument);
    }

    Ok(StringSpan {
        total,
        payload: payload_start..idx + total,
    })
}
