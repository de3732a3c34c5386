//! Shared test support: fixture document builders and a minimal independent
//! Sereal decoder used to check merged output.

#![allow(dead_code)]

use std::io::Write;

use srlmerge_core::format::{
    MAGIC, MAGIC_HIGH_BIT, TAG_ALIAS, TAG_ARRAY, TAG_ARRAYREF_0, TAG_BINARY, TAG_CANONICAL_UNDEF,
    TAG_COPY, TAG_DOUBLE, TAG_FALSE, TAG_FLOAT, TAG_HASH, TAG_HASHREF_0, TAG_OBJECT, TAG_OBJECTV,
    TAG_OBJECTV_FREEZE, TAG_OBJECT_FREEZE, TAG_PAD, TAG_REFN, TAG_REFP, TAG_REGEXP,
    TAG_SHORT_BINARY_0, TAG_STR_UTF8, TAG_TRUE, TAG_UNDEF, TAG_VARINT, TAG_WEAKEN, TAG_ZIGZAG,
    TYPE_MASK,
};

// ── fixture builders ───────────────────────────────────────────────────────

pub fn varint_bytes(mut v: u64) -> Vec<u8> {
    let mut buf = Vec::new();
    loop {
        let byte = (v & 0x7f) as u8;
        v >>= 7;
        if v == 0 {
            buf.push(byte);
            break;
        }
        buf.push(byte | 0x80);
    }
    buf
}

/// A raw (uncompressed) document with an empty user header.
pub fn raw_doc(version: u8, body: &[u8]) -> Vec<u8> {
    let magic = if version < 3 { MAGIC } else { MAGIC_HIGH_BIT };
    let mut doc = magic.to_vec();
    doc.push(version);
    doc.push(0);
    doc.extend_from_slice(body);
    doc
}

/// A legacy v1 document whose whole body is one snappy block.
pub fn snappy_v1_doc(body: &[u8]) -> Vec<u8> {
    let compressed = snap::raw::Encoder::new().compress_vec(body).unwrap();
    let mut doc = MAGIC.to_vec();
    doc.push(0x11);
    doc.push(0);
    doc.extend_from_slice(&compressed);
    doc
}

/// An incremental-snappy document: varint(compressed length) + snappy block.
pub fn snappy_incr_doc(version: u8, body: &[u8]) -> Vec<u8> {
    let compressed = snap::raw::Encoder::new().compress_vec(body).unwrap();
    let magic = if version < 3 { MAGIC } else { MAGIC_HIGH_BIT };
    let mut doc = magic.to_vec();
    doc.push(0x20 | version);
    doc.push(0);
    doc.extend_from_slice(&varint_bytes(compressed.len() as u64));
    doc.extend_from_slice(&compressed);
    doc
}

/// A v3 zlib document: varint(raw length) + varint(compressed length) + stream.
pub fn zlib_v3_doc(body: &[u8]) -> Vec<u8> {
    let mut enc = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
    enc.write_all(body).unwrap();
    let compressed = enc.finish().unwrap();

    let mut doc = MAGIC_HIGH_BIT.to_vec();
    doc.push(0x33);
    doc.push(0);
    doc.extend_from_slice(&varint_bytes(body.len() as u64));
    doc.extend_from_slice(&varint_bytes(compressed.len() as u64));
    doc.extend_from_slice(&compressed);
    doc
}

pub fn pos(n: u8) -> Vec<u8> {
    assert!(n < 16);
    vec![n]
}

/// A `SHORT_BINARY_n` string tag.
pub fn sbin(s: &[u8]) -> Vec<u8> {
    assert!(s.len() <= 31);
    let mut b = vec![TAG_SHORT_BINARY_0 + s.len() as u8];
    b.extend_from_slice(s);
    b
}

/// A `BINARY` string tag with a varint length prefix.
pub fn binary(s: &[u8]) -> Vec<u8> {
    let mut b = vec![TAG_BINARY];
    b.extend_from_slice(&varint_bytes(s.len() as u64));
    b.extend_from_slice(s);
    b
}

/// Body of a document whose top level is a plain array of `elems`.
pub fn array_body(elems: &[Vec<u8>]) -> Vec<u8> {
    let mut b = vec![TAG_ARRAY];
    b.extend_from_slice(&varint_bytes(elems.len() as u64));
    for e in elems {
        b.extend_from_slice(e);
    }
    b
}

/// Body of a document whose top level is an array reference.
pub fn arrayref_body(elems: &[Vec<u8>]) -> Vec<u8> {
    let mut b = vec![TAG_REFN, TAG_ARRAY];
    b.extend_from_slice(&varint_bytes(elems.len() as u64));
    for e in elems {
        b.extend_from_slice(e);
    }
    b
}

/// The body bytes of a merged (raw, empty-user-header) document.
pub fn doc_body(doc: &[u8]) -> &[u8] {
    assert_eq!(doc[5], 0, "expected empty user header");
    &doc[6..]
}

/// Overlapping occurrences of `needle` in `hay`.
pub fn count_occurrences(hay: &[u8], needle: &[u8]) -> usize {
    if needle.is_empty() || hay.len() < needle.len() {
        return 0;
    }
    hay.windows(needle.len()).filter(|w| *w == needle).count()
}

// ── reference decoder ──────────────────────────────────────────────────────

/// Decoded value tree, as seen by an independent decoder. `ALIAS` resolves to
/// the target value and `WEAKEN` is transparent, which is all the structural
/// equality the tests need.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Undef,
    Bool(bool),
    Int(i64),
    Float(f32),
    Double(f64),
    Bytes(Vec<u8>),
    Array(Vec<Value>),
    Hash(Vec<(Value, Value)>),
    Ref(Box<Value>),
    Object { class: Vec<u8>, value: Box<Value> },
    Regexp { pattern: Vec<u8>, flags: Vec<u8> },
}

/// Decode a raw Sereal document produced by the merger.
pub fn decode_document(doc: &[u8]) -> Value {
    assert!(doc.len() > 6, "document too short");
    let magic = &doc[..4];
    assert!(
        magic == MAGIC || magic == MAGIC_HIGH_BIT,
        "bad magic in merged document"
    );
    assert_eq!(doc[4] >> 4, 0, "reference decoder handles raw bodies only");
    assert_eq!(doc[5], 0, "expected empty user header");

    let dec = RefDecoder { body: &doc[6..] };
    let mut idx = 0;
    dec.value(&mut idx)
}

struct RefDecoder<'a> {
    body: &'a [u8],
}

impl RefDecoder<'_> {
    fn varint(&self, idx: &mut usize) -> u64 {
        let mut result = 0u64;
        let mut shift = 0;
        loop {
            let byte = self.body[*idx];
            *idx += 1;
            result |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return result;
            }
            shift += 7;
        }
    }

    fn bytes(&self, idx: &mut usize, len: usize) -> Vec<u8> {
        let out = self.body[*idx..*idx + len].to_vec();
        *idx += len;
        out
    }

    /// Decode the value starting at `*idx`, resolving back-references by
    /// re-decoding at their body-relative target offset.
    fn value(&self, idx: &mut usize) -> Value {
        while self.body[*idx] & TYPE_MASK == TAG_PAD {
            *idx += 1;
        }
        let tag = self.body[*idx] & TYPE_MASK;
        *idx += 1;

        match tag {
            t if t < 0x10 => Value::Int(i64::from(t)),
            t if t < TAG_VARINT => Value::Int(i64::from(t) - 32),
            TAG_VARINT => Value::Int(self.varint(idx) as i64),
            TAG_ZIGZAG => {
                let z = self.varint(idx);
                Value::Int((z >> 1) as i64 ^ -((z & 1) as i64))
            }
            TAG_UNDEF | TAG_CANONICAL_UNDEF => Value::Undef,
            TAG_TRUE => Value::Bool(true),
            TAG_FALSE => Value::Bool(false),
            TAG_FLOAT => {
                let raw: [u8; 4] = self.bytes(idx, 4).try_into().unwrap();
                Value::Float(f32::from_le_bytes(raw))
            }
            TAG_DOUBLE => {
                let raw: [u8; 8] = self.bytes(idx, 8).try_into().unwrap();
                Value::Double(f64::from_le_bytes(raw))
            }
            TAG_BINARY | TAG_STR_UTF8 => {
                let len = self.varint(idx) as usize;
                Value::Bytes(self.bytes(idx, len))
            }
            t if t >= TAG_SHORT_BINARY_0 => Value::Bytes(self.bytes(idx, (t & 0x1f) as usize)),
            TAG_REFN => Value::Ref(Box::new(self.value(idx))),
            TAG_WEAKEN => self.value(idx),
            TAG_REFP => Value::Ref(Box::new(self.value_at(self.varint(idx)))),
            TAG_ALIAS => self.value_at(self.varint(idx)),
            TAG_COPY => self.value_at(self.varint(idx)),
            TAG_ARRAY => {
                let n = self.varint(idx);
                Value::Array((0..n).map(|_| self.value(idx)).collect())
            }
            TAG_HASH => {
                let n = self.varint(idx);
                Value::Hash((0..n).map(|_| (self.value(idx), self.value(idx))).collect())
            }
            t if (TAG_ARRAYREF_0..TAG_ARRAYREF_0 + 16).contains(&t) => {
                let n = t & 0x0f;
                Value::Ref(Box::new(Value::Array(
                    (0..n).map(|_| self.value(idx)).collect(),
                )))
            }
            t if (TAG_HASHREF_0..TAG_HASHREF_0 + 16).contains(&t) => {
                let n = t & 0x0f;
                Value::Ref(Box::new(Value::Hash(
                    (0..n).map(|_| (self.value(idx), self.value(idx))).collect(),
                )))
            }
            TAG_OBJECT | TAG_OBJECT_FREEZE => {
                let class = match self.value(idx) {
                    Value::Bytes(b) => b,
                    other => panic!("object class name must be a string, got {:?}", other),
                };
                Value::Object {
                    class,
                    value: Box::new(self.value(idx)),
                }
            }
            TAG_OBJECTV | TAG_OBJECTV_FREEZE => {
                let class = match self.value_at(self.varint(idx)) {
                    Value::Bytes(b) => b,
                    other => panic!("OBJECTV target must be a string, got {:?}", other),
                };
                Value::Object {
                    class,
                    value: Box::new(self.value(idx)),
                }
            }
            TAG_REGEXP => {
                let pattern = match self.value(idx) {
                    Value::Bytes(b) => b,
                    other => panic!("regexp pattern must be a string, got {:?}", other),
                };
                let flags = match self.value(idx) {
                    Value::Bytes(b) => b,
                    other => panic!("regexp flags must be a string, got {:?}", other),
                };
                Value::Regexp { pattern, flags }
            }
            t => panic!("reference decoder hit unexpected tag 0x{:02x}", t),
        }
    }

    /// Decode the value whose tag sits at body-relative offset `offset`.
    fn value_at(&self, offset: u64) -> Value {
        assert!(offset >= 1, "body-relative offsets are 1-based");
        let mut idx = offset as usize - 1;
        self.value(&mut idx)
    }
}
