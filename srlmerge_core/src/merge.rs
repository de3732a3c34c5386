//! The merger state machine: lazy header writer, second-pass body rewriter,
//! and finalizer.

use std::collections::HashMap;

use log::debug;

use crate::error::MergeError;
use crate::format::{
    is_arrayref, is_hashref, is_short_binary, string_span, MAGIC, MAGIC_HIGH_BIT,
    PROTOCOL_VERSION_MAX, RESERVED_LENGTH_BYTES, TAG_ALIAS, TAG_ARRAY, TAG_BINARY,
    TAG_CANONICAL_UNDEF, TAG_COPY, TAG_DOUBLE, TAG_EXTEND, TAG_FALSE, TAG_FLOAT, TAG_HASH,
    TAG_LONG_DOUBLE, TAG_OBJECT, TAG_OBJECTV, TAG_OBJECTV_FREEZE, TAG_OBJECT_FREEZE,
    TAG_PACKET_START, TAG_PAD, TAG_REFN, TAG_REFP, TAG_REGEXP, TAG_SHORT_BINARY_0, TAG_STR_UTF8,
    TAG_TRUE, TAG_UNDEF, TAG_VARINT, TAG_WEAKEN, TAG_ZIGZAG, TRACK_FLAG, TYPE_MASK,
};
use crate::reader;
use crate::track::TrackTable;
use crate::varint;

/// Shape of the merged document's top-level container.
///
/// `Hash` and `HashRef` are declared for completeness with the format's
/// design space but are deliberately unimplemented; the merger rejects them
/// with [`MergeError::InvalidTopLevel`] on first use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TopLevelElement {
    Array,
    #[default]
    ArrayRef,
    Hash,
    HashRef,
}

/// Merges independently-encoded Sereal documents into one document whose
/// top-level container concatenates the top-level elements of every input.
///
/// # Output layout
/// ```text
/// [MAGIC: 4 bytes] [version byte] [0x00]   ← empty user header
/// [ARRAY]  or  [REFN ARRAY]                ← top-level container tag
/// [PAD × 8]                                ← element-count varint slot
/// [element bytes…]                         ← appended by `append`
/// ← finish() overwrites the PAD slot with the final count
/// ```
///
/// Each appended document is rewritten tag-by-tag: back-reference offsets are
/// translated into output-buffer coordinates, string literals are
/// deduplicated against a merger-wide table (repeats become `COPY` tags), and
/// repeated class names collapse to `OBJECTV` back-references. A failed
/// `append` rolls the output buffer back to its pre-append length, so the
/// merger stays usable.
pub struct Merger {
    /// Protocol version of the merged document, 1 through
    /// [`PROTOCOL_VERSION_MAX`]. Validated on first use.
    pub protocol_version: u8,
    /// Top-level container shape of the merged document.
    pub top_level: TopLevelElement,

    buf: Vec<u8>,
    /// Index of the user-header length byte; body-relative offset `o` lives
    /// at `buf[body_offset + o]`.
    body_offset: usize,
    /// Index of the reserved element-count varint slot.
    len_offset: usize,
    /// Top-level elements appended so far.
    length: u64,
    /// String payload bytes → body-relative offset of the first occurrence.
    str_table: HashMap<Vec<u8>, usize>,
    /// Class-name bytes → body-relative offset of the class-name string tag.
    obj_table: HashMap<Vec<u8>, usize>,
    inited: bool,
    finished: bool,
}

/// One input document, prepared for the merge pass.
struct SourceDoc<'a> {
    body: &'a [u8],
    /// First byte of the merge range (past any spliced top-level wrapper).
    start: usize,
    track: TrackTable,
}

/// Where the source span consumed by one loop iteration landed in the output,
/// for resolving track-table entries. Dedup'd strings and objects land at
/// their first occurrence rather than at the current write position.
#[derive(Clone, Copy)]
enum Landing {
    /// Single tag; its start offset resolves to the given output offset.
    Tag(usize),
    /// Multi-tag slice copied verbatim; inner tag offsets map linearly.
    Verbatim(usize),
    /// Object tag plus class-name string, each with its own destination.
    Object { tag: usize, class: usize },
}

impl Merger {
    /// Merger at the highest supported protocol version with an array
    /// reference at the top level.
    pub fn new() -> Merger {
        Merger::with_version(PROTOCOL_VERSION_MAX)
    }

    /// Protocol version 2 merger.
    pub fn v2() -> Merger {
        Merger::with_version(2)
    }

    /// Protocol version 3 merger.
    pub fn v3() -> Merger {
        Merger::with_version(3)
    }

    fn with_version(version: u8) -> Merger {
        Merger {
            protocol_version: version,
            top_level: TopLevelElement::ArrayRef,
            buf: Vec::new(),
            body_offset: 0,
            len_offset: 0,
            length: 0,
            str_table: HashMap::new(),
            obj_table: HashMap::new(),
            inited: false,
            finished: false,
        }
    }

    /// Top-level elements appended so far.
    pub fn element_count(&self) -> u64 {
        self.length
    }

    /// Write the document preamble once, on first `append` or `finish`.
    fn init(&mut self) -> Result<(), MergeError> {
        if self.inited {
            return Ok(());
        }
        if self.protocol_version == 0 || self.protocol_version > PROTOCOL_VERSION_MAX {
            return Err(MergeError::UnsupportedVersion(self.protocol_version));
        }
        if matches!(
            self.top_level,
            TopLevelElement::Hash | TopLevelElement::HashRef
        ) {
            return Err(MergeError::InvalidTopLevel);
        }

        let magic = if self.protocol_version < 3 {
            MAGIC
        } else {
            MAGIC_HIGH_BIT
        };
        self.buf.extend_from_slice(&magic);
        self.buf.push(self.protocol_version); // document-type nibble 0: raw
        self.buf.push(0); // empty user header
        self.body_offset = self.buf.len() - 1;

        match self.top_level {
            TopLevelElement::Array => self.buf.push(TAG_ARRAY),
            TopLevelElement::ArrayRef => {
                self.buf.push(TAG_REFN);
                self.buf.push(TAG_ARRAY);
            }
            TopLevelElement::Hash | TopLevelElement::HashRef => unreachable!(),
        }

        self.len_offset = self.buf.len();
        self.buf.extend_from_slice(&[TAG_PAD; RESERVED_LENGTH_BYTES]);
        self.inited = true;
        Ok(())
    }

    /// Consume one complete Sereal document and merge its top-level elements
    /// into the output.
    ///
    /// On error the output buffer is rolled back to its pre-append length and
    /// the merger remains usable for further inputs.
    pub fn append(&mut self, doc: &[u8]) -> Result<(), MergeError> {
        self.init()?;
        if self.finished {
            return Err(MergeError::FinishedDocument);
        }

        let (header, body) = reader::read_body(doc)?;
        debug!(
            "appending document: version {}, {} body, {} bytes",
            header.version,
            header.encoding.name(),
            body.len()
        );

        let start = splice_start(&body);
        let mut src = SourceDoc {
            body: &body,
            start,
            track: TrackTable::build(&body, start)?,
        };

        let rollback = self.buf.len();
        // worst case is a pure copy, plus varint growth for every rewritten
        // offset (remapped targets are larger than source offsets)
        let budget =
            body.len() - start + src.track.backref_count() * (varint::MAX_VARINT_BYTES - 1);
        self.buf.reserve(budget);

        match self.merge_items(&mut src, rollback + budget) {
            Ok(count) => {
                self.length += count;
                Ok(())
            }
            Err(e) => {
                self.buf.truncate(rollback);
                // entries recorded during the failed pass would dangle
                let max_rel = rollback - self.body_offset;
                self.str_table.retain(|_, off| *off < max_rel);
                self.obj_table.retain(|_, off| *off < max_rel);
                Err(e)
            }
        }
    }

    /// Write the element count over the reserved slot and return the merged
    /// document. Idempotent; valid without any prior `append`.
    pub fn finish(&mut self) -> Result<&[u8], MergeError> {
        self.init()?;
        if !self.finished {
            let mut count = Vec::with_capacity(RESERVED_LENGTH_BYTES);
            varint::encode_into(&mut count, self.length);
            if count.len() > RESERVED_LENGTH_BYTES {
                return Err(MergeError::BufferReservationViolated);
            }
            // shorter writes leave trailing PADs, which decoders skip
            self.buf[self.len_offset..self.len_offset + count.len()].copy_from_slice(&count);
            debug!(
                "finished merged document: {} elements, {} bytes",
                self.length,
                self.buf.len()
            );
            self.finished = true;
        }
        Ok(&self.buf)
    }

    /// The second pass: copy the body into the output tag-by-tag, remapping
    /// back-references and deduplicating strings and class names. Returns the
    /// number of top-level elements contributed.
    fn merge_items(&mut self, doc: &mut SourceDoc<'_>, limit: usize) -> Result<u64, MergeError> {
        let body = doc.body;
        let mut didx = doc.start;

        // counts declared-but-unconsumed children per open scope; the bottom
        // sentinel accumulates the input's top-level contribution
        let mut stack: Vec<i64> = Vec::with_capacity(16);
        stack.push(-1);

        while didx < body.len() {
            let raw = body[didx];
            let tag = raw & TYPE_MASK;

            // close scopes whose children are all consumed
            while let Some(&top) = stack.last() {
                if top != 0 {
                    break;
                }
                stack.pop();
            }

            let src_rel = didx + 1; // source body offset is -1
            let out_rel = self.buf.len() - self.body_offset;
            let mut landing = Landing::Tag(out_rel);

            match tag {
                // small positive and negative integers
                t if t < TAG_VARINT => {
                    self.buf.push(raw);
                    didx += 1;
                }

                TAG_UNDEF | TAG_CANONICAL_UNDEF | TAG_TRUE | TAG_FALSE | TAG_SHORT_BINARY_0 => {
                    self.buf.push(raw);
                    didx += 1;
                }

                TAG_PAD | TAG_REFN | TAG_WEAKEN | TAG_EXTEND => {
                    // these consume no structural slot of their own; cancel
                    // the generic decrement below
                    if let Some(top) = stack.last_mut() {
                        *top += 1;
                    }
                    self.buf.push(raw);
                    didx += 1;
                }

                TAG_VARINT | TAG_ZIGZAG => {
                    let (_, sz) = varint::decode(&body[didx + 1..])?;
                    self.buf.extend_from_slice(&body[didx..didx + 1 + sz]);
                    didx += 1 + sz;
                }

                TAG_FLOAT => didx = self.copy_fixed(body, didx, 5)?,
                TAG_DOUBLE => didx = self.copy_fixed(body, didx, 9)?,
                TAG_LONG_DOUBLE => didx = self.copy_fixed(body, didx, 17)?,

                TAG_BINARY | TAG_STR_UTF8 => {
                    didx = self.merge_string(body, didx, &mut landing)?;
                }
                t if is_short_binary(t) => {
                    didx = self.merge_string(body, didx, &mut landing)?;
                }

                TAG_COPY | TAG_REFP | TAG_ALIAS | TAG_OBJECTV | TAG_OBJECTV_FREEZE => {
                    let (offset, sz) = varint::decode(&body[didx + 1..])?;
                    let target = doc
                        .track
                        .target(offset as usize)
                        .ok_or(MergeError::BadBackReference { tag, offset })?;
                    append_tag_varint(&mut self.buf, raw, target as u64);
                    didx += 1 + sz;

                    if tag == TAG_ALIAS {
                        // the decoder must keep an aliasable slot there
                        self.buf[self.body_offset + target] |= TRACK_FLAG;
                    }
                    if tag == TAG_OBJECTV || tag == TAG_OBJECTV_FREEZE {
                        stack.push(1); // the object's payload follows
                    }
                }

                TAG_ARRAY | TAG_HASH => {
                    let (count, sz) = varint::decode(&body[didx + 1..])?;
                    if count > u32::MAX as u64 {
                        return Err(MergeError::BadArrayOrHashLength(count));
                    }
                    self.buf.extend_from_slice(&body[didx..didx + 1 + sz]);
                    didx += 1 + sz;
                    let expected = (if tag == TAG_HASH { 2 * count } else { count }) as i64;
                    // an empty container consumes its parent slot like an atom
                    if expected > 0 {
                        stack.push(expected);
                    }
                }

                t if is_arrayref(t) || is_hashref(t) => {
                    self.buf.push(raw);
                    didx += 1;
                    let n = i64::from(t & 0x0f) * if is_hashref(t) { 2 } else { 1 };
                    if n > 0 {
                        stack.push(n);
                    }
                }

                TAG_REGEXP => {
                    // pattern and modifier strings ride along verbatim; they
                    // never join the string table
                    let pattern = string_span(body, didx + 1)?;
                    let modifiers = string_span(body, didx + 1 + pattern.total)?;
                    let total = 1 + pattern.total + modifiers.total;
                    self.buf.extend_from_slice(&body[didx..didx + total]);
                    didx += total;
                    landing = Landing::Verbatim(out_rel);
                }

                TAG_OBJECT | TAG_OBJECT_FREEZE => {
                    didx = self.merge_object(&doc.track, body, didx, raw, &mut landing)?;
                    stack.push(1); // the object's payload follows
                }

                TAG_PACKET_START => return Err(MergeError::UnexpectedPacketStart),

                tag => return Err(MergeError::UnknownTag { tag, offset: didx }),
            }

            // resolve track-table entries the consumed span walked past
            let end_rel = didx + 1;
            match landing {
                Landing::Tag(eff) => doc
                    .track
                    .resolve_span(end_rel, |rel| (rel == src_rel).then_some(eff)),
                Landing::Verbatim(base) => doc
                    .track
                    .resolve_span(end_rel, |rel| rel.checked_sub(src_rel).map(|d| base + d)),
                Landing::Object { tag: obj, class } => doc.track.resolve_span(end_rel, |rel| {
                    if rel == src_rel {
                        Some(obj)
                    } else if rel == src_rel + 1 {
                        Some(class)
                    } else {
                        None
                    }
                }),
            }

            if let Some(top) = stack.last_mut() {
                *top -= 1;
            }

            if self.buf.len() > limit {
                return Err(MergeError::BufferReservationViolated);
            }
        }

        // a well-formed input pops every scope it opens: the last child of a
        // scope removes it before being processed, so even a scope counted
        // down to zero still awaits that child
        if stack.len() > 1 {
            return Err(MergeError::TruncatedDocument);
        }

        Ok((-(stack[0] + 1)) as u64)
    }

    fn copy_fixed(&mut self, body: &[u8], didx: usize, width: usize) -> Result<usize, MergeError> {
        if didx + width > body.len() {
            return Err(MergeError::TruncatedDocument);
        }
        self.buf.extend_from_slice(&body[didx..didx + width]);
        Ok(didx + width)
    }

    /// Copy or deduplicate one string tag. A repeat becomes a `COPY` of the
    /// first occurrence, and the landing is redirected there so that
    /// back-references aimed at this source position keep resolving to a real
    /// literal rather than to the `COPY` tag.
    fn merge_string(
        &mut self,
        body: &[u8],
        didx: usize,
        landing: &mut Landing,
    ) -> Result<usize, MergeError> {
        let span = string_span(body, didx)?;
        let payload = &body[span.payload.clone()];

        if let Some(&first) = self.str_table.get(payload) {
            // rewriting must never grow the document past its reservation
            if 1 + varint::encoded_len(first as u64) <= span.total {
                append_tag_varint(&mut self.buf, TAG_COPY, first as u64);
                *landing = Landing::Tag(first);
                return Ok(didx + span.total);
            }
        } else {
            let out_rel = self.buf.len() - self.body_offset;
            self.str_table.insert(payload.to_vec(), out_rel);
        }

        self.buf.extend_from_slice(&body[didx..didx + span.total]);
        Ok(didx + span.total)
    }

    /// Copy or deduplicate one `OBJECT`/`OBJECT_FREEZE` tag. A known class
    /// name is rewritten to the `OBJECTV` form pointing at the first
    /// occurrence's class-name string tag.
    fn merge_object(
        &mut self,
        track: &TrackTable,
        body: &[u8],
        didx: usize,
        raw: u8,
        landing: &mut Landing,
    ) -> Result<usize, MergeError> {
        let out_rel = self.buf.len() - self.body_offset;
        let class_raw = *body.get(didx + 1).ok_or(MergeError::TruncatedDocument)?;

        // encoders reuse a class name seen earlier in the same document via
        // COPY; chase it to the literal in the source
        if class_raw & TYPE_MASK == TAG_COPY {
            let (offset, sz) = varint::decode(&body[didx + 2..])?;
            let target = track.target(offset as usize).ok_or(MergeError::BadBackReference {
                tag: TAG_COPY,
                offset,
            })?;
            let class = string_span(body, offset as usize - 1)?;
            let name = &body[class.payload];

            if let Some(&first) = self.obj_table.get(name) {
                append_tag_varint(&mut self.buf, objectv_for(raw), first as u64);
                *landing = Landing::Object {
                    tag: first,
                    class: first,
                };
            } else {
                self.obj_table.insert(name.to_vec(), target);
                self.buf.push(raw);
                append_tag_varint(&mut self.buf, class_raw, target as u64);
                *landing = Landing::Object {
                    tag: out_rel,
                    class: target,
                };
            }
            return Ok(didx + 2 + sz);
        }

        let class = string_span(body, didx + 1)?;
        let name = &body[class.payload.clone()];

        if let Some(&first) = self.obj_table.get(name) {
            if 1 + varint::encoded_len(first as u64) <= 1 + class.total {
                append_tag_varint(&mut self.buf, objectv_for(raw), first as u64);
                *landing = Landing::Object {
                    tag: first,
                    class: first,
                };
                return Ok(didx + 1 + class.total);
            }
        } else {
            // the entry names the class-name string tag itself, one byte past
            // the object tag, matching OBJECTV semantics
            self.obj_table.insert(name.to_vec(), out_rel + 1);
        }

        self.buf
            .extend_from_slice(&body[didx..didx + 1 + class.total]);
        *landing = Landing::Verbatim(out_rel);
        Ok(didx + 1 + class.total)
    }
}

impl Default for Merger {
    fn default() -> Self {
        Merger::new()
    }
}

/// Skip the input's own top-level array wrapper so its elements concatenate
/// into the merged container. A track-flagged wrapper byte disables the
/// splice: the document then contributes itself as a single element, keeping
/// its back-reference targets intact.
fn splice_start(body: &[u8]) -> usize {
    match body.first() {
        Some(&TAG_REFN) => match body.get(1) {
            Some(&TAG_ARRAY) => match varint::decode(&body[2..]) {
                Ok((_, sz)) => 2 + sz,
                Err(_) => 0, // let the passes report the malformed count
            },
            _ => 0,
        },
        Some(&TAG_ARRAY) => match varint::decode(&body[1..]) {
            Ok((_, sz)) => 1 + sz,
            Err(_) => 0,
        },
        Some(&t) if is_arrayref(t) => 1,
        _ => 0,
    }
}

/// The back-reference form of an object tag, track flag preserved.
fn objectv_for(raw: u8) -> u8 {
    let objv = if raw & TYPE_MASK == TAG_OBJECT {
        TAG_OBJECTV
    } else {
        TAG_OBJECTV_FREEZE
    };
    (raw & TRACK_FLAG) | objv
}

fn append_tag_varint(buf: &mut Vec<u8>, tag: u8, value: u64) {
    buf.push(tag);
    varint::encode_into(buf, value);
}
