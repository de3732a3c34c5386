//! Track-table builder: the first pass over a raw body.
//!
//! Back-reference offsets can only be remapped once every possible target is
//! known, and a target's byte position may occur long before the tag that
//! references it is reached. This pass therefore walks the whole body once,
//! validating tag structure and collecting the set of source-relative offsets
//! that are either explicitly track-flagged or named by an offset-bearing
//! tag. The merge pass later resolves each collected offset to its position
//! in the output buffer.

use std::collections::HashMap;

use crate::error::MergeError;
use crate::format::{
    is_arrayref, is_hashref, is_short_binary, string_span, TAG_ALIAS, TAG_ARRAY, TAG_BINARY,
    TAG_COPY, TAG_DOUBLE, TAG_FLOAT, TAG_HASH, TAG_LONG_DOUBLE, TAG_OBJECTV, TAG_OBJECTV_FREEZE,
    TAG_PACKET_START, TAG_REFP, TAG_STR_UTF8, TAG_VARINT, TAG_ZIGZAG, TRACK_FLAG, TYPE_MASK,
};
use crate::varint;

/// Offsets within one source document that the merge pass must account for,
/// keyed source-relative (1-based: offset 1 is body byte 0).
///
/// A value of `None` marks an offset that has been discovered but not yet
/// rewritten; the merge pass fills in the output-relative position as it
/// copies the tag that lives there.
pub(crate) struct TrackTable {
    entries: HashMap<usize, Option<usize>>,
    /// Sorted ascending keys of `entries`; with `cursor` this gives the merge
    /// pass O(1) membership tests as it advances through the body.
    idxs: Vec<usize>,
    cursor: usize,
    /// Offset-bearing tags seen. Rewritten offsets are larger than source
    /// offsets, so each such tag can grow by up to `MAX_VARINT_BYTES - 1`
    /// bytes; the merge pass sizes its buffer reservation with this.
    backrefs: usize,
}

impl TrackTable {
    /// Scan `body` from `start`, validating structure and collecting every
    /// offset that may be referenced.
    pub fn build(body: &[u8], start: usize) -> Result<TrackTable, MergeError> {
        let mut entries: HashMap<usize, Option<usize>> = HashMap::new();
        let mut backrefs = 0usize;
        let mut idx = start;

        while idx < body.len() {
            let raw = body[idx];
            if raw & TRACK_FLAG == TRACK_FLAG {
                // self-referential case: a later tag may point back here
                entries.insert(idx + 1, None);
            }

            let tag = raw & TYPE_MASK;
            match tag {
                t if t < TAG_VARINT => idx += 1,

                TAG_VARINT | TAG_ZIGZAG => {
                    let (_, sz) = varint::decode(&body[idx + 1..])?;
                    idx += 1 + sz;
                }

                TAG_FLOAT => idx = fixed_width(body, idx, 5)?,
                TAG_DOUBLE => idx = fixed_width(body, idx, 9)?,
                TAG_LONG_DOUBLE => idx = fixed_width(body, idx, 17)?,

                TAG_BINARY | TAG_STR_UTF8 => idx += string_span(body, idx)?.total,

                TAG_COPY | TAG_ALIAS | TAG_REFP | TAG_OBJECTV | TAG_OBJECTV_FREEZE => {
                    let (offset, sz) = varint::decode(&body[idx + 1..])?;
                    // targets always name an earlier position
                    if offset >= (idx + 1) as u64 {
                        return Err(MergeError::BadBackReference { tag, offset });
                    }
                    entries.insert(offset as usize, None);
                    backrefs += 1;
                    idx += 1 + sz;
                }

                TAG_ARRAY | TAG_HASH => {
                    let (count, sz) = varint::decode(&body[idx + 1..])?;
                    if count > u32::MAX as u64 {
                        return Err(MergeError::BadArrayOrHashLength(count));
                    }
                    idx += 1 + sz;
                }

                t if is_arrayref(t) || is_hashref(t) => idx += 1,

                t if is_short_binary(t) => idx = fixed_width(body, idx, 1 + (t & 0x1f) as usize)?,

                TAG_PACKET_START => return Err(MergeError::UnexpectedPacketStart),

                // REFN, PAD, WEAKEN, UNDEF, CANONICAL_UNDEF, TRUE, FALSE,
                // EXTEND, REGEXP, OBJECT and OBJECT_FREEZE are all one byte
                // wide here; their operands are scanned as tags of their own.
                0x25..=0x33 | 0x39..=0x3b | 0x3e..=0x3f => idx += 1,

                tag => return Err(MergeError::UnknownTag { tag, offset: idx }),
            }
        }

        let mut idxs: Vec<usize> = entries.keys().copied().collect();
        idxs.sort_unstable();

        Ok(TrackTable {
            entries,
            idxs,
            cursor: 0,
            backrefs,
        })
    }

    /// Number of offset-bearing tags discovered by the scan.
    pub fn backref_count(&self) -> usize {
        self.backrefs
    }

    /// Resolve every collected offset below `end_rel` that the merge pass has
    /// just walked past. `f` maps a source-relative offset to its
    /// output-relative position, or `None` when the offset does not coincide
    /// with a copied tag (it then stays unresolved and fails on use).
    pub fn resolve_span<F: Fn(usize) -> Option<usize>>(&mut self, end_rel: usize, f: F) {
        while self.cursor < self.idxs.len() && self.idxs[self.cursor] < end_rel {
            let rel = self.idxs[self.cursor];
            if let Some(out) = f(rel) {
                self.entries.insert(rel, Some(out));
            }
            self.cursor += 1;
        }
    }

    /// Output-relative position for `rel`, if discovered and already
    /// rewritten.
    pub fn target(&self, rel: usize) -> Option<usize> {
        self.entries.get(&rel).copied().flatten()
    }

    #[cfg(test)]
    fn tracked(&self) -> &[usize] {
        &self.idxs
    }
}

fn fixed_width(body: &[u8], idx: usize, width: usize) -> Result<usize, MergeError> {
    if idx + width > body.len() {
        return Err(MergeError::TruncatedDocument);
    }
    Ok(idx + width)
}
