//! Merge independently-serialized Sereal documents into one document whose
//! top-level array concatenates the top-level elements of every input,
//! without ever decoding them into native values.
//!
//! The interesting work is offset translation: Sereal back-references name
//! earlier positions by body-relative byte offset, so every copied tag may
//! shift the coordinate system. A first pass collects every
//! offset that can be referenced; a second pass copies the body
//! while rewriting those offsets into output coordinates, deduplicating
//! string literals and class names across all inputs along the way.

pub mod error;
pub mod format;
pub mod merge;
pub mod reader;
mod track;
pub mod varint;

pub use error::MergeError;
pub use merge::{Merger, TopLevelElement};
pub use reader::{read_body, read_header, BodyEncoding, DocHeader};
