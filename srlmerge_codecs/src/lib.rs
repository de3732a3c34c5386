mod snappy;
mod zlib;

pub use snappy::SnappyDecompressor;
pub use zlib::ZlibDecompressor;

/// Core decompression abstraction.
///
/// Each `Decompressor` implementation:
/// - Inflates one complete document body into an owned byte buffer. The
///   merger needs random access over the raw body, so streaming output is
///   deliberately not part of the contract.
/// - Receives the input with any Sereal framing (varint length prefixes)
///   already stripped by the caller; only the compressed payload arrives
///   here.
/// - May be handed the expected uncompressed size via `size_hint` when the
///   enclosing format carries one; a hint both pre-sizes the output and is
///   verified against the result.
pub trait Decompressor: Send + Sync {
    /// Human-readable codec name for error messages and CLI display.
    fn name(&self) -> &'static str;

    /// Inflate `input` into a fresh buffer.
    fn decompress(&self, input: &[u8], size_hint: Option<usize>) -> anyhow::Result<Vec<u8>>;
}
