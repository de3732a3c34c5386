use std::io::Read;

use flate2::read::ZlibDecoder;

use crate::Decompressor;

/// Zlib decompressor for Sereal v3+ bodies.
///
/// The enclosing format stores the uncompressed length ahead of the stream;
/// the input reader passes it through as `size_hint`, and a mismatch between
/// the hint and the inflated size is rejected rather than silently accepted.
pub struct ZlibDecompressor;

impl Decompressor for ZlibDecompressor {
    fn name(&self) -> &'static str {
        "zlib"
    }

    fn decompress(&self, input: &[u8], size_hint: Option<usize>) -> anyhow::Result<Vec<u8>> {
        let mut raw = Vec::with_capacity(size_hint.unwrap_or(input.len() * 2));
        ZlibDecoder::new(input).read_to_end(&mut raw)?;

        if let Some(expected) = size_hint {
            if raw.len() != expected {
                anyhow::bail!(
                    "zlib body inflated to {} bytes but header says {}",
                    raw.len(),
                    expected
                );
            }
        }

        Ok(raw)
    }
}
