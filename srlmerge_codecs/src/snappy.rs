use crate::Decompressor;

/// Snappy block-format decompressor.
///
/// Covers both Sereal snappy encodings: the legacy v1 whole-body form and the
/// incremental form. The two differ only in framing (the incremental body is
/// preceded by a varint compressed-length), which the input reader strips
/// before calling here; the compressed payload itself is plain snappy block
/// format either way.
pub struct SnappyDecompressor;

impl Decompressor for SnappyDecompressor {
    fn name(&self) -> &'static str {
        "snappy"
    }

    fn decompress(&self, input: &[u8], size_hint: Option<usize>) -> anyhow::Result<Vec<u8>> {
        let raw = snap::raw::Decoder::new()
            .decompress_vec(input)
            .map_err(|e| anyhow::anyhow!("snappy decompress error: {}", e))?;

        if let Some(expected) = size_hint {
            if raw.len() != expected {
                anyhow::bail!(
                    "snappy body inflated to {} bytes but header says {}",
                    raw.len(),
                    expected
                );
            }
        }

        Ok(raw)
    }
}
