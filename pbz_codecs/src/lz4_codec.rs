use lz4_flex::block::{compress_prepend_size, decompress_size_prepended};
use pbz_core::Codec;

/// LZ4 block codec, tuned for throughput over ratio.
///
/// The record stores the raw length ahead of the LZ4 data; a short final
/// block decodes to its true size without help from the container.
pub struct Lz4Codec;

impl Codec for Lz4Codec {
    fn name(&self) -> &'static str {
        "lz4"
    }

    fn compress_block(&self, raw: &[u8]) -> anyhow::Result<Vec<u8>> {
        Ok(compress_prepend_size(raw))
    }

    fn decompress_block(&self, compressed: &[u8]) -> anyhow::Result<Vec<u8>> {
        decompress_size_prepended(compressed)
            .map_err(|e| anyhow::anyhow!("corrupt lz4 record: {e}"))
    }
}
