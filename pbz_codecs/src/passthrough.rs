use pbz_core::Codec;

/// Stores each block unchanged.
///
/// Containers written with it are the framing alone, which makes record
/// boundaries easy to read with `pbz inspect`. Also suits input that is
/// already compressed.
pub struct PassThroughCodec;

impl Codec for PassThroughCodec {
    fn name(&self) -> &'static str {
        "passthrough"
    }

    fn compress_block(&self, raw: &[u8]) -> anyhow::Result<Vec<u8>> {
        Ok(raw.to_vec())
    }

    fn decompress_block(&self, record: &[u8]) -> anyhow::Result<Vec<u8>> {
        Ok(record.to_vec())
    }
}
