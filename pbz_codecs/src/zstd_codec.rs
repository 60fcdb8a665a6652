use anyhow::Context;
use pbz_core::Codec;

/// Zstandard per-block codec.
///
/// Every record is a standalone zstd frame, so workers decode blocks
/// independently and in any order.
pub struct ZstdCodec {
    level: i32,
}

impl ZstdCodec {
    pub const DEFAULT_LEVEL: i32 = 3;

    pub fn new(level: i32) -> Self {
        Self { level }
    }

    pub fn level(&self) -> i32 {
        self.level
    }
}

impl Default for ZstdCodec {
    fn default() -> Self {
        Self::new(Self::DEFAULT_LEVEL)
    }
}

impl Codec for ZstdCodec {
    fn name(&self) -> &'static str {
        "zstd"
    }

    fn compress_block(&self, raw: &[u8]) -> anyhow::Result<Vec<u8>> {
        zstd::bulk::compress(raw, self.level).with_context(|| {
            format!("zstd level {} rejected a {}-byte block", self.level, raw.len())
        })
    }

    fn decompress_block(&self, compressed: &[u8]) -> anyhow::Result<Vec<u8>> {
        zstd::decode_all(compressed).context("record is not a valid zstd frame")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_is_applied() {
        let data = vec![7u8; 64 * 1024];
        let fast = ZstdCodec::new(1).compress_block(&data).unwrap();
        let codec = ZstdCodec::default();
        assert_eq!(codec.level(), ZstdCodec::DEFAULT_LEVEL);
        let packed = codec.compress_block(&data).unwrap();
        assert!(fast.len() < data.len() && packed.len() < data.len());
        assert_eq!(codec.decompress_block(&fast).unwrap(), data);
    }
}
