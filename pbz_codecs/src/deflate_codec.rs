use std::io::{Read, Write};

use anyhow::Context;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use pbz_core::Codec;

/// Raw DEFLATE block codec (no zlib or gzip wrapper).
///
/// The default codec: widely supported and a reasonable ratio at the
/// default level 6.
pub struct DeflateCodec {
    level: Compression,
}

impl Default for DeflateCodec {
    fn default() -> Self {
        Self {
            level: Compression::default(),
        }
    }
}

impl DeflateCodec {
    /// `level` runs from 0 (store) to 9 (smallest).
    pub fn new(level: u32) -> Self {
        Self {
            level: Compression::new(level),
        }
    }
}

impl Codec for DeflateCodec {
    fn name(&self) -> &'static str {
        "deflate"
    }

    fn compress_block(&self, raw: &[u8]) -> anyhow::Result<Vec<u8>> {
        let mut enc = DeflateEncoder::new(Vec::with_capacity(raw.len() / 2), self.level);
        enc.write_all(raw)?;
        Ok(enc.finish()?)
    }

    fn decompress_block(&self, compressed: &[u8]) -> anyhow::Result<Vec<u8>> {
        let mut raw = Vec::new();
        DeflateDecoder::new(compressed)
            .read_to_end(&mut raw)
            .context("deflate decompress error")?;
        Ok(raw)
    }
}
