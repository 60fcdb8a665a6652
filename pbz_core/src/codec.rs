/// Block compression primitive used by the transform stage.
///
/// Each `Codec` implementation:
/// - Compresses and decompresses one block at a time with no state carried
///   between calls. Blocks are handed to whichever worker claims them, so the
///   same codec instance is called from many threads at once.
/// - Is deterministic: the same input always yields the same output.
/// - Fails with an error (never a panic) when `decompress_block` is handed
///   bytes it did not produce.
pub trait Codec: Send + Sync {
    /// Human-readable codec name for CLI display and logs.
    fn name(&self) -> &'static str;

    /// Compress a single independent block.
    fn compress_block(&self, raw: &[u8]) -> anyhow::Result<Vec<u8>>;

    /// Decompress a single block previously produced by `compress_block`.
    fn decompress_block(&self, compressed: &[u8]) -> anyhow::Result<Vec<u8>>;
}
