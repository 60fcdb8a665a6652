//! The three pipeline stages and the state they share.
//!
//! Every stage body returns a `Result`; [`run_stage`] turns an `Err` into a
//! latched run failure so that each thread exits cleanly and the orchestrator
//! can join them all before reporting.

use std::fmt;
use std::io::{Read, Write};
use std::thread;

use tracing::{debug, trace, warn};

use crate::buffer::IndexedBuffer;
use crate::codec::Codec;
use crate::error::{PipelineError, ProtocolError, Result, Stage};
use crate::framing::{self, LENGTH_PREFIX};
use crate::run::{CancelFlag, RunState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    Compress,
    Decompress,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::Compress => "compress",
            Mode::Decompress => "decompress",
        })
    }
}

/// Buffers and run state for one pipeline call.
///
/// `raw` sits between the read stage and the workers, `done` between the
/// workers and the write stage.
#[derive(Debug)]
pub(crate) struct Shared {
    pub run: RunState,
    pub raw: IndexedBuffer,
    pub done: IndexedBuffer,
}

impl Shared {
    pub fn new(total_blocks: u64, capacity: usize) -> Self {
        Self {
            run: RunState::new(total_blocks),
            raw: IndexedBuffer::new(capacity),
            done: IndexedBuffer::new(capacity),
        }
    }

    fn cancel(&self) -> &CancelFlag {
        self.run.cancel_flag()
    }

    /// Latch `err`, cancel the run and wake every thread blocked on a buffer.
    pub fn abort(&self, stage: Stage, err: PipelineError) {
        self.run.fail(stage, err);
        self.raw.wake_all();
        self.done.wake_all();
    }
}

/// Aborts the run if the owning stage thread unwinds, so no peer is left
/// waiting on a buffer the dead thread would have fed or drained.
struct PanicGuard<'a> {
    shared: &'a Shared,
    stage: Stage,
}

impl Drop for PanicGuard<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.shared
                .abort(self.stage, PipelineError::StagePanicked(self.stage));
        }
    }
}

/// Run one stage body, latching its error instead of returning it.
pub(crate) fn run_stage<T: Default>(
    shared: &Shared,
    stage: Stage,
    body: impl FnOnce() -> Result<T>,
) -> T {
    let _guard = PanicGuard { shared, stage };
    debug!(%stage, "stage started");
    match body() {
        Ok(value) => {
            debug!(%stage, cancelled = shared.run.is_cancelled(), "stage finished");
            value
        }
        Err(err) => {
            shared.abort(stage, err);
            T::default()
        }
    }
}

// ── Read stage ─────────────────────────────────────────────────────────────

/// Slice `input` into raw blocks of `block_size` bytes; the last may be short.
///
/// Returns the number of bytes read.
pub(crate) fn read_raw<R: Read>(shared: &Shared, mut input: R, block_size: usize) -> Result<u64> {
    let total = shared.run.total_blocks();
    let mut bytes = 0u64;

    for index in 0..total {
        // Capacity first: nothing is read until the block has somewhere to go.
        let Some(slot) = shared.raw.reserve(shared.cancel()) else {
            return Ok(bytes);
        };
        let mut block = vec![0u8; block_size];
        let n = framing::read_up_to(&mut input, &mut block)?;
        let is_last = index + 1 == total;
        if n == 0 || (n < block_size && !is_last) {
            return Err(ProtocolError::UnexpectedEof {
                expected: total,
                found: index,
            }
            .into());
        }
        block.truncate(n);
        bytes += n as u64;
        slot.fill(index, block)?;
        trace!(index, len = n, "read raw block");
    }

    if !shared.run.is_cancelled() && framing::read_up_to(&mut input, &mut [0u8; 1])? > 0 {
        warn!(total, "input grew after its length was measured; extra bytes ignored");
    }
    Ok(bytes)
}

/// Read `total` framed records from a container body.
///
/// Returns the number of body bytes consumed, length prefixes included.
pub(crate) fn read_records<R: Read>(shared: &Shared, mut input: R) -> Result<u64> {
    let total = shared.run.total_blocks();
    let mut bytes = 0u64;

    for index in 0..total {
        let Some(slot) = shared.raw.reserve(shared.cancel()) else {
            return Ok(bytes);
        };
        let Some(record) = framing::read_record(&mut input)? else {
            return Err(ProtocolError::UnexpectedEof {
                expected: total,
                found: index,
            }
            .into());
        };
        bytes += (LENGTH_PREFIX + record.len()) as u64;
        trace!(index, len = record.len(), "read record");
        slot.fill(index, record)?;
    }

    if !shared.run.is_cancelled() && framing::read_up_to(&mut input, &mut [0u8; 1])? > 0 {
        return Err(ProtocolError::TrailingData.into());
    }
    Ok(bytes)
}

// ── Transform stage ────────────────────────────────────────────────────────

/// Worker loop: claim the next block in index order, run the codec outside
/// any lock, publish the result under the same index.
pub(crate) fn transform(shared: &Shared, codec: &dyn Codec, mode: Mode) -> Result<()> {
    let total = shared.run.total_blocks();
    let mut handled = 0u64;

    loop {
        // Reserve output capacity before claiming input, so a claimed block
        // can always be published and the writer never waits on a worker
        // that is itself waiting for the writer.
        let Some(slot) = shared.done.reserve(shared.cancel()) else {
            break;
        };
        let Some((index, payload)) = shared.raw.take_next(total, shared.cancel()) else {
            break;
        };
        let out = match mode {
            Mode::Compress => codec.compress_block(&payload),
            Mode::Decompress => codec.decompress_block(&payload),
        }
        .map_err(|e| PipelineError::codec(index, e))?;
        trace!(index, before = payload.len(), after = out.len(), "transformed block");
        slot.fill(index, out)?;
        handled += 1;
    }

    debug!(handled, "worker idle");
    Ok(())
}

// ── Write stage ────────────────────────────────────────────────────────────

/// Drain transformed blocks in strict index order into `output`.
///
/// Compressed blocks are framed; decompressed blocks are written raw.
/// Returns the number of bytes written.
pub(crate) fn write_output<W: Write>(shared: &Shared, mut output: W, mode: Mode) -> Result<u64> {
    let total = shared.run.total_blocks();
    let mut bytes = 0u64;

    while let Some((index, payload)) = shared.done.take_next(total, shared.cancel()) {
        match mode {
            Mode::Compress => {
                framing::write_record(&mut output, &payload)?;
                bytes += (LENGTH_PREFIX + payload.len()) as u64;
            }
            Mode::Decompress => {
                output.write_all(&payload)?;
                bytes += payload.len() as u64;
            }
        }
        trace!(index, len = payload.len(), "wrote block");
    }

    output.flush()?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    struct Upper;

    impl Codec for Upper {
        fn name(&self) -> &'static str {
            "upper"
        }

        fn compress_block(&self, raw: &[u8]) -> anyhow::Result<Vec<u8>> {
            Ok(raw.to_ascii_uppercase())
        }

        fn decompress_block(&self, compressed: &[u8]) -> anyhow::Result<Vec<u8>> {
            if compressed.contains(&b'!') {
                anyhow::bail!("bang in block");
            }
            Ok(compressed.to_ascii_lowercase())
        }
    }

    #[test]
    fn read_raw_truncates_last_block() {
        let shared = Shared::new(3, 8);
        let bytes = read_raw(&shared, Cursor::new(b"abcdefghij".to_vec()), 4).unwrap();
        assert_eq!(bytes, 10);
        assert_eq!(shared.raw.try_take(0).unwrap(), b"abcd");
        assert_eq!(shared.raw.try_take(1).unwrap(), b"efgh");
        assert_eq!(shared.raw.try_take(2).unwrap(), b"ij");
    }

    #[test]
    fn read_raw_reports_shrunken_input() {
        let shared = Shared::new(3, 8);
        let err = read_raw(&shared, Cursor::new(b"abcdef".to_vec()), 4).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Protocol(ProtocolError::UnexpectedEof { expected: 3, found: 1 })
        ));
    }

    #[test]
    fn read_records_rejects_trailing_bytes() {
        let mut body = Vec::new();
        framing::write_record(&mut body, b"x").unwrap();
        body.push(0xff);
        let shared = Shared::new(1, 8);
        let err = read_records(&shared, Cursor::new(body)).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Protocol(ProtocolError::TrailingData)
        ));
    }

    #[test]
    fn transform_then_write_in_order() {
        let shared = Shared::new(3, 8);
        for (i, block) in [(2u64, "c"), (0, "a"), (1, "b")] {
            shared.raw.insert(i, block.as_bytes().to_vec()).unwrap();
        }
        transform(&shared, &Upper, Mode::Compress).unwrap();

        let mut out = Vec::new();
        let written = write_output(&shared, &mut out, Mode::Decompress).unwrap();
        assert_eq!(written, 3);
        assert_eq!(out, b"ABC");
    }

    #[test]
    fn codec_failure_is_latched_with_index() {
        let shared = Shared::new(2, 8);
        shared.raw.insert(0, b"ok".to_vec()).unwrap();
        shared.raw.insert(1, b"no!".to_vec()).unwrap();

        run_stage(&shared, Stage::Transform, || {
            transform(&shared, &Upper, Mode::Decompress)
        });

        assert!(shared.run.is_cancelled());
        let err = shared.run.into_result().unwrap_err();
        assert!(matches!(err, PipelineError::Codec { index: 1, .. }), "{err}");
    }
}
