use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use tracing::{debug, info};

use crate::codec::Codec;
use crate::config::PipelineConfig;
use crate::error::{Result, Stage};
use crate::framing::{self, HEADER_LEN};
use crate::stages::{self, Mode, Shared};

/// Lifecycle of the most recent call on a [`Pipeline`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Running,
    Completed,
    Failed,
}

/// Totals for one successful run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub blocks: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    /// Highest number of blocks held by the read → transform buffer.
    pub raw_peak: usize,
    /// Highest number of blocks held by the transform → write buffer.
    pub done_peak: usize,
}

/// Block-parallel compressor/decompressor.
///
/// # Run layout
/// ```text
///  read thread ──► [raw buffer] ──► N worker threads ──► [done buffer] ──► write thread
/// ```
/// Both buffers are bounded by `config.capacity`, so memory use stays at
/// roughly `2 × capacity × block_size` regardless of file size. Workers claim
/// blocks in index order and the writer drains them in index order, so the
/// output matches the input order whatever order the codec calls finish in.
///
/// Each call blocks until every stage thread has been joined. If any stage
/// fails, the first error is returned and the rest are logged and dropped.
pub struct Pipeline {
    config: PipelineConfig,
    codec: Arc<dyn Codec>,
    phase: Phase,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, codec: Arc<dyn Codec>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            codec,
            phase: Phase::Idle,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn codec(&self) -> &dyn Codec {
        self.codec.as_ref()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Compress the file at `input` into a new container at `output`.
    pub fn compress(
        &mut self,
        input: impl AsRef<Path>,
        output: impl AsRef<Path>,
    ) -> Result<RunStats> {
        let src = open_read(input.as_ref())?;
        let len = src.metadata()?.len();
        let dst = open_write(output.as_ref())?;
        self.compress_stream(BufReader::new(src), len, BufWriter::new(dst))
    }

    /// Decompress the container at `input` into a new file at `output`.
    pub fn decompress(
        &mut self,
        input: impl AsRef<Path>,
        output: impl AsRef<Path>,
    ) -> Result<RunStats> {
        let src = open_read(input.as_ref())?;
        let dst = open_write(output.as_ref())?;
        self.decompress_stream(BufReader::new(src), BufWriter::new(dst))
    }

    /// Compress `input_len` bytes from `input` into a container on `output`.
    pub fn compress_stream<R, W>(
        &mut self,
        input: R,
        input_len: u64,
        mut output: W,
    ) -> Result<RunStats>
    where
        R: Read + Send,
        W: Write + Send,
    {
        self.phase = Phase::Running;
        let total = self.config.block_count(input_len);
        let result = match framing::write_header(&mut output, total) {
            Ok(()) => self.execute(Mode::Compress, total, input, output),
            Err(err) => Err(err),
        }
        .map(|stats| RunStats {
            bytes_out: stats.bytes_out + HEADER_LEN as u64,
            ..stats
        });
        self.settle(result)
    }

    /// Decompress a container read from `input`, writing raw bytes to `output`.
    pub fn decompress_stream<R, W>(&mut self, mut input: R, output: W) -> Result<RunStats>
    where
        R: Read + Send,
        W: Write + Send,
    {
        self.phase = Phase::Running;
        let result = match framing::read_header(&mut input) {
            Ok(total) => self.execute(Mode::Decompress, total, input, output),
            Err(err) => Err(err),
        }
        .map(|stats| RunStats {
            bytes_in: stats.bytes_in + HEADER_LEN as u64,
            ..stats
        });
        self.settle(result)
    }

    fn settle(&mut self, result: Result<RunStats>) -> Result<RunStats> {
        self.phase = if result.is_ok() {
            Phase::Completed
        } else {
            Phase::Failed
        };
        result
    }

    /// Spawn the read thread, the worker pool and the write thread, then join
    /// them all before reporting.
    fn execute<R, W>(&self, mode: Mode, total: u64, input: R, output: W) -> Result<RunStats>
    where
        R: Read + Send,
        W: Write + Send,
    {
        let shared = Shared::new(total, self.config.capacity);
        let workers = self.config.worker_count();
        let block_size = self.config.block_size;
        let codec = self.codec.as_ref();
        let started = Instant::now();
        debug!(%mode, total, workers, codec = codec.name(), "pipeline running");

        let (bytes_in, bytes_out) = thread::scope(|s| {
            let shared = &shared;

            let reader = s.spawn(move || {
                stages::run_stage(shared, Stage::Read, || match mode {
                    Mode::Compress => stages::read_raw(shared, input, block_size),
                    Mode::Decompress => stages::read_records(shared, input),
                })
            });
            let pool: Vec<_> = (0..workers)
                .map(|_| {
                    s.spawn(move || {
                        stages::run_stage(shared, Stage::Transform, || {
                            stages::transform(shared, codec, mode)
                        })
                    })
                })
                .collect();
            let writer = s.spawn(move || {
                stages::run_stage(shared, Stage::Write, || {
                    stages::write_output(shared, output, mode)
                })
            });

            // A panicked thread has already aborted the run via its guard.
            let bytes_in = reader.join().unwrap_or_default();
            for worker in pool {
                worker.join().unwrap_or_default();
            }
            let bytes_out = writer.join().unwrap_or_default();
            (bytes_in, bytes_out)
        });

        let raw_peak = shared.raw.peak_size();
        let done_peak = shared.done.peak_size();
        shared.run.into_result()?;

        let elapsed = started.elapsed();
        info!(
            %mode,
            blocks = total,
            bytes_in,
            bytes_out,
            raw_peak,
            done_peak,
            elapsed_ms = elapsed.as_millis() as u64,
            "pipeline completed"
        );
        Ok(RunStats {
            blocks: total,
            bytes_in,
            bytes_out,
            raw_peak,
            done_peak,
        })
    }
}

/// Open an existing file for exclusive reading by the read stage.
pub fn open_read(path: &Path) -> Result<File> {
    Ok(File::open(path)?)
}

/// Create (or truncate) the output file for the write stage.
pub fn open_write(path: &Path) -> Result<File> {
    Ok(OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?)
}
