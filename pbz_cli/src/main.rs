use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use xxhash_rust::xxh3::Xxh3;

use pbz_codecs::codec_by_name;
use pbz_core::framing::{read_header, read_record, LENGTH_PREFIX};
use pbz_core::{Pipeline, PipelineConfig, RunStats, DEFAULT_BLOCK_SIZE, DEFAULT_CAPACITY};

// ── CLI definition ─────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "pbz",
    about = "Block-parallel file compressor: compresses fixed-size blocks on every core",
    version
)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace). RUST_LOG overrides.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

/// Pipeline settings shared by compress and decompress.
#[derive(clap::Args)]
struct PipelineArgs {
    /// Codec to use: deflate | gzip | zstd | lz4 | passthrough
    #[arg(short, long, default_value = "deflate")]
    codec: String,
    /// Codec level (deflate/gzip 0–9, zstd 1–22); codec default if omitted
    #[arg(short, long)]
    level: Option<i32>,
    /// Raw bytes per block (default: 1048576 = 1 MiB)
    #[arg(short, long, default_value_t = DEFAULT_BLOCK_SIZE)]
    block_size: usize,
    /// Blocks each in-flight buffer may hold
    #[arg(long, default_value_t = DEFAULT_CAPACITY)]
    capacity: usize,
    /// Worker threads (default: available cores minus two, at least one)
    #[arg(short, long)]
    jobs: Option<usize>,
    /// Overwrite the output file if it exists
    #[arg(short, long)]
    force: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Compress a file into a pbz container
    Compress {
        /// Source file to compress
        input: PathBuf,
        /// Destination container
        output: PathBuf,
        #[command(flatten)]
        args: PipelineArgs,
    },
    /// Decompress a pbz container back to raw bytes
    ///
    /// The container does not record its codec; pass the same --codec used
    /// to compress it.
    Decompress {
        /// Source container
        input: PathBuf,
        /// Destination file ("-" writes to stdout)
        output: PathBuf,
        #[command(flatten)]
        args: PipelineArgs,
    },
    /// Print the block count and per-record sizes of a container
    Inspect {
        /// Container to inspect
        file: PathBuf,
        /// Print per-block details
        #[arg(long)]
        blocks: bool,
    },
    /// Check that two files have identical contents (xxh3-64)
    Verify {
        first: PathBuf,
        second: PathBuf,
    },
}

// ── Helpers ────────────────────────────────────────────────────────────────

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

/// Format a byte count with binary units, e.g. `1.50 KiB`.
fn human_bytes(n: u64) -> String {
    const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];
    if n < 1024 {
        return format!("{n} B");
    }
    let mut value = n as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.2} {}", UNITS[unit])
}

fn is_stdout(path: &Path) -> bool {
    path.to_str() == Some("-")
}

/// Input must be an existing regular file.
fn validate_input(input: &Path) -> anyhow::Result<()> {
    let meta = fs::metadata(input).with_context(|| format!("input file {:?} not found", input))?;
    if !meta.is_file() {
        anyhow::bail!("input {:?} is not a regular file", input);
    }
    Ok(())
}

/// Output must be a usable new path, distinct from the input.
fn validate_output(input: &Path, output: &Path, force: bool) -> anyhow::Result<()> {
    if output.as_os_str().is_empty() {
        anyhow::bail!("output path is empty");
    }
    if output.file_name().is_none() {
        anyhow::bail!("output path {:?} does not name a file", output);
    }
    if output.exists() {
        if !force {
            anyhow::bail!("output file {:?} already exists (use --force to overwrite)", output);
        }
        if fs::canonicalize(output)? == fs::canonicalize(input)? {
            anyhow::bail!("output {:?} is the same file as the input", output);
        }
    }
    Ok(())
}

fn build_pipeline(args: &PipelineArgs) -> anyhow::Result<Pipeline> {
    let codec = codec_by_name(&args.codec, args.level)?;
    let mut config = PipelineConfig::default()
        .with_block_size(args.block_size)
        .with_capacity(args.capacity);
    if let Some(jobs) = args.jobs {
        config = config.with_workers(jobs);
    }
    Ok(Pipeline::new(config, codec)?)
}

/// Run `op`, deleting whatever it left at `output` if it fails.
fn with_cleanup<T>(output: &Path, op: impl FnOnce() -> anyhow::Result<T>) -> anyhow::Result<T> {
    let result = op();
    if result.is_err() && output.exists() {
        if let Err(e) = fs::remove_file(output) {
            tracing::warn!(path = ?output, error = %e, "could not remove partial output");
        } else {
            tracing::debug!(path = ?output, "removed partial output");
        }
    }
    result
}

fn print_summary(pipeline: &Pipeline, stats: &RunStats, raw: u64, packed: u64, elapsed: f64) {
    let ratio = if packed == 0 { 1.0 } else { raw as f64 / packed as f64 };
    eprintln!("  codec       : {}", pipeline.codec().name());
    eprintln!("  block size  : {}", human_bytes(pipeline.config().block_size as u64));
    eprintln!("  workers     : {}", pipeline.config().worker_count());
    eprintln!("  blocks      : {}", stats.blocks);
    eprintln!("  raw size    : {}", human_bytes(raw));
    eprintln!("  compressed  : {}", human_bytes(packed));
    eprintln!("  ratio       : {:.2}x", ratio);
    eprintln!(
        "  throughput  : {}/s",
        human_bytes((raw as f64 / elapsed.max(f64::EPSILON)) as u64)
    );
    eprintln!("  elapsed     : {:.3}s", elapsed);
}

// ── Subcommand implementations ─────────────────────────────────────────────

fn run_compress(input: PathBuf, output: PathBuf, args: PipelineArgs) -> anyhow::Result<()> {
    validate_input(&input)?;
    validate_output(&input, &output, args.force)?;
    let mut pipeline = build_pipeline(&args)?;

    let t0 = Instant::now();
    let stats = with_cleanup(&output, || {
        pipeline
            .compress(&input, &output)
            .with_context(|| format!("compressing {:?} into {:?}", input, output))
    })?;
    let elapsed = t0.elapsed().as_secs_f64();

    print_summary(&pipeline, &stats, stats.bytes_in, stats.bytes_out, elapsed);
    Ok(())
}

fn run_decompress(input: PathBuf, output: PathBuf, args: PipelineArgs) -> anyhow::Result<()> {
    validate_input(&input)?;
    let mut pipeline = build_pipeline(&args)?;

    let t0 = Instant::now();
    let stats = if is_stdout(&output) {
        let src = File::open(&input).with_context(|| format!("opening input file {:?}", input))?;
        pipeline
            .decompress_stream(BufReader::new(src), BufWriter::new(io::stdout()))
            .with_context(|| format!("decompressing {:?} to stdout", input))?
    } else {
        validate_output(&input, &output, args.force)?;
        with_cleanup(&output, || {
            pipeline
                .decompress(&input, &output)
                .with_context(|| format!("decompressing {:?} into {:?}", input, output))
        })?
    };
    let elapsed = t0.elapsed().as_secs_f64();

    print_summary(&pipeline, &stats, stats.bytes_out, stats.bytes_in, elapsed);
    Ok(())
}

fn run_inspect(file: PathBuf, show_blocks: bool) -> anyhow::Result<()> {
    let file_size = fs::metadata(&file)
        .with_context(|| format!("reading metadata of {:?}", file))?
        .len();
    let mut src = BufReader::new(File::open(&file)?);
    let declared = read_header(&mut src).context("reading container header")?;

    println!("=== pbz container: {:?} ===", file);
    println!();
    println!("  declared blocks : {}", declared);
    println!("  file on disk    : {}", human_bytes(file_size));

    if show_blocks {
        println!();
        println!("  {:>8}  {:>14}  {:>12}", "block", "file offset", "record");
        println!("  {}", "-".repeat(38));
    }

    let mut offset = pbz_core::framing::HEADER_LEN as u64;
    let mut found = 0u64;
    let mut payload_total = 0u64;
    let mut largest = 0usize;
    // Keep walking past the declared count so extra records are reported too.
    while let Some(record) = read_record(&mut src).context("reading container records")? {
        if show_blocks {
            println!(
                "  {:>8}  {:>14}  {:>12}",
                found,
                offset,
                human_bytes(record.len() as u64)
            );
        }
        offset += (LENGTH_PREFIX + record.len()) as u64;
        payload_total += record.len() as u64;
        largest = largest.max(record.len());
        found += 1;
    }

    println!();
    println!("  records found   : {}", found);
    println!("  payload bytes   : {}", human_bytes(payload_total));
    println!("  largest record  : {}", human_bytes(largest as u64));
    if found != declared {
        anyhow::bail!(
            "container declares {} blocks but holds {} records",
            declared,
            found
        );
    }
    Ok(())
}

fn file_digest(path: &Path) -> anyhow::Result<u64> {
    let mut src = File::open(path).with_context(|| format!("opening {:?}", path))?;
    let mut hasher = Xxh3::new();
    let mut buf = vec![0u8; 1 << 16];
    loop {
        let n = src.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.digest())
}

fn run_verify(first: PathBuf, second: PathBuf) -> anyhow::Result<()> {
    let a = file_digest(&first)?;
    let b = file_digest(&second)?;
    println!("  {:016x}  {:?}", a, first);
    println!("  {:016x}  {:?}", b, second);
    if a != b {
        anyhow::bail!("files differ");
    }
    println!("files are identical");
    Ok(())
}

// ── Entry point ────────────────────────────────────────────────────────────

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    match cli.command {
        Commands::Compress {
            input,
            output,
            args,
        } => run_compress(input, output, args),
        Commands::Decompress {
            input,
            output,
            args,
        } => run_decompress(input, output, args),
        Commands::Inspect { file, blocks } => run_inspect(file, blocks),
        Commands::Verify { first, second } => run_verify(first, second),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn human_bytes_picks_units() {
        assert_eq!(human_bytes(512), "512 B");
        assert_eq!(human_bytes(1536), "1.50 KiB");
        assert_eq!(human_bytes(3 * 1024 * 1024), "3.00 MiB");
        assert_eq!(human_bytes(1 << 50), "1024.00 TiB");
    }

    #[test]
    fn output_checks() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in");
        fs::write(&input, b"x").unwrap();

        assert!(validate_output(&input, Path::new(""), false).is_err());
        assert!(validate_output(&input, &input, false).is_err());
        assert!(validate_output(&input, &input, true).is_err());
        assert!(validate_output(&input, &dir.path().join("new"), false).is_ok());
    }

    #[test]
    fn input_must_be_a_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(validate_input(dir.path()).is_err());
        assert!(validate_input(&dir.path().join("missing")).is_err());
    }
}
