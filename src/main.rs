//! pchunk - parallel chunked compressor.
//!
//! Splits a file into fixed-size chunks, compresses every chunk on its own
//! across all cores, and stores the results in a container that records
//! each chunk's original and compressed size. Decompression runs one worker
//! per chunk as well and writes the chunks back in order.
//!
//! # Usage
//!
//! ```bash
//! # Compress with 1 MiB chunks and zstd level 3
//! pchunk compress input.dat
//!
//! # 4 MiB chunks, zlib, layout without the integrity trailer
//! pchunk compress input.dat -o input.pchunk --chunk-size 4M --codec zlib --legacy
//!
//! # Restore, limiting the pool to 4 threads
//! pchunk -j 4 decompress input.dat.pchunk
//!
//! # Check a container without writing anything
//! pchunk test input.dat.pchunk
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use env_logger::Builder;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::LevelFilter;
use parallel_chunk::{CodecKind, Engine, EngineConfig, SourceMode, Summary};

mod writer;
use writer::OutputWriter;

const EXTENSION: &str = "pchunk";

/// Command-line arguments for pchunk.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Number of worker threads (default = number of logical cores)
    #[arg(short = 'j', long, global = true)]
    jobs: Option<usize>,

    /// Level of logging to use
    #[arg(long, default_value = "warn", global = true)]
    loglevel: LevelFilter,

    /// Hide the progress bar and the summary line
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compress a file into a chunk container
    Compress(CompressArgs),
    /// Restore the original file from a chunk container
    Decompress(DecompressArgs),
    /// Decompress and verify a container without writing output
    Test(TestArgs),
}

#[derive(Args, Debug)]
struct CompressArgs {
    /// Input file
    input: PathBuf,

    /// Output file (optional, defaults to the input path with .pchunk appended)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Chunk size in bytes; K, M and G suffixes are powers of 1024
    #[arg(long, default_value = "1M", value_parser = parse_size)]
    chunk_size: usize,

    #[arg(long, value_enum, default_value_t = CodecArg::Zstd)]
    codec: CodecArg,

    /// Compression level (default = 3 for zstd, 1 for zlib)
    #[arg(short = 'z', long, allow_negative_numbers = true)]
    level: Option<i32>,

    /// How workers read their chunk from the input
    #[arg(long, value_enum, default_value_t = SourceArg::Mapped)]
    source: SourceArg,

    /// Omit the magic/version/checksum trailer (plain count + records layout)
    #[arg(long)]
    legacy: bool,

    /// Overwrite the output file if it exists
    #[arg(short, long)]
    force: bool,
}

#[derive(Args, Debug)]
struct DecompressArgs {
    /// Input container
    input: PathBuf,

    /// Output file (optional, defaults to the input path without .pchunk)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Codec for containers without trailer; a trailer always takes precedence
    #[arg(long, value_enum, default_value_t = CodecArg::Zstd)]
    codec: CodecArg,

    /// Overwrite the output file if it exists
    #[arg(short, long)]
    force: bool,
}

#[derive(Args, Debug)]
struct TestArgs {
    /// Input container
    input: PathBuf,

    /// Codec for containers without trailer; a trailer always takes precedence
    #[arg(long, value_enum, default_value_t = CodecArg::Zstd)]
    codec: CodecArg,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum CodecArg {
    Zstd,
    Zlib,
}

impl From<CodecArg> for CodecKind {
    fn from(arg: CodecArg) -> Self {
        match arg {
            CodecArg::Zstd => CodecKind::Zstd,
            CodecArg::Zlib => CodecKind::Zlib,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum SourceArg {
    /// Memory-map the input
    Mapped,
    /// One file handle per worker thread
    Handles,
    /// One shared file handle behind a lock
    Locked,
    /// One reader thread feeding the workers
    Streamed,
}

impl From<SourceArg> for SourceMode {
    fn from(arg: SourceArg) -> Self {
        match arg {
            SourceArg::Mapped => SourceMode::Mapped,
            SourceArg::Handles => SourceMode::Handles,
            SourceArg::Locked => SourceMode::Locked,
            SourceArg::Streamed => SourceMode::Streamed,
        }
    }
}

/// Parses `4096`, `64K`, `1M`, `2G`.
fn parse_size(s: &str) -> Result<usize, String> {
    let s = s.trim();
    let (digits, shift) = match s.chars().last().map(|c| c.to_ascii_uppercase()) {
        Some('K') => (&s[..s.len() - 1], 10),
        Some('M') => (&s[..s.len() - 1], 20),
        Some('G') => (&s[..s.len() - 1], 30),
        _ => (s, 0),
    };
    let value: usize = digits
        .parse()
        .map_err(|_| format!("invalid size '{s}'"))?;
    value
        .checked_mul(1usize << shift)
        .filter(|&size| size > 0)
        .ok_or_else(|| format!("size '{s}' is out of range"))
}

fn compressed_path(input: &Path) -> PathBuf {
    let mut name = input.as_os_str().to_owned();
    name.push(".");
    name.push(EXTENSION);
    PathBuf::from(name)
}

fn decompressed_path(input: &Path) -> PathBuf {
    if input.extension().and_then(|e| e.to_str()) == Some(EXTENSION) {
        input.with_extension("")
    } else {
        let mut name = input.as_os_str().to_owned();
        name.push(".out");
        PathBuf::from(name)
    }
}

fn progress_bar(total: Option<u64>, quiet: bool) -> Result<ProgressBar> {
    if quiet {
        return Ok(ProgressBar::hidden());
    }
    let (pb, template) = match total {
        Some(len) => (
            ProgressBar::new(len),
            "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({eta})",
        ),
        None => (
            ProgressBar::no_length(),
            "{spinner:.green} [{elapsed_precise}] {bytes} ({binary_bytes_per_sec})",
        ),
    };
    pb.set_draw_target(ProgressDrawTarget::stderr_with_hz(5));
    pb.set_style(ProgressStyle::with_template(template).context("Invalid progress template")?);
    Ok(pb)
}

fn build_engine(config: EngineConfig, pb: &ProgressBar) -> Result<Engine> {
    let pb = pb.clone();
    let engine = Engine::new(config)
        .context("Failed to set up the engine")?
        .with_progress(Arc::new(move |bytes| pb.inc(bytes)));
    Ok(engine)
}

fn report(quiet: bool, phase: &str, summary: &Summary) {
    if quiet {
        return;
    }
    let ratio = if summary.original_bytes == 0 {
        0.0
    } else {
        summary.container_bytes as f64 / summary.original_bytes as f64
    };
    eprintln!(
        "[{phase}] {} chunks, {} -> {} bytes ({:.1}%) in {:.2?}",
        summary.chunks,
        summary.original_bytes,
        summary.container_bytes,
        ratio * 100.0,
        summary.elapsed
    );
}

fn base_config(jobs: Option<usize>, codec: CodecArg) -> EngineConfig {
    let mut config = EngineConfig::default().codec(codec.into());
    config.jobs = jobs;
    config
}

fn compress(cli: &Cli, args: &CompressArgs) -> Result<()> {
    let mut config = base_config(cli.jobs, args.codec)
        .chunk_size(args.chunk_size)
        .source(args.source.into())
        .write_trailer(!args.legacy);
    config.level = args.level;

    let input_len = std::fs::metadata(&args.input)
        .with_context(|| format!("Failed to open input file {}", args.input.display()))?
        .len();
    let pb = progress_bar(Some(input_len), cli.quiet)?;
    let engine = build_engine(config, &pb)?;

    let output_path = args
        .output
        .clone()
        .unwrap_or_else(|| compressed_path(&args.input));
    let mut out = OutputWriter::create(&output_path, args.force)?;
    let summary = engine
        .compress_file(&args.input, &mut out)
        .with_context(|| format!("Failed to compress {}", args.input.display()))?;
    out.finish()?;
    pb.finish_and_clear();

    report(cli.quiet, "compress", &summary);
    Ok(())
}

fn decompress(cli: &Cli, args: &DecompressArgs) -> Result<()> {
    let pb = progress_bar(None, cli.quiet)?;
    let engine = build_engine(base_config(cli.jobs, args.codec), &pb)?;

    let output_path = args
        .output
        .clone()
        .unwrap_or_else(|| decompressed_path(&args.input));
    let mut out = OutputWriter::create(&output_path, args.force)?;
    let summary = engine
        .decompress_file(&args.input, &mut out)
        .with_context(|| format!("Failed to decompress {}", args.input.display()))?;
    out.finish()?;
    pb.finish_and_clear();

    report(cli.quiet, "decompress", &summary);
    Ok(())
}

fn test(cli: &Cli, args: &TestArgs) -> Result<()> {
    let pb = progress_bar(None, cli.quiet)?;
    let engine = build_engine(base_config(cli.jobs, args.codec), &pb)?;
    let summary = engine
        .verify_file(&args.input)
        .with_context(|| format!("{} failed verification", args.input.display()))?;
    pb.finish_and_clear();

    report(cli.quiet, "test", &summary);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    Builder::new().filter_level(cli.loglevel).init();

    match &cli.command {
        Command::Compress(args) => compress(&cli, args),
        Command::Decompress(args) => decompress(&cli, args),
        Command::Test(args) => test(&cli, args),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parallel_chunk::DEFAULT_CHUNK_SIZE;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("4096"), Ok(4096));
        assert_eq!(parse_size("64K"), Ok(64 * 1024));
        assert_eq!(parse_size("1m"), Ok(DEFAULT_CHUNK_SIZE));
        assert_eq!(parse_size("2G"), Ok(2 << 30));
        assert!(parse_size("0").is_err());
        assert!(parse_size("M").is_err());
        assert!(parse_size("12X").is_err());
    }

    #[test]
    fn test_default_paths() {
        assert_eq!(
            compressed_path(Path::new("dir/input.dat")),
            PathBuf::from("dir/input.dat.pchunk")
        );
        assert_eq!(
            decompressed_path(Path::new("dir/input.dat.pchunk")),
            PathBuf::from("dir/input.dat")
        );
        assert_eq!(
            decompressed_path(Path::new("archive.bin")),
            PathBuf::from("archive.bin.out")
        );
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from([
            "pchunk", "-j", "2", "compress", "in.dat", "--chunk-size", "64K", "--codec", "zlib",
            "--source", "streamed", "--legacy",
        ])
        .unwrap();
        assert_eq!(cli.jobs, Some(2));
        match cli.command {
            Command::Compress(args) => {
                assert_eq!(args.chunk_size, 64 * 1024);
                assert!(matches!(args.codec, CodecArg::Zlib));
                assert!(matches!(args.source, SourceArg::Streamed));
                assert!(args.legacy);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
