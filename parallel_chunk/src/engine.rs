//! File-level entry points tying planner, engines and container together.

use std::fs::File;
use std::io::{BufReader, Read, Seek, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{info, warn};
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::codec::{BuiltinCodec, Codec};
use crate::compress::{compress_chunks, compress_streamed};
use crate::config::{EngineConfig, SourceMode};
use crate::container::{read_container, write_container, ChunkRecord, Container, Limits};
use crate::decompress::{decompress_chunks, write_chunks};
use crate::error::Result;
use crate::plan::ChunkPlan;
use crate::source::{ChunkSource, MappedSource, PathSource, SharedSource};
use crate::sync::CancelToken;

pub type ProgressFn = Arc<dyn Fn(u64) + Send + Sync>;

/// Outcome of one compress or decompress run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub chunks: usize,
    pub original_bytes: u64,
    pub container_bytes: u64,
    pub elapsed: Duration,
}

pub struct Engine {
    config: EngineConfig,
    codec: BuiltinCodec,
    pool: ThreadPool,
    cancel: CancelToken,
    progress: Option<ProgressFn>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        // A dedicated pool keeps the engine off the caller's global pool.
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.jobs.unwrap_or(0))
            .thread_name(|i| format!("pchunk-worker-{i}"))
            .build()?;
        let codec = BuiltinCodec::new(config.codec, config.level);

        Ok(Self {
            config,
            codec,
            pool,
            cancel: CancelToken::new(),
            progress: None,
        })
    }

    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Cancelling the returned token makes the running phase fail with
    /// `Error::Cancelled` once in-flight chunks finish.
    ///
    /// The token is one-shot: it cannot be reset, so every later phase run
    /// on this engine fails with `Error::Cancelled` too. Build a new engine
    /// to start over.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    fn progress(&self) -> Option<&(dyn Fn(u64) + Send + Sync)> {
        self.progress.as_deref()
    }

    pub fn plan(&self, source_len: u64) -> Result<ChunkPlan> {
        ChunkPlan::new(source_len, self.config.chunk_size)
    }

    /// Compresses all chunks of `source` with `codec` on the engine's pool.
    pub fn compress_records<S: ChunkSource, C: Codec>(
        &self,
        source: &S,
        codec: &C,
    ) -> Result<Vec<ChunkRecord>> {
        let plan = self.plan(source.len())?;
        self.pool
            .install(|| compress_chunks(source, &plan, codec, &self.cancel, self.progress()))
    }

    /// Compresses `len` bytes read sequentially from `input`.
    pub fn compress_streamed<R: Read + Send, C: Codec>(
        &self,
        input: R,
        len: u64,
        codec: &C,
    ) -> Result<Vec<ChunkRecord>> {
        let plan = self.plan(len)?;
        self.pool
            .install(|| compress_streamed(input, &plan, codec, &self.cancel, self.progress()))
    }

    pub fn decompress_records<C: Codec>(
        &self,
        records: &[ChunkRecord],
        codec: &C,
    ) -> Result<Vec<Vec<u8>>> {
        self.pool
            .install(|| decompress_chunks(records, codec, &self.cancel, self.progress()))
    }

    fn write<W: Write>(
        &self,
        out: W,
        records: &[ChunkRecord],
        started: Instant,
    ) -> Result<Summary> {
        let trailer = self.config.write_trailer.then(|| self.codec.kind());
        let container_bytes = write_container(out, records, trailer)?;
        let summary = Summary {
            chunks: records.len(),
            original_bytes: records.iter().map(|r| r.original_len).sum(),
            container_bytes,
            elapsed: started.elapsed(),
        };
        info!(
            "compressed {} bytes into {} chunks ({} bytes) in {:.2?}",
            summary.original_bytes, summary.chunks, summary.container_bytes, summary.elapsed
        );
        Ok(summary)
    }

    /// Compresses the file at `path` into a container written to `out`,
    /// reading it the way the configured [`SourceMode`] says.
    pub fn compress_file<P: AsRef<Path>, W: Write>(&self, path: P, out: W) -> Result<Summary> {
        let started = Instant::now();
        let path = path.as_ref();
        let file = File::open(path)?;

        let records = match self.config.source {
            SourceMode::Mapped => {
                self.compress_records(&MappedSource::open(&file)?, &self.codec)?
            }
            SourceMode::Handles => {
                self.compress_records(&PathSource::open(path)?, &self.codec)?
            }
            SourceMode::Locked => {
                self.compress_records(&SharedSource::new(file)?, &self.codec)?
            }
            SourceMode::Streamed => {
                let len = file.metadata()?.len();
                self.compress_streamed(BufReader::new(file), len, &self.codec)?
            }
        };
        self.write(out, &records, started)
    }

    /// Compresses any seekable input through a single shared, locked handle.
    pub fn compress_reader<R: Read + Seek + Send, W: Write>(
        &self,
        input: R,
        out: W,
    ) -> Result<Summary> {
        let started = Instant::now();
        let records = self.compress_records(&SharedSource::new(input)?, &self.codec)?;
        self.write(out, &records, started)
    }

    /// Parses a container. `stream_len`, when known, bounds the declared
    /// chunk count.
    pub fn read_container<R: Read>(
        &self,
        input: R,
        stream_len: Option<u64>,
    ) -> Result<Container> {
        let mut limits = Limits::default();
        limits.stream_len = stream_len;
        let container = read_container(input, &limits)?;
        if !container.has_trailer() {
            warn!("container has no integrity trailer; chunk checksums are not verified");
        }
        Ok(container)
    }

    /// The codec that decodes `container`: the one its trailer names, or
    /// the configured one for containers without trailer.
    pub fn codec_for(&self, container: &Container) -> BuiltinCodec {
        match container.codec {
            Some(kind) if kind != self.codec.kind() => BuiltinCodec::new(kind, None),
            _ => self.codec,
        }
    }

    fn decompress_container<W: Write>(
        &self,
        container: &Container,
        out: W,
        container_bytes: u64,
        started: Instant,
    ) -> Result<Summary> {
        let chunks = self.decompress_records(&container.records, &self.codec_for(container))?;
        let original_bytes = write_chunks(out, &chunks)?;
        let summary = Summary {
            chunks: chunks.len(),
            original_bytes,
            container_bytes,
            elapsed: started.elapsed(),
        };
        info!(
            "decompressed {} chunks into {} bytes in {:.2?}",
            summary.chunks, summary.original_bytes, summary.elapsed
        );
        Ok(summary)
    }

    /// Reads a container from `input` and writes the reconstructed bytes to
    /// `out`. Nothing is written unless every chunk decompressed.
    pub fn decompress_reader<R: Read, W: Write>(&self, input: R, out: W) -> Result<Summary> {
        let started = Instant::now();
        let mut counted = CountingReader { inner: input, count: 0 };
        let container = self.read_container(&mut counted, None)?;
        self.decompress_container(&container, out, counted.count, started)
    }

    pub fn decompress_file<P: AsRef<Path>, W: Write>(&self, path: P, out: W) -> Result<Summary> {
        let started = Instant::now();
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        let container = self.read_container(BufReader::new(file), Some(len))?;
        self.decompress_container(&container, out, len, started)
    }

    /// Decompresses and checks every chunk of a container read from `input`
    /// without producing output.
    pub fn verify_reader<R: Read>(&self, input: R) -> Result<Summary> {
        self.decompress_reader(input, std::io::sink())
    }

    /// Like [`Engine::verify_reader`], with the declared chunk count also
    /// bounded by the file size.
    pub fn verify_file<P: AsRef<Path>>(&self, path: P) -> Result<Summary> {
        self.decompress_file(path, std::io::sink())
    }
}

struct CountingReader<R> {
    inner: R,
    count: u64,
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.count += n as u64;
        Ok(n)
    }
}
