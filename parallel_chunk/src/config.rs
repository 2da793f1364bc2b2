//! Engine configuration.

use crate::codec::CodecKind;
use crate::error::{Error, Result};

/// Default chunk size: 1 MiB.
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Largest chunk the engine will plan and the container reader will accept.
pub const MAX_CHUNK_SIZE: usize = 1024 * 1024 * 1024;

/// How compression workers obtain the bytes of their chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceMode {
    /// Memory-map the input once and copy each chunk out of the mapping.
    #[default]
    Mapped,
    /// Every worker thread opens its own read-only handle to the input.
    Handles,
    /// A single shared handle; seek and read happen under one mutex.
    Locked,
    /// One reader thread reads chunks in order and hands owned buffers to
    /// the workers through a bounded channel.
    Streamed,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub chunk_size: usize,
    /// Worker threads. `None` uses rayon's default (one per logical core).
    pub jobs: Option<usize>,
    pub codec: CodecKind,
    /// Codec level. `None` picks the codec's own default.
    pub level: Option<i32>,
    pub source: SourceMode,
    /// Append the magic/version/checksum trailer after the last record.
    pub write_trailer: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            jobs: None,
            codec: CodecKind::Zstd,
            level: None,
            source: SourceMode::Mapped,
            write_trailer: true,
        }
    }
}

impl EngineConfig {
    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn jobs(mut self, jobs: usize) -> Self {
        self.jobs = Some(jobs);
        self
    }

    pub fn codec(mut self, codec: CodecKind) -> Self {
        self.codec = codec;
        self
    }

    pub fn level(mut self, level: i32) -> Self {
        self.level = Some(level);
        self
    }

    pub fn source(mut self, source: SourceMode) -> Self {
        self.source = source;
        self
    }

    pub fn write_trailer(mut self, write_trailer: bool) -> Self {
        self.write_trailer = write_trailer;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 || self.chunk_size > MAX_CHUNK_SIZE {
            return Err(Error::Config(format!(
                "chunk size must be between 1 and {MAX_CHUNK_SIZE} bytes, got {}",
                self.chunk_size
            )));
        }
        if self.jobs == Some(0) {
            return Err(Error::Config("at least one worker thread is required".into()));
        }
        if let Some(level) = self.level {
            let range = self.codec.level_range();
            if !range.contains(&level) {
                return Err(Error::Config(format!(
                    "{} level must be in {}..={}, got {level}",
                    self.codec.name(),
                    range.start(),
                    range.end()
                )));
            }
        }
        Ok(())
    }
}
