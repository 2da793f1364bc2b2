//! Compression primitives used by the engines.
//!
//! The engines only see the [`Codec`] and [`CodecWorker`] traits. A codec
//! hands out one worker per pool thread; the worker owns whatever context the
//! primitive needs (for zstd, a bulk compressor and decompressor) and is
//! reused for every chunk that thread processes.

use std::fmt;
use std::io::{self, Read, Write};
use std::ops::RangeInclusive;

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use zstd::bulk::{Compressor, Decompressor};

/// Failure reported by a compression primitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecError(String);

impl CodecError {
    pub fn new(msg: impl Into<String>) -> Self {
        CodecError(msg.into())
    }

    pub fn length_mismatch(expected: usize, actual: usize) -> Self {
        CodecError(format!(
            "decompressed to {actual} bytes, expected {expected}"
        ))
    }
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for CodecError {}

impl From<io::Error> for CodecError {
    fn from(e: io::Error) -> Self {
        CodecError(e.to_string())
    }
}

/// Identifies a built-in codec. The numeric id is what the container
/// trailer records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CodecKind {
    #[default]
    Zstd,
    Zlib,
}

impl CodecKind {
    pub fn id(self) -> u32 {
        match self {
            CodecKind::Zstd => 0,
            CodecKind::Zlib => 1,
        }
    }

    pub fn from_id(id: u32) -> Option<Self> {
        match id {
            0 => Some(CodecKind::Zstd),
            1 => Some(CodecKind::Zlib),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CodecKind::Zstd => "zstd",
            CodecKind::Zlib => "zlib",
        }
    }

    pub fn default_level(self) -> i32 {
        match self {
            CodecKind::Zstd => 3,
            CodecKind::Zlib => 1,
        }
    }

    pub fn level_range(self) -> RangeInclusive<i32> {
        match self {
            CodecKind::Zstd => zstd::compression_level_range(),
            CodecKind::Zlib => 0..=9,
        }
    }
}

/// Factory for per-thread codec workers.
pub trait Codec: Sync {
    type Worker: CodecWorker;

    fn worker(&self) -> Result<Self::Worker, CodecError>;

    /// Worst-case compressed size for `len` input bytes.
    fn compress_bound(&self, len: usize) -> usize;

    fn kind(&self) -> CodecKind;
}

pub trait CodecWorker {
    fn compress(&mut self, input: &[u8]) -> Result<Vec<u8>, CodecError>;

    /// Must fail unless exactly `expected_len` bytes come out.
    fn decompress(&mut self, input: &[u8], expected_len: usize) -> Result<Vec<u8>, CodecError>;
}

#[derive(Debug, Clone, Copy)]
pub struct ZstdCodec {
    level: i32,
}

impl ZstdCodec {
    pub fn new(level: i32) -> Self {
        Self { level }
    }
}

impl Default for ZstdCodec {
    fn default() -> Self {
        Self::new(CodecKind::Zstd.default_level())
    }
}

pub struct ZstdWorker {
    compressor: Compressor<'static>,
    decompressor: Decompressor<'static>,
}

impl Codec for ZstdCodec {
    type Worker = ZstdWorker;

    fn worker(&self) -> Result<ZstdWorker, CodecError> {
        Ok(ZstdWorker {
            compressor: Compressor::new(self.level)?,
            decompressor: Decompressor::new()?,
        })
    }

    fn compress_bound(&self, len: usize) -> usize {
        zstd::zstd_safe::compress_bound(len)
    }

    fn kind(&self) -> CodecKind {
        CodecKind::Zstd
    }
}

impl CodecWorker for ZstdWorker {
    fn compress(&mut self, input: &[u8]) -> Result<Vec<u8>, CodecError> {
        Ok(self.compressor.compress(input)?)
    }

    fn decompress(&mut self, input: &[u8], expected_len: usize) -> Result<Vec<u8>, CodecError> {
        // Capacity is the exact expected size, so an oversized frame errors out.
        let out = self.decompressor.decompress(input, expected_len)?;
        if out.len() != expected_len {
            return Err(CodecError::length_mismatch(expected_len, out.len()));
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ZlibCodec {
    level: Compression,
}

impl ZlibCodec {
    pub fn new(level: i32) -> Self {
        Self {
            level: Compression::new(level.clamp(0, 9) as u32),
        }
    }
}

impl Default for ZlibCodec {
    fn default() -> Self {
        Self::new(CodecKind::Zlib.default_level())
    }
}

pub struct ZlibWorker {
    level: Compression,
}

impl Codec for ZlibCodec {
    type Worker = ZlibWorker;

    fn worker(&self) -> Result<ZlibWorker, CodecError> {
        Ok(ZlibWorker { level: self.level })
    }

    /// zlib's `compressBound`.
    fn compress_bound(&self, len: usize) -> usize {
        len + (len >> 12) + (len >> 14) + (len >> 25) + 13
    }

    fn kind(&self) -> CodecKind {
        CodecKind::Zlib
    }
}

impl CodecWorker for ZlibWorker {
    fn compress(&mut self, input: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut encoder = ZlibEncoder::new(Vec::with_capacity(input.len() / 2 + 64), self.level);
        encoder.write_all(input)?;
        Ok(encoder.finish()?)
    }

    fn decompress(&mut self, input: &[u8], expected_len: usize) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::with_capacity(expected_len);
        // One extra byte is enough to notice a stream that is too long.
        ZlibDecoder::new(input)
            .take(expected_len as u64 + 1)
            .read_to_end(&mut out)?;
        if out.len() != expected_len {
            return Err(CodecError::length_mismatch(expected_len, out.len()));
        }
        Ok(out)
    }
}

/// Runtime-selected built-in codec.
#[derive(Debug, Clone, Copy)]
pub enum BuiltinCodec {
    Zstd(ZstdCodec),
    Zlib(ZlibCodec),
}

impl BuiltinCodec {
    pub fn new(kind: CodecKind, level: Option<i32>) -> Self {
        let level = level.unwrap_or_else(|| kind.default_level());
        match kind {
            CodecKind::Zstd => BuiltinCodec::Zstd(ZstdCodec::new(level)),
            CodecKind::Zlib => BuiltinCodec::Zlib(ZlibCodec::new(level)),
        }
    }
}

pub enum BuiltinWorker {
    Zstd(ZstdWorker),
    Zlib(ZlibWorker),
}

impl Codec for BuiltinCodec {
    type Worker = BuiltinWorker;

    fn worker(&self) -> Result<BuiltinWorker, CodecError> {
        Ok(match self {
            BuiltinCodec::Zstd(c) => BuiltinWorker::Zstd(c.worker()?),
            BuiltinCodec::Zlib(c) => BuiltinWorker::Zlib(c.worker()?),
        })
    }

    fn compress_bound(&self, len: usize) -> usize {
        match self {
            BuiltinCodec::Zstd(c) => c.compress_bound(len),
            BuiltinCodec::Zlib(c) => c.compress_bound(len),
        }
    }

    fn kind(&self) -> CodecKind {
        match self {
            BuiltinCodec::Zstd(_) => CodecKind::Zstd,
            BuiltinCodec::Zlib(_) => CodecKind::Zlib,
        }
    }
}

impl CodecWorker for BuiltinWorker {
    fn compress(&mut self, input: &[u8]) -> Result<Vec<u8>, CodecError> {
        match self {
            BuiltinWorker::Zstd(w) => w.compress(input),
            BuiltinWorker::Zlib(w) => w.compress(input),
        }
    }

    fn decompress(&mut self, input: &[u8], expected_len: usize) -> Result<Vec<u8>, CodecError> {
        match self {
            BuiltinWorker::Zstd(w) => w.decompress(input, expected_len),
            BuiltinWorker::Zlib(w) => w.decompress(input, expected_len),
        }
    }
}
