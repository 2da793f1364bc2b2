//! Error type shared by every stage of the engine.

use std::io;

use crate::codec::CodecError;

pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an [`Error`], used by callers that only care
/// about which stage went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The input could not be read or the output could not be written.
    Io,
    /// The container is truncated or malformed.
    Format,
    /// The compression primitive rejected a chunk.
    Compression,
    /// The decompression primitive rejected a chunk, or its output did not
    /// match the recorded length or checksum.
    Decompression,
    /// The phase was cancelled through a [`CancelToken`](crate::CancelToken).
    Cancelled,
    /// The engine was configured with unusable parameters.
    Config,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to read chunk {index} at offset {offset}: {source}")]
    ChunkRead {
        index: usize,
        offset: u64,
        #[source]
        source: io::Error,
    },

    #[error("chunk {index} ended after {actual} of {expected} bytes (input changed while reading?)")]
    ShortRead {
        index: usize,
        expected: usize,
        actual: usize,
    },

    #[error("malformed container: {0}")]
    Format(String),

    #[error("compress phase: chunk {index} failed: {source}")]
    Compression {
        index: usize,
        #[source]
        source: CodecError,
    },

    #[error("decompress phase: chunk {index} failed: {source}")]
    Decompression {
        index: usize,
        #[source]
        source: CodecError,
    },

    #[error("decompress phase: chunk {index} checksum mismatch (expected {expected:#010x}, got {actual:#010x})")]
    ChecksumMismatch {
        index: usize,
        expected: u32,
        actual: u32,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

impl Error {
    pub(crate) fn format(msg: impl Into<String>) -> Self {
        Error::Format(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Io(_) | Error::ChunkRead { .. } | Error::ShortRead { .. } => ErrorKind::Io,
            Error::Format(_) => ErrorKind::Format,
            Error::Compression { .. } => ErrorKind::Compression,
            Error::Decompression { .. } | Error::ChecksumMismatch { .. } => {
                ErrorKind::Decompression
            }
            Error::Cancelled => ErrorKind::Cancelled,
            Error::Config(_) | Error::ThreadPool(_) => ErrorKind::Config,
        }
    }

    /// Index of the chunk that caused the failure, if the failure is tied to
    /// a single chunk.
    pub fn chunk_index(&self) -> Option<usize> {
        match self {
            Error::ChunkRead { index, .. }
            | Error::ShortRead { index, .. }
            | Error::Compression { index, .. }
            | Error::Decompression { index, .. }
            | Error::ChecksumMismatch { index, .. } => Some(*index),
            _ => None,
        }
    }
}
