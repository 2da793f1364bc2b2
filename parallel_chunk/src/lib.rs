//! Parallel chunked compression.
//!
//! A file is split into fixed-size chunks, every chunk is compressed on its
//! own by a pool of workers, and the results are written into a container
//! that records each chunk's original and compressed size. Reading reverses
//! the process, again one worker per chunk, and writes the chunks back in
//! index order.
//!
//! ```no_run
//! use parallel_chunk::{Engine, EngineConfig};
//!
//! let engine = Engine::new(EngineConfig::default())?;
//! let mut container = Vec::new();
//! engine.compress_file("input.dat", &mut container)?;
//!
//! let mut restored = Vec::new();
//! engine.decompress_reader(&container[..], &mut restored)?;
//! # Ok::<(), parallel_chunk::Error>(())
//! ```

pub mod codec;
pub mod compress;
pub mod config;
pub mod container;
pub mod decompress;
pub mod engine;
pub mod error;
pub mod plan;
pub mod source;
pub mod sync;

pub use codec::{BuiltinCodec, Codec, CodecError, CodecKind, CodecWorker, ZlibCodec, ZstdCodec};
pub use config::{EngineConfig, SourceMode, DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE};
pub use container::{read_container, write_container, ChunkRecord, Container, Limits};
pub use engine::{Engine, ProgressFn, Summary};
pub use error::{Error, ErrorKind, Result};
pub use plan::{ChunkPlan, PlanEntry};
pub use source::{ChunkSource, MappedSource, PathSource, SharedSource};
pub use sync::CancelToken;

#[cfg(test)]
static INIT: std::sync::Once = std::sync::Once::new();

/// Sets up `env_logger` for tests, so `RUST_LOG` shows the engine's logging.
#[cfg(test)]
pub(crate) fn init_logging() {
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}
