//! Parallel decompression phase.

use std::io::Write;

use log::debug;
use rayon::prelude::*;

use crate::codec::{Codec, CodecWorker};
use crate::compress::{take_or_init, Progress};
use crate::container::ChunkRecord;
use crate::error::{Error, Result};
use crate::sync::{Aborted, CancelToken, FailFast};

fn decompress_one<W: CodecWorker>(worker: &mut W, record: &ChunkRecord) -> Result<Vec<u8>> {
    let index = record.index;
    let expected_len = usize::try_from(record.original_len).map_err(|_| {
        Error::format(format!(
            "chunk {index} is too large for this platform ({} bytes)",
            record.original_len
        ))
    })?;

    let data = worker
        .decompress(&record.data, expected_len)
        .map_err(|source| Error::Decompression { index, source })?;

    if let Some(expected) = record.checksum {
        let actual = crc32fast::hash(&data);
        if actual != expected {
            return Err(Error::ChecksumMismatch {
                index,
                expected,
                actual,
            });
        }
    }

    debug!("chunk {index}: {} -> {} bytes", record.data.len(), data.len());
    Ok(data)
}

/// Decompresses every record; slot `i` of the result holds chunk `i`.
///
/// Records only need shared access, so workers never contend on input.
/// Blocks until every worker has finished; the first failing chunk aborts
/// the phase and is the error returned.
pub fn decompress_chunks<C: Codec>(
    records: &[ChunkRecord],
    codec: &C,
    cancel: &CancelToken,
    progress: Progress<'_>,
) -> Result<Vec<Vec<u8>>> {
    let guard = FailFast::new(cancel);

    let outcome: std::result::Result<Vec<Vec<u8>>, Aborted> = records
        .par_iter()
        .enumerate()
        .map_init(
            || None::<C::Worker>,
            |worker_slot, (slot, record)| {
                guard.run(|| {
                    if record.index != slot {
                        return Err(Error::format(format!(
                            "record for chunk {} found in slot {slot}",
                            record.index
                        )));
                    }
                    let mut worker = take_or_init(worker_slot, || {
                        codec.worker().map_err(|source| Error::Decompression {
                            index: record.index,
                            source,
                        })
                    })?;
                    let data = decompress_one(&mut worker, record)?;
                    *worker_slot = Some(worker);

                    if let Some(progress) = progress {
                        progress(data.len() as u64);
                    }
                    Ok(data)
                })
            },
        )
        .collect();

    guard.finish(outcome)
}

/// Writes the decompressed chunks in index order. Single writer, no locking.
pub fn write_chunks<W: Write>(mut out: W, chunks: &[Vec<u8>]) -> Result<u64> {
    let mut written = 0u64;
    for chunk in chunks {
        out.write_all(chunk)?;
        written += chunk.len() as u64;
    }
    out.flush()?;
    Ok(written)
}
