//! Parallel compression phase.
//!
//! Each planned chunk is an independent unit of work. Workers run on the
//! rayon pool that is current when these functions are called, keep one
//! codec worker and one read buffer per thread, and place their record in
//! the slot matching the chunk index, so the output order never depends on
//! which worker finishes first.

use std::io::Read;
use std::thread;

use crossbeam_channel::bounded;
use log::debug;
use rayon::prelude::*;

use crate::codec::{Codec, CodecError, CodecWorker};
use crate::container::ChunkRecord;
use crate::error::{Error, Result};
use crate::plan::{ChunkPlan, PlanEntry};
use crate::source::{read_up_to, ChunkSource};
use crate::sync::{Aborted, CancelToken, FailFast};

/// Called with the original size of every chunk once it is compressed.
pub type Progress<'a> = Option<&'a (dyn Fn(u64) + Send + Sync)>;

/// Takes the value out of `slot`, creating it first if needed. Callers put
/// it back once the chunk is done.
pub(crate) fn take_or_init<T>(
    slot: &mut Option<T>,
    init: impl FnOnce() -> Result<T>,
) -> Result<T> {
    match slot.take() {
        Some(value) => Ok(value),
        None => init(),
    }
}

fn compress_one<W: CodecWorker, C: Codec>(
    codec: &C,
    worker: &mut W,
    plan: &ChunkPlan,
    entry: &PlanEntry,
    data: &[u8],
) -> Result<ChunkRecord> {
    if data.len() < entry.len && !plan.is_final(entry) {
        return Err(Error::ShortRead {
            index: entry.index,
            expected: entry.len,
            actual: data.len(),
        });
    }

    let compressed = worker.compress(data).map_err(|source| Error::Compression {
        index: entry.index,
        source,
    })?;
    let bound = codec.compress_bound(data.len());
    if compressed.len() > bound {
        return Err(Error::Compression {
            index: entry.index,
            source: CodecError::new(format!(
                "produced {} bytes, bound is {bound}",
                compressed.len()
            )),
        });
    }

    debug!(
        "chunk {}: {} -> {} bytes",
        entry.index,
        data.len(),
        compressed.len()
    );
    Ok(ChunkRecord {
        index: entry.index,
        // The final chunk records what was actually read, not the nominal length.
        original_len: data.len() as u64,
        data: compressed,
        checksum: Some(crc32fast::hash(data)),
    })
}

/// Compresses every chunk of `plan`, reading them from `source`.
///
/// Blocks until all workers have finished. The first failing chunk aborts
/// the phase and is the error returned.
pub fn compress_chunks<S: ChunkSource, C: Codec>(
    source: &S,
    plan: &ChunkPlan,
    codec: &C,
    cancel: &CancelToken,
    progress: Progress<'_>,
) -> Result<Vec<ChunkRecord>> {
    let guard = FailFast::new(cancel);

    let outcome: std::result::Result<Vec<ChunkRecord>, Aborted> = (0..plan.len())
        .into_par_iter()
        .map_init(
            || (None::<S::Reader>, None::<C::Worker>, Vec::new()),
            |(reader_slot, worker_slot, buf), index| {
                guard.run(|| {
                    let entry = plan.entry(index).ok_or_else(|| {
                        Error::format(format!("chunk {index} is outside the plan"))
                    })?;

                    let mut reader = take_or_init(reader_slot, || {
                        source.open_reader().map_err(|e| Error::ChunkRead {
                            index,
                            offset: entry.offset,
                            source: e,
                        })
                    })?;
                    source
                        .read_chunk(&mut reader, &entry, buf)
                        .map_err(|e| Error::ChunkRead {
                            index,
                            offset: entry.offset,
                            source: e,
                        })?;
                    *reader_slot = Some(reader);

                    let mut worker = take_or_init(worker_slot, || {
                        codec
                            .worker()
                            .map_err(|source| Error::Compression { index, source })
                    })?;
                    let record = compress_one(codec, &mut worker, plan, &entry, buf)?;
                    *worker_slot = Some(worker);

                    if let Some(progress) = progress {
                        progress(record.original_len);
                    }
                    Ok(record)
                })
            },
        )
        .collect();

    guard.finish(outcome)
}

/// Compresses `plan` from a plain sequential reader.
///
/// A dedicated thread reads the chunks in order and hands each one, as an
/// owned buffer, to the worker pool over a bounded channel. The input needs
/// no seeking and no lock.
pub fn compress_streamed<R: Read + Send, C: Codec>(
    mut input: R,
    plan: &ChunkPlan,
    codec: &C,
    cancel: &CancelToken,
    progress: Progress<'_>,
) -> Result<Vec<ChunkRecord>> {
    let guard = FailFast::new(cancel);
    // Keep a couple of chunks queued per worker, no more.
    let (chunk_tx, chunk_rx) =
        bounded::<(PlanEntry, Vec<u8>)>(rayon::current_num_threads() * 2);

    let outcome = thread::scope(|s| {
        let guard = &guard;
        s.spawn(move || {
            for entry in plan.iter() {
                if guard.is_aborted() {
                    break;
                }
                if cancel.is_cancelled() {
                    guard.record(Error::Cancelled);
                    break;
                }
                let mut buf = Vec::new();
                if let Err(e) = read_up_to(&mut input, entry.len, &mut buf) {
                    guard.record(Error::ChunkRead {
                        index: entry.index,
                        offset: entry.offset,
                        source: e,
                    });
                    break;
                }
                if chunk_tx.send((entry, buf)).is_err() {
                    // Workers stopped early.
                    break;
                }
            }
        });

        chunk_rx
            .into_iter()
            .par_bridge()
            .map_init(
                || None::<C::Worker>,
                |worker_slot, (entry, buf)| {
                    guard.run(|| {
                        let mut worker = take_or_init(worker_slot, || {
                            codec.worker().map_err(|source| Error::Compression {
                                index: entry.index,
                                source,
                            })
                        })?;
                        let record = compress_one(codec, &mut worker, plan, &entry, &buf)?;
                        *worker_slot = Some(worker);

                        if let Some(progress) = progress {
                            progress(record.original_len);
                        }
                        Ok(record)
                    })
                },
            )
            .collect::<std::result::Result<Vec<ChunkRecord>, Aborted>>()
    });

    let records = guard.finish(outcome)?;

    // Completion order is arbitrary here; put every record in its own slot.
    let mut slots: Vec<Option<ChunkRecord>> = vec![None; plan.len()];
    for record in records {
        let index = record.index;
        match slots.get_mut(index) {
            Some(slot) if slot.is_none() => *slot = Some(record),
            _ => return Err(Error::format(format!("chunk {index} produced twice"))),
        }
    }
    slots
        .into_iter()
        .enumerate()
        .map(|(index, slot)| {
            slot.ok_or_else(|| Error::format(format!("chunk {index} was never produced")))
        })
        .collect()
}
