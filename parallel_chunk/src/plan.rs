//! Mapping of a source of known length onto fixed-size chunks.
//!
//! Chunk `i` covers `[i * chunk_size, min((i + 1) * chunk_size, len))`.
//! Entries are computed on demand, so planning a very large file costs
//! nothing until the engine walks it.

use crate::config::MAX_CHUNK_SIZE;
use crate::error::{Error, Result};

/// One unit of parallel work: a contiguous byte range of the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanEntry {
    pub index: usize,
    pub offset: u64,
    /// Bytes to read. Equal to the chunk size except for the final chunk.
    pub len: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    source_len: u64,
    chunk_size: usize,
    num_chunks: usize,
}

impl ChunkPlan {
    pub fn new(source_len: u64, chunk_size: usize) -> Result<Self> {
        if chunk_size == 0 || chunk_size > MAX_CHUNK_SIZE {
            return Err(Error::Config(format!(
                "chunk size must be between 1 and {MAX_CHUNK_SIZE} bytes, got {chunk_size}"
            )));
        }
        let num_chunks = usize::try_from(source_len.div_ceil(chunk_size as u64))
            .map_err(|_| Error::Config(format!("{source_len} bytes is too many chunks")))?;

        Ok(Self {
            source_len,
            chunk_size,
            num_chunks,
        })
    }

    pub fn len(&self) -> usize {
        self.num_chunks
    }

    pub fn is_empty(&self) -> bool {
        self.num_chunks == 0
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn source_len(&self) -> u64 {
        self.source_len
    }

    pub fn entry(&self, index: usize) -> Option<PlanEntry> {
        (index < self.num_chunks).then(|| self.entry_at(index))
    }

    fn entry_at(&self, index: usize) -> PlanEntry {
        let offset = index as u64 * self.chunk_size as u64;
        let len = (self.source_len - offset).min(self.chunk_size as u64) as usize;
        PlanEntry { index, offset, len }
    }

    /// Whether `entry` is the last chunk, the only one allowed to come up short.
    pub fn is_final(&self, entry: &PlanEntry) -> bool {
        entry.index + 1 == self.num_chunks
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = PlanEntry> + '_ {
        (0..self.num_chunks).map(move |i| self.entry_at(i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_partition(len: u64, chunk_size: usize) {
        let plan = ChunkPlan::new(len, chunk_size).unwrap();
        assert_eq!(plan.len() as u64, len.div_ceil(chunk_size as u64));

        let mut expected_offset = 0;
        let mut total = 0u64;
        for (i, entry) in plan.iter().enumerate() {
            assert_eq!(entry.index, i);
            assert_eq!(entry.offset, expected_offset, "gap or overlap at chunk {i}");
            assert!(entry.len > 0 && entry.len <= chunk_size);
            if !plan.is_final(&entry) {
                assert_eq!(entry.len, chunk_size);
            }
            assert_eq!(plan.entry(i), Some(entry));
            expected_offset += entry.len as u64;
            total += entry.len as u64;
        }
        assert_eq!(total, len);
        assert_eq!(plan.entry(plan.len()), None);
    }

    #[test]
    fn test_partition_sweep() {
        for chunk_size in [1, 2, 3, 7, 16, 1000] {
            for len in 0..200u64 {
                assert_partition(len, chunk_size);
            }
        }
        assert_partition(10 * 1024 * 1024 + 5, 1024 * 1024);
    }

    #[test]
    fn test_empty_source_has_no_chunks() {
        let plan = ChunkPlan::new(0, 1024).unwrap();
        assert!(plan.is_empty());
        assert_eq!(plan.iter().count(), 0);
    }

    #[test]
    fn test_exact_multiple_has_no_short_chunk() {
        let plan = ChunkPlan::new(3 * 1024 * 1024, 1024 * 1024).unwrap();
        assert_eq!(plan.len(), 3);
        let last = plan.entry(2).unwrap();
        assert_eq!(last.offset, 2 * 1024 * 1024);
        assert_eq!(last.len, 1024 * 1024);
        assert!(plan.is_final(&last));
    }

    #[test]
    fn test_one_byte_past_chunk_size() {
        let plan = ChunkPlan::new(1025, 1024).unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(
            plan.entry(1),
            Some(PlanEntry {
                index: 1,
                offset: 1024,
                len: 1
            })
        );
    }

    #[test]
    fn test_rejects_bad_chunk_size() {
        assert!(matches!(ChunkPlan::new(10, 0), Err(Error::Config(_))));
        assert!(matches!(
            ChunkPlan::new(10, MAX_CHUNK_SIZE + 1),
            Err(Error::Config(_))
        ));
    }
}
