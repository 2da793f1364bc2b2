//! Ways for compression workers to get at the bytes of their chunk.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use memmap2::{Mmap, MmapOptions};

use crate::plan::PlanEntry;

/// Random-access input shared by all workers of a compression phase.
///
/// `open_reader` is called once per worker thread; the returned state is
/// handed back on every `read_chunk` from that thread.
pub trait ChunkSource: Sync {
    type Reader;

    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn open_reader(&self) -> io::Result<Self::Reader>;

    /// Replaces `buf` with up to `entry.len` bytes starting at `entry.offset`.
    /// Fewer bytes means the source ended early.
    fn read_chunk(
        &self,
        reader: &mut Self::Reader,
        entry: &PlanEntry,
        buf: &mut Vec<u8>,
    ) -> io::Result<()>;
}

/// Reads at most `len` bytes, stopping early only at end of input.
pub(crate) fn read_up_to<R: Read + ?Sized>(
    reader: &mut R,
    len: usize,
    buf: &mut Vec<u8>,
) -> io::Result<()> {
    buf.clear();
    buf.reserve(len);
    reader.take(len as u64).read_to_end(buf)?;
    Ok(())
}

/// One handle shared by every worker. Seek and read are a single critical
/// section; compression happens after the lock is released.
pub struct SharedSource<R> {
    inner: Mutex<R>,
    len: u64,
}

impl<R: Read + Seek + Send> SharedSource<R> {
    pub fn new(mut inner: R) -> io::Result<Self> {
        let len = inner.seek(SeekFrom::End(0))?;
        inner.seek(SeekFrom::Start(0))?;
        Ok(Self {
            inner: Mutex::new(inner),
            len,
        })
    }
}

impl<R: Read + Seek + Send> ChunkSource for SharedSource<R> {
    type Reader = ();

    fn len(&self) -> u64 {
        self.len
    }

    fn open_reader(&self) -> io::Result<()> {
        Ok(())
    }

    fn read_chunk(&self, _: &mut (), entry: &PlanEntry, buf: &mut Vec<u8>) -> io::Result<()> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| io::Error::other("input lock poisoned"))?;
        inner.seek(SeekFrom::Start(entry.offset))?;
        read_up_to(&mut *inner, entry.len, buf)
    }
}

/// Every worker opens its own read-only handle, so there is no shared cursor.
pub struct PathSource {
    path: PathBuf,
    len: u64,
}

impl PathSource {
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let len = std::fs::metadata(&path)?.len();
        Ok(Self { path, len })
    }
}

impl ChunkSource for PathSource {
    type Reader = File;

    fn len(&self) -> u64 {
        self.len
    }

    fn open_reader(&self) -> io::Result<File> {
        File::open(&self.path)
    }

    fn read_chunk(&self, file: &mut File, entry: &PlanEntry, buf: &mut Vec<u8>) -> io::Result<()> {
        file.seek(SeekFrom::Start(entry.offset))?;
        read_up_to(file, entry.len, buf)
    }
}

/// Read-only memory map of the whole input.
pub struct MappedSource {
    // Zero-length files cannot be mapped on every platform.
    map: Option<Mmap>,
}

impl MappedSource {
    pub fn open(file: &File) -> io::Result<Self> {
        let len = file.metadata()?.len();
        let map = if len == 0 {
            None
        } else {
            // SAFETY: the map is read-only; callers must not truncate the file
            // while a compression phase is running.
            Some(unsafe { MmapOptions::new().map(file)? })
        };
        Ok(Self { map })
    }

    fn bytes(&self) -> &[u8] {
        self.map.as_deref().unwrap_or(&[])
    }
}

impl ChunkSource for MappedSource {
    type Reader = ();

    fn len(&self) -> u64 {
        self.bytes().len() as u64
    }

    fn open_reader(&self) -> io::Result<()> {
        Ok(())
    }

    fn read_chunk(&self, _: &mut (), entry: &PlanEntry, buf: &mut Vec<u8>) -> io::Result<()> {
        let data = self.bytes();
        let start = usize::try_from(entry.offset)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "offset out of range"))?
            .min(data.len());
        let end = start.saturating_add(entry.len).min(data.len());
        buf.clear();
        buf.extend_from_slice(&data[start..end]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};

    fn entry(index: usize, offset: u64, len: usize) -> PlanEntry {
        PlanEntry { index, offset, len }
    }

    fn check_source<S: ChunkSource>(source: &S, data: &[u8]) {
        assert_eq!(source.len(), data.len() as u64);
        let mut reader = source.open_reader().unwrap();
        let mut buf = Vec::new();

        source.read_chunk(&mut reader, &entry(1, 4, 4), &mut buf).unwrap();
        assert_eq!(buf, &data[4..8]);

        // Past the end only returns what exists.
        source.read_chunk(&mut reader, &entry(2, 8, 100), &mut buf).unwrap();
        assert_eq!(buf, &data[8..]);

        source.read_chunk(&mut reader, &entry(0, 0, 4), &mut buf).unwrap();
        assert_eq!(buf, &data[..4]);
    }

    #[test]
    fn test_sources_agree() {
        let data = b"0123456789abcdef".to_vec();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&data).unwrap();
        file.flush().unwrap();

        check_source(&SharedSource::new(Cursor::new(data.clone())).unwrap(), &data);
        check_source(&PathSource::open(file.path()).unwrap(), &data);
        check_source(&MappedSource::open(file.as_file()).unwrap(), &data);
    }

    #[test]
    fn test_empty_file_is_not_mapped() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let source = MappedSource::open(file.as_file()).unwrap();
        assert!(source.is_empty());
    }
}
