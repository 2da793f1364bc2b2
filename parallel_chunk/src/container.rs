//! On-disk container layout.
//!
//! All integers are little-endian.
//!
//! ```text
//! count            u64
//! count times:
//!   original_len   u64
//!   compressed_len u64
//!   data           compressed_len bytes
//! optional trailer:
//!   magic          8 bytes, TRAILER_MAGIC
//!   version        u32
//!   codec          u32
//!   chunk_crc      count times u32, CRC-32 of each chunk's original bytes
//!   container_crc  u32, CRC-32 of every byte before this field
//! ```
//!
//! A container that ends right after its last record has no trailer and is
//! accepted as-is; those are byte-compatible with writers that predate the
//! trailer. Anything after the last record has to be a complete trailer.

use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::codec::CodecKind;
use crate::config::MAX_CHUNK_SIZE;
use crate::error::{Error, Result};

pub const TRAILER_MAGIC: [u8; 8] = *b"PCHUNK\x00\x01";
pub const TRAILER_VERSION: u32 = 1;

const COUNT_LEN: u64 = 8;
const RECORD_HEADER_LEN: u64 = 16;

// Never trust a declared count for preallocation beyond this.
const MAX_PREALLOCATED_RECORDS: usize = 4096;

/// One compressed chunk, as produced by the compression engine or parsed
/// from a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRecord {
    pub index: usize,
    pub original_len: u64,
    pub data: Vec<u8>,
    /// CRC-32 of the original bytes. Absent for containers without trailer.
    pub checksum: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Container {
    pub records: Vec<ChunkRecord>,
    /// Codec named by the trailer; `None` when the container has none.
    pub codec: Option<CodecKind>,
}

impl Container {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn has_trailer(&self) -> bool {
        self.codec.is_some()
    }

    pub fn original_len(&self) -> u64 {
        self.records.iter().map(|r| r.original_len).sum()
    }
}

/// Largest compressed size accepted for a chunk of `original_len` bytes.
/// Generous enough for the worst-case expansion of every built-in codec.
pub fn max_compressed_len(original_len: u64) -> u64 {
    original_len + original_len / 64 + 4096
}

/// Caps applied while parsing untrusted input.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub max_chunk_len: u64,
    /// Total container size, when known. Bounds the declared chunk count.
    pub stream_len: Option<u64>,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_chunk_len: MAX_CHUNK_SIZE as u64,
            stream_len: None,
        }
    }
}

impl Limits {
    pub fn with_stream_len(mut self, len: u64) -> Self {
        self.stream_len = Some(len);
        self
    }
}

struct CrcWriter<W> {
    inner: W,
    hasher: crc32fast::Hasher,
    written: u64,
}

impl<W: Write> Write for CrcWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

struct CrcReader<R> {
    inner: R,
    hasher: crc32fast::Hasher,
}

impl<R: Read> Read for CrcReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }
}

fn check_record_bounds(
    index: usize,
    original_len: u64,
    compressed_len: u64,
    limits: &Limits,
) -> Result<()> {
    if original_len > limits.max_chunk_len {
        return Err(Error::format(format!(
            "chunk {index} claims {original_len} original bytes, limit is {}",
            limits.max_chunk_len
        )));
    }
    if compressed_len > max_compressed_len(original_len) {
        return Err(Error::format(format!(
            "chunk {index} claims {compressed_len} compressed bytes for {original_len} original bytes"
        )));
    }
    Ok(())
}

/// Writes `records` in index order. With `trailer` set, appends the
/// integrity trailer naming that codec; every record then needs a checksum.
///
/// Returns the number of bytes written.
pub fn write_container<W: Write>(
    out: W,
    records: &[ChunkRecord],
    trailer: Option<CodecKind>,
) -> Result<u64> {
    let mut out = CrcWriter {
        inner: out,
        hasher: crc32fast::Hasher::new(),
        written: 0,
    };
    let limits = Limits::default();

    out.write_u64::<LittleEndian>(records.len() as u64)?;
    for (i, record) in records.iter().enumerate() {
        if record.index != i {
            return Err(Error::format(format!(
                "record for chunk {} found in slot {i}",
                record.index
            )));
        }
        check_record_bounds(i, record.original_len, record.data.len() as u64, &limits)?;
        out.write_u64::<LittleEndian>(record.original_len)?;
        out.write_u64::<LittleEndian>(record.data.len() as u64)?;
        out.write_all(&record.data)?;
    }

    if let Some(codec) = trailer {
        out.write_all(&TRAILER_MAGIC)?;
        out.write_u32::<LittleEndian>(TRAILER_VERSION)?;
        out.write_u32::<LittleEndian>(codec.id())?;
        for record in records {
            let crc = record.checksum.ok_or_else(|| {
                Error::format(format!("chunk {} has no checksum for the trailer", record.index))
            })?;
            out.write_u32::<LittleEndian>(crc)?;
        }
        let crc = out.hasher.clone().finalize();
        out.write_u32::<LittleEndian>(crc)?;
    }

    out.flush()?;
    Ok(out.written)
}

fn truncated(what: &str) -> impl FnOnce(io::Error) -> Error + '_ {
    move |e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            Error::format(format!("container truncated in {what}"))
        } else {
            Error::Io(e)
        }
    }
}

/// Fills `buf` as far as the input allows and returns how many bytes arrived.
fn read_fully<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Parses a whole container.
pub fn read_container<R: Read>(input: R, limits: &Limits) -> Result<Container> {
    let mut input = CrcReader {
        inner: input,
        hasher: crc32fast::Hasher::new(),
    };

    let count = input
        .read_u64::<LittleEndian>()
        .map_err(truncated("chunk count"))?;
    if let Some(stream_len) = limits.stream_len {
        let max_count = stream_len.saturating_sub(COUNT_LEN) / RECORD_HEADER_LEN;
        if count > max_count {
            return Err(Error::format(format!(
                "{count} chunks cannot fit in {stream_len} bytes"
            )));
        }
    }
    let count = usize::try_from(count)
        .map_err(|_| Error::format(format!("chunk count {count} out of range")))?;

    let mut records = Vec::with_capacity(count.min(MAX_PREALLOCATED_RECORDS));
    for index in 0..count {
        let original_len = input
            .read_u64::<LittleEndian>()
            .map_err(truncated("a chunk header"))?;
        let compressed_len = input
            .read_u64::<LittleEndian>()
            .map_err(truncated("a chunk header"))?;
        check_record_bounds(index, original_len, compressed_len, limits)?;

        let mut data = Vec::new();
        (&mut input).take(compressed_len).read_to_end(&mut data)?;
        if (data.len() as u64) < compressed_len {
            return Err(Error::format(format!(
                "container truncated in chunk {index}: {} of {compressed_len} bytes",
                data.len()
            )));
        }
        records.push(ChunkRecord {
            index,
            original_len,
            data,
            checksum: None,
        });
    }

    let mut magic = [0u8; 8];
    let codec = match read_fully(&mut input, &mut magic)? {
        0 => None,
        n if n < magic.len() => return Err(Error::format("container truncated in trailer magic")),
        _ if magic != TRAILER_MAGIC => {
            return Err(Error::format("unexpected bytes after the last chunk"))
        }
        _ => Some(read_trailer(&mut input, &mut records)?),
    };

    let mut extra = [0u8; 1];
    if read_fully(&mut input.inner, &mut extra)? != 0 {
        return Err(Error::format("unexpected bytes after the trailer"));
    }

    Ok(Container { records, codec })
}

fn read_trailer<R: Read>(
    input: &mut CrcReader<R>,
    records: &mut [ChunkRecord],
) -> Result<CodecKind> {
    let version = input
        .read_u32::<LittleEndian>()
        .map_err(truncated("the trailer"))?;
    if version != TRAILER_VERSION {
        return Err(Error::format(format!("unsupported container version {version}")));
    }
    let id = input
        .read_u32::<LittleEndian>()
        .map_err(truncated("the trailer"))?;
    let codec = CodecKind::from_id(id)
        .ok_or_else(|| Error::format(format!("unknown codec id {id}")))?;

    for record in records.iter_mut() {
        record.checksum = Some(
            input
                .read_u32::<LittleEndian>()
                .map_err(truncated("the chunk checksums"))?,
        );
    }

    let expected = input.hasher.clone().finalize();
    let stored = input
        .inner
        .read_u32::<LittleEndian>()
        .map_err(truncated("the container checksum"))?;
    if stored != expected {
        return Err(Error::format(format!(
            "container checksum mismatch (stored {stored:#010x}, computed {expected:#010x})"
        )));
    }
    Ok(codec)
}
