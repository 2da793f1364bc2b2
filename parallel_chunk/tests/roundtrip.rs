use std::io::{Cursor, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Once};
use std::thread;
use std::time::Duration;

use parallel_chunk::{
    read_container, Codec, CodecError, CodecKind, CodecWorker, Engine, EngineConfig, Limits,
    SourceMode, ZstdCodec,
};

const MIB: usize = 1024 * 1024;

static INIT: Once = Once::new();

fn init_logging() {
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

/// Deterministic incompressible bytes.
fn noise(len: usize, seed: u64) -> Vec<u8> {
    let mut state = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) | 1;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state >> 24) as u8
        })
        .collect()
}

/// Half noise, half repeated text, so codecs actually have work to do.
fn mixed(len: usize) -> Vec<u8> {
    let text = b"the quick brown fox jumps over the lazy dog. ";
    let random = noise(len, 7);
    (0..len)
        .map(|i| {
            if (i / 1000) % 2 == 0 {
                text[i % text.len()]
            } else {
                random[i]
            }
        })
        .collect()
}

fn roundtrip_bytes(engine: &Engine, data: &[u8]) -> Vec<u8> {
    let mut container = Vec::new();
    engine
        .compress_reader(Cursor::new(data.to_vec()), &mut container)
        .unwrap();
    let mut restored = Vec::new();
    engine.decompress_reader(&container[..], &mut restored).unwrap();
    restored
}

#[test]
fn test_roundtrip_edge_sizes() {
    init_logging();
    let chunk = 4096;
    for codec in [CodecKind::Zstd, CodecKind::Zlib] {
        for trailer in [true, false] {
            let engine = Engine::new(
                EngineConfig::default()
                    .chunk_size(chunk)
                    .codec(codec)
                    .write_trailer(trailer),
            )
            .unwrap();
            for len in [0, 1, chunk - 1, chunk, chunk + 1, 3 * chunk, 7 * chunk + 17] {
                let data = mixed(len);
                assert_eq!(
                    roundtrip_bytes(&engine, &data),
                    data,
                    "{codec:?} trailer={trailer} len={len}"
                );
            }
        }
    }
}

#[test]
fn test_roundtrip_every_source_mode() {
    init_logging();
    let chunk = 64 * 1024;
    let data = mixed(5 * chunk + 123);
    let mut input = tempfile::NamedTempFile::new().unwrap();
    input.write_all(&data).unwrap();
    input.flush().unwrap();

    let mut containers = Vec::new();
    for source in [
        SourceMode::Mapped,
        SourceMode::Handles,
        SourceMode::Locked,
        SourceMode::Streamed,
    ] {
        let engine = Engine::new(
            EngineConfig::default()
                .chunk_size(chunk)
                .source(source)
                .jobs(4),
        )
        .unwrap();
        let mut container = Vec::new();
        let summary = engine.compress_file(input.path(), &mut container).unwrap();
        assert_eq!(summary.chunks, 6, "{source:?}");
        assert_eq!(summary.original_bytes, data.len() as u64);
        assert_eq!(summary.container_bytes, container.len() as u64);

        let mut restored = Vec::new();
        engine.decompress_reader(&container[..], &mut restored).unwrap();
        assert_eq!(restored, data, "{source:?}");
        containers.push(container);
    }

    // How the chunks were read must not show up in the output.
    for container in &containers[1..] {
        assert_eq!(container, &containers[0]);
    }
}

#[test]
fn test_empty_file() {
    let input = tempfile::NamedTempFile::new().unwrap();
    for source in [SourceMode::Mapped, SourceMode::Streamed] {
        let engine = Engine::new(EngineConfig::default().source(source)).unwrap();
        let mut container = Vec::new();
        let summary = engine.compress_file(input.path(), &mut container).unwrap();
        assert_eq!(summary.chunks, 0);
        assert_eq!(&container[..8], &0u64.to_le_bytes());

        let mut restored = Vec::new();
        let summary = engine.decompress_reader(&container[..], &mut restored).unwrap();
        assert_eq!(summary.original_bytes, 0);
        assert!(restored.is_empty());
    }

    let legacy = Engine::new(EngineConfig::default().write_trailer(false)).unwrap();
    let mut container = Vec::new();
    legacy.compress_file(input.path(), &mut container).unwrap();
    assert_eq!(container, 0u64.to_le_bytes());
}

#[test]
fn test_three_mib_in_one_mib_chunks() {
    let data = noise(3 * MIB, 3);
    let engine = Engine::new(EngineConfig::default()).unwrap();
    let mut container = Vec::new();
    engine
        .compress_reader(Cursor::new(data.clone()), &mut container)
        .unwrap();

    assert_eq!(u64::from_le_bytes(container[..8].try_into().unwrap()), 3);
    let parsed = read_container(&container[..], &Limits::default()).unwrap();
    assert_eq!(parsed.len(), 3);
    assert_eq!(parsed.records[2].original_len, MIB as u64);
    for record in &parsed.records {
        assert!(record.data.len() <= ZstdCodec::default().compress_bound(MIB));
    }

    let mut restored = Vec::new();
    engine.decompress_reader(&container[..], &mut restored).unwrap();
    assert_eq!(restored, data);
}

#[test]
fn test_final_chunk_records_actual_length() {
    let chunk = 1000;
    let engine = Engine::new(EngineConfig::default().chunk_size(chunk)).unwrap();
    let mut container = Vec::new();
    engine
        .compress_reader(Cursor::new(noise(chunk + 1, 9)), &mut container)
        .unwrap();
    let parsed = read_container(&container[..], &Limits::default()).unwrap();
    assert_eq!(parsed.len(), 2);
    assert_eq!(parsed.records[0].original_len, chunk as u64);
    assert_eq!(parsed.records[1].original_len, 1);
}

#[test]
fn test_zlib_container_names_its_codec() {
    let data = mixed(50_000);
    let writer = Engine::new(
        EngineConfig::default()
            .chunk_size(8192)
            .codec(CodecKind::Zlib),
    )
    .unwrap();
    let mut container = Vec::new();
    writer
        .compress_reader(Cursor::new(data.clone()), &mut container)
        .unwrap();

    // A zstd-configured reader still follows the trailer.
    let reader = Engine::new(EngineConfig::default()).unwrap();
    let mut restored = Vec::new();
    reader.decompress_reader(&container[..], &mut restored).unwrap();
    assert_eq!(restored, data);
}

/// Wraps zstd and sleeps longer for chunks that start with a larger byte.
struct DelayCodec(ZstdCodec);

struct DelayWorker(<ZstdCodec as Codec>::Worker);

impl Codec for DelayCodec {
    type Worker = DelayWorker;

    fn worker(&self) -> Result<DelayWorker, CodecError> {
        Ok(DelayWorker(self.0.worker()?))
    }

    fn compress_bound(&self, len: usize) -> usize {
        self.0.compress_bound(len)
    }

    fn kind(&self) -> CodecKind {
        CodecKind::Zstd
    }
}

impl CodecWorker for DelayWorker {
    fn compress(&mut self, input: &[u8]) -> Result<Vec<u8>, CodecError> {
        thread::sleep(Duration::from_millis(input[0] as u64 * 4));
        self.0.compress(input)
    }

    fn decompress(&mut self, input: &[u8], expected_len: usize) -> Result<Vec<u8>, CodecError> {
        let out = self.0.decompress(input, expected_len)?;
        thread::sleep(Duration::from_millis(out[0] as u64 * 4));
        Ok(out)
    }
}

#[test]
fn test_completion_order_does_not_change_output() {
    let chunk = 4096;
    let chunks = 8;
    // Early chunks sleep longest, so they finish last.
    let mut data = Vec::new();
    for i in 0..chunks {
        let mut part = noise(chunk, i as u64);
        part[0] = (chunks - i) as u8;
        data.extend_from_slice(&part);
    }

    let compress = |jobs: usize, delayed: bool| {
        let engine = Engine::new(EngineConfig::default().chunk_size(chunk).jobs(jobs)).unwrap();
        let source = parallel_chunk::SharedSource::new(Cursor::new(data.clone())).unwrap();
        let records = match delayed {
            true => engine.compress_records(&source, &DelayCodec(ZstdCodec::default())),
            false => engine.compress_records(&source, &ZstdCodec::default()),
        };
        let records = records.unwrap();
        let mut container = Vec::new();
        parallel_chunk::write_container(&mut container, &records, Some(CodecKind::Zstd)).unwrap();
        (engine, container)
    };

    let (_, reference) = compress(1, false);
    let (engine, shuffled) = compress(chunks, true);
    assert_eq!(shuffled, reference);

    let parsed = read_container(&shuffled[..], &Limits::default()).unwrap();
    let restored = engine
        .decompress_records(&parsed.records, &DelayCodec(ZstdCodec::default()))
        .unwrap();
    assert_eq!(restored.concat(), data);
}

#[test]
fn test_progress_reports_every_byte() {
    let data = mixed(10 * 4096 + 5);
    let seen = Arc::new(AtomicU64::new(0));
    let counter = seen.clone();
    let engine = Engine::new(EngineConfig::default().chunk_size(4096))
        .unwrap()
        .with_progress(Arc::new(move |n| {
            counter.fetch_add(n, Ordering::Relaxed);
        }));

    let mut container = Vec::new();
    engine
        .compress_reader(Cursor::new(data.clone()), &mut container)
        .unwrap();
    assert_eq!(seen.load(Ordering::Relaxed), data.len() as u64);

    engine
        .decompress_reader(&container[..], std::io::sink())
        .unwrap();
    assert_eq!(seen.load(Ordering::Relaxed), 2 * data.len() as u64);
}
