#![no_main]

use libfuzzer_sys::fuzz_target;
use parallel_chunk::{read_container, Engine, EngineConfig, Limits};

fuzz_target!(|data: &[u8]| {
    // Header values are untrusted: the reader must reject them before
    // allocating, whatever the declared count and lengths are.
    let limits = Limits {
        max_chunk_len: 1 << 20,
        ..Limits::default()
    }
    .with_stream_len(data.len() as u64);
    let Ok(container) = read_container(data, &limits) else {
        return;
    };

    // Anything that parsed must either decode or fail cleanly.
    let engine = Engine::new(EngineConfig::default().jobs(2)).unwrap();
    let codec = engine.codec_for(&container);
    if let Ok(chunks) = engine.decompress_records(&container.records, &codec) {
        for (chunk, record) in chunks.iter().zip(&container.records) {
            assert_eq!(chunk.len() as u64, record.original_len);
        }
    }
});
