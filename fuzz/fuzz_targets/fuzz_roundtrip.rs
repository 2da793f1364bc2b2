#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use parallel_chunk::{CodecKind, Engine, EngineConfig};
use std::io::Cursor;

#[derive(Arbitrary, Debug)]
struct FuzzInput {
    data: Vec<u8>,
    chunk_size: u16,
    zlib: bool,
    trailer: bool,
}

fuzz_target!(|input: FuzzInput| {
    if input.data.len() > 1_000_000 {
        return;
    }

    let codec = if input.zlib {
        CodecKind::Zlib
    } else {
        CodecKind::Zstd
    };
    let engine = Engine::new(
        EngineConfig::default()
            .chunk_size(input.chunk_size as usize + 1)
            .codec(codec)
            .write_trailer(input.trailer)
            .jobs(2),
    )
    .unwrap();

    let mut container = Vec::new();
    engine
        .compress_reader(Cursor::new(&input.data), &mut container)
        .unwrap();
    let mut restored = Vec::new();
    engine
        .decompress_reader(&container[..], &mut restored)
        .unwrap();
    assert_eq!(restored, input.data);
});
