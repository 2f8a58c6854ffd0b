#![no_main]

use streamflate::{CodecBackend, StreamConfig, deflate_whole_buffer, inflate_whole_buffer};

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() < 2 {
        return;
    }

    let config = StreamConfig {
        level: data[0] % 10,
        backend: if data[0] & 0x80 == 0 {
            CodecBackend::Miniz
        } else {
            CodecBackend::Flate2
        },
        chunk_size: usize::from(data[1]) + 1,
        ..StreamConfig::default()
    };

    let compressed = deflate_whole_buffer(&data[2..], &config).unwrap();
    let original = inflate_whole_buffer(&compressed, &config).unwrap();
    assert_eq!(&data[2..], &original[..]);
});
