#![no_main]

use streamflate::{StreamConfig, StreamFormat, inflate_whole_buffer};

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }

    // first byte picks the framing and chunk size so small chunks get exercised too
    let config = StreamConfig {
        format: if data[0] & 1 == 0 {
            StreamFormat::Zlib
        } else {
            StreamFormat::Raw
        },
        chunk_size: usize::from(data[0] >> 1) + 1,
        ..StreamConfig::default()
    };

    let _ = inflate_whole_buffer(&data[1..], &config);
});
