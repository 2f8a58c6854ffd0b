/*---------------------------------------------------------------------------------------------
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the Apache License, Version 2.0. See LICENSE.txt in the project root for license information.
 *  This software incorporates material from third parties. See NOTICE.txt for details.
 *--------------------------------------------------------------------------------------------*/

//! The loops that push a whole input buffer through a codec session. The
//! codec only ever sees the session's scratch chunk as output space, so every
//! step is followed by moving whatever it wrote into the caller's sink.

use crate::{
    codec::{Direction, FlushMode, StepStatus},
    codec_session::CodecSession,
    output_sink::ByteSink,
    streamflate_error::{AddContext, ExitCode, Result, err_exit_code},
};

/// Totals for one stream run through the driver
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StreamStats {
    /// bytes of input the codec consumed. For the decoder this can be less than the
    /// input length if there was trailing data after the end of the stream.
    pub bytes_consumed: usize,

    /// bytes appended to the output
    pub bytes_produced: usize,

    /// number of calls made into the codec
    pub steps: usize,
}

/// Compresses all of `input` into `output` using a `Ready` compression session.
///
/// On success the session is left `Finished`, on failure `Error`. Either way it
/// needs a `reset` before it can be used for the next stream.
pub fn encode_into(
    session: &mut CodecSession,
    input: &[u8],
    output: &mut impl ByteSink,
) -> Result<StreamStats> {
    session.begin_run(Direction::Compress)?;

    let result = encode_steps(session, input, output);
    session.complete_run(&result);

    if let Ok(stats) = &result {
        log::debug!(
            "compressed {} bytes into {} bytes in {} steps",
            stats.bytes_consumed,
            stats.bytes_produced,
            stats.steps
        );
    }

    result
}

/// Decompresses the stream at the start of `input` into `output` using a `Ready`
/// decompression session. Stops as soon as the codec reports the end of the
/// stream, any bytes after that are left alone and show up as the difference
/// between `input.len()` and `bytes_consumed`.
pub fn decode_into(
    session: &mut CodecSession,
    input: &[u8],
    output: &mut impl ByteSink,
) -> Result<StreamStats> {
    session.begin_run(Direction::Decompress)?;

    let result = decode_steps(session, input, output);
    session.complete_run(&result);

    if let Ok(stats) = &result {
        if stats.bytes_consumed < input.len() {
            log::warn!(
                "stream ended with {} trailing bytes left unconsumed",
                input.len() - stats.bytes_consumed
            );
        }
        log::debug!(
            "decompressed {} bytes into {} bytes in {} steps",
            stats.bytes_consumed,
            stats.bytes_produced,
            stats.steps
        );
    }

    result
}

fn encode_steps(
    session: &mut CodecSession,
    input: &[u8],
    output: &mut impl ByteSink,
) -> Result<StreamStats> {
    let chunk_size = session.chunk_size();
    let mut stats = StreamStats::default();

    // Feed the input. A step that fills the whole scratch chunk may have more
    // output pending inside the codec, so we keep stepping until the input is
    // gone and the last step left room in the chunk. An empty input still goes
    // through here once so the codec sees the (zero length) input before the flush.
    loop {
        let remaining = &input[stats.bytes_consumed..];
        let (step, produced) = session.step(remaining, FlushMode::None)?;

        output.append_bytes(produced).context()?;
        stats.bytes_consumed += step.bytes_consumed;
        stats.bytes_produced += produced.len();
        stats.steps += 1;

        if step.status == StepStatus::StreamEnd {
            return err_exit_code(
                ExitCode::CodecStreamError,
                "encoder ended the stream before it was flushed",
            );
        }

        if !step.made_progress() {
            if stats.bytes_consumed < input.len() {
                return err_exit_code(
                    ExitCode::CodecStreamError,
                    "encoder stopped accepting input",
                );
            }

            // nothing pending and nothing left to feed
            break;
        }

        if stats.bytes_consumed == input.len() && step.bytes_written < chunk_size {
            break;
        }
    }

    // Now flush, draining a chunk at a time until the codec says it is done.
    loop {
        let (step, produced) = session.step(&[], FlushMode::Finish)?;

        output.append_bytes(produced).context()?;
        stats.bytes_produced += produced.len();
        stats.steps += 1;

        match step.status {
            StepStatus::StreamEnd => break,
            StepStatus::Progress if step.made_progress() => {}
            StepStatus::Progress | StepStatus::Stalled => {
                return err_exit_code(
                    ExitCode::CodecStreamError,
                    "encoder made no progress while flushing",
                );
            }
        }
    }

    Ok(stats)
}

fn decode_steps(
    session: &mut CodecSession,
    input: &[u8],
    output: &mut impl ByteSink,
) -> Result<StreamStats> {
    let mut stats = StreamStats::default();

    loop {
        let remaining = &input[stats.bytes_consumed..];
        let (step, produced) = session.step(remaining, FlushMode::None)?;

        output.append_bytes(produced).context()?;
        stats.bytes_consumed += step.bytes_consumed;
        stats.bytes_produced += produced.len();
        stats.steps += 1;

        if step.status == StepStatus::StreamEnd {
            return Ok(stats);
        }

        if !step.made_progress() {
            // The codec still wants more, but there is nothing left to give it.
            // This is a truncated stream, not a corrupt one.
            if stats.bytes_consumed == input.len() {
                return err_exit_code(
                    ExitCode::IncompleteStream,
                    &format!(
                        "input exhausted after {} bytes before the end of the stream",
                        input.len()
                    ),
                );
            }

            return err_exit_code(
                ExitCode::CodecStreamError,
                "decoder stopped accepting input",
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        StreamConfig,
        codec::{CodecBackend, StreamFormat},
        codec_session::SessionState,
        output_sink::GrowableBuffer,
        utils::{assert_eq_array, pattern_data, pseudo_random_data},
    };

    fn ready_session(direction: Direction, config: &StreamConfig) -> CodecSession {
        let mut session = CodecSession::new(direction, config).unwrap();
        session.init().unwrap();
        session
    }

    fn encode(config: &StreamConfig, input: &[u8]) -> Vec<u8> {
        let mut session = ready_session(Direction::Compress, config);
        let mut output = GrowableBuffer::new();
        let stats = encode_into(&mut session, input, &mut output).unwrap();
        assert_eq!(stats.bytes_consumed, input.len());
        assert_eq!(stats.bytes_produced, output.len());
        output.into_vec()
    }

    fn decode(config: &StreamConfig, input: &[u8]) -> Result<Vec<u8>> {
        let mut session = ready_session(Direction::Decompress, config);
        let mut output = GrowableBuffer::new();
        decode_into(&mut session, input, &mut output)?;
        Ok(output.into_vec())
    }

    #[test]
    fn chunk_boundaries_roundtrip() {
        crate::init_logging();

        for chunk_size in [1, 7, 64, 512, 4096] {
            let config = StreamConfig::with_chunk_size(chunk_size);
            for k in [1, 2, 5] {
                for len in [k * chunk_size - 1, k * chunk_size, k * chunk_size + 1] {
                    let original = pseudo_random_data(len, (chunk_size + len) as u32);
                    let compressed = encode(&config, &original);
                    let decoded = decode(&config, &compressed).unwrap();
                    assert_eq_array(&original, &decoded);
                }
            }

            let compressed = encode(&config, &[]);
            assert!(!compressed.is_empty());
            assert!(decode(&config, &compressed).unwrap().is_empty());
        }
    }

    #[test]
    fn repeating_pattern_needs_many_steps() {
        let config = StreamConfig::with_chunk_size(512);
        let original = pattern_data(10000);

        let mut session = ready_session(Direction::Compress, &config);
        let mut compressed: Vec<u8> = Vec::new();
        let stats = encode_into(&mut session, &original, &mut compressed).unwrap();
        assert!(stats.steps > 1);

        // the decoder output is much bigger than a chunk, so it has to be drained many times
        let mut session = ready_session(Direction::Decompress, &config);
        let mut decoded: Vec<u8> = Vec::new();
        let stats = decode_into(&mut session, &compressed, &mut decoded).unwrap();
        assert!(stats.steps >= 10000 / 512);
        assert_eq!(stats.bytes_produced, 10000);
        assert_eq_array(&original, &decoded);
    }

    #[test]
    fn small_chunk_forces_multiple_flush_steps() {
        // incompressible data can't fit in a 16 byte chunk, so the flush loop has to run repeatedly
        let config = StreamConfig::with_chunk_size(16);
        let original = pseudo_random_data(300, 99);

        let mut session = ready_session(Direction::Compress, &config);
        let mut compressed: Vec<u8> = Vec::new();
        let stats = encode_into(&mut session, &original, &mut compressed).unwrap();
        assert!(stats.steps > 300 / 16);
        assert_eq!(session.state(), SessionState::Finished);

        assert_eq_array(&original, &decode(&config, &compressed).unwrap());
    }

    #[test]
    fn truncated_stream_is_incomplete() {
        for backend in [CodecBackend::Miniz, CodecBackend::Flate2] {
            let config = StreamConfig {
                backend,
                ..StreamConfig::with_chunk_size(64)
            };
            for original in [pattern_data(5000), pseudo_random_data(5000, 1), Vec::new()] {
                let compressed = encode(&config, &original);

                let e = decode(&config, &compressed[..compressed.len() - 1]).unwrap_err();
                assert_eq!(e.exit_code(), ExitCode::IncompleteStream, "{:?}", backend);
            }

            // nothing at all is also incomplete
            let e = decode(&config, &[]).unwrap_err();
            assert_eq!(e.exit_code(), ExitCode::IncompleteStream);
        }
    }

    #[test]
    fn corrupted_stream_is_detected() {
        let config = StreamConfig::with_chunk_size(128);

        for original in [pattern_data(3000), pseudo_random_data(3000, 7)] {
            let compressed = encode(&config, &original);

            let mut codec_errors = 0;
            for pos in compressed.len() / 4..compressed.len() * 3 / 4 {
                let mut corrupt = compressed.clone();
                corrupt[pos] ^= 0xff;

                // the adler32 trailer makes a silently wrong decode impossible
                match decode(&config, &corrupt) {
                    Ok(d) => panic!("corruption at {} not detected ({} bytes)", pos, d.len()),
                    Err(e) if e.exit_code() == ExitCode::CodecStreamError => codec_errors += 1,
                    Err(e) => assert_eq!(e.exit_code(), ExitCode::IncompleteStream),
                }
            }

            assert!(codec_errors > 0);
        }
    }

    #[test]
    fn trailing_bytes_are_left_alone() {
        let config = StreamConfig::default();
        let first = encode(&config, b"first stream");
        let second = encode(&config, b"second stream");

        let mut concatenated = first.clone();
        concatenated.extend_from_slice(&second);

        let mut session = ready_session(Direction::Decompress, &config);
        let mut decoded: Vec<u8> = Vec::new();
        let stats = decode_into(&mut session, &concatenated, &mut decoded).unwrap();
        assert_eq!(decoded, b"first stream");
        assert_eq!(stats.bytes_consumed, first.len());

        session.reset().unwrap();
        decoded.clear();
        decode_into(&mut session, &concatenated[stats.bytes_consumed..], &mut decoded).unwrap();
        assert_eq!(decoded, b"second stream");
    }

    #[test]
    fn raw_format_roundtrip() {
        for backend in [CodecBackend::Miniz, CodecBackend::Flate2] {
            let config = StreamConfig {
                format: StreamFormat::Raw,
                backend,
                ..StreamConfig::with_chunk_size(100)
            };
            let original = pattern_data(2000);
            let compressed = encode(&config, &original);

            // raw streams have no zlib header
            assert_eq!(
                miniz_oxide::inflate::decompress_to_vec(&compressed).unwrap(),
                original
            );
            assert_eq_array(&original, &decode(&config, &compressed).unwrap());
        }
    }

    #[test]
    fn failed_sink_stops_the_run() {
        /// sink that refuses to hold more than a fixed number of bytes
        struct LimitedSink {
            data: Vec<u8>,
            limit: usize,
        }

        impl ByteSink for LimitedSink {
            fn append_bytes(&mut self, bytes: &[u8]) -> Result<()> {
                if self.data.len() + bytes.len() > self.limit {
                    return err_exit_code(ExitCode::AllocationFailure, "sink is full");
                }
                self.data.extend_from_slice(bytes);
                Ok(())
            }

            fn len(&self) -> usize {
                self.data.len()
            }
        }

        let config = StreamConfig::with_chunk_size(32);
        let original = pseudo_random_data(1000, 3);

        let mut session = ready_session(Direction::Compress, &config);
        let mut sink = LimitedSink {
            data: Vec::new(),
            limit: 100,
        };
        let e = encode_into(&mut session, &original, &mut sink).unwrap_err();
        assert_eq!(e.exit_code(), ExitCode::AllocationFailure);
        assert_eq!(session.state(), SessionState::Error);

        // the prefix written so far stays in the sink
        assert!(sink.len() <= 100);

        // reset is the way back
        session.reset().unwrap();
        let mut output: Vec<u8> = Vec::new();
        encode_into(&mut session, &original, &mut output).unwrap();
    }

    #[test]
    fn buffer_growth_failure_aborts_encode() {
        let config = StreamConfig::with_chunk_size(64);
        let original = pseudo_random_data(5000, 17);

        let mut session = ready_session(Direction::Compress, &config);
        let mut buffer = GrowableBuffer::with_limit(1000);
        let e = encode_into(&mut session, &original, &mut buffer).unwrap_err();

        assert_eq!(e.exit_code(), ExitCode::AllocationFailure);
        assert_eq!(session.state(), SessionState::Error);
        assert!(buffer.len() <= 1000);

        session.reset().unwrap();
        let mut buffer = GrowableBuffer::new();
        let stats = encode_into(&mut session, &original, &mut buffer).unwrap();
        assert_eq!(stats.bytes_produced, buffer.len());
    }

    #[test]
    fn run_requires_ready_session() {
        let config = StreamConfig::default();
        let mut session = CodecSession::new(Direction::Compress, &config).unwrap();
        let mut output: Vec<u8> = Vec::new();

        let e = encode_into(&mut session, b"abc", &mut output).unwrap_err();
        assert_eq!(e.exit_code(), ExitCode::InvalidParameter);

        session.init().unwrap();
        encode_into(&mut session, b"abc", &mut output).unwrap();

        // second run without reset is refused
        let e = encode_into(&mut session, b"abc", &mut output).unwrap_err();
        assert_eq!(e.exit_code(), ExitCode::InvalidParameter);

        // wrong direction
        session.reset().unwrap();
        let e = decode_into(&mut session, &output, &mut Vec::<u8>::new()).unwrap_err();
        assert_eq!(e.exit_code(), ExitCode::InvalidParameter);
    }

    #[test]
    fn stats_are_kept_on_the_session() {
        let config = StreamConfig::default();
        let mut session = ready_session(Direction::Compress, &config);
        let mut output: Vec<u8> = Vec::new();
        let stats = encode_into(&mut session, &pattern_data(777), &mut output).unwrap();

        assert_eq!(session.stats(), stats);
        assert_eq!(stats.bytes_consumed, 777);

        session.reset().unwrap();
        assert_eq!(session.stats(), StreamStats::default());
    }
}
