/*---------------------------------------------------------------------------------------------
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the Apache License, Version 2.0. See LICENSE.txt in the project root for license information.
 *  This software incorporates material from third parties. See NOTICE.txt for details.
 *--------------------------------------------------------------------------------------------*/

use crate::{
    StreamConfig,
    chunk_driver::{StreamStats, decode_into, encode_into},
    codec::Direction,
    codec_session::{CodecSession, SessionState},
    output_sink::{ByteSink, GrowableBuffer},
    streamflate_error::{AddContext, Result},
};

/// Compression half of the pipeline: a compression session plus the two ways
/// of collecting its output.
pub struct DeflateEncoder {
    session: CodecSession,
}

impl DeflateEncoder {
    /// creates the encoder with its codec context already initialized
    pub fn new(config: &StreamConfig) -> Result<Self> {
        let mut session = CodecSession::new(Direction::Compress, config)?;
        session.init()?;
        Ok(DeflateEncoder { session })
    }

    /// gets the encoder ready for the next independent stream
    pub fn reset(&mut self) -> Result<()> {
        self.session.reset()
    }

    /// releases the codec context, `reset` brings it back
    pub fn destroy(&mut self) {
        self.session.end();
    }

    /// Compresses `input` into a newly allocated buffer holding exactly the
    /// compressed bytes.
    pub fn compress(&mut self, input: &[u8]) -> Result<Vec<u8>> {
        let mut output = GrowableBuffer::new();
        encode_into(&mut self.session, input, &mut output).context()?;
        Ok(output.into_vec())
    }

    /// Compresses `input` by appending to `out`. If this fails, `out` may hold
    /// a partial stream and should be discarded.
    pub fn compress_into_bytestream(
        &mut self,
        input: &[u8],
        out: &mut impl ByteSink,
    ) -> Result<StreamStats> {
        encode_into(&mut self.session, input, out).context()
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn stats(&self) -> StreamStats {
        self.session.stats()
    }

    pub fn session(&self) -> &CodecSession {
        &self.session
    }
}

/// Decompression half of the pipeline
pub struct DeflateDecoder {
    session: CodecSession,
}

impl DeflateDecoder {
    pub fn new(config: &StreamConfig) -> Result<Self> {
        let mut session = CodecSession::new(Direction::Decompress, config)?;
        session.init()?;
        Ok(DeflateDecoder { session })
    }

    pub fn reset(&mut self) -> Result<()> {
        self.session.reset()
    }

    pub fn destroy(&mut self) {
        self.session.end();
    }

    /// Decompresses the stream at the start of `input` into a newly allocated buffer.
    /// Bytes following the end of the stream are ignored, `stats().bytes_consumed`
    /// tells where the stream ended.
    pub fn uncompress(&mut self, input: &[u8]) -> Result<Vec<u8>> {
        let mut output = GrowableBuffer::new();
        decode_into(&mut self.session, input, &mut output).context()?;
        Ok(output.into_vec())
    }

    /// Same as `uncompress`, but fails with `AllocationFailure` as soon as the
    /// output would grow beyond `max_output` bytes.
    pub fn uncompress_with_limit(&mut self, input: &[u8], max_output: usize) -> Result<Vec<u8>> {
        let mut output = GrowableBuffer::with_limit(max_output);
        decode_into(&mut self.session, input, &mut output).context()?;
        Ok(output.into_vec())
    }

    pub fn decompress_into_bytestream(
        &mut self,
        input: &[u8],
        out: &mut impl ByteSink,
    ) -> Result<StreamStats> {
        decode_into(&mut self.session, input, out).context()
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn stats(&self) -> StreamStats {
        self.session.stats()
    }

    pub fn session(&self) -> &CodecSession {
        &self.session
    }
}

/// Compresses a whole buffer with a throwaway encoder
pub fn deflate_whole_buffer(input: &[u8], config: &StreamConfig) -> Result<Vec<u8>> {
    DeflateEncoder::new(config)?.compress(input)
}

/// Decompresses a whole buffer with a throwaway decoder
pub fn inflate_whole_buffer(input: &[u8], config: &StreamConfig) -> Result<Vec<u8>> {
    DeflateDecoder::new(config)?.uncompress(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ExitCode,
        codec::CodecBackend,
        utils::{assert_eq_array, pattern_data, pseudo_random_data},
    };

    #[test]
    fn reset_gives_identical_output() {
        crate::init_logging();

        for backend in [CodecBackend::Miniz, CodecBackend::Flate2] {
            let config = StreamConfig {
                backend,
                ..StreamConfig::default()
            };
            let mut encoder = DeflateEncoder::new(&config).unwrap();

            let input = pseudo_random_data(4000, 11);
            let first = encoder.compress(&input).unwrap();
            encoder.reset().unwrap();
            let second = encoder.compress(&input).unwrap();

            assert_eq_array(&first, &second);
        }
    }

    #[test]
    fn buffer_and_sink_agree() {
        let config = StreamConfig::with_chunk_size(100);
        let input = pattern_data(12345);

        let mut encoder = DeflateEncoder::new(&config).unwrap();
        let buffered = encoder.compress(&input).unwrap();

        encoder.reset().unwrap();
        let mut sink: Vec<u8> = Vec::new();
        let stats = encoder.compress_into_bytestream(&input, &mut sink).unwrap();

        assert_eq!(stats.bytes_produced, buffered.len());
        assert_eq_array(&buffered, &sink);

        let mut decoder = DeflateDecoder::new(&config).unwrap();
        let plain = decoder.uncompress(&buffered).unwrap();

        decoder.reset().unwrap();
        let mut plain_sink: std::collections::VecDeque<u8> = std::collections::VecDeque::new();
        decoder
            .decompress_into_bytestream(&buffered, &mut plain_sink)
            .unwrap();

        assert_eq_array(&plain, plain_sink.make_contiguous());
        assert_eq_array(&input, &plain);
    }

    #[test]
    fn sink_form_appends_after_existing_content() {
        let config = StreamConfig::default();
        let compressed = deflate_whole_buffer(b"appended", &config).unwrap();

        let mut decoder = DeflateDecoder::new(&config).unwrap();
        let mut sink = b"already here: ".to_vec();
        decoder
            .decompress_into_bytestream(&compressed, &mut sink)
            .unwrap();

        assert_eq!(sink, b"already here: appended");
    }

    #[test]
    fn empty_input_is_a_real_stream() {
        let config = StreamConfig::default();
        let compressed = deflate_whole_buffer(&[], &config).unwrap();

        // zlib header, an empty final block and the adler32 of nothing
        assert!(compressed.len() >= 8);
        assert!(inflate_whole_buffer(&compressed, &config).unwrap().is_empty());
    }

    #[test]
    fn destroyed_encoder_needs_reset() {
        let mut encoder = DeflateEncoder::new(&StreamConfig::default()).unwrap();
        encoder.destroy();
        encoder.destroy();
        assert_eq!(encoder.state(), SessionState::Uninitialized);

        let e = encoder.compress(b"abc").unwrap_err();
        assert_eq!(e.exit_code(), ExitCode::InvalidParameter);

        encoder.reset().unwrap();
        let compressed = encoder.compress(b"abc").unwrap();
        assert_eq!(encoder.state(), SessionState::Finished);
        assert_eq!(encoder.stats().bytes_produced, compressed.len());
    }

    #[test]
    fn output_limit_stops_decoding() {
        let config = StreamConfig::with_chunk_size(256);
        let original = pattern_data(50_000);
        let compressed = deflate_whole_buffer(&original, &config).unwrap();

        let mut decoder = DeflateDecoder::new(&config).unwrap();
        let e = decoder
            .uncompress_with_limit(&compressed, 10_000)
            .unwrap_err();
        assert_eq!(e.exit_code(), ExitCode::AllocationFailure);
        assert_eq!(decoder.state(), SessionState::Error);

        decoder.reset().unwrap();
        let plain = decoder
            .uncompress_with_limit(&compressed, original.len())
            .unwrap();
        assert_eq_array(&original, &plain);
    }

    #[test]
    fn decoder_recovers_after_error() {
        let config = StreamConfig::default();
        let compressed = deflate_whole_buffer(&pattern_data(1000), &config).unwrap();

        let mut decoder = DeflateDecoder::new(&config).unwrap();
        let e = decoder
            .uncompress(&compressed[..compressed.len() / 2])
            .unwrap_err();
        assert_eq!(e.exit_code(), ExitCode::IncompleteStream);
        assert_eq!(decoder.state(), SessionState::Error);

        decoder.reset().unwrap();
        assert_eq_array(&pattern_data(1000), &decoder.uncompress(&compressed).unwrap());
    }
}
