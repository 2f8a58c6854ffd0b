/*---------------------------------------------------------------------------------------------
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the Apache License, Version 2.0. See LICENSE.txt in the project root for license information.
 *  This software incorporates material from third parties. See NOTICE.txt for details.
 *--------------------------------------------------------------------------------------------*/

//! Thin wrappers around the DEFLATE codec libraries. Each wrapper exposes the
//! same single `step` operation so that the chunk driver doesn't care which
//! library is doing the actual bit level work.

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};
use miniz_oxide::{
    DataFormat, MZError, MZFlush, MZResult, MZStatus,
    deflate::core::{CompressorOxide, create_comp_flags_from_zip_params},
    inflate::stream::InflateState,
};

use crate::{
    gzip_frame::{GzipDeflate, GzipInflate},
    streamflate_error::{ExitCode, Result, StreamflateError, err_exit_code},
};

/// highest compression level accepted by both backends
pub const MAX_LEVEL: u8 = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Compress,
    Decompress,
}

/// Framing of the compressed stream. This is chosen when the session is
/// created, the decoder never tries to guess it from the data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamFormat {
    /// RFC 1950 header and Adler-32 trailer around the deflate data
    #[default]
    Zlib,
    /// bare RFC 1951 deflate data
    Raw,
    /// RFC 1952 member: header, deflate data, CRC-32 and length trailer
    Gzip,
}

/// Library used to do the actual compression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CodecBackend {
    #[default]
    Miniz,
    Flate2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushMode {
    /// more input may follow
    None,
    /// no more input, emit everything that is buffered and terminate the stream
    Finish,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    /// the codec did some work and can be called again
    Progress,

    /// the codec couldn't do anything with the input and output space it was given
    Stalled,

    /// encoder: flush is complete. decoder: the end of the stream was reached.
    StreamEnd,
}

/// Result of a single call into the codec
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecStep {
    pub bytes_consumed: usize,
    pub bytes_written: usize,
    pub status: StepStatus,
}

impl CodecStep {
    pub fn made_progress(&self) -> bool {
        self.bytes_consumed > 0 || self.bytes_written > 0
    }
}

/// Opaque codec context. Implementations keep all of their internal buffering
/// to themselves, the only way data moves in or out is through `step`.
pub trait RawCodec: Send {
    fn step(&mut self, input: &[u8], output: &mut [u8], flush: FlushMode) -> Result<CodecStep>;
}

/// Creates the codec context for one direction. This is the `init` of the
/// underlying library, tearing down is done by dropping the returned box.
pub fn create_codec(
    direction: Direction,
    format: StreamFormat,
    level: u8,
    backend: CodecBackend,
) -> Result<Box<dyn RawCodec>> {
    if direction == Direction::Compress && level > MAX_LEVEL {
        return err_exit_code(
            ExitCode::InitializationError,
            &format!("compression level {} is out of range 0-{}", level, MAX_LEVEL),
        );
    }

    // gzip framing is done here, the libraries only see raw deflate data
    let zlib = format == StreamFormat::Zlib;

    let body: Box<dyn RawCodec> = match (backend, direction) {
        (CodecBackend::Miniz, Direction::Compress) => Box::new(MinizDeflate::new(zlib, level)),
        (CodecBackend::Miniz, Direction::Decompress) => Box::new(MinizInflate::new(zlib)),
        (CodecBackend::Flate2, Direction::Compress) => Box::new(Flate2Deflate::new(zlib, level)),
        (CodecBackend::Flate2, Direction::Decompress) => Box::new(Flate2Inflate::new(zlib)),
    };

    Ok(match (format, direction) {
        (StreamFormat::Gzip, Direction::Compress) => Box::new(GzipDeflate::new(body, level)),
        (StreamFormat::Gzip, Direction::Decompress) => Box::new(GzipInflate::new(body)),
        (StreamFormat::Zlib | StreamFormat::Raw, _) => body,
    })
}

/// translates the miniz status into our step status. Buf means that no progress
/// was possible, which the driver needs to interpret depending on where it is.
fn miniz_step(
    bytes_consumed: usize,
    bytes_written: usize,
    status: MZResult,
    what: &str,
) -> Result<CodecStep> {
    let status = match status {
        Ok(MZStatus::Ok) => StepStatus::Progress,
        Ok(MZStatus::StreamEnd) => StepStatus::StreamEnd,
        Err(MZError::Buf) => StepStatus::Stalled,
        Ok(MZStatus::NeedDict) => {
            return err_exit_code(
                ExitCode::CodecStreamError,
                &format!("{} requires a preset dictionary", what),
            );
        }
        Err(e) => {
            return err_exit_code(
                ExitCode::CodecStreamError,
                &format!("{} failed with {:?}", what, e),
            );
        }
    };

    Ok(CodecStep {
        bytes_consumed,
        bytes_written,
        status,
    })
}

fn miniz_flush(flush: FlushMode) -> MZFlush {
    match flush {
        FlushMode::None => MZFlush::None,
        FlushMode::Finish => MZFlush::Finish,
    }
}

struct MinizDeflate {
    compressor: Box<CompressorOxide>,
}

impl MinizDeflate {
    fn new(zlib: bool, level: u8) -> Self {
        // positive window bits ask for the zlib wrapper, negative for raw deflate
        let window_bits = if zlib { 15 } else { -15 };
        let flags = create_comp_flags_from_zip_params(i32::from(level), window_bits, 0);

        MinizDeflate {
            compressor: Box::new(CompressorOxide::new(flags)),
        }
    }
}

impl RawCodec for MinizDeflate {
    fn step(&mut self, input: &[u8], output: &mut [u8], flush: FlushMode) -> Result<CodecStep> {
        let r = miniz_oxide::deflate::stream::deflate(
            &mut self.compressor,
            input,
            output,
            miniz_flush(flush),
        );
        miniz_step(r.bytes_consumed, r.bytes_written, r.status, "deflate")
    }
}

struct MinizInflate {
    state: Box<InflateState>,
}

impl MinizInflate {
    fn new(zlib: bool) -> Self {
        let data_format = if zlib {
            DataFormat::Zlib
        } else {
            DataFormat::Raw
        };
        MinizInflate {
            state: InflateState::new_boxed(data_format),
        }
    }
}

impl RawCodec for MinizInflate {
    fn step(&mut self, input: &[u8], output: &mut [u8], _flush: FlushMode) -> Result<CodecStep> {
        // the end of the stream is detected from the data, so inflate is never told to finish
        let r = miniz_oxide::inflate::stream::inflate(&mut self.state, input, output, MZFlush::None);
        miniz_step(r.bytes_consumed, r.bytes_written, r.status, "inflate")
    }
}

fn flate2_status(status: Status) -> StepStatus {
    match status {
        Status::Ok => StepStatus::Progress,
        Status::BufError => StepStatus::Stalled,
        Status::StreamEnd => StepStatus::StreamEnd,
    }
}

struct Flate2Deflate {
    compress: Compress,
}

impl Flate2Deflate {
    fn new(zlib: bool, level: u8) -> Self {
        Flate2Deflate {
            compress: Compress::new(Compression::new(u32::from(level)), zlib),
        }
    }
}

impl RawCodec for Flate2Deflate {
    fn step(&mut self, input: &[u8], output: &mut [u8], flush: FlushMode) -> Result<CodecStep> {
        let total_in = self.compress.total_in();
        let total_out = self.compress.total_out();

        let flush = match flush {
            FlushMode::None => FlushCompress::None,
            FlushMode::Finish => FlushCompress::Finish,
        };

        let status = self
            .compress
            .compress(input, output, flush)
            .map_err(|e| StreamflateError::wrap(ExitCode::CodecStreamError, &e))?;

        Ok(CodecStep {
            bytes_consumed: (self.compress.total_in() - total_in) as usize,
            bytes_written: (self.compress.total_out() - total_out) as usize,
            status: flate2_status(status),
        })
    }
}

struct Flate2Inflate {
    decompress: Decompress,
}

impl Flate2Inflate {
    fn new(zlib: bool) -> Self {
        Flate2Inflate {
            decompress: Decompress::new(zlib),
        }
    }
}

impl RawCodec for Flate2Inflate {
    fn step(&mut self, input: &[u8], output: &mut [u8], _flush: FlushMode) -> Result<CodecStep> {
        let total_in = self.decompress.total_in();
        let total_out = self.decompress.total_out();

        let status = self
            .decompress
            .decompress(input, output, FlushDecompress::None)
            .map_err(|e| StreamflateError::wrap(ExitCode::CodecStreamError, &e))?;

        Ok(CodecStep {
            bytes_consumed: (self.decompress.total_in() - total_in) as usize,
            bytes_written: (self.decompress.total_out() - total_out) as usize,
            status: flate2_status(status),
        })
    }
}

#[cfg(test)]
fn codec_roundtrip(backend: CodecBackend, format: StreamFormat) {
    let original = b"a small amount of text, a small amount of text, a small amount of text";

    let mut encoder = create_codec(Direction::Compress, format, 6, backend).unwrap();
    let mut compressed = vec![0u8; 1024];
    let step = encoder
        .step(original, &mut compressed, FlushMode::Finish)
        .unwrap();
    assert_eq!(step.status, StepStatus::StreamEnd);
    assert_eq!(step.bytes_consumed, original.len());
    compressed.truncate(step.bytes_written);

    let mut decoder = create_codec(Direction::Decompress, format, 0, backend).unwrap();
    let mut plain = vec![0u8; 1024];
    let step = decoder
        .step(&compressed, &mut plain, FlushMode::None)
        .unwrap();
    assert_eq!(step.status, StepStatus::StreamEnd);
    assert_eq!(step.bytes_consumed, compressed.len());
    assert_eq!(&plain[..step.bytes_written], &original[..]);
}

#[test]
fn single_step_roundtrip_all_backends() {
    for backend in [CodecBackend::Miniz, CodecBackend::Flate2] {
        for format in [StreamFormat::Zlib, StreamFormat::Raw, StreamFormat::Gzip] {
            codec_roundtrip(backend, format);
        }
    }
}

#[test]
fn level_out_of_range_fails_init() {
    let r = create_codec(
        Direction::Compress,
        StreamFormat::Zlib,
        MAX_LEVEL + 1,
        CodecBackend::Miniz,
    );
    assert_eq!(
        r.err().map(|e| e.exit_code()),
        Some(ExitCode::InitializationError)
    );
}

#[test]
fn garbage_is_codec_error() {
    for backend in [CodecBackend::Miniz, CodecBackend::Flate2] {
        for format in [StreamFormat::Zlib, StreamFormat::Gzip] {
            let mut decoder = create_codec(Direction::Decompress, format, 0, backend).unwrap();
            let mut plain = [0u8; 64];

            // 0xff 0xff is neither a zlib header nor the gzip magic
            let r = decoder.step(&[0xff; 10], &mut plain, FlushMode::None);
            assert_eq!(
                r.err().map(|e| e.exit_code()),
                Some(ExitCode::CodecStreamError),
                "{:?} {:?}",
                backend,
                format
            );
        }
    }
}

#[test]
fn inflate_with_no_input_does_nothing() {
    for backend in [CodecBackend::Miniz, CodecBackend::Flate2] {
        let mut decoder =
            create_codec(Direction::Decompress, StreamFormat::Zlib, 0, backend).unwrap();
        let mut plain = [0u8; 64];

        let step = decoder.step(&[], &mut plain, FlushMode::None).unwrap();
        assert!(!step.made_progress());
        assert_ne!(step.status, StepStatus::StreamEnd);
    }
}
