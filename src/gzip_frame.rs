/*---------------------------------------------------------------------------------------------
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the Apache License, Version 2.0. See LICENSE.txt in the project root for license information.
 *  This software incorporates material from third parties. See NOTICE.txt for details.
 *--------------------------------------------------------------------------------------------*/

//! RFC 1952 framing around a raw deflate codec. The wrappers are codecs
//! themselves, so the header and trailer go through the same scratch chunk as
//! the deflate data and may be split across any number of steps.

use crc32fast::Hasher;

use crate::{
    codec::{CodecStep, FlushMode, RawCodec, StepStatus},
    streamflate_error::{ExitCode, Result, err_exit_code},
};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const CM_DEFLATE: u8 = 8;

const FHCRC: u8 = 0x02;
const FEXTRA: u8 = 0x04;
const FNAME: u8 = 0x08;
const FCOMMENT: u8 = 0x10;
const FRESERVED: u8 = 0xe0;

const OS_UNKNOWN: u8 = 255;

const HEADER_SIZE: usize = 10;
const TRAILER_SIZE: usize = 8;

/// minimal header: no optional fields and no modification time
fn gzip_header(level: u8) -> [u8; HEADER_SIZE] {
    let xfl = match level {
        9 => 2,
        0 | 1 => 4,
        _ => 0,
    };
    [
        GZIP_MAGIC[0],
        GZIP_MAGIC[1],
        CM_DEFLATE,
        0,
        0,
        0,
        0,
        0,
        xfl,
        OS_UNKNOWN,
    ]
}

/// Looks at the header bytes collected so far and returns how many more are
/// needed before the end of the header can be known. Zero means `header`
/// is exactly one complete header.
fn header_bytes_needed(header: &[u8]) -> Result<usize> {
    if header.len() < HEADER_SIZE {
        return Ok(HEADER_SIZE - header.len());
    }

    if header[0..2] != GZIP_MAGIC {
        return err_exit_code(ExitCode::CodecStreamError, "invalid gzip magic");
    }
    if header[2] != CM_DEFLATE {
        return err_exit_code(
            ExitCode::CodecStreamError,
            &format!("unsupported gzip compression method {}", header[2]),
        );
    }

    let flags = header[3];
    if flags & FRESERVED != 0 {
        return err_exit_code(ExitCode::CodecStreamError, "reserved gzip flags set");
    }

    let mut pos = HEADER_SIZE;

    if flags & FEXTRA != 0 {
        if header.len() < pos + 2 {
            return Ok(pos + 2 - header.len());
        }
        let xlen = usize::from(u16::from_le_bytes([header[pos], header[pos + 1]]));
        pos += 2 + xlen;
        if header.len() < pos {
            return Ok(pos - header.len());
        }
    }

    // zero terminated, so these can only be collected a byte at a time
    for flag in [FNAME, FCOMMENT] {
        if flags & flag != 0 {
            match header[pos..].iter().position(|&b| b == 0) {
                Some(p) => pos += p + 1,
                None => return Ok(1),
            }
        }
    }

    if flags & FHCRC != 0 {
        if header.len() < pos + 2 {
            return Ok(pos + 2 - header.len());
        }
        let expected = u16::from_le_bytes([header[pos], header[pos + 1]]);
        let actual = (crc32fast::hash(&header[..pos]) & 0xffff) as u16;
        if expected != actual {
            return err_exit_code(ExitCode::CodecStreamError, "gzip header crc mismatch");
        }
    }

    Ok(0)
}

/// copies as much of `src[*pos..]` as fits into `output`
fn copy_pending(src: &[u8], pos: &mut usize, output: &mut [u8]) -> usize {
    let n = std::cmp::min(src.len() - *pos, output.len());
    output[..n].copy_from_slice(&src[*pos..*pos + n]);
    *pos += n;
    n
}

fn step_result(consumed: usize, written: usize, done: bool, fallback: StepStatus) -> CodecStep {
    let status = if done {
        StepStatus::StreamEnd
    } else if consumed > 0 || written > 0 {
        StepStatus::Progress
    } else {
        fallback
    };

    CodecStep {
        bytes_consumed: consumed,
        bytes_written: written,
        status,
    }
}

enum EncodePhase {
    Header(usize),
    Body,
    Trailer(usize),
    Done,
}

/// Writes the gzip header, then the output of the raw deflate codec, then
/// the CRC-32 and length of everything that was fed in.
pub(crate) struct GzipDeflate {
    body: Box<dyn RawCodec>,
    phase: EncodePhase,
    header: [u8; HEADER_SIZE],
    trailer: [u8; TRAILER_SIZE],
    crc: Hasher,
    input_size: u32,
}

impl GzipDeflate {
    pub(crate) fn new(body: Box<dyn RawCodec>, level: u8) -> Self {
        GzipDeflate {
            body,
            phase: EncodePhase::Header(0),
            header: gzip_header(level),
            trailer: [0; TRAILER_SIZE],
            crc: Hasher::new(),
            input_size: 0,
        }
    }
}

impl RawCodec for GzipDeflate {
    fn step(&mut self, input: &[u8], output: &mut [u8], flush: FlushMode) -> Result<CodecStep> {
        let mut consumed = 0;
        let mut written = 0;
        let mut body_status = StepStatus::Progress;

        if let EncodePhase::Header(pos) = &mut self.phase {
            written += copy_pending(&self.header, pos, output);
            if *pos == HEADER_SIZE {
                self.phase = EncodePhase::Body;
            }
        }

        if matches!(self.phase, EncodePhase::Body) && written < output.len() {
            let step = self.body.step(input, &mut output[written..], flush)?;

            self.crc.update(&input[..step.bytes_consumed]);
            // ISIZE is the input length modulo 2^32
            self.input_size = self.input_size.wrapping_add(step.bytes_consumed as u32);

            consumed = step.bytes_consumed;
            written += step.bytes_written;
            body_status = step.status;

            if step.status == StepStatus::StreamEnd {
                let crc = std::mem::take(&mut self.crc).finalize();
                self.trailer[..4].copy_from_slice(&crc.to_le_bytes());
                self.trailer[4..].copy_from_slice(&self.input_size.to_le_bytes());
                self.phase = EncodePhase::Trailer(0);
            }
        }

        if let EncodePhase::Trailer(pos) = &mut self.phase {
            written += copy_pending(&self.trailer, pos, &mut output[written..]);
            if *pos == TRAILER_SIZE {
                self.phase = EncodePhase::Done;
            }
        }

        let done = matches!(self.phase, EncodePhase::Done);
        if body_status == StepStatus::StreamEnd && !done {
            // the trailer still has to go out, so the stream hasn't ended for the caller
            body_status = StepStatus::Progress;
        }

        Ok(step_result(consumed, written, done, body_status))
    }
}

enum DecodePhase {
    Header,
    Body,
    Trailer,
    Done,
}

/// Parses and checks the gzip header, inflates the raw deflate body and
/// verifies the CRC-32 and length in the trailer against what was produced.
/// Only the first member is decoded, anything after its trailer is left alone.
pub(crate) struct GzipInflate {
    body: Box<dyn RawCodec>,
    phase: DecodePhase,
    header: Vec<u8>,
    trailer: [u8; TRAILER_SIZE],
    trailer_len: usize,
    crc: Hasher,
    output_size: u32,
}

impl GzipInflate {
    pub(crate) fn new(body: Box<dyn RawCodec>) -> Self {
        GzipInflate {
            body,
            phase: DecodePhase::Header,
            header: Vec::new(),
            trailer: [0; TRAILER_SIZE],
            trailer_len: 0,
            crc: Hasher::new(),
            output_size: 0,
        }
    }

    fn check_trailer(&mut self) -> Result<()> {
        let t = &self.trailer;
        let expected_crc = u32::from_le_bytes([t[0], t[1], t[2], t[3]]);
        let expected_size = u32::from_le_bytes([t[4], t[5], t[6], t[7]]);

        let crc = std::mem::take(&mut self.crc).finalize();
        if crc != expected_crc {
            return err_exit_code(
                ExitCode::CodecStreamError,
                &format!(
                    "gzip crc32 mismatch, trailer {:08x} computed {:08x}",
                    expected_crc, crc
                ),
            );
        }
        if self.output_size != expected_size {
            return err_exit_code(
                ExitCode::CodecStreamError,
                &format!(
                    "gzip length mismatch, trailer {} computed {}",
                    expected_size, self.output_size
                ),
            );
        }
        Ok(())
    }
}

impl RawCodec for GzipInflate {
    fn step(&mut self, input: &[u8], output: &mut [u8], _flush: FlushMode) -> Result<CodecStep> {
        let mut consumed = 0;
        let mut written = 0;
        let mut body_status = StepStatus::Stalled;

        if matches!(self.phase, DecodePhase::Header) {
            loop {
                let needed = header_bytes_needed(&self.header)?;
                if needed == 0 {
                    log::trace!("gzip header complete, {} bytes", self.header.len());
                    self.phase = DecodePhase::Body;
                    break;
                }

                let take = std::cmp::min(needed, input.len() - consumed);
                if take == 0 {
                    break;
                }
                self.header
                    .extend_from_slice(&input[consumed..consumed + take]);
                consumed += take;
            }
        }

        if matches!(self.phase, DecodePhase::Body) {
            let step = self
                .body
                .step(&input[consumed..], output, FlushMode::None)?;

            self.crc.update(&output[..step.bytes_written]);
            self.output_size = self.output_size.wrapping_add(step.bytes_written as u32);

            consumed += step.bytes_consumed;
            written = step.bytes_written;
            body_status = step.status;

            if step.status == StepStatus::StreamEnd {
                self.phase = DecodePhase::Trailer;
            }
        }

        if matches!(self.phase, DecodePhase::Trailer) {
            let take = std::cmp::min(TRAILER_SIZE - self.trailer_len, input.len() - consumed);
            self.trailer[self.trailer_len..self.trailer_len + take]
                .copy_from_slice(&input[consumed..consumed + take]);
            self.trailer_len += take;
            consumed += take;

            if self.trailer_len == TRAILER_SIZE {
                self.check_trailer()?;
                self.phase = DecodePhase::Done;
            }
        }

        let done = matches!(self.phase, DecodePhase::Done);
        if body_status == StepStatus::StreamEnd && !done {
            body_status = StepStatus::Stalled;
        }

        Ok(step_result(consumed, written, done, body_status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        CodecBackend, StreamConfig, StreamFormat, deflate_whole_buffer, inflate_whole_buffer,
        utils::{assert_eq_array, pattern_data},
    };

    fn gzip_config(chunk_size: usize) -> StreamConfig {
        StreamConfig {
            format: StreamFormat::Gzip,
            ..StreamConfig::with_chunk_size(chunk_size)
        }
    }

    /// builds a member by hand with every optional header field present
    fn member_with_all_fields(plain: &[u8], header_crc_ok: bool) -> Vec<u8> {
        let mut m = vec![
            0x1f,
            0x8b,
            CM_DEFLATE,
            FHCRC | FEXTRA | FNAME | FCOMMENT,
            1,
            2,
            3,
            4,
            0,
            3,
        ];
        m.extend_from_slice(&5u16.to_le_bytes());
        m.extend_from_slice(b"ab\0cd");
        m.extend_from_slice(b"file.txt\0");
        m.extend_from_slice(b"a comment\0");

        let mut hcrc = (crc32fast::hash(&m) & 0xffff) as u16;
        if !header_crc_ok {
            hcrc ^= 1;
        }
        m.extend_from_slice(&hcrc.to_le_bytes());

        m.extend_from_slice(&miniz_oxide::deflate::compress_to_vec(plain, 6));
        m.extend_from_slice(&crc32fast::hash(plain).to_le_bytes());
        m.extend_from_slice(&(plain.len() as u32).to_le_bytes());
        m
    }

    #[test]
    fn header_needs_are_reported_incrementally() {
        assert_eq!(header_bytes_needed(&[]).unwrap(), 10);
        assert_eq!(header_bytes_needed(&[0x1f, 0x8b]).unwrap(), 8);

        let mut h = vec![0x1f, 0x8b, 8, FEXTRA | FNAME, 0, 0, 0, 0, 0, 255];
        assert_eq!(header_bytes_needed(&h).unwrap(), 2);
        h.extend_from_slice(&3u16.to_le_bytes());
        assert_eq!(header_bytes_needed(&h).unwrap(), 3);
        h.extend_from_slice(b"xyz");
        assert_eq!(header_bytes_needed(&h).unwrap(), 1);
        h.extend_from_slice(b"name");
        assert_eq!(header_bytes_needed(&h).unwrap(), 1);
        h.push(0);
        assert_eq!(header_bytes_needed(&h).unwrap(), 0);

        assert_eq!(header_bytes_needed(&gzip_header(6)).unwrap(), 0);
    }

    #[test]
    fn bad_headers_are_stream_errors() {
        let cases: [&[u8]; 3] = [
            &[0x1f, 0x8c, 8, 0, 0, 0, 0, 0, 0, 255],
            &[0x1f, 0x8b, 7, 0, 0, 0, 0, 0, 0, 255],
            &[0x1f, 0x8b, 8, 0x20, 0, 0, 0, 0, 0, 255],
        ];
        for h in cases {
            assert_eq!(
                header_bytes_needed(h).unwrap_err().exit_code(),
                ExitCode::CodecStreamError
            );
        }
    }

    #[test]
    fn all_optional_header_fields() {
        let plain = pattern_data(3000);
        let member = member_with_all_fields(&plain, true);

        for chunk_size in [1, 3, 512] {
            let r = inflate_whole_buffer(&member, &gzip_config(chunk_size)).unwrap();
            assert_eq_array(&plain, &r);
        }

        let bad = member_with_all_fields(&plain, false);
        assert_eq!(
            inflate_whole_buffer(&bad, &gzip_config(512))
                .unwrap_err()
                .exit_code(),
            ExitCode::CodecStreamError
        );
    }

    #[test]
    fn trailer_mismatches_are_detected() {
        let config = gzip_config(100);
        let compressed = deflate_whole_buffer(&pattern_data(1000), &config).unwrap();
        let n = compressed.len();

        // crc, then isize
        for pos in [n - 8, n - 1] {
            let mut c = compressed.clone();
            c[pos] ^= 0x40;
            assert_eq!(
                inflate_whole_buffer(&c, &config).unwrap_err().exit_code(),
                ExitCode::CodecStreamError,
                "position {}",
                pos
            );
        }
    }

    #[test]
    fn header_and_trailer_split_across_tiny_chunks() {
        for backend in [CodecBackend::Miniz, CodecBackend::Flate2] {
            for chunk_size in [1, 2, 9, 11] {
                let config = StreamConfig {
                    backend,
                    ..gzip_config(chunk_size)
                };
                let plain = pattern_data(777);
                let compressed = deflate_whole_buffer(&plain, &config).unwrap();

                assert_eq!(&compressed[..3], &[0x1f, 0x8b, 8]);
                assert_eq_array(&plain, &inflate_whole_buffer(&compressed, &config).unwrap());
            }
        }
    }

    #[test]
    fn only_first_member_is_decoded() {
        let config = gzip_config(64);
        let mut two = deflate_whole_buffer(b"first member", &config).unwrap();
        let first_len = two.len();
        two.extend_from_slice(&deflate_whole_buffer(b"second member", &config).unwrap());

        let mut decoder = crate::DeflateDecoder::new(&config).unwrap();
        assert_eq!(decoder.uncompress(&two).unwrap(), b"first member");
        assert_eq!(decoder.stats().bytes_consumed, first_len);
    }
}
