/*---------------------------------------------------------------------------------------------
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the Apache License, Version 2.0. See LICENSE.txt in the project root for license information.
 *  This software incorporates material from third parties. See NOTICE.txt for details.
 *--------------------------------------------------------------------------------------------*/

use crate::{
    StreamConfig,
    codec::StreamFormat,
    deflate_stream::{DeflateDecoder, DeflateEncoder},
    streamflate_error::Result,
};

/// The compression schemes that can be selected by callers that don't want to
/// deal with a particular codec directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionType {
    Uncompressed,
    Gzip,
}

impl CompressionType {
    /// creates a compressor for this scheme
    pub fn create_compressor(self, config: &StreamConfig) -> Result<Box<dyn Compressor>> {
        Ok(match self {
            CompressionType::Uncompressed => Box::new(UncompressedCompressor),
            CompressionType::Gzip => Box::new(GzipCompressor::new(config)?),
        })
    }
}

/// Common interface over the compression schemes. Each compressor holds one
/// session per direction, `reset` picks which one gets reinitialized.
pub trait Compressor: Send {
    fn compression_type(&self) -> CompressionType;

    fn reset(&mut self, for_compress: bool) -> Result<()>;

    /// releases everything held by the underlying codecs
    fn destroy(&mut self);

    fn compress(&mut self, input: &[u8]) -> Result<Vec<u8>>;

    fn uncompress(&mut self, input: &[u8]) -> Result<Vec<u8>>;
}

/// Passes the data through untouched
pub struct UncompressedCompressor;

impl UncompressedCompressor {
    fn copy(input: &[u8]) -> Result<Vec<u8>> {
        let mut output = Vec::new();
        output.try_reserve_exact(input.len())?;
        output.extend_from_slice(input);
        Ok(output)
    }
}

impl Compressor for UncompressedCompressor {
    fn compression_type(&self) -> CompressionType {
        CompressionType::Uncompressed
    }

    fn reset(&mut self, _for_compress: bool) -> Result<()> {
        Ok(())
    }

    fn destroy(&mut self) {}

    fn compress(&mut self, input: &[u8]) -> Result<Vec<u8>> {
        Self::copy(input)
    }

    fn uncompress(&mut self, input: &[u8]) -> Result<Vec<u8>> {
        Self::copy(input)
    }
}

/// gzip compressor, delegates to one encoder and one decoder. The format in the
/// config is ignored, streams are always gzip framed.
pub struct GzipCompressor {
    encoder: DeflateEncoder,
    decoder: DeflateDecoder,
}

impl GzipCompressor {
    pub fn new(config: &StreamConfig) -> Result<Self> {
        let config = StreamConfig {
            format: StreamFormat::Gzip,
            ..*config
        };
        Ok(GzipCompressor {
            encoder: DeflateEncoder::new(&config)?,
            decoder: DeflateDecoder::new(&config)?,
        })
    }
}

impl Compressor for GzipCompressor {
    fn compression_type(&self) -> CompressionType {
        CompressionType::Gzip
    }

    fn reset(&mut self, for_compress: bool) -> Result<()> {
        if for_compress {
            self.encoder.reset()
        } else {
            self.decoder.reset()
        }
    }

    fn destroy(&mut self) {
        self.encoder.destroy();
        self.decoder.destroy();
    }

    fn compress(&mut self, input: &[u8]) -> Result<Vec<u8>> {
        self.encoder.compress(input)
    }

    fn uncompress(&mut self, input: &[u8]) -> Result<Vec<u8>> {
        self.decoder.uncompress(input)
    }
}

#[test]
fn dispatch_roundtrip() {
    let config = StreamConfig::default();
    let input = b"some data that goes through the generic compressor interface".repeat(20);

    for kind in [CompressionType::Uncompressed, CompressionType::Gzip] {
        let mut c = kind.create_compressor(&config).unwrap();
        assert_eq!(c.compression_type(), kind);

        // both directions can be used back to back since they are separate sessions
        let compressed = c.compress(&input).unwrap();
        let plain = c.uncompress(&compressed).unwrap();
        assert_eq!(plain, input);

        c.reset(true).unwrap();
        c.reset(false).unwrap();
        let compressed = c.compress(&input).unwrap();
        assert_eq!(c.uncompress(&compressed).unwrap(), input);

        c.destroy();
    }
}

#[test]
fn gzip_compressor_requires_reset_between_streams() {
    let mut c = CompressionType::Gzip
        .create_compressor(&StreamConfig::default())
        .unwrap();

    c.compress(b"one").unwrap();
    assert_eq!(
        c.compress(b"two").unwrap_err().exit_code(),
        crate::ExitCode::InvalidParameter
    );

    // resetting the decoder does nothing for the encoder
    c.reset(false).unwrap();
    assert!(c.compress(b"two").is_err());

    c.reset(true).unwrap();
    let compressed = c.compress(b"two").unwrap();
    assert!(c.uncompress(&compressed).is_ok());
}

#[test]
fn gzip_compressor_writes_gzip_members() {
    use std::io::Read;

    let mut c = CompressionType::Gzip
        .create_compressor(&StreamConfig::default())
        .unwrap();

    let compressed = c.compress(b"hello gzip").unwrap();
    assert_eq!(&compressed[..2], &[0x1f, 0x8b]);

    let mut plain = Vec::new();
    flate2::read::GzDecoder::new(&compressed[..])
        .read_to_end(&mut plain)
        .unwrap();
    assert_eq!(plain, b"hello gzip");

    // and reads what the reference encoder writes
    let mut e = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    std::io::Write::write_all(&mut e, b"from flate2").unwrap();
    let reference = e.finish().unwrap();
    assert_eq!(c.uncompress(&reference).unwrap(), b"from flate2");
}
