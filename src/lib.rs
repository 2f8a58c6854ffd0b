/*---------------------------------------------------------------------------------------------
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the Apache License, Version 2.0. See LICENSE.txt in the project root for license information.
 *  This software incorporates material from third parties. See NOTICE.txt for details.
 *--------------------------------------------------------------------------------------------*/

// forbid lints that we already have eliminated from the codebase so they don't show up in the future
#![forbid(unsafe_code)]
#![forbid(trivial_casts)]
#![forbid(trivial_numeric_casts)]
#![forbid(non_ascii_idents)]
#![forbid(unused_extern_crates)]
#![forbid(unused_import_braces)]
#![forbid(redundant_lifetimes)]
#![forbid(unused_lifetimes)]
#![forbid(unused_macro_rules)]
#![forbid(macro_use_extern_crate)]

mod chunk_driver;
mod codec;
mod codec_session;
mod compressor;
mod deflate_stream;
mod gzip_frame;
mod output_sink;
mod streamflate_error;

mod utils;

pub use codec::{CodecBackend, Direction, MAX_LEVEL, StreamFormat};
pub use codec_session::{CodecSession, SessionState};

pub use chunk_driver::{StreamStats, decode_into, encode_into};

pub use deflate_stream::{
    DeflateDecoder, DeflateEncoder, deflate_whole_buffer, inflate_whole_buffer,
};

pub use output_sink::{ByteSink, GrowableBuffer, WriteSink};

pub use compressor::{CompressionType, Compressor, GzipCompressor, UncompressedCompressor};

pub use streamflate_error::ExitCode;
pub use streamflate_error::{AddContext, Result, StreamflateError, err_exit_code};

/// scratch chunk size used when nothing else is configured
pub const DEFAULT_CHUNK_SIZE: usize = 512;

/// Configures a codec session. The values are fixed once the session is
/// constructed, `reset` reuses them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamConfig {
    /// Size of the scratch chunk the codec writes into on every step. Smaller
    /// chunks mean more codec calls but less memory held by each session.
    pub chunk_size: usize,

    /// Compression level 0-9. The decoder ignores it but still rejects values out of range.
    pub level: u8,

    /// zlib wrapped, gzip wrapped or raw deflate
    pub format: StreamFormat,

    /// which deflate implementation to drive
    pub backend: CodecBackend,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            level: 6,
            format: StreamFormat::Zlib,
            backend: CodecBackend::Miniz,
        }
    }
}

impl StreamConfig {
    /// returns a copy of the default configuration with a different chunk size
    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self {
            chunk_size,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return err_exit_code(ExitCode::InvalidParameter, "chunk_size must be non-zero");
        }
        if self.level > MAX_LEVEL {
            return err_exit_code(
                ExitCode::InvalidParameter,
                &format!("level {} is out of range 0-{}", self.level, MAX_LEVEL),
            );
        }
        Ok(())
    }
}

#[cfg(test)]
static INIT: std::sync::Once = std::sync::Once::new();

/// Initialize the logger for tests. This is a no-op if the logger is already initialized.
#[cfg(test)]
pub fn init_logging() {
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}
