/*---------------------------------------------------------------------------------------------
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the Apache License, Version 2.0. See LICENSE.txt in the project root for license information.
 *  This software incorporates material from third parties. See NOTICE.txt for details.
 *--------------------------------------------------------------------------------------------*/

use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    ptr::{null, null_mut},
};

use streamflate::{
    CodecBackend, DeflateDecoder, DeflateEncoder, ExitCode, StreamConfig, StreamFormat,
    StreamflateError, err_exit_code,
};

/// Helper function to catch panics and convert them into the appropriate StreamflateError
fn catch_unwind_result<R>(
    f: impl FnOnce() -> Result<R, StreamflateError>,
) -> Result<R, StreamflateError> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(r) => r,
        Err(err) => {
            if let Some(message) = err.downcast_ref::<&str>() {
                Err(StreamflateError::new(ExitCode::AssertionFailure, message))
            } else if let Some(message) = err.downcast_ref::<String>() {
                Err(StreamflateError::new(
                    ExitCode::AssertionFailure,
                    message.as_str(),
                ))
            } else {
                Err(StreamflateError::new(
                    ExitCode::AssertionFailure,
                    "unknown panic",
                ))
            }
        }
    }
}

/// copies a string into a limited length zero terminated utf8 buffer
fn copy_cstring_utf8_to_buffer(str: &str, target_error_string: &mut [u8]) {
    if target_error_string.is_empty() {
        return;
    }

    // stop at an embedded zero, the caller would not see anything past it anyway
    let b = str.as_bytes();
    let b = &b[..b.iter().position(|&x| x == 0).unwrap_or(b.len())];

    let copy_len = std::cmp::min(b.len(), target_error_string.len() - 1);

    // copy string into buffer as much as fits
    target_error_string[0..copy_len].copy_from_slice(&b[0..copy_len]);

    // always null terminated
    target_error_string[copy_len] = 0;
}

/// copies the error into the caller's buffer (if any) and returns the negated exit code
unsafe fn report_error(
    e: &StreamflateError,
    error_string: *mut std::os::raw::c_uchar,
    error_string_buffer_len: u64,
) -> i32 {
    if error_string != null_mut() {
        unsafe {
            copy_cstring_utf8_to_buffer(
                e.message(),
                std::slice::from_raw_parts_mut(error_string, error_string_buffer_len as usize),
            );
        }
    }
    -e.exit_code().as_integer_error_code()
}

/// translates the flags and chunk size passed over the interface into a config
///  bits 0-3: compression level (0-9)
///  bit 4: raw deflate instead of zlib framing
///  bit 5: use the flate2 backend instead of miniz_oxide
///  bit 6: gzip instead of zlib framing (can't be combined with bit 4)
fn config_from_flags(flags: u32, chunk_size: u64) -> Result<StreamConfig, StreamflateError> {
    let level = (flags & 0xf) as u8;
    if level > streamflate::MAX_LEVEL {
        return err_exit_code(ExitCode::InvalidParameter, "compression level out of range");
    }

    let format = match (flags & 0x10 != 0, flags & 0x40 != 0) {
        (false, false) => StreamFormat::Zlib,
        (true, false) => StreamFormat::Raw,
        (false, true) => StreamFormat::Gzip,
        (true, true) => {
            return err_exit_code(
                ExitCode::InvalidParameter,
                "raw and gzip framing are mutually exclusive",
            );
        }
    };

    Ok(StreamConfig {
        chunk_size: if chunk_size == 0 {
            streamflate::DEFAULT_CHUNK_SIZE
        } else {
            chunk_size as usize
        },
        level,
        format,
        backend: if flags & 0x20 != 0 {
            CodecBackend::Flate2
        } else {
            CodecBackend::Miniz
        },
    })
}

/// hands a finished buffer over to the caller, who releases it with after_compress/after_uncompress
unsafe fn return_buffer(v: Vec<u8>, output_buffer: *mut *mut u8, output_size: *mut u64) {
    let len = v.len();
    let ptr = Box::into_raw(v.into_boxed_slice()) as *mut u8;
    unsafe {
        *output_buffer = ptr;
        *output_size = len as u64;
    }
}

unsafe fn release_buffer(buffer: *mut u8, buffer_size: u64) {
    if buffer != null_mut() {
        unsafe {
            drop(Box::from_raw(std::ptr::slice_from_raw_parts_mut(
                buffer,
                buffer_size as usize,
            )));
        }
    }
}

unsafe fn input_slice<'a>(input_buffer: *const u8, input_buffer_size: u64) -> &'a [u8] {
    if input_buffer == null() {
        &[]
    } else {
        unsafe { std::slice::from_raw_parts(input_buffer, input_buffer_size as usize) }
    }
}

const MAGIC_DECOMPRESSION_CONTEXT: u32 = 87654321;
const MAGIC_COMPRESSION_CONTEXT: u32 = 12345678;

struct CompressionContext {
    magic: u32,
    encoder: DeflateEncoder,
}

impl CompressionContext {
    fn from_pointer<'a>(ptr: *mut std::ffi::c_void) -> Result<&'a mut Self, StreamflateError> {
        if ptr == null_mut() {
            return err_exit_code(ExitCode::InvalidParameter, "null context passed in");
        }
        unsafe {
            let context = ptr as *mut CompressionContext;
            assert_eq!(
                (*context).magic,
                MAGIC_COMPRESSION_CONTEXT,
                "invalid context passed in"
            );
            Ok(&mut *context)
        }
    }
}

struct DecompressionContext {
    magic: u32,
    decoder: DeflateDecoder,
}

impl DecompressionContext {
    fn from_pointer<'a>(ptr: *mut std::ffi::c_void) -> Result<&'a mut Self, StreamflateError> {
        if ptr == null_mut() {
            return err_exit_code(ExitCode::InvalidParameter, "null context passed in");
        }
        unsafe {
            let context = ptr as *mut DecompressionContext;
            assert_eq!(
                (*context).magic,
                MAGIC_DECOMPRESSION_CONTEXT,
                "invalid context passed in"
            );
            Ok(&mut *context)
        }
    }
}

/// Allocates new compression context, must be freed with free_compression_context.
/// Returns null if the flags are invalid or the codec could not be initialized.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn create_compression_context(
    flags: u32,
    chunk_size: u64,
) -> *mut std::ffi::c_void {
    match catch_unwind_result(|| {
        let config = config_from_flags(flags, chunk_size)?;
        let context = Box::new(CompressionContext {
            magic: MAGIC_COMPRESSION_CONTEXT,
            encoder: DeflateEncoder::new(&config)?,
        });

        Ok(Box::into_raw(context) as *mut std::ffi::c_void)
    }) {
        Ok(context) => context,
        Err(e) => {
            eprintln!("error creating compression context: {}", e.message());
            null_mut()
        }
    }
}

/// Frees the compression context
#[unsafe(no_mangle)]
pub unsafe extern "C" fn free_compression_context(context: *mut std::ffi::c_void) {
    if context == null_mut() {
        return;
    }
    unsafe {
        let x = Box::from_raw(context as *mut CompressionContext);
        assert_eq!(
            x.magic, MAGIC_COMPRESSION_CONTEXT,
            "invalid context passed in"
        );
        // let Box destroy the object. If this asserts, we have some kind of memory corruption so better to just kill the process.
    }
}

/// Gets the context ready for the next independent stream.
///
/// Returns 0 on success, < 0 if there is an error (negative value is the error code)
#[unsafe(no_mangle)]
pub unsafe extern "C" fn reset_compression_context(
    context: *mut std::ffi::c_void,
    error_string: *mut std::os::raw::c_uchar,
    error_string_buffer_len: u64,
) -> i32 {
    match catch_unwind_result(|| CompressionContext::from_pointer(context)?.encoder.reset()) {
        Ok(()) => 0,
        Err(e) => unsafe { report_error(&e, error_string, error_string_buffer_len) },
    }
}

/// Compresses a whole buffer into a complete stream. On success the result is placed in
/// `output_buffer`/`output_size` and must be released with after_compress. The context
/// needs a reset_compression_context before it can compress the next stream.
///
/// Returns 0 on success, < 0 if there is an error (negative value is the error code)
#[unsafe(no_mangle)]
pub unsafe extern "C" fn compress_buffer(
    context: *mut std::ffi::c_void,
    input_buffer: *const u8,
    input_buffer_size: u64,
    output_buffer: *mut *mut u8,
    output_size: *mut u64,
    error_string: *mut std::os::raw::c_uchar,
    error_string_buffer_len: u64,
) -> i32 {
    unsafe {
        match catch_unwind_result(|| {
            if output_buffer == null_mut() || output_size == null_mut() {
                return err_exit_code(ExitCode::InvalidParameter, "null output pointer");
            }
            let context = CompressionContext::from_pointer(context)?;
            let input = input_slice(input_buffer, input_buffer_size);

            let compressed = context.encoder.compress(input)?;
            return_buffer(compressed, output_buffer, output_size);
            Ok(())
        }) {
            Ok(()) => 0,
            Err(e) => report_error(&e, error_string, error_string_buffer_len),
        }
    }
}

/// Releases a buffer returned by compress_buffer. Passing null does nothing.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn after_compress(output_buffer: *mut u8, output_size: u64) {
    unsafe { release_buffer(output_buffer, output_size) }
}

/// Allocates new decompression context, must be freed with free_decompression_context
#[unsafe(no_mangle)]
pub unsafe extern "C" fn create_decompression_context(
    flags: u32,
    chunk_size: u64,
) -> *mut std::ffi::c_void {
    match catch_unwind_result(|| {
        let config = config_from_flags(flags, chunk_size)?;
        let context = Box::new(DecompressionContext {
            magic: MAGIC_DECOMPRESSION_CONTEXT,
            decoder: DeflateDecoder::new(&config)?,
        });

        Ok(Box::into_raw(context) as *mut std::ffi::c_void)
    }) {
        Ok(context) => context,
        Err(e) => {
            eprintln!("error creating decompression context: {}", e.message());
            null_mut()
        }
    }
}

/// Frees the decompression context
#[unsafe(no_mangle)]
pub unsafe extern "C" fn free_decompression_context(context: *mut std::ffi::c_void) {
    if context == null_mut() {
        return;
    }
    unsafe {
        let x = Box::from_raw(context as *mut DecompressionContext);
        assert_eq!(
            x.magic, MAGIC_DECOMPRESSION_CONTEXT,
            "invalid context passed in"
        );
        // let Box destroy the object
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn reset_decompression_context(
    context: *mut std::ffi::c_void,
    error_string: *mut std::os::raw::c_uchar,
    error_string_buffer_len: u64,
) -> i32 {
    match catch_unwind_result(|| DecompressionContext::from_pointer(context)?.decoder.reset()) {
        Ok(()) => 0,
        Err(e) => unsafe { report_error(&e, error_string, error_string_buffer_len) },
    }
}

/// Decompresses the stream at the start of the input buffer. Anything after the end of
/// the stream is ignored. The result must be released with after_uncompress.
///
/// Returns 0 on success, < 0 if there is an error (negative value is the error code)
#[unsafe(no_mangle)]
pub unsafe extern "C" fn uncompress_buffer(
    context: *mut std::ffi::c_void,
    input_buffer: *const u8,
    input_buffer_size: u64,
    output_buffer: *mut *mut u8,
    output_size: *mut u64,
    error_string: *mut std::os::raw::c_uchar,
    error_string_buffer_len: u64,
) -> i32 {
    unsafe {
        match catch_unwind_result(|| {
            if output_buffer == null_mut() || output_size == null_mut() {
                return err_exit_code(ExitCode::InvalidParameter, "null output pointer");
            }
            let context = DecompressionContext::from_pointer(context)?;
            let input = input_slice(input_buffer, input_buffer_size);

            let plain = context.decoder.uncompress(input)?;
            return_buffer(plain, output_buffer, output_size);
            Ok(())
        }) {
            Ok(()) => 0,
            Err(e) => report_error(&e, error_string, error_string_buffer_len),
        }
    }
}

/// Releases a buffer returned by uncompress_buffer. Passing null does nothing.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn after_uncompress(output_buffer: *mut u8, output_size: u64) {
    unsafe { release_buffer(output_buffer, output_size) }
}

#[test]
fn test_copy_cstring_utf8_to_buffer() {
    // test utf8
    let mut buffer = [0u8; 10];
    copy_cstring_utf8_to_buffer("h\u{00E1}llo", &mut buffer);
    assert_eq!(buffer, [b'h', 0xc3, 0xa1, b'l', b'l', b'o', 0, 0, 0, 0]);

    // test null termination
    let mut buffer = [0u8; 10];
    copy_cstring_utf8_to_buffer("helloeveryone", &mut buffer);
    assert_eq!(
        buffer,
        [b'h', b'e', b'l', b'l', b'o', b'e', b'v', b'e', b'r', 0]
    );

    // embedded zero ends the string
    let mut buffer = [0xffu8; 6];
    copy_cstring_utf8_to_buffer("ab\0cd", &mut buffer);
    assert_eq!(&buffer[..3], b"ab\0");

    // nothing to write into
    copy_cstring_utf8_to_buffer("abc", &mut []);
}

#[test]
fn test_config_from_flags() {
    let c = config_from_flags(9 | 0x10 | 0x20, 0).unwrap();
    assert_eq!(c.level, 9);
    assert_eq!(c.format, StreamFormat::Raw);
    assert_eq!(c.backend, CodecBackend::Flate2);
    assert_eq!(c.chunk_size, streamflate::DEFAULT_CHUNK_SIZE);

    let c = config_from_flags(1, 77).unwrap();
    assert_eq!(c.format, StreamFormat::Zlib);
    assert_eq!(c.backend, CodecBackend::Miniz);
    assert_eq!(c.chunk_size, 77);

    let c = config_from_flags(6 | 0x40, 0).unwrap();
    assert_eq!(c.format, StreamFormat::Gzip);

    assert_eq!(
        config_from_flags(12, 0).unwrap_err().exit_code(),
        ExitCode::InvalidParameter
    );
    assert_eq!(
        config_from_flags(6 | 0x10 | 0x40, 0).unwrap_err().exit_code(),
        ExitCode::InvalidParameter
    );
}

#[test]
fn extern_interface() {
    let original: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8 ^ (i / 1000) as u8).collect();
    let error_string = &mut [0u8; 1024];

    for flags in [1, 6, 9 | 0x10, 6 | 0x20, 6 | 0x10 | 0x20, 6 | 0x40, 1 | 0x20 | 0x40] {
        unsafe {
            let compression_context = create_compression_context(flags, 1000);
            assert!(compression_context != null_mut());

            let mut compressed = Vec::new();
            for _ in 0..2 {
                let mut result: *mut u8 = null_mut();
                let mut result_size: u64 = 0;

                let retval = compress_buffer(
                    compression_context,
                    original.as_ptr(),
                    original.len() as u64,
                    &mut result,
                    &mut result_size,
                    error_string.as_mut_ptr(),
                    error_string.len() as u64,
                );
                assert!(
                    retval == 0,
                    "expecting no error {} {:?}",
                    retval,
                    get_cstring(&error_string)
                );

                let chunk = std::slice::from_raw_parts(result, result_size as usize).to_vec();
                after_compress(result, result_size);

                // the same context produces the same stream after a reset
                if compressed.is_empty() {
                    compressed = chunk;
                } else {
                    assert_eq!(compressed, chunk);
                }

                assert_eq!(
                    reset_compression_context(
                        compression_context,
                        error_string.as_mut_ptr(),
                        error_string.len() as u64
                    ),
                    0
                );
            }

            free_compression_context(compression_context);

            let decompression_context = create_decompression_context(flags, 0);
            assert!(decompression_context != null_mut());

            let mut result: *mut u8 = null_mut();
            let mut result_size: u64 = 0;
            let retval = uncompress_buffer(
                decompression_context,
                compressed.as_ptr(),
                compressed.len() as u64,
                &mut result,
                &mut result_size,
                error_string.as_mut_ptr(),
                error_string.len() as u64,
            );
            assert!(
                retval == 0,
                "expecting no error {} {:?}",
                retval,
                get_cstring(&error_string)
            );

            let recreated = std::slice::from_raw_parts(result, result_size as usize);
            assert_eq!(original.len(), recreated.len());
            assert!(original[..] == recreated[..]);
            after_uncompress(result, result_size);

            free_decompression_context(decompression_context);
        }
    }
}

#[test]
fn empty_input_roundtrip() {
    unsafe {
        let compression_context = create_compression_context(6, 0);
        let mut result: *mut u8 = null_mut();
        let mut result_size: u64 = 0;

        let retval = compress_buffer(
            compression_context,
            null(),
            0,
            &mut result,
            &mut result_size,
            null_mut(),
            0,
        );
        assert_eq!(retval, 0);
        assert!(result_size > 0);

        let compressed = std::slice::from_raw_parts(result, result_size as usize).to_vec();
        after_compress(result, result_size);
        free_compression_context(compression_context);

        let decompression_context = create_decompression_context(0, 0);
        let retval = uncompress_buffer(
            decompression_context,
            compressed.as_ptr(),
            compressed.len() as u64,
            &mut result,
            &mut result_size,
            null_mut(),
            0,
        );
        assert_eq!(retval, 0);
        assert_eq!(result_size, 0);
        after_uncompress(result, result_size);
        free_decompression_context(decompression_context);
    }
}

/// tests the error message translation
#[test]
fn test_error_translation() {
    unsafe {
        let compression_context = create_compression_context(6, 0);

        let chunk = vec![7u8; 5000];
        let mut result: *mut u8 = null_mut();
        let mut result_size: u64 = 0;
        let mut error_string = [0u8; 100];

        let retval = compress_buffer(
            compression_context,
            chunk.as_ptr(),
            chunk.len() as u64,
            &mut result,
            &mut result_size,
            error_string.as_mut_ptr(),
            error_string.len() as u64,
        );
        assert_eq!(retval, 0);
        let compressed = std::slice::from_raw_parts(result, result_size as usize).to_vec();
        after_compress(result, result_size);

        // second stream without a reset
        let retval = compress_buffer(
            compression_context,
            chunk.as_ptr(),
            chunk.len() as u64,
            &mut result,
            &mut result_size,
            error_string.as_mut_ptr(),
            error_string.len() as u64,
        );
        assert_eq!(retval, -(ExitCode::InvalidParameter as i32));
        assert!(!get_cstring(&error_string).to_bytes().is_empty());

        free_compression_context(compression_context);

        let decompression_context = create_decompression_context(0, 0);
        let retval = uncompress_buffer(
            decompression_context,
            compressed.as_ptr(),
            (compressed.len() - 2) as u64,
            &mut result,
            &mut result_size,
            error_string.as_mut_ptr(),
            error_string.len() as u64,
        );
        assert_eq!(retval, -(ExitCode::IncompleteStream as i32));

        let retval = reset_decompression_context(null_mut(), error_string.as_mut_ptr(), 100);
        assert_eq!(retval, -(ExitCode::InvalidParameter as i32));
        assert!(
            get_cstring(&error_string)
                .to_str()
                .unwrap()
                .starts_with("null context passed in")
        );

        free_decompression_context(decompression_context);

        // level out of range
        assert!(create_compression_context(15, 0) == null_mut());
    }
}

/// helper to get a cstring from a fixed size array for testing (finds zero terminator)
#[cfg(test)]
fn get_cstring<const N: usize>(error_string: &[u8; N]) -> &std::ffi::CStr {
    let len = error_string.iter().position(|&x| x == 0).unwrap();

    std::ffi::CStr::from_bytes_with_nul(&error_string[0..len + 1]).unwrap()
}
