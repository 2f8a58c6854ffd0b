/*---------------------------------------------------------------------------------------------
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the Apache License, Version 2.0. See LICENSE.txt in the project root for license information.
 *  This software incorporates material from third parties. See NOTICE.txt for details.
 *--------------------------------------------------------------------------------------------*/

use std::{collections::TryReserveError, fmt::Display, io::ErrorKind};

#[derive(Debug, Clone)]
pub struct StreamflateError {
    /// standard error code
    exit_code: ExitCode,

    /// diagnostic message including location. Content should not be relied on.
    message: String,
}

pub type Result<T> = std::result::Result<T, StreamflateError>;

/// Error codes returned by the streaming driver. The values are stable since they are
/// returned (negated) across the unmanaged interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ExitCode {
    /// the codec context could not be created
    InitializationError = 1,

    /// the codec rejected the stream (corrupt or malformed input) or faulted internally
    CodecStreamError = 2,

    /// the output buffer or sink could not grow to accept more data
    AllocationFailure = 3,

    /// the decoder consumed all the input without reaching the end of the stream
    IncompleteStream = 4,

    /// operation called with bad arguments or on a session in the wrong state
    InvalidParameter = 5,

    ShortRead = 6,
    OsError = 7,

    /// a panic was caught at the unmanaged boundary
    AssertionFailure = 8,

    GeneralFailure = 9,
}

impl ExitCode {
    /// integer value used when returning the error across the unmanaged interface
    pub fn as_integer_error_code(self) -> i32 {
        self as i32
    }
}

impl Display for ExitCode {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl Display for StreamflateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{0}: {1}", self.exit_code, self.message)
    }
}

impl StreamflateError {
    pub fn new(exit_code: ExitCode, message: &str) -> StreamflateError {
        StreamflateError {
            exit_code,
            message: message.to_owned(),
        }
    }

    pub fn wrap(exit_code: ExitCode, e: &impl Display) -> StreamflateError {
        StreamflateError {
            exit_code,
            message: e.to_string(),
        }
    }

    pub fn exit_code(&self) -> ExitCode {
        self.exit_code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// appends the location of the caller to the message so that the
    /// path an error took through the driver shows up in the diagnostics
    #[cold]
    #[track_caller]
    pub fn add_context(&mut self) {
        let caller = std::panic::Location::caller();
        self.message
            .push_str(&format!("\n at {}:{}", caller.file(), caller.line()));
    }
}

/// returns an error with the given exit code and message
#[cold]
#[track_caller]
pub fn err_exit_code<T>(exit_code: ExitCode, message: &str) -> Result<T> {
    let mut e = StreamflateError::new(exit_code, message);
    e.add_context();
    Err(e)
}

pub trait AddContext<T> {
    #[track_caller]
    fn context(self) -> Result<T>;
}

impl<T, E: Into<StreamflateError>> AddContext<T> for std::result::Result<T, E> {
    #[track_caller]
    fn context(self) -> Result<T> {
        match self {
            Ok(x) => Ok(x),
            Err(e) => {
                let mut e = e.into();
                e.add_context();
                Err(e)
            }
        }
    }
}

/// translates std::io::Error into StreamflateError
impl From<std::io::Error> for StreamflateError {
    #[track_caller]
    fn from(e: std::io::Error) -> Self {
        match e.downcast::<StreamflateError>() {
            Ok(le) => le,
            Err(e) => {
                let caller = std::panic::Location::caller();
                StreamflateError {
                    exit_code: get_io_error_exit_code(&e),
                    message: format!("error {} at {}", e, caller),
                }
            }
        }
    }
}

/// a failed Vec reservation is how we find out that the output can't grow any further
impl From<TryReserveError> for StreamflateError {
    #[track_caller]
    fn from(e: TryReserveError) -> Self {
        StreamflateError {
            exit_code: ExitCode::AllocationFailure,
            message: e.to_string(),
        }
    }
}

impl From<anyhow::Error> for StreamflateError {
    fn from(mut error: anyhow::Error) -> Self {
        // first see if there is a StreamflateError already inside
        match error.downcast::<StreamflateError>() {
            Ok(le) => {
                return le;
            }
            Err(old_error) => {
                error = old_error;
            }
        }

        // capture the original error string before we lose it due
        // to downcasting to look for stashed StreamflateErrors
        let original_string = error.to_string();

        // see if there is a StreamflateError hiding inside an io error
        // which happens if we cross an API boundary that returns an std::io:Error
        // like Read or Write
        if let Ok(ioe) = error.downcast::<std::io::Error>() {
            return match ioe.downcast::<StreamflateError>() {
                Ok(le) => le,
                Err(e) => StreamflateError {
                    exit_code: get_io_error_exit_code(&e),
                    message: format!("{} {}", e, original_string),
                },
            };
        }

        // don't know what we got, so treat it as a general failure
        StreamflateError {
            exit_code: ExitCode::GeneralFailure,
            message: original_string,
        }
    }
}

fn get_io_error_exit_code(e: &std::io::Error) -> ExitCode {
    match e.kind() {
        ErrorKind::UnexpectedEof => ExitCode::ShortRead,
        ErrorKind::OutOfMemory => ExitCode::AllocationFailure,
        _ => ExitCode::OsError,
    }
}

/// translates StreamflateError into std::io::Error, which involves putting into a Box and using Other
impl From<StreamflateError> for std::io::Error {
    fn from(e: StreamflateError) -> Self {
        std::io::Error::other(e)
    }
}

impl std::error::Error for StreamflateError {}

#[test]
fn test_error_translation() {
    // test wrapping inside an io error
    fn my_std_error() -> std::result::Result<(), std::io::Error> {
        Err(StreamflateError::new(ExitCode::CodecStreamError, "test error").into())
    }

    let e: StreamflateError = my_std_error().unwrap_err().into();
    assert_eq!(e.exit_code, ExitCode::CodecStreamError);
    assert_eq!(e.message, "test error");

    // wrapping inside anyhow
    fn my_anyhow() -> std::result::Result<(), anyhow::Error> {
        Err(StreamflateError::new(ExitCode::CodecStreamError, "test error").into())
    }

    let e: StreamflateError = my_anyhow().unwrap_err().into();
    assert_eq!(e.exit_code, ExitCode::CodecStreamError);
    assert_eq!(e.message, "test error");

    // an IO error should be translated into an OsError
    let e: StreamflateError =
        std::io::Error::new(std::io::ErrorKind::NotFound, "file not found").into();
    assert_eq!(e.exit_code, ExitCode::OsError);

    // running out of memory while writing is an allocation failure
    let e: StreamflateError = std::io::Error::from(std::io::ErrorKind::OutOfMemory).into();
    assert_eq!(e.exit_code, ExitCode::AllocationFailure);
}

#[test]
fn test_context_appends_location() {
    fn fails() -> Result<()> {
        err_exit_code(ExitCode::IncompleteStream, "ran out of input")
    }

    let e = fails().context().unwrap_err();
    assert_eq!(e.exit_code(), ExitCode::IncompleteStream);
    assert!(e.message().starts_with("ran out of input"));

    // one location from err_exit_code and one from context()
    assert_eq!(e.message().matches("streamflate_error.rs").count(), 2);
}

#[test]
fn test_try_reserve_is_allocation_failure() {
    let mut v: Vec<u8> = Vec::new();
    let e: StreamflateError = v.try_reserve_exact(usize::MAX).unwrap_err().into();
    assert_eq!(e.exit_code(), ExitCode::AllocationFailure);
}
