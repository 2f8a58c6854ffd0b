/*---------------------------------------------------------------------------------------------
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the Apache License, Version 2.0. See LICENSE.txt in the project root for license information.
 *  This software incorporates material from third parties. See NOTICE.txt for details.
 *--------------------------------------------------------------------------------------------*/

use std::{collections::VecDeque, io::Write};

use crate::streamflate_error::{AddContext, ExitCode, Result, err_exit_code};

/// Append-only destination for the bytes produced by the chunk driver.
///
/// If `append_bytes` fails the driver stops right away. Whatever was appended before
/// the failure stays in the sink, so the caller has to treat the sink contents
/// as unusable after an error.
pub trait ByteSink {
    fn append_bytes(&mut self, bytes: &[u8]) -> Result<()>;

    /// number of bytes held by the sink
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ByteSink for Vec<u8> {
    fn append_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.try_reserve(bytes.len())?;
        self.extend_from_slice(bytes);
        Ok(())
    }

    fn len(&self) -> usize {
        Vec::len(self)
    }
}

impl ByteSink for VecDeque<u8> {
    fn append_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.try_reserve(bytes.len())?;
        self.extend(bytes);
        Ok(())
    }

    fn len(&self) -> usize {
        VecDeque::len(self)
    }
}

impl<S: ByteSink + ?Sized> ByteSink for &mut S {
    fn append_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        (**self).append_bytes(bytes)
    }

    fn len(&self) -> usize {
        (**self).len()
    }
}

/// Adapts any writer into a sink, keeping track of how much was written to it
/// since the writer itself can't tell us.
pub struct WriteSink<W: Write> {
    inner: W,
    length: usize,
}

impl<W: Write> WriteSink<W> {
    pub fn new(inner: W) -> Self {
        WriteSink { inner, length: 0 }
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> ByteSink for WriteSink<W> {
    fn append_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.inner.write_all(bytes).context()?;
        self.length += bytes.len();
        Ok(())
    }

    fn len(&self) -> usize {
        self.length
    }
}

/// Single buffer output used by the whole buffer `compress` and `uncompress` calls.
///
/// Nothing is allocated until the first bytes arrive. The first chunk allocates
/// exactly its own size and every later chunk grows the buffer to exactly the new
/// total, so the capacity never runs ahead of what was produced. A growth that
/// fails is reported as an allocation failure, and since the partially filled
/// buffer is owned here it is released as soon as the caller drops the error path.
///
/// An optional limit caps the total size. Growing past it fails the same way a
/// failed allocation does.
#[derive(Debug)]
pub struct GrowableBuffer {
    data: Vec<u8>,
    limit: usize,
}

impl Default for GrowableBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl GrowableBuffer {
    pub fn new() -> Self {
        Self::with_limit(usize::MAX)
    }

    /// buffer that refuses to grow beyond `limit` bytes
    pub fn with_limit(limit: usize) -> Self {
        GrowableBuffer {
            data: Vec::new(),
            limit,
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }
}

impl ByteSink for GrowableBuffer {
    fn append_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }

        if bytes.len() > self.limit - self.data.len() {
            return err_exit_code(
                ExitCode::AllocationFailure,
                &format!(
                    "output would grow to {} bytes, limit is {}",
                    self.data.len() + bytes.len(),
                    self.limit
                ),
            );
        }

        self.data.try_reserve_exact(bytes.len())?;
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    fn len(&self) -> usize {
        self.data.len()
    }
}

#[test]
fn growable_buffer_starts_unallocated() {
    let mut b = GrowableBuffer::new();
    assert_eq!(b.capacity(), 0);

    b.append_bytes(&[]).unwrap();
    assert_eq!(b.capacity(), 0);
    assert!(b.is_empty());

    b.append_bytes(&[1, 2, 3]).unwrap();
    b.append_bytes(&[4, 5]).unwrap();
    assert_eq!(b.len(), 5);
    assert!(b.capacity() >= 5);
    assert_eq!(b.into_vec(), vec![1, 2, 3, 4, 5]);
}

#[test]
fn growable_buffer_reports_allocation_failure() {
    let mut b = GrowableBuffer::with_limit(4);
    b.append_bytes(&[1, 2, 3]).unwrap();

    let e = b.append_bytes(&[4, 5]).unwrap_err();
    assert_eq!(e.exit_code(), ExitCode::AllocationFailure);
    assert_eq!(b.as_slice(), &[1, 2, 3]);

    // exactly up to the limit is fine
    b.append_bytes(&[4]).unwrap();
    assert_eq!(b.len(), 4);
    assert!(b.capacity() >= 4);
}

#[test]
fn sinks_track_length() {
    let mut v: Vec<u8> = Vec::new();
    let mut d: VecDeque<u8> = VecDeque::new();
    let mut w = WriteSink::new(Vec::new());

    for chunk in [&b"abc"[..], b"", b"defg"] {
        v.append_bytes(chunk).unwrap();
        d.append_bytes(chunk).unwrap();
        w.append_bytes(chunk).unwrap();
    }

    assert_eq!(ByteSink::len(&v), 7);
    assert_eq!(ByteSink::len(&d), 7);
    assert_eq!(w.len(), 7);
    assert_eq!(w.get_ref(), &b"abcdefg".to_vec());
    assert_eq!(d.iter().copied().collect::<Vec<u8>>(), v);
}

#[test]
fn write_sink_propagates_errors() {
    struct FullDisk;

    impl Write for FullDisk {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::other("disk full"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    let mut w = WriteSink::new(FullDisk);
    let e = w.append_bytes(b"data").unwrap_err();
    assert_eq!(e.exit_code(), crate::ExitCode::OsError);
    assert_eq!(w.len(), 0);
}
