/*---------------------------------------------------------------------------------------------
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the Apache License, Version 2.0. See LICENSE.txt in the project root for license information.
 *  This software incorporates material from third parties. See NOTICE.txt for details.
 *--------------------------------------------------------------------------------------------*/

use crate::{
    StreamConfig,
    chunk_driver::StreamStats,
    codec::{CodecStep, Direction, FlushMode, RawCodec, create_codec},
    streamflate_error::{AddContext, ExitCode, Result, err_exit_code},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// no codec context exists, either never initialized or after `end`
    Uninitialized,
    /// codec context exists and is ready for a new stream
    Ready,
    /// the last stream completed successfully, `reset` before the next one
    Finished,
    /// the last stream failed, `reset` before the next one
    Error,
}

/// One configured instance of the codec, bound to a single direction.
///
/// The session owns the codec context and a fixed scratch chunk that the codec
/// writes its output into on every step. Neither is ever handed out, the chunk
/// driver only sees the bytes that were produced by the most recent step.
pub struct CodecSession {
    direction: Direction,
    config: StreamConfig,
    state: SessionState,
    context: Option<Box<dyn RawCodec>>,
    scratch: Box<[u8]>,
    stats: StreamStats,
}

impl CodecSession {
    /// Creates the session in the `Uninitialized` state. The scratch chunk is
    /// allocated here and keeps its size for the lifetime of the session.
    pub fn new(direction: Direction, config: &StreamConfig) -> Result<Self> {
        config.validate()?;

        Ok(CodecSession {
            direction,
            config: *config,
            state: SessionState::Uninitialized,
            context: None,
            scratch: vec![0u8; config.chunk_size].into_boxed_slice(),
            stats: StreamStats::default(),
        })
    }

    /// Creates the codec context. Only valid on a session that doesn't have one,
    /// use `reset` to reuse a session that was already initialized.
    pub fn init(&mut self) -> Result<()> {
        if self.context.is_some() {
            log::warn!(
                "init called on {:?} session in state {:?}",
                self.direction,
                self.state
            );
            return err_exit_code(
                ExitCode::InvalidParameter,
                "session is already initialized, use reset to reuse it",
            );
        }

        match create_codec(
            self.direction,
            self.config.format,
            self.config.level,
            self.config.backend,
        ) {
            Ok(context) => {
                self.context = Some(context);
                self.state = SessionState::Ready;
                self.stats = StreamStats::default();
                log::debug!(
                    "{:?} session ready chunk_size={} format={:?} backend={:?}",
                    self.direction,
                    self.config.chunk_size,
                    self.config.format,
                    self.config.backend
                );
                Ok(())
            }
            Err(e) => {
                self.state = SessionState::Error;
                Err(e)
            }
        }
    }

    /// Tears down the codec context if there is one and creates a fresh one,
    /// leaving the session `Ready` with no buffered state from earlier streams.
    pub fn reset(&mut self) -> Result<()> {
        self.end();
        self.init().context()
    }

    /// Releases the codec context. Safe to call any number of times.
    pub fn end(&mut self) {
        if self.context.take().is_some() {
            log::debug!("{:?} session context released", self.direction);
        }
        self.state = SessionState::Uninitialized;
    }

    /// same as `end`
    pub fn destroy(&mut self) {
        self.end();
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn chunk_size(&self) -> usize {
        self.scratch.len()
    }

    /// statistics of the last stream run on this session
    pub fn stats(&self) -> StreamStats {
        self.stats
    }

    /// verifies the session can start a new stream in the given direction
    pub(crate) fn begin_run(&mut self, direction: Direction) -> Result<()> {
        if self.direction != direction {
            return err_exit_code(
                ExitCode::InvalidParameter,
                &format!(
                    "{:?} session cannot be used to {:?}",
                    self.direction, direction
                ),
            );
        }

        match self.state {
            SessionState::Ready => {
                self.stats = StreamStats::default();
                Ok(())
            }
            SessionState::Uninitialized => {
                err_exit_code(ExitCode::InvalidParameter, "session is not initialized")
            }
            SessionState::Finished | SessionState::Error => err_exit_code(
                ExitCode::InvalidParameter,
                "session must be reset before it can process another stream",
            ),
        }
    }

    /// Runs one codec step into the scratch chunk and returns the step together
    /// with the bytes that were written by it.
    pub(crate) fn step(&mut self, input: &[u8], flush: FlushMode) -> Result<(CodecStep, &[u8])> {
        let Some(context) = self.context.as_mut() else {
            return err_exit_code(ExitCode::InvalidParameter, "session is not initialized");
        };

        let step = context.step(input, &mut self.scratch, flush)?;

        log::trace!(
            "{:?} step consumed={} written={} status={:?}",
            self.direction,
            step.bytes_consumed,
            step.bytes_written,
            step.status
        );

        Ok((step, &self.scratch[..step.bytes_written]))
    }

    /// records the outcome of a run, moving the session to `Finished` or `Error`
    pub(crate) fn complete_run(&mut self, result: &Result<StreamStats>) {
        match result {
            Ok(stats) => {
                self.stats = *stats;
                self.state = SessionState::Finished;
            }
            Err(e) => {
                log::debug!("{:?} stream failed: {}", self.direction, e);
                self.state = SessionState::Error;
            }
        }
    }
}
