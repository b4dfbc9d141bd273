//! # Serial Byte Stream Reader
//!
//! A fixed receive buffer that accumulates bytes from a serial source and
//! presents only the unconsumed region to a protocol parser. After parsing,
//! leftover bytes slide to the front so the next read appends at the right
//! offset.
//!
//! ```text
//! ┌──────────────┬───────────────────────┬────────────────────┐
//! │   consumed   │  unconsumed (parser)  │     free space     │
//! └──────────────┴───────────────────────┴────────────────────┘
//!                ▲                       ▲
//!              start                    len
//!
//! after compaction:
//! ┌───────────────────────┬───────────────────────────────────┐
//! │  unconsumed (parser)  │            free space             │
//! └───────────────────────┴───────────────────────────────────┘
//! ```
//!
//! The transport is anything implementing `embedded_io::Read + ReadReady`,
//! so the same reader works over a host serial port or a UART peripheral.

use embedded_io::{Read, ReadReady, Write};

/// Receive buffer size per serial device
pub const RECV_BUFFER_SIZE: usize = 4 * 1024;

/// Result of one parse step over the unconsumed region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Step {
    /// Consumed this many bytes; call again on the remainder
    Continue(usize),
    /// Consumed this many bytes; no further complete unit is available
    Done(usize),
}

/// Errors raised while pumping a byte stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StreamError<E> {
    /// The buffer is full of bytes no parser step would consume
    Overflow,
    /// The underlying transport failed
    Transport(E),
}

/// A byte-oriented device protocol driven by `ByteStreamReader`
///
/// Implementors own the protocol state and the most recent decoded sample.
/// Commands are written back through the same link the bytes arrive on.
pub trait SerialProtocol {
    /// Decoded sample type
    type Sample: Copy + Default;

    /// Connection opened; send any initial handshake
    fn on_open<W: Write>(&mut self, link: &mut W, now_ms: u64) -> Result<(), W::Error>;

    /// Connection about to close
    fn on_close<W: Write>(&mut self, link: &mut W) -> Result<(), W::Error>;

    /// Consume complete units from `data`
    fn parse<W: Write>(&mut self, link: &mut W, data: &[u8], now_ms: u64) -> Result<Step, W::Error>;

    /// Most recently decoded sample, zeroed if none yet
    fn current_value(&self) -> Self::Sample;
}

/// Sliding-window accumulator with a fixed capacity
pub struct ByteStreamReader<const N: usize = RECV_BUFFER_SIZE> {
    data: [u8; N],
    len: usize,
}

impl<const N: usize> ByteStreamReader<N> {
    pub const fn new() -> Self {
        Self {
            data: [0u8; N],
            len: 0,
        }
    }

    #[inline]
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Bytes received but not yet consumed
    #[inline]
    pub fn pending(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Discard everything, e.g. when a connection is reopened
    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Read whatever has arrived, then run `step` until it reports `Done`
    ///
    /// The step runs at least once per call, even when no byte arrived, so
    /// time-driven protocol logic (handshake retries) keeps progressing.
    /// Returns the number of newly read bytes.
    pub fn pump<R, F>(&mut self, source: &mut R, mut step: F) -> Result<usize, StreamError<R::Error>>
    where
        R: Read + ReadReady,
        F: FnMut(&mut R, &[u8]) -> Result<Step, R::Error>,
    {
        let mut read = 0;
        if source.read_ready().map_err(StreamError::Transport)? {
            if self.len == N {
                return Err(StreamError::Overflow);
            }
            read = source
                .read(&mut self.data[self.len..])
                .map_err(StreamError::Transport)?;
            self.len += read;
        }

        let mut start = 0;
        loop {
            match step(source, &self.data[start..self.len]).map_err(StreamError::Transport)? {
                Step::Continue(consumed) => start += consumed,
                Step::Done(consumed) => {
                    start += consumed;
                    break;
                }
            }
        }

        debug_assert!(start <= self.len);
        if start > 0 {
            self.data.copy_within(start..self.len, 0);
            self.len -= start;
        }
        Ok(read)
    }
}

impl<const N: usize> Default for ByteStreamReader<N> {
    fn default() -> Self {
        Self::new()
    }
}
