//! Outbound command transmission.
//!
//! The engine does no I/O of its own, so [`CommandTransmitter`] writes into
//! a bounded outbox of [`Outbound`] frames. The IO task drains the outbox in
//! order, writing each frame to the transport and then sleeping for the
//! frame's `pause_after` before the next one.
//!
//! # Wire format
//!
//! ```text
//! <command>\r\n                      commands
//! <slice><slice>...<slice><0x1A>     SMS body, paced per slice
//! <0x1B>                             abort SMS body entry
//! ```

use std::collections::VecDeque;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use tracing::trace;

use gsmlink_core::error::{Error, Result};

/// Terminator appended to every command line.
pub const LINE_TERMINATOR: &[u8] = b"\r\n";

/// SUB: commits an SMS body.
pub const CTRL_Z: u8 = 0x1A;

/// ESC: aborts SMS body entry.
pub const ESC: u8 = 0x1B;

/// Default outbox capacity in bytes.
pub const DEFAULT_OUTBOX_CAPACITY: usize = 4096;

/// One frame waiting to be written to the link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub bytes: Bytes,
    /// Delay to observe after writing this frame.
    pub pause_after: Duration,
}

/// Encode a command line with its terminator.
pub fn encode_line(line: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(line.len() + LINE_TERMINATOR.len());
    buf.put_slice(line.as_bytes());
    buf.put_slice(LINE_TERMINATOR);
    buf.freeze()
}

/// Formats commands, queues them for the link and remembers what was sent.
#[derive(Debug)]
pub struct CommandTransmitter {
    outbox: VecDeque<Outbound>,
    queued: usize,
    capacity: usize,
    settle: Duration,
    chunk_delay: Duration,
    last_sent: Option<String>,
    awaiting: bool,
    bytes_written: u64,
}

impl CommandTransmitter {
    /// Create a transmitter.
    ///
    /// `settle` follows every command line; `chunk_delay` follows every
    /// slice of a chunked payload except the last.
    pub fn new(capacity: usize, settle: Duration, chunk_delay: Duration) -> Self {
        CommandTransmitter {
            outbox: VecDeque::new(),
            queued: 0,
            capacity,
            settle,
            chunk_delay,
            last_sent: None,
            awaiting: false,
            bytes_written: 0,
        }
    }

    /// Queue a command line and record it as the last command sent.
    ///
    /// Returns the number of bytes queued, terminator included. If the
    /// outbox cannot take the whole line nothing is queued and
    /// [`Error::ShortWrite`] is returned.
    pub fn send(&mut self, line: &str) -> Result<usize> {
        let frame = encode_line(line);
        let n = frame.len();
        self.reserve(n)?;
        self.push(frame, self.settle);
        trace!(line, "queued command");
        self.last_sent = Some(line.to_string());
        self.awaiting = true;
        Ok(n)
    }

    /// Queue a payload in `chunk_size` slices with pacing between them.
    ///
    /// The last sent command is left untouched: a payload answers a
    /// prompt and its result correlates with the command that asked for it.
    pub fn send_payload_chunked(&mut self, payload: &[u8], chunk_size: usize) -> Result<usize> {
        if chunk_size == 0 {
            return Err(Error::InvalidParameter("chunk size must be non-zero".into()));
        }
        self.reserve(payload.len())?;
        let count = payload.len().div_ceil(chunk_size);
        for (i, slice) in payload.chunks(chunk_size).enumerate() {
            let pause = if i + 1 == count {
                self.settle
            } else {
                self.chunk_delay
            };
            self.push(Bytes::copy_from_slice(slice), pause);
        }
        trace!(bytes = payload.len(), chunks = count, "queued payload");
        Ok(payload.len())
    }

    /// Queue an SMS body followed by Ctrl-Z.
    pub fn submit_body(&mut self, body: &[u8], chunk_size: usize) -> Result<usize> {
        let mut payload = BytesMut::with_capacity(body.len() + 1);
        payload.put_slice(body);
        payload.put_u8(CTRL_Z);
        self.send_payload_chunked(&payload, chunk_size)
    }

    /// Queue ESC to leave SMS body entry without sending.
    pub fn abort_body(&mut self) -> Result<usize> {
        self.reserve(1)?;
        self.push(Bytes::from_static(&[ESC]), self.settle);
        Ok(1)
    }

    fn reserve(&self, n: usize) -> Result<()> {
        let room = self.capacity.saturating_sub(self.queued);
        if n > room {
            return Err(Error::ShortWrite {
                expected: n,
                written: 0,
            });
        }
        Ok(())
    }

    fn push(&mut self, bytes: Bytes, pause_after: Duration) {
        self.queued += bytes.len();
        self.bytes_written += bytes.len() as u64;
        self.outbox.push_back(Outbound { bytes, pause_after });
    }

    /// Remove the next frame for the link.
    pub fn pop_outbound(&mut self) -> Option<Outbound> {
        let frame = self.outbox.pop_front()?;
        self.queued -= frame.bytes.len();
        Some(frame)
    }

    /// Remove every queued frame.
    pub fn take_outbound(&mut self) -> Vec<Outbound> {
        self.queued = 0;
        self.outbox.drain(..).collect()
    }

    /// Drop all queued frames without writing them.
    pub fn discard(&mut self) {
        self.outbox.clear();
        self.queued = 0;
    }

    /// The last command line sent, without terminator.
    pub fn last_sent(&self) -> Option<&str> {
        self.last_sent.as_deref()
    }

    /// Whether the last command still awaits its final result.
    pub fn is_awaiting(&self) -> bool {
        self.awaiting
    }

    /// Mark the outstanding command as answered.
    pub fn complete(&mut self) {
        self.awaiting = false;
    }

    /// Forget the last command entirely (bring-up restart).
    pub fn reset(&mut self) {
        self.discard();
        self.last_sent = None;
        self.awaiting = false;
    }

    /// Bytes currently queued.
    pub fn queued_bytes(&self) -> usize {
        self.queued
    }

    /// Total bytes ever queued.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn set_settle(&mut self, settle: Duration) {
        self.settle = settle;
    }

    pub fn set_chunk_delay(&mut self, delay: Duration) {
        self.chunk_delay = delay;
    }
}

impl Default for CommandTransmitter {
    fn default() -> Self {
        Self::new(
            DEFAULT_OUTBOX_CAPACITY,
            Duration::from_millis(10),
            Duration::from_millis(20),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_appends_crlf_and_records_last() {
        let mut tx = CommandTransmitter::default();
        assert_eq!(tx.send("AT+CREG?").unwrap(), 10);
        assert_eq!(tx.last_sent(), Some("AT+CREG?"));
        assert!(tx.is_awaiting());

        let frames = tx.take_outbound();
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0].bytes[..], b"AT+CREG?\r\n");
        assert_eq!(frames[0].pause_after, Duration::from_millis(10));
        assert_eq!(tx.queued_bytes(), 0);
    }

    #[test]
    fn complete_clears_awaiting_but_keeps_last() {
        let mut tx = CommandTransmitter::default();
        tx.send("AT").unwrap();
        tx.complete();
        assert!(!tx.is_awaiting());
        assert_eq!(tx.last_sent(), Some("AT"));
    }

    #[test]
    fn full_outbox_is_a_short_write() {
        let mut tx = CommandTransmitter::new(8, Duration::ZERO, Duration::ZERO);
        tx.send("ATZ").unwrap();
        let err = tx.send("AT+CSQ").unwrap_err();
        assert!(matches!(
            err,
            Error::ShortWrite {
                expected: 8,
                written: 0
            }
        ));
        // The failed line is not recorded.
        assert_eq!(tx.last_sent(), Some("ATZ"));
        assert_eq!(tx.queued_bytes(), 5);
    }

    #[test]
    fn chunked_payload_is_paced() {
        let mut tx = CommandTransmitter::new(
            1024,
            Duration::from_millis(10),
            Duration::from_millis(20),
        );
        tx.submit_body(b"0011000B91", 4).unwrap();
        let frames = tx.take_outbound();
        assert_eq!(frames.len(), 3);
        assert_eq!(&frames[0].bytes[..], b"0011");
        assert_eq!(&frames[1].bytes[..], b"000B");
        assert_eq!(&frames[2].bytes[..], b"91\x1a");
        assert_eq!(frames[0].pause_after, Duration::from_millis(20));
        assert_eq!(frames[2].pause_after, Duration::from_millis(10));
    }

    #[test]
    fn zero_chunk_size_rejected() {
        let mut tx = CommandTransmitter::default();
        assert!(matches!(
            tx.send_payload_chunked(b"abc", 0),
            Err(Error::InvalidParameter(_))
        ));
    }

    #[test]
    fn abort_body_sends_escape() {
        let mut tx = CommandTransmitter::default();
        tx.abort_body().unwrap();
        let frame = tx.pop_outbound().unwrap();
        assert_eq!(&frame.bytes[..], &[ESC]);
        assert!(tx.pop_outbound().is_none());
    }
}
