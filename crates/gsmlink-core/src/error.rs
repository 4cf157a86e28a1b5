//! Error types for gsmlink.
//!
//! All fallible operations across the workspace return [`Result<T>`], which
//! uses [`Error`] as the error type. Transport-layer, framing, scheduling and
//! API-misuse errors are captured here. Failures reported by the modem itself
//! (CME/CMS codes, SIM problems) are not errors of the engine; they surface
//! as [`Event`](crate::events::Event) variants instead.

use crate::types::CallRef;

/// The error type for all gsmlink operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A transport-level error (serial port, pseudo terminal).
    #[error("transport error: {0}")]
    Transport(String),

    /// Fewer bytes were accepted by the link than were handed to it.
    #[error("short write: {written} of {expected} bytes accepted")]
    ShortWrite {
        /// Bytes the caller asked to write.
        expected: usize,
        /// Bytes actually accepted.
        written: usize,
    },

    /// A protocol-level error (unexpected line, malformed response).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A response or PDU could not be parsed.
    #[error("parse error: {0}")]
    Parse(String),

    /// Timed out waiting for a response from the modem.
    #[error("timeout waiting for response")]
    Timeout,

    /// The scheduler task table is full.
    #[error("scheduler full ({capacity} tasks)")]
    SchedulerFull {
        /// Configured scheduler capacity.
        capacity: usize,
    },

    /// Incoming bytes would overflow the line framing buffer.
    #[error("line buffer overflow: {needed} bytes needed, capacity {capacity}")]
    BufferOverflow {
        /// Configured buffer capacity.
        capacity: usize,
        /// Bytes that would have been held after the append.
        needed: usize,
    },

    /// The session has not finished bring-up.
    #[error("session not ready")]
    NotReady,

    /// The requested request slot is already occupied.
    #[error("busy: {0}")]
    Busy(String),

    /// An invalid parameter was passed to an API call.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// The vendor profile has no command for the requested operation.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// No call exists with the given reference.
    #[error("no such call: {0}")]
    NoSuchCall(CallRef),

    /// No connection to the modem has been established.
    #[error("not connected")]
    NotConnected,

    /// The connection to the modem was lost unexpectedly.
    #[error("connection lost")]
    ConnectionLost,

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_short_write() {
        let e = Error::ShortWrite {
            expected: 12,
            written: 4,
        };
        assert_eq!(e.to_string(), "short write: 4 of 12 bytes accepted");
    }

    #[test]
    fn error_display_scheduler_full() {
        let e = Error::SchedulerFull { capacity: 128 };
        assert_eq!(e.to_string(), "scheduler full (128 tasks)");
    }

    #[test]
    fn error_display_buffer_overflow() {
        let e = Error::BufferOverflow {
            capacity: 1024,
            needed: 1030,
        };
        assert_eq!(
            e.to_string(),
            "line buffer overflow: 1030 bytes needed, capacity 1024"
        );
    }

    #[test]
    fn error_display_no_such_call() {
        let e = Error::NoSuchCall(CallRef::new(3));
        assert_eq!(e.to_string(), "no such call: 3");
    }

    #[test]
    fn error_display_not_ready() {
        assert_eq!(Error::NotReady.to_string(), "session not ready");
    }

    #[test]
    fn error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broken");
        let e: Error = io_err.into();
        assert!(matches!(e, Error::Io(_)));
        assert!(e.to_string().contains("pipe broken"));
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}
        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
