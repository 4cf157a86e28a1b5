//! Line framing for the AT response stream.
//!
//! Modems answer with CR/LF-delimited lines, except for the SMS body entry
//! prompt (`>` followed by zero, one or two spaces) which is never
//! terminated. [`LineFramer`] accumulates raw reads into a capped buffer
//! and hands out one [`Unit`] at a time.
//!
//! # Framing rules
//!
//! - NUL bytes are dropped on entry (some USB serial drivers inject them).
//! - Leading CR/LF bytes are skipped. A buffer holding nothing else is
//!   cleared and yields no unit.
//! - The first CR (or bare LF) after the skipped prefix ends a line; a LF
//!   directly following that CR is consumed with it.
//! - A line starting with `"> "` is the prompt followed by an echo of the
//!   body we are typing: the prompt is emitted on its own and the echo
//!   becomes the next line.
//! - Without a terminator, `">"`, `"> "` and `">  "` are prompts. Any
//!   other residue is reported as [`Unit::Partial`] and left in place.
//! - Appending more bytes than the capacity allows fails with
//!   [`Error::BufferOverflow`] and leaves the buffer untouched.

use bytes::{Buf, BytesMut};

use gsmlink_core::error::{Error, Result};

/// Default framing buffer capacity in bytes.
pub const DEFAULT_CAPACITY: usize = 1024;

const CR: u8 = b'\r';
const LF: u8 = b'\n';

/// Prompt spellings seen without a terminator.
const PROMPTS: [&[u8]; 3] = [b">", b"> ", b">  "];

/// One framed response unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unit {
    /// A complete line without its CR/LF.
    Line(String),
    /// The SMS body entry prompt.
    Prompt,
    /// Unterminated residue. It stays buffered; more bytes may complete it.
    Partial(String),
}

/// Accumulates modem output and extracts response units.
#[derive(Debug)]
pub struct LineFramer {
    buf: BytesMut,
    capacity: usize,
}

impl LineFramer {
    /// Create a framer with [`DEFAULT_CAPACITY`].
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a framer holding at most `capacity` unconsumed bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        LineFramer {
            buf: BytesMut::with_capacity(capacity),
            capacity,
        }
    }

    /// Append raw bytes read from the link.
    ///
    /// Returns the number of bytes kept after NUL filtering.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<usize> {
        let kept = bytes.iter().filter(|&&b| b != 0).count();
        let needed = self.buf.len() + kept;
        if needed > self.capacity {
            return Err(Error::BufferOverflow {
                capacity: self.capacity,
                needed,
            });
        }
        if kept == bytes.len() {
            self.buf.extend_from_slice(bytes);
        } else {
            for &b in bytes.iter().filter(|&&b| b != 0) {
                self.buf.extend_from_slice(&[b]);
            }
        }
        Ok(kept)
    }

    /// Extract the next unit, if any.
    ///
    /// Returns `None` when the buffer is empty or held only line breaks.
    /// A [`Unit::Partial`] is returned without consuming anything, so
    /// callers should stop pulling when they see one.
    pub fn next_unit(&mut self) -> Option<Unit> {
        loop {
            let skip = self
                .buf
                .iter()
                .take_while(|&&b| b == CR || b == LF)
                .count();
            if skip == self.buf.len() {
                self.buf.clear();
                return None;
            }

            let body = &self.buf[skip..];

            // Prompt followed by the echo of what we typed.
            if body.starts_with(b"> ") && body.len() > 2 && !PROMPTS.contains(&body) {
                let rest = &body[2..];
                if rest.iter().any(|&b| b != b' ') {
                    self.buf.advance(skip + 2);
                    return Some(Unit::Prompt);
                }
            }

            if let Some(pos) = body.iter().position(|&b| b == CR || b == LF) {
                let mut consumed = skip + pos + 1;
                if body[pos] == CR && body.get(pos + 1) == Some(&LF) {
                    consumed += 1;
                }
                let text = String::from_utf8_lossy(&body[..pos])
                    .trim_start_matches(' ')
                    .to_string();
                self.buf.advance(consumed);
                if text.is_empty() {
                    // A lone space between two breaks; keep scanning.
                    continue;
                }
                return Some(Unit::Line(text));
            }

            if PROMPTS.contains(&body) {
                self.buf.clear();
                return Some(Unit::Prompt);
            }

            return Some(Unit::Partial(String::from_utf8_lossy(body).into_owned()));
        }
    }

    /// Drain every complete unit currently available.
    ///
    /// Stops at the first partial residue, which stays buffered.
    pub fn drain_complete(&mut self) -> Vec<Unit> {
        let mut units = Vec::new();
        while let Some(unit) = self.next_unit() {
            if matches!(unit, Unit::Partial(_)) {
                break;
            }
            units.push(unit);
        }
        units
    }

    /// Discard everything buffered.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Number of unconsumed bytes.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new()
    }
}
