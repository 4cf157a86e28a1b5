//! gsmlink-at: AT line protocol plumbing.
//!
//! Everything here is synchronous and I/O free:
//!
//! - [`framer`] turns the raw byte stream into lines and prompts
//! - [`transmitter`] formats commands into an outbox of paced frames
//! - [`protocol`] classifies lines and parses information responses
//! - [`pdu`] encodes and decodes SMS PDUs

pub mod framer;
pub mod pdu;
pub mod protocol;
pub mod transmitter;

pub use framer::{LineFramer, Unit};
pub use protocol::{Response, classify};
pub use transmitter::{CommandTransmitter, Outbound};
