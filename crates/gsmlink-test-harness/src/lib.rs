//! gsmlink-test-harness: scripted modems and mock transports for gsmlink.
//!
//! This crate provides [`ScriptedModem`], a table-driven stand-in for an
//! AT modem used to drive the synchronous protocol engine in unit tests,
//! and [`MockTransport`], which puts the same modem behind the async
//! [`Transport`](gsmlink_core::Transport) trait for IO task tests.

pub mod mock_serial;
pub mod scripted;

pub use mock_serial::MockTransport;
pub use scripted::ScriptedModem;
