//! Transport trait for modem communication.
//!
//! The [`Transport`] trait abstracts over the physical link to a cellular
//! module: a USB or UART serial port, a multiplexer virtual channel, or a
//! mock for tests. The protocol engine itself never touches a transport;
//! the IO task in `gsmlink-engine` owns one and shuttles bytes between it
//! and the engine.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

/// Asynchronous byte-level transport to a modem.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send raw bytes to the modem.
    ///
    /// Implementations return only once every byte has been handed to the
    /// underlying device, or fail.
    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Receive bytes from the modem into the provided buffer.
    ///
    /// Returns the number of bytes actually read. Will wait up to `timeout`
    /// for data to arrive; returns [`Error::Timeout`](crate::error::Error::Timeout)
    /// if no data is received within the deadline.
    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Close the transport connection.
    async fn close(&mut self) -> Result<()>;

    /// Check whether the transport is currently connected.
    fn is_connected(&self) -> bool;
}
