//! Mock serial link backed by a [`ScriptedModem`].
//!
//! [`MockTransport`] implements the [`Transport`] trait over a shared
//! scripted modem, so the async IO task can be tested end to end without
//! hardware. The modem stays reachable through [`MockTransport::modem`]
//! after the transport has moved into a task.
//!
//! # Example
//!
//! ```
//! use gsmlink_test_harness::{MockTransport, ScriptedModem};
//!
//! let mock = MockTransport::new(ScriptedModem::new());
//! let modem = mock.modem();
//! modem.lock().unwrap().inject(b"\r\nRING\r\n");
//! ```

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use gsmlink_core::error::{Error, Result};
use gsmlink_core::transport::Transport;

use crate::scripted::ScriptedModem;

/// How often a waiting `receive()` looks for new modem output.
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// A mock [`Transport`] wired to a [`ScriptedModem`].
///
/// Every `send()` is written to the modem and recorded; `receive()`
/// returns modem output as it becomes available, or
/// [`Error::Timeout`] once `timeout` passes without any.
#[derive(Debug)]
pub struct MockTransport {
    modem: Arc<Mutex<ScriptedModem>>,
    /// Whether the transport is "connected".
    connected: bool,
    /// Log of all bytes sent through this transport.
    sent_log: Vec<Vec<u8>>,
}

impl MockTransport {
    /// Create a connected transport in front of `modem`.
    pub fn new(modem: ScriptedModem) -> Self {
        MockTransport {
            modem: Arc::new(Mutex::new(modem)),
            connected: true,
            sent_log: Vec::new(),
        }
    }

    /// Shared handle to the modem behind this transport.
    pub fn modem(&self) -> Arc<Mutex<ScriptedModem>> {
        Arc::clone(&self.modem)
    }

    /// Each element is the byte slice from one `send()` call.
    pub fn sent_data(&self) -> &[Vec<u8>] {
        &self.sent_log
    }

    /// Set the connected state of the mock transport.
    ///
    /// When set to `false`, subsequent `send()` and `receive()` calls will
    /// return [`Error::NotConnected`].
    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }

    fn lock(&self) -> MutexGuard<'_, ScriptedModem> {
        self.modem.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new(ScriptedModem::new())
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        if !self.connected {
            return Err(Error::NotConnected);
        }
        self.sent_log.push(data.to_vec());
        self.lock().write(data);
        Ok(())
    }

    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if !self.connected {
                return Err(Error::NotConnected);
            }
            let n = self.lock().read_into(buf);
            if n > 0 {
                return Ok(n);
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Err(Error::Timeout);
            }
            tokio::time::sleep(POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_reaches_the_modem() {
        let mut mock = MockTransport::new(ScriptedModem::new());
        mock.send(b"AT+CSQ\r").await.unwrap();

        let mut buf = [0u8; 64];
        let n = mock
            .receive(&mut buf, Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(&buf[..n], b"\r\n+CSQ: 20,0\r\n\r\nOK\r\n");
        assert_eq!(mock.sent_data(), [b"AT+CSQ\r".to_vec()]);
        assert_eq!(mock.modem().lock().unwrap().count("AT+CSQ"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn receive_without_output_times_out() {
        let mut mock = MockTransport::default();
        let mut buf = [0u8; 64];
        let result = mock.receive(&mut buf, Duration::from_millis(50)).await;
        assert!(matches!(result, Err(Error::Timeout)));
    }

    #[tokio::test(start_paused = true)]
    async fn injected_output_is_received() {
        let mut mock = MockTransport::default();
        let modem = mock.modem();
        let reader = tokio::spawn(async move {
            let mut buf = [0u8; 16];
            let n = mock.receive(&mut buf, Duration::from_secs(1)).await.unwrap();
            buf[..n].to_vec()
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        modem.lock().unwrap().inject(b"\r\nRING\r\n");
        assert_eq!(reader.await.unwrap(), b"\r\nRING\r\n");
    }

    #[tokio::test]
    async fn partial_receive() {
        let mut mock = MockTransport::default();
        mock.modem().lock().unwrap().inject(b"\r\nOK\r\n");
        let mut buf = [0u8; 3];
        let n = mock.receive(&mut buf, Duration::from_millis(10)).await.unwrap();
        assert_eq!(&buf[..n], b"\r\nO");
        let n = mock.receive(&mut buf, Duration::from_millis(10)).await.unwrap();
        assert_eq!(&buf[..n], b"K\r\n");
    }

    #[tokio::test]
    async fn disconnect() {
        let mut mock = MockTransport::default();
        assert!(mock.is_connected());
        mock.close().await.unwrap();
        assert!(!mock.is_connected());
        assert!(matches!(mock.send(b"AT\r").await, Err(Error::NotConnected)));

        let mut mock = MockTransport::default();
        mock.set_connected(false);
        let mut buf = [0u8; 8];
        let result = mock.receive(&mut buf, Duration::from_millis(10)).await;
        assert!(matches!(result, Err(Error::NotConnected)));
    }
}
