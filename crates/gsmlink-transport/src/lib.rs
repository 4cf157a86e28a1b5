//! Serial transport for gsmlink.
//!
//! [`SerialTransport`] implements the [`Transport`](gsmlink_core::Transport)
//! trait for the UART or USB serial port a cellular module is attached to.
//! Tests use the mock transport from `gsmlink-test-harness` instead.
//!
//! # Example
//!
//! ```no_run
//! use gsmlink_transport::SerialTransport;
//! use gsmlink_core::transport::Transport;
//! use std::time::Duration;
//!
//! # async fn example() -> gsmlink_core::Result<()> {
//! let mut transport = SerialTransport::open("/dev/ttyUSB2", 115_200).await?;
//! transport.send(b"AT\r\n").await?;
//!
//! let mut buf = [0u8; 256];
//! let n = transport.receive(&mut buf, Duration::from_secs(1)).await?;
//! # Ok(())
//! # }
//! ```

pub mod serial;

pub use serial::{FlowControl, Parity, SerialConfig, SerialTransport};
