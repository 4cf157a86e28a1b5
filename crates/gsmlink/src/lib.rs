//! # gsmlink -- AT protocol engine for GSM/UMTS voice modems
//!
//! `gsmlink` drives SIMCOM and Quectel cellular modules over their AT
//! command port: it brings a module from power-up to network registration,
//! then runs voice calls, SMS, USSD and operator queries while watching
//! signal and SIM health. Each module is one "span".
//!
//! ## Quick Start
//!
//! ```no_run
//! use gsmlink::Event;
//! use gsmlink::vendor::models::sim800;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let io = gsmlink::connect(sim800(), "/dev/ttyUSB0").await?;
//!     let mut events = io.subscribe();
//!     while let Ok(event) = events.recv().await {
//!         if event == Event::Ready {
//!             io.send_text("+447700900123", "span up", 1).await?;
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! | Crate                 | Purpose                                          |
//! |-----------------------|--------------------------------------------------|
//! | `gsmlink-core`        | Events, types, errors, collaborator traits       |
//! | `gsmlink-at`          | Line framing, command pacing, response parsing, PDUs |
//! | `gsmlink-engine`      | Session state machine, scheduler, IO task        |
//! | `gsmlink-vendor`      | Module command tables and model definitions      |
//! | `gsmlink-transport`   | Serial port transport                            |
//! | **`gsmlink`**         | This facade crate -- re-exports everything       |
//!
//! The engine is sans-IO: a [`Session`] never blocks and never touches a
//! port. Embedders either run it from their own loop or let
//! [`SessionBuilder::spawn`] put it in a tokio task.
//!
//! ## Feature Flags
//!
//! | Feature  | Enables                                   | Default |
//! |----------|-------------------------------------------|---------|
//! | `serial` | [`transport`] module and [`connect`]      | yes     |

pub use gsmlink_core::*;
pub use gsmlink_engine::{
    EngineConfig, ProtocolState, Session, SessionBuilder, SessionIo, SessionStatus, TimerKind,
};

/// AT line framing, command transmission, response parsing and PDUs.
pub mod at {
    pub use gsmlink_at::*;
}

/// The protocol engine.
pub mod engine {
    pub use gsmlink_engine::*;
}

/// Module command tables and model definitions.
pub mod vendor {
    pub use gsmlink_vendor::*;
}

/// Serial port transport.
#[cfg(feature = "serial")]
pub mod transport {
    pub use gsmlink_transport::*;
}

/// Names of every supported module, for model pickers.
///
/// ```
/// assert!(gsmlink::supported_modems().contains(&"SIM800"));
/// ```
pub fn supported_modems() -> Vec<&'static str> {
    gsmlink_vendor::all_models().iter().map(|m| m.name).collect()
}

/// Open `port` at the model's default speed and spawn a session on it.
///
/// For anything beyond defaults, open a
/// [`SerialTransport`](transport::SerialTransport) and use
/// [`SessionBuilder`] directly.
#[cfg(feature = "serial")]
pub async fn connect(model: gsmlink_vendor::ModemModel, port: &str) -> Result<SessionIo> {
    let transport = gsmlink_transport::SerialTransport::open(port, model.default_baud_rate).await?;
    SessionBuilder::new(model).spawn(Box::new(transport))
}
