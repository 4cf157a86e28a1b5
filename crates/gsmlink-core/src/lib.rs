//! gsmlink-core: Core traits, types, and error definitions for gsmlink.
//!
//! This crate defines the vendor-agnostic abstractions shared by the AT
//! protocol layer, the engine, the vendor profiles and the transports.
//! Applications embedding a modem span depend on these types without
//! pulling in a specific module dialect.
//!
//! # Key types
//!
//! - [`Event`] -- outcomes reported by the protocol engine
//! - [`Transport`] -- byte-level communication channel
//! - [`VendorProfile`] / [`AtCommand`] -- per-module command spelling
//! - [`Error`] / [`Result`] -- error handling

pub mod collab;
pub mod command;
pub mod error;
pub mod events;
pub mod transport;
pub mod types;

// Re-export key types at crate root for ergonomic `use gsmlink_core::*`.
pub use collab::{
    AlwaysOn, DeliveryLog, DeliveryRecord, NullDeliveryLog, PassThroughCodec, PowerProbe,
    TextCodec,
};
pub use command::{AtCommand, VendorProfile};
pub use error::{Error, Result};
pub use events::Event;
pub use transport::Transport;
pub use types::*;
