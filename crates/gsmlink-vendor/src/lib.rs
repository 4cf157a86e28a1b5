//! Vendor profiles for gsmlink.
//!
//! This crate supplies the [`VendorProfile`](gsmlink_core::VendorProfile)
//! implementations the engine is built with:
//!
//! - **Command tables** ([`commands`]) -- the standard 27.007/27.005 spelling
//!   of every engine command plus the SIMCOM and Quectel overrides.
//! - **Model definitions** ([`models`]) -- SIM900, SIM800, M35 and UC15,
//!   each with its dialect, fatal error codes and SMS pacing.
//!
//! # Example
//!
//! ```
//! use gsmlink_core::{AtCommand, VendorProfile};
//! use gsmlink_vendor::models::sim800;
//!
//! let model = sim800();
//! assert_eq!(model.command(&AtCommand::RegistrationStatus).as_deref(), Some("AT+CREG?"));
//! ```

pub mod commands;
pub mod models;

pub use commands::Dialect;
pub use models::{ModemModel, all_models, by_name};
