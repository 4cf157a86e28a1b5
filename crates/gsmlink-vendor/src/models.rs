//! Modem model definitions.
//!
//! Each supported module is described by a [`ModemModel`] that captures its
//! command dialect, default serial speed, optional features and the error
//! codes the engine treats as fatal. `ModemModel` implements
//! [`VendorProfile`], so a model can be handed straight to a session
//! builder.
//!
//! Models are defined as factory functions (e.g. [`sim800()`]) that return
//! a fully populated [`ModemModel`]:
//!
//! | Model  | Vendor  | Baud   | Dual SIM | Chunk |
//! |--------|---------|--------|----------|-------|
//! | SIM900 | SIMCOM  | 115200 | No       | 64    |
//! | SIM800 | SIMCOM  | 115200 | No       | 64    |
//! | M35    | Quectel | 115200 | Yes      | 64    |
//! | UC15   | Quectel | 115200 | No       | 128   |

use gsmlink_at::protocol::{parse_clip, parse_csq};
use gsmlink_core::command::{AtCommand, VendorProfile};
use gsmlink_core::types::{CallerId, Coverage};

use crate::commands::{Dialect, command_for};

/// Static model definition for a cellular module.
#[derive(Debug, Clone)]
pub struct ModemModel {
    /// Human-readable model name (e.g. "SIM800").
    pub name: &'static str,
    pub manufacturer: &'static str,
    pub dialect: Dialect,
    /// Factory default UART speed.
    pub default_baud_rate: u32,
    /// Whether the module has a second SIM slot to select during bring-up.
    pub dual_sim: bool,
    /// SMS body slice size in bytes.
    pub sms_chunk_size: usize,
    /// CME codes meaning the SIM is absent or broken.
    pub sim_failure_codes: &'static [u16],
    /// CME codes emitted when the firmware has lost its state.
    pub firmware_error_codes: &'static [u16],
    /// Unsolicited lines the module prints once it has booted.
    pub boot_lines: &'static [&'static str],
}

impl VendorProfile for ModemModel {
    fn name(&self) -> &str {
        self.name
    }

    fn command(&self, cmd: &AtCommand) -> Option<String> {
        let slot_stage = matches!(
            cmd,
            AtCommand::SimSlotQuery | AtCommand::SimSlotSelect(_) | AtCommand::SimSlotConfirm
        );
        if slot_stage && !self.dual_sim {
            return None;
        }
        command_for(self.dialect, cmd)
    }

    fn decode_coverage(&self, line: &str) -> Option<Coverage> {
        parse_csq(line)
    }

    fn decode_caller_id(&self, line: &str) -> Option<CallerId> {
        let mut id = parse_clip(line)?;
        // Withheld numbers come through as an empty string.
        if id.number.is_empty() && self.dialect == Dialect::Quectel {
            id.number = "unknown".to_string();
        }
        Some(id)
    }

    fn sim_failure_codes(&self) -> &[u16] {
        self.sim_failure_codes
    }

    fn firmware_error_codes(&self) -> &[u16] {
        self.firmware_error_codes
    }

    fn sms_chunk_size(&self) -> usize {
        self.sms_chunk_size
    }

    fn is_boot_indication(&self, line: &str) -> bool {
        self.boot_lines.contains(&line)
    }
}

const SIM_FAILURE_CODES: &[u16] = &[10, 13, 15];
const FIRMWARE_ERROR_CODES: &[u16] = &[100];

/// SIMCOM SIM900 quad-band GSM/GPRS module.
pub fn sim900() -> ModemModel {
    ModemModel {
        name: "SIM900",
        manufacturer: "SIMCOM",
        dialect: Dialect::Simcom,
        default_baud_rate: 115_200,
        dual_sim: false,
        sms_chunk_size: 64,
        sim_failure_codes: SIM_FAILURE_CODES,
        firmware_error_codes: FIRMWARE_ERROR_CODES,
        boot_lines: &["RDY"],
    }
}

/// SIMCOM SIM800 quad-band GSM/GPRS module.
pub fn sim800() -> ModemModel {
    ModemModel {
        name: "SIM800",
        manufacturer: "SIMCOM",
        dialect: Dialect::Simcom,
        default_baud_rate: 115_200,
        dual_sim: false,
        sms_chunk_size: 64,
        sim_failure_codes: SIM_FAILURE_CODES,
        firmware_error_codes: FIRMWARE_ERROR_CODES,
        boot_lines: &["RDY"],
    }
}

/// Quectel M35 GSM/GPRS module (dual-SIM variant).
pub fn m35() -> ModemModel {
    ModemModel {
        name: "M35",
        manufacturer: "Quectel",
        dialect: Dialect::Quectel,
        default_baud_rate: 115_200,
        dual_sim: true,
        sms_chunk_size: 64,
        sim_failure_codes: SIM_FAILURE_CODES,
        firmware_error_codes: FIRMWARE_ERROR_CODES,
        boot_lines: &["RDY"],
    }
}

/// Quectel UC15 UMTS/HSPA module.
pub fn uc15() -> ModemModel {
    ModemModel {
        name: "UC15",
        manufacturer: "Quectel",
        dialect: Dialect::Quectel,
        default_baud_rate: 115_200,
        dual_sim: false,
        sms_chunk_size: 128,
        sim_failure_codes: &[10, 13, 14, 15],
        firmware_error_codes: FIRMWARE_ERROR_CODES,
        boot_lines: &["RDY"],
    }
}

/// Every supported model.
pub fn all_models() -> Vec<ModemModel> {
    vec![sim900(), sim800(), m35(), uc15()]
}

/// Look up a model by name, case-insensitively.
pub fn by_name(name: &str) -> Option<ModemModel> {
    all_models()
        .into_iter()
        .find(|m| m.name.eq_ignore_ascii_case(name))
}
