//! Command identifiers and the vendor profile seam.
//!
//! The engine decides *what* to ask the modem ([`AtCommand`]); a
//! [`VendorProfile`] decides *how* that request is spelled for a given
//! module. Profiles are chosen once when a session is built.

use std::fmt;

use crate::types::{CallerId, Coverage, SmsMode};

/// A request the engine wants to send, with its parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AtCommand {
    /// Restore the factory profile (`ATZ`).
    Reset,
    /// Plain `AT` responsiveness probe.
    Probe,
    EchoOff,
    VerboseErrors,
    ModelName,
    Manufacturer,
    Revision,
    /// First step of dual-SIM selection: ask which slots are populated.
    SimSlotQuery,
    /// Second step: select the slot.
    SimSlotSelect(u8),
    /// Third step: confirm the selected slot.
    SimSlotConfirm,
    Imei,
    SimStatus,
    EnterPin(String),
    Imsi,
    CallerIdEnable,
    CallWaitingEnable,
    DtmfDetectEnable,
    SideTone(u8),
    NoiseCancel,
    SpeakerVolume(u8),
    MicVolume(u8),
    DeleteAllSms,
    SmsFormat(SmsMode),
    Charset,
    SmsIndication,
    RegistrationStatus,
    ServiceCenter,
    OperatorName,
    OperatorList,
    SignalQuality,
    CallStatus,
    Dial(String),
    Answer,
    Hangup,
    Dtmf(char),
    /// `AT+CMGS=<tpdu length>` in PDU mode.
    SmsSubmitPdu(usize),
    /// `AT+CMGS="<destination>"` in text mode.
    SmsSubmitText(String),
    /// Text-mode submission parameters (`AT+CSMP`).
    SmsTextParams,
    ReadSms(u16),
    DeleteSms(u16),
    Ussd {
        code: String,
        dcs: u8,
    },
    /// Full module reset (`AT+CFUN=1,1` or vendor equivalent).
    ModuleReset,
    /// Administrative command passed through verbatim.
    Raw(String),
}

impl AtCommand {
    /// Stable short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            AtCommand::Reset => "reset",
            AtCommand::Probe => "probe",
            AtCommand::EchoOff => "echo-off",
            AtCommand::VerboseErrors => "verbose-errors",
            AtCommand::ModelName => "model",
            AtCommand::Manufacturer => "manufacturer",
            AtCommand::Revision => "revision",
            AtCommand::SimSlotQuery => "sim-slot-query",
            AtCommand::SimSlotSelect(_) => "sim-slot-select",
            AtCommand::SimSlotConfirm => "sim-slot-confirm",
            AtCommand::Imei => "imei",
            AtCommand::SimStatus => "sim-status",
            AtCommand::EnterPin(_) => "enter-pin",
            AtCommand::Imsi => "imsi",
            AtCommand::CallerIdEnable => "clip",
            AtCommand::CallWaitingEnable => "ccwa",
            AtCommand::DtmfDetectEnable => "dtmf-detect",
            AtCommand::SideTone(_) => "side-tone",
            AtCommand::NoiseCancel => "noise-cancel",
            AtCommand::SpeakerVolume(_) => "speaker-volume",
            AtCommand::MicVolume(_) => "mic-volume",
            AtCommand::DeleteAllSms => "delete-all-sms",
            AtCommand::SmsFormat(_) => "sms-format",
            AtCommand::Charset => "charset",
            AtCommand::SmsIndication => "sms-indication",
            AtCommand::RegistrationStatus => "creg",
            AtCommand::ServiceCenter => "smsc",
            AtCommand::OperatorName => "operator-name",
            AtCommand::OperatorList => "operator-list",
            AtCommand::SignalQuality => "csq",
            AtCommand::CallStatus => "clcc",
            AtCommand::Dial(_) => "dial",
            AtCommand::Answer => "answer",
            AtCommand::Hangup => "hangup",
            AtCommand::Dtmf(_) => "dtmf",
            AtCommand::SmsSubmitPdu(_) => "sms-submit-pdu",
            AtCommand::SmsSubmitText(_) => "sms-submit-text",
            AtCommand::SmsTextParams => "sms-text-params",
            AtCommand::ReadSms(_) => "read-sms",
            AtCommand::DeleteSms(_) => "delete-sms",
            AtCommand::Ussd { .. } => "ussd",
            AtCommand::ModuleReset => "module-reset",
            AtCommand::Raw(_) => "raw",
        }
    }
}

impl fmt::Display for AtCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A modem dialect: command spelling plus vendor-specific decoding helpers.
pub trait VendorProfile: Send + Sync {
    /// Human-readable profile name (e.g. `"SIM900"`).
    fn name(&self) -> &str;

    /// Text of `cmd` for this module, without the line terminator.
    ///
    /// `None` means the module has no such command; optional bring-up
    /// stages are skipped, mandatory ones raise a configuration error.
    fn command(&self, cmd: &AtCommand) -> Option<String>;

    /// Decode a signal-quality line into a coverage value.
    fn decode_coverage(&self, line: &str) -> Option<Coverage>;

    /// Decode a calling-line identity line.
    fn decode_caller_id(&self, line: &str) -> Option<CallerId>;

    /// CME error codes meaning the SIM is absent or broken.
    fn sim_failure_codes(&self) -> &[u16] {
        &[10, 13, 15]
    }

    /// CME error codes the firmware emits when it has lost track of itself.
    fn firmware_error_codes(&self) -> &[u16] {
        &[100]
    }

    /// Size of the slices an SMS body is written in.
    fn sms_chunk_size(&self) -> usize {
        64
    }

    /// Whether the module emits an unsolicited line when it finished booting.
    fn is_boot_indication(&self, line: &str) -> bool {
        matches!(line, "RDY" | "START")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_names_are_stable() {
        assert_eq!(AtCommand::Dial("123".into()).name(), "dial");
        assert_eq!(AtCommand::SmsSubmitPdu(23).to_string(), "sms-submit-pdu");
        assert_eq!(
            AtCommand::Ussd {
                code: "*100#".into(),
                dcs: 15
            }
            .name(),
            "ussd"
        );
    }
}
