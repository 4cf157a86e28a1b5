//! Protocol states and the bring-up stage table.

use std::fmt;

use gsmlink_core::command::AtCommand;
use gsmlink_core::types::SmsMode;

use crate::config::EngineConfig;

/// Where the session is in bring-up or in a ready-state sub-flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ProtocolState {
    /// Not started, restarting, or stopped by a configuration error.
    #[default]
    Down,

    // Bring-up, in order.
    Reset,
    Probe,
    EchoOff,
    VerboseErrors,
    ModelReq,
    ManufacturerReq,
    RevisionReq,
    SimSlotQuery,
    SimSlotSelect,
    SimSlotConfirm,
    ImeiReq,
    SimReadyReq,
    /// The SIM wants a PIN and none is configured.
    SimPinWait,
    SimPinSent,
    ImsiReq,
    ClipEnable,
    CallWaitingEnable,
    DtmfEnable,
    SideTone,
    NoiseCancel,
    SpeakerVolume,
    MicVolume,
    SmsDeleteAll,
    SmsPduMode,
    Charset,
    SmsIndication,
    RegistrationPoll,
    /// Registered; reading the service centre address.
    NetOk,
    OperatorNameReq,

    /// Idle and operational.
    Ready,

    // Ready-state sub-flows.
    Dialing,
    Answering,
    HangingUp,
    DtmfSending,
    CallStatusQuery,
    SmsModeSelect,
    SmsTextParams,
    SmsSubmit,
    SmsBody,
    SmsRestoreMode,
    SmsRead,
    SmsDelete,
    UssdSending,
    OperatorQuery,
    SafeAt,
    SignalQuery,
}

/// Bring-up stages in the order they run.
pub const BRING_UP: &[ProtocolState] = &[
    ProtocolState::Reset,
    ProtocolState::Probe,
    ProtocolState::EchoOff,
    ProtocolState::VerboseErrors,
    ProtocolState::ModelReq,
    ProtocolState::ManufacturerReq,
    ProtocolState::RevisionReq,
    ProtocolState::SimSlotQuery,
    ProtocolState::SimSlotSelect,
    ProtocolState::SimSlotConfirm,
    ProtocolState::ImeiReq,
    ProtocolState::SimReadyReq,
    ProtocolState::ImsiReq,
    ProtocolState::ClipEnable,
    ProtocolState::CallWaitingEnable,
    ProtocolState::DtmfEnable,
    ProtocolState::SideTone,
    ProtocolState::NoiseCancel,
    ProtocolState::SpeakerVolume,
    ProtocolState::MicVolume,
    ProtocolState::SmsDeleteAll,
    ProtocolState::SmsPduMode,
    ProtocolState::Charset,
    ProtocolState::SmsIndication,
    ProtocolState::RegistrationPoll,
    ProtocolState::NetOk,
    ProtocolState::OperatorNameReq,
];

/// A bring-up stage: the command it sends and whether it may be skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    pub state: ProtocolState,
    pub command: AtCommand,
    /// Without this stage the module cannot be driven at all.
    pub mandatory: bool,
}

impl ProtocolState {
    /// Whether the state belongs to the bring-up sequence.
    pub fn is_bringing_up(&self) -> bool {
        !matches!(self, ProtocolState::Down) && !self.is_ready()
    }

    /// Whether bring-up has completed (idle or inside a sub-flow).
    pub fn is_ready(&self) -> bool {
        matches!(
            self,
            ProtocolState::Ready
                | ProtocolState::Dialing
                | ProtocolState::Answering
                | ProtocolState::HangingUp
                | ProtocolState::DtmfSending
                | ProtocolState::CallStatusQuery
                | ProtocolState::SmsModeSelect
                | ProtocolState::SmsTextParams
                | ProtocolState::SmsSubmit
                | ProtocolState::SmsBody
                | ProtocolState::SmsRestoreMode
                | ProtocolState::SmsRead
                | ProtocolState::SmsDelete
                | ProtocolState::UssdSending
                | ProtocolState::OperatorQuery
                | ProtocolState::SafeAt
                | ProtocolState::SignalQuery
        )
    }

    /// Whether the state is part of the SMS submission sub-flow.
    pub fn is_sms_submission(&self) -> bool {
        matches!(
            self,
            ProtocolState::SmsModeSelect
                | ProtocolState::SmsTextParams
                | ProtocolState::SmsSubmit
                | ProtocolState::SmsBody
                | ProtocolState::SmsRestoreMode
        )
    }

    /// The bring-up stage run in this state, if it is a linear stage.
    pub fn stage(&self, cfg: &EngineConfig) -> Option<Stage> {
        let (command, mandatory) = match self {
            ProtocolState::Reset => (AtCommand::Reset, true),
            ProtocolState::Probe => (AtCommand::Probe, true),
            ProtocolState::EchoOff => (AtCommand::EchoOff, true),
            ProtocolState::VerboseErrors => (AtCommand::VerboseErrors, false),
            ProtocolState::ModelReq => (AtCommand::ModelName, false),
            ProtocolState::ManufacturerReq => (AtCommand::Manufacturer, false),
            ProtocolState::RevisionReq => (AtCommand::Revision, false),
            ProtocolState::SimSlotQuery => (AtCommand::SimSlotQuery, false),
            ProtocolState::SimSlotSelect => (AtCommand::SimSlotSelect(cfg.sim_slot), false),
            ProtocolState::SimSlotConfirm => (AtCommand::SimSlotConfirm, false),
            ProtocolState::ImeiReq => (AtCommand::Imei, false),
            ProtocolState::SimReadyReq => (AtCommand::SimStatus, true),
            ProtocolState::ImsiReq => (AtCommand::Imsi, false),
            ProtocolState::ClipEnable => (AtCommand::CallerIdEnable, false),
            ProtocolState::CallWaitingEnable => (AtCommand::CallWaitingEnable, false),
            ProtocolState::DtmfEnable => (AtCommand::DtmfDetectEnable, false),
            ProtocolState::SideTone => (AtCommand::SideTone(cfg.side_tone), false),
            ProtocolState::NoiseCancel => (AtCommand::NoiseCancel, false),
            ProtocolState::SpeakerVolume => (AtCommand::SpeakerVolume(cfg.speaker_volume), false),
            ProtocolState::MicVolume => (AtCommand::MicVolume(cfg.mic_volume), false),
            ProtocolState::SmsDeleteAll => (AtCommand::DeleteAllSms, false),
            ProtocolState::SmsPduMode => (AtCommand::SmsFormat(SmsMode::Pdu), true),
            ProtocolState::Charset => (AtCommand::Charset, false),
            ProtocolState::SmsIndication => (AtCommand::SmsIndication, false),
            ProtocolState::RegistrationPoll => (AtCommand::RegistrationStatus, true),
            ProtocolState::NetOk => (AtCommand::ServiceCenter, false),
            ProtocolState::OperatorNameReq => (AtCommand::OperatorName, false),
            _ => return None,
        };
        Some(Stage {
            state: *self,
            command,
            mandatory,
        })
    }

    /// Linear stages after this one, in order.
    pub fn following_stages(&self) -> &'static [ProtocolState] {
        match BRING_UP.iter().position(|s| s == self) {
            Some(i) => &BRING_UP[i + 1..],
            None => &[],
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ProtocolState::Down => "DOWN",
            ProtocolState::Reset => "RESET",
            ProtocolState::Probe => "PROBE",
            ProtocolState::EchoOff => "ECHO_OFF",
            ProtocolState::VerboseErrors => "VERBOSE_ERRORS",
            ProtocolState::ModelReq => "MODEL_REQ",
            ProtocolState::ManufacturerReq => "MANUFACTURER_REQ",
            ProtocolState::RevisionReq => "REVISION_REQ",
            ProtocolState::SimSlotQuery => "SIM_SLOT_QUERY",
            ProtocolState::SimSlotSelect => "SIM_SLOT_SELECT",
            ProtocolState::SimSlotConfirm => "SIM_SLOT_CONFIRM",
            ProtocolState::ImeiReq => "IMEI_REQ",
            ProtocolState::SimReadyReq => "SIM_READY_REQ",
            ProtocolState::SimPinWait => "SIM_PIN_WAIT",
            ProtocolState::SimPinSent => "SIM_PIN_SENT",
            ProtocolState::ImsiReq => "IMSI_REQ",
            ProtocolState::ClipEnable => "CLIP_ENABLE",
            ProtocolState::CallWaitingEnable => "CCWA_ENABLE",
            ProtocolState::DtmfEnable => "DTMF_ENABLE",
            ProtocolState::SideTone => "SIDE_TONE",
            ProtocolState::NoiseCancel => "NOISE_CANCEL",
            ProtocolState::SpeakerVolume => "SPEAKER_VOLUME",
            ProtocolState::MicVolume => "MIC_VOLUME",
            ProtocolState::SmsDeleteAll => "SMS_DELETE_ALL",
            ProtocolState::SmsPduMode => "SMS_PDU_MODE",
            ProtocolState::Charset => "CHARSET",
            ProtocolState::SmsIndication => "SMS_INDICATION",
            ProtocolState::RegistrationPoll => "REGISTRATION_POLL",
            ProtocolState::NetOk => "NET_OK",
            ProtocolState::OperatorNameReq => "OPERATOR_NAME_REQ",
            ProtocolState::Ready => "READY",
            ProtocolState::Dialing => "DIALING",
            ProtocolState::Answering => "ANSWERING",
            ProtocolState::HangingUp => "HANGING_UP",
            ProtocolState::DtmfSending => "DTMF_SENDING",
            ProtocolState::CallStatusQuery => "CALL_STATUS_QUERY",
            ProtocolState::SmsModeSelect => "SMS_MODE_SELECT",
            ProtocolState::SmsTextParams => "SMS_TEXT_PARAMS",
            ProtocolState::SmsSubmit => "SMS_SUBMIT",
            ProtocolState::SmsBody => "SMS_BODY",
            ProtocolState::SmsRestoreMode => "SMS_RESTORE_MODE",
            ProtocolState::SmsRead => "SMS_READ",
            ProtocolState::SmsDelete => "SMS_DELETE",
            ProtocolState::UssdSending => "USSD_SENDING",
            ProtocolState::OperatorQuery => "OPERATOR_QUERY",
            ProtocolState::SafeAt => "SAFE_AT",
            ProtocolState::SignalQuery => "SIGNAL_QUERY",
        }
    }
}

impl fmt::Display for ProtocolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
