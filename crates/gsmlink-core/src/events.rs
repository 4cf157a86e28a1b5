//! Session event types.
//!
//! Events are produced by the protocol engine as the modem's state changes
//! and are handed to the embedding application, either through
//! `Session::poll_event()` or through the IO task's [`tokio::sync::broadcast`]
//! channel. The engine never retains an event after handing it out.

use crate::types::{
    CallRef, CallerId, Cause, Coverage, Operator, RegistrationStatus, SmsMessage,
};

/// An outcome reported by the protocol engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Bring-up completed; the span accepts calls, SMS and USSD.
    Ready,

    /// The span left the ready state (SIM loss, module restart, watchdog).
    Down,

    /// The bring-up sequence is starting over from the reset stage.
    Restart {
        /// Completed bring-up attempts since the last ready state.
        attempt: u32,
    },

    /// The module reports home or roaming registration.
    RegistrationUp {
        status: RegistrationStatus,
    },

    /// The module lost its registration.
    RegistrationDown {
        status: RegistrationStatus,
    },

    /// An incoming call is being offered.
    Ring {
        call: CallRef,
        caller: CallerId,
    },

    /// The far end of an outgoing call is alerting.
    Ringing {
        call: CallRef,
    },

    /// An outgoing call has been accepted by the module and is proceeding.
    Proceeding {
        call: CallRef,
    },

    /// The far end answered an outgoing call.
    Answer {
        call: CallRef,
    },

    /// The call was released by the network or the far end.
    Hangup {
        call: CallRef,
        cause: Cause,
    },

    /// A locally requested hangup completed.
    HangupAck {
        call: CallRef,
    },

    /// Another caller is waiting while a call is active.
    CallWaiting {
        caller: CallerId,
        /// Call-waiting slot index.
        slot: u8,
    },

    /// A DTMF digit was detected on an active call.
    KeypadDigit {
        call: CallRef,
        digit: char,
    },

    /// A short message was received (reassembled when multi-part).
    SmsReceived {
        message: SmsMessage,
    },

    /// A short message was accepted by the network.
    SmsSendOk {
        id: u64,
        /// Message reference returned by `+CMGS`.
        reference: Option<u8>,
    },

    /// A short message could not be sent.
    SmsSendFailed {
        id: u64,
        reason: String,
    },

    /// A USSD response or network-initiated USSD arrived.
    UssdReceived {
        /// `+CUSD` status: 0 done, 1 further action required.
        status: u8,
        text: String,
        dcs: u8,
    },

    /// A USSD request failed or was terminated by the network.
    UssdSendFailed {
        reason: String,
    },

    /// The available operator list was read.
    OperatorList {
        operators: Vec<Operator>,
    },

    /// The operator list query failed.
    OperatorListFailed {
        reason: String,
    },

    /// Response to a safe-mode administrative AT command.
    SafeAtResponse {
        command: String,
        lines: Vec<String>,
        ok: bool,
    },

    /// The SIM needs a PIN (or PUK) before bring-up can continue.
    PinRequired {
        puk: bool,
    },

    /// The PIN supplied through `send_pin` was rejected.
    PinError {
        code: Option<u16>,
    },

    /// The SIM is missing or failed.
    SimFailed {
        reason: String,
    },

    /// Signal quality dropped to nothing.
    NoSignal,

    /// Signal came back after a [`Event::NoSignal`].
    SignalRecovered {
        coverage: Coverage,
    },

    /// The vendor profile cannot drive a mandatory bring-up stage.
    ConfigError {
        reason: String,
    },
}

impl Event {
    /// Short uppercase tag used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Event::Ready => "READY",
            Event::Down => "DOWN",
            Event::Restart { .. } => "RESTART",
            Event::RegistrationUp { .. } => "REGISTRATION_UP",
            Event::RegistrationDown { .. } => "REGISTRATION_DOWN",
            Event::Ring { .. } => "RING",
            Event::Ringing { .. } => "RINGING",
            Event::Proceeding { .. } => "PROCEEDING",
            Event::Answer { .. } => "ANSWER",
            Event::Hangup { .. } => "HANGUP",
            Event::HangupAck { .. } => "HANGUP_ACK",
            Event::CallWaiting { .. } => "CALL_WAITING",
            Event::KeypadDigit { .. } => "KEYPAD_DIGIT",
            Event::SmsReceived { .. } => "SMS_RECEIVED",
            Event::SmsSendOk { .. } => "SMS_SEND_OK",
            Event::SmsSendFailed { .. } => "SMS_SEND_FAILED",
            Event::UssdReceived { .. } => "USSD_RECEIVED",
            Event::UssdSendFailed { .. } => "USSD_SEND_FAILED",
            Event::OperatorList { .. } => "OPERATOR_LIST",
            Event::OperatorListFailed { .. } => "OPERATOR_LIST_FAILED",
            Event::SafeAtResponse { .. } => "SAFE_AT_RESPONSE",
            Event::PinRequired { .. } => "PIN_REQUIRED",
            Event::PinError { .. } => "PIN_ERROR",
            Event::SimFailed { .. } => "SIM_FAILED",
            Event::NoSignal => "NO_SIGNAL",
            Event::SignalRecovered { .. } => "SIGNAL_RECOVERED",
            Event::ConfigError { .. } => "CONFIG_ERR",
        }
    }
}
