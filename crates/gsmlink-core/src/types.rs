//! Core types used throughout gsmlink.
//!
//! These types describe the call-control, registration, SIM and messaging
//! state of a modem span independently of any vendor's AT dialect.

use std::fmt;
use std::str::FromStr;

/// Identifier of one call-control transaction on a span.
///
/// References are small integers, unique among the live calls of one
/// session, and reused once a call has been released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallRef(u16);

impl CallRef {
    /// Create a call reference from its raw value.
    pub const fn new(raw: u16) -> Self {
        CallRef(raw)
    }

    /// Return the raw numeric value.
    pub fn value(&self) -> u16 {
        self.0
    }
}

impl fmt::Display for CallRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Call-control state, numbered as in Q.931.
///
/// Every call carries two of these: our own state and the state we believe
/// the peer (the network side of the modem) is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CallState {
    #[default]
    Null,
    CallInitiated,
    OverlapSending,
    OutgoingProceeding,
    CallDelivered,
    CallPresent,
    CallReceived,
    ConnectRequest,
    IncomingProceeding,
    Active,
    DisconnectRequest,
    DisconnectIndication,
    ReleaseRequest,
    OverlapReceiving,
    RestartRequest,
    Restart,
}

impl CallState {
    /// The Q.931 numeric code of this state.
    pub fn code(&self) -> u8 {
        match self {
            CallState::Null => 0,
            CallState::CallInitiated => 1,
            CallState::OverlapSending => 2,
            CallState::OutgoingProceeding => 3,
            CallState::CallDelivered => 4,
            CallState::CallPresent => 6,
            CallState::CallReceived => 7,
            CallState::ConnectRequest => 8,
            CallState::IncomingProceeding => 9,
            CallState::Active => 10,
            CallState::DisconnectRequest => 11,
            CallState::DisconnectIndication => 12,
            CallState::ReleaseRequest => 19,
            CallState::OverlapReceiving => 25,
            CallState::RestartRequest => 61,
            CallState::Restart => 62,
        }
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CallState::Null => "Null",
            CallState::CallInitiated => "Call Initiated",
            CallState::OverlapSending => "Overlap Sending",
            CallState::OutgoingProceeding => "Outgoing Call Proceeding",
            CallState::CallDelivered => "Call Delivered",
            CallState::CallPresent => "Call Present",
            CallState::CallReceived => "Call Received",
            CallState::ConnectRequest => "Connect Request",
            CallState::IncomingProceeding => "Incoming Call Proceeding",
            CallState::Active => "Active",
            CallState::DisconnectRequest => "Disconnect Request",
            CallState::DisconnectIndication => "Disconnect Indication",
            CallState::ReleaseRequest => "Release Request",
            CallState::OverlapReceiving => "Overlap Receiving",
            CallState::RestartRequest => "Restart Request",
            CallState::Restart => "Restart",
        };
        write!(f, "{s}")
    }
}

/// Release cause carried by hangup events and requests (Q.850 values).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cause(u8);

impl Cause {
    pub const UNALLOCATED: Cause = Cause(1);
    pub const NORMAL_CLEARING: Cause = Cause(16);
    pub const USER_BUSY: Cause = Cause(17);
    pub const NO_USER_RESPONSE: Cause = Cause(18);
    pub const NO_ANSWER: Cause = Cause(19);
    pub const CALL_REJECTED: Cause = Cause(21);
    pub const NORMAL_UNSPECIFIED: Cause = Cause(31);
    pub const CHANNEL_UNAVAILABLE: Cause = Cause(34);
    pub const NETWORK_OUT_OF_ORDER: Cause = Cause(38);
    pub const TEMPORARY_FAILURE: Cause = Cause(41);
    pub const SWITCH_CONGESTION: Cause = Cause(42);
    pub const RECOVERY_ON_TIMER_EXPIRE: Cause = Cause(102);
    pub const INTERWORKING: Cause = Cause(127);

    /// Create a cause from its raw Q.850 value.
    pub const fn new(raw: u8) -> Self {
        Cause(raw)
    }

    /// Return the raw Q.850 value.
    pub fn value(&self) -> u8 {
        self.0
    }
}

impl Default for Cause {
    fn default() -> Self {
        Cause::NORMAL_CLEARING
    }
}

impl fmt::Display for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self.0 {
            1 => "Unallocated (unassigned) number",
            16 => "Normal Clearing",
            17 => "User busy",
            18 => "No user responding",
            19 => "User alerting, no answer",
            21 => "Call Rejected",
            31 => "Normal, unspecified",
            34 => "No circuit/channel available",
            38 => "Network out of order",
            41 => "Temporary failure",
            42 => "Switching equipment congestion",
            102 => "Recovery on timer expiry",
            127 => "Interworking, unspecified",
            n => return write!(f, "Unknown cause {n}"),
        };
        write!(f, "{s}")
    }
}

/// Network registration status as reported by `+CREG`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RegistrationStatus {
    /// Not registered, not searching (`0`).
    #[default]
    NotRegistered,
    /// Registered on the home network (`1`).
    Home,
    /// Not registered, searching (`2`).
    Searching,
    /// Registration denied (`3`).
    Denied,
    /// Unknown (`4`).
    Unknown,
    /// Registered, roaming (`5`).
    Roaming,
}

impl RegistrationStatus {
    /// Map a numeric `<stat>` value to a status.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(RegistrationStatus::NotRegistered),
            1 => Some(RegistrationStatus::Home),
            2 => Some(RegistrationStatus::Searching),
            3 => Some(RegistrationStatus::Denied),
            4 => Some(RegistrationStatus::Unknown),
            5 => Some(RegistrationStatus::Roaming),
            _ => None,
        }
    }

    /// Whether the module can place and receive calls in this status.
    pub fn is_registered(&self) -> bool {
        matches!(self, RegistrationStatus::Home | RegistrationStatus::Roaming)
    }
}

impl fmt::Display for RegistrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RegistrationStatus::NotRegistered => "Not registered",
            RegistrationStatus::Home => "Registered (Home network)",
            RegistrationStatus::Searching => "Searching",
            RegistrationStatus::Denied => "Registration denied",
            RegistrationStatus::Unknown => "Unknown",
            RegistrationStatus::Roaming => "Registered (Roaming)",
        };
        write!(f, "{s}")
    }
}

/// Radio coverage derived from a signal quality report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Coverage {
    /// Raw RSSI index as reported by `+CSQ` (0..=31, 99 = unknown).
    pub rssi: u8,
    /// Raw bit error rate index (0..=7, 99 = unknown).
    pub ber: u8,
}

impl Coverage {
    /// Whether the report means there is no usable signal.
    pub fn is_no_signal(&self) -> bool {
        self.rssi == 0 || self.rssi == 99
    }

    /// Approximate received signal strength in dBm, if known.
    pub fn dbm(&self) -> Option<i16> {
        if self.rssi == 99 {
            None
        } else {
            Some(-113 + 2 * self.rssi.min(31) as i16)
        }
    }

    /// Coverage level on a 0..=5 bar scale.
    pub fn level(&self) -> u8 {
        match self.rssi {
            99 | 0 => 0,
            1..=9 => 1,
            10..=14 => 2,
            15..=19 => 3,
            20..=24 => 4,
            _ => 5,
        }
    }
}

/// SIM card presence and unlock state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SimState {
    #[default]
    Unknown,
    Ready,
    PinRequired,
    PukRequired,
    NotInserted,
    Failed,
}

impl SimState {
    /// Interpret the value part of a `+CPIN:` response.
    pub fn from_cpin(value: &str) -> Self {
        let v = value.trim().trim_matches('"').to_ascii_uppercase();
        match v.as_str() {
            "READY" => SimState::Ready,
            "SIM PIN" | "SIM PIN2" => SimState::PinRequired,
            "SIM PUK" | "SIM PUK2" => SimState::PukRequired,
            "NOT INSERTED" | "NOT READY" => SimState::NotInserted,
            _ => SimState::Unknown,
        }
    }
}

impl fmt::Display for SimState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SimState::Unknown => "Unknown",
            SimState::Ready => "Ready",
            SimState::PinRequired => "PIN required",
            SimState::PukRequired => "PUK required",
            SimState::NotInserted => "Not inserted",
            SimState::Failed => "Failed",
        };
        write!(f, "{s}")
    }
}

/// SMS message format selected with `AT+CMGF`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SmsMode {
    #[default]
    Pdu,
    Text,
}

impl fmt::Display for SmsMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SmsMode::Pdu => write!(f, "PDU"),
            SmsMode::Text => write!(f, "TEXT"),
        }
    }
}

/// Error returned when a string cannot be parsed into an [`SmsMode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseSmsModeError(String);

impl fmt::Display for ParseSmsModeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown SMS mode: {}", self.0)
    }
}

impl std::error::Error for ParseSmsModeError {}

impl FromStr for SmsMode {
    type Err = ParseSmsModeError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pdu" => Ok(SmsMode::Pdu),
            "text" | "txt" => Ok(SmsMode::Text),
            _ => Err(ParseSmsModeError(s.to_string())),
        }
    }
}

/// Availability of an operator in a `+COPS=?` listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperatorStatus {
    Unknown,
    Available,
    Current,
    Forbidden,
}

impl OperatorStatus {
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => OperatorStatus::Available,
            2 => OperatorStatus::Current,
            3 => OperatorStatus::Forbidden,
            _ => OperatorStatus::Unknown,
        }
    }
}

/// One entry of an operator list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operator {
    pub status: OperatorStatus,
    pub long_name: String,
    pub short_name: String,
    /// Numeric MCC+MNC code.
    pub numeric: String,
}

/// Calling-line identity extracted from `+CLIP`/`+CCWA`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CallerId {
    pub number: String,
    /// Type of address octet (129 national/unknown, 145 international).
    pub type_of_address: u8,
    /// Alphanumeric name, when the network supplied one.
    pub name: Option<String>,
}

/// Concatenation position of one part of a multi-part SMS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConcatPart {
    pub reference: u16,
    pub total: u8,
    pub sequence: u8,
}

/// A received short message, fully decoded.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SmsMessage {
    pub sender: String,
    pub smsc: Option<String>,
    /// Service-centre timestamp formatted `YY/MM/DD,hh:mm:ss+zz`.
    pub timestamp: String,
    pub text: String,
    /// Number of parts the text was reassembled from.
    pub parts: u8,
    pub mode: SmsMode,
}

/// Identity strings read during bring-up.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceIdentity {
    pub manufacturer: String,
    pub model: String,
    pub revision: String,
    pub imei: String,
    pub imsi: String,
}

/// Per-category debug verbosity for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DebugFlags(u32);

impl DebugFlags {
    pub const NONE: DebugFlags = DebugFlags(0);
    /// Raw bytes read from and written to the link.
    pub const RAW: DebugFlags = DebugFlags(1 << 0);
    /// Framed AT lines in both directions.
    pub const AT: DebugFlags = DebugFlags(1 << 1);
    /// Protocol state transitions.
    pub const STATE: DebugFlags = DebugFlags(1 << 2);
    /// Scheduler activity.
    pub const SCHED: DebugFlags = DebugFlags(1 << 3);
    /// Call registry changes.
    pub const CALLS: DebugFlags = DebugFlags(1 << 4);
    pub const ALL: DebugFlags = DebugFlags(0x1F);

    pub const fn from_bits(bits: u32) -> Self {
        DebugFlags(bits)
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn contains(&self, other: DebugFlags) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }
}

impl std::ops::BitOr for DebugFlags {
    type Output = DebugFlags;

    fn bitor(self, rhs: DebugFlags) -> DebugFlags {
        DebugFlags(self.0 | rhs.0)
    }
}
