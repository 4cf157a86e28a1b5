//! Collaborator interfaces the engine calls but does not implement.
//!
//! - [`TextCodec`]: conversion between the modem's text alphabet and the
//!   application's display text.
//! - [`DeliveryLog`]: persistence of SMS delivery outcomes.
//! - [`PowerProbe`]: whether the module is powered at all.

use crate::types::SmsMode;

/// Character-set conversion between modem text and display text.
pub trait TextCodec: Send + Sync {
    /// Convert text read from the modem (USSD, text-mode SMS) for display.
    fn decode(&self, raw: &str) -> String;

    /// Convert display text into the modem's alphabet before sending.
    fn encode(&self, text: &str) -> String;
}

/// Identity conversion, for modems configured with `AT+CSCS="UTF-8"` or
/// plain ASCII traffic.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThroughCodec;

impl TextCodec for PassThroughCodec {
    fn decode(&self, raw: &str) -> String {
        raw.to_string()
    }

    fn encode(&self, text: &str) -> String {
        text.to_string()
    }
}

/// Terminal outcome of one SMS submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryRecord {
    /// Caller-supplied delivery id.
    pub id: u64,
    pub destination: String,
    /// Encoding the submission actually used.
    pub mode: SmsMode,
    pub success: bool,
    /// Submission attempts made, including the last one.
    pub attempts: u32,
    pub reason: Option<String>,
}

/// Sink for SMS delivery counters and logs.
pub trait DeliveryLog: Send {
    fn record(&mut self, record: &DeliveryRecord);
}

/// Delivery log that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullDeliveryLog;

impl DeliveryLog for NullDeliveryLog {
    fn record(&mut self, _record: &DeliveryRecord) {}
}

/// Reports whether the module behind a span is switched off.
pub trait PowerProbe: Send {
    fn is_powered_off(&self) -> bool;
}

/// Probe for modules without a power indication; always on.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysOn;

impl PowerProbe for AlwaysOn {
    fn is_powered_off(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pass_through_codec_is_identity() {
        let codec = PassThroughCodec;
        assert_eq!(codec.decode("Balance: 10"), "Balance: 10");
        assert_eq!(codec.encode("hi"), "hi");
    }

    #[test]
    fn always_on_probe() {
        assert!(!AlwaysOn.is_powered_off());
    }
}
