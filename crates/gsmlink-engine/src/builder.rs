//! SessionBuilder -- fluent builder for [`Session`] instances.
//!
//! Separates policy from construction so that callers can pick the clock,
//! collaborators and timeouts before the session exists. A session can
//! either be built bare, for embedders that run their own IO loop, or
//! spawned straight into a tokio task with [`SessionBuilder::spawn`].
//!
//! # Example
//!
//! ```no_run
//! use gsmlink_engine::SessionBuilder;
//! use gsmlink_core::SmsMode;
//! use gsmlink_vendor::models::sim900;
//! use std::time::Duration;
//!
//! # async fn example(transport: Box<dyn gsmlink_core::Transport>) -> gsmlink_core::Result<()> {
//! let io = SessionBuilder::new(sim900())
//!     .span_id(2)
//!     .pin("1234")
//!     .sms_mode(SmsMode::Text)
//!     .command_timeout(Duration::from_secs(3))
//!     .spawn(transport)?;
//! let status = io.status().await?;
//! println!("{status}");
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use gsmlink_core::collab::{
    AlwaysOn, DeliveryLog, NullDeliveryLog, PassThroughCodec, PowerProbe, TextCodec,
};
use gsmlink_core::command::{AtCommand, VendorProfile};
use gsmlink_core::error::{Error, Result};
use gsmlink_core::transport::Transport;
use gsmlink_core::types::{DebugFlags, SmsMode};

use crate::clock::{Clock, MonotonicClock, TokioClock};
use crate::config::EngineConfig;
use crate::io::{SessionIo, spawn_session_task};
use crate::session::{Session, SessionParts};

/// Fluent builder for [`Session`].
///
/// Every setting has a default, so the simplest usage is:
///
/// ```ignore
/// let mut session = SessionBuilder::new(sim800()).build()?;
/// ```
pub struct SessionBuilder {
    vendor: Box<dyn VendorProfile>,
    span_id: u32,
    config: EngineConfig,
    clock: Option<Box<dyn Clock>>,
    codec: Box<dyn TextCodec>,
    delivery_log: Box<dyn DeliveryLog>,
    power: Box<dyn PowerProbe>,
    debug: DebugFlags,
}

impl SessionBuilder {
    /// Create a builder for `vendor` with default policy.
    pub fn new(vendor: impl VendorProfile + 'static) -> Self {
        Self::from_profile(Box::new(vendor))
    }

    /// Create a builder from an already boxed profile, e.g. one picked by
    /// name at runtime.
    pub fn from_profile(vendor: Box<dyn VendorProfile>) -> Self {
        SessionBuilder {
            vendor,
            span_id: 1,
            config: EngineConfig::default(),
            clock: None,
            codec: Box::new(PassThroughCodec),
            delivery_log: Box::new(NullDeliveryLog),
            power: Box::new(AlwaysOn),
            debug: DebugFlags::NONE,
        }
    }

    /// Span number shown in logs and status output.
    pub fn span_id(mut self, id: u32) -> Self {
        self.span_id = id;
        self
    }

    /// Replace the whole engine policy.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.config.command_timeout = timeout;
        self
    }

    /// PIN entered when the SIM asks for one.
    pub fn pin(mut self, pin: &str) -> Self {
        self.config.pin = Some(pin.to_string());
        self
    }

    /// Format used for outgoing text messages.
    pub fn sms_mode(mut self, mode: SmsMode) -> Self {
        self.config.sms_mode = mode;
        self
    }

    /// SIM slot to select on dual-SIM modules.
    pub fn sim_slot(mut self, slot: u8) -> Self {
        self.config.sim_slot = slot;
        self
    }

    /// Time source. Defaults to [`MonotonicClock`] for [`build`](Self::build)
    /// and [`TokioClock`] for [`spawn`](Self::spawn).
    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Some(Box::new(clock));
        self
    }

    pub fn codec(mut self, codec: impl TextCodec + 'static) -> Self {
        self.codec = Box::new(codec);
        self
    }

    pub fn delivery_log(mut self, log: impl DeliveryLog + 'static) -> Self {
        self.delivery_log = Box::new(log);
        self
    }

    pub fn power_probe(mut self, probe: impl PowerProbe + 'static) -> Self {
        self.power = Box::new(probe);
        self
    }

    /// Subsystems whose activity is logged at `debug` rather than `trace`.
    pub fn debug(mut self, flags: DebugFlags) -> Self {
        self.debug = flags;
        self
    }

    fn validate(&self) -> Result<()> {
        self.config.validate()?;
        if let Some(pin) = &self.config.pin {
            if !(4..=8).contains(&pin.len()) || !pin.bytes().all(|b| b.is_ascii_digit()) {
                return Err(Error::InvalidParameter("PIN must be 4 to 8 digits".into()));
            }
        }
        if self.config.sim_slot != 0
            && self
                .vendor
                .command(&AtCommand::SimSlotSelect(self.config.sim_slot))
                .is_none()
        {
            return Err(Error::InvalidParameter(format!(
                "{} has a single SIM slot",
                self.vendor.name()
            )));
        }
        if self.config.sms_mode == SmsMode::Text
            && self
                .vendor
                .command(&AtCommand::SmsFormat(SmsMode::Text))
                .is_none()
        {
            return Err(Error::InvalidParameter(format!(
                "{} does not support text-mode SMS",
                self.vendor.name()
            )));
        }
        Ok(())
    }

    fn into_session(self, default_clock: Box<dyn Clock>) -> Session {
        Session::from_parts(SessionParts {
            span_id: self.span_id,
            vendor: self.vendor,
            config: self.config,
            clock: self.clock.unwrap_or(default_clock),
            codec: self.codec,
            delivery_log: self.delivery_log,
            power: self.power,
            debug: self.debug,
        })
    }

    /// Build a bare [`Session`] for a caller-run IO loop.
    ///
    /// The session is created down; call [`Session::start`] to begin
    /// bring-up.
    pub fn build(self) -> Result<Session> {
        self.validate()?;
        Ok(self.into_session(Box::new(MonotonicClock)))
    }

    /// Build the session, start it and hand it to an IO task that owns
    /// `transport`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(self, transport: Box<dyn Transport>) -> Result<SessionIo> {
        self.validate()?;
        let session = self.into_session(Box::new(TokioClock));
        Ok(spawn_session_task(session, transport))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::state::ProtocolState;
    use gsmlink_test_harness::{MockTransport, ScriptedModem};
    use gsmlink_vendor::models::{sim800, sim900};

    #[test]
    fn builder_defaults() {
        let session = SessionBuilder::new(sim800()).build().unwrap();
        assert_eq!(session.span_id(), 1);
        assert_eq!(session.vendor().name(), "SIM800");
        assert_eq!(session.state(), ProtocolState::Down);
        assert_eq!(session.config(), &EngineConfig::default());
        assert_eq!(session.debug_flags(), DebugFlags::NONE);
    }

    #[test]
    fn builder_fluent_chain() {
        let session = SessionBuilder::new(sim900())
            .span_id(4)
            .pin("0000")
            .sms_mode(SmsMode::Text)
            .command_timeout(Duration::from_secs(2))
            .clock(ManualClock::new())
            .debug(DebugFlags::AT | DebugFlags::STATE)
            .build()
            .unwrap();

        assert_eq!(session.span_id(), 4);
        assert_eq!(session.config().pin.as_deref(), Some("0000"));
        assert_eq!(session.config().sms_mode, SmsMode::Text);
        assert_eq!(session.config().command_timeout, Duration::from_secs(2));
        assert!(session.debug_flags().contains(DebugFlags::STATE));
    }

    #[test]
    fn builder_rejects_bad_pin() {
        let result = SessionBuilder::new(sim800()).pin("12a4").build();
        assert!(matches!(result, Err(Error::InvalidParameter(_))));
    }

    #[test]
    fn builder_rejects_invalid_config() {
        let config = EngineConfig {
            outbox_capacity: 0,
            ..EngineConfig::default()
        };
        let result = SessionBuilder::new(sim800()).config(config).build();
        assert!(matches!(result, Err(Error::InvalidParameter(_))));
    }

    #[test]
    fn builder_rejects_slot_on_single_sim_module() {
        let result = SessionBuilder::new(sim900()).sim_slot(1).build();
        assert!(matches!(result, Err(Error::InvalidParameter(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn spawned_session_comes_up() {
        let io = SessionBuilder::new(sim800())
            .spawn(Box::new(MockTransport::new(ScriptedModem::new())))
            .unwrap();
        let mut events = io.subscribe();
        loop {
            if events.recv().await.unwrap() == gsmlink_core::events::Event::Ready {
                break;
            }
        }
        assert_eq!(io.status().await.unwrap().state, ProtocolState::Ready);
        io.shutdown().await.unwrap();
    }
}
