//! Bring-up: reset to ready through the linear stage table.
//!
//! Each stage sends one command and advances on its `OK`. Errors and
//! timeouts re-send the same command a bounded number of times; after
//! that an optional stage is skipped and a mandatory one restarts the
//! whole sequence. The SIM and registration stages branch on what the
//! module reports.

use std::time::Duration;

use gsmlink_at::protocol::{
    Response, info_data, parse_cops_current, parse_cpin, parse_creg, parse_csca,
};
use gsmlink_core::command::AtCommand;
use gsmlink_core::error::{Error, Result};
use gsmlink_core::events::Event;
use gsmlink_core::types::{
    DebugFlags, DeviceIdentity, RegistrationStatus, SimState, SmsMode,
};
use tracing::{error, info, warn};

use crate::session::{Session, Timer};
use crate::state::ProtocolState;

impl Session {
    pub(crate) fn start_bringup(&mut self) {
        if self.power.is_powered_off() {
            info!("module is powered off; bring-up skipped");
            self.set_state(ProtocolState::Down);
            let delay = self.config.slow_rearm_interval;
            if self.schedule(delay, Timer::StartBringUp).is_err() {
                error!("power check could not be re-armed");
            }
            return;
        }
        info!(attempt = self.restart_attempts, "bring-up starting");

        self.sched.cancel_matching(|t| {
            matches!(
                t,
                Timer::Watchdog | Timer::StageRetry(_) | Timer::CommandTimeout(_)
            )
        });
        self.command_timer = None;
        self.tx.complete();
        self.stage_retries = 0;
        self.registration_polls = 0;
        self.firmware_errors = 0;
        self.health_failures = 0;
        self.sim = SimState::Unknown;
        self.registration = RegistrationStatus::NotRegistered;
        self.coverage = None;
        self.no_signal = false;
        self.identity = DeviceIdentity::default();
        self.operator_name = None;
        self.smsc = None;

        let watchdog = self.config.bringup_watchdog;
        if self.arm_watchdog(watchdog).is_err() {
            return;
        }
        self.enter_stage(ProtocolState::Reset);
    }

    /// Supply the SIM PIN.
    ///
    /// While bring-up waits for it the PIN is sent at once; before that it
    /// is kept and entered when the SIM asks.
    pub fn send_pin(&mut self, pin: &str) -> Result<()> {
        let span = self.span.clone();
        let _enter = span.enter();
        if !(4..=8).contains(&pin.len()) || !pin.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::InvalidParameter("PIN must be 4 to 8 digits".into()));
        }
        match self.state {
            ProtocolState::SimPinWait => {
                let watchdog = self.config.bringup_watchdog;
                self.arm_watchdog(watchdog)?;
                self.send_pin_command(pin.to_string());
                Ok(())
            }
            s if s.is_ready() => Err(Error::Protocol("SIM is already unlocked".into())),
            _ => {
                info!("PIN stored for bring-up");
                self.config.pin = Some(pin.to_string());
                Ok(())
            }
        }
    }

    /// Arm the bring-up watchdog, restarting when it cannot be armed.
    fn arm_watchdog(&mut self, after: Duration) -> Result<()> {
        self.cancel_watchdog();
        match self.schedule(after, Timer::Watchdog) {
            Ok(id) => {
                self.watchdog = Some(id);
                Ok(())
            }
            Err(e) => {
                self.restart_bringup("bring-up watchdog could not be armed", None);
                Err(e)
            }
        }
    }

    fn cancel_watchdog(&mut self) {
        if let Some(id) = self.watchdog.take() {
            self.sched.cancel(id);
        }
    }

    fn enter_stage(&mut self, state: ProtocolState) {
        self.set_state(state);
        self.stage_retries = 0;
        if state == ProtocolState::RegistrationPoll {
            // Polling may legitimately outlast the stage watchdog.
            let window = self.config.registration_poll_interval * self.config.registration_polls;
            let watchdog = self.config.bringup_watchdog + window;
            if self.arm_watchdog(watchdog).is_err() {
                return;
            }
        }
        self.send_stage();
    }

    /// Send the command of the current stage.
    fn send_stage(&mut self) {
        let Some(stage) = self.state.stage(&self.config) else {
            return;
        };
        let Some(line) = self.vendor.command(&stage.command) else {
            if stage.mandatory {
                self.config_error(&format!(
                    "{} has no command for mandatory stage {}",
                    self.vendor.name(),
                    stage.state
                ));
            } else {
                flagged!(self, DebugFlags::STATE, stage = %stage.state, "stage not supported; skipped");
                self.advance();
            }
            return;
        };
        let timeout = self.config.command_timeout;
        if let Err(e) = self.send_line(&line, timeout) {
            warn!(stage = %stage.state, "cannot send stage command: {e}");
            self.stage_retries += 1;
            if self.stage_retries > self.config.command_retries
                || matches!(e, Error::SchedulerFull { .. })
                || self.schedule(timeout, Timer::StageRetry(stage.state)).is_err()
            {
                self.restart_bringup("stage command could not be sent", None);
            }
        }
    }

    fn config_error(&mut self, reason: &str) {
        error!(reason, "bring-up stopped");
        self.cancel_watchdog();
        self.disarm_command_timer();
        self.tx.complete();
        self.set_state(ProtocolState::Down);
        self.emit(Event::ConfigError {
            reason: reason.to_string(),
        });
    }

    fn advance(&mut self) {
        let from = match self.state {
            ProtocolState::SimPinWait | ProtocolState::SimPinSent => ProtocolState::SimReadyReq,
            s => s,
        };
        match from.following_stages().first() {
            Some(&next) => self.enter_stage(next),
            None => self.become_ready(),
        }
    }

    /// Re-send the current stage's command, or give up on the stage.
    fn retry_stage(&mut self, why: &str) {
        self.stage_retries += 1;
        if self.stage_retries <= self.config.command_retries {
            warn!(stage = %self.state, attempt = self.stage_retries, why, "retrying stage");
            self.send_stage();
            return;
        }
        let mandatory = self
            .state
            .stage(&self.config)
            .is_none_or(|stage| stage.mandatory);
        if mandatory {
            let reason = format!("{} failed: {why}", self.state);
            self.restart_bringup(&reason, None);
        } else {
            warn!(stage = %self.state, why, "optional stage failed; skipped");
            self.advance();
        }
    }

    /// Ask again after `after` without counting against the retry bound.
    fn poll_stage_later(&mut self, after: Duration) {
        let state = self.state;
        if self.schedule(after, Timer::StageRetry(state)).is_err() {
            self.restart_bringup("stage poll could not be scheduled", None);
        }
    }

    pub(crate) fn on_stage_retry(&mut self, state: ProtocolState) {
        if self.state == state && !self.tx.is_awaiting() {
            self.send_stage();
        }
    }

    pub(crate) fn on_watchdog(&mut self) {
        if self.state.is_bringing_up() && self.state != ProtocolState::SimPinWait {
            self.restart_bringup("bring-up watchdog expired", None);
        }
    }

    /// The current stage's command got no answer.
    pub(crate) fn bringup_timeout(&mut self) {
        match self.state {
            ProtocolState::SimPinSent => self.enter_stage(ProtocolState::SimReadyReq),
            ProtocolState::SimPinWait => {}
            _ => self.retry_stage("no response"),
        }
    }

    pub(crate) fn handle_bringup(&mut self, resp: &Response, line: &str) {
        match resp {
            Response::Ok if self.tx.is_awaiting() => {
                self.command_done();
                self.stage_ok();
            }
            r if r.is_error() && self.tx.is_awaiting() => {
                self.command_done();
                self.stage_error(resp, line);
            }
            Response::Info { prefix, data } => self.capture_info(prefix, data, line),
            Response::Text(text) => self.capture_text(text),
            _ => flagged!(self, DebugFlags::AT, line, state = %self.state, "ignored during bring-up"),
        }
    }

    fn stage_ok(&mut self) {
        match self.state {
            ProtocolState::SimReadyReq => match self.sim {
                SimState::Ready => self.advance(),
                SimState::PinRequired => self.pin_needed(false),
                SimState::PukRequired => self.pin_needed(true),
                SimState::NotInserted | SimState::Failed => {
                    self.emit(Event::SimFailed {
                        reason: self.sim.to_string(),
                    });
                    self.restart_bringup("no usable SIM", None);
                }
                SimState::Unknown => self.sim_not_ready(),
            },
            ProtocolState::SimPinSent => self.enter_stage(ProtocolState::SimReadyReq),
            ProtocolState::SmsPduMode => {
                self.sms_mode = SmsMode::Pdu;
                self.advance();
            }
            ProtocolState::RegistrationPoll => self.registration_polled(),
            _ => self.advance(),
        }
    }

    fn stage_error(&mut self, resp: &Response, line: &str) {
        match self.state {
            ProtocolState::SimPinSent => {
                warn!(line, "PIN rejected");
                self.config.pin = None;
                self.cancel_watchdog();
                self.set_state(ProtocolState::SimPinWait);
                self.emit(Event::PinError {
                    code: resp.cme_code(),
                });
            }
            ProtocolState::SimReadyReq => match resp.cme_code() {
                Some(11) => self.pin_needed(false),
                Some(12) => self.pin_needed(true),
                Some(14) => self.sim_not_ready(),
                _ => self.retry_stage(line),
            },
            ProtocolState::RegistrationPoll => self.registration_polled(),
            _ => self.retry_stage(line),
        }
    }

    /// SIM busy or state not reported yet: ask again shortly.
    fn sim_not_ready(&mut self) {
        self.stage_retries += 1;
        if self.stage_retries > self.config.command_retries {
            self.restart_bringup("SIM never became ready", None);
            return;
        }
        let after = self.config.registration_poll_interval;
        self.poll_stage_later(after);
    }

    fn pin_needed(&mut self, puk: bool) {
        self.sim = if puk {
            SimState::PukRequired
        } else {
            SimState::PinRequired
        };
        if !puk {
            if let Some(pin) = self.config.pin.clone() {
                info!("entering configured PIN");
                self.send_pin_command(pin);
                return;
            }
        }
        warn!(puk, "SIM locked; waiting for PIN");
        self.cancel_watchdog();
        self.set_state(ProtocolState::SimPinWait);
        self.emit(Event::PinRequired { puk });
    }

    fn send_pin_command(&mut self, pin: String) {
        self.set_state(ProtocolState::SimPinSent);
        if let Err(e) = self.send_command(&AtCommand::EnterPin(pin)) {
            warn!("cannot send PIN: {e}");
            self.enter_stage(ProtocolState::SimReadyReq);
        }
    }

    fn registration_polled(&mut self) {
        if self.registration.is_registered() {
            self.advance();
            return;
        }
        if self.registration == RegistrationStatus::Denied {
            self.restart_bringup("registration denied", None);
            return;
        }
        self.registration_polls += 1;
        if self.registration_polls > self.config.registration_polls {
            self.restart_bringup("not registered in time", None);
            return;
        }
        flagged!(
            self,
            DebugFlags::STATE,
            status = %self.registration,
            poll = self.registration_polls,
            "not registered yet"
        );
        let after = self.config.registration_poll_interval;
        self.poll_stage_later(after);
    }

    fn capture_info(&mut self, prefix: &str, data: &str, line: &str) {
        let state = self.state;
        match prefix {
            "+CPIN" => {
                if let Some(sim) = parse_cpin(line) {
                    self.sim = sim;
                }
            }
            "+CREG" | "+CGREG" if state == ProtocolState::RegistrationPoll => {
                if let Some(status) = parse_creg(line) {
                    let was = self.registration;
                    self.registration = status;
                    if status.is_registered() && !was.is_registered() {
                        self.emit(Event::RegistrationUp { status });
                    }
                }
            }
            "+CSCA" if state == ProtocolState::NetOk => self.smsc = parse_csca(line),
            "+COPS" if state == ProtocolState::OperatorNameReq => {
                self.operator_name = parse_cops_current(line);
            }
            "+CGMM" if state == ProtocolState::ModelReq => self.identity.model = data.to_string(),
            "+CGMI" if state == ProtocolState::ManufacturerReq => {
                self.identity.manufacturer = data.to_string();
            }
            "+CGMR" if state == ProtocolState::RevisionReq => {
                self.identity.revision = data.to_string();
            }
            "+CGSN" if state == ProtocolState::ImeiReq => {
                self.identity.imei = data.trim_matches('"').to_string();
            }
            "+CIMI" if state == ProtocolState::ImsiReq => self.identity.imsi = data.to_string(),
            _ => flagged!(self, DebugFlags::AT, line, "informational during bring-up"),
        }
    }

    fn capture_text(&mut self, text: &str) {
        if self.vendor.is_boot_indication(text) {
            info!(text, "module boot indication");
            return;
        }
        if !self.tx.is_awaiting() {
            flagged!(self, DebugFlags::AT, text, "informational during bring-up");
            return;
        }
        let digits = !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit());
        match self.state {
            ProtocolState::ModelReq => self.identity.model = text.to_string(),
            ProtocolState::ManufacturerReq => self.identity.manufacturer = text.to_string(),
            ProtocolState::RevisionReq => {
                let revision = info_data(text, "Revision").unwrap_or(text);
                self.identity.revision = revision.to_string();
            }
            ProtocolState::ImeiReq if digits => self.identity.imei = text.to_string(),
            ProtocolState::ImsiReq if digits => self.identity.imsi = text.to_string(),
            _ => flagged!(self, DebugFlags::AT, text, "informational during bring-up"),
        }
    }

    fn become_ready(&mut self) {
        self.cancel_watchdog();
        self.restart_attempts = 0;
        self.set_state(ProtocolState::Ready);
        info!(
            model = %self.identity.model,
            imei = %self.identity.imei,
            operator = self.operator_name.as_deref().unwrap_or("-"),
            "span ready"
        );
        self.emit(Event::Ready);
        self.schedule_signal_poll();
        self.kick();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use gsmlink_core::events::Event;
    use gsmlink_core::types::{RegistrationStatus, SimState};
    use gsmlink_test_harness::ScriptedModem;

    use crate::config::EngineConfig;
    use crate::session::test_support::{TestSession, session_with};
    use crate::state::ProtocolState;

    #[test]
    fn reaches_ready_with_identity() {
        let mut t = TestSession::new();
        t.bring_up();
        assert_eq!(t.session.state(), ProtocolState::Ready);
        let id = t.session.identity();
        assert_eq!(id.model, "SIMCOM_SIM800");
        assert_eq!(id.imei, "867273020000001");
        assert_eq!(id.imsi, "234150000000001");
        let status = t.session.status();
        assert_eq!(status.smsc.as_deref(), Some("+447785016005"));
        assert_eq!(status.operator.as_deref(), Some("vodafone UK"));
        assert_eq!(t.session.registration(), RegistrationStatus::Home);

        let events = t.session.drain_events();
        assert!(events.contains(&Event::RegistrationUp {
            status: RegistrationStatus::Home
        }));
        assert_eq!(events.last(), Some(&Event::Ready));
    }

    #[test]
    fn registration_urc_then_ok_advances_to_net_ok() {
        let mut modem = ScriptedModem::new();
        modem.on("AT+CREG?", "");
        let mut t = TestSession::with_modem(modem, EngineConfig::default());
        t.session.start();
        t.pump();
        assert_eq!(t.session.state(), ProtocolState::RegistrationPoll);
        assert_eq!(t.session.last_sent(), Some("AT+CREG?"));
        t.session.drain_events();

        t.session.feed(b"\r\n+CREG: 1\r\n\r\nOK\r\n").unwrap();
        assert_eq!(
            t.session.poll_event(),
            Some(Event::RegistrationUp {
                status: RegistrationStatus::Home
            })
        );
        assert_eq!(t.session.state(), ProtocolState::NetOk);
        assert_eq!(t.session.last_sent(), Some("AT+CSCA?"));
    }

    #[test]
    fn unregistered_module_is_polled() {
        let mut modem = ScriptedModem::new();
        modem.on("AT+CREG?", "\r\n+CREG: 0,2\r\n\r\nOK\r\n");
        let mut t = TestSession::with_modem(modem, EngineConfig::default());
        t.session.start();
        t.pump();
        assert_eq!(t.session.state(), ProtocolState::RegistrationPoll);
        let polls = t.modem.count("AT+CREG?");

        t.modem.on("AT+CREG?", "\r\n+CREG: 0,5\r\n\r\nOK\r\n");
        t.advance(Duration::from_secs(2));
        assert_eq!(t.modem.count("AT+CREG?"), polls + 1);
        assert_eq!(t.session.state(), ProtocolState::Ready);
        assert_eq!(t.session.registration(), RegistrationStatus::Roaming);
    }

    #[test]
    fn pin_requested_then_supplied() {
        let mut modem = ScriptedModem::new();
        modem.on("AT+CPIN?", "\r\n+CPIN: SIM PIN\r\n\r\nOK\r\n");
        let mut t = TestSession::with_modem(modem, EngineConfig::default());
        t.session.start();
        t.pump();
        assert_eq!(t.session.state(), ProtocolState::SimPinWait);
        assert!(
            t.session
                .drain_events()
                .contains(&Event::PinRequired { puk: false })
        );

        assert!(t.session.send_pin("12a4").is_err());
        t.modem.on("AT+CPIN?", "\r\n+CPIN: READY\r\n\r\nOK\r\n");
        t.session.send_pin("1234").unwrap();
        t.pump();
        assert!(t.modem.received().iter().any(|l| l == "AT+CPIN=\"1234\""));
        assert_eq!(t.session.state(), ProtocolState::Ready);
        assert_eq!(t.session.sim_state(), SimState::Ready);
    }

    #[test]
    fn wrong_pin_reports_error_and_waits_again() {
        let mut modem = ScriptedModem::new();
        modem.on("AT+CPIN?", "\r\n+CPIN: SIM PIN\r\n\r\nOK\r\n");
        modem.on("AT+CPIN=\"0000\"", "\r\n+CME ERROR: 16\r\n");
        let mut cfg = EngineConfig::default();
        cfg.pin = Some("0000".into());
        let mut t = TestSession::with_modem(modem, cfg);
        t.session.start();
        t.pump();

        assert_eq!(t.session.state(), ProtocolState::SimPinWait);
        let events = t.session.drain_events();
        assert!(events.contains(&Event::PinError { code: Some(16) }));
        // The rejected PIN is not tried again.
        assert!(t.session.config().pin.is_none());
    }

    #[test]
    fn missing_sim_restarts_bring_up() {
        let mut modem = ScriptedModem::new();
        modem.on("AT+CPIN?", "\r\n+CME ERROR: 10\r\n");
        let mut t = TestSession::with_modem(modem, EngineConfig::default());
        t.session.start();
        t.pump();

        assert_eq!(t.session.state(), ProtocolState::Down);
        let events = t.session.drain_events();
        assert!(matches!(events[0], Event::SimFailed { .. }));
        assert_eq!(events[1], Event::Restart { attempt: 1 });
        assert_eq!(t.session.sim_state(), SimState::NotInserted);

        // Re-armed on the fast cadence.
        t.modem.on("AT+CPIN?", "\r\n+CPIN: READY\r\n\r\nOK\r\n");
        t.advance(Duration::from_secs(5));
        assert_eq!(t.session.state(), ProtocolState::Ready);
    }

    #[test]
    fn unanswered_optional_stage_is_skipped() {
        let mut modem = ScriptedModem::new();
        modem.silence("AT+CGMR");
        let mut t = TestSession::with_modem(modem, EngineConfig::default());
        t.session.start();
        t.pump();
        assert_eq!(t.session.state(), ProtocolState::RevisionReq);

        // One try plus three retries, five seconds each.
        for _ in 0..4 {
            t.advance(Duration::from_secs(5));
        }
        assert_eq!(t.modem.count("AT+CGMR"), 4);
        assert_eq!(t.session.state(), ProtocolState::Ready);
        assert!(t.session.identity().revision.is_empty());
    }

    #[test]
    fn unanswered_mandatory_stage_restarts() {
        let mut modem = ScriptedModem::new();
        modem.silence("ATE0");
        let mut t = TestSession::with_modem(modem, EngineConfig::default());
        t.session.start();
        t.pump();
        for _ in 0..4 {
            t.advance(Duration::from_secs(5));
        }
        assert_eq!(t.session.state(), ProtocolState::Down);
        assert!(
            t.session
                .drain_events()
                .contains(&Event::Restart { attempt: 1 })
        );
    }

    #[test]
    fn bring_up_without_watchdog_room_restarts() {
        let mut t = TestSession::new();
        t.fill_scheduler();
        t.session.start();
        t.pump();
        assert!(t.modem.received().is_empty());
        assert_eq!(t.session.drain_events(), vec![Event::Restart { attempt: 1 }]);
        assert_eq!(t.session.state(), ProtocolState::Down);

        t.advance(EngineConfig::default().fast_rearm_interval);
        assert!(t.session.is_ready());
    }

    #[test]
    fn powered_off_module_stays_down() {
        let (mut session, power) = session_with(EngineConfig::default());
        power.set(true);
        session.start();
        assert_eq!(session.state(), ProtocolState::Down);
        assert!(session.take_outbound().is_empty());
        assert!(session.next_deadline().is_some());
    }

    #[test]
    fn module_without_mandatory_command_is_a_config_error() {
        let mut t = TestSession::with_vendor(
            Box::new(crate::session::test_support::NoResetProfile),
            ScriptedModem::new(),
        );
        t.session.start();
        assert_eq!(t.session.state(), ProtocolState::Down);
        assert!(matches!(
            t.session.poll_event(),
            Some(Event::ConfigError { .. })
        ));
        assert!(t.session.take_outbound().is_empty());
    }
}
