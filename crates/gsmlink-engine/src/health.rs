//! Signal and registration supervision while ready.

use gsmlink_at::protocol::{Response, parse_creg, parse_csq};
use gsmlink_core::command::AtCommand;
use gsmlink_core::events::Event;
use gsmlink_core::types::{Coverage, DebugFlags, RegistrationStatus};
use tracing::{info, warn};

use crate::session::{Session, Timer};
use crate::state::ProtocolState;

impl Session {
    /// Last signal quality reading.
    pub fn coverage(&self) -> Option<Coverage> {
        self.coverage
    }

    pub(crate) fn schedule_signal_poll(&mut self) {
        self.sched.cancel_matching(|t| *t == Timer::SignalPoll);
        let after = self.config.signal_poll;
        if self.schedule(after, Timer::SignalPoll).is_err() {
            warn!("signal polling suspended");
        }
    }

    pub(crate) fn on_signal_poll(&mut self) {
        if !self.state.is_ready() {
            return;
        }
        if !self.is_idle() {
            flagged!(self, DebugFlags::SCHED, state = %self.state, "busy; signal poll skipped");
            self.schedule_signal_poll();
            return;
        }
        self.set_state(ProtocolState::SignalQuery);
        if let Err(e) = self.send_command(&AtCommand::SignalQuality) {
            self.health_failure(&e.to_string());
        }
    }

    pub(crate) fn signal_response(&mut self, resp: &Response, line: &str) {
        match resp {
            Response::Info { prefix, .. } if prefix == "+CSQ" => match parse_csq(line) {
                Some(coverage) => self.apply_coverage(coverage),
                None => warn!(line, "malformed +CSQ"),
            },
            Response::Ok => {
                self.command_done();
                self.health_failures = 0;
                self.schedule_signal_poll();
                self.enter_ready();
            }
            r if r.is_final() => {
                self.command_done();
                self.health_failure(line);
            }
            _ => flagged!(self, DebugFlags::AT, line, "ignored during signal query"),
        }
    }

    fn apply_coverage(&mut self, coverage: Coverage) {
        self.coverage = Some(coverage);
        flagged!(self, DebugFlags::STATE, rssi = coverage.rssi, ber = coverage.ber, "signal");
        if coverage.is_no_signal() {
            if !self.no_signal {
                self.no_signal = true;
                warn!("no signal");
                self.emit(Event::NoSignal);
            }
        } else if self.no_signal {
            self.no_signal = false;
            info!(rssi = coverage.rssi, "signal recovered");
            self.emit(Event::SignalRecovered { coverage });
        }
    }

    /// A health check went unanswered or failed.
    pub(crate) fn health_failure(&mut self, reason: &str) {
        self.health_failures += 1;
        warn!(
            reason,
            failures = self.health_failures,
            limit = self.config.health_failure_limit,
            "health check failed"
        );
        if self.health_failures >= self.config.health_failure_limit {
            self.health_failures = 0;
            self.restart_bringup("module stopped answering health checks", None);
            return;
        }
        self.schedule_signal_poll();
        if self.state == ProtocolState::SignalQuery {
            self.enter_ready();
        }
    }

    /// `+CREG`/`+CGREG` reported while ready.
    pub(crate) fn on_registration_urc(&mut self, line: &str) {
        let Some(status) = parse_creg(line) else {
            warn!(line, "malformed registration report");
            return;
        };
        let previous = self.registration;
        if status == previous {
            return;
        }
        self.registration = status;
        info!(from = %previous, to = %status, "registration changed");
        match (previous.is_registered(), status.is_registered()) {
            (false, true) => self.emit(Event::RegistrationUp { status }),
            (true, false) => self.emit(Event::RegistrationDown { status }),
            _ => {}
        }
        if status == RegistrationStatus::Denied {
            self.restart_bringup("registration denied", None);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use gsmlink_core::events::Event;
    use gsmlink_core::types::{Coverage, RegistrationStatus};
    use gsmlink_test_harness::ScriptedModem;

    use crate::config::EngineConfig;
    use crate::session::test_support::TestSession;
    use crate::state::ProtocolState;

    fn ready_with(modem: ScriptedModem) -> TestSession {
        let mut t = TestSession::with_modem(modem, EngineConfig::default());
        t.bring_up();
        t.session.drain_events();
        t
    }

    #[test]
    fn periodic_signal_poll() {
        let mut t = ready_with(ScriptedModem::new());
        let before = t.modem.count("AT+CSQ");
        t.advance(Duration::from_secs(30));
        assert_eq!(t.modem.count("AT+CSQ"), before + 1);
        assert_eq!(t.session.coverage(), Some(Coverage { rssi: 20, ber: 0 }));
        t.advance(Duration::from_secs(30));
        assert_eq!(t.modem.count("AT+CSQ"), before + 2);
        assert!(t.session.drain_events().is_empty());
    }

    #[test]
    fn signal_loss_and_recovery() {
        let mut t = ready_with(ScriptedModem::new());
        t.modem.on("AT+CSQ", "\r\n+CSQ: 99,99\r\n\r\nOK\r\n");
        t.advance(Duration::from_secs(30));
        t.advance(Duration::from_secs(30));
        assert_eq!(t.session.drain_events(), vec![Event::NoSignal]);

        t.modem.on("AT+CSQ", "\r\n+CSQ: 15,0\r\n\r\nOK\r\n");
        t.advance(Duration::from_secs(30));
        assert_eq!(
            t.session.drain_events(),
            vec![Event::SignalRecovered {
                coverage: Coverage { rssi: 15, ber: 0 }
            }]
        );
    }

    #[test]
    fn unanswered_polls_restart_the_module() {
        let mut t = ready_with(ScriptedModem::new());
        t.modem.silence("AT+CSQ");
        for _ in 0..2 {
            t.advance(Duration::from_secs(30));
            t.advance(Duration::from_secs(5));
            assert!(t.session.is_ready());
        }
        t.advance(Duration::from_secs(30));
        t.advance(Duration::from_secs(5));
        let events = t.session.drain_events();
        assert!(events.contains(&Event::Down));
        assert!(events.iter().any(|e| matches!(e, Event::Restart { .. })));
    }

    #[test]
    fn registration_reports() {
        let mut t = ready_with(ScriptedModem::new());
        t.session.feed(b"\r\n+CREG: 2\r\n").unwrap();
        assert_eq!(
            t.session.poll_event(),
            Some(Event::RegistrationDown {
                status: RegistrationStatus::Searching
            })
        );
        // Solicited form with the mode field.
        t.session.feed(b"\r\n+CREG: 1,5\r\n").unwrap();
        assert_eq!(
            t.session.poll_event(),
            Some(Event::RegistrationUp {
                status: RegistrationStatus::Roaming
            })
        );
        t.session.feed(b"\r\n+CREG: 5\r\n").unwrap();
        assert_eq!(t.session.poll_event(), None);
        assert_eq!(t.session.state(), ProtocolState::Ready);
    }

    #[test]
    fn denied_registration_resets_the_module() {
        let mut t = ready_with(ScriptedModem::new());
        t.session.feed(b"\r\n+CREG: 3\r\n").unwrap();
        assert_eq!(
            t.session.drain_events(),
            vec![
                Event::RegistrationDown {
                    status: RegistrationStatus::Denied
                },
                Event::Down,
                Event::Restart { attempt: 1 },
            ]
        );
        assert_eq!(t.session.state(), ProtocolState::Down);

        t.advance(EngineConfig::default().fast_rearm_interval);
        assert!(t.session.is_ready());
        assert!(t.session.drain_events().contains(&Event::Ready));
    }
}
