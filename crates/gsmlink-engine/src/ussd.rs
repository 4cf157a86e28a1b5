//! USSD requests and network-initiated USSD.

use gsmlink_at::protocol::{Response, parse_cusd};
use gsmlink_core::command::AtCommand;
use gsmlink_core::error::{Error, Result};
use gsmlink_core::events::Event;
use gsmlink_core::types::DebugFlags;
use tracing::{debug, info, warn};

use crate::pending::{Request, RequestKind};
use crate::scheduler::TaskId;
use crate::session::{Session, Timer};
use crate::state::ProtocolState;

/// Longest USSD string accepted.
const MAX_USSD_LEN: usize = 182;

/// Default data coding scheme reported when `+CUSD` omits it.
const DEFAULT_DCS: u8 = 15;

#[derive(Debug, Default)]
pub(crate) struct UssdContext {
    /// A request is waiting for its `+CUSD` answer.
    active: bool,
    timer: Option<TaskId>,
}

impl Session {
    /// Send a USSD string such as `*100#`.
    ///
    /// The answer arrives as [`Event::UssdReceived`], a failure or a
    /// timeout as [`Event::UssdSendFailed`].
    pub fn send_ussd(&mut self, code: &str) -> Result<()> {
        let span = self.span.clone();
        let _enter = span.enter();
        let code = code.trim();
        if code.is_empty() || code.len() > MAX_USSD_LEN {
            return Err(Error::InvalidParameter(format!(
                "USSD string must be 1-{MAX_USSD_LEN} characters"
            )));
        }
        if !code
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '*' | '#' | '+'))
        {
            return Err(Error::InvalidParameter(format!("invalid USSD string {code:?}")));
        }
        self.submit_request(Request::Ussd {
            code: code.to_string(),
        })
    }

    pub(crate) fn start_ussd(&mut self, code: &str) {
        info!(code, "sending USSD");
        self.cancel_ussd_timer();
        self.ussd.active = true;
        let after = self.config.ussd_timeout;
        match self.schedule(after, Timer::UssdTimeout) {
            Ok(id) => self.ussd.timer = Some(id),
            Err(e) => {
                self.ussd_failed(&e.to_string());
                return;
            }
        }
        self.set_state(ProtocolState::UssdSending);
        let cmd = AtCommand::Ussd {
            code: self.codec.encode(code),
            dcs: self.config.ussd_dcs,
        };
        if let Err(e) = self.send_command(&cmd) {
            self.ussd_failed(&e.to_string());
        }
    }

    fn cancel_ussd_timer(&mut self) {
        if let Some(id) = self.ussd.timer.take() {
            self.sched.cancel(id);
        }
    }

    /// Final result of `AT+CUSD`. The answer itself comes later as `+CUSD`.
    pub(crate) fn ussd_response(&mut self, resp: &Response, line: &str) {
        if !resp.is_final() {
            flagged!(self, DebugFlags::AT, line, "ignored during USSD");
            return;
        }
        self.command_done();
        if resp.is_error() {
            self.ussd_failed(line);
        } else {
            self.enter_ready();
        }
    }

    pub(crate) fn on_cusd(&mut self, line: &str) {
        let Some(reply) = parse_cusd(line) else {
            warn!(line, "malformed +CUSD");
            return;
        };
        if !self.ussd.active {
            if reply.is_failure() {
                debug!(status = reply.status, "USSD session ended by network");
                return;
            }
            info!(status = reply.status, "network-initiated USSD");
            self.emit_ussd(reply.status, reply.text.as_deref(), reply.dcs);
            return;
        }

        if reply.is_failure() {
            self.ussd_failed(&format!("network returned USSD status {}", reply.status));
            return;
        }
        self.cancel_ussd_timer();
        self.ussd.active = false;
        self.emit_ussd(reply.status, reply.text.as_deref(), reply.dcs);
        self.pending.finish(RequestKind::Ussd);
        // The final result of AT+CUSD may still be outstanding.
        if self.state == ProtocolState::Ready {
            self.kick();
        }
    }

    fn emit_ussd(&mut self, status: u8, text: Option<&str>, dcs: Option<u8>) {
        let text = text.map(|t| self.codec.decode(t)).unwrap_or_default();
        self.emit(Event::UssdReceived {
            status,
            text,
            dcs: dcs.unwrap_or(DEFAULT_DCS),
        });
    }

    pub(crate) fn on_ussd_timeout(&mut self, id: TaskId) {
        if self.ussd.timer != Some(id) {
            return;
        }
        self.ussd.timer = None;
        if self.state == ProtocolState::UssdSending {
            self.disarm_command_timer();
            self.tx.complete();
        }
        self.ussd_failed("no USSD answer");
    }

    pub(crate) fn ussd_failed(&mut self, reason: &str) {
        self.cancel_ussd_timer();
        self.ussd.active = false;
        if self.state == ProtocolState::UssdSending && !self.tx.is_awaiting() {
            self.set_state(ProtocolState::Ready);
        }
        self.fail_pending(RequestKind::Ussd, reason);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use gsmlink_core::error::Error;
    use gsmlink_core::events::Event;
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
    fn balance_query() {
        let mut modem = ScriptedModem::new();
        modem.on(
            "AT+CUSD=1,\"*100#\",15",
            "\r\nOK\r\n\r\n+CUSD: 0,\"Balance: 5.00\",15\r\n",
        );
        let mut t = ready_with(modem);
        t.session.send_ussd("*100#").unwrap();
        t.pump();
        assert_eq!(
            t.session.drain_events(),
            vec![Event::UssdReceived {
                status: 0,
                text: "Balance: 5.00".into(),
                dcs: 15
            }]
        );
        assert_eq!(t.session.state(), ProtocolState::Ready);
        assert_eq!(t.session.status().pending_requests, 0);
    }

    #[test]
    fn answer_before_final_result() {
        let mut modem = ScriptedModem::new();
        modem.on(
            "AT+CUSD=1,\"*101#\",15",
            "\r\n+CUSD: 1,\"Menu\",15\r\n\r\nOK\r\n",
        );
        let mut t = ready_with(modem);
        t.session.send_ussd("*101#").unwrap();
        t.pump();
        assert!(matches!(
            t.session.drain_events().as_slice(),
            [Event::UssdReceived { status: 1, .. }]
        ));
        assert_eq!(t.session.state(), ProtocolState::Ready);
    }

    #[test]
    fn error_result_fails_the_request() {
        let mut modem = ScriptedModem::new();
        modem.on("AT+CUSD=1,\"*102#\",15", "\r\n+CME ERROR: 3\r\n");
        let mut t = ready_with(modem);
        t.session.send_ussd("*102#").unwrap();
        t.pump();
        assert!(matches!(
            t.session.drain_events().as_slice(),
            [Event::UssdSendFailed { .. }]
        ));
        assert_eq!(t.session.state(), ProtocolState::Ready);
    }

    #[test]
    fn network_failure_status() {
        let mut modem = ScriptedModem::new();
        modem.on("AT+CUSD=1,\"*103#\",15", "\r\nOK\r\n\r\n+CUSD: 4\r\n");
        let mut t = ready_with(modem);
        t.session.send_ussd("*103#").unwrap();
        t.pump();
        assert!(matches!(
            t.session.drain_events().as_slice(),
            [Event::UssdSendFailed { reason }] if reason.contains('4')
        ));
    }

    #[test]
    fn missing_answer_times_out() {
        let mut modem = ScriptedModem::new();
        modem.on("AT+CUSD=1,\"*104#\",15", "\r\nOK\r\n");
        let mut t = ready_with(modem);
        t.session.send_ussd("*104#").unwrap();
        t.pump();
        assert!(t.session.drain_events().is_empty());
        t.advance(Duration::from_secs(31));
        assert!(matches!(
            t.session.drain_events().as_slice(),
            [Event::UssdSendFailed { .. }]
        ));
        // A late answer is reported as network-initiated.
        t.session.feed(b"\r\n+CUSD: 0,\"late\",15\r\n").unwrap();
        assert!(matches!(
            t.session.poll_event(),
            Some(Event::UssdReceived { .. })
        ));
    }

    #[test]
    fn full_scheduler_fails_the_request() {
        let mut modem = ScriptedModem::new();
        modem.on(
            "AT+CUSD=1,\"*100#\",15",
            "\r\nOK\r\n\r\n+CUSD: 0,\"Balance: 5.00\",15\r\n",
        );
        let mut t = ready_with(modem);
        t.fill_scheduler();
        t.session.send_ussd("*100#").unwrap();
        t.pump();
        assert!(matches!(
            t.session.drain_events().as_slice(),
            [Event::UssdSendFailed { reason }] if reason.contains("scheduler full")
        ));
        assert_eq!(t.modem.count("AT+CUSD=1,\"*100#\",15"), 0);
        assert_eq!(t.session.state(), ProtocolState::Ready);
        assert_eq!(t.session.status().pending_requests, 0);

        t.free_scheduler();
        t.session.send_ussd("*100#").unwrap();
        t.pump();
        assert!(matches!(
            t.session.drain_events().as_slice(),
            [Event::UssdReceived { status: 0, .. }]
        ));
    }

    #[test]
    fn network_initiated_ussd() {
        let mut t = ready_with(ScriptedModem::new());
        t.session.feed(b"\r\n+CUSD: 1,\"Reply 1 to confirm\",15\r\n").unwrap();
        assert_eq!(
            t.session.poll_event(),
            Some(Event::UssdReceived {
                status: 1,
                text: "Reply 1 to confirm".into(),
                dcs: 15
            })
        );
    }

    #[test]
    fn invalid_strings_rejected() {
        let mut t = ready_with(ScriptedModem::new());
        assert!(matches!(t.session.send_ussd(""), Err(Error::InvalidParameter(_))));
        assert!(matches!(
            t.session.send_ussd("*100\"#"),
            Err(Error::InvalidParameter(_))
        ));
        assert!(t.session.send_ussd(&"1".repeat(183)).is_err());
    }
}
