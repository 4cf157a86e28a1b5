//! Available-operator scan (`AT+COPS=?`).

use gsmlink_at::protocol::{Response, parse_cops_list};
use gsmlink_core::command::AtCommand;
use gsmlink_core::error::Result;
use gsmlink_core::events::Event;
use gsmlink_core::types::DebugFlags;
use tracing::{info, warn};

use crate::pending::{Request, RequestKind};
use crate::session::Session;
use crate::state::ProtocolState;

impl Session {
    /// Scan for available operators.
    ///
    /// Scans take long; the answer arrives as [`Event::OperatorList`] or
    /// [`Event::OperatorListFailed`].
    pub fn query_operators(&mut self) -> Result<()> {
        let span = self.span.clone();
        let _enter = span.enter();
        self.submit_request(Request::OperatorList)
    }

    /// Name of the registered operator, read during bring-up.
    pub fn operator_name(&self) -> Option<&str> {
        self.operator_name.as_deref()
    }

    pub(crate) fn start_operator_query(&mut self) {
        info!("scanning operators");
        self.operators.clear();
        self.set_state(ProtocolState::OperatorQuery);
        let timeout = self.config.operator_timeout;
        if let Err(e) = self.send_command_with_timeout(&AtCommand::OperatorList, timeout) {
            self.operator_list_failed(&e.to_string());
        }
    }

    pub(crate) fn operator_response(&mut self, resp: &Response, line: &str) {
        match resp {
            Response::Info { prefix, .. } if prefix == "+COPS" => match parse_cops_list(line) {
                Some(found) => self.operators.extend(found),
                None => warn!(line, "unparsable operator list"),
            },
            Response::Ok => {
                self.command_done();
                let operators = std::mem::take(&mut self.operators);
                info!(count = operators.len(), "operator scan complete");
                self.emit(Event::OperatorList { operators });
                self.pending.finish(RequestKind::OperatorList);
                self.enter_ready();
            }
            r if r.is_final() => {
                self.command_done();
                self.operator_list_failed(line);
            }
            _ => flagged!(self, DebugFlags::AT, line, "ignored during operator scan"),
        }
    }

    pub(crate) fn operator_list_failed(&mut self, reason: &str) {
        self.operators.clear();
        if self.state == ProtocolState::OperatorQuery {
            self.set_state(ProtocolState::Ready);
        }
        self.fail_pending(RequestKind::OperatorList, reason);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use gsmlink_core::events::Event;
    use gsmlink_core::types::OperatorStatus;
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
    fn scan_reports_operators() {
        let mut modem = ScriptedModem::new();
        modem.on(
            "AT+COPS=?",
            "\r\n+COPS: (2,\"vodafone UK\",\"voda UK\",\"23415\"),(1,\"O2 - UK\",\"O2 - UK\",\"23410\"),,(0-4),(0-2)\r\n\r\nOK\r\n",
        );
        let mut t = ready_with(modem);
        assert_eq!(t.session.operator_name(), Some("vodafone UK"));
        t.session.query_operators().unwrap();
        t.pump();
        match t.session.drain_events().as_slice() {
            [Event::OperatorList { operators }] => {
                assert_eq!(operators.len(), 2);
                assert_eq!(operators[0].status, OperatorStatus::Current);
                assert_eq!(operators[1].numeric, "23410");
            }
            other => panic!("unexpected events {other:?}"),
        }
        assert_eq!(t.session.state(), ProtocolState::Ready);
    }

    #[test]
    fn scan_uses_its_own_timeout() {
        let mut modem = ScriptedModem::new();
        modem.silence("AT+COPS=?");
        let mut t = ready_with(modem);
        t.session.query_operators().unwrap();
        t.pump();
        // Well past the ordinary command timeout.
        t.advance(Duration::from_secs(10));
        assert_eq!(t.session.state(), ProtocolState::OperatorQuery);
        t.advance(Duration::from_secs(120));
        assert!(t.session.drain_events().iter().any(|e| matches!(
            e,
            Event::OperatorListFailed { .. }
        )));
        assert!(!matches!(t.session.state(), ProtocolState::OperatorQuery));
    }

    #[test]
    fn scan_error() {
        let mut modem = ScriptedModem::new();
        modem.on("AT+COPS=?", "\r\n+CME ERROR: 30\r\n");
        let mut t = ready_with(modem);
        t.session.query_operators().unwrap();
        t.pump();
        assert!(matches!(
            t.session.drain_events().as_slice(),
            [Event::OperatorListFailed { reason }] if reason.contains("30")
        ));
    }
}
