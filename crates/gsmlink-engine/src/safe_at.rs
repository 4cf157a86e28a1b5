//! Administrative AT commands passed through from the operator console.
//!
//! Only commands that cannot disturb the engine's own view of the module
//! are accepted; anything touching call control, SMS format, echo or
//! result code settings, the SIM PIN or the module's power is refused.

use gsmlink_at::protocol::Response;
use gsmlink_core::command::AtCommand;
use gsmlink_core::error::{Error, Result};
use gsmlink_core::events::Event;
use tracing::info;

use crate::pending::{Request, RequestKind};
use crate::session::Session;
use crate::state::ProtocolState;

/// Command prefixes that would change state the engine relies on.
const REFUSED: &[&str] = &[
    "ATD", "ATA", "ATH", "ATZ", "ATE", "ATV", "ATQ", "ATO", "AT&F", "AT+CMGF", "AT+CMGS",
    "AT+CMGW", "AT+CMGD", "AT+CNMI", "AT+CSCS", "AT+CPIN", "AT+CFUN", "AT+CLIP", "AT+CCWA",
    "AT+CMEE", "AT+CHLD", "AT+CUSD", "AT+IPR", "AT+CPOWD",
];

/// Check a console command; returns it normalized.
fn validate(command: &str) -> Result<String> {
    let command = command.trim();
    let upper = command.to_ascii_uppercase();
    if !upper.starts_with("AT") || upper.len() < 3 {
        return Err(Error::InvalidParameter(format!(
            "not an AT command: {command:?}"
        )));
    }
    if command.chars().any(|c| c.is_control() || c == ';') {
        return Err(Error::InvalidParameter(
            "control characters and command chaining are not allowed".into(),
        ));
    }
    if let Some(prefix) = REFUSED.iter().find(|p| upper.starts_with(*p)) {
        return Err(Error::InvalidParameter(format!(
            "{prefix} is reserved by the engine"
        )));
    }
    Ok(command.to_string())
}

/// Information-response prefix of `command`, e.g. `+CSQ` for `AT+CSQ`.
fn response_prefix(command: &str) -> Option<&str> {
    let body = command.get(2..)?;
    if !body.starts_with(['+', '^', '#', '$']) {
        return None;
    }
    let end = body.find(['=', '?']).unwrap_or(body.len());
    Some(&body[..end])
}

impl Session {
    /// Run an administrative command while the span is ready.
    ///
    /// Every line the module answers with comes back in
    /// [`Event::SafeAtResponse`].
    pub fn send_safe_at(&mut self, command: &str) -> Result<()> {
        let span = self.span.clone();
        let _enter = span.enter();
        let command = validate(command)?;
        self.ensure_ready()?;
        self.submit_request(Request::SafeAt { command })
    }

    fn safe_at_command(&self) -> Option<&str> {
        match &self.pending.current(RequestKind::SafeAt)?.request {
            Request::SafeAt { command } => Some(command),
            _ => None,
        }
    }

    /// Whether `line` answers the running console command rather than
    /// being an unsolicited report with the same prefix.
    pub(crate) fn safe_at_owns(&self, line: &str) -> bool {
        let Some(prefix) = self.safe_at_command().and_then(response_prefix) else {
            return false;
        };
        match (line.get(..prefix.len()), line.get(prefix.len()..)) {
            (Some(head), Some(rest)) => {
                head.eq_ignore_ascii_case(prefix) && rest.trim_start().starts_with(':')
            }
            _ => false,
        }
    }

    pub(crate) fn start_safe_at(&mut self, command: &str) {
        info!(command, "console command");
        self.safe_at_lines.clear();
        self.set_state(ProtocolState::SafeAt);
        if let Err(e) = self.send_command(&AtCommand::Raw(command.to_string())) {
            self.safe_at_lines.push(e.to_string());
            self.safe_at_done(false);
        }
    }

    pub(crate) fn safe_at_response(&mut self, resp: &Response, line: &str) {
        if !resp.is_final() {
            self.safe_at_lines.push(line.to_string());
            return;
        }
        self.command_done();
        if resp.is_error() {
            self.safe_at_lines.push(line.to_string());
        }
        self.safe_at_done(*resp == Response::Ok);
    }

    pub(crate) fn safe_at_done(&mut self, ok: bool) {
        let command = self.safe_at_command().unwrap_or_default().to_string();
        let lines = std::mem::take(&mut self.safe_at_lines);
        self.emit(Event::SafeAtResponse { command, lines, ok });
        self.pending.finish(RequestKind::SafeAt);
        self.enter_ready();
    }
}
