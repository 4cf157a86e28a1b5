//! Voice call control on top of the ready state.

use std::collections::BTreeMap;

use gsmlink_at::protocol::{
    ClccStat, Response, is_dtmf_digit, parse_ccwa, parse_clcc, parse_dtmf,
};
use gsmlink_core::command::AtCommand;
use gsmlink_core::error::{Error, Result};
use gsmlink_core::events::Event;
use gsmlink_core::types::{CallRef, CallState, CallerId, Cause, DebugFlags};
use tracing::{info, warn};

use crate::calls::{Call, HangupAction};
use crate::session::{Session, Timer};
use crate::state::ProtocolState;

const MAX_NUMBER_LEN: usize = 40;

/// Calls with a command in flight, and waiting callers.
#[derive(Debug, Default)]
pub(crate) struct CallContext {
    pub dialing: Option<CallRef>,
    pub answering: Option<CallRef>,
    pub hanging_up: Option<CallRef>,
    /// Hangup to send as soon as the session is idle.
    pub deferred_hangup: Option<CallRef>,
    /// Callers announced by `+CCWA`, by slot.
    pub waiting: BTreeMap<u8, CallerId>,
}

impl CallContext {
    fn forget(&mut self, call: CallRef) {
        for slot in [
            &mut self.dialing,
            &mut self.answering,
            &mut self.hanging_up,
            &mut self.deferred_hangup,
        ] {
            if *slot == Some(call) {
                *slot = None;
            }
        }
    }

    fn free_slot(&self) -> u8 {
        (1..=u8::MAX)
            .find(|slot| !self.waiting.contains_key(slot))
            .unwrap_or(u8::MAX)
    }
}

fn dial_failure_cause(resp: &Response) -> Cause {
    match resp {
        Response::Busy => Cause::USER_BUSY,
        Response::NoAnswer => Cause::NO_ANSWER,
        Response::NoDialtone => Cause::NETWORK_OUT_OF_ORDER,
        Response::NoCarrier => Cause::NORMAL_UNSPECIFIED,
        _ => Cause::TEMPORARY_FAILURE,
    }
}

fn release_cause(resp: &Response) -> Cause {
    match resp {
        Response::Busy => Cause::USER_BUSY,
        Response::NoAnswer => Cause::NO_ANSWER,
        _ => Cause::NORMAL_CLEARING,
    }
}

fn unknown_caller() -> CallerId {
    CallerId {
        number: "unknown".to_string(),
        type_of_address: 129,
        name: None,
    }
}

impl Session {
    /// Place an outgoing voice call.
    pub fn dial(&mut self, number: &str) -> Result<CallRef> {
        let span = self.span.clone();
        let _enter = span.enter();
        self.ensure_ready()?;
        if number.is_empty()
            || number.len() > MAX_NUMBER_LEN
            || !number
                .chars()
                .all(|c| c.is_ascii_digit() || matches!(c, '+' | '*' | '#'))
        {
            return Err(Error::InvalidParameter(format!("bad number {number:?}")));
        }
        if self.calls.iter().any(|c| c.alive) {
            return Err(Error::Busy("a call is already in progress".into()));
        }
        if !self.is_idle() {
            return Err(Error::Busy(format!("session is in {}", self.state)));
        }

        let reference = self.calls.allocate()?;
        let call = self.calls.get_or_create(reference);
        call.setup(true);
        call.called_number = number.to_string();
        call.dial_in_progress = true;
        call.newcall = false;

        self.set_state(ProtocolState::Dialing);
        if let Err(e) = self.send_command(&AtCommand::Dial(number.to_string())) {
            self.calls.destroy(reference);
            self.set_state(ProtocolState::Ready);
            return Err(e);
        }
        self.call_ctx.dialing = Some(reference);
        info!(call = %reference, number, "dialing");
        Ok(reference)
    }

    /// Pick up a ringing incoming call.
    pub fn answer(&mut self, call: CallRef) -> Result<()> {
        let span = self.span.clone();
        let _enter = span.enter();
        self.ensure_ready()?;
        let offered = self
            .calls
            .get(call)
            .ok_or(Error::NoSuchCall(call))?
            .is_offered();
        if !offered {
            return Err(Error::InvalidParameter(format!("call {call} is not ringing")));
        }
        if !self.is_idle() {
            return Err(Error::Busy(format!("session is in {}", self.state)));
        }
        self.set_state(ProtocolState::Answering);
        if let Err(e) = self.send_command(&AtCommand::Answer) {
            self.set_state(ProtocolState::Ready);
            return Err(e);
        }
        if let Some(c) = self.calls.get_mut(call) {
            c.connect_request();
        }
        self.call_ctx.answering = Some(call);
        Ok(())
    }

    /// Release a call. Releasing an unknown or already released call is a
    /// no-op.
    pub fn hangup(&mut self, call: CallRef, cause: Cause) -> Result<()> {
        let span = self.span.clone();
        let _enter = span.enter();
        match self.calls.get_mut(call) {
            Some(c) => c.hangup_requested = true,
            None => {
                flagged!(self, DebugFlags::CALLS, call = %call, "hangup of unknown call ignored");
                return Ok(());
            }
        }
        self.begin_hangup(call, cause);
        Ok(())
    }

    /// Tell the engine an offered call may still receive digits.
    pub fn acknowledge(&mut self, call: CallRef) -> Result<()> {
        self.offered_call_mut(call)?.acknowledge();
        Ok(())
    }

    /// Accept an offered call for further processing.
    pub fn proceeding(&mut self, call: CallRef) -> Result<()> {
        self.offered_call_mut(call)?.proceeding();
        Ok(())
    }

    /// Mark an offered call as alerting.
    pub fn progress(&mut self, call: CallRef) -> Result<()> {
        self.offered_call_mut(call)?.progress();
        Ok(())
    }

    fn offered_call_mut(&mut self, call: CallRef) -> Result<&mut Call> {
        let c = self.calls.get_mut(call).ok_or(Error::NoSuchCall(call))?;
        if !c.is_offered() {
            return Err(Error::InvalidParameter(format!("call {call} is not offered")));
        }
        Ok(c)
    }

    /// Send one DTMF digit on an active call.
    pub fn send_dtmf(&mut self, call: CallRef, digit: char) -> Result<()> {
        let span = self.span.clone();
        let _enter = span.enter();
        self.ensure_ready()?;
        if !is_dtmf_digit(digit) {
            return Err(Error::InvalidParameter(format!("bad DTMF digit {digit:?}")));
        }
        let active = self
            .calls
            .get(call)
            .ok_or(Error::NoSuchCall(call))?
            .is_active();
        if !active {
            return Err(Error::InvalidParameter(format!("call {call} is not active")));
        }
        if !self.is_idle() {
            return Err(Error::Busy(format!("session is in {}", self.state)));
        }
        self.set_state(ProtocolState::DtmfSending);
        if let Err(e) = self.send_command(&AtCommand::Dtmf(digit)) {
            self.set_state(ProtocolState::Ready);
            return Err(e);
        }
        Ok(())
    }

    fn begin_hangup(&mut self, call: CallRef, cause: Cause) {
        let Some(c) = self.calls.get_mut(call) else {
            return;
        };
        match c.hangup(cause) {
            HangupAction::Disconnect => {
                if self.is_idle() {
                    self.send_hangup(call);
                } else {
                    self.call_ctx.deferred_hangup = Some(call);
                }
            }
            HangupAction::DestroyNow => self.release_call(call, None),
            HangupAction::Deferred => {
                info!(call = %call, "hangup waits for the dial result");
                self.call_ctx.deferred_hangup = Some(call);
            }
            HangupAction::AlreadyReleased => {
                flagged!(self, DebugFlags::CALLS, call = %call, "already released");
            }
        }
    }

    /// Send `ATH` for `call`. The session must be idle.
    pub(crate) fn send_hangup(&mut self, call: CallRef) {
        if self.calls.get(call).is_none() {
            self.kick();
            return;
        }
        self.sched
            .cancel_matching(|t| *t == Timer::CallStatusPoll(call));
        self.set_state(ProtocolState::HangingUp);
        let timeout = self.config.hangup_timeout;
        match self.send_command_with_timeout(&AtCommand::Hangup, timeout) {
            Ok(()) => self.call_ctx.hanging_up = Some(call),
            Err(e) => {
                warn!(call = %call, "cannot send hangup: {e}");
                self.release_call(call, None);
                self.enter_ready();
            }
        }
    }

    /// `ATH` completed or timed out.
    pub(crate) fn finish_hangup(&mut self) {
        if let Some(call) = self.call_ctx.hanging_up.take() {
            self.release_call(call, None);
        }
        self.enter_ready();
    }

    /// Destroy a call and report its end.
    ///
    /// `cause` is the network's release cause; `None` for a local release.
    fn release_call(&mut self, call: CallRef, cause: Option<Cause>) {
        self.sched
            .cancel_matching(|t| *t == Timer::CallStatusPoll(call));
        self.call_ctx.forget(call);
        let Some(mut c) = self.calls.destroy(call) else {
            return;
        };
        if let Some(cause) = cause {
            c.disconnect(cause);
        }
        c.release_complete();
        if c.hangup_requested {
            self.emit(Event::HangupAck { call });
        } else {
            self.emit(Event::Hangup {
                call,
                cause: c.cause,
            });
        }
    }

    pub(crate) fn call_response(&mut self, resp: &Response, line: &str) {
        if !resp.is_final() {
            flagged!(self, DebugFlags::AT, line, state = %self.state, "ignored");
            return;
        }
        self.command_done();
        match self.state {
            ProtocolState::Dialing => match resp {
                Response::Ok | Response::Connect => self.dial_accepted(),
                _ => self.dial_failed(dial_failure_cause(resp)),
            },
            ProtocolState::Answering => {
                let call = self.call_ctx.answering.take();
                match (resp, call) {
                    (Response::Ok | Response::Connect, Some(call)) => {
                        if let Some(c) = self.calls.get_mut(call) {
                            c.answer();
                            info!(call = %call, "call answered");
                        }
                    }
                    (Response::NoCarrier, Some(call)) => {
                        self.release_call(call, Some(Cause::NORMAL_CLEARING));
                    }
                    _ => warn!(line, "answer failed"),
                }
                self.enter_ready();
            }
            ProtocolState::HangingUp => self.finish_hangup(),
            ProtocolState::DtmfSending => {
                if resp.is_error() {
                    warn!(line, "DTMF not sent");
                }
                self.enter_ready();
            }
            _ => self.enter_ready(),
        }
    }

    fn dial_accepted(&mut self) {
        let Some(call) = self.call_ctx.dialing.take() else {
            self.enter_ready();
            return;
        };
        let hangup_waiting = self.call_ctx.deferred_hangup == Some(call);
        match self.calls.get_mut(call) {
            Some(c) => {
                c.dial_in_progress = false;
                if !hangup_waiting {
                    c.proceeding();
                }
            }
            None => {
                self.enter_ready();
                return;
            }
        }
        if hangup_waiting {
            self.call_ctx.deferred_hangup = None;
            if let Some(c) = self.calls.get_mut(call) {
                c.disconnect_request();
            }
            self.set_state(ProtocolState::Ready);
            self.send_hangup(call);
            return;
        }
        self.emit(Event::Proceeding { call });
        if self.arm_call_status_poll(call) {
            self.enter_ready();
        } else {
            self.set_state(ProtocolState::Ready);
            self.begin_hangup(call, Cause::TEMPORARY_FAILURE);
        }
    }

    /// Schedule the next `+CLCC` poll of an outgoing call.
    ///
    /// An unsupervised call could ring forever, so the caller hangs up
    /// when this fails.
    fn arm_call_status_poll(&mut self, call: CallRef) -> bool {
        let poll = self.config.call_status_poll;
        match self.schedule(poll, Timer::CallStatusPoll(call)) {
            Ok(_) => true,
            Err(e) => {
                warn!(call = %call, "cannot supervise call: {e}");
                false
            }
        }
    }

    pub(crate) fn dial_failed(&mut self, cause: Cause) {
        if let Some(call) = self.call_ctx.dialing.take() {
            warn!(call = %call, %cause, "dial failed");
            self.release_call(call, Some(cause));
        }
        self.enter_ready();
    }

    pub(crate) fn on_call_status_poll(&mut self, call: CallRef) {
        let limit = self.config.dial_retry_ticks;
        let Some(c) = self.calls.get_mut(call) else {
            return;
        };
        if !c.alive || c.is_active() || c.already_hungup {
            return;
        }
        c.dial_ticks += 1;
        if c.dial_ticks > limit {
            warn!(call = %call, "no answer; giving up");
            self.begin_hangup(call, Cause::NO_ANSWER);
            return;
        }
        if self.is_idle() {
            self.set_state(ProtocolState::CallStatusQuery);
            if let Err(e) = self.send_command(&AtCommand::CallStatus) {
                warn!("cannot poll call status: {e}");
                self.set_state(ProtocolState::Ready);
            }
        }
        if !self.arm_call_status_poll(call) {
            self.begin_hangup(call, Cause::TEMPORARY_FAILURE);
        }
    }

    pub(crate) fn on_clcc(&mut self, line: &str) {
        let Some(entry) = parse_clcc(line) else {
            return;
        };
        if !entry.voice || !entry.outgoing {
            return;
        }
        match entry.stat {
            ClccStat::Alerting => self.on_far_end_alerting(),
            ClccStat::Active => self.on_far_end_answered(),
            _ => {}
        }
    }

    pub(crate) fn on_far_end_alerting(&mut self) {
        let Some(call) = self.calls.outgoing_pending() else {
            return;
        };
        let Some(c) = self.calls.get_mut(call) else {
            return;
        };
        if c.our_state != CallState::CallDelivered {
            c.progress();
            self.emit(Event::Ringing { call });
        }
    }

    pub(crate) fn on_far_end_answered(&mut self) {
        let Some(call) = self.calls.outgoing_pending() else {
            return;
        };
        if let Some(c) = self.calls.get_mut(call) {
            c.answer();
        }
        self.sched
            .cancel_matching(|t| *t == Timer::CallStatusPoll(call));
        self.emit(Event::Answer { call });
    }

    pub(crate) fn on_ring(&mut self) {
        let call = match self.calls.offered() {
            Some(call) => call,
            None => {
                if self.calls.iter().any(|c| c.alive) {
                    flagged!(self, DebugFlags::CALLS, "RING during a call ignored");
                    return;
                }
                let call = match self.calls.allocate() {
                    Ok(call) => call,
                    Err(e) => {
                        warn!("incoming call ignored: {e}");
                        return;
                    }
                };
                self.calls.get_or_create(call).setup(false);
                info!(call = %call, "incoming call");
                call
            }
        };
        let Some(c) = self.calls.get_mut(call) else {
            return;
        };
        c.ring_count += 1;
        // Without caller id the second ring announces the call.
        if c.ring_count >= 2 && !c.ring_emitted {
            c.ring_emitted = true;
            c.newcall = false;
            let caller = c.caller.clone().unwrap_or_else(unknown_caller);
            self.emit(Event::Ring { call, caller });
        }
    }

    pub(crate) fn on_clip(&mut self, line: &str) {
        let Some(caller) = self.vendor.decode_caller_id(line) else {
            warn!(line, "unreadable caller id");
            return;
        };
        let Some(call) = self.calls.offered() else {
            flagged!(self, DebugFlags::CALLS, line, "caller id without a ringing call");
            return;
        };
        let Some(c) = self.calls.get_mut(call) else {
            return;
        };
        c.caller = Some(caller.clone());
        if !c.ring_emitted {
            c.ring_emitted = true;
            c.newcall = false;
            self.emit(Event::Ring { call, caller });
        }
    }

    /// The network or the far end ended a call.
    pub(crate) fn on_remote_release(&mut self, resp: &Response) {
        let target = self
            .calls
            .active()
            .or_else(|| self.calls.offered())
            .or_else(|| self.calls.latest_alive());
        match target {
            Some(call) => self.release_call(call, Some(release_cause(resp))),
            None => flagged!(self, DebugFlags::CALLS, ?resp, "release without a call"),
        }
    }

    pub(crate) fn on_call_waiting(&mut self, line: &str) {
        let Some(caller) = parse_ccwa(line) else {
            return;
        };
        let Some(active) = self.calls.active() else {
            flagged!(self, DebugFlags::CALLS, line, "call waiting without an active call");
            return;
        };
        // The network repeats the indication while the caller waits.
        if self
            .call_ctx
            .waiting
            .values()
            .any(|c| c.number == caller.number)
        {
            return;
        }
        let slot = self.call_ctx.free_slot();
        let expiry = self.config.call_waiting_timeout;
        // Without an expiry the slot would never be freed; the network
        // repeats the indication, so it is picked up once there is room.
        if let Err(e) = self.schedule(expiry, Timer::CallWaitingExpiry(slot)) {
            warn!(number = %caller.number, "call waiting ignored: {e}");
            return;
        }
        self.call_ctx.waiting.insert(slot, caller.clone());
        if let Some(c) = self.calls.get_mut(active) {
            c.cw_slot = Some(slot);
        }
        self.emit(Event::CallWaiting { caller, slot });
    }

    pub(crate) fn on_call_waiting_expiry(&mut self, slot: u8) {
        if self.call_ctx.waiting.remove(&slot).is_none() {
            return;
        }
        flagged!(self, DebugFlags::CALLS, slot, "call waiting slot expired");
        let holders: Vec<CallRef> = self
            .calls
            .iter()
            .filter(|c| c.cw_slot == Some(slot))
            .map(|c| c.reference)
            .collect();
        for call in holders {
            if let Some(c) = self.calls.get_mut(call) {
                c.cw_slot = None;
            }
        }
    }

    pub(crate) fn on_dtmf(&mut self, line: &str) {
        let Some(digit) = parse_dtmf(line) else {
            return;
        };
        match self.calls.active().or_else(|| self.calls.latest_alive()) {
            Some(call) => self.emit(Event::KeypadDigit { call, digit }),
            None => flagged!(self, DebugFlags::CALLS, line, "DTMF without a call"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use gsmlink_core::error::Error;
    use gsmlink_core::events::Event;
    use gsmlink_core::types::{CallRef, CallState, Cause};
    use gsmlink_test_harness::ScriptedModem;

    use crate::config::EngineConfig;
    use crate::session::test_support::TestSession;
    use crate::state::ProtocolState;

    fn ready() -> TestSession {
        let mut t = TestSession::new();
        t.bring_up();
        t.session.drain_events();
        t
    }

    #[test]
    fn dial_without_scheduler_room_is_refused() {
        let mut t = ready();
        t.fill_scheduler();
        assert!(matches!(
            t.session.dial("5551234"),
            Err(Error::SchedulerFull { .. })
        ));
        t.pump();
        assert!(!t.modem.received().iter().any(|l| l.starts_with("ATD")));
        assert_eq!(t.session.state(), ProtocolState::Ready);
        assert!(t.session.drain_events().is_empty());

        t.free_scheduler();
        assert!(t.session.dial("5551234").is_ok());
    }

    #[test]
    fn ring_then_clip_emits_one_ring() {
        let mut t = ready();
        t.session.feed(b"\r\nRING\r\n").unwrap();
        assert_eq!(t.session.poll_event(), None);
        t.session.feed(b"\r\n+CLIP: \"12345\",129,,,\r\n").unwrap();
        t.session.feed(b"\r\nRING\r\n").unwrap();

        let events = t.session.drain_events();
        assert_eq!(events.len(), 1);
        match &events[0] {
            Event::Ring { caller, .. } => assert_eq!(caller.number, "12345"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn ring_without_caller_id_announces_on_second_ring() {
        let mut t = ready();
        t.session.feed(b"\r\nRING\r\n\r\nRING\r\n\r\nRING\r\n").unwrap();
        let events = t.session.drain_events();
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], Event::Ring { caller, .. } if caller.number == "unknown"));
    }

    #[test]
    fn incoming_call_answered_and_released_by_caller() {
        let mut t = ready();
        t.session.feed(b"\r\nRING\r\n\r\n+CLIP: \"777\",129\r\n").unwrap();
        let call = match t.session.poll_event() {
            Some(Event::Ring { call, .. }) => call,
            other => panic!("unexpected {other:?}"),
        };
        t.session.answer(call).unwrap();
        assert_eq!(t.session.state(), ProtocolState::Answering);
        t.pump();
        assert_eq!(t.session.state(), ProtocolState::Ready);
        assert!(t.session.call(call).unwrap().is_active());

        t.session.feed(b"\r\nNO CARRIER\r\n").unwrap();
        assert_eq!(
            t.session.poll_event(),
            Some(Event::Hangup {
                call,
                cause: Cause::NORMAL_CLEARING
            })
        );
        assert!(t.session.call(call).is_none());
    }

    #[test]
    fn outgoing_call_progresses_through_status_polls() {
        let mut t = ready();
        let call = t.session.dial("100").unwrap();
        assert_eq!(t.session.last_sent(), Some("ATD100;"));
        t.pump();
        assert_eq!(t.session.poll_event(), Some(Event::Proceeding { call }));

        t.modem
            .on("AT+CLCC", "\r\n+CLCC: 1,0,3,0,0,\"100\",129\r\n\r\nOK\r\n");
        t.advance(Duration::from_millis(500));
        assert_eq!(t.session.poll_event(), Some(Event::Ringing { call }));
        t.advance(Duration::from_millis(500));
        assert_eq!(t.session.poll_event(), None);

        t.modem
            .on("AT+CLCC", "\r\n+CLCC: 1,0,0,0,0,\"100\",129\r\n\r\nOK\r\n");
        t.advance(Duration::from_millis(500));
        assert_eq!(t.session.poll_event(), Some(Event::Answer { call }));
        let polls = t.modem.count("AT+CLCC");
        t.advance(Duration::from_secs(2));
        assert_eq!(t.modem.count("AT+CLCC"), polls);

        t.session.hangup(call, Cause::NORMAL_CLEARING).unwrap();
        assert_eq!(t.session.last_sent(), Some("ATH"));
        t.pump();
        assert_eq!(t.session.poll_event(), Some(Event::HangupAck { call }));
        assert_eq!(t.session.state(), ProtocolState::Ready);
    }

    #[test]
    fn mo_urcs_drive_an_outgoing_call() {
        let mut t = ready();
        let call = t.session.dial("+441234").unwrap();
        t.pump();
        t.session.drain_events();
        t.session.feed(b"\r\nMO RING\r\n\r\nMO CONNECTED\r\n").unwrap();
        assert_eq!(
            t.session.drain_events(),
            vec![Event::Ringing { call }, Event::Answer { call }]
        );
        assert_eq!(t.session.call(call).unwrap().our_state, CallState::Active);
    }

    #[test]
    fn busy_dial_reports_hangup_with_cause() {
        let mut modem = ScriptedModem::new();
        modem.on("ATD200;", "\r\nBUSY\r\n");
        let mut t = TestSession::with_modem(modem, EngineConfig::default());
        t.bring_up();
        t.session.drain_events();

        let call = t.session.dial("200").unwrap();
        t.pump();
        assert_eq!(
            t.session.poll_event(),
            Some(Event::Hangup {
                call,
                cause: Cause::USER_BUSY
            })
        );
        assert!(t.session.call(call).is_none());
        assert_eq!(t.session.state(), ProtocolState::Ready);
    }

    #[test]
    fn unanswered_dial_is_given_up() {
        let cfg = EngineConfig {
            dial_retry_ticks: 2,
            ..EngineConfig::default()
        };
        let mut t = TestSession::with_modem(ScriptedModem::new(), cfg);
        t.bring_up();
        t.session.drain_events();
        let call = t.session.dial("300").unwrap();
        t.pump();
        t.session.drain_events();

        for _ in 0..3 {
            t.advance(Duration::from_millis(500));
        }
        assert_eq!(t.modem.count("ATH"), 1);
        assert_eq!(
            t.session.drain_events(),
            vec![Event::Hangup {
                call,
                cause: Cause::NO_ANSWER
            }]
        );
    }

    #[test]
    fn hangup_while_dialing_waits_for_dial_result() {
        let mut modem = ScriptedModem::new();
        modem.silence("ATD400;");
        let mut t = TestSession::with_modem(modem, EngineConfig::default());
        t.bring_up();
        t.session.drain_events();
        let call = t.session.dial("400").unwrap();
        t.pump();

        t.session.hangup(call, Cause::NORMAL_CLEARING).unwrap();
        assert_eq!(t.modem.count("ATH"), 0);
        // Second request is a no-op.
        t.session.hangup(call, Cause::NORMAL_CLEARING).unwrap();

        t.session.feed(b"\r\nOK\r\n").unwrap();
        assert_eq!(t.session.last_sent(), Some("ATH"));
        t.pump();
        assert_eq!(t.session.drain_events(), vec![Event::HangupAck { call }]);
    }

    #[test]
    fn hangup_of_unknown_call_is_a_noop() {
        let mut t = ready();
        t.session
            .hangup(CallRef::new(42), Cause::NORMAL_CLEARING)
            .unwrap();
        assert!(t.session.take_outbound().is_empty());
        assert_eq!(t.session.poll_event(), None);
    }

    #[test]
    fn dial_rejects_bad_input_and_busy_sessions() {
        let mut t = TestSession::new();
        assert!(matches!(t.session.dial("100"), Err(Error::NotReady)));
        t.bring_up();
        assert!(matches!(
            t.session.dial("12ab"),
            Err(Error::InvalidParameter(_))
        ));
        t.session.dial("100").unwrap();
        assert!(matches!(t.session.dial("101"), Err(Error::Busy(_))));
    }

    #[test]
    fn call_waiting_and_dtmf_on_active_call() {
        let mut t = ready();
        let call = t.session.dial("500").unwrap();
        t.pump();
        t.session.feed(b"\r\nMO CONNECTED\r\n").unwrap();
        t.session.drain_events();

        t.session
            .feed(b"\r\n+CCWA: \"600\",129,1\r\n\r\n+CCWA: \"600\",129,1\r\n")
            .unwrap();
        let events = t.session.drain_events();
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], Event::CallWaiting { caller, slot: 1 } if caller.number == "600"));
        assert_eq!(t.session.call(call).unwrap().cw_slot, Some(1));
        t.advance(Duration::from_secs(20));
        assert_eq!(t.session.call(call).unwrap().cw_slot, None);

        t.session.feed(b"\r\n+DTMF: 5\r\n").unwrap();
        assert_eq!(
            t.session.poll_event(),
            Some(Event::KeypadDigit { call, digit: '5' })
        );
        assert!(t.session.send_dtmf(call, 'x').is_err());
        t.session.send_dtmf(call, '9').unwrap();
        assert_eq!(t.session.last_sent(), Some("AT+VTS=9"));
        t.pump();
        assert_eq!(t.session.state(), ProtocolState::Ready);
    }

    #[test]
    fn offered_call_transitions() {
        let mut t = ready();
        t.session.feed(b"\r\nRING\r\n").unwrap();
        let call = t.session.calls().next().unwrap().reference;
        t.session.acknowledge(call).unwrap();
        t.session.proceeding(call).unwrap();
        t.session.progress(call).unwrap();
        assert_eq!(
            t.session.call(call).unwrap().our_state,
            CallState::CallReceived
        );
        assert!(matches!(
            t.session.progress(CallRef::new(9)),
            Err(Error::NoSuchCall(_))
        ));
    }
}
