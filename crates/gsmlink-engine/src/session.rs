//! The per-span protocol session.
//!
//! This module holds the [`Session`] state, the entry points that feed it
//! (bytes, lines, timer ticks, transport failures) and the plumbing every
//! flow shares: command sending with response timeouts, event emission,
//! the pending-request dispatcher and bring-up restarts. The flows
//! themselves live in sibling modules as further `impl Session` blocks.

use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use gsmlink_at::framer::{LineFramer, Unit};
use gsmlink_at::protocol::{Response, classify, parse_cpin};
use gsmlink_at::transmitter::{CommandTransmitter, Outbound};
use gsmlink_core::collab::{DeliveryLog, PowerProbe, TextCodec};
use gsmlink_core::command::{AtCommand, VendorProfile};
use gsmlink_core::error::{Error, Result};
use gsmlink_core::events::Event;
use gsmlink_core::types::{
    CallRef, CallState, Cause, Coverage, DebugFlags, DeviceIdentity, Operator,
    RegistrationStatus, SimState, SmsMode,
};
use tracing::{error, info, info_span, warn};

use crate::call_flow::CallContext;
use crate::calls::{Call, CallRegistry};
use crate::clock::Clock;
use crate::config::{EngineConfig, TimerKind};
use crate::pending::{PendingStore, Placement, Request, RequestKind};
use crate::scheduler::{Scheduler, TaskId};
use crate::sms::SmsContext;
use crate::state::ProtocolState;
use crate::ussd::UssdContext;

/// Work the session has scheduled for later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Timer {
    StartBringUp,
    Watchdog,
    /// Response timeout of the command with this sequence number.
    CommandTimeout(u64),
    /// Re-send the command of a bring-up stage that is not there yet.
    StageRetry(ProtocolState),
    CallStatusPoll(CallRef),
    CallWaitingExpiry(u8),
    SmsStuck,
    UssdTimeout,
    PendingRetry(RequestKind),
    SignalPoll,
}

/// Everything a session is built from.
pub(crate) struct SessionParts {
    pub span_id: u32,
    pub vendor: Box<dyn VendorProfile>,
    pub config: EngineConfig,
    pub clock: Box<dyn Clock>,
    pub codec: Box<dyn TextCodec>,
    pub delivery_log: Box<dyn DeliveryLog>,
    pub power: Box<dyn PowerProbe>,
    pub debug: DebugFlags,
}

/// Protocol engine state for one modem.
///
/// Create one with [`SessionBuilder`](crate::SessionBuilder). All methods
/// run to completion without blocking; the embedder serializes calls.
pub struct Session {
    pub(crate) span_id: u32,
    pub(crate) vendor: Box<dyn VendorProfile>,
    pub(crate) config: EngineConfig,
    pub(crate) clock: Box<dyn Clock>,
    pub(crate) codec: Box<dyn TextCodec>,
    pub(crate) delivery_log: Box<dyn DeliveryLog>,
    pub(crate) power: Box<dyn PowerProbe>,
    pub(crate) span: tracing::Span,
    pub(crate) debug: DebugFlags,

    pub(crate) state: ProtocolState,
    pub(crate) sim: SimState,
    pub(crate) registration: RegistrationStatus,
    pub(crate) coverage: Option<Coverage>,
    pub(crate) no_signal: bool,
    pub(crate) identity: DeviceIdentity,
    pub(crate) operator_name: Option<String>,
    pub(crate) smsc: Option<String>,
    /// Format the modem is currently configured for.
    pub(crate) sms_mode: SmsMode,
    pub(crate) last_received: Option<String>,

    pub(crate) framer: LineFramer,
    pub(crate) tx: CommandTransmitter,
    pub(crate) sched: Scheduler<Timer>,
    pub(crate) calls: CallRegistry,
    pub(crate) pending: PendingStore,
    pub(crate) events: VecDeque<Event>,

    pub(crate) command_seq: u64,
    pub(crate) command_timer: Option<TaskId>,
    pub(crate) watchdog: Option<TaskId>,
    pub(crate) stage_retries: u32,
    pub(crate) registration_polls: u32,
    pub(crate) firmware_errors: u32,
    pub(crate) restart_attempts: u32,
    pub(crate) health_failures: u32,

    pub(crate) call_ctx: CallContext,
    pub(crate) sms: SmsContext,
    pub(crate) ussd: UssdContext,
    pub(crate) operators: Vec<Operator>,
    pub(crate) safe_at_lines: Vec<String>,
}

impl Session {
    pub(crate) fn from_parts(parts: SessionParts) -> Session {
        let span = info_span!("gsm_span", span = parts.span_id, vendor = parts.vendor.name());
        let cfg = &parts.config;
        let framer = LineFramer::with_capacity(cfg.framer_capacity);
        let tx = CommandTransmitter::new(cfg.outbox_capacity, cfg.settle_delay, cfg.sms_chunk_delay);
        let sched = Scheduler::new(cfg.scheduler_capacity);
        let pending = PendingStore::new(cfg.pending_queue_limit);
        Session {
            span_id: parts.span_id,
            vendor: parts.vendor,
            clock: parts.clock,
            codec: parts.codec,
            delivery_log: parts.delivery_log,
            power: parts.power,
            span,
            debug: parts.debug,
            state: ProtocolState::Down,
            sim: SimState::Unknown,
            registration: RegistrationStatus::NotRegistered,
            coverage: None,
            no_signal: false,
            identity: DeviceIdentity::default(),
            operator_name: None,
            smsc: None,
            sms_mode: SmsMode::Pdu,
            last_received: None,
            framer,
            tx,
            sched,
            calls: CallRegistry::new(),
            pending,
            events: VecDeque::new(),
            command_seq: 0,
            command_timer: None,
            watchdog: None,
            stage_retries: 0,
            registration_polls: 0,
            firmware_errors: 0,
            restart_attempts: 0,
            health_failures: 0,
            call_ctx: CallContext::default(),
            sms: SmsContext::new(rand::random::<u8>()),
            ussd: UssdContext::default(),
            operators: Vec::new(),
            safe_at_lines: Vec::new(),
            config: parts.config,
        }
    }

    // -----------------------------------------------------------------
    // Entry points
    // -----------------------------------------------------------------

    /// Begin bring-up.
    pub fn start(&mut self) {
        let span = self.span.clone();
        let _enter = span.enter();
        self.sched.cancel_matching(|t| *t == Timer::StartBringUp);
        self.start_bringup();
    }

    /// Hand the session bytes read from the modem.
    ///
    /// Every complete line and prompt is processed before this returns.
    /// If the bytes do not fit in the framing buffer, the buffer is
    /// discarded and [`Error::BufferOverflow`] is returned.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<()> {
        let span = self.span.clone();
        let _enter = span.enter();
        let text = String::from_utf8_lossy(bytes);
        flagged!(self, DebugFlags::RAW, len = bytes.len(), data = %text.escape_debug(), "<- raw");
        if let Err(e) = self.framer.feed(bytes) {
            warn!("{e}; discarding buffered input");
            self.framer.clear();
            return Err(e);
        }
        while let Some(unit) = self.framer.next_unit() {
            match unit {
                Unit::Line(line) => self.handle_line(&line),
                Unit::Prompt => self.handle_prompt(),
                Unit::Partial(_) => break,
            }
        }
        Ok(())
    }

    /// Process one already framed line and return the oldest queued event.
    pub fn on_response(&mut self, line: &str) -> Option<Event> {
        let span = self.span.clone();
        let _enter = span.enter();
        let line = line.trim_matches(|c| c == '\r' || c == '\n');
        if matches!(line, ">" | "> " | ">  ") {
            self.handle_prompt();
        } else if !line.trim().is_empty() {
            self.handle_line(line.trim_start());
        }
        self.events.pop_front()
    }

    /// Run every timer that is due.
    ///
    /// Returns the number of timers fired.
    pub fn poll(&mut self) -> usize {
        let span = self.span.clone();
        let _enter = span.enter();
        let now = self.now();
        let horizon = self.sched.horizon();
        let mut fired = 0;
        while let Some((id, timer)) = self.sched.pop_due_before(now, horizon) {
            flagged!(self, DebugFlags::SCHED, task = %id, ?timer, "timer fired");
            self.on_timer(id, timer);
            fired += 1;
        }
        fired
    }

    /// Report a failed read or write on the link.
    pub fn on_transport_error(&mut self, err: &Error) {
        let span = self.span.clone();
        let _enter = span.enter();
        error!(state = %self.state, "transport error: {err}");
        // Bring-up is covered by its own retries and watchdog.
        if self.state.is_ready() && self.tx.is_awaiting() {
            self.disarm_command_timer();
            self.on_command_timeout();
        }
    }

    /// Next queued event.
    pub fn poll_event(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    /// Every queued event.
    pub fn drain_events(&mut self) -> Vec<Event> {
        self.events.drain(..).collect()
    }

    /// When [`poll`](Self::poll) next has work.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.sched.next_deadline()
    }

    /// Frames waiting to be written, in order.
    pub fn take_outbound(&mut self) -> Vec<Outbound> {
        self.tx.take_outbound()
    }

    pub fn pop_outbound(&mut self) -> Option<Outbound> {
        self.tx.pop_outbound()
    }

    // -----------------------------------------------------------------
    // Control and inspection
    // -----------------------------------------------------------------

    /// Restart bring-up from the first stage.
    pub fn restart(&mut self) {
        let span = self.span.clone();
        let _enter = span.enter();
        self.restart_attempts = 0;
        self.restart_bringup("restart requested", Some(Duration::ZERO));
    }

    /// Reset the module, then restart bring-up once it had time to reboot.
    pub fn reset(&mut self) -> Result<()> {
        let span = self.span.clone();
        let _enter = span.enter();
        let line = self
            .vendor
            .command(&AtCommand::ModuleReset)
            .ok_or_else(|| Error::Unsupported(AtCommand::ModuleReset.name().into()))?;
        self.restart_attempts = 0;
        let delay = self.config.fast_rearm_interval;
        self.restart_bringup("reset requested", Some(delay));
        self.tx.send(&line)?;
        // Nothing will answer this; the module reboots.
        self.tx.complete();
        Ok(())
    }

    pub fn set_debug(&mut self, flags: DebugFlags) {
        self.debug = flags;
    }

    pub fn debug_flags(&self) -> DebugFlags {
        self.debug
    }

    pub fn get_timer(&self, kind: TimerKind) -> Duration {
        self.config.timer(kind)
    }

    /// Change a timer. Already armed timers keep their deadline.
    pub fn set_timer(&mut self, kind: TimerKind, value: Duration) {
        self.config.set_timer(kind, value);
        match kind {
            TimerKind::Settle => self.tx.set_settle(value),
            TimerKind::SmsChunkDelay => self.tx.set_chunk_delay(value),
            _ => {}
        }
    }

    pub fn state(&self) -> ProtocolState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state.is_ready()
    }

    pub fn span_id(&self) -> u32 {
        self.span_id
    }

    pub fn vendor(&self) -> &dyn VendorProfile {
        self.vendor.as_ref()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn sim_state(&self) -> SimState {
        self.sim
    }

    pub fn registration(&self) -> RegistrationStatus {
        self.registration
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn last_sent(&self) -> Option<&str> {
        self.tx.last_sent()
    }

    pub fn last_received(&self) -> Option<&str> {
        self.last_received.as_deref()
    }

    pub fn call(&self, reference: CallRef) -> Option<&Call> {
        self.calls.get(reference)
    }

    pub fn calls(&self) -> impl Iterator<Item = &Call> {
        self.calls.iter()
    }

    /// Snapshot for status displays.
    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            span: self.span_id,
            vendor: self.vendor.name().to_string(),
            state: self.state,
            sim: self.sim,
            registration: self.registration,
            coverage: self.coverage,
            identity: self.identity.clone(),
            operator: self.operator_name.clone(),
            smsc: self.smsc.clone(),
            sms_mode: self.sms_mode,
            calls: self
                .calls
                .iter()
                .map(|c| CallSummary {
                    reference: c.reference,
                    our_state: c.our_state,
                    peer_state: c.peer_state,
                    outgoing: c.outgoing,
                    number: if c.outgoing {
                        c.called_number.clone()
                    } else {
                        c.caller.as_ref().map(|id| id.number.clone()).unwrap_or_default()
                    },
                })
                .collect(),
            restart_attempts: self.restart_attempts,
            pending_requests: RequestKind::ALL
                .into_iter()
                .map(|k| self.pending.len(k))
                .sum(),
        }
    }

    // -----------------------------------------------------------------
    // Shared plumbing
    // -----------------------------------------------------------------

    pub(crate) fn now(&self) -> Instant {
        self.clock.now()
    }

    /// Idle in the ready state: a new command may be sent.
    pub(crate) fn is_idle(&self) -> bool {
        self.state == ProtocolState::Ready && !self.tx.is_awaiting()
    }

    pub(crate) fn ensure_ready(&self) -> Result<()> {
        if self.state.is_ready() {
            Ok(())
        } else {
            Err(Error::NotReady)
        }
    }

    pub(crate) fn set_state(&mut self, next: ProtocolState) {
        if self.state != next {
            flagged!(self, DebugFlags::STATE, from = %self.state, to = %next, "state");
            self.state = next;
        }
    }

    pub(crate) fn emit(&mut self, event: Event) {
        info!(event = event.name(), "{event:?}");
        self.events.push_back(event);
    }

    /// Schedule a timer.
    ///
    /// A full table is returned to the caller, which fails whatever the
    /// timer was guarding.
    pub(crate) fn schedule(&mut self, after: Duration, timer: Timer) -> Result<TaskId> {
        let now = self.now();
        match self.sched.schedule(now, after, timer) {
            Ok(id) => {
                flagged!(self, DebugFlags::SCHED, task = %id, ?timer, ?after, "scheduled");
                Ok(id)
            }
            Err(e) => {
                error!(?timer, "{e}");
                Err(e)
            }
        }
    }

    pub(crate) fn send_command(&mut self, cmd: &AtCommand) -> Result<()> {
        let timeout = self.config.command_timeout;
        self.send_command_with_timeout(cmd, timeout)
    }

    pub(crate) fn send_command_with_timeout(
        &mut self,
        cmd: &AtCommand,
        timeout: Duration,
    ) -> Result<()> {
        let line = self
            .vendor
            .command(cmd)
            .ok_or_else(|| Error::Unsupported(cmd.name().to_string()))?;
        self.send_line(&line, timeout)
    }

    /// Send a command line and arm its response timeout.
    ///
    /// Nothing is written when the timeout cannot be armed.
    pub(crate) fn send_line(&mut self, line: &str, timeout: Duration) -> Result<()> {
        self.arm_command_timer(timeout)?;
        if let Err(e) = self.tx.send(line) {
            self.disarm_command_timer();
            return Err(e);
        }
        flagged!(self, DebugFlags::AT, line, "-> ");
        Ok(())
    }

    pub(crate) fn arm_command_timer(&mut self, timeout: Duration) -> Result<()> {
        self.disarm_command_timer();
        self.command_seq += 1;
        let seq = self.command_seq;
        self.command_timer = Some(self.schedule(timeout, Timer::CommandTimeout(seq))?);
        Ok(())
    }

    pub(crate) fn disarm_command_timer(&mut self) {
        if let Some(id) = self.command_timer.take() {
            self.sched.cancel(id);
        }
    }

    /// The outstanding command got its final result.
    pub(crate) fn command_done(&mut self) {
        self.tx.complete();
        self.disarm_command_timer();
    }

    /// Back to idle ready; start whatever is waiting.
    pub(crate) fn enter_ready(&mut self) {
        self.set_state(ProtocolState::Ready);
        self.kick();
    }

    // -----------------------------------------------------------------
    // Line dispatch
    // -----------------------------------------------------------------

    pub(crate) fn handle_line(&mut self, line: &str) {
        flagged!(self, DebugFlags::AT, line, "<- ");
        self.last_received = Some(line.to_string());

        if self.take_sms_body(line) {
            return;
        }
        if self.tx.is_awaiting() && self.tx.last_sent() == Some(line) {
            flagged!(self, DebugFlags::AT, line, "echo ignored");
            return;
        }

        let resp = classify(line);
        if self.check_fatal(&resp, line) {
            return;
        }
        match self.state {
            ProtocolState::Down => self.handle_down(line),
            s if s.is_ready() => self.handle_ready(&resp, line),
            _ => self.handle_bringup(&resp, line),
        }
    }

    /// Indications that end the current bring-up or ready state outright.
    ///
    /// Runs before any flow sees the line, so a firmware error wins over a
    /// flow's own error handling.
    fn check_fatal(&mut self, resp: &Response, line: &str) -> bool {
        if *resp == Response::Ok {
            self.firmware_errors = 0;
        }
        if let Some(code) = resp.cme_code() {
            if self.vendor.sim_failure_codes().contains(&code) {
                self.sim = if code == 10 {
                    SimState::NotInserted
                } else {
                    SimState::Failed
                };
                self.emit(Event::SimFailed {
                    reason: line.to_string(),
                });
                self.restart_bringup("SIM failure", None);
                return true;
            }
            if self.vendor.firmware_error_codes().contains(&code) {
                self.firmware_errors += 1;
                warn!(code, count = self.firmware_errors, "firmware error");
                if self.firmware_errors >= self.config.firmware_error_limit {
                    self.restart_bringup("repeated firmware error", None);
                    return true;
                }
            }
        }
        if self.state.is_ready() {
            if self.vendor.is_boot_indication(line) {
                self.restart_bringup("module rebooted", Some(Duration::ZERO));
                return true;
            }
            if let Some(sim) = parse_cpin(line) {
                if matches!(sim, SimState::NotInserted | SimState::Failed) {
                    self.sim = sim;
                    self.emit(Event::SimFailed {
                        reason: line.to_string(),
                    });
                    self.restart_bringup("SIM lost", None);
                    return true;
                }
            }
        }
        false
    }

    fn handle_down(&mut self, line: &str) {
        if self.vendor.is_boot_indication(line)
            && self.sched.cancel_matching(|t| *t == Timer::StartBringUp) > 0
        {
            info!(line, "module booted; starting bring-up early");
            self.start_bringup();
            return;
        }
        flagged!(self, DebugFlags::AT, line, "ignored while down");
    }

    fn handle_ready(&mut self, resp: &Response, line: &str) {
        if self.handle_urc(resp, line) {
            return;
        }
        match self.state {
            ProtocolState::Dialing
            | ProtocolState::Answering
            | ProtocolState::HangingUp
            | ProtocolState::DtmfSending
            | ProtocolState::CallStatusQuery => self.call_response(resp, line),
            ProtocolState::SmsRead | ProtocolState::SmsDelete => self.sms_read_response(resp, line),
            s if s.is_sms_submission() => self.sms_submit_response(resp, line),
            ProtocolState::UssdSending => self.ussd_response(resp, line),
            ProtocolState::OperatorQuery => self.operator_response(resp, line),
            ProtocolState::SafeAt => self.safe_at_response(resp, line),
            ProtocolState::SignalQuery => self.signal_response(resp, line),
            _ => flagged!(self, DebugFlags::AT, line, "unexpected line ignored"),
        }
    }

    /// Unsolicited result codes, handled in any ready sub-state.
    fn handle_urc(&mut self, resp: &Response, line: &str) -> bool {
        if self.state == ProtocolState::SafeAt && self.safe_at_owns(line) {
            return false;
        }
        match resp {
            Response::Ring => self.on_ring(),
            Response::Info { prefix, .. } => match prefix.as_str() {
                "+CLIP" => self.on_clip(line),
                "+CCWA" => self.on_call_waiting(line),
                "+CLCC" => self.on_clcc(line),
                "+DTMF" => self.on_dtmf(line),
                "+CREG" | "+CGREG" => self.on_registration_urc(line),
                "+CMT" => self.on_cmt(line),
                "+CMTI" => self.on_cmti(line),
                "+CUSD" => self.on_cusd(line),
                "+CPIN" => flagged!(self, DebugFlags::AT, line, "SIM notification"),
                _ => return false,
            },
            Response::Text(text) if text == "MO RING" => self.on_far_end_alerting(),
            Response::Text(text) if text == "MO CONNECTED" => self.on_far_end_answered(),
            Response::Connect if self.state != ProtocolState::Answering => {
                self.on_far_end_answered()
            }
            Response::NoCarrier | Response::Busy | Response::NoAnswer
                if !matches!(
                    self.state,
                    ProtocolState::Dialing | ProtocolState::Answering | ProtocolState::HangingUp
                ) =>
            {
                self.on_remote_release(resp)
            }
            _ => return false,
        }
        true
    }

    // -----------------------------------------------------------------
    // Timers
    // -----------------------------------------------------------------

    fn on_timer(&mut self, id: TaskId, timer: Timer) {
        match timer {
            Timer::StartBringUp => self.start_bringup(),
            Timer::Watchdog => {
                if self.watchdog == Some(id) {
                    self.watchdog = None;
                    self.on_watchdog();
                }
            }
            Timer::CommandTimeout(seq) => {
                if seq == self.command_seq && self.tx.is_awaiting() {
                    self.command_timer = None;
                    self.on_command_timeout();
                }
            }
            Timer::StageRetry(state) => self.on_stage_retry(state),
            Timer::CallStatusPoll(call) => self.on_call_status_poll(call),
            Timer::CallWaitingExpiry(slot) => self.on_call_waiting_expiry(slot),
            Timer::SmsStuck => self.on_sms_stuck(id),
            Timer::UssdTimeout => self.on_ussd_timeout(id),
            Timer::PendingRetry(kind) => self.on_pending_retry(id, kind),
            Timer::SignalPoll => self.on_signal_poll(),
        }
    }

    /// The outstanding command got no final result in time.
    pub(crate) fn on_command_timeout(&mut self) {
        warn!(
            state = %self.state,
            command = self.tx.last_sent().unwrap_or(""),
            "no response"
        );
        if self.state.is_bringing_up() {
            self.tx.complete();
            self.bringup_timeout();
            return;
        }
        self.tx.complete();
        match self.state {
            ProtocolState::Dialing => self.dial_failed(Cause::RECOVERY_ON_TIMER_EXPIRE),
            ProtocolState::HangingUp => self.finish_hangup(),
            ProtocolState::Answering | ProtocolState::DtmfSending => {
                self.call_ctx.answering = None;
                self.enter_ready();
            }
            ProtocolState::CallStatusQuery => self.enter_ready(),
            ProtocolState::SignalQuery => self.health_failure("no response"),
            s if s.is_sms_submission() => self.sms_timed_out("no response"),
            ProtocolState::SmsRead | ProtocolState::SmsDelete => self.sms_read_done(),
            ProtocolState::UssdSending => self.ussd_failed("no response"),
            ProtocolState::OperatorQuery => self.operator_list_failed("no response"),
            ProtocolState::SafeAt => self.safe_at_done(false),
            _ => {}
        }
    }

    // -----------------------------------------------------------------
    // Pending requests
    // -----------------------------------------------------------------

    /// Start a request now if idle, otherwise keep it for later.
    pub(crate) fn submit_request(&mut self, request: Request) -> Result<()> {
        let kind = request.kind();
        match self.pending.submit(request)? {
            Placement::Queued(position) => {
                info!(%kind, position, "request queued");
                Ok(())
            }
            Placement::Current => {
                if self.is_idle() {
                    self.start_request(kind);
                    return Ok(());
                }
                if let Err(e) = self.arm_pending_retry(kind) {
                    self.pending.finish(kind);
                    return Err(e);
                }
                info!(%kind, state = %self.state, "request deferred");
                Ok(())
            }
        }
    }

    fn arm_pending_retry(&mut self, kind: RequestKind) -> Result<()> {
        let now = self.now();
        let after = self.config.pending_retry_interval;
        let id = self.sched.schedule(now, after, Timer::PendingRetry(kind))?;
        if let Some(entry) = self.pending.current_mut(kind) {
            entry.task = Some(id);
        }
        Ok(())
    }

    fn on_pending_retry(&mut self, id: TaskId, kind: RequestKind) {
        let Some(entry) = self.pending.current_mut(kind) else {
            return;
        };
        if entry.task != Some(id) || entry.in_flight {
            return;
        }
        entry.task = None;
        if self.is_idle() {
            self.start_request(kind);
            return;
        }

        let limit = self.config.pending_retries;
        let retries = match self.pending.current_mut(kind) {
            Some(entry) => {
                entry.retries += 1;
                entry.retries
            }
            None => return,
        };
        if retries >= limit {
            let reason = if self.state.is_ready() {
                "session busy"
            } else {
                "session not ready"
            };
            self.fail_pending(kind, reason);
            return;
        }
        flagged!(self, DebugFlags::SCHED, %kind, retries, "still not idle; re-deferring");
        if let Err(e) = self.arm_pending_retry(kind) {
            self.fail_pending(kind, &e.to_string());
        }
    }

    /// Hand the current request of `kind` to its flow.
    fn start_request(&mut self, kind: RequestKind) -> bool {
        let Some(entry) = self.pending.current_mut(kind) else {
            return false;
        };
        entry.in_flight = true;
        let task = entry.task.take();
        let request = entry.request.clone();
        if let Some(task) = task {
            self.sched.cancel(task);
        }
        match request {
            Request::Sms(req) => self.start_sms(req),
            Request::Ussd { code } => self.start_ussd(&code),
            Request::OperatorList => self.start_operator_query(),
            Request::SafeAt { command } => self.start_safe_at(&command),
        }
        true
    }

    /// Drop the current request of `kind` with a failure event.
    pub(crate) fn fail_pending(&mut self, kind: RequestKind, reason: &str) {
        let Some(entry) = self.pending.finish(kind) else {
            return;
        };
        if let Some(task) = entry.task {
            self.sched.cancel(task);
        }
        warn!(%kind, reason, "request failed");
        match entry.request {
            Request::Sms(req) => {
                let mode = self.sms_mode_for(&req.payload);
                self.record_delivery(req.id, &req.destination, mode, false, 0, Some(reason));
                self.emit(Event::SmsSendFailed {
                    id: req.id,
                    reason: reason.to_string(),
                });
            }
            Request::Ussd { .. } => self.emit(Event::UssdSendFailed {
                reason: reason.to_string(),
            }),
            Request::OperatorList => self.emit(Event::OperatorListFailed {
                reason: reason.to_string(),
            }),
            Request::SafeAt { command } => self.emit(Event::SafeAtResponse {
                command,
                lines: Vec::new(),
                ok: false,
            }),
        }
        self.kick();
    }

    /// Start the next piece of waiting work if idle; otherwise make sure
    /// every waiting request has a retry timer.
    pub(crate) fn kick(&mut self) {
        if !self.is_idle() {
            for kind in self.pending.waiting() {
                let needs_timer = self.pending.current(kind).is_some_and(|e| e.task.is_none());
                if needs_timer {
                    if let Err(e) = self.arm_pending_retry(kind) {
                        self.fail_pending(kind, &e.to_string());
                    }
                }
            }
            return;
        }
        if let Some(call) = self.call_ctx.deferred_hangup.take() {
            self.send_hangup(call);
            return;
        }
        if let Some(index) = self.sms.inbox.pop_front() {
            self.start_sms_read(index);
            return;
        }
        if let Some(kind) = self.pending.waiting().into_iter().next() {
            self.start_request(kind);
        }
    }

    // -----------------------------------------------------------------
    // Restart
    // -----------------------------------------------------------------

    /// Abandon the current state and run bring-up again after `delay`
    /// (the re-arm cadence when `None`).
    pub(crate) fn restart_bringup(&mut self, reason: &str, delay: Option<Duration>) {
        warn!(reason, state = %self.state, "restarting bring-up");
        let was_ready = self.state.is_ready();
        self.sched
            .cancel_matching(|t| !matches!(t, Timer::PendingRetry(_)));
        self.watchdog = None;
        self.command_timer = None;
        self.tx.reset();
        self.framer.clear();
        self.set_state(ProtocolState::Down);
        if was_ready {
            self.emit(Event::Down);
        }
        self.abort_activities();

        self.restart_attempts += 1;
        self.emit(Event::Restart {
            attempt: self.restart_attempts,
        });
        let delay = delay.unwrap_or_else(|| self.rearm_delay());
        if self.schedule(delay, Timer::StartBringUp).is_err() {
            error!("bring-up could not be re-armed");
        }
    }

    fn rearm_delay(&self) -> Duration {
        if self.restart_attempts <= self.config.fast_rearm_attempts {
            self.config.fast_rearm_interval
        } else {
            self.config.slow_rearm_interval
        }
    }

    /// Release calls and end flows cut short by a restart.
    fn abort_activities(&mut self) {
        for call in self.calls.drain() {
            if call.alive {
                self.emit(Event::Hangup {
                    call: call.reference,
                    cause: Cause::NETWORK_OUT_OF_ORDER,
                });
            }
        }
        self.call_ctx = CallContext::default();

        // An interrupted SMS goes back to waiting and is sent after bring-up.
        if self.sms.flow.take().is_some() {
            if let Some(entry) = self.pending.current_mut(RequestKind::Sms) {
                entry.in_flight = false;
            }
        }
        self.sms.reset();
        self.ussd = UssdContext::default();

        for kind in [
            RequestKind::Ussd,
            RequestKind::OperatorList,
            RequestKind::SafeAt,
        ] {
            if self.pending.in_flight(kind) {
                self.fail_pending(kind, "bring-up restarted");
            }
        }
        self.operators.clear();
        self.safe_at_lines.clear();
        self.kick();
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("span", &self.span_id)
            .field("vendor", &self.vendor.name())
            .field("state", &self.state)
            .field("sim", &self.sim)
            .field("registration", &self.registration)
            .field("calls", &self.calls.len())
            .finish_non_exhaustive()
    }
}

/// One call in a [`SessionStatus`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSummary {
    pub reference: CallRef,
    pub our_state: CallState,
    pub peer_state: CallState,
    pub outgoing: bool,
    pub number: String,
}

/// Point-in-time view of a session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionStatus {
    pub span: u32,
    pub vendor: String,
    pub state: ProtocolState,
    pub sim: SimState,
    pub registration: RegistrationStatus,
    pub coverage: Option<Coverage>,
    pub identity: DeviceIdentity,
    pub operator: Option<String>,
    pub smsc: Option<String>,
    pub sms_mode: SmsMode,
    pub calls: Vec<CallSummary>,
    pub restart_attempts: u32,
    pub pending_requests: usize,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Span {} ({})", self.span, self.vendor)?;
        writeln!(f, "  State:        {}", self.state)?;
        writeln!(
            f,
            "  Model:        {} {} {}",
            self.identity.manufacturer, self.identity.model, self.identity.revision
        )?;
        writeln!(f, "  IMEI:         {}", self.identity.imei)?;
        writeln!(f, "  IMSI:         {}", self.identity.imsi)?;
        writeln!(f, "  SIM:          {}", self.sim)?;
        writeln!(f, "  Registration: {}", self.registration)?;
        match self.coverage {
            Some(c) => match c.dbm() {
                Some(dbm) => writeln!(f, "  Signal:       {} dBm ({}/5)", dbm, c.level())?,
                None => writeln!(f, "  Signal:       unknown")?,
            },
            None => writeln!(f, "  Signal:       not measured")?,
        }
        writeln!(
            f,
            "  Operator:     {}",
            self.operator.as_deref().unwrap_or("-")
        )?;
        writeln!(f, "  SMSC:         {}", self.smsc.as_deref().unwrap_or("-"))?;
        writeln!(f, "  SMS mode:     {}", self.sms_mode)?;
        writeln!(f, "  Pending:      {}", self.pending_requests)?;
        for call in &self.calls {
            writeln!(
                f,
                "  Call {}: {} / {} {} {}",
                call.reference,
                call.our_state,
                call.peer_state,
                if call.outgoing { "to" } else { "from" },
                call.number
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use gsmlink_core::collab::{
        DeliveryLog, DeliveryRecord, PassThroughCodec, PowerProbe,
    };
    use gsmlink_core::command::{AtCommand, VendorProfile};
    use gsmlink_core::types::{CallerId, Coverage, DebugFlags};
    use gsmlink_test_harness::ScriptedModem;
    use gsmlink_vendor::models::{ModemModel, sim800};

    use super::{Session, SessionParts, Timer};
    use crate::clock::ManualClock;
    use crate::config::EngineConfig;

    /// Passes of [`TestSession::pump`] before a session counts as stuck.
    const PUMP_LIMIT: usize = 1000;

    /// Placeholder timer used to exhaust the scheduler. Nothing waits on
    /// slot 255 and a restart clears it.
    const FILLER: Timer = Timer::CallWaitingExpiry(u8::MAX);
    const FILLER_DELAY: Duration = Duration::from_secs(365 * 24 * 3600);

    #[derive(Clone, Default)]
    pub struct RecordingLog(pub Arc<Mutex<Vec<DeliveryRecord>>>);

    impl DeliveryLog for RecordingLog {
        fn record(&mut self, record: &DeliveryRecord) {
            self.0.lock().unwrap().push(record.clone());
        }
    }

    #[derive(Clone, Default)]
    pub struct PowerSwitch(Arc<AtomicBool>);

    impl PowerSwitch {
        pub fn set(&self, off: bool) {
            self.0.store(off, Ordering::SeqCst);
        }
    }

    impl PowerProbe for PowerSwitch {
        fn is_powered_off(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    /// A SIM800 that has no `ATZ`.
    pub struct NoResetProfile;

    impl NoResetProfile {
        fn inner() -> ModemModel {
            sim800()
        }
    }

    impl VendorProfile for NoResetProfile {
        fn name(&self) -> &str {
            "SIM800-noreset"
        }

        fn command(&self, cmd: &AtCommand) -> Option<String> {
            match cmd {
                AtCommand::Reset => None,
                other => Self::inner().command(other),
            }
        }

        fn decode_coverage(&self, line: &str) -> Option<Coverage> {
            Self::inner().decode_coverage(line)
        }

        fn decode_caller_id(&self, line: &str) -> Option<CallerId> {
            Self::inner().decode_caller_id(line)
        }
    }

    fn parts(
        vendor: Box<dyn VendorProfile>,
        config: EngineConfig,
        clock: ManualClock,
        log: RecordingLog,
        power: PowerSwitch,
    ) -> SessionParts {
        SessionParts {
            span_id: 1,
            vendor,
            config,
            clock: Box::new(clock),
            codec: Box::new(PassThroughCodec),
            delivery_log: Box::new(log),
            power: Box::new(power),
            debug: DebugFlags::ALL,
        }
    }

    /// A bare session plus the switch that powers its module off.
    pub fn session_with(config: EngineConfig) -> (Session, PowerSwitch) {
        let power = PowerSwitch::default();
        let session = Session::from_parts(parts(
            Box::new(sim800()),
            config,
            ManualClock::new(),
            RecordingLog::default(),
            power.clone(),
        ));
        (session, power)
    }

    /// A session wired to a scripted modem on a manual clock.
    pub struct TestSession {
        pub session: Session,
        pub modem: ScriptedModem,
        pub clock: ManualClock,
        log: RecordingLog,
    }

    impl TestSession {
        pub fn new() -> Self {
            Self::with_modem(ScriptedModem::new(), EngineConfig::default())
        }

        pub fn with_modem(modem: ScriptedModem, config: EngineConfig) -> Self {
            Self::build(Box::new(sim800()), modem, config)
        }

        pub fn with_vendor(vendor: Box<dyn VendorProfile>, modem: ScriptedModem) -> Self {
            Self::build(vendor, modem, EngineConfig::default())
        }

        fn build(
            vendor: Box<dyn VendorProfile>,
            modem: ScriptedModem,
            config: EngineConfig,
        ) -> Self {
            let clock = ManualClock::new();
            let log = RecordingLog::default();
            let session = Session::from_parts(parts(
                vendor,
                config,
                clock.clone(),
                log.clone(),
                PowerSwitch::default(),
            ));
            TestSession {
                session,
                modem,
                clock,
                log,
            }
        }

        /// Start the session and run it to the ready state.
        pub fn bring_up(&mut self) {
            self.session.start();
            self.pump();
            assert!(
                self.session.is_ready(),
                "bring-up stopped in {}",
                self.session.state()
            );
        }

        /// Shuttle bytes between session and modem and run due timers
        /// until nothing moves.
        pub fn pump(&mut self) {
            for _ in 0..PUMP_LIMIT {
                let mut moved = false;
                for frame in self.session.take_outbound() {
                    self.modem.write(&frame.bytes);
                    moved = true;
                }
                let output = self.modem.read();
                if !output.is_empty() {
                    self.session.feed(&output).unwrap();
                    moved = true;
                }
                if self.session.poll() > 0 {
                    moved = true;
                }
                if !moved {
                    return;
                }
            }
            panic!("session never settled; state {}", self.session.state());
        }

        /// Let time pass, then settle.
        pub fn advance(&mut self, by: Duration) {
            self.clock.advance(by);
            self.pump();
        }

        pub fn deliveries(&self) -> Vec<DeliveryRecord> {
            self.log.0.lock().unwrap().clone()
        }

        /// Take every free scheduler slot with timers that never fire.
        pub fn fill_scheduler(&mut self) {
            let now = self.session.now();
            while self
                .session
                .sched
                .schedule(now, FILLER_DELAY, FILLER)
                .is_ok()
            {}
        }

        pub fn free_scheduler(&mut self) {
            self.session.sched.cancel_matching(|t| *t == FILLER);
        }
    }
}
