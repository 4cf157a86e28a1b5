//! Short messages: submission, reception and reassembly.
//!
//! A submission runs `AT+CMGF` (and `AT+CSMP` in text mode), then one
//! `AT+CMGS` per part: the body goes out after the `> ` prompt, chunked
//! and terminated by Ctrl-Z, and the part is done on `+CMGS` plus `OK`.
//! A failed attempt starts over from `AT+CMGF` until the retry budget is
//! spent. Received messages arrive either directly (`+CMT` with the body
//! on the following line) or as a storage index (`+CMTI`), which is read
//! with `AT+CMGR` and then deleted.

use std::collections::{BTreeMap, VecDeque};

use gsmlink_at::pdu::{
    DeliverPdu, decode_deliver, decode_semi_octets, encode_submit, hex_decode,
};
use gsmlink_at::protocol::{
    CmgrHeader, CmtHeader, Response, classify, parse_cmgr, parse_cmgs, parse_cmt, parse_cmti,
};
use gsmlink_core::collab::DeliveryRecord;
use gsmlink_core::command::AtCommand;
use gsmlink_core::error::{Error, Result};
use gsmlink_core::events::Event;
use gsmlink_core::types::{ConcatPart, DebugFlags, SmsMessage, SmsMode};
use tracing::{debug, info, warn};

use crate::pending::{Request, RequestKind, SmsPayload, SmsRequest};
use crate::scheduler::TaskId;
use crate::session::{Session, Timer};
use crate::state::ProtocolState;

/// Partially received concatenated messages kept at once.
const MAX_GROUPS: usize = 16;

/// What the next line from the modem is expected to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum BodyKind {
    Pdu,
    Text { sender: String, timestamp: String },
}

/// One `AT+CMGS` of a submission.
#[derive(Debug, Clone)]
pub(crate) struct OutPart {
    command: AtCommand,
    body: Vec<u8>,
}

/// A submission in progress.
#[derive(Debug, Clone)]
pub(crate) struct SmsFlow {
    id: u64,
    destination: String,
    mode: SmsMode,
    parts: Vec<OutPart>,
    part: usize,
    attempts: u32,
    reference: Option<u8>,
    failure: Option<String>,
}

#[derive(Debug)]
struct Group {
    sender: String,
    reference: u16,
    total: u8,
    parts: BTreeMap<u8, String>,
}

/// Collects the parts of concatenated messages until each is complete.
#[derive(Debug, Default)]
pub(crate) struct Reassembly {
    groups: VecDeque<Group>,
}

impl Reassembly {
    /// Add a part; returns the full text once every part is present.
    pub fn add(&mut self, sender: &str, part: ConcatPart, text: String) -> Option<String> {
        if part.total <= 1 {
            return Some(text);
        }
        if part.sequence == 0 || part.sequence > part.total {
            warn!(
                sender,
                reference = part.reference,
                sequence = part.sequence,
                total = part.total,
                "part out of range dropped"
            );
            return None;
        }
        let pos = self.groups.iter().position(|g| {
            g.sender == sender && g.reference == part.reference && g.total == part.total
        });
        let pos = match pos {
            Some(pos) => pos,
            None => {
                if self.groups.len() == MAX_GROUPS {
                    if let Some(old) = self.groups.pop_front() {
                        warn!(
                            sender = %old.sender,
                            reference = old.reference,
                            have = old.parts.len(),
                            total = old.total,
                            "dropping incomplete message"
                        );
                    }
                }
                self.groups.push_back(Group {
                    sender: sender.to_string(),
                    reference: part.reference,
                    total: part.total,
                    parts: BTreeMap::new(),
                });
                self.groups.len() - 1
            }
        };
        let group = &mut self.groups[pos];
        group.parts.insert(part.sequence, text);
        if group.parts.len() < usize::from(group.total) {
            return None;
        }
        let group = self.groups.remove(pos)?;
        Some(group.parts.into_values().collect())
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }
}

/// SMS state of a session.
#[derive(Debug)]
pub(crate) struct SmsContext {
    pub flow: Option<SmsFlow>,
    pub expect_body: Option<BodyKind>,
    /// Storage indexes announced by `+CMTI`, not read yet.
    pub inbox: VecDeque<u16>,
    pub reading: Option<u16>,
    pub reassembly: Reassembly,
    /// Reference for the next concatenated submission.
    pub next_reference: u8,
    pub stuck_timer: Option<TaskId>,
}

impl SmsContext {
    pub fn new(first_reference: u8) -> Self {
        SmsContext {
            flow: None,
            expect_body: None,
            inbox: VecDeque::new(),
            reading: None,
            reassembly: Reassembly::default(),
            next_reference: first_reference,
            stuck_timer: None,
        }
    }

    /// Forget flow state after a restart. Partial messages are kept.
    pub fn reset(&mut self) {
        self.flow = None;
        self.expect_body = None;
        self.inbox.clear();
        self.reading = None;
        self.stuck_timer = None;
    }
}

fn validate_destination(destination: &str) -> Result<()> {
    let digits = destination.strip_prefix('+').unwrap_or(destination);
    if digits.is_empty()
        || !digits
            .bytes()
            .all(|b| b.is_ascii_digit() || b == b'*' || b == b'#')
    {
        return Err(Error::InvalidParameter(format!(
            "invalid destination {destination:?}"
        )));
    }
    Ok(())
}

/// TPDU length and destination of a hex SUBMIT PDU with SMSC prefix.
fn inspect_submit(hex: &str) -> Result<(usize, String)> {
    let bytes = hex_decode(hex)?;
    let invalid = |what: &str| Error::InvalidParameter(format!("SUBMIT PDU {what}"));
    let smsc_len = usize::from(*bytes.first().ok_or_else(|| invalid("is empty"))?);
    let tpdu = bytes.get(1 + smsc_len..).ok_or_else(|| invalid("truncated in SMSC"))?;
    if tpdu.len() < 4 {
        return Err(invalid("truncated"));
    }
    if tpdu[0] & 0x03 != 0x01 {
        return Err(invalid("is not an SMS-SUBMIT"));
    }
    let digits = usize::from(tpdu[2]);
    let toa = tpdu[3];
    let address = tpdu
        .get(4..4 + digits.div_ceil(2))
        .ok_or_else(|| invalid("truncated in destination"))?;
    let number = decode_semi_octets(address, digits);
    let destination = if toa & 0x70 == 0x10 {
        format!("+{number}")
    } else {
        number
    };
    Ok((tpdu.len(), destination))
}

impl Session {
    /// Send a text message to `destination`.
    ///
    /// The outcome arrives as [`Event::SmsSendOk`] or
    /// [`Event::SmsSendFailed`] carrying `id`. Texts too long for one
    /// message are split into a concatenated message in PDU mode.
    pub fn send_text(&mut self, destination: &str, text: &str, id: u64) -> Result<()> {
        let span = self.span.clone();
        let _enter = span.enter();
        validate_destination(destination)?;
        if self.config.sms_mode == SmsMode::Pdu {
            encode_submit(destination, text, 0)?;
        }
        self.submit_request(Request::Sms(SmsRequest {
            id,
            destination: destination.to_string(),
            payload: SmsPayload::Text(text.to_string()),
        }))
    }

    /// Send a caller-built SUBMIT PDU, given in hex with its SMSC prefix.
    pub fn send_pdu(&mut self, hex: &str, id: u64) -> Result<()> {
        let span = self.span.clone();
        let _enter = span.enter();
        let hex = hex.trim();
        let (tpdu_len, destination) = inspect_submit(hex)?;
        self.submit_request(Request::Sms(SmsRequest {
            id,
            destination,
            payload: SmsPayload::Pdu {
                hex: hex.to_ascii_uppercase(),
                tpdu_len,
            },
        }))
    }

    /// Mode a submission of `payload` uses.
    pub(crate) fn sms_mode_for(&self, payload: &SmsPayload) -> SmsMode {
        match payload {
            SmsPayload::Pdu { .. } => SmsMode::Pdu,
            SmsPayload::Text(_) => self.config.sms_mode,
        }
    }

    pub(crate) fn record_delivery(
        &mut self,
        id: u64,
        destination: &str,
        mode: SmsMode,
        success: bool,
        attempts: u32,
        reason: Option<&str>,
    ) {
        let record = DeliveryRecord {
            id,
            destination: destination.to_string(),
            mode,
            success,
            attempts,
            reason: reason.map(str::to_string),
        };
        self.delivery_log.record(&record);
    }

    // -----------------------------------------------------------------
    // Submission
    // -----------------------------------------------------------------

    fn build_parts(&mut self, req: &SmsRequest, mode: SmsMode) -> Result<Vec<OutPart>> {
        match (&req.payload, mode) {
            (SmsPayload::Pdu { hex, tpdu_len }, _) => Ok(vec![OutPart {
                command: AtCommand::SmsSubmitPdu(*tpdu_len),
                body: hex.clone().into_bytes(),
            }]),
            (SmsPayload::Text(text), SmsMode::Text) => Ok(vec![OutPart {
                command: AtCommand::SmsSubmitText(req.destination.clone()),
                body: self.codec.encode(text).into_bytes(),
            }]),
            (SmsPayload::Text(text), SmsMode::Pdu) => {
                let reference = self.sms.next_reference;
                let pdus = encode_submit(&req.destination, text, reference)?;
                if pdus.len() > 1 {
                    self.sms.next_reference = reference.wrapping_add(1);
                }
                Ok(pdus
                    .into_iter()
                    .map(|p| OutPart {
                        command: AtCommand::SmsSubmitPdu(p.tpdu_len),
                        body: p.hex.into_bytes(),
                    })
                    .collect())
            }
        }
    }

    pub(crate) fn start_sms(&mut self, req: SmsRequest) {
        let mode = self.sms_mode_for(&req.payload);
        let parts = match self.build_parts(&req, mode) {
            Ok(parts) => parts,
            Err(e) => {
                self.fail_pending(RequestKind::Sms, &e.to_string());
                return;
            }
        };
        info!(id = req.id, destination = %req.destination, %mode, parts = parts.len(), "sending SMS");
        self.sms.flow = Some(SmsFlow {
            id: req.id,
            destination: req.destination,
            mode,
            parts,
            part: 0,
            attempts: 0,
            reference: None,
            failure: None,
        });
        self.sms_attempt();
    }

    fn sms_attempt(&mut self) {
        let Some(flow) = self.sms.flow.as_mut() else {
            return;
        };
        // Parts already accepted are not sent again; the concatenation
        // reference stays the same across attempts.
        flow.attempts += 1;
        flow.reference = None;
        let mode = flow.mode;
        let attempt = flow.attempts;
        flagged!(self, DebugFlags::STATE, attempt, "SMS attempt");

        self.cancel_sms_stuck();
        let after = self.config.sms_stuck_timeout;
        match self.schedule(after, Timer::SmsStuck) {
            Ok(id) => self.sms.stuck_timer = Some(id),
            Err(e) => {
                if let Some(flow) = self.sms.flow.as_mut() {
                    flow.failure = Some(e.to_string());
                }
                self.conclude_sms();
                return;
            }
        }
        self.set_state(ProtocolState::SmsModeSelect);
        if let Err(e) = self.send_command(&AtCommand::SmsFormat(mode)) {
            self.sms_attempt_failed(&e.to_string());
        }
    }

    fn cancel_sms_stuck(&mut self) {
        if let Some(id) = self.sms.stuck_timer.take() {
            self.sched.cancel(id);
        }
    }

    fn submit_part(&mut self) {
        let Some(flow) = self.sms.flow.as_ref() else {
            self.enter_ready();
            return;
        };
        let Some(part) = flow.parts.get(flow.part) else {
            self.conclude_sms();
            return;
        };
        let command = part.command.clone();
        self.set_state(ProtocolState::SmsSubmit);
        if let Err(e) = self.send_command(&command) {
            self.sms_attempt_failed(&e.to_string());
        }
    }

    /// The modem printed the body prompt.
    pub(crate) fn handle_prompt(&mut self) {
        if self.state != ProtocolState::SmsSubmit {
            flagged!(self, DebugFlags::AT, state = %self.state, "unexpected prompt ignored");
            return;
        }
        let Some(body) = self
            .sms
            .flow
            .as_ref()
            .and_then(|f| f.parts.get(f.part))
            .map(|p| p.body.clone())
        else {
            return;
        };
        self.set_state(ProtocolState::SmsBody);
        // The stuck timer covers the network round trip from here on.
        self.disarm_command_timer();
        let chunk = self
            .config
            .sms_chunk_size
            .unwrap_or_else(|| self.vendor.sms_chunk_size());
        match self.tx.submit_body(&body, chunk) {
            Ok(n) => flagged!(self, DebugFlags::AT, bytes = n, chunk, "-> SMS body"),
            Err(e) => self.sms_attempt_failed(&e.to_string()),
        }
    }

    pub(crate) fn sms_submit_response(&mut self, resp: &Response, line: &str) {
        if let Response::Info { prefix, .. } = resp {
            if prefix == "+CMGS" {
                if let Some(flow) = self.sms.flow.as_mut() {
                    flow.reference = parse_cmgs(line);
                }
                return;
            }
        }
        if !resp.is_final() {
            flagged!(self, DebugFlags::AT, line, "ignored during SMS submission");
            return;
        }
        self.command_done();
        match (self.state, resp) {
            (ProtocolState::SmsModeSelect, Response::Ok) => {
                let mode = self.sms.flow.as_ref().map_or(SmsMode::Pdu, |f| f.mode);
                self.sms_mode = mode;
                if mode == SmsMode::Text {
                    self.set_state(ProtocolState::SmsTextParams);
                    match self.send_command(&AtCommand::SmsTextParams) {
                        Ok(()) => {}
                        Err(Error::Unsupported(_)) => self.submit_part(),
                        Err(e) => self.sms_attempt_failed(&e.to_string()),
                    }
                } else {
                    self.submit_part();
                }
            }
            // Text parameters are best effort.
            (ProtocolState::SmsTextParams, _) => self.submit_part(),
            (ProtocolState::SmsBody, Response::Ok) => {
                if let Some(flow) = self.sms.flow.as_mut() {
                    flow.part += 1;
                }
                self.submit_part();
            }
            (ProtocolState::SmsRestoreMode, resp) => {
                if *resp == Response::Ok {
                    self.sms_mode = SmsMode::Pdu;
                }
                self.finish_sms();
            }
            _ => self.sms_attempt_failed(line),
        }
    }

    /// Abort a submission that stopped making progress.
    pub(crate) fn sms_timed_out(&mut self, reason: &str) {
        if matches!(
            self.state,
            ProtocolState::SmsSubmit | ProtocolState::SmsBody
        ) {
            if let Err(e) = self.tx.abort_body() {
                warn!("cannot queue ESC: {e}");
            }
        }
        self.disarm_command_timer();
        self.tx.complete();
        self.sms_attempt_failed(reason);
    }

    pub(crate) fn on_sms_stuck(&mut self, id: TaskId) {
        if self.sms.stuck_timer != Some(id) {
            return;
        }
        self.sms.stuck_timer = None;
        if !self.state.is_sms_submission() {
            return;
        }
        warn!(state = %self.state, "SMS submission stuck");
        self.sms_timed_out("submission stuck");
    }

    pub(crate) fn sms_attempt_failed(&mut self, reason: &str) {
        self.cancel_sms_stuck();
        if self.state == ProtocolState::SmsRestoreMode {
            self.finish_sms();
            return;
        }
        let retries = self.config.sms_retries;
        let Some(flow) = self.sms.flow.as_mut() else {
            self.enter_ready();
            return;
        };
        warn!(id = flow.id, attempt = flow.attempts, reason, "SMS attempt failed");
        if flow.attempts < retries {
            self.sms_attempt();
        } else {
            flow.failure = Some(reason.to_string());
            self.conclude_sms();
        }
    }

    /// Put the modem back into PDU mode if needed, then report.
    fn conclude_sms(&mut self) {
        self.cancel_sms_stuck();
        if self.sms_mode == SmsMode::Text {
            self.set_state(ProtocolState::SmsRestoreMode);
            if self.send_command(&AtCommand::SmsFormat(SmsMode::Pdu)).is_ok() {
                return;
            }
        }
        self.finish_sms();
    }

    fn finish_sms(&mut self) {
        self.cancel_sms_stuck();
        if let Some(flow) = self.sms.flow.take() {
            let success = flow.failure.is_none();
            self.record_delivery(
                flow.id,
                &flow.destination,
                flow.mode,
                success,
                flow.attempts,
                flow.failure.as_deref(),
            );
            let event = match flow.failure {
                None => Event::SmsSendOk {
                    id: flow.id,
                    reference: flow.reference,
                },
                Some(reason) => Event::SmsSendFailed { id: flow.id, reason },
            };
            self.emit(event);
            self.pending.finish(RequestKind::Sms);
        }
        self.enter_ready();
    }

    // -----------------------------------------------------------------
    // Reception
    // -----------------------------------------------------------------

    pub(crate) fn on_cmt(&mut self, line: &str) {
        match parse_cmt(line) {
            Some(CmtHeader::Pdu { length }) => {
                debug!(length, "incoming SMS");
                self.sms.expect_body = Some(BodyKind::Pdu);
            }
            Some(CmtHeader::Text { sender, timestamp }) => {
                debug!(%sender, "incoming SMS");
                self.sms.expect_body = Some(BodyKind::Text { sender, timestamp });
            }
            None => warn!(line, "malformed +CMT"),
        }
    }

    pub(crate) fn on_cmti(&mut self, line: &str) {
        let Some((storage, index)) = parse_cmti(line) else {
            warn!(line, "malformed +CMTI");
            return;
        };
        debug!(%storage, index, "SMS stored");
        if self.sms.reading != Some(index) && !self.sms.inbox.contains(&index) {
            self.sms.inbox.push_back(index);
        }
        self.kick();
    }

    /// Consume `line` if it is the body of an announced message.
    ///
    /// A text body that reads `OK` is an empty message; the `OK` still
    /// goes through normal dispatch.
    pub(crate) fn take_sms_body(&mut self, line: &str) -> bool {
        let Some(kind) = self.sms.expect_body.take() else {
            return false;
        };
        match kind {
            BodyKind::Pdu => {
                if classify(line).is_final() {
                    warn!(line, "SMS PDU missing");
                    return false;
                }
                match decode_deliver(line) {
                    Ok(pdu) => self.deliver_pdu(pdu),
                    Err(e) => warn!(line, "undecodable SMS dropped: {e}"),
                }
                true
            }
            BodyKind::Text { sender, timestamp } => {
                if line == "OK" {
                    self.deliver_text(sender, timestamp, String::new());
                    return false;
                }
                let text = self.codec.decode(line);
                self.deliver_text(sender, timestamp, text);
                true
            }
        }
    }

    fn deliver_pdu(&mut self, pdu: DeliverPdu) {
        let (text, parts) = match pdu.concat {
            Some(part) => {
                let total = part.total;
                match self.sms.reassembly.add(&pdu.sender, part, pdu.text) {
                    Some(text) => (text, total.max(1)),
                    None => {
                        debug!(
                            sender = %pdu.sender,
                            sequence = part.sequence,
                            total,
                            groups = self.sms.reassembly.len(),
                            "SMS part stored"
                        );
                        return;
                    }
                }
            }
            None => (pdu.text, 1),
        };
        self.emit(Event::SmsReceived {
            message: SmsMessage {
                sender: pdu.sender,
                smsc: pdu.smsc,
                timestamp: pdu.timestamp,
                text,
                parts,
                mode: SmsMode::Pdu,
            },
        });
    }

    fn deliver_text(&mut self, sender: String, timestamp: String, text: String) {
        self.emit(Event::SmsReceived {
            message: SmsMessage {
                sender,
                smsc: None,
                timestamp,
                text,
                parts: 1,
                mode: SmsMode::Text,
            },
        });
    }

    pub(crate) fn start_sms_read(&mut self, index: u16) {
        self.sms.reading = Some(index);
        self.set_state(ProtocolState::SmsRead);
        if let Err(e) = self.send_command(&AtCommand::ReadSms(index)) {
            warn!(index, "cannot read SMS: {e}");
            self.sms_read_done();
        }
    }

    pub(crate) fn sms_read_response(&mut self, resp: &Response, line: &str) {
        match resp {
            Response::Info { prefix, .. } if prefix == "+CMGR" => {
                self.sms.expect_body = match parse_cmgr(line) {
                    Some(CmgrHeader::Pdu { .. }) => Some(BodyKind::Pdu),
                    Some(CmgrHeader::Text { sender, timestamp }) => {
                        Some(BodyKind::Text { sender, timestamp })
                    }
                    None => {
                        warn!(line, "malformed +CMGR");
                        None
                    }
                };
            }
            r if r.is_final() => {
                self.command_done();
                if self.state == ProtocolState::SmsDelete {
                    self.sms_read_done();
                    return;
                }
                if r.is_error() {
                    warn!(index = ?self.sms.reading, line, "SMS read failed");
                }
                let Some(index) = self.sms.reading else {
                    self.sms_read_done();
                    return;
                };
                self.set_state(ProtocolState::SmsDelete);
                if let Err(e) = self.send_command(&AtCommand::DeleteSms(index)) {
                    warn!(index, "cannot delete SMS: {e}");
                    self.sms_read_done();
                }
            }
            _ => flagged!(self, DebugFlags::AT, line, "ignored during SMS read"),
        }
    }

    pub(crate) fn sms_read_done(&mut self) {
        self.sms.reading = None;
        self.sms.expect_body = None;
        self.enter_ready();
    }
}
