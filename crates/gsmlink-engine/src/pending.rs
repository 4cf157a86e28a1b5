//! Requests waiting for the session to become idle and ready.
//!
//! Each [`RequestKind`] has one *current* entry, the request that owns the
//! matching sub-flow, and a bounded FIFO of requests queued behind it. The
//! store itself is passive: the session arms a retry timer for a current
//! entry that cannot start yet, and counts the retries in the entry.

use std::collections::VecDeque;
use std::fmt;

use gsmlink_core::error::{Error, Result};

use crate::scheduler::TaskId;

/// Independent request slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Sms,
    Ussd,
    OperatorList,
    SafeAt,
}

impl RequestKind {
    /// Dispatch order when several kinds are waiting.
    pub const ALL: [RequestKind; 4] = [
        RequestKind::SafeAt,
        RequestKind::Sms,
        RequestKind::Ussd,
        RequestKind::OperatorList,
    ];

    fn index(self) -> usize {
        match self {
            RequestKind::SafeAt => 0,
            RequestKind::Sms => 1,
            RequestKind::Ussd => 2,
            RequestKind::OperatorList => 3,
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RequestKind::Sms => "sms",
            RequestKind::Ussd => "ussd",
            RequestKind::OperatorList => "operator-list",
            RequestKind::SafeAt => "safe-at",
        };
        write!(f, "{s}")
    }
}

/// Body of an outgoing SMS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmsPayload {
    /// Display text, encoded when the submission starts.
    Text(String),
    /// Caller-built SUBMIT PDU in hex, SMSC prefix included.
    Pdu { hex: String, tpdu_len: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmsRequest {
    /// Opaque delivery id echoed in the outcome events.
    pub id: u64,
    pub destination: String,
    pub payload: SmsPayload,
}

/// A deferred API request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Sms(SmsRequest),
    Ussd { code: String },
    OperatorList,
    SafeAt { command: String },
}

impl Request {
    pub fn kind(&self) -> RequestKind {
        match self {
            Request::Sms(_) => RequestKind::Sms,
            Request::Ussd { .. } => RequestKind::Ussd,
            Request::OperatorList => RequestKind::OperatorList,
            Request::SafeAt { .. } => RequestKind::SafeAt,
        }
    }
}

/// The current request of a slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    pub request: Request,
    /// Readiness re-checks that found the session busy.
    pub retries: u32,
    /// Armed retry timer.
    pub task: Option<TaskId>,
    /// The sub-flow is running for this entry.
    pub in_flight: bool,
}

impl PendingEntry {
    fn new(request: Request) -> Self {
        PendingEntry {
            request,
            retries: 0,
            task: None,
            in_flight: false,
        }
    }
}

/// Where [`PendingStore::submit`] put a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// It became the current entry of its slot.
    Current,
    /// It waits behind the current entry at this queue position.
    Queued(usize),
}

#[derive(Debug, Default)]
struct Slot {
    current: Option<PendingEntry>,
    queued: VecDeque<Request>,
}

/// One slot per request kind.
#[derive(Debug)]
pub struct PendingStore {
    slots: [Slot; 4],
    queue_limit: usize,
}

impl PendingStore {
    /// `queue_limit` bounds the requests waiting behind each current one.
    pub fn new(queue_limit: usize) -> Self {
        PendingStore {
            slots: Default::default(),
            queue_limit,
        }
    }

    fn slot(&self, kind: RequestKind) -> &Slot {
        &self.slots[kind.index()]
    }

    fn slot_mut(&mut self, kind: RequestKind) -> &mut Slot {
        &mut self.slots[kind.index()]
    }

    /// Store a new request.
    pub fn submit(&mut self, request: Request) -> Result<Placement> {
        let kind = request.kind();
        let limit = self.queue_limit;
        let slot = self.slot_mut(kind);
        if slot.current.is_none() {
            slot.current = Some(PendingEntry::new(request));
            return Ok(Placement::Current);
        }
        if slot.queued.len() >= limit {
            return Err(Error::Busy(format!("{kind} queue full ({limit})")));
        }
        slot.queued.push_back(request);
        Ok(Placement::Queued(slot.queued.len()))
    }

    pub fn current(&self, kind: RequestKind) -> Option<&PendingEntry> {
        self.slot(kind).current.as_ref()
    }

    pub fn current_mut(&mut self, kind: RequestKind) -> Option<&mut PendingEntry> {
        self.slot_mut(kind).current.as_mut()
    }

    /// Whether the current entry of `kind` is running.
    pub fn in_flight(&self, kind: RequestKind) -> bool {
        self.current(kind).is_some_and(|e| e.in_flight)
    }

    /// Retire the current entry and promote the next queued request.
    pub fn finish(&mut self, kind: RequestKind) -> Option<PendingEntry> {
        let slot = self.slot_mut(kind);
        let done = slot.current.take();
        slot.current = slot.queued.pop_front().map(PendingEntry::new);
        done
    }

    /// Kinds whose current entry is waiting to start.
    pub fn waiting(&self) -> Vec<RequestKind> {
        RequestKind::ALL
            .into_iter()
            .filter(|k| self.current(*k).is_some_and(|e| !e.in_flight))
            .collect()
    }

    /// Requests of `kind` held, current one included.
    pub fn len(&self, kind: RequestKind) -> usize {
        let slot = self.slot(kind);
        slot.queued.len() + usize::from(slot.current.is_some())
    }

    pub fn is_empty(&self) -> bool {
        RequestKind::ALL.into_iter().all(|k| self.len(k) == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sms(id: u64) -> Request {
        Request::Sms(SmsRequest {
            id,
            destination: "100".into(),
            payload: SmsPayload::Text("hi".into()),
        })
    }

    #[test]
    fn first_request_becomes_current() {
        let mut store = PendingStore::new(2);
        assert_eq!(store.submit(sms(1)).unwrap(), Placement::Current);
        assert_eq!(store.submit(sms(2)).unwrap(), Placement::Queued(1));
        assert_eq!(store.len(RequestKind::Sms), 2);
        assert_eq!(store.waiting(), vec![RequestKind::Sms]);
    }

    #[test]
    fn kinds_are_independent() {
        let mut store = PendingStore::new(0);
        store.submit(sms(1)).unwrap();
        assert_eq!(
            store
                .submit(Request::Ussd {
                    code: "*100#".into()
                })
                .unwrap(),
            Placement::Current
        );
        assert_eq!(
            store.submit(Request::OperatorList).unwrap(),
            Placement::Current
        );
        // No room behind the current SMS.
        assert!(matches!(store.submit(sms(2)), Err(Error::Busy(_))));
    }

    #[test]
    fn finish_promotes_queued() {
        let mut store = PendingStore::new(4);
        store.submit(sms(1)).unwrap();
        store.submit(sms(2)).unwrap();
        store.current_mut(RequestKind::Sms).unwrap().in_flight = true;
        assert!(store.in_flight(RequestKind::Sms));
        assert!(store.waiting().is_empty());

        let done = store.finish(RequestKind::Sms).unwrap();
        assert!(matches!(done.request, Request::Sms(SmsRequest { id: 1, .. })));
        let next = store.current(RequestKind::Sms).unwrap();
        assert!(!next.in_flight);
        assert_eq!(next.retries, 0);
        assert!(matches!(next.request, Request::Sms(SmsRequest { id: 2, .. })));

        store.finish(RequestKind::Sms);
        assert!(store.is_empty());
        assert!(store.finish(RequestKind::Sms).is_none());
    }

    #[test]
    fn waiting_follows_dispatch_order() {
        let mut store = PendingStore::new(1);
        store.submit(Request::OperatorList).unwrap();
        store
            .submit(Request::SafeAt {
                command: "AT+CPAS".into(),
            })
            .unwrap();
        store.submit(sms(7)).unwrap();
        assert_eq!(
            store.waiting(),
            vec![
                RequestKind::SafeAt,
                RequestKind::Sms,
                RequestKind::OperatorList
            ]
        );
    }
}
