//! Call registry.
//!
//! Every call-control transaction of a session lives in a [`CallRegistry`]
//! keyed by [`CallRef`]. A [`Call`] tracks two Q.931 states: our own and the
//! one we believe the peer is in. The protocol engine drives them through
//! the transition methods on [`Call`]; the registry only creates and
//! destroys.
//!
//! References are small integers, allocated lowest-free-first and reused
//! after a call is destroyed, so they say nothing about creation order.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use gsmlink_core::error::{Error, Result};
use gsmlink_core::types::{CallRef, CallState, CallerId, Cause};
use tracing::debug;

/// What the engine must do after [`Call::hangup`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HangupAction {
    /// Send a disconnect to the network and wait for it to complete.
    Disconnect,
    /// Nothing left on the network side; destroy the call now.
    DestroyNow,
    /// A dial command is still unanswered; finish the hangup once it is.
    Deferred,
    /// The call was already released or already being released.
    AlreadyReleased,
}

/// One call-control transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub reference: CallRef,
    pub our_state: CallState,
    pub peer_state: CallState,
    pub channel: u8,
    pub outgoing: bool,
    /// Calling party (incoming calls).
    pub caller: Option<CallerId>,
    /// Called number (outgoing calls).
    pub called_number: String,
    pub cause: Cause,
    pub alive: bool,
    pub already_hungup: bool,
    /// The application asked for the release.
    pub hangup_requested: bool,
    /// Set on creation, cleared once the application has been told.
    pub newcall: bool,
    pub ring_count: u32,
    /// `Ring` was emitted for this call.
    pub ring_emitted: bool,
    /// An `ATD` for this call has not been answered yet.
    pub dial_in_progress: bool,
    /// Status polls spent waiting for the far end.
    pub dial_ticks: u32,
    /// Call-waiting slot offered while this call was active.
    pub cw_slot: Option<u8>,
    /// Creation order within the registry.
    serial: u64,
}

impl Call {
    fn new(reference: CallRef, serial: u64) -> Self {
        Call {
            reference,
            our_state: CallState::Null,
            peer_state: CallState::Null,
            channel: 1,
            outgoing: false,
            caller: None,
            called_number: String::new(),
            cause: Cause::NORMAL_CLEARING,
            alive: true,
            already_hungup: false,
            hangup_requested: false,
            newcall: true,
            ring_count: 0,
            ring_emitted: false,
            dial_in_progress: false,
            dial_ticks: 0,
            cw_slot: None,
            serial,
        }
    }

    fn set_states(&mut self, ours: CallState, peer: CallState) {
        debug!(
            call = %self.reference,
            from = %self.our_state,
            to = %ours,
            peer = %peer,
            "call state"
        );
        self.our_state = ours;
        self.peer_state = peer;
    }

    /// Start the call: an outgoing dial or an incoming offer.
    pub fn setup(&mut self, outgoing: bool) {
        self.outgoing = outgoing;
        if outgoing {
            self.set_states(CallState::CallInitiated, CallState::CallPresent);
        } else {
            self.set_states(CallState::CallPresent, CallState::CallInitiated);
        }
    }

    /// The network accepted the dial, or we accepted the offer.
    pub fn proceeding(&mut self) {
        if self.outgoing {
            self.set_states(CallState::OutgoingProceeding, CallState::IncomingProceeding);
        } else {
            self.set_states(CallState::IncomingProceeding, CallState::OutgoingProceeding);
        }
    }

    /// Acknowledge an offered call while more digits may follow.
    pub fn acknowledge(&mut self) {
        self.set_states(CallState::OverlapReceiving, CallState::OverlapSending);
    }

    /// The dialled number is incomplete.
    pub fn need_more_info(&mut self) {
        self.set_states(CallState::OverlapSending, CallState::OverlapReceiving);
    }

    /// Alerting: the far end rings (outgoing) or we ring (incoming).
    pub fn progress(&mut self) {
        if self.outgoing {
            self.set_states(CallState::CallDelivered, CallState::CallReceived);
        } else {
            self.set_states(CallState::CallReceived, CallState::CallDelivered);
        }
    }

    /// We asked the module to pick up an incoming call.
    pub fn connect_request(&mut self) {
        self.set_states(CallState::ConnectRequest, CallState::CallDelivered);
    }

    /// Both sides connected.
    pub fn answer(&mut self) {
        self.set_states(CallState::Active, CallState::Active);
    }

    /// We asked the network to release the call.
    pub fn disconnect_request(&mut self) {
        self.set_states(CallState::DisconnectRequest, CallState::DisconnectIndication);
    }

    /// The network released the call.
    pub fn disconnect(&mut self, cause: Cause) {
        self.cause = cause;
        self.set_states(CallState::DisconnectIndication, CallState::DisconnectRequest);
    }

    /// Release handshake finished; both states collapse to null.
    pub fn release_complete(&mut self) {
        self.alive = false;
        self.dial_in_progress = false;
        self.set_states(CallState::Null, CallState::Null);
    }

    /// Request a local hangup.
    ///
    /// The first call decides what has to happen on the wire; every later
    /// call returns [`HangupAction::AlreadyReleased`].
    pub fn hangup(&mut self, cause: Cause) -> HangupAction {
        if self.already_hungup {
            return HangupAction::AlreadyReleased;
        }
        self.already_hungup = true;
        self.cause = cause;

        if self.dial_in_progress {
            return HangupAction::Deferred;
        }
        match self.our_state {
            CallState::Null | CallState::Restart | CallState::RestartRequest => {
                HangupAction::DestroyNow
            }
            CallState::DisconnectIndication => {
                self.set_states(CallState::ReleaseRequest, CallState::ReleaseRequest);
                HangupAction::DestroyNow
            }
            CallState::DisconnectRequest | CallState::ReleaseRequest => {
                HangupAction::AlreadyReleased
            }
            CallState::CallInitiated
            | CallState::OverlapSending
            | CallState::OutgoingProceeding
            | CallState::CallDelivered
            | CallState::CallPresent
            | CallState::CallReceived
            | CallState::ConnectRequest
            | CallState::IncomingProceeding
            | CallState::OverlapReceiving
            | CallState::Active => {
                self.disconnect_request();
                HangupAction::Disconnect
            }
        }
    }

    /// Whether the call is still ringing in (offered, not answered).
    pub fn is_offered(&self) -> bool {
        !self.outgoing
            && matches!(
                self.our_state,
                CallState::CallPresent
                    | CallState::CallReceived
                    | CallState::IncomingProceeding
                    | CallState::OverlapReceiving
            )
    }

    pub fn is_active(&self) -> bool {
        self.our_state == CallState::Active
    }
}

/// Owned set of calls keyed by reference.
#[derive(Debug, Default)]
pub struct CallRegistry {
    calls: BTreeMap<CallRef, Call>,
    created: u64,
}

impl CallRegistry {
    pub fn new() -> Self {
        CallRegistry::default()
    }

    /// Lowest reference not in use.
    pub fn allocate(&self) -> Result<CallRef> {
        (1..=u16::MAX)
            .map(CallRef::new)
            .find(|reference| !self.calls.contains_key(reference))
            .ok_or_else(|| Error::Busy("every call reference is in use".into()))
    }

    /// The call with `reference`, created in the null state if absent.
    pub fn get_or_create(&mut self, reference: CallRef) -> &mut Call {
        match self.calls.entry(reference) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                self.created += 1;
                debug!(call = %reference, "call created");
                entry.insert(Call::new(reference, self.created))
            }
        }
    }

    pub fn get(&self, reference: CallRef) -> Option<&Call> {
        self.calls.get(&reference)
    }

    pub fn get_mut(&mut self, reference: CallRef) -> Option<&mut Call> {
        self.calls.get_mut(&reference)
    }

    /// Remove a call. Destroying an absent call is a no-op.
    pub fn destroy(&mut self, reference: CallRef) -> Option<Call> {
        let removed = self.calls.remove(&reference);
        if removed.is_some() {
            debug!(call = %reference, "call destroyed");
        } else {
            debug!(call = %reference, "destroy of unknown call ignored");
        }
        removed
    }

    /// Remove every call, returning them.
    pub fn drain(&mut self) -> Vec<Call> {
        std::mem::take(&mut self.calls).into_values().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Call> {
        self.calls.values()
    }

    /// The incoming call currently being offered.
    pub fn offered(&self) -> Option<CallRef> {
        self.calls.values().find(|c| c.is_offered()).map(|c| c.reference)
    }

    /// The active call, if any.
    pub fn active(&self) -> Option<CallRef> {
        self.calls.values().find(|c| c.is_active()).map(|c| c.reference)
    }

    /// The outgoing call still waiting for the far end.
    pub fn outgoing_pending(&self) -> Option<CallRef> {
        self.calls
            .values()
            .find(|c| c.outgoing && c.alive && !c.is_active() && !c.already_hungup)
            .map(|c| c.reference)
    }

    /// The most recently created live call.
    pub fn latest_alive(&self) -> Option<CallRef> {
        self.calls
            .values()
            .filter(|c| c.alive)
            .max_by_key(|c| c.serial)
            .map(|c| c.reference)
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}
