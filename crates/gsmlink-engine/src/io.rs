//! IO task for a [`Session`].
//!
//! One tokio task owns the transport and the session exclusively. It
//! writes the session's outbound frames (honouring their pauses), feeds
//! received bytes back in, runs timers when the session's next deadline
//! passes and broadcasts every event the session reports. Applications
//! talk to the task through a [`SessionIo`] handle.

use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use gsmlink_core::error::{Error, Result};
use gsmlink_core::events::Event;
use gsmlink_core::transport::Transport;
use gsmlink_core::types::{CallRef, Cause, DebugFlags};

use crate::session::{Session, SessionStatus};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A request sent from a [`SessionIo`] handle to the IO task.
pub enum Request {
    /// Run a closure against the session inside the task.
    Call(Box<dyn FnOnce(&mut Session) + Send>),
    /// Graceful shutdown; returns the transport for recovery.
    Shutdown {
        reply: oneshot::Sender<Box<dyn Transport>>,
    },
}

/// Handle to the IO task.
pub struct SessionIo {
    tx: mpsc::Sender<Request>,
    events: broadcast::Sender<Event>,
    /// Cancellation token for abrupt shutdown.
    pub cancel: CancellationToken,
    /// Join handle for the IO task.
    pub task: JoinHandle<()>,
}

/// How long a handle waits for the task to answer a request.
const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

impl SessionIo {
    /// Receive every event reported from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Run `f` against the session inside the task and return its result.
    pub async fn call<R, F>(&self, f: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut Session) -> R + Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Request::Call(Box::new(move |session| {
                let _ = reply_tx.send(f(session));
            })))
            .await
            .map_err(|_| Error::NotConnected)?;

        match tokio::time::timeout(REPLY_TIMEOUT, reply_rx).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(_)) => Err(Error::NotConnected),
            Err(_) => Err(Error::Timeout),
        }
    }

    pub async fn status(&self) -> Result<SessionStatus> {
        self.call(|s| s.status()).await
    }

    pub async fn dial(&self, number: &str) -> Result<CallRef> {
        let number = number.to_string();
        self.call(move |s| s.dial(&number)).await?
    }

    pub async fn answer(&self, call: CallRef) -> Result<()> {
        self.call(move |s| s.answer(call)).await?
    }

    pub async fn hangup(&self, call: CallRef, cause: Cause) -> Result<()> {
        self.call(move |s| s.hangup(call, cause)).await?
    }

    pub async fn send_dtmf(&self, call: CallRef, digit: char) -> Result<()> {
        self.call(move |s| s.send_dtmf(call, digit)).await?
    }

    /// Queue a text message; the outcome arrives as an event carrying `id`.
    pub async fn send_text(&self, destination: &str, text: &str, id: u64) -> Result<()> {
        let destination = destination.to_string();
        let text = text.to_string();
        self.call(move |s| s.send_text(&destination, &text, id)).await?
    }

    pub async fn send_pdu(&self, hex: &str, id: u64) -> Result<()> {
        let hex = hex.to_string();
        self.call(move |s| s.send_pdu(&hex, id)).await?
    }

    pub async fn send_ussd(&self, code: &str) -> Result<()> {
        let code = code.to_string();
        self.call(move |s| s.send_ussd(&code)).await?
    }

    pub async fn query_operators(&self) -> Result<()> {
        self.call(|s| s.query_operators()).await?
    }

    pub async fn send_safe_at(&self, command: &str) -> Result<()> {
        let command = command.to_string();
        self.call(move |s| s.send_safe_at(&command)).await?
    }

    pub async fn send_pin(&self, pin: &str) -> Result<()> {
        let pin = pin.to_string();
        self.call(move |s| s.send_pin(&pin)).await?
    }

    pub async fn restart(&self) -> Result<()> {
        self.call(|s| s.restart()).await
    }

    pub async fn reset(&self) -> Result<()> {
        self.call(|s| s.reset()).await?
    }

    pub async fn set_debug(&self, flags: DebugFlags) -> Result<()> {
        self.call(move |s| s.set_debug(flags)).await
    }

    /// Shut down the IO task and recover the transport.
    pub async fn shutdown(self) -> Result<Box<dyn Transport>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let _ = self.tx.send(Request::Shutdown { reply: reply_tx }).await;
        let transport = reply_rx.await.map_err(|_| Error::NotConnected)?;
        let _ = self.task.await;
        Ok(transport)
    }
}

// ---------------------------------------------------------------------------
// Spawn
// ---------------------------------------------------------------------------

/// Events buffered per subscriber before the slowest one starts lagging.
const EVENT_CAPACITY: usize = 256;

/// Start `session` and spawn the task that runs it over `transport`.
///
/// The session's clock should follow tokio time ([`TokioClock`](crate::TokioClock)),
/// since the task sleeps until [`Session::next_deadline`].
pub fn spawn_session_task(mut session: Session, transport: Box<dyn Transport>) -> SessionIo {
    let (tx, rx) = mpsc::channel::<Request>(32);
    let (events, _) = broadcast::channel(EVENT_CAPACITY);
    let cancel = CancellationToken::new();

    session.start();
    let task = tokio::spawn(io_loop(
        session,
        transport,
        events.clone(),
        rx,
        cancel.clone(),
    ));

    SessionIo {
        tx,
        events,
        cancel,
        task,
    }
}

// ---------------------------------------------------------------------------
// IO Loop
// ---------------------------------------------------------------------------

/// Longest single wait on the transport.
const RECEIVE_SLICE: Duration = Duration::from_millis(100);

/// Wake-up interval when no timer is armed.
const IDLE_WAKE: Duration = Duration::from_secs(1);

/// Pause after a failed read before trying again.
const ERROR_BACKOFF: Duration = Duration::from_millis(500);

/// The main IO loop. Runs as a spawned tokio task.
///
/// Uses `tokio::select! { biased; }` to prioritize:
/// 1. Cancellation
/// 2. Requests from handles
/// 3. Timers
/// 4. Bytes from the modem
async fn io_loop(
    mut session: Session,
    mut transport: Box<dyn Transport>,
    events: broadcast::Sender<Event>,
    mut rx: mpsc::Receiver<Request>,
    cancel: CancellationToken,
) {
    let mut buf = [0u8; 512];

    loop {
        flush(&mut session, &mut *transport).await;
        for event in session.drain_events() {
            // No subscribers is fine.
            let _ = events.send(event);
        }

        let wake = session
            .next_deadline()
            .map(Instant::from_std)
            .unwrap_or_else(|| Instant::now() + IDLE_WAKE);

        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                debug!(span = session.span_id(), "session IO task cancelled");
                break;
            }

            req = rx.recv() => {
                match req {
                    Some(Request::Call(f)) => f(&mut session),
                    Some(Request::Shutdown { reply }) => {
                        debug!(span = session.span_id(), "session IO task shutdown requested");
                        let _ = reply.send(transport);
                        return;
                    }
                    None => {
                        debug!("request channel closed, exiting session IO task");
                        break;
                    }
                }
            }

            _ = tokio::time::sleep_until(wake) => {
                session.poll();
            }

            res = transport.receive(&mut buf, RECEIVE_SLICE) => {
                match res {
                    Ok(0) | Err(Error::Timeout) => {}
                    Ok(n) => {
                        if let Err(e) = session.feed(&buf[..n]) {
                            warn!(span = session.span_id(), "{e}");
                        }
                    }
                    Err(e) => {
                        session.on_transport_error(&e);
                        tokio::time::sleep(ERROR_BACKOFF).await;
                    }
                }
            }
        }
    }
}

/// Write every queued frame, pausing after each as it asks.
async fn flush(session: &mut Session, transport: &mut dyn Transport) {
    while let Some(frame) = session.pop_outbound() {
        if let Err(e) = transport.send(&frame.bytes).await {
            session.on_transport_error(&e);
            // Whatever was queued behind the failed frame is stale now.
            let dropped = session.take_outbound().len();
            if dropped > 0 {
                warn!(dropped, "outbound frames dropped after write failure");
            }
            return;
        }
        if !frame.pause_after.is_zero() {
            tokio::time::sleep(frame.pause_after).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::SessionBuilder;
    use crate::state::ProtocolState;
    use gsmlink_test_harness::{MockTransport, ScriptedModem};
    use gsmlink_vendor::models::sim800;

    async fn wait_for(
        events: &mut broadcast::Receiver<Event>,
        pred: impl Fn(&Event) -> bool,
    ) -> Event {
        loop {
            let event = events.recv().await.unwrap();
            if pred(&event) {
                return event;
            }
        }
    }

    fn spawn_with(modem: ScriptedModem) -> (SessionIo, broadcast::Receiver<Event>) {
        let io = SessionBuilder::new(sim800())
            .spawn(Box::new(MockTransport::new(modem)))
            .unwrap();
        let events = io.subscribe();
        (io, events)
    }

    #[tokio::test]
    async fn closed_channel_is_not_connected() {
        let (tx, rx) = mpsc::channel(32);
        drop(rx);
        let (events, _) = broadcast::channel(4);
        let io = SessionIo {
            tx,
            events,
            cancel: CancellationToken::new(),
            task: tokio::spawn(async {}),
        };
        assert!(matches!(io.status().await, Err(Error::NotConnected)));
    }

    #[tokio::test(start_paused = true)]
    async fn sms_round_trip_through_the_task() {
        let (io, mut events) = spawn_with(ScriptedModem::new());
        wait_for(&mut events, |e| *e == Event::Ready).await;

        io.send_text("+447700900123", "hello", 7).await.unwrap();
        let event = wait_for(&mut events, |e| {
            matches!(e, Event::SmsSendOk { .. } | Event::SmsSendFailed { .. })
        })
        .await;
        assert!(matches!(event, Event::SmsSendOk { id: 7, .. }));
        assert_eq!(io.status().await.unwrap().state, ProtocolState::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn incoming_call_is_broadcast() {
        let modem = ScriptedModem::new();
        let mock = MockTransport::new(modem);
        let handle = mock.modem();
        let io = SessionBuilder::new(sim800()).spawn(Box::new(mock)).unwrap();
        let mut events = io.subscribe();
        wait_for(&mut events, |e| *e == Event::Ready).await;

        handle
            .lock()
            .unwrap()
            .inject(b"\r\nRING\r\n\r\n+CLIP: \"+447700900456\",145,\"\",0,\"\",0\r\n");
        let event = wait_for(&mut events, |e| matches!(e, Event::Ring { .. })).await;
        let Event::Ring { call, .. } = event else {
            unreachable!()
        };
        io.hangup(call, Cause::NORMAL_CLEARING).await.unwrap();
        wait_for(&mut events, |e| {
            matches!(e, Event::Hangup { .. } | Event::HangupAck { .. })
        })
        .await;
        assert!(handle.lock().unwrap().count("ATH") >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_returns_transport() {
        let (io, mut events) = spawn_with(ScriptedModem::new());
        wait_for(&mut events, |e| *e == Event::Ready).await;
        let transport = io.shutdown().await.unwrap();
        assert!(transport.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn console_command_through_the_task() {
        let mut modem = ScriptedModem::new();
        modem.on("AT+CBC", "\r\n+CBC: 0,82,4012\r\n\r\nOK\r\n");
        let (io, mut events) = spawn_with(modem);
        wait_for(&mut events, |e| *e == Event::Ready).await;

        io.send_safe_at("AT+CBC").await.unwrap();
        let event = wait_for(&mut events, |e| matches!(e, Event::SafeAtResponse { .. })).await;
        assert_eq!(
            event,
            Event::SafeAtResponse {
                command: "AT+CBC".into(),
                lines: vec!["+CBC: 0,82,4012".into()],
                ok: true
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn refused_request_error_is_returned() {
        let (io, mut events) = spawn_with(ScriptedModem::new());
        wait_for(&mut events, |e| *e == Event::Ready).await;
        assert!(matches!(
            io.send_safe_at("ATD123;").await,
            Err(Error::InvalidParameter(_))
        ));
    }
}
