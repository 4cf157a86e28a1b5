//! gsmlink-engine: the AT protocol engine.
//!
//! A [`Session`] drives one modem ("span") from power-up to the ready
//! state and then runs calls, SMS, USSD, operator queries and health
//! supervision on top of it. The session is synchronous and performs no
//! I/O: bytes go in through [`Session::feed`], timers run in
//! [`Session::poll`], frames to write come out of
//! [`Session::take_outbound`], and outcomes come out of
//! [`Session::poll_event`].
//!
//! [`io::spawn_session_task`] wraps a session and a
//! [`Transport`](gsmlink_core::Transport) in a tokio task for applications
//! that do not want to run the loop themselves.
//!
//! # Example
//!
//! ```no_run
//! use gsmlink_engine::SessionBuilder;
//! use gsmlink_vendor::models::sim800;
//!
//! let mut session = SessionBuilder::new(sim800()).span_id(1).build().unwrap();
//! session.start();
//! for frame in session.take_outbound() {
//!     // write frame.bytes to the modem, then wait frame.pause_after
//! #   let _ = frame;
//! }
//! ```

/// Log at `debug` when the session's debug flags include `$flag`, at
/// `trace` otherwise.
macro_rules! flagged {
    ($session:expr, $flag:expr, $($arg:tt)+) => {
        if $session.debug.contains($flag) {
            tracing::debug!($($arg)+)
        } else {
            tracing::trace!($($arg)+)
        }
    };
}

pub mod builder;
pub mod calls;
pub mod clock;
pub mod config;
pub mod io;
pub mod pending;
pub mod scheduler;
pub mod session;
pub mod state;

mod bringup;
mod call_flow;
mod health;
mod operator;
mod safe_at;
mod sms;
mod ussd;

pub use builder::SessionBuilder;
pub use calls::{Call, CallRegistry, HangupAction};
pub use clock::{Clock, ManualClock, MonotonicClock, TokioClock};
pub use config::{EngineConfig, TimerKind};
pub use io::{SessionIo, spawn_session_task};
pub use pending::{PendingStore, Request, RequestKind};
pub use scheduler::{Scheduler, TaskId};
pub use session::{CallSummary, Session, SessionStatus};
pub use state::ProtocolState;
