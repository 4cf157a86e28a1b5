//! Engine policy: timeouts, retry bounds, capacities and audio levels.
//!
//! Every value has the default the engine has always used; embedders
//! override them through [`SessionBuilder::config`](crate::SessionBuilder::config)
//! or, for the time values, at runtime with
//! [`Session::set_timer`](crate::Session::set_timer).

use std::fmt;
use std::time::Duration;

use gsmlink_core::error::{Error, Result};
use gsmlink_core::types::SmsMode;

/// Tunable engine parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Time to wait for the final result of a command.
    pub command_timeout: Duration,
    /// Re-sends of a failing bring-up command before giving up on it.
    pub command_retries: u32,
    /// Bring-up must reach ready within this time.
    pub bringup_watchdog: Duration,
    /// Restarts made at the fast cadence before slowing down.
    pub fast_rearm_attempts: u32,
    pub fast_rearm_interval: Duration,
    pub slow_rearm_interval: Duration,
    pub registration_poll_interval: Duration,
    /// Registration queries before bring-up starts over.
    pub registration_polls: u32,
    /// Submission attempts per SMS.
    pub sms_retries: u32,
    /// An SMS submission that takes longer than this is aborted.
    pub sms_stuck_timeout: Duration,
    /// Body slice size; `None` uses the vendor's.
    pub sms_chunk_size: Option<usize>,
    pub sms_chunk_delay: Duration,
    /// Pause after each command before the modem is expected to answer.
    pub settle_delay: Duration,
    pub hangup_timeout: Duration,
    pub ussd_timeout: Duration,
    pub operator_timeout: Duration,
    pub call_status_poll: Duration,
    /// Call status polls before an unanswered dial is given up.
    pub dial_retry_ticks: u32,
    pub call_waiting_timeout: Duration,
    pub signal_poll: Duration,
    /// Consecutive failed signal polls before a restart.
    pub health_failure_limit: u32,
    /// Firmware error results tolerated before a restart.
    pub firmware_error_limit: u32,
    pub pending_retry_interval: Duration,
    /// Readiness re-checks before a deferred request fails.
    pub pending_retries: u32,
    /// Requests allowed to wait behind each current request.
    pub pending_queue_limit: usize,
    pub scheduler_capacity: usize,
    pub framer_capacity: usize,
    pub outbox_capacity: usize,
    /// Format used by `send_text`.
    pub sms_mode: SmsMode,
    /// Data coding scheme sent with USSD requests.
    pub ussd_dcs: u8,
    pub speaker_volume: u8,
    pub mic_volume: u8,
    pub side_tone: u8,
    /// SIM slot selected on dual-SIM modules.
    pub sim_slot: u8,
    /// PIN entered automatically when the SIM asks for one.
    pub pin: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            command_timeout: Duration::from_secs(5),
            command_retries: 3,
            bringup_watchdog: Duration::from_secs(60),
            fast_rearm_attempts: 3,
            fast_rearm_interval: Duration::from_secs(5),
            slow_rearm_interval: Duration::from_secs(60),
            registration_poll_interval: Duration::from_secs(2),
            registration_polls: 90,
            sms_retries: 3,
            sms_stuck_timeout: Duration::from_secs(30),
            sms_chunk_size: None,
            sms_chunk_delay: Duration::from_millis(20),
            settle_delay: Duration::from_millis(10),
            hangup_timeout: Duration::from_secs(5),
            ussd_timeout: Duration::from_secs(30),
            operator_timeout: Duration::from_secs(120),
            call_status_poll: Duration::from_millis(500),
            dial_retry_ticks: 85,
            call_waiting_timeout: Duration::from_secs(20),
            signal_poll: Duration::from_secs(30),
            health_failure_limit: 3,
            firmware_error_limit: 3,
            pending_retry_interval: Duration::from_secs(1),
            pending_retries: 30,
            pending_queue_limit: 16,
            scheduler_capacity: 128,
            framer_capacity: 1024,
            outbox_capacity: 4096,
            sms_mode: SmsMode::Pdu,
            ussd_dcs: 15,
            speaker_volume: 80,
            mic_volume: 10,
            side_tone: 0,
            sim_slot: 0,
            pin: None,
        }
    }
}

impl EngineConfig {
    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        let nonzero = [
            ("scheduler_capacity", self.scheduler_capacity),
            ("framer_capacity", self.framer_capacity),
            ("outbox_capacity", self.outbox_capacity),
        ];
        for (name, value) in nonzero {
            if value == 0 {
                return Err(Error::InvalidParameter(format!("{name} must be non-zero")));
            }
        }
        if self.sms_chunk_size == Some(0) {
            return Err(Error::InvalidParameter(
                "sms_chunk_size must be non-zero".into(),
            ));
        }
        if self.command_timeout.is_zero() {
            return Err(Error::InvalidParameter(
                "command_timeout must be non-zero".into(),
            ));
        }
        if self.sms_retries == 0 {
            return Err(Error::InvalidParameter("sms_retries must be at least 1".into()));
        }
        if self.speaker_volume > 100 {
            return Err(Error::InvalidParameter(format!(
                "speaker_volume {} out of range (0-100)",
                self.speaker_volume
            )));
        }
        if self.mic_volume > 15 {
            return Err(Error::InvalidParameter(format!(
                "mic_volume {} out of range (0-15)",
                self.mic_volume
            )));
        }
        Ok(())
    }

    /// Current value of a timer.
    pub fn timer(&self, kind: TimerKind) -> Duration {
        match kind {
            TimerKind::CommandTimeout => self.command_timeout,
            TimerKind::BringupWatchdog => self.bringup_watchdog,
            TimerKind::FastRearm => self.fast_rearm_interval,
            TimerKind::SlowRearm => self.slow_rearm_interval,
            TimerKind::RegistrationPoll => self.registration_poll_interval,
            TimerKind::SmsStuck => self.sms_stuck_timeout,
            TimerKind::SmsChunkDelay => self.sms_chunk_delay,
            TimerKind::Settle => self.settle_delay,
            TimerKind::Hangup => self.hangup_timeout,
            TimerKind::Ussd => self.ussd_timeout,
            TimerKind::OperatorList => self.operator_timeout,
            TimerKind::CallStatusPoll => self.call_status_poll,
            TimerKind::CallWaiting => self.call_waiting_timeout,
            TimerKind::SignalPoll => self.signal_poll,
            TimerKind::PendingRetry => self.pending_retry_interval,
        }
    }

    /// Replace the value of a timer.
    pub fn set_timer(&mut self, kind: TimerKind, value: Duration) {
        let slot = match kind {
            TimerKind::CommandTimeout => &mut self.command_timeout,
            TimerKind::BringupWatchdog => &mut self.bringup_watchdog,
            TimerKind::FastRearm => &mut self.fast_rearm_interval,
            TimerKind::SlowRearm => &mut self.slow_rearm_interval,
            TimerKind::RegistrationPoll => &mut self.registration_poll_interval,
            TimerKind::SmsStuck => &mut self.sms_stuck_timeout,
            TimerKind::SmsChunkDelay => &mut self.sms_chunk_delay,
            TimerKind::Settle => &mut self.settle_delay,
            TimerKind::Hangup => &mut self.hangup_timeout,
            TimerKind::Ussd => &mut self.ussd_timeout,
            TimerKind::OperatorList => &mut self.operator_timeout,
            TimerKind::CallStatusPoll => &mut self.call_status_poll,
            TimerKind::CallWaiting => &mut self.call_waiting_timeout,
            TimerKind::SignalPoll => &mut self.signal_poll,
            TimerKind::PendingRetry => &mut self.pending_retry_interval,
        };
        *slot = value;
    }
}

/// Time values exposed through `get_timer`/`set_timer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    CommandTimeout,
    BringupWatchdog,
    FastRearm,
    SlowRearm,
    RegistrationPoll,
    SmsStuck,
    SmsChunkDelay,
    Settle,
    Hangup,
    Ussd,
    OperatorList,
    CallStatusPoll,
    CallWaiting,
    SignalPoll,
    PendingRetry,
}

impl TimerKind {
    pub const ALL: [TimerKind; 15] = [
        TimerKind::CommandTimeout,
        TimerKind::BringupWatchdog,
        TimerKind::FastRearm,
        TimerKind::SlowRearm,
        TimerKind::RegistrationPoll,
        TimerKind::SmsStuck,
        TimerKind::SmsChunkDelay,
        TimerKind::Settle,
        TimerKind::Hangup,
        TimerKind::Ussd,
        TimerKind::OperatorList,
        TimerKind::CallStatusPoll,
        TimerKind::CallWaiting,
        TimerKind::SignalPoll,
        TimerKind::PendingRetry,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            TimerKind::CommandTimeout => "command-timeout",
            TimerKind::BringupWatchdog => "bringup-watchdog",
            TimerKind::FastRearm => "fast-rearm",
            TimerKind::SlowRearm => "slow-rearm",
            TimerKind::RegistrationPoll => "registration-poll",
            TimerKind::SmsStuck => "sms-stuck",
            TimerKind::SmsChunkDelay => "sms-chunk-delay",
            TimerKind::Settle => "settle",
            TimerKind::Hangup => "hangup",
            TimerKind::Ussd => "ussd",
            TimerKind::OperatorList => "operator-list",
            TimerKind::CallStatusPoll => "call-status-poll",
            TimerKind::CallWaiting => "call-waiting",
            TimerKind::SignalPoll => "signal-poll",
            TimerKind::PendingRetry => "pending-retry",
        }
    }
}

impl fmt::Display for TimerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
