//! Deadline-ordered deferred tasks.
//!
//! [`Scheduler`] holds a bounded set of payloads, each due at an absolute
//! instant. It has no thread and no timer of its own: the owner asks for the
//! [`next_deadline`](Scheduler::next_deadline), sleeps until then, and pops
//! whatever is due. Tasks with equal deadlines fire in scheduling order.
//!
//! Cancelling a task that already fired or was already cancelled is a
//! no-op. When the table is full, [`schedule`](Scheduler::schedule) fails
//! with [`Error::SchedulerFull`] instead of dropping the task.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::{Duration, Instant};

use gsmlink_core::error::{Error, Result};

/// Handle of a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Bounded deadline queue.
#[derive(Debug)]
pub struct Scheduler<T> {
    queue: BTreeMap<(Instant, u64), T>,
    deadlines: HashMap<u64, Instant>,
    next_id: u64,
    capacity: usize,
}

impl<T> Scheduler<T> {
    /// Create a scheduler holding at most `capacity` live tasks.
    pub fn new(capacity: usize) -> Self {
        Scheduler {
            queue: BTreeMap::new(),
            deadlines: HashMap::new(),
            next_id: 0,
            capacity,
        }
    }

    /// Schedule `payload` to fire `after` from `now`.
    pub fn schedule(&mut self, now: Instant, after: Duration, payload: T) -> Result<TaskId> {
        if self.queue.len() >= self.capacity {
            return Err(Error::SchedulerFull {
                capacity: self.capacity,
            });
        }
        let id = self.next_id;
        self.next_id += 1;
        let deadline = now + after;
        self.queue.insert((deadline, id), payload);
        self.deadlines.insert(id, deadline);
        Ok(TaskId(id))
    }

    /// Cancel a task, returning its payload if it was still pending.
    pub fn cancel(&mut self, id: TaskId) -> Option<T> {
        let deadline = self.deadlines.remove(&id.0)?;
        self.queue.remove(&(deadline, id.0))
    }

    /// Cancel every pending task whose payload matches `pred`.
    ///
    /// Returns how many were cancelled.
    pub fn cancel_matching(&mut self, mut pred: impl FnMut(&T) -> bool) -> usize {
        let keys: Vec<(Instant, u64)> = self
            .queue
            .iter()
            .filter(|(_, payload)| pred(payload))
            .map(|(key, _)| *key)
            .collect();
        for key in &keys {
            self.queue.remove(key);
            self.deadlines.remove(&key.1);
        }
        keys.len()
    }

    /// Whether any pending task matches `pred`.
    pub fn contains(&self, mut pred: impl FnMut(&T) -> bool) -> bool {
        self.queue.values().any(|payload| pred(payload))
    }

    /// The earliest pending deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.queue.keys().next().map(|(deadline, _)| *deadline)
    }

    /// Deadline of a pending task.
    pub fn deadline_of(&self, id: TaskId) -> Option<Instant> {
        self.deadlines.get(&id.0).copied()
    }

    /// Id that the next scheduled task will receive.
    ///
    /// Passing it to [`pop_due_before`](Self::pop_due_before) limits a run
    /// to tasks that existed when the run started.
    pub fn horizon(&self) -> TaskId {
        TaskId(self.next_id)
    }

    /// Remove and return the earliest task due at `now`.
    pub fn pop_due(&mut self, now: Instant) -> Option<(TaskId, T)> {
        self.pop_due_before(now, TaskId(u64::MAX))
    }

    /// Like [`pop_due`](Self::pop_due), ignoring tasks scheduled at or
    /// after `horizon`.
    pub fn pop_due_before(&mut self, now: Instant, horizon: TaskId) -> Option<(TaskId, T)> {
        let key = *self
            .queue
            .range(..=(now, u64::MAX))
            .map(|(key, _)| key)
            .find(|(_, id)| *id < horizon.0)?;
        self.deadlines.remove(&key.1);
        let payload = self.queue.remove(&key)?;
        Some((TaskId(key.1), payload))
    }

    /// Fire every task due at `now`, in deadline order.
    ///
    /// Each task is removed before `f` sees it. Tasks scheduled from within
    /// `f` wait for the next run even when already due.
    pub fn run_due(&mut self, now: Instant, mut f: impl FnMut(&mut Self, TaskId, T)) -> usize {
        let horizon = self.horizon();
        let mut fired = 0;
        while let Some((id, payload)) = self.pop_due_before(now, horizon) {
            f(self, id, payload);
            fired += 1;
        }
        fired
    }

    /// Drop every pending task.
    pub fn clear(&mut self) {
        self.queue.clear();
        self.deadlines.clear();
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn run_due_fires_in_deadline_order() {
        let t0 = Instant::now();
        let mut sched = Scheduler::new(16);
        for (label, after) in [("a", 100), ("b", 50), ("c", 200), ("d", 50), ("e", 10)] {
            sched.schedule(t0, ms(after), label).unwrap();
        }

        let mut fired = Vec::new();
        let n = sched.run_due(t0 + ms(150), |_, _, label| fired.push(label));
        assert_eq!(n, 4);
        assert_eq!(fired, vec!["e", "b", "d", "a"]);
        assert_eq!(sched.len(), 1);
        assert_eq!(sched.next_deadline(), Some(t0 + ms(200)));
    }

    #[test]
    fn cancelled_task_never_fires() {
        let t0 = Instant::now();
        let mut sched = Scheduler::new(4);
        let a = sched.schedule(t0, ms(10), 1).unwrap();
        sched.schedule(t0, ms(20), 2).unwrap();
        assert_eq!(sched.cancel(a), Some(1));
        // Cancelling again is a no-op.
        assert_eq!(sched.cancel(a), None);

        let mut fired = Vec::new();
        sched.run_due(t0 + ms(100), |_, _, v| fired.push(v));
        assert_eq!(fired, vec![2]);
    }

    #[test]
    fn cancel_after_fire_is_noop() {
        let t0 = Instant::now();
        let mut sched = Scheduler::new(4);
        let id = sched.schedule(t0, ms(1), ()).unwrap();
        assert!(sched.pop_due(t0 + ms(1)).is_some());
        assert_eq!(sched.cancel(id), None);
    }

    #[test]
    fn full_scheduler_reports_capacity() {
        let t0 = Instant::now();
        let mut sched = Scheduler::new(2);
        sched.schedule(t0, ms(1), ()).unwrap();
        sched.schedule(t0, ms(2), ()).unwrap();
        let err = sched.schedule(t0, ms(3), ()).unwrap_err();
        assert!(matches!(err, Error::SchedulerFull { capacity: 2 }));
    }

    #[test]
    fn callback_may_reschedule_without_refiring() {
        let t0 = Instant::now();
        let mut sched = Scheduler::new(1);
        sched.schedule(t0, ms(5), 0u32).unwrap();

        let mut fired = 0;
        sched.run_due(t0 + ms(10), |s, _, n| {
            fired += 1;
            // The slot freed by this task is reusable, and the new task is
            // already due but waits for the next run.
            s.schedule(t0, ms(0), n + 1).unwrap();
        });
        assert_eq!(fired, 1);
        assert_eq!(sched.len(), 1);
        assert_eq!(sched.pop_due(t0 + ms(10)).map(|(_, n)| n), Some(1));
    }

    #[test]
    fn nothing_due_before_deadline() {
        let t0 = Instant::now();
        let mut sched = Scheduler::new(4);
        sched.schedule(t0, ms(50), ()).unwrap();
        assert!(sched.pop_due(t0 + ms(49)).is_none());
        assert!(sched.pop_due(t0 + ms(50)).is_some());
        assert!(sched.is_empty());
        assert_eq!(sched.next_deadline(), None);
    }

    #[test]
    fn cancel_matching_by_payload() {
        let t0 = Instant::now();
        let mut sched = Scheduler::new(8);
        sched.schedule(t0, ms(1), "poll").unwrap();
        sched.schedule(t0, ms(2), "poll").unwrap();
        sched.schedule(t0, ms(3), "watchdog").unwrap();
        assert_eq!(sched.cancel_matching(|p| *p == "poll"), 2);
        assert!(!sched.contains(|p| *p == "poll"));
        assert!(sched.contains(|p| *p == "watchdog"));
    }
}
