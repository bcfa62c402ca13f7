//! Debounced flush scheduling.
//!
//! [`DirtyScheduler`] is a pure state machine: it never sleeps and never
//! reads the clock. Callers pass `now` in and turn [`deadline`] into a timer
//! themselves, so every rule below is testable with literal instants.
//!
//! - Structural verdicts within one window coalesce into one flush.
//! - A flush that comes due while another is in flight is deferred until
//!   that flight settles.
//! - After `dispose` no flush ever comes due again; an in-flight flush is
//!   left to settle.
//!
//! [`deadline`]: DirtyScheduler::deadline

use std::time::Duration;

use graphsync_core::classifier::Verdict;
use tokio::time::Instant;

/// What the caller should do when the timer fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerOutcome {
    /// Save the current model now.
    Flush,
    /// A flush is in flight; re-evaluate when it settles.
    Deferred,
    /// Nothing is due (cancelled, rescheduled or disposed).
    NotDue,
}

#[derive(Debug)]
pub struct DirtyScheduler {
    debounce: Duration,
    deadline: Option<Instant>,
    in_flight: bool,
    deferred: bool,
    disposed: bool,
    /// Model revision at the last successful save (or clean hydration).
    saved_revision: Option<u64>,
}

impl DirtyScheduler {
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            deadline: None,
            in_flight: false,
            deferred: false,
            disposed: false,
            saved_revision: None,
        }
    }

    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    /// (Re)start the debounce window on a structural verdict.
    ///
    /// Returns whether the timer was armed.
    pub fn notify(&mut self, verdict: Verdict, now: Instant) -> bool {
        if self.disposed || verdict == Verdict::Noop {
            return false;
        }
        self.deadline = Some(now + self.debounce);
        true
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn on_timer(&mut self, now: Instant) -> TimerOutcome {
        match self.deadline {
            Some(deadline) if !self.disposed && now >= deadline => {
                self.deadline = None;
                if self.in_flight {
                    self.deferred = true;
                    TimerOutcome::Deferred
                } else {
                    TimerOutcome::Flush
                }
            }
            _ => TimerOutcome::NotDue,
        }
    }

    pub fn begin_flush(&mut self) {
        self.in_flight = true;
    }

    /// The in-flight flush resolved. Returns whether a deferred flush must
    /// be re-evaluated right away.
    pub fn settle(&mut self) -> bool {
        self.in_flight = false;
        std::mem::take(&mut self.deferred) && !self.disposed
    }

    pub fn mark_saved(&mut self, revision: u64) {
        self.saved_revision = Some(revision);
    }

    /// Whether the model moved since the last successful save.
    pub fn flush_needed(&self, revision: u64) -> bool {
        self.saved_revision != Some(revision)
    }

    /// Drop the pending timer and any deferred flush.
    pub fn cancel(&mut self) {
        self.deadline = None;
        self.deferred = false;
    }

    pub fn dispose(&mut self) {
        self.cancel();
        self.disposed = true;
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// A timer is armed or a flush is waiting on the in-flight one.
    pub fn has_pending(&self) -> bool {
        self.deadline.is_some() || self.deferred
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
