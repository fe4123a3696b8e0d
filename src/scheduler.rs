//! Debounce/throttle state machine for watch mode
//!
//! [`SaveCycle`] decides *when* a save runs. It owns no timers and reads no
//! clock: every event comes with the current instant and the machine answers
//! with [`Command`]s for the driver to carry out. This keeps the whole
//! policy testable without sleeping.
//!
//! ## Guarantees
//!
//! - `StartSave` is only ever issued on entering [`SaveState::Saving`], and
//!   nothing re-enters `Saving` while a save is in flight.
//! - After a successful save completing at `t0`, no save starts before
//!   `t0 + throttle`.
//! - A change that arrives at any point is eventually covered by a save:
//!   changes recorded during a save send the machine back to debouncing,
//!   and a deferred save always flushes.
//! - A failed save keeps the pending flag and leaves the throttle baseline
//!   alone, so it does not impose a fresh wait.

use std::time::{Duration, Instant};
use tracing::trace;

/// Default quiet period before a save is considered
pub const DEFAULT_SETTLE: Duration = Duration::from_secs(2);
/// Default minimum interval between completed saves
pub const DEFAULT_THROTTLE: Duration = Duration::from_secs(30);

/// Scheduler states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveState {
    /// Nothing to do
    Idle,
    /// Waiting for a quiet period
    Debouncing,
    /// Settled, waiting for the minimum interval to pass
    WaitingForThrottle,
    /// A save is in flight
    Saving,
    /// Stopped; ignores everything
    Stopped,
}

/// Inputs to the machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerEvent {
    /// A watched path changed
    Change,
    /// The armed timer expired
    TimerFired,
    /// The save uploaded a new snapshot
    SaveSucceeded,
    /// The save found nothing new to upload
    SaveSkipped,
    /// The save failed
    SaveFailed,
    /// Stop was requested
    Stop,
}

/// Actions the driver must carry out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Arm the single timer for this deadline, replacing any armed one
    ArmTimer(Instant),
    /// Disarm the timer
    CancelTimer,
    /// Run one save
    StartSave,
}

/// State of one watched profile's save cycle
#[derive(Debug, Clone)]
pub struct SaveCycle {
    state: SaveState,
    settle: Duration,
    throttle: Duration,
    last_save: Option<Instant>,
    pending: bool,
    change_seen: bool,
    save_count: u64,
    stop_requested: bool,
}

impl Default for SaveCycle {
    fn default() -> Self {
        Self::new(DEFAULT_SETTLE, DEFAULT_THROTTLE)
    }
}

impl SaveCycle {
    /// Create an idle cycle
    pub fn new(settle: Duration, throttle: Duration) -> Self {
        Self {
            state: SaveState::Idle,
            settle,
            throttle,
            last_save: None,
            pending: false,
            change_seen: false,
            save_count: 0,
            stop_requested: false,
        }
    }

    /// Current state
    pub fn state(&self) -> SaveState {
        self.state
    }

    /// Completion time of the last successful save
    pub fn last_save(&self) -> Option<Instant> {
        self.last_save
    }

    /// Whether observed changes have not yet been saved
    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// Whether a change arrived since the current wait or save began
    pub fn change_seen(&self) -> bool {
        self.change_seen
    }

    /// Number of successful saves
    pub fn save_count(&self) -> u64 {
        self.save_count
    }

    /// Whether the machine has reached its terminal state
    pub fn is_stopped(&self) -> bool {
        self.state == SaveState::Stopped
    }

    /// Settle duration
    pub fn settle(&self) -> Duration {
        self.settle
    }

    /// Throttle interval
    pub fn throttle(&self) -> Duration {
        self.throttle
    }

    /// Feed one event and collect the resulting commands
    pub fn handle(&mut self, event: SchedulerEvent, now: Instant) -> Vec<Command> {
        let before = self.state;
        let commands = self.transition(event, now);
        trace!("{:?} + {:?} -> {:?} {:?}", before, event, self.state, commands);
        commands
    }

    fn transition(&mut self, event: SchedulerEvent, now: Instant) -> Vec<Command> {
        use SaveState::*;
        use SchedulerEvent::*;

        match (self.state, event) {
            (Stopped, _) => vec![],

            (Saving, Stop) => {
                self.stop_requested = true;
                vec![Command::CancelTimer]
            }
            (_, Stop) => {
                self.state = Stopped;
                vec![Command::CancelTimer]
            }

            (Idle, Change) | (Debouncing, Change) => {
                self.state = Debouncing;
                self.pending = true;
                vec![Command::ArmTimer(now + self.settle)]
            }
            (WaitingForThrottle, Change) => {
                self.change_seen = true;
                self.pending = true;
                vec![]
            }
            (Saving, Change) => {
                if !self.stop_requested {
                    self.change_seen = true;
                }
                vec![]
            }

            (Debouncing, TimerFired) => match self.throttle_deadline() {
                Some(deadline) if now < deadline => {
                    self.state = WaitingForThrottle;
                    self.change_seen = false;
                    vec![Command::ArmTimer(deadline)]
                }
                _ => self.start_save(),
            },
            (WaitingForThrottle, TimerFired) => self.start_save(),
            (_, TimerFired) => vec![],

            (Saving, SaveSucceeded) => {
                self.last_save = Some(now);
                self.pending = false;
                self.save_count += 1;
                self.finish_save(now)
            }
            (Saving, SaveSkipped) => {
                self.pending = false;
                self.finish_save(now)
            }
            (Saving, SaveFailed) => self.finish_save(now),
            (_, SaveSucceeded | SaveSkipped | SaveFailed) => vec![],
        }
    }

    fn throttle_deadline(&self) -> Option<Instant> {
        self.last_save.map(|last| last + self.throttle)
    }

    fn start_save(&mut self) -> Vec<Command> {
        self.state = SaveState::Saving;
        self.change_seen = false;
        vec![Command::StartSave]
    }

    fn finish_save(&mut self, now: Instant) -> Vec<Command> {
        if self.stop_requested {
            self.state = SaveState::Stopped;
            return vec![];
        }
        if self.change_seen {
            self.change_seen = false;
            self.pending = true;
            self.state = SaveState::Debouncing;
            return vec![Command::ArmTimer(now + self.settle)];
        }
        self.state = SaveState::Idle;
        vec![]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SchedulerEvent::*;

    const D: Duration = Duration::from_secs(2);
    const T: Duration = Duration::from_secs(30);

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn test_burst_of_changes_starts_one_save() {
        let t0 = Instant::now();
        let mut cycle = SaveCycle::new(D, T);

        let mut saves = 0;
        for i in 0..20u64 {
            let now = t0 + Duration::from_millis(i * 50);
            let cmds = cycle.handle(Change, now);
            assert_eq!(cmds, vec![Command::ArmTimer(now + D)]);
        }
        assert_eq!(cycle.state(), SaveState::Debouncing);

        let fired = t0 + Duration::from_millis(950) + D;
        saves += cycle
            .handle(TimerFired, fired)
            .iter()
            .filter(|c| **c == Command::StartSave)
            .count();
        assert_eq!(saves, 1);
        assert_eq!(cycle.state(), SaveState::Saving);
    }

    #[test]
    fn test_first_save_is_not_throttled() {
        let t0 = Instant::now();
        let mut cycle = SaveCycle::new(D, T);
        cycle.handle(Change, t0);
        assert_eq!(cycle.handle(TimerFired, t0 + D), vec![Command::StartSave]);
        cycle.handle(SaveSucceeded, t0 + secs(3));
        assert_eq!(cycle.state(), SaveState::Idle);
        assert_eq!(cycle.save_count(), 1);
        assert_eq!(cycle.last_save(), Some(t0 + secs(3)));
        assert!(!cycle.is_pending());
    }

    #[test]
    fn test_throttle_defers_to_exact_deadline() {
        let t0 = Instant::now();
        let mut cycle = SaveCycle::new(D, T);
        cycle.handle(Change, t0);
        cycle.handle(TimerFired, t0 + D);
        cycle.handle(SaveSucceeded, t0 + secs(3));

        cycle.handle(Change, t0 + secs(5));
        let cmds = cycle.handle(TimerFired, t0 + secs(7));
        assert_eq!(cmds, vec![Command::ArmTimer(t0 + secs(3) + T)]);
        assert_eq!(cycle.state(), SaveState::WaitingForThrottle);

        // Changes while throttled are recorded but do not move the deadline
        assert!(cycle.handle(Change, t0 + secs(10)).is_empty());
        assert!(cycle.change_seen());

        assert_eq!(
            cycle.handle(TimerFired, t0 + secs(33)),
            vec![Command::StartSave]
        );
    }

    #[test]
    fn test_deferred_save_flushes_without_new_change() {
        let t0 = Instant::now();
        let mut cycle = SaveCycle::new(D, T);
        cycle.handle(Change, t0);
        cycle.handle(TimerFired, t0 + D);
        cycle.handle(SaveSucceeded, t0 + D);

        cycle.handle(Change, t0 + secs(4));
        cycle.handle(TimerFired, t0 + secs(6));
        assert!(!cycle.change_seen());
        assert_eq!(
            cycle.handle(TimerFired, t0 + D + T),
            vec![Command::StartSave]
        );
    }

    #[test]
    fn test_settle_after_throttle_window_saves_immediately() {
        let t0 = Instant::now();
        let mut cycle = SaveCycle::new(D, T);
        cycle.handle(Change, t0);
        cycle.handle(TimerFired, t0 + D);
        cycle.handle(SaveSucceeded, t0 + D);

        cycle.handle(Change, t0 + secs(60));
        assert_eq!(
            cycle.handle(TimerFired, t0 + secs(62)),
            vec![Command::StartSave]
        );
    }

    #[test]
    fn test_changes_during_save_are_saved_later() {
        let t0 = Instant::now();
        let mut cycle = SaveCycle::new(D, T);
        cycle.handle(Change, t0);
        cycle.handle(TimerFired, t0 + D);

        assert!(cycle.handle(Change, t0 + secs(3)).is_empty());
        assert!(cycle.handle(TimerFired, t0 + secs(3)).is_empty());
        assert_eq!(cycle.state(), SaveState::Saving);

        let done = t0 + secs(4);
        assert_eq!(
            cycle.handle(SaveSucceeded, done),
            vec![Command::ArmTimer(done + D)]
        );
        assert_eq!(cycle.state(), SaveState::Debouncing);
        assert!(cycle.is_pending());

        // Settles well inside the throttle window, so it waits for the floor
        assert_eq!(
            cycle.handle(TimerFired, done + D),
            vec![Command::ArmTimer(done + T)]
        );
    }

    #[test]
    fn test_failed_save_keeps_pending_and_baseline() {
        let t0 = Instant::now();
        let mut cycle = SaveCycle::new(D, T);
        cycle.handle(Change, t0);
        cycle.handle(TimerFired, t0 + D);
        cycle.handle(SaveSucceeded, t0 + D);
        let baseline = cycle.last_save();

        cycle.handle(Change, t0 + secs(40));
        cycle.handle(TimerFired, t0 + secs(42));
        assert!(cycle.handle(SaveFailed, t0 + secs(43)).is_empty());

        assert_eq!(cycle.state(), SaveState::Idle);
        assert!(cycle.is_pending());
        assert_eq!(cycle.last_save(), baseline);
        assert_eq!(cycle.save_count(), 1);

        // The next attempt is not held back by the failure
        cycle.handle(Change, t0 + secs(44));
        assert_eq!(
            cycle.handle(TimerFired, t0 + secs(46)),
            vec![Command::StartSave]
        );
    }

    #[test]
    fn test_skipped_save_leaves_baseline_and_counter() {
        let t0 = Instant::now();
        let mut cycle = SaveCycle::new(D, T);
        cycle.handle(Change, t0);
        cycle.handle(TimerFired, t0 + D);
        cycle.handle(SaveSkipped, t0 + secs(3));

        assert_eq!(cycle.state(), SaveState::Idle);
        assert!(!cycle.is_pending());
        assert_eq!(cycle.last_save(), None);
        assert_eq!(cycle.save_count(), 0);
    }

    #[test]
    fn test_stop_waits_for_inflight_save() {
        let t0 = Instant::now();
        let mut cycle = SaveCycle::new(D, T);
        cycle.handle(Change, t0);
        cycle.handle(TimerFired, t0 + D);

        assert_eq!(cycle.handle(Stop, t0 + secs(3)), vec![Command::CancelTimer]);
        assert_eq!(cycle.state(), SaveState::Saving);
        assert!(cycle.handle(Change, t0 + secs(3)).is_empty());

        assert!(cycle.handle(SaveSucceeded, t0 + secs(4)).is_empty());
        assert!(cycle.is_stopped());
        assert_eq!(cycle.save_count(), 1);
    }

    #[test]
    fn test_stopped_ignores_everything() {
        let t0 = Instant::now();
        let mut cycle = SaveCycle::new(D, T);
        cycle.handle(Change, t0);
        assert_eq!(cycle.handle(Stop, t0), vec![Command::CancelTimer]);
        for event in [Change, TimerFired, SaveSucceeded, SaveFailed, Stop] {
            assert!(cycle.handle(event, t0 + secs(1)).is_empty());
        }
        assert!(cycle.is_stopped());
    }

    #[test]
    fn test_stale_events_are_ignored() {
        let t0 = Instant::now();
        let mut cycle = SaveCycle::new(D, T);
        assert!(cycle.handle(TimerFired, t0).is_empty());
        assert!(cycle.handle(SaveSucceeded, t0).is_empty());
        assert_eq!(cycle.state(), SaveState::Idle);
        assert_eq!(cycle.save_count(), 0);
    }
}
