//! Two-Phase Event Scheduler
//!
//! Discrete-event clock that drives every cycle-accurate component in lock-step
//! with the host bus. Each cycle has two half-cycles (PHI1, PHI2); time is kept
//! internally in half-cycles so that PHI1 events sort before PHI2 events of the
//! same cycle.
//!
//! Features:
//! - Relative and absolute scheduling on either phase
//! - Stable (insertion) ordering for events due at the same half-cycle
//! - Cancellation at any time, including from inside a firing handler
//! - Handlers may re-arm themselves or schedule other events while firing
//! - Handler errors abort the clocking call and are returned unchanged

use crate::{Result, SidError};
use std::collections::VecDeque;
use std::fmt;
use tracing::{trace, warn};

/// Bus half-cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// First half-cycle (the CPU-idle phase)
    Phi1,
    /// Second half-cycle (the CPU bus phase)
    Phi2,
}

impl Phase {
    #[inline]
    fn bit(self) -> u64 {
        match self {
            Phase::Phi1 => 0,
            Phase::Phi2 => 1,
        }
    }
}

/// Handle of a registered event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventId(u32);

impl EventId {
    /// Raw handle index
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Receiver of fired events
///
/// The scheduler only stores handles; whoever drives it supplies the context
/// that knows what each handle means. The handler gets the scheduler back so it
/// can re-arm itself or schedule further work.
pub trait EventContext {
    /// Handle one fired event
    fn handle_event(&mut self, scheduler: &mut EventScheduler, event: EventId) -> Result<()>;
}

impl<F> EventContext for F
where
    F: FnMut(&mut EventScheduler, EventId) -> Result<()>,
{
    fn handle_event(&mut self, scheduler: &mut EventScheduler, event: EventId) -> Result<()> {
        self(scheduler, event)
    }
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    /// Trigger time in half-cycles
    time: u64,
    event: EventId,
}

/// Discrete-event, two-phase clock
pub struct EventScheduler {
    /// Current time in half-cycles (`2 * cycle + phase`)
    current_time: u64,
    /// Pending entries ordered by trigger time, FIFO among equal times
    queue: VecDeque<Entry>,
    /// Diagnostic names, indexed by `EventId`
    names: Vec<String>,
}

impl EventScheduler {
    /// Create an empty scheduler at cycle 0, PHI1
    pub fn new() -> Self {
        EventScheduler {
            current_time: 0,
            queue: VecDeque::new(),
            names: Vec::new(),
        }
    }

    /// Register a new event and return its handle
    pub fn register(&mut self, name: impl Into<String>) -> EventId {
        let id = EventId(self.names.len() as u32);
        self.names.push(name.into());
        id
    }

    /// Diagnostic name of an event
    pub fn name(&self, event: EventId) -> &str {
        self.names
            .get(event.index())
            .map(String::as_str)
            .unwrap_or("<unregistered>")
    }

    /// Schedule `event` on the next occurrence of `phase`, plus `cycles` cycles
    ///
    /// With `cycles == 0` and `phase` equal to the current phase the event is due
    /// immediately. An event that is already pending is moved.
    pub fn schedule(&mut self, event: EventId, cycles: u64, phase: Phase) {
        let align = (self.current_time & 1) ^ phase.bit();
        let time = (cycles << 1) + self.current_time + align;
        self.insert(event, time);
    }

    /// Schedule `event` at an absolute cycle, clamped to now if already past
    pub fn schedule_absolute(&mut self, event: EventId, cycle: u64, phase: Phase) {
        let mut time = (cycle << 1) + phase.bit();
        if time < self.current_time {
            warn!(
                event = self.name(event),
                cycle,
                now = self.current_time >> 1,
                "absolute schedule in the past, clamped to now"
            );
            time = self.current_time;
        }
        self.insert(event, time);
    }

    fn insert(&mut self, event: EventId, time: u64) {
        self.cancel(event);
        // after every entry due at or before `time`, so ties keep insertion order
        let pos = self.queue.partition_point(|e| e.time <= time);
        self.queue.insert(pos, Entry { time, event });
        trace!(event = self.name(event), time, "scheduled");
    }

    /// Remove a pending event without firing it
    ///
    /// Returns `true` if the event was pending.
    pub fn cancel(&mut self, event: EventId) -> bool {
        match self.queue.iter().position(|e| e.event == event) {
            Some(pos) => {
                self.queue.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Is the event currently scheduled?
    pub fn is_pending(&self, event: EventId) -> bool {
        self.queue.iter().any(|e| e.event == event)
    }

    /// Current cycle count as seen from `phase`
    ///
    /// While in PHI2, the next PHI1 already belongs to the following cycle.
    #[inline]
    pub fn time(&self, phase: Phase) -> u64 {
        let adjust = match phase {
            Phase::Phi1 => 1,
            Phase::Phi2 => 0,
        };
        (self.current_time + adjust) >> 1
    }

    /// Current phase
    #[inline]
    pub fn phase(&self) -> Phase {
        if self.current_time & 1 == 0 {
            Phase::Phi1
        } else {
            Phase::Phi2
        }
    }

    /// Current cycle as seen from PHI2
    #[inline]
    pub fn now_cycles(&self) -> u64 {
        self.time(Phase::Phi2)
    }

    /// Cycle at which the next pending event fires
    pub fn next_event_cycle(&self) -> Option<u64> {
        self.queue.front().map(|e| e.time >> 1)
    }

    /// Number of pending events
    pub fn pending_count(&self) -> usize {
        self.queue.len()
    }

    /// Advance exactly one cycle, firing everything that falls due
    pub fn clock<C: EventContext + ?Sized>(&mut self, ctx: &mut C) -> Result<()> {
        let limit = self.current_time + 2;
        self.fire_before(limit, ctx)?;
        self.current_time = limit;
        Ok(())
    }

    /// Jump to the next pending event and fire it
    ///
    /// Returns `false` if nothing was pending.
    pub fn step<C: EventContext + ?Sized>(&mut self, ctx: &mut C) -> Result<bool> {
        match self.queue.pop_front() {
            Some(entry) => {
                self.fire(entry, ctx)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Fire every event due before `cycle` and leave time at `cycle` (PHI1)
    pub fn run_until<C: EventContext + ?Sized>(&mut self, cycle: u64, ctx: &mut C) -> Result<()> {
        let limit = cycle << 1;
        self.fire_before(limit, ctx)?;
        self.current_time = self.current_time.max(limit);
        Ok(())
    }

    fn fire_before<C: EventContext + ?Sized>(&mut self, limit: u64, ctx: &mut C) -> Result<()> {
        while let Some(entry) = self.queue.front().copied() {
            if entry.time >= limit {
                break;
            }
            self.queue.pop_front();
            self.fire(entry, ctx)?;
        }
        Ok(())
    }

    fn fire<C: EventContext + ?Sized>(&mut self, entry: Entry, ctx: &mut C) -> Result<()> {
        if entry.time < self.current_time {
            return Err(SidError::Scheduler(format!(
                "event '{}' due at half-cycle {} but time is already {}",
                self.name(entry.event),
                entry.time,
                self.current_time
            )));
        }
        self.current_time = entry.time;
        ctx.handle_event(self, entry.event)
    }

    /// Drop all pending events and rewind to cycle 0
    pub fn reset(&mut self) {
        self.queue.clear();
        self.current_time = 0;
    }
}

impl Default for EventScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pending: Vec<(&str, u64)> = self
            .queue
            .iter()
            .map(|e| (self.name(e.event), e.time))
            .collect();
        f.debug_struct("EventScheduler")
            .field("current_time", &self.current_time)
            .field("pending", &pending)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder(log: &mut Vec<(EventId, u64, Phase)>) -> impl FnMut(&mut EventScheduler, EventId) -> Result<()> + '_ {
        move |s: &mut EventScheduler, id: EventId| {
            log.push((id, s.time(Phase::Phi2), s.phase()));
            Ok(())
        }
    }

    #[test]
    fn test_schedule_fires_in_time_order() {
        let mut s = EventScheduler::new();
        let a = s.register("a");
        let b = s.register("b");
        s.schedule(a, 5, Phase::Phi1);
        s.schedule(b, 2, Phase::Phi1);

        let mut log = Vec::new();
        {
            let mut ctx = recorder(&mut log);
            for _ in 0..10 {
                s.clock(&mut ctx).unwrap();
            }
        }
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].0, b);
        assert_eq!(log[0].1, 2);
        assert_eq!(log[1].0, a);
        assert_eq!(log[1].1, 5);
    }

    #[test]
    fn test_phase1_before_phase2_same_cycle() {
        let mut s = EventScheduler::new();
        let late = s.register("late");
        let early = s.register("early");
        s.schedule(late, 3, Phase::Phi2);
        s.schedule(early, 3, Phase::Phi1);

        let mut log = Vec::new();
        {
            let mut ctx = recorder(&mut log);
            s.run_until(10, &mut ctx).unwrap();
        }
        assert_eq!(log[0].0, early);
        assert_eq!(log[0].2, Phase::Phi1);
        assert_eq!(log[1].0, late);
        assert_eq!(log[1].2, Phase::Phi2);
    }

    #[test]
    fn test_ties_fire_in_insertion_order() {
        let mut s = EventScheduler::new();
        let ids: Vec<EventId> = (0..4).map(|i| s.register(format!("e{i}"))).collect();
        for &id in &ids {
            s.schedule(id, 7, Phase::Phi2);
        }
        let mut fired = Vec::new();
        let mut ctx = |_: &mut EventScheduler, id: EventId| -> Result<()> {
            fired.push(id);
            Ok(())
        };
        s.run_until(8, &mut ctx).unwrap();
        assert_eq!(fired, ids);
    }

    #[test]
    fn test_clock_advances_one_cycle() {
        let mut s = EventScheduler::new();
        let mut ctx = |_: &mut EventScheduler, _: EventId| -> Result<()> { Ok(()) };
        assert_eq!(s.time(Phase::Phi2), 0);
        s.clock(&mut ctx).unwrap();
        s.clock(&mut ctx).unwrap();
        assert_eq!(s.time(Phase::Phi2), 2);
        assert_eq!(s.phase(), Phase::Phi1);
    }

    #[test]
    fn test_time_phase_adjustment() {
        let mut s = EventScheduler::new();
        let e = s.register("e");
        s.schedule(e, 4, Phase::Phi2);
        let mut seen = None;
        let mut ctx = |s: &mut EventScheduler, _: EventId| -> Result<()> {
            seen = Some((s.time(Phase::Phi1), s.time(Phase::Phi2)));
            Ok(())
        };
        s.step(&mut ctx).unwrap();
        // in PHI2 of cycle 4 the next PHI1 belongs to cycle 5
        assert_eq!(seen, Some((5, 4)));
    }

    #[test]
    fn test_handler_can_rearm_itself() {
        let mut s = EventScheduler::new();
        let tick = s.register("tick");
        s.schedule(tick, 0, Phase::Phi2);
        let mut count = 0;
        let mut ctx = |s: &mut EventScheduler, id: EventId| -> Result<()> {
            count += 1;
            s.schedule(id, 10, Phase::Phi2);
            Ok(())
        };
        s.run_until(100, &mut ctx).unwrap();
        assert_eq!(count, 10);
        assert!(s.is_pending(tick));
    }

    #[test]
    fn test_cancel_prevents_firing() {
        let mut s = EventScheduler::new();
        let a = s.register("a");
        let b = s.register("b");
        s.schedule(a, 3, Phase::Phi1);
        s.schedule(b, 3, Phase::Phi1);
        assert!(s.cancel(a));
        assert!(!s.cancel(a));
        assert!(!s.is_pending(a));

        let mut fired = Vec::new();
        let mut ctx = |_: &mut EventScheduler, id: EventId| -> Result<()> {
            fired.push(id);
            Ok(())
        };
        s.run_until(10, &mut ctx).unwrap();
        assert_eq!(fired, vec![b]);
    }

    #[test]
    fn test_cancel_from_inside_handler() {
        let mut s = EventScheduler::new();
        let first = s.register("first");
        let victim = s.register("victim");
        s.schedule(first, 1, Phase::Phi1);
        s.schedule(victim, 1, Phase::Phi1);
        let mut fired = Vec::new();
        let mut ctx = |s: &mut EventScheduler, id: EventId| -> Result<()> {
            fired.push(id);
            if id == first {
                s.cancel(victim);
            }
            Ok(())
        };
        s.run_until(5, &mut ctx).unwrap();
        assert_eq!(fired, vec![first]);
    }

    #[test]
    fn test_schedule_absolute_clamps_past() {
        let mut s = EventScheduler::new();
        let e = s.register("e");
        let mut ctx = |_: &mut EventScheduler, _: EventId| -> Result<()> { Ok(()) };
        s.run_until(50, &mut ctx).unwrap();
        s.schedule_absolute(e, 10, Phase::Phi1);
        assert_eq!(s.next_event_cycle(), Some(50));

        let mut fired_at = None;
        let mut ctx = |s: &mut EventScheduler, _: EventId| -> Result<()> {
            fired_at = Some(s.time(Phase::Phi2));
            Ok(())
        };
        s.clock(&mut ctx).unwrap();
        assert_eq!(fired_at, Some(50));
    }

    #[test]
    fn test_schedule_moves_pending_event() {
        let mut s = EventScheduler::new();
        let e = s.register("e");
        s.schedule(e, 5, Phase::Phi1);
        s.schedule(e, 20, Phase::Phi1);
        assert_eq!(s.pending_count(), 1);
        assert_eq!(s.next_event_cycle(), Some(20));
    }

    #[test]
    fn test_handler_error_aborts_clock() {
        let mut s = EventScheduler::new();
        let bad = s.register("bad");
        let after = s.register("after");
        s.schedule(bad, 0, Phase::Phi1);
        s.schedule(after, 0, Phase::Phi2);
        let mut fired = Vec::new();
        let mut ctx = |_: &mut EventScheduler, id: EventId| -> Result<()> {
            fired.push(id);
            if id == bad {
                return Err(SidError::Other("boom".into()));
            }
            Ok(())
        };
        let result = s.clock(&mut ctx);
        assert!(matches!(result, Err(SidError::Other(_))));
        assert_eq!(fired, vec![bad]);
        assert!(s.is_pending(after));
    }

    #[test]
    fn test_step_empty_queue() {
        let mut s = EventScheduler::new();
        let mut ctx = |_: &mut EventScheduler, _: EventId| -> Result<()> { Ok(()) };
        assert!(!s.step(&mut ctx).unwrap());
    }

    #[test]
    fn test_reset() {
        let mut s = EventScheduler::new();
        let e = s.register("e");
        s.schedule(e, 5, Phase::Phi1);
        let mut ctx = |_: &mut EventScheduler, _: EventId| -> Result<()> { Ok(()) };
        s.run_until(3, &mut ctx).unwrap();
        s.reset();
        assert_eq!(s.time(Phase::Phi2), 0);
        assert_eq!(s.pending_count(), 0);
        assert_eq!(s.name(e), "e");
    }
}
