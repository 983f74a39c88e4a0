//! The event scheduler.
//!
//! A min-heap of `(timestamp, seq)` keyed events drives every piece of
//! emulated hardware. Handlers are identified by [`EventType`] tags rather
//! than stored callables, so the heap owns no closures and delivery routes
//! through one dispatch point. Insertion order breaks timestamp ties,
//! which makes delivery a stable sort of the insertions.

use std::cell::Cell;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

const EVENT_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EventType {
    /// Sentinel bounding a `run_until` slice.
    RunLimitReached,
    /// Advance the CPU by one instruction.
    CpuStep,
    TimerOverflow(usize),
    DmaActivateChannel(usize),
    Apu(ApuEvent),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ApuEvent {
    Mixer,
    Sequencer,
}

#[derive(Debug, Clone, Eq)]
struct Event {
    ty: EventType,
    time: u64,
    seq: u64,
    cancelled: Cell<bool>,
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: order reversed so the earliest
        // (timestamp, seq) pops first
        (other.time, other.seq).cmp(&(self.time, self.seq))
    }
}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        (self.time, self.seq) == (other.time, other.seq)
    }
}

/// Handle to a scheduled event; only good for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventHandle(u64);

#[derive(Debug, Clone)]
pub struct Scheduler {
    now: u64,
    next_seq: u64,
    events: BinaryHeap<Event>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            now: 0,
            next_seq: 0,
            events: BinaryHeap::with_capacity(EVENT_CAPACITY),
        }
    }

    /// The monotonic cycle counter.
    pub fn now(&self) -> u64 {
        self.now
    }

    /// Schedule `ty` to fire `delta` cycles from now.
    pub fn schedule(&mut self, ty: EventType, delta: u64) -> EventHandle {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.events.push(Event {
            ty,
            time: self.now + delta,
            seq,
            cancelled: Cell::new(false),
        });
        EventHandle(seq)
    }

    /// Lazy cancellation: the event stays in the heap as a tombstone and is
    /// dropped when it surfaces.
    pub fn cancel(&mut self, handle: EventHandle) {
        for event in self.events.iter() {
            if event.seq == handle.0 {
                event.cancelled.set(true);
            }
        }
    }

    /// Cancel every pending event of the given type.
    pub fn cancel_pending(&mut self, ty: EventType) {
        for event in self.events.iter() {
            if event.ty == ty {
                event.cancelled.set(true);
            }
        }
    }

    /// Charge elapsed cycles; the bus calls this for every memory and idle
    /// cycle.
    pub fn update(&mut self, cycles: u64) {
        self.now += cycles;
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn cycles_until_next(&self) -> u64 {
        match self.events.peek() {
            Some(event) => event.time.saturating_sub(self.now),
            None => 0,
        }
    }

    /// Jump straight to the next event's timestamp; what a halted CPU does
    /// instead of burning cycles.
    pub fn skip_to_next(&mut self) {
        self.now += self.cycles_until_next();
    }

    /// Pop the earliest event that is due at the current time, returning
    /// its tag and how far behind schedule it is delivered.
    pub fn pop_due(&mut self) -> Option<(EventType, u64)> {
        loop {
            match self.events.peek() {
                Some(event) if event.time <= self.now => {}
                _ => return None,
            }
            let event = self
                .events
                .pop()
                .unwrap_or_else(|| unreachable!("peeked event vanished"));
            if !event.cancelled.get() {
                return Some((event.ty, self.now - event.time));
            }
        }
    }

    /// Deliver every event with a timestamp up to `deadline`, advancing the
    /// clock to each event as it pops. `dispatch` gets the scheduler back
    /// for rescheduling; an event inserted with delta 0 from inside a
    /// handler runs after that handler returns, never reentrantly.
    pub fn run_until<F>(&mut self, deadline: u64, mut dispatch: F)
    where
        F: FnMut(&mut Scheduler, EventType, u64),
    {
        loop {
            match self.events.peek() {
                Some(event) if event.time <= deadline => {}
                _ => break,
            }
            let event = self
                .events
                .pop()
                .unwrap_or_else(|| unreachable!("peeked event vanished"));
            if event.cancelled.get() {
                continue;
            }
            if event.time > self.now {
                self.now = event.time;
            }
            let cycles_late = self.now - event.time;
            dispatch(self, event.ty, cycles_late);
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(sched: &mut Scheduler, deadline: u64) -> Vec<(EventType, u64, u64)> {
        let mut out = Vec::new();
        sched.run_until(deadline, |s, ty, late| out.push((ty, s.now(), late)));
        out
    }

    #[test]
    fn delivery_is_a_stable_sort() {
        let mut sched = Scheduler::new();
        sched.schedule(EventType::TimerOverflow(1), 10);
        sched.schedule(EventType::TimerOverflow(2), 10);
        sched.schedule(EventType::TimerOverflow(3), 5);

        let order = drain(&mut sched, 20);
        assert_eq!(
            order,
            vec![
                (EventType::TimerOverflow(3), 5, 0),
                (EventType::TimerOverflow(1), 10, 0),
                (EventType::TimerOverflow(2), 10, 0),
            ]
        );
    }

    #[test]
    fn deadline_is_inclusive_and_clock_advances() {
        let mut sched = Scheduler::new();
        sched.schedule(EventType::CpuStep, 7);
        sched.schedule(EventType::RunLimitReached, 9);
        sched.schedule(EventType::CpuStep, 12);

        assert_eq!(
            drain(&mut sched, 9),
            vec![(EventType::CpuStep, 7, 0), (EventType::RunLimitReached, 9, 0)]
        );
        assert_eq!(sched.now(), 9);
        assert_eq!(sched.cycles_until_next(), 3);
    }

    #[test]
    fn late_delivery_reports_cycles_late() {
        let mut sched = Scheduler::new();
        sched.schedule(EventType::Apu(ApuEvent::Mixer), 4);
        // the bus ran the clock well past the event before it was serviced
        sched.update(10);
        assert_eq!(sched.pop_due(), Some((EventType::Apu(ApuEvent::Mixer), 6)));
        assert_eq!(sched.pop_due(), None);
    }

    #[test]
    fn cancelled_events_never_fire() {
        let mut sched = Scheduler::new();
        let keep = sched.schedule(EventType::TimerOverflow(0), 5);
        let doomed = sched.schedule(EventType::TimerOverflow(1), 5);
        sched.cancel(doomed);
        let _ = keep;

        assert_eq!(drain(&mut sched, 10), vec![(EventType::TimerOverflow(0), 5, 0)]);
    }

    #[test]
    fn cancel_by_type() {
        let mut sched = Scheduler::new();
        sched.schedule(EventType::DmaActivateChannel(2), 3);
        sched.schedule(EventType::CpuStep, 4);
        sched.cancel_pending(EventType::DmaActivateChannel(2));

        assert_eq!(drain(&mut sched, 10), vec![(EventType::CpuStep, 4, 0)]);
    }

    #[test]
    fn zero_delta_runs_after_current_handler() {
        let mut sched = Scheduler::new();
        sched.schedule(EventType::CpuStep, 5);
        let mut order = Vec::new();
        sched.run_until(10, |s, ty, _| {
            order.push(ty);
            if ty == EventType::CpuStep {
                s.schedule(EventType::RunLimitReached, 0);
            }
        });
        assert_eq!(order, vec![EventType::CpuStep, EventType::RunLimitReached]);
    }

    #[test]
    fn catch_up_rescheduling_stays_phase_stable() {
        // a periodic handler rescheduling with interval - cycles_late keeps
        // its absolute phase even when serviced behind schedule
        const INTERVAL: u64 = 16;
        let mut sched = Scheduler::new();
        sched.schedule(EventType::Apu(ApuEvent::Sequencer), INTERVAL);

        let mut fire_times = Vec::new();
        for chunk in 1..=4u64 {
            // service late, at the end of coarse slices
            sched.update(INTERVAL * chunk - sched.now() + 3);
            while let Some((ty, late)) = sched.pop_due() {
                assert_eq!(ty, EventType::Apu(ApuEvent::Sequencer));
                fire_times.push(sched.now() - late);
                sched.schedule(ty, INTERVAL - late);
            }
        }
        assert_eq!(fire_times, vec![16, 32, 48, 64]);
    }

    #[test]
    fn now_is_monotonic_across_handlers() {
        let mut sched = Scheduler::new();
        sched.schedule(EventType::CpuStep, 8);
        sched.schedule(EventType::CpuStep, 2);
        let mut last = 0;
        sched.run_until(20, |s, _, _| {
            assert!(s.now() >= last);
            last = s.now();
        });
        assert_eq!(last, 8);
    }
}
