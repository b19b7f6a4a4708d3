//! Deterministic timers.
//!
//! Time is passed in explicitly as a `Duration` since an arbitrary origin, so
//! every race between a timer and the action that should cancel it can be
//! replayed in a test by choosing the `now` values.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerToken(u64);

#[derive(Debug)]
struct Timer<T> {
    due: Duration,
    payload: T,
}

#[derive(Debug)]
pub struct Scheduler<T> {
    next_id: u64,
    timers: BTreeMap<u64, Timer<T>>,
}

impl<T> Default for Scheduler<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Scheduler<T> {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            timers: BTreeMap::new(),
        }
    }

    pub fn schedule(&mut self, now: Duration, delay: Duration, payload: T) -> TimerToken {
        let id = self.next_id;
        self.next_id += 1;
        self.timers.insert(
            id,
            Timer {
                due: now.saturating_add(delay),
                payload,
            },
        );
        TimerToken(id)
    }

    /// Removes a pending timer. Returns its payload if it had not fired yet.
    pub fn cancel(&mut self, token: TimerToken) -> Option<T> {
        self.timers.remove(&token.0).map(|timer| timer.payload)
    }

    pub fn is_pending(&self, token: TimerToken) -> bool {
        self.timers.contains_key(&token.0)
    }

    pub fn next_due(&self) -> Option<Duration> {
        self.timers.values().map(|timer| timer.due).min()
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    pub fn clear(&mut self) {
        self.timers.clear();
    }

    /// Fires every timer due at or before `now`, earliest first. Timers with
    /// the same deadline fire in scheduling order.
    pub fn advance(&mut self, now: Duration) -> Vec<(TimerToken, T)> {
        let mut due: Vec<(Duration, u64)> = self
            .timers
            .iter()
            .filter(|(_, timer)| timer.due <= now)
            .map(|(id, timer)| (timer.due, *id))
            .collect();
        due.sort();
        due.into_iter()
            .filter_map(|(_, id)| {
                self.timers
                    .remove(&id)
                    .map(|timer| (TimerToken(id), timer.payload))
            })
            .collect()
    }
}

/// Trailing-edge debounce: only the last trigger inside the quiet period is
/// delivered, `delay` after it was made.
#[derive(Debug)]
pub struct Debouncer<T> {
    delay: Duration,
    pending: Option<(Duration, T)>,
}

impl<T> Debouncer<T> {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: None,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn trigger(&mut self, now: Duration, payload: T) {
        self.pending = Some((now.saturating_add(self.delay), payload));
    }

    pub fn cancel(&mut self) -> Option<T> {
        self.pending.take().map(|(_, payload)| payload)
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn poll(&mut self, now: Duration) -> Option<T> {
        match &self.pending {
            Some((due, _)) if *due <= now => self.pending.take().map(|(_, payload)| payload),
            _ => None,
        }
    }
}

/// Maps wall-clock instants onto the scheduler's time axis.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl MonotonicClock {
    pub fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[test]
    fn fires_only_due_timers_in_deadline_order() {
        let mut scheduler = Scheduler::new();
        scheduler.schedule(ms(0), ms(30), "late");
        scheduler.schedule(ms(0), ms(10), "early");
        scheduler.schedule(ms(5), ms(100), "pending");

        let fired: Vec<_> = scheduler
            .advance(ms(40))
            .into_iter()
            .map(|(_, payload)| payload)
            .collect();
        assert_eq!(fired, vec!["early", "late"]);
        assert_eq!(scheduler.len(), 1);
        assert_eq!(scheduler.next_due(), Some(ms(105)));
    }

    #[test]
    fn cancelled_timer_never_fires() {
        let mut scheduler = Scheduler::new();
        let token = scheduler.schedule(ms(0), ms(10), 1);
        assert!(scheduler.is_pending(token));
        assert_eq!(scheduler.cancel(token), Some(1));
        assert!(scheduler.advance(ms(50)).is_empty());
        assert_eq!(scheduler.cancel(token), None);
    }

    #[test]
    fn debouncer_delivers_last_trigger_after_quiet_period() {
        let mut debouncer = Debouncer::new(ms(8));
        debouncer.trigger(ms(0), 0.1);
        debouncer.trigger(ms(4), 0.2);
        assert_eq!(debouncer.poll(ms(10)), None);
        assert_eq!(debouncer.poll(ms(12)), Some(0.2));
        assert_eq!(debouncer.poll(ms(20)), None);
    }
}
