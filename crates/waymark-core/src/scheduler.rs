//! Deterministic timer bookkeeping.
//!
//! The scheduler never sleeps and never calls anything. It stores task tokens
//! with deadlines and hands back the ones that are due; whoever owns it (the
//! bridge) decides what a token means. That keeps every timer testable with a
//! [`ManualClock`](crate::clock::ManualClock).

use std::time::Duration;

use crate::clock::Millis;

/// Handle returned by [`Scheduler::schedule`] and friends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

#[derive(Debug)]
struct Timer<T> {
    handle: TimerHandle,
    due_at: Millis,
    /// `None` for one-shot timers.
    interval: Option<Millis>,
    task: T,
}

/// A set of repeating and one-shot timers keyed by [`TimerHandle`].
#[derive(Debug)]
pub struct Scheduler<T> {
    timers: Vec<Timer<T>>,
    next_handle: u64,
}

impl<T> Default for Scheduler<T> {
    fn default() -> Self {
        Self {
            timers: Vec::new(),
            next_handle: 1,
        }
    }
}

impl<T: Clone> Scheduler<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a repeating timer. The first firing is one interval after `now`.
    pub fn schedule(&mut self, now: Millis, interval: Duration, task: T) -> TimerHandle {
        let interval = (interval.as_millis() as Millis).max(1);
        self.push(now + interval, Some(interval), task)
    }

    /// Arm a timer that fires once, `delay` after `now`.
    pub fn schedule_once(&mut self, now: Millis, delay: Duration, task: T) -> TimerHandle {
        self.push(now + delay.as_millis() as Millis, None, task)
    }

    /// Disarm a timer. Returns false if the handle was unknown or already spent.
    pub fn cancel(&mut self, handle: TimerHandle) -> bool {
        let before = self.timers.len();
        self.timers.retain(|t| t.handle != handle);
        self.timers.len() != before
    }

    pub fn is_armed(&self, handle: TimerHandle) -> bool {
        self.timers.iter().any(|t| t.handle == handle)
    }

    /// Collect every task whose deadline has passed.
    ///
    /// A timer fires at most once per call even if several periods elapsed;
    /// repeating timers re-arm at `now + interval`. Tasks come back in
    /// deadline order, ties broken by arming order.
    pub fn due(&mut self, now: Millis) -> Vec<T> {
        let mut fired: Vec<(Millis, TimerHandle, T)> = Vec::new();

        for timer in &mut self.timers {
            if timer.due_at <= now {
                fired.push((timer.due_at, timer.handle, timer.task.clone()));
                if let Some(interval) = timer.interval {
                    timer.due_at = now + interval;
                }
            }
        }

        self.timers
            .retain(|t| t.interval.is_some() || t.due_at > now);

        fired.sort_by_key(|(due_at, handle, _)| (*due_at, handle.0));
        fired.into_iter().map(|(_, _, task)| task).collect()
    }

    /// Earliest pending deadline, if any timer is armed.
    pub fn next_deadline(&self) -> Option<Millis> {
        self.timers.iter().map(|t| t.due_at).min()
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    /// Drop every timer.
    pub fn clear(&mut self) {
        self.timers.clear();
    }

    fn push(&mut self, due_at: Millis, interval: Option<Millis>, task: T) -> TimerHandle {
        let handle = TimerHandle(self.next_handle);
        self.next_handle += 1;
        self.timers.push(Timer {
            handle,
            due_at,
            interval,
            task,
        });
        handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    enum Task {
        Tick,
        Sweep,
        Frame,
    }

    #[test]
    fn test_repeating_timer_fires_each_period() {
        let mut scheduler = Scheduler::new();
        scheduler.schedule(0, Duration::from_millis(100), Task::Tick);

        assert!(scheduler.due(99).is_empty());
        assert_eq!(scheduler.due(100), vec![Task::Tick]);
        assert!(scheduler.due(150).is_empty());
        assert_eq!(scheduler.due(200), vec![Task::Tick]);
    }

    #[test]
    fn test_missed_periods_fire_once() {
        let mut scheduler = Scheduler::new();
        scheduler.schedule(0, Duration::from_millis(100), Task::Tick);

        assert_eq!(scheduler.due(1_000), vec![Task::Tick]);
        assert_eq!(scheduler.next_deadline(), Some(1_100));
    }

    #[test]
    fn test_one_shot_is_spent() {
        let mut scheduler = Scheduler::new();
        let handle = scheduler.schedule_once(0, Duration::from_millis(16), Task::Frame);

        assert!(scheduler.is_armed(handle));
        assert_eq!(scheduler.due(16), vec![Task::Frame]);
        assert!(!scheduler.is_armed(handle));
        assert!(scheduler.due(32).is_empty());
    }

    #[test]
    fn test_cancel() {
        let mut scheduler = Scheduler::new();
        let tick = scheduler.schedule(0, Duration::from_millis(10), Task::Tick);
        scheduler.schedule(0, Duration::from_millis(10), Task::Sweep);

        assert!(scheduler.cancel(tick));
        assert!(!scheduler.cancel(tick));
        assert_eq!(scheduler.due(10), vec![Task::Sweep]);
    }

    #[test]
    fn test_due_order() {
        let mut scheduler = Scheduler::new();
        scheduler.schedule(0, Duration::from_millis(50), Task::Sweep);
        scheduler.schedule(0, Duration::from_millis(20), Task::Tick);
        scheduler.schedule_once(0, Duration::from_millis(20), Task::Frame);

        assert_eq!(
            scheduler.due(60),
            vec![Task::Tick, Task::Frame, Task::Sweep]
        );
    }

    #[test]
    fn test_clear() {
        let mut scheduler = Scheduler::new();
        scheduler.schedule(0, Duration::from_millis(10), Task::Tick);
        scheduler.clear();
        assert!(scheduler.is_empty());
        assert_eq!(scheduler.next_deadline(), None);
    }
}
