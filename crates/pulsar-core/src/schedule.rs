// ── Status-check schedule ──

use chrono::{DateTime, TimeDelta, Utc};

use crate::duration::CalendarDuration;

/// Decides when the low-frequency status check is due.
///
/// A zero interval disables the check for good. Otherwise the check is
/// due once `now >= last_fired + interval`, and immediately if it has
/// never fired. Only successful checks move `last_fired`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusSchedule {
    interval: CalendarDuration,
    last_fired: Option<DateTime<Utc>>,
}

impl StatusSchedule {
    pub fn new(interval: CalendarDuration) -> Self {
        Self {
            interval,
            last_fired: None,
        }
    }

    pub fn interval(&self) -> CalendarDuration {
        self.interval
    }

    pub fn is_enabled(&self) -> bool {
        !self.interval.is_zero()
    }

    pub fn last_fired(&self) -> Option<DateTime<Utc>> {
        self.last_fired
    }

    /// Time left until the next check. `None` when disabled or when the
    /// target instant is out of range; non-positive when due.
    pub fn until(&self, now: &DateTime<Utc>) -> Option<TimeDelta> {
        if !self.is_enabled() {
            return None;
        }
        match self.last_fired {
            Some(last) => self.interval.until(last, now),
            None => Some(TimeDelta::zero()),
        }
    }

    pub fn is_due(&self, now: &DateTime<Utc>) -> bool {
        self.until(now).is_some_and(|left| left <= TimeDelta::zero())
    }

    /// Record a successful check completed at `at`.
    pub fn mark_fired(&mut self, at: DateTime<Utc>) {
        self.last_fired = Some(at);
    }
}
