use chrono::{DateTime, TimeZone};

use crate::{
    config::{ScheduleEntry, TimeOfDay},
    types::ActuatorId,
};

impl ScheduleEntry {
    // `[start, end)`; an entry with `start > end` spans midnight.
    pub fn covers(&self, now: TimeOfDay) -> bool {
        if !self.enabled {
            return false;
        }

        if self.start < self.end {
            self.start <= now && now < self.end
        } else {
            now >= self.start || now < self.end
        }
    }
}

impl TimeOfDay {
    pub fn of<Tz: TimeZone>(now: &DateTime<Tz>) -> Self {
        Self::from_naive(now.time())
    }
}

/// Desired power state for `id` from its schedule entries, or `None` when
/// no enabled entry exists for it. Overlapping entries are OR-ed.
pub fn evaluate(entries: &[ScheduleEntry], id: ActuatorId, now: TimeOfDay) -> Option<bool> {
    let mut owned = entries
        .iter()
        .filter(|entry| entry.actuator == id && entry.enabled)
        .peekable();

    owned.peek()?;
    Some(owned.any(|entry| entry.covers(now)))
}
