//! The weekly time grid: school days, half-open time slots and availabilities.
//!
//! All times are stored as minutes since midnight. A `TimeSlot` covers [start, end) of a single day. Sessions (the unit
//! of an assignment) are `minutes_per_session` long and start on a grid of `minutes_per_slot` steps, counted from the
//! configured start of the school day.

use crate::RecordError;
use chrono::{NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Marker used in schedule entries for explicit unavailability on a day
pub const NONE_MARKER: &str = "NONE";

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Day {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
}

impl Day {
    pub const ALL: [Day; 5] = [
        Day::Monday,
        Day::Tuesday,
        Day::Wednesday,
        Day::Thursday,
        Day::Friday,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Day::Monday => "Monday",
            Day::Tuesday => "Tuesday",
            Day::Wednesday => "Wednesday",
            Day::Thursday => "Thursday",
            Day::Friday => "Friday",
        }
    }

    /// Parse a day from its english name or a prefix of at least three letters
    pub fn parse(s: &str) -> Option<Day> {
        let s = s.trim().to_lowercase();
        if s.len() < 3 {
            return None;
        }
        Day::ALL
            .iter()
            .find(|d| d.name().to_lowercase().starts_with(&s))
            .copied()
    }
}

impl fmt::Display for Day {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A half-open interval [start, end) on a single day
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeSlot {
    pub day: Day,
    pub start: u16,
    pub end: u16,
}

impl TimeSlot {
    /// Create a new slot. Fails for zero-length or inverted intervals.
    pub fn new(day: Day, start: u16, end: u16) -> Result<TimeSlot, RecordError> {
        if start >= end {
            return Err(RecordError::InvalidSlot(format!(
                "{} {}-{} is empty or inverted",
                day,
                format_time(start),
                format_time(end)
            )));
        }
        Ok(TimeSlot { day, start, end })
    }

    pub fn duration(&self) -> u16 {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &TimeSlot) -> bool {
        overlaps(self, other)
    }

    pub fn intersection(&self, other: &TimeSlot) -> Option<TimeSlot> {
        if !self.overlaps(other) {
            return None;
        }
        Some(TimeSlot {
            day: self.day,
            start: self.start.max(other.start),
            end: self.end.min(other.end),
        })
    }

    /// True, if `other` is completely covered by this slot
    pub fn covers(&self, other: &TimeSlot) -> bool {
        self.day == other.day && self.start <= other.start && other.end <= self.end
    }

    /// True, if `other` starts exactly when this slot ends (on the same day)
    pub fn is_followed_by(&self, other: &TimeSlot) -> bool {
        self.day == other.day && self.end == other.start
    }
}

impl fmt::Display for TimeSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}-{}",
            self.day,
            format_time(self.start),
            format_time(self.end)
        )
    }
}

/// Half-open overlap test: slots touching at their borders do not overlap
pub fn overlaps(a: &TimeSlot, b: &TimeSlot) -> bool {
    a.day == b.day && a.start < b.end && b.start < a.end
}

/// Format minutes since midnight as "HH:MM"
pub fn format_time(minutes: u16) -> String {
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}

/// Weekly availability of a coach or student.
///
/// Besides the available time windows, the days explicitly marked as NONE are kept. A day with neither windows nor NONE
/// marker is unspecified.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Availability {
    slots: Vec<TimeSlot>,
    none_days: BTreeSet<Day>,
}

impl Availability {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_slots(slots: Vec<TimeSlot>) -> Self {
        Availability {
            slots,
            none_days: BTreeSet::new(),
        }
    }

    pub fn add(&mut self, slot: TimeSlot) {
        self.slots.push(slot);
    }

    pub fn mark_none(&mut self, day: Day) {
        self.none_days.insert(day);
    }

    pub fn slots(&self) -> &[TimeSlot] {
        &self.slots
    }

    pub fn none_days(&self) -> &BTreeSet<Day> {
        &self.none_days
    }

    /// Neither time windows nor NONE markers given
    pub fn is_unspecified(&self) -> bool {
        self.slots.is_empty() && self.none_days.is_empty()
    }

    /// Days with a NONE marker that also carry time windows
    pub fn conflicting_days(&self) -> Vec<Day> {
        self.none_days
            .iter()
            .filter(|d| self.slots.iter().any(|s| s.day == **d))
            .copied()
            .collect()
    }

    /// Sort the slots, drop duplicate or contained slots and merge overlapping or adjacent slots of the same day. NONE
    /// markers are kept untouched.
    pub fn normalize(mut self) -> Self {
        self.slots.sort();
        let mut merged: Vec<TimeSlot> = Vec::with_capacity(self.slots.len());
        for slot in self.slots {
            match merged.last_mut() {
                Some(last) if last.day == slot.day && slot.start <= last.end => {
                    last.end = last.end.max(slot.end);
                }
                _ => merged.push(slot),
            }
        }
        self.slots = merged;
        self
    }

    /// True, if the slot lies completely inside one of the windows. Requires normalized data.
    pub fn contains(&self, slot: &TimeSlot) -> bool {
        self.slots.iter().any(|s| s.covers(slot))
    }

    /// Intersection of two normalized availabilities, as sorted list of windows
    pub fn intersect(&self, other: &Availability) -> Vec<TimeSlot> {
        let mut result = Vec::new();
        let (mut i, mut j) = (0, 0);
        while i < self.slots.len() && j < other.slots.len() {
            let (a, b) = (&self.slots[i], &other.slots[j]);
            if let Some(x) = a.intersection(b) {
                result.push(x);
            }
            if (a.day, a.end) < (b.day, b.end) {
                i += 1;
            } else {
                j += 1;
            }
        }
        result
    }

    /// Remove the given interval from all windows of its day
    pub fn subtract(&mut self, cut: &TimeSlot) {
        let mut result = Vec::with_capacity(self.slots.len() + 1);
        for slot in self.slots.iter() {
            if !slot.overlaps(cut) {
                result.push(*slot);
                continue;
            }
            if slot.start < cut.start {
                result.push(TimeSlot {
                    day: slot.day,
                    start: slot.start,
                    end: cut.start,
                });
            }
            if cut.end < slot.end {
                result.push(TimeSlot {
                    day: slot.day,
                    start: cut.end,
                    end: slot.end,
                });
            }
        }
        self.slots = result;
    }
}

/// Definition of the school day and the session grid
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// Start of the operational day (minutes since midnight)
    #[serde(with = "hhmm")]
    pub day_start: u16,
    /// (Extended) end of the operational day (minutes since midnight)
    #[serde(with = "hhmm")]
    pub day_end: u16,
    /// Step width of possible session start times
    pub minutes_per_slot: u16,
    /// Length of a single weekly reading session
    pub minutes_per_session: u16,
}

impl Default for GridConfig {
    fn default() -> Self {
        GridConfig {
            day_start: 8 * 60 + 30,
            day_end: 15 * 60 + 30,
            minutes_per_slot: 15,
            minutes_per_session: 30,
        }
    }
}

impl GridConfig {
    /// Parse a clock time like "9:00" or "13:45".
    ///
    /// Schedules are usually given on a 12 hour clock without am/pm, so times before the start of the school day are
    /// interpreted as afternoon times. Times after the end of the day are rejected.
    pub fn parse_time(&self, s: &str) -> Result<u16, RecordError> {
        let time = NaiveTime::parse_from_str(s.trim(), "%H:%M")
            .map_err(|e| RecordError::InvalidSlot(format!("'{}': {}", s.trim(), e)))?;
        let mut minutes = (time.hour() * 60 + time.minute()) as u16;
        if minutes < self.day_start {
            minutes += 12 * 60;
        }
        if minutes > self.day_end {
            return Err(RecordError::InvalidSlot(format!(
                "'{}' falls outside the day window {}-{}",
                s.trim(),
                format_time(self.day_start),
                format_time(self.day_end)
            )));
        }
        Ok(minutes)
    }

    /// Parse a time window like "9:00-9:30" on the given day
    pub fn parse_window(&self, day: Day, s: &str) -> Result<TimeSlot, RecordError> {
        let mut parts = s.split('-');
        let (start, end) = match (parts.next(), parts.next(), parts.next()) {
            (Some(start), Some(end), None) => (start, end),
            _ => {
                return Err(RecordError::InvalidSlot(format!(
                    "'{}' is no time window",
                    s.trim()
                )))
            }
        };
        TimeSlot::new(day, self.parse_time(start)?, self.parse_time(end)?)
    }

    /// Check that the slot lies within the operational day window
    pub fn validate(&self, slot: &TimeSlot) -> Result<(), RecordError> {
        if slot.start < self.day_start || slot.end > self.day_end {
            return Err(RecordError::InvalidSlot(format!(
                "{} is outside the day window {}-{}",
                slot,
                format_time(self.day_start),
                format_time(self.day_end)
            )));
        }
        Ok(())
    }

    /// The session starting at the given time
    pub fn session_at(&self, day: Day, start: u16) -> Result<TimeSlot, RecordError> {
        let slot = TimeSlot::new(day, start, start.saturating_add(self.minutes_per_session))?;
        self.validate(&slot)?;
        Ok(slot)
    }

    /// All grid-aligned sessions lying completely inside the window
    pub fn sessions(&self, window: &TimeSlot) -> Vec<TimeSlot> {
        let step = self.minutes_per_slot.max(1);
        let from = window.start.max(self.day_start);
        let offset = from - self.day_start;
        let mut start = self.day_start + (offset + step - 1) / step * step;
        let mut result = Vec::new();
        while start + self.minutes_per_session <= window.end {
            result.push(TimeSlot {
                day: window.day,
                start,
                end: start + self.minutes_per_session,
            });
            start += step;
        }
        result
    }
}

/// (De)serialization of minutes since midnight as "HH:MM" strings
mod hhmm {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(minutes: &u16, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_time(*minutes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u16, D::Error> {
        let s = String::deserialize(deserializer)?;
        let (h, m) = s
            .split_once(':')
            .ok_or_else(|| D::Error::custom(format!("'{}' is no HH:MM time", s)))?;
        let h: u16 = h.trim().parse().map_err(D::Error::custom)?;
        let m: u16 = m.trim().parse().map_err(D::Error::custom)?;
        if h > 23 || m > 59 {
            return Err(D::Error::custom(format!("'{}' is no valid time", s)));
        }
        Ok(h * 60 + m)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(day: Day, start: u16, end: u16) -> TimeSlot {
        TimeSlot::new(day, start, end).unwrap()
    }

    #[test]
    fn test_overlaps_half_open() {
        let a = slot(Day::Monday, 540, 570);
        let b = slot(Day::Monday, 570, 600);
        let c = slot(Day::Monday, 555, 585);
        let d = slot(Day::Tuesday, 540, 570);
        assert!(!overlaps(&a, &b));
        assert!(overlaps(&a, &c));
        assert!(overlaps(&c, &b));
        assert!(!overlaps(&a, &d));
        assert_eq!(a.intersection(&c), Some(slot(Day::Monday, 555, 570)));
        assert!(a.is_followed_by(&b));
    }

    #[test]
    fn test_invalid_slot() {
        assert!(matches!(
            TimeSlot::new(Day::Monday, 600, 600),
            Err(RecordError::InvalidSlot(_))
        ));
        assert!(matches!(
            TimeSlot::new(Day::Monday, 600, 540),
            Err(RecordError::InvalidSlot(_))
        ));
    }

    #[test]
    fn test_normalize() {
        let mut availability = Availability::from_slots(vec![
            slot(Day::Tuesday, 600, 630),
            slot(Day::Monday, 540, 570),
            slot(Day::Monday, 570, 600),
            slot(Day::Monday, 550, 560),
            slot(Day::Monday, 540, 570),
            slot(Day::Monday, 700, 730),
        ]);
        availability.mark_none(Day::Friday);
        let availability = availability.normalize();
        assert_eq!(
            availability.slots(),
            &[
                slot(Day::Monday, 540, 600),
                slot(Day::Monday, 700, 730),
                slot(Day::Tuesday, 600, 630)
            ]
        );
        assert!(availability.none_days().contains(&Day::Friday));
        assert!(availability.conflicting_days().is_empty());
    }

    #[test]
    fn test_conflicting_days() {
        let mut availability = Availability::from_slots(vec![slot(Day::Monday, 540, 570)]);
        availability.mark_none(Day::Monday);
        availability.mark_none(Day::Tuesday);
        let availability = availability.normalize();
        assert_eq!(availability.conflicting_days(), vec![Day::Monday]);
        assert!(Availability::new().normalize().conflicting_days().is_empty());
        assert!(Availability::new().is_unspecified());
    }

    #[test]
    fn test_intersect_and_contains() {
        let a = Availability::from_slots(vec![
            slot(Day::Monday, 540, 600),
            slot(Day::Monday, 660, 720),
            slot(Day::Wednesday, 540, 720),
        ])
        .normalize();
        let b = Availability::from_slots(vec![
            slot(Day::Monday, 570, 690),
            slot(Day::Tuesday, 540, 600),
            slot(Day::Wednesday, 600, 630),
        ])
        .normalize();
        assert_eq!(
            a.intersect(&b),
            vec![
                slot(Day::Monday, 570, 600),
                slot(Day::Monday, 660, 690),
                slot(Day::Wednesday, 600, 630)
            ]
        );
        assert!(a.contains(&slot(Day::Monday, 540, 570)));
        assert!(!a.contains(&slot(Day::Monday, 585, 615)));
    }

    #[test]
    fn test_subtract() {
        let mut a = Availability::from_slots(vec![
            slot(Day::Monday, 540, 660),
            slot(Day::Tuesday, 540, 660),
        ]);
        a.subtract(&slot(Day::Monday, 570, 600));
        a.subtract(&slot(Day::Tuesday, 500, 560));
        assert_eq!(
            a.slots(),
            &[
                slot(Day::Monday, 540, 570),
                slot(Day::Monday, 600, 660),
                slot(Day::Tuesday, 560, 660)
            ]
        );
    }

    #[test]
    fn test_parse_time() {
        let grid = GridConfig::default();
        assert_eq!(grid.parse_time("9:00"), Ok(540));
        assert_eq!(grid.parse_time(" 10:15 "), Ok(615));
        // afternoon times are given on a 12 hour clock
        assert_eq!(grid.parse_time("1:30"), Ok(13 * 60 + 30));
        assert_eq!(grid.parse_time("13:30"), Ok(13 * 60 + 30));
        assert_eq!(grid.parse_time("3:30"), Ok(15 * 60 + 30));
        assert!(matches!(
            grid.parse_time("4:00"),
            Err(RecordError::InvalidSlot(_))
        ));
        assert!(matches!(
            grid.parse_time("noon"),
            Err(RecordError::InvalidSlot(_))
        ));
        assert_eq!(
            grid.parse_window(Day::Friday, "9:00-9:30"),
            Ok(slot(Day::Friday, 540, 570))
        );
        assert!(grid.parse_window(Day::Friday, "9:30-9:30").is_err());
        assert!(grid.parse_window(Day::Friday, "9:30").is_err());
    }

    #[test]
    fn test_sessions() {
        let grid = GridConfig::default();
        // 9:05 is aligned to 9:15 on the 15 minute grid starting at 8:30
        let sessions = grid.sessions(&slot(Day::Monday, 545, 610));
        assert_eq!(
            sessions,
            vec![slot(Day::Monday, 555, 585), slot(Day::Monday, 570, 600)]
        );
        assert!(grid.sessions(&slot(Day::Monday, 540, 560)).is_empty());
        assert_eq!(grid.session_at(Day::Monday, 540), Ok(slot(Day::Monday, 540, 570)));
        assert!(grid.session_at(Day::Monday, 15 * 60 + 15).is_err());
    }

    #[test]
    fn test_day_parse() {
        assert_eq!(Day::parse("Monday"), Some(Day::Monday));
        assert_eq!(Day::parse("thu"), Some(Day::Thursday));
        assert_eq!(Day::parse("Saturday"), None);
        assert_eq!(Day::parse("t"), None);
    }

    #[test]
    fn test_grid_config_serde() {
        let grid: GridConfig =
            serde_json::from_str(r#"{"day_start": "08:00", "minutes_per_slot": 10}"#).unwrap();
        assert_eq!(grid.day_start, 480);
        assert_eq!(grid.day_end, 15 * 60 + 30);
        assert_eq!(grid.minutes_per_slot, 10);
        assert_eq!(grid.minutes_per_session, 30);
    }
}
