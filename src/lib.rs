//! Matching engine for assigning volunteer reading coaches to students, one school at a time.
//!
//! The engine takes the (already parsed) referral, coach and existing assignment records of a school, flags invalid
//! records, reconciles existing assignments and searches a near-optimal set of new assignments using a branch and bound
//! search over candidate reassignment cycles.

mod bab;
pub mod cycles;
pub mod driver;
pub mod graph;
pub mod io;
pub mod matcher;
pub mod ranking;
pub mod reconcile;
pub mod records;
pub mod state;
pub mod timegrid;

use serde::{Deserialize, Serialize};
use std::fmt;
use timegrid::{Availability, Day, TimeSlot};

/// Representation of a volunteer coach's data
#[derive(Clone, Debug)]
pub struct Coach {
    /// id/index of the Coach in the list of coaches of the school
    pub index: usize,
    /// Volunteer id. Stable identity of the coach across runs.
    pub id: String,
    /// Coach's name. Mainly used for info/debug output
    pub name: String,
    /// Preferred schools in order of preference. Only used as a heuristic signal.
    pub schools: Vec<String>,
    /// Maximum number of students to be coached per week
    pub capacity: usize,
    /// Maximum number of distinct school days per week, if limited
    pub max_days: Option<usize>,
    /// Normalized weekly availability
    pub availability: Availability,
}

/// Representation of a referred student's data
#[derive(Clone, Debug)]
pub struct Student {
    /// id/index of the Student in the list of students of the school
    pub index: usize,
    /// Stable identity, derived from the teacher's email address and the student's name
    pub id: String,
    /// Student's name. Mainly used for info/debug output
    pub name: String,
    /// Email address of the referring teacher
    pub teacher: String,
    /// Name of the school
    pub school: String,
    /// Normalized weekly availability
    pub availability: Availability,
}

/// The valid coaches and students of a single school, as consumed by the matching engine
#[derive(Clone, Debug, Default)]
pub struct School {
    pub name: String,
    pub coaches: Vec<Coach>,
    pub students: Vec<Student>,
}

impl School {
    pub fn coach_by_id(&self, id: &str) -> Option<&Coach> {
        self.coaches.iter().find(|c| c.id == id)
    }

    pub fn student_by_id(&self, id: &str) -> Option<&Student> {
        self.students.iter().find(|s| s.id == id)
    }
}

/// Where an assignment comes from
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Origin {
    NewlySolved,
    PreexistingVerified,
    ManualOverride,
}

impl Origin {
    /// Newly solved assignments are the only ones the search may retract again
    pub fn is_fixed(&self) -> bool {
        !matches!(self, Origin::NewlySolved)
    }
}

/// A (coach, student, session slot) pairing. Coach and student are referenced by their index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Assignment {
    pub coach: usize,
    pub student: usize,
    pub slot: TimeSlot,
    pub origin: Origin,
}

/// Reasons for rejecting a single input record
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecordError {
    /// Malformed, empty or out-of-window time interval
    InvalidSlot(String),
    /// Concrete time windows and NONE selected for the same day
    ConflictingAvailability(Vec<Day>),
    /// Neither time windows nor NONE given, and no schedule to inherit
    MissingSchedule,
    /// Non-manual existing assignment that does not fit the current schedules anymore
    InfeasibleExistingAssignment(String),
    /// Existing assignment violating the one-student-one-session or coach-double-booking rule
    DuplicateAssignment(String),
    /// Reference to a coach or student that is unknown or has been excluded
    UnknownEntity(String),
    /// The record's identity has already been used by another record
    DuplicateId(String),
}

impl fmt::Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordError::InvalidSlot(msg) => write!(f, "Invalid time slot: {}", msg),
            RecordError::ConflictingAvailability(days) => write!(
                f,
                "NONE selected along with other times on {}",
                days.iter()
                    .map(|d| d.to_string())
                    .collect::<Vec<String>>()
                    .join(", ")
            ),
            RecordError::MissingSchedule => write!(f, "No schedule data given"),
            RecordError::InfeasibleExistingAssignment(msg) => {
                write!(f, "Existing assignment is not feasible anymore: {}", msg)
            }
            RecordError::DuplicateAssignment(msg) => write!(f, "Conflicting assignment: {}", msg),
            RecordError::UnknownEntity(msg) => write!(f, "Unknown {}", msg),
            RecordError::DuplicateId(id) => write!(f, "Duplicate id '{}'", id),
        }
    }
}

impl std::error::Error for RecordError {}

/// An input record that has been excluded from matching, named for the invalid-entry report
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct InvalidEntry {
    /// Human readable identification of the record (e.g. student id or coach id)
    pub record: String,
    /// Rendered `RecordError`
    pub reason: String,
    #[serde(skip)]
    pub error: RecordError,
}

impl InvalidEntry {
    pub fn new(record: impl Into<String>, error: RecordError) -> Self {
        InvalidEntry {
            record: record.into(),
            reason: error.to_string(),
            error,
        }
    }
}

impl fmt::Display for InvalidEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.record, self.reason)
    }
}

/// Check the consistency of the index fields of the school's coaches and students. Panics on inconsistencies.
pub fn assert_data_consitency(school: &School) {
    for (i, c) in school.coaches.iter().enumerate() {
        assert_eq!(i, c.index, "Coach {} has index {}", i, c.index);
    }
    for (i, s) in school.students.iter().enumerate() {
        assert_eq!(i, s.index, "Student {} has index {}", i, s.index);
        assert_eq!(
            s.school, school.name,
            "Student {} belongs to school {}",
            s.id, s.school
        );
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    use super::{Coach, School, Student};
    use crate::timegrid::{Availability, Day, TimeSlot};

    /// Build a normalized availability from (day, start minute, end minute) triples
    pub fn availability(windows: &[(Day, u16, u16)]) -> Availability {
        Availability::from_slots(
            windows
                .iter()
                .map(|(d, s, e)| TimeSlot::new(*d, *s, *e).unwrap())
                .collect(),
        )
        .normalize()
    }

    pub fn hm(h: u16, m: u16) -> u16 {
        h * 60 + m
    }

    pub fn coach(index: usize, windows: &[(Day, u16, u16)]) -> Coach {
        Coach {
            index,
            id: format!("C{}", index),
            name: format!("Coach {}", index),
            schools: vec![String::from("Lincoln")],
            capacity: 1,
            max_days: None,
            availability: availability(windows),
        }
    }

    pub fn student(index: usize, teacher: &str, windows: &[(Day, u16, u16)]) -> Student {
        Student {
            index,
            id: format!("{}/Student {}", teacher, index),
            name: format!("Student {}", index),
            teacher: String::from(teacher),
            school: String::from("Lincoln"),
            availability: availability(windows),
        }
    }

    pub fn school(coaches: Vec<Coach>, students: Vec<Student>) -> School {
        School {
            name: String::from("Lincoln"),
            coaches,
            students,
        }
    }
}
