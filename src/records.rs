//! Plain input records, as delivered by the parsers of the source data, and their conversion into the `Coach` and
//! `Student` entities of a school.
//!
//! Conversion is done per record: a record with invalid schedule data is excluded from matching and reported as
//! `InvalidEntry`, all other records of the school are unaffected.

use crate::timegrid::{Availability, Day, GridConfig, TimeSlot, NONE_MARKER};
use crate::{Coach, InvalidEntry, RecordError, School, Student};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Schedule entries per day: time windows like "9:00-9:30" or the NONE marker
pub type ScheduleEntries = BTreeMap<Day, Vec<String>>;

/// A teacher's referral of a single student
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReferralRecord {
    pub teacher_email: String,
    pub student_name: String,
    pub school: String,
    /// Available windows per day. Left empty, if the teacher already submitted a schedule with an earlier referral.
    #[serde(default)]
    pub schedule: ScheduleEntries,
    /// Windows to be excluded on every day (lunch, recess). "N/A" entries are ignored.
    #[serde(default)]
    pub exclusions: Vec<String>,
}

fn default_capacity() -> usize {
    1
}

/// A volunteer coach's registration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CoachRecord {
    pub volunteer_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub schools: Vec<String>,
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    #[serde(default)]
    pub max_days: Option<usize>,
    #[serde(default)]
    pub availability: ScheduleEntries,
}

/// Trailing field of an existing assignment: the time it has been created or "manual"
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AssignmentMark {
    Manual,
    Timestamp(String),
}

impl From<String> for AssignmentMark {
    fn from(s: String) -> Self {
        if s.trim().eq_ignore_ascii_case("manual") {
            AssignmentMark::Manual
        } else {
            AssignmentMark::Timestamp(s)
        }
    }
}

impl From<AssignmentMark> for String {
    fn from(mark: AssignmentMark) -> Self {
        match mark {
            AssignmentMark::Manual => String::from("manual"),
            AssignmentMark::Timestamp(t) => t,
        }
    }
}

/// An assignment of a previous run (or a manually created one)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExistingAssignmentRecord {
    pub coach_id: String,
    pub student_id: String,
    pub day: Day,
    /// Start time of the session, e.g. "9:00"
    pub start: String,
    /// End time of the session. If not given, the session length of the grid is used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
    pub mark: AssignmentMark,
}

/// Result of the conversion of a school's referral and coach records
#[derive(Debug)]
pub struct Intake {
    pub school: School,
    pub invalid_referrals: Vec<InvalidEntry>,
    pub invalid_coaches: Vec<InvalidEntry>,
}

/// Derive the stable student id from the teacher's email address and the student's name
pub fn student_id(teacher_email: &str, student_name: &str) -> String {
    format!(
        "{}/{}",
        teacher_email.trim().to_lowercase(),
        student_name.trim()
    )
}

/// Convert the referral and coach records of one school into a `School`, flagging invalid records.
///
/// Referrals are processed in the given order, such that a referral without schedule entries can inherit the most
/// recent schedule submitted by the same teacher.
pub fn intake(
    school_name: &str,
    referrals: &[ReferralRecord],
    coaches: &[CoachRecord],
    grid: &GridConfig,
) -> Intake {
    let mut school = School {
        name: school_name.to_owned(),
        coaches: Vec::new(),
        students: Vec::new(),
    };
    let mut invalid_referrals = Vec::new();
    let mut invalid_coaches = Vec::new();

    let mut teacher_schedules: HashMap<String, Availability> = HashMap::new();
    let mut student_ids = HashSet::new();
    for referral in referrals {
        let id = student_id(&referral.teacher_email, &referral.student_name);
        match convert_referral(school_name, referral, grid, &teacher_schedules) {
            Ok(_) if student_ids.contains(&id) => {
                invalid_referrals.push(InvalidEntry::new(id.clone(), RecordError::DuplicateId(id)));
            }
            Ok((availability, own_schedule)) => {
                let teacher = referral.teacher_email.trim().to_lowercase();
                if own_schedule {
                    teacher_schedules.insert(teacher.clone(), availability.clone());
                }
                student_ids.insert(id.clone());
                school.students.push(Student {
                    index: school.students.len(),
                    id,
                    name: referral.student_name.trim().to_owned(),
                    teacher,
                    school: school_name.to_owned(),
                    availability,
                });
            }
            Err(e) => invalid_referrals.push(InvalidEntry::new(id, e)),
        }
    }

    let mut coach_ids = HashSet::new();
    for record in coaches {
        let id = record.volunteer_id.trim().to_owned();
        if coach_ids.contains(&id) {
            invalid_coaches.push(InvalidEntry::new(id.clone(), RecordError::DuplicateId(id)));
            continue;
        }
        match parse_schedule(&record.availability, grid) {
            Ok(availability) if availability.is_unspecified() => {
                invalid_coaches.push(InvalidEntry::new(id, RecordError::MissingSchedule))
            }
            Ok(availability) => {
                coach_ids.insert(id.clone());
                school.coaches.push(Coach {
                    index: school.coaches.len(),
                    id,
                    name: record.name.trim().to_owned(),
                    schools: record.schools.clone(),
                    capacity: record.capacity,
                    max_days: record.max_days,
                    availability,
                });
            }
            Err(e) => invalid_coaches.push(InvalidEntry::new(id, e)),
        }
    }

    for entry in invalid_referrals.iter() {
        warn!("Ignoring referral {}", entry);
    }
    for entry in invalid_coaches.iter() {
        warn!("Ignoring coach {}", entry);
    }
    debug!(
        "School '{}': {} valid students, {} valid coaches",
        school.name,
        school.students.len(),
        school.coaches.len()
    );

    Intake {
        school,
        invalid_referrals,
        invalid_coaches,
    }
}

/// Determine a referral's availability. Returns the availability and a flag, whether it has been given with the
/// referral itself (instead of being inherited from the teacher's earlier referral).
fn convert_referral(
    school_name: &str,
    referral: &ReferralRecord,
    grid: &GridConfig,
    teacher_schedules: &HashMap<String, Availability>,
) -> Result<(Availability, bool), RecordError> {
    if referral.school.trim() != school_name {
        return Err(RecordError::UnknownEntity(format!(
            "school '{}'",
            referral.school
        )));
    }
    let mut availability = parse_schedule(&referral.schedule, grid)?;
    if availability.is_unspecified() {
        let teacher = referral.teacher_email.trim().to_lowercase();
        return teacher_schedules
            .get(&teacher)
            .map(|a| (a.clone(), false))
            .ok_or(RecordError::MissingSchedule);
    }
    for exclusion in referral.exclusions.iter() {
        if exclusion.trim().starts_with("N/A") || exclusion.trim().is_empty() {
            continue;
        }
        let window = grid.parse_window(Day::Monday, exclusion)?;
        for day in Day::ALL.iter() {
            availability.subtract(&TimeSlot {
                day: *day,
                ..window
            });
        }
    }
    Ok((availability, true))
}

/// Parse per-day schedule entries into a normalized availability.
///
/// Fails on the first malformed window and if NONE is selected along with other times on the same day.
pub fn parse_schedule(
    entries: &ScheduleEntries,
    grid: &GridConfig,
) -> Result<Availability, RecordError> {
    let mut availability = Availability::new();
    for (day, windows) in entries.iter() {
        for window in windows.iter() {
            let window = window.trim();
            if window.is_empty() {
                continue;
            }
            if window.starts_with(NONE_MARKER) {
                availability.mark_none(*day);
            } else {
                let slot = grid.parse_window(*day, window)?;
                grid.validate(&slot)?;
                availability.add(slot);
            }
        }
    }
    let availability = availability.normalize();
    let conflicts = availability.conflicting_days();
    if !conflicts.is_empty() {
        return Err(RecordError::ConflictingAvailability(conflicts));
    }
    Ok(availability)
}
