//! Validation of existing assignments against the current schedules of a school.
//!
//! Manual assignments are always kept (only uniqueness is enforced for them), other existing assignments are kept if
//! they still fit the coach's and student's availability. Everything else is rejected and reported, releasing the coach
//! and student for new matching.

use crate::records::{AssignmentMark, ExistingAssignmentRecord};
use crate::timegrid::{GridConfig, TimeSlot};
use crate::{Assignment, InvalidEntry, Origin, RecordError, School};
use log::{debug, info, warn};
use std::collections::BTreeSet;

/// Partition of the existing assignment records of a school
#[derive(Debug, Default)]
pub struct Reconciliation {
    /// Non-manual assignments which are still feasible
    pub verified: Vec<Assignment>,
    /// Assignments marked as "manual", kept regardless of the current schedules
    pub manual: Vec<Assignment>,
    /// Rejected records
    pub rejected: Vec<InvalidEntry>,
}

impl Reconciliation {
    /// All retained assignments (manual and verified). They are fixed for the following search.
    pub fn fixed(&self) -> Vec<Assignment> {
        self.manual
            .iter()
            .chain(self.verified.iter())
            .copied()
            .collect()
    }
}

/// Check the existing assignment records of a school.
///
/// Manual records are processed first, such that they take precedence over conflicting non-manual records.
pub fn reconcile(
    school: &School,
    existing: &[ExistingAssignmentRecord],
    grid: &GridConfig,
) -> Reconciliation {
    let mut result = Reconciliation::default();
    let mut accepted: Vec<Assignment> = Vec::new();

    let ordered = existing
        .iter()
        .filter(|r| r.mark == AssignmentMark::Manual)
        .chain(existing.iter().filter(|r| r.mark != AssignmentMark::Manual));
    for record in ordered {
        let name = format!(
            "{} -> {} ({} {})",
            record.coach_id, record.student_id, record.day, record.start
        );
        match check_record(school, record, grid, &accepted) {
            Ok(assignment) => {
                accepted.push(assignment);
                if assignment.origin == Origin::ManualOverride {
                    debug!("Keeping manual assignment {}", name);
                    result.manual.push(assignment);
                } else {
                    result.verified.push(assignment);
                }
            }
            Err(e) => {
                warn!("Rejecting existing assignment {}: {}", name, e);
                result.rejected.push(InvalidEntry::new(name, e));
            }
        }
    }

    info!(
        "School '{}': keeping {} manual and {} verified existing assignments, {} rejected",
        school.name,
        result.manual.len(),
        result.verified.len(),
        result.rejected.len()
    );
    result
}

/// Resolve a single existing assignment record and check it against the school's data and the already accepted
/// assignments
fn check_record(
    school: &School,
    record: &ExistingAssignmentRecord,
    grid: &GridConfig,
    accepted: &[Assignment],
) -> Result<Assignment, RecordError> {
    let coach = school
        .coach_by_id(record.coach_id.trim())
        .ok_or_else(|| RecordError::UnknownEntity(format!("coach '{}'", record.coach_id)))?;
    let student = school
        .student_by_id(record.student_id.trim())
        .ok_or_else(|| RecordError::UnknownEntity(format!("student '{}'", record.student_id)))?;

    let start = grid.parse_time(&record.start)?;
    let slot = match &record.end {
        Some(end) => TimeSlot::new(record.day, start, grid.parse_time(end)?)?,
        None => TimeSlot::new(record.day, start, start + grid.minutes_per_session)?,
    };
    grid.validate(&slot)?;

    let manual = record.mark == AssignmentMark::Manual;
    let assignment = Assignment {
        coach: coach.index,
        student: student.index,
        slot,
        origin: if manual {
            Origin::ManualOverride
        } else {
            Origin::PreexistingVerified
        },
    };

    // Uniqueness holds for all assignments, manual ones included
    if accepted.iter().any(|a| a.student == student.index) {
        return Err(RecordError::DuplicateAssignment(format!(
            "student '{}' is already assigned",
            student.id
        )));
    }
    if let Some(other) = accepted
        .iter()
        .find(|a| a.coach == coach.index && a.slot.overlaps(&slot))
    {
        return Err(RecordError::DuplicateAssignment(format!(
            "coach '{}' is already assigned at {}",
            coach.id, other.slot
        )));
    }
    if manual {
        return Ok(assignment);
    }

    if !coach.availability.contains(&slot) {
        return Err(RecordError::InfeasibleExistingAssignment(format!(
            "coach '{}' is not available at {}",
            coach.id, slot
        )));
    }
    if !student.availability.contains(&slot) {
        return Err(RecordError::InfeasibleExistingAssignment(format!(
            "student '{}' is not available at {}",
            student.id, slot
        )));
    }
    let coach_assignments: Vec<&Assignment> =
        accepted.iter().filter(|a| a.coach == coach.index).collect();
    if coach_assignments.len() >= coach.capacity {
        return Err(RecordError::InfeasibleExistingAssignment(format!(
            "coach '{}' has no capacity left",
            coach.id
        )));
    }
    if let Some(max_days) = coach.max_days {
        let days: BTreeSet<_> = coach_assignments.iter().map(|a| a.slot.day).collect();
        if !days.contains(&slot.day) && days.len() >= max_days {
            return Err(RecordError::InfeasibleExistingAssignment(format!(
                "coach '{}' has no school day left",
                coach.id
            )));
        }
    }

    Ok(assignment)
}
