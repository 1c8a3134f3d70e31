pub mod report;
pub mod simple;

use crate::records::{AssignmentMark, ExistingAssignmentRecord};
use crate::timegrid::format_time;
use crate::{Assignment, Origin, School};
use std::fmt::Write;

/// Format the assignments of a school into a human readable String (e.g. to print it to stdout).
///
/// The output format will look like
/// ```text
/// ===== Coach name =====
/// Monday 09:00-09:30  Anton Abc (teacher@school.org)
/// Monday 09:30-10:00  Berta Bcd (teacher@school.org) [manual]
///
/// ===== Another coach name =====
///
/// ===== A third coach name =====
/// …
/// ```
pub fn format_assignment(school: &School, assignments: &[Assignment]) -> String {
    let mut result = String::new();
    for c in school.coaches.iter() {
        write!(result, "\n===== {} =====\n", c.name).unwrap();
        for a in assignments.iter().filter(|a| a.coach == c.index) {
            let student = &school.students[a.student];
            write!(
                result,
                "{} {}-{}  {} ({}){}\n",
                a.slot.day,
                format_time(a.slot.start),
                format_time(a.slot.end),
                student.name,
                student.teacher,
                match a.origin {
                    Origin::ManualOverride => " [manual]",
                    Origin::PreexistingVerified => " [kept]",
                    Origin::NewlySolved => "",
                }
            )
            .unwrap();
        }
    }
    return result;
}

/// Convert the assignments of a school back into assignment records, such that they can be fed into the next run as
/// existing assignments. Manual assignments keep their "manual" mark, all others are marked with the given timestamp.
pub fn to_records(
    school: &School,
    assignments: &[Assignment],
    timestamp: &str,
) -> Vec<ExistingAssignmentRecord> {
    assignments
        .iter()
        .map(|a| ExistingAssignmentRecord {
            coach_id: school.coaches[a.coach].id.clone(),
            student_id: school.students[a.student].id.clone(),
            day: a.slot.day,
            start: format_time(a.slot.start),
            end: Some(format_time(a.slot.end)),
            mark: match a.origin {
                Origin::ManualOverride => AssignmentMark::Manual,
                _ => AssignmentMark::Timestamp(timestamp.to_owned()),
            },
        })
        .collect()
}
