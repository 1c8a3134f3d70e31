use crate::{Assignment, Origin, School};
use serde::Serialize;
use std::collections::BTreeSet;

/// Per-school summary of an assignment, as printed after each run
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SchoolSummary {
    pub school: String,
    pub students_total: usize,
    pub students_assigned: usize,
    pub students_percent: f32,
    pub teachers_total: usize,
    /// Teachers with at least one assigned student
    pub teachers_assigned: usize,
    pub coaches_total: usize,
    /// Coaches with at least one assigned student
    pub coaches_assigned: usize,
    pub manual: usize,
    pub verified: usize,
    pub newly_solved: usize,
    /// Number of pairs of back-to-back sessions of the same coach
    pub back_to_back: usize,
}

/// Calculate a comparable solution quality score: the share of assigned students in percent
pub fn solution_quality(assigned: usize, total: usize) -> f32 {
    if total == 0 {
        return 100.0;
    }
    assigned as f32 * 100.0 / total as f32
}

/// Summarize the assignments of a school (not necessarily created by the matcher)
pub fn summarize(school: &School, assignments: &[Assignment]) -> SchoolSummary {
    let teachers: BTreeSet<&str> = school.students.iter().map(|s| s.teacher.as_str()).collect();
    let assigned_teachers: BTreeSet<&str> = assignments
        .iter()
        .map(|a| school.students[a.student].teacher.as_str())
        .collect();
    let assigned_coaches: BTreeSet<usize> = assignments.iter().map(|a| a.coach).collect();

    let mut back_to_back = 0;
    for coach in assigned_coaches.iter() {
        let mut sessions: Vec<Assignment> = assignments
            .iter()
            .filter(|a| a.coach == *coach)
            .copied()
            .collect();
        sessions.sort_by(|a, b| a.slot.cmp(&b.slot));
        back_to_back += sessions
            .windows(2)
            .filter(|pair| pair[0].slot.is_followed_by(&pair[1].slot))
            .count();
    }

    let count_origin = |origin: Origin| assignments.iter().filter(|a| a.origin == origin).count();
    SchoolSummary {
        school: school.name.clone(),
        students_total: school.students.len(),
        students_assigned: assignments.len(),
        students_percent: solution_quality(assignments.len(), school.students.len()),
        teachers_total: teachers.len(),
        teachers_assigned: assigned_teachers.len(),
        coaches_total: school.coaches.len(),
        coaches_assigned: assigned_coaches.len(),
        manual: count_origin(Origin::ManualOverride),
        verified: count_origin(Origin::PreexistingVerified),
        newly_solved: count_origin(Origin::NewlySolved),
        back_to_back,
    }
}
