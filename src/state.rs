//! Immutable snapshot of a school's assignment set, as used by the search.
//!
//! A `State` is never modified in place by the search: applying a `Transaction` creates a new snapshot, so every branch
//! of the search tree can keep its own version.

use crate::timegrid::Day;
use crate::{Assignment, Origin, School};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};

/// Optional scheduling rules, checked for every newly added assignment
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Constraints {
    /// A coach visits the school at most once a day, i.e. the coach's sessions of a day are back-to-back
    pub single_visit_per_day: bool,
    /// Two coaches never take students of the same teacher (classroom) at the same time
    pub exclusive_teacher_slots: bool,
}

impl Default for Constraints {
    fn default() -> Self {
        Constraints {
            single_visit_per_day: true,
            exclusive_teacher_slots: true,
        }
    }
}

/// A set of assignments to be retracted and added atomically
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Transaction {
    pub retract: Vec<Assignment>,
    pub add: Vec<Assignment>,
}

impl Transaction {
    /// Net change of the number of matched students
    pub fn gain(&self) -> isize {
        self.add.len() as isize - self.retract.len() as isize
    }

    /// Order-independent identity of the transaction
    pub fn key(&self) -> u64 {
        let mut retract = self.retract.clone();
        retract.sort();
        let mut add = self.add.clone();
        add.sort();
        let mut hasher = DefaultHasher::new();
        retract.hash(&mut hasher);
        add.hash(&mut hasher);
        hasher.finish()
    }
}

#[derive(Clone, Debug)]
pub struct State {
    /// The assignment of each student (by student index), if any
    student_assignment: Vec<Option<Assignment>>,
    /// Each coach's assignments (by coach index), sorted by slot
    coach_assignments: Vec<Vec<Assignment>>,
    matched: usize,
    constraints: Constraints,
}

impl State {
    /// Create an empty state for the given school
    pub fn new(school: &School) -> State {
        State {
            student_assignment: vec![None; school.students.len()],
            coach_assignments: vec![Vec::new(); school.coaches.len()],
            matched: 0,
            constraints: Constraints::default(),
        }
    }

    /// Replace the scheduling rules checked for new assignments
    pub fn with_constraints(mut self, constraints: Constraints) -> State {
        self.constraints = constraints;
        self
    }

    pub fn constraints(&self) -> &Constraints {
        &self.constraints
    }

    /// Create a state holding the given fixed assignments.
    ///
    /// The fixed assignments are not checked against the schedules, since manual overrides may violate them. They must,
    /// however, be unique per student, which is guaranteed by the reconciler.
    pub fn with_fixed(school: &School, fixed: &[Assignment]) -> State {
        let mut state = State::new(school);
        for assignment in fixed.iter() {
            debug_assert!(assignment.origin.is_fixed());
            debug_assert!(state.student_assignment[assignment.student].is_none());
            state.insert(*assignment);
        }
        state
    }

    /// Number of matched students
    pub fn matched(&self) -> usize {
        self.matched
    }

    pub fn is_matched(&self, student: usize) -> bool {
        self.student_assignment[student].is_some()
    }

    pub fn assignment_of(&self, student: usize) -> Option<&Assignment> {
        self.student_assignment[student].as_ref()
    }

    /// The coach's assignments, sorted by slot
    pub fn coach_assignments(&self, coach: usize) -> &[Assignment] {
        &self.coach_assignments[coach]
    }

    pub fn coach_load(&self, coach: usize) -> usize {
        self.coach_assignments[coach].len()
    }

    /// All assignments of the state in a stable order (by coach and slot)
    pub fn assignments(&self) -> Vec<Assignment> {
        self.coach_assignments.iter().flatten().copied().collect()
    }

    /// Check whether a new assignment can be added to this state, regarding availabilities, uniqueness of the student,
    /// non-overlapping sessions of the coach, the coach's limits and the scheduling rules.
    pub fn can_add(&self, school: &School, assignment: &Assignment) -> bool {
        if !self.admissible(school, assignment) {
            return false;
        }
        if !self.constraints.single_visit_per_day {
            return true;
        }
        let day = assignment.slot.day;
        let existing = self.coach_assignments(assignment.coach);
        let mut after = existing.to_vec();
        after.push(*assignment);
        after.sort_by(|a, b| a.slot.cmp(&b.slot));
        visits(&after, day) <= visits(existing, day).max(1)
    }

    /// All checks of `can_add()` except for the single visit per day. Applying a transaction checks the visits only for
    /// the final result, since retracting and adding sessions may split a visit in between.
    fn admissible(&self, school: &School, assignment: &Assignment) -> bool {
        let coach = match school.coaches.get(assignment.coach) {
            Some(c) => c,
            None => return false,
        };
        let student = match school.students.get(assignment.student) {
            Some(s) => s,
            None => return false,
        };
        if self.student_assignment[student.index].is_some() {
            return false;
        }
        let existing = &self.coach_assignments[coach.index];
        if existing.len() >= coach.capacity {
            return false;
        }
        if existing.iter().any(|a| a.slot.overlaps(&assignment.slot)) {
            return false;
        }
        if let Some(max_days) = coach.max_days {
            let days: BTreeSet<_> = existing.iter().map(|a| a.slot.day).collect();
            if !days.contains(&assignment.slot.day) && days.len() >= max_days {
                return false;
            }
        }
        if self.constraints.exclusive_teacher_slots
            && self.student_assignment.iter().flatten().any(|a| {
                a.coach != assignment.coach
                    && a.slot.overlaps(&assignment.slot)
                    && school.students[a.student].teacher == student.teacher
            })
        {
            return false;
        }
        coach.availability.contains(&assignment.slot)
            && student.availability.contains(&assignment.slot)
    }

    /// Apply a transaction: retract the given assignments, then add the new ones.
    ///
    /// Returns None, if the transaction is not applicable: if a retracted assignment is not part of the state or is
    /// fixed, if any added assignment cannot be added or if the result splits a coach's day into more visits.
    pub fn apply(&self, school: &School, transaction: &Transaction) -> Option<State> {
        let mut next = self.clone();
        for r in transaction.retract.iter() {
            if r.origin.is_fixed() || next.student_assignment[r.student] != Some(*r) {
                return None;
            }
            next.remove(r);
        }
        for a in transaction.add.iter() {
            if a.origin != Origin::NewlySolved || !next.admissible(school, a) {
                return None;
            }
            next.insert(*a);
        }
        if self.constraints.single_visit_per_day {
            let touched: BTreeSet<(usize, Day)> = transaction
                .retract
                .iter()
                .chain(transaction.add.iter())
                .map(|a| (a.coach, a.slot.day))
                .collect();
            for (coach, day) in touched {
                let before = visits(self.coach_assignments(coach), day);
                if visits(next.coach_assignments(coach), day) > before.max(1) {
                    return None;
                }
            }
        }
        Some(next)
    }

    fn insert(&mut self, assignment: Assignment) {
        self.student_assignment[assignment.student] = Some(assignment);
        let list = &mut self.coach_assignments[assignment.coach];
        let pos = list
            .binary_search_by(|a| a.slot.cmp(&assignment.slot))
            .unwrap_or_else(|p| p);
        list.insert(pos, assignment);
        self.matched += 1;
    }

    fn remove(&mut self, assignment: &Assignment) {
        self.student_assignment[assignment.student] = None;
        self.coach_assignments[assignment.coach].retain(|a| a != assignment);
        self.matched -= 1;
    }
}

/// Number of visits (maximal blocks of back-to-back sessions) on the given day. The assignments must be sorted by slot.
fn visits(assignments: &[Assignment], day: Day) -> usize {
    let mut result = 0;
    let mut previous: Option<&Assignment> = None;
    for a in assignments.iter().filter(|a| a.slot.day == day) {
        match previous {
            Some(p) if p.slot.is_followed_by(&a.slot) => {}
            _ => result += 1,
        }
        previous = Some(a);
    }
    result
}
