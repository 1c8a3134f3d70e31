//! The bipartite compatibility graph between the coaches and the open students of a school.

use crate::timegrid::{GridConfig, TimeSlot};
use crate::{Assignment, School};
use log::debug;

/// A feasible pairing of a coach and a student within a common availability window
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Edge {
    pub coach: usize,
    pub student: usize,
    /// The common window of coach and student
    pub window: TimeSlot,
}

/// Compatibility graph of a school.
///
/// Edges are only created for students without fixed assignment and for coaches with remaining capacity. The time of
/// fixed assignments is removed from the coaches' availability. An edge is created for each maximal common window that
/// fits at least one grid-aligned session.
#[derive(Clone, Debug)]
pub struct CompatibilityGraph {
    edges: Vec<Edge>,
    /// Grid-aligned sessions within each edge's window (by edge index)
    sessions: Vec<Vec<TimeSlot>>,
    coach_edges: Vec<Vec<usize>>,
    student_edges: Vec<Vec<usize>>,
}

impl CompatibilityGraph {
    pub fn build(school: &School, fixed: &[Assignment], grid: &GridConfig) -> CompatibilityGraph {
        let mut graph = CompatibilityGraph {
            edges: Vec::new(),
            sessions: Vec::new(),
            coach_edges: vec![Vec::new(); school.coaches.len()],
            student_edges: vec![Vec::new(); school.students.len()],
        };
        let mut fixed_students = vec![false; school.students.len()];
        for a in fixed.iter() {
            fixed_students[a.student] = true;
        }

        for coach in school.coaches.iter() {
            let load = fixed.iter().filter(|a| a.coach == coach.index).count();
            if load >= coach.capacity {
                continue;
            }
            let mut availability = coach.availability.clone();
            for a in fixed.iter().filter(|a| a.coach == coach.index) {
                availability.subtract(&a.slot);
            }

            for student in school.students.iter() {
                if fixed_students[student.index] {
                    continue;
                }
                for window in availability.intersect(&student.availability) {
                    let sessions = grid.sessions(&window);
                    if sessions.is_empty() {
                        continue;
                    }
                    let id = graph.edges.len();
                    graph.edges.push(Edge {
                        coach: coach.index,
                        student: student.index,
                        window,
                    });
                    graph.sessions.push(sessions);
                    graph.coach_edges[coach.index].push(id);
                    graph.student_edges[student.index].push(id);
                }
            }
        }

        debug!(
            "Built compatibility graph of school '{}' with {} edges.",
            school.name,
            graph.edges.len()
        );
        graph
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn edge(&self, id: usize) -> &Edge {
        &self.edges[id]
    }

    /// The grid-aligned sessions within the window of the given edge
    pub fn sessions(&self, edge: usize) -> &[TimeSlot] {
        &self.sessions[edge]
    }

    /// Indices of the coach's edges
    pub fn coach_edges(&self, coach: usize) -> &[usize] {
        &self.coach_edges[coach]
    }

    /// Indices of the student's edges
    pub fn student_edges(&self, student: usize) -> &[usize] {
        &self.student_edges[student]
    }

    /// Number of (coach, session) options of the student
    pub fn student_options(&self, student: usize) -> usize {
        self.student_edges[student]
            .iter()
            .map(|e| self.sessions[*e].len())
            .sum()
    }

    /// Check if the coach and the student share at least one edge
    pub fn connected(&self, coach: usize, student: usize) -> bool {
        self.student_edges[student]
            .iter()
            .any(|e| self.edges[*e].coach == coach)
    }
}
