//! Enumeration of candidate transactions ("cycles") which improve a given assignment state.
//!
//! The `CycleFinder` is a lazy iterator. It works through the coaches and students of the school in phases and only
//! computes the candidates of the next coach/student, when the previous ones have been consumed. Every emitted
//! candidate is applicable to the state it has been created for.

use crate::graph::CompatibilityGraph;
use crate::state::{State, Transaction};
use crate::timegrid::TimeSlot;
use crate::{Assignment, Origin, School};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

/// Upper limit for the number of displacement chains generated for a single open student
const MAX_CHAINS_PER_STUDENT: usize = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CandidateKind {
    /// A single new assignment of an open student to a free session of a coach
    Single,
    /// A block of back-to-back sessions of one coach, filled with distinct open students
    Visit,
    /// An open student takes the session of another student, who moves on to another session
    Chain,
    /// A newly solved assignment moves to another session of its coach, next to the coach's other sessions
    Relocate,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Candidate {
    pub kind: CandidateKind,
    pub transaction: Transaction,
}

impl Candidate {
    pub fn key(&self) -> u64 {
        self.transaction.key()
    }

    pub fn gain(&self) -> isize {
        self.transaction.gain()
    }

    /// The coach of the first added assignment
    pub fn coach(&self) -> Option<usize> {
        self.transaction.add.first().map(|a| a.coach)
    }

    /// The student of the first added assignment
    pub fn student(&self) -> Option<usize> {
        self.transaction.add.first().map(|a| a.student)
    }
}

/// Limits of the candidate enumeration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FinderConfig {
    /// Maximum number of back-to-back sessions of a single visit candidate
    pub max_visit_sessions: usize,
    /// Maximum number of displaced students in a chain candidate
    pub max_chain_depth: usize,
    /// Generate relocation candidates
    pub relocations: bool,
}

impl Default for FinderConfig {
    fn default() -> Self {
        FinderConfig {
            max_visit_sessions: 4,
            max_chain_depth: 2,
            relocations: true,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Singles,
    Visits,
    Chains,
    Relocations,
    Done,
}

/// Partial chain during the depth-first chain search
#[derive(Default)]
struct ChainPath {
    retract: Vec<Assignment>,
    add: Vec<Assignment>,
    visited: Vec<usize>,
}

pub struct CycleFinder<'a> {
    school: &'a School,
    graph: &'a CompatibilityGraph,
    state: &'a State,
    config: &'a FinderConfig,
    excluded: Option<&'a HashSet<u64>>,
    phase: Phase,
    cursor: usize,
    buffer: VecDeque<Candidate>,
    emitted: HashSet<u64>,
}

impl<'a> CycleFinder<'a> {
    pub fn new(
        school: &'a School,
        graph: &'a CompatibilityGraph,
        state: &'a State,
        config: &'a FinderConfig,
    ) -> Self {
        CycleFinder {
            school,
            graph,
            state,
            config,
            excluded: None,
            phase: Phase::Singles,
            cursor: 0,
            buffer: VecDeque::new(),
            emitted: HashSet::new(),
        }
    }

    /// Suppress all candidates with one of the given keys
    pub fn excluding(mut self, keys: &'a HashSet<u64>) -> Self {
        self.excluded = Some(keys);
        self
    }

    /// Start the enumeration over again
    pub fn restart(&mut self) {
        self.phase = Phase::Singles;
        self.cursor = 0;
        self.buffer.clear();
        self.emitted.clear();
    }

    /// Compute the candidates of the next coach/student. Returns false, if the enumeration is complete.
    fn refill(&mut self) -> bool {
        let (n, next_phase) = match self.phase {
            Phase::Singles => (self.school.coaches.len(), Phase::Visits),
            Phase::Visits => (self.school.coaches.len(), Phase::Chains),
            Phase::Chains => (self.school.students.len(), Phase::Relocations),
            Phase::Relocations => (self.school.coaches.len(), Phase::Done),
            Phase::Done => return false,
        };
        if self.cursor >= n {
            self.phase = next_phase;
            self.cursor = 0;
            return true;
        }
        let i = self.cursor;
        self.cursor += 1;
        let found = match self.phase {
            Phase::Singles => self.singles(i),
            Phase::Visits => self.visits(i),
            Phase::Chains => self.chains(i),
            Phase::Relocations if self.config.relocations => self.relocations(i),
            _ => Vec::new(),
        };
        self.buffer.extend(found);
        true
    }

    /// Single assignments of open students to free sessions of the coach
    fn singles(&self, coach: usize) -> Vec<Candidate> {
        let mut result = Vec::new();
        if self.state.coach_load(coach) >= self.school.coaches[coach].capacity {
            return result;
        }
        for &e in self.graph.coach_edges(coach) {
            let student = self.graph.edge(e).student;
            if self.state.is_matched(student) {
                continue;
            }
            for slot in self.graph.sessions(e) {
                let a = new_assignment(coach, student, *slot);
                if self.state.can_add(self.school, &a) {
                    result.push(Candidate {
                        kind: CandidateKind::Single,
                        transaction: Transaction {
                            retract: Vec::new(),
                            add: vec![a],
                        },
                    });
                }
            }
        }
        result
    }

    /// Blocks of 2 or more back-to-back free sessions of the coach, each session filled with a distinct open student.
    /// Students with fewer options are preferred.
    fn visits(&self, coach: usize) -> Vec<Candidate> {
        let mut result = Vec::new();
        let room = self.school.coaches[coach]
            .capacity
            .saturating_sub(self.state.coach_load(coach));
        let max_len = room.min(self.config.max_visit_sessions);
        if max_len < 2 {
            return result;
        }

        let mut options: BTreeMap<TimeSlot, Vec<usize>> = BTreeMap::new();
        for &e in self.graph.coach_edges(coach) {
            let student = self.graph.edge(e).student;
            if self.state.is_matched(student) {
                continue;
            }
            for slot in self.graph.sessions(e) {
                if self
                    .state
                    .can_add(self.school, &new_assignment(coach, student, *slot))
                {
                    options.entry(*slot).or_default().push(student);
                }
            }
        }
        for students in options.values_mut() {
            students.sort_by_key(|s| (self.graph.student_options(*s), *s));
        }

        for first in options.keys() {
            let mut block = vec![*first];
            while block.len() < max_len {
                let last = block[block.len() - 1];
                let next = TimeSlot {
                    day: last.day,
                    start: last.end,
                    end: last.end + last.duration(),
                };
                if !options.contains_key(&next) {
                    break;
                }
                block.push(next);
                if let Some(students) = fill_block(&block, &options) {
                    let transaction = Transaction {
                        retract: Vec::new(),
                        add: block
                            .iter()
                            .zip(students.iter())
                            .map(|(slot, student)| new_assignment(coach, *student, *slot))
                            .collect(),
                    };
                    if self.state.apply(self.school, &transaction).is_some() {
                        result.push(Candidate {
                            kind: CandidateKind::Visit,
                            transaction,
                        });
                    }
                }
            }
        }
        result
    }

    /// Displacement chains for the open student: the student takes a session of another (newly solved) student, who is
    /// moved to another session, possibly displacing a third one.
    fn chains(&self, student: usize) -> Vec<Candidate> {
        let mut result = Vec::new();
        if self.state.is_matched(student) || self.graph.student_edges(student).is_empty() {
            return result;
        }
        let mut path = ChainPath::default();
        path.visited.push(student);
        self.extend_chain(student, 0, &mut path, &mut result);
        result
    }

    fn extend_chain(
        &self,
        student: usize,
        depth: usize,
        path: &mut ChainPath,
        out: &mut Vec<Candidate>,
    ) {
        for &e in self.graph.student_edges(student) {
            let coach = self.graph.edge(e).coach;
            let capacity = self.school.coaches[coach].capacity;
            let current: Vec<Assignment> = self
                .state
                .coach_assignments(coach)
                .iter()
                .filter(|a| !path.retract.contains(*a))
                .chain(path.add.iter().filter(|a| a.coach == coach))
                .copied()
                .collect();

            for slot in self.graph.sessions(e) {
                if out.len() >= MAX_CHAINS_PER_STUDENT {
                    return;
                }
                let a = new_assignment(coach, student, *slot);
                let overlapping: Vec<Assignment> = current
                    .iter()
                    .filter(|x| x.slot.overlaps(slot))
                    .copied()
                    .collect();
                let displaceable = match overlapping.len() {
                    0 if current.len() < capacity => {
                        // Free session: the chain ends here
                        if depth > 0 {
                            let mut transaction = Transaction {
                                retract: path.retract.clone(),
                                add: path.add.clone(),
                            };
                            transaction.add.push(a);
                            if self.state.apply(self.school, &transaction).is_some() {
                                out.push(Candidate {
                                    kind: CandidateKind::Chain,
                                    transaction,
                                });
                            }
                        }
                        continue;
                    }
                    // Free session, but the coach is fully booked
                    0 => current.clone(),
                    1 => overlapping,
                    _ => continue,
                };
                if depth >= self.config.max_chain_depth {
                    continue;
                }
                for b in displaceable.iter() {
                    if b.origin.is_fixed()
                        || path.visited.contains(&b.student)
                        || path.add.contains(b)
                    {
                        continue;
                    }
                    path.retract.push(*b);
                    path.add.push(a);
                    path.visited.push(b.student);
                    self.extend_chain(b.student, depth + 1, path, out);
                    path.retract.pop();
                    path.add.pop();
                    path.visited.pop();
                }
            }
        }
    }

    /// Moves of the coach's newly solved assignments to sessions with more adjacent sessions of the same coach
    fn relocations(&self, coach: usize) -> Vec<Candidate> {
        let mut result = Vec::new();
        let assignments = self.state.coach_assignments(coach);
        for a in assignments.iter().filter(|a| a.origin == Origin::NewlySolved) {
            let adjacency = |slot: &TimeSlot| {
                assignments
                    .iter()
                    .filter(|x| *x != a)
                    .filter(|x| x.slot.is_followed_by(slot) || slot.is_followed_by(&x.slot))
                    .count()
            };
            let current = adjacency(&a.slot);
            for &e in self.graph.student_edges(a.student) {
                if self.graph.edge(e).coach != coach {
                    continue;
                }
                for slot in self.graph.sessions(e) {
                    if *slot == a.slot || adjacency(slot) <= current {
                        continue;
                    }
                    let transaction = Transaction {
                        retract: vec![*a],
                        add: vec![new_assignment(coach, a.student, *slot)],
                    };
                    if self.state.apply(self.school, &transaction).is_some() {
                        result.push(Candidate {
                            kind: CandidateKind::Relocate,
                            transaction,
                        });
                    }
                }
            }
        }
        result
    }
}

impl<'a> Iterator for CycleFinder<'a> {
    type Item = Candidate;

    fn next(&mut self) -> Option<Candidate> {
        loop {
            while let Some(candidate) = self.buffer.pop_front() {
                let key = candidate.key();
                if self.excluded.map_or(false, |e| e.contains(&key)) {
                    continue;
                }
                if self.emitted.insert(key) {
                    return Some(candidate);
                }
            }
            if !self.refill() {
                return None;
            }
        }
    }
}

fn new_assignment(coach: usize, student: usize, slot: TimeSlot) -> Assignment {
    Assignment {
        coach,
        student,
        slot,
        origin: Origin::NewlySolved,
    }
}

/// Assign a distinct student to each session of the block (bipartite matching by augmenting paths). Returns the
/// students in block order or None, if the block can not be filled.
fn fill_block(block: &[TimeSlot], options: &BTreeMap<TimeSlot, Vec<usize>>) -> Option<Vec<usize>> {
    let mut owner: HashMap<usize, usize> = HashMap::new();
    for i in 0..block.len() {
        let mut seen = HashSet::new();
        if !augment_session(i, block, options, &mut owner, &mut seen) {
            return None;
        }
    }
    let mut students = vec![0; block.len()];
    for (student, i) in owner {
        students[i] = student;
    }
    Some(students)
}

fn augment_session(
    i: usize,
    block: &[TimeSlot],
    options: &BTreeMap<TimeSlot, Vec<usize>>,
    owner: &mut HashMap<usize, usize>,
    seen: &mut HashSet<usize>,
) -> bool {
    for &student in options[&block[i]].iter() {
        if !seen.insert(student) {
            continue;
        }
        let reassigned = match owner.get(&student).copied() {
            None => true,
            Some(j) => augment_session(j, block, options, owner, seen),
        };
        if reassigned {
            owner.insert(student, i);
            return true;
        }
    }
    false
}
