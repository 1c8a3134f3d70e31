//! A specialization of the generic branch and bound algorithm from `bab` for matching coaches and students.
//!
//! Each node of the branch and bound tree holds an assignment state and the ranked list of candidate transactions for
//! this state. A node is branched on its next candidate: one branch applies the candidate (and ranks the candidates of
//! the resulting state), the other one skips it. Candidates decided on the path from the root are not generated again
//! within the subtree.
//!
//! The score of a state is the number of matched students, with the number of teachers (classrooms) with at least one
//! matched student as secondary objective. Branches are bound by the number of still matchable students and their
//! teachers, which is computed from the compatibility graph once per school (see `precompute_problem()`). The coaches'
//! locality (back-to-back sessions) is not part of the search. It is improved afterwards by relocating sessions of the
//! best assignment found (see `polish_locality()`).

mod solution_score;
#[cfg(test)]
mod tests;

pub use self::solution_score::{solution_quality, summarize, SchoolSummary};
pub use crate::bab::Statistics;

use crate::bab::NodeResult::{self, Branched, Feasible};
use crate::cycles::{Candidate, CandidateKind, CycleFinder, FinderConfig};
use crate::graph::CompatibilityGraph;
use crate::ranking::{locality, Ranker};
use crate::state::{Constraints, State, Transaction};
use crate::timegrid::{GridConfig, TimeSlot};
use crate::{Assignment, Origin, School};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::time::Duration;

pub type Score = u64;

/// Default limit of explored branch and bound nodes per school
pub const DEFAULT_MAX_NODES: u64 = 100_000;

/// Limits for the branch and bound search of a single school. When a limit is reached, the best assignment found so far
/// is returned.
///
/// The node limit keeps results reproducible. A time limit makes them depend on the machine's speed and load, so it is
/// not set by default.
#[derive(Clone, Debug, PartialEq)]
pub struct SearchBudget {
    pub time_limit: Option<Duration>,
    pub max_nodes: Option<u64>,
}

impl Default for SearchBudget {
    fn default() -> Self {
        SearchBudget {
            time_limit: None,
            max_nodes: Some(DEFAULT_MAX_NODES),
        }
    }
}

impl SearchBudget {
    pub fn unlimited() -> Self {
        SearchBudget {
            time_limit: None,
            max_nodes: None,
        }
    }

    pub fn should_continue(&self, statistics: &Statistics) -> bool {
        self.time_limit.map_or(true, |l| statistics.elapsed < l)
            && self.max_nodes.map_or(true, |n| statistics.explored < n)
    }
}

/// Parameters of the matching of a single school
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    /// Seed of the candidate ranking's tie-breaking. Equal seeds give equal results.
    pub seed: u64,
    pub finder: FinderConfig,
    pub constraints: Constraints,
    #[serde(skip)]
    pub budget: SearchBudget,
}

#[derive(Clone, Debug)]
pub struct MatchResult {
    /// All assignments of the school (fixed and newly solved ones), ordered by coach and slot
    pub assignments: Vec<Assignment>,
    /// Search score (matched students, then teachers) combined with the locality as least significant part
    pub score: Score,
    pub matched: usize,
    /// Number of teachers with at least one matched student
    pub teachers: usize,
    pub locality: u32,
    /// Upper bound of the number of matched students
    pub max_matched: usize,
    pub statistics: Statistics,
}

/// Main method of the module to find a near-optimal set of new assignments for a school.
///
/// It takes the school's valid coaches and students and the fixed (manual and verified existing) assignments. The fixed
/// assignments are part of every solution. If the search is stopped by the budget, the best assignment found so far is
/// returned, which is never worse than the fixed assignments alone.
pub fn solve(
    school: &School,
    fixed: &[Assignment],
    grid: &GridConfig,
    config: &MatchConfig,
) -> MatchResult {
    let graph = CompatibilityGraph::build(school, fixed, grid);
    let context = SearchContext {
        school,
        graph: &graph,
        problem: precompute_problem(school, &graph, fixed),
        ranker: Ranker::new(config.seed),
        // Relocations don't change the search score. They are left to the polishing afterwards.
        finder: FinderConfig {
            relocations: false,
            ..config.finder.clone()
        },
    };

    let baseline = Rc::new(add_irrefutable_matches(
        school,
        &graph,
        &context.problem,
        State::with_fixed(school, fixed).with_constraints(config.constraints),
    ));
    let decided = Rc::new(Decided::Nil);
    let root = BABNode {
        candidates: Rc::new(context.ranked_candidates(&baseline, &decided, 0)),
        state: baseline.clone(),
        next: 0,
        decided,
        salt: 0,
    };
    let root_bound = context.node_bound(&root);
    debug!(
        "Starting search for school '{}' with {} candidates. At most {} students can be matched.",
        school.name,
        root.candidates.len(),
        context.problem.max_matched()
    );

    let (result, statistics) = crate::bab::solve(
        |node| run_bab_node(&context, node),
        root,
        root_bound,
        |s| config.budget.should_continue(s),
    );
    let (state, score) = match result {
        Some(x) => x,
        None => {
            let score = context.evaluate(&baseline);
            (baseline, score)
        }
    };
    let state = polish_locality(school, &graph, &config.finder, &context.ranker, (*state).clone());
    let locality = locality(&state, school);

    info!(
        "Matched {} of {} students of school '{}' after {} nodes ({} pruned){}.",
        state.matched(),
        school.students.len(),
        school.name,
        statistics.explored,
        statistics.pruned,
        if statistics.aborted {
            ", search stopped by budget"
        } else {
            ""
        }
    );
    MatchResult {
        assignments: state.assignments(),
        score: score * context.problem.locality_scale + locality as Score,
        matched: state.matched(),
        teachers: context.problem.covered_teachers(&state),
        locality,
        max_matched: context.problem.max_matched(),
        statistics,
    }
}

/// Precomputed problem definition, that can be reused for every Branch and Bound node
struct PreComputedProblem {
    /// Adjacency matrix of the compatibility graph. Each row represents one coach, each column one student.
    adjacency_matrix: ndarray::Array2<bool>,
    /// Marks all students with at least one edge
    matchable: ndarray::Array1<bool>,
    num_fixed: usize,
    /// Maximum number of newly matched students, disregarding session times (maximum b-matching of the graph)
    relaxation: usize,
    /// Index of each student's teacher, numbered by first appearance
    teacher_of: Vec<usize>,
    num_teachers: usize,
    /// Weight of a matched student in the search score. Greater than any possible number of teachers.
    teacher_scale: Score,
    /// Weight of the search score in the final score. Greater than any possible locality value.
    locality_scale: Score,
}

impl PreComputedProblem {
    fn max_matched(&self) -> usize {
        self.num_fixed + self.relaxation
    }

    /// Marks the teachers with at least one matched student
    fn covered(&self, state: &State) -> Vec<bool> {
        let mut covered = vec![false; self.num_teachers];
        for student in (0..self.teacher_of.len()).filter(|s| state.is_matched(*s)) {
            covered[self.teacher_of[student]] = true;
        }
        covered
    }

    fn covered_teachers(&self, state: &State) -> usize {
        self.covered(state).into_iter().filter(|c| *c).count()
    }
}

/// Generate the precomputed problem defintion (esp. the adjacency matrix and the root relaxation) from the school's
/// compatibility graph
fn precompute_problem(
    school: &School,
    graph: &CompatibilityGraph,
    fixed: &[Assignment],
) -> PreComputedProblem {
    let num_coaches = school.coaches.len();
    let num_students = school.students.len();

    let mut adjacency_matrix = ndarray::Array2::from_elem([num_coaches, num_students], false);
    let mut matchable = ndarray::Array1::from_elem([num_students], false);
    for edge in graph.edges() {
        adjacency_matrix[[edge.coach, edge.student]] = true;
        matchable[edge.student] = true;
    }

    let mut fixed_load = vec![0usize; num_coaches];
    for a in fixed.iter() {
        fixed_load[a.coach] += 1;
    }
    let remaining_capacity: Vec<usize> = school
        .coaches
        .iter()
        .map(|c| c.capacity.saturating_sub(fixed_load[c.index]))
        .collect();
    let mut teacher_index: HashMap<&str, usize> = HashMap::new();
    let teacher_of: Vec<usize> = school
        .students
        .iter()
        .map(|s| {
            let next = teacher_index.len();
            *teacher_index.entry(s.teacher.as_str()).or_insert(next)
        })
        .collect();
    let num_teachers = teacher_index.len();

    let relaxation = max_b_matching(&adjacency_matrix, &remaining_capacity);
    PreComputedProblem {
        adjacency_matrix,
        matchable,
        num_fixed: fixed.len(),
        relaxation,
        teacher_of,
        num_teachers,
        teacher_scale: num_teachers as Score + 1,
        locality_scale: 3 * num_students as Score + 1,
    }
}

/// Maximum number of students, that can be assigned to adjacent coaches, regarding the coaches' capacities
fn max_b_matching(adjacency_matrix: &ndarray::Array2<bool>, capacity: &[usize]) -> usize {
    let (num_coaches, num_students) = adjacency_matrix.dim();
    let mut assigned: Vec<Vec<usize>> = vec![Vec::new(); num_coaches];
    let mut result = 0;
    for student in 0..num_students {
        let mut visited = vec![false; num_coaches];
        if augment(student, adjacency_matrix, capacity, &mut assigned, &mut visited) {
            result += 1;
        }
    }
    result
}

/// Search an augmenting path for the student
fn augment(
    student: usize,
    adjacency_matrix: &ndarray::Array2<bool>,
    capacity: &[usize],
    assigned: &mut Vec<Vec<usize>>,
    visited: &mut Vec<bool>,
) -> bool {
    for coach in 0..capacity.len() {
        if !adjacency_matrix[[coach, student]] || visited[coach] {
            continue;
        }
        visited[coach] = true;
        if assigned[coach].len() < capacity[coach] {
            assigned[coach].push(student);
            return true;
        }
        for i in 0..assigned[coach].len() {
            let other = assigned[coach][i];
            if augment(other, adjacency_matrix, capacity, assigned, visited) {
                assigned[coach][i] = student;
                return true;
            }
        }
    }
    false
}

/// Add all matches which are part of every optimal solution: students with a single option, whose coach can neither run
/// out of capacity nor be wanted by another open student at an overlapping time. With the single visit rule, the coach
/// must not be wanted by any other open student. With exclusive teacher slots, no other open student of the same
/// teacher may have an overlapping session with another coach.
fn add_irrefutable_matches(
    school: &School,
    graph: &CompatibilityGraph,
    problem: &PreComputedProblem,
    mut state: State,
) -> State {
    let mut added = 0;
    for student in 0..school.students.len() {
        if state.is_matched(student) || graph.student_options(student) != 1 {
            continue;
        }
        let edge = graph.student_edges(student)[0];
        let coach = graph.edge(edge).coach;
        let slot = graph.sessions(edge)[0];

        let competitors = problem
            .adjacency_matrix
            .row(coach)
            .iter()
            .enumerate()
            .filter(|(s, adjacent)| **adjacent && *s != student && !state.is_matched(*s))
            .count();
        let c = &school.coaches[coach];
        if c.max_days.is_some() || state.coach_load(coach) + 1 + competitors > c.capacity {
            continue;
        }
        if state.constraints().single_visit_per_day && competitors > 0 {
            continue;
        }
        let contested = graph.coach_edges(coach).iter().any(|e| {
            graph.edge(*e).student != student
                && !state.is_matched(graph.edge(*e).student)
                && graph.sessions(*e).iter().any(|s| s.overlaps(&slot))
        });
        if contested {
            continue;
        }
        let teacher = problem.teacher_of[student];
        let shared = state.constraints().exclusive_teacher_slots
            && (0..school.students.len()).any(|other| {
                other != student
                    && problem.teacher_of[other] == teacher
                    && !state.is_matched(other)
                    && graph.student_edges(other).iter().any(|e| {
                        graph.edge(*e).coach != coach
                            && graph.sessions(*e).iter().any(|s| s.overlaps(&slot))
                    })
            });
        if shared {
            continue;
        }

        let transaction = Transaction {
            retract: Vec::new(),
            add: vec![new_assignment(coach, student, slot)],
        };
        if let Some(next) = state.apply(school, &transaction) {
            state = next;
            added += 1;
        }
    }
    debug!("Added {} irrefutable matches to the baseline.", added);
    state
}

fn new_assignment(coach: usize, student: usize, slot: TimeSlot) -> Assignment {
    Assignment {
        coach,
        student,
        slot,
        origin: Origin::NewlySolved,
    }
}

/// Persistent list of the keys of the candidates decided on the path from the root to a node
enum Decided {
    Nil,
    Cons(u64, Rc<Decided>),
}

impl Decided {
    fn keys(&self) -> HashSet<u64> {
        let mut result = HashSet::new();
        let mut current = self;
        while let Decided::Cons(key, next) = current {
            result.insert(*key);
            current = &**next;
        }
        result
    }
}

/// Parameter set for one subproblem of the Branch and Bound algorithm
#[derive(Clone)]
struct BABNode {
    state: Rc<State>,
    /// Ranked candidates of the state
    candidates: Rc<Vec<Candidate>>,
    /// Index of the next candidate to branch on
    next: usize,
    decided: Rc<Decided>,
    /// Salt of the candidate ranking for the children of this node
    salt: u64,
}

/// Everything a node solver needs to know about the school
struct SearchContext<'a> {
    school: &'a School,
    graph: &'a CompatibilityGraph,
    problem: PreComputedProblem,
    ranker: Ranker,
    finder: FinderConfig,
}

impl<'a> SearchContext<'a> {
    fn evaluate(&self, state: &State) -> Score {
        state.matched() as Score * self.problem.teacher_scale
            + self.problem.covered_teachers(state) as Score
    }

    /// Upper bound of the score of any state reachable from the given state. No candidate unmatches a student, so only
    /// open students with edges can be added, each of them covering at most one more teacher.
    fn bound(&self, state: &State) -> Score {
        let mut reachable = self.problem.covered(state);
        let covered = reachable.iter().filter(|c| **c).count();
        let mut open = 0;
        for s in 0..self.school.students.len() {
            if self.problem.matchable[s] && !state.is_matched(s) {
                open += 1;
                reachable[self.problem.teacher_of[s]] = true;
            }
        }
        let max_matched = (state.matched() + open).min(self.problem.max_matched());
        let max_teachers = reachable
            .iter()
            .filter(|r| **r)
            .count()
            .min(covered + max_matched.saturating_sub(state.matched()));
        max_matched as Score * self.problem.teacher_scale + max_teachers as Score
    }

    fn node_bound(&self, node: &BABNode) -> Score {
        if node.next >= node.candidates.len() {
            self.evaluate(&node.state)
        } else {
            self.bound(&node.state)
        }
    }

    fn ranked_candidates(&self, state: &State, decided: &Decided, salt: u64) -> Vec<Candidate> {
        let excluded = decided.keys();
        let candidates: Vec<Candidate> = CycleFinder::new(self.school, self.graph, state, &self.finder)
            .excluding(&excluded)
            .collect();
        self.ranker.rank(candidates, state, self.school, salt)
    }
}

/// Improve the coaches' locality by relocating newly solved sessions, as long as any relocation increases it. The
/// matched students are kept, so the search score is not changed.
fn polish_locality(
    school: &School,
    graph: &CompatibilityGraph,
    finder: &FinderConfig,
    ranker: &Ranker,
    mut state: State,
) -> State {
    if !finder.relocations {
        return state;
    }
    let mut current = locality(&state, school);
    let mut round = 0;
    loop {
        let candidates: Vec<Candidate> = CycleFinder::new(school, graph, &state, finder)
            .filter(|c| c.kind == CandidateKind::Relocate)
            .collect();
        let improved = ranker
            .rank(candidates, &state, school, round)
            .into_iter()
            .find_map(|c| {
                let next = state.apply(school, &c.transaction)?;
                let l = locality(&next, school);
                if l > current {
                    Some((next, l))
                } else {
                    None
                }
            });
        match improved {
            Some((next, l)) => {
                state = next;
                current = l;
                round += 1;
            }
            None => {
                debug!("Improved locality to {} in {} relocations.", current, round);
                return state;
            }
        }
    }
}

fn child_salt(salt: u64, branch: u64) -> u64 {
    salt.wrapping_mul(6_364_136_223_846_793_005)
        .wrapping_add(1_442_695_040_888_963_407)
        .wrapping_add(branch)
}

/// Solver for a single branch and bound node/subproblem. The node's state is always a valid solution. If there are
/// candidates left, the node is branched on the next one: the first branch applies it, the second one skips it.
fn run_bab_node(context: &SearchContext, node: BABNode) -> NodeResult<BABNode, Rc<State>, Score> {
    let score = context.evaluate(&node.state);
    if node.next >= node.candidates.len() {
        return Feasible(node.state, score);
    }

    let candidate = &node.candidates[node.next];
    let decided = Rc::new(Decided::Cons(candidate.key(), node.decided.clone()));
    let mut branches = Vec::with_capacity(2);

    if let Some(state) = node.state.apply(context.school, &candidate.transaction) {
        let salt = child_salt(node.salt, 1);
        let child = BABNode {
            candidates: Rc::new(context.ranked_candidates(&state, &decided, salt)),
            state: Rc::new(state),
            next: 0,
            decided: decided.clone(),
            salt,
        };
        let bound = context.node_bound(&child);
        branches.push((child, bound));
    }

    let skip = BABNode {
        state: node.state.clone(),
        candidates: node.candidates.clone(),
        next: node.next + 1,
        decided,
        salt: child_salt(node.salt, 2),
    };
    let bound = context.node_bound(&skip);
    branches.push((skip, bound));

    Branched(node.state, score, branches)
}
