//! Ordering of candidate transactions by estimated desirability.
//!
//! Candidates are ranked by a weighted score of their gain (newly matched students), the teachers they cover for the
//! first time, their effect on the coaches' locality (back-to-back sessions) and their disruption (retracted
//! assignments). Ties are broken pseudo-randomly but reproducibly: equally ranked candidates are shuffled with a seeded
//! RNG and then interleaved round-robin, first by coach and then by teacher, to spread the exploration over the coaches
//! and classrooms.

use crate::cycles::Candidate;
use crate::state::State;
use crate::{Assignment, School};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use std::collections::HashMap;
use std::hash::Hash;

pub const GAIN_WEIGHT: i64 = 1000;
pub const COVERAGE_WEIGHT: i64 = 100;
pub const LOCALITY_WEIGHT: i64 = 10;
pub const DISRUPTION_WEIGHT: i64 = 5;
pub const FIRST_CHOICE_AFFINITY: i64 = 2;
pub const OTHER_CHOICE_AFFINITY: i64 = 1;

/// Locality of a single coach's sessions (sorted by slot): 2 points for each pair of back-to-back sessions, 1 more if
/// both students share the same teacher (i.e. classroom).
pub fn coach_locality(assignments: &[Assignment], school: &School) -> u32 {
    assignments
        .windows(2)
        .filter(|pair| pair[0].slot.is_followed_by(&pair[1].slot))
        .map(|pair| {
            if school.students[pair[0].student].teacher == school.students[pair[1].student].teacher
            {
                3
            } else {
                2
            }
        })
        .sum()
}

/// Total locality of all coaches of the state
pub fn locality(state: &State, school: &School) -> u32 {
    (0..school.coaches.len())
        .map(|c| coach_locality(state.coach_assignments(c), school))
        .sum()
}

/// Change of the locality by applying the candidate to the state. Only the coaches touched by the candidate are
/// evaluated.
fn locality_delta(candidate: &Candidate, state: &State, school: &School) -> i64 {
    let t = &candidate.transaction;
    let mut coaches: Vec<usize> = t.retract.iter().chain(t.add.iter()).map(|a| a.coach).collect();
    coaches.sort_unstable();
    coaches.dedup();

    coaches
        .into_iter()
        .map(|c| {
            let before = state.coach_assignments(c);
            let mut after: Vec<Assignment> = before
                .iter()
                .filter(|a| !t.retract.contains(*a))
                .chain(t.add.iter().filter(|a| a.coach == c))
                .copied()
                .collect();
            after.sort_by(|a, b| a.slot.cmp(&b.slot));
            coach_locality(&after, school) as i64 - coach_locality(before, school) as i64
        })
        .sum()
}

/// Number of teachers without any matched student in the state, who get one by applying the candidate
fn newly_covered(candidate: &Candidate, state: &State, school: &School) -> i64 {
    let t = &candidate.transaction;
    let mut teachers: Vec<&str> = t
        .add
        .iter()
        .map(|a| school.students[a.student].teacher.as_str())
        .collect();
    teachers.sort_unstable();
    teachers.dedup();
    teachers
        .into_iter()
        .filter(|teacher| {
            !school.students.iter().any(|s| {
                s.teacher == *teacher
                    && state
                        .assignment_of(s.index)
                        .map_or(false, |a| !t.retract.contains(a))
            })
        })
        .count() as i64
}

/// Weak preference for coaches who listed the school as (first) choice
fn affinity(candidate: &Candidate, school: &School) -> i64 {
    let coach = match candidate.coach() {
        Some(c) => &school.coaches[c],
        None => return 0,
    };
    match coach.schools.iter().position(|s| *s == school.name) {
        Some(0) => FIRST_CHOICE_AFFINITY,
        Some(_) => OTHER_CHOICE_AFFINITY,
        None => 0,
    }
}

/// Estimated desirability of the candidate, if applied to the state
pub fn desirability(candidate: &Candidate, state: &State, school: &School) -> i64 {
    candidate.gain() as i64 * GAIN_WEIGHT
        + newly_covered(candidate, state, school) * COVERAGE_WEIGHT
        + locality_delta(candidate, state, school) * LOCALITY_WEIGHT
        - candidate.transaction.retract.len() as i64 * DISRUPTION_WEIGHT
        + affinity(candidate, school)
}

/// Reproducible ranking of candidates. The seed is fixed per run, the salt per search node.
#[derive(Clone, Debug)]
pub struct Ranker {
    seed: u64,
}

impl Ranker {
    pub fn new(seed: u64) -> Self {
        Ranker { seed }
    }

    pub fn rank(
        &self,
        candidates: Vec<Candidate>,
        state: &State,
        school: &School,
        salt: u64,
    ) -> Vec<Candidate> {
        let mut scored: Vec<(i64, Candidate)> = candidates
            .into_iter()
            .map(|c| (desirability(&c, state, school), c))
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));

        let mut rng = StdRng::seed_from_u64(self.seed ^ salt.wrapping_mul(0x9E37_79B9_7F4A_7C15));
        let cursor = salt as usize;
        let mut result = Vec::with_capacity(scored.len());
        let mut iter = scored.into_iter().peekable();
        while let Some((score, first)) = iter.next() {
            let mut tier = vec![first];
            while let Some((_, c)) = iter.next_if(|(s, _)| *s == score) {
                tier.push(c);
            }
            tier.shuffle(&mut rng);
            let tier = round_robin(tier, |c| c.coach(), cursor);
            let tier = round_robin(
                tier,
                |c| c.student().map(|s| school.students[s].teacher.clone()),
                cursor,
            );
            result.extend(tier);
        }
        result
    }
}

/// Interleave the items by key: one item of each key in turn, keeping the relative order of the items with the same
/// key. The groups are ordered by their first appearance, rotated by `cursor`.
pub fn round_robin<T, K, F>(items: Vec<T>, key: F, cursor: usize) -> Vec<T>
where
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    let mut group_index: HashMap<K, usize> = HashMap::new();
    let mut groups: Vec<Vec<T>> = Vec::new();
    for item in items {
        let next = groups.len();
        let i = *group_index.entry(key(&item)).or_insert(next);
        if i == groups.len() {
            groups.push(Vec::new());
        }
        groups[i].push(item);
    }
    if groups.is_empty() {
        return Vec::new();
    }
    let rotation = cursor % groups.len();
    groups.rotate_left(rotation);

    let total = groups.iter().map(|g| g.len()).sum();
    let mut result = Vec::with_capacity(total);
    let mut iters: Vec<std::vec::IntoIter<T>> = groups.into_iter().map(|g| g.into_iter()).collect();
    while result.len() < total {
        for it in iters.iter_mut() {
            if let Some(item) = it.next() {
                result.push(item);
            }
        }
    }
    result
}
