//! This module provides a generic implementation of the branch and bound algorithm using a depth-first search.
//!
//! The pending subproblems (nodes in the Branch and Bound tree) are stored on an explicit stack, together with an upper
//! bound of the score reachable within each subproblem. Thus, the search does not depend on the call stack and can be
//! interrupted between any two nodes. Digging into the depth of the tree first gives good lower bounds for bounding the
//! remaining branches sooner.
//!
//! The best feasible solution, found so far, is kept as incumbent. Its score is compared to the bounds of the pending
//! subproblems, when they are taken from the stack, since a better incumbent may have been found in the meantime.

use log::debug;
use num_traits::bounds::Bounded;
use std::time::{Duration, Instant};

/// Result type for solving a single branch and bound node.
#[derive(Debug)]
pub enum NodeResult<SubProblem, Solution, Score> {
    /// No solution at all (subproblem was infeasible)
    NoSolution,
    /// A solution without any further branches to try (including the solution's score to compare to other solutions)
    Feasible(Solution, Score),
    /// A solution together with more restricted SubProblems ("branches") to try, each with an upper bound for the score
    /// reachable within the branch. The branches are explored in the given order.
    Branched(Solution, Score, Vec<(SubProblem, Score)>),
}

/// Counters of a branch and bound run
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Statistics {
    /// Number of solved nodes
    pub explored: u64,
    /// Number of nodes dropped, because their bound was not better than the incumbent
    pub pruned: u64,
    /// Number of times a better incumbent has been found
    pub improved: u64,
    /// True, if the search has been stopped before exhausting the tree
    pub aborted: bool,
    pub elapsed: Duration,
}

/// Main function of this module to solve a generic problem by doing depth-first branch and bound optimization.
///
/// This function takes a callback function, which is executed for each single node in the branch and bound tree and
/// returns a solution to be considered for the result and possibly a `Vec` of new subproblems to try (see `NodeResult`
/// type). Before solving each node, `should_continue` is asked whether to go on; the search stops with the best result
/// found so far otherwise. When all branches of the branch and bound tree are evaluated (or bound), the best result is
/// returned. It may be possible, that no result is found at all.
pub fn solve<SubProblem, Solution, Score, F, C>(
    mut node_solver: F,
    base_problem: SubProblem,
    base_bound: Score,
    mut should_continue: C,
) -> (Option<(Solution, Score)>, Statistics)
where
    Score: PartialOrd + Bounded + Copy,
    F: FnMut(SubProblem) -> NodeResult<SubProblem, Solution, Score>,
    C: FnMut(&Statistics) -> bool,
{
    let start = Instant::now();
    let mut statistics = Statistics::default();
    let mut pending_nodes: Vec<(SubProblem, Score)> = vec![(base_problem, base_bound)];
    let mut best_result: Option<Solution> = None;
    let mut best_score = Score::min_value();

    while let Some((subproblem, bound)) = pending_nodes.pop() {
        statistics.elapsed = start.elapsed();
        if !should_continue(&statistics) {
            debug!("Stopping branch and bound search after {} nodes.", statistics.explored);
            statistics.aborted = true;
            break;
        }
        if best_result.is_some() && !(bound > best_score) {
            statistics.pruned += 1;
            continue;
        }

        statistics.explored += 1;
        let branches = match node_solver(subproblem) {
            NodeResult::NoSolution => continue,
            NodeResult::Feasible(solution, score) => {
                consider(solution, score, &mut best_result, &mut best_score, &mut statistics);
                continue;
            }
            NodeResult::Branched(solution, score, branches) => {
                consider(solution, score, &mut best_result, &mut best_score, &mut statistics);
                branches
            }
        };

        // Only consider more restricted new problems, if they might beat the best solution known so far
        for (new_problem, new_bound) in branches.into_iter().rev() {
            if new_bound > best_score {
                pending_nodes.push((new_problem, new_bound));
            } else {
                statistics.pruned += 1;
            }
        }
    }

    statistics.elapsed = start.elapsed();
    return match best_result {
        None => (None, statistics),
        Some(x) => (Some((x, best_score)), statistics),
    };
}

/// Replace the incumbent, if the solution is strictly better
fn consider<Solution, Score: PartialOrd>(
    solution: Solution,
    score: Score,
    best_result: &mut Option<Solution>,
    best_score: &mut Score,
    statistics: &mut Statistics,
) {
    if best_result.is_none() || score > *best_score {
        debug!("Wow, this is the best solution, we found so far. Let's store it.");
        *best_result = Some(solution);
        *best_score = score;
        statistics.improved += 1;
    }
}
