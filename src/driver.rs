//! Processing of a whole run: record intake, reconciliation of existing assignments and matching, for each school.
//!
//! Schools are independent of each other. They are processed in parallel by a number of worker threads, which take the
//! pending schools from a shared queue. The results are returned in input order.

use crate::matcher::{self, MatchConfig, SchoolSummary, Statistics};
use crate::records::{self, CoachRecord, ExistingAssignmentRecord, ReferralRecord};
use crate::reconcile::reconcile;
use crate::timegrid::GridConfig;
use crate::{Assignment, InvalidEntry, School};
use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::thread;

/// All input records of a single school
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SchoolInput {
    pub name: String,
    #[serde(default)]
    pub referrals: Vec<ReferralRecord>,
    #[serde(default)]
    pub coaches: Vec<CoachRecord>,
    /// Assignments of previous runs and manually created ones
    #[serde(default)]
    pub assignments: Vec<ExistingAssignmentRecord>,
}

/// Result of processing a single school
#[derive(Clone, Debug)]
pub struct SchoolOutcome {
    /// The school's valid coaches and students
    pub school: School,
    /// Final assignments (fixed and newly solved ones), ordered by coach and slot
    pub assignments: Vec<Assignment>,
    pub invalid_referrals: Vec<InvalidEntry>,
    pub invalid_coaches: Vec<InvalidEntry>,
    pub invalid_assignments: Vec<InvalidEntry>,
    pub summary: SchoolSummary,
    /// Upper bound of the number of assignable students
    pub max_matched: usize,
    pub statistics: Statistics,
}

/// A school which could not be matched at all, together with the invalid records found up to the failure
#[derive(Clone, Debug)]
pub struct SchoolFailure {
    pub message: String,
    pub invalid_referrals: Vec<InvalidEntry>,
    pub invalid_coaches: Vec<InvalidEntry>,
}

impl SchoolFailure {
    fn aborted(name: &str) -> Self {
        SchoolFailure {
            message: format!("Processing of school '{}' was aborted", name),
            invalid_referrals: Vec::new(),
            invalid_coaches: Vec::new(),
        }
    }
}

impl fmt::Display for SchoolFailure {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Run the whole pipeline for a single school.
///
/// Invalid records are excluded and reported in the outcome. The school fails as a whole, if it has no valid students
/// or no valid coaches at all. The failure still carries the invalid referral and coach records.
pub fn run_school(
    input: &SchoolInput,
    grid: &GridConfig,
    config: &MatchConfig,
) -> Result<SchoolOutcome, SchoolFailure> {
    info!("Processing school '{}' ...", input.name);
    let intake = records::intake(&input.name, &input.referrals, &input.coaches, grid);
    let message = if intake.school.students.is_empty() {
        Some(format!("No valid referrals for school '{}'", input.name))
    } else if intake.school.coaches.is_empty() {
        Some(format!("No valid coaches for school '{}'", input.name))
    } else {
        None
    };
    if let Some(message) = message {
        return Err(SchoolFailure {
            message,
            invalid_referrals: intake.invalid_referrals,
            invalid_coaches: intake.invalid_coaches,
        });
    }
    crate::assert_data_consitency(&intake.school);

    let reconciliation = reconcile(&intake.school, &input.assignments, grid);
    let result = matcher::solve(&intake.school, &reconciliation.fixed(), grid, config);
    let summary = matcher::summarize(&intake.school, &result.assignments);
    debug!(
        "School '{}': {} of at most {} students assigned, locality {}.",
        input.name, result.matched, result.max_matched, result.locality
    );

    Ok(SchoolOutcome {
        school: intake.school,
        assignments: result.assignments,
        invalid_referrals: intake.invalid_referrals,
        invalid_coaches: intake.invalid_coaches,
        invalid_assignments: reconciliation.rejected,
        summary,
        max_matched: result.max_matched,
        statistics: result.statistics,
    })
}

/// Run the pipeline for all schools, using up to `num_threads` worker threads. Returns the school names and results in
/// input order.
pub fn run_all(
    inputs: Vec<SchoolInput>,
    grid: &GridConfig,
    config: &MatchConfig,
    num_threads: usize,
) -> Vec<(String, Result<SchoolOutcome, SchoolFailure>)> {
    let names: Vec<String> = inputs.iter().map(|i| i.name.clone()).collect();
    let num_threads = num_threads.min(inputs.len()).max(1);
    let pending: Arc<Mutex<VecDeque<(usize, SchoolInput)>>> =
        Arc::new(Mutex::new(inputs.into_iter().enumerate().collect()));
    let results: Arc<Mutex<Vec<Option<Result<SchoolOutcome, SchoolFailure>>>>> =
        Arc::new(Mutex::new(vec![None; names.len()]));
    let grid = Arc::new(grid.clone());
    let config = Arc::new(config.clone());

    // Spawn worker threads
    let mut workers = Vec::<thread::JoinHandle<()>>::new();
    for _i in 0..num_threads {
        let pending = pending.clone();
        let results = results.clone();
        let grid = grid.clone();
        let config = config.clone();
        workers.push(thread::spawn(move || {
            worker(&pending, &results, &grid, &config)
        }));
    }

    // Wait for worker threads to finish
    for worker in workers {
        if worker.join().is_err() {
            error!("A worker thread panicked.");
        }
    }

    let mut results = results.lock().unwrap();
    names
        .into_iter()
        .zip(results.iter_mut())
        .map(|(name, result)| {
            let result = result
                .take()
                .unwrap_or_else(|| Err(SchoolFailure::aborted(&name)));
            (name, result)
        })
        .collect()
}

/// Worker thread entry point: process pending schools until the queue is empty
fn worker(
    pending: &Mutex<VecDeque<(usize, SchoolInput)>>,
    results: &Mutex<Vec<Option<Result<SchoolOutcome, SchoolFailure>>>>,
    grid: &GridConfig,
    config: &MatchConfig,
) {
    loop {
        // The lock is released at the end of the statement
        let next = pending.lock().unwrap().pop_front();
        let (i, input) = match next {
            Some(x) => x,
            None => break,
        };
        let result = run_school(&input, grid, config);
        if let Err(e) = &result {
            error!("{}", e);
        }
        results.lock().unwrap()[i] = Some(result);
    }
}
