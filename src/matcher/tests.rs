use super::{BABNode, Decided, MatchConfig, SearchBudget, SearchContext};
use crate::bab::NodeResult;
use crate::cycles::FinderConfig;
use crate::graph::CompatibilityGraph;
use crate::ranking::Ranker;
use crate::state::{Constraints, State};
use crate::test_util::{coach, hm, school, student};
use crate::timegrid::{Day, GridConfig, TimeSlot};
use crate::{Assignment, Origin, School};
use std::rc::Rc;

/// Coach 0 is available Mon 9:00-9:30 and 10:00-10:30, Coach 1 only at 9:00. Student 0 is only available at 9:00,
/// Student 1 at both times. Both students can be matched, but only if Student 1 takes Coach 0 at 10:00 or Coach 1.
fn create_simple_problem() -> School {
    let both = [
        (Day::Monday, hm(9, 0), hm(9, 30)),
        (Day::Monday, hm(10, 0), hm(10, 30)),
    ];
    let early = [(Day::Monday, hm(9, 0), hm(9, 30))];
    school(
        vec![coach(0, &both), coach(1, &early)],
        vec![student(0, "x@s", &early), student(1, "y@s", &both)],
    )
}

/// Three coaches with capacity 2 on two days. Student 5 has no common time with any coach.
fn create_medium_problem() -> School {
    let mut coaches = vec![
        coach(0, &[(Day::Monday, hm(9, 0), hm(11, 0))]),
        coach(1, &[(Day::Monday, hm(9, 0), hm(10, 0))]),
        coach(2, &[(Day::Tuesday, hm(9, 0), hm(10, 0))]),
    ];
    for c in coaches.iter_mut() {
        c.capacity = 2;
    }
    school(
        coaches,
        vec![
            student(0, "a@s", &[(Day::Monday, hm(9, 0), hm(9, 30))]),
            student(1, "a@s", &[(Day::Monday, hm(9, 0), hm(10, 0))]),
            student(2, "b@s", &[(Day::Monday, hm(9, 30), hm(10, 30))]),
            student(3, "b@s", &[(Day::Tuesday, hm(9, 0), hm(10, 0))]),
            student(
                4,
                "c@s",
                &[
                    (Day::Monday, hm(10, 0), hm(11, 0)),
                    (Day::Tuesday, hm(9, 0), hm(9, 30)),
                ],
            ),
            student(5, "c@s", &[(Day::Wednesday, hm(9, 0), hm(10, 0))]),
        ],
    )
}

fn budgeted(max_nodes: u64) -> MatchConfig {
    MatchConfig {
        seed: 4711,
        finder: FinderConfig::default(),
        constraints: Constraints::default(),
        budget: SearchBudget {
            time_limit: None,
            max_nodes: Some(max_nodes),
        },
    }
}

/// Check the hard constraints of an assignment set: each student at most once, no double-booked coach, coach
/// capacities, availabilities (except for manual overrides) and presence of the fixed assignments.
fn check_assignment(school: &School, assignments: &[Assignment], fixed: &[Assignment]) {
    for (i, a) in assignments.iter().enumerate() {
        for b in assignments[i + 1..].iter() {
            assert_ne!(a.student, b.student, "Student {} is assigned twice", a.student);
            assert!(
                a.coach != b.coach || !a.slot.overlaps(&b.slot),
                "Coach {} is double-booked at {}",
                a.coach,
                a.slot
            );
        }
        if a.origin != Origin::ManualOverride {
            assert!(
                school.coaches[a.coach].availability.contains(&a.slot),
                "Coach {} is not available at {}",
                a.coach,
                a.slot
            );
            assert!(
                school.students[a.student].availability.contains(&a.slot),
                "Student {} is not available at {}",
                a.student,
                a.slot
            );
        }
    }
    for c in school.coaches.iter() {
        let load = assignments.iter().filter(|a| a.coach == c.index).count();
        let fixed_load = fixed.iter().filter(|a| a.coach == c.index).count();
        assert!(
            load <= c.capacity.max(fixed_load),
            "Coach {} has {} students",
            c.index,
            load
        );
    }
    for f in fixed.iter() {
        assert!(assignments.contains(f), "Fixed assignment {:?} is missing", f);
    }
}

/// Check the scheduling rules: every coach visits the school at most once a day (back-to-back sessions) and two coaches
/// never see students of the same teacher at the same time
fn check_scheduling_rules(school: &School, assignments: &[Assignment]) {
    for c in school.coaches.iter() {
        let mut sessions: Vec<&Assignment> = assignments.iter().filter(|a| a.coach == c.index).collect();
        sessions.sort_by(|a, b| a.slot.cmp(&b.slot));
        for pair in sessions.windows(2) {
            assert!(
                pair[0].slot.day != pair[1].slot.day || pair[0].slot.is_followed_by(&pair[1].slot),
                "Coach {} visits twice on {:?}",
                c.index,
                pair[0].slot.day
            );
        }
    }
    for (i, a) in assignments.iter().enumerate() {
        for b in assignments[i + 1..].iter() {
            assert!(
                a.coach == b.coach
                    || !a.slot.overlaps(&b.slot)
                    || school.students[a.student].teacher != school.students[b.student].teacher,
                "Students {} and {} of the same teacher are coached at the same time",
                a.student,
                b.student
            );
        }
    }
}

/// Four coaches with a capacity of 3 and twelve students of four teachers, all of them available on Monday and Tuesday
/// morning. Every student can be matched in many ways.
fn create_large_problem() -> School {
    let mornings = [
        (Day::Monday, hm(9, 0), hm(12, 0)),
        (Day::Tuesday, hm(9, 0), hm(12, 0)),
    ];
    let mut coaches: Vec<_> = (0..4).map(|i| coach(i, &mornings)).collect();
    for c in coaches.iter_mut() {
        c.capacity = 3;
    }
    let teachers = ["a@s", "b@s", "c@s", "d@s"];
    let students = (0..12)
        .map(|i| student(i, teachers[i % 4], &mornings))
        .collect();
    school(coaches, students)
}

fn as_verified(assignments: &[Assignment]) -> Vec<Assignment> {
    assignments
        .iter()
        .map(|a| Assignment {
            origin: Origin::PreexistingVerified,
            ..*a
        })
        .collect()
}

#[test]
fn test_precompute_problem() {
    let school = create_medium_problem();
    let graph = CompatibilityGraph::build(&school, &[], &GridConfig::default());
    let problem = super::precompute_problem(&school, &graph, &[]);

    assert_eq!(problem.adjacency_matrix.dim(), (3, 6));
    assert!(problem.adjacency_matrix[[0, 0]]);
    assert!(problem.adjacency_matrix[[1, 2]]);
    assert!(!problem.adjacency_matrix[[2, 0]]);
    assert!(problem.adjacency_matrix[[2, 4]]);
    for c in 0..3 {
        assert!(!problem.adjacency_matrix[[c, 5]]);
    }
    assert!(!problem.matchable[5]);
    assert!(problem.matchable[4]);
    assert_eq!(problem.relaxation, 5);
    assert_eq!(problem.max_matched(), 5);
    assert_eq!(problem.num_teachers, 3);
    assert_eq!(problem.teacher_of, vec![0, 0, 1, 1, 2, 2]);
    assert_eq!(problem.teacher_scale, 4);
    assert_eq!(problem.locality_scale, 19);

    // A fixed assignment occupies a place of coach 2
    let fixed = vec![Assignment {
        coach: 2,
        student: 3,
        slot: TimeSlot::new(Day::Tuesday, hm(9, 0), hm(9, 30)).unwrap(),
        origin: Origin::PreexistingVerified,
    }];
    let graph = CompatibilityGraph::build(&school, &fixed, &GridConfig::default());
    let problem = super::precompute_problem(&school, &graph, &fixed);
    assert!(!problem.matchable[3]);
    // Coach 2 is not available at 9:00 on Tuesday anymore, so student 4 can only be coached on Monday
    assert!(!problem.adjacency_matrix[[2, 4]]);
    assert_eq!(problem.max_matched(), 5);
}

#[test]
fn test_max_b_matching() {
    // Three students, all of them only adjacent to coach 0
    let mut adjacency = ndarray::Array2::from_elem([2, 3], false);
    for s in 0..3 {
        adjacency[[0, s]] = true;
    }
    assert_eq!(super::max_b_matching(&adjacency, &[2, 5]), 2);
    // Student 0 can also be coached by coach 1, so the augmenting path frees a place of coach 0
    adjacency[[1, 0]] = true;
    assert_eq!(super::max_b_matching(&adjacency, &[2, 1]), 3);
    assert_eq!(super::max_b_matching(&adjacency, &[0, 0]), 0);
}

#[test]
fn test_irrefutable_matches() {
    let mut c0 = coach(0, &[(Day::Monday, hm(9, 0), hm(10, 0))]);
    c0.capacity = 2;
    let mut school = school(
        vec![c0],
        vec![
            student(0, "a@s", &[(Day::Monday, hm(9, 0), hm(9, 30))]),
            student(1, "a@s", &[(Day::Monday, hm(9, 30), hm(10, 0))]),
        ],
    );
    let graph = CompatibilityGraph::build(&school, &[], &GridConfig::default());
    let problem = super::precompute_problem(&school, &graph, &[]);
    let relaxed = Constraints {
        single_visit_per_day: false,
        ..Constraints::default()
    };
    let state = super::add_irrefutable_matches(
        &school,
        &graph,
        &problem,
        State::new(&school).with_constraints(relaxed),
    );
    assert_eq!(state.matched(), 2);
    check_assignment(&school, &state.assignments(), &[]);
    // With a single visit per day, any other student of the coach might need the neighbouring session
    let state = super::add_irrefutable_matches(&school, &graph, &problem, State::new(&school));
    assert_eq!(state.matched(), 0);

    // A third student competing for 9:00 makes both 9:00 assignments refutable
    school
        .students
        .push(student(2, "b@s", &[(Day::Monday, hm(9, 0), hm(9, 30))]));
    school.coaches[0].capacity = 3;
    let graph = CompatibilityGraph::build(&school, &[], &GridConfig::default());
    let problem = super::precompute_problem(&school, &graph, &[]);
    let state = super::add_irrefutable_matches(
        &school,
        &graph,
        &problem,
        State::new(&school).with_constraints(relaxed),
    );
    assert_eq!(state.matched(), 1);
    assert!(state.is_matched(1));
}

#[test]
fn test_irrefutable_matches_of_same_teacher() {
    // Both students have a single option with different coaches at overlapping times
    let school = school(
        vec![
            coach(0, &[(Day::Monday, hm(9, 0), hm(9, 30))]),
            coach(1, &[(Day::Monday, hm(9, 15), hm(9, 45))]),
        ],
        vec![
            student(0, "a@s", &[(Day::Monday, hm(9, 0), hm(9, 30))]),
            student(1, "a@s", &[(Day::Monday, hm(9, 15), hm(9, 45))]),
        ],
    );
    let graph = CompatibilityGraph::build(&school, &[], &GridConfig::default());
    let problem = super::precompute_problem(&school, &graph, &[]);
    assert_eq!(graph.student_options(0), 1);
    assert_eq!(graph.student_options(1), 1);
    let state = super::add_irrefutable_matches(&school, &graph, &problem, State::new(&school));
    assert_eq!(state.matched(), 0);

    let relaxed = Constraints {
        exclusive_teacher_slots: false,
        ..Constraints::default()
    };
    let state = super::add_irrefutable_matches(
        &school,
        &graph,
        &problem,
        State::new(&school).with_constraints(relaxed),
    );
    assert_eq!(state.matched(), 2);
}

#[test]
fn test_bab_node_simple() {
    let school = create_simple_problem();
    let graph = CompatibilityGraph::build(&school, &[], &GridConfig::default());
    let context = SearchContext {
        school: &school,
        graph: &graph,
        problem: super::precompute_problem(&school, &graph, &[]),
        ranker: Ranker::new(1),
        finder: FinderConfig::default(),
    };
    let state = Rc::new(State::new(&school));
    let decided = Rc::new(Decided::Nil);
    let candidates = Rc::new(context.ranked_candidates(&state, &decided, 0));
    assert_eq!(candidates.len(), 5);
    let node = BABNode {
        state: state.clone(),
        candidates: candidates.clone(),
        next: 0,
        decided: decided.clone(),
        salt: 0,
    };
    // Two students of two teachers
    assert_eq!(context.node_bound(&node), 2 * 3 + 2);

    match super::run_bab_node(&context, node) {
        NodeResult::Branched(solution, score, branches) => {
            assert_eq!(solution.matched(), 0);
            assert_eq!(score, 0);
            assert_eq!(branches.len(), 2);
            // The candidate is applied first, then skipped
            assert_eq!(branches[0].0.state.matched(), 1);
            assert_eq!(branches[1].0.state.matched(), 0);
            assert_eq!(branches[1].0.next, 1);
            // The decided candidate is not generated again
            assert!(branches[0]
                .0
                .candidates
                .iter()
                .all(|c| c.key() != candidates[0].key()));
        }
        _ => panic!("Expected branched result"),
    }

    // Without candidates left, the node is a leaf
    let node = BABNode {
        state,
        candidates: candidates.clone(),
        next: candidates.len(),
        decided,
        salt: 0,
    };
    match super::run_bab_node(&context, node) {
        NodeResult::Feasible(solution, score) => {
            assert_eq!(solution.matched(), 0);
            assert_eq!(score, 0);
        }
        _ => panic!("Expected feasible result"),
    }
}

#[test]
fn test_solve_simple() {
    let school = create_simple_problem();
    let result = super::solve(&school, &[], &GridConfig::default(), &MatchConfig::default());
    assert_eq!(result.matched, 2);
    assert_eq!(result.max_matched, 2);
    assert!(!result.statistics.aborted);
    check_assignment(&school, &result.assignments, &[]);
    let student0 = result.assignments.iter().find(|a| a.student == 0).unwrap();
    assert_eq!(student0.slot.start, hm(9, 0));
    assert!(result
        .assignments
        .iter()
        .all(|a| a.origin == Origin::NewlySolved));
}

#[test]
fn test_solve_medium() {
    let school = create_medium_problem();
    let result = super::solve(&school, &[], &GridConfig::default(), &budgeted(3000));
    check_assignment(&school, &result.assignments, &[]);
    check_scheduling_rules(&school, &result.assignments);
    assert_eq!(result.matched, 5);
    assert_eq!(result.teachers, 3);
    assert!(result.assignments.iter().all(|a| a.student != 5));

    // Equal seeds give equal results
    let second = super::solve(&school, &[], &GridConfig::default(), &budgeted(3000));
    assert_eq!(result.assignments, second.assignments);
    assert_eq!(result.score, second.score);
}

#[test]
fn test_solve_is_idempotent() {
    let school = create_medium_problem();
    let result = super::solve(&school, &[], &GridConfig::default(), &budgeted(3000));
    let fixed = as_verified(&result.assignments);
    let second = super::solve(&school, &fixed, &GridConfig::default(), &budgeted(3000));
    check_assignment(&school, &second.assignments, &fixed);
    assert_eq!(second.assignments.len(), result.assignments.len());
    for (a, b) in result.assignments.iter().zip(second.assignments.iter()) {
        assert_eq!((a.coach, a.student, a.slot), (b.coach, b.student, b.slot));
    }
}

#[test]
fn test_fixed_assignments() {
    let mut school = create_simple_problem();
    school.coaches[0].capacity = 2;
    // Manual override outside of any availability. Coach 0 keeps a place for student 1.
    let manual = Assignment {
        coach: 0,
        student: 0,
        slot: TimeSlot::new(Day::Monday, hm(13, 0), hm(13, 30)).unwrap(),
        origin: Origin::ManualOverride,
    };
    let result = super::solve(
        &school,
        &[manual],
        &GridConfig::default(),
        &MatchConfig::default(),
    );
    check_assignment(&school, &result.assignments, &[manual]);
    assert_eq!(result.matched, 2);
    assert!(result.assignments.contains(&manual));
}

#[test]
fn test_budget_exhausted() {
    let school = create_medium_problem();
    let verified = Assignment {
        coach: 2,
        student: 3,
        slot: TimeSlot::new(Day::Tuesday, hm(9, 30), hm(10, 0)).unwrap(),
        origin: Origin::PreexistingVerified,
    };
    let result = super::solve(&school, &[verified], &GridConfig::default(), &budgeted(0));
    assert!(result.statistics.aborted);
    assert_eq!(result.statistics.explored, 0);
    // The baseline is returned, containing at least the fixed assignment
    assert!(result.matched >= 1);
    check_assignment(&school, &result.assignments, &[verified]);
}

#[test]
fn test_unlimited_search_terminates() {
    let school = create_large_problem();
    let config = MatchConfig {
        seed: 4711,
        budget: SearchBudget::unlimited(),
        ..MatchConfig::default()
    };
    let result = super::solve(&school, &[], &GridConfig::default(), &config);
    assert!(!result.statistics.aborted);
    assert_eq!(result.matched, 12);
    assert_eq!(result.teachers, 4);
    assert_eq!(result.max_matched, 12);
    check_assignment(&school, &result.assignments, &[]);
    check_scheduling_rules(&school, &result.assignments);
    // The first complete assignment reaches the bound of the root, so the remaining branches are pruned
    assert!(result.statistics.explored < 1000);
}

#[test]
fn test_default_budget() {
    assert_eq!(SearchBudget::default().max_nodes, Some(super::DEFAULT_MAX_NODES));
    assert_eq!(SearchBudget::default().time_limit, None);
    assert_eq!(MatchConfig::default().budget, SearchBudget::default());
    let statistics = super::Statistics {
        explored: super::DEFAULT_MAX_NODES,
        ..Default::default()
    };
    assert!(!SearchBudget::default().should_continue(&statistics));
    assert!(SearchBudget::unlimited().should_continue(&statistics));
}

#[test]
fn test_polish_locality() {
    let mut c0 = coach(0, &[(Day::Monday, hm(9, 0), hm(11, 0))]);
    c0.capacity = 2;
    let school = school(
        vec![c0],
        vec![
            student(0, "a@s", &[(Day::Monday, hm(9, 0), hm(11, 0))]),
            student(1, "a@s", &[(Day::Monday, hm(9, 0), hm(11, 0))]),
        ],
    );
    let graph = CompatibilityGraph::build(&school, &[], &GridConfig::default());
    let relaxed = Constraints {
        single_visit_per_day: false,
        ..Constraints::default()
    };
    let monday = |start: u16| TimeSlot::new(Day::Monday, start, start + 30).unwrap();
    let gapped = State::new(&school)
        .with_constraints(relaxed)
        .apply(
            &school,
            &crate::state::Transaction {
                retract: vec![],
                add: vec![
                    super::new_assignment(0, 0, monday(hm(9, 0))),
                    super::new_assignment(0, 1, monday(hm(10, 0))),
                ],
            },
        )
        .unwrap();
    assert_eq!(crate::ranking::locality(&gapped, &school), 0);

    let polished = super::polish_locality(
        &school,
        &graph,
        &FinderConfig::default(),
        &Ranker::new(1),
        gapped.clone(),
    );
    assert_eq!(polished.matched(), 2);
    assert_eq!(crate::ranking::locality(&polished, &school), 3);

    let config = FinderConfig {
        relocations: false,
        ..FinderConfig::default()
    };
    let unchanged = super::polish_locality(&school, &graph, &config, &Ranker::new(1), gapped.clone());
    assert_eq!(unchanged.assignments(), gapped.assignments());

    // The final score combines matched students, teachers and locality
    let result = super::solve(&school, &[], &GridConfig::default(), &MatchConfig::default());
    assert_eq!(result.matched, 2);
    assert_eq!(result.locality, 3);
    assert_eq!(result.score, (2 * 2 + 1) * 7 + 3);
}
