use clap::{command, value_parser, Arg, ArgAction};
use log::{error, info, warn};
use rsmatch::driver;
use rsmatch::io;
use rsmatch::matcher::{MatchConfig, SearchBudget, DEFAULT_MAX_NODES};
use rsmatch::state::Constraints;
use std::path::{Path, PathBuf};
use std::time::Duration;

fn main() {
    env_logger::init();

    let args = command!()
        .about("Assign volunteer reading coaches to referred students, one school at a time")
        .arg(
            Arg::new("INPUT")
                .help("Input JSON file with the referral, coach and assignment records of all schools")
                .required(true)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("output_dir")
                .short('o')
                .long("output-dir")
                .help("Directory for the assignments_<school>.json files. Defaults to the input file's directory.")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("school")
                .short('s')
                .long("school")
                .help("Only process the given school(s)")
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("seed")
                .long("seed")
                .help("Seed of the search's tie-breaking. Defaults to the current time.")
                .value_parser(value_parser!(u64)),
        )
        .arg(
            Arg::new("time_limit")
                .long("time-limit")
                .help("Maximum search time per school in seconds. Results may depend on the machine's load then.")
                .value_parser(value_parser!(u64)),
        )
        .arg(
            Arg::new("max_nodes")
                .long("max-nodes")
                .help(format!(
                    "Maximum number of search nodes per school. Defaults to {}.",
                    DEFAULT_MAX_NODES
                ))
                .value_parser(value_parser!(u64)),
        )
        .arg(
            Arg::new("multiple_visits")
                .long("multiple-visits")
                .help("Allow coaches to visit a school more than once a day")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("shared_teacher_slots")
                .long("shared-teacher-slots")
                .help("Allow two coaches to take students of the same teacher at the same time")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("threads")
                .short('j')
                .long("threads")
                .help("Number of schools to process in parallel. Defaults to the number of CPUs.")
                .value_parser(value_parser!(usize)),
        )
        .arg(
            Arg::new("print")
                .short('p')
                .long("print")
                .help("Print the resulting assignments to stdout")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    // Read input file
    let inpath = args
        .get_one::<PathBuf>("INPUT")
        .expect("INPUT is a required argument");
    let file = match std::fs::File::open(inpath) {
        Ok(f) => f,
        Err(e) => {
            error!("Could not open input file {}: {}", inpath.to_string_lossy(), e);
            std::process::exit(exitcode::NOINPUT)
        }
    };
    let (grid, mut schools) = match io::simple::read(file) {
        Ok(x) => x,
        Err(e) => {
            error!("Could not read input file: {}", e);
            std::process::exit(exitcode::DATAERR)
        }
    };
    if let Some(selected) = args.get_many::<String>("school") {
        let selected: Vec<&String> = selected.collect();
        for name in selected.iter() {
            if !schools.iter().any(|s| &s.name == *name) {
                error!("School '{}' not found in input file", name);
                std::process::exit(exitcode::DATAERR)
            }
        }
        schools.retain(|s| selected.contains(&&s.name));
    }
    info!("Read {} schools", schools.len());

    // Configure and run matching
    let seed = args
        .get_one::<u64>("seed")
        .copied()
        .unwrap_or_else(|| chrono::Utc::now().timestamp() as u64);
    info!("Using seed {}", seed);
    let config = MatchConfig {
        seed,
        constraints: Constraints {
            single_visit_per_day: !args.get_flag("multiple_visits"),
            exclusive_teacher_slots: !args.get_flag("shared_teacher_slots"),
        },
        budget: SearchBudget {
            time_limit: args
                .get_one::<u64>("time_limit")
                .map(|s| Duration::from_secs(*s)),
            max_nodes: Some(
                args.get_one::<u64>("max_nodes")
                    .copied()
                    .unwrap_or(DEFAULT_MAX_NODES),
            ),
        },
        ..MatchConfig::default()
    };
    let num_threads = args
        .get_one::<usize>("threads")
        .copied()
        .unwrap_or_else(num_cpus::get);
    let results = driver::run_all(schools, &grid, &config, num_threads);

    // Write results
    let outdir = match args.get_one::<PathBuf>("output_dir") {
        Some(d) => d.clone(),
        None => inpath
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default(),
    };
    let mut successful = 0;
    for (name, result) in results.iter() {
        let outcome = match result {
            Ok(o) => o,
            Err(e) => {
                warn!("No assignments for school '{}': {}", name, e);
                continue;
            }
        };
        successful += 1;
        let summary = &outcome.summary;
        info!(
            "{}: {} of {} students assigned ({:.1} %, at most {} possible), {} of {} teachers, {} of {} coaches, {} back-to-back sessions.",
            name,
            summary.students_assigned,
            summary.students_total,
            summary.students_percent,
            outcome.max_matched,
            summary.teachers_assigned,
            summary.teachers_total,
            summary.coaches_assigned,
            summary.coaches_total,
            summary.back_to_back
        );
        if args.get_flag("print") {
            print!(
                "{}",
                io::format_assignment(&outcome.school, &outcome.assignments)
            );
        }

        let outpath = outdir.join(format!("assignments_{}.json", file_name_part(name)));
        let file = match std::fs::File::create(&outpath) {
            Ok(f) => f,
            Err(e) => {
                error!("Could not open output file {}: {}", outpath.to_string_lossy(), e);
                std::process::exit(exitcode::CANTCREAT)
            }
        };
        if let Err(e) = io::simple::write(file, &outcome.school, &outcome.assignments) {
            error!("Could not write assignments of school '{}': {}", name, e);
            std::process::exit(exitcode::IOERR)
        }
    }

    // Write invalid entries report
    let report_path = inpath.with_file_name("invalid_entries.json");
    let file = match std::fs::File::create(&report_path) {
        Ok(f) => f,
        Err(e) => {
            error!("Could not open report file {}: {}", report_path.to_string_lossy(), e);
            std::process::exit(exitcode::CANTCREAT)
        }
    };
    if let Err(e) = io::report::write(file, &results) {
        error!("Could not write invalid entries report: {}", e);
        std::process::exit(exitcode::IOERR)
    }
    info!(
        "{} invalid entries reported to {}",
        io::report::count_invalid(&results),
        report_path.to_string_lossy()
    );

    if successful == 0 && !results.is_empty() {
        std::process::exit(exitcode::DATAERR)
    }
    std::process::exit(exitcode::OK)
}

/// Convert a school name into a string usable as part of a file name
fn file_name_part(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}
