//! Report of the records excluded from matching, written beside the input file after each run.

use crate::driver::{SchoolFailure, SchoolOutcome};
use chrono::{SecondsFormat, Utc};
use serde_json::json;

/// Write the invalid entries of all schools as JSON to a Writer (e.g. an output file).
///
/// Schools which failed as a whole are listed with their error message and the invalid referrals and coaches found
/// before the failure.
pub fn write<W: std::io::Write>(
    writer: W,
    results: &[(String, Result<SchoolOutcome, SchoolFailure>)],
) -> Result<(), String> {
    let mut schools = Vec::with_capacity(results.len());
    for (name, result) in results.iter() {
        let entry = match result {
            Ok(outcome) => json!({
                "school": name,
                "referrals": serde_json::to_value(&outcome.invalid_referrals)
                    .map_err(|e| format!("{}", e))?,
                "coaches": serde_json::to_value(&outcome.invalid_coaches)
                    .map_err(|e| format!("{}", e))?,
                "assignments": serde_json::to_value(&outcome.invalid_assignments)
                    .map_err(|e| format!("{}", e))?,
            }),
            Err(failure) => json!({
                "school": name,
                "error": failure.message,
                "referrals": serde_json::to_value(&failure.invalid_referrals)
                    .map_err(|e| format!("{}", e))?,
                "coaches": serde_json::to_value(&failure.invalid_coaches)
                    .map_err(|e| format!("{}", e))?,
            }),
        };
        schools.push(entry);
    }
    let data = json!({
        "format": "X-invalid-entries",
        "version": "1.0",
        "created": Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        "schools": schools,
    });
    serde_json::to_writer_pretty(writer, &data).map_err(|e| format!("{}", e))?;

    Ok(())
}

/// Total number of invalid entries over all schools, including the failed ones
pub fn count_invalid(results: &[(String, Result<SchoolOutcome, SchoolFailure>)]) -> usize {
    results
        .iter()
        .map(|(_, r)| match r {
            Ok(o) => {
                o.invalid_referrals.len() + o.invalid_coaches.len() + o.invalid_assignments.len()
            }
            Err(f) => f.invalid_referrals.len() + f.invalid_coaches.len(),
        })
        .sum()
}
