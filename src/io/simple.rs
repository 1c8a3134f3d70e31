use crate::driver::SchoolInput;
use crate::io::to_records;
use crate::timegrid::GridConfig;
use crate::{Assignment, School};
use chrono::{SecondsFormat, Utc};
use serde_json::json;

/// Read the grid metadata and the record sets of all schools from the simple JSON representation (canonical serde_json
/// serialization of `GridConfig` and `SchoolInput` objects).
///
/// The "metadata" object is optional; missing fields take the default grid values.
pub fn read<R: std::io::Read>(reader: R) -> Result<(GridConfig, Vec<SchoolInput>), String> {
    let mut data: serde_json::Value =
        serde_json::from_reader(reader).map_err(|err| err.to_string())?;

    let grid: GridConfig = if data["metadata"].is_null() {
        GridConfig::default()
    } else {
        serde_json::from_value(data["metadata"].take()).map_err(|e| format!("{}", e))?
    };
    if grid.day_start >= grid.day_end {
        return Err(String::from(
            "Invalid metadata: the day must start before it ends",
        ));
    }
    if grid.minutes_per_slot == 0 || grid.minutes_per_session == 0 {
        return Err(String::from(
            "Invalid metadata: slot and session length must be positive",
        ));
    }

    let schools: Vec<SchoolInput> =
        serde_json::from_value(data["schools"].take()).map_err(|e| format!("{}", e))?;
    for (i, s) in schools.iter().enumerate() {
        if schools[..i].iter().any(|other| other.name == s.name) {
            return Err(format!("School '{}' is given twice", s.name));
        }
    }

    Ok((grid, schools))
}

/// Write the assignments of a school as simple JSON representation to a Writer (e.g. an output file).
///
/// The "assignments" list can be fed into the next run as existing assignments: Each entry has the fields of an
/// `ExistingAssignmentRecord`, newly solved and verified assignments being marked with the creation time of this
/// output.
pub fn write<W: std::io::Write>(
    writer: W,
    school: &School,
    assignments: &[Assignment],
) -> Result<(), String> {
    let created = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    let records = to_records(school, assignments, &created);
    let mut entries = Vec::with_capacity(records.len());
    for (record, assignment) in records.iter().zip(assignments.iter()) {
        let mut entry = serde_json::to_value(record).map_err(|e| format!("{}", e))?;
        entry["origin"] = serde_json::to_value(assignment.origin).map_err(|e| format!("{}", e))?;
        entries.push(entry);
    }
    let data = json!({
        "format": "X-coachassignment-simple",
        "version": "1.0",
        "created": created,
        "school": school.name,
        "assignments": entries,
    });
    serde_json::to_writer_pretty(writer, &data).map_err(|e| format!("{}", e))?;

    Ok(())
}
