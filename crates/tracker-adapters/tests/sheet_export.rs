use std::path::PathBuf;

use tracker_adapters::{parse_csv, parse_csv_file, parse_sheet};
use tracker_core::Status;

fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

#[test]
fn fixture_export_maps_every_action_row() {
    let sheet = parse_csv_file(fixture_path("sheet_export.csv")).expect("parse fixture");
    assert_eq!(sheet.header_line, 2);
    assert_eq!(sheet.data_rows, 8);
    assert_eq!(sheet.dropped_rows, 1);

    let recs = &sheet.recommendations;
    let ids: Vec<_> = recs.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["R01", "R02", "R03", "R04", "R05", "R06", "R07"]);

    let statuses: Vec<_> = recs.iter().map(|r| r.status).collect();
    assert_eq!(
        statuses,
        vec![
            Status::OnTrack,
            Status::OnTrack,
            Status::NotStarted,
            Status::OnTrack,
            Status::Delayed,
            Status::Completed,
            Status::NotStarted,
        ]
    );

    let departments: Vec<_> = recs.iter().map(|r| r.department.as_str()).collect();
    assert_eq!(
        departments,
        vec!["DSIT", "HMT", "DSIT", "MHCLG", "DSIT", "FCDO", "DSIT"]
    );

    assert_eq!(recs[6].chapter, "2. Data Availability");
    assert!(recs[0].title.ends_with("..."));
    assert!(recs[0].description.contains("backed by a 10-year investment commitment"));
    assert_eq!(recs[2].last_update, "N/A");
    assert_eq!(recs[6].progress, "No update available");
}

#[test]
fn junk_lines_above_header_are_skipped() {
    let csv = [
        "Tracker export",
        "generated automatically",
        "Action,Government response,Govt's stated delivery timeline,Last update,Status",
        "\"Launch national AI hub\",England needs DSIT support,Spring 2025,March 2025,\"The hub has been completed and is fully operational\"",
    ]
    .join("\n");

    let sheet = parse_sheet(&csv);
    assert_eq!(sheet.header_line, 2);
    assert_eq!(sheet.recommendations.len(), 1);

    let rec = &sheet.recommendations[0];
    assert_eq!(rec.id, "R01");
    assert_eq!(rec.chapter, "1. Compute & Infrastructure");
    assert_eq!(rec.department, "DSIT");
    assert_eq!(rec.status, Status::Completed);
    assert_eq!(rec.title, "Launch national AI hub");
    assert_eq!(rec.delivery_timeline, "Spring 2025");
    assert_eq!(rec.last_update, "March 2025");
}

#[test]
fn output_never_exceeds_data_rows() {
    let text = std::fs::read_to_string(fixture_path("sheet_export.csv")).expect("read fixture");
    let sheet = parse_sheet(&text);
    assert!(sheet.recommendations.len() <= sheet.data_rows);
    assert_eq!(parse_csv(&text), sheet.recommendations);
}
