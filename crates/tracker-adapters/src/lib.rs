//! Spreadsheet export adapter: CSV tokenizing, column mapping and the
//! heuristic department/status classifiers.
//!
//! Every function here is total. Malformed input produces fewer or emptier
//! records, never an error.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use anyhow::{Context, Result};
use regex::Regex;
use serde::Serialize;
use tracing::debug;
use tracker_core::{
    chapter_for_ordinal, recommendation_id, Recommendation, SourceCitation, Status,
    DEFAULT_DEPARTMENT, NO_LAST_UPDATE_PLACEHOLDER, NO_PROGRESS_PLACEHOLDER,
};

pub const CRATE_NAME: &str = "tracker-adapters";

pub mod columns {
    pub const ACTION: &str = "action";
    pub const GOVERNMENT_RESPONSE: &str = "government_response";
    pub const DELIVERY_TIMELINE: &str = "govts_stated_delivery_timeline";
    pub const LAST_UPDATE: &str = "last_update";
    /// Holds the free-text progress report, not the classified status.
    pub const PROGRESS_REPORT: &str = "status";
}

pub const HEADER_SCAN_LINES: usize = 5;
pub const TITLE_MAX_CHARS: usize = 100;
const TITLE_ELLIPSIS: &str = "...";

/// Split one CSV line into trimmed fields.
pub fn tokenize_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for ch in line.chars() {
        match ch {
            // No escape for a literal quote: `""` toggles twice.
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                fields.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    fields.push(current.trim().to_string());
    fields
}

pub fn normalize_header(header: &str) -> String {
    header
        .trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_')
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepartmentRule {
    pub phrase: &'static str,
    pub code: &'static str,
}

impl DepartmentRule {
    pub const fn new(phrase: &'static str, code: &'static str) -> Self {
        Self { phrase, code }
    }
}

pub const DEPARTMENT_RULES: [DepartmentRule; 14] = [
    DepartmentRule::new("Skills England", "Skills England"),
    DepartmentRule::new("DfE", "DfE"),
    DepartmentRule::new("DBT", "DBT"),
    DepartmentRule::new("DHSC", "DHSC"),
    DepartmentRule::new("DWP", "DWP"),
    DepartmentRule::new("HMT", "HMT"),
    DepartmentRule::new("Treasury", "HMT"),
    DepartmentRule::new("Cabinet Office", "Cabinet Office"),
    DepartmentRule::new("Home Office", "Home Office"),
    DepartmentRule::new("FCDO", "FCDO"),
    DepartmentRule::new("MHCLG", "MHCLG"),
    DepartmentRule::new("DCMS", "DCMS"),
    DepartmentRule::new("IPO", "IPO"),
    DepartmentRule::new("DSIT", "DSIT"),
];

fn department_matchers() -> &'static [(Regex, &'static str)] {
    static MATCHERS: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    MATCHERS.get_or_init(|| {
        DEPARTMENT_RULES
            .iter()
            .map(|rule| {
                let pattern = format!(r"(?i)(?-u:\b){}(?-u:\b)", regex::escape(rule.phrase));
                let regex = Regex::new(&pattern).expect("department phrases are literal");
                (regex, rule.code)
            })
            .collect()
    })
}

pub fn extract_department(gov_response: &str) -> &'static str {
    department_matchers()
        .iter()
        .find(|(regex, _)| regex.is_match(gov_response))
        .map(|(_, code)| *code)
        .unwrap_or(DEFAULT_DEPARTMENT)
}

pub const MIN_PROGRESS_CHARS: usize = 20;
pub const SHORT_PROGRESS_CHARS: usize = 80;

pub const DELAYED_PHRASES: [&str; 9] = [
    "no public announcement",
    "not yet published",
    "was expected",
    "expected in summer",
    "expected in spring",
    "haven't been announced",
    "not yet",
    "no further updates",
    "wider appointments not yet",
];

pub const COMPLETED_PHRASES: [&str; 7] = [
    "has been completed",
    "fully operational",
    "fully delivered",
    "implementation complete",
    "successfully completed",
    "now complete",
    "is complete",
];

pub const FUTURE_ONLY_PHRASES: [&str; 5] = [
    "will work with",
    "to appoint",
    "to engage",
    "scoping options",
    "will publish",
];

pub const COMPLETION_SIGNALS: [&str; 3] = ["launched", "published", "announced"];

pub const ON_TRACK_PHRASES: [&str; 11] = [
    "published",
    "launched",
    "announced",
    "went live",
    "is live",
    "is operating",
    "opened",
    "established",
    "selected",
    "running",
    "delivered",
];

pub const FALLBACK_STATUS: Status = Status::OnTrack;

#[derive(Clone, Copy)]
pub struct StatusRule {
    pub name: &'static str,
    pub applies: fn(&str) -> bool,
    pub status: Status,
}

impl StatusRule {
    pub const fn new(name: &'static str, applies: fn(&str) -> bool, status: Status) -> Self {
        Self {
            name,
            applies,
            status,
        }
    }
}

impl fmt::Debug for StatusRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusRule")
            .field("name", &self.name)
            .field("status", &self.status)
            .finish()
    }
}

fn contains_any(text: &str, phrases: &[&str]) -> bool {
    phrases.iter().any(|phrase| text.contains(phrase))
}

fn is_too_short(text: &str) -> bool {
    text.chars().count() < MIN_PROGRESS_CHARS
}

fn mentions_delay(text: &str) -> bool {
    contains_any(text, &DELAYED_PHRASES)
}

fn mentions_completion(text: &str) -> bool {
    contains_any(text, &COMPLETED_PHRASES)
}

fn only_restates_plans(text: &str) -> bool {
    text.chars().count() < SHORT_PROGRESS_CHARS
        && contains_any(text, &FUTURE_ONLY_PHRASES)
        && !contains_any(text, &COMPLETION_SIGNALS)
}

fn mentions_progress(text: &str) -> bool {
    contains_any(text, &ON_TRACK_PHRASES)
}

pub static STATUS_RULES: [StatusRule; 5] = [
    StatusRule::new("too-short", is_too_short, Status::NotStarted),
    StatusRule::new("delayed-phrase", mentions_delay, Status::Delayed),
    StatusRule::new("completed-phrase", mentions_completion, Status::Completed),
    StatusRule::new("future-only", only_restates_plans, Status::NotStarted),
    StatusRule::new("on-track-phrase", mentions_progress, Status::OnTrack),
];

pub fn matching_status_rule(progress: &str) -> Option<&'static StatusRule> {
    let text = progress.trim().to_lowercase();
    STATUS_RULES.iter().find(|rule| (rule.applies)(&text))
}

/// Classify a progress report. `timeline` is accepted for callers that already
/// pass it; no rule reads it yet.
pub fn derive_status(progress: &str, timeline: &str) -> Status {
    let _ = timeline;
    matching_status_rule(progress)
        .map(|rule| rule.status)
        .unwrap_or(FALLBACK_STATUS)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderIndex {
    columns: HashMap<String, usize>,
}

impl HeaderIndex {
    pub fn from_fields(fields: &[String]) -> Self {
        let columns = fields
            .iter()
            .enumerate()
            .map(|(idx, name)| (normalize_header(name), idx))
            .collect();
        Self { columns }
    }

    pub fn position(&self, column: &str) -> Option<usize> {
        self.columns.get(column).copied()
    }

    pub fn value<'a>(&self, row: &'a [String], column: &str) -> &'a str {
        self.position(column)
            .and_then(|idx| row.get(idx))
            .map(String::as_str)
            .unwrap_or("")
    }
}

fn truncate_title(action: &str) -> String {
    if action.chars().count() > TITLE_MAX_CHARS {
        let head: String = action.chars().take(TITLE_MAX_CHARS).collect();
        format!("{head}{TITLE_ELLIPSIS}")
    } else {
        action.to_string()
    }
}

fn or_placeholder(value: &str, placeholder: &str) -> String {
    if value.is_empty() {
        placeholder.to_string()
    } else {
        value.to_string()
    }
}

pub fn map_row(row: &[String], headers: &HeaderIndex, ordinal: usize) -> Option<Recommendation> {
    let action = headers.value(row, columns::ACTION);
    if action.is_empty() {
        return None;
    }
    let gov_response = headers.value(row, columns::GOVERNMENT_RESPONSE);
    let timeline = headers.value(row, columns::DELIVERY_TIMELINE);
    let last_update = headers.value(row, columns::LAST_UPDATE);
    let progress = headers.value(row, columns::PROGRESS_REPORT);

    Some(Recommendation {
        id: recommendation_id(ordinal),
        chapter: chapter_for_ordinal(ordinal).to_string(),
        title: truncate_title(action),
        description: action.to_string(),
        department: extract_department(gov_response).to_string(),
        status: derive_status(progress, timeline),
        delivery_timeline: timeline.to_string(),
        gov_response: gov_response.to_string(),
        progress: or_placeholder(progress, NO_PROGRESS_PLACEHOLDER),
        last_update: or_placeholder(last_update, NO_LAST_UPDATE_PLACEHOLDER),
        completion_date: None,
        citation: SourceCitation::default(),
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedSheet {
    pub header_line: usize,
    pub data_rows: usize,
    pub dropped_rows: usize,
    pub recommendations: Vec<Recommendation>,
}

fn find_header_line(lines: &[&str]) -> usize {
    lines
        .iter()
        .take(HEADER_SCAN_LINES)
        .position(|line| line.to_lowercase().contains("action"))
        .unwrap_or(0)
}

pub fn parse_sheet(csv: &str) -> ParsedSheet {
    let lines: Vec<&str> = csv.trim().split('\n').collect();
    let header_line = find_header_line(&lines);
    let headers = HeaderIndex::from_fields(&tokenize_line(lines[header_line]));

    let data_lines = &lines[header_line + 1..];
    let mut recommendations = Vec::with_capacity(data_lines.len());
    for line in data_lines {
        let row = tokenize_line(line);
        if let Some(rec) = map_row(&row, &headers, recommendations.len() + 1) {
            if !rec.title.is_empty() {
                recommendations.push(rec);
            }
        }
    }

    let dropped_rows = data_lines.len() - recommendations.len();
    debug!(
        header_line,
        data_rows = data_lines.len(),
        dropped_rows,
        "parsed sheet export"
    );
    ParsedSheet {
        header_line,
        data_rows: data_lines.len(),
        dropped_rows,
        recommendations,
    }
}

pub fn parse_csv(csv: &str) -> Vec<Recommendation> {
    parse_sheet(csv).recommendations
}

pub fn parse_csv_file(path: impl AsRef<Path>) -> Result<ParsedSheet> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(parse_sheet(&text))
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str =
        "#,Action,Government response,Govt's stated delivery timeline,Last update,Status";

    fn fields(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn quoted_commas_stay_in_one_field() {
        let fields = tokenize_line("Action,\"Response, with comma\",Q3 2025");
        assert_eq!(fields, vec!["Action", "Response, with comma", "Q3 2025"]);
    }

    #[test]
    fn tokenizer_trims_and_keeps_empty_fields() {
        assert_eq!(tokenize_line(" a , ,b\r"), vec!["a", "", "b"]);
        assert_eq!(tokenize_line(""), vec![""]);
    }

    #[test]
    fn unbalanced_quotes_are_best_effort() {
        assert_eq!(tokenize_line("a,\"b,c"), vec!["a", "b,c"]);
        assert_eq!(tokenize_line("say \"\"hi\"\",x"), vec!["say hi", "x"]);
    }

    #[test]
    fn headers_normalize_to_column_keys() {
        assert_eq!(normalize_header("Govt's stated delivery timeline"), columns::DELIVERY_TIMELINE);
        assert_eq!(normalize_header("  Government   Response "), columns::GOVERNMENT_RESPONSE);
        assert_eq!(normalize_header("Last update"), columns::LAST_UPDATE);
        assert_eq!(normalize_header("#"), "");
    }

    #[test]
    fn department_rules_are_first_match_wins() {
        assert_eq!(extract_department("DBT and DfE will lead"), "DfE");
        assert_eq!(extract_department("Skills England with DfE"), "Skills England");
        assert_eq!(extract_department("HM Treasury to fund"), "HMT");
        assert_eq!(extract_department("the home office"), "Home Office");
        assert_eq!(extract_department("led by dsit"), "DSIT");
    }

    #[test]
    fn department_matching_is_whole_word() {
        assert_eq!(extract_department("DBTX partners"), DEFAULT_DEPARTMENT);
        assert_eq!(extract_department("Recipients of funding"), DEFAULT_DEPARTMENT);
        assert_eq!(extract_department("The government agrees"), "DSIT");
        assert_eq!(extract_department(""), "DSIT");
    }

    #[test]
    fn department_word_boundaries_are_ascii() {
        assert_eq!(extract_department("Agreed. HMTé funding confirmed"), "HMT");
        assert_eq!(extract_department("FCDO’s network will support"), "FCDO");
        assert_eq!(extract_department("HMTs"), DEFAULT_DEPARTMENT);
    }

    #[test]
    fn short_progress_is_not_started() {
        assert_eq!(derive_status("", ""), Status::NotStarted);
        assert_eq!(derive_status("   ", ""), Status::NotStarted);
        let nineteen = "abcdefghijklmnopqrs";
        assert_eq!(nineteen.len(), 19);
        assert_eq!(derive_status(nineteen, ""), Status::NotStarted);
        assert_eq!(derive_status("abcdefghijklmnopqrst", ""), Status::OnTrack);
    }

    #[test]
    fn delayed_phrase_beats_on_track_hint() {
        let text = "no public announcement has been made yet";
        assert_eq!(derive_status(text, "Spring 2025"), Status::Delayed);
        assert_eq!(matching_status_rule(text).unwrap().name, "delayed-phrase");
        assert_eq!(
            derive_status("The strategy was launched but the review is not yet published", ""),
            Status::Delayed
        );
    }

    #[test]
    fn completed_phrases_classify_completed() {
        assert_eq!(
            derive_status("The hub has been completed and is fully operational", ""),
            Status::Completed
        );
        assert_eq!(
            derive_status("Implementation complete across all departments", ""),
            Status::Completed
        );
    }

    #[test]
    fn short_future_only_text_is_not_started() {
        assert_eq!(
            derive_status("Government will work with industry partners", ""),
            Status::NotStarted
        );
        assert_eq!(
            derive_status("Government will publish the plan; consultation launched", ""),
            Status::OnTrack
        );
        let long = format!("DSIT will work with regulators {}", "on detailed design work ".repeat(3));
        assert!(long.chars().count() >= SHORT_PROGRESS_CHARS);
        assert!(matching_status_rule(&long).is_none());
        assert_eq!(derive_status(&long, ""), FALLBACK_STATUS);
    }

    #[test]
    fn on_track_phrases_and_fallback() {
        assert_eq!(derive_status("The AI Growth Zone at Culham was established", ""), Status::OnTrack);
        assert_eq!(
            matching_status_rule("The AI Growth Zone at Culham was established").unwrap().name,
            "on-track-phrase"
        );
        assert!(matching_status_rule("Discussions with partners continue").is_none());
        assert_eq!(derive_status("Discussions with partners continue", ""), Status::OnTrack);
    }

    #[test]
    fn classifier_never_yields_partially() {
        let samples = [
            "",
            "partially delivered so far",
            "Work is partially complete and some elements launched",
            "not yet",
            "is complete",
        ];
        for sample in samples {
            assert_ne!(derive_status(sample, ""), Status::Partially);
        }
    }

    #[test]
    fn rows_without_action_are_dropped() {
        let headers = HeaderIndex::from_fields(&tokenize_line(HEADER));
        assert_eq!(map_row(&fields(&["1", "", "DSIT"]), &headers, 1), None);
        assert_eq!(map_row(&fields(&[]), &headers, 1), None);
    }

    #[test]
    fn row_mapping_fills_placeholders_and_truncates() {
        let headers = HeaderIndex::from_fields(&tokenize_line(HEADER));
        let action = "x".repeat(120);
        let rec = map_row(&fields(&["7", action.as_str(), "DBT leads"]), &headers, 7).unwrap();
        assert_eq!(rec.id, "R07");
        assert_eq!(rec.chapter, "2. Data Availability");
        assert_eq!(rec.title.chars().count(), TITLE_MAX_CHARS + 3);
        assert!(rec.title.ends_with("..."));
        assert_eq!(rec.description, action);
        assert_eq!(rec.department, "DBT");
        assert_eq!(rec.status, Status::NotStarted);
        assert_eq!(rec.delivery_timeline, "");
        assert_eq!(rec.progress, NO_PROGRESS_PLACEHOLDER);
        assert_eq!(rec.last_update, NO_LAST_UPDATE_PLACEHOLDER);
    }

    #[test]
    fn header_row_is_found_within_first_five_lines() {
        let csv = format!(
            "AI Opportunities tracker\nupdated weekly\n{HEADER}\n1,Expand compute,DSIT,2030,June 2025,Procurement launched for new capacity"
        );
        let sheet = parse_sheet(&csv);
        assert_eq!(sheet.header_line, 2);
        assert_eq!(sheet.recommendations.len(), 1);
        assert_eq!(sheet.recommendations[0].status, Status::OnTrack);
    }

    #[test]
    fn header_defaults_to_first_line() {
        let csv = "Title,Owner\nCompute plan,DSIT";
        let sheet = parse_sheet(csv);
        assert_eq!(sheet.header_line, 0);
        assert!(sheet.recommendations.is_empty());
        assert_eq!(sheet.dropped_rows, 1);
    }

    #[test]
    fn ids_stay_contiguous_across_dropped_rows() {
        let csv = format!(
            "{HEADER}\n1,First action,,,,\n2,,,,,\n\n3,Third action,,,,\n4,Fourth action,,,,"
        );
        let recs = parse_csv(&csv);
        let ids: Vec<_> = recs.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["R01", "R02", "R03"]);
        assert_eq!(recs[1].title, "Third action");
    }

    #[test]
    fn parsing_is_deterministic() {
        let csv = format!(
            "{HEADER}\n1,\"Set out a plan, backed by funding\",HMT,Spring 2025,,\"Plan published, funding announced\""
        );
        let first = serde_json::to_string(&parse_csv(&csv)).unwrap();
        let second = serde_json::to_string(&parse_csv(&csv)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn empty_input_yields_no_records() {
        assert!(parse_csv("").is_empty());
        assert!(parse_csv("   \n  ").is_empty());
    }
}
