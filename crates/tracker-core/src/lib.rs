//! Core domain model for the AI action plan tracker.
//!
//! Everything here is pure data plus the derived views the dashboard reads:
//! chapter ranges, delivery horizons, department standings and filters.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "tracker-core";

pub const NO_PROGRESS_PLACEHOLDER: &str = "No update available";
pub const NO_LAST_UPDATE_PLACEHOLDER: &str = "N/A";
pub const DEFAULT_DEPARTMENT: &str = "DSIT";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    #[serde(rename = "Completed")]
    Completed,
    #[serde(rename = "On Track")]
    OnTrack,
    #[serde(rename = "Partially")]
    Partially,
    #[serde(rename = "Delayed")]
    Delayed,
    #[serde(rename = "Not Started")]
    NotStarted,
}

impl Status {
    pub const ALL: [Status; 5] = [
        Status::Completed,
        Status::OnTrack,
        Status::Partially,
        Status::Delayed,
        Status::NotStarted,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Completed => "Completed",
            Status::OnTrack => "On Track",
            Status::Partially => "Partially",
            Status::Delayed => "Delayed",
            Status::NotStarted => "Not Started",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim();
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(label))
    }

    pub fn weight(self) -> u32 {
        match self {
            Status::Completed => 100,
            Status::OnTrack => 75,
            Status::Partially => 50,
            Status::NotStarted => 25,
            Status::Delayed => 0,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const CHAPTERS: [(usize, usize, &str); 6] = [
    (1, 6, "1. Compute & Infrastructure"),
    (7, 13, "2. Data Availability"),
    (14, 22, "3. Talent & Skills"),
    (23, 30, "4. Safety & Regulation"),
    (31, 49, "5. Public Sector Adoption"),
    (50, usize::MAX, "6. Sovereign AI"),
];

pub fn chapter_for_ordinal(ordinal: usize) -> &'static str {
    CHAPTERS
        .iter()
        .find(|(first, last, _)| (*first..=*last).contains(&ordinal))
        .map(|(_, _, label)| *label)
        .unwrap_or("")
}

pub fn recommendation_id(ordinal: usize) -> String {
    format!("R{ordinal:02}")
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceCitation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_plan_page: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_plan_section: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gov_response_page: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gov_response_section: Option<String>,
}

impl SourceCitation {
    pub fn is_empty(&self) -> bool {
        self.action_plan_page.is_none()
            && self.action_plan_section.is_none()
            && self.gov_response_page.is_none()
            && self.gov_response_section.is_none()
    }
}

/// Canonical record handed to every dashboard view. Built once, never patched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    pub id: String,
    pub chapter: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub department: String,
    pub status: Status,
    pub delivery_timeline: String,
    pub gov_response: String,
    pub progress: String,
    pub last_update: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_date: Option<String>,
    #[serde(flatten)]
    pub citation: SourceCitation,
}

impl Recommendation {
    /// Shallow merge: every field present in `citation` overrides the record's.
    pub fn with_citation(mut self, citation: &SourceCitation) -> Self {
        if let Some(page) = citation.action_plan_page {
            self.citation.action_plan_page = Some(page);
        }
        if let Some(section) = &citation.action_plan_section {
            self.citation.action_plan_section = Some(section.clone());
        }
        if let Some(page) = citation.gov_response_page {
            self.citation.gov_response_page = Some(page);
        }
        if let Some(section) = &citation.gov_response_section {
            self.citation.gov_response_section = Some(section.clone());
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSnapshot {
    pub data: Vec<Recommendation>,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepartmentInfo {
    pub code: &'static str,
    pub name: &'static str,
}

pub const DEPARTMENTS: [DepartmentInfo; 6] = [
    DepartmentInfo {
        code: "DSIT",
        name: "Department for Science, Innovation & Technology",
    },
    DepartmentInfo {
        code: "DBT",
        name: "Department for Business and Trade",
    },
    DepartmentInfo {
        code: "DfE",
        name: "Department for Education",
    },
    DepartmentInfo {
        code: "HMT",
        name: "HM Treasury",
    },
    DepartmentInfo {
        code: "DCMS",
        name: "Department for Culture, Media and Sport",
    },
    DepartmentInfo {
        code: "Skills England",
        name: "Skills England",
    },
];

pub fn department_info(code: &str) -> Option<&'static DepartmentInfo> {
    DEPARTMENTS.iter().find(|d| d.code == code)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Horizon {
    Short,
    Medium,
    Long,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelinePosition {
    pub horizon: Horizon,
    pub value: f64,
    pub label: String,
}

const DEFAULT_TIMELINE_YEAR: u32 = 2025;
const SHORT_HORIZON_LIMIT: f64 = 2025.6;
const MEDIUM_HORIZON_LIMIT: f64 = 2026.5;

fn year_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"20\d{2}").expect("static year pattern is valid"))
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}

/// Place a free-text delivery timeline on the short/medium/long horizon axis.
pub fn parse_timeline(timeline: &str) -> TimelinePosition {
    let lower = timeline.to_lowercase();
    let year = year_pattern()
        .find(timeline)
        .and_then(|m| m.as_str().parse::<u32>().ok())
        .unwrap_or(DEFAULT_TIMELINE_YEAR);

    let mut label = timeline.to_string();
    let offset = if lower.contains("spring") {
        label = format!("Spring {year}");
        0.25
    } else if lower.contains("summer") {
        label = format!("Summer {year}");
        0.5
    } else if lower.contains("autumn") || lower.contains("fall") {
        label = format!("Autumn {year}");
        0.75
    } else if lower.contains("end of") {
        label = format!("End {year}");
        0.9
    } else if contains_any(&lower, &["q1", "january", "february", "march"]) {
        0.2
    } else if contains_any(&lower, &["q2", "april", "may", "june"]) {
        0.4
    } else if contains_any(&lower, &["q3", "july", "august", "september"]) {
        0.6
    } else if contains_any(&lower, &["q4", "october", "november", "december"]) {
        0.85
    } else {
        0.5
    };

    let value = f64::from(year) + offset;
    let mut horizon = if value <= SHORT_HORIZON_LIMIT {
        Horizon::Short
    } else if value <= MEDIUM_HORIZON_LIMIT {
        Horizon::Medium
    } else {
        Horizon::Long
    };

    if contains_any(&lower, &["continuous", "ongoing", "thereafter"]) {
        horizon = Horizon::Long;
        label = "Ongoing".to_string();
    }

    TimelinePosition {
        horizon,
        value,
        label,
    }
}

pub fn is_long_term_goal(timeline: &str) -> bool {
    (2028..=2035).any(|year| timeline.contains(&year.to_string()))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineEntry {
    pub id: String,
    pub title: String,
    pub department: String,
    pub status: Status,
    pub delivery_timeline: String,
    pub label: String,
    pub value: f64,
    pub long_term: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HorizonGroup {
    pub horizon: Horizon,
    pub entries: Vec<TimelineEntry>,
}

/// Short, medium and long groups, each ordered by position on the year axis.
pub fn horizon_groups(records: &[Recommendation]) -> Vec<HorizonGroup> {
    let mut groups: Vec<HorizonGroup> = [Horizon::Short, Horizon::Medium, Horizon::Long]
        .into_iter()
        .map(|horizon| HorizonGroup {
            horizon,
            entries: Vec::new(),
        })
        .collect();

    for rec in records {
        let position = parse_timeline(&rec.delivery_timeline);
        let idx = match position.horizon {
            Horizon::Short => 0,
            Horizon::Medium => 1,
            Horizon::Long => 2,
        };
        groups[idx].entries.push(TimelineEntry {
            id: rec.id.clone(),
            title: rec.title.clone(),
            department: rec.department.clone(),
            status: rec.status,
            delivery_timeline: rec.delivery_timeline.clone(),
            label: position.label,
            value: position.value,
            long_term: is_long_term_goal(&rec.delivery_timeline),
        });
    }

    for group in &mut groups {
        group.entries.sort_by(|a, b| a.value.total_cmp(&b.value));
    }
    groups
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCounts {
    pub total: usize,
    pub completed: usize,
    pub on_track: usize,
    pub partially: usize,
    pub delayed: usize,
    pub not_started: usize,
}

impl StatusCounts {
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a Recommendation>) -> Self {
        let mut counts = Self::default();
        for rec in records {
            counts.record(rec.status);
        }
        counts
    }

    pub fn record(&mut self, status: Status) {
        self.total += 1;
        match status {
            Status::Completed => self.completed += 1,
            Status::OnTrack => self.on_track += 1,
            Status::Partially => self.partially += 1,
            Status::Delayed => self.delayed += 1,
            Status::NotStarted => self.not_started += 1,
        }
    }

    pub fn get(&self, status: Status) -> usize {
        match status {
            Status::Completed => self.completed,
            Status::OnTrack => self.on_track,
            Status::Partially => self.partially,
            Status::Delayed => self.delayed,
            Status::NotStarted => self.not_started,
        }
    }

    pub fn percentage(&self, status: Status) -> u32 {
        rounded_percentage(self.get(status), self.total)
    }
}

fn rounded_percentage(part: usize, total: usize) -> u32 {
    if total == 0 {
        return 0;
    }
    ((part as f64 / total as f64) * 100.0).round() as u32
}

fn share(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusShare {
    pub status: Status,
    pub count: usize,
    pub percentage: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusSummary {
    pub total: usize,
    pub statuses: Vec<StatusShare>,
}

pub fn status_summary(records: &[Recommendation]) -> StatusSummary {
    let counts = StatusCounts::from_records(records);
    StatusSummary {
        total: counts.total,
        statuses: Status::ALL
            .into_iter()
            .map(|status| StatusShare {
                status,
                count: counts.get(status),
                percentage: counts.percentage(status),
            })
            .collect(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeagueSort {
    #[default]
    Progress,
    Completed,
    Delayed,
}

impl LeagueSort {
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "progress" => Some(Self::Progress),
            "completed" => Some(Self::Completed),
            "delayed" => Some(Self::Delayed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DepartmentStanding {
    pub code: String,
    pub name: String,
    #[serde(flatten)]
    pub counts: StatusCounts,
    pub percentage: u32,
    pub weighted_score: u32,
    pub recommendation_ids: Vec<String>,
}

impl DepartmentStanding {
    fn sort_key(&self, sort: LeagueSort) -> f64 {
        match sort {
            LeagueSort::Progress => f64::from(self.weighted_score),
            LeagueSort::Completed => share(self.counts.completed, self.counts.total),
            LeagueSort::Delayed => share(self.counts.delayed, self.counts.total),
        }
    }
}

/// Rank departments by delivery performance. Ties go to the larger portfolio.
pub fn league_table(records: &[Recommendation], sort: LeagueSort) -> Vec<DepartmentStanding> {
    let mut standings: Vec<DepartmentStanding> = Vec::new();
    let mut weights: Vec<u32> = Vec::new();

    for rec in records {
        let idx = match standings.iter().position(|s| s.code == rec.department) {
            Some(idx) => idx,
            None => {
                let name = department_info(&rec.department)
                    .map(|info| info.name.to_string())
                    .unwrap_or_else(|| rec.department.clone());
                standings.push(DepartmentStanding {
                    code: rec.department.clone(),
                    name,
                    counts: StatusCounts::default(),
                    percentage: 0,
                    weighted_score: 0,
                    recommendation_ids: Vec::new(),
                });
                weights.push(0);
                standings.len() - 1
            }
        };
        standings[idx].counts.record(rec.status);
        standings[idx].recommendation_ids.push(rec.id.clone());
        weights[idx] += rec.status.weight();
    }

    for (standing, weight) in standings.iter_mut().zip(weights) {
        let total = standing.counts.total;
        standing.percentage =
            rounded_percentage(standing.counts.completed + standing.counts.on_track, total);
        standing.weighted_score = if total == 0 {
            0
        } else {
            (f64::from(weight) / total as f64).round() as u32
        };
    }

    standings.sort_by(|a, b| {
        b.sort_key(sort)
            .partial_cmp(&a.sort_key(sort))
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.counts.total.cmp(&a.counts.total))
    });
    standings
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChapterStat {
    pub chapter: String,
    #[serde(flatten)]
    pub counts: StatusCounts,
}

pub fn chapter_stats<'a>(records: impl IntoIterator<Item = &'a Recommendation>) -> Vec<ChapterStat> {
    let mut stats: Vec<ChapterStat> = Vec::new();
    for rec in records {
        match stats.iter_mut().find(|s| s.chapter == rec.chapter) {
            Some(stat) => stat.counts.record(rec.status),
            None => {
                let mut counts = StatusCounts::default();
                counts.record(rec.status);
                stats.push(ChapterStat {
                    chapter: rec.chapter.clone(),
                    counts,
                });
            }
        }
    }
    stats
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RecommendationFilter {
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub status: Option<Status>,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub chapter: Option<String>,
    #[serde(default, rename = "section")]
    pub action_plan_section: Option<String>,
    #[serde(default, rename = "longTerm")]
    pub long_term: Option<bool>,
}

impl RecommendationFilter {
    pub fn matches(&self, rec: &Recommendation) -> bool {
        let matches_search = match self.search.as_deref().map(str::trim) {
            None | Some("") => true,
            Some(needle) => {
                let needle = needle.to_lowercase();
                [&rec.title, &rec.id, &rec.description, &rec.progress]
                    .iter()
                    .any(|field| field.to_lowercase().contains(&needle))
            }
        };
        let matches_status = self.status.map_or(true, |s| rec.status == s);
        let matches_department = non_empty(&self.department).map_or(true, |d| rec.department == d);
        let matches_chapter = non_empty(&self.chapter).map_or(true, |c| rec.chapter == c);
        let matches_section = non_empty(&self.action_plan_section)
            .map_or(true, |s| rec.citation.action_plan_section.as_deref() == Some(s));
        let matches_long_term = self
            .long_term
            .map_or(true, |want| is_long_term_goal(&rec.delivery_timeline) == want);

        matches_search
            && matches_status
            && matches_department
            && matches_chapter
            && matches_section
            && matches_long_term
    }

    pub fn apply<'a>(&self, records: &'a [Recommendation]) -> Vec<&'a Recommendation> {
        records.iter().filter(|rec| self.matches(rec)).collect()
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}
