//! JSON API over the tracker pipeline. Every read goes through the cache.

use std::sync::Arc;

use axum::{
    extract::{Path as AxumPath, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tracing::info;
use tracker_core::{
    chapter_stats, horizon_groups, league_table, status_summary, LeagueSort,
    RecommendationFilter, Status,
};
use tracker_sync::{LoadOutcome, TrackerConfig, TrackerPipeline};

pub const CRATE_NAME: &str = "tracker-web";

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<TrackerPipeline>,
}

impl AppState {
    pub fn new(pipeline: TrackerPipeline) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
        }
    }
}

/// Raw query strings; empty values mean "no constraint".
#[derive(Debug, Clone, Default, Deserialize)]
struct RecommendationsQuery {
    search: Option<String>,
    status: Option<String>,
    department: Option<String>,
    chapter: Option<String>,
    section: Option<String>,
    #[serde(rename = "longTerm")]
    long_term: Option<bool>,
}

impl RecommendationsQuery {
    fn into_filter(self) -> Result<RecommendationFilter, Response> {
        let status = match self.status.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(label) => Some(
                Status::from_label(label)
                    .ok_or_else(|| bad_request(format!("unknown status {label:?}")))?,
            ),
        };
        Ok(RecommendationFilter {
            search: self.search,
            status,
            department: self.department,
            chapter: self.chapter,
            action_plan_section: self.section,
            long_term: self.long_term,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct LeagueQuery {
    sort: Option<String>,
}

#[derive(Debug, Serialize)]
struct RefreshResponse {
    count: usize,
    outcome: LoadOutcome,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/api/recommendations", get(recommendations_handler))
        .route("/api/recommendations/{id}", get(recommendation_detail_handler))
        .route("/api/refresh", post(refresh_handler))
        .route("/api/summary", get(summary_handler))
        .route("/api/departments", get(departments_handler))
        .route("/api/chapters", get(chapters_handler))
        .route("/api/timeline", get(timeline_handler))
        .with_state(Arc::new(state))
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    let config = TrackerConfig::from_env();
    let state = AppState::new(TrackerPipeline::from_config(&config)?);
    let listener = TcpListener::bind(config.bind_addr.as_str()).await?;
    info!(addr = %config.bind_addr, "tracker web listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn healthz_handler() -> &'static str {
    "ok"
}

async fn recommendations_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RecommendationsQuery>,
) -> Response {
    let filter = match query.into_filter() {
        Ok(filter) => filter,
        Err(resp) => return resp,
    };
    let records = state.pipeline.fetch_data().await;
    Json(filter.apply(&records)).into_response()
}

async fn recommendation_detail_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<String>,
) -> Response {
    let records = state.pipeline.fetch_data().await;
    match records.into_iter().find(|rec| rec.id.eq_ignore_ascii_case(&id)) {
        Some(rec) => Json(rec).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("recommendation {id} not found") })),
        )
            .into_response(),
    }
}

async fn refresh_handler(State(state): State<Arc<AppState>>) -> Response {
    let report = state.pipeline.refresh().await;
    Json(RefreshResponse {
        count: report.recommendations.len(),
        outcome: report.outcome,
    })
    .into_response()
}

async fn summary_handler(State(state): State<Arc<AppState>>) -> Response {
    let records = state.pipeline.fetch_data().await;
    Json(status_summary(&records)).into_response()
}

async fn departments_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LeagueQuery>,
) -> Response {
    let sort = match query.sort.as_deref().map(str::trim) {
        None | Some("") => LeagueSort::default(),
        Some(label) => match LeagueSort::from_label(label) {
            Some(sort) => sort,
            None => return bad_request(format!("unknown sort {label:?}")),
        },
    };
    let records = state.pipeline.fetch_data().await;
    Json(league_table(&records, sort)).into_response()
}

async fn chapters_handler(State(state): State<Arc<AppState>>) -> Response {
    let records = state.pipeline.fetch_data().await;
    Json(chapter_stats(&records)).into_response()
}

async fn timeline_handler(State(state): State<Arc<AppState>>) -> Response {
    let records = state.pipeline.fetch_data().await;
    Json(horizon_groups(&records)).into_response()
}

fn bad_request(message: String) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
}
