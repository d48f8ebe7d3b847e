//! Data orchestration: cache first, then the live sheet, then the bundled dataset.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, info_span, warn, Instrument};
use tracker_adapters::parse_sheet;
use tracker_core::{Recommendation, SourceCitation};
use tracker_storage::{
    CsvSource, FetchError, FileStore, HttpClientConfig, HttpFetcher, SheetCsvSource,
    SnapshotCache, SystemClock, DEFAULT_CACHE_KEY, DEFAULT_CACHE_TTL, DEFAULT_FETCH_TIMEOUT,
};
use uuid::Uuid;

pub const CRATE_NAME: &str = "tracker-sync";

pub const DEFAULT_SHEET_URL: &str = "https://docs.google.com/spreadsheets/d/1DKF3fe6EES8yPHpjWF_O3__xxDFahHY1YrTdS9GJR08/export?format=csv";

const BUNDLED_FALLBACK: &str = include_str!("../data/fallback_recommendations.json");
const BUNDLED_SOURCE_METADATA: &str = include_str!("../data/source_metadata.json");

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub sheet_url: String,
    pub http_timeout_secs: u64,
    pub cache_dir: PathBuf,
    pub cache_ttl_secs: u64,
    pub cache_key: String,
    pub user_agent: String,
    pub bind_addr: String,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            sheet_url: DEFAULT_SHEET_URL.to_string(),
            http_timeout_secs: DEFAULT_FETCH_TIMEOUT.as_secs(),
            cache_dir: PathBuf::from("./.cache"),
            cache_ttl_secs: DEFAULT_CACHE_TTL.as_secs(),
            cache_key: DEFAULT_CACHE_KEY.to_string(),
            user_agent: "ai-plan-tracker/0.1".to_string(),
            bind_addr: "127.0.0.1:8080".to_string(),
        }
    }
}

impl TrackerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            sheet_url: std::env::var("TRACKER_SHEET_URL").unwrap_or(defaults.sheet_url),
            http_timeout_secs: std::env::var("TRACKER_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.http_timeout_secs),
            cache_dir: std::env::var("TRACKER_CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.cache_dir),
            cache_ttl_secs: std::env::var("TRACKER_CACHE_TTL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.cache_ttl_secs),
            cache_key: std::env::var("TRACKER_CACHE_KEY").unwrap_or(defaults.cache_key),
            user_agent: std::env::var("TRACKER_USER_AGENT").unwrap_or(defaults.user_agent),
            bind_addr: std::env::var("TRACKER_BIND_ADDR").unwrap_or(defaults.bind_addr),
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("bundled dataset {name} is invalid: {source}")]
    BundledData {
        name: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

pub fn bundled_fallback() -> Result<Vec<Recommendation>, SyncError> {
    serde_json::from_str(BUNDLED_FALLBACK).map_err(|source| SyncError::BundledData {
        name: "fallback_recommendations.json",
        source,
    })
}

/// Page/section citations keyed by recommendation id.
pub fn bundled_source_metadata() -> Result<BTreeMap<String, SourceCitation>, SyncError> {
    serde_json::from_str(BUNDLED_SOURCE_METADATA).map_err(|source| SyncError::BundledData {
        name: "source_metadata.json",
        source,
    })
}

fn load_bundled_fallback() -> Vec<Recommendation> {
    match bundled_fallback() {
        Ok(records) => records,
        Err(err) => {
            error!(error = %err, "bundled fallback unusable; serving an empty set");
            Vec::new()
        }
    }
}

pub trait EnrichmentHook: Send + Sync {
    fn apply(&self, items: Vec<Recommendation>) -> Vec<Recommendation>;
}

#[derive(Default)]
pub struct NoopEnrichmentHook;

impl EnrichmentHook for NoopEnrichmentHook {
    fn apply(&self, items: Vec<Recommendation>) -> Vec<Recommendation> {
        items
    }
}

/// Overlays action-plan and government-response citations by id.
#[derive(Debug, Clone, Default)]
pub struct SourceMetadataEnrichment {
    table: BTreeMap<String, SourceCitation>,
}

impl SourceMetadataEnrichment {
    pub fn new(table: BTreeMap<String, SourceCitation>) -> Self {
        Self { table }
    }

    pub fn bundled() -> Result<Self, SyncError> {
        Ok(Self::new(bundled_source_metadata()?))
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

impl EnrichmentHook for SourceMetadataEnrichment {
    fn apply(&self, items: Vec<Recommendation>) -> Vec<Recommendation> {
        items
            .into_iter()
            .map(|rec| match self.table.get(&rec.id) {
                Some(citation) => rec.with_citation(citation),
                None => rec,
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LoadOutcome {
    CacheHit,
    Fetched { parsed: usize },
    FetchFailed { reason: String },
    ParseEmpty,
}

impl LoadOutcome {
    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::FetchFailed { .. } | Self::ParseEmpty)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    pub outcome: LoadOutcome,
    pub recommendations: Vec<Recommendation>,
}

/// Turns one fetch attempt into parsed records, or the outcome that sends the
/// load to the fallback dataset.
pub fn records_from_fetch(
    fetched: Result<String, FetchError>,
) -> Result<Vec<Recommendation>, LoadOutcome> {
    let csv = fetched.map_err(|err| LoadOutcome::FetchFailed {
        reason: err.to_string(),
    })?;
    let sheet = parse_sheet(&csv);
    if sheet.recommendations.is_empty() {
        return Err(LoadOutcome::ParseEmpty);
    }
    Ok(sheet.recommendations)
}

pub struct TrackerPipeline {
    source: Arc<dyn CsvSource>,
    cache: SnapshotCache,
    enrichment: Box<dyn EnrichmentHook>,
    fallback: Vec<Recommendation>,
    fetch_timeout: Duration,
}

impl TrackerPipeline {
    pub fn new(source: Arc<dyn CsvSource>, cache: SnapshotCache) -> Self {
        Self {
            source,
            cache,
            enrichment: Box::<NoopEnrichmentHook>::default(),
            fallback: load_bundled_fallback(),
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }

    pub fn from_config(config: &TrackerConfig) -> Result<Self> {
        let http = HttpFetcher::new(HttpClientConfig {
            timeout: config.http_timeout(),
            user_agent: Some(config.user_agent.clone()),
        })?;
        let source = Arc::new(SheetCsvSource::new(http, config.sheet_url.clone()));
        let store = Arc::new(FileStore::new(config.cache_dir.clone()));
        let cache = SnapshotCache::new(store, Arc::new(SystemClock))
            .with_key(config.cache_key.clone())
            .with_ttl(config.cache_ttl());
        let enrichment =
            SourceMetadataEnrichment::bundled().context("loading bundled source citations")?;

        Ok(Self::new(source, cache)
            .with_enrichment(Box::new(enrichment))
            .with_fetch_timeout(config.http_timeout()))
    }

    pub fn with_enrichment(mut self, enrichment: Box<dyn EnrichmentHook>) -> Self {
        self.enrichment = enrichment;
        self
    }

    pub fn with_fallback(mut self, fallback: Vec<Recommendation>) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn cache(&self) -> &SnapshotCache {
        &self.cache
    }

    /// Cache hit, else one fetch-and-parse, else the enriched fallback set.
    /// Every failure below this point degrades to fallback data.
    pub async fn load(&self) -> LoadReport {
        let load_id = Uuid::new_v4();
        let span = info_span!("tracker_load", %load_id, source = %self.source.describe());
        async {
            if let Some(recommendations) = self.read_cache().await {
                info!(records = recommendations.len(), "serving cached snapshot");
                return LoadReport {
                    outcome: LoadOutcome::CacheHit,
                    recommendations,
                };
            }

            match records_from_fetch(self.fetch_csv().await) {
                Ok(parsed) => {
                    let recommendations = self.enrichment.apply(parsed);
                    self.write_cache(&recommendations).await;
                    info!(records = recommendations.len(), "loaded live sheet");
                    LoadReport {
                        outcome: LoadOutcome::Fetched {
                            parsed: recommendations.len(),
                        },
                        recommendations,
                    }
                }
                Err(outcome) => {
                    warn!(?outcome, "live sheet unusable; using fallback data");
                    LoadReport {
                        outcome,
                        recommendations: self.fallback_records(),
                    }
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Drops the cached snapshot so the next load goes to the network.
    pub async fn refresh(&self) -> LoadReport {
        self.invalidate().await;
        self.load().await
    }

    pub async fn fetch_data(&self) -> Vec<Recommendation> {
        self.load().await.recommendations
    }

    pub async fn refresh_data(&self) -> Vec<Recommendation> {
        self.refresh().await.recommendations
    }

    pub async fn invalidate(&self) {
        let cache = self.cache.clone();
        if let Err(err) = tokio::task::spawn_blocking(move || cache.invalidate()).await {
            warn!(error = %err, "cache invalidate task failed");
        }
    }

    pub fn fallback_records(&self) -> Vec<Recommendation> {
        self.enrichment.apply(self.fallback.clone())
    }

    // Store backends may touch the filesystem; keep them off the async workers.
    async fn read_cache(&self) -> Option<Vec<Recommendation>> {
        let cache = self.cache.clone();
        tokio::task::spawn_blocking(move || cache.read())
            .await
            .unwrap_or_else(|err| {
                warn!(error = %err, "cache read task failed");
                None
            })
    }

    async fn write_cache(&self, recommendations: &[Recommendation]) {
        let cache = self.cache.clone();
        let snapshot = recommendations.to_vec();
        if let Err(err) = tokio::task::spawn_blocking(move || cache.write(&snapshot)).await {
            warn!(error = %err, "cache write task failed");
        }
    }

    async fn fetch_csv(&self) -> Result<String, FetchError> {
        match tokio::time::timeout(self.fetch_timeout, self.source.fetch_csv()).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout {
                after: self.fetch_timeout,
            }),
        }
    }
}

pub async fn fetch_data_from_env() -> Result<Vec<Recommendation>> {
    let pipeline = TrackerPipeline::from_config(&TrackerConfig::from_env())?;
    Ok(pipeline.fetch_data().await)
}
