//! Catalog load orchestration, application state and the dashboard view.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sgf_catalog::{CatalogRegistry, ParseError};
use sgf_core::{
    apply, facet_options, summarize, CatalogEntry, Facet, FilterCriteria, Record, RecordSets,
    SourceId, Summary,
};
use sgf_fetch::{CsvFetcher, FetchError, HttpClientConfig, HttpTransport, Transport};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "sgf-sync";

pub const TOTAL_FAILURE_MESSAGE: &str =
    "could not load either catalog; check connectivity and retry";

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub http_timeout_secs: u64,
    pub user_agent: String,
    pub sources_file: Option<PathBuf>,
    pub workspace_root: PathBuf,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            http_timeout_secs: 20,
            user_agent: "sgf-bot/0.1".to_string(),
            sources_file: None,
            workspace_root: PathBuf::from("."),
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            http_timeout_secs: std::env::var("SGF_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.http_timeout_secs),
            user_agent: std::env::var("SGF_USER_AGENT").unwrap_or(defaults.user_agent),
            sources_file: std::env::var("SGF_SOURCES_FILE")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
            workspace_root: std::env::var("SGF_WORKSPACE_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.workspace_root),
        }
    }

    /// Explicit `SGF_SOURCES_FILE`, else `sources.yaml` in the workspace
    /// root when present, else the built-in endpoints.
    pub fn registry(&self) -> Result<CatalogRegistry> {
        if let Some(path) = &self.sources_file {
            return CatalogRegistry::load(path);
        }
        let local = self.workspace_root.join("sources.yaml");
        if local.is_file() {
            return CatalogRegistry::load(&local);
        }
        Ok(CatalogRegistry::default())
    }

    pub fn http_transport(&self) -> Result<HttpTransport> {
        HttpTransport::new(HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
        })
    }
}

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("no url configured for {0}")]
    MissingUrl(SourceId),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Parse(#[from] ParseError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DatasetOutcome {
    Loaded {
        entries: Vec<CatalogEntry>,
        fetched_at: DateTime<Utc>,
    },
    Failed {
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub generation: u64,
    pub outcomes: BTreeMap<SourceId, DatasetOutcome>,
}

#[derive(Debug, Clone)]
pub struct CatalogLoader {
    registry: CatalogRegistry,
    fetcher: CsvFetcher,
}

impl CatalogLoader {
    pub fn new(registry: CatalogRegistry, transport: Arc<dyn Transport>) -> Self {
        let fetcher = CsvFetcher::new(transport).with_proxies(registry.proxies.clone());
        Self { registry, fetcher }
    }

    pub fn from_config(config: &SyncConfig) -> Result<Self> {
        let registry = config.registry()?;
        let transport = config.http_transport()?;
        Ok(Self::new(registry, Arc::new(transport)))
    }

    pub fn registry(&self) -> &CatalogRegistry {
        &self.registry
    }

    pub async fn fetch_source(&self, source: SourceId) -> Result<Vec<CatalogEntry>, DatasetError> {
        let url = self
            .registry
            .url_for(source)
            .ok_or(DatasetError::MissingUrl(source))?;
        let text = self.fetcher.fetch(url).await?;
        Ok(sgf_catalog::parse(&text)?)
    }

    pub async fn load_source(&self, source: SourceId) -> DatasetOutcome {
        match self.fetch_source(source).await {
            Ok(entries) => {
                info!(%source, records = entries.len(), "catalog loaded");
                DatasetOutcome::Loaded {
                    entries,
                    fetched_at: Utc::now(),
                }
            }
            Err(err) => {
                warn!(%source, error = %err, "catalog unavailable");
                DatasetOutcome::Failed {
                    reason: err.to_string(),
                }
            }
        }
    }

    pub async fn load_all(&self, generation: u64) -> LoadReport {
        let span = info_span!("catalog_load", generation, load_id = %Uuid::new_v4());
        async move {
            let (coacel, convivir) = tokio::join!(
                self.load_source(SourceId::Coacel),
                self.load_source(SourceId::Convivir)
            );
            LoadReport {
                generation,
                outcomes: BTreeMap::from([
                    (SourceId::Coacel, coacel),
                    (SourceId::Convivir, convivir),
                ]),
            }
        }
        .instrument(span)
        .await
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LoadStatus {
    #[default]
    Idle,
    Loading,
    Ready,
    Failed {
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Availability {
    #[default]
    Pending,
    Loaded {
        fetched_at: DateTime<Utc>,
        records: usize,
    },
    Unavailable {
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    ReloadRequested,
    LoadFinished(LoadReport),
    SearchChanged(String),
    CategorySelected(String),
    CompanySelected(String),
    SourceToggled(SourceId),
    FiltersCleared,
}

/// Session state. `criteria.include_sources` holds the user's toggles; a
/// toggled-on source that has no records is still excluded from the merge.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AppState {
    pub generation: u64,
    pub status: LoadStatus,
    pub records: RecordSets,
    pub availability: BTreeMap<SourceId, Availability>,
    pub criteria: FilterCriteria,
}

impl AppState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn availability(&self, source: SourceId) -> Availability {
        self.availability.get(&source).cloned().unwrap_or_default()
    }

    pub fn is_available(&self, source: SourceId) -> bool {
        self.records.len(source) > 0
    }

    pub fn error(&self) -> Option<&str> {
        match &self.status {
            LoadStatus::Failed { message } => Some(message),
            _ => None,
        }
    }

    pub fn effective_criteria(&self) -> FilterCriteria {
        let mut criteria = self.criteria.clone();
        criteria.include_sources.retain(|s| self.is_available(*s));
        criteria
    }

    pub fn filtered(&self) -> Vec<Record> {
        apply(&self.records, &self.effective_criteria())
    }

    pub fn view(&self) -> DashboardView {
        let criteria = self.effective_criteria();
        let results = apply(&self.records, &criteria);
        DashboardView {
            generation: self.generation,
            status: self.status.clone(),
            error: self.error().map(ToString::to_string),
            // reload is accepted in every status, including mid-load
            can_retry: true,
            toggles: SourceId::ALL
                .into_iter()
                .map(|source| SourceToggle {
                    source,
                    display_name: source.display_name().to_string(),
                    checked: self.criteria.includes(source),
                    enabled: self.is_available(source),
                    records: self.records.len(source),
                    availability: self.availability(source),
                })
                .collect(),
            category_options: facet_options(&self.records, &criteria.include_sources, Facet::Category),
            company_options: facet_options(&self.records, &criteria.include_sources, Facet::Company),
            category_summary: summarize(&results, Facet::Category),
            company_summary: summarize(&results, Facet::Company),
            total: results.len(),
            results,
            criteria,
        }
    }
}

pub fn reduce(mut state: AppState, event: Event) -> AppState {
    match event {
        Event::ReloadRequested => {
            state.generation += 1;
            state.status = LoadStatus::Loading;
            for source in SourceId::ALL {
                state.availability.insert(source, Availability::Pending);
            }
        }
        Event::LoadFinished(report) => {
            if report.generation != state.generation {
                debug!(
                    stale = report.generation,
                    current = state.generation,
                    "dropping stale load result"
                );
                return state;
            }
            for source in SourceId::ALL {
                let outcome = report.outcomes.get(&source).cloned().unwrap_or_else(|| {
                    DatasetOutcome::Failed {
                        reason: "missing from load report".to_string(),
                    }
                });
                match outcome {
                    DatasetOutcome::Loaded { entries, fetched_at } => {
                        state.availability.insert(
                            source,
                            Availability::Loaded {
                                fetched_at,
                                records: entries.len(),
                            },
                        );
                        state.records.insert(source, entries);
                    }
                    DatasetOutcome::Failed { reason } => {
                        state
                            .availability
                            .insert(source, Availability::Unavailable { reason });
                        state.records.insert(source, Vec::new());
                    }
                }
            }
            state.status = if state.records.is_empty() {
                LoadStatus::Failed {
                    message: TOTAL_FAILURE_MESSAGE.to_string(),
                }
            } else {
                LoadStatus::Ready
            };
        }
        Event::SearchChanged(term) => state.criteria.search_term = term,
        Event::CategorySelected(category) => state.criteria.category = category,
        Event::CompanySelected(company) => state.criteria.company = company,
        Event::SourceToggled(source) => {
            if state.is_available(source) && !state.criteria.include_sources.remove(&source) {
                state.criteria.include_sources.insert(source);
            }
        }
        Event::FiltersCleared => {
            state.criteria.search_term.clear();
            state.criteria.category.clear();
            state.criteria.company.clear();
        }
    }
    state
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceToggle {
    pub source: SourceId,
    pub display_name: String,
    pub checked: bool,
    pub enabled: bool,
    pub records: usize,
    pub availability: Availability,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DashboardView {
    pub generation: u64,
    pub status: LoadStatus,
    pub error: Option<String>,
    pub can_retry: bool,
    pub toggles: Vec<SourceToggle>,
    pub criteria: FilterCriteria,
    pub category_options: Vec<String>,
    pub company_options: Vec<String>,
    pub category_summary: Vec<Summary>,
    pub company_summary: Vec<Summary>,
    pub total: usize,
    pub results: Vec<Record>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChartKind {
    Pie,
    Bar,
}

pub fn chart_json(title: &str, kind: ChartKind, summaries: &[Summary]) -> serde_json::Value {
    let labels = summaries.iter().map(|s| s.label.clone()).collect::<Vec<_>>();
    let counts = summaries.iter().map(|s| s.count as i64).collect::<Vec<_>>();
    let trace = match kind {
        ChartKind::Pie => serde_json::json!({
            "type": "pie",
            "labels": labels,
            "values": counts,
        }),
        ChartKind::Bar => serde_json::json!({
            "type": "bar",
            "x": labels,
            "y": counts,
            "name": "products",
            "marker": {"color": "#8884d8"}
        }),
    };
    serde_json::json!({
        "data": [trace],
        "layout": {
            "title": title,
            "paper_bgcolor": "#ffffff",
            "plot_bgcolor": "#f8fafc"
        }
    })
}

impl DashboardView {
    pub fn charts_json(&self) -> serde_json::Value {
        serde_json::json!({
            "categories": chart_json("Products by category", ChartKind::Pie, &self.category_summary),
            "companies": chart_json("Products by company", ChartKind::Bar, &self.company_summary),
        })
    }
}

impl LoadReport {
    pub fn aborted(generation: u64) -> Self {
        let outcomes = SourceId::ALL
            .into_iter()
            .map(|source| {
                let outcome = DatasetOutcome::Failed {
                    reason: "load task ended before reporting".to_string(),
                };
                (source, outcome)
            })
            .collect();
        Self {
            generation,
            outcomes,
        }
    }
}

// Sends exactly one report per spawned load, even if the task panics or is aborted.
struct ReportGuard {
    generation: u64,
    tx: Option<mpsc::UnboundedSender<LoadReport>>,
}

impl ReportGuard {
    fn send(mut self, report: LoadReport) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(report);
        }
    }
}

impl Drop for ReportGuard {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            warn!(generation = self.generation, "catalog load ended without a report");
            let _ = tx.send(LoadReport::aborted(self.generation));
        }
    }
}

/// Single-owner driver: folds events into state and runs loads as tasks
/// that report back over a channel, so only the newest generation lands.
pub struct Session {
    state: AppState,
    loader: Arc<CatalogLoader>,
    tx: mpsc::UnboundedSender<LoadReport>,
    rx: mpsc::UnboundedReceiver<LoadReport>,
    in_flight: usize,
}

impl Session {
    pub fn new(loader: Arc<CatalogLoader>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            state: AppState::new(),
            loader,
            tx,
            rx,
            in_flight: 0,
        }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn loader(&self) -> &CatalogLoader {
        &self.loader
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn dispatch(&mut self, event: Event) {
        let state = std::mem::take(&mut self.state);
        self.state = reduce(state, event);
    }

    pub fn reload(&mut self) -> JoinHandle<()> {
        self.dispatch(Event::ReloadRequested);
        let generation = self.state.generation;
        let loader = Arc::clone(&self.loader);
        let guard = ReportGuard {
            generation,
            tx: Some(self.tx.clone()),
        };
        self.in_flight += 1;
        tokio::spawn(async move {
            let report = loader.load_all(generation).await;
            guard.send(report);
        })
    }

    /// Applies the next finished load. Returns `Some(true)` when it was
    /// current, `Some(false)` when stale, `None` when nothing is running.
    pub async fn next_report(&mut self) -> Option<bool> {
        if self.in_flight == 0 {
            return None;
        }
        let report = self.rx.recv().await?;
        self.in_flight -= 1;
        let current = report.generation == self.state.generation;
        self.dispatch(Event::LoadFinished(report));
        Some(current)
    }

    pub async fn settle(&mut self) {
        while self.next_report().await.is_some() {}
    }

    pub async fn load(&mut self) -> &AppState {
        self.reload();
        self.settle().await;
        &self.state
    }
}
