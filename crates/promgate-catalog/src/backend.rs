//! Metrics backend client — the seam between promgate and the TSDB.
//!
//! [`MetricsBackend`] is what the relister and the providers talk to. A
//! production deployment plugs in an HTTP client for the backend's query
//! API; [`StaticBackend`] serves canned data from a JSON fixture for the
//! CLI and for tests.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use promgate_core::{LabelSet, QueryResult, Series};

use crate::error::{BackendError, BackendResult};

/// A label-based time-series backend.
#[async_trait]
pub trait MetricsBackend: Send + Sync {
    /// Run an instant query.
    async fn query(&self, query: &str) -> BackendResult<QueryResult>;

    /// List series matching `selector` that had samples within `lookback`.
    async fn list_series(&self, selector: &str, lookback: Duration) -> BackendResult<Vec<Series>>;
}

/// Run a backend call with a deadline. Dropping the returned future
/// cancels the call.
pub async fn with_deadline<T, F>(deadline: Duration, call: F) -> BackendResult<T>
where
    F: std::future::Future<Output = BackendResult<T>>,
{
    match tokio::time::timeout(deadline, call).await {
        Ok(result) => result,
        Err(_) => Err(BackendError::Timeout(deadline)),
    }
}

/// Canned backend data, as stored in a fixture file.
///
/// ```json
/// {
///   "series": { "{__name__=~\"^container_.*\"}": [ {"__name__": "container_fs_reads_total", "pod": "web-1"} ] },
///   "queries": { "sum(up) by (job)": {"resultType": "vector", "result": []} }
/// }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendFixture {
    /// Discovery selector → raw label sets (including `__name__`).
    #[serde(default)]
    pub series: BTreeMap<String, Vec<LabelSet>>,
    /// Exact query string → result.
    #[serde(default)]
    pub queries: BTreeMap<String, QueryResult>,
}

/// In-memory backend serving a [`BackendFixture`].
///
/// Unknown selectors list no series and unknown queries return an empty
/// vector. Calls are counted and queries recorded so tests can assert on
/// the traffic.
#[derive(Debug, Default)]
pub struct StaticBackend {
    fixture: RwLock<BackendFixture>,
    unavailable: AtomicBool,
    latency_ms: AtomicU64,
    series_calls: AtomicU64,
    query_calls: AtomicU64,
    queries_seen: Mutex<Vec<String>>,
}

impl StaticBackend {
    pub fn new(fixture: BackendFixture) -> Self {
        Self {
            fixture: RwLock::new(fixture),
            ..Default::default()
        }
    }

    pub fn from_json_str(content: &str) -> Result<Self, serde_json::Error> {
        Ok(Self::new(serde_json::from_str(content)?))
    }

    pub fn from_file(path: &Path) -> BackendResult<Self> {
        let fixture_err = |reason: String| BackendError::Fixture {
            path: path.to_path_buf(),
            reason,
        };
        let content = std::fs::read_to_string(path).map_err(|e| fixture_err(e.to_string()))?;
        Self::from_json_str(&content).map_err(|e| fixture_err(e.to_string()))
    }

    /// Replace the discovered series for `selector`.
    pub async fn set_series(&self, selector: &str, series: Vec<LabelSet>) {
        self.fixture
            .write()
            .await
            .series
            .insert(selector.to_string(), series);
    }

    /// Set the result returned for an exact query string.
    pub async fn set_query(&self, query: &str, result: QueryResult) {
        self.fixture
            .write()
            .await
            .queries
            .insert(query.to_string(), result);
    }

    /// Make every call fail with [`BackendError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn series_calls(&self) -> u64 {
        self.series_calls.load(Ordering::SeqCst)
    }

    pub fn query_calls(&self) -> u64 {
        self.query_calls.load(Ordering::SeqCst)
    }

    /// Every query string received so far, in arrival order.
    pub async fn queries_seen(&self) -> Vec<String> {
        self.queries_seen.lock().await.clone()
    }

    async fn simulate(&self) -> BackendResult<()> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("static backend marked down".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl MetricsBackend for StaticBackend {
    async fn query(&self, query: &str) -> BackendResult<QueryResult> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        self.queries_seen.lock().await.push(query.to_string());
        self.simulate().await?;

        let fixture = self.fixture.read().await;
        let result = fixture
            .queries
            .get(query)
            .cloned()
            .unwrap_or(QueryResult::Vector(Vec::new()));
        debug!(%query, rows = result.len(), "static backend query");
        Ok(result)
    }

    async fn list_series(&self, selector: &str, lookback: Duration) -> BackendResult<Vec<Series>> {
        self.series_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate().await?;

        let fixture = self.fixture.read().await;
        let series: Vec<Series> = fixture
            .series
            .get(selector)
            .map(|sets| sets.iter().cloned().filter_map(Series::from_labels).collect())
            .unwrap_or_default();
        debug!(
            %selector,
            lookback_secs = lookback.as_secs(),
            series = series.len(),
            "static backend series listing"
        );
        Ok(series)
    }
}
