//! Relister — keeps the metric index in step with the backend.
//!
//! Each tick lists the series of every distinct discovery query, runs
//! them through the rule set, and publishes a fresh [`Snapshot`]. Readers
//! holding an older snapshot are unaffected. A failed tick keeps the
//! previous snapshot in place.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use arc_swap::ArcSwap;
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::{watch, Mutex, Notify};
use tracing::{debug, info, warn};

use promgate_core::{AdapterSettings, Series};
use promgate_rules::RuleSet;

use crate::backend::{with_deadline, MetricsBackend};
use crate::error::{DiscoveryError, DiscoveryResult};
use crate::index::{IndexHandle, MetricIndex, Snapshot};

/// Where the relist loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogState {
    /// No index has been published yet.
    Idle,
    /// A tick is running.
    Discovering,
    /// An index is published and serving.
    Indexed,
}

impl fmt::Display for CatalogState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CatalogState::Idle => write!(f, "idle"),
            CatalogState::Discovering => write!(f, "discovering"),
            CatalogState::Indexed => write!(f, "indexed"),
        }
    }
}

/// Relist statistics.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct RelistStats {
    pub queries: usize,
    pub series: usize,
    pub custom_metrics: usize,
    pub external_metrics: usize,
    /// Rules skipped this tick because a fixed name matched several families.
    pub ambiguous_rules: usize,
    pub generation: u64,
}

/// Timing knobs of the relist loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelistSettings {
    pub interval: Duration,
    pub lookback: Duration,
    /// Deadline for each discovery call.
    pub timeout: Duration,
}

impl From<&AdapterSettings> for RelistSettings {
    fn from(settings: &AdapterSettings) -> Self {
        Self {
            interval: settings.relist_interval,
            lookback: settings.discovery_window(),
            timeout: settings.query_timeout,
        }
    }
}

/// Owns the relist loop and the index it publishes.
pub struct Catalog {
    backend: Arc<dyn MetricsBackend>,
    settings: RelistSettings,
    /// Rules the next tick runs with. Published alongside the index.
    rules: ArcSwap<RuleSet>,
    handle: IndexHandle,
    state: watch::Sender<CatalogState>,
    reload: Notify,
    /// Serializes ticks.
    tick: Mutex<()>,
}

impl Catalog {
    pub fn new(
        rules: Arc<RuleSet>,
        backend: Arc<dyn MetricsBackend>,
        settings: RelistSettings,
    ) -> Self {
        let handle = IndexHandle::new(Snapshot::initial(rules.clone()));
        let (state, _) = watch::channel(CatalogState::Idle);
        Self {
            backend,
            settings,
            rules: ArcSwap::new(rules),
            handle,
            state,
            reload: Notify::new(),
            tick: Mutex::new(()),
        }
    }

    /// A cloneable reader for the published snapshot.
    pub fn handle(&self) -> IndexHandle {
        self.handle.clone()
    }

    pub fn state(&self) -> CatalogState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<CatalogState> {
        self.state.subscribe()
    }

    /// Replace the rule set. The running loop relists right away; readers
    /// keep the old rules and index until that tick publishes.
    pub fn reload(&self, rules: RuleSet) {
        info!(rules = rules.len(), "rule set replaced");
        self.rules.store(Arc::new(rules));
        self.reload.notify_one();
    }

    /// Run one relist tick.
    ///
    /// Returns an error if any discovery query failed, in which case the
    /// previous snapshot stays published.
    pub async fn relist_once(&self) -> DiscoveryResult<RelistStats> {
        let _guard = self.tick.lock().await;
        self.state.send_replace(CatalogState::Discovering);

        let rules = self.rules.load_full();
        let result = self.discover(&rules).await;

        let previous = self.handle.snapshot();
        let outcome = match result {
            Ok(discovered) => {
                let (index, errors) = MetricIndex::build(&rules, &discovered);
                let stats = RelistStats {
                    queries: discovered.len(),
                    series: discovered.values().map(Vec::len).sum(),
                    custom_metrics: index.custom_len(),
                    external_metrics: index.external_len(),
                    ambiguous_rules: errors.len(),
                    generation: previous.generation + 1,
                };
                self.handle.publish(Snapshot {
                    rules,
                    index,
                    generation: stats.generation,
                    refreshed_at: Some(SystemTime::now()),
                });
                info!(
                    queries = stats.queries,
                    series = stats.series,
                    custom = stats.custom_metrics,
                    external = stats.external_metrics,
                    ambiguous = stats.ambiguous_rules,
                    generation = stats.generation,
                    "relist complete"
                );
                Ok(stats)
            }
            Err(e) => {
                warn!(
                    error = %e,
                    generation = previous.generation,
                    "relist failed, keeping previous index"
                );
                Err(e)
            }
        };

        let settled = if self.handle.snapshot().generation > 0 {
            CatalogState::Indexed
        } else {
            CatalogState::Idle
        };
        self.state.send_replace(settled);
        outcome
    }

    /// List the series of every distinct discovery query concurrently.
    async fn discover(&self, rules: &RuleSet) -> DiscoveryResult<BTreeMap<String, Vec<Series>>> {
        let queries = rules.discovery_queries();
        debug!(queries = queries.len(), "listing series");

        let calls = queries.iter().map(|q| {
            with_deadline(
                self.settings.timeout,
                self.backend.list_series(q, self.settings.lookback),
            )
        });
        let results = join_all(calls).await;

        let mut discovered = BTreeMap::new();
        for (query, result) in queries.into_iter().zip(results) {
            let series = result.map_err(|source| DiscoveryError::Backend {
                series_query: query.to_string(),
                source,
            })?;
            discovered.insert(query.to_string(), series);
        }
        Ok(discovered)
    }

    /// Run the relist loop until shutdown. The first tick runs immediately;
    /// a reload triggers an extra tick.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.settings.interval.as_secs(),
            lookback_secs = self.settings.lookback.as_secs(),
            "catalog relister started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            // Failures are logged by the tick and the previous index stays.
            let _ = self.relist_once().await;

            tokio::select! {
                _ = tokio::time::sleep(self.settings.interval) => {}
                _ = self.reload.notified() => {
                    info!("relisting after reload");
                }
                _ = shutdown.changed() => {
                    break;
                }
            }
        }

        info!("catalog relister shutting down");
    }
}

#[cfg(test)]
mod tests {
    use promgate_core::AdapterConfig;
    use promgate_rules::StaticResourceMapper;

    use super::*;
    use crate::backend::StaticBackend;

    fn settings() -> RelistSettings {
        RelistSettings {
            interval: Duration::from_secs(600),
            lookback: Duration::from_secs(600),
            timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn empty_rule_set_indexes_nothing() {
        let rules = RuleSet::compile(
            &AdapterConfig::default(),
            Arc::new(StaticResourceMapper::builtin()),
        )
        .unwrap();
        let backend = Arc::new(StaticBackend::default());
        let catalog = Catalog::new(Arc::new(rules), backend.clone(), settings());
        assert_eq!(catalog.state(), CatalogState::Idle);

        let stats = catalog.relist_once().await.unwrap();
        assert_eq!(stats.queries, 0);
        assert_eq!(stats.generation, 1);
        assert_eq!(backend.series_calls(), 0);
        assert_eq!(catalog.state(), CatalogState::Indexed);
    }

    #[tokio::test]
    async fn failed_first_tick_stays_idle() {
        let config = AdapterConfig::default_config(Duration::from_secs(60), "");
        let rules = RuleSet::compile(&config, Arc::new(StaticResourceMapper::builtin())).unwrap();
        let backend = Arc::new(StaticBackend::default());
        backend.set_unavailable(true);
        let catalog = Catalog::new(Arc::new(rules), backend, settings());

        let err = catalog.relist_once().await.unwrap_err();
        assert!(matches!(err, DiscoveryError::Backend { .. }));
        assert_eq!(catalog.state(), CatalogState::Idle);
        assert_eq!(catalog.handle().snapshot().generation, 0);
    }

    #[test]
    fn settings_follow_adapter_settings() {
        let mut adapter = AdapterSettings::default();
        adapter.metrics_max_age = Some(Duration::from_secs(120));
        let relist = RelistSettings::from(&adapter);
        assert_eq!(relist.interval, Duration::from_secs(600));
        assert_eq!(relist.lookback, Duration::from_secs(120));
        assert_eq!(relist.timeout, Duration::from_secs(30));
    }
}
