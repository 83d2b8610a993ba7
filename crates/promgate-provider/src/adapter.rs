//! The adapter engine — one explicitly constructed instance owning the
//! rule set, the catalog and the providers.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use promgate_catalog::{
    Catalog, CatalogState, DiscoveryResult, IndexHandle, MetricsBackend, RelistSettings,
    RelistStats,
};
use promgate_core::{
    AdapterConfig, AdapterSettings, ConfigResult, ExternalMetricInfo, ExternalMetricValue,
    GroupResource, MetricInfo, MetricKind, ResourceSelector,
};
use promgate_rules::{ResourceMapper, RuleSet};

use crate::convert::MetricValueList;
use crate::custom::CustomMetricsProvider;
use crate::error::ProviderResult;
use crate::external::ExternalMetricsProvider;
use crate::resource::ResourceMetricsProvider;

/// An advertised metric of either kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum AvailableMetric {
    Custom(MetricInfo),
    External(ExternalMetricInfo),
}

/// Values of either kind.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetricValues {
    Custom(MetricValueList),
    External(Vec<ExternalMetricValue>),
}

/// Wires a rule set to its catalog and providers.
///
/// Discovery and value queries go through separate backends so a slow
/// relist never queues behind request traffic or the other way round.
pub struct Adapter {
    catalog: Arc<Catalog>,
    mapper: Arc<dyn ResourceMapper>,
    custom: CustomMetricsProvider,
    external: ExternalMetricsProvider,
    resource: ResourceMetricsProvider,
    shutdown: watch::Sender<bool>,
}

impl Adapter {
    /// Compile `config` and build the engine. Nothing runs until
    /// [`Adapter::spawn_relister`] or [`Adapter::relist_once`].
    pub fn new(
        config: &AdapterConfig,
        settings: &AdapterSettings,
        mapper: Arc<dyn ResourceMapper>,
        relist_backend: Arc<dyn MetricsBackend>,
        query_backend: Arc<dyn MetricsBackend>,
    ) -> ConfigResult<Self> {
        let rules = RuleSet::compile(config, mapper.clone())?;
        let catalog = Arc::new(Catalog::new(
            Arc::new(rules),
            relist_backend,
            RelistSettings::from(settings),
        ));
        let handle = catalog.handle();
        let timeout = settings.query_timeout;
        let (shutdown, _) = watch::channel(false);

        info!(
            rules = config.rules.len(),
            external_rules = config.external_rules.len(),
            resource_rules = config.resource_rules.is_some(),
            relist_interval_secs = settings.relist_interval.as_secs(),
            "adapter configured"
        );

        Ok(Self {
            custom: CustomMetricsProvider::new(handle.clone(), query_backend.clone(), timeout),
            external: ExternalMetricsProvider::new(handle.clone(), query_backend.clone(), timeout),
            resource: ResourceMetricsProvider::new(handle, query_backend, timeout),
            catalog,
            mapper,
            shutdown,
        })
    }

    /// Start the relist loop on the current runtime.
    pub fn spawn_relister(&self) -> JoinHandle<()> {
        let catalog = self.catalog.clone();
        let shutdown = self.shutdown.subscribe();
        tokio::spawn(async move { catalog.run(shutdown).await })
    }

    /// Run a single relist tick in the caller's task.
    pub async fn relist_once(&self) -> DiscoveryResult<RelistStats> {
        self.catalog.relist_once().await
    }

    /// Replace the rules. An invalid config leaves the current rules in
    /// place.
    pub fn reload(&self, config: &AdapterConfig) -> ConfigResult<()> {
        let rules = RuleSet::compile(config, self.mapper.clone())?;
        self.catalog.reload(rules);
        Ok(())
    }

    /// Ask the relist loop to stop after its current tick.
    pub fn shutdown(&self) {
        info!("adapter shutting down");
        self.shutdown.send_replace(true);
    }

    /// Metrics currently available for `kind`. No backend call.
    pub fn list_metrics(&self, kind: MetricKind) -> Vec<AvailableMetric> {
        match kind {
            MetricKind::Custom => self
                .custom
                .list_metrics()
                .into_iter()
                .map(AvailableMetric::Custom)
                .collect(),
            MetricKind::External => self
                .external
                .list_external()
                .into_iter()
                .map(AvailableMetric::External)
                .collect(),
        }
    }

    /// Values of `metric` for `kind`. External metrics ignore `resource`
    /// and the selector's object names.
    pub async fn get_metric_values(
        &self,
        kind: MetricKind,
        resource: &GroupResource,
        selector: &ResourceSelector,
        metric: &str,
    ) -> ProviderResult<MetricValues> {
        match kind {
            MetricKind::Custom => self
                .custom
                .get_metric_values(resource, selector, metric)
                .await
                .map(MetricValues::Custom),
            MetricKind::External => self
                .external
                .get_external_values(
                    selector.namespace.as_deref(),
                    metric,
                    &selector.metric_selector,
                )
                .await
                .map(MetricValues::External),
        }
    }

    pub fn custom(&self) -> &CustomMetricsProvider {
        &self.custom
    }

    pub fn external(&self) -> &ExternalMetricsProvider {
        &self.external
    }

    pub fn resource(&self) -> &ResourceMetricsProvider {
        &self.resource
    }

    pub fn handle(&self) -> IndexHandle {
        self.catalog.handle()
    }

    pub fn state(&self) -> CatalogState {
        self.catalog.state()
    }
}
