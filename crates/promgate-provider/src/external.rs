//! External metrics — values not bound to any object.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use promgate_catalog::{with_deadline, IndexHandle, MetricsBackend};
use promgate_core::{ExternalMetricInfo, ExternalMetricValue, LabelRequirement};

use crate::convert::external_values;
use crate::error::{ProviderError, ProviderResult};

/// Serves the external metrics API from the catalog's current snapshot.
#[derive(Clone)]
pub struct ExternalMetricsProvider {
    handle: IndexHandle,
    backend: Arc<dyn MetricsBackend>,
    timeout: Duration,
}

impl ExternalMetricsProvider {
    pub fn new(handle: IndexHandle, backend: Arc<dyn MetricsBackend>, timeout: Duration) -> Self {
        Self {
            handle,
            backend,
            timeout,
        }
    }

    pub fn list_external(&self) -> Vec<ExternalMetricInfo> {
        self.handle.snapshot().index.external_metrics()
    }

    /// Values of `metric`, one per result row. The namespace only narrows
    /// the query for rules declared namespaced.
    pub async fn get_external_values(
        &self,
        namespace: Option<&str>,
        metric: &str,
        metric_selector: &[LabelRequirement],
    ) -> ProviderResult<Vec<ExternalMetricValue>> {
        let snapshot = self.handle.snapshot();
        let not_found = || ProviderError::NotFound(format!("external metric {metric}"));
        let entry = snapshot.index.lookup_external(metric).ok_or_else(not_found)?;
        let rule = snapshot.rule(entry).ok_or_else(not_found)?;

        let rendered = rule.query_for_external(&entry.series_name, namespace, metric_selector);
        debug!(%metric, query = %rendered.query, "querying external metric");

        let result = with_deadline(self.timeout, self.backend.query(&rendered.query)).await?;
        Ok(external_values(result, metric))
    }
}
