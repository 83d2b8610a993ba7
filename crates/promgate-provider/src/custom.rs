//! Custom metrics — values attributed to Kubernetes objects.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use promgate_catalog::{with_deadline, IndexHandle, MetricsBackend};
use promgate_core::{GroupResource, MetricInfo, MetricValue, ResourceRef, ResourceSelector};

use crate::convert::{object_values, MetricValueList, ObjectRequest};
use crate::error::{ProviderError, ProviderResult};

/// Serves the custom metrics API from the catalog's current snapshot.
#[derive(Clone)]
pub struct CustomMetricsProvider {
    handle: IndexHandle,
    backend: Arc<dyn MetricsBackend>,
    timeout: Duration,
}

impl CustomMetricsProvider {
    pub fn new(handle: IndexHandle, backend: Arc<dyn MetricsBackend>, timeout: Duration) -> Self {
        Self {
            handle,
            backend,
            timeout,
        }
    }

    /// Every custom metric currently discovered. No backend call.
    pub fn list_metrics(&self) -> Vec<MetricInfo> {
        self.handle.snapshot().index.custom_metrics()
    }

    /// Values of `metric` for the objects `selector` names.
    ///
    /// A metric the index does not know is `NotFound` without touching the
    /// backend. Objects without data are left out of the result.
    pub async fn get_metric_values(
        &self,
        resource: &GroupResource,
        selector: &ResourceSelector,
        metric: &str,
    ) -> ProviderResult<MetricValueList> {
        let snapshot = self.handle.snapshot();
        let resource = snapshot
            .rules
            .mapper()
            .normalize(resource)
            .ok_or_else(|| ProviderError::NotFound(format!("resource {resource}")))?;
        let namespaced = selector.namespace.is_some();

        let not_found = || {
            ProviderError::NotFound(format!(
                "metric {metric} for {}{resource}",
                if namespaced { "namespaced " } else { "" }
            ))
        };
        let entry = snapshot
            .index
            .lookup_custom(&resource, metric, namespaced)
            .ok_or_else(not_found)?;
        let rule = snapshot.rule(entry).ok_or_else(not_found)?;

        let rendered = rule.query_for_objects(&entry.series_name, &resource, selector)?;
        debug!(%metric, %resource, query = %rendered.query, "querying custom metric");

        let result = with_deadline(self.timeout, self.backend.query(&rendered.query)).await?;

        let resource_label = rendered.group_by.first().map(String::as_str).unwrap_or_default();
        object_values(
            result,
            &ObjectRequest {
                resource: &resource,
                namespace: selector.namespace.as_deref(),
                names: &selector.names,
                metric,
                selector: &selector.metric_selector,
                resource_label,
            },
        )
    }

    /// The value of `metric` for a single object.
    pub async fn get_value(
        &self,
        resource: &GroupResource,
        namespace: Option<&str>,
        name: &str,
        metric: &str,
    ) -> ProviderResult<MetricValue> {
        let mut selector = ResourceSelector::new().name(name);
        selector.namespace = namespace.map(str::to_string);

        let mut list = self.get_metric_values(resource, &selector, metric).await?;

        if let Some(ambiguous) = list.ambiguous.pop() {
            return Err(ProviderError::Ambiguous {
                object: ambiguous.object.to_string(),
                rows: ambiguous.rows,
            });
        }
        list.items.pop().ok_or_else(|| {
            let object = ResourceRef::new(resource, namespace, name);
            ProviderError::NotFound(format!("metric {metric} for {object}"))
        })
    }
}
