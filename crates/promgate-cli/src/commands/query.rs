use std::path::Path;
use std::time::Duration;

use tracing::debug;

use promgate_core::{AdapterSettings, GroupResource, MetricKind, ResourceSelector};

use crate::Kind;

pub struct QueryRequest {
    pub kind: Kind,
    pub resource: GroupResource,
    pub namespace: Option<String>,
    pub names: Vec<String>,
    pub metric: String,
    pub timeout: Duration,
}

pub async fn query(config: &Path, series: &Path, request: &QueryRequest) -> anyhow::Result<()> {
    let settings = AdapterSettings {
        query_timeout: request.timeout,
        ..AdapterSettings::default()
    };
    let (adapter, backend) = super::fixture_adapter(config, series, &settings)?;
    adapter.relist_once().await?;

    let mut selector = ResourceSelector::new().names(request.names.iter().cloned());
    selector.namespace = request.namespace.clone();

    let kind = match request.kind {
        Kind::Custom => MetricKind::Custom,
        Kind::External => MetricKind::External,
    };
    debug!(
        resource = %request.resource,
        metric = %request.metric,
        names = request.names.len(),
        "sending value request"
    );
    let values = adapter
        .get_metric_values(kind, &request.resource, &selector, &request.metric)
        .await?;

    for sent in backend.queries_seen().await {
        println!("query: {sent}");
    }
    println!("{}", serde_json::to_string_pretty(&values)?);
    Ok(())
}
