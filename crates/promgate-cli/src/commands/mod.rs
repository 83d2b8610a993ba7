pub mod discover;
pub mod query;
pub mod validate;

use std::path::Path;
use std::sync::Arc;

use promgate_catalog::StaticBackend;
use promgate_core::{AdapterConfig, AdapterSettings};
use promgate_provider::Adapter;
use promgate_rules::StaticResourceMapper;

/// An adapter over a fixture backend. Nothing is discovered yet.
///
/// The returned backend serves both discovery and value queries, so its
/// recorded queries show what a request sent.
pub(crate) fn fixture_adapter(
    config: &Path,
    series: &Path,
    settings: &AdapterSettings,
) -> anyhow::Result<(Adapter, Arc<StaticBackend>)> {
    let config = AdapterConfig::from_file(config)?;
    let backend = Arc::new(StaticBackend::from_file(series)?);
    let adapter = Adapter::new(
        &config,
        settings,
        Arc::new(StaticResourceMapper::builtin()),
        backend.clone(),
        backend.clone(),
    )?;
    Ok((adapter, backend))
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use promgate_core::{GroupResource, MetricKind, ResourceSelector};
    use promgate_provider::MetricValues;

    use super::*;

    fn fixture(name: &str) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("fixtures").join(name)
    }

    #[tokio::test]
    async fn fixture_adapter_discovers_bundled_series() {
        let (adapter, backend) = fixture_adapter(
            &fixture("adapter.yaml"),
            &fixture("series.json"),
            &AdapterSettings::default(),
        )
        .unwrap();
        let stats = adapter.relist_once().await.unwrap();

        assert_eq!(stats.queries, 2);
        assert_eq!(stats.custom_metrics, 4);
        assert_eq!(stats.external_metrics, 1);
        assert_eq!(backend.query_calls(), 0);
    }

    #[tokio::test]
    async fn fixture_adapter_answers_bundled_queries() {
        let (adapter, backend) = fixture_adapter(
            &fixture("adapter.yaml"),
            &fixture("series.json"),
            &AdapterSettings::default(),
        )
        .unwrap();
        adapter.relist_once().await.unwrap();

        let selector = ResourceSelector::new().namespace("prod").name("web-1");
        let values = adapter
            .get_metric_values(
                MetricKind::Custom,
                &GroupResource::pods(),
                &selector,
                "http_requests_per_second",
            )
            .await
            .unwrap();

        let MetricValues::Custom(list) = values else {
            panic!("expected custom values");
        };
        assert_eq!(list.items.len(), 1);
        assert_eq!(list.items[0].value, 12.5);
        assert_eq!(
            backend.queries_seen().await,
            vec![r#"sum(rate(http_requests_total{namespace="prod",pod="web-1"}[2m])) by (pod)"#]
        );
    }

    #[test]
    fn missing_fixture_is_an_error() {
        let err = fixture_adapter(
            &fixture("adapter.yaml"),
            &fixture("absent.json"),
            &AdapterSettings::default(),
        )
        .err()
        .unwrap();
        assert!(err.to_string().contains("absent.json"));
    }
}
