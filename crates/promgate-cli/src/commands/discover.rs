use std::path::Path;
use std::time::SystemTime;

use promgate_core::{AdapterSettings, MetricKind};
use promgate_provider::AvailableMetric;

use crate::OutputFormat;

pub async fn discover(config: &Path, series: &Path, format: OutputFormat) -> anyhow::Result<()> {
    let (adapter, _) = super::fixture_adapter(config, series, &AdapterSettings::default())?;
    let stats = adapter.relist_once().await?;
    let custom = adapter.list_metrics(MetricKind::Custom);
    let external = adapter.list_metrics(MetricKind::External);
    let refreshed_at = refreshed(adapter.handle().snapshot().refreshed_at);

    match format {
        OutputFormat::Json => {
            let out = serde_json::json!({
                "stats": stats,
                "refreshedAt": refreshed_at,
                "custom": custom,
                "external": external,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        OutputFormat::Text => {
            println!(
                "{} series from {} queries → {} custom, {} external",
                stats.series, stats.queries, stats.custom_metrics, stats.external_metrics
            );
            println!("generation {} refreshed at {refreshed_at}", stats.generation);
            if stats.ambiguous_rules > 0 {
                println!("! {} rule(s) skipped as ambiguous", stats.ambiguous_rules);
            }
            for metric in custom.iter().chain(&external) {
                println!("  {}", describe(metric));
            }
        }
    }

    Ok(())
}

fn refreshed(at: Option<SystemTime>) -> String {
    at.map(|t| humantime::format_rfc3339_seconds(t).to_string())
        .unwrap_or_else(|| "never".to_string())
}

fn describe(metric: &AvailableMetric) -> String {
    match metric {
        AvailableMetric::Custom(info) => format!(
            "custom    {}/{}{}",
            info.group_resource,
            info.metric,
            if info.namespaced { "" } else { " (cluster)" }
        ),
        AvailableMetric::External(info) => format!("external  {}", info.metric),
    }
}
