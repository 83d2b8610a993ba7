use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use promgate_core::{AdapterConfig, MetricKind};
use promgate_rules::{RuleSet, StaticResourceMapper};

pub fn validate(path: &Path) -> anyhow::Result<()> {
    let config = AdapterConfig::from_file(path)?;
    let rules = RuleSet::compile(&config, Arc::new(StaticResourceMapper::builtin()))?;

    if config.is_empty() {
        println!("! {} defines no rules", path.display());
        return Ok(());
    }

    println!("✓ {} is valid", path.display());
    println!("  custom rules:      {}", rules.rules_of(MetricKind::Custom).count());
    println!("  external rules:    {}", rules.rules_of(MetricKind::External).count());
    println!(
        "  resource rules:    {}",
        if rules.resource_queries().is_some() { "yes" } else { "no" }
    );

    let queries = rules.discovery_queries();
    println!("  discovery queries: {}", queries.len());
    for query in queries {
        println!("    {query}");
    }

    Ok(())
}

pub fn defaults(rate_interval: Duration, label_prefix: &str) -> anyhow::Result<()> {
    let config = AdapterConfig::default_config(rate_interval, label_prefix);
    print!("{}", config.to_yaml_string()?);
    Ok(())
}
