//! The metric index: which API metrics currently exist and which rule and
//! series back each of them.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::sync::Arc;
use std::time::SystemTime;

use arc_swap::ArcSwap;
use tracing::{debug, warn};

use promgate_core::{ExternalMetricInfo, GroupResource, MetricInfo, MetricKind, Series};
use promgate_rules::{CompiledRule, RuleSet};

use crate::error::DiscoveryError;

/// What backs one advertised metric.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    /// Position of the rule in [`RuleSet::rules`].
    pub rule: usize,
    /// Raw backend series name substituted for `<<.Series>>`.
    pub series_name: String,
}

/// Index contents of one relist tick. Immutable once published.
#[derive(Debug, Clone, Default)]
pub struct MetricIndex {
    custom: BTreeMap<MetricInfo, IndexEntry>,
    external: BTreeMap<String, IndexEntry>,
}

impl MetricIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an index from the series each discovery query returned.
    ///
    /// Rules are applied in declared order and the first rule to expose a
    /// key owns it. A rule with a fixed name that matches more than one
    /// family contributes nothing and yields a [`DiscoveryError::Ambiguous`].
    pub fn build(
        rules: &RuleSet,
        discovered: &BTreeMap<String, Vec<Series>>,
    ) -> (Self, Vec<DiscoveryError>) {
        let mut index = Self::new();
        let mut errors = Vec::new();

        for (position, rule) in rules.rules().iter().enumerate() {
            let Some(series) = discovered.get(rule.series_query()) else {
                continue;
            };

            let named = name_series(rule, series);
            if let Err(e) = check_literal(rule, &named) {
                warn!(error = %e, "skipping ambiguous rule");
                errors.push(e);
                continue;
            }

            for (name, s) in named {
                match rule.kind() {
                    MetricKind::Custom => index.add_custom(position, rule, &name, s),
                    MetricKind::External => index.add_external(position, &name, s),
                }
            }
        }

        (index, errors)
    }

    fn add_custom(&mut self, position: usize, rule: &CompiledRule, name: &str, series: &Series) {
        let (resources, namespaced) = rule.namer().resources_for(&series.labels);
        if resources.is_empty() {
            debug!(series = %series.name, "series maps to no resource, skipping");
            return;
        }

        for resource in resources {
            // namespaces are cluster scoped themselves
            let namespaced = namespaced && !resource.is_namespaces();
            let info = MetricInfo {
                group_resource: resource,
                metric: name.to_string(),
                namespaced,
            };
            let entry = IndexEntry {
                rule: position,
                series_name: series.name.clone(),
            };
            self.insert(info, entry);
        }
    }

    fn insert(&mut self, info: MetricInfo, entry: IndexEntry) {
        match self.custom.entry(info) {
            Entry::Vacant(slot) => {
                slot.insert(entry);
            }
            Entry::Occupied(existing) => warn_collision(existing.key(), existing.get(), &entry),
        }
    }

    fn add_external(&mut self, position: usize, name: &str, series: &Series) {
        let entry = IndexEntry {
            rule: position,
            series_name: series.name.clone(),
        };
        match self.external.entry(name.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(entry);
            }
            Entry::Occupied(existing) => warn_collision(existing.key(), existing.get(), &entry),
        }
    }

    /// Advertised custom metrics, sorted.
    pub fn custom_metrics(&self) -> Vec<MetricInfo> {
        self.custom.keys().cloned().collect()
    }

    /// Advertised external metrics, sorted.
    pub fn external_metrics(&self) -> Vec<ExternalMetricInfo> {
        self.external
            .keys()
            .map(|metric| ExternalMetricInfo {
                metric: metric.clone(),
            })
            .collect()
    }

    pub fn lookup_custom(
        &self,
        resource: &GroupResource,
        metric: &str,
        namespaced: bool,
    ) -> Option<&IndexEntry> {
        self.custom.get(&MetricInfo {
            group_resource: resource.clone(),
            metric: metric.to_string(),
            namespaced,
        })
    }

    pub fn lookup_external(&self, metric: &str) -> Option<&IndexEntry> {
        self.external.get(metric)
    }

    pub fn custom_len(&self) -> usize {
        self.custom.len()
    }

    pub fn external_len(&self) -> usize {
        self.external.len()
    }

    pub fn is_empty(&self) -> bool {
        self.custom.is_empty() && self.external.is_empty()
    }
}

/// Derive API names for the series a rule claims, keeping discovery order.
fn name_series<'a>(rule: &CompiledRule, series: &'a [Series]) -> Vec<(String, &'a Series)> {
    series
        .iter()
        .filter_map(|s| rule.namer().derive_name(&s.name).map(|name| (name, s)))
        .collect()
}

fn check_literal(rule: &CompiledRule, named: &[(String, &Series)]) -> Result<(), DiscoveryError> {
    if !rule.namer().is_literal() {
        return Ok(());
    }

    let mut families: Vec<String> = named.iter().map(|(_, s)| s.name.clone()).collect();
    families.sort();
    families.dedup();
    if families.len() <= 1 {
        return Ok(());
    }

    Err(DiscoveryError::Ambiguous {
        rule: rule.index(),
        series_query: rule.series_query().to_string(),
        name: named
            .first()
            .map(|(name, _)| name.clone())
            .unwrap_or_default(),
        families,
    })
}

fn warn_collision<K: std::fmt::Debug>(key: &K, kept: &IndexEntry, dropped: &IndexEntry) {
    if kept == dropped {
        return;
    }
    if kept.rule == dropped.rule {
        if kept.series_name != dropped.series_name {
            warn!(
                key = ?key,
                kept = %kept.series_name,
                dropped = %dropped.series_name,
                "two series derive the same metric name, keeping the first"
            );
        }
    } else {
        warn!(
            key = ?key,
            kept_rule = kept.rule,
            dropped_rule = dropped.rule,
            "metric exposed by more than one rule, keeping the first"
        );
    }
}

/// A rule set and the index built from it, published together.
#[derive(Debug)]
pub struct Snapshot {
    pub rules: Arc<RuleSet>,
    pub index: MetricIndex,
    /// Number of successful relists that produced this snapshot's lineage.
    pub generation: u64,
    pub refreshed_at: Option<SystemTime>,
}

impl Snapshot {
    /// An empty index over `rules`, before the first relist.
    pub fn initial(rules: Arc<RuleSet>) -> Self {
        Self {
            rules,
            index: MetricIndex::new(),
            generation: 0,
            refreshed_at: None,
        }
    }

    /// The rule backing `entry`.
    pub fn rule(&self, entry: &IndexEntry) -> Option<&CompiledRule> {
        self.rules.rule(entry.rule)
    }
}

/// Cheap, cloneable read access to the current [`Snapshot`].
///
/// Readers take a snapshot reference and never block the relister; a swap
/// is a single atomic pointer store.
#[derive(Debug, Clone)]
pub struct IndexHandle {
    current: Arc<ArcSwap<Snapshot>>,
}

impl IndexHandle {
    pub fn new(initial: Snapshot) -> Self {
        Self {
            current: Arc::new(ArcSwap::from_pointee(initial)),
        }
    }

    /// The snapshot current at the time of the call.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.current.load_full()
    }

    pub(crate) fn publish(&self, snapshot: Snapshot) {
        self.current.store(Arc::new(snapshot));
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use promgate_core::config::{
        DiscoveryRule, ExternalResources, ExternalRule, GroupResourceRef, NameMapping,
        ResourceMapping,
    };
    use promgate_core::{AdapterConfig, LabelSet};
    use promgate_rules::StaticResourceMapper;

    use super::*;

    const QUERY: &str = r#"{__name__=~"^container_.*"}"#;

    fn pod_rule(name: NameMapping) -> DiscoveryRule {
        DiscoveryRule {
            series_query: QUERY.to_string(),
            series_filters: Vec::new(),
            resources: ResourceMapping {
                template: None,
                overrides: BTreeMap::from([
                    ("namespace".to_string(), GroupResourceRef::core("namespace")),
                    ("pod".to_string(), GroupResourceRef::core("pod")),
                ]),
                namespaced: true,
            },
            name,
            metrics_query: "sum(<<.Series>>{<<.LabelMatchers>>}) by (<<.GroupBy>>)".to_string(),
        }
    }

    fn rules(config: AdapterConfig) -> RuleSet {
        RuleSet::compile(&config, Arc::new(StaticResourceMapper::builtin())).unwrap()
    }

    fn series(name: &str, labels: &[(&str, &str)]) -> Series {
        let labels: LabelSet = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Series::new(name, labels)
    }

    fn discovered(list: Vec<Series>) -> BTreeMap<String, Vec<Series>> {
        BTreeMap::from([(QUERY.to_string(), list)])
    }

    #[test]
    fn series_become_metrics_per_resource() {
        let set = rules(AdapterConfig {
            rules: vec![pod_rule(NameMapping::matches("^container_(.*)_total$"))],
            ..Default::default()
        });
        let found = discovered(vec![series(
            "container_fs_reads_total",
            &[("namespace", "ns1"), ("pod", "p1"), ("container", "c1")],
        )]);

        let (index, errors) = MetricIndex::build(&set, &found);
        assert!(errors.is_empty());
        assert_eq!(
            index.custom_metrics(),
            vec![
                MetricInfo {
                    group_resource: GroupResource::namespaces(),
                    metric: "fs_reads".to_string(),
                    namespaced: false,
                },
                MetricInfo {
                    group_resource: GroupResource::pods(),
                    metric: "fs_reads".to_string(),
                    namespaced: true,
                },
            ]
        );

        let entry = index
            .lookup_custom(&GroupResource::pods(), "fs_reads", true)
            .unwrap();
        assert_eq!(entry.series_name, "container_fs_reads_total");
        assert!(index.lookup_custom(&GroupResource::pods(), "fs_reads", false).is_none());
    }

    #[test]
    fn first_rule_wins_on_collision() {
        let set = rules(AdapterConfig {
            rules: vec![
                pod_rule(NameMapping::matches("^container_(.*)_total$")),
                pod_rule(NameMapping::matches("^container_(fs_reads)_total$")),
            ],
            ..Default::default()
        });
        let found = discovered(vec![series(
            "container_fs_reads_total",
            &[("namespace", "ns1"), ("pod", "p1")],
        )]);

        let (index, _) = MetricIndex::build(&set, &found);
        let entry = index.lookup_custom(&GroupResource::pods(), "fs_reads", true).unwrap();
        assert_eq!(entry.rule, 0);
        assert_eq!(index.custom_len(), 2);
    }

    #[test]
    fn literal_name_over_several_families_is_dropped() {
        let set = rules(AdapterConfig {
            rules: vec![
                pod_rule(NameMapping::matches("^container_.*$").with_as("container_activity")),
                pod_rule(NameMapping::matches("^container_(.*)$")),
            ],
            ..Default::default()
        });
        let found = discovered(vec![
            series("container_fs_reads_total", &[("namespace", "ns1"), ("pod", "p1")]),
            series("container_fs_writes_total", &[("namespace", "ns1"), ("pod", "p1")]),
        ]);

        let (index, errors) = MetricIndex::build(&set, &found);
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            &errors[0],
            DiscoveryError::Ambiguous { rule: 0, families, .. } if families.len() == 2
        ));
        assert!(index
            .lookup_custom(&GroupResource::pods(), "container_activity", true)
            .is_none());
        assert!(index
            .lookup_custom(&GroupResource::pods(), "fs_reads_total", true)
            .is_some());
    }

    #[test]
    fn literal_name_over_one_family_is_fine() {
        let set = rules(AdapterConfig {
            rules: vec![pod_rule(
                NameMapping::matches("^container_fs_reads_total$").with_as("reads"),
            )],
            ..Default::default()
        });
        let found = discovered(vec![
            series("container_fs_reads_total", &[("namespace", "ns1"), ("pod", "p1")]),
            series("container_fs_reads_total", &[("namespace", "ns1"), ("pod", "p2")]),
        ]);
        let (index, errors) = MetricIndex::build(&set, &found);
        assert!(errors.is_empty());
        assert!(index.lookup_custom(&GroupResource::pods(), "reads", true).is_some());
    }

    #[test]
    fn series_without_resources_are_skipped() {
        let set = rules(AdapterConfig {
            rules: vec![pod_rule(NameMapping::default())],
            ..Default::default()
        });
        let found = discovered(vec![series("container_scrape_error", &[("instance", "a")])]);
        let (index, _) = MetricIndex::build(&set, &found);
        assert!(index.is_empty());
    }

    #[test]
    fn external_rules_index_by_name() {
        let set = rules(AdapterConfig {
            external_rules: vec![ExternalRule {
                series_query: QUERY.to_string(),
                series_filters: Vec::new(),
                resources: ExternalResources::default(),
                name: NameMapping::matches("^container_(.*)$"),
                metrics_query: "max(<<.Series>>{<<.LabelMatchers>>})".to_string(),
            }],
            ..Default::default()
        });
        let found = discovered(vec![series("container_queue_depth", &[("queue", "q1")])]);
        let (index, _) = MetricIndex::build(&set, &found);
        assert_eq!(
            index.external_metrics(),
            vec![ExternalMetricInfo {
                metric: "queue_depth".to_string()
            }]
        );
        assert_eq!(
            index.lookup_external("queue_depth").unwrap().series_name,
            "container_queue_depth"
        );
        assert_eq!(index.custom_len(), 0);
    }

    #[test]
    fn handle_swaps_whole_snapshots() {
        let set = Arc::new(rules(AdapterConfig::default()));
        let handle = IndexHandle::new(Snapshot::initial(set.clone()));
        let before = handle.snapshot();
        assert_eq!(before.generation, 0);

        handle.publish(Snapshot {
            rules: set,
            index: MetricIndex::new(),
            generation: 1,
            refreshed_at: Some(SystemTime::now()),
        });

        assert_eq!(before.generation, 0);
        assert_eq!(handle.snapshot().generation, 1);
    }
}
