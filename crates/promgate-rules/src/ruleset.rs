//! The compiled, immutable rule set.

use std::sync::Arc;

use tracing::debug;

use promgate_core::config::{DiscoveryRule, ExternalRule, GroupResourceRef};
use promgate_core::{
    AdapterConfig, ConfigError, ConfigResult, GroupResource, LabelRequirement, MetricKind,
    ResourceSelector,
};

use crate::error::RuleResult;
use crate::matchers;
use crate::namer::Namer;
use crate::resource::{ResourceConverter, ResourceMapper};
use crate::resource_rules::ResourceQueries;
use crate::template::{QueryContext, QueryTemplate};

/// Namespace label assumed for external rules without an override.
pub const DEFAULT_NAMESPACE_LABEL: &str = "namespace";

/// A rendered backend query plus the labels its rows are grouped by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedQuery {
    pub query: String,
    pub group_by: Vec<String>,
}

/// One configured rule, ready to claim series and render queries.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    index: usize,
    kind: MetricKind,
    namer: Namer,
    query: QueryTemplate,
    /// Namespace label of an external rule.
    namespace_label: Option<String>,
}

impl CompiledRule {
    fn custom(
        index: usize,
        rule: &DiscoveryRule,
        mapper: Arc<dyn ResourceMapper>,
    ) -> ConfigResult<Self> {
        let converter = ResourceConverter::new(
            rule.resources.template.as_deref(),
            &rule.resources.overrides,
            mapper,
        )?;
        let namer = Namer::compile(
            &rule.series_query,
            &rule.series_filters,
            &rule.name,
            converter,
            rule.resources.namespaced,
        )?;
        let query = QueryTemplate::parse(&rule.metrics_query)?;

        Ok(Self {
            index,
            kind: MetricKind::Custom,
            namer,
            query,
            namespace_label: None,
        })
    }

    fn external(
        index: usize,
        rule: &ExternalRule,
        mapper: Arc<dyn ResourceMapper>,
    ) -> ConfigResult<Self> {
        let namespace_label = external_namespace_label(rule, mapper.as_ref())?;

        let converter = ResourceConverter::new(None, &rule.resources.overrides, mapper)?;
        let namer = Namer::compile(
            &rule.series_query,
            &rule.series_filters,
            &rule.name,
            converter,
            rule.resources.namespaced,
        )?;
        let query = QueryTemplate::parse(&rule.metrics_query)?;

        Ok(Self {
            index,
            kind: MetricKind::External,
            namer,
            query,
            namespace_label: Some(namespace_label),
        })
    }

    /// Position of the rule within its kind's declared list.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn kind(&self) -> MetricKind {
        self.kind
    }

    pub fn namer(&self) -> &Namer {
        &self.namer
    }

    pub fn series_query(&self) -> &str {
        self.namer.series_query()
    }

    pub fn namespaced(&self) -> bool {
        self.namer.namespaced()
    }

    /// Render the value query for objects of `resource` backed by `series`.
    ///
    /// Rows of the result are grouped by the resource's label; callers map
    /// each row back to an object through it.
    pub fn query_for_objects(
        &self,
        series: &str,
        resource: &GroupResource,
        selector: &ResourceSelector,
    ) -> RuleResult<RenderedQuery> {
        let resource_label = self.namer.label_for(resource)?;

        let mut parts = Vec::with_capacity(selector.metric_selector.len() + 2);
        if let (Some(namespace), true) = (&selector.namespace, self.namer.namespaced()) {
            let namespace_label = self.namer.label_for(&GroupResource::namespaces())?;
            parts.push(matchers::label_eq(&namespace_label, namespace));
        }
        parts.push(matchers::names_matcher(&resource_label, &selector.names));
        parts.extend(selector.metric_selector.iter().map(matchers::requirement_matcher));

        let label_matchers = matchers::join(&parts);
        let query = self.query.render(&QueryContext {
            series,
            label_matchers: &label_matchers,
            group_by: &resource_label,
        });

        Ok(RenderedQuery {
            query,
            group_by: vec![resource_label],
        })
    }

    /// Render the value query of an external metric. The result is grouped
    /// by every label the selector mentions.
    pub fn query_for_external(
        &self,
        series: &str,
        namespace: Option<&str>,
        metric_selector: &[LabelRequirement],
    ) -> RenderedQuery {
        let mut parts = Vec::with_capacity(metric_selector.len() + 1);
        if let (Some(namespace), true) = (namespace, self.namer.namespaced()) {
            let label = self
                .namespace_label
                .as_deref()
                .unwrap_or(DEFAULT_NAMESPACE_LABEL);
            parts.push(matchers::label_eq(label, namespace));
        }
        parts.extend(metric_selector.iter().map(matchers::requirement_matcher));

        let mut group_by: Vec<String> = Vec::new();
        for req in metric_selector {
            if !group_by.contains(&req.key) {
                group_by.push(req.key.clone());
            }
        }

        let label_matchers = matchers::join(&parts);
        let group_by_joined = group_by.join(",");
        let query = self.query.render(&QueryContext {
            series,
            label_matchers: &label_matchers,
            group_by: &group_by_joined,
        });

        RenderedQuery { query, group_by }
    }
}

/// External rules may only rename the namespace label.
fn external_namespace_label(
    rule: &ExternalRule,
    mapper: &dyn ResourceMapper,
) -> ConfigResult<String> {
    let mut label = DEFAULT_NAMESPACE_LABEL.to_string();
    for (name, target) in &rule.resources.overrides {
        let GroupResourceRef { group, resource } = target;
        let resolved = mapper.normalize(&GroupResource::new(group.clone(), resource.clone()));
        match resolved {
            Some(gr) if gr.is_namespaces() => label = name.clone(),
            _ => {
                return Err(ConfigError::invalid_rule(
                    &rule.series_query,
                    format!(
                        "external rule overrides may only map the namespace label, got {name} -> {resource}"
                    ),
                ));
            }
        }
    }
    Ok(label)
}

/// Every configured rule, compiled. Built once per load; a reload builds a
/// new one.
pub struct RuleSet {
    rules: Vec<CompiledRule>,
    resource: Option<ResourceQueries>,
    mapper: Arc<dyn ResourceMapper>,
}

impl std::fmt::Debug for RuleSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleSet")
            .field("rules", &self.rules)
            .field("resource", &self.resource)
            .finish()
    }
}

impl RuleSet {
    /// Compile a config. Any invalid rule rejects the whole set.
    pub fn compile(config: &AdapterConfig, mapper: Arc<dyn ResourceMapper>) -> ConfigResult<Self> {
        let mut rules = Vec::with_capacity(config.rules.len() + config.external_rules.len());

        for (i, rule) in config.rules.iter().enumerate() {
            rules.push(CompiledRule::custom(i, rule, mapper.clone())?);
        }
        for (i, rule) in config.external_rules.iter().enumerate() {
            rules.push(CompiledRule::external(i, rule, mapper.clone())?);
        }

        let resource = config
            .resource_rules
            .as_ref()
            .map(|r| ResourceQueries::compile(r, mapper.clone()))
            .transpose()?;

        let set = Self {
            rules,
            resource,
            mapper,
        };
        debug!(
            custom = set.rules_of(MetricKind::Custom).count(),
            external = set.rules_of(MetricKind::External).count(),
            resource_rules = set.resource.is_some(),
            discovery_queries = set.discovery_queries().len(),
            "compiled rule set"
        );
        Ok(set)
    }

    /// All rules: custom rules in declared order, then external rules.
    pub fn rules(&self) -> &[CompiledRule] {
        &self.rules
    }

    pub fn rule(&self, position: usize) -> Option<&CompiledRule> {
        self.rules.get(position)
    }

    pub fn rules_of(&self, kind: MetricKind) -> impl Iterator<Item = &CompiledRule> {
        self.rules.iter().filter(move |r| r.kind == kind)
    }

    /// Distinct series queries in first-appearance order. Rules sharing a
    /// query share one discovery call.
    pub fn discovery_queries(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        for rule in &self.rules {
            let q = rule.series_query();
            if !seen.contains(&q) {
                seen.push(q);
            }
        }
        seen
    }

    pub fn resource_queries(&self) -> Option<&ResourceQueries> {
        self.resource.as_ref()
    }

    pub fn mapper(&self) -> &Arc<dyn ResourceMapper> {
        &self.mapper
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty() && self.resource.is_none()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::time::Duration;

    use promgate_core::config::{ExternalResources, NameMapping, ResourceMapping};

    use super::*;
    use crate::error::RuleError;
    use crate::resource::StaticResourceMapper;

    fn mapper() -> Arc<dyn ResourceMapper> {
        Arc::new(StaticResourceMapper::builtin())
    }

    fn pod_rule(series_query: &str, matches: &str) -> DiscoveryRule {
        DiscoveryRule {
            series_query: series_query.to_string(),
            series_filters: Vec::new(),
            resources: ResourceMapping {
                template: None,
                overrides: BTreeMap::from([
                    ("namespace".to_string(), GroupResourceRef::core("namespace")),
                    ("pod".to_string(), GroupResourceRef::core("pod")),
                ]),
                namespaced: true,
            },
            name: NameMapping::matches(matches),
            metrics_query: "sum(rate(<<.Series>>{<<.LabelMatchers>>}[2m])) by (<<.GroupBy>>)"
                .to_string(),
        }
    }

    fn external_rule(namespaced: bool) -> ExternalRule {
        ExternalRule {
            series_query: r#"{__name__="queue_depth"}"#.to_string(),
            series_filters: Vec::new(),
            resources: ExternalResources {
                namespaced,
                overrides: BTreeMap::new(),
            },
            name: NameMapping::default(),
            metrics_query: "max(<<.Series>>{<<.LabelMatchers>>}) by (<<.GroupBy>>)".to_string(),
        }
    }

    #[test]
    fn default_config_compiles() {
        let config = AdapterConfig::default_config(Duration::from_secs(120), "");
        let set = RuleSet::compile(&config, mapper()).unwrap();
        assert_eq!(set.len(), 6);
        assert!(set.resource_queries().is_some());
        // three container rules and three application rules share two queries
        assert_eq!(set.discovery_queries().len(), 2);
    }

    #[test]
    fn identical_series_queries_collapse() {
        let config = AdapterConfig {
            rules: vec![
                pod_rule("{a}", "^(.*)_total$"),
                pod_rule("{b}", "^(.*)$"),
                pod_rule("{a}", "^(.*)_seconds$"),
            ],
            external_rules: vec![external_rule(false)],
            resource_rules: None,
        };
        let set = RuleSet::compile(&config, mapper()).unwrap();
        assert_eq!(
            set.discovery_queries(),
            vec!["{a}", "{b}", r#"{__name__="queue_depth"}"#]
        );
        let sharing: Vec<usize> = set
            .rules()
            .iter()
            .enumerate()
            .filter(|(_, r)| r.series_query() == "{a}")
            .map(|(pos, _)| pos)
            .collect();
        assert_eq!(sharing, vec![0, 2]);
        assert_eq!(set.rules_of(MetricKind::External).count(), 1);
    }

    #[test]
    fn one_bad_rule_rejects_the_set() {
        let mut bad = pod_rule("{a}", "^(.*)$");
        bad.metrics_query = "sum(<<.Nope>>)".to_string();
        let config = AdapterConfig {
            rules: vec![pod_rule("{a}", "^(.*)$"), bad],
            ..Default::default()
        };
        let err = RuleSet::compile(&config, mapper()).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownPlaceholder(_)));
    }

    #[test]
    fn object_query_for_several_pods() {
        let config = AdapterConfig {
            rules: vec![pod_rule("{a}", "^(.*)_total$")],
            ..Default::default()
        };
        let set = RuleSet::compile(&config, mapper()).unwrap();
        let selector = ResourceSelector::new()
            .namespace("prod")
            .names(["web-1", "web-2"])
            .requirement(LabelRequirement::equals("verb", "GET"));

        let rendered = set.rules()[0]
            .query_for_objects("http_requests_total", &GroupResource::pods(), &selector)
            .unwrap();

        assert_eq!(
            rendered.query,
            r#"sum(rate(http_requests_total{namespace="prod",pod=~"web-1|web-2",verb="GET"}[2m])) by (pod)"#
        );
        assert_eq!(rendered.group_by, vec!["pod".to_string()]);
    }

    #[test]
    fn object_query_for_namespaces() {
        let config = AdapterConfig {
            rules: vec![pod_rule("{a}", "^(.*)_total$")],
            ..Default::default()
        };
        let set = RuleSet::compile(&config, mapper()).unwrap();
        let selector = ResourceSelector::new().name("prod");

        let rendered = set.rules()[0]
            .query_for_objects("http_requests_total", &GroupResource::namespaces(), &selector)
            .unwrap();
        assert_eq!(
            rendered.query,
            r#"sum(rate(http_requests_total{namespace="prod"}[2m])) by (namespace)"#
        );
    }

    #[test]
    fn object_query_for_unmapped_resource_fails() {
        let config = AdapterConfig {
            rules: vec![pod_rule("{a}", "^(.*)_total$")],
            ..Default::default()
        };
        let set = RuleSet::compile(&config, mapper()).unwrap();
        let err = set.rules()[0]
            .query_for_objects("x", &GroupResource::nodes(), &ResourceSelector::new())
            .unwrap_err();
        assert!(matches!(err, RuleError::NoLabelForResource(_)));
    }

    #[test]
    fn external_query_adds_namespace_only_when_namespaced() {
        let selector = vec![LabelRequirement::is_in("queue", ["a", "b"])];

        let config = AdapterConfig {
            external_rules: vec![external_rule(true), external_rule(false)],
            ..Default::default()
        };
        let set = RuleSet::compile(&config, mapper()).unwrap();

        let namespaced = set.rules()[0].query_for_external("queue_depth", Some("prod"), &selector);
        assert_eq!(
            namespaced.query,
            r#"max(queue_depth{namespace="prod",queue=~"a|b"}) by (queue)"#
        );
        assert_eq!(namespaced.group_by, vec!["queue".to_string()]);

        let global = set.rules()[1].query_for_external("queue_depth", Some("prod"), &selector);
        assert_eq!(global.query, r#"max(queue_depth{queue=~"a|b"}) by (queue)"#);
    }

    #[test]
    fn external_namespace_label_can_be_renamed() {
        let mut rule = external_rule(true);
        rule.resources
            .overrides
            .insert("kube_ns".to_string(), GroupResourceRef::core("namespace"));
        let config = AdapterConfig {
            external_rules: vec![rule],
            ..Default::default()
        };
        let set = RuleSet::compile(&config, mapper()).unwrap();
        let rendered = set.rules()[0].query_for_external("queue_depth", Some("prod"), &[]);
        assert_eq!(rendered.query, r#"max(queue_depth{kube_ns="prod"}) by ()"#);
    }

    #[test]
    fn external_override_must_be_the_namespace() {
        let mut rule = external_rule(true);
        rule.resources
            .overrides
            .insert("pod".to_string(), GroupResourceRef::core("pod"));
        let config = AdapterConfig {
            external_rules: vec![rule],
            ..Default::default()
        };
        let err = RuleSet::compile(&config, mapper()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidRule { .. }));
    }
}
