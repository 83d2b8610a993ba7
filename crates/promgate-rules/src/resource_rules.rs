//! Compiled CPU and memory rules for the resource metrics API.

use std::sync::Arc;
use std::time::Duration;

use promgate_core::config::{ResourceRule, ResourceRules};
use promgate_core::{ConfigError, ConfigResult, GroupResource};

use crate::matchers;
use crate::resource::{ResourceConverter, ResourceMapper};
use crate::template::{QueryContext, QueryTemplate};

/// Container and node queries for one resource (CPU or memory).
#[derive(Debug, Clone)]
pub struct UsageQueries {
    container_query: QueryTemplate,
    node_query: QueryTemplate,
    container_label: String,
    pod_label: String,
    node_label: String,
    namespace_label: String,
}

impl UsageQueries {
    /// Compile one resource rule. Pods, nodes and namespaces must all
    /// resolve to a label, either by override or through the template.
    pub fn compile(rule: &ResourceRule, mapper: Arc<dyn ResourceMapper>) -> ConfigResult<Self> {
        let converter = ResourceConverter::new(
            rule.resources.template.as_deref(),
            &rule.resources.overrides,
            mapper,
        )?;

        let label = |resource: GroupResource| {
            converter.label_for(&resource).map_err(|e| {
                ConfigError::invalid_rule(&rule.container_query, e.to_string())
            })
        };

        if rule.container_label.is_empty() {
            return Err(ConfigError::invalid_rule(
                &rule.container_query,
                "containerLabel must be set",
            ));
        }

        Ok(Self {
            container_query: QueryTemplate::parse(&rule.container_query)?,
            node_query: QueryTemplate::parse(&rule.node_query)?,
            container_label: rule.container_label.clone(),
            pod_label: label(GroupResource::pods())?,
            node_label: label(GroupResource::nodes())?,
            namespace_label: label(GroupResource::namespaces())?,
        })
    }

    pub fn container_label(&self) -> &str {
        &self.container_label
    }

    pub fn pod_label(&self) -> &str {
        &self.pod_label
    }

    pub fn node_label(&self) -> &str {
        &self.node_label
    }

    pub fn namespace_label(&self) -> &str {
        &self.namespace_label
    }

    /// Per-container usage of `pods` in `namespace`, grouped by pod and
    /// container.
    pub fn container_query(&self, namespace: &str, pods: &[String]) -> String {
        let label_matchers = matchers::join([
            matchers::label_eq(&self.namespace_label, namespace),
            matchers::names_matcher(&self.pod_label, pods),
        ]);
        let group_by = format!("{},{}", self.pod_label, self.container_label);

        self.container_query.render(&QueryContext {
            series: "",
            label_matchers: &label_matchers,
            group_by: &group_by,
        })
    }

    /// Per-node usage of `nodes`, grouped by node.
    pub fn node_query(&self, nodes: &[String]) -> String {
        let label_matchers = matchers::names_matcher(&self.node_label, nodes);

        self.node_query.render(&QueryContext {
            series: "",
            label_matchers: &label_matchers,
            group_by: &self.node_label,
        })
    }
}

/// The full resource metrics rule set.
#[derive(Debug, Clone)]
pub struct ResourceQueries {
    pub cpu: UsageQueries,
    pub memory: UsageQueries,
    pub window: Duration,
}

impl ResourceQueries {
    pub fn compile(rules: &ResourceRules, mapper: Arc<dyn ResourceMapper>) -> ConfigResult<Self> {
        Ok(Self {
            cpu: UsageQueries::compile(&rules.cpu, mapper.clone())?,
            memory: UsageQueries::compile(&rules.memory, mapper)?,
            window: rules.window,
        })
    }
}
