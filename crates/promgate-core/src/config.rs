//! Metrics discovery configuration: the rule schema and its loaders.
//!
//! The on-disk shape follows the adapter's YAML format:
//!
//! ```yaml
//! rules:
//! - seriesQuery: '{__name__=~"^container_.*",namespace!="",pod!=""}'
//!   seriesFilters:
//!   - isNot: "^container_.*_seconds_total$"
//!   resources:
//!     overrides:
//!       namespace: {resource: namespace}
//!       pod: {resource: pod}
//!   name:
//!     matches: "^container_(.*)_total$"
//!   metricsQuery: 'sum(rate(<<.Series>>{<<.LabelMatchers>>}[2m])) by (<<.GroupBy>>)'
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// Top-level rule document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdapterConfig {
    /// Discovery rules bound to Kubernetes resources (custom metrics).
    #[serde(default)]
    pub rules: Vec<DiscoveryRule>,
    /// Rules not bound to any resource (external metrics).
    #[serde(default)]
    pub external_rules: Vec<ExternalRule>,
    /// Built-in node/pod CPU and memory rules (resource metrics).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_rules: Option<ResourceRules>,
}

/// A resource-bound discovery rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryRule {
    /// Backend series selector used for discovery.
    pub series_query: String,
    /// Ordered allow/deny filters on the series name.
    #[serde(default)]
    pub series_filters: Vec<RegexFilter>,
    #[serde(default)]
    pub resources: ResourceMapping,
    #[serde(default)]
    pub name: NameMapping,
    /// Query template over `<<.Series>>`, `<<.LabelMatchers>>`, `<<.GroupBy>>`.
    pub metrics_query: String,
}

/// A rule for metrics that are not attributed to any object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalRule {
    pub series_query: String,
    #[serde(default)]
    pub series_filters: Vec<RegexFilter>,
    #[serde(default)]
    pub resources: ExternalResources,
    #[serde(default)]
    pub name: NameMapping,
    pub metrics_query: String,
}

/// An allow (`is`) or deny (`isNot`) test on a series name. Exactly one
/// of the two must be set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegexFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_not: Option<String>,
}

impl RegexFilter {
    pub fn is(pattern: impl Into<String>) -> Self {
        Self {
            is: Some(pattern.into()),
            is_not: None,
        }
    }

    pub fn is_not(pattern: impl Into<String>) -> Self {
        Self {
            is: None,
            is_not: Some(pattern.into()),
        }
    }
}

/// A group/resource pair as written in overrides (`{group: apps, resource: deployment}`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupResourceRef {
    #[serde(default)]
    pub group: String,
    pub resource: String,
}

impl GroupResourceRef {
    pub fn core(resource: impl Into<String>) -> Self {
        Self {
            group: String::new(),
            resource: resource.into(),
        }
    }
}

/// How series labels map to Kubernetes resources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceMapping {
    /// Label template over `<<.Group>>` and `<<.Resource>>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    /// Explicit label → resource mappings; win over the template.
    #[serde(default)]
    pub overrides: BTreeMap<String, GroupResourceRef>,
    #[serde(default = "default_true")]
    pub namespaced: bool,
}

impl Default for ResourceMapping {
    fn default() -> Self {
        Self {
            template: None,
            overrides: BTreeMap::new(),
            namespaced: true,
        }
    }
}

/// Resource section of an external rule: only namespacing is configurable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalResources {
    #[serde(default = "default_true")]
    pub namespaced: bool,
    /// May only rename the namespace label.
    #[serde(default)]
    pub overrides: BTreeMap<String, GroupResourceRef>,
}

impl Default for ExternalResources {
    fn default() -> Self {
        Self {
            namespaced: true,
            overrides: BTreeMap::new(),
        }
    }
}

/// How a series name becomes an API metric name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NameMapping {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matches: Option<String>,
    #[serde(default, rename = "as", skip_serializing_if = "Option::is_none")]
    pub as_: Option<String>,
}

impl NameMapping {
    pub fn matches(pattern: impl Into<String>) -> Self {
        Self {
            matches: Some(pattern.into()),
            as_: None,
        }
    }

    pub fn with_as(mut self, as_: impl Into<String>) -> Self {
        self.as_ = Some(as_.into());
        self
    }
}

/// Built-in CPU and memory rules for the resource metrics API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRules {
    pub cpu: ResourceRule,
    pub memory: ResourceRule,
    /// Window the queries aggregate over, reported alongside values.
    #[serde(default = "default_window", with = "duration_serde")]
    pub window: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRule {
    /// Per-container query, grouped by pod and container.
    pub container_query: String,
    /// Per-node query, grouped by node.
    pub node_query: String,
    #[serde(default)]
    pub resources: ResourceMapping,
    /// Label carrying the container name.
    pub container_label: String,
}

/// Runtime settings of the adapter engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdapterSettings {
    /// Interval between relists of available metrics.
    #[serde(default = "default_relist_interval", with = "duration_serde")]
    pub relist_interval: Duration,
    /// Discovery lookback; defaults to the relist interval.
    #[serde(default, with = "duration_serde_option")]
    pub metrics_max_age: Option<Duration>,
    /// Deadline for a single value query.
    #[serde(default = "default_query_timeout", with = "duration_serde")]
    pub query_timeout: Duration,
}

impl Default for AdapterSettings {
    fn default() -> Self {
        Self {
            relist_interval: default_relist_interval(),
            metrics_max_age: None,
            query_timeout: default_query_timeout(),
        }
    }
}

impl AdapterSettings {
    /// Lookback window used for series discovery.
    pub fn discovery_window(&self) -> Duration {
        self.metrics_max_age.unwrap_or(self.relist_interval)
    }
}

fn default_true() -> bool {
    true
}

fn default_window() -> Duration {
    Duration::from_secs(60)
}

fn default_relist_interval() -> Duration {
    Duration::from_secs(10 * 60)
}

fn default_query_timeout() -> Duration {
    Duration::from_secs(30)
}

impl AdapterConfig {
    /// Load a config file, picking the format from the extension.
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        match path.extension().and_then(|s| s.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml_str(&content),
            Some("toml") => Self::from_toml_str(&content),
            Some("json") => Self::from_json_str(&content),
            other => Err(ConfigError::UnsupportedFormat(
                other.unwrap_or_default().to_string(),
            )),
        }
    }

    pub fn from_yaml_str(content: &str) -> ConfigResult<Self> {
        serde_yaml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn from_json_str(content: &str) -> ConfigResult<Self> {
        serde_json::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn to_yaml_string(&self) -> ConfigResult<String> {
        serde_yaml::to_string(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Whether the document declares anything to serve.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty() && self.external_rules.is_empty() && self.resource_rules.is_none()
    }

    /// The stock rule set for cAdvisor container metrics plus generic
    /// application metrics labelled with `<label_prefix>namespace`,
    /// `<label_prefix>pod` and so on.
    pub fn default_config(rate_interval: Duration, label_prefix: &str) -> Self {
        let rate = humantime::format_duration(rate_interval).to_string();

        let container_query =
            r#"{__name__=~"^container_.*",container!="POD",namespace!="",pod!=""}"#.to_string();
        let container_resources = ResourceMapping {
            template: None,
            overrides: BTreeMap::from([
                ("namespace".to_string(), GroupResourceRef::core("namespace")),
                ("pod".to_string(), GroupResourceRef::core("pod")),
            ]),
            namespaced: true,
        };

        let app_query = format!(
            r#"{{{label_prefix}namespace!="",__name__!~"^container_.*"}}"#
        );
        let app_resources = ResourceMapping {
            template: Some(format!("{label_prefix}<<.Resource>>")),
            overrides: BTreeMap::new(),
            namespaced: true,
        };

        let rules = vec![
            // container seconds counters
            DiscoveryRule {
                series_query: container_query.clone(),
                series_filters: Vec::new(),
                resources: container_resources.clone(),
                name: NameMapping::matches("^container_(.*)_seconds_total$"),
                metrics_query: format!(
                    r#"sum(rate(<<.Series>>{{<<.LabelMatchers>>,container!="POD"}}[{rate}])) by (<<.GroupBy>>)"#
                ),
            },
            // container counters
            DiscoveryRule {
                series_query: container_query.clone(),
                series_filters: vec![RegexFilter::is_not("^container_.*_seconds_total$")],
                resources: container_resources.clone(),
                name: NameMapping::matches("^container_(.*)_total$"),
                metrics_query: format!(
                    r#"sum(rate(<<.Series>>{{<<.LabelMatchers>>,container!="POD"}}[{rate}])) by (<<.GroupBy>>)"#
                ),
            },
            // container gauges
            DiscoveryRule {
                series_query: container_query,
                series_filters: vec![RegexFilter::is_not("^container_.*_total$")],
                resources: container_resources,
                name: NameMapping::matches("^container_(.*)$"),
                metrics_query:
                    r#"sum(<<.Series>>{<<.LabelMatchers>>,container!="POD"}) by (<<.GroupBy>>)"#
                        .to_string(),
            },
            // application gauges
            DiscoveryRule {
                series_query: app_query.clone(),
                series_filters: vec![RegexFilter::is_not(".*_total$")],
                resources: app_resources.clone(),
                name: NameMapping::default(),
                metrics_query: "sum(<<.Series>>{<<.LabelMatchers>>}) by (<<.GroupBy>>)".to_string(),
            },
            // application counters
            DiscoveryRule {
                series_query: app_query.clone(),
                series_filters: vec![RegexFilter::is_not(".*_seconds_total")],
                resources: app_resources.clone(),
                name: NameMapping::matches("^(.*)_total$"),
                metrics_query: format!(
                    "sum(rate(<<.Series>>{{<<.LabelMatchers>>}}[{rate}])) by (<<.GroupBy>>)"
                ),
            },
            // application seconds counters
            DiscoveryRule {
                series_query: app_query,
                series_filters: vec![RegexFilter::is(".*_seconds_total")],
                resources: app_resources,
                name: NameMapping::matches("^(.*)_seconds_total$"),
                metrics_query: format!(
                    "sum(rate(<<.Series>>{{<<.LabelMatchers>>}}[{rate}])) by (<<.GroupBy>>)"
                ),
            },
        ];

        let resource_overrides = ResourceMapping {
            template: None,
            overrides: BTreeMap::from([
                ("namespace".to_string(), GroupResourceRef::core("namespace")),
                ("pod".to_string(), GroupResourceRef::core("pod")),
                ("instance".to_string(), GroupResourceRef::core("node")),
            ]),
            namespaced: true,
        };

        let resource_rules = ResourceRules {
            cpu: ResourceRule {
                container_query: format!(
                    "sum(rate(container_cpu_usage_seconds_total{{<<.LabelMatchers>>}}[{rate}])) by (<<.GroupBy>>)"
                ),
                node_query: format!(
                    "sum(rate(container_cpu_usage_seconds_total{{<<.LabelMatchers>>,id='/'}}[{rate}])) by (<<.GroupBy>>)"
                ),
                resources: resource_overrides.clone(),
                container_label: "container".to_string(),
            },
            memory: ResourceRule {
                container_query:
                    "sum(container_memory_working_set_bytes{<<.LabelMatchers>>}) by (<<.GroupBy>>)"
                        .to_string(),
                node_query:
                    "sum(container_memory_working_set_bytes{<<.LabelMatchers>>,id='/'}) by (<<.GroupBy>>)"
                        .to_string(),
                resources: resource_overrides,
                container_label: "container".to_string(),
            },
            window: rate_interval,
        };

        Self {
            rules,
            external_rules: Vec::new(),
            resource_rules: Some(resource_rules),
        }
    }
}

mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

mod duration_serde_option {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&humantime::format_duration(*d).to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let opt = Option::<String>::deserialize(deserializer)?;
        opt.map(|s| humantime::parse_duration(&s).map_err(serde::de::Error::custom))
            .transpose()
    }
}
