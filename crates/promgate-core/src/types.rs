//! Shared types used across promgate crates.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Label name → label value for a single series or sample.
pub type LabelSet = BTreeMap<String, String>;

/// The backend's reserved label carrying the metric family name.
pub const METRIC_NAME_LABEL: &str = "__name__";

/// A Kubernetes API group plus plural resource name (`pods`, `deployments.apps`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupResource {
    #[serde(default)]
    pub group: String,
    pub resource: String,
}

impl GroupResource {
    pub fn new(group: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            resource: resource.into(),
        }
    }

    /// A resource in the core (empty) API group.
    pub fn core(resource: impl Into<String>) -> Self {
        Self::new("", resource)
    }

    pub fn namespaces() -> Self {
        Self::core("namespaces")
    }

    pub fn pods() -> Self {
        Self::core("pods")
    }

    pub fn nodes() -> Self {
        Self::core("nodes")
    }

    pub fn is_namespaces(&self) -> bool {
        *self == Self::namespaces()
    }
}

impl fmt::Display for GroupResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}", self.resource)
        } else {
            write!(f, "{}.{}", self.resource, self.group)
        }
    }
}

/// Parses the `Display` form: `pods`, `deployments.apps`.
impl std::str::FromStr for GroupResource {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.split_once('.') {
            Some((resource, group)) => Self::new(group, resource),
            None => Self::core(s),
        })
    }
}

/// The object a metric value is attributed to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceRef {
    pub group: String,
    pub resource: String,
    pub namespace: Option<String>,
    pub name: String,
}

impl ResourceRef {
    pub fn new(group_resource: &GroupResource, namespace: Option<&str>, name: &str) -> Self {
        Self {
            group: group_resource.group.clone(),
            resource: group_resource.resource.clone(),
            namespace: namespace.map(str::to_string),
            name: name.to_string(),
        }
    }

    pub fn group_resource(&self) -> GroupResource {
        GroupResource::new(self.group.clone(), self.resource.clone())
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}/{}", self.group_resource(), ns, self.name),
            None => write!(f, "{}/{}", self.group_resource(), self.name),
        }
    }
}

/// Which API surface a metric is served on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Attributed to Kubernetes objects (custom metrics API).
    Custom,
    /// Not bound to any object (external metrics API).
    External,
}

/// A custom metric as advertised to API clients.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MetricInfo {
    pub group_resource: GroupResource,
    pub metric: String,
    pub namespaced: bool,
}

impl fmt::Display for MetricInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.group_resource, self.metric)?;
        if self.namespaced {
            write!(f, " (namespaced)")?;
        }
        Ok(())
    }
}

/// An external metric as advertised to API clients.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExternalMetricInfo {
    pub metric: String,
}

/// One custom metric value attributed to an object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricValue {
    pub described_object: ResourceRef,
    pub metric: String,
    /// Unix epoch milliseconds of the sample.
    pub timestamp: i64,
    pub value: f64,
    /// The metric selector the value was computed under.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub selector: Vec<LabelRequirement>,
}

/// One external metric value with the labels of the row it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalMetricValue {
    pub metric: String,
    pub labels: LabelSet,
    pub timestamp: i64,
    pub value: f64,
}

/// A series as returned by backend discovery: family name plus labels.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Series {
    pub name: String,
    #[serde(default)]
    pub labels: LabelSet,
}

impl Series {
    pub fn new(name: impl Into<String>, labels: LabelSet) -> Self {
        Self {
            name: name.into(),
            labels,
        }
    }

    /// Build a series from a raw label set, lifting `__name__` out of the labels.
    pub fn from_labels(mut labels: LabelSet) -> Option<Self> {
        let name = labels.remove(METRIC_NAME_LABEL)?;
        Some(Self { name, labels })
    }
}

/// A single row of an instant query result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    #[serde(default)]
    pub labels: LabelSet,
    pub value: f64,
    pub timestamp: i64,
}

/// Result of an instant query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "resultType", content = "result", rename_all = "lowercase")]
pub enum QueryResult {
    Vector(Vec<Sample>),
    Scalar(Sample),
}

impl QueryResult {
    pub fn len(&self) -> usize {
        match self {
            QueryResult::Vector(samples) => samples.len(),
            QueryResult::Scalar(_) => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Operator of a label selector requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum SelectorOperator {
    In,
    NotIn,
    Equals,
    NotEquals,
    Exists,
    DoesNotExist,
}

/// One requirement of a Kubernetes-style label selector.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LabelRequirement {
    pub key: String,
    pub operator: SelectorOperator,
    #[serde(default)]
    pub values: Vec<String>,
}

impl LabelRequirement {
    pub fn equals(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            operator: SelectorOperator::Equals,
            values: vec![value.into()],
        }
    }

    pub fn not_equals(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            operator: SelectorOperator::NotEquals,
            values: vec![value.into()],
        }
    }

    pub fn is_in<I, S>(key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            key: key.into(),
            operator: SelectorOperator::In,
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn not_in<I, S>(key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            key: key.into(),
            operator: SelectorOperator::NotIn,
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn exists(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            operator: SelectorOperator::Exists,
            values: Vec::new(),
        }
    }

    pub fn does_not_exist(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            operator: SelectorOperator::DoesNotExist,
            values: Vec::new(),
        }
    }
}

/// Selects the objects a value request is about.
///
/// `names` are object names already resolved by the serving layer (for a
/// label-selector request it lists the matching objects first).
/// `metric_selector` narrows the series themselves.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceSelector {
    pub namespace: Option<String>,
    pub names: Vec<String>,
    #[serde(default)]
    pub metric_selector: Vec<LabelRequirement>,
}

impl ResourceSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.names.push(name.into());
        self
    }

    pub fn names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.names.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn requirement(mut self, requirement: LabelRequirement) -> Self {
        self.metric_selector.push(requirement);
        self
    }
}

/// A namespaced object name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NamespacedName {
    pub namespace: String,
    pub name: String,
}

impl NamespacedName {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

/// CPU (cores) and memory (bytes) usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub cpu_cores: f64,
    pub memory_bytes: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerMetrics {
    pub name: String,
    pub usage: ResourceUsage,
}

/// Resource usage of every container of one pod.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodMetrics {
    pub namespace: String,
    pub name: String,
    pub timestamp: i64,
    pub window: Duration,
    pub containers: Vec<ContainerMetrics>,
}

/// Resource usage of one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeMetrics {
    pub name: String,
    pub timestamp: i64,
    pub window: Duration,
    pub usage: ResourceUsage,
}
