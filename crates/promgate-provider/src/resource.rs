//! Resource metrics — CPU and memory usage of pods and nodes.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use futures::future::try_join_all;
use tracing::{debug, warn};

use promgate_catalog::{with_deadline, IndexHandle, MetricsBackend};
use promgate_core::{
    ContainerMetrics, NamespacedName, NodeMetrics, PodMetrics, QueryResult, ResourceUsage, Sample,
};
use promgate_rules::ResourceQueries;

use crate::error::{ProviderError, ProviderResult};

/// pod → container → sample
type ContainerRows = BTreeMap<String, BTreeMap<String, Sample>>;

/// Serves the resource metrics API using the configured resource rules.
#[derive(Clone)]
pub struct ResourceMetricsProvider {
    handle: IndexHandle,
    backend: Arc<dyn MetricsBackend>,
    timeout: Duration,
}

impl ResourceMetricsProvider {
    pub fn new(handle: IndexHandle, backend: Arc<dyn MetricsBackend>, timeout: Duration) -> Self {
        Self {
            handle,
            backend,
            timeout,
        }
    }

    async fn run_all(&self, queries: &[String]) -> ProviderResult<Vec<QueryResult>> {
        let calls = queries
            .iter()
            .map(|q| with_deadline(self.timeout, self.backend.query(q)));
        Ok(try_join_all(calls).await?)
    }

    /// Container usage of `pods`. One CPU and one memory query is sent per
    /// namespace. Pods lacking CPU or memory data are omitted.
    pub async fn pod_metrics(&self, pods: &[NamespacedName]) -> ProviderResult<Vec<PodMetrics>> {
        let snapshot = self.handle.snapshot();
        let rules = resource_rules(snapshot.rules.resource_queries())?;

        let mut by_namespace: BTreeMap<&str, BTreeSet<String>> = BTreeMap::new();
        for pod in pods {
            by_namespace
                .entry(pod.namespace.as_str())
                .or_default()
                .insert(pod.name.clone());
        }

        let mut queries = Vec::with_capacity(by_namespace.len() * 2);
        for (namespace, names) in &by_namespace {
            let names: Vec<String> = names.iter().cloned().collect();
            queries.push(rules.cpu.container_query(namespace, &names));
            queries.push(rules.memory.container_query(namespace, &names));
        }
        let mut results = self.run_all(&queries).await?.into_iter();

        let mut out = Vec::new();
        for (namespace, names) in by_namespace {
            let (Some(cpu), Some(memory)) = (results.next(), results.next()) else {
                break;
            };
            let cpu = container_rows(cpu, rules.cpu.pod_label(), rules.cpu.container_label())?;
            let memory = container_rows(
                memory,
                rules.memory.pod_label(),
                rules.memory.container_label(),
            )?;

            for name in names {
                match assemble_pod(namespace, &name, cpu.get(&name), memory.get(&name), rules) {
                    Some(metrics) => out.push(metrics),
                    None => debug!(%namespace, pod = %name, "no complete usage data for pod, omitting"),
                }
            }
        }

        Ok(out)
    }

    /// Usage of `nodes`. Nodes lacking CPU or memory data are omitted.
    pub async fn node_metrics(&self, nodes: &[String]) -> ProviderResult<Vec<NodeMetrics>> {
        let snapshot = self.handle.snapshot();
        let rules = resource_rules(snapshot.rules.resource_queries())?;
        if nodes.is_empty() {
            return Ok(Vec::new());
        }

        let names: Vec<String> = nodes
            .iter()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let queries = [
            rules.cpu.node_query(&names),
            rules.memory.node_query(&names),
        ];
        let mut results = self.run_all(&queries).await?.into_iter();
        let (Some(cpu), Some(memory)) = (results.next(), results.next()) else {
            return Ok(Vec::new());
        };
        let cpu = node_rows(cpu, rules.cpu.node_label())?;
        let memory = node_rows(memory, rules.memory.node_label())?;

        let mut out = Vec::new();
        for name in names {
            match (cpu.get(&name), memory.get(&name)) {
                (Some(cpu), Some(memory)) => out.push(NodeMetrics {
                    timestamp: cpu.timestamp.max(memory.timestamp),
                    window: rules.window,
                    usage: ResourceUsage {
                        cpu_cores: cpu.value,
                        memory_bytes: memory.value,
                    },
                    name,
                }),
                _ => debug!(node = %name, "no complete usage data for node, omitting"),
            }
        }
        Ok(out)
    }
}

fn resource_rules(queries: Option<&ResourceQueries>) -> ProviderResult<&ResourceQueries> {
    queries.ok_or_else(|| ProviderError::NotFound("resource metrics rules".to_string()))
}

fn vector(result: QueryResult) -> ProviderResult<Vec<Sample>> {
    match result {
        QueryResult::Vector(samples) => Ok(samples),
        QueryResult::Scalar(_) => Err(ProviderError::Query(
            "resource query returned a scalar, expected a vector".to_string(),
        )),
    }
}

fn container_rows(
    result: QueryResult,
    pod_label: &str,
    container_label: &str,
) -> ProviderResult<ContainerRows> {
    let mut rows = ContainerRows::new();
    let mut ambiguous = BTreeSet::new();
    for sample in vector(result)? {
        let (Some(pod), Some(container)) = (
            sample.labels.get(pod_label).cloned(),
            sample.labels.get(container_label).cloned(),
        ) else {
            continue;
        };
        let containers = rows.entry(pod.clone()).or_default();
        if containers.contains_key(&container) {
            warn!(%pod, %container, "multiple rows for one container, omitting pod");
            ambiguous.insert(pod);
            continue;
        }
        containers.insert(container, sample);
    }
    for pod in ambiguous {
        rows.remove(&pod);
    }
    Ok(rows)
}

/// One row per node; a node reported more than once is left out.
fn node_rows(result: QueryResult, node_label: &str) -> ProviderResult<BTreeMap<String, Sample>> {
    let mut rows = BTreeMap::new();
    let mut ambiguous = BTreeSet::new();
    for sample in vector(result)? {
        let Some(node) = sample.labels.get(node_label).cloned() else {
            continue;
        };
        if rows.contains_key(&node) {
            warn!(%node, "multiple rows for one node, omitting");
            ambiguous.insert(node);
            continue;
        }
        rows.insert(node, sample);
    }
    for node in ambiguous {
        rows.remove(&node);
    }
    Ok(rows)
}

/// Containers reporting both CPU and memory make up the pod; a pod with
/// none of those is omitted.
fn assemble_pod(
    namespace: &str,
    name: &str,
    cpu: Option<&BTreeMap<String, Sample>>,
    memory: Option<&BTreeMap<String, Sample>>,
    rules: &ResourceQueries,
) -> Option<PodMetrics> {
    let (cpu, memory) = (cpu?, memory?);

    let mut timestamp = 0;
    let mut containers = Vec::new();
    for (container, cpu) in cpu {
        let Some(memory) = memory.get(container) else {
            continue;
        };
        timestamp = timestamp.max(cpu.timestamp).max(memory.timestamp);
        containers.push(ContainerMetrics {
            name: container.clone(),
            usage: ResourceUsage {
                cpu_cores: cpu.value,
                memory_bytes: memory.value,
            },
        });
    }

    if containers.is_empty() {
        return None;
    }

    Some(PodMetrics {
        namespace: namespace.to_string(),
        name: name.to_string(),
        timestamp,
        window: rules.window,
        containers,
    })
}
