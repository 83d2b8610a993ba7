//! Resource mapping — associates series labels with Kubernetes resources.
//!
//! A [`ResourceMapper`] knows which resources exist (the REST mapper of a
//! real cluster). A [`ResourceConverter`] applies one rule's `resources`
//! section on top of it: explicit label overrides first, then the label
//! template (`kube_<<.Group>>_<<.Resource>>`) for every other label.

use std::collections::BTreeMap;
use std::sync::Arc;

use regex::Regex;
use tracing::trace;

use promgate_core::config::GroupResourceRef;
use promgate_core::{ConfigError, ConfigResult, GroupResource, LabelSet, METRIC_NAME_LABEL};

use crate::error::{RuleError, RuleResult};
use crate::template::{Placeholder, Template};

/// Knows the resources available in the cluster.
pub trait ResourceMapper: Send + Sync {
    /// Resolve a singular or plural (optionally grouped) name to the
    /// canonical plural group-resource. `None` if the resource is unknown.
    fn normalize(&self, resource: &GroupResource) -> Option<GroupResource>;

    /// Singular name of a canonical group-resource.
    fn singular(&self, resource: &GroupResource) -> Option<String>;
}

#[derive(Debug, Clone)]
struct Kind {
    group: String,
    plural: String,
    singular: String,
}

/// A fixed table of resources; ships the built-in Kubernetes kinds.
#[derive(Debug, Clone)]
pub struct StaticResourceMapper {
    kinds: Vec<Kind>,
}

impl StaticResourceMapper {
    /// A mapper that knows no resources at all.
    pub fn empty() -> Self {
        Self { kinds: Vec::new() }
    }

    /// A mapper preloaded with the common built-in kinds.
    pub fn builtin() -> Self {
        Self::empty()
            .register("", "namespaces", "namespace")
            .register("", "pods", "pod")
            .register("", "nodes", "node")
            .register("", "services", "service")
            .register("", "persistentvolumeclaims", "persistentvolumeclaim")
            .register("", "replicationcontrollers", "replicationcontroller")
            .register("apps", "deployments", "deployment")
            .register("apps", "statefulsets", "statefulset")
            .register("apps", "daemonsets", "daemonset")
            .register("apps", "replicasets", "replicaset")
            .register("batch", "jobs", "job")
            .register("batch", "cronjobs", "cronjob")
            .register("networking.k8s.io", "ingresses", "ingress")
            .register("autoscaling", "horizontalpodautoscalers", "horizontalpodautoscaler")
    }

    /// Add a resource (for custom resources).
    pub fn register(
        mut self,
        group: impl Into<String>,
        plural: impl Into<String>,
        singular: impl Into<String>,
    ) -> Self {
        self.kinds.push(Kind {
            group: group.into(),
            plural: plural.into().to_lowercase(),
            singular: singular.into().to_lowercase(),
        });
        self
    }

    fn find(&self, resource: &GroupResource) -> Option<&Kind> {
        let name = resource.resource.to_lowercase();
        let named = |k: &&Kind| k.plural == name || k.singular == name;

        if resource.group.is_empty() {
            // Core group first, then any group with a unique match.
            if let Some(kind) = self.kinds.iter().filter(|k| k.group.is_empty()).find(named) {
                return Some(kind);
            }
            let mut candidates = self.kinds.iter().filter(named);
            let first = candidates.next()?;
            return candidates.next().is_none().then_some(first);
        }

        self.kinds
            .iter()
            .filter(|k| k.group == resource.group)
            .find(named)
    }
}

impl Default for StaticResourceMapper {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ResourceMapper for StaticResourceMapper {
    fn normalize(&self, resource: &GroupResource) -> Option<GroupResource> {
        self.find(resource)
            .map(|k| GroupResource::new(k.group.clone(), k.plural.clone()))
    }

    fn singular(&self, resource: &GroupResource) -> Option<String> {
        self.find(resource).map(|k| k.singular.clone())
    }
}

/// Recovers a group-resource from a label name using a label template.
#[derive(Debug, Clone)]
struct LabelExtractor {
    regex: Regex,
}

impl LabelExtractor {
    const GROUP: &'static str = "group";
    const RESOURCE: &'static str = "resource";

    fn new(template: &Template) -> ConfigResult<Self> {
        if !template.uses(Placeholder::Resource) {
            return Err(ConfigError::MalformedTemplate {
                template: template.source().to_string(),
                reason: "resource template must reference <<.Resource>>".to_string(),
            });
        }

        let body = template.render_with(
            |p| match p {
                Placeholder::Group => "(?P<group>.+?)",
                _ => "(?P<resource>.+?)",
            },
            regex::escape,
        );
        let pattern = format!("^{body}$");
        let regex = Regex::new(&pattern).map_err(|e| ConfigError::InvalidRegex {
            pattern,
            reason: e.to_string(),
        })?;

        Ok(Self { regex })
    }

    fn extract(&self, label: &str) -> Option<GroupResource> {
        let caps = self.regex.captures(label)?;
        let group = caps
            .name(Self::GROUP)
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();
        let resource = caps.name(Self::RESOURCE)?.as_str().to_string();
        Some(GroupResource::new(group, resource))
    }
}

/// Applies one rule's `resources` section.
#[derive(Clone)]
pub struct ResourceConverter {
    label_to_resource: BTreeMap<String, GroupResource>,
    resource_to_label: BTreeMap<GroupResource, String>,
    template: Option<Template>,
    extractor: Option<LabelExtractor>,
    mapper: Arc<dyn ResourceMapper>,
}

impl std::fmt::Debug for ResourceConverter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceConverter")
            .field("overrides", &self.label_to_resource)
            .field("template", &self.template.as_ref().map(Template::source))
            .finish()
    }
}

impl ResourceConverter {
    /// Compile overrides and template. Every override must name a resource
    /// the mapper knows.
    pub fn new(
        template: Option<&str>,
        overrides: &BTreeMap<String, GroupResourceRef>,
        mapper: Arc<dyn ResourceMapper>,
    ) -> ConfigResult<Self> {
        let mut label_to_resource = BTreeMap::new();
        let mut resource_to_label = BTreeMap::new();

        for (label, raw) in overrides {
            let wanted = GroupResource::new(raw.group.clone(), raw.resource.clone());
            let resolved = mapper
                .normalize(&wanted)
                .ok_or_else(|| ConfigError::UnknownResource(wanted.to_string()))?;
            label_to_resource.insert(label.clone(), resolved.clone());
            resource_to_label.insert(resolved, label.clone());
        }

        let (template, extractor) = match template.filter(|t| !t.is_empty()) {
            Some(source) => {
                let parsed = Template::parse(source, Placeholder::RESOURCE_LABEL)?;
                let extractor = LabelExtractor::new(&parsed)?;
                (Some(parsed), Some(extractor))
            }
            None => (None, None),
        };

        Ok(Self {
            label_to_resource,
            resource_to_label,
            template,
            extractor,
            mapper,
        })
    }

    /// The resources a series' labels refer to, and whether one of them is
    /// the namespace. Labels that resolve to nothing are plain dimensions
    /// and are skipped.
    pub fn resources_for(&self, labels: &LabelSet) -> (Vec<GroupResource>, bool) {
        let mut resources = Vec::new();
        let mut namespaced = false;

        for label in labels.keys() {
            if label == METRIC_NAME_LABEL {
                continue;
            }

            let resolved = match self.label_to_resource.get(label) {
                Some(resource) => Some(resource.clone()),
                None => self
                    .extractor
                    .as_ref()
                    .and_then(|e| e.extract(label))
                    .and_then(|candidate| self.mapper.normalize(&candidate)),
            };

            match resolved {
                Some(resource) => {
                    namespaced |= resource.is_namespaces();
                    resources.push(resource);
                }
                None => trace!(%label, "label does not name a resource"),
            }
        }

        resources.sort();
        resources.dedup();
        (resources, namespaced)
    }

    /// The label that carries object names of `resource`.
    pub fn label_for(&self, resource: &GroupResource) -> RuleResult<String> {
        if let Some(label) = self.resource_to_label.get(resource) {
            return Ok(label.clone());
        }

        let template = self
            .template
            .as_ref()
            .ok_or_else(|| RuleError::NoLabelForResource(resource.clone()))?;
        let singular = self
            .mapper
            .singular(resource)
            .ok_or_else(|| RuleError::UnknownResource(resource.to_string()))?;
        let group = sanitize_group(&resource.group);

        Ok(template.render(|p| match p {
            Placeholder::Group => group.as_str(),
            _ => singular.as_str(),
        }))
    }
}

/// Label names cannot contain `.` or `-`.
fn sanitize_group(group: &str) -> String {
    group.replace(['.', '-'], "_")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapper() -> Arc<dyn ResourceMapper> {
        Arc::new(StaticResourceMapper::builtin())
    }

    fn labels(pairs: &[(&str, &str)]) -> LabelSet {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn overrides(pairs: &[(&str, &str)]) -> BTreeMap<String, GroupResourceRef> {
        pairs
            .iter()
            .map(|(label, resource)| (label.to_string(), GroupResourceRef::core(*resource)))
            .collect()
    }

    #[test]
    fn mapper_normalizes_singular_and_plural() {
        let m = StaticResourceMapper::builtin();
        assert_eq!(
            m.normalize(&GroupResource::core("pod")),
            Some(GroupResource::pods())
        );
        assert_eq!(
            m.normalize(&GroupResource::core("Pods")),
            Some(GroupResource::pods())
        );
        assert_eq!(
            m.normalize(&GroupResource::core("deployment")),
            Some(GroupResource::new("apps", "deployments"))
        );
        assert!(m.normalize(&GroupResource::core("container")).is_none());
        assert_eq!(
            m.singular(&GroupResource::new("apps", "deployments")).as_deref(),
            Some("deployment")
        );
    }

    #[test]
    fn overrides_select_exactly_named_labels() {
        let conv = ResourceConverter::new(
            None,
            &overrides(&[("namespace", "namespace"), ("pod", "pod")]),
            mapper(),
        )
        .unwrap();

        let (resources, namespaced) = conv.resources_for(&labels(&[
            ("namespace", "ns1"),
            ("pod", "p1"),
            ("container", "c1"),
        ]));

        assert_eq!(resources, vec![GroupResource::namespaces(), GroupResource::pods()]);
        assert!(namespaced);
    }

    #[test]
    fn unknown_override_fails_compile() {
        let err = ResourceConverter::new(None, &overrides(&[("gpu", "gpu")]), mapper()).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownResource(_)));
    }

    #[test]
    fn template_resolves_resource_labels() {
        let conv = ResourceConverter::new(Some("kube_<<.Resource>>"), &BTreeMap::new(), mapper())
            .unwrap();

        let (resources, namespaced) = conv.resources_for(&labels(&[
            ("kube_namespace", "ns1"),
            ("kube_deployment", "web"),
            ("kube_flavor", "vanilla"),
            ("instance", "10.0.0.1:9090"),
        ]));

        assert_eq!(
            resources,
            vec![
                GroupResource::namespaces(),
                GroupResource::new("apps", "deployments"),
            ]
        );
        assert!(namespaced);
    }

    #[test]
    fn overrides_win_over_template() {
        let conv = ResourceConverter::new(
            Some("<<.Resource>>"),
            &overrides(&[("node", "pod")]),
            mapper(),
        )
        .unwrap();

        let (resources, _) = conv.resources_for(&labels(&[("node", "n1")]));
        assert_eq!(resources, vec![GroupResource::pods()]);
        assert_eq!(conv.label_for(&GroupResource::pods()).unwrap(), "node");
    }

    #[test]
    fn template_with_group() {
        let conv = ResourceConverter::new(
            Some("kube_<<.Group>>_<<.Resource>>"),
            &BTreeMap::new(),
            mapper(),
        )
        .unwrap();

        let (resources, namespaced) = conv.resources_for(&labels(&[("kube_apps_deployment", "web")]));
        assert_eq!(resources, vec![GroupResource::new("apps", "deployments")]);
        assert!(!namespaced);

        assert_eq!(
            conv.label_for(&GroupResource::new("networking.k8s.io", "ingresses")).unwrap(),
            "kube_networking_k8s_io_ingress"
        );
    }

    #[test]
    fn label_for_uses_singular_template_form() {
        let conv = ResourceConverter::new(Some("kube_<<.Resource>>"), &BTreeMap::new(), mapper())
            .unwrap();
        assert_eq!(conv.label_for(&GroupResource::pods()).unwrap(), "kube_pod");
    }

    #[test]
    fn label_for_without_template_or_override_fails() {
        let conv = ResourceConverter::new(None, &BTreeMap::new(), mapper()).unwrap();
        let err = conv.label_for(&GroupResource::pods()).unwrap_err();
        assert!(matches!(err, RuleError::NoLabelForResource(_)));
    }

    #[test]
    fn template_without_resource_placeholder_is_rejected() {
        let err = ResourceConverter::new(Some("kube_<<.Group>>"), &BTreeMap::new(), mapper())
            .unwrap_err();
        assert!(matches!(err, ConfigError::MalformedTemplate { .. }));
    }
}
