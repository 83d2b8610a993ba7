//! Series naming — which series a rule claims and what they are called.

use regex::Regex;

use promgate_core::config::{NameMapping, RegexFilter};
use promgate_core::{ConfigError, ConfigResult, GroupResource, LabelSet};

use crate::error::RuleResult;
use crate::resource::ResourceConverter;

/// One `is` / `isNot` test on a series name.
#[derive(Debug, Clone)]
pub struct SeriesFilter {
    regex: Regex,
    allow: bool,
}

impl SeriesFilter {
    pub fn compile(filter: &RegexFilter, series_query: &str) -> ConfigResult<Self> {
        let (pattern, allow) = match (&filter.is, &filter.is_not) {
            (Some(pattern), None) => (pattern, true),
            (None, Some(pattern)) => (pattern, false),
            (Some(_), Some(_)) => {
                return Err(ConfigError::invalid_rule(
                    series_query,
                    "series filter may not set both 'is' and 'isNot'",
                ));
            }
            (None, None) => {
                return Err(ConfigError::invalid_rule(
                    series_query,
                    "series filter must set 'is' or 'isNot'",
                ));
            }
        };

        Ok(Self {
            regex: compile_regex(pattern)?,
            allow,
        })
    }

    /// Whether this filter lets `series_name` through.
    pub fn admits(&self, series_name: &str) -> bool {
        self.regex.is_match(series_name) == self.allow
    }
}

/// A `$1` / `${name}` reference inside a `name.as` template.
#[derive(Debug, Clone, PartialEq, Eq)]
enum CaptureRef {
    Index(usize),
    Name(String),
}

/// Scan an expansion template for capture references, following the
/// regex crate's expansion syntax (`$$` is a literal dollar).
fn capture_refs(template: &str) -> Vec<CaptureRef> {
    let bytes = template.as_bytes();
    let mut refs = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        match bytes.get(i + 1) {
            Some(b'$') => i += 2,
            Some(b'{') => match template[i + 2..].find('}') {
                Some(len) => {
                    refs.push(to_ref(&template[i + 2..i + 2 + len]));
                    i += len + 3;
                }
                None => i += 1,
            },
            _ => {
                let len = template[i + 1..]
                    .bytes()
                    .take_while(|b| b.is_ascii_alphanumeric() || *b == b'_')
                    .count();
                if len > 0 {
                    refs.push(to_ref(&template[i + 1..i + 1 + len]));
                }
                i += len + 1;
            }
        }
    }

    refs
}

fn to_ref(name: &str) -> CaptureRef {
    match name.parse::<usize>() {
        Ok(index) => CaptureRef::Index(index),
        Err(_) => CaptureRef::Name(name.to_string()),
    }
}

/// Derives metric names and resource associations for one rule.
#[derive(Debug, Clone)]
pub struct Namer {
    series_query: String,
    filters: Vec<SeriesFilter>,
    matches: Regex,
    as_: String,
    literal: bool,
    converter: ResourceConverter,
    namespaced: bool,
}

impl Namer {
    /// Compile a rule's naming section.
    ///
    /// Without `matches` the whole series name matches. Without `as` the
    /// single capture group (or the whole match when there is none) is the
    /// name; more than one capture group then requires an explicit `as`.
    pub fn compile(
        series_query: &str,
        filters: &[RegexFilter],
        name: &NameMapping,
        converter: ResourceConverter,
        namespaced: bool,
    ) -> ConfigResult<Self> {
        let filters = filters
            .iter()
            .map(|f| SeriesFilter::compile(f, series_query))
            .collect::<ConfigResult<Vec<_>>>()?;

        let matches = compile_regex(name.matches.as_deref().unwrap_or(".*"))?;

        let (as_, literal) = match name.as_.as_deref() {
            Some(as_) => {
                let refs = capture_refs(as_);
                for r in &refs {
                    let known = match r {
                        CaptureRef::Index(i) => *i < matches.captures_len(),
                        CaptureRef::Name(n) => matches.capture_names().flatten().any(|c| c == n.as_str()),
                    };
                    if !known {
                        return Err(ConfigError::invalid_rule(
                            series_query,
                            format!(
                                "name template {as_:?} references {r:?}, which {:?} does not capture",
                                matches.as_str()
                            ),
                        ));
                    }
                }
                (as_.to_string(), refs.is_empty())
            }
            None => match matches.captures_len() {
                1 => ("$0".to_string(), false),
                2 => ("$1".to_string(), false),
                _ => {
                    return Err(ConfigError::invalid_rule(
                        series_query,
                        format!(
                            "name matcher {:?} has several capture groups, an 'as' value is required",
                            matches.as_str()
                        ),
                    ));
                }
            },
        };

        Ok(Self {
            series_query: series_query.to_string(),
            filters,
            matches,
            as_,
            literal,
            converter,
            namespaced,
        })
    }

    /// The backend selector this rule discovers series with.
    pub fn series_query(&self) -> &str {
        &self.series_query
    }

    /// True when `as` is a fixed name, so every claimed family shares it.
    pub fn is_literal(&self) -> bool {
        self.literal
    }

    pub fn namespaced(&self) -> bool {
        self.namespaced
    }

    /// Whether the series filters, applied in order, admit `series_name`.
    pub fn admits(&self, series_name: &str) -> bool {
        self.filters.iter().all(|f| f.admits(series_name))
    }

    /// The API name for a raw series name, or `None` when this rule does
    /// not claim the series.
    pub fn derive_name(&self, series_name: &str) -> Option<String> {
        if !self.admits(series_name) {
            return None;
        }
        let caps = self.matches.captures(series_name)?;
        let mut name = String::new();
        caps.expand(&self.as_, &mut name);
        (!name.is_empty()).then_some(name)
    }

    /// The resources a series is attributed to, and whether the metric is
    /// namespaced.
    pub fn resources_for(&self, labels: &LabelSet) -> (Vec<GroupResource>, bool) {
        let (resources, has_namespace) = self.converter.resources_for(labels);
        (resources, has_namespace && self.namespaced)
    }

    /// The label that carries object names of `resource`.
    pub fn label_for(&self, resource: &GroupResource) -> RuleResult<String> {
        self.converter.label_for(resource)
    }
}

fn compile_regex(pattern: &str) -> ConfigResult<Regex> {
    Regex::new(pattern).map_err(|e| ConfigError::InvalidRegex {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use promgate_core::config::GroupResourceRef;

    use super::*;
    use crate::resource::StaticResourceMapper;

    fn converter() -> ResourceConverter {
        let overrides = BTreeMap::from([
            ("namespace".to_string(), GroupResourceRef::core("namespace")),
            ("pod".to_string(), GroupResourceRef::core("pod")),
        ]);
        ResourceConverter::new(None, &overrides, Arc::new(StaticResourceMapper::builtin())).unwrap()
    }

    fn namer(filters: &[RegexFilter], name: NameMapping) -> ConfigResult<Namer> {
        Namer::compile(
            r#"{__name__=~"^container_.*"}"#,
            filters,
            &name,
            converter(),
            true,
        )
    }

    #[test]
    fn capture_group_becomes_the_name() {
        let n = namer(&[], NameMapping::matches("^container_(.*)_seconds_total$")).unwrap();
        assert_eq!(
            n.derive_name("container_cpu_usage_seconds_total").as_deref(),
            Some("cpu_usage")
        );
        assert!(n.derive_name("node_cpu_seconds_total").is_none());
        assert!(!n.is_literal());
    }

    #[test]
    fn as_template_expands_captures() {
        let n = namer(
            &[],
            NameMapping::matches("^container_(.*)_total$").with_as("${1}_per_second"),
        )
        .unwrap();
        assert_eq!(
            n.derive_name("container_network_receive_bytes_total").as_deref(),
            Some("network_receive_bytes_per_second")
        );
    }

    #[test]
    fn named_groups_expand() {
        let n = namer(
            &[],
            NameMapping::matches("^container_(?P<what>.*)_total$").with_as("$what"),
        )
        .unwrap();
        assert_eq!(n.derive_name("container_restarts_total").as_deref(), Some("restarts"));
    }

    #[test]
    fn missing_matches_uses_whole_name() {
        let n = namer(&[], NameMapping::default()).unwrap();
        assert_eq!(n.derive_name("container_last_seen").as_deref(), Some("container_last_seen"));
    }

    #[test]
    fn several_groups_require_as() {
        let err = namer(&[], NameMapping::matches("^(container)_(.*)$")).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidRule { .. }));
    }

    #[test]
    fn as_referencing_missing_group_fails_compile() {
        let err = namer(&[], NameMapping::matches("^container_(.*)$").with_as("$2")).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidRule { .. }));

        let err = namer(&[], NameMapping::matches("^container_(.*)$").with_as("${kind}")).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidRule { .. }));
    }

    #[test]
    fn literal_as_is_detected() {
        let n = namer(&[], NameMapping::matches("^container_.*$").with_as("container_activity")).unwrap();
        assert!(n.is_literal());
        assert_eq!(n.derive_name("container_fs_reads").as_deref(), Some("container_activity"));

        let escaped = namer(&[], NameMapping::matches("^container_.*$").with_as("cost_$$")).unwrap();
        assert!(escaped.is_literal());
    }

    #[test]
    fn is_not_filter_excludes_series() {
        let n = namer(
            &[RegexFilter::is_not("^container_.*_seconds_total$")],
            NameMapping::matches("^container_(.*)_total$"),
        )
        .unwrap();
        assert!(n.derive_name("container_cpu_usage_seconds_total").is_none());
        assert_eq!(
            n.derive_name("container_network_receive_bytes_total").as_deref(),
            Some("network_receive_bytes")
        );
    }

    #[test]
    fn filters_apply_as_conjunction_in_order() {
        let n = namer(
            &[
                RegexFilter::is("^container_network_.*"),
                RegexFilter::is_not(".*_errors_total$"),
            ],
            NameMapping::matches("^container_(.*)_total$"),
        )
        .unwrap();

        let kept: Vec<&str> = [
            "container_network_receive_bytes_total",
            "container_network_receive_errors_total",
            "container_fs_reads_total",
        ]
        .into_iter()
        .filter(|name| n.admits(name))
        .collect();
        assert_eq!(kept, vec!["container_network_receive_bytes_total"]);
    }

    #[test]
    fn filter_with_both_or_neither_field_is_rejected() {
        let both = RegexFilter {
            is: Some("a".into()),
            is_not: Some("b".into()),
        };
        assert!(namer(&[both], NameMapping::default()).is_err());
        assert!(namer(&[RegexFilter::default()], NameMapping::default()).is_err());
    }

    #[test]
    fn invalid_regex_is_reported() {
        let err = namer(&[], NameMapping::matches("^container_(")).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidRegex { .. }));
    }

    #[test]
    fn resources_for_drops_plain_dimensions() {
        let n = namer(&[], NameMapping::default()).unwrap();
        let labels = LabelSet::from([
            ("namespace".to_string(), "ns1".to_string()),
            ("pod".to_string(), "p1".to_string()),
            ("container".to_string(), "c1".to_string()),
        ]);
        let (resources, namespaced) = n.resources_for(&labels);
        assert_eq!(resources, vec![GroupResource::namespaces(), GroupResource::pods()]);
        assert!(namespaced);
    }

    #[test]
    fn non_namespaced_rule_ignores_namespace_label() {
        let n = Namer::compile("{}", &[], &NameMapping::default(), converter(), false).unwrap();
        let labels = LabelSet::from([
            ("namespace".to_string(), "ns1".to_string()),
            ("pod".to_string(), "p1".to_string()),
        ]);
        let (_, namespaced) = n.resources_for(&labels);
        assert!(!namespaced);
    }

    #[test]
    fn capture_ref_scanner() {
        assert!(capture_refs("plain").is_empty());
        assert!(capture_refs("$$1").is_empty());
        assert_eq!(
            capture_refs("${1}_$name-$2"),
            vec![
                CaptureRef::Index(1),
                CaptureRef::Name("name".into()),
                CaptureRef::Index(2)
            ]
        );
        assert!(capture_refs("${unclosed").is_empty());
    }
}
