//! Placeholder templates for backend queries and resource labels.
//!
//! Templates use `<<` / `>>` delimiters so they never collide with
//! PromQL's `{}` label syntax. Only a fixed set of placeholders exists;
//! each template kind declares which ones it accepts and anything else is
//! rejected when the rule set is compiled.

use std::fmt;

use promgate_core::{ConfigError, ConfigResult};

const OPEN: &str = "<<";
const CLOSE: &str = ">>";

/// A value that can be substituted into a template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Placeholder {
    /// `<<.Series>>`: the discovered series name.
    Series,
    /// `<<.LabelMatchers>>`: comma-joined label matchers.
    LabelMatchers,
    /// `<<.GroupBy>>`: comma-joined grouping labels.
    GroupBy,
    /// `<<.Group>>`: API group in a resource label template.
    Group,
    /// `<<.Resource>>`: singular resource in a resource label template.
    Resource,
}

impl Placeholder {
    pub const QUERY: &'static [Placeholder] = &[
        Placeholder::Series,
        Placeholder::LabelMatchers,
        Placeholder::GroupBy,
    ];

    pub const RESOURCE_LABEL: &'static [Placeholder] = &[Placeholder::Group, Placeholder::Resource];

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "Series" => Some(Placeholder::Series),
            "LabelMatchers" => Some(Placeholder::LabelMatchers),
            "GroupBy" => Some(Placeholder::GroupBy),
            "Group" => Some(Placeholder::Group),
            "Resource" => Some(Placeholder::Resource),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Placeholder::Series => "Series",
            Placeholder::LabelMatchers => "LabelMatchers",
            Placeholder::GroupBy => "GroupBy",
            Placeholder::Group => "Group",
            Placeholder::Resource => "Resource",
        }
    }
}

impl fmt::Display for Placeholder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{OPEN}.{}{CLOSE}", self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field(Placeholder),
}

/// A parsed template: literal text interleaved with placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
}

impl Template {
    /// Parse `source`, accepting only the placeholders in `allowed`.
    pub fn parse(source: &str, allowed: &[Placeholder]) -> ConfigResult<Self> {
        let mut segments = Vec::new();
        let mut rest = source;

        while let Some(start) = rest.find(OPEN) {
            if start > 0 {
                segments.push(Segment::Literal(rest[..start].to_string()));
            }
            let after_open = &rest[start + OPEN.len()..];
            let end = after_open
                .find(CLOSE)
                .ok_or_else(|| ConfigError::MalformedTemplate {
                    template: source.to_string(),
                    reason: format!("unclosed {OPEN}"),
                })?;

            let inner = after_open[..end].trim();
            let name = inner
                .strip_prefix('.')
                .ok_or_else(|| ConfigError::MalformedTemplate {
                    template: source.to_string(),
                    reason: format!("placeholder {inner:?} must start with '.'"),
                })?
                .trim();

            let field = Placeholder::from_name(name)
                .filter(|p| allowed.contains(p))
                .ok_or_else(|| ConfigError::UnknownPlaceholder(name.to_string()))?;
            segments.push(Segment::Field(field));

            rest = &after_open[end + CLOSE.len()..];
        }

        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Whether the template references `placeholder` at least once.
    pub fn uses(&self, placeholder: Placeholder) -> bool {
        self.segments
            .iter()
            .any(|s| matches!(s, Segment::Field(p) if *p == placeholder))
    }

    /// Substitute every placeholder with the value `lookup` returns for it.
    /// Literal text goes through `literal`, which lets callers
    /// escape it (the resource label extractor regex-escapes it).
    pub fn render_with<'a, F, L>(&self, lookup: F, literal: L) -> String
    where
        F: Fn(Placeholder) -> &'a str,
        L: Fn(&str) -> String,
    {
        let mut out = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(&literal(text)),
                Segment::Field(p) => out.push_str(lookup(*p)),
            }
        }
        out
    }

    /// Substitute placeholders, copying literal text unchanged.
    pub fn render<'a, F>(&self, lookup: F) -> String
    where
        F: Fn(Placeholder) -> &'a str,
    {
        self.render_with(lookup, str::to_string)
    }
}

/// Values a metrics query is rendered against.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryContext<'a> {
    pub series: &'a str,
    pub label_matchers: &'a str,
    pub group_by: &'a str,
}

/// A compiled `metricsQuery` / `containerQuery` / `nodeQuery`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryTemplate {
    template: Template,
}

impl QueryTemplate {
    pub fn parse(source: &str) -> ConfigResult<Self> {
        if source.trim().is_empty() {
            return Err(ConfigError::MalformedTemplate {
                template: source.to_string(),
                reason: "query template is empty".to_string(),
            });
        }
        Ok(Self {
            template: Template::parse(source, Placeholder::QUERY)?,
        })
    }

    pub fn source(&self) -> &str {
        self.template.source()
    }

    pub fn render(&self, ctx: &QueryContext<'_>) -> String {
        self.template.render(|p| match p {
            Placeholder::Series => ctx.series,
            Placeholder::LabelMatchers => ctx.label_matchers,
            Placeholder::GroupBy => ctx.group_by,
            // rejected by `parse`
            Placeholder::Group | Placeholder::Resource => "",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_all_query_placeholders() {
        let tmpl =
            QueryTemplate::parse("sum(rate(<<.Series>>{<<.LabelMatchers>>}[2m])) by (<<.GroupBy>>)")
                .unwrap();
        let out = tmpl.render(&QueryContext {
            series: "foo",
            label_matchers: r#"a="b""#,
            group_by: "c",
        });
        assert_eq!(out, r#"sum(rate(foo{a="b"}[2m])) by (c)"#);
        assert!(!out.contains(OPEN));
        assert!(!out.contains(CLOSE));
    }

    #[test]
    fn tolerates_whitespace_inside_delimiters() {
        let tmpl = QueryTemplate::parse("max(<< .Series >>)").unwrap();
        let out = tmpl.render(&QueryContext {
            series: "up",
            ..Default::default()
        });
        assert_eq!(out, "max(up)");
    }

    #[test]
    fn unknown_placeholder_is_a_config_error() {
        let err = QueryTemplate::parse("sum(<<.Series>>{<<.Namespace>>})").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownPlaceholder(ref name) if name == "Namespace"));
    }

    #[test]
    fn placeholder_from_the_wrong_template_kind_is_rejected() {
        let err = QueryTemplate::parse("sum(<<.Resource>>)").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownPlaceholder(_)));

        let err = Template::parse("kube_<<.Series>>", Placeholder::RESOURCE_LABEL).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownPlaceholder(_)));
    }

    #[test]
    fn unclosed_delimiter_is_malformed() {
        let err = QueryTemplate::parse("sum(<<.Series)").unwrap_err();
        assert!(matches!(err, ConfigError::MalformedTemplate { .. }));
    }

    #[test]
    fn empty_query_is_malformed() {
        assert!(QueryTemplate::parse("  ").is_err());
    }

    #[test]
    fn prometheus_braces_pass_through() {
        let tmpl = QueryTemplate::parse(r#"up{job="api"} > 0"#).unwrap();
        assert_eq!(tmpl.render(&QueryContext::default()), r#"up{job="api"} > 0"#);
    }

    #[test]
    fn uses_reports_referenced_placeholders() {
        let tmpl = Template::parse("kube_<<.Resource>>", Placeholder::RESOURCE_LABEL).unwrap();
        assert!(tmpl.uses(Placeholder::Resource));
        assert!(!tmpl.uses(Placeholder::Group));
    }
}
