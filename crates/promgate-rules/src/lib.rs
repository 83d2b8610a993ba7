//! promgate-rules — the compiled rule engine.
//!
//! Turns an [`AdapterConfig`](promgate_core::AdapterConfig) into an
//! immutable [`RuleSet`]: an ordered list of compiled predicates that
//! claim discovered series, name them, attribute them to Kubernetes
//! resources, and render the backend query for a value request.
//!
//! # Architecture
//!
//! ```text
//! RuleSet
//!   ├── CompiledRule (one per configured rule, declared order)
//!   │   ├── Namer
//!   │   │   ├── SeriesFilter[] (is / isNot, applied in order)
//!   │   │   ├── name regex + `as` expansion
//!   │   │   └── ResourceConverter (overrides, label template, ResourceMapper)
//!   │   └── QueryTemplate (<<.Series>>, <<.LabelMatchers>>, <<.GroupBy>>)
//!   └── ResourceQueries (cpu / memory container and node queries)
//! ```

pub mod error;
pub mod matchers;
pub mod namer;
pub mod resource;
pub mod resource_rules;
pub mod ruleset;
pub mod template;

pub use error::{RuleError, RuleResult};
pub use namer::{Namer, SeriesFilter};
pub use resource::{ResourceConverter, ResourceMapper, StaticResourceMapper};
pub use resource_rules::{ResourceQueries, UsageQueries};
pub use ruleset::{CompiledRule, RenderedQuery, RuleSet, DEFAULT_NAMESPACE_LABEL};
pub use template::{Placeholder, QueryContext, QueryTemplate, Template};
