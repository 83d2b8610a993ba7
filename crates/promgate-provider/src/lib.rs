//! promgate-provider — the serving surface.
//!
//! Answers custom, external and resource metrics requests from the
//! catalog's current snapshot: look the metric up, render the rule's query,
//! run it against the backend and map the rows back to objects.
//!
//! # Architecture
//!
//! ```text
//! Adapter
//!   ├── Catalog (relist backend)  → IndexHandle
//!   ├── CustomMetricsProvider     ← list_metrics(), get_metric_values(), get_value()
//!   ├── ExternalMetricsProvider   ← list_external(), get_external_values()
//!   └── ResourceMetricsProvider   ← pod_metrics(), node_metrics()
//!         (all three share the query backend and read the same IndexHandle)
//! ```

pub mod adapter;
pub mod convert;
pub mod custom;
pub mod error;
pub mod external;
pub mod resource;

pub use adapter::{Adapter, AvailableMetric, MetricValues};
pub use convert::{AmbiguousObject, MetricValueList};
pub use custom::CustomMetricsProvider;
pub use error::{ProviderError, ProviderResult};
pub use external::ExternalMetricsProvider;
pub use resource::ResourceMetricsProvider;
