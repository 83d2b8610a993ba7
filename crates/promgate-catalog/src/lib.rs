//! promgate-catalog — discovery of the metrics that currently exist.
//!
//! The [`Catalog`] periodically lists the series behind every distinct
//! discovery query, lets the [`RuleSet`](promgate_rules::RuleSet) claim
//! and name them, and atomically publishes the result. Readers take a
//! [`Snapshot`] through an [`IndexHandle`] without ever waiting on a
//! relist.
//!
//! # Architecture
//!
//! ```text
//! Catalog::run()
//!   ├── relist_once()  ← every relist interval, and after reload()
//!   │   ├── MetricsBackend::list_series()  (one call per distinct seriesQuery, concurrent)
//!   │   ├── MetricIndex::build()           (rules in declared order, first wins)
//!   │   └── IndexHandle::publish()         (atomic swap of rules + index)
//!   └── on failure: previous Snapshot stays published
//!
//! IndexHandle::snapshot() → Arc<Snapshot>  ← providers, any number of readers
//! ```

pub mod backend;
pub mod error;
pub mod index;
pub mod relister;

pub use backend::{with_deadline, BackendFixture, MetricsBackend, StaticBackend};
pub use error::{BackendError, BackendResult, DiscoveryError, DiscoveryResult};
pub use index::{IndexEntry, IndexHandle, MetricIndex, Snapshot};
pub use relister::{Catalog, CatalogState, RelistSettings, RelistStats};
