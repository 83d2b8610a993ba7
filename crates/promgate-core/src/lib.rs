//! promgate-core — shared types and rule configuration for promgate.
//!
//! Holds the declarative rule schema operators write (`rules`,
//! `externalRules`, `resourceRules`), the loader that reads it from
//! YAML/TOML/JSON, and the resource-oriented API types every other
//! crate exchanges.

pub mod config;
pub mod error;
pub mod types;

pub use config::{AdapterConfig, AdapterSettings};
pub use error::{ConfigError, ConfigResult};
pub use types::*;
