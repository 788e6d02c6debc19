//! # Common CDC Types and Traits
//!
//! Source-agnostic building blocks shared by the Cassandra pipeline:
//!
//! - [`CdcError`] - Error type with categories and retriability
//! - [`CdcSource`] / [`CdcConfig`] - Lifecycle and configuration contracts
//! - [`CommitLogMetrics`] - Counters mirrored to the `metrics` facade
//! - [`FieldPatternSet`] - Glob matching of `keyspace.table.column` names

mod error;
mod metrics;
pub mod pattern;
mod traits;

pub use error::*;
pub use metrics::*;
pub use pattern::{FieldPattern, FieldPatternSet, PatternError, PatternSyntax};
pub use traits::*;
