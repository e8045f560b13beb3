//! procmon aggregation engine
//!
//! This library ingests one measurement sample per completed request and
//! maintains streaming min/max/average statistics per worker process and
//! per logical site, with bounded retention over an abstract durable
//! record store. Updates are O(1): historical samples are never rescanned.

pub mod aggregate;
pub mod capture;
pub mod config;
pub mod engine;
pub mod error;
pub mod platform;
pub mod record;
pub mod registry;
pub mod rollup;
pub mod sample;
pub mod store;

// Re-export commonly used types
pub use aggregate::RunningAggregate;
pub use capture::{CaptureFilter, RequestTimer};
pub use config::EngineConfig;
pub use engine::{Overview, StatsEngine};
pub use error::{Result, StatsError};
pub use platform::{FixedProbe, MetricsSource, ProcessProbe};
pub use record::{Liveness, ProcessRecord};
pub use registry::ProcessRegistry;
pub use rollup::{SiteRecord, SiteRollup, SiteSummary};
pub use sample::Sample;
pub use store::{JsonFileStore, MemoryStore, StatsSink};
