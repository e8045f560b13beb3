//! Engine facade tying the registry and the site rollup together
//!
//! `StatsEngine::ingest` is the one call the capture collaborator makes
//! per measured request: merge the sample, maintain the site record on
//! structural change, and keep retention bounded. Everything on the
//! per-request path is O(1); the O(n) passes (rollup, eviction) run only
//! on process-create or site-create events.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::error::Result;
use crate::platform::{self, HostMemory, ProcessProbe};
use crate::record::ProcessRecord;
use crate::registry::ProcessRegistry;
use crate::rollup::{SiteRollup, SiteSummary};
use crate::sample::Sample;
use crate::store::StatsSink;

/// Aggregation engine facade
pub struct StatsEngine {
    config: EngineConfig,
    registry: Arc<ProcessRegistry>,
    rollup: SiteRollup,
}

/// Dashboard-level view across all sites
#[derive(Debug, Clone, Serialize)]
pub struct Overview {
    pub generated_at: DateTime<Utc>,

    /// Seconds since the engine's injected start instant
    pub engine_uptime_seconds: f64,

    pub sites: Vec<SiteSummary>,

    /// Host memory figures; absent when the platform cannot report them
    pub host_memory: Option<HostMemory>,
}

impl StatsEngine {
    /// Build an engine for the calling process.
    ///
    /// `start_time` is the process-lifetime reference point, captured
    /// once at startup and injected here rather than read from ambient
    /// global state.
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn StatsSink>,
        probe: Arc<dyn ProcessProbe>,
        own_pid: u32,
        start_time: DateTime<Utc>,
    ) -> Self {
        let registry = Arc::new(ProcessRegistry::new(
            Arc::clone(&store),
            probe,
            &config.site_id,
            own_pid,
            start_time,
        ));
        let rollup = SiteRollup::new(store, Arc::clone(&registry));
        Self {
            config,
            registry,
            rollup,
        }
    }

    pub fn registry(&self) -> &ProcessRegistry {
        &self.registry
    }

    pub fn rollup(&self) -> &SiteRollup {
        &self.rollup
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Ingest one completed request's sample for the process `pid`.
    ///
    /// Site statistics are recomputed only when the population changed
    /// (new process or new site), and retention is enforced right after
    /// a creation event, so steady-state ingestion touches exactly one
    /// record.
    pub fn ingest(&self, pid: u32, sample: &Sample) -> Result<(ProcessRecord, bool)> {
        let site_id = self.config.site_id.clone();
        let (record, process_created) = self.registry.observe(pid, &site_id, sample)?;

        let site_known = self.rollup.site_exists(&site_id)?;
        if !site_known || process_created {
            // a spawn on a brand-new site is covered by the site
            // record's initial spawn count of one
            let is_new_spawn = site_known && process_created;
            self.rollup.recompute(&site_id, is_new_spawn)?;

            let cap = self.config.retention.max_process_records;
            if let Err(e) = self.registry.evict_over_capacity(cap) {
                // retention is best effort; the observation itself stuck
                warn!(error = %e, "eviction after creation event failed");
            }
        }

        debug!(
            pid,
            site = %site_id,
            created = process_created,
            requests = record.request_count,
            "sample ingested"
        );
        Ok((record, process_created))
    }

    /// Assemble the dashboard view across every known site
    pub fn overview(&self) -> Result<Overview> {
        let mut sites = Vec::new();
        for site_record in self.rollup.known_sites()? {
            sites.push(self.rollup.summarize(&site_record.site_id)?);
        }
        sites.sort_by(|a, b| a.site_id.cmp(&b.site_id));

        let now = Utc::now();
        Ok(Overview {
            generated_at: now,
            engine_uptime_seconds: (now - self.registry.start_time())
                .num_milliseconds() as f64
                / 1000.0,
            sites,
            host_memory: platform::host_memory_snapshot().ok(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::platform::FixedProbe;
    use crate::store::MemoryStore;

    const OWN_PID: u32 = 9000;

    fn sample(response_time: f64) -> Sample {
        Sample {
            response_time,
            memory_bytes: 4 * 1024 * 1024,
            vm_peak_bytes: 16 * 1024 * 1024,
            thread_count: 1,
            user_cpu_seconds: 0.002,
            system_cpu_seconds: 0.001,
            db_query_count: None,
            is_exception: false,
        }
    }

    fn engine(living: &[u32], max_records: usize) -> StatsEngine {
        let mut config = EngineConfig::default();
        config.site_id = "A".to_string();
        config.retention.max_process_records = max_records;

        StatsEngine::new(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(FixedProbe::new(living.iter().copied())),
            OWN_PID,
            Utc::now(),
        )
    }

    #[test]
    fn test_ingest_flow_spawn_accounting() {
        let engine = engine(&[100, 200], 100);

        engine.ingest(100, &sample(0.1)).unwrap();
        engine.ingest(100, &sample(0.2)).unwrap();
        engine.ingest(200, &sample(0.3)).unwrap();

        let summary = engine.rollup().summarize("A").unwrap();
        assert_eq!(summary.process_spawn, 2);
        assert_eq!(summary.request_count, 3);
        assert_eq!(summary.living_count, 2);
    }

    #[test]
    fn test_ingest_enforces_retention_on_creation() {
        let engine = engine(&[], 2);
        for pid in 1..=4 {
            engine.ingest(pid, &sample(0.1)).unwrap();
        }
        assert!(engine.registry().list(None).unwrap().len() <= 2);
    }

    #[test]
    fn test_overview_lists_sites() {
        let engine = engine(&[100], 100);
        engine.ingest(100, &sample(0.1)).unwrap();

        let overview = engine.overview().unwrap();
        assert_eq!(overview.sites.len(), 1);
        assert_eq!(overview.sites[0].site_id, "A");
        assert!(overview.engine_uptime_seconds >= 0.0);
    }
}
