//! Site-level rollup of process statistics
//!
//! A `SiteRecord` tracks population statistics per logical site; the
//! heavier derived aggregation across member process records happens at
//! read time. Recomputation is triggered on structural change only
//! (new process, new site), never per request, so the hot path stays
//! O(1); the one O(n) scan here is bounded by the retention cap.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::aggregate::RunningAggregate;
use crate::error::Result;
use crate::record::ProcessRecord;
use crate::registry::ProcessRegistry;
use crate::store::StatsSink;

/// Population statistics for one logical site
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteRecord {
    pub site_id: String,

    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,

    /// Total distinct processes ever seen for this site (approximated)
    pub process_spawn: u64,

    /// Living-process count, streamed over successive recomputations.
    /// The average is kept at or above 1: the recomputation itself runs
    /// in a live process.
    pub process_count: RunningAggregate,
}

impl SiteRecord {
    fn new(site_id: &str, living_count: f64, now: DateTime<Utc>) -> Self {
        let mut process_count = RunningAggregate::new();
        // a fresh aggregate is empty, seed() cannot fail
        let _ = process_count.seed(living_count);
        Self {
            site_id: site_id.to_string(),
            created_at: now,
            last_updated_at: now,
            process_spawn: 1,
            process_count,
        }
    }
}

/// Derived site-wide statistics, computed at read time from the member
/// process records; never stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteSummary {
    pub site_id: String,

    /// Retained process records contributing to this summary
    pub record_count: usize,
    pub living_count: usize,

    pub process_spawn: u64,
    pub process_count_avg: f64,
    pub process_count_max: f64,

    pub request_count: u64,
    pub exception_count: u64,

    /// Weighted combination across member records; empty when the site
    /// has no retained records
    pub response_time: Option<RunningAggregate>,
    pub memory: Option<RunningAggregate>,
    pub vm_peak: Option<RunningAggregate>,
    pub threads: Option<RunningAggregate>,

    /// Monotonic cpu totals, seconds
    pub user_cpu_total: f64,
    pub system_cpu_total: f64,

    /// Record lifetime (creation to last observation), seconds; absent
    /// when the site has no retained records
    pub lifetime_min: Option<f64>,
    pub lifetime_avg: Option<f64>,
    pub lifetime_max: Option<f64>,

    /// Cpu seconds consumed per second of request wall time, percent.
    /// `None` until any response time has been accumulated; values above
    /// 100 mean multi-core or multi-process concurrency within the site.
    pub cpu_load_percent: Option<f64>,
}

/// Periodic site-level aggregation over the process registry
pub struct SiteRollup {
    store: Arc<dyn StatsSink>,
    registry: Arc<ProcessRegistry>,
}

impl SiteRollup {
    pub fn new(store: Arc<dyn StatsSink>, registry: Arc<ProcessRegistry>) -> Self {
        Self { store, registry }
    }

    /// Recompute the site's population statistics.
    ///
    /// The caller supplies `is_new_spawn` — whether this invocation is a
    /// response to a genuinely new process; the rollup itself is
    /// idempotent and safe to call redundantly. Dead member processes
    /// are marked as part of the liveness pass.
    pub fn recompute(&self, site_id: &str, is_new_spawn: bool) -> Result<SiteRecord> {
        let (living, dead) = self.registry.classify_liveness(Some(site_id))?;
        // zero is momentary at best: this call runs in a live process
        let living_count = (living.len() as f64).max(1.0);

        let now = Utc::now();
        let mut record = match self.store.load_site(site_id)? {
            Some(mut record) => {
                record.process_count.update(living_count)?;
                if is_new_spawn {
                    record.process_spawn += 1;
                }
                record
            }
            None => SiteRecord::new(site_id, living_count, now),
        };
        record.last_updated_at = now;

        self.store.save_site(&record)?;
        debug!(
            site = site_id,
            living = living.len(),
            dead = dead.len(),
            spawned = record.process_spawn,
            "site rollup recomputed"
        );
        Ok(record)
    }

    pub fn site_exists(&self, site_id: &str) -> Result<bool> {
        Ok(self.store.load_site(site_id)?.is_some())
    }

    pub fn known_sites(&self) -> Result<Vec<SiteRecord>> {
        Ok(self.store.list_sites()?)
    }

    /// Derive site-wide statistics from the retained member records
    pub fn summarize(&self, site_id: &str) -> Result<SiteSummary> {
        let site_record = self.store.load_site(site_id)?;
        let records = self.store.list_processes(Some(site_id))?;

        let mut request_count = 0u64;
        let mut exception_count = 0u64;
        let mut user_cpu_total = 0.0;
        let mut system_cpu_total = 0.0;
        let mut living_count = 0usize;
        let mut lifetimes = RunningAggregate::new();

        let mut response_time: Option<RunningAggregate> = None;
        let mut memory: Option<RunningAggregate> = None;
        let mut vm_peak: Option<RunningAggregate> = None;
        let mut threads: Option<RunningAggregate> = None;

        for record in &records {
            request_count += record.request_count;
            exception_count += record.exception_count;
            user_cpu_total += record.user_cpu.sum();
            system_cpu_total += record.system_cpu.sum();
            if !record.liveness.is_dead() {
                living_count += 1;
            }
            lifetimes.update(lifetime_seconds(record))?;

            merge_into(&mut response_time, &record.response_time)?;
            merge_into(&mut memory, &record.memory)?;
            merge_into(&mut vm_peak, &record.vm_peak)?;
            merge_into(&mut threads, &record.threads)?;
        }

        let response_time_sum = response_time.as_ref().map_or(0.0, |a| a.sum());
        let cpu_load_percent = if response_time_sum > 0.0 {
            Some((user_cpu_total + system_cpu_total) / response_time_sum * 100.0)
        } else {
            None
        };

        Ok(SiteSummary {
            site_id: site_id.to_string(),
            record_count: records.len(),
            living_count,
            process_spawn: site_record.as_ref().map_or(0, |s| s.process_spawn),
            process_count_avg: site_record
                .as_ref()
                .map_or(0.0, |s| s.process_count.average()),
            process_count_max: site_record.as_ref().map_or(0.0, |s| s.process_count.max()),
            request_count,
            exception_count,
            response_time,
            memory,
            vm_peak,
            threads,
            user_cpu_total,
            system_cpu_total,
            lifetime_min: (!lifetimes.is_empty()).then(|| lifetimes.min()),
            lifetime_avg: (!lifetimes.is_empty()).then(|| lifetimes.average()),
            lifetime_max: (!lifetimes.is_empty()).then(|| lifetimes.max()),
            cpu_load_percent,
        })
    }
}

fn lifetime_seconds(record: &ProcessRecord) -> f64 {
    record.lifetime().num_milliseconds() as f64 / 1000.0
}

/// Fold `aggregate` into the accumulator, treating an empty accumulator
/// as identity
fn merge_into(
    accumulator: &mut Option<RunningAggregate>,
    aggregate: &RunningAggregate,
) -> Result<()> {
    if aggregate.is_empty() {
        return Ok(());
    }
    match accumulator {
        Some(existing) => existing.merge(aggregate)?,
        None => *accumulator = Some(*aggregate),
    }
    Ok(())
}
