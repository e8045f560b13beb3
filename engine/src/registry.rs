//! Concurrent-safe store of process records
//!
//! The registry owns every `ProcessRecord`: records are created on the
//! first sample for an unseen pid, mutated on every subsequent sample,
//! and destroyed by eviction or an explicit reset. Real shared state
//! lives in the durable store; the registry adds per-pid exclusive
//! update scopes on top, so observers of different pids never contend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::error::{Result, StoreError};
use crate::record::{Liveness, ProcessRecord};
use crate::sample::Sample;
use crate::store::StatsSink;
use crate::platform::ProcessProbe;

/// Registry of per-process statistics records
pub struct ProcessRegistry {
    store: Arc<dyn StatsSink>,
    probe: Arc<dyn ProcessProbe>,

    /// The site this registry instance reports under
    own_site: String,

    /// Pid of the process hosting this registry. It is always counted as
    /// living for its own site: the first request has no record yet, but
    /// the process answering it plainly exists.
    own_pid: u32,

    /// Reference point for overall elapsed time, injected at
    /// construction (never ambient global state)
    start_time: DateTime<Utc>,

    /// Per-pid update locks, lazily populated and pruned when the record
    /// is deleted
    locks: Mutex<HashMap<u32, Arc<Mutex<()>>>>,
}

impl ProcessRegistry {
    pub fn new(
        store: Arc<dyn StatsSink>,
        probe: Arc<dyn ProcessProbe>,
        own_site: &str,
        own_pid: u32,
        start_time: DateTime<Utc>,
    ) -> Self {
        Self {
            store,
            probe,
            own_site: own_site.to_string(),
            own_pid,
            start_time,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn own_pid(&self) -> u32 {
        self.own_pid
    }

    pub fn own_site(&self) -> &str {
        &self.own_site
    }

    /// Merge one observation into the record owning `pid`.
    ///
    /// Returns the resulting record and whether it was created. The
    /// read-or-create / apply / write sequence is serialized per pid; a
    /// record already confirmed dead is never reused — the pid has been
    /// recycled by the OS, so a fresh record is started instead.
    pub fn observe(&self, pid: u32, site_id: &str, sample: &Sample) -> Result<(ProcessRecord, bool)> {
        sample.validate()?;

        let key_lock = self.key_lock(pid)?;
        let _guard = key_lock.lock().map_err(|_| StoreError::Unavailable {
            reason: format!("update lock for pid {pid} poisoned"),
        })?;

        let now = Utc::now();
        match self.store.load_process(pid)? {
            Some(mut record) if !record.liveness.is_dead() => {
                record.apply_sample(sample, now)?;
                self.store.save_process(&record)?;
                Ok((record, false))
            }
            previous => {
                if previous.is_some() {
                    debug!(pid, "pid reused after confirmed death, starting fresh record");
                }
                let record = ProcessRecord::from_first_sample(pid, site_id, sample, now)?;
                self.store.save_process(&record)?;
                Ok((record, true))
            }
        }
    }

    /// Delete the oldest-updated records until at most `max_count`
    /// remain. Ties are broken by ascending pid, so eviction is
    /// deterministic. Idempotent: racing observers may re-create a
    /// record mid-eviction, which is tolerated.
    pub fn evict_over_capacity(&self, max_count: usize) -> Result<usize> {
        let mut records = self.store.list_processes(None)?;
        if records.len() <= max_count {
            return Ok(0);
        }

        records.sort_by(|a, b| {
            a.last_updated_at
                .cmp(&b.last_updated_at)
                .then(a.pid.cmp(&b.pid))
        });

        let excess = records.len() - max_count;
        for record in &records[..excess] {
            self.store.delete_process(record.pid)?;
            self.discard_key_lock(record.pid);
        }

        info!(evicted = excess, cap = max_count, "evicted oldest process records");
        Ok(excess)
    }

    /// Probe every tracked pid (optionally scoped to one site) and
    /// partition into living and dead.
    ///
    /// Absent processes are marked `ConfirmedDead` and persisted;
    /// present ones keep their state — presence never promotes, since the
    /// probe result is stale the moment it returns. A persistence failure
    /// for one record does not abort the sweep.
    pub fn classify_liveness(&self, site: Option<&str>) -> Result<(Vec<u32>, Vec<u32>)> {
        let records = self.store.list_processes(site)?;

        let mut living = Vec::new();
        let mut dead = Vec::new();

        for mut record in records {
            if self.probe.exists(record.pid) {
                living.push(record.pid);
                continue;
            }

            dead.push(record.pid);
            if !record.liveness.is_dead() {
                record.liveness = Liveness::ConfirmedDead;
                if let Err(e) = self.store.save_process(&record) {
                    warn!(pid = record.pid, error = %e, "failed to persist dead mark");
                }
            }
        }

        let scope_includes_self = site.map_or(true, |s| s == self.own_site);
        if scope_includes_self && !living.contains(&self.own_pid) {
            living.push(self.own_pid);
        }

        living.sort_unstable();
        dead.sort_unstable();
        Ok((living, dead))
    }

    /// The liveness label for a pid in a partition produced by
    /// [`classify_liveness`]
    pub fn liveness_of(&self, pid: u32) -> Result<Liveness> {
        if pid == self.own_pid {
            return Ok(Liveness::Assumed);
        }
        Ok(self
            .store
            .load_process(pid)?
            .map_or(Liveness::Unknown, |record| record.liveness))
    }

    pub fn get(&self, pid: u32) -> Result<Option<ProcessRecord>> {
        Ok(self.store.load_process(pid)?)
    }

    pub fn list(&self, site: Option<&str>) -> Result<Vec<ProcessRecord>> {
        Ok(self.store.list_processes(site)?)
    }

    /// Remove one record; deleting an absent pid is not an error
    pub fn delete(&self, pid: u32) -> Result<()> {
        self.store.delete_process(pid)?;
        self.discard_key_lock(pid);
        Ok(())
    }

    /// Delete all statistics, optionally scoped to one site. Returns the
    /// number of process records removed.
    pub fn reset(&self, site: Option<&str>) -> Result<usize> {
        let records = self.store.list_processes(site)?;
        let removed = records.len();
        for record in &records {
            self.store.delete_process(record.pid)?;
            self.discard_key_lock(record.pid);
        }

        for site_record in self.store.list_sites()? {
            if site.map_or(true, |s| site_record.site_id == s) {
                self.store.delete_site(&site_record.site_id)?;
            }
        }

        info!(removed, site = site.unwrap_or("<all>"), "statistics reset");
        Ok(removed)
    }

    fn key_lock(&self, pid: u32) -> Result<Arc<Mutex<()>>> {
        let mut locks = self.locks.lock().map_err(|_| StoreError::Unavailable {
            reason: "registry lock table poisoned".to_string(),
        })?;
        Ok(Arc::clone(locks.entry(pid).or_default()))
    }

    /// Drop the lock entry of a pid whose record is gone, keeping the
    /// table bounded by the record population. A racing observer simply
    /// re-creates the entry.
    fn discard_key_lock(&self, pid: u32) {
        if let Ok(mut locks) = self.locks.lock() {
            locks.remove(&pid);
        }
    }
}
