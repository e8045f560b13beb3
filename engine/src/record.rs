//! Per-process statistics record
//!
//! One `ProcessRecord` exists per observed worker process, keyed by pid.
//! OS pids are reused over time, so `(pid, created_at)` is the real
//! identity: a record confirmed dead is never resurrected, a fresh
//! observation under the same pid creates a new record.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::aggregate::RunningAggregate;
use crate::error::{RecordError, RecordResult, SampleResult};
use crate::sample::Sample;

/// Liveness classification of a tracked process.
///
/// There is no confirmed-alive state: a probe result goes stale between
/// check and use, so presence in the process table never promotes a
/// record. Death, once proven, is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Liveness {
    /// Never actively checked; the default
    Unknown,

    /// The calling process itself: its running code is the only evidence
    /// of life accepted, and it is already stale
    Assumed,

    /// Explicitly probed and found absent from the OS process table
    ConfirmedDead,
}

impl Liveness {
    pub fn is_dead(self) -> bool {
        self == Liveness::ConfirmedDead
    }
}

/// Running statistics for one worker process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessRecord {
    /// OS process identifier; reused over time, see module docs
    pub pid: u32,

    /// Logical site this process serves
    pub site_id: String,

    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,

    pub liveness: Liveness,

    /// Requests answered since `created_at`
    pub request_count: u64,

    /// Requests that ended in an unhandled exception
    pub exception_count: u64,

    /// Wall-clock processing time, seconds; sum is total time spent
    pub response_time: RunningAggregate,

    /// Resident set size, bytes
    pub memory: RunningAggregate,

    /// Peak virtual memory size, bytes
    pub vm_peak: RunningAggregate,

    /// Thread count
    pub threads: RunningAggregate,

    /// User-mode cpu seconds per request; sum is the monotonic total
    pub user_cpu: RunningAggregate,

    /// System-mode cpu seconds per request; sum is the monotonic total
    pub system_cpu: RunningAggregate,

    /// Database queries per request; present only when debug
    /// instrumentation supplies counts
    pub db_queries: Option<RunningAggregate>,
}

impl ProcessRecord {
    /// Create a record seeded from the first sample of an unseen process
    pub fn from_first_sample(
        pid: u32,
        site_id: &str,
        sample: &Sample,
        now: DateTime<Utc>,
    ) -> SampleResult<Self> {
        sample.validate()?;

        Ok(Self {
            pid,
            site_id: site_id.to_string(),
            created_at: now,
            last_updated_at: now,
            liveness: Liveness::Unknown,
            request_count: 1,
            exception_count: u64::from(sample.is_exception),
            response_time: RunningAggregate::seeded(sample.response_time)?,
            memory: RunningAggregate::seeded(sample.memory_bytes as f64)?,
            vm_peak: RunningAggregate::seeded(sample.vm_peak_bytes as f64)?,
            threads: RunningAggregate::seeded(f64::from(sample.thread_count))?,
            user_cpu: RunningAggregate::seeded(sample.user_cpu_seconds)?,
            system_cpu: RunningAggregate::seeded(sample.system_cpu_seconds)?,
            db_queries: match sample.db_query_count {
                Some(count) => Some(RunningAggregate::seeded(f64::from(count))?),
                None => None,
            },
        })
    }

    /// Fold a subsequent sample into the record.
    ///
    /// Validation happens up front so a malformed sample leaves every
    /// aggregate untouched.
    pub fn apply_sample(&mut self, sample: &Sample, now: DateTime<Utc>) -> SampleResult<()> {
        sample.validate()?;

        self.request_count += 1;
        if sample.is_exception {
            self.exception_count += 1;
        }

        self.response_time.update(sample.response_time)?;
        self.memory.update(sample.memory_bytes as f64)?;
        self.vm_peak.update(sample.vm_peak_bytes as f64)?;
        self.threads.update(f64::from(sample.thread_count))?;
        self.user_cpu.update(sample.user_cpu_seconds)?;
        self.system_cpu.update(sample.system_cpu_seconds)?;

        if let Some(count) = sample.db_query_count {
            self.db_queries
                .get_or_insert_with(RunningAggregate::new)
                .update(f64::from(count))?;
        }

        self.last_updated_at = now;
        Ok(())
    }

    /// Check record invariants after loading from the store.
    ///
    /// A violation is surfaced as corruption, never repaired in place.
    pub fn verify(&self) -> RecordResult<()> {
        if self.request_count == 0 {
            return Err(self.corrupt("request_count is zero"));
        }
        if self.last_updated_at < self.created_at {
            return Err(self.corrupt("last_updated_at precedes created_at"));
        }
        if self.response_time.count() != self.request_count {
            return Err(self.corrupt("response_time count does not match request_count"));
        }

        let channels: [(&str, &RunningAggregate); 6] = [
            ("response_time", &self.response_time),
            ("memory", &self.memory),
            ("vm_peak", &self.vm_peak),
            ("threads", &self.threads),
            ("user_cpu", &self.user_cpu),
            ("system_cpu", &self.system_cpu),
        ];
        for (name, aggregate) in channels {
            if aggregate.is_empty() {
                return Err(self.corrupt(&format!("{name} aggregate is empty")));
            }
            if !aggregate.is_coherent() {
                return Err(self.corrupt(&format!("{name} violates min <= avg <= max")));
            }
        }

        if let Some(db) = &self.db_queries {
            if !db.is_coherent() {
                return Err(self.corrupt("db_queries violates min <= avg <= max"));
            }
        }

        Ok(())
    }

    /// Time between record creation and its last observation
    pub fn lifetime(&self) -> Duration {
        self.last_updated_at - self.created_at
    }

    fn corrupt(&self, reason: &str) -> RecordError {
        RecordError::Corrupt {
            pid: self.pid,
            reason: reason.to_string(),
        }
    }
}
