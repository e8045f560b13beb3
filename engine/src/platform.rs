//! Platform collaborators: OS process metrics and liveness probes
//!
//! Values come from the `/proc` filesystem on Linux (kB figures are
//! converted to bytes) and from `getrusage` for cumulative processor
//! times. Probe failures are an expected outcome, not a fault: a process
//! file vanishing mid-read simply means the process is gone.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PlatformError, PlatformResult};

/// Point-in-time metrics for one process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessMetrics {
    pub pid: u32,
    pub thread_count: u32,
    /// Resident set size (VmRSS), bytes
    pub memory_bytes: u64,
    /// Peak virtual memory size (VmPeak), bytes
    pub vm_peak_bytes: u64,
}

/// Host memory figures from `/proc/meminfo`; dashboard-only
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostMemory {
    pub total_bytes: u64,
    pub free_bytes: u64,
    pub buffers_bytes: u64,
    pub cached_bytes: u64,
    pub swap_total_bytes: u64,
    pub swap_free_bytes: u64,
}

impl HostMemory {
    /// Memory actually used, counting buffers and page cache as free
    pub fn used_bytes(&self) -> u64 {
        let reclaimable = self.free_bytes + self.buffers_bytes + self.cached_bytes;
        self.total_bytes.saturating_sub(reclaimable)
    }

    pub fn swap_used_bytes(&self) -> u64 {
        self.swap_total_bytes.saturating_sub(self.swap_free_bytes)
    }
}

/// Liveness probe against the host OS
pub trait ProcessProbe: Send + Sync {
    /// Whether the process currently exists. Probe errors count as
    /// "not found": absence of the process file is the normal way a
    /// dead process announces itself.
    fn exists(&self, pid: u32) -> bool;
}

/// Source of the calling process's own metrics
pub trait MetricsSource: Send + Sync {
    fn current_process_metrics(&self) -> PlatformResult<ProcessMetrics>;

    /// Cumulative (user, system) cpu seconds since process start,
    /// including reaped children
    fn processor_times(&self) -> PlatformResult<(f64, f64)>;
}

/// `/proc`-backed probe
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcProbe;

impl ProcessProbe for ProcProbe {
    fn exists(&self, pid: u32) -> bool {
        Path::new(&format!("/proc/{pid}")).exists()
    }
}

/// Probe answering from a fixed pid set; for tests and embeddings
/// without a `/proc` filesystem
#[derive(Debug, Clone, Default)]
pub struct FixedProbe {
    living: HashSet<u32>,
}

impl FixedProbe {
    pub fn new<I: IntoIterator<Item = u32>>(living: I) -> Self {
        Self {
            living: living.into_iter().collect(),
        }
    }
}

impl ProcessProbe for FixedProbe {
    fn exists(&self, pid: u32) -> bool {
        self.living.contains(&pid)
    }
}

/// `/proc/self/status` + `getrusage` metrics source (Linux)
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcStatusSource;

impl MetricsSource for ProcStatusSource {
    fn current_process_metrics(&self) -> PlatformResult<ProcessMetrics> {
        read_process_metrics("self")
    }

    #[cfg(target_os = "linux")]
    fn processor_times(&self) -> PlatformResult<(f64, f64)> {
        use nix::sys::resource::{getrusage, UsageWho};

        let own = getrusage(UsageWho::RUSAGE_SELF).map_err(|e| PlatformError::Unavailable {
            reason: format!("getrusage(RUSAGE_SELF): {e}"),
        })?;
        let children =
            getrusage(UsageWho::RUSAGE_CHILDREN).map_err(|e| PlatformError::Unavailable {
                reason: format!("getrusage(RUSAGE_CHILDREN): {e}"),
            })?;

        let seconds = |tv: nix::sys::time::TimeVal| {
            tv.tv_sec() as f64 + tv.tv_usec() as f64 / 1_000_000.0
        };
        Ok((
            seconds(own.user_time()) + seconds(children.user_time()),
            seconds(own.system_time()) + seconds(children.system_time()),
        ))
    }

    #[cfg(not(target_os = "linux"))]
    fn processor_times(&self) -> PlatformResult<(f64, f64)> {
        Err(PlatformError::Unavailable {
            reason: "processor times are only available on Linux".to_string(),
        })
    }
}

/// Parse `/proc/<pid>/status` for one process
pub fn read_process_metrics(pid: &str) -> PlatformResult<ProcessMetrics> {
    let path = format!("/proc/{pid}/status");
    let content = fs::read_to_string(&path).map_err(|e| PlatformError::Unavailable {
        reason: format!("cannot read {path}: {e}"),
    })?;
    parse_status(&path, &content)
}

fn parse_status(path: &str, content: &str) -> PlatformResult<ProcessMetrics> {
    let mut pid = None;
    let mut threads = None;
    let mut vm_rss = None;
    let mut vm_peak = None;

    for line in content.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key {
            "Pid" => pid = value.parse::<u32>().ok(),
            "Threads" => threads = value.parse::<u32>().ok(),
            "VmRSS" => vm_rss = parse_kb(value),
            "VmPeak" => vm_peak = parse_kb(value),
            _ => {}
        }
    }

    let missing = |field: &str| PlatformError::Malformed {
        path: path.to_string(),
        reason: format!("missing {field}"),
    };

    Ok(ProcessMetrics {
        pid: pid.ok_or_else(|| missing("Pid"))?,
        thread_count: threads.ok_or_else(|| missing("Threads"))?,
        memory_bytes: vm_rss.ok_or_else(|| missing("VmRSS"))?,
        vm_peak_bytes: vm_peak.ok_or_else(|| missing("VmPeak"))?,
    })
}

/// Parse a "<n> kB" status value into bytes
fn parse_kb(value: &str) -> Option<u64> {
    let mut parts = value.split_whitespace();
    let number = parts.next()?.parse::<u64>().ok()?;
    match parts.next() {
        Some(unit) if unit.eq_ignore_ascii_case("kb") => Some(number * 1024),
        None => Some(number),
        _ => None,
    }
}

/// Read host memory figures from `/proc/meminfo`
pub fn host_memory_snapshot() -> PlatformResult<HostMemory> {
    let content = fs::read_to_string("/proc/meminfo").map_err(|e| PlatformError::Unavailable {
        reason: format!("cannot read /proc/meminfo: {e}"),
    })?;
    parse_meminfo(&content)
}

fn parse_meminfo(content: &str) -> PlatformResult<HostMemory> {
    let mut fields: [(&str, Option<u64>); 6] = [
        ("MemTotal", None),
        ("MemFree", None),
        ("Buffers", None),
        ("Cached", None),
        ("SwapTotal", None),
        ("SwapFree", None),
    ];

    for line in content.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        for (name, slot) in fields.iter_mut() {
            if *name == key {
                *slot = parse_kb(value.trim());
            }
        }
    }

    let get = |index: usize| {
        fields[index].1.ok_or_else(|| PlatformError::Malformed {
            path: "/proc/meminfo".to_string(),
            reason: format!("missing {}", fields[index].0),
        })
    };

    Ok(HostMemory {
        total_bytes: get(0)?,
        free_bytes: get(1)?,
        buffers_bytes: get(2)?,
        cached_bytes: get(3)?,
        swap_total_bytes: get(4)?,
        swap_free_bytes: get(5)?,
    })
}

/// Seconds the host has been up, from `/proc/uptime`
pub fn host_uptime_seconds() -> PlatformResult<f64> {
    let content = fs::read_to_string("/proc/uptime").map_err(|e| PlatformError::Unavailable {
        reason: format!("cannot read /proc/uptime: {e}"),
    })?;
    content
        .split_whitespace()
        .next()
        .and_then(|raw| raw.parse::<f64>().ok())
        .ok_or_else(|| PlatformError::Malformed {
            path: "/proc/uptime".to_string(),
            reason: "missing uptime field".to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATUS: &str = "\
Name:\tserver
Pid:\t4321
Threads:\t8
VmPeak:\t  204800 kB
VmRSS:\t   51200 kB
";

    #[test]
    fn test_parse_status() {
        let metrics = parse_status("/proc/self/status", STATUS).unwrap();
        assert_eq!(metrics.pid, 4321);
        assert_eq!(metrics.thread_count, 8);
        assert_eq!(metrics.vm_peak_bytes, 204800 * 1024);
        assert_eq!(metrics.memory_bytes, 51200 * 1024);
    }

    #[test]
    fn test_parse_status_missing_field() {
        let result = parse_status("/proc/self/status", "Name:\tserver\nPid:\t1\n");
        assert!(matches!(result, Err(PlatformError::Malformed { .. })));
    }

    #[test]
    fn test_parse_kb() {
        assert_eq!(parse_kb("16 kB"), Some(16 * 1024));
        assert_eq!(parse_kb("7"), Some(7));
        assert_eq!(parse_kb("16 MB"), None);
    }

    #[test]
    fn test_parse_meminfo() {
        let content = "\
MemTotal:       16309512 kB
MemFree:         2550504 kB
Buffers:          318184 kB
Cached:          8601704 kB
SwapCached:            0 kB
SwapTotal:       2097148 kB
SwapFree:        2097148 kB
";
        let memory = parse_meminfo(content).unwrap();
        assert_eq!(memory.total_bytes, 16309512 * 1024);
        assert_eq!(memory.swap_used_bytes(), 0);
        let reclaimable = (2550504 + 318184 + 8601704) * 1024;
        assert_eq!(memory.used_bytes(), 16309512 * 1024 - reclaimable);
    }

    #[test]
    fn test_fixed_probe() {
        let probe = FixedProbe::new([100, 200]);
        assert!(probe.exists(100));
        assert!(!probe.exists(300));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_own_process_metrics() {
        let source = ProcStatusSource;
        let metrics = source.current_process_metrics().unwrap();
        assert_eq!(metrics.pid, std::process::id());
        assert!(metrics.thread_count >= 1);
        assert!(metrics.memory_bytes > 0);

        let (user, system) = source.processor_times().unwrap();
        assert!(user >= 0.0);
        assert!(system >= 0.0);
    }
}
