//! Request capture: timing, filtering and the inline cost annotation
//!
//! The host web framework drives this module around each request: start
//! a timer when the request comes in, finish it when the response is
//! done, decide via the filter whether the measurement is kept, and
//! optionally splice a "this page cost N ms" note into HTML bodies.

use std::time::Instant;

use crate::config::CaptureConfig;
use crate::error::PlatformResult;
use crate::platform::MetricsSource;
use crate::sample::Sample;

/// Times one request and measures only its share of cpu time
pub struct RequestTimer {
    started_at: Instant,
    user_cpu_start: f64,
    system_cpu_start: f64,
}

impl RequestTimer {
    /// Snapshot wall clock and cumulative processor times at request
    /// start.
    ///
    /// Only the deltas of processes included in statistics should be
    /// accumulated, so absolute processor times are never stored.
    pub fn start(source: &dyn MetricsSource) -> PlatformResult<Self> {
        let (user, system) = source.processor_times()?;
        Ok(Self {
            started_at: Instant::now(),
            user_cpu_start: user,
            system_cpu_start: system,
        })
    }

    /// Finalize the measurement into a `Sample`.
    ///
    /// A platform failure here means "no sample this time": the caller
    /// drops the measurement and serves the response normally.
    pub fn finish(
        &self,
        source: &dyn MetricsSource,
        db_query_count: Option<u32>,
        is_exception: bool,
    ) -> PlatformResult<Sample> {
        let response_time = self.started_at.elapsed().as_secs_f64();
        let metrics = source.current_process_metrics()?;
        let (user, system) = source.processor_times()?;

        Ok(Sample {
            response_time,
            memory_bytes: metrics.memory_bytes,
            vm_peak_bytes: metrics.vm_peak_bytes,
            thread_count: metrics.thread_count,
            user_cpu_seconds: (user - self.user_cpu_start).max(0.0),
            system_cpu_seconds: (system - self.system_cpu_start).max(0.0),
            db_query_count,
            is_exception,
        })
    }

    pub fn elapsed_seconds(&self) -> f64 {
        self.started_at.elapsed().as_secs_f64()
    }
}

/// Decides which responses are included in statistics
pub struct CaptureFilter {
    only_mime_types: Option<Vec<String>>,
    exclude_paths: Vec<(String, bool)>,
}

impl CaptureFilter {
    pub fn from_config(config: &CaptureConfig) -> Self {
        Self {
            only_mime_types: config.only_mime_types.clone(),
            exclude_paths: config
                .exclude_paths
                .iter()
                .map(|filter| (filter.path.clone(), filter.recursive))
                .collect(),
        }
    }

    /// Whether a response should be measured.
    ///
    /// The mime allow list only applies to 200 responses (a 304 has no
    /// meaningful content type but is still worth counting); the path
    /// exclusion list always applies.
    pub fn should_capture(&self, path: &str, status: u16, content_type: Option<&str>) -> bool {
        if status == 200 {
            if let Some(allowed) = &self.only_mime_types {
                let mime = content_type
                    .map(|value| value.split(';').next().unwrap_or("").trim())
                    .unwrap_or("");
                if !allowed.iter().any(|entry| entry == mime) {
                    return false;
                }
            }
        }

        for (excluded, recursive) in &self.exclude_paths {
            if *recursive && path.starts_with(excluded.as_str()) {
                return false;
            }
            if path == excluded {
                return false;
            }
        }

        true
    }
}

/// Render the inline cost annotation and splice it into an HTML body.
///
/// `own_seconds` is the time the statistics machinery itself took,
/// `total_seconds` the full response time. Returns `None` when the
/// marker is absent, leaving the body untouched.
pub fn annotate_html(
    body: &str,
    marker: &str,
    template: &str,
    own_seconds: f64,
    total_seconds: f64,
) -> Option<String> {
    if !body.contains(marker) {
        return None;
    }

    let percent = if total_seconds > 0.0 {
        own_seconds / total_seconds * 100.0
    } else {
        0.0
    };
    let note = template
        .replace("{own}", &format!("{:.1}", own_seconds * 1000.0))
        .replace("{total}", &format!("{:.1}", total_seconds * 1000.0))
        .replace("{perc}", &format!("{percent:.1}"));

    Some(body.replacen(marker, &note, 1))
}
