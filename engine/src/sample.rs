//! Per-request measurement sample
//!
//! A `Sample` is created once per completed request by the capture
//! collaborator and consumed immediately by the registry. It is never
//! stored: only the running aggregates it feeds are.

use serde::{Deserialize, Serialize};

use crate::error::{SampleError, SampleResult};

/// One request's measured metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Wall-clock processing time in seconds
    pub response_time: f64,

    /// Resident set size (VmRSS) in bytes
    pub memory_bytes: u64,

    /// Peak virtual memory size (VmPeak) in bytes
    pub vm_peak_bytes: u64,

    /// Number of threads in the process
    pub thread_count: u32,

    /// User-mode cpu seconds consumed by this request
    pub user_cpu_seconds: f64,

    /// System-mode cpu seconds consumed by this request
    pub system_cpu_seconds: f64,

    /// Database queries issued by this request; only present when debug
    /// instrumentation is enabled
    pub db_query_count: Option<u32>,

    /// Whether the request ended in an unhandled exception
    pub is_exception: bool,
}

impl Sample {
    /// Check the sample against its metric invariants.
    ///
    /// A malformed sample is rejected as a whole; it is never partially
    /// applied to a record.
    pub fn validate(&self) -> SampleResult<()> {
        Self::check_non_negative("response_time", self.response_time)?;
        Self::check_non_negative("user_cpu_seconds", self.user_cpu_seconds)?;
        Self::check_non_negative("system_cpu_seconds", self.system_cpu_seconds)?;

        if self.thread_count < 1 {
            return Err(SampleError::NoThreads);
        }

        Ok(())
    }

    fn check_non_negative(field: &'static str, value: f64) -> SampleResult<()> {
        if value.is_nan() {
            return Err(SampleError::NotANumber { field });
        }
        if value < 0.0 {
            return Err(SampleError::NegativeValue { field, value });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_with_response_time(response_time: f64) -> Sample {
        Sample {
            response_time,
            memory_bytes: 10 * 1024 * 1024,
            vm_peak_bytes: 64 * 1024 * 1024,
            thread_count: 1,
            user_cpu_seconds: 0.01,
            system_cpu_seconds: 0.002,
            db_query_count: None,
            is_exception: false,
        }
    }

    #[test]
    fn test_valid_sample() {
        assert!(sample_with_response_time(0.125).validate().is_ok());
    }

    #[test]
    fn test_negative_response_time_rejected() {
        let sample = sample_with_response_time(-0.1);
        assert!(matches!(
            sample.validate(),
            Err(SampleError::NegativeValue {
                field: "response_time",
                ..
            })
        ));
    }

    #[test]
    fn test_nan_rejected() {
        let sample = sample_with_response_time(f64::NAN);
        assert!(matches!(
            sample.validate(),
            Err(SampleError::NotANumber { .. })
        ));
    }

    #[test]
    fn test_zero_threads_rejected() {
        let mut sample = sample_with_response_time(0.1);
        sample.thread_count = 0;
        assert!(matches!(sample.validate(), Err(SampleError::NoThreads)));
    }
}
