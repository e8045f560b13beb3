//! Streaming statistic over a single scalar channel
//!
//! Maintains exact min/max, an incremental mean and a running sum in
//! O(1) per observation. Historical values are never rescanned: the mean
//! is folded forward with `avg' = (avg * count + value) / (count + 1)`,
//! the same recurrence the site rollup uses to combine whole aggregates.
//!
//! All channels are carried as f64. Byte and thread counts stay far below
//! 2^53, so integer channels round-trip exactly.

use serde::{Deserialize, Serialize};

use crate::error::{RecordError, RecordResult, SampleError, SampleResult};

/// Streaming min/max/average/sum over one metric channel
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RunningAggregate {
    min: f64,
    max: f64,
    average: f64,
    sum: f64,
    count: u64,
}

impl Default for RunningAggregate {
    fn default() -> Self {
        Self::new()
    }
}

impl RunningAggregate {
    /// Create an empty aggregate. min/max/average are undefined until the
    /// first observation seeds them.
    pub fn new() -> Self {
        Self {
            min: 0.0,
            max: 0.0,
            average: 0.0,
            sum: 0.0,
            count: 0,
        }
    }

    /// Create an aggregate seeded with its first observation
    pub fn seeded(value: f64) -> SampleResult<Self> {
        check_value(value)?;
        let mut aggregate = Self::new();
        // a fresh aggregate is empty, seed() cannot fail
        let _ = aggregate.seed(value);
        Ok(aggregate)
    }

    /// Seed min, max, average and sum from the first observation.
    ///
    /// Only valid while the aggregate is empty; seeding must equal the
    /// first value exactly, with no trip through the mean recurrence.
    pub fn seed(&mut self, value: f64) -> RecordResult<()> {
        if self.count != 0 {
            return Err(RecordError::AlreadySeeded { count: self.count });
        }
        self.min = value;
        self.max = value;
        self.average = value;
        self.sum = value;
        self.count = 1;
        Ok(())
    }

    /// Fold one observation into the aggregate
    pub fn update(&mut self, value: f64) -> SampleResult<()> {
        check_value(value)?;

        if self.count == 0 {
            // seed() cannot fail here
            let _ = self.seed(value);
            return Ok(());
        }

        self.average =
            (self.average * self.count as f64 + value) / (self.count as f64 + 1.0);
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.sum += value;
        self.count += 1;
        Ok(())
    }

    /// Combine two non-empty aggregates with a count-weighted mean.
    ///
    /// An empty operand has no defined min/max/average; callers treat
    /// empty aggregates as identity and skip them.
    pub fn merge(&mut self, other: &RunningAggregate) -> RecordResult<()> {
        if self.count == 0 || other.count == 0 {
            return Err(RecordError::EmptyAggregate { operation: "merge" });
        }

        let total = (self.count + other.count) as f64;
        self.average =
            (self.average * self.count as f64 + other.average * other.count as f64) / total;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        self.sum += other.sum;
        self.count += other.count;
        Ok(())
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn average(&self) -> f64 {
        self.average
    }

    /// Running sum; doubles as the monotonic total for cpu-time channels
    pub fn sum(&self) -> f64 {
        self.sum
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Check the aggregate invariant: min <= average <= max once seeded.
    /// A small tolerance absorbs accumulated floating point error in the
    /// streaming mean.
    pub fn is_coherent(&self) -> bool {
        if self.count == 0 {
            return true;
        }
        let tolerance = 1e-9 * self.max.abs().max(1.0);
        self.min <= self.average + tolerance && self.average <= self.max + tolerance
    }
}

fn check_value(value: f64) -> SampleResult<()> {
    if value.is_nan() {
        return Err(SampleError::NotANumber { field: "value" });
    }
    if value < 0.0 {
        return Err(SampleError::NegativeValue {
            field: "value",
            value,
        });
    }
    Ok(())
}
